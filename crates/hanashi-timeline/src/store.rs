//! Message records for one conversation.
//!
//! The store owns identity and content. It keeps records by id plus an
//! ordered index on `(created_at, id)`; records are replaced wholesale by
//! merge results and never removed.

use std::collections::{BTreeSet, HashMap};

use hanashi_types::{ConversationId, Message, MessageId, Timestamp};

/// Authoritative message records of one conversation.
#[derive(Debug, Clone)]
pub struct TimelineStore {
    conversation_id: ConversationId,
    messages: HashMap<MessageId, Message>,
    order: BTreeSet<(Timestamp, MessageId)>,
    /// Latest stamp observed on any applied event.
    clock: Timestamp,
    /// Bumped on every state change.
    version: u64,
}

impl TimelineStore {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            messages: HashMap::new(),
            order: BTreeSet::new(),
            clock: Timestamp::default(),
            version: 0,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Store a merge result. `created_at` never changes for an id, so the
    /// ordered index only grows on first insert.
    pub(crate) fn put(&mut self, message: Message) {
        if !self.messages.contains_key(&message.id) {
            self.order.insert((message.created_at, message.id));
        }
        self.observe(message.created_at);
        self.messages.insert(message.id, message);
        self.version += 1;
    }

    /// Mutable access for flags the merge rules do not own
    /// (provisional, pin mirror).
    pub(crate) fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        let message = self.messages.get_mut(id)?;
        self.version += 1;
        Some(message)
    }

    /// Advance the observed clock.
    pub(crate) fn observe(&mut self, at: Timestamp) {
        self.clock = self.clock.max(at);
    }

    /// Messages in timeline order, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.order.iter().filter_map(|(_, id)| self.messages.get(id))
    }

    /// The `n` most recent messages, oldest first.
    pub fn latest(&self, n: usize) -> Vec<&Message> {
        let mut tail: Vec<&Message> = self
            .order
            .iter()
            .rev()
            .take(n)
            .filter_map(|(_, id)| self.messages.get(id))
            .collect();
        tail.reverse();
        tail
    }

    /// Latest stamp seen on any applied event.
    pub fn clock(&self) -> Timestamp {
        self.clock
    }

    /// Monotonic change counter.
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use hanashi_types::ParticipantId;

    use super::*;

    fn message_at(store: &TimelineStore, ms: u64) -> Message {
        Message::new(
            MessageId::new(),
            store.conversation_id(),
            ParticipantId::new(),
            Timestamp::from_millis(ms),
            format!("at {ms}"),
        )
    }

    #[test]
    fn test_new_store() {
        let store = TimelineStore::new(ConversationId::new());
        assert!(store.is_empty());
        assert_eq!(store.version(), 0);
        assert_eq!(store.clock(), Timestamp::default());
    }

    #[test]
    fn test_iter_is_created_at_order() {
        let mut store = TimelineStore::new(ConversationId::new());
        let late = message_at(&store, 300);
        let early = message_at(&store, 100);
        let mid = message_at(&store, 200);
        for m in [late.clone(), early.clone(), mid.clone()] {
            store.put(m);
        }

        let ids: Vec<MessageId> = store.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![early.id, mid.id, late.id]);
        assert_eq!(store.clock(), Timestamp::from_millis(300));

        let tail: Vec<MessageId> = store.latest(2).iter().map(|m| m.id).collect();
        assert_eq!(tail, vec![mid.id, late.id]);
    }

    #[test]
    fn test_put_replaces_without_duplicating_order() {
        let mut store = TimelineStore::new(ConversationId::new());
        let mut msg = message_at(&store, 100);
        store.put(msg.clone());
        msg.content = "edited".into();
        store.put(msg.clone());

        assert_eq!(store.len(), 1);
        assert_eq!(store.iter().count(), 1);
        assert_eq!(store.get(&msg.id).unwrap().content, "edited");
        assert_eq!(store.version(), 2);
    }
}
