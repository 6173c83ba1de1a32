//! The message record owned by the timeline.
//!
//! A [`Message`] is created once and then mutated in place by edits,
//! deletes, reactions, and pins. Deletion leaves a tombstone: the record
//! keeps its identity, sender, creation time, and references, while the
//! content is swapped for [`TOMBSTONE_PLACEHOLDER`].

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, ParticipantId};
use crate::time::Timestamp;

/// Content shown in place of a deleted message.
pub const TOMBSTONE_PLACEHOLDER: &str = "This message was deleted.";

/// Lifecycle state along the content axis.
///
/// `Absent` is implicit: a message that has not been created simply has no
/// record. Reaction and pin state are orthogonal to this axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    Active,
    Deleted,
}

/// Where a forwarded message originally came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForwardRef {
    /// Sender of the original message.
    pub sender_id: ParticipantId,
    /// Conversation the original lives in.
    pub conversation_id: ConversationId,
    /// The original message.
    pub message_id: MessageId,
}

/// The last reaction toggle one actor applied to one emoji.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionMark {
    pub at: Timestamp,
    pub present: bool,
}

/// Result of recording a reaction toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The mark was newer and replaced the previous one.
    Applied,
    /// The identical mark was already recorded.
    Duplicate,
    /// An equal-or-newer mark from the same actor already won.
    Stale,
}

/// Emoji → reactors, one last-writer-wins mark per `(emoji, actor)`.
///
/// Toggles are "reactor present" / "reactor absent" marks, never counters,
/// so replaying an event is harmless and a React/Unreact pair converges
/// whichever arrives first. Removed reactors keep their mark (absent) so a
/// late, older React cannot resurrect them. Emoji keep the order in which
/// they were first used.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reactions(IndexMap<String, BTreeMap<ParticipantId, ReactionMark>>);

impl Reactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `actor` set (`present = true`) or cleared `emoji` at `at`.
    ///
    /// On an exact `(at, actor)` tie between set and clear, clear wins.
    pub fn mark(
        &mut self,
        emoji: &str,
        actor: ParticipantId,
        at: Timestamp,
        present: bool,
    ) -> MarkOutcome {
        let marks = self.0.entry(emoji.to_string()).or_default();
        let incoming = ReactionMark { at, present };
        match marks.get(&actor).copied() {
            Some(current) if current == incoming => MarkOutcome::Duplicate,
            Some(current)
                if current.at > at || (current.at == at && !current.present) =>
            {
                MarkOutcome::Stale
            }
            _ => {
                marks.insert(actor, incoming);
                MarkOutcome::Applied
            }
        }
    }

    /// Shorthand for a present mark.
    pub fn add(&mut self, emoji: &str, actor: ParticipantId, at: Timestamp) -> MarkOutcome {
        self.mark(emoji, actor, at, true)
    }

    /// Shorthand for an absent mark.
    pub fn remove(&mut self, emoji: &str, actor: ParticipantId, at: Timestamp) -> MarkOutcome {
        self.mark(emoji, actor, at, false)
    }

    /// Forget every mark stamped at or after `cutoff`.
    ///
    /// Returns `true` if anything was dropped.
    pub fn retain_before(&mut self, cutoff: Timestamp) -> bool {
        let mut dropped = false;
        for marks in self.0.values_mut() {
            let before = marks.len();
            marks.retain(|_, m| m.at < cutoff);
            dropped |= marks.len() != before;
        }
        self.0.retain(|_, marks| !marks.is_empty());
        dropped
    }

    /// Whether `actor` currently reacts with `emoji`.
    pub fn contains(&self, emoji: &str, actor: &ParticipantId) -> bool {
        self.0
            .get(emoji)
            .and_then(|m| m.get(actor))
            .is_some_and(|m| m.present)
    }

    /// Number of current reactors for `emoji`.
    pub fn count(&self, emoji: &str) -> usize {
        self.0
            .get(emoji)
            .map_or(0, |m| m.values().filter(|m| m.present).count())
    }

    /// Current reactors for `emoji`, in id order.
    pub fn reactors(&self, emoji: &str) -> Vec<ParticipantId> {
        self.0
            .get(emoji)
            .map(|m| {
                m.iter()
                    .filter(|(_, mark)| mark.present)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `(emoji, reactors)` for every emoji with at least one current
    /// reactor, in first-use order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Vec<ParticipantId>)> {
        self.0
            .keys()
            .map(|e| (e.as_str(), self.reactors(e)))
            .filter(|(_, r)| !r.is_empty())
    }

    /// No emoji has a current reactor.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|m| m.values().all(|mark| !mark.present))
    }
}

/// A message in a conversation timeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique, immutable message ID.
    pub id: MessageId,
    /// Conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Who sent it.
    pub sender_id: ParticipantId,
    /// When it was created.
    pub created_at: Timestamp,
    /// Current body (the placeholder once deleted).
    pub content: String,
    /// Stamp of the winning edit, if any.
    pub edited_at: Option<Timestamp>,
    /// Actor of the winning edit.
    pub edited_by: Option<ParticipantId>,
    /// Tombstone marker.
    pub deleted_at: Option<Timestamp>,
    /// Actor of the winning delete.
    pub deleted_by: Option<ParticipantId>,
    /// Message this one replies to. Immutable after creation.
    pub reply_to_id: Option<MessageId>,
    /// Thread this message was posted into. Immutable after creation.
    pub thread_parent_id: Option<MessageId>,
    /// Original of a forwarded message. Immutable after creation.
    pub forwarded_from: Option<ForwardRef>,
    /// Reactions by emoji.
    pub reactions: Reactions,
    /// Set while the message is pinned.
    pub pinned_at: Option<Timestamp>,
    /// Created locally and not yet confirmed by the network.
    pub provisional: bool,
}

impl Message {
    /// Create a new active message with no edits, reactions, or pin.
    pub fn new(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: ParticipantId,
        created_at: Timestamp,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id,
            created_at,
            content: content.into(),
            edited_at: None,
            edited_by: None,
            deleted_at: None,
            deleted_by: None,
            reply_to_id: None,
            thread_parent_id: None,
            forwarded_from: None,
            reactions: Reactions::new(),
            pinned_at: None,
            provisional: false,
        }
    }

    pub fn state(&self) -> MessageState {
        if self.deleted_at.is_some() {
            MessageState::Deleted
        } else {
            MessageState::Active
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_edited(&self) -> bool {
        self.edited_at.is_some()
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned_at.is_some()
    }

    pub fn is_thread_reply(&self) -> bool {
        self.thread_parent_id.is_some()
    }

    /// The `(stamp, actor)` an incoming edit must beat.
    ///
    /// The last applied edit, or creation by the sender if never edited.
    pub fn content_version(&self) -> (Timestamp, ParticipantId) {
        match (self.edited_at, self.edited_by) {
            (Some(at), Some(by)) => (at, by),
            _ => (self.created_at, self.sender_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_message() -> Message {
        Message::new(
            MessageId::new(),
            ConversationId::new(),
            ParticipantId::new(),
            Timestamp::from_millis(1_000),
            "hello",
        )
    }

    #[test]
    fn test_new_message_is_active() {
        let msg = test_message();
        assert_eq!(msg.state(), MessageState::Active);
        assert!(!msg.is_edited());
        assert!(!msg.is_pinned());
        assert_eq!(msg.content_version(), (msg.created_at, msg.sender_id));
    }

    #[test]
    fn test_reactions_replay_is_harmless() {
        let mut reactions = Reactions::new();
        let amy = ParticipantId::new();
        let t1 = Timestamp::from_millis(10);

        assert_eq!(reactions.add("👍", amy, t1), MarkOutcome::Applied);
        assert_eq!(reactions.add("👍", amy, t1), MarkOutcome::Duplicate);
        assert_eq!(reactions.count("👍"), 1);
    }

    #[test]
    fn test_react_unreact_commute() {
        let amy = ParticipantId::new();
        let t1 = Timestamp::from_millis(10);
        let t2 = Timestamp::from_millis(20);

        let mut forward = Reactions::new();
        forward.add("👍", amy, t1);
        forward.remove("👍", amy, t2);

        let mut backward = Reactions::new();
        backward.remove("👍", amy, t2);
        assert_eq!(backward.add("👍", amy, t1), MarkOutcome::Stale);

        assert_eq!(forward, backward);
        assert!(forward.is_empty());
        assert_eq!(forward.iter().count(), 0);
    }

    #[test]
    fn test_tie_goes_to_removal() {
        let mut reactions = Reactions::new();
        let amy = ParticipantId::new();
        let t = Timestamp::from_millis(10);

        reactions.remove("👍", amy, t);
        assert_eq!(reactions.add("👍", amy, t), MarkOutcome::Stale);
        assert!(!reactions.contains("👍", &amy));
    }

    #[test]
    fn test_reactions_keep_first_use_order() {
        let mut reactions = Reactions::new();
        let amy = ParticipantId::new();
        let bob = ParticipantId::new();
        let t = Timestamp::from_millis(1);

        reactions.add("🎉", amy, t);
        reactions.add("👍", bob, t);
        reactions.add("🎉", bob, t);

        let order: Vec<&str> = reactions.iter().map(|(e, _)| e).collect();
        assert_eq!(order, vec!["🎉", "👍"]);
        assert!(reactions.contains("🎉", &bob));
        assert_eq!(reactions.reactors("🎉").len(), 2);
    }

    #[test]
    fn test_retain_before_drops_late_marks() {
        let mut reactions = Reactions::new();
        let amy = ParticipantId::new();
        let bob = ParticipantId::new();

        reactions.add("👍", amy, Timestamp::from_millis(5));
        reactions.add("🎉", bob, Timestamp::from_millis(50));

        assert!(reactions.retain_before(Timestamp::from_millis(20)));
        assert_eq!(reactions.count("👍"), 1);
        assert_eq!(reactions.count("🎉"), 0);
        assert!(!reactions.retain_before(Timestamp::from_millis(20)));
    }
}
