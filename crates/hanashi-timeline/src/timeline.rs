//! One conversation's timeline: ingest entry point plus derived views.
//!
//! All mutations of a conversation go through [`Timeline::ingest`], one at a
//! time. The store, pin registry, thread index, grouping cache, and pending
//! buffer are updated together so every read sees a consistent state.

use std::sync::Arc;
use std::time::Instant;

use hanashi_types::{ConversationId, Message, MessageId, ParticipantDirectory, Timestamp};
use tracing::{debug, warn};

use crate::config::{ConfigError, TimelineConfig};
use crate::error::Rejected;
use crate::event::{CreatePayload, EventKey, MutationEvent, Payload, Provenance, RawMutationEvent};
use crate::grouping::{DisplayGroup, GroupingEngine, GroupingRules};
use crate::ingest;
use crate::invalidation::{Invalidation, View};
use crate::merge::{self, Disposition, Merge};
use crate::pending::{Buffered, PendingBuffer};
use crate::pins::{PinChange, PinEntry, PinRegistry};
use crate::replies::{self, ForwardInfo, ReplyPreview, ThreadIndex, ThreadSummary};
use crate::store::TimelineStore;

/// Outcome of a buffered event replayed after its `Create` arrived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replay {
    pub key: EventKey,
    pub result: Result<Disposition, Rejected>,
}

/// Successful ingest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Applied {
    pub disposition: Disposition,
    /// Views to recompute, including those touched by replays.
    pub invalidated: Invalidation,
    /// Buffered dependents replayed by this event.
    pub replayed: Vec<Replay>,
    /// Oldest buffered event dropped to make room for this one.
    pub evicted: Option<MutationEvent>,
}

impl Applied {
    fn new(disposition: Disposition, invalidated: Invalidation) -> Self {
        Self {
            disposition,
            invalidated,
            replayed: Vec::new(),
            evicted: None,
        }
    }
}

enum Step {
    Done(Disposition, Invalidation),
    Missing,
}

/// Timeline of one conversation.
#[derive(Debug, Clone)]
pub struct Timeline {
    id: ConversationId,
    config: TimelineConfig,
    store: TimelineStore,
    pins: PinRegistry,
    threads: ThreadIndex,
    grouping: GroupingEngine,
    pending: PendingBuffer,
}

impl Timeline {
    pub fn new(id: ConversationId, config: TimelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rules = GroupingRules::new(config.grouping_window_ms(), config.utc_offset_minutes)
            .ok_or_else(|| ConfigError::Invalid("utc_offset_minutes out of range".into()))?;
        Ok(Self {
            id,
            store: TimelineStore::new(id),
            pins: PinRegistry::new(),
            threads: ThreadIndex::new(config.thread_count_policy),
            grouping: GroupingEngine::new(rules),
            pending: PendingBuffer::new(config.pending_capacity, config.pending_timeout()),
            config,
        })
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    /// Parse and ingest a raw network event.
    pub fn ingest_raw(
        &mut self,
        raw: &RawMutationEvent,
        provenance: Provenance,
    ) -> Result<Applied, Rejected> {
        let event = ingest::normalize(raw, provenance, &self.config).inspect_err(|e| {
            warn!(conversation = %self.id, "discarding raw event: {e}");
        })?;
        self.ingest(event)
    }

    /// Ingest a typed event.
    pub fn ingest(&mut self, event: MutationEvent) -> Result<Applied, Rejected> {
        self.ingest_at(event, Instant::now())
    }

    /// Ingest with an explicit clock for the pending buffer.
    pub fn ingest_at(&mut self, event: MutationEvent, now: Instant) -> Result<Applied, Rejected> {
        if event.conversation_id != self.id {
            warn!(conversation = %self.id, got = %event.conversation_id, "event for another conversation");
            return Err(Rejected::WrongConversation {
                expected: self.id,
                got: event.conversation_id,
            });
        }
        ingest::validate(&event, &self.config).inspect_err(|e| {
            warn!(conversation = %self.id, message = %event.message_id, "discarding event: {e}");
        })?;

        let key = event.key();
        let step = self.apply(&event).inspect_err(|e| {
            warn!(conversation = %self.id, event = %key, "rejected: {e}");
        })?;

        let mut applied = match step {
            Step::Done(disposition, invalidated) => Applied::new(disposition, invalidated),
            Step::Missing => self.buffer(event.clone(), now),
        };

        if matches!(event.payload, Payload::Create(_)) && applied.disposition == Disposition::Applied {
            self.replay_pending(event.message_id, &mut applied);
        }
        if applied.invalidated.contains(View::Grouping) {
            self.grouping.invalidate();
        }
        Ok(applied)
    }

    fn buffer(&mut self, event: MutationEvent, now: Instant) -> Applied {
        let key = event.key();
        match self.pending.push(event, now) {
            Buffered::Held => {
                debug!(conversation = %self.id, event = %key, "buffered until create arrives");
                Applied::new(Disposition::Buffered, Invalidation::empty())
            }
            Buffered::AlreadyHeld => Applied::new(Disposition::Duplicate, Invalidation::empty()),
            Buffered::Evicted(old) => {
                warn!(conversation = %self.id, evicted = %old.key(), "pending buffer full, dropping oldest");
                let mut applied = Applied::new(Disposition::Buffered, Invalidation::empty());
                applied.evicted = Some(old);
                applied
            }
        }
    }

    fn replay_pending(&mut self, message_id: MessageId, applied: &mut Applied) {
        for event in self.pending.take_for(message_id) {
            let key = event.key();
            let result = match self.apply(&event) {
                Ok(Step::Done(disposition, invalidated)) => {
                    applied.invalidated |= invalidated;
                    Ok(disposition)
                }
                // The create was just stored.
                Ok(Step::Missing) => Ok(Disposition::Buffered),
                Err(e) => {
                    warn!(conversation = %self.id, event = %key, "buffered event rejected on replay: {e}");
                    Err(e)
                }
            };
            applied.replayed.push(Replay { key, result });
        }
    }

    fn apply(&mut self, event: &MutationEvent) -> Result<Step, Rejected> {
        let actor = event.actor_id;
        let at = event.timestamp;
        let existing = self.store.get(&event.message_id);

        let step = match (&event.payload, existing) {
            (Payload::Create(create), _) => self.apply_create(event, create),
            (_, None) => return Ok(Step::Missing),
            (Payload::Edit { content }, Some(current)) => {
                let merged = merge::merge_edit(current, actor, at, content)?;
                self.commit(merged, View::Timeline | View::Threads)
            }
            (Payload::Delete, Some(current)) => {
                let was_deleted = current.is_deleted();
                let merged = merge::merge_delete(current, actor, at)?;
                if let (Merge::Replace(message), false) = (&merged, was_deleted) {
                    self.threads.on_deleted(message);
                }
                let mut invalidated = View::Timeline | View::Grouping | View::Threads;
                if self.pins.entry(&event.message_id).is_some() {
                    invalidated.insert(View::Pins);
                }
                self.commit(merged, invalidated)
            }
            (Payload::React { emoji }, Some(current)) => {
                let merged = merge::merge_reaction(current, actor, at, emoji, true)?;
                self.commit(merged, View::Timeline.into())
            }
            (Payload::Unreact { emoji }, Some(current)) => {
                let merged = merge::merge_reaction(current, actor, at, emoji, false)?;
                self.commit(merged, View::Timeline.into())
            }
            (Payload::Pin, Some(_)) => {
                if let Some(limit) = self.config.pin_limit {
                    if self.pins.would_pin(event.message_id, actor, at) && self.pins().len() >= limit {
                        return Err(Rejected::PinLimitReached { limit });
                    }
                }
                let change = self.pins.pin(event.message_id, actor, at);
                self.commit_pin(event.message_id, change)
            }
            (Payload::Unpin, Some(_)) => {
                let change = self.pins.unpin(event.message_id, actor, at);
                self.commit_pin(event.message_id, change)
            }
        };
        self.store.observe(at);
        Ok(step)
    }

    fn apply_create(&mut self, event: &MutationEvent, create: &CreatePayload) -> Step {
        let current = self.store.get(&event.message_id);
        let confirms = current.is_some_and(|m| m.provisional) && !event.is_local();
        match merge::merge_create(current, event, create) {
            Merge::Replace(message) => {
                let mut invalidated = View::Timeline | View::Grouping;
                if self.threads.on_created(&message) || message.reply_to_id.is_some() {
                    invalidated.insert(View::Threads);
                }
                self.store.put(message);
                Step::Done(Disposition::Applied, invalidated)
            }
            Merge::Keep(disposition) if confirms => {
                if let Some(message) = self.store.get_mut(&event.message_id) {
                    message.provisional = false;
                }
                debug!(conversation = %self.id, message = %event.message_id, "provisional create confirmed");
                Step::Done(disposition, View::Timeline.into())
            }
            Merge::Keep(disposition) => {
                debug!(conversation = %self.id, message = %event.message_id, "duplicate create");
                Step::Done(disposition, Invalidation::empty())
            }
        }
    }

    fn commit(&mut self, merged: Merge, invalidated: Invalidation) -> Step {
        match merged {
            Merge::Replace(message) => {
                self.store.put(message);
                Step::Done(Disposition::Applied, invalidated)
            }
            Merge::Keep(disposition) => {
                debug!(conversation = %self.id, %disposition, "event discarded");
                Step::Done(disposition, Invalidation::empty())
            }
        }
    }

    fn commit_pin(&mut self, message_id: MessageId, change: PinChange) -> Step {
        match change {
            PinChange::Changed(entry) => {
                if let Some(message) = self.store.get_mut(&message_id) {
                    message.pinned_at = entry.map(|e| e.pinned_at);
                }
                Step::Done(Disposition::Applied, View::Pins | View::Timeline)
            }
            PinChange::Unchanged => Step::Done(Disposition::Unchanged, Invalidation::empty()),
            PinChange::Stale => Step::Done(Disposition::Stale, Invalidation::empty()),
            PinChange::Duplicate => Step::Done(Disposition::Duplicate, Invalidation::empty()),
        }
    }

    /// Drop buffered events whose `Create` never arrived in time.
    pub fn sweep(&mut self, now: Instant) -> Vec<MutationEvent> {
        let expired = self.pending.sweep(now);
        for event in &expired {
            warn!(
                conversation = %self.id,
                message = %event.message_id,
                event = %event.key(),
                "unresolved reference expired"
            );
        }
        expired
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.store.get(id)
    }

    /// Messages in timeline order, tombstones included.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.store.iter()
    }

    pub fn store(&self) -> &TimelineStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.store.version()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// A stamp strictly after everything this timeline has seen.
    pub fn next_stamp(&self) -> Timestamp {
        self.store.clock().advance(Timestamp::default())
    }

    /// Display groups, memoized between invalidations.
    pub fn groups(&mut self) -> Arc<[DisplayGroup]> {
        self.grouping.regroup(&self.store)
    }

    /// Pinned messages, tombstones hidden.
    pub fn pins(&self) -> Vec<PinEntry> {
        self.pins.list(|id| self.store.get(id).is_some_and(|m| !m.is_deleted()))
    }

    pub fn thread(&self, parent: &MessageId) -> Option<&ThreadSummary> {
        self.threads.get(parent)
    }

    pub fn thread_count(&self, parent: &MessageId) -> usize {
        self.threads.reply_count(parent)
    }

    /// Replies in `parent`'s thread, in timeline order.
    pub fn thread_replies(&self, parent: &MessageId) -> Vec<MessageId> {
        self.threads
            .get(parent)
            .map(|t| t.replies().collect())
            .unwrap_or_default()
    }

    /// Quoted preview of what `message` replies to.
    pub fn resolve_reply(
        &self,
        message: &Message,
        directory: &dyn ParticipantDirectory,
    ) -> Option<ReplyPreview> {
        let target = self.store.get(&message.reply_to_id?)?;
        Some(replies::reply_preview(target, directory, self.config.preview_chars))
    }

    /// [`Timeline::resolve_reply`] by id.
    pub fn reply_preview(
        &self,
        id: &MessageId,
        directory: &dyn ParticipantDirectory,
    ) -> Option<ReplyPreview> {
        self.resolve_reply(self.store.get(id)?, directory)
    }

    /// Attribution of a forwarded message.
    pub fn resolve_forward(
        &self,
        id: &MessageId,
        directory: &dyn ParticipantDirectory,
    ) -> Option<ForwardInfo> {
        replies::forward_info(self.store.get(id)?, directory)
    }
}
