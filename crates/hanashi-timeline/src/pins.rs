//! Pinned-message registry.
//!
//! Each message keeps the set of pin/unpin operations it received. Its pin
//! state is a fold over that set in `(timestamp, actor)` order, so any
//! delivery order of the same operations yields the same state:
//!
//! - a pin on an unpinned message pins it at the pin's timestamp
//! - a pin on a pinned message changes nothing (the original `pinned_at`
//!   stays)
//! - an unpin clears the pin
//!
//! Entries survive deletion of the message; [`PinRegistry::list`] hides
//! them instead, so an unpin that arrives after the delete still resolves.
//!
//! The fold restarts at every unpin, so operations ordered before the last
//! unpin are dropped once recorded. A redelivered dropped operation reports
//! [`PinChange::Stale`] rather than [`PinChange::Duplicate`].

use std::collections::{BTreeSet, HashMap};

use hanashi_types::{MessageId, ParticipantId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum PinOpKind {
    Pin,
    // Sorts after Pin so an unpin wins an exact (timestamp, actor) tie.
    Unpin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct PinOp {
    at: Timestamp,
    actor: ParticipantId,
    kind: PinOpKind,
}

/// A pinned message as the panel shows it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinEntry {
    pub message_id: MessageId,
    pub pinned_at: Timestamp,
    pub pinned_by: ParticipantId,
}

/// Effect of recording a pin or unpin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinChange {
    /// Pin state changed; the new entry, or `None` if now unpinned.
    Changed(Option<PinEntry>),
    /// Recorded, state unchanged (pin on pinned, unpin on unpinned).
    Unchanged,
    /// Recorded, but ordered before an operation that already decided the state.
    Stale,
    /// This exact operation was already recorded.
    Duplicate,
}

/// Pin state for every message of one conversation.
#[derive(Debug, Clone, Default)]
pub struct PinRegistry {
    logs: HashMap<MessageId, BTreeSet<PinOp>>,
}

impl PinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(&mut self, message_id: MessageId, actor: ParticipantId, at: Timestamp) -> PinChange {
        self.record(message_id, PinOp { at, actor, kind: PinOpKind::Pin })
    }

    pub fn unpin(&mut self, message_id: MessageId, actor: ParticipantId, at: Timestamp) -> PinChange {
        self.record(message_id, PinOp { at, actor, kind: PinOpKind::Unpin })
    }

    /// What `pin` would do, without recording it.
    pub fn would_pin(&self, message_id: MessageId, actor: ParticipantId, at: Timestamp) -> bool {
        let op = PinOp { at, actor, kind: PinOpKind::Pin };
        let mut log = self.logs.get(&message_id).cloned().unwrap_or_default();
        let before = fold(message_id, &log);
        log.insert(op);
        before.is_none() && fold(message_id, &log).is_some()
    }

    fn record(&mut self, message_id: MessageId, op: PinOp) -> PinChange {
        let log = self.logs.entry(message_id).or_default();
        let before = fold(message_id, log);
        let superseded = log.last().is_some_and(|last| *last > op);
        if !log.insert(op) {
            return PinChange::Duplicate;
        }
        compact(log);
        let after = fold(message_id, log);
        if before != after {
            PinChange::Changed(after)
        } else if superseded {
            PinChange::Stale
        } else {
            PinChange::Unchanged
        }
    }

    /// Current pin of `message_id`, deleted or not.
    pub fn entry(&self, message_id: &MessageId) -> Option<PinEntry> {
        self.logs.get(message_id).and_then(|log| fold(*message_id, log))
    }

    /// Pinned messages for which `visible` holds, ordered by
    /// `(pinned_at, message_id)`.
    pub fn list(&self, visible: impl Fn(&MessageId) -> bool) -> Vec<PinEntry> {
        let mut entries: Vec<PinEntry> = self
            .logs
            .iter()
            .filter(|(id, _)| visible(id))
            .filter_map(|(id, log)| fold(*id, log))
            .collect();
        entries.sort_by_key(|e| (e.pinned_at, e.message_id));
        entries
    }
}

/// Drop everything ordered before the last unpin.
fn compact(log: &mut BTreeSet<PinOp>) {
    if let Some(cut) = log.iter().rev().find(|op| op.kind == PinOpKind::Unpin).copied() {
        *log = log.split_off(&cut);
    }
}

fn fold(message_id: MessageId, log: &BTreeSet<PinOp>) -> Option<PinEntry> {
    let mut current = None;
    for op in log {
        match op.kind {
            PinOpKind::Pin if current.is_none() => {
                current = Some(PinEntry {
                    message_id,
                    pinned_at: op.at,
                    pinned_by: op.actor,
                });
            }
            PinOpKind::Pin => {}
            PinOpKind::Unpin => current = None,
        }
    }
    current
}
