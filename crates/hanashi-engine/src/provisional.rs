//! Local optimistic mutations awaiting network confirmation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use hanashi_timeline::{EventKey, MutationEvent};

#[derive(Debug, Clone)]
struct Pending {
    event: MutationEvent,
    deadline: Instant,
    /// Already reported as expired; stays until confirmed or retried.
    expired: bool,
}

/// Provisional mutations of one conversation, keyed by [`EventKey`].
///
/// A confirmation is the same logical event arriving from the network, so
/// the key alone matches it. Expired entries are kept so `retry` can still
/// find the event.
#[derive(Debug, Clone)]
pub struct ProvisionalTracker {
    entries: HashMap<EventKey, Pending>,
    timeout: Duration,
}

impl ProvisionalTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            timeout,
        }
    }

    /// Start waiting for confirmation of `event`. Tracking the same key
    /// again restarts its deadline.
    pub fn track(&mut self, event: MutationEvent, now: Instant) {
        let deadline = now + self.timeout;
        self.entries.insert(
            event.key(),
            Pending {
                event,
                deadline,
                expired: false,
            },
        );
    }

    /// The network confirmed `key`. Returns `true` if it was provisional.
    pub fn confirm(&mut self, key: &EventKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Entries whose deadline passed since the last call.
    pub fn expire(&mut self, now: Instant) -> Vec<EventKey> {
        let mut expired: Vec<EventKey> = self
            .entries
            .iter_mut()
            .filter(|(_, p)| !p.expired && p.deadline <= now)
            .map(|(key, p)| {
                p.expired = true;
                *key
            })
            .collect();
        expired.sort_by_key(|k| (k.timestamp, k.message_id));
        expired
    }

    /// Restart the deadline of `key` and hand back its event for resubmission.
    pub fn restart(&mut self, key: &EventKey, now: Instant) -> Option<MutationEvent> {
        let pending = self.entries.get_mut(key)?;
        pending.deadline = now + self.timeout;
        pending.expired = false;
        Some(pending.event.clone())
    }

    pub fn contains(&self, key: &EventKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_expired(&self, key: &EventKey) -> bool {
        self.entries.get(key).is_some_and(|p| p.expired)
    }

    /// Provisional events in timestamp order.
    pub fn events(&self) -> Vec<MutationEvent> {
        let mut events: Vec<MutationEvent> = self.entries.values().map(|p| p.event.clone()).collect();
        events.sort_by_key(|e| (e.timestamp, e.message_id));
        events
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
