//! Bounded buffer for events that arrived before their `Create`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use hanashi_types::MessageId;

use crate::event::{EventKey, MutationEvent};

#[derive(Debug, Clone)]
struct PendingEntry {
    event: MutationEvent,
    buffered_at: Instant,
}

/// Result of buffering an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Buffered {
    /// Held for replay.
    Held,
    /// Held, and the oldest entry was evicted to make room.
    Evicted(MutationEvent),
    /// The same logical event is already waiting.
    AlreadyHeld,
}

/// FIFO of dependents waiting on a `Create`, bounded by count and age.
#[derive(Debug, Clone)]
pub struct PendingBuffer {
    entries: VecDeque<PendingEntry>,
    capacity: usize,
    timeout: Duration,
}

impl PendingBuffer {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            timeout,
        }
    }

    /// Hold `event` until its target is created.
    pub fn push(&mut self, event: MutationEvent, now: Instant) -> Buffered {
        let key = event.key();
        if self.entries.iter().any(|e| e.event.key() == key) {
            return Buffered::AlreadyHeld;
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front().map(|e| e.event)
        } else {
            None
        };
        self.entries.push_back(PendingEntry {
            event,
            buffered_at: now,
        });
        match evicted {
            Some(event) => Buffered::Evicted(event),
            None => Buffered::Held,
        }
    }

    /// Remove and return every event waiting on `message`, in arrival order.
    pub fn take_for(&mut self, message: MessageId) -> Vec<MutationEvent> {
        let (ready, waiting): (VecDeque<_>, VecDeque<_>) = self
            .entries
            .drain(..)
            .partition(|e| e.event.message_id == message);
        self.entries = waiting;
        ready.into_iter().map(|e| e.event).collect()
    }

    /// Remove and return events that waited longer than the timeout.
    pub fn sweep(&mut self, now: Instant) -> Vec<MutationEvent> {
        let timeout = self.timeout;
        let (expired, waiting): (VecDeque<_>, VecDeque<_>) = self
            .entries
            .drain(..)
            .partition(|e| now.saturating_duration_since(e.buffered_at) >= timeout);
        self.entries = waiting;
        expired.into_iter().map(|e| e.event).collect()
    }

    pub fn contains(&self, key: &EventKey) -> bool {
        self.entries.iter().any(|e| e.event.key() == *key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
