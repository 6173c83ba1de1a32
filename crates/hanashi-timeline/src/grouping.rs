//! Display grouping: consecutive same-sender runs.
//!
//! A new group starts when the sender changes, when the gap to the previous
//! message exceeds the window, or when the local calendar day changes
//! between them. Tombstones stay in their group so deleting the middle of a
//! run does not split it.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate};
use hanashi_types::{Message, MessageId, ParticipantId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::store::TimelineStore;

/// A run of messages rendered under one sender header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayGroup {
    pub sender_id: ParticipantId,
    pub message_ids: Vec<MessageId>,
    pub first_at: Timestamp,
    pub last_at: Timestamp,
    /// Local calendar day of the group.
    pub day: NaiveDate,
    /// First group of its day; the presentation draws a date divider above it.
    pub starts_day: bool,
}

/// Grouping parameters.
#[derive(Clone, Copy, Debug)]
pub struct GroupingRules {
    pub window_ms: u64,
    pub offset: FixedOffset,
}

impl GroupingRules {
    /// `None` if `utc_offset_minutes` is not a valid fixed offset.
    pub fn new(window_ms: u64, utc_offset_minutes: i32) -> Option<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?;
        Some(Self { window_ms, offset })
    }

    /// Local calendar day of `at`.
    pub fn day_of(&self, at: Timestamp) -> NaiveDate {
        let millis = i64::try_from(at.wall_ms).unwrap_or(i64::MAX);
        DateTime::from_timestamp_millis(millis)
            .unwrap_or_default()
            .with_timezone(&self.offset)
            .date_naive()
    }

    fn continues(&self, prev: &Message, next: &Message) -> bool {
        prev.sender_id == next.sender_id
            && next.created_at.millis_since(&prev.created_at) <= self.window_ms
            && self.day_of(prev.created_at) == self.day_of(next.created_at)
    }
}

/// Group messages given in timeline order.
pub fn group_messages<'a>(
    messages: impl IntoIterator<Item = &'a Message>,
    rules: &GroupingRules,
) -> Vec<DisplayGroup> {
    let mut groups: Vec<DisplayGroup> = Vec::new();
    let mut prev: Option<&Message> = None;

    for message in messages {
        let continues = prev.is_some_and(|p| rules.continues(p, message));
        match groups.last_mut() {
            Some(group) if continues => {
                group.message_ids.push(message.id);
                group.last_at = message.created_at;
            }
            _ => {
                let day = rules.day_of(message.created_at);
                let starts_day = groups.last().is_none_or(|g| g.day != day);
                groups.push(DisplayGroup {
                    sender_id: message.sender_id,
                    message_ids: vec![message.id],
                    first_at: message.created_at,
                    last_at: message.created_at,
                    day,
                    starts_day,
                });
            }
        }
        prev = Some(message);
    }
    groups
}

/// Memoized grouping of one timeline.
///
/// Holds no state beyond the last result; [`GroupingEngine::invalidate`] is
/// called whenever an ingest reports the grouping view as touched.
#[derive(Debug, Clone)]
pub struct GroupingEngine {
    rules: GroupingRules,
    cache: Option<Arc<[DisplayGroup]>>,
}

impl GroupingEngine {
    pub fn new(rules: GroupingRules) -> Self {
        Self { rules, cache: None }
    }

    pub fn rules(&self) -> &GroupingRules {
        &self.rules
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Current groups, recomputed only after an invalidation.
    pub fn regroup(&mut self, store: &TimelineStore) -> Arc<[DisplayGroup]> {
        if let Some(cached) = &self.cache {
            return Arc::clone(cached);
        }
        let groups: Arc<[DisplayGroup]> = group_messages(store.iter(), &self.rules).into();
        self.cache = Some(Arc::clone(&groups));
        groups
    }
}
