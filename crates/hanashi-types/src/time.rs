//! Hybrid wall-clock + logical timestamps.
//!
//! Every mutation carries a [`Timestamp`]. Ordering is wall milliseconds
//! first, then the logical counter, so two events from the same millisecond
//! still order deterministically.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wall-clock milliseconds plus a logical counter.
#[derive(
    Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Unix milliseconds.
    pub wall_ms: u64,
    /// Tie breaker within one millisecond.
    #[serde(default)]
    pub logical: u32,
}

impl Timestamp {
    pub fn new(wall_ms: u64, logical: u32) -> Self {
        Self { wall_ms, logical }
    }

    /// A timestamp at `wall_ms` with a zero logical counter.
    pub fn from_millis(wall_ms: u64) -> Self {
        Self { wall_ms, logical: 0 }
    }

    /// The current wall clock.
    pub fn now() -> Self {
        Self::from_millis(crate::now_millis())
    }

    /// The smallest timestamp strictly after both `self` and `seen`.
    ///
    /// Used to stamp local mutations so they order after everything
    /// already observed, even when the wall clock lags.
    pub fn advance(self, seen: Timestamp) -> Timestamp {
        let floor = self.max(seen);
        let now = crate::now_millis();
        if now > floor.wall_ms {
            Timestamp::from_millis(now)
        } else {
            Timestamp::new(floor.wall_ms, floor.logical.saturating_add(1))
        }
    }

    /// Milliseconds from `earlier` to `self`, zero if `earlier` is later.
    pub fn millis_since(&self, earlier: &Timestamp) -> u64 {
        self.wall_ms.saturating_sub(earlier.wall_ms)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.wall_ms, self.logical)
    }
}
