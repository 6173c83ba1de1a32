//! Convergent message timeline for one conversation.
//!
//! Mutation events (create, edit, delete, react, pin) arrive from the
//! network unordered, duplicated, and from many writers. A [`Timeline`]
//! folds them into one state that every peer reaches regardless of
//! delivery order, and derives the views a client renders from it.
//!
//! # Data Flow
//!
//! ```text
//! RawMutationEvent ──normalize──▶ MutationEvent ──Timeline::ingest──▶ Applied
//!                                                       │
//!          ┌───────────────┬──────────────┬─────────────┼──────────────┐
//!          ▼               ▼              ▼             ▼              ▼
//!    TimelineStore    PinRegistry    ThreadIndex   GroupingEngine  PendingBuffer
//!    (merge rules)    (pin op log)   (counters)    (memo cache)    (before-create)
//! ```
//!
//! # Merge Semantics
//!
//! - **Records**: created once, never removed; deletion is a tombstone
//! - **Content**: last-writer-wins on `(timestamp, actor)`, delete beats edit
//! - **Reactions**: one LWW mark per `(emoji, actor)`
//! - **Pins**: fold over the pin/unpin operations in timestamp order
//! - **Out of order**: dependents wait in a bounded buffer for their create
//!
//! Stale and duplicate deliveries are normal under concurrent delivery and
//! are reported as a [`Disposition`], never as an error.

pub mod config;
mod error;
pub mod event;
pub mod grouping;
pub mod ingest;
pub mod invalidation;
pub mod merge;
pub mod pending;
pub mod pins;
pub mod replies;
pub mod store;
mod timeline;

pub use config::{ConfigError, ThreadCountPolicy, TimelineConfig};
pub use error::{Rejected, TimelineError};
pub use event::{
    CreatePayload, EventKey, EventKind, MutationEvent, Payload, Provenance, RawForwardRef,
    RawMutationEvent,
};
pub use grouping::{DisplayGroup, GroupingRules};
pub use invalidation::{Invalidation, View};
pub use merge::Disposition;
pub use pins::PinEntry;
pub use replies::{ForwardInfo, ReplyPreview, ThreadSummary};
pub use store::TimelineStore;
pub use timeline::{Applied, Replay, Timeline};

/// Result type for timeline operations other than ingest.
pub type Result<T> = std::result::Result<T, TimelineError>;

/// Parse a JSON event and ingest it.
pub fn ingest_json(
    timeline: &mut Timeline,
    json: &str,
    provenance: Provenance,
) -> Result<Applied> {
    let raw = RawMutationEvent::from_json(json)?;
    Ok(timeline.ingest_raw(&raw, provenance)?)
}
