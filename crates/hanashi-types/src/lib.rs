//! Shared identity, message, and participant types for hanashi.
//!
//! This crate is the leaf of the workspace: typed IDs, hybrid timestamps,
//! the message record, and the participant directory seam. It has **no
//! internal hanashi dependencies**.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! Conversation (ConversationId)
//!     └── has members listed by the ParticipantDirectory
//!     └── owns a timeline of Message (MessageId, never reused)
//!
//! Participant (ParticipantId) ← display name, handle, online flag
//!     └── sends Message
//!     └── edits / deletes own Message
//!     └── reacts to and pins any Message
//!
//! Message (MessageId)
//!     └── reply_to_id / thread_parent_id point at other Messages
//!     └── forwarded_from points into another conversation
//!     └── deletion is a tombstone, never an erasure
//! ```
//!
//! # Key Types
//!
//! |---------------------------|----------------------------------------------|
//! | Type                      | Purpose                                      |
//! |---------------------------|----------------------------------------------|
//! | [`ParticipantId`]         | Who (sender, editor, reactor)                |
//! | [`ConversationId`]        | Which timeline                               |
//! | [`MessageId`]             | Which message, unique per conversation       |
//! | [`Timestamp`]             | Wall clock + logical counter, totally ordered |
//! | [`Message`]               | The authoritative message record             |
//! | [`Participant`]           | Directory entry (name, handle, presence)     |
//! | [`ParticipantDirectory`]  | Read-only member lookup seam                 |
//! |---------------------------|----------------------------------------------|

pub mod directory;
pub mod ids;
pub mod message;
pub mod time;

// Re-export primary types at crate root for convenience.
pub use directory::{DirectoryError, InMemoryDirectory, Participant, ParticipantDirectory};
pub use ids::{ConversationId, MessageId, ParticipantId};
pub use message::{
    ForwardRef, MarkOutcome, Message, MessageState, ReactionMark, Reactions, TOMBSTONE_PLACEHOLDER,
};
pub use time::Timestamp;

/// Current time as Unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
