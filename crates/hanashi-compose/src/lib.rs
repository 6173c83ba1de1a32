//! Composition-box helpers for hanashi.
//!
//! The [`MentionMatcher`] turns the text and caret of a composition box
//! into an autocomplete list of conversation members. It reads the
//! [`hanashi_types::ParticipantDirectory`] and never touches a timeline.
//!
//! ```text
//! keystroke ──▶ CaretState ──compose_mention──▶ MentionState ──▶ presentation
//!                    ▲                               │
//!                    └────── handle_key(Enter) ◀─────┘
//! ```

pub mod filter;
pub mod matcher;
pub mod trigger;

pub use filter::MentionCandidate;
pub use matcher::{
    CaretState, DirectoryErrorHook, KeyOutcome, MentionKey, MentionMatcher, MentionSpan,
    MentionState,
};
pub use trigger::{Trigger, find_trigger};
