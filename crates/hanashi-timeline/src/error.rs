//! Error types for timeline ingestion.

use hanashi_types::{ConversationId, MessageId, ParticipantId};
use thiserror::Error;

use crate::config::ConfigError;

/// Why an event was refused.
///
/// A rejection affects only the event itself: nothing in the timeline
/// changes and nothing else is refused because of it. Stale and duplicate
/// deliveries are *not* rejections; see [`crate::Disposition`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    /// Missing or invalid fields.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// Event targets a different conversation than this timeline.
    #[error("event for conversation {got} applied to timeline {expected}")]
    WrongConversation {
        expected: ConversationId,
        got: ConversationId,
    },

    /// Only the sender may edit or delete a message.
    #[error("{actor} is not the author of message {message}")]
    NotAuthor {
        message: MessageId,
        actor: ParticipantId,
    },

    /// Message is deleted; its content and reactions are frozen.
    #[error("message {0} is deleted")]
    Tombstoned(MessageId),

    /// Pinning would exceed the configured limit.
    #[error("pin limit of {limit} reached")]
    PinLimitReached { limit: usize },
}

impl Rejected {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Rejected::Malformed(reason.into())
    }
}

/// Errors surfaced by timeline APIs other than `ingest`.
#[derive(Error, Debug)]
pub enum TimelineError {
    #[error(transparent)]
    Rejected(#[from] Rejected),

    #[error("invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
