//! Engine error types.

use hanashi_timeline::{ConfigError, EventKey, Rejected, TimelineError};
use hanashi_types::ConversationId;
use thiserror::Error;

/// Errors from [`crate::Engine`] operations.
///
/// Stale and duplicate deliveries are not errors; they come back as a
/// [`hanashi_timeline::Disposition`].
#[derive(Error, Debug)]
pub enum EngineError {
    /// The event was discarded without touching state.
    #[error(transparent)]
    Rejected(#[from] Rejected),

    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no provisional mutation {0}")]
    UnknownProvisional(EventKey),

    /// Applied locally, but the network collaborator refused it.
    #[error("mutation sink failed for {key}: {reason}")]
    Sink { key: EventKey, reason: String },

    #[error("snapshot replay failed for {conversation}: {reason}")]
    Snapshot {
        conversation: ConversationId,
        reason: String,
    },

    #[error("no tokio runtime to run the subscription on")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, EngineError>;
