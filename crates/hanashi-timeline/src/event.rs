//! Mutation events: the raw shape handed over by the network collaborator
//! and the normalized, typed shape the timeline applies.

use std::fmt;

use hanashi_types::{ConversationId, ForwardRef, MessageId, ParticipantId, Timestamp};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Kind of mutation. Parses case-insensitively; `send` is an alias of
/// `create`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[strum(to_string = "create", serialize = "send")]
    Create,
    Edit,
    Delete,
    React,
    Unreact,
    Pin,
    Unpin,
}

/// Where an event came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum Provenance {
    /// Applied optimistically by this client, not yet confirmed.
    Local,
    /// Confirmed by the network.
    #[default]
    Remote,
}

// ============================================================================
// Raw events
// ============================================================================

/// Forward reference as it arrives on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawForwardRef {
    pub sender_id: Option<String>,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
}

/// A mutation event exactly as delivered: every field optional, ids as text.
///
/// Nothing is trusted until [`crate::ingest::normalize`] turns it into a
/// [`MutationEvent`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMutationEvent {
    pub kind: Option<String>,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub actor_id: Option<String>,
    pub timestamp: Option<Timestamp>,
    pub content: Option<String>,
    pub reply_to: Option<String>,
    pub thread_parent: Option<String>,
    pub forwarded_from: Option<RawForwardRef>,
    pub emoji: Option<String>,
}

impl RawMutationEvent {
    /// Parse a JSON payload. Shape errors only; field checks happen in
    /// normalization.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ============================================================================
// Normalized events
// ============================================================================

/// Body of a `Create`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePayload {
    pub content: String,
    pub reply_to: Option<MessageId>,
    pub thread_parent: Option<MessageId>,
    pub forwarded_from: Option<ForwardRef>,
}

/// Kind-specific part of a [`MutationEvent`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Create(CreatePayload),
    Edit { content: String },
    Delete,
    React { emoji: String },
    Unreact { emoji: String },
    Pin,
    Unpin,
}

impl Payload {
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::Create(_) => EventKind::Create,
            Payload::Edit { .. } => EventKind::Edit,
            Payload::Delete => EventKind::Delete,
            Payload::React { .. } => EventKind::React,
            Payload::Unreact { .. } => EventKind::Unreact,
            Payload::Pin => EventKind::Pin,
            Payload::Unpin => EventKind::Unpin,
        }
    }
}

/// A validated mutation event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub actor_id: ParticipantId,
    pub timestamp: Timestamp,
    pub provenance: Provenance,
    pub payload: Payload,
}

impl MutationEvent {
    pub fn new(
        conversation_id: ConversationId,
        message_id: MessageId,
        actor_id: ParticipantId,
        timestamp: Timestamp,
        payload: Payload,
    ) -> Self {
        Self {
            conversation_id,
            message_id,
            actor_id,
            timestamp,
            provenance: Provenance::Remote,
            payload,
        }
    }

    pub fn create(
        conversation_id: ConversationId,
        message_id: MessageId,
        sender: ParticipantId,
        timestamp: Timestamp,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            conversation_id,
            message_id,
            sender,
            timestamp,
            Payload::Create(CreatePayload {
                content: content.into(),
                ..Default::default()
            }),
        )
    }

    pub fn edit(
        conversation_id: ConversationId,
        message_id: MessageId,
        actor: ParticipantId,
        timestamp: Timestamp,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            conversation_id,
            message_id,
            actor,
            timestamp,
            Payload::Edit {
                content: content.into(),
            },
        )
    }

    pub fn delete(
        conversation_id: ConversationId,
        message_id: MessageId,
        actor: ParticipantId,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(conversation_id, message_id, actor, timestamp, Payload::Delete)
    }

    pub fn react(
        conversation_id: ConversationId,
        message_id: MessageId,
        actor: ParticipantId,
        timestamp: Timestamp,
        emoji: impl Into<String>,
    ) -> Self {
        Self::new(
            conversation_id,
            message_id,
            actor,
            timestamp,
            Payload::React {
                emoji: emoji.into(),
            },
        )
    }

    pub fn unreact(
        conversation_id: ConversationId,
        message_id: MessageId,
        actor: ParticipantId,
        timestamp: Timestamp,
        emoji: impl Into<String>,
    ) -> Self {
        Self::new(
            conversation_id,
            message_id,
            actor,
            timestamp,
            Payload::Unreact {
                emoji: emoji.into(),
            },
        )
    }

    pub fn pin(
        conversation_id: ConversationId,
        message_id: MessageId,
        actor: ParticipantId,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(conversation_id, message_id, actor, timestamp, Payload::Pin)
    }

    pub fn unpin(
        conversation_id: ConversationId,
        message_id: MessageId,
        actor: ParticipantId,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(conversation_id, message_id, actor, timestamp, Payload::Unpin)
    }

    /// Mark a `Create` as a reply to `target`. No-op for other kinds.
    pub fn with_reply_to(mut self, target: MessageId) -> Self {
        if let Payload::Create(create) = &mut self.payload {
            create.reply_to = Some(target);
        }
        self
    }

    /// Mark a `Create` as a reply inside `parent`'s thread. No-op for other kinds.
    pub fn with_thread_parent(mut self, parent: MessageId) -> Self {
        if let Payload::Create(create) = &mut self.payload {
            create.thread_parent = Some(parent);
        }
        self
    }

    /// Mark a `Create` as forwarded from `origin`. No-op for other kinds.
    pub fn with_forwarded_from(mut self, origin: ForwardRef) -> Self {
        if let Payload::Create(create) = &mut self.payload {
            create.forwarded_from = Some(origin);
        }
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn is_local(&self) -> bool {
        self.provenance == Provenance::Local
    }

    /// Identity of the logical mutation, independent of provenance.
    pub fn key(&self) -> EventKey {
        EventKey {
            message_id: self.message_id,
            kind: self.kind(),
            actor_id: self.actor_id,
            timestamp: self.timestamp,
        }
    }
}

/// Identity of one logical mutation.
///
/// A local optimistic event and its network confirmation share a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub message_id: MessageId,
    pub kind: EventKind,
    pub actor_id: ParticipantId,
    pub timestamp: Timestamp,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}/{}",
            self.kind,
            self.message_id.short(),
            self.timestamp,
            self.actor_id.short()
        )
    }
}
