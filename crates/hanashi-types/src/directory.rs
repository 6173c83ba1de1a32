//! Participant directory: who is in a conversation.
//!
//! The timeline never owns membership. It asks a [`ParticipantDirectory`]
//! when it needs names (reply previews, mention candidates) and treats the
//! answer as read-only. [`InMemoryDirectory`] is the reference
//! implementation used by tests and embedders without their own roster.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ConversationId, ParticipantId};

/// A conversation member as the directory sees them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    /// Human-readable name; may be empty.
    pub display_name: String,
    /// Stable short handle; may be empty.
    pub handle: String,
    /// Presence flag. Informational only.
    #[serde(default)]
    pub online: bool,
}

impl Participant {
    pub fn new(id: ParticipantId, display_name: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            handle: handle.into(),
            online: false,
        }
    }

    /// Best available label: display name, then handle, then short ID.
    pub fn label(&self) -> String {
        if !self.display_name.is_empty() {
            self.display_name.clone()
        } else {
            self.id.display_or(Some(&self.handle))
        }
    }
}

/// Errors from directory lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),

    #[error("unknown conversation: {0}")]
    UnknownConversation(ConversationId),
}

/// Read-only membership lookup.
///
/// Implementations may be backed by a network roster and can fail; callers
/// degrade gracefully rather than propagate.
pub trait ParticipantDirectory: Send + Sync {
    /// Members of `conversation`, in the directory's own order.
    fn list_participants(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Participant>, DirectoryError>;

    /// A single member, if present.
    fn participant(
        &self,
        conversation: ConversationId,
        id: ParticipantId,
    ) -> Result<Option<Participant>, DirectoryError> {
        Ok(self
            .list_participants(conversation)?
            .into_iter()
            .find(|p| p.id == id))
    }
}

/// Directory held in memory, keyed by conversation.
///
/// Member order is insertion order; `upsert` of an existing member updates
/// it in place.
#[derive(Default)]
pub struct InMemoryDirectory {
    rosters: RwLock<HashMap<ConversationId, Vec<Participant>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a member.
    pub fn upsert(&self, conversation: ConversationId, participant: Participant) {
        let mut rosters = self.rosters.write();
        let roster = rosters.entry(conversation).or_default();
        match roster.iter_mut().find(|p| p.id == participant.id) {
            Some(existing) => *existing = participant,
            None => roster.push(participant),
        }
    }

    /// Remove a member. Returns `true` if they were present.
    pub fn remove(&self, conversation: ConversationId, id: ParticipantId) -> bool {
        let mut rosters = self.rosters.write();
        let Some(roster) = rosters.get_mut(&conversation) else {
            return false;
        };
        let before = roster.len();
        roster.retain(|p| p.id != id);
        roster.len() != before
    }

    /// Update the presence flag. Returns `true` if the member exists.
    pub fn set_online(&self, conversation: ConversationId, id: ParticipantId, online: bool) -> bool {
        let mut rosters = self.rosters.write();
        rosters
            .get_mut(&conversation)
            .and_then(|r| r.iter_mut().find(|p| p.id == id))
            .map(|p| p.online = online)
            .is_some()
    }
}

impl ParticipantDirectory for InMemoryDirectory {
    fn list_participants(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<Participant>, DirectoryError> {
        // An unknown conversation is an empty roster, not an error.
        Ok(self
            .rosters
            .read()
            .get(&conversation)
            .cloned()
            .unwrap_or_default())
    }
}
