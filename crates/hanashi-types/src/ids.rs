//! Typed identifiers for participants, conversations, and messages.
//!
//! All ID types wrap UUIDv7 (time-ordered, globally unique) and display as
//! standard UUID text for logging. The `short()` form (first 8 hex chars) is
//! for human-facing fallbacks only and never used as a lookup key.
//!
//! Ordering is the byte order of the UUID, which is the same as the
//! lexicographic order of the hex form. The timeline relies on this for
//! deterministic last-writer-wins tie breaks between actors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A participant identifier (UUIDv7, or UUIDv5 for sentinels).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(uuid::Uuid);

/// A conversation identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(uuid::Uuid);

/// A message identifier (UUIDv7). Assigned at creation, never reused.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(uuid::Uuid);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters. For human display only, never for lookup.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Full 32-character hex string (no hyphens).
            pub fn to_hex(&self) -> String {
                self.0.as_simple().to_string()
            }

            /// The raw 16 bytes.
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// Reconstruct from 16 bytes.
            pub fn from_bytes(b: [u8; 16]) -> Self {
                Self(uuid::Uuid::from_bytes(b))
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }

            /// Prefer a label for display; fall back to short hex.
            pub fn display_or(&self, label: Option<&str>) -> String {
                match label {
                    Some(l) if !l.is_empty() => l.to_string(),
                    _ => self.short(),
                }
            }

            /// Check if this is the nil ID.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl From<$T> for uuid::Uuid {
            fn from(id: $T) -> uuid::Uuid {
                id.0
            }
        }

        impl std::str::FromStr for $T {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Full UUID with hyphens for log readability
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(ParticipantId, "ParticipantId");
impl_typed_id!(ConversationId, "ConversationId");
impl_typed_id!(MessageId, "MessageId");

// ── ParticipantId sentinels ─────────────────────────────────────────────────

/// Fixed namespace for deriving deterministic ParticipantIds via UUIDv5.
const HANASHI_PARTICIPANT_NS: uuid::Uuid =
    uuid::uuid!("4c1f9a2e-6d3b-4b7a-9e58-2f0c7d1a8b36");

impl ParticipantId {
    /// The well-known "system" participant.
    ///
    /// Sender of join/leave notices and other messages no member authored.
    /// Deterministic: same value every time (UUIDv5 derived from `b"system"`).
    pub fn system() -> Self {
        Self(uuid::Uuid::new_v5(&HANASHI_PARTICIPANT_NS, b"system"))
    }

    /// Whether this is the system sentinel.
    pub fn is_system(&self) -> bool {
        *self == Self::system()
    }
}

// ============================================================================
// Tests
// ============================================================================
