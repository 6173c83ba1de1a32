//! Per-field merge rules.
//!
//! Each rule is a pure function `(current, incoming) → outcome` with no
//! access to the rest of the timeline, so replay determinism can be
//! checked here without a store or transport.
//!
//! # Rules
//!
//! - **Create**: first delivery wins; later deliveries are duplicates.
//! - **Edit**: sender only; last-writer-wins on `(timestamp, actor)`;
//!   refused once the message is deleted.
//! - **Delete**: sender only; always beats edits and drops their metadata;
//!   among deletes the latest `(timestamp, actor)` is kept.
//! - **React / Unreact**: one LWW mark per `(emoji, actor)`; refused on a
//!   tombstone unless stamped strictly before the delete.

use hanashi_types::{MarkOutcome, Message, ParticipantId, TOMBSTONE_PLACEHOLDER, Timestamp};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::Rejected;
use crate::event::{CreatePayload, MutationEvent};

/// What ingesting an event did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum Disposition {
    /// State changed.
    Applied,
    /// Accepted but nothing visible changed (pin on a pinned message).
    Unchanged,
    /// Identical event already applied.
    Duplicate,
    /// Ordered before the state it would modify.
    Stale,
    /// Target message not created yet; held for replay.
    Buffered,
}

/// Result of a single merge rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Merge {
    /// Replace the record with this one.
    Replace(Message),
    /// Keep the record as is.
    Keep(Disposition),
}

impl Merge {
    pub fn disposition(&self) -> Disposition {
        match self {
            Merge::Replace(_) => Disposition::Applied,
            Merge::Keep(d) => *d,
        }
    }
}

/// Last-writer-wins comparison on `(timestamp, actor)`.
///
/// Later timestamp wins; on equal timestamps the greater actor id wins, so
/// every peer picks the same winner without coordination.
pub fn newer(incoming: (Timestamp, ParticipantId), current: (Timestamp, ParticipantId)) -> bool {
    incoming.0 > current.0 || (incoming.0 == current.0 && incoming.1 > current.1)
}

/// Apply a `Create` to a possibly-absent record.
pub fn merge_create(current: Option<&Message>, event: &MutationEvent, create: &CreatePayload) -> Merge {
    if current.is_some() {
        return Merge::Keep(Disposition::Duplicate);
    }
    let mut message = Message::new(
        event.message_id,
        event.conversation_id,
        event.actor_id,
        event.timestamp,
        create.content.clone(),
    );
    message.reply_to_id = create.reply_to;
    message.thread_parent_id = create.thread_parent;
    message.forwarded_from = create.forwarded_from;
    message.provisional = event.is_local();
    Merge::Replace(message)
}

/// Apply an `Edit`.
pub fn merge_edit(
    current: &Message,
    actor: ParticipantId,
    at: Timestamp,
    content: &str,
) -> Result<Merge, Rejected> {
    if actor != current.sender_id {
        return Err(Rejected::NotAuthor {
            message: current.id,
            actor,
        });
    }
    if current.is_deleted() {
        return Err(Rejected::Tombstoned(current.id));
    }

    let version = current.content_version();
    if (at, actor) == version && current.is_edited() && current.content == content {
        return Ok(Merge::Keep(Disposition::Duplicate));
    }
    if !newer((at, actor), version) {
        return Ok(Merge::Keep(Disposition::Stale));
    }

    let mut next = current.clone();
    next.content = content.to_string();
    next.edited_at = Some(at);
    next.edited_by = Some(actor);
    Ok(Merge::Replace(next))
}

/// Apply a `Delete`.
///
/// Unlike an edit, a delete is not checked against `created_at` or
/// `edited_at`: it wins over every edit whatever its stamp.
pub fn merge_delete(
    current: &Message,
    actor: ParticipantId,
    at: Timestamp,
) -> Result<Merge, Rejected> {
    if actor != current.sender_id {
        return Err(Rejected::NotAuthor {
            message: current.id,
            actor,
        });
    }

    if let (Some(deleted_at), Some(deleted_by)) = (current.deleted_at, current.deleted_by) {
        if (at, actor) == (deleted_at, deleted_by) {
            return Ok(Merge::Keep(Disposition::Duplicate));
        }
        if !newer((at, actor), (deleted_at, deleted_by)) {
            return Ok(Merge::Keep(Disposition::Stale));
        }
        let mut next = current.clone();
        next.deleted_at = Some(at);
        next.deleted_by = Some(actor);
        return Ok(Merge::Replace(next));
    }

    // Edit metadata goes with the content: a peer that saw the delete first
    // refused those edits and must end up with the same record.
    let mut next = current.clone();
    next.content = TOMBSTONE_PLACEHOLDER.to_string();
    next.edited_at = None;
    next.edited_by = None;
    next.deleted_at = Some(at);
    next.deleted_by = Some(actor);
    next.reactions.retain_before(at);
    Ok(Merge::Replace(next))
}

/// Apply a `React` (`present = true`) or `Unreact` (`present = false`).
pub fn merge_reaction(
    current: &Message,
    actor: ParticipantId,
    at: Timestamp,
    emoji: &str,
    present: bool,
) -> Result<Merge, Rejected> {
    if current.deleted_at.is_some_and(|deleted_at| at >= deleted_at) {
        return Err(Rejected::Tombstoned(current.id));
    }

    let mut next = current.clone();
    Ok(match next.reactions.mark(emoji, actor, at, present) {
        MarkOutcome::Applied => Merge::Replace(next),
        MarkOutcome::Duplicate => Merge::Keep(Disposition::Duplicate),
        MarkOutcome::Stale => Merge::Keep(Disposition::Stale),
    })
}

#[cfg(test)]
mod tests {
    use hanashi_types::{ConversationId, MessageId};

    use super::*;

    fn ts(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn test_message(sender: ParticipantId) -> Message {
        Message::new(MessageId::new(), ConversationId::new(), sender, ts(0), "hi")
    }

    fn replaced(merge: Result<Merge, Rejected>) -> Message {
        match merge {
            Ok(Merge::Replace(m)) => m,
            other => panic!("expected replace, got {other:?}"),
        }
    }

    #[test]
    fn test_newer_tie_breaks_on_actor() {
        let low = ParticipantId::from_bytes([0; 16]);
        let high = ParticipantId::from_bytes([0xff; 16]);
        assert!(newer((ts(2), low), (ts(1), high)));
        assert!(newer((ts(1), high), (ts(1), low)));
        assert!(!newer((ts(1), low), (ts(1), high)));
        assert!(!newer((ts(1), low), (ts(1), low)));
    }

    #[test]
    fn test_edits_commute() {
        let amy = ParticipantId::new();
        let msg = test_message(amy);

        let ab = replaced(merge_edit(&msg, amy, ts(1), "a"));
        let ab = replaced(merge_edit(&ab, amy, ts(2), "b"));

        let ba = replaced(merge_edit(&msg, amy, ts(2), "b"));
        assert_eq!(merge_edit(&ba, amy, ts(1), "a"), Ok(Merge::Keep(Disposition::Stale)));

        assert_eq!(ab.content, "b");
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_edit_replay_is_duplicate() {
        let amy = ParticipantId::new();
        let edited = replaced(merge_edit(&test_message(amy), amy, ts(3), "x"));
        assert_eq!(
            merge_edit(&edited, amy, ts(3), "x"),
            Ok(Merge::Keep(Disposition::Duplicate))
        );
    }

    #[test]
    fn test_edit_not_newer_than_creation_is_stale() {
        let amy = ParticipantId::new();
        let msg = test_message(amy);
        assert_eq!(
            merge_edit(&msg, amy, ts(0), "same instant"),
            Ok(Merge::Keep(Disposition::Stale))
        );
    }

    #[test]
    fn test_only_sender_edits_and_deletes() {
        let amy = ParticipantId::new();
        let bob = ParticipantId::new();
        let msg = test_message(amy);
        assert!(matches!(merge_edit(&msg, bob, ts(1), "x"), Err(Rejected::NotAuthor { .. })));
        assert!(matches!(merge_delete(&msg, bob, ts(1)), Err(Rejected::NotAuthor { .. })));
    }

    #[test]
    fn test_delete_wins_over_edit() {
        let amy = ParticipantId::new();
        let msg = test_message(amy);

        let deleted = replaced(merge_delete(&msg, amy, ts(2)));
        assert_eq!(deleted.content, TOMBSTONE_PLACEHOLDER);
        assert_eq!(
            merge_edit(&deleted, amy, ts(9), "late"),
            Err(Rejected::Tombstoned(msg.id))
        );

        let edited_first = replaced(merge_edit(&msg, amy, ts(9), "late"));
        let deleted_after = replaced(merge_delete(&edited_first, amy, ts(2)));
        assert_eq!(deleted_after, deleted);
    }

    #[test]
    fn test_delete_lww_among_deletes() {
        let amy = ParticipantId::new();
        let deleted = replaced(merge_delete(&test_message(amy), amy, ts(5)));

        assert_eq!(merge_delete(&deleted, amy, ts(5)), Ok(Merge::Keep(Disposition::Duplicate)));
        assert_eq!(merge_delete(&deleted, amy, ts(4)), Ok(Merge::Keep(Disposition::Stale)));

        let later = replaced(merge_delete(&deleted, amy, ts(7)));
        assert_eq!(later.deleted_at, Some(ts(7)));
        assert_eq!(later.content, TOMBSTONE_PLACEHOLDER);
    }

    #[test]
    fn test_reactions_on_tombstone() {
        let amy = ParticipantId::new();
        let bob = ParticipantId::new();
        let deleted = replaced(merge_delete(&test_message(amy), amy, ts(10)));

        assert_eq!(
            merge_reaction(&deleted, bob, ts(10), "👍", true),
            Err(Rejected::Tombstoned(deleted.id))
        );
        let early = replaced(merge_reaction(&deleted, bob, ts(9), "👍", true));
        assert_eq!(early.reactions.count("👍"), 1);
        assert_eq!(early.content, TOMBSTONE_PLACEHOLDER);
    }

    #[test]
    fn test_delete_prunes_later_reactions() {
        let amy = ParticipantId::new();
        let bob = ParticipantId::new();
        let msg = test_message(amy);

        let reacted = replaced(merge_reaction(&msg, bob, ts(20), "👍", true));
        let deleted = replaced(merge_delete(&reacted, amy, ts(10)));
        assert_eq!(deleted.reactions.count("👍"), 0);
    }

    #[test]
    fn test_reaction_replay_and_staleness() {
        let amy = ParticipantId::new();
        let bob = ParticipantId::new();
        let msg = test_message(amy);

        let reacted = replaced(merge_reaction(&msg, bob, ts(1), "👍", true));
        assert_eq!(
            merge_reaction(&reacted, bob, ts(1), "👍", true),
            Ok(Merge::Keep(Disposition::Duplicate))
        );
        let cleared = replaced(merge_reaction(&reacted, bob, ts(2), "👍", false));
        assert_eq!(
            merge_reaction(&cleared, bob, ts(1), "👍", true),
            Ok(Merge::Keep(Disposition::Stale))
        );
    }
}
