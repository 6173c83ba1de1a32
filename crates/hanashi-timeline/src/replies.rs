//! Reply previews, forward attribution, and thread counters.

use std::collections::{BTreeSet, HashMap};

use hanashi_types::{
    ConversationId, Message, MessageId, ParticipantDirectory, ParticipantId, Timestamp,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ThreadCountPolicy;

/// Marker appended to a cut preview. Counts toward the budget.
pub const ELLIPSIS: char = '…';

/// Quoted preview of the message a reply points at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub message_id: MessageId,
    pub sender_id: ParticipantId,
    pub sender_name: String,
    pub preview: String,
    pub truncated: bool,
    /// The quoted message is a tombstone; `preview` is the placeholder.
    pub deleted: bool,
}

/// Attribution of a forwarded message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardInfo {
    pub original_sender_id: ParticipantId,
    pub original_sender_name: String,
    pub original_conversation_id: ConversationId,
    pub original_message_id: MessageId,
}

/// Collapse whitespace runs and cut to at most `budget` characters.
///
/// Cuts land on grapheme boundaries; a cut preview ends in [`ELLIPSIS`],
/// which is included in the budget. Returns the preview and whether it was
/// cut.
pub fn truncate_preview(text: &str, budget: usize) -> (String, bool) {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= budget {
        return (collapsed, false);
    }

    let room = budget.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0;
    for grapheme in collapsed.graphemes(true) {
        let width = grapheme.chars().count();
        if used + width > room {
            break;
        }
        out.push_str(grapheme);
        used += width;
    }
    let mut out = out.trim_end().to_string();
    out.push(ELLIPSIS);
    (out, true)
}

/// Display name for a sender: directory display name, then handle, then the
/// short id when the directory has nothing or fails.
pub fn sender_name(
    directory: &dyn ParticipantDirectory,
    conversation: ConversationId,
    sender: ParticipantId,
) -> String {
    match directory.participant(conversation, sender) {
        Ok(Some(participant)) => participant.label(),
        Ok(None) => sender.short(),
        Err(e) => {
            debug!(conversation = %conversation, sender = %sender, "name lookup failed: {e}");
            sender.short()
        }
    }
}

/// Build the preview of `target` as quoted by a reply.
pub fn reply_preview(
    target: &Message,
    directory: &dyn ParticipantDirectory,
    budget: usize,
) -> ReplyPreview {
    let (preview, truncated) = truncate_preview(&target.content, budget);
    ReplyPreview {
        message_id: target.id,
        sender_id: target.sender_id,
        sender_name: sender_name(directory, target.conversation_id, target.sender_id),
        preview,
        truncated,
        deleted: target.is_deleted(),
    }
}

/// Attribution for a forwarded message, if it is one.
///
/// The original sender is looked up in the origin conversation first, then
/// in the conversation the forward lives in.
pub fn forward_info(message: &Message, directory: &dyn ParticipantDirectory) -> Option<ForwardInfo> {
    let origin = message.forwarded_from?;
    let name = match directory.participant(origin.conversation_id, origin.sender_id) {
        Ok(Some(participant)) => participant.label(),
        _ => sender_name(directory, message.conversation_id, origin.sender_id),
    };
    Some(ForwardInfo {
        original_sender_id: origin.sender_id,
        original_sender_name: name,
        original_conversation_id: origin.conversation_id,
        original_message_id: origin.message_id,
    })
}

// ============================================================================
// Threads
// ============================================================================

/// Replies posted into one parent's thread.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThreadSummary {
    replies: BTreeSet<(Timestamp, MessageId)>,
    tombstoned: BTreeSet<MessageId>,
    reply_count: usize,
}

impl ThreadSummary {
    /// Counted replies under the active policy.
    pub fn reply_count(&self) -> usize {
        self.reply_count
    }

    /// Creation time of the newest reply that is not a tombstone.
    pub fn last_reply_at(&self) -> Option<Timestamp> {
        self.replies
            .iter()
            .rev()
            .find(|(_, id)| !self.tombstoned.contains(id))
            .map(|(at, _)| *at)
    }

    /// All replies in timeline order, tombstones included.
    pub fn replies(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.replies.iter().map(|(_, id)| *id)
    }
}

/// Thread counters for one conversation, maintained incrementally.
#[derive(Clone, Debug, Default)]
pub struct ThreadIndex {
    policy: ThreadCountPolicy,
    threads: HashMap<MessageId, ThreadSummary>,
}

impl ThreadIndex {
    pub fn new(policy: ThreadCountPolicy) -> Self {
        Self {
            policy,
            threads: HashMap::new(),
        }
    }

    /// Count a newly created thread reply. The parent need not exist yet.
    pub fn on_created(&mut self, reply: &Message) -> bool {
        let Some(parent) = reply.thread_parent_id else {
            return false;
        };
        let thread = self.threads.entry(parent).or_default();
        if thread.replies.insert((reply.created_at, reply.id)) {
            thread.reply_count += 1;
        }
        true
    }

    /// Note that a thread reply became a tombstone.
    ///
    /// Returns `true` if the thread's summary changed.
    pub fn on_deleted(&mut self, reply: &Message) -> bool {
        let Some(parent) = reply.thread_parent_id else {
            return false;
        };
        let Some(thread) = self.threads.get_mut(&parent) else {
            return false;
        };
        if !thread.tombstoned.insert(reply.id) {
            return false;
        }
        if self.policy == ThreadCountPolicy::ExcludeTombstoned {
            thread.reply_count = thread.reply_count.saturating_sub(1);
        }
        true
    }

    pub fn get(&self, parent: &MessageId) -> Option<&ThreadSummary> {
        self.threads.get(parent)
    }

    pub fn reply_count(&self, parent: &MessageId) -> usize {
        self.threads.get(parent).map_or(0, |t| t.reply_count)
    }
}
