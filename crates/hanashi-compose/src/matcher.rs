//! The mention autocomplete state machine.
//!
//! ```text
//!            @ typed                      Enter / click
//! Closed ─────────────▶ Open{query, …} ─────────────────▶ Closed (text edited)
//!    ▲                     │  ▲  │ ArrowUp / ArrowDown
//!    │      Escape         │  └──┘ (text untouched)
//!    └─────────────────────┘
//! ```

use std::ops::Range;
use std::sync::Arc;

use hanashi_types::{ConversationId, DirectoryError, ParticipantDirectory, ParticipantId};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, warn};

use crate::filter::{self, MentionCandidate};
use crate::trigger::{self, Trigger};

/// Composition-box contents and caret, in character indices.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaretState {
    pub text: String,
    pub caret: usize,
    /// Mentions inserted so far, for highlighting.
    pub mentions: Vec<MentionSpan>,
}

impl CaretState {
    /// Caret at the end of `text`.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let caret = text.chars().count();
        Self {
            text,
            caret,
            mentions: Vec::new(),
        }
    }

    pub fn with_caret(mut self, caret: usize) -> Self {
        self.caret = caret;
        self
    }

    /// Participants mentioned in the text, in order of appearance.
    pub fn mentioned(&self) -> Vec<ParticipantId> {
        let mut spans: Vec<&MentionSpan> = self.mentions.iter().collect();
        spans.sort_by_key(|s| s.range.start);
        spans.into_iter().map(|s| s.participant_id).collect()
    }

    /// Replace `span` with `replacement`, shifting later mention spans and
    /// dropping any that overlapped.
    fn splice(&mut self, span: Range<usize>, replacement: &str) {
        let mut chars: Vec<char> = self.text.chars().collect();
        let inserted: Vec<char> = replacement.chars().collect();
        let added = inserted.len();
        let removed = span.end - span.start;
        chars.splice(span.clone(), inserted);
        self.text = chars.into_iter().collect();

        self.mentions
            .retain(|m| m.range.end <= span.start || m.range.start >= span.end);
        for m in &mut self.mentions {
            if m.range.start >= span.end {
                m.range = (m.range.start + added - removed)..(m.range.end + added - removed);
            }
        }
    }
}

/// An inserted `@Name` and who it refers to. `range` covers the `@` and the
/// name, not the trailing space.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionSpan {
    pub participant_id: ParticipantId,
    pub range: Range<usize>,
}

/// Keys the matcher reacts to while open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum MentionKey {
    ArrowUp,
    ArrowDown,
    Enter,
    Escape,
}

/// What a key press did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Matcher is closed; the composition box handles the key.
    Ignored,
    /// The matcher used the key; text unchanged.
    Consumed,
    /// A mention was inserted.
    Inserted(MentionSpan),
}

/// Matcher state. `Closed` carries nothing, so a selection without an open
/// list cannot be represented.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MentionState {
    #[default]
    Closed,
    Open {
        query: String,
        /// `@query` span being completed.
        trigger: Range<usize>,
        candidates: Vec<MentionCandidate>,
        selected_index: usize,
        /// The directory failed; `candidates` is empty for that reason.
        degraded: bool,
    },
}

impl MentionState {
    pub fn is_open(&self) -> bool {
        matches!(self, MentionState::Open { .. })
    }

    /// Open with nothing to offer: render the empty state.
    pub fn is_empty_open(&self) -> bool {
        matches!(self, MentionState::Open { candidates, .. } if candidates.is_empty())
    }

    pub fn selected(&self) -> Option<&MentionCandidate> {
        match self {
            MentionState::Open {
                candidates,
                selected_index,
                ..
            } => candidates.get(*selected_index),
            MentionState::Closed => None,
        }
    }
}

/// Called when a directory lookup fails.
pub type DirectoryErrorHook = Arc<dyn Fn(ConversationId, &DirectoryError) + Send + Sync>;

/// Keyboard-driven `@mention` autocomplete for one composition box.
pub struct MentionMatcher {
    directory: Arc<dyn ParticipantDirectory>,
    conversation: ConversationId,
    state: MentionState,
    /// Trigger start dismissed with Escape.
    dismissed: Option<usize>,
    on_directory_error: Option<DirectoryErrorHook>,
}

impl MentionMatcher {
    pub fn new(directory: Arc<dyn ParticipantDirectory>, conversation: ConversationId) -> Self {
        Self {
            directory,
            conversation,
            state: MentionState::Closed,
            dismissed: None,
            on_directory_error: None,
        }
    }

    /// Report directory failures to `hook`.
    pub fn with_error_hook(mut self, hook: DirectoryErrorHook) -> Self {
        self.on_directory_error = Some(hook);
        self
    }

    pub fn state(&self) -> &MentionState {
        &self.state
    }

    /// Recompute the state after the text or caret changed.
    pub fn compose_mention(&mut self, caret: &CaretState) -> &MentionState {
        let Some(trigger) = trigger::find_trigger(&caret.text, caret.caret) else {
            self.dismissed = None;
            self.state = MentionState::Closed;
            return &self.state;
        };
        if self.dismissed == Some(trigger.start) {
            self.state = MentionState::Closed;
            return &self.state;
        }
        self.dismissed = None;
        self.open(trigger);
        &self.state
    }

    fn open(&mut self, trigger: Trigger) {
        let previous = match &self.state {
            MentionState::Open { selected_index, .. } => *selected_index,
            MentionState::Closed => 0,
        };

        let (candidates, degraded) = match self.directory.list_participants(self.conversation) {
            Ok(participants) => (filter::rank(participants, &trigger.query), false),
            Err(e) => {
                warn!(conversation = %self.conversation, "mention directory unavailable: {e}");
                if let Some(hook) = &self.on_directory_error {
                    hook(self.conversation, &e);
                }
                (Vec::new(), true)
            }
        };

        let selected_index = if previous < candidates.len() { previous } else { 0 };
        debug!(query = %trigger.query, candidates = candidates.len(), "mention candidates");
        self.state = MentionState::Open {
            query: trigger.query.clone(),
            trigger: trigger.span(),
            candidates,
            selected_index,
            degraded,
        };
    }

    /// Handle a key press. Only `Enter` ever edits `caret`.
    pub fn handle_key(&mut self, key: MentionKey, caret: &mut CaretState) -> KeyOutcome {
        let MentionState::Open {
            candidates,
            selected_index,
            trigger,
            ..
        } = &mut self.state
        else {
            return KeyOutcome::Ignored;
        };

        match key {
            MentionKey::ArrowDown if !candidates.is_empty() => {
                *selected_index = (*selected_index + 1) % candidates.len();
                KeyOutcome::Consumed
            }
            MentionKey::ArrowUp if !candidates.is_empty() => {
                *selected_index = (*selected_index + candidates.len() - 1) % candidates.len();
                KeyOutcome::Consumed
            }
            MentionKey::ArrowDown | MentionKey::ArrowUp => KeyOutcome::Consumed,
            MentionKey::Enter => {
                let index = *selected_index;
                self.select(index, caret).unwrap_or(KeyOutcome::Consumed)
            }
            MentionKey::Escape => {
                self.dismissed = Some(trigger.start);
                self.state = MentionState::Closed;
                KeyOutcome::Consumed
            }
        }
    }

    /// Insert candidate `index` (Enter or a click). `None` if there is no
    /// such candidate, or if `caret` no longer holds the trigger the list
    /// was computed for.
    pub fn select(&mut self, index: usize, caret: &mut CaretState) -> Option<KeyOutcome> {
        let MentionState::Open {
            candidates,
            trigger,
            ..
        } = &self.state
        else {
            return None;
        };
        let candidate = candidates.get(index)?;
        if !trigger::find_trigger(&caret.text, caret.caret).is_some_and(|t| t.span() == *trigger) {
            debug!("mention trigger moved since the last compose; ignoring selection");
            return None;
        }

        let name = candidate.insert_name();
        let start = trigger.start;
        let span = MentionSpan {
            participant_id: candidate.participant_id,
            range: start..start + 1 + name.chars().count(),
        };

        caret.splice(trigger.clone(), &format!("@{name} "));
        caret.caret = span.range.end + 1;
        caret.mentions.push(span.clone());

        self.state = MentionState::Closed;
        self.dismissed = None;
        Some(KeyOutcome::Inserted(span))
    }
}
