//! Ranking directory members against a mention query.

use hanashi_types::{Participant, ParticipantId};
use serde::{Deserialize, Serialize};

/// A participant offered for insertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionCandidate {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub handle: String,
    pub online: bool,
}

impl MentionCandidate {
    /// Text inserted after the `@`.
    pub fn insert_name(&self) -> String {
        if !self.display_name.is_empty() {
            self.display_name.clone()
        } else {
            self.participant_id.display_or(Some(&self.handle))
        }
    }
}

impl From<Participant> for MentionCandidate {
    fn from(p: Participant) -> Self {
        Self {
            participant_id: p.id,
            display_name: p.display_name,
            handle: p.handle,
            online: p.online,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Prefix,
    Substring,
}

fn tier(participant: &Participant, query: &str) -> Option<Tier> {
    let name = participant.display_name.to_lowercase();
    let handle = participant.handle.to_lowercase();
    let handle = handle.trim_start_matches('@');

    if name.starts_with(query)
        || name.split_whitespace().any(|word| word.starts_with(query))
        || handle.starts_with(query)
    {
        Some(Tier::Prefix)
    } else if name.contains(query) || handle.contains(query) {
        Some(Tier::Substring)
    } else {
        None
    }
}

/// Members matching `query`, case-insensitively.
///
/// Prefix matches (display name, a word of it, or handle) come before
/// substring matches; within a tier directory order is kept. Every
/// candidate for a query also matches any prefix of that query, so typing
/// more never brings back someone already filtered out.
pub fn rank(participants: Vec<Participant>, query: &str) -> Vec<MentionCandidate> {
    let query = query.to_lowercase();
    let mut tiered: Vec<(Tier, usize, Participant)> = participants
        .into_iter()
        .enumerate()
        .filter_map(|(pos, p)| tier(&p, &query).map(|t| (t, pos, p)))
        .collect();
    tiered.sort_by_key(|(t, pos, _)| (*t, *pos));
    tiered.into_iter().map(|(_, _, p)| p.into()).collect()
}
