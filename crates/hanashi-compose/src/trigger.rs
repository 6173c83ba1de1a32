//! Locating the `@` trigger behind the caret.
//!
//! All positions are character indices, not byte offsets.

use std::ops::Range;

/// Characters after which an `@` may open a mention.
const OPENERS: &[char] = &['(', '[', '{', '"', '\''];

/// An `@query` span ending at the caret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trigger {
    /// Index of the `@`.
    pub start: usize,
    /// The caret; the span is `start..end`.
    pub end: usize,
    /// Text between `@` and the caret.
    pub query: String,
}

impl Trigger {
    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Find the trigger the caret is in, if any.
///
/// Scans backward from the caret to the nearest `@`. There is no trigger if
/// whitespace comes first, or if the `@` follows anything but start of
/// text, whitespace, or an opening bracket or quote. That rules out escaped
/// `\@` and addresses like `amy@example.org`.
pub fn find_trigger(text: &str, caret: usize) -> Option<Trigger> {
    let chars: Vec<char> = text.chars().collect();
    let caret = caret.min(chars.len());

    let at = (0..caret)
        .rev()
        .take_while(|&i| !chars[i].is_whitespace())
        .find(|&i| chars[i] == '@')?;

    let opens = match at.checked_sub(1).map(|i| chars[i]) {
        None => true,
        Some(prev) => prev.is_whitespace() || OPENERS.contains(&prev),
    };
    if !opens {
        return None;
    }

    Some(Trigger {
        start: at,
        end: caret,
        query: chars[at + 1..caret].iter().collect(),
    })
}
