//! Which derived views a mutation touched.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// A view the presentation layer renders from the timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum View {
    /// Message records themselves (content, reactions, flags).
    Timeline,
    /// Display groups.
    Grouping,
    /// Pinned-message panel.
    Pins,
    /// Reply previews and thread counters.
    Threads,
}

impl View {
    fn bit(self) -> u8 {
        match self {
            View::Timeline => 1 << 0,
            View::Grouping => 1 << 1,
            View::Pins => 1 << 2,
            View::Threads => 1 << 3,
        }
    }
}

/// A small set of [`View`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Invalidation(u8);

impl Invalidation {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        View::iter().fold(Self::empty(), |acc, v| acc | v)
    }

    pub fn with(mut self, view: View) -> Self {
        self.insert(view);
        self
    }

    pub fn insert(&mut self, view: View) {
        self.0 |= view.bit();
    }

    pub fn contains(&self, view: View) -> bool {
        self.0 & view.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = View> + '_ {
        View::iter().filter(|v| self.contains(*v))
    }
}

impl BitOr for Invalidation {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOr<View> for Invalidation {
    type Output = Self;

    fn bitor(self, rhs: View) -> Self {
        self.with(rhs)
    }
}

impl BitOr for View {
    type Output = Invalidation;

    fn bitor(self, rhs: View) -> Invalidation {
        Invalidation::from(self) | rhs
    }
}

impl BitOrAssign for Invalidation {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<View> for Invalidation {
    fn from(view: View) -> Self {
        Self::empty().with(view)
    }
}

impl FromIterator<View> for Invalidation {
    fn from_iter<I: IntoIterator<Item = View>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |acc, v| acc | v)
    }
}

impl fmt::Debug for Invalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for Invalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|v| v.to_string()).collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_ops() {
        let set = Invalidation::from(View::Timeline) | View::Pins;
        assert!(set.contains(View::Timeline));
        assert!(set.contains(View::Pins));
        assert!(!set.contains(View::Grouping));
        assert_eq!(set.iter().count(), 2);
        assert!(Invalidation::empty().is_empty());
        assert_eq!(Invalidation::all().iter().count(), 4);
    }

    #[test]
    fn test_views_combine() {
        let set = View::Timeline | View::Threads;
        assert_eq!(set, Invalidation::from(View::Threads).with(View::Timeline));
        assert!(!set.contains(View::Pins));
    }

    #[test]
    fn test_display() {
        let set: Invalidation = [View::Threads, View::Grouping].into_iter().collect();
        assert_eq!(set.to_string(), "{grouping,threads}");
        assert_eq!("pins".parse::<View>().unwrap(), View::Pins);
    }
}
