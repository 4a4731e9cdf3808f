//! Relationship-set reconciliation.
//!
//! Given the identifiers currently in a relationship set and the identifiers
//! in an incoming snapshot, [`MemberDiff::between`] splits them into members
//! to add, to remove and to keep. Kept members are never replaced; the caller
//! updates them in place.

use std::collections::BTreeSet;

/// The minimal change turning one member set into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDiff<K> {
    /// Only in the new set.
    pub added: Vec<K>,
    /// Only in the current set.
    pub removed: Vec<K>,
    /// In both sets.
    pub kept: Vec<K>,
}

impl<K: Ord + Clone> MemberDiff<K> {
    /// Diff `current` against `next`, each list sorted.
    pub fn between(current: &BTreeSet<K>, next: &BTreeSet<K>) -> Self {
        Self {
            added: next.difference(current).cloned().collect(),
            removed: current.difference(next).cloned().collect(),
            kept: current.intersection(next).cloned().collect(),
        }
    }

    /// True when membership does not change.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
