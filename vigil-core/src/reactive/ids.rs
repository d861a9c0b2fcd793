//! Identifier types for the reactive system.
//!
//! Watchers and dependency sets are identified by integers handed out by the
//! runtime that owns them. Watcher ids double as the flush order, so they must
//! be strictly increasing in creation order.

use std::cell::Cell;
use std::fmt;

/// Unique identifier for a watcher.
///
/// Ids are assigned at construction time in strictly increasing order per
/// runtime. A parent's watchers are created before its children's, so sorting
/// by id runs parents first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher#{}", self.0)
    }
}

/// Unique identifier for a dependency set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepId(u64);

impl DepId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dep#{}", self.0)
    }
}

/// Monotonic id source owned by a single runtime.
#[derive(Debug, Default)]
pub(crate) struct IdCounter(Cell<u64>);

impl IdCounter {
    fn bump(&self) -> u64 {
        let next = self.0.get() + 1;
        self.0.set(next);
        next
    }

    pub(crate) fn next_watcher(&self) -> WatcherId {
        WatcherId(self.bump())
    }

    pub(crate) fn next_dep(&self) -> DepId {
        DepId(self.bump())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let counter = IdCounter::default();
        let id1 = counter.next_watcher();
        let id2 = counter.next_watcher();
        let id3 = counter.next_watcher();

        assert!(id1 < id2);
        assert!(id2 < id3);
        assert_eq!(id1.raw(), 1);
    }

    #[test]
    fn separate_counters_are_independent() {
        let a = IdCounter::default();
        let b = IdCounter::default();
        a.next_dep();
        a.next_dep();

        assert_eq!(b.next_dep().raw(), 1);
        assert_eq!(a.next_dep().raw(), 3);
    }
}
