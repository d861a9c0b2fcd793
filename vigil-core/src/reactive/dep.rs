//! Dependency Sets
//!
//! A [`Dep`] is the registry of watchers interested in one observable cell:
//! a reactive property, or the "shape" of an observed object or array.
//!
//! The subscriber list and a watcher's dependency list mirror each other: a
//! watcher is in a dep's subscribers exactly when the dep is in the watcher's
//! current dependencies. Only [`Watcher`] maintains both sides.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::runtime::{Runtime, RuntimeInner};
use super::watcher::Watcher;
use super::{DepId, WatcherId};

struct DepInner {
    id: DepId,
    subs: RefCell<Vec<Watcher>>,
    runtime: Weak<RuntimeInner>,
}

/// A reference-counted set of subscribing watchers.
#[derive(Clone)]
pub struct Dep(Rc<DepInner>);

impl Dep {
    pub(crate) fn new(runtime: &Runtime) -> Self {
        Self(Rc::new(DepInner {
            id: runtime.next_dep_id(),
            subs: RefCell::new(Vec::new()),
            runtime: runtime.downgrade(),
        }))
    }

    /// Unique id within the runtime.
    pub fn id(&self) -> DepId {
        self.0.id
    }

    pub(crate) fn runtime(&self) -> Option<Runtime> {
        Runtime::upgrade(&self.0.runtime)
    }

    /// Add a subscriber. Duplicates by identity are ignored.
    pub(crate) fn add_sub(&self, sub: &Watcher) {
        let mut subs = self.0.subs.borrow_mut();
        if !subs.iter().any(|w| w.id() == sub.id()) {
            subs.push(sub.clone());
        }
    }

    pub(crate) fn remove_sub(&self, sub: &Watcher) {
        self.0.subs.borrow_mut().retain(|w| w.id() != sub.id());
    }

    /// Register this dep with the active watcher.
    ///
    /// Returns whether a watcher was tracking.
    pub fn depend(&self) -> bool {
        let Some(runtime) = self.runtime() else {
            return false;
        };
        match runtime.current_watcher() {
            Some(watcher) => {
                watcher.add_dep(self);
                true
            }
            None => false,
        }
    }

    /// Ask every subscriber to react.
    ///
    /// The list is snapshotted first so subscribers may (un)subscribe while
    /// being notified. In synchronous mode the scheduler does not sort, so the
    /// snapshot is sorted by id here instead.
    pub fn notify(&self) {
        let mut subs = self.0.subs.borrow().clone();
        if self.runtime().is_some_and(|rt| !rt.is_async()) {
            subs.sort_by_key(Watcher::id);
        }
        for sub in subs {
            sub.update();
        }
    }

    /// Number of subscribed watchers.
    pub fn subscriber_count(&self) -> usize {
        self.0.subs.borrow().len()
    }

    /// Ids of the subscribed watchers, in subscription order.
    pub fn subscriber_ids(&self) -> Vec<WatcherId> {
        self.0.subs.borrow().iter().map(Watcher::id).collect()
    }

    /// Check if the watcher with `id` is subscribed.
    pub fn has_subscriber(&self, id: WatcherId) -> bool {
        self.0.subs.borrow().iter().any(|w| w.id() == id)
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.0.id)
            .field("subscribers", &self.subscriber_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::Owner;
    use crate::reactive::{Value, WatchSource, WatcherOptions};

    fn lazy(owner: &Owner) -> Watcher {
        owner
            .create_watcher(
                WatchSource::func(|| Ok(Value::Null)),
                None,
                WatcherOptions {
                    lazy: true,
                    ..Default::default()
                },
            )
            .unwrap()
    }

    #[test]
    fn add_sub_ignores_duplicates() {
        let runtime = Runtime::new();
        let owner = Owner::new(&runtime, "root");
        let dep = Dep::new(&runtime);
        let watcher = lazy(&owner);

        dep.add_sub(&watcher);
        dep.add_sub(&watcher);
        assert_eq!(dep.subscriber_count(), 1);

        dep.remove_sub(&watcher);
        assert_eq!(dep.subscriber_count(), 0);
    }

    #[test]
    fn depend_without_target_is_noop() {
        let runtime = Runtime::new();
        let dep = Dep::new(&runtime);
        assert!(!dep.depend());
        assert_eq!(dep.subscriber_count(), 0);
    }

    #[test]
    fn notify_marks_lazy_subscribers_dirty() {
        let runtime = Runtime::new();
        let owner = Owner::new(&runtime, "root");
        let dep = Dep::new(&runtime);
        let watcher = lazy(&owner);
        watcher.evaluate().unwrap();
        assert!(!watcher.is_dirty());

        dep.add_sub(&watcher);
        dep.notify();

        assert!(watcher.is_dirty());
    }

    #[test]
    fn dep_ids_are_unique() {
        let runtime = Runtime::new();
        let d1 = Dep::new(&runtime);
        let d2 = Dep::new(&runtime);
        assert_ne!(d1.id(), d2.id());
    }
}
