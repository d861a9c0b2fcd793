//! Reactive Runtime
//!
//! The runtime is the scheduling context that every other piece hangs off.
//! It owns the state that a reactive graph shares:
//!
//! - the active-evaluation stack (which watcher is reading right now)
//! - the scheduler queue and its flush flags
//! - the tick callback queue
//! - id counters for watchers and dependency sets
//! - configuration, plus the warn and error handlers
//!
//! # Lifecycle
//!
//! A runtime is created with [`Runtime::new`] or [`Runtime::with_config`] and
//! lives as long as any handle to it. Graphs built on different runtimes are
//! fully isolated: ids, queues and tracking never cross. Dependency sets only
//! hold a weak reference, so state objects do not keep a runtime alive.
//!
//! # Threading
//!
//! The runtime is single-threaded (`Rc`, not `Send`). Concurrency is
//! cooperative; the only suspension point is the tick boundary.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::context::EvalContext;
use super::ids::IdCounter;
use super::watcher::Watcher;
use super::{DepId, WatcherId};
use crate::config::RuntimeConfig;
use crate::error::Error;
use crate::owner::Owner;
use crate::schedule::{SchedulerState, TickQueue};

/// Receives diagnostic messages.
pub type WarnHandler = Rc<dyn Fn(&str)>;

/// Receives errors that no owner boundary captured, with context info.
pub type ErrorHandler = Rc<dyn Fn(&Error, &str)>;

pub(crate) struct RuntimeInner {
    config: RefCell<RuntimeConfig>,
    should_observe: Cell<bool>,
    pub(crate) targets: RefCell<Vec<Option<Watcher>>>,
    pub(crate) scheduler: RefCell<SchedulerState>,
    pub(crate) ticks: TickQueue,
    ids: IdCounter,
    warn_handler: RefCell<Option<WarnHandler>>,
    error_handler: RefCell<Option<ErrorHandler>>,
}

/// Handle to a reactive runtime.
///
/// Cloning a `Runtime` creates a new handle to the **same** runtime.
#[derive(Clone)]
pub struct Runtime(pub(crate) Rc<RuntimeInner>);

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with `config`.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self(Rc::new(RuntimeInner {
            config: RefCell::new(config),
            should_observe: Cell::new(true),
            targets: RefCell::new(Vec::new()),
            scheduler: RefCell::new(SchedulerState::default()),
            ticks: TickQueue::default(),
            ids: IdCounter::default(),
            warn_handler: RefCell::new(None),
            error_handler: RefCell::new(None),
        }))
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> RuntimeConfig {
        self.0.config.borrow().clone()
    }

    /// Modify the configuration in place.
    pub fn update_config(&self, f: impl FnOnce(&mut RuntimeConfig)) {
        f(&mut self.0.config.borrow_mut());
    }

    pub(crate) fn is_async(&self) -> bool {
        self.0.config.borrow().async_mode
    }

    pub(crate) fn is_production(&self) -> bool {
        self.0.config.borrow().production
    }

    /// Check if both handles point to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<RuntimeInner>) -> Option<Runtime> {
        weak.upgrade().map(Runtime)
    }

    pub(crate) fn next_watcher_id(&self) -> WatcherId {
        self.0.ids.next_watcher()
    }

    pub(crate) fn next_dep_id(&self) -> DepId {
        self.0.ids.next_dep()
    }

    // ------------------------------------------------------------------
    // Observation toggle
    // ------------------------------------------------------------------

    /// Enable or disable creation of new observers.
    ///
    /// Already observed values keep working; only `observe` on fresh values
    /// is affected.
    pub fn toggle_observing(&self, value: bool) {
        self.0.should_observe.set(value);
    }

    /// Whether new values are currently brought under observation.
    pub fn should_observe(&self) -> bool {
        self.0.should_observe.get()
    }

    // ------------------------------------------------------------------
    // Tracking
    // ------------------------------------------------------------------

    /// The watcher currently evaluating, if tracking is active.
    pub fn current_watcher(&self) -> Option<Watcher> {
        self.0.targets.borrow().last().cloned().flatten()
    }

    /// Check if a watcher is currently collecting dependencies.
    pub fn is_tracking(&self) -> bool {
        matches!(self.0.targets.borrow().last(), Some(Some(_)))
    }

    /// Run `f` with dependency tracking paused.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ctx = EvalContext::pause(self);
        f()
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Route diagnostics to `handler` instead of the log.
    pub fn set_warn_handler(&self, handler: impl Fn(&str) + 'static) {
        *self.0.warn_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Receive errors that no owner boundary captured.
    pub fn set_error_handler(&self, handler: impl Fn(&Error, &str) + 'static) {
        *self.0.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Report a non-fatal diagnostic.
    pub fn warn(&self, message: &str) {
        if self.0.config.borrow().silent {
            return;
        }
        let handler = self.0.warn_handler.borrow().clone();
        match handler {
            Some(handler) => handler(message),
            None => tracing::warn!(target: "vigil", "{message}"),
        }
    }

    /// Route an error through the owner's error boundaries.
    ///
    /// Each ancestor's `error_captured` hooks run from the nearest parent
    /// outwards; a hook returning `false` stops propagation. Anything not
    /// stopped reaches the runtime's error handler, or the log when there is
    /// none. Tracking is paused while handling.
    pub fn handle_error(&self, err: &Error, owner: Option<&Owner>, info: &str) {
        let _ctx = EvalContext::pause(self);

        if let Some(origin) = owner {
            let mut current = origin.parent();
            while let Some(ancestor) = current {
                for hook in ancestor.error_captured_hooks() {
                    if !hook(err, origin, info) {
                        return;
                    }
                }
                current = ancestor.parent();
            }
        }

        let handler = self.0.error_handler.borrow().clone();
        match handler {
            Some(handler) => handler(err, info),
            None => tracing::error!(target: "vigil", error = %err, "error in {info}"),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &*self.0.config.borrow())
            .field("tracking", &self.is_tracking())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn warn_reaches_handler_unless_silent() {
        let runtime = Runtime::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        runtime.set_warn_handler(move |msg| sink.borrow_mut().push(msg.to_string()));

        runtime.warn("first");
        runtime.update_config(|c| c.silent = true);
        runtime.warn("second");

        assert_eq!(*seen.borrow(), vec!["first".to_string()]);
    }

    #[test]
    fn unhandled_error_reaches_runtime_handler() {
        let runtime = Runtime::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        runtime.set_error_handler(move |err, info| {
            sink.borrow_mut().push(format!("{info}: {err}"));
        });

        runtime.handle_error(&Error::msg("boom"), None, "nextTick");

        assert_eq!(*seen.borrow(), vec!["nextTick: boom".to_string()]);
    }

    #[test]
    fn error_captured_false_stops_propagation() {
        let runtime = Runtime::new();
        let reached = Rc::new(Cell::new(false));
        let flag = reached.clone();
        runtime.set_error_handler(move |_, _| flag.set(true));

        let parent = Owner::new(&runtime, "parent");
        let child = parent.child("child");
        let captured = Rc::new(RefCell::new(String::new()));
        let sink = captured.clone();
        parent.on_error_captured(move |err, origin, info| {
            *sink.borrow_mut() = format!("{} in {} ({info})", err, origin.name());
            false
        });

        runtime.handle_error(&Error::msg("bad"), Some(&child), "render");

        assert_eq!(*captured.borrow(), "bad in child (render)");
        assert!(!reached.get());
    }

    #[test]
    fn untracked_pauses_tracking() {
        let runtime = Runtime::new();
        assert!(!runtime.untracked(|| runtime.is_tracking()));
    }

    #[test]
    fn runtimes_are_isolated() {
        let a = Runtime::new();
        let b = Runtime::new();
        a.next_watcher_id();
        a.next_watcher_id();

        assert_eq!(b.next_watcher_id().raw(), 1);
        assert!(!a.ptr_eq(&b));
    }
}
