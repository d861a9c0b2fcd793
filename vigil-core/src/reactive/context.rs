//! Evaluation Context
//!
//! The evaluation context tracks which watcher is currently running.
//! This enables automatic dependency tracking: when a reactive property is
//! read, the property's dependency set registers the current watcher.
//!
//! # Implementation
//!
//! Each runtime owns a stack of targets. Entering a context pushes a target;
//! dropping the guard pops it. A `None` target pauses tracking, which is how
//! lifecycle hooks, error handlers and `untracked` reads avoid collecting
//! dependencies for whatever watcher happens to be underneath.
//!
//! Nested evaluation (a render reading a computed value that must first
//! re-evaluate) pushes on top of the outer watcher and restores it on exit.

use super::runtime::Runtime;
use super::watcher::Watcher;
use super::WatcherId;

/// Guard that pops the evaluation target when dropped.
///
/// This keeps the stack balanced even if a body panics.
pub(crate) struct EvalContext {
    runtime: Runtime,
    target: Option<WatcherId>,
}

impl EvalContext {
    /// Make `target` the active watcher until the guard is dropped.
    pub(crate) fn enter(runtime: &Runtime, target: Option<Watcher>) -> Self {
        let id = target.as_ref().map(Watcher::id);
        runtime.0.targets.borrow_mut().push(target);
        Self {
            runtime: runtime.clone(),
            target: id,
        }
    }

    /// Pause tracking until the guard is dropped.
    pub(crate) fn pause(runtime: &Runtime) -> Self {
        Self::enter(runtime, None)
    }
}

impl Drop for EvalContext {
    fn drop(&mut self) {
        let popped = self.runtime.0.targets.borrow_mut().pop();

        // Verify we're popping the right context.
        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.as_ref().map(Watcher::id),
                self.target,
                "EvalContext mismatch"
            );
        }
    }
}
