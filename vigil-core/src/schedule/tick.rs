//! Tick Queue
//!
//! `next_tick` defers a callback until the current synchronous work is done.
//! All callbacks queued between two drains run together in one drain, in
//! the order they were queued. Callbacks queued during a drain go to the
//! next one.
//!
//! # Drivers
//!
//! A drain is armed once per batch, through the runtime's [`TickMode`]:
//!
//! - `LocalTask`: a tokio local task, run as soon as the current task yields
//! - `Yield`: a local task that yields once before draining
//! - `Timer`: a local task behind a zero-delay `tokio::time::sleep`
//! - `Manual`: nothing is armed; the host calls [`Runtime::drain_ticks`]
//!
//! The task-based drivers need a `LocalSet`, which the runtime enters through
//! [`Runtime::run_local`]. Each driver falls back to the next one in the list
//! above when its environment is missing, ending at `Manual`. `Auto` starts
//! the chain at `LocalTask` and falls back without a warning.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::LocalSet;

use crate::error::Result;
use crate::reactive::Runtime;

/// How a runtime drives deferred work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickMode {
    /// Local task inside [`Runtime::run_local`], manual draining elsewhere.
    #[default]
    Auto,
    LocalTask,
    Yield,
    Timer,
    Manual,
}

/// Task drivers in fallback order.
const DRIVER_CHAIN: [TickMode; 3] = [TickMode::LocalTask, TickMode::Yield, TickMode::Timer];

type TickCallback = Box<dyn FnOnce() -> Result<()>>;

/// Pending callbacks and the single armed-drain flag.
#[derive(Default)]
pub(crate) struct TickQueue {
    callbacks: RefCell<Vec<TickCallback>>,
    pending: Cell<bool>,
    /// Nesting depth of `run_local` scopes.
    local_depth: Cell<usize>,
    fallback_warned: Cell<bool>,
}

/// Marks the runtime as running inside a `LocalSet` while alive.
struct LocalScope<'a>(&'a TickQueue);

impl<'a> LocalScope<'a> {
    fn enter(ticks: &'a TickQueue) -> Self {
        ticks.local_depth.set(ticks.local_depth.get() + 1);
        Self(ticks)
    }
}

impl Drop for LocalScope<'_> {
    fn drop(&mut self) {
        let depth = self.0.local_depth.get().saturating_sub(1);
        self.0.local_depth.set(depth);
        // A drain armed on the closing set never runs; let the next
        // `next_tick` arm again.
        if depth == 0 {
            self.0.pending.set(false);
        }
    }
}

impl Runtime {
    /// Run `callback` on the next drain.
    ///
    /// An error returned by the callback is reported with info `"nextTick"`.
    pub fn next_tick(&self, callback: impl FnOnce() -> Result<()> + 'static) {
        self.0.ticks.callbacks.borrow_mut().push(Box::new(callback));
        if !self.0.ticks.pending.replace(true) {
            self.arm_drain();
        }
    }

    /// A future that resolves after the next drain.
    pub fn tick(&self) -> impl Future<Output = ()> {
        let (tx, rx) = oneshot::channel();
        self.next_tick(move || {
            let _ = tx.send(());
            Ok(())
        });
        async move {
            let _ = rx.await;
        }
    }

    /// Run `future` on a fresh `LocalSet` with the task drivers enabled.
    ///
    /// Must be awaited from inside a tokio runtime for the `Timer` driver.
    /// Callbacks left over from manual draining are armed on entry.
    pub async fn run_local<F: Future>(&self, future: F) -> F::Output {
        let local = LocalSet::new();
        let outermost = !self.in_local_scope();
        let _scope = LocalScope::enter(&self.0.ticks);
        local
            .run_until(async move {
                if outermost && self.has_pending_tick() {
                    self.0.ticks.pending.set(true);
                    self.arm_drain();
                }
                future.await
            })
            .await
    }

    /// Check if the task drivers can spawn right now.
    pub fn in_local_scope(&self) -> bool {
        self.0.ticks.local_depth.get() > 0
    }

    /// The driver that will arm the next drain.
    pub fn active_tick_mode(&self) -> TickMode {
        let configured = self.config().tick;
        let start = match configured {
            TickMode::Manual => return TickMode::Manual,
            TickMode::Auto => TickMode::LocalTask,
            mode => mode,
        };

        let local = self.in_local_scope();
        let found = DRIVER_CHAIN
            .iter()
            .copied()
            .skip_while(|mode| *mode != start)
            .find(|mode| match mode {
                TickMode::LocalTask | TickMode::Yield => local,
                TickMode::Timer => local && Handle::try_current().is_ok(),
                TickMode::Auto | TickMode::Manual => false,
            });

        match found {
            Some(mode) => mode,
            None => {
                if configured != TickMode::Auto && !self.0.ticks.fallback_warned.replace(true) {
                    self.warn(&format!(
                        "Tick mode {configured:?} needs Runtime::run_local; \
                         falling back to manual draining."
                    ));
                }
                TickMode::Manual
            }
        }
    }

    fn arm_drain(&self) {
        let mode = self.active_tick_mode();
        if mode == TickMode::Manual {
            return;
        }

        let weak = self.downgrade();
        let drain = move || {
            if let Some(runtime) = Runtime::upgrade(&weak) {
                runtime.drain_ticks();
            }
        };

        match mode {
            TickMode::LocalTask => {
                tokio::task::spawn_local(async move { drain() });
            }
            TickMode::Yield => {
                tokio::task::spawn_local(async move {
                    tokio::task::yield_now().await;
                    drain();
                });
            }
            TickMode::Timer => {
                tokio::task::spawn_local(async move {
                    tokio::time::sleep(Duration::ZERO).await;
                    drain();
                });
            }
            TickMode::Auto | TickMode::Manual => {}
        }
    }

    /// Run every callback queued so far.
    ///
    /// Returns whether anything ran.
    pub fn drain_ticks(&self) -> bool {
        self.0.ticks.pending.set(false);
        let callbacks = std::mem::take(&mut *self.0.ticks.callbacks.borrow_mut());
        if callbacks.is_empty() {
            return false;
        }

        tracing::trace!(target: "vigil", count = callbacks.len(), "draining tick queue");

        for callback in callbacks {
            if let Err(err) = callback() {
                self.handle_error(&err, None, "nextTick");
            }
        }
        true
    }

    /// Drain until no callbacks remain. Returns the number of drains.
    ///
    /// Callbacks that keep rescheduling themselves make this loop forever.
    pub fn settle(&self) -> usize {
        let mut drains = 0;
        while self.drain_ticks() {
            drains += 1;
        }
        drains
    }

    /// Check if callbacks are waiting for a drain.
    pub fn has_pending_tick(&self) -> bool {
        !self.0.ticks.callbacks.borrow().is_empty()
    }
}

// ---- Tests ----
