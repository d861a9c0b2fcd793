//! Update Scheduler
//!
//! The scheduler batches watcher re-runs. Notifications only enqueue; the
//! queue is flushed once per tick.
//!
//! # Algorithm
//!
//! 1. `queue_watcher` skips watchers already pending. During a flush a new
//!    entry is inserted in id order among the unprocessed entries, so a
//!    watcher woken mid-flush still runs in this flush.
//!
//! 2. The first enqueue arms a flush on the next tick (or flushes right away
//!    when async mode is off).
//!
//! 3. `flush` sorts the queue by id and processes it by index, since the
//!    queue may grow while it runs. Sorting guarantees:
//!    - parent owners update before children (parents are created first)
//!    - user watchers run before the render watcher of the same owner
//!    - a watcher whose owner was destroyed by a parent's run is skipped
//!
//! 4. A watcher that re-enters the queue more than `max_update_count` times
//!    in one flush is considered an infinite loop. The main pass stops.
//!
//! 5. After the pass the state is reset, then `activated` hooks run for
//!    re-activated owners and `updated` hooks for mounted owners whose render
//!    watcher ran.

use std::collections::{HashMap, HashSet};

use crate::owner::{HookKind, Owner};
use crate::reactive::{Runtime, Watcher, WatcherId};

/// Queue and flags for one runtime.
#[derive(Default)]
pub(crate) struct SchedulerState {
    queue: Vec<Watcher>,
    has: HashSet<WatcherId>,
    circular: HashMap<WatcherId, u32>,
    activated: Vec<Owner>,
    waiting: bool,
    flushing: bool,
    index: usize,
}

impl Runtime {
    /// Add a watcher to the queue.
    ///
    /// Watchers with the same id are skipped unless they have already been
    /// processed in the current flush.
    pub fn queue_watcher(&self, watcher: &Watcher) {
        let id = watcher.id();
        let arm = {
            let mut state = self.0.scheduler.borrow_mut();
            if !state.has.insert(id) {
                return;
            }
            if state.flushing {
                let mut i = state.queue.len();
                while i > state.index + 1 && state.queue[i - 1].id() > id {
                    i -= 1;
                }
                state.queue.insert(i, watcher.clone());
            } else {
                state.queue.push(watcher.clone());
            }
            !std::mem::replace(&mut state.waiting, true)
        };

        tracing::trace!(target: "vigil", id = %id, "watcher queued");

        if !arm {
            return;
        }
        if !self.is_async() {
            self.flush();
            return;
        }
        let weak = self.downgrade();
        self.next_tick(move || {
            if let Some(runtime) = Runtime::upgrade(&weak) {
                runtime.flush();
            }
            Ok(())
        });
    }

    /// Run every queued watcher, then the post-flush hooks.
    ///
    /// Errors from individual watchers are routed to the error handler and
    /// never abort the flush. Calling `flush` while a flush is running does
    /// nothing; new entries join the running flush instead.
    pub fn flush(&self) {
        {
            let mut state = self.0.scheduler.borrow_mut();
            if state.flushing {
                return;
            }
            state.flushing = true;
            state.index = 0;
            state.queue.sort_by_key(Watcher::id);
            tracing::debug!(target: "vigil", queued = state.queue.len(), "flushing scheduler queue");
        }

        let max_updates = self.config().max_update_count;

        loop {
            let watcher = {
                let state = self.0.scheduler.borrow();
                match state.queue.get(state.index) {
                    Some(watcher) => watcher.clone(),
                    None => break,
                }
            };
            let id = watcher.id();

            watcher.run_before();
            self.0.scheduler.borrow_mut().has.remove(&id);
            if let Err(err) = watcher.run() {
                watcher.report(&err);
            }

            let looping = {
                let mut state = self.0.scheduler.borrow_mut();
                if state.has.contains(&id) {
                    let count = state.circular.entry(id).or_insert(0);
                    *count += 1;
                    *count > max_updates
                } else {
                    false
                }
            };
            if looping {
                if !self.is_production() {
                    let message = if watcher.is_user() {
                        format!(
                            "You may have an infinite update loop in watcher with expression \"{}\"",
                            watcher.expression()
                        )
                    } else {
                        "You may have an infinite update loop in a component render function."
                            .to_string()
                    };
                    self.warn(&message);
                }
                break;
            }

            self.0.scheduler.borrow_mut().index += 1;
        }

        let (ran, activated) = {
            let mut state = self.0.scheduler.borrow_mut();
            let ran = std::mem::take(&mut state.queue);
            let activated = std::mem::take(&mut state.activated);
            state.has.clear();
            state.circular.clear();
            state.index = 0;
            state.waiting = false;
            state.flushing = false;
            (ran, activated)
        };

        tracing::debug!(target: "vigil", ran = ran.len(), "scheduler queue flushed");

        for owner in activated {
            owner.activate_queued();
        }
        for watcher in ran.iter().rev() {
            if let Some(owner) = watcher.owner() {
                if owner.is_render_watcher(watcher) && owner.is_mounted() && !owner.is_destroyed()
                {
                    owner.call_hook(HookKind::Updated);
                }
            }
        }
    }

    /// Check if a flush is running.
    pub fn is_flushing(&self) -> bool {
        self.0.scheduler.borrow().flushing
    }

    /// Number of watchers waiting to run.
    pub fn pending_count(&self) -> usize {
        self.0.scheduler.borrow().has.len()
    }

    /// Queue an owner whose keep-alive activation was requested mid-flush.
    pub(crate) fn queue_activated(&self, owner: &Owner) {
        owner.set_inactive(false);
        self.0.scheduler.borrow_mut().activated.push(owner.clone());
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::owner::Owner;
    use crate::reactive::{Object, Runtime, Value, WatchSource, WatcherOptions};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder(
        owner: &Owner,
        log: &Rc<RefCell<Vec<String>>>,
        label: &str,
        data: &Object,
    ) -> crate::reactive::Watcher {
        let (log, label, data) = (log.clone(), label.to_string(), data.clone());
        owner
            .create_watcher(
                WatchSource::named(label.clone(), move || {
                    log.borrow_mut().push(label.clone());
                    data.get("n")
                }),
                None,
                WatcherOptions::default(),
            )
            .unwrap()
    }

    #[test]
    fn queue_is_deduplicated_and_flushed_once() {
        let runtime = Runtime::new();
        let owner = Owner::new(&runtime, "root");
        let data = Object::from_pairs([("n", 0)]);
        owner.set_data(Value::from(data.clone()));
        let log = Rc::new(RefCell::new(Vec::new()));
        recorder(&owner, &log, "w", &data);
        log.borrow_mut().clear();

        data.set("n", 1).unwrap();
        data.set("n", 2).unwrap();
        data.set("n", 3).unwrap();
        assert_eq!(runtime.pending_count(), 1);
        assert!(log.borrow().is_empty());

        assert!(runtime.drain_ticks());
        assert_eq!(*log.borrow(), vec!["w".to_string()]);
        assert_eq!(runtime.pending_count(), 0);
    }

    #[test]
    fn flush_runs_in_id_order() {
        let runtime = Runtime::new();
        let owner = Owner::new(&runtime, "root");
        let data = Object::from_pairs([("n", 0)]);
        owner.set_data(Value::from(data.clone()));
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = recorder(&owner, &log, "first", &data);
        let second = recorder(&owner, &log, "second", &data);
        log.borrow_mut().clear();

        runtime.queue_watcher(&second);
        runtime.queue_watcher(&first);
        runtime.flush();

        assert_eq!(*log.borrow(), vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn synchronous_mode_flushes_on_enqueue() {
        let runtime = Runtime::with_config(RuntimeConfig::synchronous());
        let owner = Owner::new(&runtime, "root");
        let data = Object::from_pairs([("n", 0)]);
        owner.set_data(Value::from(data.clone()));
        let log = Rc::new(RefCell::new(Vec::new()));
        recorder(&owner, &log, "w", &data);
        log.borrow_mut().clear();

        data.set("n", 1).unwrap();

        assert_eq!(*log.borrow(), vec!["w".to_string()]);
        assert!(!runtime.has_pending_tick());
    }

    #[test]
    fn watcher_errors_do_not_abort_flush() {
        let runtime = Runtime::new();
        let owner = Owner::new(&runtime, "root");
        let data = Object::from_pairs([("n", 0)]);
        owner.set_data(Value::from(data.clone()));
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        runtime.set_error_handler(move |err, info| sink.borrow_mut().push(format!("{info}: {err}")));

        let d = data.clone();
        owner
            .create_watcher(
                WatchSource::named("fragile", move || {
                    let n = d.get("n")?;
                    if n.as_f64() == Some(1.0) {
                        Err(crate::Error::msg("odd"))
                    } else {
                        Ok(n)
                    }
                }),
                None,
                WatcherOptions::default(),
            )
            .unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        recorder(&owner, &log, "after", &data);
        log.borrow_mut().clear();

        data.set("n", 1).unwrap();
        runtime.flush();

        assert_eq!(*errors.borrow(), vec!["watcher \"fragile\": odd".to_string()]);
        assert_eq!(*log.borrow(), vec!["after".to_string()]);
    }

    #[test]
    fn watcher_woken_mid_flush_is_inserted_in_id_order() {
        let runtime = Runtime::new();
        let owner = Owner::new(&runtime, "root");
        let data = Object::from_pairs([("a", 0), ("b", 0), ("c", 0)]);
        owner.set_data(Value::from(data.clone()));
        let log = Rc::new(RefCell::new(Vec::new()));

        let reader = |label: &'static str, key: &'static str| {
            let (log, data) = (log.clone(), data.clone());
            WatchSource::named(label, move || {
                log.borrow_mut().push(label.to_string());
                data.get(key)
            })
        };
        let (l, d) = (log.clone(), data.clone());
        owner
            .create_watcher(
                WatchSource::named("w1", move || {
                    l.borrow_mut().push("w1".to_string());
                    let a = d.get("a")?;
                    d.set("b", a.clone())?;
                    Ok(a)
                }),
                None,
                WatcherOptions::default(),
            )
            .unwrap();
        owner
            .create_watcher(reader("w2", "b"), None, WatcherOptions::default())
            .unwrap();
        owner
            .create_watcher(reader("w3", "c"), None, WatcherOptions::default())
            .unwrap();
        log.borrow_mut().clear();

        data.set("c", 1).unwrap();
        data.set("a", 1).unwrap();
        assert_eq!(runtime.pending_count(), 2);
        runtime.drain_ticks();

        assert_eq!(
            *log.borrow(),
            vec!["w1".to_string(), "w2".to_string(), "w3".to_string()]
        );
    }

    #[test]
    fn activation_during_flush_runs_after_main_pass() {
        let runtime = Runtime::new();
        let root = Owner::new(&runtime, "root");
        let data = Object::from_pairs([("n", 0)]);
        root.set_data(Value::from(data.clone()));
        let kept = root.child("kept");
        kept.deactivate();
        assert!(kept.is_inactive());

        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        kept.on_activated(move || {
            l.borrow_mut().push("activated".to_string());
            Ok(())
        });
        let l = log.clone();
        root.on_updated(move || {
            l.borrow_mut().push("updated".to_string());
            Ok(())
        });

        let (l, d, k) = (log.clone(), data.clone(), kept.clone());
        root.mount(move || {
            let n = d.get("n")?;
            if n.as_f64() == Some(1.0) {
                k.activate();
                l.borrow_mut().push("render".to_string());
            }
            Ok(n)
        })
        .unwrap();

        data.set("n", 1).unwrap();
        runtime.drain_ticks();

        assert_eq!(
            *log.borrow(),
            vec!["render".to_string(), "activated".to_string(), "updated".to_string()]
        );
        assert!(!kept.is_inactive());
    }
}
