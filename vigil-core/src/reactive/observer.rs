//! Observers
//!
//! An [`Observer`] is attached to every observed object or array. It carries
//! the container's "shape" dep, which is notified when keys are added or
//! removed, or when an array is mutated in place.
//!
//! # How Observation Works
//!
//! `observe(value)` is idempotent: a container that already has an observer
//! returns it. Otherwise, if observation is enabled, the container is
//! extensible and is not a framework internal, a fresh observer is attached
//! and the contents are walked:
//!
//! - objects: every own property gets a read/write trap
//! - arrays: every element is observed in turn
//!
//! Primitives and opaque values are never observed.

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use super::dep::Dep;
use super::property::DefineOptions;
use super::runtime::Runtime;
use super::value::{Array, Object, Value};
use super::DepId;
use crate::error::Result;

struct ObserverInner {
    dep: Dep,
    root_count: Cell<usize>,
}

/// Per-container reactive metadata.
#[derive(Clone)]
pub struct Observer(Rc<ObserverInner>);

impl Observer {
    fn new(runtime: &Runtime) -> Self {
        Self(Rc::new(ObserverInner {
            dep: Dep::new(runtime),
            root_count: Cell::new(0),
        }))
    }

    /// The shape dep of the observed container.
    pub fn dep(&self) -> &Dep {
        &self.0.dep
    }

    /// Number of owners using the container as root data.
    pub fn root_count(&self) -> usize {
        self.0.root_count.get()
    }

    pub(crate) fn attach_root(&self) {
        self.0.root_count.set(self.0.root_count.get() + 1);
    }

    pub(crate) fn detach_root(&self) {
        self.0.root_count.set(self.0.root_count.get().saturating_sub(1));
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Observer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.0.dep.id())
            .field("root_count", &self.root_count())
            .finish()
    }
}

impl Runtime {
    /// Attach an observer to `value` if it is an observable container.
    pub fn observe(&self, value: &Value) -> Option<Observer> {
        match value {
            Value::Object(object) => self.observe_object(object),
            Value::Array(array) => self.observe_array_value(array),
            _ => None,
        }
    }

    /// Observe `value` as an owner's root data.
    pub fn observe_root(&self, value: &Value) -> Option<Observer> {
        let observer = self.observe(value)?;
        observer.attach_root();
        Some(observer)
    }

    /// Observe each element of `items`.
    pub fn observe_array(&self, items: &[Value]) {
        for item in items {
            self.observe(item);
        }
    }

    fn observe_object(&self, object: &Object) -> Option<Observer> {
        if let Some(existing) = object.observer() {
            return Some(existing);
        }
        if !self.should_observe() || !object.is_extensible() || object.is_internal() {
            return None;
        }

        let observer = Observer::new(self);
        object.attach_observer(observer.clone());
        for key in object.keys() {
            // A failing accessor read leaves that one key unbound.
            if let Err(err) = self.define_reactive(object, &key, None, DefineOptions::default()) {
                self.handle_error(&err, None, &format!("getter for property \"{key}\""));
            }
        }
        Some(observer)
    }

    fn observe_array_value(&self, array: &Array) -> Option<Observer> {
        if let Some(existing) = array.observer() {
            return Some(existing);
        }
        if !self.should_observe() || !array.is_extensible() {
            return None;
        }

        let observer = Observer::new(self);
        array.attach_observer(observer.clone());
        self.observe_array(&array.to_vec());
        Some(observer)
    }

    /// Read every nested property of `value` so the active watcher depends on
    /// all of it.
    ///
    /// Each observed container is visited once, so self-referencing trees
    /// terminate. Non-extensible containers are skipped.
    pub fn traverse(&self, value: &Value) -> Result<()> {
        let mut seen = HashSet::new();
        traverse_inner(value, &mut seen)
    }
}

fn traverse_inner(value: &Value, seen: &mut HashSet<DepId>) -> Result<()> {
    match value {
        Value::Array(array) => {
            if !array.is_extensible() {
                return Ok(());
            }
            if let Some(ob) = array.observer() {
                if !seen.insert(ob.dep().id()) {
                    return Ok(());
                }
            }
            for item in array.to_vec() {
                traverse_inner(&item, seen)?;
            }
        }
        Value::Object(object) => {
            if !object.is_extensible() {
                return Ok(());
            }
            if let Some(ob) = object.observer() {
                if !seen.insert(ob.dep().id()) {
                    return Ok(());
                }
            }
            for key in object.keys() {
                let child = object.get(&key)?;
                traverse_inner(&child, seen)?;
            }
        }
        _ => {}
    }
    Ok(())
}

// ---- Tests ----
