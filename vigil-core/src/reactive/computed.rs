//! Computed Properties
//!
//! A computed property is a lazy watcher exposed through an accessor.
//!
//! # How Computed Values Work
//!
//! 1. The backing watcher starts dirty and does not evaluate on creation.
//!
//! 2. Reading the value evaluates the watcher if it is dirty, then caches the
//!    result. Further reads return the cache.
//!
//! 3. When a dependency changes, the watcher only marks itself dirty. Nothing
//!    is recomputed until the next read.
//!
//! 4. If another watcher is evaluating when the value is read, it inherits
//!    every dependency of the computed watcher. That way a render that reads a
//!    computed value re-runs when the computed value's inputs change.
//!
//! With `cache: false` the getter runs on every read and no watcher exists.

use std::fmt;
use std::rc::Rc;

use super::value::{GetterFn, SetterFn, Value};
use super::watcher::Watcher;
use crate::error::Result;

/// Definition passed to [`Owner::computed`](crate::owner::Owner::computed).
#[derive(Clone)]
pub struct ComputedDef {
    pub get: GetterFn,
    pub set: Option<SetterFn>,
    pub cache: bool,
}

impl ComputedDef {
    /// A cached, read-only computed property.
    pub fn new(get: impl Fn() -> Result<Value> + 'static) -> Self {
        Self {
            get: Rc::new(get),
            set: None,
            cache: true,
        }
    }

    /// Add a setter called on writes to the computed property.
    pub fn with_setter(mut self, set: impl Fn(Value) -> Result<()> + 'static) -> Self {
        self.set = Some(Rc::new(set));
        self
    }

    /// Re-run the getter on every read.
    pub fn uncached(mut self) -> Self {
        self.cache = false;
        self
    }
}

/// Handle to a computed value.
#[derive(Clone)]
pub enum Computed {
    Cached(Watcher),
    Uncached(GetterFn),
}

impl Computed {
    /// Read the value, evaluating if dirty.
    pub fn get(&self) -> Result<Value> {
        match self {
            Computed::Cached(watcher) => {
                if watcher.is_dirty() {
                    watcher.evaluate()?;
                }
                if watcher.runtime().is_tracking() {
                    watcher.depend();
                }
                Ok(watcher.value())
            }
            Computed::Uncached(get) => get(),
        }
    }

    /// The backing lazy watcher, if cached.
    pub fn watcher(&self) -> Option<&Watcher> {
        match self {
            Computed::Cached(watcher) => Some(watcher),
            Computed::Uncached(_) => None,
        }
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Computed::Cached(watcher) => f.debug_tuple("Cached").field(watcher).finish(),
            Computed::Uncached(_) => f.write_str("Uncached"),
        }
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::Owner;
    use crate::reactive::{Object, Runtime};
    use std::cell::{Cell, RefCell};

    fn setup() -> (Runtime, Owner, Object) {
        let runtime = Runtime::new();
        let owner = Owner::new(&runtime, "root");
        let data = Object::from_pairs([("count", 2)]);
        owner.set_data(Value::from(data.clone()));
        (runtime, owner, data)
    }

    #[test]
    fn computed_caches_until_dependency_changes() {
        let (_runtime, owner, data) = setup();
        let calls = Rc::new(Cell::new(0));
        let (c, d) = (calls.clone(), data.clone());
        let doubled = owner.computed(
            "doubled",
            ComputedDef::new(move || {
                c.set(c.get() + 1);
                Ok(Value::from(d.get("count")?.to_number()? * 2.0))
            }),
        )
        .unwrap();

        assert_eq!(calls.get(), 0);
        assert_eq!(doubled.get().unwrap(), Value::from(4));
        assert_eq!(doubled.get().unwrap(), Value::from(4));
        assert_eq!(calls.get(), 1);

        data.set("count", 5).unwrap();
        assert!(doubled.watcher().unwrap().is_dirty());
        assert_eq!(calls.get(), 1);

        assert_eq!(data.get("doubled").unwrap(), Value::from(10));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn uncached_computed_runs_every_read() {
        let (_runtime, owner, _data) = setup();
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let value = owner.computed(
            "now",
            ComputedDef::new(move || {
                c.set(c.get() + 1);
                Ok(Value::from(c.get()))
            })
            .uncached(),
        )
        .unwrap();

        value.get().unwrap();
        value.get().unwrap();
        assert_eq!(calls.get(), 2);
        assert!(value.watcher().is_none());
    }

    #[test]
    fn assigning_without_setter_warns() {
        let (runtime, owner, data) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        runtime.set_warn_handler(move |msg| sink.borrow_mut().push(msg.to_string()));
        owner.computed("fixed", ComputedDef::new(|| Ok(Value::from(1)))).unwrap();

        data.set("fixed", 2).unwrap();

        assert_eq!(
            *seen.borrow(),
            vec!["Computed property \"fixed\" was assigned to but it has no setter.".to_string()]
        );
        assert_eq!(data.get("fixed").unwrap(), Value::from(1));
    }

    #[test]
    fn setter_writes_through() {
        let (_runtime, owner, data) = setup();
        let d = data.clone();
        let d2 = data.clone();
        owner.computed(
            "plus_one",
            ComputedDef::new(move || Ok(Value::from(d.get("count")?.to_number()? + 1.0)))
                .with_setter(move |v| d2.set("count", v.to_number()? - 1.0)),
        )
        .unwrap();

        data.set("plus_one", 10).unwrap();

        assert_eq!(data.get("count").unwrap(), Value::from(9));
        assert_eq!(data.get("plus_one").unwrap(), Value::from(10));
    }

    #[test]
    fn name_clash_with_data_warns() {
        let (runtime, owner, _data) = setup();
        let warned = Rc::new(Cell::new(false));
        let flag = warned.clone();
        runtime.set_warn_handler(move |msg| flag.set(msg.contains("already defined in data")));

        owner.computed("count", ComputedDef::new(|| Ok(Value::Null))).unwrap();

        assert!(warned.get());
    }
}
