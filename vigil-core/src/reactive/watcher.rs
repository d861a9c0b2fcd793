//! Watchers
//!
//! A [`Watcher`] evaluates a body, records every dependency it touched, and
//! reacts when any of them changes. The three kinds share one type:
//!
//! - **render** watchers re-run an owner's render body
//! - **lazy** watchers back computed properties and only mark themselves
//!   dirty on change
//! - **user** watchers call a callback with the new and old value
//!
//! # How Watchers Work
//!
//! 1. `get` pushes the watcher on the runtime's evaluation stack and runs the
//!    body. Every reactive read calls [`Watcher::add_dep`] through the dep.
//!
//! 2. Dependencies found during the pass go into a pending list. After the
//!    pass, deps from the previous pass that were not touched again are
//!    unsubscribed, and the pending list becomes the current one.
//!
//! 3. When a dep notifies, `update` either marks the watcher dirty (lazy),
//!    runs it inline (sync), or hands it to the scheduler.
//!
//! 4. `run` re-evaluates and fires the callback when the value changed, is a
//!    container (it may have been mutated in place), or the watcher is deep.
//!
//! # Errors
//!
//! User watchers never fail: getter and callback errors are reported through
//! [`Runtime::handle_error`] and evaluation continues with a null value. All
//! other watchers return the error to the caller.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use super::context::EvalContext;
use super::dep::Dep;
use super::runtime::Runtime;
use super::value::{GetterFn, Value};
use super::{DepId, WatcherId};
use crate::error::Result;
use crate::owner::{Owner, OwnerInner};

/// Called with `(new, old)` when a watcher's value changes.
pub type Callback = Rc<dyn Fn(&Value, &Value) -> Result<()>>;

/// A parameterless hook, such as a watcher's `before` hook.
pub type Hook = Rc<dyn Fn()>;

/// What a watcher evaluates.
#[derive(Clone)]
pub enum WatchSource {
    /// A dotted path over the owner's data, like `"user.name"`.
    Path(String),
    /// A closure. The label is used as the watcher's expression.
    Func { label: Option<String>, f: GetterFn },
}

impl WatchSource {
    /// An anonymous closure source.
    pub fn func(f: impl Fn() -> Result<Value> + 'static) -> Self {
        WatchSource::Func {
            label: None,
            f: Rc::new(f),
        }
    }

    /// A closure source with a label used in diagnostics.
    pub fn named(label: impl Into<String>, f: impl Fn() -> Result<Value> + 'static) -> Self {
        WatchSource::Func {
            label: Some(label.into()),
            f: Rc::new(f),
        }
    }

    /// A dotted path over the owner's data.
    pub fn path(path: impl Into<String>) -> Self {
        WatchSource::Path(path.into())
    }
}

impl From<&str> for WatchSource {
    fn from(path: &str) -> Self {
        WatchSource::path(path)
    }
}

impl From<String> for WatchSource {
    fn from(path: String) -> Self {
        WatchSource::Path(path)
    }
}

/// Flags for [`Owner::create_watcher`].
#[derive(Clone, Default)]
pub struct WatcherOptions {
    /// Traverse the value so nested changes trigger too.
    pub deep: bool,
    /// Report errors instead of returning them.
    pub user: bool,
    /// Evaluate on demand only (computed properties).
    pub lazy: bool,
    /// Run inline on notification instead of queueing.
    pub sync: bool,
    /// Runs right before the scheduler re-runs this watcher.
    pub before: Option<Hook>,
}

enum Getter {
    Func(GetterFn),
    Path(Vec<String>),
    Noop,
}

/// Split a dotted path into segments.
///
/// Returns `None` for anything but letters, digits, `.`, `$` and `_`.
pub(crate) fn parse_path(path: &str) -> Option<Vec<String>> {
    let valid = path
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '.' | '$' | '_'));
    valid.then(|| path.split('.').map(str::to_string).collect())
}

struct WatcherState {
    value: Value,
    dirty: bool,
    active: bool,
    deps: SmallVec<[Dep; 4]>,
    new_deps: SmallVec<[Dep; 4]>,
    dep_ids: HashSet<DepId>,
    new_dep_ids: HashSet<DepId>,
}

struct WatcherInner {
    id: WatcherId,
    runtime: Runtime,
    owner: Weak<OwnerInner>,
    expression: String,
    getter: Getter,
    callback: Option<Callback>,
    deep: bool,
    user: bool,
    lazy: bool,
    sync: bool,
    render: bool,
    before: Option<Hook>,
    state: RefCell<WatcherState>,
}

/// A dependency-tracking evaluation.
///
/// Cloning a `Watcher` creates a new handle to the **same** watcher.
#[derive(Clone)]
pub struct Watcher(Rc<WatcherInner>);

impl Watcher {
    /// Build a watcher on `owner` and, unless lazy, evaluate it once.
    ///
    /// If that first evaluation fails, the watcher is torn down and the
    /// error returned.
    pub(crate) fn new(
        owner: &Owner,
        source: WatchSource,
        callback: Option<Callback>,
        options: WatcherOptions,
        render: bool,
    ) -> Result<Self> {
        let runtime = owner.runtime();

        let (expression, getter) = match source {
            WatchSource::Func { label, f } => {
                (label.unwrap_or_else(|| "<function>".into()), Getter::Func(f))
            }
            WatchSource::Path(path) => {
                let getter = match parse_path(&path) {
                    Some(segments) => Getter::Path(segments),
                    None => {
                        runtime.warn(&format!(
                            "Failed watching path: \"{path}\" Watcher only accepts simple \
                             dot-delimited paths. For full control, use a function instead."
                        ));
                        Getter::Noop
                    }
                };
                (path, getter)
            }
        };

        let watcher = Watcher(Rc::new(WatcherInner {
            id: runtime.next_watcher_id(),
            runtime: runtime.clone(),
            owner: Rc::downgrade(&owner.0),
            expression,
            getter,
            callback,
            deep: options.deep,
            user: options.user,
            lazy: options.lazy,
            sync: options.sync,
            render,
            before: options.before,
            state: RefCell::new(WatcherState {
                value: Value::Null,
                dirty: options.lazy,
                active: true,
                deps: SmallVec::new(),
                new_deps: SmallVec::new(),
                dep_ids: HashSet::new(),
                new_dep_ids: HashSet::new(),
            }),
        }));

        if render {
            owner.set_render_watcher(watcher.clone());
        }
        owner.push_watcher(watcher.clone());

        tracing::trace!(
            target: "vigil",
            id = %watcher.id(),
            expression = %watcher.expression(),
            "watcher created"
        );

        if !watcher.0.lazy {
            match watcher.get() {
                Ok(value) => watcher.0.state.borrow_mut().value = value,
                Err(err) => {
                    watcher.teardown();
                    return Err(err);
                }
            }
        }

        Ok(watcher)
    }

    /// Evaluate the body with this watcher as the active target and
    /// reconcile dependencies.
    pub fn get(&self) -> Result<Value> {
        let runtime = &self.0.runtime;
        let result = {
            let _ctx = EvalContext::enter(runtime, Some(self.clone()));
            let result = self.call_getter().and_then(|value| {
                if self.0.deep {
                    runtime.traverse(&value)?;
                }
                Ok(value)
            });
            match result {
                Err(err) if self.0.user => {
                    let info = format!("getter for watcher \"{}\"", self.0.expression);
                    runtime.handle_error(&err, self.owner().as_ref(), &info);
                    Ok(Value::Null)
                }
                other => other,
            }
        };
        self.cleanup_deps();
        result
    }

    fn call_getter(&self) -> Result<Value> {
        match &self.0.getter {
            Getter::Func(f) => f(),
            Getter::Noop => Ok(Value::Null),
            Getter::Path(segments) => {
                let Some(owner) = self.owner() else {
                    return Ok(Value::Null);
                };
                let mut current = owner.data();
                for segment in segments {
                    current = match &current {
                        Value::Object(object) => object.get(segment)?,
                        Value::Array(array) => segment
                            .parse::<usize>()
                            .ok()
                            .and_then(|index| array.get(index))
                            .unwrap_or_default(),
                        _ => return Ok(Value::Null),
                    };
                }
                Ok(current)
            }
        }
    }

    /// Record `dep` for the current pass, subscribing if it is new.
    pub fn add_dep(&self, dep: &Dep) {
        let id = dep.id();
        let subscribe = {
            let mut state = self.0.state.borrow_mut();
            if !state.new_dep_ids.insert(id) {
                return;
            }
            state.new_deps.push(dep.clone());
            !state.dep_ids.contains(&id)
        };
        if subscribe {
            dep.add_sub(self);
        }
    }

    /// Drop deps that the last pass did not touch and promote the pending
    /// list to current.
    fn cleanup_deps(&self) {
        let stale: Vec<Dep> = {
            let state = self.0.state.borrow();
            let stale = state
                .deps
                .iter()
                .filter(|dep| !state.new_dep_ids.contains(&dep.id()))
                .cloned()
                .collect();
            stale
        };
        for dep in stale {
            dep.remove_sub(self);
        }

        let mut state = self.0.state.borrow_mut();
        let state = &mut *state;
        std::mem::swap(&mut state.dep_ids, &mut state.new_dep_ids);
        state.new_dep_ids.clear();
        std::mem::swap(&mut state.deps, &mut state.new_deps);
        state.new_deps.clear();
    }

    /// React to a dependency change.
    pub fn update(&self) {
        if self.0.lazy {
            self.0.state.borrow_mut().dirty = true;
        } else if self.0.sync {
            if let Err(err) = self.run() {
                self.report(&err);
            }
        } else {
            self.0.runtime.queue_watcher(self);
        }
    }

    /// Re-evaluate and fire the callback if the value changed.
    ///
    /// Does nothing once torn down.
    pub fn run(&self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        let value = self.get()?;
        let old = {
            let mut state = self.0.state.borrow_mut();
            // `NaN` counts as a change here, unlike in property writes.
            let changed =
                !value.strict_eq(&state.value) || value.is_object_like() || self.0.deep;
            if !changed {
                return Ok(());
            }
            std::mem::replace(&mut state.value, value.clone())
        };

        let Some(callback) = &self.0.callback else {
            return Ok(());
        };
        let _ctx = EvalContext::pause(&self.0.runtime);
        match callback(&value, &old) {
            Err(err) if self.0.user => {
                let info = format!("callback for watcher \"{}\"", self.0.expression);
                self.0
                    .runtime
                    .handle_error(&err, self.owner().as_ref(), &info);
                Ok(())
            }
            other => other,
        }
    }

    /// Evaluate a lazy watcher and clear its dirty flag.
    pub fn evaluate(&self) -> Result<()> {
        let value = self.get()?;
        let mut state = self.0.state.borrow_mut();
        state.value = value;
        state.dirty = false;
        Ok(())
    }

    /// Make the active watcher depend on everything this one depends on.
    pub fn depend(&self) {
        let deps: Vec<Dep> = self.0.state.borrow().deps.iter().cloned().collect();
        for dep in deps {
            dep.depend();
        }
    }

    /// Unsubscribe from every dep and leave the owner's watcher list.
    ///
    /// Safe to call more than once.
    pub fn teardown(&self) {
        let deps = {
            let mut state = self.0.state.borrow_mut();
            if !state.active {
                return;
            }
            state.active = false;
            state.dep_ids.clear();
            state.new_dep_ids.clear();
            state.new_deps.clear();
            std::mem::take(&mut state.deps)
        };

        if let Some(owner) = self.owner() {
            if !owner.is_being_destroyed() {
                owner.remove_watcher(self);
            }
        }
        for dep in deps {
            dep.remove_sub(self);
        }

        tracing::trace!(target: "vigil", id = %self.id(), "watcher torn down");
    }

    /// Route an error from `run` to the owner's error boundaries.
    pub(crate) fn report(&self, err: &crate::error::Error) {
        self.0
            .runtime
            .handle_error(err, self.owner().as_ref(), &self.error_info());
    }

    pub(crate) fn run_before(&self) {
        if let Some(before) = &self.0.before {
            before();
        }
    }

    /// Context string used when reporting this watcher's errors.
    pub(crate) fn error_info(&self) -> String {
        if self.0.render {
            "render".to_string()
        } else {
            format!("watcher \"{}\"", self.0.expression)
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Creation-order id; flushes run in ascending id.
    pub fn id(&self) -> WatcherId {
        self.0.id
    }

    /// The value from the last evaluation.
    pub fn value(&self) -> Value {
        self.0.state.borrow().value.clone()
    }

    /// Check if a lazy watcher needs re-evaluation.
    pub fn is_dirty(&self) -> bool {
        self.0.state.borrow().dirty
    }

    /// False once torn down.
    pub fn is_active(&self) -> bool {
        self.0.state.borrow().active
    }

    /// Check if this is a computed (lazy) watcher.
    pub fn is_lazy(&self) -> bool {
        self.0.lazy
    }

    /// Check if errors are reported instead of returned.
    pub fn is_user(&self) -> bool {
        self.0.user
    }

    /// Check if this is an owner's render watcher.
    pub fn is_render(&self) -> bool {
        self.0.render
    }

    /// Check if the value is traversed on every evaluation.
    pub fn is_deep(&self) -> bool {
        self.0.deep
    }

    /// Check if notifications run the watcher inline.
    pub fn is_sync(&self) -> bool {
        self.0.sync
    }

    /// The label or path used in diagnostics.
    pub fn expression(&self) -> &str {
        &self.0.expression
    }

    /// Ids of the current deps, sorted.
    pub fn dep_ids(&self) -> Vec<DepId> {
        let mut ids: Vec<DepId> = self.0.state.borrow().dep_ids.iter().copied().collect();
        ids.sort();
        ids
    }

    /// Number of deps recorded by the last evaluation.
    pub fn dep_count(&self) -> usize {
        self.0.state.borrow().deps.len()
    }

    /// The owner this watcher belongs to, if still alive.
    pub fn owner(&self) -> Option<Owner> {
        self.0.owner.upgrade().map(Owner)
    }

    /// The runtime this watcher belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.0.runtime
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Watcher) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.borrow();
        f.debug_struct("Watcher")
            .field("id", &self.0.id)
            .field("expression", &self.0.expression)
            .field("lazy", &self.0.lazy)
            .field("user", &self.0.user)
            .field("render", &self.0.render)
            .field("dirty", &state.dirty)
            .field("active", &state.active)
            .field("deps", &state.deps.len())
            .finish()
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::reactive::Object;
    use std::cell::Cell;

    fn setup() -> (Runtime, Owner, Object) {
        let runtime = Runtime::new();
        let owner = Owner::new(&runtime, "root");
        let data = Object::from_pairs([("a", 1), ("b", 2), ("flag", 1)]);
        owner.set_data(Value::from(data.clone()));
        (runtime, owner, data)
    }

    fn counting_callback(count: &Rc<Cell<u32>>) -> Option<Callback> {
        let count = count.clone();
        Some(Rc::new(move |_: &Value, _: &Value| {
            count.set(count.get() + 1);
            Ok(())
        }))
    }

    #[test]
    fn parse_path_rejects_invalid_characters() {
        assert_eq!(
            parse_path("a.b_c.$d"),
            Some(vec!["a".to_string(), "b_c".to_string(), "$d".to_string()])
        );
        assert_eq!(parse_path("a[0]"), None);
        assert_eq!(parse_path("a + b"), None);
    }

    #[test]
    fn stale_dependencies_are_dropped() {
        let (_runtime, owner, data) = setup();
        let d = data.clone();
        let watcher = owner
            .create_watcher(
                WatchSource::func(move || {
                    if d.get("flag")?.as_f64() == Some(1.0) {
                        d.get("a")
                    } else {
                        d.get("b")
                    }
                }),
                None,
                WatcherOptions::default(),
            )
            .unwrap();

        let dep_a = data.dep_of("a").unwrap();
        let dep_b = data.dep_of("b").unwrap();
        assert!(dep_a.has_subscriber(watcher.id()));
        assert!(!dep_b.has_subscriber(watcher.id()));

        data.set("flag", 0).unwrap();
        watcher.run().unwrap();

        assert!(!dep_a.has_subscriber(watcher.id()));
        assert!(dep_b.has_subscriber(watcher.id()));
        assert_eq!(watcher.dep_count(), 2);
    }

    #[test]
    fn path_watcher_reads_owner_data() {
        let (_runtime, owner, _data) = setup();

        let watcher = owner
            .create_watcher("a".into(), None, WatcherOptions::default())
            .unwrap();
        assert_eq!(watcher.value(), Value::from(1));

        let missing = owner
            .create_watcher("nope.deeper".into(), None, WatcherOptions::default())
            .unwrap();
        assert_eq!(missing.value(), Value::Null);
    }

    #[test]
    fn invalid_path_warns_and_yields_null() {
        let (runtime, owner, _data) = setup();
        let warned = Rc::new(Cell::new(false));
        let flag = warned.clone();
        runtime.set_warn_handler(move |msg| flag.set(msg.starts_with("Failed watching path")));

        let watcher = owner
            .create_watcher("a[0]".into(), None, WatcherOptions::default())
            .unwrap();

        assert!(warned.get());
        assert_eq!(watcher.value(), Value::Null);
    }

    #[test]
    fn sync_watcher_runs_inline() {
        let (_runtime, owner, data) = setup();
        let count = Rc::new(Cell::new(0));
        owner
            .create_watcher(
                "a".into(),
                counting_callback(&count),
                WatcherOptions {
                    sync: true,
                    user: true,
                    ..Default::default()
                },
            )
            .unwrap();

        data.set("a", 5).unwrap();
        assert_eq!(count.get(), 1);
        data.set("a", 5).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn deep_watcher_sees_nested_writes() {
        let runtime = Runtime::new();
        let owner = Owner::new(&runtime, "root");
        let nested = Object::from_pairs([("x", 1)]);
        owner.set_data(Value::from(Object::from_pairs([("n", nested.clone())])));
        let count = Rc::new(Cell::new(0));
        owner
            .create_watcher(
                "n".into(),
                counting_callback(&count),
                WatcherOptions {
                    deep: true,
                    sync: true,
                    user: true,
                    ..Default::default()
                },
            )
            .unwrap();

        nested.set("x", 2).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn user_getter_error_is_reported() {
        let (runtime, owner, _data) = setup();
        let info = Rc::new(RefCell::new(String::new()));
        let sink = info.clone();
        runtime.set_error_handler(move |_, i| *sink.borrow_mut() = i.to_string());

        let watcher = owner
            .create_watcher(
                WatchSource::named("broken", || Err(Error::msg("nope"))),
                None,
                WatcherOptions {
                    user: true,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(*info.borrow(), "getter for watcher \"broken\"");
        assert_eq!(watcher.value(), Value::Null);
    }

    #[test]
    fn non_user_construction_error_tears_down() {
        let (_runtime, owner, _data) = setup();
        let result = owner.create_watcher(
            WatchSource::func(|| Err(Error::msg("fail"))),
            None,
            WatcherOptions::default(),
        );

        assert_eq!(result.unwrap_err(), Error::msg("fail"));
        assert_eq!(owner.watcher_count(), 0);
    }

    #[test]
    fn teardown_is_idempotent() {
        let (_runtime, owner, data) = setup();
        let watcher = owner
            .create_watcher("a".into(), None, WatcherOptions::default())
            .unwrap();
        let dep = data.dep_of("a").unwrap();

        watcher.teardown();
        watcher.teardown();

        assert!(!watcher.is_active());
        assert_eq!(dep.subscriber_count(), 0);
        assert_eq!(owner.watcher_count(), 0);
        assert!(watcher.run().is_ok());
    }

    #[test]
    fn nan_result_fires_callback_on_every_run() {
        let (_runtime, owner, _data) = setup();
        let count = Rc::new(Cell::new(0));
        let watcher = owner
            .create_watcher(
                WatchSource::func(|| Ok(Value::from(f64::NAN))),
                counting_callback(&count),
                WatcherOptions {
                    user: true,
                    ..Default::default()
                },
            )
            .unwrap();

        watcher.run().unwrap();
        watcher.run().unwrap();

        assert_eq!(count.get(), 2);
    }
}
