//! Lifecycle Owners
//!
//! An [`Owner`] is the host object watchers belong to: a component instance
//! in UI terms. It holds root data, the watchers created on it, an optional
//! render watcher, lifecycle hooks, and its child owners.
//!
//! # Lifecycle
//!
//! ```text
//! new ──> set_data ──> mount ──> (updates) ──> destroy
//!                        │
//!                        └──> deactivate / activate (keep-alive)
//! ```
//!
//! Destroying an owner tears down every watcher it created, releases its
//! root data and destroys its children. Dropping the last handle to an owner
//! that was never destroyed tears its watchers down as well.
//!
//! # Error Boundaries
//!
//! `error_captured` hooks on an owner see errors raised by its descendants.
//! See [`Runtime::handle_error`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::reactive::{
    Callback, Computed, ComputedDef, EvalContext, GetterFn, Hook, Object, PropertyDescriptor,
    Runtime, SetterFn, Value, WatchSource, Watcher, WatcherOptions,
};

/// Lifecycle hook body. Errors are reported with `"<name> hook"` info.
pub type LifecycleHook = Rc<dyn Fn() -> Result<()>>;

/// Sees errors from descendants. Returning `false` stops propagation.
pub type ErrorCapturedHook = Rc<dyn Fn(&Error, &Owner, &str) -> bool>;

/// Lifecycle hooks the runtime calls on an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    BeforeUpdate,
    Updated,
    Activated,
    Deactivated,
}

impl HookKind {
    fn name(self) -> &'static str {
        match self {
            HookKind::BeforeUpdate => "beforeUpdate",
            HookKind::Updated => "updated",
            HookKind::Activated => "activated",
            HookKind::Deactivated => "deactivated",
        }
    }
}

/// Options for [`Owner::watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    pub deep: bool,
    /// Call the callback once right away with `(value, null)`.
    pub immediate: bool,
    pub sync: bool,
}

#[derive(Default)]
struct Hooks {
    before_update: Vec<LifecycleHook>,
    updated: Vec<LifecycleHook>,
    activated: Vec<LifecycleHook>,
    deactivated: Vec<LifecycleHook>,
    error_captured: Vec<ErrorCapturedHook>,
}

impl Hooks {
    fn of(&self, kind: HookKind) -> &Vec<LifecycleHook> {
        match kind {
            HookKind::BeforeUpdate => &self.before_update,
            HookKind::Updated => &self.updated,
            HookKind::Activated => &self.activated,
            HookKind::Deactivated => &self.deactivated,
        }
    }

    fn of_mut(&mut self, kind: HookKind) -> &mut Vec<LifecycleHook> {
        match kind {
            HookKind::BeforeUpdate => &mut self.before_update,
            HookKind::Updated => &mut self.updated,
            HookKind::Activated => &mut self.activated,
            HookKind::Deactivated => &mut self.deactivated,
        }
    }
}

pub(crate) struct OwnerInner {
    name: String,
    runtime: Runtime,
    parent: Option<Weak<OwnerInner>>,
    children: RefCell<Vec<Owner>>,
    data: RefCell<Value>,
    watchers: RefCell<Vec<Watcher>>,
    render_watcher: RefCell<Option<Watcher>>,
    hooks: RefCell<Hooks>,
    mounted: Cell<bool>,
    destroyed: Cell<bool>,
    being_destroyed: Cell<bool>,
    inactive: Cell<Option<bool>>,
    direct_inactive: Cell<bool>,
}

/// Handle to a lifecycle owner.
///
/// Cloning an `Owner` creates a new handle to the **same** owner.
#[derive(Clone)]
pub struct Owner(pub(crate) Rc<OwnerInner>);

impl Owner {
    /// Create a root owner. Its data starts as an empty observed object.
    pub fn new(runtime: &Runtime, name: impl Into<String>) -> Self {
        Self::build(runtime, name.into(), None)
    }

    /// Create a child owner.
    pub fn child(&self, name: impl Into<String>) -> Owner {
        let child = Self::build(&self.0.runtime, name.into(), Some(Rc::downgrade(&self.0)));
        self.0.children.borrow_mut().push(child.clone());
        child
    }

    fn build(runtime: &Runtime, name: String, parent: Option<Weak<OwnerInner>>) -> Owner {
        let data = Value::Object(Object::new());
        runtime.observe_root(&data);
        Owner(Rc::new(OwnerInner {
            name,
            runtime: runtime.clone(),
            parent,
            children: RefCell::new(Vec::new()),
            data: RefCell::new(data),
            watchers: RefCell::new(Vec::new()),
            render_watcher: RefCell::new(None),
            hooks: RefCell::new(Hooks::default()),
            mounted: Cell::new(false),
            destroyed: Cell::new(false),
            being_destroyed: Cell::new(false),
            inactive: Cell::new(None),
            direct_inactive: Cell::new(false),
        }))
    }

    /// The name used in diagnostics.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The runtime this owner belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.0.runtime
    }

    /// The parent owner, if any.
    pub fn parent(&self) -> Option<Owner> {
        self.0.parent.as_ref()?.upgrade().map(Owner)
    }

    /// Child owners in creation order.
    pub fn children(&self) -> Vec<Owner> {
        self.0.children.borrow().clone()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Owner) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // ------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------

    /// Replace the root data and observe it as root.
    ///
    /// Anything but an object is reported and replaced by an empty object.
    pub fn set_data(&self, data: Value) {
        let data = match data {
            Value::Object(_) => data,
            other => {
                self.0.runtime.warn(&format!(
                    "data functions should return an object, got {}",
                    other.type_name()
                ));
                Value::Object(Object::new())
            }
        };

        if let Some(observer) = self.0.data.borrow().observer() {
            observer.detach_root();
        }
        self.0.runtime.observe_root(&data);
        *self.0.data.borrow_mut() = data;
    }

    /// The root data value.
    pub fn data(&self) -> Value {
        self.0.data.borrow().clone()
    }

    // ------------------------------------------------------------------
    // Watchers
    // ------------------------------------------------------------------

    /// Create a watcher with explicit options.
    pub fn create_watcher(
        &self,
        source: WatchSource,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Result<Watcher> {
        Watcher::new(self, source, callback, options, false)
    }

    /// Watch a path or function and call `callback(new, old)` on change.
    ///
    /// Errors from the source or the callback are reported, never returned.
    /// Call [`Watcher::teardown`] on the result to stop watching.
    pub fn watch(
        &self,
        source: impl Into<WatchSource>,
        callback: impl Fn(&Value, &Value) -> Result<()> + 'static,
        options: WatchOptions,
    ) -> Result<Watcher> {
        let callback: Callback = Rc::new(callback);
        let watcher = self.create_watcher(
            source.into(),
            Some(callback.clone()),
            WatcherOptions {
                deep: options.deep,
                user: true,
                sync: options.sync,
                ..Default::default()
            },
        )?;

        if options.immediate {
            let _ctx = EvalContext::pause(&self.0.runtime);
            if let Err(err) = callback(&watcher.value(), &Value::Null) {
                let info = format!("callback for immediate watcher \"{}\"", watcher.expression());
                self.0.runtime.handle_error(&err, Some(self), &info);
            }
        }

        Ok(watcher)
    }

    /// Define a computed property on the root data object.
    ///
    /// A name that already exists in the data is reported and left alone;
    /// the returned handle still works.
    pub fn computed(&self, name: &str, def: ComputedDef) -> Result<Computed> {
        let computed = if def.cache {
            let watcher = self.create_watcher(
                WatchSource::Func {
                    label: Some(name.to_string()),
                    f: def.get.clone(),
                },
                None,
                WatcherOptions {
                    lazy: true,
                    ..Default::default()
                },
            )?;
            Computed::Cached(watcher)
        } else {
            Computed::Uncached(def.get.clone())
        };

        let Value::Object(data) = self.data() else {
            return Ok(computed);
        };
        if data.has(name) {
            self.0.runtime.warn(&format!(
                "The computed property \"{name}\" is already defined in data."
            ));
            return Ok(computed);
        }

        let reader = computed.clone();
        let getter: GetterFn = Rc::new(move || reader.get());
        let setter: SetterFn = match def.set {
            Some(set) => set,
            None => {
                let runtime = self.0.runtime.downgrade();
                let name = name.to_string();
                Rc::new(move |_| {
                    if let Some(runtime) = Runtime::upgrade(&runtime) {
                        if !runtime.is_production() {
                            runtime.warn(&format!(
                                "Computed property \"{name}\" was assigned to but it has no setter."
                            ));
                        }
                    }
                    Ok(())
                })
            }
        };
        data.define_property(name, PropertyDescriptor::accessor(Some(getter), Some(setter)));

        Ok(computed)
    }

    /// Mount a render body.
    ///
    /// The render watcher's `before` hook fires `before_update` for every
    /// scheduled re-render once mounted.
    pub fn mount(&self, render: impl Fn() -> Result<Value> + 'static) -> Result<Watcher> {
        let weak = Rc::downgrade(&self.0);
        let before: Hook = Rc::new(move || {
            if let Some(owner) = weak.upgrade().map(Owner) {
                if owner.is_mounted() && !owner.is_destroyed() {
                    owner.call_hook(HookKind::BeforeUpdate);
                }
            }
        });

        let watcher = Watcher::new(
            self,
            WatchSource::named(format!("render {}", self.0.name), render),
            None,
            WatcherOptions {
                before: Some(before),
                ..Default::default()
            },
            true,
        );
        match watcher {
            Ok(watcher) => {
                self.0.mounted.set(true);
                tracing::debug!(target: "vigil", owner = %self.0.name, "mounted");
                Ok(watcher)
            }
            Err(err) => {
                self.0.render_watcher.borrow_mut().take();
                Err(err)
            }
        }
    }

    /// Queue the render watcher as if a dependency changed.
    pub fn force_update(&self) {
        let watcher = self.0.render_watcher.borrow().clone();
        if let Some(watcher) = watcher {
            watcher.update();
        }
    }

    /// Tear down every watcher, release root data and destroy children.
    pub fn destroy(&self) {
        if self.0.being_destroyed.replace(true) {
            return;
        }

        if let Some(parent) = self.parent() {
            if !parent.is_being_destroyed() {
                parent.0.children.borrow_mut().retain(|c| !c.ptr_eq(self));
            }
        }

        let render = self.0.render_watcher.borrow().clone();
        if let Some(render) = render {
            render.teardown();
        }
        let watchers = std::mem::take(&mut *self.0.watchers.borrow_mut());
        for watcher in watchers {
            watcher.teardown();
        }

        if let Some(observer) = self.0.data.borrow().observer() {
            observer.detach_root();
        }
        self.0.destroyed.set(true);

        let children = std::mem::take(&mut *self.0.children.borrow_mut());
        for child in children {
            child.destroy();
        }

        tracing::debug!(target: "vigil", owner = %self.0.name, "destroyed");
    }

    // ------------------------------------------------------------------
    // Keep-alive
    // ------------------------------------------------------------------

    /// Re-activate a kept-alive owner. During a flush the activation is
    /// deferred until the flush ends.
    pub fn activate(&self) {
        if self.0.runtime.is_flushing() {
            self.0.runtime.queue_activated(self);
        } else {
            self.activate_child(true);
        }
    }

    /// Deactivate a kept-alive owner and its subtree.
    pub fn deactivate(&self) {
        self.deactivate_child(true);
    }

    pub(crate) fn activate_queued(&self) {
        self.set_inactive(true);
        self.activate_child(true);
    }

    fn activate_child(&self, direct: bool) {
        if direct {
            self.0.direct_inactive.set(false);
            if self.in_inactive_tree() {
                return;
            }
        } else if self.0.direct_inactive.get() {
            return;
        }

        if self.0.inactive.get() != Some(false) {
            self.0.inactive.set(Some(false));
            for child in self.children() {
                child.activate_child(false);
            }
            self.call_hook(HookKind::Activated);
        }
    }

    fn deactivate_child(&self, direct: bool) {
        if direct {
            self.0.direct_inactive.set(true);
            if self.in_inactive_tree() {
                return;
            }
        }

        if self.0.inactive.get() != Some(true) {
            self.0.inactive.set(Some(true));
            for child in self.children() {
                child.deactivate_child(false);
            }
            self.call_hook(HookKind::Deactivated);
        }
    }

    fn in_inactive_tree(&self) -> bool {
        let mut current = self.parent();
        while let Some(owner) = current {
            if owner.is_inactive() {
                return true;
            }
            current = owner.parent();
        }
        false
    }

    pub(crate) fn set_inactive(&self, inactive: bool) {
        self.0.inactive.set(Some(inactive));
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    /// Register a hook that runs before each scheduled re-render.
    pub fn on_before_update(&self, hook: impl Fn() -> Result<()> + 'static) {
        self.add_hook(HookKind::BeforeUpdate, hook);
    }

    /// Register a hook that runs after a flush re-rendered this owner.
    pub fn on_updated(&self, hook: impl Fn() -> Result<()> + 'static) {
        self.add_hook(HookKind::Updated, hook);
    }

    /// Register a keep-alive activation hook.
    pub fn on_activated(&self, hook: impl Fn() -> Result<()> + 'static) {
        self.add_hook(HookKind::Activated, hook);
    }

    /// Register a keep-alive deactivation hook.
    pub fn on_deactivated(&self, hook: impl Fn() -> Result<()> + 'static) {
        self.add_hook(HookKind::Deactivated, hook);
    }

    /// Register an error boundary hook for descendant errors. Return
    /// `false` to stop propagation.
    pub fn on_error_captured(&self, hook: impl Fn(&Error, &Owner, &str) -> bool + 'static) {
        self.0.hooks.borrow_mut().error_captured.push(Rc::new(hook));
    }

    fn add_hook(&self, kind: HookKind, hook: impl Fn() -> Result<()> + 'static) {
        self.0.hooks.borrow_mut().of_mut(kind).push(Rc::new(hook));
    }

    pub(crate) fn error_captured_hooks(&self) -> Vec<ErrorCapturedHook> {
        self.0.hooks.borrow().error_captured.clone()
    }

    /// Run the hooks of `kind` with tracking paused.
    pub(crate) fn call_hook(&self, kind: HookKind) {
        let hooks = self.0.hooks.borrow().of(kind).clone();
        if hooks.is_empty() {
            return;
        }
        let _ctx = EvalContext::pause(&self.0.runtime);
        for hook in hooks {
            if let Err(err) = hook() {
                let info = format!("{} hook", kind.name());
                self.0.runtime.handle_error(&err, Some(self), &info);
            }
        }
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// The render watcher installed by `mount`.
    pub fn render_watcher(&self) -> Option<Watcher> {
        self.0.render_watcher.borrow().clone()
    }

    /// Check if `watcher` is this owner's render watcher.
    pub fn is_render_watcher(&self, watcher: &Watcher) -> bool {
        self.0
            .render_watcher
            .borrow()
            .as_ref()
            .is_some_and(|w| w.ptr_eq(watcher))
    }

    /// Watchers created on this owner, in creation order.
    pub fn watchers(&self) -> Vec<Watcher> {
        self.0.watchers.borrow().clone()
    }

    /// Number of live watchers owned.
    pub fn watcher_count(&self) -> usize {
        self.0.watchers.borrow().len()
    }

    /// Check if `mount` succeeded.
    pub fn is_mounted(&self) -> bool {
        self.0.mounted.get()
    }

    /// Check if `destroy` finished.
    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    /// Check if `destroy` is running.
    pub fn is_being_destroyed(&self) -> bool {
        self.0.being_destroyed.get()
    }

    /// Check if a keep-alive deactivation is in effect.
    pub fn is_inactive(&self) -> bool {
        self.0.inactive.get() == Some(true)
    }

    pub(crate) fn set_render_watcher(&self, watcher: Watcher) {
        *self.0.render_watcher.borrow_mut() = Some(watcher);
    }

    pub(crate) fn push_watcher(&self, watcher: Watcher) {
        self.0.watchers.borrow_mut().push(watcher);
    }

    pub(crate) fn remove_watcher(&self, watcher: &Watcher) {
        self.0.watchers.borrow_mut().retain(|w| !w.ptr_eq(watcher));
    }
}

impl Drop for OwnerInner {
    fn drop(&mut self) {
        if self.destroyed.get() {
            return;
        }
        for watcher in std::mem::take(self.watchers.get_mut()) {
            watcher.teardown();
        }
        if let Some(observer) = self.data.get_mut().observer() {
            observer.detach_root();
        }
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("name", &self.0.name)
            .field("watchers", &self.watcher_count())
            .field("mounted", &self.is_mounted())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;

    fn log_hook(log: &Rc<RefCell<Vec<String>>>, entry: &str) -> impl Fn() -> Result<()> + 'static {
        let (log, entry) = (log.clone(), entry.to_string());
        move || {
            log.borrow_mut().push(entry.clone());
            Ok(())
        }
    }

    #[test]
    fn set_data_rejects_non_objects() {
        let runtime = Runtime::new();
        let warned = Rc::new(Cell::new(false));
        let flag = warned.clone();
        runtime.set_warn_handler(move |_| flag.set(true));
        let owner = Owner::new(&runtime, "root");

        owner.set_data(Value::from(3));

        assert!(warned.get());
        assert!(owner.data().as_object().is_some());
    }

    #[test]
    fn immediate_watch_fires_with_null_old_value() {
        let runtime = Runtime::new();
        let owner = Owner::new(&runtime, "root");
        owner.set_data(Value::from(Object::from_pairs([("a", 1)])));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();

        owner
            .watch(
                "a",
                move |new, old| {
                    sink.borrow_mut().push((new.clone(), old.clone()));
                    Ok(())
                },
                WatchOptions {
                    immediate: true,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(*seen.borrow(), vec![(Value::from(1), Value::Null)]);
    }

    #[test]
    fn immediate_callback_error_is_reported() {
        let runtime = Runtime::new();
        let info = Rc::new(RefCell::new(String::new()));
        let sink = info.clone();
        runtime.set_error_handler(move |_, i| *sink.borrow_mut() = i.to_string());
        let owner = Owner::new(&runtime, "root");

        owner
            .watch(
                "missing",
                |_, _| Err(Error::msg("cb")),
                WatchOptions {
                    immediate: true,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(*info.borrow(), "callback for immediate watcher \"missing\"");
    }

    #[test]
    fn destroy_tears_down_everything() {
        let runtime = Runtime::new();
        let parent = Owner::new(&runtime, "parent");
        let child = parent.child("child");
        let data = Object::from_pairs([("a", 1)]);
        child.set_data(Value::from(data.clone()));
        child.watch("a", |_, _| Ok(()), WatchOptions::default()).unwrap();
        let d = data.clone();
        child.mount(move || d.get("a")).unwrap();

        let dep = data.dep_of("a").unwrap();
        assert_eq!(dep.subscriber_count(), 2);

        parent.destroy();

        assert!(child.is_destroyed());
        assert_eq!(dep.subscriber_count(), 0);
        assert_eq!(child.watcher_count(), 0);
        assert_eq!(data.observer().unwrap().root_count(), 0);
    }

    #[test]
    fn child_destroy_leaves_parent_list() {
        let runtime = Runtime::new();
        let parent = Owner::new(&runtime, "parent");
        let child = parent.child("child");

        child.destroy();
        child.destroy();

        assert!(parent.children().is_empty());
    }

    #[test]
    fn keep_alive_hooks_respect_inactive_tree() {
        let runtime = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let outer = Owner::new(&runtime, "outer");
        let inner = outer.child("inner");
        outer.on_deactivated(log_hook(&log, "outer deactivated"));
        inner.on_deactivated(log_hook(&log, "inner deactivated"));
        outer.on_activated(log_hook(&log, "outer activated"));
        inner.on_activated(log_hook(&log, "inner activated"));

        outer.deactivate();
        assert!(inner.is_inactive());

        // The inner owner is inside an inactive tree, so this is a no-op.
        inner.activate();
        assert!(inner.is_inactive());

        outer.activate();
        assert_eq!(
            *log.borrow(),
            vec![
                "inner deactivated",
                "outer deactivated",
                "inner activated",
                "outer activated",
            ]
        );
    }

    #[test]
    fn force_update_reruns_render() {
        let runtime = Runtime::new();
        let owner = Owner::new(&runtime, "root");
        let renders = Rc::new(Cell::new(0));
        let r = renders.clone();
        owner
            .mount(move || {
                r.set(r.get() + 1);
                Ok(Value::Null)
            })
            .unwrap();

        owner.force_update();
        runtime.drain_ticks();

        assert_eq!(renders.get(), 2);
    }

    #[test]
    fn hook_errors_are_reported_with_hook_name() {
        let runtime = Runtime::new();
        let info = Rc::new(RefCell::new(String::new()));
        let sink = info.clone();
        runtime.set_error_handler(move |_, i| *sink.borrow_mut() = i.to_string());
        let owner = Owner::new(&runtime, "root");
        owner.on_updated(|| Err(Error::msg("hook")));

        owner.call_hook(HookKind::Updated);

        assert_eq!(*info.borrow(), "updated hook");
    }
}
