//! Reactive Properties
//!
//! A reactive property is an object slot with a read/write trap bound to its
//! own [`Dep`].
//!
//! # How Reactive Properties Work
//!
//! 1. Reading the property while a watcher evaluates registers the watcher
//!    with the property's dep. If the value is an observed container, the
//!    watcher also depends on the container's shape dep, and for arrays on
//!    the shape dep of every observed element, recursively.
//!
//! 2. Writing an equal value (strict equality) does nothing.
//!
//! 3. Writing a different value stores it, observes it, and notifies the
//!    property's dep.
//!
//! The mutation is always synchronous. Whether subscribers re-run right away
//! or on the next tick is up to the watcher and the runtime's async mode.

use std::rc::Rc;

use super::array::depend_array;
use super::dep::Dep;
use super::observer::Observer;
use super::runtime::Runtime;
use super::value::{GetterFn, Object, SetterFn, Slot, Storage, Value};
use crate::error::Result;

/// The reactive half of a property slot.
pub(crate) struct Binding {
    pub(crate) dep: Dep,
    pub(crate) child: Option<Observer>,
    shallow: bool,
    custom_setter: Option<Rc<dyn Fn()>>,
}

/// Options for [`Runtime::define_reactive`].
#[derive(Clone, Default)]
pub struct DefineOptions {
    /// Do not observe the property's value.
    pub shallow: bool,
    /// Called before each write outside production builds.
    pub custom_setter: Option<Rc<dyn Fn()>>,
}

/// Key accepted by [`Runtime::set`] and [`Runtime::delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKey {
    Name(String),
    Index(usize),
}

impl PropertyKey {
    fn name(&self) -> String {
        match self {
            PropertyKey::Name(name) => name.clone(),
            PropertyKey::Index(index) => index.to_string(),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        PropertyKey::Name(name.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(name: String) -> Self {
        PropertyKey::Name(name)
    }
}

impl From<usize> for PropertyKey {
    fn from(index: usize) -> Self {
        PropertyKey::Index(index)
    }
}

/// What a slot held at the time it was read.
enum Current {
    Missing,
    Data(Value),
    Accessor(Option<GetterFn>, Option<SetterFn>),
}

impl Object {
    /// Read a property. Missing keys read as `Value::Null`.
    ///
    /// Accessor getter errors are returned unchanged.
    pub fn get(&self, key: &str) -> Result<Value> {
        let (current, binding) = self.snapshot(key);
        let value = match current {
            Current::Missing => return Ok(Value::Null),
            Current::Data(value) => value,
            Current::Accessor(Some(get), _) => get()?,
            Current::Accessor(None, _) => Value::Null,
        };

        if let Some((dep, child)) = binding {
            if dep.depend() {
                if let Some(child) = child {
                    child.dep().depend();
                    if let Value::Array(items) = &value {
                        depend_array(items);
                    }
                }
            }
        }

        Ok(value)
    }

    /// Write a property.
    ///
    /// Writing a missing key adds a plain, non-reactive property (use
    /// [`Runtime::set`] to add a reactive one). Writes to read-only accessors
    /// are ignored. Accessor setter errors are returned unchanged.
    pub fn set(&self, key: &str, new_value: impl Into<Value>) -> Result<()> {
        let new_value = new_value.into();
        let (current, binding) = self.snapshot(key);

        let (old_value, setter) = match current {
            Current::Missing => {
                if self.is_extensible() {
                    self.insert_plain(key, new_value);
                }
                return Ok(());
            }
            Current::Data(value) => (value, None),
            Current::Accessor(get, set) => {
                let old = match get.as_ref() {
                    Some(get) => get()?,
                    None => Value::Null,
                };
                if get.is_some() && set.is_none() {
                    return Ok(());
                }
                (old, set)
            }
        };

        if old_value.same_value(&new_value) {
            return Ok(());
        }

        let runtime = binding.as_ref().and_then(|(dep, _)| dep.runtime());
        if let Some(runtime) = &runtime {
            if !runtime.is_production() {
                if let Some(custom) = self.custom_setter(key) {
                    custom();
                }
            }
        }

        match setter {
            Some(set) => set(new_value.clone())?,
            None => self.store(key, new_value.clone()),
        }

        if let Some((dep, _)) = binding {
            let shallow = self.is_shallow(key);
            let child = match (&runtime, shallow) {
                (Some(runtime), false) => runtime.observe(&new_value),
                _ => None,
            };
            self.set_child(key, child);
            dep.notify();
        }

        Ok(())
    }

    /// The dep behind a reactive property.
    pub fn dep_of(&self, key: &str) -> Option<Dep> {
        let slots = self.0.slots.borrow();
        slots.get(key)?.binding.as_ref().map(|b| b.dep.clone())
    }

    /// Check if `key` has a read/write trap installed.
    pub fn is_reactive(&self, key: &str) -> bool {
        self.dep_of(key).is_some()
    }

    fn snapshot(&self, key: &str) -> (Current, Option<(Dep, Option<Observer>)>) {
        let slots = self.0.slots.borrow();
        let Some(slot) = slots.get(key) else {
            return (Current::Missing, None);
        };
        let current = match &slot.storage {
            Storage::Data(value) => Current::Data(value.clone()),
            Storage::Accessor { get, set } => Current::Accessor(get.clone(), set.clone()),
        };
        let binding = slot
            .binding
            .as_ref()
            .map(|b| (b.dep.clone(), b.child.clone()));
        (current, binding)
    }

    fn insert_plain(&self, key: &str, value: Value) {
        self.0.slots.borrow_mut().insert(
            key.to_string(),
            Slot {
                storage: Storage::Data(value),
                configurable: true,
                binding: None,
            },
        );
    }

    fn store(&self, key: &str, value: Value) {
        if let Some(slot) = self.0.slots.borrow_mut().get_mut(key) {
            slot.storage = Storage::Data(value);
        }
    }

    fn is_shallow(&self, key: &str) -> bool {
        let slots = self.0.slots.borrow();
        slots
            .get(key)
            .and_then(|slot| slot.binding.as_ref())
            .is_some_and(|b| b.shallow)
    }

    fn custom_setter(&self, key: &str) -> Option<Rc<dyn Fn()>> {
        let slots = self.0.slots.borrow();
        slots.get(key)?.binding.as_ref()?.custom_setter.clone()
    }

    fn set_child(&self, key: &str, child: Option<Observer>) {
        if let Some(binding) = self
            .0
            .slots
            .borrow_mut()
            .get_mut(key)
            .and_then(|slot| slot.binding.as_mut())
        {
            binding.child = child;
        }
    }
}

impl Runtime {
    /// Install a read/write trap on `object[key]`.
    ///
    /// With `value`, the property is created or overwritten as a data
    /// property holding it. Non-configurable properties are left untouched.
    /// Accessor properties keep their getter and setter; when both are
    /// present the getter is read once and its result observed. Errors from
    /// that read are returned before anything is installed.
    pub fn define_reactive(
        &self,
        object: &Object,
        key: &str,
        value: Option<Value>,
        options: DefineOptions,
    ) -> Result<()> {
        let existing = {
            let slots = object.0.slots.borrow();
            match slots.get(key) {
                Some(slot) if !slot.configurable => return Ok(()),
                Some(Slot {
                    storage: Storage::Data(v),
                    ..
                }) => Current::Data(v.clone()),
                Some(Slot {
                    storage: Storage::Accessor { get, set },
                    ..
                }) => Current::Accessor(get.clone(), set.clone()),
                None => Current::Missing,
            }
        };

        let initial = match (value.clone(), existing) {
            (Some(v), _) | (None, Current::Data(v)) => Some(v),
            (None, Current::Accessor(Some(get), Some(_))) => Some(get()?),
            (None, _) => None,
        };
        let child = match (&initial, options.shallow) {
            (Some(v), false) => self.observe(v),
            _ => None,
        };

        let binding = Binding {
            dep: Dep::new(self),
            child,
            shallow: options.shallow,
            custom_setter: options.custom_setter,
        };

        let mut slots = object.0.slots.borrow_mut();
        match slots.get_mut(key) {
            Some(slot) => {
                if let Some(v) = value {
                    slot.storage = Storage::Data(v);
                }
                slot.binding = Some(binding);
            }
            None => {
                slots.insert(
                    key.to_string(),
                    Slot {
                        storage: Storage::Data(value.unwrap_or_default()),
                        configurable: true,
                        binding: Some(binding),
                    },
                );
            }
        }
        Ok(())
    }

    /// Set a property, adding it as a reactive property when the target is
    /// observed and lacks the key.
    ///
    /// For arrays, an index key replaces the element through `splice`,
    /// growing the array with nulls if needed. Null and primitive targets,
    /// internal objects, and root data are reported and left untouched.
    pub fn set(
        &self,
        target: &Value,
        key: impl Into<PropertyKey>,
        value: impl Into<Value>,
    ) -> Result<Value> {
        let key = key.into();
        let value = value.into();

        match (target, &key) {
            (Value::Array(array), PropertyKey::Index(index)) => {
                let index = *index;
                if index >= array.len() {
                    array.0.items.borrow_mut().resize(index, Value::Null);
                }
                array.splice(index, 1, [value.clone()]);
                Ok(value)
            }
            (Value::Array(_), PropertyKey::Name(name)) => {
                self.warn(&format!(
                    "Cannot set non-index key \"{name}\" on an array; use an index instead."
                ));
                Ok(value)
            }
            (Value::Object(object), key) => {
                let name = key.name();
                if object.has(&name) {
                    object.set(&name, value.clone())?;
                    return Ok(value);
                }

                let observer = object.observer();
                if object.is_internal() || observer.as_ref().is_some_and(|ob| ob.root_count() > 0)
                {
                    self.warn(
                        "Avoid adding reactive properties to an internal instance or its root \
                         data at runtime - declare it upfront instead.",
                    );
                    return Ok(value);
                }

                match observer {
                    None => object.set(&name, value.clone())?,
                    Some(observer) => {
                        if !object.is_extensible() {
                            self.warn(&format!(
                                "Cannot add property \"{name}\": object is not extensible."
                            ));
                            return Ok(value);
                        }
                        self.define_reactive(object, &name, Some(value.clone()), DefineOptions::default())?;
                        observer.dep().notify();
                    }
                }
                Ok(value)
            }
            (other, _) => {
                self.warn(&format!(
                    "Cannot set reactive property on null or primitive value: {}",
                    other.type_name()
                ));
                Ok(value)
            }
        }
    }

    /// Delete a property and notify the container's shape dep.
    pub fn delete(&self, target: &Value, key: impl Into<PropertyKey>) {
        let key = key.into();

        match (target, &key) {
            (Value::Array(array), PropertyKey::Index(index)) => {
                if *index < array.len() {
                    array.splice(*index, 1, []);
                }
            }
            (Value::Array(_), PropertyKey::Name(_)) => {}
            (Value::Object(object), key) => {
                let observer = object.observer();
                if object.is_internal() || observer.as_ref().is_some_and(|ob| ob.root_count() > 0)
                {
                    self.warn(
                        "Avoid deleting properties on an internal instance or its root data \
                         - just set it to null.",
                    );
                    return;
                }
                if !object.remove(&key.name()) {
                    return;
                }
                if let Some(observer) = observer {
                    observer.dep().notify();
                }
            }
            (other, _) => self.warn(&format!(
                "Cannot delete reactive property on null or primitive value: {}",
                other.type_name()
            )),
        }
    }
}
