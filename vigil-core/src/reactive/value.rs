//! Value Tree
//!
//! Reactive state is a tree of dynamically typed [`Value`]s. Objects and
//! arrays are shared, reference-counted containers; cloning a `Value` that
//! holds one clones the handle, not the contents.
//!
//! A container starts out plain. Observing it (see
//! [`Runtime::observe`](super::Runtime::observe)) attaches an
//! [`Observer`] and turns every property slot into a reactive one. The
//! read/write traps themselves live in `property.rs`; this module only holds
//! the storage.
//!
//! # Equality
//!
//! Values compare with strict equality: primitives by value (with `NaN`
//! equal to itself), containers and opaque values by identity.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::observer::Observer;
use super::property::Binding;
use crate::error::{Error, Result};

/// Accessor getter.
pub type GetterFn = Rc<dyn Fn() -> Result<Value>>;

/// Accessor setter.
pub type SetterFn = Rc<dyn Fn(Value) -> Result<()>>;

/// A dynamically typed reactive value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Object),
    Array(Array),
    /// Host data that is never observed, such as rendered output nodes.
    Opaque(Opaque),
}

impl Value {
    /// Name of the variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::Opaque(_) => "opaque",
        }
    }

    /// Check if this is `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Objects, arrays and opaque values: anything compared by identity.
    pub fn is_object_like(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_) | Value::Opaque(_))
    }

    /// The number held by this value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean held by this value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The string held by this value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The object held by this value.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The array held by this value.
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The number held by this value, or a type mismatch error.
    pub fn to_number(&self) -> Result<f64> {
        self.as_f64().ok_or(Error::TypeMismatch {
            expected: "number",
            found: self.type_name(),
        })
    }

    /// Strict equality: `NaN` equals `NaN`, containers compare by identity.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Strict equality without the `NaN` exception: `NaN` never equals
    /// itself.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            _ => self.same_value(other),
        }
    }

    /// The observer attached to this value, if it is an observed container.
    pub fn observer(&self) -> Option<Observer> {
        match self {
            Value::Object(o) => o.observer(),
            Value::Array(a) => a.observer(),
            _ => None,
        }
    }

    /// Ordering used by [`Array::sort`]: numbers numerically, strings
    /// lexicographically, mixed types by variant, nulls last.
    pub fn default_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Bool(_) => 0,
                Value::Number(_) => 1,
                Value::String(_) => 2,
                Value::Object(_) | Value::Array(_) | Value::Opaque(_) => 3,
                Value::Null => 4,
            }
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }

    /// Build a value tree from JSON. The result is plain (not observed).
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.into()),
            serde_json::Value::Array(items) => {
                Value::Array(Array::from_vec(items.into_iter().map(Value::from_json).collect()))
            }
            serde_json::Value::Object(map) => Value::Object(Object::from_pairs(
                map.into_iter().map(|(k, v)| (k, Value::from_json(v))),
            )),
        }
    }

    /// Snapshot the tree as JSON without registering dependencies.
    ///
    /// Accessor getters are invoked. Opaque values and non-finite numbers
    /// become `null`. Self-referencing trees are not supported.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Value::Null | Value::Opaque(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Array(a) => serde_json::Value::Array(
                a.to_vec().iter().map(Value::to_json).collect::<Result<_>>()?,
            ),
            Value::Object(o) => {
                let mut map = serde_json::Map::new();
                for key in o.keys() {
                    map.insert(key.clone(), o.get_raw(&key)?.to_json()?);
                }
                serde_json::Value::Object(map)
            }
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Object(o) => fmt::Debug::fmt(o, f),
            Value::Array(a) => fmt::Debug::fmt(a, f),
            Value::Opaque(_) => f.write_str("Opaque"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(a)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Array::from_vec(items))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

// ----------------------------------------------------------------------------
// Opaque
// ----------------------------------------------------------------------------

/// Host value carried through the tree untouched.
#[derive(Clone)]
pub struct Opaque(Rc<dyn Any>);

impl Opaque {
    /// Wrap a host value that is never observed.
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Borrow the wrapped value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// ----------------------------------------------------------------------------
// Object
// ----------------------------------------------------------------------------

/// Storage behind a property slot.
pub(crate) enum Storage {
    Data(Value),
    Accessor {
        get: Option<GetterFn>,
        set: Option<SetterFn>,
    },
}

/// One property of an object.
pub(crate) struct Slot {
    pub(crate) storage: Storage,
    pub(crate) configurable: bool,
    /// Present once the property has been made reactive.
    pub(crate) binding: Option<Binding>,
}

/// How to define a property with [`Object::define_property`].
pub struct PropertyDescriptor {
    storage: Storage,
    configurable: bool,
}

impl PropertyDescriptor {
    /// A plain data property.
    pub fn data(value: impl Into<Value>) -> Self {
        Self {
            storage: Storage::Data(value.into()),
            configurable: true,
        }
    }

    /// An accessor property. A getter without a setter makes the property
    /// read-only; writes are ignored.
    pub fn accessor(get: Option<GetterFn>, set: Option<SetterFn>) -> Self {
        Self {
            storage: Storage::Accessor { get, set },
            configurable: true,
        }
    }

    /// Mark the property non-configurable. Observation skips such properties.
    pub fn non_configurable(mut self) -> Self {
        self.configurable = false;
        self
    }
}

pub(crate) struct ObjectInner {
    pub(crate) slots: RefCell<IndexMap<String, Slot>>,
    extensible: Cell<bool>,
    internal: Cell<bool>,
    observer: RefCell<Option<Observer>>,
}

/// A shared, insertion-ordered map of properties.
#[derive(Clone)]
pub struct Object(pub(crate) Rc<ObjectInner>);

impl Object {
    pub fn new() -> Self {
        Self(Rc::new(ObjectInner {
            slots: RefCell::new(IndexMap::new()),
            extensible: Cell::new(true),
            internal: Cell::new(false),
            observer: RefCell::new(None),
        }))
    }

    /// Build a plain object from key/value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let object = Self::new();
        {
            let mut slots = object.0.slots.borrow_mut();
            for (key, value) in pairs {
                slots.insert(
                    key.into(),
                    Slot {
                        storage: Storage::Data(value.into()),
                        configurable: true,
                        binding: None,
                    },
                );
            }
        }
        object
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Property names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.0.slots.borrow().keys().cloned().collect()
    }

    /// Check if the object has an own property `key`.
    pub fn has(&self, key: &str) -> bool {
        self.0.slots.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Define or replace a property. Any reactive binding on the old slot is
    /// discarded. Fails silently on a non-configurable existing property or a
    /// new key on a non-extensible object.
    pub fn define_property(&self, key: impl Into<String>, descriptor: PropertyDescriptor) -> bool {
        let key = key.into();
        let mut slots = self.0.slots.borrow_mut();
        match slots.get(&key) {
            Some(slot) if !slot.configurable => return false,
            None if !self.is_extensible() => return false,
            _ => {}
        }
        slots.insert(
            key,
            Slot {
                storage: descriptor.storage,
                configurable: descriptor.configurable,
                binding: None,
            },
        );
        true
    }

    /// Remove a property without notifying anyone. Use
    /// [`Runtime::delete`](super::Runtime::delete) for reactive removal.
    pub fn remove(&self, key: &str) -> bool {
        let mut slots = self.0.slots.borrow_mut();
        match slots.get(key) {
            Some(slot) if slot.configurable => slots.shift_remove(key).is_some(),
            _ => false,
        }
    }

    pub fn prevent_extensions(&self) {
        self.0.extensible.set(false);
    }

    pub fn is_extensible(&self) -> bool {
        self.0.extensible.get()
    }

    /// Flag this object as a framework internal. Internals are never observed
    /// and refuse reactive `set`/`delete`.
    pub fn mark_internal(&self) {
        self.0.internal.set(true);
    }

    pub fn is_internal(&self) -> bool {
        self.0.internal.get()
    }

    pub fn observer(&self) -> Option<Observer> {
        self.0.observer.borrow().clone()
    }

    pub(crate) fn attach_observer(&self, observer: Observer) {
        *self.0.observer.borrow_mut() = Some(observer);
    }

    /// Read a property without going through the trap.
    pub(crate) fn get_raw(&self, key: &str) -> Result<Value> {
        let getter = {
            let slots = self.0.slots.borrow();
            match slots.get(key).map(|slot| &slot.storage) {
                None => return Ok(Value::Null),
                Some(Storage::Data(value)) => return Ok(value.clone()),
                Some(Storage::Accessor { get, .. }) => get.clone(),
            }
        };
        match getter {
            Some(get) => get(),
            None => Ok(Value::Null),
        }
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("keys", &self.keys())
            .field("observed", &self.observer().is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Array
// ----------------------------------------------------------------------------

pub(crate) struct ArrayInner {
    pub(crate) items: RefCell<Vec<Value>>,
    extensible: Cell<bool>,
    observer: RefCell<Option<Observer>>,
}

/// A shared, growable list of values.
///
/// Element reads are never tracked individually; a watcher depends on an
/// array through the property that holds it. The mutators in `array.rs`
/// notify the array's own dependency set once it is observed.
#[derive(Clone)]
pub struct Array(pub(crate) Rc<ArrayInner>);

impl Array {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Rc::new(ArrayInner {
            items: RefCell::new(items),
            extensible: Cell::new(true),
            observer: RefCell::new(None),
        }))
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`, untracked.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.items.borrow().get(index).cloned()
    }

    /// Copy of the current elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    pub fn prevent_extensions(&self) {
        self.0.extensible.set(false);
    }

    pub fn is_extensible(&self) -> bool {
        self.0.extensible.get()
    }

    pub fn observer(&self) -> Option<Observer> {
        self.0.observer.borrow().clone()
    }

    pub(crate) fn attach_observer(&self, observer: Observer) {
        *self.0.observer.borrow_mut() = Some(observer);
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.items.borrow().iter()).finish()
    }
}
