//! Reactive Primitives
//!
//! This module implements the dependency-tracking core: the value tree,
//! dependency sets, observers, watchers and computed properties.
//!
//! # Concepts
//!
//! ## Values and Observers
//!
//! State is a tree of [`Value`]s. Observing a container attaches an
//! [`Observer`] and installs a read/write trap on every property. Arrays
//! report change through their mutating methods instead.
//!
//! ## Deps
//!
//! A [`Dep`] is the subscriber set of one observable cell: a property, or
//! the shape of an observed container. Reads register the active watcher;
//! writes notify every subscriber.
//!
//! ## Watchers
//!
//! A [`Watcher`] evaluates a body and records the deps it touched. When one
//! of them notifies, the watcher is marked dirty (lazy), run inline (sync),
//! or queued on the scheduler.
//!
//! # Implementation Notes
//!
//! Every piece hangs off an explicit [`Runtime`] handle. The active watcher
//! is the top of the runtime's evaluation stack, so a read knows whom to
//! register without any thread-local state.

mod array;
mod computed;
mod context;
mod dep;
mod ids;
mod observer;
mod property;
mod runtime;
mod value;
mod watcher;

pub use computed::{Computed, ComputedDef};
pub(crate) use context::EvalContext;
pub use dep::Dep;
pub use ids::{DepId, WatcherId};
pub use observer::Observer;
pub use property::{DefineOptions, PropertyKey};
pub use runtime::{ErrorHandler, Runtime, WarnHandler};
pub use value::{Array, GetterFn, Object, Opaque, PropertyDescriptor, SetterFn, Value};
pub use watcher::{Callback, Hook, WatchSource, Watcher, WatcherOptions};
