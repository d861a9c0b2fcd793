//! Vigil Core
//!
//! This crate provides the dependency-tracking and update-scheduling core of
//! the Vigil reactive engine. It implements:
//!
//! - An observable value tree whose property reads and writes are intercepted
//! - Watchers that record their dependencies and react to change
//! - Lazy, cached computed values
//! - A deduplicating, id-ordered scheduler that batches re-runs per tick
//! - A tick queue driven by tokio or by the host
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: values, deps, observers, watchers and the runtime handle
//! - `schedule`: the scheduler queue and the tick queue
//! - `owner`: lifecycle owners that watchers belong to
//! - `config`: runtime configuration
//! - `error`: the crate error type
//!
//! # Example
//!
//! ```rust
//! use vigil_core::{Object, Owner, Runtime, Value, WatchOptions};
//!
//! let runtime = Runtime::new();
//! let owner = Owner::new(&runtime, "counter");
//! let data = Object::from_pairs([("count", 0)]);
//! owner.set_data(Value::from(data.clone()));
//!
//! owner
//!     .watch("count", |new, old| {
//!         println!("count: {old:?} -> {new:?}");
//!         Ok(())
//!     }, WatchOptions::default())
//!     .unwrap();
//!
//! data.set("count", 1).unwrap();
//! data.set("count", 2).unwrap();
//!
//! // Both writes are batched into one flush.
//! runtime.drain_ticks();
//! ```

pub mod config;
pub mod error;
pub mod owner;
pub mod reactive;
pub mod schedule;

pub use config::{RuntimeConfig, MAX_UPDATE_COUNT};
pub use error::{Error, Result};
pub use owner::{ErrorCapturedHook, HookKind, LifecycleHook, Owner, WatchOptions};
pub use reactive::{
    Array, Callback, Computed, ComputedDef, DefineOptions, Dep, DepId, GetterFn, Object, Observer,
    Opaque, PropertyDescriptor, PropertyKey, Runtime, SetterFn, Value, WatchSource, Watcher,
    WatcherId, WatcherOptions,
};
pub use schedule::TickMode;
