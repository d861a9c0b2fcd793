//! Runtime Configuration
//!
//! Global knobs of a [`Runtime`](crate::reactive::Runtime). Handlers for
//! warnings and errors are closures and live on the runtime itself; everything
//! here is plain data and can be loaded from JSON.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schedule::TickMode;

/// Default number of times a watcher may re-queue itself in one flush.
pub const MAX_UPDATE_COUNT: u32 = 100;

/// Configuration for a reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Defer watcher re-runs to the next tick. When false, the queue is
    /// flushed synchronously on enqueue and notifications are sorted by id.
    pub async_mode: bool,

    /// Production builds skip warnings and custom setters.
    pub production: bool,

    /// Re-queue threshold for infinite update loop detection.
    pub max_update_count: u32,

    /// Suppress warnings entirely.
    pub silent: bool,

    /// How deferred flushes are driven.
    pub tick: TickMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            async_mode: true,
            production: !cfg!(debug_assertions),
            max_update_count: MAX_UPDATE_COUNT,
            silent: false,
            tick: TickMode::Auto,
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// A config that flushes synchronously.
    pub fn synchronous() -> Self {
        Self {
            async_mode: false,
            ..Self::default()
        }
    }
}
