//! Runtime Configuration
//!
//! A [`RuntimeConfig`] is fixed when a [`Runtime`](crate::reactive::Runtime)
//! is created. It can be built in code or parsed from JSON:
//!
//! ```rust,ignore
//! let config = RuntimeConfig::from_json(r#"{ "flush_mode": "tokio", "recursion_limit": 50 }"#)?;
//! let rt = Runtime::with_config(config)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ReactiveError;

/// Default maximum number of passes a single flush may take.
pub const DEFAULT_RECURSION_LIMIT: usize = 100;

/// Default number of flushes between automatic sweeps.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 16;

/// How a queued flush gets arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// The host calls [`Runtime::flush`](crate::reactive::Runtime::flush) at
    /// the end of its turn.
    #[default]
    Manual,

    /// The first enqueue of a turn spawns one flush task on the current
    /// tokio runtime. Use a current-thread runtime or a `LocalSet` so the
    /// flush runs on the same thread as the writes that queued it.
    Tokio,
}

/// Configuration for a reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How flushes are arranged after a job is queued.
    pub flush_mode: FlushMode,

    /// Maximum flush passes before the flush gives up.
    pub recursion_limit: usize,

    /// Skip notification for container writes that store a same-value-equal
    /// value. Off by default: every container write notifies.
    pub dedupe_container_writes: bool,

    /// Sweep dead registry and wrapper entries after every this many
    /// flushes. `0` turns automatic sweeping off.
    pub sweep_interval: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::Manual,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            dedupe_container_writes: false,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a configuration from JSON.
    ///
    /// Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self, ReactiveError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration invariants.
    pub fn validate(&self) -> Result<(), ReactiveError> {
        if self.recursion_limit == 0 {
            return Err(ReactiveError::InvalidConfig(
                "recursion_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder-style setter for the flush mode.
    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    /// Builder-style setter for the recursion limit.
    pub fn with_recursion_limit(mut self, recursion_limit: usize) -> Self {
        self.recursion_limit = recursion_limit;
        self
    }

    /// Builder-style setter for container write deduplication.
    pub fn with_dedupe_container_writes(mut self, dedupe: bool) -> Self {
        self.dedupe_container_writes = dedupe;
        self
    }

    /// Builder-style setter for the automatic sweep interval.
    pub fn with_sweep_interval(mut self, sweep_interval: u64) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }
}
