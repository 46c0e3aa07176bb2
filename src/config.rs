// src/config.rs
//
// Batch configuration: defaults plus BULK_MEDIA_* environment overrides.
//
// Values that fail to parse are ignored with a warning and the default is kept,
// so a typo in the environment never takes the service down.

use crate::batch::DEFAULT_CONCURRENCY;
use crate::engine::InputLimits;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Maximum number of inputs accepted in one batch.
pub const DEFAULT_MAX_ITEMS: usize = 50;

pub const ENV_CONCURRENCY: &str = "BULK_MEDIA_CONCURRENCY";
pub const ENV_STRATEGY: &str = "BULK_MEDIA_STRATEGY";
pub const ENV_MAX_ITEMS: &str = "BULK_MEDIA_MAX_ITEMS";
pub const ENV_ITEM_TIMEOUT_MS: &str = "BULK_MEDIA_ITEM_TIMEOUT_MS";
pub const ENV_SCRATCH_DIR: &str = "BULK_MEDIA_SCRATCH_DIR";
pub const ENV_MAX_INPUT_BYTES: &str = "BULK_MEDIA_MAX_INPUT_BYTES";

/// Which execution strategy a batch may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Worker pool when the environment supports it, chunked in-process otherwise.
    #[default]
    Auto,
    /// Always the chunked in-process scheduler.
    InProcess,
    /// Prefer the worker pool; still falls back when it is unavailable.
    WorkerPool,
}

impl Strategy {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "in-process" | "inprocess" | "in_process" | "chunked" => Some(Self::InProcess),
            "worker-pool" | "workerpool" | "worker_pool" | "workers" => Some(Self::WorkerPool),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::InProcess => "in-process",
            Self::WorkerPool => "worker-pool",
        }
    }
}

#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Requested concurrency; clamped per batch.
    pub concurrency: usize,
    pub strategy: Strategy,
    pub max_items: usize,
    /// Per-item wall-clock limit. `None` waits indefinitely.
    pub item_timeout: Option<Duration>,
    /// Parent directory for worker-pool scratch files. `None` uses the system temp dir.
    pub scratch_root: Option<PathBuf>,
    pub limits: InputLimits,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            strategy: Strategy::Auto,
            max_items: DEFAULT_MAX_ITEMS,
            item_timeout: None,
            scratch_root: None,
            limits: InputLimits::default(),
        }
    }
}

impl BatchConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each BULK_MEDIA_* key.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(concurrency) = parse_var::<usize, _>(&lookup, ENV_CONCURRENCY) {
            config.concurrency = concurrency;
        }

        if let Some(raw) = lookup(ENV_STRATEGY) {
            match Strategy::from_str(&raw) {
                Some(strategy) => config.strategy = strategy,
                None => warn!(
                    var = ENV_STRATEGY,
                    value = %raw,
                    "unknown strategy, expected auto, in-process or worker-pool"
                ),
            }
        }

        if let Some(max_items) = parse_var::<usize, _>(&lookup, ENV_MAX_ITEMS) {
            if max_items == 0 {
                warn!(var = ENV_MAX_ITEMS, "max items must be at least 1, keeping default");
            } else {
                config.max_items = max_items;
            }
        }

        if let Some(timeout_ms) = parse_var::<u64, _>(&lookup, ENV_ITEM_TIMEOUT_MS) {
            // 0 disables the timeout
            config.item_timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
        }

        if let Some(dir) = lookup(ENV_SCRATCH_DIR) {
            let dir = dir.trim();
            if !dir.is_empty() {
                config.scratch_root = Some(PathBuf::from(dir));
            }
        }

        if let Some(max_bytes) = parse_var::<u64, _>(&lookup, ENV_MAX_INPUT_BYTES) {
            config.limits.max_bytes = (max_bytes > 0).then_some(max_bytes);
        }

        config
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_item_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn with_limits(mut self, limits: InputLimits) -> Self {
        self.limits = limits;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = key, value = %raw, "ignoring unparseable value, keeping default");
            None
        }
    }
}
