// src/engine/pool.rs
//
// Parallelism hints and the shared thread pool for in-process batches.
//
// A single global rayon pool is used for every chunked batch instead of a pool
// per call: no creation cost per batch and threads are reused across batches.
//
// Sizing:
// - std::thread::available_parallelism() respects cgroup/CPU quota
// - BULK_MEDIA_THREADS overrides the pool size
// - Concurrency limits reserve one core for the caller: [1, max(parallelism - 1, 1)]
//
// The pool is initialized lazily on first use; later env changes have no effect.

use rayon::ThreadPool;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Upper bound on dedicated worker threads regardless of core count.
pub const WORKER_HARD_CAP: usize = 8;

/// Minimum number of threads to ensure at least some parallelism
const MIN_THREADS: usize = 1;

pub const ENV_THREADS: &str = "BULK_MEDIA_THREADS";

static BATCH_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();
static WORKERS_SUPPORTED: OnceLock<bool> = OnceLock::new();

/// Detected parallelism, never below 1.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_THREADS)
}

/// Clamp a requested concurrency limit to `[1, max(parallelism - 1, 1)]`.
pub fn concurrency_limit_for(requested: usize, parallelism: usize) -> usize {
    let upper = parallelism.saturating_sub(1).max(1);
    requested.clamp(1, upper)
}

/// Worker pool size: `min(requested, parallelism - 1, WORKER_HARD_CAP, n_items)`, at least 1.
pub fn worker_count_for(requested: usize, parallelism: usize, n_items: usize) -> usize {
    requested
        .min(parallelism.saturating_sub(1))
        .min(WORKER_HARD_CAP)
        .min(n_items)
        .max(1)
}

/// Shared pool for chunk execution. `None` if it could not be built, in which
/// case callers run sequentially.
pub fn batch_pool() -> Option<&'static ThreadPool> {
    BATCH_POOL
        .get_or_init(|| {
            let num_threads = configured_threads().unwrap_or_else(available_parallelism);
            match rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .thread_name(|i| format!("bulk-media-rayon-{i}"))
                .build()
            {
                Ok(pool) => {
                    debug!(num_threads, "batch thread pool initialized");
                    Some(pool)
                }
                Err(e) => {
                    warn!(error = %e, num_threads, "failed to build batch thread pool, running chunks sequentially");
                    None
                }
            }
        })
        .as_ref()
}

fn configured_threads() -> Option<usize> {
    let raw = std::env::var(ENV_THREADS).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n >= MIN_THREADS => Some(n),
        _ => {
            warn!(var = ENV_THREADS, value = %raw, "ignoring invalid thread count");
            None
        }
    }
}

/// Capability probe: can this process spawn and join a thread? Evaluated once.
pub fn workers_supported() -> bool {
    *WORKERS_SUPPORTED.get_or_init(|| {
        let supported = std::thread::Builder::new()
            .name("bulk-media-probe".to_string())
            .spawn(|| ())
            .map(|handle| handle.join().is_ok())
            .unwrap_or(false);
        debug!(supported, "worker capability probe");
        supported
    })
}
