// src/engine.rs
//
// The core of bulk-media. Turns a batch of encoded images into a batch of
// transformed images:
// 1. Every item runs behind an isolation boundary (errors, panics, timeouts)
// 2. At most `concurrency_limit` items are in flight at any time
// 3. Results come back in input order with per-item status
//
// This file is a facade over the modules in engine/

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed image dimension (width or height).
/// Images larger than 32768x32768 are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod aggregate;
mod codec;
mod common;
mod decoder;
mod encoder;
mod executor;
mod limits;
mod memory;
mod pipeline;
mod pool;
mod processor;
mod scheduler;
mod scratch;
mod worker;
mod worker_pool;

pub use aggregate::aggregate;
pub use codec::{Codec, NativeCodec};
pub use common::{panic_message, run_with_panic_policy};
pub use decoder::{check_dimensions, decode_image, detect_format, read_dimensions};
pub use encoder::{encode, encode_gif, encode_jpeg, encode_png, encode_webp, QualitySettings};
pub use executor::TransformExecutor;
pub use limits::{InputLimits, DEFAULT_MAX_INPUT_BYTES};
pub use memory::{memory_semaphore, MemoryPermit, WeightedSemaphore};
pub use pipeline::{
    apply_resize, calc_cover_resize_dimensions, calc_resize_dimensions, check_resize_target,
    flatten_alpha, output_dimensions, ResizeError,
};
pub use pool::{
    available_parallelism, concurrency_limit_for, worker_count_for, workers_supported,
    WORKER_HARD_CAP,
};
pub use processor::{BulkProcessor, ExecutionPath};
pub use scheduler::ChunkedScheduler;
pub use scratch::{ScratchDir, ScratchFile};
pub use worker::{TaskMessage, WorkerEvent};
pub use worker_pool::{PoolStats, WorkerPoolScheduler};
