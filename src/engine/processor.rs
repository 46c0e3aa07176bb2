// src/engine/processor.rs
//
// Batch entry point. Validates the batch, picks an execution strategy and
// falls back to the in-process scheduler when the worker pool cannot run.
// Callers get the same `BulkProcessingResult` whichever path executed.

use crate::batch::{BatchJob, BulkProcessingResult};
use crate::config::{BatchConfig, Strategy};
use crate::engine::codec::{Codec, NativeCodec};
use crate::engine::executor::TransformExecutor;
use crate::engine::pool;
use crate::engine::scheduler::ChunkedScheduler;
use crate::engine::worker_pool::WorkerPoolScheduler;
use crate::error::{BulkMediaError, Result};
use crate::ops::TransformSpec;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The path a batch will take.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionPath {
    InProcess,
    WorkerPool,
}

#[derive(Clone)]
pub struct BulkProcessor {
    codec: Arc<dyn Codec>,
    config: BatchConfig,
}

impl Default for BulkProcessor {
    fn default() -> Self {
        Self::new(BatchConfig::default())
    }
}

impl BulkProcessor {
    /// Processor backed by `NativeCodec` with the configured input limits.
    pub fn new(config: BatchConfig) -> Self {
        Self {
            codec: Arc::new(NativeCodec::new(config.limits)),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(BatchConfig::from_env())
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Transform every payload with the same spec.
    pub fn process(&self, payloads: Vec<Vec<u8>>, spec: TransformSpec) -> Result<BulkProcessingResult> {
        let job = BatchJob::from_payloads(payloads, spec).with_concurrency(self.config.concurrency);
        self.run(&job)
    }

    /// Run a prepared job.
    ///
    /// Only batch-level problems (too many items, invalid parameters) are
    /// returned as `Err`; per-item failures are reported inside the result.
    pub fn run(&self, job: &BatchJob) -> Result<BulkProcessingResult> {
        if job.len() > self.config.max_items {
            return Err(BulkMediaError::too_many_items(job.len(), self.config.max_items));
        }
        for request in &job.requests {
            request.spec.validate()?;
        }

        let path = self.select_strategy(job);
        debug!(
            strategy = self.config.strategy.as_str(),
            path = ?path,
            items = job.len(),
            concurrency = job.concurrency_limit,
            "strategy selected"
        );

        let result = match path {
            ExecutionPath::InProcess => self.chunked().run(job),
            ExecutionPath::WorkerPool => match self.worker_pool().run(job) {
                Ok(result) => result,
                Err(e) if e.is_batch_level() => {
                    warn!(error = %e, "worker pool unavailable, running batch in-process");
                    self.chunked().run(job)
                }
                Err(e) => return Err(e),
            },
        };

        info!(
            total = result.total_processed,
            succeeded = result.success_count,
            failed = result.failure_count,
            elapsed_ms = result.processing_time_ms,
            "batch finished"
        );
        Ok(result)
    }

    /// Decide where `job` runs.
    ///
    /// `Auto` uses the pool only when it buys parallelism: more than one worker
    /// and more than one item. `WorkerPool` uses it for any non-empty batch.
    /// Both require the capability probe to pass.
    pub fn select_strategy(&self, job: &BatchJob) -> ExecutionPath {
        if job.is_empty() || !pool::workers_supported() {
            return ExecutionPath::InProcess;
        }
        match self.config.strategy {
            Strategy::InProcess => ExecutionPath::InProcess,
            Strategy::WorkerPool => ExecutionPath::WorkerPool,
            Strategy::Auto => {
                let workers = pool::worker_count_for(
                    job.concurrency_limit,
                    pool::available_parallelism(),
                    job.len(),
                );
                if workers > 1 && job.len() > 1 {
                    ExecutionPath::WorkerPool
                } else {
                    ExecutionPath::InProcess
                }
            }
        }
    }

    fn executor(&self) -> TransformExecutor {
        TransformExecutor::new(Arc::clone(&self.codec)).with_timeout(self.config.item_timeout)
    }

    fn chunked(&self) -> ChunkedScheduler {
        ChunkedScheduler::new(self.executor())
    }

    fn worker_pool(&self) -> WorkerPoolScheduler {
        WorkerPoolScheduler::new(Arc::clone(&self.codec))
            .with_timeout(self.config.item_timeout)
            .with_scratch_root(self.config.scratch_root.clone())
    }
}
