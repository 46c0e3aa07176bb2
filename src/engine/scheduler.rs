// src/engine/scheduler.rs
//
// Concurrency-bounded batch scheduler (in-process variant).
//
// Requests are cut into chunks of `concurrency_limit`; the items of one chunk run
// in parallel on the shared rayon pool and the whole chunk is joined before the
// next one starts, so at most `concurrency_limit` executions are ever in flight.
// A slow item holds up its chunk; that is the price of a fixed bound with no
// per-item bookkeeping.

use crate::batch::{BatchJob, BulkProcessingResult, TransformOutcome, TransformRequest};
use crate::engine::aggregate::aggregate;
use crate::engine::executor::TransformExecutor;
use crate::engine::pool;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::time::Instant;
use tracing::debug;

#[derive(Clone)]
pub struct ChunkedScheduler {
    executor: TransformExecutor,
}

impl ChunkedScheduler {
    pub fn new(executor: TransformExecutor) -> Self {
        Self { executor }
    }

    /// Run every request of `job`; failures are recorded, never propagated.
    pub fn run(&self, job: &BatchJob) -> BulkProcessingResult {
        let started = Instant::now();
        let limit = job.concurrency_limit.max(1);
        let pool = pool::batch_pool();

        let mut outcomes = Vec::with_capacity(job.len());
        for (chunk_no, chunk) in job.requests.chunks(limit).enumerate() {
            let base = chunk_no * limit;
            debug!(chunk = chunk_no, first_index = base, size = chunk.len(), "running chunk");
            let mut chunk_outcomes = self.run_chunk(base, chunk, pool);
            chunk_outcomes.sort_by_key(|outcome| outcome.index);
            outcomes.extend(chunk_outcomes);
        }

        aggregate(outcomes, started)
    }

    fn run_chunk(
        &self,
        base: usize,
        chunk: &[TransformRequest],
        pool: Option<&ThreadPool>,
    ) -> Vec<TransformOutcome> {
        match pool {
            Some(pool) if chunk.len() > 1 => pool.install(|| {
                chunk
                    .par_iter()
                    .enumerate()
                    .map(|(offset, request)| self.executor.execute(base + offset, request))
                    .collect()
            }),
            _ => chunk
                .iter()
                .enumerate()
                .map(|(offset, request)| self.executor.execute(base + offset, request))
                .collect(),
        }
    }
}
