// src/engine/worker_pool.rs
//
// Worker-pool scheduler: the same contract as the chunked scheduler, executed
// on a fixed set of dedicated worker threads.
//
// - Payloads travel through per-batch scratch files; workers get a path.
// - Dispatch is FIFO: any idle worker takes the next pending index, so a slow
//   item only occupies its own worker.
// - The pool blocks on the shared event channel until every item is accounted
//   for. No polling.
// - A worker that panics is joined, its in-flight item is recorded as
//   `WorkerCrashed` and a replacement with a new generation takes its slot.
//   Events tagged with an old generation are ignored.
// - An item whose scratch file cannot be written is held back and runs
//   in-process once no worker is busy, so the pool never exceeds its size.
//   If no worker can be kept alive the rest of the queue runs in-process too.

use crate::batch::{BatchJob, BulkProcessingResult, TransformOutcome};
use crate::engine::aggregate::aggregate;
use crate::engine::codec::Codec;
use crate::engine::executor::{into_outcome, TransformExecutor};
use crate::engine::pool;
use crate::engine::scratch::{ScratchDir, ScratchFile};
use crate::engine::worker::{spawn_worker, TaskMessage, WorkerEvent, WorkerHandle};
use crate::error::{BulkMediaError, Result};
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Worker counts observed during one batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub initial_size: usize,
    pub final_size: usize,
    pub replaced: usize,
}

/// Starts one worker thread; `spawn_worker` outside of tests.
type SpawnFn = fn(
    usize,
    u64,
    Arc<dyn Codec>,
    Option<Duration>,
    Sender<WorkerEvent>,
) -> io::Result<WorkerHandle>;

#[derive(Clone)]
pub struct WorkerPoolScheduler {
    codec: Arc<dyn Codec>,
    timeout: Option<Duration>,
    scratch_root: Option<PathBuf>,
    pool_size: Option<usize>,
    spawn: SpawnFn,
}

impl WorkerPoolScheduler {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            timeout: None,
            scratch_root: None,
            pool_size: None,
            spawn: spawn_worker,
        }
    }

    #[cfg(test)]
    fn with_spawn(mut self, spawn: SpawnFn) -> Self {
        self.spawn = spawn;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scratch_root(mut self, root: Option<PathBuf>) -> Self {
        self.scratch_root = root;
        self
    }

    /// Fixed worker count (still capped by the batch size), bypassing the
    /// parallelism-derived default.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Number of workers this scheduler would start for `job`.
    pub fn pool_size_for(&self, job: &BatchJob) -> usize {
        match self.pool_size {
            Some(size) => size.min(job.len()).max(1),
            None => pool::worker_count_for(
                job.concurrency_limit,
                pool::available_parallelism(),
                job.len(),
            ),
        }
    }

    pub fn run(&self, job: &BatchJob) -> Result<BulkProcessingResult> {
        self.run_with_stats(job).map(|(result, _)| result)
    }

    /// Run the batch. Item failures (including crashes) are inside the result;
    /// `Err` means the pool itself could not run (batch-level error).
    pub fn run_with_stats(&self, job: &BatchJob) -> Result<(BulkProcessingResult, PoolStats)> {
        let started = Instant::now();
        if job.is_empty() {
            return Ok((aggregate(Vec::new(), started), PoolStats::default()));
        }

        let scratch = ScratchDir::create(self.scratch_root.as_deref())?;
        let (events_tx, events_rx) = mpsc::channel();

        let size = self.pool_size_for(job);
        let mut slots = Vec::with_capacity(size);
        for id in 0..size {
            match (self.spawn)(id, 0, Arc::clone(&self.codec), self.timeout, events_tx.clone()) {
                Ok(handle) => slots.push(WorkerSlot::new(id, handle)),
                Err(e) => warn!(slot = id, error = %e, "failed to spawn worker"),
            }
        }
        if slots.is_empty() {
            scratch.close();
            return Err(BulkMediaError::worker_pool_unavailable(
                "no worker thread could be spawned",
            ));
        }
        debug!(workers = slots.len(), items = job.len(), "worker pool started");

        let mut run = PoolRun {
            scheduler: self,
            job,
            scratch,
            stats: PoolStats {
                initial_size: slots.len(),
                ..PoolStats::default()
            },
            slots,
            events_tx,
            pending: (0..job.len()).collect(),
            deferred: VecDeque::new(),
            outcomes: Vec::with_capacity(job.len()),
            inline: TransformExecutor::new(Arc::clone(&self.codec)).with_timeout(self.timeout),
        };
        let completed = run.drive(&events_rx);
        let (outcomes, stats) = run.finish();
        completed?;

        Ok((aggregate(outcomes, started), stats))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Idle,
    Busy,
}

struct InFlight {
    index: usize,
    // deleted from disk when dropped
    _scratch: ScratchFile,
}

struct WorkerSlot {
    id: usize,
    generation: u64,
    state: SlotState,
    /// `None` once the worker died and could not be replaced.
    handle: Option<WorkerHandle>,
    in_flight: Option<InFlight>,
}

impl WorkerSlot {
    fn new(id: usize, handle: WorkerHandle) -> Self {
        Self {
            id,
            generation: 0,
            state: SlotState::Idle,
            handle: Some(handle),
            in_flight: None,
        }
    }

    fn is_alive(&self) -> bool {
        self.handle.is_some()
    }

    fn is_idle(&self) -> bool {
        self.is_alive() && self.state == SlotState::Idle
    }

    fn is_busy(&self) -> bool {
        self.state == SlotState::Busy
    }
}

struct PoolRun<'a> {
    scheduler: &'a WorkerPoolScheduler,
    job: &'a BatchJob,
    scratch: ScratchDir,
    slots: Vec<WorkerSlot>,
    events_tx: Sender<WorkerEvent>,
    pending: VecDeque<usize>,
    /// Items whose scratch write failed; run in-process while the pool is quiet.
    deferred: VecDeque<usize>,
    outcomes: Vec<TransformOutcome>,
    inline: TransformExecutor,
    stats: PoolStats,
}

impl PoolRun<'_> {
    fn total(&self) -> usize {
        self.job.len()
    }

    fn drive(&mut self, events_rx: &Receiver<WorkerEvent>) -> Result<()> {
        loop {
            self.dispatch();
            if self.outcomes.len() == self.total() {
                return Ok(());
            }

            if !self.slots.iter().any(WorkerSlot::is_busy) {
                if !self.deferred.is_empty() {
                    // nothing else in flight: running inline stays within the bound
                    self.run_deferred_inline();
                    continue;
                }
                // nothing in flight and nobody to hand work to
                warn!(
                    remaining = self.pending.len(),
                    "no live workers left, running remaining items in-process"
                );
                self.run_pending_inline();
                return Ok(());
            }

            // the pool holds a sender, so this only fails if every sender is gone
            let event = events_rx.recv().map_err(|_| {
                BulkMediaError::worker_pool_unavailable("worker event channel closed")
            })?;
            self.handle_event(event);
        }
    }

    /// Give every idle worker the next pending item.
    fn dispatch(&mut self) {
        for slot_idx in 0..self.slots.len() {
            while self.slots[slot_idx].is_idle() {
                let Some(index) = self.pending.pop_front() else {
                    return;
                };
                self.dispatch_to(slot_idx, index);
            }
        }
    }

    fn dispatch_to(&mut self, slot_idx: usize, index: usize) {
        let request = &self.job.requests[index];
        let scratch = match self.scratch.write_payload(index, request.payload.as_slice()) {
            Ok(file) => file,
            Err(e) => {
                warn!(index, error = %e, "scratch write failed, deferring item to in-process run");
                self.deferred.push_back(index);
                return;
            }
        };

        let task = TaskMessage {
            index,
            path: scratch.to_path_buf(),
            spec: Arc::clone(&request.spec),
        };
        let slot = &mut self.slots[slot_idx];
        let sent = match &slot.handle {
            Some(handle) => handle.send(task).is_ok(),
            None => false,
        };
        if sent {
            slot.state = SlotState::Busy;
            slot.in_flight = Some(InFlight {
                index,
                _scratch: scratch,
            });
        } else {
            // worker went away between events; requeue and replace it
            self.pending.push_front(index);
            drop(scratch);
            self.replace(slot_idx);
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Finished {
                slot,
                generation,
                index,
                result,
            } => {
                if !self.is_current(slot, generation) {
                    debug!(slot, generation, index, "ignoring result from replaced worker");
                    return;
                }
                let worker = &mut self.slots[slot];
                worker.state = SlotState::Idle;
                match worker.in_flight.take() {
                    Some(in_flight) if in_flight.index == index => {}
                    other => {
                        error!(slot, index, expected = ?other.as_ref().map(|f| f.index), "worker reported an unexpected item");
                    }
                }
                self.outcomes.push(into_outcome(index, result));
            }
            WorkerEvent::Crashed { slot, generation } => {
                if !self.is_current(slot, generation) {
                    debug!(slot, generation, "ignoring crash report from replaced worker");
                    return;
                }
                let in_flight = self.slots[slot].in_flight.take();
                let message = self.replace(slot);
                if let Some(in_flight) = in_flight {
                    let err = BulkMediaError::worker_crashed(
                        slot,
                        message.unwrap_or_else(|| "worker exited unexpectedly".to_string()),
                    );
                    self.outcomes.push(into_outcome(in_flight.index, Err(err)));
                }
            }
        }
    }

    fn is_current(&self, slot: usize, generation: u64) -> bool {
        self.slots
            .get(slot)
            .is_some_and(|s| s.generation == generation && s.is_alive())
    }

    /// Join the worker in `slot_idx` and start a replacement with the next
    /// generation. Returns the dead worker's panic message, if any.
    fn replace(&mut self, slot_idx: usize) -> Option<String> {
        let slot = &mut self.slots[slot_idx];
        let message = slot.handle.take().and_then(WorkerHandle::shutdown);
        slot.generation += 1;
        slot.state = SlotState::Idle;

        match (self.scheduler.spawn)(
            slot.id,
            slot.generation,
            Arc::clone(&self.scheduler.codec),
            self.scheduler.timeout,
            self.events_tx.clone(),
        ) {
            Ok(handle) => {
                slot.handle = Some(handle);
                self.stats.replaced += 1;
                debug!(slot = slot.id, generation = slot.generation, "worker replaced");
            }
            Err(e) => {
                error!(slot = slot.id, error = %e, "failed to replace worker");
            }
        }
        message
    }

    fn run_deferred_inline(&mut self) {
        while let Some(index) = self.deferred.pop_front() {
            let outcome = self.inline.execute(index, &self.job.requests[index]);
            self.outcomes.push(outcome);
        }
    }

    fn run_pending_inline(&mut self) {
        while let Some(index) = self.pending.pop_front() {
            let outcome = self.inline.execute(index, &self.job.requests[index]);
            self.outcomes.push(outcome);
        }
    }

    /// Stop all workers and remove scratch storage.
    fn finish(self) -> (Vec<TransformOutcome>, PoolStats) {
        let PoolRun {
            scratch,
            slots,
            outcomes,
            mut stats,
            ..
        } = self;

        stats.final_size = slots.iter().filter(|s| s.is_alive()).count();
        for slot in slots {
            // in-flight scratch files go before the directory
            drop(slot.in_flight);
            if let Some(message) = slot.handle.and_then(WorkerHandle::shutdown) {
                warn!(slot = slot.id, panic = %message, "worker panicked during shutdown");
            }
        }
        scratch.close();
        debug!(
            final_size = stats.final_size,
            replaced = stats.replaced,
            "worker pool stopped"
        );
        (outcomes, stats)
    }
}
