// src/engine/worker.rs
//
// Worker entry point for the worker-pool scheduler.
//
// A worker is a dedicated OS thread that receives `TaskMessage`s on its own
// channel, maps the payload from scratch storage, runs the codec and reports on
// the pool's shared event channel. A panic escaping the codec kills the worker;
// its `CrashGuard` reports the crash while unwinding so the pool can replace it.

use crate::batch::TransformedImage;
use crate::engine::codec::Codec;
use crate::engine::executor::invoke_codec;
use crate::engine::scratch::map_payload;
use crate::error::Result;
use crate::ops::TransformSpec;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, SendError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// One unit of work: which input, where its bytes are, what to do with them.
#[derive(Clone, Debug)]
pub struct TaskMessage {
    pub index: usize,
    pub path: PathBuf,
    pub spec: Arc<TransformSpec>,
}

/// Reported by workers on the shared event channel.
#[derive(Debug)]
pub enum WorkerEvent {
    Finished {
        slot: usize,
        generation: u64,
        index: usize,
        result: Result<TransformedImage>,
    },
    Crashed {
        slot: usize,
        generation: u64,
    },
}

pub struct WorkerContext {
    pub slot: usize,
    pub generation: u64,
    pub codec: Arc<dyn Codec>,
    pub timeout: Option<Duration>,
    pub tasks: Receiver<TaskMessage>,
    pub events: Sender<WorkerEvent>,
}

/// Reports `Crashed` if dropped during a panic.
struct CrashGuard {
    slot: usize,
    generation: u64,
    events: Sender<WorkerEvent>,
}

impl Drop for CrashGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(slot = self.slot, generation = self.generation, "worker crashed");
            let _ = self.events.send(WorkerEvent::Crashed {
                slot: self.slot,
                generation: self.generation,
            });
        }
    }
}

/// Worker loop. Returns when the task channel closes or the pool stops listening.
pub fn worker_main(ctx: WorkerContext) {
    let _guard = CrashGuard {
        slot: ctx.slot,
        generation: ctx.generation,
        events: ctx.events.clone(),
    };
    debug!(slot = ctx.slot, generation = ctx.generation, "worker started");

    while let Ok(task) = ctx.tasks.recv() {
        let result = run_task(&ctx, &task);
        let event = WorkerEvent::Finished {
            slot: ctx.slot,
            generation: ctx.generation,
            index: task.index,
            result,
        };
        if ctx.events.send(event).is_err() {
            break;
        }
    }

    debug!(slot = ctx.slot, generation = ctx.generation, "worker exiting");
}

fn run_task(ctx: &WorkerContext, task: &TaskMessage) -> Result<TransformedImage> {
    let payload = map_payload(&task.path)?;
    invoke_codec(
        &ctx.codec,
        Arc::new(payload),
        Arc::clone(&task.spec),
        ctx.timeout,
    )
}

/// The pool's end of a worker.
#[derive(Debug)]
pub struct WorkerHandle {
    tasks: Sender<TaskMessage>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Hand a task to the worker; gives it back if the worker is gone.
    pub fn send(&self, task: TaskMessage) -> std::result::Result<(), TaskMessage> {
        self.tasks.send(task).map_err(|SendError(task)| task)
    }

    /// Close the task channel and wait for the thread. Returns the panic payload
    /// text if the worker died from a panic.
    pub fn shutdown(self) -> Option<String> {
        drop(self.tasks);
        match self.join.join() {
            Ok(()) => None,
            Err(payload) => Some(crate::engine::common::panic_message(payload.as_ref())),
        }
    }
}

/// Start a worker thread for `slot`.
pub fn spawn_worker(
    slot: usize,
    generation: u64,
    codec: Arc<dyn Codec>,
    timeout: Option<Duration>,
    events: Sender<WorkerEvent>,
) -> io::Result<WorkerHandle> {
    let (tasks_tx, tasks_rx) = mpsc::channel();
    let ctx = WorkerContext {
        slot,
        generation,
        codec,
        timeout,
        tasks: tasks_rx,
        events,
    };
    let join = thread::Builder::new()
        .name(format!("bulk-media-worker-{slot}"))
        .spawn(move || worker_main(ctx))?;
    Ok(WorkerHandle {
        tasks: tasks_tx,
        join,
    })
}
