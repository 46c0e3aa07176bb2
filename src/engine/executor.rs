// src/engine/executor.rs
//
// Single-item transform executor: the isolation boundary between one input and
// the rest of the batch. Whatever happens inside the codec (error, panic,
// degenerate output, timeout) comes out as a `TransformOutcome`.

use crate::batch::{TransformOutcome, TransformRequest, TransformedImage};
use crate::engine::codec::Codec;
use crate::engine::common::run_with_panic_policy;
use crate::error::{BulkMediaError, Result};
use crate::ops::TransformSpec;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct TransformExecutor {
    codec: Arc<dyn Codec>,
    timeout: Option<Duration>,
}

impl TransformExecutor {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self {
            codec,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Transform one request. Never panics and never returns an error.
    pub fn execute(&self, index: usize, request: &TransformRequest) -> TransformOutcome {
        let result = run_with_panic_policy("transform", || {
            invoke_codec(
                &self.codec,
                Arc::clone(&request.payload),
                Arc::clone(&request.spec),
                self.timeout,
            )
        });
        into_outcome(index, result)
    }
}

/// Turn a codec result into an outcome, rejecting degenerate images and
/// logging every failure.
pub(crate) fn into_outcome(index: usize, result: Result<TransformedImage>) -> TransformOutcome {
    let result = result.and_then(|image| {
        if image.is_degenerate() {
            Err(BulkMediaError::encode_failed(
                image.format.as_str(),
                format!(
                    "codec produced a degenerate image ({} bytes, {}x{})",
                    image.data.len(),
                    image.width,
                    image.height
                ),
            ))
        } else {
            Ok(image)
        }
    });

    match result {
        Ok(image) => TransformOutcome::success(index, image),
        Err(err) => {
            warn!(
                index,
                category = err.category().as_str(),
                error = %err,
                "item failed"
            );
            TransformOutcome::failure(index, err)
        }
    }
}

/// Call the codec, optionally racing it against `timeout`.
///
/// Without a timeout the codec runs on the calling thread and a panic propagates
/// to the caller. With a timeout it runs on a helper thread; a panic there is
/// re-raised on the calling thread, so both paths panic the same way.
///
/// A helper that misses the deadline cannot be stopped. The item is classified
/// as `TransformTimedOut` at the deadline, but the caller keeps its slot until the
/// helper exits and its result is dropped, so timed-out work still counts
/// against the concurrency limit.
pub(crate) fn invoke_codec<P>(
    codec: &Arc<dyn Codec>,
    payload: Arc<P>,
    spec: Arc<TransformSpec>,
    timeout: Option<Duration>,
) -> Result<TransformedImage>
where
    P: AsRef<[u8]> + Send + Sync + ?Sized + 'static,
{
    let Some(timeout) = timeout else {
        return codec.transform((*payload).as_ref(), &spec);
    };

    let (tx, rx) = mpsc::sync_channel(1);
    let helper_codec = Arc::clone(codec);
    let helper_payload = Arc::clone(&payload);
    let helper_spec = Arc::clone(&spec);
    let helper = thread::Builder::new()
        .name("bulk-media-transform".to_string())
        .spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| {
                helper_codec.transform((*helper_payload).as_ref(), &helper_spec)
            }));
            // receiver is gone after a timeout
            let _ = tx.send(result);
        });

    let helper = match helper {
        Ok(handle) => handle,
        Err(e) => {
            warn!(error = %e, "could not spawn transform helper, running without timeout");
            return codec.transform((*payload).as_ref(), &spec);
        }
    };

    match rx.recv_timeout(timeout) {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => resume_unwind(panic),
        Err(RecvTimeoutError::Timeout) => {
            let timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
            warn!(timeout_ms, "transform timed out, waiting for it to release its slot");
            // the helper catches its own panics, so join only fails if it was killed
            let _ = helper.join();
            Err(BulkMediaError::transform_timed_out(timeout_ms))
        }
        Err(RecvTimeoutError::Disconnected) => {
            let _ = helper.join();
            Err(BulkMediaError::internal_panic(
                "transform helper exited without a result",
            ))
        }
    }
}
