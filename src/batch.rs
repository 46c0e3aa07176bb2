// src/batch.rs
//
// Batch data model: requests in, outcomes and the aggregate result out.
//
// Every request owns an immutable view of its payload and spec (Arc); nothing in
// here is mutated after construction, so requests can be handed to any thread.

use crate::engine::{available_parallelism, concurrency_limit_for};
use crate::error::{BulkMediaError, ErrorCategory};
use crate::ops::{OutputFormat, TransformSpec};
use std::sync::Arc;

/// Concurrency limit used when the caller does not specify one.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// One input image plus the transform to apply to it.
#[derive(Clone, Debug)]
pub struct TransformRequest {
    pub payload: Arc<Vec<u8>>,
    pub spec: Arc<TransformSpec>,
}

impl TransformRequest {
    pub fn new(payload: Vec<u8>, spec: Arc<TransformSpec>) -> Self {
        Self {
            payload: Arc::new(payload),
            spec,
        }
    }
}

/// Encoded output of a successful transform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformedImage {
    pub data: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub byte_size: usize,
}

impl TransformedImage {
    pub fn new(data: Vec<u8>, format: OutputFormat, width: u32, height: u32) -> Self {
        let byte_size = data.len();
        Self {
            data,
            format,
            width,
            height,
            byte_size,
        }
    }

    /// Empty buffer or a zero dimension: not a usable result.
    pub fn is_degenerate(&self) -> bool {
        self.data.is_empty() || self.width == 0 || self.height == 0
    }
}

/// Why a single item failed.
#[derive(Clone, Debug)]
pub struct ItemFailure {
    pub error: BulkMediaError,
}

impl ItemFailure {
    pub fn new(error: BulkMediaError) -> Self {
        Self { error }
    }

    pub fn detail(&self) -> String {
        self.error.to_string()
    }

    pub fn category(&self) -> ErrorCategory {
        self.error.category()
    }
}

impl From<BulkMediaError> for ItemFailure {
    fn from(error: BulkMediaError) -> Self {
        Self::new(error)
    }
}

#[derive(Clone, Debug)]
pub enum OutcomeStatus {
    Success(TransformedImage),
    Failure(ItemFailure),
}

/// Result of one item, tagged with its original input position.
#[derive(Clone, Debug)]
pub struct TransformOutcome {
    pub index: usize,
    pub status: OutcomeStatus,
}

impl TransformOutcome {
    pub fn success(index: usize, image: TransformedImage) -> Self {
        Self {
            index,
            status: OutcomeStatus::Success(image),
        }
    }

    pub fn failure(index: usize, error: BulkMediaError) -> Self {
        Self {
            index,
            status: OutcomeStatus::Failure(ItemFailure::new(error)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success(_))
    }
}

/// An ordered batch plus its concurrency limit.
#[derive(Clone, Debug)]
pub struct BatchJob {
    pub requests: Vec<TransformRequest>,
    pub concurrency_limit: usize,
}

impl BatchJob {
    /// New job with the default concurrency limit.
    pub fn new(requests: Vec<TransformRequest>) -> Self {
        Self {
            requests,
            concurrency_limit: concurrency_limit_for(
                DEFAULT_CONCURRENCY,
                available_parallelism(),
            ),
        }
    }

    /// Sets the concurrency limit, clamped to `[1, max(parallelism - 1, 1)]`.
    pub fn with_concurrency(mut self, requested: usize) -> Self {
        self.concurrency_limit =
            concurrency_limit_for(requested, available_parallelism());
        self
    }

    /// Every payload shares the same spec.
    pub fn from_payloads(payloads: Vec<Vec<u8>>, spec: TransformSpec) -> Self {
        let spec = Arc::new(spec);
        Self::new(
            payloads
                .into_iter()
                .map(|payload| TransformRequest::new(payload, Arc::clone(&spec)))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// A successful output in the compact result list.
#[derive(Clone, Debug)]
pub struct ProcessedItem {
    pub index: usize,
    pub image: TransformedImage,
}

/// Per-input status, indexed by original position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemStatus {
    Succeeded,
    Failed {
        detail: String,
        category: ErrorCategory,
    },
}

impl ItemStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Aggregate result of a batch.
#[derive(Clone, Debug, Default)]
pub struct BulkProcessingResult {
    /// Successful outputs in input order; failed slots are omitted.
    pub ordered_results: Vec<ProcessedItem>,
    /// One entry per input, in input order.
    pub statuses: Vec<ItemStatus>,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_processed: usize,
    pub processing_time_ms: f64,
}

impl BulkProcessingResult {
    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0
    }

    /// Indices of the inputs that failed.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.statuses
            .iter()
            .enumerate()
            .filter(|(_, status)| !status.is_success())
            .map(|(index, _)| index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_detection() {
        assert!(TransformedImage::new(vec![], OutputFormat::Png, 1, 1).is_degenerate());
        assert!(TransformedImage::new(vec![1], OutputFormat::Png, 0, 1).is_degenerate());
        assert!(TransformedImage::new(vec![1], OutputFormat::Png, 1, 0).is_degenerate());
        let ok = TransformedImage::new(vec![1, 2, 3], OutputFormat::Jpeg, 2, 2);
        assert!(!ok.is_degenerate());
        assert_eq!(ok.byte_size, 3);
    }

    #[test]
    fn test_concurrency_clamping() {
        let upper = concurrency_limit_for(usize::MAX, available_parallelism());
        let job = BatchJob::new(vec![]).with_concurrency(0);
        assert_eq!(job.concurrency_limit, 1);
        let job = BatchJob::new(vec![]).with_concurrency(10_000);
        assert_eq!(job.concurrency_limit, upper);
        assert!(BatchJob::new(vec![]).concurrency_limit >= 1);
    }

    #[test]
    fn test_from_payloads_shares_spec() {
        let job = BatchJob::from_payloads(vec![vec![1], vec![2]], TransformSpec::new());
        assert_eq!(job.len(), 2);
        assert!(Arc::ptr_eq(&job.requests[0].spec, &job.requests[1].spec));
        assert_eq!(job.requests[1].payload.as_slice(), &[2]);
    }

    #[test]
    fn test_failure_detail_and_category() {
        let outcome = TransformOutcome::failure(3, BulkMediaError::decode_failed("bad header"));
        assert!(!outcome.is_success());
        match outcome.status {
            OutcomeStatus::Failure(failure) => {
                assert!(failure.detail().contains("bad header"));
                assert_eq!(failure.category(), ErrorCategory::CodecError);
            }
            OutcomeStatus::Success(_) => panic!("expected failure"),
        }
    }
}
