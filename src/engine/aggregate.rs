// src/engine/aggregate.rs
//
// Fold per-item outcomes into the batch result. Runs single-threaded after all
// executions have joined, so counts need no synchronization.

use crate::batch::{
    BulkProcessingResult, ItemStatus, OutcomeStatus, ProcessedItem, TransformOutcome,
};
use std::time::Instant;

/// Build the aggregate result from the outcomes of one batch.
///
/// Outcomes are sorted by index first, so callers may pass them in completion order.
pub fn aggregate(mut outcomes: Vec<TransformOutcome>, started: Instant) -> BulkProcessingResult {
    outcomes.sort_by_key(|outcome| outcome.index);

    let mut result = BulkProcessingResult {
        ordered_results: Vec::with_capacity(outcomes.len()),
        statuses: Vec::with_capacity(outcomes.len()),
        ..BulkProcessingResult::default()
    };

    for outcome in outcomes {
        match outcome.status {
            OutcomeStatus::Success(image) => {
                result.success_count += 1;
                result.statuses.push(ItemStatus::Succeeded);
                result.ordered_results.push(ProcessedItem {
                    index: outcome.index,
                    image,
                });
            }
            OutcomeStatus::Failure(failure) => {
                result.failure_count += 1;
                result.statuses.push(ItemStatus::Failed {
                    detail: failure.detail(),
                    category: failure.category(),
                });
            }
        }
    }

    result.total_processed = result.success_count + result.failure_count;
    result.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
    result
}
