use bulk_media::engine::{ChunkedScheduler, Codec, TransformExecutor, WorkerPoolScheduler};
use bulk_media::error::{BulkMediaError, Result};
use bulk_media::{BatchJob, BulkProcessingResult, OutputFormat, TransformSpec, TransformedImage};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// payload = [fails, delay_ms, id]; records peak concurrency.
#[derive(Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Codec for Gauge {
    fn transform(&self, payload: &[u8], _spec: &TransformSpec) -> Result<TransformedImage> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(payload[1] as u64));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if payload[0] == 1 {
            Err(BulkMediaError::decode_failed("malformed"))
        } else {
            Ok(TransformedImage::new(vec![payload[2]], OutputFormat::Png, 1, 1))
        }
    }
}

fn items_strategy() -> impl Strategy<Value = Vec<(bool, u8)>> {
    prop::collection::vec((any::<bool>(), 0u8..4), 0..24)
}

fn job_for(items: &[(bool, u8)], limit: usize) -> BatchJob {
    let payloads = items
        .iter()
        .enumerate()
        .map(|(id, (fails, delay))| vec![*fails as u8, *delay, id as u8])
        .collect();
    let mut job = BatchJob::from_payloads(payloads, TransformSpec::new());
    job.concurrency_limit = limit;
    job
}

fn check_result(items: &[(bool, u8)], result: &BulkProcessingResult) -> std::result::Result<(), TestCaseError> {
    let expected_failures: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, (fails, _))| *fails)
        .map(|(i, _)| i)
        .collect();

    prop_assert_eq!(result.total_processed, items.len());
    prop_assert_eq!(result.success_count + result.failure_count, items.len());
    prop_assert_eq!(result.statuses.len(), items.len());
    prop_assert_eq!(result.failed_indices(), expected_failures.clone());
    prop_assert_eq!(result.failure_count, expected_failures.len());

    // compact list is ascending and each output belongs to its own input
    let indices: Vec<usize> = result.ordered_results.iter().map(|i| i.index).collect();
    prop_assert!(indices.windows(2).all(|w| w[0] < w[1]));
    for item in &result.ordered_results {
        prop_assert_eq!(item.image.data[0] as usize, item.index);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn chunked_scheduler_preserves_order_counts_and_bound(
        items in items_strategy(),
        limit in 1usize..6,
    ) {
        let gauge = Arc::new(Gauge::default());
        let scheduler = ChunkedScheduler::new(TransformExecutor::new(gauge.clone()));
        let result = scheduler.run(&job_for(&items, limit));

        check_result(&items, &result)?;
        prop_assert!(gauge.peak.load(Ordering::SeqCst) <= limit);
    }

    #[test]
    fn worker_pool_preserves_order_counts_and_bound(
        items in items_strategy(),
        pool_size in 1usize..5,
    ) {
        let gauge = Arc::new(Gauge::default());
        let root = tempfile::tempdir().unwrap();
        let scheduler = WorkerPoolScheduler::new(gauge.clone())
            .with_scratch_root(Some(root.path().to_path_buf()))
            .with_pool_size(pool_size);
        let (result, stats) = scheduler.run_with_stats(&job_for(&items, pool_size)).unwrap();

        check_result(&items, &result)?;
        prop_assert!(gauge.peak.load(Ordering::SeqCst) <= pool_size);
        prop_assert_eq!(stats.initial_size, stats.final_size);
        prop_assert_eq!(stats.replaced, 0);
        prop_assert!(std::fs::read_dir(root.path()).unwrap().next().is_none());
    }
}
