// lib.rs
//
// bulk-media: bounded, ordered, failure-isolated batch image processing
//
// Design goals:
// - One bad input never fails the batch
// - Never more than `concurrency_limit` transforms in flight
// - Output order always equals input order
// - Worker pool when threads are available, in-process chunks otherwise

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod ops;

pub use batch::{
    BatchJob, BulkProcessingResult, ItemStatus, ProcessedItem, TransformOutcome,
    TransformRequest, TransformedImage,
};
pub use config::{BatchConfig, Strategy};
pub use engine::{BulkProcessor, Codec, NativeCodec};
pub use error::{BulkMediaError, ErrorCategory, Result};
pub use ops::{Background, OutputFormat, Position, ResizeFit, ResizeSpec, TransformSpec};

/// Crate version, as reported in logs and by callers that surface it.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Output formats the native codec can write.
pub fn supported_output_formats() -> Vec<&'static str> {
    [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::WebP,
        OutputFormat::Gif,
    ]
    .iter()
    .map(OutputFormat::as_str)
    .collect()
}
