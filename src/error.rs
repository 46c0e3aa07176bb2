// src/error.rs
//
// Unified error handling for bulk-media
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - UserError: Invalid input, recoverable
// - CodecError: Format/encoding issues
// - ResourceLimit: Memory/time/dimension limits
// - InternalBug: Library bugs (should not happen)
//
// Orthogonal to the category, an error is either item-level (it becomes a
// Failure outcome for one input) or batch-level (it affects the whole batch and
// triggers the in-process fallback). See `is_batch_level()`.

use std::borrow::Cow;
use thiserror::Error;

/// Error taxonomy shared by item failures and batch errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCategory {
    /// Invalid input, recoverable by user
    UserError,
    /// Format/encoding issues
    CodecError,
    /// Memory/time/dimension limits
    ResourceLimit,
    /// Library bugs (should not happen)
    InternalBug,
}

/// bulk-media error types
#[derive(Debug, Error)]
pub enum BulkMediaError {
    // File I/O Errors
    #[error("Failed to read file '{path}': {source}")]
    FileReadFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to memory-map file '{path}': {source}")]
    MmapFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWriteFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    // Decode Errors
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Corrupted image data")]
    CorruptedImage,

    // Size Limit Errors
    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    #[error("Input size {bytes} bytes exceeds limit of {max} bytes")]
    InputTooLarge { bytes: u64, max: u64 },

    // Operation Errors
    #[error("Invalid resize dimensions: width={width:?}, height={height:?}")]
    InvalidResizeDimensions {
        width: Option<u32>,
        height: Option<u32>,
    },

    #[error("Invalid resize fit: '{value}'. Expected inside, cover, contain, or fill")]
    InvalidResizeFit { value: Cow<'static, str> },

    #[error("Resize failed ({source_width}x{source_height} -> {target_width}x{target_height}): {message}")]
    ResizeFailed {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        message: Cow<'static, str>,
    },

    // Encode Errors
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    // Configuration Errors
    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    #[error("Batch of {count} items exceeds the maximum of {max} items per batch")]
    TooManyItems { count: usize, max: usize },

    // Execution Errors
    #[error("Transform timed out after {timeout_ms}ms")]
    TransformTimedOut { timeout_ms: u64 },

    #[error("Worker {slot} crashed while processing the item: {message}")]
    WorkerCrashed {
        slot: usize,
        message: Cow<'static, str>,
    },

    #[error("Worker pool unavailable: {reason}")]
    WorkerPoolUnavailable { reason: Cow<'static, str> },

    #[error("Scratch storage unavailable at '{path}': {source}")]
    ScratchUnavailable {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

fn clone_io(source: &std::io::Error) -> std::io::Error {
    std::io::Error::new(source.kind(), source.to_string())
}

impl Clone for BulkMediaError {
    fn clone(&self) -> Self {
        match self {
            Self::FileReadFailed { path, source } => Self::FileReadFailed {
                path: path.clone(),
                source: clone_io(source),
            },
            Self::MmapFailed { path, source } => Self::MmapFailed {
                path: path.clone(),
                source: clone_io(source),
            },
            Self::FileWriteFailed { path, source } => Self::FileWriteFailed {
                path: path.clone(),
                source: clone_io(source),
            },
            Self::UnsupportedFormat { format } => Self::UnsupportedFormat {
                format: format.clone(),
            },
            Self::DecodeFailed { message } => Self::DecodeFailed {
                message: message.clone(),
            },
            Self::CorruptedImage => Self::CorruptedImage,
            Self::DimensionExceedsLimit { dimension, max } => Self::DimensionExceedsLimit {
                dimension: *dimension,
                max: *max,
            },
            Self::PixelCountExceedsLimit { pixels, max } => Self::PixelCountExceedsLimit {
                pixels: *pixels,
                max: *max,
            },
            Self::InputTooLarge { bytes, max } => Self::InputTooLarge {
                bytes: *bytes,
                max: *max,
            },
            Self::InvalidResizeDimensions { width, height } => Self::InvalidResizeDimensions {
                width: *width,
                height: *height,
            },
            Self::InvalidResizeFit { value } => Self::InvalidResizeFit {
                value: value.clone(),
            },
            Self::ResizeFailed {
                source_width,
                source_height,
                target_width,
                target_height,
                message,
            } => Self::ResizeFailed {
                source_width: *source_width,
                source_height: *source_height,
                target_width: *target_width,
                target_height: *target_height,
                message: message.clone(),
            },
            Self::EncodeFailed { format, message } => Self::EncodeFailed {
                format: format.clone(),
                message: message.clone(),
            },
            Self::InvalidArgument {
                name,
                value,
                reason,
            } => Self::InvalidArgument {
                name: name.clone(),
                value: value.clone(),
                reason: reason.clone(),
            },
            Self::TooManyItems { count, max } => Self::TooManyItems {
                count: *count,
                max: *max,
            },
            Self::TransformTimedOut { timeout_ms } => Self::TransformTimedOut {
                timeout_ms: *timeout_ms,
            },
            Self::WorkerCrashed { slot, message } => Self::WorkerCrashed {
                slot: *slot,
                message: message.clone(),
            },
            Self::WorkerPoolUnavailable { reason } => Self::WorkerPoolUnavailable {
                reason: reason.clone(),
            },
            Self::ScratchUnavailable { path, source } => Self::ScratchUnavailable {
                path: path.clone(),
                source: clone_io(source),
            },
            Self::InternalPanic { message } => Self::InternalPanic {
                message: message.clone(),
            },
        }
    }
}

// Constructor Helpers
impl BulkMediaError {
    pub fn file_read_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            source,
        }
    }

    pub fn mmap_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::MmapFailed {
            path: path.into(),
            source,
        }
    }

    pub fn file_write_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileWriteFailed {
            path: path.into(),
            source,
        }
    }

    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn corrupted_image() -> Self {
        Self::CorruptedImage
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn input_too_large(bytes: u64, max: u64) -> Self {
        Self::InputTooLarge { bytes, max }
    }

    pub fn invalid_resize_dimensions(width: Option<u32>, height: Option<u32>) -> Self {
        Self::InvalidResizeDimensions { width, height }
    }

    pub fn invalid_resize_fit(value: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidResizeFit {
            value: value.into(),
        }
    }

    pub fn resize_failed(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ResizeFailed {
            source_width: source_dims.0,
            source_height: source_dims.1,
            target_width: target_dims.0,
            target_height: target_dims.1,
            message: message.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn too_many_items(count: usize, max: usize) -> Self {
        Self::TooManyItems { count, max }
    }

    pub fn transform_timed_out(timeout_ms: u64) -> Self {
        Self::TransformTimedOut { timeout_ms }
    }

    pub fn worker_crashed(slot: usize, message: impl Into<Cow<'static, str>>) -> Self {
        Self::WorkerCrashed {
            slot,
            message: message.into(),
        }
    }

    pub fn worker_pool_unavailable(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::WorkerPoolUnavailable {
            reason: reason.into(),
        }
    }

    pub fn scratch_unavailable(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::ScratchUnavailable {
            path: path.into(),
            source,
        }
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (user can fix it)
    ///
    /// Consistent with category():
    /// - UserError errors are always recoverable
    /// - ResourceLimit errors are recoverable (user can free resources, resize image, etc.)
    /// - CodecError and InternalBug errors are not recoverable
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::UserError | ErrorCategory::ResourceLimit => true,
            ErrorCategory::CodecError | ErrorCategory::InternalBug => false,
        }
    }

    /// Errors that concern the execution environment of a whole batch rather than
    /// one input. The processor answers these by rerunning the batch in-process.
    pub fn is_batch_level(&self) -> bool {
        matches!(
            self,
            Self::ScratchUnavailable { .. } | Self::WorkerPoolUnavailable { .. }
        )
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            // UserError: Invalid input, recoverable
            Self::InvalidResizeDimensions { .. }
            | Self::InvalidResizeFit { .. }
            | Self::InvalidArgument { .. }
            | Self::TooManyItems { .. } => ErrorCategory::UserError,

            // CodecError: Format/encoding issues
            Self::UnsupportedFormat { .. }
            | Self::DecodeFailed { .. }
            | Self::CorruptedImage
            | Self::EncodeFailed { .. }
            // ResizeFailed is a processing failure during transformation, which is
            // closer to encode/decode issues than to user input problems.
            | Self::ResizeFailed { .. } => ErrorCategory::CodecError,

            // ResourceLimit: Memory/time/dimension limits
            // File and scratch I/O failures usually mean disk or memory pressure.
            Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::InputTooLarge { .. }
            | Self::TransformTimedOut { .. }
            | Self::FileReadFailed { .. }
            | Self::MmapFailed { .. }
            | Self::FileWriteFailed { .. }
            | Self::ScratchUnavailable { .. } => ErrorCategory::ResourceLimit,

            // InternalBug: Library bugs (should not happen)
            Self::InternalPanic { .. }
            | Self::WorkerCrashed { .. }
            | Self::WorkerPoolUnavailable { .. } => ErrorCategory::InternalBug,
        }
    }
}

impl ErrorCategory {
    /// Get string representation of error category
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "UserError",
            ErrorCategory::CodecError => "CodecError",
            ErrorCategory::ResourceLimit => "ResourceLimit",
            ErrorCategory::InternalBug => "InternalBug",
        }
    }

    /// Get the BULK_MEDIA_* error code string for this category
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "BULK_MEDIA_USER_ERROR",
            ErrorCategory::CodecError => "BULK_MEDIA_CODEC_ERROR",
            ErrorCategory::ResourceLimit => "BULK_MEDIA_RESOURCE_LIMIT",
            ErrorCategory::InternalBug => "BULK_MEDIA_INTERNAL_BUG",
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, BulkMediaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BulkMediaError::file_read_failed(
            "/tmp/scratch/item-3",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(err.to_string().contains("/tmp/scratch/item-3"));
        assert!(BulkMediaError::transform_timed_out(250)
            .to_string()
            .contains("250ms"));
    }

    #[test]
    fn test_error_recoverable() {
        assert!(BulkMediaError::invalid_resize_dimensions(None, None).is_recoverable());
        assert!(BulkMediaError::too_many_items(51, 50).is_recoverable());
        assert!(BulkMediaError::transform_timed_out(10).is_recoverable());
        assert!(!BulkMediaError::decode_failed("test").is_recoverable());
        assert!(!BulkMediaError::worker_crashed(0, "boom").is_recoverable());
    }

    #[test]
    fn test_batch_level_errors() {
        assert!(BulkMediaError::worker_pool_unavailable("no threads").is_batch_level());
        assert!(BulkMediaError::scratch_unavailable(
            "/nonexistent",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied)
        )
        .is_batch_level());
        assert!(!BulkMediaError::decode_failed("bad").is_batch_level());
        assert!(!BulkMediaError::worker_crashed(1, "boom").is_batch_level());
        assert!(!BulkMediaError::transform_timed_out(5).is_batch_level());
    }

    #[test]
    fn test_clone_preserves_io_kind() {
        let err = BulkMediaError::file_write_failed(
            "out.png",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        match err.clone() {
            BulkMediaError::FileWriteFailed { path, source } => {
                assert_eq!(path, "out.png");
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected clone result: {other:?}"),
        }
    }

    #[test]
    fn test_error_category_user_error() {
        assert_eq!(
            BulkMediaError::invalid_resize_dimensions(Some(0), None).category(),
            ErrorCategory::UserError
        );
        assert_eq!(
            BulkMediaError::invalid_resize_fit("squash").category(),
            ErrorCategory::UserError
        );
        assert_eq!(
            BulkMediaError::invalid_argument("quality", "101", "must be 0-100").category(),
            ErrorCategory::UserError
        );
        assert_eq!(
            BulkMediaError::too_many_items(51, 50).category(),
            ErrorCategory::UserError
        );
    }

    #[test]
    fn test_error_category_codec_error() {
        assert_eq!(
            BulkMediaError::unsupported_format("tga").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            BulkMediaError::decode_failed("test").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            BulkMediaError::corrupted_image().category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            BulkMediaError::encode_failed("jpeg", "test").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            BulkMediaError::resize_failed((100, 100), (50, 50), "test").category(),
            ErrorCategory::CodecError
        );
    }

    #[test]
    fn test_error_category_resource_limit() {
        assert_eq!(
            BulkMediaError::dimension_exceeds_limit(40000, 32768).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            BulkMediaError::pixel_count_exceeds_limit(1_000_000_000, 100_000_000).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            BulkMediaError::input_too_large(60 << 20, 50 << 20).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            BulkMediaError::transform_timed_out(100).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            BulkMediaError::mmap_failed(
                "item-0",
                std::io::Error::from(std::io::ErrorKind::NotFound)
            )
            .category(),
            ErrorCategory::ResourceLimit
        );
    }

    #[test]
    fn test_error_category_internal_bug() {
        assert_eq!(
            BulkMediaError::internal_panic("test").category(),
            ErrorCategory::InternalBug
        );
        assert_eq!(
            BulkMediaError::worker_crashed(2, "test").category(),
            ErrorCategory::InternalBug
        );
    }

    #[test]
    fn test_error_category_as_str_and_code() {
        assert_eq!(ErrorCategory::UserError.as_str(), "UserError");
        assert_eq!(ErrorCategory::CodecError.as_str(), "CodecError");
        assert_eq!(ErrorCategory::ResourceLimit.as_str(), "ResourceLimit");
        assert_eq!(ErrorCategory::InternalBug.as_str(), "InternalBug");
        assert_eq!(ErrorCategory::ResourceLimit.code(), "BULK_MEDIA_RESOURCE_LIMIT");
    }
}
