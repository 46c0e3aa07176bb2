// src/engine/common.rs
//
// Common utilities shared across engine modules.
// Panic containment: codec libraries are foreign code and may panic (or abort
// through a C callback that unwinds); every stage that calls into them runs
// under `run_with_panic_policy` so a panic surfaces as an `InternalPanic` error.

use crate::error::{BulkMediaError, Result};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Run `f`, converting a panic into `BulkMediaError::InternalPanic` tagged with `stage`.
pub fn run_with_panic_policy<T, F>(stage: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(stage, panic = %message, "panic contained");
            Err(BulkMediaError::internal_panic(format!(
                "{stage}: panic: {message}"
            )))
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_passes_through() {
        let value = run_with_panic_policy("decode", || Ok(7)).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_error_passes_through() {
        let err = run_with_panic_policy::<(), _>("decode", || {
            Err(BulkMediaError::corrupted_image())
        })
        .unwrap_err();
        assert!(matches!(err, BulkMediaError::CorruptedImage));
    }

    #[test]
    fn test_panic_becomes_internal_error() {
        let err = run_with_panic_policy::<(), _>("encode", || panic!("codec exploded")).unwrap_err();
        match err {
            BulkMediaError::InternalPanic { message } => {
                assert!(message.contains("encode"));
                assert!(message.contains("codec exploded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_panic_message_formats() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let borrowed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(borrowed.as_ref()), "static");
        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
