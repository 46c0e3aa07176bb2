// src/engine/codec.rs
//
// The codec capability: turn one encoded payload into one transformed image.
//
// The batch machinery only ever sees `dyn Codec`; `NativeCodec` is the built-in
// implementation on top of the decoder/pipeline/encoder modules.

use crate::batch::TransformedImage;
use crate::engine::decoder::{check_dimensions, decode_image};
use crate::engine::encoder::encode;
use crate::engine::limits::InputLimits;
use crate::engine::memory::{self, estimate_memory, parse_header, WeightedSemaphore};
use crate::engine::pipeline::{apply_resize, check_resize_target, flatten_alpha};
use crate::error::Result;
use crate::ops::{Background, TransformSpec};
use std::sync::Arc;

/// Transforms one payload. Implementations must be safe to call from many
/// threads at once and must not keep state between calls.
pub trait Codec: Send + Sync {
    fn transform(&self, payload: &[u8], spec: &TransformSpec) -> Result<TransformedImage>;
}

/// Native codec stack: mozjpeg, zune-png, libwebp, oxipng, fast_image_resize.
#[derive(Clone, Debug)]
pub struct NativeCodec {
    limits: InputLimits,
    semaphore: Option<Arc<WeightedSemaphore>>,
}

impl Default for NativeCodec {
    fn default() -> Self {
        Self::new(InputLimits::default())
    }
}

impl NativeCodec {
    /// Codec sharing the process-wide memory semaphore.
    pub fn new(limits: InputLimits) -> Self {
        Self {
            limits,
            semaphore: Some(memory::memory_semaphore()),
        }
    }

    /// Use a dedicated semaphore (or none) instead of the global one.
    pub fn with_semaphore(mut self, semaphore: Option<Arc<WeightedSemaphore>>) -> Self {
        self.semaphore = semaphore;
        self
    }

    pub fn limits(&self) -> &InputLimits {
        &self.limits
    }
}

impl Codec for NativeCodec {
    fn transform(&self, payload: &[u8], spec: &TransformSpec) -> Result<TransformedImage> {
        self.limits.enforce_source_len(payload.len())?;

        // Header checks run before anything is allocated for pixels
        let header = parse_header(payload);
        let _permit = match header {
            Some(header) => {
                check_dimensions(header.width, header.height)?;
                self.limits.enforce_pixels(header.width, header.height)?;
                if let Some(resize) = &spec.resize {
                    resize.validate()?;
                    let (w, h) = check_resize_target(header.width, header.height, resize)?;
                    self.limits.enforce_pixels(w, h)?;
                }
                self.semaphore
                    .as_ref()
                    .map(|sem| sem.acquire(estimate_memory(&header, spec)))
            }
            None => None,
        };

        let (img, detected) = decode_image(payload)?;
        self.limits.enforce_pixels(img.width(), img.height())?;

        let img = match &spec.resize {
            Some(resize) => {
                let (w, h) = check_resize_target(img.width(), img.height(), resize)?;
                self.limits.enforce_pixels(w, h)?;
                apply_resize(img, resize)?
            }
            None => img,
        };

        let format = spec.resolve_format(Some(detected));
        let img = if format.supports_alpha() {
            img
        } else {
            let background = spec
                .resize
                .as_ref()
                .map(|resize| resize.background)
                .unwrap_or(Background::WHITE);
            flatten_alpha(img, background)
        };

        let (width, height) = (img.width(), img.height());
        let data = encode(&img, format, spec.quality)?;
        Ok(TransformedImage::new(data, format, width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BulkMediaError;
    use crate::ops::{OutputFormat, ResizeFit, ResizeSpec};
    use image::{DynamicImage, GenericImageView, ImageFormat, RgbaImage};
    use std::io::Cursor;

    fn create_png(width: u32, height: u32, alpha: u8) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, 64, alpha])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn codec() -> NativeCodec {
        NativeCodec::default().with_semaphore(None)
    }

    #[test]
    fn test_keeps_input_format_by_default() {
        let out = codec()
            .transform(&create_png(20, 10, 255), &TransformSpec::new())
            .unwrap();
        assert_eq!(out.format, OutputFormat::Png);
        assert_eq!((out.width, out.height), (20, 10));
        assert_eq!(out.byte_size, out.data.len());
        assert!(!out.is_degenerate());
    }

    #[test]
    fn test_resize_and_convert() {
        let spec = TransformSpec::new()
            .resize(ResizeSpec::new(Some(8), Some(8)).with_fit(ResizeFit::Cover))
            .format(OutputFormat::WebP)
            .quality(70);
        let out = codec().transform(&create_png(40, 20, 255), &spec).unwrap();
        assert_eq!(out.format, OutputFormat::WebP);
        assert_eq!((out.width, out.height), (8, 8));
        let decoded = image::load_from_memory(&out.data).unwrap();
        assert_eq!(decoded.dimensions(), (8, 8));
    }

    #[test]
    fn test_jpeg_output_flattens_transparency() {
        let spec = TransformSpec::new().format(OutputFormat::Jpeg);
        let out = codec().transform(&create_png(4, 4, 0), &spec).unwrap();
        let decoded = image::load_from_memory(&out.data).unwrap().to_rgb8();
        let pixel = decoded.get_pixel(0, 0).0;
        // fully transparent pixels become (near) white
        assert!(pixel.iter().all(|&c| c > 240), "pixel was {pixel:?}");
    }

    #[test]
    fn test_limits_are_enforced() {
        let payload = create_png(50, 50, 255);
        let tiny = NativeCodec::new(InputLimits::unlimited().with_max_bytes(Some(16)))
            .with_semaphore(None);
        assert!(matches!(
            tiny.transform(&payload, &TransformSpec::new()),
            Err(BulkMediaError::InputTooLarge { .. })
        ));

        let few_pixels = NativeCodec::new(InputLimits::unlimited().with_max_pixels(Some(100)))
            .with_semaphore(None);
        assert!(matches!(
            few_pixels.transform(&payload, &TransformSpec::new()),
            Err(BulkMediaError::PixelCountExceedsLimit { .. })
        ));
    }

    #[test]
    fn test_resize_target_is_bounded() {
        let resize = |w, h, fit| TransformSpec::new().resize(ResizeSpec::new(w, h).with_fit(fit));

        // 400M output pixels from a 2x1 source
        let err = codec()
            .transform(&create_png(2, 1, 255), &resize(Some(20_000), Some(20_000), ResizeFit::Fill))
            .unwrap_err();
        assert!(matches!(err, BulkMediaError::PixelCountExceedsLimit { .. }));
        assert_eq!(err.category(), crate::error::ErrorCategory::ResourceLimit);

        // one target dimension, the other follows a 1:100 aspect ratio
        let err = codec()
            .transform(&create_png(1, 100, 255), &resize(Some(30_000), None, ResizeFit::Inside))
            .unwrap_err();
        assert!(matches!(err, BulkMediaError::DimensionExceedsLimit { .. }));

        // small output, but the cover intermediate is 20000 x 20000000
        let err = codec()
            .transform(&create_png(1, 1000, 255), &resize(Some(20_000), Some(1), ResizeFit::Cover))
            .unwrap_err();
        assert!(matches!(err, BulkMediaError::DimensionExceedsLimit { .. }));

        let few_pixels = NativeCodec::new(InputLimits::unlimited().with_max_pixels(Some(100)))
            .with_semaphore(None);
        assert!(matches!(
            few_pixels.transform(&create_png(4, 4, 255), &resize(Some(20), Some(20), ResizeFit::Fill)),
            Err(BulkMediaError::PixelCountExceedsLimit { .. })
        ));
    }

    #[test]
    fn test_garbage_fails_without_panicking() {
        let err = codec()
            .transform(b"\x00\x01garbage", &TransformSpec::new())
            .unwrap_err();
        assert!(matches!(err, BulkMediaError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_permit_released_after_transform() {
        let sem = Arc::new(WeightedSemaphore::new(u64::MAX / 2));
        let codec = NativeCodec::default().with_semaphore(Some(Arc::clone(&sem)));
        codec
            .transform(&create_png(10, 10, 255), &TransformSpec::new())
            .unwrap();
        assert_eq!(sem.available(), sem.capacity());
    }
}
