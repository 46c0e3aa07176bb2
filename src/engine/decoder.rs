// src/engine/decoder.rs
//
// Decoder operations: JPEG (mozjpeg), PNG (zune-png), WebP (libwebp), everything
// else the `image` crate understands (GIF, BMP, TIFF).

use crate::engine::common::run_with_panic_policy;
use crate::error::BulkMediaError;
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use mozjpeg::Decompress;
use std::io::Cursor;
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_png::PngDecoder;

use crate::engine::{MAX_DIMENSION, MAX_PIXELS};

// Always BulkMediaError so decode failures keep their category
// (CodecError vs ResourceLimit) instead of collapsing into InternalBug.
type DecoderResult<T> = std::result::Result<T, BulkMediaError>;

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo)
pub fn decode_jpeg_mozjpeg(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:mozjpeg", || {
        // libjpeg happily returns grey rows for a truncated stream
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(BulkMediaError::decode_failed(
                "mozjpeg: missing JPEG EOI marker",
            ));
        }

        let decompress = Decompress::new_mem(data).map_err(|e| {
            BulkMediaError::decode_failed(format!("mozjpeg decompress init failed: {e:?}"))
        })?;

        let mut decompress = decompress.rgb().map_err(|e| {
            BulkMediaError::decode_failed(format!("mozjpeg rgb conversion failed: {e:?}"))
        })?;

        let width = u32::try_from(decompress.width())
            .map_err(|_| BulkMediaError::dimension_exceeds_limit(u32::MAX, MAX_DIMENSION))?;
        let height = u32::try_from(decompress.height())
            .map_err(|_| BulkMediaError::dimension_exceeds_limit(u32::MAX, MAX_DIMENSION))?;
        check_dimensions(width, height)?;

        let pixels: Vec<[u8; 3]> = decompress.read_scanlines().map_err(|e| {
            BulkMediaError::decode_failed(format!("mozjpeg: failed to read scanlines: {e:?}"))
        })?;
        let flat_pixels: Vec<u8> = pixels.into_iter().flatten().collect();

        let rgb_image = RgbImage::from_raw(width, height, flat_pixels).ok_or_else(|| {
            BulkMediaError::decode_failed("mozjpeg: failed to create image from raw data")
        })?;

        Ok(DynamicImage::ImageRgb8(rgb_image))
    })
}

/// Decode the remaining formats using the image crate.
pub fn decode_with_image_crate(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        image::load_from_memory(data)
            .map_err(|e| BulkMediaError::decode_failed(format!("decode failed: {e}")))
    })
}

/// Decode PNG using zune-png. 16-bit input is stripped to 8-bit.
pub fn decode_png_zune(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        let options = DecoderOptions::default().png_set_strip_to_8bit(true);
        let mut decoder = PngDecoder::new_with_options(Cursor::new(data), options);
        let pixels = decoder
            .decode()
            .map_err(|e| BulkMediaError::decode_failed(format!("png: decode failed: {e}")))?;

        let info = decoder
            .info()
            .ok_or_else(|| BulkMediaError::decode_failed("png: missing header info"))?;

        let width = info.width as u32;
        let height = info.height as u32;
        check_dimensions(width, height)?;

        let buf = match pixels {
            zune_core::result::DecodingResult::U8(v) => v,
            _ => {
                return Err(BulkMediaError::decode_failed(
                    "png: unexpected non-U8 pixel buffer",
                ))
            }
        };

        let colorspace = decoder
            .colorspace()
            .ok_or_else(|| BulkMediaError::decode_failed("png: missing colorspace"))?;

        let img = match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| BulkMediaError::decode_failed("png: failed to build RGB image"))?,
            ColorSpace::RGBA => RgbaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(|| BulkMediaError::decode_failed("png: failed to build RGBA image"))?,
            ColorSpace::Luma => GrayImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| BulkMediaError::decode_failed("png: failed to build Luma image"))?,
            ColorSpace::LumaA => GrayAlphaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLumaA8)
                .ok_or_else(|| {
                    BulkMediaError::decode_failed("png: failed to build LumaA image")
                })?,
            other => {
                return Err(BulkMediaError::decode_failed(format!(
                    "png: unsupported colorspace {other:?}"
                )))
            }
        };

        Ok(img)
    })
}

/// Decode WebP using libwebp. Animated WebP goes through the image crate (first frame).
pub fn decode_webp_libwebp(data: &[u8]) -> DecoderResult<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        // Header first, so a malformed file never sizes a buffer
        let features = BitstreamFeatures::new(data).ok_or_else(|| {
            BulkMediaError::decode_failed("webp: failed to read bitstream features")
        })?;

        if features.has_animation() {
            return image::load_from_memory(data).map_err(|e| {
                BulkMediaError::decode_failed(format!("webp (animated) decode failed: {e}"))
            });
        }

        check_dimensions(features.width(), features.height())?;

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| BulkMediaError::decode_failed("webp: decode failed"))?;
        check_dimensions(decoded.width(), decoded.height())?;

        Ok(decoded.to_image())
    })
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// Unified decode entrypoint:
/// - Detect format once (magic bytes)
/// - Route to the fastest decoder for it
/// - Return decoded image and detected format
pub fn decode_image(bytes: &[u8]) -> DecoderResult<(DynamicImage, ImageFormat)> {
    if bytes.is_empty() {
        return Err(BulkMediaError::decode_failed("empty input"));
    }
    let detected = detect_format(bytes)
        .ok_or_else(|| BulkMediaError::unsupported_format("unrecognized image data"))?;
    let img = match detected {
        ImageFormat::Jpeg => decode_jpeg_mozjpeg(bytes)?,
        ImageFormat::Png => decode_png_zune(bytes)?,
        ImageFormat::WebP => decode_webp_libwebp(bytes)?,
        ImageFormat::Gif | ImageFormat::Bmp | ImageFormat::Tiff => {
            decode_with_image_crate(bytes)?
        }
        other => {
            return Err(BulkMediaError::unsupported_format(format!(
                "{other:?}"
            )))
        }
    };
    Ok((img, detected))
}

/// Check if image dimensions are within safe limits.
/// Returns an error if the image is too large (potential decompression bomb).
pub fn check_dimensions(width: u32, height: u32) -> DecoderResult<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(BulkMediaError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(BulkMediaError::pixel_count_exceeds_limit(pixels, MAX_PIXELS));
    }
    Ok(())
}

/// Read dimensions from the header without decoding pixels.
pub fn read_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Inspect encoded bytes and ensure the image dimensions are safe before decoding.
pub fn ensure_dimensions_safe(bytes: &[u8]) -> DecoderResult<()> {
    match read_dimensions(bytes) {
        Some((width, height)) => check_dimensions(width, height),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb};

    fn encode_webp(width: u32, height: u32) -> Vec<u8> {
        let rgb: Vec<u8> = std::iter::repeat([10u8, 20u8, 30u8])
            .take((width * height) as usize)
            .flatten()
            .collect();
        let encoder = webp::Encoder::from_rgb(&rgb, width, height);
        encoder.encode_lossless().to_vec()
    }

    fn encode_with(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 0]));
        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buffer), format)
            .unwrap();
        buffer
    }

    #[test]
    fn test_ensure_dimensions_safe_allows_small_image() {
        let data = encode_with(64, 64, ImageFormat::Png);
        assert!(ensure_dimensions_safe(&data).is_ok());
    }

    #[test]
    fn test_ensure_dimensions_safe_rejects_large_image() {
        let width = MAX_DIMENSION + 1;
        let data = encode_with(width, 1, ImageFormat::Png);
        let err = ensure_dimensions_safe(&data).unwrap_err();
        assert!(matches!(err, BulkMediaError::DimensionExceedsLimit { .. }));
    }

    #[test]
    fn test_check_dimensions_pixel_cap() {
        assert!(check_dimensions(10_000, 10_000).is_ok());
        assert!(matches!(
            check_dimensions(20_000, 20_000),
            Err(BulkMediaError::PixelCountExceedsLimit { .. })
        ));
    }

    #[test]
    fn test_decode_image_routes_by_format() {
        let png = encode_with(3, 1, ImageFormat::Png);
        let (img, fmt) = decode_image(&png).unwrap();
        assert_eq!(fmt, ImageFormat::Png);
        assert_eq!(img.dimensions(), (3, 1));
        assert_eq!(img.to_rgb8().get_pixel(2, 0).0, [2, 0, 0]);

        let jpeg = encode_with(2, 2, ImageFormat::Jpeg);
        let (img, fmt) = decode_image(&jpeg).unwrap();
        assert_eq!(fmt, ImageFormat::Jpeg);
        assert_eq!(img.dimensions(), (2, 2));

        let gif = encode_with(4, 3, ImageFormat::Gif);
        let (img, fmt) = decode_image(&gif).unwrap();
        assert_eq!(fmt, ImageFormat::Gif);
        assert_eq!(img.dimensions(), (4, 3));
    }

    #[test]
    fn test_decode_image_routes_webp_to_libwebp() {
        let webp = encode_webp(3, 2);
        let (img, fmt) = decode_image(&webp).unwrap();
        assert_eq!(fmt, ImageFormat::WebP);
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.to_rgb8().get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn test_garbage_is_unsupported() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, BulkMediaError::UnsupportedFormat { .. }));
        assert!(matches!(
            decode_image(&[]),
            Err(BulkMediaError::DecodeFailed { .. })
        ));
    }

    #[test]
    fn test_truncated_jpeg_fails_cleanly() {
        let jpeg = encode_with(16, 16, ImageFormat::Jpeg);
        let truncated = &jpeg[..jpeg.len() / 2];
        let err = decode_image(truncated).unwrap_err();
        assert!(matches!(err, BulkMediaError::DecodeFailed { .. }));
    }
}
