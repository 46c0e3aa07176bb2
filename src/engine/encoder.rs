// src/engine/encoder.rs
//
// Encoder operations: JPEG (mozjpeg), PNG (image + oxipng), WebP (libwebp), GIF (image)

use crate::engine::common::run_with_panic_policy;
use crate::error::BulkMediaError;
use crate::ops::OutputFormat;
use image::{DynamicImage, ImageFormat};
use mozjpeg::{ColorSpace, Compress, ScanMode};
use std::borrow::Cow;
use std::io::Cursor;

use crate::engine::MAX_DIMENSION;

type EncoderResult<T> = std::result::Result<T, BulkMediaError>;

/// Single source of truth for deriving per-format encoder settings from a 0-100
/// quality value. Bands:
/// - High (>=85): visual quality first
/// - Balanced (70-84)
/// - Fast (50-69)
/// - Fastest (<50)
#[derive(Debug, Clone, Copy)]
pub struct QualitySettings {
    quality: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QualityBand {
    High,
    Balanced,
    Fast,
    Fastest,
}

impl QualitySettings {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.min(100) as f32,
        }
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    fn band(&self) -> QualityBand {
        if self.quality >= 85.0 {
            QualityBand::High
        } else if self.quality >= 70.0 {
            QualityBand::Balanced
        } else if self.quality >= 50.0 {
            QualityBand::Fast
        } else {
            QualityBand::Fastest
        }
    }

    /// mozjpeg smoothing: more smoothing at low quality hides blocking.
    pub fn jpeg_smoothing(&self) -> u8 {
        if self.quality >= 90.0 {
            0
        } else if self.quality >= 70.0 {
            5
        } else if self.quality >= 60.0 {
            10
        } else {
            18
        }
    }

    // method 4, single pass, no preprocessing: balanced speed/size for bulk work
    pub fn webp_method(&self) -> i32 {
        4
    }

    pub fn webp_pass(&self) -> i32 {
        1
    }

    pub fn webp_preprocessing(&self) -> i32 {
        0
    }

    pub fn webp_sns_strength(&self) -> i32 {
        match self.band() {
            QualityBand::High => 50,
            QualityBand::Balanced => 70,
            QualityBand::Fast | QualityBand::Fastest => 80,
        }
    }

    pub fn webp_filter_strength(&self) -> i32 {
        if self.quality >= 80.0 {
            20
        } else if self.quality >= 60.0 {
            30
        } else {
            40
        }
    }

    pub fn webp_filter_sharpness(&self) -> i32 {
        match self.band() {
            QualityBand::High => 2,
            QualityBand::Balanced | QualityBand::Fast | QualityBand::Fastest => 0,
        }
    }
}

/// Encode `img` into `format`. Quality is ignored by PNG and GIF.
pub fn encode(img: &DynamicImage, format: OutputFormat, quality: u8) -> EncoderResult<Vec<u8>> {
    match format {
        OutputFormat::Jpeg => encode_jpeg(img, quality),
        OutputFormat::Png => encode_png(img),
        OutputFormat::WebP => encode_webp(img, quality),
        OutputFormat::Gif => encode_gif(img),
    }
}

/// Encode to JPEG using mozjpeg: progressive, optimized Huffman tables and scans.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let settings = QualitySettings::new(quality);

        // Avoid a copy if already RGB8
        let rgb: Cow<'_, image::RgbImage> = match img {
            DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
            _ => Cow::Owned(img.to_rgb8()),
        };
        let (w, h) = rgb.dimensions();
        let pixels: &[u8] = rgb.as_raw();

        // mozjpeg aborts on these; reject them up front
        if w == 0 || h == 0 {
            return Err(BulkMediaError::encode_failed(
                "jpeg",
                "image width or height is zero",
            ));
        }
        if w > MAX_DIMENSION || h > MAX_DIMENSION {
            return Err(BulkMediaError::dimension_exceeds_limit(
                w.max(h),
                MAX_DIMENSION,
            ));
        }
        let expected_len = (w as usize) * (h as usize) * 3;
        if pixels.len() != expected_len {
            return Err(BulkMediaError::corrupted_image());
        }

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(settings.quality());
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);
        comp.set_optimize_scans(true);
        comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
        comp.set_smoothing_factor(settings.jpeg_smoothing());

        let estimated_size = (w as usize * h as usize * 3 / 10).max(4096);
        let mut output = Vec::with_capacity(estimated_size);

        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                BulkMediaError::encode_failed(
                    "jpeg",
                    format!("mozjpeg: failed to start compress: {e:?}"),
                )
            })?;

            let stride = w as usize * 3;
            for row in pixels.chunks(stride) {
                writer.write_scanlines(row).map_err(|e| {
                    BulkMediaError::encode_failed(
                        "jpeg",
                        format!("mozjpeg: failed to write scanlines: {e:?}"),
                    )
                })?;
            }

            writer.finish().map_err(|e| {
                BulkMediaError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;
        }

        Ok(output)
    })
}

/// Encode to PNG using the image crate, then losslessly recompress with oxipng.
pub fn encode_png(img: &DynamicImage) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| BulkMediaError::encode_failed("png", format!("PNG encode failed: {e}")))?;

        let mut options = oxipng::Options::from_preset(4);
        options.strip = oxipng::StripChunks::Safe;

        oxipng::optimize_from_memory(&buf, &options).map_err(|e| {
            BulkMediaError::encode_failed("png", format!("oxipng optimization failed: {e}"))
        })
    })
}

/// Encode to lossy WebP. Alpha is kept only when the image actually has it.
pub fn encode_webp(img: &DynamicImage, quality: u8) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:webp", || {
        let settings = QualitySettings::new(quality);

        let mut config = webp::WebPConfig::new()
            .map_err(|_| BulkMediaError::encode_failed("webp", "failed to create WebPConfig"))?;
        config.quality = settings.quality();
        config.method = settings.webp_method();
        config.pass = settings.webp_pass();
        config.preprocessing = settings.webp_preprocessing();
        config.sns_strength = settings.webp_sns_strength();
        config.autofilter = 1;
        config.filter_strength = settings.webp_filter_strength();
        config.filter_sharpness = settings.webp_filter_sharpness();

        let mem = if img.color().has_alpha() {
            let rgba: Cow<'_, image::RgbaImage> = match img {
                DynamicImage::ImageRgba8(rgba_img) => Cow::Borrowed(rgba_img),
                _ => Cow::Owned(img.to_rgba8()),
            };
            let (w, h) = rgba.dimensions();
            webp::Encoder::from_rgba(&rgba, w, h).encode_advanced(&config)
        } else {
            let rgb: Cow<'_, image::RgbImage> = match img {
                DynamicImage::ImageRgb8(rgb_img) => Cow::Borrowed(rgb_img),
                _ => Cow::Owned(img.to_rgb8()),
            };
            let (w, h) = rgb.dimensions();
            webp::Encoder::from_rgb(&rgb, w, h).encode_advanced(&config)
        }
        .map_err(|e| BulkMediaError::encode_failed("webp", format!("WebP encode failed: {e:?}")))?;

        Ok(mem.to_vec())
    })
}

/// Encode a single-frame GIF (palette quantization done by the image crate).
pub fn encode_gif(img: &DynamicImage) -> EncoderResult<Vec<u8>> {
    run_with_panic_policy("encode:gif", || {
        let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
        let mut buf = Vec::new();
        rgba.write_to(&mut Cursor::new(&mut buf), ImageFormat::Gif)
            .map_err(|e| BulkMediaError::encode_failed("gif", format!("GIF encode failed: {e}")))?;
        Ok(buf)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage, RgbaImage};

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn create_test_image_rgba(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, (x % 2) as u8 * 255])
        }))
    }

    #[test]
    fn test_encode_jpeg_produces_valid_jpeg() {
        let img = create_test_image(100, 100);
        let result = encode_jpeg(&img, 80).unwrap();
        assert_eq!(&result[0..2], &[0xFF, 0xD8]);
        assert_eq!(&result[result.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_encode_jpeg_quality_affects_size() {
        let img = create_test_image(200, 200);
        let high = encode_jpeg(&img, 95).unwrap();
        let low = encode_jpeg(&img, 20).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_encode_png_produces_valid_png() {
        let img = create_test_image(64, 64);
        let result = encode_png(&img).unwrap();
        assert_eq!(&result[0..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        let decoded = image::load_from_memory(&result).unwrap();
        assert_eq!(decoded.dimensions(), (64, 64));
    }

    #[test]
    fn test_encode_webp_produces_valid_webp() {
        let img = create_test_image(50, 40);
        let result = encode_webp(&img, 80).unwrap();
        assert_eq!(&result[0..4], b"RIFF");
        assert_eq!(&result[8..12], b"WEBP");
    }

    #[test]
    fn test_encode_webp_keeps_alpha() {
        let img = create_test_image_rgba(16, 16);
        let result = encode_webp(&img, 80).unwrap();
        let decoded = image::load_from_memory(&result).unwrap();
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn test_encode_gif_produces_valid_gif() {
        let img = create_test_image(20, 10);
        let result = encode_gif(&img).unwrap();
        assert_eq!(&result[0..3], b"GIF");
        let decoded = image::load_from_memory(&result).unwrap();
        assert_eq!(decoded.dimensions(), (20, 10));
    }

    #[test]
    fn test_encode_dispatch_matches_format() {
        let img = create_test_image(8, 8);
        for format in [
            OutputFormat::Jpeg,
            OutputFormat::Png,
            OutputFormat::WebP,
            OutputFormat::Gif,
        ] {
            let bytes = encode(&img, format, 75).unwrap();
            let detected = image::guess_format(&bytes).unwrap();
            assert_eq!(OutputFormat::from_image_format(detected), Some(format));
        }
    }

    #[test]
    fn test_encode_jpeg_rejects_empty_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(matches!(
            encode_jpeg(&img, 80),
            Err(BulkMediaError::EncodeFailed { .. })
        ));
    }

    #[test]
    fn test_quality_band_mapping_boundaries() {
        assert_eq!(QualitySettings::new(100).band(), QualityBand::High);
        assert_eq!(QualitySettings::new(85).band(), QualityBand::High);
        assert_eq!(QualitySettings::new(84).band(), QualityBand::Balanced);
        assert_eq!(QualitySettings::new(70).band(), QualityBand::Balanced);
        assert_eq!(QualitySettings::new(69).band(), QualityBand::Fast);
        assert_eq!(QualitySettings::new(50).band(), QualityBand::Fast);
        assert_eq!(QualitySettings::new(49).band(), QualityBand::Fastest);
        assert_eq!(QualitySettings::new(200).quality(), 100.0);
    }

    #[test]
    fn test_quality_settings_mapping_is_stable() {
        let high = QualitySettings::new(90);
        assert_eq!(high.webp_sns_strength(), 50);
        assert_eq!(high.webp_filter_strength(), 20);
        assert_eq!(high.webp_filter_sharpness(), 2);
        assert_eq!(high.jpeg_smoothing(), 0);

        let low = QualitySettings::new(40);
        assert_eq!(low.webp_sns_strength(), 80);
        assert_eq!(low.webp_filter_strength(), 40);
        assert_eq!(low.webp_filter_sharpness(), 0);
        assert_eq!(low.jpeg_smoothing(), 18);
    }
}
