// src/engine/pipeline.rs
//
// Pixel operations between decode and encode: resize (inside/cover/contain/fill),
// crop at a gravity, letterboxing, alpha flattening.

use crate::engine::decoder::check_dimensions;
use crate::error::BulkMediaError;
use crate::ops::{Background, Position, ResizeFit, ResizeSpec};
use fast_image_resize::{self as fir, ImageBufferError, MulDiv, PixelType, ResizeOptions};
use image::{imageops::FilterType, DynamicImage, Rgba, RgbImage, RgbaImage};

// Always BulkMediaError so pipeline errors keep their category
type PipelineResult<T> = std::result::Result<T, BulkMediaError>;

#[derive(Debug)]
pub struct ResizeError {
    pub source_dims: (u32, u32),
    pub target_dims: (u32, u32),
    pub reason: String,
}

impl ResizeError {
    pub fn new(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_dims,
            target_dims,
            reason: reason.into(),
        }
    }

    pub fn into_bulk_media_error(self) -> BulkMediaError {
        BulkMediaError::resize_failed(self.source_dims, self.target_dims, self.reason)
    }
}

/// Calculate resize dimensions maintaining aspect ratio (fit = inside semantics)
pub fn calc_resize_dimensions(
    orig_w: u32,
    orig_h: u32,
    target_w: Option<u32>,
    target_h: Option<u32>,
) -> (u32, u32) {
    if orig_w == 0 || orig_h == 0 {
        return (target_w.unwrap_or(orig_w), target_h.unwrap_or(orig_h));
    }
    let scaled = |value: u32, ratio: f64| ((value as f64 * ratio).round() as u32).max(1);
    match (target_w, target_h) {
        (Some(w), Some(h)) => {
            let orig_ratio = orig_w as f64 / orig_h as f64;
            let target_ratio = w as f64 / h as f64;

            if orig_ratio > target_ratio {
                // wider than the box: width bound
                (w, scaled(orig_h, w as f64 / orig_w as f64))
            } else {
                (scaled(orig_w, h as f64 / orig_h as f64), h)
            }
        }
        (Some(w), None) => (w, scaled(orig_h, w as f64 / orig_w as f64)),
        (None, Some(h)) => (scaled(orig_w, h as f64 / orig_h as f64), h),
        (None, None) => (orig_w, orig_h),
    }
}

/// Dimensions that cover the target box while keeping aspect ratio.
pub fn calc_cover_resize_dimensions(
    orig_w: u32,
    orig_h: u32,
    target_w: u32,
    target_h: u32,
) -> (u32, u32) {
    if orig_w == 0 || orig_h == 0 {
        return (target_w.max(1), target_h.max(1));
    }
    let scale_w = target_w as f64 / orig_w as f64;
    let scale_h = target_h as f64 / orig_h as f64;
    let scale = scale_w.max(scale_h);
    let resize_w = ((orig_w as f64 * scale).ceil() as u32).max(target_w).max(1);
    let resize_h = ((orig_h as f64 * scale).ceil() as u32).max(target_h).max(1);
    (resize_w, resize_h)
}

/// Final output dimensions of `spec` applied to a `orig_w x orig_h` source.
pub fn output_dimensions(orig_w: u32, orig_h: u32, spec: &ResizeSpec) -> (u32, u32) {
    match (spec.fit, spec.width, spec.height) {
        (ResizeFit::Fill, w, h) => (w.unwrap_or(orig_w), h.unwrap_or(orig_h)),
        (ResizeFit::Cover, Some(w), Some(h)) => (w, h),
        (ResizeFit::Contain, Some(w), Some(h)) => {
            if spec.without_enlargement && orig_w <= w && orig_h <= h {
                (orig_w, orig_h)
            } else {
                (w, h)
            }
        }
        // Inside, or Cover/Contain with a single dimension
        (_, w, h) => inside_dimensions(orig_w, orig_h, w, h, spec.without_enlargement),
    }
}

/// Reject a resize whose output, or the intermediate a cover crop is taken
/// from, would be larger than any image we are willing to decode.
/// Returns the output dimensions.
pub fn check_resize_target(
    orig_w: u32,
    orig_h: u32,
    spec: &ResizeSpec,
) -> PipelineResult<(u32, u32)> {
    let (out_w, out_h) = output_dimensions(orig_w, orig_h, spec);
    check_dimensions(out_w, out_h)?;
    if let (ResizeFit::Cover, Some(w), Some(h)) = (spec.fit, spec.width, spec.height) {
        let (resize_w, resize_h) = calc_cover_resize_dimensions(orig_w, orig_h, w, h);
        check_dimensions(resize_w, resize_h)?;
    }
    Ok((out_w, out_h))
}

fn inside_dimensions(
    orig_w: u32,
    orig_h: u32,
    target_w: Option<u32>,
    target_h: Option<u32>,
    without_enlargement: bool,
) -> (u32, u32) {
    let (w, h) = calc_resize_dimensions(orig_w, orig_h, target_w, target_h);
    if without_enlargement && (w > orig_w || h > orig_h) {
        (orig_w, orig_h)
    } else {
        (w, h)
    }
}

/// Apply a resize spec to a decoded image.
pub fn apply_resize(img: DynamicImage, spec: &ResizeSpec) -> PipelineResult<DynamicImage> {
    spec.validate()?;
    let (orig_w, orig_h) = (img.width(), img.height());
    check_resize_target(orig_w, orig_h, spec)?;

    match (spec.fit, spec.width, spec.height) {
        (ResizeFit::Fill, w, h) => {
            let (w, h) = (w.unwrap_or(orig_w), h.unwrap_or(orig_h));
            resize_to(img, w, h)
        }
        (ResizeFit::Cover, Some(w), Some(h)) => {
            let (resize_w, resize_h) = calc_cover_resize_dimensions(orig_w, orig_h, w, h);
            let resized = resize_to(img, resize_w, resize_h)?;
            Ok(crop_at(resized, w, h, spec.position))
        }
        (ResizeFit::Contain, Some(w), Some(h)) => {
            if spec.without_enlargement && orig_w <= w && orig_h <= h {
                return Ok(img);
            }
            let (inner_w, inner_h) = calc_resize_dimensions(orig_w, orig_h, Some(w), Some(h));
            let resized = resize_to(img, inner_w.min(w), inner_h.min(h))?;
            Ok(letterbox(resized, w, h, spec.position, spec.background))
        }
        (_, w, h) => {
            let (w, h) = inside_dimensions(orig_w, orig_h, w, h, spec.without_enlargement);
            resize_to(img, w, h)
        }
    }
}

fn resize_to(img: DynamicImage, width: u32, height: u32) -> PipelineResult<DynamicImage> {
    if img.width() == width && img.height() == height {
        return Ok(img);
    }
    fast_resize_owned(img, width, height).map_err(ResizeError::into_bulk_media_error)
}

/// Crop a `target_w x target_h` window positioned by gravity.
pub fn crop_at(img: DynamicImage, target_w: u32, target_h: u32, position: Position) -> DynamicImage {
    let crop_width = target_w.min(img.width()).max(1);
    let crop_height = target_h.min(img.height()).max(1);
    if crop_width == img.width() && crop_height == img.height() {
        return img;
    }
    let (x, y) = position.offset(img.width() - crop_width, img.height() - crop_height);
    img.crop_imm(x, y, crop_width, crop_height)
}

/// Place `img` on a `width x height` canvas filled with `background`.
pub fn letterbox(
    img: DynamicImage,
    width: u32,
    height: u32,
    position: Position,
    background: Background,
) -> DynamicImage {
    if img.width() == width && img.height() == height {
        return img;
    }
    let (x, y) = position.offset(
        width.saturating_sub(img.width()),
        height.saturating_sub(img.height()),
    );
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba(background.rgba()));
    image::imageops::overlay(&mut canvas, &img.to_rgba8(), x as i64, y as i64);

    let opaque = background.rgba()[3] == 255 && !img.color().has_alpha();
    if opaque {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
    } else {
        DynamicImage::ImageRgba8(canvas)
    }
}

/// Composite transparent pixels over `background`, dropping the alpha channel.
pub fn flatten_alpha(img: DynamicImage, background: Background) -> DynamicImage {
    if !img.color().has_alpha() {
        return img;
    }
    let [bg_r, bg_g, bg_b, _] = background.rgba();
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let blend = |fg: u8, bg: u8, alpha: u32| -> u8 {
        ((fg as u32 * alpha + bg as u32 * (255 - alpha) + 127) / 255) as u8
    };
    let rgb = RgbImage::from_fn(w, h, |x, y| {
        let p = rgba.get_pixel(x, y).0;
        let alpha = p[3] as u32;
        image::Rgb([
            blend(p[0], bg_r, alpha),
            blend(p[1], bg_g, alpha),
            blend(p[2], bg_b, alpha),
        ])
    });
    DynamicImage::ImageRgb8(rgb)
}

/// Fast resize with owned DynamicImage (zero-copy for RGB/RGBA)
pub fn fast_resize_owned(
    img: DynamicImage,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, ResizeError> {
    let src_width = img.width();
    let src_height = img.height();

    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return Err(ResizeError::new(
            (src_width, src_height),
            (dst_width, dst_height),
            "invalid dimensions for resize",
        ));
    }

    // Take the pixel buffer without copying when the layout already fits
    let (pixel_type, src_pixels): (PixelType, Vec<u8>) = match img {
        DynamicImage::ImageRgb8(rgb) => (PixelType::U8x3, rgb.into_raw()),
        DynamicImage::ImageRgba8(rgba) => (PixelType::U8x4, rgba.into_raw()),
        other if !other.color().has_alpha() => (PixelType::U8x3, other.to_rgb8().into_raw()),
        other => (PixelType::U8x4, other.to_rgba8().into_raw()),
    };

    fast_resize_internal(
        src_width,
        src_height,
        src_pixels,
        pixel_type,
        dst_width,
        dst_height,
        default_resize_options(),
    )
    .map_err(|reason| ResizeError::new((src_width, src_height), (dst_width, dst_height), reason))
}

fn default_resize_options() -> ResizeOptions {
    ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3))
}

/// Decide whether alpha premultiplication is required for a given pixel layout.
#[inline]
fn requires_premultiply(pixel_type: PixelType) -> bool {
    matches!(pixel_type, PixelType::U8x4)
}

fn fast_resize_internal(
    src_width: u32,
    src_height: u32,
    mut src_pixels: Vec<u8>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
    options: ResizeOptions,
) -> std::result::Result<DynamicImage, String> {
    let pixel_count = (src_width as usize)
        .checked_mul(src_height as usize)
        .ok_or_else(|| "image dimensions overflow during resize".to_string())?;
    let required_bytes = pixel_count
        .checked_mul(pixel_type.size())
        .ok_or_else(|| "image buffer size overflow during resize".to_string())?;

    if src_pixels.len() < required_bytes {
        return Err(format!(
            "fir source image invalid buffer size. expected {required_bytes} bytes, got {} bytes",
            src_pixels.len()
        ));
    }

    let primary_result = match fir::images::Image::from_slice_u8(
        src_width,
        src_height,
        src_pixels.as_mut_slice(),
        pixel_type,
    ) {
        Ok(src_image) => {
            resize_with_source_image(src_image, pixel_type, dst_width, dst_height, options)
        }
        Err(ImageBufferError::InvalidBufferAlignment) => {
            let aligned_image = copy_pixels_to_aligned_image(
                src_width,
                src_height,
                pixel_type,
                &src_pixels,
                required_bytes,
            )?;
            resize_with_source_image(aligned_image, pixel_type, dst_width, dst_height, options)
        }
        Err(other) => Err(format!("fir source image error: {other:?}")),
    };

    match primary_result {
        Ok(img) => Ok(img),
        Err(err) => {
            tracing::debug!(error = %err, "SIMD resize failed, using image crate fallback");
            resize_with_image_crate_fallback(
                &src_pixels,
                src_width,
                src_height,
                pixel_type,
                dst_width,
                dst_height,
            )
            .map_err(|fallback_err| format!("{err}; image crate fallback failed: {fallback_err}"))
        }
    }
}

fn copy_pixels_to_aligned_image(
    width: u32,
    height: u32,
    pixel_type: PixelType,
    src_pixels: &[u8],
    required_bytes: usize,
) -> std::result::Result<fir::images::Image<'static>, String> {
    let mut aligned_image = fir::images::Image::new(width, height, pixel_type);
    let aligned_buffer = aligned_image.buffer_mut();
    if aligned_buffer.len() != required_bytes {
        return Err(format!(
            "fir alignment fallback buffer mismatch. expected {required_bytes} bytes, got {} bytes",
            aligned_buffer.len()
        ));
    }
    aligned_buffer.copy_from_slice(&src_pixels[..required_bytes]);
    Ok(aligned_image)
}

fn resize_with_image_crate_fallback(
    src_pixels: &[u8],
    src_width: u32,
    src_height: u32,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, String> {
    let filter = FilterType::Lanczos3;
    match pixel_type {
        PixelType::U8x3 => {
            let rgb = RgbImage::from_raw(src_width, src_height, src_pixels.to_vec())
                .ok_or_else(|| "failed to build rgb image for fallback resize".to_string())?;
            Ok(DynamicImage::ImageRgb8(image::imageops::resize(
                &rgb, dst_width, dst_height, filter,
            )))
        }
        PixelType::U8x4 => {
            let rgba = RgbaImage::from_raw(src_width, src_height, src_pixels.to_vec())
                .ok_or_else(|| "failed to build rgba image for fallback resize".to_string())?;
            Ok(DynamicImage::ImageRgba8(image::imageops::resize(
                &rgba, dst_width, dst_height, filter,
            )))
        }
        _ => Err("fallback resize supports only U8x3/U8x4 pixel types".to_string()),
    }
}

/// Large fully opaque RGBA images skip premultiplication. Below 1MP the scan
/// costs more than the SIMD premultiply it saves.
fn is_fully_opaque(image: &fir::images::Image, pixel_type: PixelType) -> bool {
    if pixel_type != PixelType::U8x4 {
        return true;
    }
    const THRESHOLD_PIXELS: u64 = 1_000_000;
    if (image.width() as u64).saturating_mul(image.height() as u64) < THRESHOLD_PIXELS {
        return false;
    }
    image.buffer().iter().skip(3).step_by(4).all(|&alpha| alpha == 255)
}

fn resize_with_source_image(
    mut src_image: fir::images::Image<'_>,
    pixel_type: PixelType,
    dst_width: u32,
    dst_height: u32,
    options: ResizeOptions,
) -> std::result::Result<DynamicImage, String> {
    let mut dst_image = fir::images::Image::new(dst_width, dst_height, pixel_type);

    let needs_premultiply =
        requires_premultiply(pixel_type) && !is_fully_opaque(&src_image, pixel_type);

    let mul_div = MulDiv::default();
    if needs_premultiply {
        mul_div
            .multiply_alpha_inplace(&mut src_image)
            .map_err(|e| format!("failed to premultiply alpha: {e}"))?;
    }

    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, &options)
        .map_err(|e| format!("fir resize error: {e:?}"))?;

    if needs_premultiply {
        mul_div
            .divide_alpha_inplace(&mut dst_image)
            .map_err(|e| format!("failed to unpremultiply alpha: {e}"))?;
    }

    let dst_pixels = dst_image.into_vec();
    match pixel_type {
        PixelType::U8x3 => {
            let rgb_image = RgbImage::from_raw(dst_width, dst_height, dst_pixels)
                .ok_or("failed to create rgb image from resized data")?;
            Ok(DynamicImage::ImageRgb8(rgb_image))
        }
        PixelType::U8x4 => {
            let rgba_image = RgbaImage::from_raw(dst_width, dst_height, dst_pixels)
                .ok_or("failed to create rgba image from resized data")?;
            Ok(DynamicImage::ImageRgba8(rgba_image))
        }
        _ => Err("unsupported pixel type after resize".to_string()),
    }
}
