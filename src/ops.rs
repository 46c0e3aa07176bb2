// src/ops.rs
//
// Transform parameters shared by every item of a batch.
// These are cheap to create and share - the expensive work happens in the codec.

use crate::engine::MAX_DIMENSION;
use crate::error::{BulkMediaError, Result};

/// Default encoder quality when none is given.
pub const DEFAULT_QUALITY: u8 = 80;

/// Output format for encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
}

impl OutputFormat {
    pub fn from_str(format: &str) -> Result<Self> {
        match format.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::WebP),
            "gif" => Ok(Self::Gif),
            other => Err(BulkMediaError::unsupported_format(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Gif => "gif",
        }
    }

    /// Map a detected input format to an encodable output format, if any.
    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::WebP => Some(Self::WebP),
            image::ImageFormat::Gif => Some(Self::Gif),
            _ => None,
        }
    }

    /// JPEG has no alpha channel; transparent pixels must be flattened first.
    pub fn supports_alpha(&self) -> bool {
        !matches!(self, Self::Jpeg)
    }
}

/// How the image is fitted into the requested box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResizeFit {
    /// Scale to cover the box, then crop the overflow at `position`.
    Cover,
    /// Scale to fit inside the box, then pad with `background` to the exact size.
    Contain,
    /// Stretch to the exact size, ignoring aspect ratio.
    Fill,
    /// Scale to fit inside the box; output may be smaller on one axis.
    #[default]
    Inside,
}

impl ResizeFit {
    pub fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cover" => Ok(Self::Cover),
            "contain" => Ok(Self::Contain),
            "fill" => Ok(Self::Fill),
            "inside" => Ok(Self::Inside),
            other => Err(BulkMediaError::invalid_resize_fit(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cover => "cover",
            Self::Contain => "contain",
            Self::Fill => "fill",
            Self::Inside => "inside",
        }
    }
}

/// Gravity used when cropping (Cover) or placing the image on a canvas (Contain).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Position {
    TopLeft,
    Top,
    TopRight,
    Left,
    #[default]
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

impl Position {
    pub fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', '_', ' '], "");
        match normalized.as_str() {
            "topleft" | "northwest" => Ok(Self::TopLeft),
            "top" | "north" => Ok(Self::Top),
            "topright" | "northeast" => Ok(Self::TopRight),
            "left" | "west" => Ok(Self::Left),
            "center" | "centre" => Ok(Self::Center),
            "right" | "east" => Ok(Self::Right),
            "bottomleft" | "southwest" => Ok(Self::BottomLeft),
            "bottom" | "south" => Ok(Self::Bottom),
            "bottomright" | "southeast" => Ok(Self::BottomRight),
            _ => Err(BulkMediaError::invalid_argument(
                "position",
                value.to_string(),
                "expected one of top-left, top, top-right, left, center, right, bottom-left, bottom, bottom-right",
            )),
        }
    }

    /// Offset of the placed/cropped region given the free space on each axis.
    pub fn offset(&self, free_w: u32, free_h: u32) -> (u32, u32) {
        let x = match self {
            Self::TopLeft | Self::Left | Self::BottomLeft => 0,
            Self::Top | Self::Center | Self::Bottom => free_w / 2,
            Self::TopRight | Self::Right | Self::BottomRight => free_w,
        };
        let y = match self {
            Self::TopLeft | Self::Top | Self::TopRight => 0,
            Self::Left | Self::Center | Self::Right => free_h / 2,
            Self::BottomLeft | Self::Bottom | Self::BottomRight => free_h,
        };
        (x, y)
    }
}

/// RGBA background colour for letterboxing and alpha flattening.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Background(pub [u8; 4]);

impl Default for Background {
    fn default() -> Self {
        Self::WHITE
    }
}

impl Background {
    pub const WHITE: Self = Self([255, 255, 255, 255]);

    /// Parse `#rrggbb` or `#rrggbbaa` (the leading `#` is optional).
    pub fn from_hex(value: &str) -> Result<Self> {
        let hex = value.trim().trim_start_matches('#');
        let invalid = || {
            BulkMediaError::invalid_argument(
                "background",
                value.to_string(),
                "expected #rrggbb or #rrggbbaa",
            )
        };
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(invalid());
        }
        let mut rgba = [255u8; 4];
        for (i, slot) in rgba.iter_mut().enumerate().take(hex.len() / 2) {
            *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self(rgba))
    }

    pub fn rgba(&self) -> [u8; 4] {
        self.0
    }
}

/// Resize parameters.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ResizeSpec {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: ResizeFit,
    pub position: Position,
    pub background: Background,
    /// Never upscale (Inside/Contain only).
    pub without_enlargement: bool,
}

impl ResizeSpec {
    pub fn new(width: Option<u32>, height: Option<u32>) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    /// Build from the resize modes exposed by upload forms:
    /// `fit` (inside), `fill` (cover), `stretch` (fill) and `thumbnail`
    /// (inside, never upscaled). sharp-style fit names are accepted too.
    pub fn from_mode(mode: &str, width: Option<u32>, height: Option<u32>) -> Result<Self> {
        let mut spec = Self::new(width, height);
        match mode.trim().to_ascii_lowercase().as_str() {
            "fit" => spec.fit = ResizeFit::Inside,
            "fill" => spec.fit = ResizeFit::Cover,
            "stretch" => spec.fit = ResizeFit::Fill,
            "thumbnail" => {
                spec.fit = ResizeFit::Inside;
                spec.without_enlargement = true;
            }
            other => spec.fit = ResizeFit::from_str(other)?,
        }
        Ok(spec)
    }

    pub fn with_fit(mut self, fit: ResizeFit) -> Self {
        self.fit = fit;
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn with_background(mut self, background: Background) -> Self {
        self.background = background;
        self
    }

    pub fn without_enlargement(mut self, value: bool) -> Self {
        self.without_enlargement = value;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.width.is_none() && self.height.is_none() {
            return Err(BulkMediaError::invalid_resize_dimensions(None, None));
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err(BulkMediaError::invalid_resize_dimensions(
                self.width,
                self.height,
            ));
        }
        for dimension in [self.width, self.height].into_iter().flatten() {
            if dimension > MAX_DIMENSION {
                return Err(BulkMediaError::dimension_exceeds_limit(dimension, MAX_DIMENSION));
            }
        }
        Ok(())
    }
}

/// Everything needed to transform one item. Shared read-only across a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformSpec {
    pub resize: Option<ResizeSpec>,
    /// `None` keeps the input format when it is encodable, otherwise PNG.
    pub format: Option<OutputFormat>,
    /// Encoder quality 0-100 (ignored by PNG and GIF).
    pub quality: u8,
}

impl Default for TransformSpec {
    fn default() -> Self {
        Self {
            resize: None,
            format: None,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl TransformSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resize(mut self, resize: ResizeSpec) -> Self {
        self.resize = Some(resize);
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.quality > 100 {
            return Err(BulkMediaError::invalid_argument(
                "quality",
                self.quality.to_string(),
                "quality must be between 0 and 100",
            ));
        }
        if let Some(resize) = &self.resize {
            resize.validate()?;
        }
        Ok(())
    }

    /// Output format for an input of the given detected format.
    pub fn resolve_format(&self, detected: Option<image::ImageFormat>) -> OutputFormat {
        self.format
            .or_else(|| detected.and_then(OutputFormat::from_image_format))
            .unwrap_or(OutputFormat::Png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from_str("JPG").unwrap(), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::from_str("jpeg").unwrap(), OutputFormat::Jpeg);
        assert_eq!(OutputFormat::from_str(" webp ").unwrap(), OutputFormat::WebP);
        assert_eq!(OutputFormat::from_str("gif").unwrap(), OutputFormat::Gif);
        assert!(matches!(
            OutputFormat::from_str("avif"),
            Err(BulkMediaError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_resize_modes() {
        let fit = ResizeSpec::from_mode("fit", Some(100), None).unwrap();
        assert_eq!(fit.fit, ResizeFit::Inside);
        assert!(!fit.without_enlargement);

        let fill = ResizeSpec::from_mode("fill", Some(100), Some(50)).unwrap();
        assert_eq!(fill.fit, ResizeFit::Cover);

        let stretch = ResizeSpec::from_mode("stretch", Some(100), Some(50)).unwrap();
        assert_eq!(stretch.fit, ResizeFit::Fill);

        let thumb = ResizeSpec::from_mode("thumbnail", Some(150), Some(150)).unwrap();
        assert_eq!(thumb.fit, ResizeFit::Inside);
        assert!(thumb.without_enlargement);

        assert_eq!(
            ResizeSpec::from_mode("contain", Some(1), Some(1)).unwrap().fit,
            ResizeFit::Contain
        );
        assert!(matches!(
            ResizeSpec::from_mode("squash", Some(1), None),
            Err(BulkMediaError::InvalidResizeFit { .. })
        ));
    }

    #[test]
    fn test_position_offsets() {
        assert_eq!(Position::TopLeft.offset(10, 20), (0, 0));
        assert_eq!(Position::Center.offset(10, 20), (5, 10));
        assert_eq!(Position::BottomRight.offset(10, 20), (10, 20));
        assert_eq!(Position::Top.offset(9, 9), (4, 0));
        assert_eq!(Position::from_str("north-east").unwrap(), Position::TopRight);
        assert_eq!(Position::from_str("bottom_left").unwrap(), Position::BottomLeft);
        assert!(Position::from_str("middle").is_err());
    }

    #[test]
    fn test_background_hex() {
        assert_eq!(Background::from_hex("#000000").unwrap().rgba(), [0, 0, 0, 255]);
        assert_eq!(
            Background::from_hex("ff000080").unwrap().rgba(),
            [255, 0, 0, 128]
        );
        assert!(Background::from_hex("#fff").is_err());
        assert!(Background::from_hex("#gggggg").is_err());
        assert_eq!(Background::default(), Background::WHITE);
    }

    #[test]
    fn test_spec_validation() {
        assert!(TransformSpec::new().validate().is_ok());
        assert!(TransformSpec::new().quality(101).validate().is_err());
        assert!(TransformSpec::new()
            .resize(ResizeSpec::new(None, None))
            .validate()
            .is_err());
        let zero = TransformSpec::new()
            .resize(ResizeSpec::new(Some(0), Some(10)))
            .validate()
            .unwrap_err();
        assert_eq!(zero.category(), crate::error::ErrorCategory::UserError);

        let huge = TransformSpec::new()
            .resize(ResizeSpec::new(Some(MAX_DIMENSION + 1), Some(1)).with_fit(ResizeFit::Fill))
            .validate()
            .unwrap_err();
        assert!(matches!(huge, BulkMediaError::DimensionExceedsLimit { .. }));
        assert!(TransformSpec::new()
            .resize(ResizeSpec::new(None, Some(MAX_DIMENSION)))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_resolve_format() {
        let keep = TransformSpec::new();
        assert_eq!(
            keep.resolve_format(Some(image::ImageFormat::WebP)),
            OutputFormat::WebP
        );
        assert_eq!(
            keep.resolve_format(Some(image::ImageFormat::Bmp)),
            OutputFormat::Png
        );
        assert_eq!(keep.resolve_format(None), OutputFormat::Png);

        let forced = TransformSpec::new().format(OutputFormat::Jpeg);
        assert_eq!(
            forced.resolve_format(Some(image::ImageFormat::Png)),
            OutputFormat::Jpeg
        );
    }
}
