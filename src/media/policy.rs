//! Format and quality policy.
//!
//! Pure lookups from user-facing choices to encoder parameters. The numbers are
//! tuning values, kept here so every caller (and every test) sees the same ones.

use crate::media::pipeline::{ImageFormat, ImageOutput, QualityTier};

/// Quality of the resizer pass for every target. Per-format qualities apply
/// only to the conversion pass.
pub const RESIZER_INITIAL_QUALITY: f32 = 0.75;
/// Longest-edge cap when the user leaves max width at 0.
pub const DEFAULT_MAX_DIMENSION: u32 = 1920;
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 1024 * 1024;
pub const EXPLICIT_MAX_SIZE_BYTES: u64 = 50 * 1024 * 1024;

pub const VIDEO_CODEC: &str = "libx264";
pub const VIDEO_PRESET: &str = "veryfast";
pub const VIDEO_PIXEL_FORMAT: &str = "yuv420p";
pub const AUDIO_CODEC: &str = "aac";
pub const AUDIO_ONLY_CODEC: &str = "libmp3lame";
/// LAME VBR scale, 0 (best) to 9.
pub const AUDIO_ONLY_QUALITY: u8 = 2;
pub const ANIMATED_DEFAULT_FPS: u32 = 15;

pub fn image_quality(format: ImageFormat) -> f32 {
    match format {
        ImageFormat::Jpeg => 0.7,
        ImageFormat::Webp => 0.7,
        ImageFormat::Avif => 0.5,
        ImageFormat::Png => 0.8,
    }
}

/// What to ask the resizer for, and whether a conversion pass must follow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BridgePlan {
    /// `None` keeps the input format.
    pub resizer_format: Option<ImageFormat>,
    pub resizer_quality: f32,
    pub needs_second_pass: bool,
}

pub fn is_resizer_format(format: ImageFormat) -> bool {
    !matches!(format, ImageFormat::Avif)
}

pub fn bridge_format(output: ImageOutput) -> BridgePlan {
    match output {
        ImageOutput::KeepOriginal => BridgePlan {
            resizer_format: None,
            resizer_quality: RESIZER_INITIAL_QUALITY,
            needs_second_pass: false,
        },
        ImageOutput::Format(format) if is_resizer_format(format) => BridgePlan {
            resizer_format: Some(format),
            resizer_quality: RESIZER_INITIAL_QUALITY,
            needs_second_pass: false,
        },
        ImageOutput::Format(_) => BridgePlan {
            resizer_format: Some(ImageFormat::Webp),
            resizer_quality: RESIZER_INITIAL_QUALITY,
            needs_second_pass: true,
        },
    }
}

/// (longest edge cap, output byte budget) for a requested max width.
pub fn image_limits(max_width: u32) -> (u32, u64) {
    if max_width == 0 {
        (DEFAULT_MAX_DIMENSION, DEFAULT_MAX_SIZE_BYTES)
    } else {
        (max_width, EXPLICIT_MAX_SIZE_BYTES)
    }
}

pub fn crf(tier: QualityTier) -> u8 {
    match tier {
        QualityTier::High => 23,
        QualityTier::Medium => 28,
        QualityTier::Low => 32,
    }
}

/// Height ceiling for video scaling. Width follows the aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleTarget {
    max_height: u32,
}

impl ScaleTarget {
    /// Odd ceilings are rounded down; the encoder needs even dimensions.
    pub fn new(max_height: u32) -> Option<Self> {
        let even = max_height & !1;
        if even < 2 {
            None
        } else {
            Some(Self { max_height: even })
        }
    }

    pub fn max_height(&self) -> u32 {
        self.max_height
    }

    /// Output size for a given source, mirroring [`ScaleTarget::height_expr`] with width `-2`.
    pub fn dimensions_for(&self, source: (u32, u32)) -> (u32, u32) {
        let (sw, sh) = source;
        let height = self.max_height.min(even_floor(sh)).max(2);
        if sh == 0 {
            return (even_round(f64::from(sw)), height);
        }
        let width = f64::from(sw) * f64::from(height) / f64::from(sh);
        (even_round(width), height)
    }

    /// Engine-side expression: never upscale, always even.
    pub fn height_expr(&self) -> String {
        format!("'min({},trunc(ih/2)*2)'", self.max_height)
    }
}

fn even_floor(value: u32) -> u32 {
    value & !1
}

fn even_round(value: f64) -> u32 {
    let rounded = ((value / 2.0).round() * 2.0) as u32;
    rounded.max(2)
}
