//! Watermark placement shared by the video filter graph and the image path.
//!
//! Margins are authored against a 1920 px wide canvas and scaled with the
//! output width, so the same setting looks identical at every resolution.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const REFERENCE_WIDTH: u32 = 1920;
pub const MIN_SCALE: f32 = 0.05;
pub const MAX_SCALE: f32 = 0.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

impl Anchor {
    /// Top-left corner of the overlay on the base canvas. `margin` is already scaled.
    pub fn position(&self, base: (u32, u32), overlay: (u32, u32), margin: u32) -> (i64, i64) {
        let (bw, bh) = (i64::from(base.0), i64::from(base.1));
        let (ow, oh) = (i64::from(overlay.0), i64::from(overlay.1));
        let m = i64::from(margin);
        match self {
            Anchor::TopLeft => (m, m),
            Anchor::TopRight => (bw - ow - m, m),
            Anchor::BottomLeft => (m, bh - oh - m),
            Anchor::BottomRight => (bw - ow - m, bh - oh - m),
            Anchor::Center => ((bw - ow) / 2, (bh - oh) / 2),
        }
    }

    /// Same placement as [`Anchor::position`], written as ffmpeg `overlay` expressions.
    /// The base size is only known to the engine, so the margin scaling happens there too.
    pub fn overlay_exprs(&self, margin: u32) -> (String, String) {
        let m = format!("({}*W/{})", margin, REFERENCE_WIDTH);
        match self {
            Anchor::TopLeft => (m.clone(), m),
            Anchor::TopRight => (format!("W-w-{}", m), m),
            Anchor::BottomLeft => (m.clone(), format!("H-h-{}", m)),
            Anchor::BottomRight => (format!("W-w-{}", m), format!("H-h-{}", m)),
            Anchor::Center => ("(W-w)/2".to_string(), "(H-h)/2".to_string()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Anchor::TopLeft => "top-left",
            Anchor::TopRight => "top-right",
            Anchor::BottomLeft => "bottom-left",
            Anchor::BottomRight => "bottom-right",
            Anchor::Center => "center",
        }
    }
}

impl FromStr for Anchor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top-left" => Ok(Anchor::TopLeft),
            "top-right" => Ok(Anchor::TopRight),
            "bottom-left" => Ok(Anchor::BottomLeft),
            "bottom-right" => Ok(Anchor::BottomRight),
            "center" => Ok(Anchor::Center),
            other => Err(format!("unknown watermark anchor '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatermarkSpec {
    pub image: Bytes,
    pub opacity: f32,
    /// Overlay width as a fraction of the base width.
    pub scale: f32,
    pub anchor: Anchor,
    /// Pixels at the 1920 px reference width.
    pub margin: u32,
}

impl WatermarkSpec {
    pub fn new(image: Bytes, opacity: f32, scale: f32, anchor: Anchor, margin: u32) -> Self {
        Self {
            image,
            opacity: clamp_or(opacity, 0.0, 1.0, 1.0),
            scale: clamp_or(scale, MIN_SCALE, MAX_SCALE, 0.2),
            anchor,
            margin,
        }
    }

    pub fn scaled_margin(&self, base_width: u32) -> u32 {
        (f64::from(self.margin) * f64::from(base_width) / f64::from(REFERENCE_WIDTH)).round() as u32
    }

    /// Overlay size for a base canvas width, keeping the overlay's aspect ratio.
    pub fn overlay_size(&self, base_width: u32, overlay: (u32, u32)) -> (u32, u32) {
        let width = (f64::from(base_width) * f64::from(self.scale)).round().max(1.0);
        let height = if overlay.0 == 0 {
            width
        } else {
            (width * f64::from(overlay.1) / f64::from(overlay.0)).round().max(1.0)
        };
        (width as u32, height as u32)
    }

    pub fn placement(&self, base: (u32, u32), overlay: (u32, u32)) -> (i64, i64) {
        self.anchor
            .position(base, overlay, self.scaled_margin(base.0))
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(anchor: Anchor) -> WatermarkSpec {
        WatermarkSpec::new(Bytes::new(), 0.8, 0.2, anchor, 20)
    }

    #[test]
    fn test_anchor_positions_at_reference_width() {
        let base = (1920, 1080);
        let overlay = (200, 100);
        assert_eq!(spec(Anchor::BottomRight).placement(base, overlay), (1700, 960));
        assert_eq!(spec(Anchor::Center).placement(base, overlay), (860, 490));
        assert_eq!(spec(Anchor::TopLeft).placement(base, overlay), (20, 20));
        assert_eq!(spec(Anchor::TopRight).placement(base, overlay), (1700, 20));
        assert_eq!(spec(Anchor::BottomLeft).placement(base, overlay), (20, 960));
    }

    #[test]
    fn test_margin_scales_with_width() {
        let wm = spec(Anchor::TopLeft);
        assert_eq!(wm.scaled_margin(1920), 20);
        assert_eq!(wm.scaled_margin(960), 10);
        assert_eq!(wm.scaled_margin(1280), 13);
        assert_eq!(wm.placement((960, 540), (100, 50)), (10, 10));
    }

    #[test]
    fn test_overlay_keeps_aspect() {
        let wm = spec(Anchor::Center);
        assert_eq!(wm.overlay_size(1920, (400, 200)), (384, 192));
        assert_eq!(wm.overlay_size(1280, (300, 300)), (256, 256));
    }

    #[test]
    fn test_spec_bounds() {
        let wm = WatermarkSpec::new(Bytes::new(), 1.7, 0.9, Anchor::Center, 0);
        assert_eq!(wm.opacity, 1.0);
        assert_eq!(wm.scale, MAX_SCALE);
        let wm = WatermarkSpec::new(Bytes::new(), -1.0, 0.01, Anchor::Center, 0);
        assert_eq!(wm.opacity, 0.0);
        assert_eq!(wm.scale, MIN_SCALE);
    }

    #[test]
    fn test_overlay_expressions() {
        let (x, y) = Anchor::BottomRight.overlay_exprs(20);
        assert_eq!(x, "W-w-(20*W/1920)");
        assert_eq!(y, "H-h-(20*W/1920)");
        let (x, y) = Anchor::Center.overlay_exprs(20);
        assert_eq!((x.as_str(), y.as_str()), ("(W-w)/2", "(H-h)/2"));
    }

    #[test]
    fn test_anchor_from_str() {
        assert_eq!("Top-Right".parse::<Anchor>(), Ok(Anchor::TopRight));
        assert!("middle".parse::<Anchor>().is_err());
    }
}
