//! Size-targeted bitrate calculation.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const AUDIO_KBPS: u32 = 128;
pub const MIN_VIDEO_KBPS: u32 = 100;
/// Kilobits per megabyte (1024 * 8).
pub const KBITS_PER_MEGABYTE: f64 = 8192.0;

/// Named output budgets. The label is what the user picks; the budget already
/// leaves headroom for container and muxing overhead.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SizePreset {
    Mb8,
    Mb10,
    Mb25,
    Mb50,
    Mb100,
}

impl SizePreset {
    pub const ALL: [SizePreset; 5] = [
        SizePreset::Mb8,
        SizePreset::Mb10,
        SizePreset::Mb25,
        SizePreset::Mb50,
        SizePreset::Mb100,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SizePreset::Mb8 => "8 MB",
            SizePreset::Mb10 => "10 MB",
            SizePreset::Mb25 => "25 MB",
            SizePreset::Mb50 => "50 MB",
            SizePreset::Mb100 => "100 MB",
        }
    }

    pub fn budget_mb(&self) -> f64 {
        match self {
            SizePreset::Mb8 => 7.5,
            SizePreset::Mb10 => 9.5,
            SizePreset::Mb25 => 24.0,
            SizePreset::Mb50 => 48.0,
            SizePreset::Mb100 => 96.0,
        }
    }
}

impl FromStr for SizePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '_'], "");
        match normalized.trim_end_matches("mb") {
            "8" => Ok(SizePreset::Mb8),
            "10" => Ok(SizePreset::Mb10),
            "25" => Ok(SizePreset::Mb25),
            "50" => Ok(SizePreset::Mb50),
            "100" => Ok(SizePreset::Mb100),
            _ => Err(format!("unknown size preset '{}'", s)),
        }
    }
}

/// Rate-control triple for a size-targeted encode. `maxrate` and `bufsize`
/// are part of the target, not optional tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitrateTarget {
    pub video_kbps: u32,
    pub maxrate_kbps: u32,
    pub bufsize_kbps: u32,
}

impl BitrateTarget {
    pub fn from_video_kbps(video_kbps: u32) -> Self {
        Self {
            video_kbps,
            maxrate_kbps: video_kbps,
            bufsize_kbps: video_kbps.saturating_mul(2),
        }
    }

    /// `None` when the duration cannot support a size target.
    pub fn for_budget(budget_mb: f64, duration_secs: f64, keep_audio: bool) -> Option<Self> {
        target_video_kbps(budget_mb, duration_secs, keep_audio).map(Self::from_video_kbps)
    }

    pub fn args(&self) -> Vec<String> {
        vec![
            "-b:v".to_string(),
            format!("{}k", self.video_kbps),
            "-maxrate".to_string(),
            format!("{}k", self.maxrate_kbps),
            "-bufsize".to_string(),
            format!("{}k", self.bufsize_kbps),
        ]
    }
}

pub fn audio_kbps(keep_audio: bool) -> u32 {
    if keep_audio {
        AUDIO_KBPS
    } else {
        0
    }
}

/// `floor(MB * 8192 / seconds) - audio`, clamped to [`MIN_VIDEO_KBPS`].
pub fn target_video_kbps(budget_mb: f64, duration_secs: f64, keep_audio: bool) -> Option<u32> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 || !budget_mb.is_finite() {
        return None;
    }
    let total = (budget_mb * KBITS_PER_MEGABYTE / duration_secs).floor();
    let video = total - f64::from(audio_kbps(keep_audio));
    let clamped = video.max(f64::from(MIN_VIDEO_KBPS)).min(f64::from(u32::MAX));
    Some(clamped as u32)
}
