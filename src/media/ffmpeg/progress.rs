//! Parsing for ffmpeg's `-progress` key/value stream.

/// One completed `-progress` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FfmpegProgress {
    pub frame: u64,
    pub fps: f64,
    pub out_time_seconds: f64,
    pub speed: String,
    pub ended: bool,
}

impl FfmpegProgress {
    /// Fraction of `total_duration` encoded so far. Not clamped; callers clamp.
    pub fn fraction(&self, total_duration: Option<f64>) -> Option<f64> {
        if self.ended {
            return Some(1.0);
        }
        match total_duration {
            Some(total) if total > 0.0 && total.is_finite() => Some(self.out_time_seconds / total),
            _ => None,
        }
    }
}

/// Accumulates `key=value` lines until a `progress=` line closes the block.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: FfmpegProgress,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> Option<FfmpegProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        match key.trim() {
            "frame" => self.current.frame = value.parse().unwrap_or(self.current.frame),
            "fps" => self.current.fps = value.parse().unwrap_or(self.current.fps),
            "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.current.out_time_seconds = us.max(0) as f64 / 1_000_000.0;
                }
            }
            "out_time" => {
                if let Some(seconds) = parse_time(value) {
                    self.current.out_time_seconds = seconds;
                }
            }
            "speed" => self.current.speed = value.to_string(),
            "progress" => {
                self.current.ended = value == "end";
                return Some(self.current.clone());
            }
            _ => {}
        }
        None
    }
}

/// `HH:MM:SS.micro` to seconds.
pub fn parse_time(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some((hours * 3600.0 + minutes * 60.0 + seconds).max(0.0))
}
