use crate::error::{KilobyeError, Result};
use crate::media::bitrate::SizePreset;
use crate::media::compiler::ResizeRequest;
use crate::media::watermark::WatermarkSpec;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ItemId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Compressing,
    Done,
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }

    /// `Error -> Pending` is the explicit retry edge; nothing leaves `Done`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Compressing)
                | (JobState::Compressing, JobState::Done)
                | (JobState::Compressing, JobState::Error)
                | (JobState::Error, JobState::Pending)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Compressing => "compressing",
            JobState::Done => "done",
            JobState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct CompressedOutput {
    pub bytes: Bytes,
    pub file_name: String,
    pub mime: &'static str,
}

impl CompressedOutput {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// One user-submitted asset and its lifecycle.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub id: ItemId,
    pub name: String,
    pub kind: MediaKind,
    pub bytes: Bytes,
    pub original_size: u64,
    pub duration_secs: Option<f64>,
    pub state: JobState,
    pub progress: u8,
    pub result: Option<CompressedOutput>,
    pub last_error: Option<String>,
}

impl MediaItem {
    pub fn new(name: impl Into<String>, kind: MediaKind, bytes: Bytes) -> Self {
        let original_size = bytes.len() as u64;
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            bytes,
            original_size,
            duration_secs: None,
            state: JobState::Pending,
            progress: 0,
            result: None,
            last_error: None,
        }
    }

    pub fn with_duration(mut self, duration_secs: Option<f64>) -> Self {
        self.duration_secs = duration_secs.filter(|d| d.is_finite() && *d >= 0.0);
        self
    }

    /// Zero or missing duration means unknown.
    pub fn known_duration(&self) -> Option<f64> {
        self.duration_secs.filter(|d| *d > 0.0)
    }

    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(KilobyeError::InvalidTransition {
                id: self.id.to_string(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next != JobState::Compressing {
            self.progress = if next == JobState::Done { 100 } else { 0 };
        }
        Ok(())
    }

    pub fn complete(&mut self, output: CompressedOutput) -> Result<()> {
        self.transition(JobState::Done)?;
        self.last_error = None;
        self.result = Some(output);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(JobState::Error)?;
        self.last_error = Some(message.into());
        self.result = None;
        Ok(())
    }

    /// Explicit retry: only an errored item may go back to pending.
    pub fn reset(&mut self) -> Result<()> {
        self.transition(JobState::Pending)?;
        self.last_error = None;
        Ok(())
    }

    pub fn set_progress(&mut self, percentage: u8) {
        if self.state == JobState::Compressing {
            self.progress = percentage.min(100);
        }
    }

    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }

    pub fn extension(&self) -> Option<&str> {
        match self.name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
    Avif,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
            ImageFormat::Avif => "avif",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Avif => "image/avif",
        }
    }

    pub fn is_lossy(&self) -> bool {
        !matches!(self, ImageFormat::Png)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "webp" => Some(ImageFormat::Webp),
            "avif" => Some(ImageFormat::Avif),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" => Some(ImageFormat::Jpeg),
            "image/png" => Some(ImageFormat::Png),
            "image/webp" => Some(ImageFormat::Webp),
            "image/avif" => Some(ImageFormat::Avif),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageOutput {
    #[default]
    KeepOriginal,
    Format(ImageFormat),
}

#[derive(Debug, Clone, Default)]
pub struct ImageSettings {
    pub output: ImageOutput,
    /// 0 selects the policy default.
    pub max_width: u32,
    pub watermark: Option<WatermarkSpec>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputContainer {
    #[default]
    Video,
    AnimatedImage,
    AudioOnly,
}

impl OutputContainer {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputContainer::Video => "mp4",
            OutputContainer::AnimatedImage => "gif",
            OutputContainer::AudioOnly => "mp3",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            OutputContainer::Video => "video/mp4",
            OutputContainer::AnimatedImage => "image/gif",
            OutputContainer::AudioOnly => "audio/mpeg",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VideoSettings {
    /// Output height ceiling in pixels.
    pub resolution: Option<u32>,
    pub frame_rate: Option<u32>,
    pub quality: QualityTier,
    pub target_size: Option<SizePreset>,
    pub remove_audio: bool,
    pub container: OutputContainer,
    pub watermark: Option<WatermarkSpec>,
}

/// One settings object per batch; the variant decides which items are eligible.
#[derive(Debug, Clone)]
pub enum BatchSettings {
    Image(ImageSettings),
    Video(VideoSettings),
}

impl BatchSettings {
    pub fn kind(&self) -> MediaKind {
        match self {
            BatchSettings::Image(_) => MediaKind::Image,
            BatchSettings::Video(_) => MediaKind::Video,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyWarning {
    /// Size target requested but duration unknown; quality tier used instead.
    SizeTargetDowngraded,
    SizeTargetIgnoredForAnimation,
    SizeTargetIgnoredForAudio,
    AudioForcedOffForAnimation,
}

impl std::fmt::Display for PolicyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PolicyWarning::SizeTargetDowngraded => {
                "target size ignored: duration unknown, using quality tier"
            }
            PolicyWarning::SizeTargetIgnoredForAnimation => {
                "target size ignored: not supported for animated image output"
            }
            PolicyWarning::SizeTargetIgnoredForAudio => {
                "target size ignored: not supported for audio-only output"
            }
            PolicyWarning::AudioForcedOffForAnimation => {
                "audio dropped: animated image output carries no audio"
            }
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BatchEvent {
    StateChanged {
        item_id: ItemId,
        state: JobState,
    },
    Progress {
        item_id: ItemId,
        percentage: u8,
    },
    Warning {
        item_id: ItemId,
        warning: PolicyWarning,
    },
    Finished {
        item_id: ItemId,
        state: JobState,
        output_size: Option<u64>,
        error: Option<String>,
    },
    BatchCompleted {
        done: usize,
        failed: usize,
    },
}

/// Named input artifact handed to the codec engine.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// External codec execution engine with a flat virtual filesystem.
#[async_trait]
pub trait CodecEngine: Send {
    async fn load(&mut self) -> Result<()>;
    async fn write_file(&mut self, name: &str, data: &[u8]) -> Result<()>;
    async fn read_file(&mut self, name: &str) -> Result<Vec<u8>>;
    async fn delete_file(&mut self, name: &str) -> Result<()>;
    /// Reports fractional progress (nominally 0..=1, not guaranteed).
    async fn exec(
        &mut self,
        args: &[String],
        duration_secs: Option<f64>,
        progress: ProgressFn<'_>,
    ) -> Result<()>;
}

/// Stateless image resize/convert backend; safe to call from several threads.
pub trait Resizer: Send + Sync {
    fn resize(&self, input: &[u8], request: &ResizeRequest) -> Result<EncodedImage>;
    fn convert(&self, input: &[u8], format: ImageFormat, quality: f32) -> Result<EncodedImage>;
}
