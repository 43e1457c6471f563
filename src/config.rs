use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// Parent directory for per-engine scratch space; system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    /// 0 lets ffmpeg decide.
    #[serde(default)]
    pub threads: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_image_group_size")]
    pub image_group_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_bundle_prefix")]
    pub bundle_prefix: String,
}

pub fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

pub fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

pub fn default_image_group_size() -> usize {
    3
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("kilobye-optimized")
}

fn default_bundle_prefix() -> String {
    "kilobye".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            scratch_dir: None,
            threads: 0,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            image_group_size: default_image_group_size(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            bundle_prefix: default_bundle_prefix(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        if config.batch.image_group_size == 0 {
            config.batch.image_group_size = default_image_group_size();
        }
        Ok(config)
    }
}
