//! FFmpeg-backed codec engine.
//! Runs the ffmpeg binary inside a private scratch directory that stands in for
//! the engine's flat virtual filesystem, and parses structured progress.

use crate::config::EngineConfig;
use crate::error::{KilobyeError, Result};
use crate::media::pipeline::{CodecEngine, ProgressFn};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub mod progress;

pub use progress::{FfmpegProgress, ProgressParser};

/// Lines of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

pub struct FfmpegEngine {
    config: EngineConfig,
    scratch: Option<TempDir>,
}

impl FfmpegEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            scratch: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.scratch.is_some()
    }

    fn create_scratch(&mut self) -> Result<()> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("kilobye-");
            b
        };
        let dir = match &self.config.scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|e| {
            KilobyeError::EngineInitialization(format!("cannot create scratch directory: {}", e))
        })?;
        debug!("Engine scratch directory: {}", dir.path().display());
        self.scratch = Some(dir);
        Ok(())
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let scratch = self.scratch.as_ref().ok_or_else(|| {
            KilobyeError::JobExecution("codec engine used before load".to_string())
        })?;
        validate_name(name)?;
        Ok(scratch.path().join(name))
    }
}

/// The virtual filesystem is flat; names are plain file names.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0');
    if valid {
        Ok(())
    } else {
        Err(KilobyeError::JobExecution(format!(
            "invalid engine file name '{}'",
            name
        )))
    }
}

#[async_trait]
impl CodecEngine for FfmpegEngine {
    async fn load(&mut self) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        verify_ffmpeg(&self.config.ffmpeg_path).await?;
        self.create_scratch()
    }

    async fn write_file(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn read_file(&mut self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        tokio::fs::read(&path).await.map_err(|e| {
            KilobyeError::JobExecution(format!("cannot read engine output '{}': {}", name, e))
        })
    }

    async fn delete_file(&mut self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KilobyeError::Cleanup(format!("{}: {}", name, e))),
        }
    }

    async fn exec(
        &mut self,
        args: &[String],
        duration_secs: Option<f64>,
        progress: ProgressFn<'_>,
    ) -> Result<()> {
        let scratch = match &self.scratch {
            Some(dir) => dir.path().to_path_buf(),
            None => {
                return Err(KilobyeError::JobExecution(
                    "codec engine used before load".to_string(),
                ))
            }
        };

        let mut full_args: Vec<String> = [
            "-hide_banner",
            "-nostdin",
            "-y",
            "-progress",
            "pipe:1",
            "-nostats",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        match args.split_last() {
            Some((output, rest)) if self.config.threads > 0 => {
                full_args.extend(rest.iter().cloned());
                full_args.push("-threads".to_string());
                full_args.push(self.config.threads.to_string());
                full_args.push(output.clone());
            }
            _ => full_args.extend(args.iter().cloned()),
        }

        info!("Command: {} {}", self.config.ffmpeg_path, full_args.join(" "));

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&full_args)
            .current_dir(&scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                KilobyeError::JobExecution(format!(
                    "failed to start {}: {}",
                    self.config.ffmpeg_path, e
                ))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            KilobyeError::JobExecution("failed to capture ffmpeg stdout".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            KilobyeError::JobExecution("failed to capture ffmpeg stderr".to_string())
        })?;

        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>()
        });

        let mut parser = ProgressParser::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(update) = parser.feed(&line) {
                if let Some(fraction) = update.fraction(duration_secs) {
                    progress(fraction);
                }
            }
        }

        let status = child.wait().await?;
        let tail = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            warn!("FFmpeg failed with {}", status);
            Err(KilobyeError::JobExecution(format!(
                "ffmpeg exited with {}: {}",
                status,
                tail.join("\n")
            )))
        }
    }
}

/// Verify FFmpeg is available and return version info
pub async fn verify_ffmpeg(ffmpeg_path: &str) -> Result<String> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| KilobyeError::EngineInitialization(format!("FFmpeg not found: {}", e)))?;

    if !output.status.success() {
        return Err(KilobyeError::EngineInitialization(
            "FFmpeg returned error".into(),
        ));
    }

    let version = String::from_utf8_lossy(&output.stdout);
    let first_line = version.lines().next().unwrap_or("unknown");

    info!("FFmpeg version: {}", first_line);
    Ok(first_line.to_string())
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Container duration in seconds; `None` when ffprobe cannot tell.
pub fn parse_probe_duration(json: &[u8]) -> Result<Option<f64>> {
    let output: FfprobeOutput = serde_json::from_slice(json)
        .map_err(|e| KilobyeError::Probe(format!("Failed to parse ffprobe JSON: {}", e)))?;
    Ok(output
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0))
}

pub async fn probe_duration(ffprobe_path: &str, path: &Path) -> Result<Option<f64>> {
    let output = Command::new(ffprobe_path)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-print_format",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| KilobyeError::Probe(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let err = String::from_utf8_lossy(&output.stderr);
        return Err(KilobyeError::Probe(format!("ffprobe failed: {}", err.trim())));
    }

    parse_probe_duration(&output.stdout)
}
