use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, ValueEnum};
use futures::StreamExt;
use kilobye::config::Config;
use kilobye::export::{bundle_dir_name, export_done};
use kilobye::media::bitrate::SizePreset;
use kilobye::media::ffmpeg::{probe_duration, FfmpegEngine};
use kilobye::media::pipeline::{
    BatchEvent, BatchSettings, ImageFormat, ImageOutput, ImageSettings, MediaItem, MediaKind,
    OutputContainer, QualityTier, VideoSettings,
};
use kilobye::media::scanner::Scanner;
use kilobye::media::watermark::{Anchor, WatermarkSpec};
use kilobye::{BatchScheduler, EngineAdapter, MediaQueue, RasterResizer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Image,
    Video,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Original,
    Jpeg,
    Png,
    Webp,
    Avif,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum QualityArg {
    High,
    Medium,
    Low,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ContainerArg {
    /// MP4 (H.264 + AAC)
    Video,
    /// Looping GIF, no audio
    Gif,
    /// MP3 audio track only
    Audio,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Files or directories to compress
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Batch kind; inferred from the first file found when omitted
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "kilobye.toml")]
    config: PathBuf,

    /// Output directory (overrides [output].directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Image output format
    #[arg(long, value_enum, default_value = "original")]
    format: FormatArg,

    /// Longest image edge in pixels; 0 uses the default cap and size budget
    #[arg(long, default_value_t = 0)]
    max_width: u32,

    /// Video height ceiling in pixels
    #[arg(long)]
    resolution: Option<u32>,

    /// Output frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Video quality tier
    #[arg(long, value_enum, default_value = "medium")]
    quality: QualityArg,

    /// Target output size (8mb, 10mb, 25mb, 50mb, 100mb)
    #[arg(long)]
    target_size: Option<SizePreset>,

    /// Drop the audio track
    #[arg(long)]
    remove_audio: bool,

    /// Video output container
    #[arg(long, value_enum, default_value = "video")]
    container: ContainerArg,

    /// Image file to overlay on every output
    #[arg(long)]
    watermark: Option<PathBuf>,

    /// Watermark opacity, 0.0 - 1.0
    #[arg(long, default_value_t = 0.5)]
    watermark_opacity: f32,

    /// Watermark width as a fraction of the output width
    #[arg(long, default_value_t = 0.2)]
    watermark_scale: f32,

    /// top-left, top-right, bottom-left, bottom-right or center
    #[arg(long, default_value = "bottom-right")]
    watermark_anchor: Anchor,

    /// Watermark margin in pixels at 1920 px width
    #[arg(long, default_value_t = 20)]
    watermark_margin: u32,
}

impl Args {
    fn image_settings(&self, watermark: Option<WatermarkSpec>) -> ImageSettings {
        let output = match self.format {
            FormatArg::Original => ImageOutput::KeepOriginal,
            FormatArg::Jpeg => ImageOutput::Format(ImageFormat::Jpeg),
            FormatArg::Png => ImageOutput::Format(ImageFormat::Png),
            FormatArg::Webp => ImageOutput::Format(ImageFormat::Webp),
            FormatArg::Avif => ImageOutput::Format(ImageFormat::Avif),
        };
        ImageSettings {
            output,
            max_width: self.max_width,
            watermark,
        }
    }

    fn video_settings(&self, watermark: Option<WatermarkSpec>) -> VideoSettings {
        VideoSettings {
            resolution: self.resolution,
            frame_rate: self.fps,
            quality: match self.quality {
                QualityArg::High => QualityTier::High,
                QualityArg::Medium => QualityTier::Medium,
                QualityArg::Low => QualityTier::Low,
            },
            target_size: self.target_size,
            remove_audio: self.remove_audio,
            container: match self.container {
                ContainerArg::Video => OutputContainer::Video,
                ContainerArg::Gif => OutputContainer::AnimatedImage,
                ContainerArg::Audio => OutputContainer::AudioOnly,
            },
            watermark,
        }
    }
}

fn log_event(event: &BatchEvent) {
    match event {
        BatchEvent::StateChanged { item_id, state } => {
            debug!("[Item {}] -> {}", item_id, state)
        }
        BatchEvent::Progress {
            item_id,
            percentage,
        } => debug!("[Item {}] {}%", item_id, percentage),
        BatchEvent::Warning { item_id, warning } => warn!("[Item {}] {}", item_id, warning),
        BatchEvent::Finished {
            item_id,
            state,
            output_size,
            error,
        } => match (output_size, error) {
            (Some(size), _) => info!("[Item {}] {} ({} bytes)", item_id, state, size),
            (_, Some(message)) => error!("[Item {}] {}: {}", item_id, state, message),
            _ => info!("[Item {}] {}", item_id, state),
        },
        BatchEvent::BatchCompleted { done, failed } => {
            info!("Batch completed: {} done, {} failed", done, failed)
        }
    }
}

async fn load_item(path: &Path, kind: MediaKind, ffprobe_path: &str) -> Result<MediaItem> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let item = MediaItem::new(name, kind, Bytes::from(data));
    if kind != MediaKind::Video {
        return Ok(item);
    }
    let duration = match probe_duration(ffprobe_path, path).await {
        Ok(duration) => duration,
        Err(e) => {
            warn!("Could not probe duration of {:?}: {}", path, e);
            None
        }
    };
    Ok(item.with_duration(duration))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config).unwrap_or_else(|e| {
        warn!("Failed to load {:?}: {}. Using defaults.", args.config, e);
        Config::default()
    });

    let scanner = Scanner::new();
    let discovered = scanner.scan(args.paths.clone());
    let Some(first) = discovered.first() else {
        bail!("No supported media files found in {:?}", args.paths);
    };
    let kind = match args.mode {
        Some(ModeArg::Image) => MediaKind::Image,
        Some(ModeArg::Video) => MediaKind::Video,
        None => first.kind,
    };
    info!("Kilobye starting {} batch", kind.as_str());

    let watermark = match &args.watermark {
        Some(path) => {
            let image = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read watermark {:?}", path))?;
            Some(WatermarkSpec::new(
                Bytes::from(image),
                args.watermark_opacity,
                args.watermark_scale,
                args.watermark_anchor,
                args.watermark_margin,
            ))
        }
        None => None,
    };
    let settings = match kind {
        MediaKind::Image => BatchSettings::Image(args.image_settings(watermark)),
        MediaKind::Video => BatchSettings::Video(args.video_settings(watermark)),
    };

    let queue = MediaQueue::new();
    for file in &discovered {
        if file.kind != kind {
            warn!("Skipping {:?}: not a {} file", file.path, kind.as_str());
            continue;
        }
        match load_item(&file.path, kind, &config.engine.ffprobe_path).await {
            Ok(item) => {
                queue.add(item);
            }
            Err(e) => error!("{:#}", e),
        }
    }

    let engine_config = config.engine.clone();
    let scheduler = BatchScheduler::new(
        queue.clone(),
        EngineAdapter::new(move || FfmpegEngine::new(engine_config.clone())),
        Arc::new(RasterResizer::new()),
        config.batch.image_group_size,
    );

    let mut events = BroadcastStream::new(scheduler.subscribe());
    let logger = tokio::spawn(async move {
        while let Some(msg) = events.next().await {
            let Ok(event) = msg else {
                continue;
            };
            log_event(&event);
            if let BatchEvent::BatchCompleted { .. } = event {
                break;
            }
        }
    });

    let report = match scheduler.run_batch(&settings).await {
        Ok(report) => report,
        Err(e) => {
            error!("Batch aborted: {}", e);
            logger.abort();
            return Err(e.into());
        }
    };
    let _ = logger.await;

    let output_root = args
        .output_dir
        .clone()
        .unwrap_or_else(|| config.output.directory.clone());
    let bundle = output_root.join(bundle_dir_name(
        &config.output.bundle_prefix,
        kind,
        &chrono::Local::now(),
    ));
    let export = export_done(&queue.snapshot(), &bundle).await?;

    info!(
        "{} done, {} failed. {} -> {} bytes ({:.1}% saved). Output: {:?}",
        report.done,
        report.failed,
        export.original_bytes,
        export.compressed_bytes,
        export.saved_percent(),
        bundle
    );
    Ok(())
}
