pub mod config;
pub mod error;
pub mod export;
pub mod media;

pub use config::Config;
pub use error::{KilobyeError, Result};
pub use media::executor::EngineAdapter;
pub use media::ffmpeg::FfmpegEngine;
pub use media::pipeline::{BatchEvent, BatchSettings, MediaItem, MediaKind};
pub use media::processor::{BatchReport, BatchScheduler};
pub use media::queue::MediaQueue;
pub use media::raster::RasterResizer;
