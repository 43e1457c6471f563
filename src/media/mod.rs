pub mod bitrate;
pub mod compiler;
pub mod executor;
pub mod ffmpeg;
pub mod filter_graph;
pub mod pipeline;
pub mod policy;
pub mod processor;
pub mod queue;
pub mod raster;
pub mod scanner;
pub mod watermark;

#[cfg(test)]
pub(crate) mod fake;
