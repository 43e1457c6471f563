use thiserror::Error;

#[derive(Error, Debug)]
pub enum KilobyeError {
    #[error("Policy error: {0}")]
    Policy(String),

    #[error("Codec engine failed to initialize: {0}")]
    EngineInitialization(String),

    #[error("Job execution failed: {0}")]
    JobExecution(String),

    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Invalid state transition for item {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: crate::media::pipeline::JobState,
        to: crate::media::pipeline::JobState,
    },

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Item is being processed: {0}")]
    ItemBusy(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KilobyeError {
    /// Only engine initialization stops a batch; everything else stays local to one item.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, KilobyeError::EngineInitialization(_))
    }
}

pub type Result<T> = std::result::Result<T, KilobyeError>;
