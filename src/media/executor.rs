use crate::error::{KilobyeError, Result};
use crate::media::compiler::CompiledJob;
use crate::media::pipeline::{Artifact, CodecEngine};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, warn};

pub type EngineFactory<E> = Box<dyn Fn() -> E + Send + Sync>;

/// Owns the codec engine: lazy initialization, one job at a time, and
/// cleanup of every virtual file a job touched.
pub struct EngineAdapter<E: CodecEngine> {
    factory: EngineFactory<E>,
    engine: Option<E>,
}

impl<E: CodecEngine> EngineAdapter<E> {
    pub fn new(factory: impl Fn() -> E + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            engine: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }

    /// No-op once an engine is loaded. A failed load leaves the adapter empty.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.engine.is_some() {
            return Ok(());
        }
        let mut engine = (self.factory)();
        match engine.load().await {
            Ok(()) => {
                debug!("Codec engine loaded");
                self.engine = Some(engine);
                Ok(())
            }
            Err(e) => {
                warn!("Codec engine failed to load, will start fresh next time: {}", e);
                match e {
                    KilobyeError::EngineInitialization(_) => Err(e),
                    other => Err(KilobyeError::EngineInitialization(other.to_string())),
                }
            }
        }
    }

    /// Runs one compiled job and returns the output bytes. `on_progress` sees
    /// non-decreasing percentages in 0..=100.
    pub async fn submit(
        &mut self,
        job: &CompiledJob,
        inputs: &[Artifact],
        duration_secs: Option<f64>,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<Vec<u8>> {
        let expected: Vec<&str> = job.input_names().iter().map(String::as_str).collect();
        let given: Vec<&str> = inputs.iter().map(|a| a.name.as_str()).collect();
        if expected != given {
            return Err(KilobyeError::JobExecution(format!(
                "job expects inputs {:?}, got {:?}",
                expected, given
            )));
        }

        self.initialize().await?;
        let engine = match self.engine.as_mut() {
            Some(engine) => engine,
            None => {
                return Err(KilobyeError::EngineInitialization(
                    "engine unavailable".to_string(),
                ))
            }
        };

        let result = run(engine, job, inputs, duration_secs, on_progress).await;

        for name in job
            .input_names()
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(job.output_name()))
        {
            if let Err(e) = engine.delete_file(name).await {
                warn!("{}", KilobyeError::Cleanup(format!("{}: {}", name, e)));
            }
        }

        if let Err(e) = &result {
            // Engine state after a failed run is unknown; start the next job on a fresh one.
            debug!("Discarding codec engine after failure: {}", e);
            self.engine = None;
        }
        result
    }
}

async fn run<E: CodecEngine>(
    engine: &mut E,
    job: &CompiledJob,
    inputs: &[Artifact],
    duration_secs: Option<f64>,
    on_progress: &(dyn Fn(u8) + Send + Sync),
) -> Result<Vec<u8>> {
    for artifact in inputs {
        engine.write_file(&artifact.name, &artifact.bytes).await?;
    }

    let last = AtomicU8::new(0);
    let report = |fraction: f64| {
        if let Some(percentage) = to_percentage(fraction) {
            if last.fetch_max(percentage, Ordering::Relaxed) < percentage {
                on_progress(percentage);
            }
        }
    };
    engine.exec(job.args(), duration_secs, &report).await?;

    let bytes = engine.read_file(job.output_name()).await?;
    if bytes.is_empty() {
        return Err(KilobyeError::JobExecution(format!(
            "engine produced an empty {}",
            job.output_name()
        )));
    }
    Ok(bytes)
}

pub fn to_percentage(fraction: f64) -> Option<u8> {
    if fraction.is_nan() {
        return None;
    }
    Some((fraction.clamp(0.0, 1.0) * 100.0).round() as u8)
}
