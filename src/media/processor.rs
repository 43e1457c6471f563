use crate::error::{KilobyeError, Result};
use crate::media::compiler::{
    compile_image, compile_video, validate_video_settings, ImagePlan, JobInput,
};
use crate::media::executor::EngineAdapter;
use crate::media::pipeline::{
    Artifact, BatchEvent, BatchSettings, CodecEngine, CompressedOutput, ImageSettings, ItemId,
    JobState, MediaItem, MediaKind, Resizer, VideoSettings,
};
use crate::media::queue::MediaQueue;
use crate::media::raster::run_image_job;
use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub done: usize,
    pub failed: usize,
    /// Items removed or claimed elsewhere between listing and starting.
    pub skipped: usize,
}

/// Drives pending items through compilation and execution. Images run in
/// fixed-size parallel groups; videos run one at a time against the single
/// codec engine.
pub struct BatchScheduler<E: CodecEngine> {
    queue: MediaQueue,
    adapter: Arc<Mutex<EngineAdapter<E>>>,
    resizer: Arc<dyn Resizer>,
    tx: Arc<broadcast::Sender<BatchEvent>>,
    image_group_size: usize,
}

impl<E: CodecEngine> BatchScheduler<E> {
    pub fn new(
        queue: MediaQueue,
        adapter: EngineAdapter<E>,
        resizer: Arc<dyn Resizer>,
        image_group_size: usize,
    ) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            queue,
            adapter: Arc::new(Mutex::new(adapter)),
            resizer,
            tx: Arc::new(tx),
            image_group_size: image_group_size.max(1),
        }
    }

    pub fn queue(&self) -> &MediaQueue {
        &self.queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: BatchEvent) {
        let _ = self.tx.send(event);
    }

    /// Processes every pending item of the settings' kind. Conflicting video
    /// settings are rejected before any item starts; after that only an engine
    /// initialization failure ends the batch early.
    pub async fn run_batch(&self, settings: &BatchSettings) -> Result<BatchReport> {
        if let BatchSettings::Video(video) = settings {
            if let Err(e) = validate_video_settings(video) {
                error!("Rejecting batch settings: {}", e);
                return Err(e);
            }
        }
        let ids = self.queue.pending_ids(settings.kind());
        info!(
            "Starting {} batch with {} item(s)",
            settings.kind().as_str(),
            ids.len()
        );

        let report = match settings {
            BatchSettings::Image(image) => self.run_images(&ids, image).await,
            BatchSettings::Video(video) => self.run_videos(&ids, video).await?,
        };

        if !self.queue.is_batch_complete(&ids) {
            warn!("Batch finished with non-terminal items");
        }
        info!(
            "Batch complete: {} done, {} failed, {} skipped",
            report.done, report.failed, report.skipped
        );
        self.emit(BatchEvent::BatchCompleted {
            done: report.done,
            failed: report.failed,
        });
        Ok(report)
    }

    fn claim(&self, id: ItemId) -> Option<MediaItem> {
        match self.queue.begin(id) {
            Some(item) => {
                info!("[Item {}] Compressing {}", id, item.name);
                self.emit(BatchEvent::StateChanged {
                    item_id: id,
                    state: JobState::Compressing,
                });
                Some(item)
            }
            None => {
                debug!("[Item {}] No longer pending, skipping", id);
                None
            }
        }
    }

    async fn run_videos(&self, ids: &[ItemId], settings: &VideoSettings) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        for &id in ids {
            let mut adapter = self.adapter.lock().await;
            if let Err(e) = adapter.initialize().await {
                error!("Codec engine failed to initialize: {}", e);
                return Err(e);
            }

            let Some(item) = self.claim(id) else {
                report.skipped += 1;
                continue;
            };

            let outcome = self.compress_video(&mut adapter, &item, settings).await;
            drop(adapter);

            let fatal = outcome.as_ref().err().filter(|e| e.is_batch_fatal()).map(|e| e.to_string());
            self.settle(&item, outcome, &mut report);
            if let Some(message) = fatal {
                return Err(KilobyeError::EngineInitialization(message));
            }
        }
        Ok(report)
    }

    async fn compress_video(
        &self,
        adapter: &mut EngineAdapter<E>,
        item: &MediaItem,
        settings: &VideoSettings,
    ) -> Result<CompressedOutput> {
        let duration = item.known_duration();
        let job = compile_video(
            settings,
            &JobInput {
                extension: item.extension(),
                duration_secs: duration,
            },
        )?;
        for warning in job.warnings() {
            warn!("[Item {}] {}", item.id, warning);
            self.emit(BatchEvent::Warning {
                item_id: item.id,
                warning: *warning,
            });
        }
        debug!("[Item {}] Command: {}", item.id, job.command_line());

        let mut inputs = Vec::with_capacity(job.input_names().len());
        for (index, name) in job.input_names().iter().enumerate() {
            let bytes = match (index, &settings.watermark) {
                (0, _) => item.bytes.clone(),
                (_, Some(watermark)) => watermark.image.clone(),
                (_, None) => {
                    return Err(KilobyeError::JobExecution(format!(
                        "no data for engine input {}",
                        name
                    )))
                }
            };
            inputs.push(Artifact {
                name: name.clone(),
                bytes,
            });
        }

        let queue = &self.queue;
        let tx = &self.tx;
        let id = item.id;
        let on_progress = move |percentage: u8| {
            queue.set_progress(id, percentage);
            let _ = tx.send(BatchEvent::Progress {
                item_id: id,
                percentage,
            });
        };

        let bytes = adapter.submit(&job, &inputs, duration, &on_progress).await?;
        Ok(CompressedOutput {
            bytes: Bytes::from(bytes),
            file_name: format!("{}.{}", item.stem(), job.extension()),
            mime: job.mime(),
        })
    }

    async fn run_images(&self, ids: &[ItemId], settings: &ImageSettings) -> BatchReport {
        let mut report = BatchReport::default();
        let plan = compile_image(settings);

        for group in ids.chunks(self.image_group_size) {
            let claimed: Vec<MediaItem> = group.iter().filter_map(|&id| self.claim(id)).collect();
            report.skipped += group.len() - claimed.len();

            let tasks = claimed.into_iter().map(|item| {
                let resizer = self.resizer.clone();
                let plan = plan.clone();
                async move {
                    let worker_item = item.clone();
                    let outcome = tokio::task::spawn_blocking(move || {
                        compress_image(resizer.as_ref(), &worker_item, &plan)
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Err(KilobyeError::JobExecution(format!("image worker failed: {}", e)))
                    });
                    (item, outcome)
                }
            });

            for (item, outcome) in join_all(tasks).await {
                self.settle(&item, outcome, &mut report);
            }
        }
        report
    }

    fn settle(&self, item: &MediaItem, outcome: Result<CompressedOutput>, report: &mut BatchReport) {
        let id = item.id;
        match outcome {
            Ok(output) => {
                let size = output.size();
                info!(
                    "[Item {}] Done: {} -> {} ({} -> {} bytes)",
                    id, item.name, output.file_name, item.original_size, size
                );
                if let Err(e) = self.queue.complete(id, output) {
                    error!("[Item {}] Could not record result: {}", id, e);
                    return;
                }
                report.done += 1;
                self.emit(BatchEvent::StateChanged {
                    item_id: id,
                    state: JobState::Done,
                });
                self.emit(BatchEvent::Finished {
                    item_id: id,
                    state: JobState::Done,
                    output_size: Some(size),
                    error: None,
                });
            }
            Err(e) => {
                error!("[Item {}] Failed: {}", id, e);
                let message = e.to_string();
                if let Err(e) = self.queue.fail(id, message.clone()) {
                    error!("[Item {}] Could not record failure: {}", id, e);
                    return;
                }
                report.failed += 1;
                self.emit(BatchEvent::StateChanged {
                    item_id: id,
                    state: JobState::Error,
                });
                self.emit(BatchEvent::Finished {
                    item_id: id,
                    state: JobState::Error,
                    output_size: None,
                    error: Some(message),
                });
            }
        }
    }
}

fn compress_image(
    resizer: &dyn Resizer,
    item: &MediaItem,
    plan: &ImagePlan,
) -> Result<CompressedOutput> {
    if item.kind != MediaKind::Image {
        return Err(KilobyeError::Policy(format!(
            "{} is not an image",
            item.name
        )));
    }
    let encoded = run_image_job(resizer, &item.bytes, plan)?;
    Ok(CompressedOutput {
        bytes: Bytes::from(encoded.bytes),
        file_name: format!("{}.{}", item.stem(), encoded.format.extension()),
        mime: encoded.format.mime(),
    })
}
