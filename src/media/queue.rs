//! In-memory item collection shared by the scheduler and its callers.
//!
//! All state transitions go through here. Locks are held only for the
//! duration of one mutation and never across an await point.

use crate::error::{KilobyeError, Result};
use crate::media::pipeline::{CompressedOutput, ItemId, JobState, MediaItem, MediaKind};
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub total: usize,
    pub pending: usize,
    pub compressing: usize,
    pub done: usize,
    pub failed: usize,
    pub original_bytes: u64,
    /// Compressed size of `done` items only.
    pub compressed_bytes: u64,
}

#[derive(Clone, Default)]
pub struct MediaQueue {
    items: Arc<RwLock<Vec<MediaItem>>>,
}

impl MediaQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<MediaItem>> {
        match self.items.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<MediaItem>> {
        match self.items.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn with_item<T>(&self, id: ItemId, f: impl FnOnce(&mut MediaItem) -> Result<T>) -> Result<T> {
        let mut items = self.write();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| KilobyeError::ItemNotFound(id.to_string()))?;
        f(item)
    }

    pub fn add(&self, item: MediaItem) -> ItemId {
        let id = item.id;
        debug!("[Item {}] Queued {} ({})", id, item.name, item.kind.as_str());
        self.write().push(item);
        id
    }

    /// Removing an item that is being compressed is refused; the work in
    /// flight cannot be cancelled.
    pub fn remove(&self, id: ItemId) -> Result<MediaItem> {
        let mut items = self.write();
        let index = items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| KilobyeError::ItemNotFound(id.to_string()))?;
        if items[index].state == JobState::Compressing {
            return Err(KilobyeError::ItemBusy(id.to_string()));
        }
        Ok(items.remove(index))
    }

    /// Explicit retry of a failed item.
    pub fn reset(&self, id: ItemId) -> Result<()> {
        self.with_item(id, |item| item.reset())
    }

    pub fn get(&self, id: ItemId) -> Option<MediaItem> {
        self.read().iter().find(|item| item.id == id).cloned()
    }

    pub fn snapshot(&self) -> Vec<MediaItem> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Pending items of one kind, in submission order.
    pub fn pending_ids(&self, kind: MediaKind) -> Vec<ItemId> {
        self.read()
            .iter()
            .filter(|item| item.kind == kind && item.state == JobState::Pending)
            .map(|item| item.id)
            .collect()
    }

    /// Claims a pending item for processing. Returns `None` if it was removed
    /// or is no longer pending, so a claimed item is never processed twice.
    pub fn begin(&self, id: ItemId) -> Option<MediaItem> {
        let mut items = self.write();
        let item = items.iter_mut().find(|item| item.id == id)?;
        if item.state != JobState::Pending {
            return None;
        }
        item.transition(JobState::Compressing).ok()?;
        Some(item.clone())
    }

    pub fn set_progress(&self, id: ItemId, percentage: u8) {
        if let Some(item) = self.write().iter_mut().find(|item| item.id == id) {
            item.set_progress(percentage);
        }
    }

    pub fn complete(&self, id: ItemId, output: CompressedOutput) -> Result<()> {
        self.with_item(id, |item| item.complete(output))
    }

    pub fn fail(&self, id: ItemId, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.with_item(id, |item| item.fail(message))
    }

    /// True once every listed item still in the queue is terminal.
    pub fn is_batch_complete(&self, ids: &[ItemId]) -> bool {
        self.read()
            .iter()
            .filter(|item| ids.contains(&item.id))
            .all(|item| item.state.is_terminal())
    }

    pub fn summary(&self) -> QueueSummary {
        let items = self.read();
        let mut summary = QueueSummary {
            total: items.len(),
            ..Default::default()
        };
        for item in items.iter() {
            summary.original_bytes += item.original_size;
            match item.state {
                JobState::Pending => summary.pending += 1,
                JobState::Compressing => summary.compressing += 1,
                JobState::Done => {
                    summary.done += 1;
                    summary.compressed_bytes +=
                        item.result.as_ref().map(|r| r.size()).unwrap_or(0);
                }
                JobState::Error => summary.failed += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn video(name: &str) -> MediaItem {
        MediaItem::new(name, MediaKind::Video, Bytes::from_static(b"0123456789"))
    }

    fn output() -> CompressedOutput {
        CompressedOutput {
            bytes: Bytes::from_static(b"01234"),
            file_name: "a.mp4".to_string(),
            mime: "video/mp4",
        }
    }

    #[test]
    fn test_pending_ids_filter_kind_and_keep_order() {
        let queue = MediaQueue::new();
        let a = queue.add(video("a.mp4"));
        queue.add(MediaItem::new("b.png", MediaKind::Image, Bytes::new()));
        let c = queue.add(video("c.mp4"));
        assert_eq!(queue.pending_ids(MediaKind::Video), vec![a, c]);
        assert_eq!(queue.pending_ids(MediaKind::Image).len(), 1);
    }

    #[test]
    fn test_begin_claims_once() {
        let queue = MediaQueue::new();
        let id = queue.add(video("a.mp4"));
        assert!(queue.begin(id).is_some());
        assert!(queue.begin(id).is_none());
        assert!(queue.pending_ids(MediaKind::Video).is_empty());
    }

    #[test]
    fn test_remove_refused_while_compressing() {
        let queue = MediaQueue::new();
        let id = queue.add(video("a.mp4"));
        assert!(queue.begin(id).is_some());
        match queue.remove(id) {
            Err(KilobyeError::ItemBusy(_)) => {}
            other => panic!("Expected busy error, got {:?}", other.map(|i| i.id)),
        }
        assert!(queue.complete(id, output()).is_ok());
        assert!(queue.remove(id).is_ok());
        assert!(queue.is_empty());
        assert!(matches!(queue.remove(id), Err(KilobyeError::ItemNotFound(_))));
    }

    #[test]
    fn test_reset_only_from_error() {
        let queue = MediaQueue::new();
        let id = queue.add(video("a.mp4"));
        assert!(queue.reset(id).is_err());
        assert!(queue.begin(id).is_some());
        assert!(queue.fail(id, "boom").is_ok());
        assert!(queue.pending_ids(MediaKind::Video).is_empty());
        assert!(queue.reset(id).is_ok());
        assert_eq!(queue.pending_ids(MediaKind::Video), vec![id]);
    }

    #[test]
    fn test_batch_completion_and_summary() {
        let queue = MediaQueue::new();
        let a = queue.add(video("a.mp4"));
        let b = queue.add(video("b.mp4"));
        let ids = [a, b];
        assert!(!queue.is_batch_complete(&ids));

        assert!(queue.begin(a).is_some());
        queue.set_progress(a, 42);
        assert_eq!(queue.get(a).map(|i| i.progress), Some(42));
        assert!(queue.complete(a, output()).is_ok());
        assert!(!queue.is_batch_complete(&ids));

        assert!(queue.begin(b).is_some());
        assert!(queue.fail(b, "bad input").is_ok());
        assert!(queue.is_batch_complete(&ids));

        let summary = queue.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.done, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.original_bytes, 20);
        assert_eq!(summary.compressed_bytes, 5);
    }

    #[test]
    fn test_unknown_item() {
        let queue = MediaQueue::new();
        let stray = video("x.mp4");
        assert!(queue.get(stray.id).is_none());
        assert!(matches!(
            queue.fail(stray.id, "x"),
            Err(KilobyeError::ItemNotFound(_))
        ));
    }
}
