use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::media::pipeline::MediaKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredMedia {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub size: u64,
}

pub struct Scanner {
    pub image_extensions: Vec<String>,
    pub video_extensions: Vec<String>,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        Self {
            image_extensions: ["jpg", "jpeg", "png", "webp", "bmp", "gif", "tif", "tiff"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            video_extensions: ["mp4", "mkv", "mov", "avi", "m4v", "webm", "ts", "3gp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn classify(&self, path: &Path) -> Option<MediaKind> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        if self.image_extensions.contains(&ext) {
            Some(MediaKind::Image)
        } else if self.video_extensions.contains(&ext) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    /// Accepts files and directories; directories are walked recursively.
    pub fn scan(&self, paths: Vec<PathBuf>) -> Vec<DiscoveredMedia> {
        let files = Arc::new(Mutex::new(Vec::new()));

        paths.into_par_iter().for_each(|root| {
            info!("Scanning: {:?}", root);
            let mut local_files = Vec::new();
            for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(kind) = self.classify(entry.path()) {
                    debug!("Found {} file: {:?}", kind.as_str(), entry.path());
                    let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    local_files.push(DiscoveredMedia {
                        path: entry.path().to_path_buf(),
                        kind,
                        size,
                    });
                }
            }
            match files.lock() {
                Ok(mut guard) => guard.extend(local_files),
                Err(e) => error!("Failed to lock scan results: {}", e),
            }
        });

        let mut final_files = match files.lock() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                error!("Failed to lock scan results for finalize: {}", e);
                Vec::new()
            }
        };
        // Deterministic ordering
        final_files.sort_by(|a, b| a.path.cmp(&b.path));
        final_files.dedup_by(|a, b| a.path == b.path);

        info!("Found {} candidate media files", final_files.len());
        final_files
    }
}
