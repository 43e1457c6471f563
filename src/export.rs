//! Writes finished results to disk under collision-free names.

use crate::error::Result;
use crate::media::pipeline::{JobState, MediaItem, MediaKind};
use chrono::{DateTime, TimeZone};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Splits `name` into stem and extension. Dotfiles have no extension.
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

/// Hands out names that have not been used yet, appending ` (n)` before the
/// extension on collision.
#[derive(Debug, Default)]
pub struct UniqueNames {
    taken: HashSet<String>,
}

impl UniqueNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, name: &str) -> String {
        if self.taken.insert(name.to_string()) {
            return name.to_string();
        }
        let (stem, ext) = split_name(name);
        let mut counter = 1usize;
        loop {
            let candidate = match ext {
                Some(ext) => format!("{} ({}).{}", stem, counter, ext),
                None => format!("{} ({})", stem, counter),
            };
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub written: Vec<PathBuf>,
    /// Failed or unfinished items left out of the bundle.
    pub skipped: usize,
    pub original_bytes: u64,
    pub compressed_bytes: u64,
}

impl ExportReport {
    pub fn saved_bytes(&self) -> i64 {
        self.original_bytes as i64 - self.compressed_bytes as i64
    }

    pub fn saved_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        self.saved_bytes() as f64 / self.original_bytes as f64 * 100.0
    }
}

/// Directory name for one exported batch, e.g. `kilobye-images-20260101-120000`.
pub fn bundle_dir_name<Tz: TimeZone>(prefix: &str, kind: MediaKind, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}-{}s-{}", prefix, kind.as_str(), at.format("%Y%m%d-%H%M%S"))
}

/// Writes every `done` item into `dir`. The directory stands in for a single
/// zip bundle (`kilobye-images-<ts>.zip` holding `kilobye-optimized/`);
/// archiving is left to whoever ships the directory.
pub async fn export_done(items: &[MediaItem], dir: &Path) -> Result<ExportReport> {
    tokio::fs::create_dir_all(dir).await?;
    let mut names = UniqueNames::new();
    let mut report = ExportReport::default();

    for item in items {
        let result = match (&item.state, &item.result) {
            (JobState::Done, Some(result)) => result,
            _ => {
                debug!("[Item {}] Not exported ({})", item.id, item.state);
                report.skipped += 1;
                continue;
            }
        };
        let name = names.claim(&result.file_name);
        let path = dir.join(&name);
        tokio::fs::write(&path, &result.bytes).await?;
        report.original_bytes += item.original_size;
        report.compressed_bytes += result.size();
        report.written.push(path);
    }

    info!(
        "Exported {} file(s) to {:?}, {} skipped",
        report.written.len(),
        dir,
        report.skipped
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::pipeline::CompressedOutput;
    use bytes::Bytes;
    use chrono::Utc;

    fn done(name: &str, original: &'static [u8], output_name: &str, output: &'static [u8]) -> MediaItem {
        let mut item = MediaItem::new(name, MediaKind::Image, Bytes::from_static(original));
        if let Err(e) = item.transition(JobState::Compressing) {
            panic!("transition: {}", e);
        }
        let result = CompressedOutput {
            bytes: Bytes::from_static(output),
            file_name: output_name.to_string(),
            mime: "image/jpeg",
        };
        if let Err(e) = item.complete(result) {
            panic!("complete: {}", e);
        }
        item
    }

    #[test]
    fn test_duplicate_names_get_counter() {
        let mut names = UniqueNames::new();
        assert_eq!(names.claim("photo.jpg"), "photo.jpg");
        assert_eq!(names.claim("photo.jpg"), "photo (1).jpg");
        assert_eq!(names.claim("photo.jpg"), "photo (2).jpg");
        assert_eq!(names.claim("photo (1).jpg"), "photo (1) (1).jpg");
        assert_eq!(names.claim("README"), "README");
        assert_eq!(names.claim("README"), "README (1)");
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("a.tar.gz"), ("a.tar", Some("gz")));
        assert_eq!(split_name(".env"), (".env", None));
        assert_eq!(split_name("trailing."), ("trailing.", None));
    }

    #[test]
    fn test_bundle_dir_name() {
        let at = match Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single() {
            Some(at) => at,
            None => panic!("valid date"),
        };
        assert_eq!(
            bundle_dir_name("kilobye", MediaKind::Image, &at),
            "kilobye-images-20260102-030405"
        );
    }

    #[tokio::test]
    async fn test_export_skips_failed_and_dedups() {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => panic!("tempdir: {}", e),
        };
        let mut failed = MediaItem::new("bad.png", MediaKind::Image, Bytes::from_static(b"x"));
        if let Err(e) = failed.transition(JobState::Compressing) {
            panic!("transition: {}", e);
        }
        if let Err(e) = failed.fail("decode error") {
            panic!("fail: {}", e);
        }
        let items = vec![
            done("a/photo.png", b"0123456789", "photo.jpg", b"0123"),
            failed,
            done("b/photo.png", b"0123456789", "photo.jpg", b"012345"),
            MediaItem::new("pending.png", MediaKind::Image, Bytes::from_static(b"y")),
        ];

        let report = match export_done(&items, dir.path()).await {
            Ok(report) => report,
            Err(e) => panic!("export: {}", e),
        };
        assert_eq!(report.written.len(), 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.written[1], dir.path().join("photo (1).jpg"));
        assert_eq!(report.original_bytes, 20);
        assert_eq!(report.compressed_bytes, 10);
        assert_eq!(report.saved_bytes(), 10);
        assert!((report.saved_percent() - 50.0).abs() < 1e-9);
        match std::fs::read(dir.path().join("photo (1).jpg")) {
            Ok(data) => assert_eq!(data, b"012345"),
            Err(e) => panic!("read: {}", e),
        }
    }
}
