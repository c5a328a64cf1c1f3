//! Discovery: the streaming full walk and the filesystem watcher, both
//! feeding the same queue. The walk emits each path as encountered — no
//! batching — so downstream stages start before enumeration finishes.
//! Full walks run only on explicit trigger, never at startup.

pub mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::pipeline::supervisor::Shared;

/// Extensions discovery considers photos. Formats the decoder cannot handle
/// still get identity and EXIF; their pixel stages are skipped.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "tiff", "tif", "bmp", "heic", "heif", "avif", "dng",
    "cr2", "nef", "arw", "orf", "rw2",
];

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

pub fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("tiff" | "tif") => "image/tiff",
        Some("bmp") => "image/bmp",
        Some("heic" | "heif") => "image/heic",
        Some("avif") => "image/avif",
        Some("dng" | "cr2" | "nef" | "arw" | "orf" | "rw2") => "image/x-raw",
        _ => "application/octet-stream",
    }
}

/// Noise filters shared by the walk and the watcher.
pub fn should_ignore(path: &Path) -> bool {
    let hidden_component = path.components().any(|c| match c {
        std::path::Component::Normal(os) => os
            .to_str()
            .map(|s| s.starts_with('.') || s == "@eaDir" || s == "__MACOSX")
            .unwrap_or(false),
        _ => false,
    });
    let temp_extension = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("tmp" | "part" | "swp" | "crdownload")
    );
    hidden_component || temp_extension
}

/// Recursive streaming walk on a blocking thread. Each supported file is
/// pushed onto the discovery queue immediately; the bounded queue provides
/// the backpressure that keeps the walk from outrunning the pipeline.
pub(crate) fn spawn_walker(
    root: PathBuf,
    tx: mpsc::Sender<PathBuf>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<u64> {
    tokio::task::spawn_blocking(move || {
        let mut emitted = 0u64;
        for entry in WalkDir::new(&root).follow_links(false) {
            if cancel.is_cancelled() {
                info!(target: "discovery", emitted, "walk cancelled");
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(target: "discovery", %err, "walk entry error");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if should_ignore(path) || !is_supported(path) {
                continue;
            }

            shared.discovery_pending_inc();
            if tx.blocking_send(path.to_path_buf()).is_err() {
                shared.discovery_pending_dec();
                break;
            }
            emitted += 1;
        }
        info!(target: "discovery", emitted, root = %root.display(), "walk complete");
        emitted
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_supported(Path::new("/photos/a.JPG")));
        assert!(is_supported(Path::new("/photos/b.jpeg")));
        assert!(is_supported(Path::new("/photos/c.HEIC")));
        assert!(!is_supported(Path::new("/photos/notes.txt")));
        assert!(!is_supported(Path::new("/photos/clip.mp4")));
        assert!(!is_supported(Path::new("/photos/noext")));
    }

    #[test]
    fn hidden_and_temp_paths_are_ignored() {
        assert!(should_ignore(Path::new("/photos/.thumbnails/a.jpg")));
        assert!(should_ignore(Path::new("/photos/@eaDir/a.jpg")));
        assert!(should_ignore(Path::new("/photos/a.jpg.part")));
        assert!(!should_ignore(Path::new("/photos/2024/a.jpg")));
    }

    #[test]
    fn mime_mapping_covers_common_formats() {
        assert_eq!(mime_for(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("a.dng")), "image/x-raw");
    }
}
