//! Filesystem watcher: raw notify events are filtered, coalesced over a
//! configurable debounce window (changes often arrive in bursts while a
//! sync tool writes), and fed into the same discovery queue the full walk
//! uses. Deletions are left to the startup reconcile; the pipeline never
//! removes file rows.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{is_supported, should_ignore};
use crate::error::{IndexError, Result};
use crate::pipeline::PipelineSupervisor;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(30);

/// Keeps the underlying OS watcher alive; dropping this stops watching.
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl std::fmt::Debug for FsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsWatcher").field("root", &self.root).finish()
    }
}

/// Watch `root` recursively, coalescing changed paths for `debounce` before
/// handing them to the supervisor's discovery queue.
pub fn watch_root(
    root: PathBuf,
    debounce: Duration,
    supervisor: Arc<PipelineSupervisor>,
    shutdown: CancellationToken,
) -> Result<FsWatcher> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<PathBuf>();

    let mut watcher = RecommendedWatcher::new(
        move |result: std::result::Result<Event, notify::Error>| match result {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                for path in event.paths {
                    if should_ignore(&path) || !is_supported(&path) {
                        continue;
                    }
                    // Unbounded on purpose: this callback runs on notify's
                    // thread and must not block; the debounce task bounds
                    // what reaches the pipeline.
                    if event_tx.send(path).is_err() {
                        return;
                    }
                }
            }
            Err(err) => error!(target: "discovery", %err, "watch error"),
        },
        notify::Config::default(),
    )
    .map_err(|e| IndexError::Internal(format!("failed to create watcher: {e}")))?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| IndexError::Internal(format!("failed to watch {}: {e}", root.display())))?;
    info!(target: "discovery", root = %root.display(), debounce_secs = debounce.as_secs(), "watching for changes");

    tokio::spawn(run_debouncer(event_rx, debounce, supervisor, shutdown));

    Ok(FsWatcher {
        _watcher: watcher,
        root,
    })
}

/// Collect changed paths until the window elapses, then flush the batch.
async fn run_debouncer(
    mut event_rx: mpsc::UnboundedReceiver<PathBuf>,
    debounce: Duration,
    supervisor: Arc<PipelineSupervisor>,
    shutdown: CancellationToken,
) {
    let mut pending: HashSet<PathBuf> = HashSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = event_rx.recv() => {
                match changed {
                    Some(path) => { pending.insert(path); }
                    None => break,
                }
            }
            _ = tokio::time::sleep(debounce), if !pending.is_empty() => {
                let batch: Vec<PathBuf> = pending.drain().collect();
                debug!(target: "discovery", count = batch.len(), "flushing watched changes");
                for path in batch {
                    supervisor.notify_change(path).await;
                }
            }
        }
    }
    if !pending.is_empty() {
        warn!(target: "discovery", dropped = pending.len(), "watcher stopped with unflushed changes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The debounce loop is exercised against injected events rather than a
    // real notify backend, which is platform- and timing-dependent.
    #[tokio::test(start_paused = true)]
    async fn changes_are_coalesced_within_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = crate::catalog::CatalogStore::open(&dir.path().join("db/test.db"))
            .await
            .unwrap();
        let artifacts = crate::artifacts::ArtifactStore::new(dir.path());
        let cx = crate::stages::StageContext {
            catalog: Arc::new(catalog),
            artifacts,
            dedup: Arc::new(crate::dedup::DuplicateIndex::new()),
            persons: Arc::new(crate::persons::PersonIndex::new()),
            vision: Arc::new(crate::vision::VisionClient::disabled()),
            face_detector: Arc::new(crate::stages::DisabledFaceDetector),
        };
        let supervisor = Arc::new(
            crate::pipeline::PipelineSupervisor::new(
                cx,
                dir.path().to_path_buf(),
                crate::pipeline::PipelineConfig::default(),
            )
            .await
            .unwrap(),
        );
        // Note: pipeline not started, so flushed paths sit in the discovery
        // queue; the snapshot proves they arrived as one batch.

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_debouncer(
            rx,
            Duration::from_secs(30),
            Arc::clone(&supervisor),
            shutdown.clone(),
        ));

        // Same path twice plus one more, all inside one window.
        tx.send(PathBuf::from("/photos/a.jpg")).unwrap();
        tx.send(PathBuf::from("/photos/a.jpg")).unwrap();
        tx.send(PathBuf::from("/photos/b.jpg")).unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        // Duplicate events collapsed: two unique paths reached discovery.
        assert_eq!(supervisor.discovery_queue_depth(), 2);

        shutdown.cancel();
        drop(tx);
        handle.await.unwrap();
    }
}
