//! The pipeline supervisor: owns one bounded queue and one worker pool per
//! stage, the per-run cancel token, aggregate counters, and the scan-run
//! lifecycle. Queues are bounded, so a producer blocks when its downstream
//! is full — that is the backpressure contract that keeps memory flat when
//! the walk outpaces the CPU stages.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lumen_model::{
    ActiveWork, FileId, FlowEdge, FlowNode, PipelineFlow, PipelineStats, ScanRunId,
    ScanRunSummary, Stage, StageCounters, DISCOVERY_DOWNSTREAM,
};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::progress::{ProgressBroadcaster, COALESCE_INTERVAL_MS};
use super::worker::run_stage_worker;
use crate::discovery::{mime_for, spawn_walker};
use crate::error::{IndexError, Result};
use crate::events::run_event_detection;
use crate::stages::{build_stage_ops, StageContext};

/// Queue capacities and worker pool sizes, grouped by cost profile.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    /// I/O-bound stages (discovery, exif, motion extraction).
    pub io_workers: usize,
    /// CPU-bound stages (decode, hash, cluster).
    pub cpu_workers: usize,
    /// External-service stages (caption, tagging); these also share one
    /// rate limiter inside the vision client.
    pub external_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            io_workers: 4,
            cpu_workers: num_cpus::get().clamp(1, 4),
            external_workers: 2,
        }
    }
}

impl PipelineConfig {
    fn workers_for(&self, stage: Stage) -> usize {
        match stage {
            Stage::Exif | Stage::MotionPhoto => self.io_workers,
            Stage::Geocode | Stage::Thumbnails | Stage::Phash | Stage::Faces => self.cpu_workers,
            Stage::Caption | Stage::Tagging => self.external_workers,
        }
    }
}

/// Live counters for one stage. Pending and in-flight are signed so that a
/// mid-flight counter reset cannot wrap.
#[derive(Debug, Default)]
pub(crate) struct StageCell {
    pending: AtomicI64,
    in_flight: AtomicI64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl StageCell {
    pub(crate) fn pending_inc(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn pending_dec(&self) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }
    pub(crate) fn in_flight_inc(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn in_flight_dec(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
    pub(crate) fn completed_inc(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn failed_inc(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn skipped_inc(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.pending.store(0, Ordering::Relaxed);
        self.in_flight.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StageCounters {
        StageCounters {
            pending: self.pending.load(Ordering::Relaxed).max(0) as u64,
            in_flight: self.in_flight.load(Ordering::Relaxed).max(0) as u64,
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    fn queued(&self) -> i64 {
        self.pending.load(Ordering::Relaxed).max(0) + self.in_flight.load(Ordering::Relaxed).max(0)
    }
}

#[derive(Debug, Clone)]
struct RunHandle {
    id: ScanRunId,
    cancel: CancellationToken,
    started_at: i64,
}

/// State shared between the supervisor, its workers, and discovery.
pub(crate) struct Shared {
    senders: HashMap<Stage, mpsc::Sender<FileId>>,
    counters: HashMap<Stage, StageCell>,
    discovery_tx: mpsc::Sender<PathBuf>,
    discovery_pending: AtomicI64,
    discovered: AtomicU64,
    hashed: AtomicU64,
    pub(crate) active: DashMap<(Stage, usize), String>,
    run: parking_lot::RwLock<Option<RunHandle>>,
    pub(crate) shutdown: CancellationToken,
    dirty: AtomicBool,
}

impl Shared {
    pub(crate) fn counters(&self, stage: Stage) -> &StageCell {
        self.counters.get(&stage).expect("all stages registered")
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub(crate) fn discovery_pending_inc(&self) {
        self.discovery_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn discovery_pending_dec(&self) {
        self.discovery_pending.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn run_cancelled(&self) -> bool {
        self.run
            .read()
            .as_ref()
            .map(|run| run.cancel.is_cancelled())
            .unwrap_or(false)
    }

    /// Push onto a stage queue; blocks when the queue is full.
    pub(crate) async fn enqueue(&self, stage: Stage, id: FileId) {
        self.counters(stage).pending_inc();
        if self.senders[&stage].send(id).await.is_err() {
            self.counters(stage).pending_dec();
        }
        self.mark_dirty();
    }

    fn drained(&self) -> bool {
        self.discovery_pending.load(Ordering::Relaxed).max(0) == 0
            && Stage::ALL.iter().all(|s| self.counters(*s).queued() == 0)
    }

    fn reset_counters(&self) {
        for cell in self.counters.values() {
            cell.reset();
        }
        self.discovered.store(0, Ordering::Relaxed);
        self.hashed.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("discovered", &self.discovered.load(Ordering::Relaxed))
            .field("running", &self.run.read().is_some())
            .finish()
    }
}

pub struct PipelineSupervisor {
    shared: Arc<Shared>,
    cx: Arc<StageContext>,
    config: PipelineConfig,
    photos_root: PathBuf,
    broadcaster: ProgressBroadcaster,
    started_at: Instant,
    receivers: Mutex<Option<Receivers>>,
    worker_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

struct Receivers {
    discovery: mpsc::Receiver<PathBuf>,
    stages: HashMap<Stage, mpsc::Receiver<FileId>>,
}

impl std::fmt::Debug for PipelineSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSupervisor")
            .field("config", &self.config)
            .field("photos_root", &self.photos_root)
            .field("shared", &self.shared)
            .finish()
    }
}

impl PipelineSupervisor {
    /// Build queues and shared state, and seed the in-memory duplicate and
    /// person indexes from the catalog so groups survive restarts.
    pub async fn new(
        cx: StageContext,
        photos_root: PathBuf,
        config: PipelineConfig,
    ) -> Result<Self> {
        let phashes = cx.catalog.load_phashes().await?;
        cx.dedup
            .seed(phashes.into_iter().map(|(id, hash, _)| (id, hash as u64)));
        let faces = cx.catalog.load_faces().await?;
        cx.persons.seed(
            faces
                .into_iter()
                .map(|f| (f.id, f.embedding_f32(), f.person_id)),
        );

        let (discovery_tx, discovery_rx) = mpsc::channel(config.queue_capacity);
        let mut senders = HashMap::new();
        let mut stage_receivers = HashMap::new();
        let mut counters = HashMap::new();
        for stage in Stage::ALL {
            let (tx, rx) = mpsc::channel(config.queue_capacity);
            senders.insert(stage, tx);
            stage_receivers.insert(stage, rx);
            counters.insert(stage, StageCell::default());
        }

        let shared = Arc::new(Shared {
            senders,
            counters,
            discovery_tx,
            discovery_pending: AtomicI64::new(0),
            discovered: AtomicU64::new(0),
            hashed: AtomicU64::new(0),
            active: DashMap::new(),
            run: parking_lot::RwLock::new(None),
            shutdown: CancellationToken::new(),
            dirty: AtomicBool::new(false),
        });

        Ok(Self {
            shared,
            cx: Arc::new(cx),
            config,
            photos_root,
            broadcaster: ProgressBroadcaster::new(),
            started_at: Instant::now(),
            receivers: Mutex::new(Some(Receivers {
                discovery: discovery_rx,
                stages: stage_receivers,
            })),
            worker_handles: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the discovery pool, one worker pool per stage, and the
    /// progress ticker. Idempotent-hostile by design: call once.
    pub async fn start(&self) -> Result<()> {
        let receivers = self
            .receivers
            .lock()
            .await
            .take()
            .ok_or_else(|| IndexError::Internal("pipeline already started".into()))?;

        let mut handles = self.worker_handles.lock().await;

        let discovery_rx = Arc::new(Mutex::new(receivers.discovery));
        for worker_id in 0..self.config.io_workers {
            let shared = Arc::clone(&self.shared);
            let cx = Arc::clone(&self.cx);
            let rx = Arc::clone(&discovery_rx);
            handles.push(tokio::spawn(async move {
                run_discovery_worker(shared, cx, rx, worker_id).await;
            }));
        }

        let mut stage_receivers = receivers.stages;
        for op in build_stage_ops() {
            let stage = op.stage();
            let rx = Arc::new(Mutex::new(
                stage_receivers.remove(&stage).expect("receiver per stage"),
            ));
            for worker_id in 0..self.config.workers_for(stage) {
                let shared = Arc::clone(&self.shared);
                let cx = Arc::clone(&self.cx);
                let op = Arc::clone(&op);
                let rx = Arc::clone(&rx);
                handles.push(tokio::spawn(async move {
                    run_stage_worker(shared, cx, op, worker_id, rx).await;
                }));
            }
        }

        handles.push(self.spawn_progress_ticker());
        info!(target: "pipeline", config = ?self.config, "pipeline started");
        Ok(())
    }

    fn spawn_progress_ticker(&self) -> tokio::task::JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let broadcaster = self.broadcaster.clone();
        let started_at = self.started_at;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(COALESCE_INTERVAL_MS));
            loop {
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        if shared.dirty.swap(false, Ordering::Relaxed) {
                            broadcaster.publish(build_snapshot(&shared, started_at));
                        }
                    }
                }
            }
        })
    }

    /// Start a scan run: refuse concurrency, spawn the streaming walk, and
    /// arm the idle barrier that fires event detection afterwards.
    pub async fn trigger_scan(&self) -> Result<ScanRunId> {
        if tokio::fs::metadata(&self.photos_root).await.is_err() {
            return Err(IndexError::PhotosRootMissing(self.photos_root.clone()));
        }

        let run = {
            let mut guard = self.shared.run.write();
            if guard.is_some() {
                return Err(IndexError::ScanAlreadyRunning);
            }
            let run = RunHandle {
                id: ScanRunId::new(),
                cancel: CancellationToken::new(),
                started_at: chrono::Utc::now().timestamp(),
            };
            *guard = Some(run.clone());
            run
        };

        let scan_id = run.id;
        self.shared.reset_counters();
        if let Err(err) = self.cx.catalog.create_scan_run(&scan_id.to_string()).await {
            *self.shared.run.write() = None;
            return Err(err);
        }
        info!(target: "pipeline", scan = %scan_id, root = %self.photos_root.display(), "scan started");

        let walker = spawn_walker(
            self.photos_root.clone(),
            self.shared.discovery_tx.clone(),
            Arc::clone(&self.shared),
            run.cancel.clone(),
        );

        // Monitor: wait for the walk, then for the queues to drain, then run
        // the batch barrier work and close the run out.
        let shared = Arc::clone(&self.shared);
        let cx = Arc::clone(&self.cx);
        let broadcaster = self.broadcaster.clone();
        let started_at = self.started_at;
        tokio::spawn(async move {
            let walked = walker.await.unwrap_or(0);
            debug!(target: "pipeline", walked, "walk finished, waiting for drain");

            // On cancellation the workers drop queued items fast, so this
            // same drain condition also closes out a stopped run.
            loop {
                if shared.shutdown.is_cancelled() || shared.drained() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(COALESCE_INTERVAL_MS)).await;
            }

            let cancelled = run.cancel.is_cancelled();
            if !cancelled && !shared.shutdown.is_cancelled() {
                if let Err(err) = run_event_detection(&cx.catalog).await {
                    error!(target: "pipeline", %err, "event detection failed");
                }
            }

            let totals: Vec<StageCounters> = Stage::ALL
                .iter()
                .map(|s| shared.counters(*s).snapshot())
                .collect();
            let completed: u64 = totals.iter().map(|c| c.completed).sum();
            let failed: u64 = totals.iter().map(|c| c.failed).sum();
            let skipped: u64 = totals.iter().map(|c| c.skipped).sum();
            if let Err(err) = cx
                .catalog
                .finish_scan_run(
                    &run.id.to_string(),
                    cancelled,
                    shared.discovered.load(Ordering::Relaxed) as i64,
                    shared.hashed.load(Ordering::Relaxed) as i64,
                    completed as i64,
                    failed as i64,
                    skipped as i64,
                )
                .await
            {
                error!(target: "pipeline", %err, "failed to persist scan summary");
            }

            *shared.run.write() = None;
            shared.mark_dirty();
            broadcaster.publish(build_snapshot(&shared, started_at));
            info!(target: "pipeline", scan = %run.id, cancelled, completed, failed, skipped, "scan finished");
        });

        Ok(scan_id)
    }

    /// Cooperative stop: discovery stops emitting, workers drain, rows that
    /// had not committed stay pending.
    pub fn stop_scan(&self) -> Result<ScanRunId> {
        let guard = self.shared.run.read();
        match guard.as_ref() {
            Some(run) => {
                run.cancel.cancel();
                info!(target: "pipeline", scan = %run.id, "scan cancellation requested");
                Ok(run.id)
            }
            None => Err(IndexError::NotFound("no active scan".into())),
        }
    }

    /// Destructive: truncate all derived rows and artifacts. The photo root
    /// is untouched; the next scan redoes every stage.
    pub async fn clear_index(&self) -> Result<()> {
        if self.shared.run.read().is_some() {
            return Err(IndexError::ScanAlreadyRunning);
        }
        self.cx.catalog.clear_derived().await?;
        self.cx.artifacts.clear().await?;
        self.cx.dedup.clear();
        self.cx.persons.clear();
        self.shared.reset_counters();
        self.shared.mark_dirty();
        Ok(())
    }

    /// Watcher entry point: feed one changed path into the same discovery
    /// queue the full walk uses.
    pub async fn notify_change(&self, path: PathBuf) {
        self.shared.discovery_pending.fetch_add(1, Ordering::Relaxed);
        if self.shared.discovery_tx.send(path).await.is_err() {
            self.shared.discovery_pending.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Explicit trigger for the batch barrier stage.
    pub async fn detect_events_now(&self) -> Result<usize> {
        run_event_detection(&self.cx.catalog).await
    }

    pub fn snapshot(&self) -> PipelineStats {
        build_snapshot(&self.shared, self.started_at)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineStats> {
        self.broadcaster.subscribe()
    }

    /// The static DAG, as data for the UI.
    pub fn flow(&self) -> PipelineFlow {
        let mut nodes = vec![FlowNode {
            id: "discovery".into(),
            workers: self.config.io_workers,
        }];
        let mut edges = Vec::new();
        for stage in Stage::ALL {
            nodes.push(FlowNode {
                id: stage.name().into(),
                workers: self.config.workers_for(stage),
            });
            for next in stage.downstream() {
                edges.push(FlowEdge {
                    from: stage.name().into(),
                    to: next.name().into(),
                });
            }
            if stage.downstream().is_empty() {
                edges.push(FlowEdge {
                    from: stage.name().into(),
                    to: "events".into(),
                });
            }
        }
        for root in DISCOVERY_DOWNSTREAM {
            edges.push(FlowEdge {
                from: "discovery".into(),
                to: root.name().into(),
            });
        }
        nodes.push(FlowNode {
            id: "events".into(),
            workers: 1,
        });
        PipelineFlow { nodes, edges }
    }

    pub fn is_running(&self) -> bool {
        self.shared.run.read().is_some()
    }

    /// Items sitting in the discovery queue (test hook).
    #[cfg(test)]
    pub(crate) fn discovery_queue_depth(&self) -> i64 {
        self.shared.discovery_pending.load(Ordering::Relaxed)
    }

    pub async fn shutdown(&self) {
        info!(target: "pipeline", "shutting down");
        self.shared.shutdown.cancel();
        let handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(30), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(target: "pipeline", %err, "worker task failed"),
                Err(_) => warn!(target: "pipeline", "worker task timed out during shutdown"),
            }
        }
    }
}

fn build_snapshot(shared: &Shared, started_at: Instant) -> PipelineStats {
    let mut stages = BTreeMap::new();
    let mut bottleneck: Option<(Stage, f64)> = None;
    for stage in Stage::ALL {
        let counters = shared.counters(stage).snapshot();
        if counters.pending > 0 {
            let ratio = counters.pending as f64 / (counters.completed + 1) as f64;
            if bottleneck.map(|(_, best)| ratio > best).unwrap_or(true) {
                bottleneck = Some((stage, ratio));
            }
        }
        stages.insert(stage.name().to_string(), counters);
    }

    let scan = shared.run.read().as_ref().map(|run| ScanRunSummary {
        id: run.id,
        started_at: run.started_at,
        finished_at: None,
        cancelled: run.cancel.is_cancelled(),
        discovered: shared.discovered.load(Ordering::Relaxed),
        hashed: shared.hashed.load(Ordering::Relaxed),
        completed: stages.values().map(|c| c.completed).sum(),
        failed: stages.values().map(|c| c.failed).sum(),
        skipped: stages.values().map(|c| c.skipped).sum(),
    });

    PipelineStats {
        running: scan.is_some(),
        discovered: shared.discovered.load(Ordering::Relaxed),
        completed: stages.values().map(|c| c.completed).sum(),
        failed: stages.values().map(|c| c.failed).sum(),
        skipped: stages.values().map(|c| c.skipped).sum(),
        uptime_secs: started_at.elapsed().as_secs(),
        bottleneck: bottleneck.map(|(stage, _)| stage),
        stages,
        active: shared
            .active
            .iter()
            .map(|entry| ActiveWork {
                stage: entry.key().0,
                path: entry.value().clone(),
            })
            .collect(),
        scan,
    }
}

async fn run_discovery_worker(
    shared: Arc<Shared>,
    cx: Arc<StageContext>,
    rx: Arc<Mutex<mpsc::Receiver<PathBuf>>>,
    worker_id: usize,
) {
    loop {
        let item = {
            let mut guard = rx.lock().await;
            tokio::select! {
                _ = shared.shutdown.cancelled() => {
                    debug!(target: "discovery", worker_id, "discovery worker shutting down");
                    return;
                }
                item = guard.recv() => item,
            }
        };
        let Some(path) = item else { return };

        handle_discovered(&shared, &cx, &path).await;

        // The discovery count is only released after downstream queues have
        // been fed, so the drain check never sees a transient all-zero.
        shared.discovery_pending.fetch_sub(1, Ordering::Relaxed);
        shared.mark_dirty();
    }
}

async fn handle_discovered(shared: &Shared, cx: &StageContext, path: &std::path::Path) {
    if shared.run_cancelled() {
        return;
    }

    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return,
        Err(err) => {
            debug!(target: "discovery", path = %path.display(), %err, "stat failed");
            return;
        }
    };
    let size = metadata.len() as i64;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    match cx.catalog.upsert_file(path, size, mtime, mime_for(path)).await {
        Ok(outcome) => {
            shared.discovered.fetch_add(1, Ordering::Relaxed);
            if outcome.hashed {
                shared.hashed.fetch_add(1, Ordering::Relaxed);
            }
            if !outcome.fully_done {
                for stage in DISCOVERY_DOWNSTREAM {
                    shared.enqueue(*stage, outcome.id.clone()).await;
                }
            }
        }
        Err(err) => {
            warn!(target: "discovery", path = %path.display(), %err, "upsert failed");
        }
    }
}
