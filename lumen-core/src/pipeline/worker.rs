//! The uniform stage worker: dequeue, precondition fast path, retry with
//! capped backoff, terminal ledger status, fan-out. Stage bodies know
//! nothing about any of this.

use std::sync::Arc;
use std::time::Duration;

use lumen_model::{FileId, Stage, StageStatus};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::supervisor::Shared;
use crate::error::{FailureKind, IndexError};
use crate::stages::{StageContext, StageOp};

const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_CAP_MS: u64 = 5_000;

pub(crate) async fn run_stage_worker(
    shared: Arc<Shared>,
    cx: Arc<StageContext>,
    op: Arc<dyn StageOp>,
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<FileId>>>,
) {
    let stage = op.stage();
    loop {
        let item = {
            let mut guard = rx.lock().await;
            tokio::select! {
                _ = shared.shutdown.cancelled() => {
                    debug!(target: "pipeline", %stage, worker_id, "worker shutting down");
                    return;
                }
                item = guard.recv() => item,
            }
        };
        let Some(file_id) = item else {
            return; // channel closed
        };

        // In-flight goes up before pending comes down so the supervisor's
        // drain check never sees a transient all-zero during the handoff.
        shared.counters(stage).in_flight_inc();
        shared.counters(stage).pending_dec();
        process_one(&shared, &cx, op.as_ref(), stage, worker_id, &file_id).await;
        shared.counters(stage).in_flight_dec();
        shared.active.remove(&(stage, worker_id));
        shared.mark_dirty();
    }
}

async fn process_one(
    shared: &Shared,
    cx: &StageContext,
    op: &dyn StageOp,
    stage: Stage,
    worker_id: usize,
    file_id: &FileId,
) {
    // Cooperative cancellation: an item dequeued after stop keeps whatever
    // ledger state it had; the next run picks it up.
    if shared.run_cancelled() {
        return;
    }

    let file = match cx.catalog.get_file(file_id).await {
        Ok(Some(file)) => file,
        Ok(None) => {
            warn!(target: "pipeline", %stage, %file_id, "file vanished from catalog");
            return;
        }
        Err(err) => {
            error!(target: "pipeline", %stage, %file_id, %err, "catalog read failed");
            return;
        }
    };

    // The "already done" fast path: emit downstream without work.
    match cx.catalog.stage_needed(file_id, stage).await {
        Ok(true) => {}
        Ok(false) => {
            // A row another worker holds in-flight fans out when it
            // commits; emitting here would let dependents observe
            // uncommitted upstream state.
            let in_flight = matches!(
                cx.catalog.stage_status(file_id, stage).await,
                Ok(Some(StageStatus::InFlight))
            );
            if !in_flight {
                fan_out(shared, stage, file_id).await;
            }
            return;
        }
        Err(err) => {
            error!(target: "pipeline", %stage, %file_id, %err, "stage_needed failed");
            return;
        }
    }

    shared.active.insert((stage, worker_id), file.path.clone());

    let base_attempts = cx
        .catalog
        .stage_attempts(file_id, stage)
        .await
        .unwrap_or(0);
    if let Err(err) = cx
        .catalog
        .mark_stage(file_id, stage, StageStatus::InFlight, base_attempts, None)
        .await
    {
        error!(target: "pipeline", %stage, %file_id, %err, "failed to mark in-flight");
        return;
    }
    shared.mark_dirty();

    let mut attempt = 0i64;
    loop {
        attempt += 1;
        let total_attempts = base_attempts + attempt;

        if shared.run_cancelled() {
            demote(cx, file_id, stage, base_attempts).await;
            return;
        }

        match op.run(cx, &file, total_attempts).await {
            Ok(()) => {
                shared.counters(stage).completed_inc();
                break;
            }
            Err(err) => match err.failure_kind() {
                FailureKind::Transient => {
                    if total_attempts >= stage.max_attempts() {
                        warn!(target: "pipeline", %stage, path = %file.path, %err, "stage failed permanently");
                        mark(cx, file_id, stage, StageStatus::Failed, total_attempts, Some(&err)).await;
                        shared.counters(stage).failed_inc();
                        break;
                    }
                    let delay = BACKOFF_BASE_MS
                        .saturating_mul(1 << (attempt - 1).min(6))
                        .min(BACKOFF_CAP_MS);
                    debug!(target: "pipeline", %stage, path = %file.path, %err, delay_ms = delay, "transient failure, backing off");
                    tokio::select! {
                        _ = shared.shutdown.cancelled() => {
                            demote(cx, file_id, stage, total_attempts).await;
                            return;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                    }
                }
                FailureKind::Decode => {
                    info!(target: "pipeline", %stage, path = %file.path, %err, "unreadable input, skipping");
                    mark(cx, file_id, stage, StageStatus::Skipped, total_attempts, Some(&err)).await;
                    shared.counters(stage).skipped_inc();
                    break;
                }
                FailureKind::MissingPrecondition => {
                    // Silent by design: no GPS, no thumbnail, nothing to do.
                    mark(cx, file_id, stage, StageStatus::Skipped, total_attempts, None).await;
                    shared.counters(stage).skipped_inc();
                    break;
                }
                FailureKind::ExternalDisabled => {
                    mark(cx, file_id, stage, StageStatus::Skipped, total_attempts, Some(&err)).await;
                    shared.counters(stage).skipped_inc();
                    break;
                }
                FailureKind::Cancelled => {
                    demote(cx, file_id, stage, base_attempts).await;
                    return;
                }
            },
        }
    }

    // Every terminal status fans out, so dependents can make their own
    // skip decisions instead of waiting forever.
    fan_out(shared, stage, file_id).await;
}

async fn mark(
    cx: &StageContext,
    file_id: &FileId,
    stage: Stage,
    status: StageStatus,
    attempts: i64,
    error: Option<&IndexError>,
) {
    let rendered = error.map(|e| e.to_string());
    if let Err(err) = cx
        .catalog
        .mark_stage(file_id, stage, status, attempts, rendered.as_deref())
        .await
    {
        error!(target: "pipeline", %stage, %file_id, %err, "ledger write failed");
    }
}

/// Interrupted before commit: the row goes back to pending so the next run
/// resumes exactly this work.
async fn demote(cx: &StageContext, file_id: &FileId, stage: Stage, attempts: i64) {
    mark(cx, file_id, stage, StageStatus::Pending, attempts, None).await;
}

async fn fan_out(shared: &Shared, stage: Stage, file_id: &FileId) {
    for next in stage.downstream() {
        shared.enqueue(*next, file_id.clone()).await;
    }
}
