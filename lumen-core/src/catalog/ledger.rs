//! Work-ledger reads and writes. A stage executes for a file iff its row is
//! absent, pending, or failed with attempts remaining; `done`, `skipped` and
//! exhausted `failed` are terminal at a given stage version.

use lumen_model::{FileId, LedgerRow, Stage, StageStatus};

use super::{now_ts, CatalogStore};
use crate::error::Result;

impl CatalogStore {
    /// Atomic ledger write. `attempts` is the caller's cumulative body
    /// attempt count for this row (retries happen inside one worker pass).
    pub async fn mark_stage(
        &self,
        file_id: &FileId,
        stage: Stage,
        status: StageStatus,
        attempts: i64,
        error: Option<&str>,
    ) -> Result<()> {
        let completed_at = status.is_terminal().then(now_ts);
        sqlx::query(
            "INSERT INTO work_ledger (file_id, stage, status, attempts, stage_version, last_error, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (file_id, stage) DO UPDATE SET \
               status = excluded.status, \
               attempts = excluded.attempts, \
               stage_version = excluded.stage_version, \
               last_error = excluded.last_error, \
               completed_at = excluded.completed_at",
        )
        .bind(file_id)
        .bind(stage.name())
        .bind(status.as_str())
        .bind(attempts)
        .bind(stage.version())
        .bind(error)
        .bind(completed_at)
        .execute(self.writer())
        .await?;
        Ok(())
    }

    /// Whether `stage` must run for `file_id`. A stored stage-version that
    /// differs from the current one invalidates the row (it is cleared) and
    /// the stage runs again.
    pub async fn stage_needed(&self, file_id: &FileId, stage: Stage) -> Result<bool> {
        let row: Option<(String, i64, i32)> = sqlx::query_as(
            "SELECT status, attempts, stage_version FROM work_ledger \
             WHERE file_id = ? AND stage = ?",
        )
        .bind(file_id)
        .bind(stage.name())
        .fetch_optional(self.reader())
        .await?;

        let Some((status, attempts, version)) = row else {
            return Ok(true);
        };

        if version != stage.version() {
            sqlx::query("DELETE FROM work_ledger WHERE file_id = ? AND stage = ?")
                .bind(file_id)
                .bind(stage.name())
                .execute(self.writer())
                .await?;
            return Ok(true);
        }

        Ok(match StageStatus::from_str(&status) {
            Some(StageStatus::Pending) => true,
            Some(StageStatus::Failed) => attempts < stage.max_attempts(),
            Some(StageStatus::InFlight) => false,
            Some(StageStatus::Done) | Some(StageStatus::Skipped) => false,
            None => true,
        })
    }

    /// Raw ledger status for a (file, stage) pair.
    pub async fn stage_status(&self, file_id: &FileId, stage: Stage) -> Result<Option<StageStatus>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM work_ledger WHERE file_id = ? AND stage = ?")
                .bind(file_id)
                .bind(stage.name())
                .fetch_optional(self.reader())
                .await?;
        Ok(row.and_then(|(status,)| StageStatus::from_str(&status)))
    }

    /// Current attempt count for a (file, stage) row, 0 when absent.
    pub async fn stage_attempts(&self, file_id: &FileId, stage: Stage) -> Result<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT attempts FROM work_ledger WHERE file_id = ? AND stage = ?")
                .bind(file_id)
                .bind(stage.name())
                .fetch_optional(self.reader())
                .await?;
        Ok(row.map(|(a,)| a).unwrap_or(0))
    }

    pub async fn ledger_rows(&self, file_id: &FileId) -> Result<Vec<LedgerRow>> {
        Ok(sqlx::query_as(
            "SELECT file_id, stage, status, attempts, stage_version, last_error, completed_at \
             FROM work_ledger WHERE file_id = ? ORDER BY stage",
        )
        .bind(file_id)
        .fetch_all(self.reader())
        .await?)
    }

    /// Failed items for one stage, with their paths, for the UI's failure
    /// inspection list.
    pub async fn failed_items(&self, stage: Stage, limit: i64) -> Result<Vec<(String, String)>> {
        Ok(sqlx::query_as(
            "SELECT f.path, COALESCE(l.last_error, '') FROM work_ledger l \
             JOIN files f ON f.id = l.file_id \
             WHERE l.stage = ? AND l.status = 'failed' \
             ORDER BY l.completed_at DESC LIMIT ?",
        )
        .bind(stage.name())
        .bind(limit)
        .fetch_all(self.reader())
        .await?)
    }

    /// Per-stage terminal counts across the whole ledger.
    pub async fn ledger_totals(&self) -> Result<Vec<(String, String, i64)>> {
        Ok(sqlx::query_as(
            "SELECT stage, status, COUNT(*) FROM work_ledger GROUP BY stage, status",
        )
        .fetch_all(self.reader())
        .await?)
    }
}
