//! The catalog store: one SQLite database holding per-file records, derived
//! artifacts metadata, and the per-stage work ledger.
//!
//! Concurrency discipline: a write pool of exactly one connection serialises
//! all mutation; reads go through a separate pool and never block writes
//! (WAL). Every commit is fsync-durable (`synchronous=FULL`) before the call
//! returns, which is what makes the ledger trustworthy across crashes.

mod files;
mod ledger;
mod queries;
mod writers;

pub use files::UpsertOutcome;
pub use queries::{CatalogStats, PhotoFilter, PhotoDetail, TimelineBucket};
pub use writers::NewFace;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

use crate::error::Result;

pub struct CatalogStore {
    read: SqlitePool,
    write: SqlitePool,
}

impl std::fmt::Debug for CatalogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogStore")
            .field("read_pool_size", &self.read.size())
            .field("write_pool_size", &self.write.size())
            .finish()
    }
}

impl CatalogStore {
    /// Open (creating if necessary) the catalog database and run pending
    /// migrations.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));

        let write = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;

        let read = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&write).await?;
        info!(target: "catalog", path = %db_path.display(), "catalog opened");

        Ok(Self { read, write })
    }

    pub fn reader(&self) -> &SqlitePool {
        &self.read
    }

    pub(crate) fn writer(&self) -> &SqlitePool {
        &self.write
    }

    /// One-shot startup sweep: any ledger row a previous process left
    /// `in_flight` is demoted to `pending` so the work is picked up again.
    pub async fn demote_in_flight(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE work_ledger SET status = 'pending' WHERE status = 'in_flight'")
            .execute(&self.write)
            .await?;
        let demoted = result.rows_affected();
        if demoted > 0 {
            info!(target: "catalog", demoted, "demoted in-flight ledger rows to pending");
        }
        Ok(demoted)
    }

    /// Lightweight startup reconcile: flag file rows whose on-disk path no
    /// longer exists. No hashing, no reprocessing.
    pub async fn mark_missing_paths(&self) -> Result<u64> {
        let paths: Vec<(String, String)> =
            sqlx::query_as("SELECT id, path FROM files WHERE missing = 0")
                .fetch_all(&self.read)
                .await?;

        let mut flagged = 0u64;
        for (id, path) in paths {
            if tokio::fs::metadata(&path).await.is_err() {
                sqlx::query("UPDATE files SET missing = 1 WHERE id = ?")
                    .bind(&id)
                    .execute(&self.write)
                    .await?;
                debug!(target: "catalog", %path, "flagged missing file");
                flagged += 1;
            }
        }
        Ok(flagged)
    }
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
