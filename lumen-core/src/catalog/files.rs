//! File identity. The (path, size, mtime) probe is what makes repeat rescans
//! cheap: content bytes are only hashed when the triple misses.

use std::path::Path;

use lumen_model::{FileId, PhotoFile, Stage};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::{now_ts, CatalogStore};
use crate::error::Result;

/// Result of `upsert_file`: the identity plus what discovery needs to decide
/// whether to enqueue downstream work.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub id: FileId,
    /// A new File row was created.
    pub created: bool,
    /// The content bytes were actually read and hashed (triple-probe miss).
    pub hashed: bool,
    /// Every stage is terminal at its current version; nothing to enqueue.
    pub fully_done: bool,
}

impl CatalogStore {
    /// Compute or look up the identity of the file at `path`.
    ///
    /// The triple (path, size, mtime) is probed first; on a hit the stored
    /// identifier is returned without touching the file's bytes. Only on a
    /// miss is the content hashed and the identifier assigned or resolved.
    pub async fn upsert_file(
        &self,
        path: &Path,
        size: i64,
        mtime: i64,
        mime: &str,
    ) -> Result<UpsertOutcome> {
        let path_str = path.to_string_lossy().to_string();

        let probe: Option<(FileId,)> = sqlx::query_as(
            "SELECT id FROM files WHERE path = ? AND size = ? AND mtime = ? AND missing = 0",
        )
        .bind(&path_str)
        .bind(size)
        .bind(mtime)
        .fetch_optional(self.reader())
        .await?;

        if let Some((id,)) = probe {
            let fully_done = self.all_stages_settled(&id).await?;
            return Ok(UpsertOutcome {
                id,
                created: false,
                hashed: false,
                fully_done,
            });
        }

        let id = hash_file(path).await?;
        debug!(target: "catalog", path = %path_str, %id, "hashed file content");

        let existing: Option<(String,)> = sqlx::query_as("SELECT path FROM files WHERE id = ?")
            .bind(&id)
            .fetch_optional(self.reader())
            .await?;

        let created = existing.is_none();
        let mut tx = self.writer().begin().await?;

        // A different identifier may still own this path (content changed in
        // place); it no longer exists on disk under that identity.
        sqlx::query("UPDATE files SET missing = 1 WHERE path = ? AND id <> ?")
            .bind(&path_str)
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        if created {
            // Conflict-safe: two workers can race the same content arriving
            // under two paths; the second becomes a path refresh.
            sqlx::query(
                "INSERT INTO files (id, path, size, mtime, mime, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (id) DO UPDATE SET \
                   path = excluded.path, size = excluded.size, \
                   mtime = excluded.mtime, mime = excluded.mime, missing = 0",
            )
            .bind(&id)
            .bind(&path_str)
            .bind(size)
            .bind(mtime)
            .bind(mime)
            .bind(now_ts())
            .execute(&mut *tx)
            .await?;
        } else {
            // Same content seen under a new path or mtime; identity is the
            // join key, so just refresh where the bytes live.
            sqlx::query(
                "UPDATE files SET path = ?, size = ?, mtime = ?, mime = ?, missing = 0 \
                 WHERE id = ?",
            )
            .bind(&path_str)
            .bind(size)
            .bind(mtime)
            .bind(mime)
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let fully_done = if created {
            false
        } else {
            self.all_stages_settled(&id).await?
        };

        Ok(UpsertOutcome {
            id,
            created,
            hashed: true,
            fully_done,
        })
    }

    /// True when every stage has a terminal ledger row at its current
    /// version for this file.
    pub async fn all_stages_settled(&self, id: &FileId) -> Result<bool> {
        let rows: Vec<(String, String, i32)> =
            sqlx::query_as("SELECT stage, status, stage_version FROM work_ledger WHERE file_id = ?")
                .bind(id)
                .fetch_all(self.reader())
                .await?;

        for stage in Stage::ALL {
            let settled = rows.iter().any(|(name, status, version)| {
                name == stage.name()
                    && *version == stage.version()
                    && matches!(status.as_str(), "done" | "failed" | "skipped")
            });
            if !settled {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn get_file(&self, id: &FileId) -> Result<Option<PhotoFile>> {
        Ok(sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.reader())
            .await?)
    }

    /// Favorite toggle; involutive by construction.
    pub async fn set_favorite(&self, id: &FileId, favorite: bool) -> Result<()> {
        sqlx::query("UPDATE files SET favorite = ? WHERE id = ?")
            .bind(favorite)
            .bind(id)
            .execute(self.writer())
            .await?;
        Ok(())
    }
}

/// SHA-256 over the raw file bytes, streamed in 64 KiB chunks.
pub async fn hash_file(path: &Path) -> Result<FileId> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(FileId::from_hex(hex::encode(hasher.finalize())))
}
