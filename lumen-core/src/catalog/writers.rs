//! Stage-specific result committers. Each one persists its results and marks
//! the ledger row `done` inside a single transaction, so a crash can never
//! leave a stage marked complete without its data (or the reverse).
//!
//! All committers are idempotent: writing equal content twice is a no-op,
//! different content replaces.

use lumen_model::{
    EventId, ExifRecord, FaceId, FileId, LocationRecord, PersonId, Stage, ThumbnailRecord,
};
use sqlx::{Sqlite, Transaction};
use tracing::info;

use super::{now_ts, CatalogStore};
use crate::error::Result;

/// A face detection ready to persist.
#[derive(Debug, Clone)]
pub struct NewFace {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    pub embedding: Vec<u8>,
    pub person_id: Option<PersonId>,
    pub crop_path: Option<String>,
}

async fn ledger_done(
    tx: &mut Transaction<'_, Sqlite>,
    file_id: &FileId,
    stage: Stage,
    attempts: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO work_ledger (file_id, stage, status, attempts, stage_version, last_error, completed_at) \
         VALUES (?, ?, 'done', ?, ?, NULL, ?) \
         ON CONFLICT (file_id, stage) DO UPDATE SET \
           status = 'done', attempts = excluded.attempts, \
           stage_version = excluded.stage_version, last_error = NULL, \
           completed_at = excluded.completed_at",
    )
    .bind(file_id)
    .bind(stage.name())
    .bind(attempts)
    .bind(stage.version())
    .bind(now_ts())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl CatalogStore {
    /// Commit EXIF results: the camera record plus the capture fields that
    /// live denormalised on the file row.
    #[allow(clippy::too_many_arguments)]
    pub async fn write_exif(
        &self,
        file_id: &FileId,
        record: &ExifRecord,
        taken_at: Option<i64>,
        latitude: Option<f64>,
        longitude: Option<f64>,
        altitude: Option<f64>,
        width: Option<i64>,
        height: Option<i64>,
        attempts: i64,
    ) -> Result<()> {
        let mut tx = self.writer().begin().await?;
        sqlx::query(
            "INSERT OR REPLACE INTO exif \
             (file_id, camera_make, camera_model, lens, focal_length, aperture, shutter, iso, orientation) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(file_id)
        .bind(&record.camera_make)
        .bind(&record.camera_model)
        .bind(&record.lens)
        .bind(record.focal_length)
        .bind(record.aperture)
        .bind(&record.shutter)
        .bind(record.iso)
        .bind(record.orientation)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE files SET taken_at = ?, latitude = ?, longitude = ?, altitude = ?, \
             width = COALESCE(?, width), height = COALESCE(?, height), indexed_at = ? \
             WHERE id = ?",
        )
        .bind(taken_at)
        .bind(latitude)
        .bind(longitude)
        .bind(altitude)
        .bind(width)
        .bind(height)
        .bind(now_ts())
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

        ledger_done(&mut tx, file_id, Stage::Exif, attempts).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn write_location(&self, location: &LocationRecord, attempts: i64) -> Result<()> {
        let mut tx = self.writer().begin().await?;
        sqlx::query(
            "INSERT OR REPLACE INTO locations \
             (file_id, latitude, longitude, altitude, country, city, address) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&location.file_id)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.altitude)
        .bind(&location.country)
        .bind(&location.city)
        .bind(&location.address)
        .execute(&mut *tx)
        .await?;

        ledger_done(&mut tx, &location.file_id, Stage::Geocode, attempts).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn write_thumbnail_meta(
        &self,
        file_id: &FileId,
        thumbs: &[ThumbnailRecord],
        width: i64,
        height: i64,
        attempts: i64,
    ) -> Result<()> {
        let mut tx = self.writer().begin().await?;
        for thumb in thumbs {
            sqlx::query(
                "INSERT OR REPLACE INTO thumbnails (file_id, size, path, width, height) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(file_id)
            .bind(thumb.size)
            .bind(&thumb.path)
            .bind(thumb.width)
            .bind(thumb.height)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE files SET width = COALESCE(width, ?), height = COALESCE(height, ?), \
             indexed_at = ? WHERE id = ?",
        )
        .bind(width)
        .bind(height)
        .bind(now_ts())
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

        ledger_done(&mut tx, file_id, Stage::Thumbnails, attempts).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn write_phash(
        &self,
        file_id: &FileId,
        phash: i64,
        ahash: i64,
        dhash: i64,
        dup_group: &FileId,
        attempts: i64,
    ) -> Result<()> {
        let mut tx = self.writer().begin().await?;
        sqlx::query(
            "INSERT OR REPLACE INTO phashes (file_id, phash, ahash, dhash, dup_group) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(file_id)
        .bind(phash)
        .bind(ahash)
        .bind(dhash)
        .bind(dup_group)
        .execute(&mut *tx)
        .await?;

        ledger_done(&mut tx, file_id, Stage::Phash, attempts).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Re-point group membership after a union merged existing groups.
    pub async fn reassign_dup_groups(&self, assignments: &[(FileId, FileId)]) -> Result<()> {
        if assignments.is_empty() {
            return Ok(());
        }
        let mut tx = self.writer().begin().await?;
        for (file_id, group) in assignments {
            sqlx::query("UPDATE phashes SET dup_group = ? WHERE file_id = ?")
                .bind(group)
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Commit face detections: replaces any prior detections for the file.
    pub async fn write_faces(
        &self,
        file_id: &FileId,
        faces: &[NewFace],
        attempts: i64,
    ) -> Result<Vec<FaceId>> {
        let mut tx = self.writer().begin().await?;
        sqlx::query("DELETE FROM faces WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        let mut ids = Vec::with_capacity(faces.len());
        for face in faces {
            let result = sqlx::query(
                "INSERT INTO faces (file_id, x, y, w, h, embedding, person_id, crop_path) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(file_id)
            .bind(face.x)
            .bind(face.y)
            .bind(face.w)
            .bind(face.h)
            .bind(&face.embedding)
            .bind(face.person_id)
            .bind(&face.crop_path)
            .execute(&mut *tx)
            .await?;
            ids.push(FaceId(result.last_insert_rowid()));
        }

        ledger_done(&mut tx, file_id, Stage::Faces, attempts).await?;
        tx.commit().await?;
        Ok(ids)
    }

    /// Replace the file's tag set with `labels`, creating vocabulary rows as
    /// needed.
    pub async fn write_tags(&self, file_id: &FileId, labels: &[String], attempts: i64) -> Result<()> {
        let mut tx = self.writer().begin().await?;
        sqlx::query("DELETE FROM file_tags WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        for label in labels {
            sqlx::query("INSERT OR IGNORE INTO tags (label) VALUES (?)")
                .bind(label)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT OR IGNORE INTO file_tags (file_id, tag_id) \
                 SELECT ?, id FROM tags WHERE label = ?",
            )
            .bind(file_id)
            .bind(label)
            .execute(&mut *tx)
            .await?;
        }

        ledger_done(&mut tx, file_id, Stage::Tagging, attempts).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn write_caption(
        &self,
        file_id: &FileId,
        caption: &str,
        attempts: i64,
    ) -> Result<()> {
        let mut tx = self.writer().begin().await?;
        sqlx::query("UPDATE files SET caption = ? WHERE id = ?")
            .bind(caption)
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        ledger_done(&mut tx, file_id, Stage::Caption, attempts).await?;
        tx.commit().await?;
        Ok(())
    }

    /// `video_path` is None when the file turned out to have no motion
    /// companion; the stage is still `done`.
    pub async fn write_motion_video(
        &self,
        file_id: &FileId,
        video_path: Option<&str>,
        attempts: i64,
    ) -> Result<()> {
        let mut tx = self.writer().begin().await?;
        sqlx::query("UPDATE files SET has_motion = ?, motion_video = ? WHERE id = ?")
            .bind(video_path.is_some())
            .bind(video_path)
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        ledger_done(&mut tx, file_id, Stage::MotionPhoto, attempts).await?;
        tx.commit().await?;
        Ok(())
    }

    // Person maintenance. Persons are re-derivable from faces, so these are
    // plain writes without ledger involvement.

    pub async fn create_person(&self, name: Option<&str>) -> Result<PersonId> {
        let result = sqlx::query("INSERT INTO persons (name) VALUES (?)")
            .bind(name)
            .execute(self.writer())
            .await?;
        Ok(PersonId(result.last_insert_rowid()))
    }

    pub async fn assign_faces_to_person(
        &self,
        assignments: &[(FaceId, PersonId)],
    ) -> Result<()> {
        if assignments.is_empty() {
            return Ok(());
        }
        let mut tx = self.writer().begin().await?;
        for (face_id, person_id) in assignments {
            sqlx::query("UPDATE faces SET person_id = ? WHERE id = ?")
                .bind(person_id)
                .bind(face_id)
                .execute(&mut *tx)
                .await?;
        }
        // Keep cover faces fresh and drop persons that lost all faces.
        sqlx::query(
            "UPDATE persons SET cover_face_id = \
             (SELECT MIN(id) FROM faces WHERE faces.person_id = persons.id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM persons WHERE cover_face_id IS NULL")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn rename_person(&self, person_id: PersonId, name: &str) -> Result<()> {
        sqlx::query("UPDATE persons SET name = ? WHERE id = ?")
            .bind(name)
            .bind(person_id)
            .execute(self.writer())
            .await?;
        Ok(())
    }

    /// Merge `source` into `target`: faces move over, source disappears.
    pub async fn merge_persons(&self, source: PersonId, target: PersonId) -> Result<()> {
        let mut tx = self.writer().begin().await?;
        sqlx::query("UPDATE faces SET person_id = ? WHERE person_id = ?")
            .bind(target)
            .bind(source)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM persons WHERE id = ?")
            .bind(source)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(target: "catalog", %source, %target, "merged persons");
        Ok(())
    }

    /// Replace the whole event set; events are re-derived wholesale from the
    /// batch detector.
    pub async fn replace_events(
        &self,
        events: &[(String, i64, i64, Option<f64>, Option<f64>, Option<FileId>, Vec<FileId>)],
    ) -> Result<()> {
        let mut tx = self.writer().begin().await?;
        sqlx::query("DELETE FROM event_files").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM events").execute(&mut *tx).await?;

        for (name, started_at, ended_at, latitude, longitude, cover, members) in events {
            let result = sqlx::query(
                "INSERT INTO events (name, started_at, ended_at, latitude, longitude, cover_file_id) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(name)
            .bind(started_at)
            .bind(ended_at)
            .bind(latitude)
            .bind(longitude)
            .bind(cover)
            .execute(&mut *tx)
            .await?;
            let event_id = EventId(result.last_insert_rowid());

            for member in members {
                sqlx::query("INSERT OR IGNORE INTO event_files (event_id, file_id) VALUES (?, ?)")
                    .bind(event_id)
                    .bind(member)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Destructive: drop every derived row and reset derived file columns.
    /// File identities survive, so a subsequent scan re-runs every stage
    /// without re-hashing unchanged content.
    pub async fn clear_derived(&self) -> Result<()> {
        let mut tx = self.writer().begin().await?;
        for table in [
            "work_ledger",
            "event_files",
            "events",
            "file_tags",
            "tags",
            "faces",
            "persons",
            "phashes",
            "thumbnails",
            "locations",
            "exif",
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "UPDATE files SET width = NULL, height = NULL, taken_at = NULL, latitude = NULL, \
             longitude = NULL, altitude = NULL, caption = NULL, has_motion = 0, \
             motion_video = NULL, indexed_at = NULL",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(target: "catalog", "cleared derived state");
        Ok(())
    }

    // Scan-run bookkeeping.

    pub async fn create_scan_run(&self, id: &str) -> Result<()> {
        sqlx::query("INSERT INTO scan_runs (id, started_at) VALUES (?, ?)")
            .bind(id)
            .bind(now_ts())
            .execute(self.writer())
            .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn finish_scan_run(
        &self,
        id: &str,
        cancelled: bool,
        discovered: i64,
        hashed: i64,
        completed: i64,
        failed: i64,
        skipped: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE scan_runs SET finished_at = ?, cancelled = ?, discovered = ?, hashed = ?, \
             completed = ?, failed = ?, skipped = ? WHERE id = ?",
        )
        .bind(now_ts())
        .bind(cancelled)
        .bind(discovered)
        .bind(hashed)
        .bind(completed)
        .bind(failed)
        .bind(skipped)
        .bind(id)
        .execute(self.writer())
        .await?;
        Ok(())
    }
}
