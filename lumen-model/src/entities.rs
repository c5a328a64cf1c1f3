use serde::{Deserialize, Serialize};

use crate::ids::{EventId, FaceId, FileId, PersonId, TagId};

/// A catalog file row. The identifier is the content hash; the path is where
/// the file currently lives and may change under the same identifier.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PhotoFile {
    pub id: FileId,
    pub path: String,
    pub size: i64,
    /// Last-modified time, unix seconds.
    pub mtime: i64,
    pub mime: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    /// Capture timestamp from EXIF, unix seconds.
    pub taken_at: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub caption: Option<String>,
    pub favorite: bool,
    pub has_motion: bool,
    /// Artifact-relative path of the extracted motion clip, or the absolute
    /// path of a sidecar video.
    pub motion_video: Option<String>,
    /// Set by the startup reconcile when the on-disk path has disappeared.
    pub missing: bool,
    pub created_at: i64,
    pub indexed_at: Option<i64>,
}

/// Camera metadata extracted from the file header. 0..1 per file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExifRecord {
    pub file_id: FileId,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens: Option<String>,
    pub focal_length: Option<f64>,
    pub aperture: Option<f64>,
    pub shutter: Option<String>,
    pub iso: Option<i64>,
    pub orientation: Option<i64>,
}

/// Resolved place for a geotagged file. 0..1 per file.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LocationRecord {
    pub file_id: FileId,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ThumbnailRecord {
    pub file_id: FileId,
    /// Longest-edge pixel budget: one of 200, 600, 1200.
    pub size: i64,
    /// Artifact-store-relative path.
    pub path: String,
    pub width: i64,
    pub height: i64,
}

/// Three 64-bit perceptual fingerprints, stored as i64 bit patterns.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PhashRecord {
    pub file_id: FileId,
    pub phash: i64,
    pub ahash: i64,
    pub dhash: i64,
    /// Representative file id of the duplicate group this file belongs to.
    pub dup_group: Option<FileId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FaceRecord {
    pub id: FaceId,
    pub file_id: FileId,
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    /// 512 × f32, little-endian.
    #[serde(skip_serializing)]
    pub embedding: Vec<u8>,
    pub person_id: Option<PersonId>,
    pub crop_path: Option<String>,
}

impl FaceRecord {
    pub fn embedding_f32(&self) -> Vec<f32> {
        self.embedding
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PersonRecord {
    pub id: PersonId,
    pub name: Option<String>,
    pub cover_face_id: Option<FaceId>,
    pub face_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TagRecord {
    pub id: TagId,
    pub label: String,
}

/// A temporal+spatial cluster of files used for browsing.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventRecord {
    pub id: EventId,
    pub name: String,
    pub started_at: i64,
    pub ended_at: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub cover_file_id: Option<FileId>,
    pub file_count: i64,
}

/// One equivalence class under Hamming-closeness of perceptual hashes.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub group_id: FileId,
    pub files: Vec<PhotoFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanRunRecord {
    pub id: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub cancelled: bool,
    pub discovered: i64,
    pub hashed: i64,
    pub completed: i64,
    pub failed: i64,
    pub skipped: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_round_trips() {
        let embedding: Vec<f32> = (0..512).map(|i| i as f32 / 512.0).collect();
        let face = FaceRecord {
            id: FaceId(1),
            file_id: FileId::from_hex("ab"),
            x: 0,
            y: 0,
            w: 10,
            h: 10,
            embedding: FaceRecord::encode_embedding(&embedding),
            person_id: None,
            crop_path: None,
        };
        assert_eq!(face.embedding_f32(), embedding);
    }
}
