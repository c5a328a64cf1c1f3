//! Content-addressed on-disk storage for derived blobs: thumbnails, face
//! crops, extracted motion clips. Paths are pure functions of the file
//! identifier plus artifact parameters, so re-running a stage overwrites the
//! same bytes and nothing ever collides.

use std::path::{Path, PathBuf};

use lumen_model::FileId;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Thumbnail { size: u32 },
    FaceCrop { face_index: usize },
    MotionVideo,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            root: data_root.into(),
        }
    }

    pub async fn ensure_directories(&self) -> Result<()> {
        for dir in ["thumbs", "faces", "motion_videos"] {
            tokio::fs::create_dir_all(self.root.join(dir)).await?;
        }
        Ok(())
    }

    /// Store-relative path for an artifact, e.g. `thumbs/ab/<id>_600.jpg`.
    pub fn relative_path(&self, id: &FileId, kind: ArtifactKind) -> String {
        let shard = id.shard();
        match kind {
            ArtifactKind::Thumbnail { size } => {
                format!("thumbs/{shard}/{id}_{size}.jpg")
            }
            ArtifactKind::FaceCrop { face_index } => {
                format!("faces/{shard}/{id}_{face_index}.jpg")
            }
            ArtifactKind::MotionVideo => format!("motion_videos/{shard}/{id}.mp4"),
        }
    }

    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Write artifact bytes via a temp file + rename, so readers never see a
    /// partial artifact and re-runs replace atomically.
    pub async fn write(&self, id: &FileId, kind: ArtifactKind, bytes: &[u8]) -> Result<String> {
        let relative = self.relative_path(id, kind);
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(relative)
    }

    pub async fn read(&self, relative: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.root.join(relative)).await?)
    }

    pub async fn exists(&self, relative: &str) -> bool {
        tokio::fs::metadata(self.root.join(relative)).await.is_ok()
    }

    /// Destructive: wipe every derived blob (clear-index support).
    pub async fn clear(&self) -> Result<()> {
        for dir in ["thumbs", "faces", "motion_videos"] {
            let path = self.root.join(dir);
            if tokio::fs::metadata(&path).await.is_ok() {
                tokio::fs::remove_dir_all(&path).await?;
            }
        }
        self.ensure_directories().await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> FileId {
        FileId::from_hex("abcdef0123456789")
    }

    #[test]
    fn artifact_paths_are_deterministic() {
        let store = ArtifactStore::new("/data");
        let a = store.relative_path(&id(), ArtifactKind::Thumbnail { size: 600 });
        let b = store.relative_path(&id(), ArtifactKind::Thumbnail { size: 600 });
        assert_eq!(a, b);
        assert_eq!(a, "thumbs/ab/abcdef0123456789_600.jpg");
        assert_eq!(
            store.relative_path(&id(), ArtifactKind::MotionVideo),
            "motion_videos/ab/abcdef0123456789.mp4"
        );
    }

    #[tokio::test]
    async fn write_then_read_round_trips_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.ensure_directories().await.unwrap();

        let kind = ArtifactKind::Thumbnail { size: 200 };
        let rel = store.write(&id(), kind, b"first").await.unwrap();
        assert_eq!(store.read(&rel).await.unwrap(), b"first");

        let rel2 = store.write(&id(), kind, b"second").await.unwrap();
        assert_eq!(rel, rel2);
        assert_eq!(store.read(&rel).await.unwrap(), b"second");
    }
}
