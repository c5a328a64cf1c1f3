//! Motion photo detection: an embedded MP4 container appended after the
//! image bytes (Android motion photos), or a same-basename sidecar video
//! next to the file (Apple Live Photos). The embedded case extracts the
//! trailer into the artifact store; the sidecar case records the sidecar
//! path without copying bytes.

use async_trait::async_trait;
use lumen_model::{PhotoFile, Stage};
use tracing::debug;

use super::{StageContext, StageOp};
use crate::artifacts::ArtifactKind;
use crate::error::Result;

/// An MP4 box header is 4 size bytes followed by the `ftyp` fourcc.
const FTYP: &[u8] = b"ftyp";
/// Ignore matches that would yield an implausibly small clip.
const MIN_CLIP_BYTES: usize = 4 * 1024;
const SIDECAR_EXTENSIONS: [&str; 4] = ["mov", "MOV", "mp4", "MP4"];

#[derive(Debug)]
pub struct MotionPhotoStage;

#[async_trait]
impl StageOp for MotionPhotoStage {
    fn stage(&self) -> Stage {
        Stage::MotionPhoto
    }

    async fn run(&self, cx: &StageContext, file: &PhotoFile, attempts: i64) -> Result<()> {
        let bytes = tokio::fs::read(&file.path).await?;

        if let Some(start) = embedded_video_offset(&bytes) {
            let clip = &bytes[start..];
            let relative = cx
                .artifacts
                .write(&file.id, ArtifactKind::MotionVideo, clip)
                .await?;
            debug!(
                target: "stage::motion_photo",
                path = %file.path,
                clip_bytes = clip.len(),
                "extracted embedded motion clip"
            );
            return cx
                .catalog
                .write_motion_video(&file.id, Some(&relative), attempts)
                .await;
        }

        if let Some(sidecar) = find_sidecar(std::path::Path::new(&file.path)).await {
            debug!(target: "stage::motion_photo", path = %file.path, sidecar = %sidecar, "found sidecar video");
            return cx
                .catalog
                .write_motion_video(&file.id, Some(&sidecar), attempts)
                .await;
        }

        cx.catalog.write_motion_video(&file.id, None, attempts).await
    }
}

/// Offset of the trailing MP4 container, if any: the last `ftyp` fourcc in
/// the tail, backed up over its 4 size bytes. The match must be past the
/// start (a bare .mp4 renamed to .jpg is not a motion *photo*) and leave a
/// plausible amount of video behind it.
pub fn embedded_video_offset(bytes: &[u8]) -> Option<usize> {
    let mut candidate = None;
    let mut at = 0usize;
    while at + FTYP.len() <= bytes.len() {
        match find(&bytes[at..], FTYP) {
            Some(rel) => {
                let pos = at + rel;
                if pos >= 4 {
                    candidate = Some(pos - 4);
                }
                at = pos + FTYP.len();
            }
            None => break,
        }
    }
    let start = candidate?;
    if start == 0 || bytes.len() - start < MIN_CLIP_BYTES {
        return None;
    }
    Some(start)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Same-basename video next to the image, Apple Live Photo style.
async fn find_sidecar(image_path: &std::path::Path) -> Option<String> {
    for ext in SIDECAR_EXTENSIONS {
        let candidate = image_path.with_extension(ext);
        if candidate != image_path && tokio::fs::metadata(&candidate).await.is_ok() {
            return Some(candidate.to_string_lossy().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg_with_trailer(clip_len: usize) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8]; // SOI
        bytes.extend(std::iter::repeat_n(0xAB, 1024)); // image payload
        bytes.extend([0xFF, 0xD9]); // EOI
        // MP4 box: 4-byte size then 'ftyp' then brand + padding.
        let start = bytes.len();
        bytes.extend((clip_len as u32).to_be_bytes());
        bytes.extend(FTYP);
        bytes.extend(b"isom");
        while bytes.len() - start < clip_len {
            bytes.push(0);
        }
        bytes
    }

    #[test]
    fn embedded_mp4_is_found_at_box_start() {
        let bytes = jpeg_with_trailer(MIN_CLIP_BYTES + 16);
        let start = embedded_video_offset(&bytes).unwrap();
        assert_eq!(&bytes[start + 4..start + 8], FTYP);
        // The clip starts right after the EOI marker.
        assert_eq!(&bytes[start - 2..start], &[0xFF, 0xD9]);
    }

    #[test]
    fn tiny_trailer_is_ignored() {
        let bytes = jpeg_with_trailer(64);
        assert_eq!(embedded_video_offset(&bytes), None);
    }

    #[test]
    fn plain_jpeg_has_no_clip() {
        let mut bytes = vec![0xFF, 0xD8];
        bytes.extend(std::iter::repeat_n(0x00, 8192));
        bytes.extend([0xFF, 0xD9]);
        assert_eq!(embedded_video_offset(&bytes), None);
    }

    #[test]
    fn bare_mp4_is_not_a_motion_photo() {
        // ftyp at offset 4 means the whole file is a video, not a photo
        // with a trailer.
        let mut bytes = 16u32.to_be_bytes().to_vec();
        bytes.extend(FTYP);
        bytes.extend(vec![0u8; MIN_CLIP_BYTES * 2]);
        assert_eq!(embedded_video_offset(&bytes), None);
    }

    #[tokio::test]
    async fn sidecar_video_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("IMG_0001.jpg");
        let video = dir.path().join("IMG_0001.mov");
        tokio::fs::write(&image, b"jpeg").await.unwrap();
        tokio::fs::write(&video, b"mov").await.unwrap();

        let found = find_sidecar(&image).await.unwrap();
        assert_eq!(found, video.to_string_lossy());
    }

    #[tokio::test]
    async fn no_sidecar_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("IMG_0002.jpg");
        tokio::fs::write(&image, b"jpeg").await.unwrap();
        assert_eq!(find_sidecar(&image).await, None);
    }
}
