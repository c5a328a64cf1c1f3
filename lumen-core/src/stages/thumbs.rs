//! Thumbnail generation: full decode, EXIF orientation, longest-edge resize
//! to the three UI sizes, lossy JPEG re-encode into the artifact store.
//! Non-decodable files are skipped (and so is everything downstream that
//! needs pixels).

use async_trait::async_trait;
use image::DynamicImage;
use lumen_model::{PhotoFile, Stage, ThumbnailRecord};
use tracing::trace;

use super::{StageContext, StageOp};
use crate::artifacts::ArtifactKind;
use crate::error::{IndexError, Result};

pub const THUMBNAIL_SIZES: [u32; 3] = [200, 600, 1200];
const JPEG_QUALITY: u8 = 82;

#[derive(Debug)]
pub struct ThumbnailStage;

#[async_trait]
impl StageOp for ThumbnailStage {
    fn stage(&self) -> Stage {
        Stage::Thumbnails
    }

    async fn run(&self, cx: &StageContext, file: &PhotoFile, attempts: i64) -> Result<()> {
        let bytes = tokio::fs::read(&file.path).await?;

        let rendered = tokio::task::spawn_blocking(move || -> Result<_> {
            let orientation = super::exif::orientation_from_bytes(&bytes).unwrap_or(1);
            let decoded = image::load_from_memory(&bytes)
                .map_err(|e| IndexError::Decode(e.to_string()))?;
            let oriented = apply_orientation(decoded, orientation);
            let (width, height) = (oriented.width(), oriented.height());

            let mut outputs = Vec::with_capacity(THUMBNAIL_SIZES.len());
            for size in THUMBNAIL_SIZES {
                let thumb = if width.max(height) > size {
                    oriented.thumbnail(size, size)
                } else {
                    oriented.clone()
                };
                outputs.push((size, thumb.width(), thumb.height(), encode_jpeg(&thumb)?));
            }
            Ok((width, height, outputs))
        })
        .await
        .map_err(|e| IndexError::Internal(format!("thumbnail task panicked: {e}")))??;

        let (width, height, outputs) = rendered;
        let mut records = Vec::with_capacity(outputs.len());
        for (size, thumb_w, thumb_h, jpeg) in outputs {
            let relative = cx
                .artifacts
                .write(&file.id, ArtifactKind::Thumbnail { size }, &jpeg)
                .await?;
            records.push(ThumbnailRecord {
                file_id: file.id.clone(),
                size: size as i64,
                path: relative,
                width: thumb_w as i64,
                height: thumb_h as i64,
            });
        }

        trace!(target: "stage::thumbnails", path = %file.path, width, height);
        cx.catalog
            .write_thumbnail_meta(&file.id, &records, width as i64, height as i64, attempts)
            .await
    }
}

/// Fold the eight EXIF orientation values into rotations and flips.
pub fn apply_orientation(image: DynamicImage, orientation: i64) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

pub fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .map_err(|e| IndexError::Decode(format!("jpeg encode failed: {e}")))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    #[test]
    fn orientation_six_rotates_quarter_turn() {
        let img = gradient(40, 20);
        let rotated = apply_orientation(img, 6);
        assert_eq!((rotated.width(), rotated.height()), (20, 40));
    }

    #[test]
    fn orientation_one_is_identity() {
        let img = gradient(40, 20);
        let same = apply_orientation(img, 1);
        assert_eq!((same.width(), same.height()), (40, 20));
    }

    #[test]
    fn encode_produces_decodable_jpeg() {
        let jpeg = encode_jpeg(&gradient(32, 32)).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let img = gradient(100, 60);
        // thumbnail() at 200 would keep the original dimensions; mirror the
        // stage's guard here.
        let thumb = if img.width().max(img.height()) > 200 {
            img.thumbnail(200, 200)
        } else {
            img.clone()
        };
        assert_eq!((thumb.width(), thumb.height()), (100, 60));
    }
}
