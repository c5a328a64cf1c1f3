//! Perceptual hashing: three 64-bit fingerprints from a low-resolution
//! decode, then a union-find update so Hamming-close files land in the same
//! duplicate group.

use async_trait::async_trait;
use image::DynamicImage;
use image_hasher::{HashAlg, HasherConfig};
use lumen_model::{PhotoFile, Stage};
use tracing::trace;

use super::{StageContext, StageOp};
use crate::error::{IndexError, Result};

#[derive(Debug)]
pub struct PhashStage;

/// The three fingerprints of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprints {
    pub phash: u64,
    pub ahash: u64,
    pub dhash: u64,
}

/// 8×8 → 64-bit hashes. pHash is the DCT-preprocessed mean hash, aHash the
/// plain mean, dHash the gradient.
pub fn fingerprints(image: &DynamicImage) -> Fingerprints {
    let phash = HasherConfig::new()
        .hash_size(8, 8)
        .hash_alg(HashAlg::Mean)
        .preproc_dct()
        .to_hasher()
        .hash_image(image);
    let ahash = HasherConfig::new()
        .hash_size(8, 8)
        .hash_alg(HashAlg::Mean)
        .to_hasher()
        .hash_image(image);
    let dhash = HasherConfig::new()
        .hash_size(8, 8)
        .hash_alg(HashAlg::Gradient)
        .to_hasher()
        .hash_image(image);

    Fingerprints {
        phash: bits64(phash.as_bytes()),
        ahash: bits64(ahash.as_bytes()),
        dhash: bits64(dhash.as_bytes()),
    }
}

fn bits64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    for (slot, byte) in buf.iter_mut().zip(bytes.iter()) {
        *slot = *byte;
    }
    u64::from_le_bytes(buf)
}

#[async_trait]
impl StageOp for PhashStage {
    fn stage(&self) -> Stage {
        Stage::Phash
    }

    async fn run(&self, cx: &StageContext, file: &PhotoFile, attempts: i64) -> Result<()> {
        let bytes = tokio::fs::read(&file.path).await?;
        let prints = tokio::task::spawn_blocking(move || -> Result<Fingerprints> {
            let decoded = image::load_from_memory(&bytes)
                .map_err(|e| IndexError::Decode(e.to_string()))?;
            // Hashing normalises to 8x8 anyway; a 256px copy keeps the DCT
            // preprocess cheap on large originals.
            let small = decoded.thumbnail(256, 256);
            Ok(fingerprints(&small))
        })
        .await
        .map_err(|e| IndexError::Internal(format!("phash task panicked: {e}")))??;

        let assignments = cx.dedup.insert(file.id.clone(), prints.phash);
        let own_group = assignments
            .iter()
            .find(|(member, _)| member == &file.id)
            .map(|(_, group)| group.clone())
            .unwrap_or_else(|| file.id.clone());

        trace!(
            target: "stage::phash",
            path = %file.path,
            phash = format_args!("{:016x}", prints.phash),
            group = %own_group,
        );

        cx.catalog
            .write_phash(
                &file.id,
                prints.phash as i64,
                prints.ahash as i64,
                prints.dhash as i64,
                &own_group,
                attempts,
            )
            .await?;

        // Members whose representative changed because groups merged.
        let others: Vec<_> = assignments
            .into_iter()
            .filter(|(member, _)| member != &file.id)
            .collect();
        cx.catalog.reassign_dup_groups(&others).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::{hamming, HAMMING_THRESHOLD};
    use image::RgbImage;

    fn scene(width: u32, height: u32) -> DynamicImage {
        // A smooth two-tone scene so resized copies hash alike.
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            if (x * 2) < width && (y * 3) < height * 2 {
                image::Rgb([220, 180, 40])
            } else {
                image::Rgb([20, 40, (200 * x / width.max(1)) as u8])
            }
        }))
    }

    #[test]
    fn resized_copies_hash_within_threshold() {
        let original = scene(640, 480);
        let resized = scene(320, 240);
        let a = fingerprints(&original);
        let b = fingerprints(&resized);
        assert!(
            hamming(a.phash, b.phash) <= HAMMING_THRESHOLD,
            "distance {}",
            hamming(a.phash, b.phash)
        );
    }

    #[test]
    fn different_scenes_hash_apart() {
        let a = fingerprints(&scene(640, 480));
        let inverted = DynamicImage::ImageRgb8(RgbImage::from_fn(640, 480, |x, y| {
            image::Rgb([(x % 7 * 36) as u8, (y % 5 * 50) as u8, ((x + y) % 256) as u8])
        }));
        let b = fingerprints(&inverted);
        assert!(hamming(a.phash, b.phash) > HAMMING_THRESHOLD);
    }

    #[test]
    fn fingerprints_are_deterministic() {
        let img = scene(100, 100);
        assert_eq!(fingerprints(&img), fingerprints(&img));
    }
}
