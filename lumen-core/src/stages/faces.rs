//! Face detection and person assignment. The detector itself is a seam: an
//! implementation may wrap any embedded model, and the default build ships
//! the disabled detector (the stage is skipped). Everything around the seam
//! is real: crops, embeddings persistence, online centroid assignment, and
//! the bounded full re-cluster.

use async_trait::async_trait;
use image::DynamicImage;
use lumen_model::{PersonId, PhotoFile, Stage};
use tracing::debug;

use super::thumbs::encode_jpeg;
use super::{StageContext, StageOp};
use crate::artifacts::ArtifactKind;
use crate::catalog::NewFace;
use crate::error::{IndexError, Result};
use crate::persons::Assignment;

/// One detection: a bounding box in image coordinates plus the embedding
/// vector used for clustering.
#[derive(Debug, Clone)]
pub struct FaceDetection {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub embedding: Vec<f32>,
}

/// The face detector seam. Detection runs on a decoded medium-resolution
/// copy; implementations must be cheap to call when disabled.
pub trait FaceDetector: Send + Sync {
    fn is_enabled(&self) -> bool;
    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceDetection>>;
}

/// Default detector: no model bundled, stage marks itself skipped.
#[derive(Debug, Default)]
pub struct DisabledFaceDetector;

impl FaceDetector for DisabledFaceDetector {
    fn is_enabled(&self) -> bool {
        false
    }

    fn detect(&self, _image: &DynamicImage) -> Result<Vec<FaceDetection>> {
        Err(IndexError::External("face detector not available".into()))
    }
}

#[derive(Debug)]
pub struct FacesStage;

#[async_trait]
impl StageOp for FacesStage {
    fn stage(&self) -> Stage {
        Stage::Faces
    }

    async fn run(&self, cx: &StageContext, file: &PhotoFile, attempts: i64) -> Result<()> {
        if !cx.face_detector.is_enabled() {
            return Err(IndexError::External("face detector not available".into()));
        }

        // The medium thumbnail is the decoded copy this stage declares as
        // input; without it (non-decodable original) the stage is skipped.
        let Some(thumb) = cx.catalog.thumbnail_path(&file.id, 600).await? else {
            return Err(IndexError::NotFound("no medium thumbnail".into()));
        };
        let bytes = cx.artifacts.read(&thumb).await?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| IndexError::Decode(e.to_string()))?;

        let detections = cx.face_detector.detect(&image)?;
        debug!(target: "stage::faces", path = %file.path, count = detections.len());

        let mut new_faces = Vec::with_capacity(detections.len());
        for (index, detection) in detections.iter().enumerate() {
            let crop = image.crop_imm(detection.x, detection.y, detection.w, detection.h);
            let crop_jpeg = encode_jpeg(&crop)?;
            let crop_path = cx
                .artifacts
                .write(&file.id, ArtifactKind::FaceCrop { face_index: index }, &crop_jpeg)
                .await?;

            let person = match cx.persons.assign(&detection.embedding) {
                Assignment::Existing(person) => person,
                Assignment::NewPerson => cx.catalog.create_person(None).await?,
            };

            new_faces.push(NewFace {
                x: detection.x as i64,
                y: detection.y as i64,
                w: detection.w as i64,
                h: detection.h as i64,
                embedding: lumen_model::FaceRecord::encode_embedding(&detection.embedding),
                person_id: Some(person),
                crop_path: Some(crop_path),
            });
        }

        let face_ids = cx.catalog.write_faces(&file.id, &new_faces, attempts).await?;

        let mut recluster_due = false;
        for (face_id, (detection, new_face)) in face_ids
            .iter()
            .zip(detections.iter().zip(new_faces.iter()))
        {
            let person = new_face.person_id.expect("assigned above");
            recluster_due |= cx
                .persons
                .record(*face_id, detection.embedding.clone(), person);
        }

        if recluster_due {
            run_recluster(cx).await?;
        }
        Ok(())
    }
}

/// Full density-based re-cluster: placeholder ids are minted for brand-new
/// clusters, turned into catalog rows, remapped in the index, and the
/// face → person assignment is persisted.
pub async fn run_recluster(cx: &StageContext) -> Result<()> {
    let mut next_placeholder = -1i64;
    let assignments = cx.persons.recluster(|| {
        let placeholder = PersonId(next_placeholder);
        next_placeholder -= 1;
        placeholder
    });

    let mut resolved = Vec::with_capacity(assignments.len());
    let mut placeholder_map: std::collections::HashMap<PersonId, PersonId> = Default::default();
    for (face_id, person) in assignments {
        let person = if person.0 < 0 {
            match placeholder_map.get(&person) {
                Some(real) => *real,
                None => {
                    let real = cx.catalog.create_person(None).await?;
                    cx.persons.remap_person(person, real);
                    placeholder_map.insert(person, real);
                    real
                }
            }
        } else {
            person
        };
        resolved.push((face_id, person));
    }

    debug!(target: "stage::faces", faces = resolved.len(), "re-clustered persons");
    cx.catalog.assign_faces_to_person(&resolved).await
}
