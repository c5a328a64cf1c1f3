//! End-to-end pipeline runs against a real photo tree in a temp directory:
//! fresh scan, idempotent rescan, near-duplicate grouping, cancel/resume,
//! and the disabled external stages.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, RgbImage};
use lumen_core::catalog::CatalogStore;
use lumen_core::{
    ArtifactStore, DisabledFaceDetector, PipelineConfig, PipelineSupervisor, StageContext,
    VisionClient,
};
use lumen_model::{Stage, StageStatus};
use tempfile::TempDir;

struct Harness {
    _data: TempDir,
    photos: TempDir,
    catalog: Arc<CatalogStore>,
    supervisor: Arc<PipelineSupervisor>,
}

async fn harness() -> Harness {
    let data = TempDir::new().unwrap();
    let photos = TempDir::new().unwrap();

    let catalog = Arc::new(
        CatalogStore::open(&data.path().join("db/lumen.db"))
            .await
            .unwrap(),
    );
    let artifacts = ArtifactStore::new(data.path());
    artifacts.ensure_directories().await.unwrap();

    let cx = StageContext {
        catalog: Arc::clone(&catalog),
        artifacts,
        dedup: Arc::new(lumen_core::dedup::DuplicateIndex::new()),
        persons: Arc::new(lumen_core::persons::PersonIndex::new()),
        vision: Arc::new(VisionClient::disabled()),
        face_detector: Arc::new(DisabledFaceDetector),
    };
    let supervisor = Arc::new(
        PipelineSupervisor::new(cx, photos.path().to_path_buf(), PipelineConfig::default())
            .await
            .unwrap(),
    );
    supervisor.start().await.unwrap();

    Harness {
        _data: data,
        photos,
        catalog,
        supervisor,
    }
}

fn scene(width: u32, height: u32) -> DynamicImage {
    tinted_scene(width, height, 0)
}

/// Same composition, tint-shifted so each variant has distinct bytes (and a
/// distinct content hash).
fn tinted_scene(width: u32, height: u32, tint: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        if (x * 2) < width && (y * 3) < height * 2 {
            image::Rgb([210, 170u8.wrapping_add(tint), 60])
        } else {
            image::Rgb([30u8.wrapping_add(tint), 60, (180 * x / width.max(1)) as u8])
        }
    }))
}

fn write_jpeg(dir: &Path, name: &str, image: &DynamicImage) {
    image.save(dir.join(name)).unwrap();
}

async fn wait_idle(supervisor: &PipelineSupervisor) {
    for _ in 0..600 {
        if !supervisor.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("pipeline did not reach idle in time");
}

async fn status_of(h: &Harness, path_suffix: &str, stage: Stage) -> StageStatus {
    let photos = h
        .catalog
        .list_photos(&Default::default())
        .await
        .unwrap();
    let file = photos
        .iter()
        .find(|f| f.path.ends_with(path_suffix))
        .unwrap_or_else(|| panic!("no file matching {path_suffix}"));
    let rows = h.catalog.ledger_rows(&file.id).await.unwrap();
    let row = rows
        .iter()
        .find(|r| r.stage == stage.name())
        .unwrap_or_else(|| panic!("no ledger row for {stage}"));
    StageStatus::from_str(&row.status).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn fresh_scan_indexes_good_files_and_skips_corrupt_ones() {
    let h = harness().await;
    write_jpeg(h.photos.path(), "a.jpg", &scene(320, 240));
    write_jpeg(h.photos.path(), "b.jpg", &scene(200, 300));
    tokio::fs::write(h.photos.path().join("c.jpg"), b"this is not a jpeg")
        .await
        .unwrap();
    tokio::fs::write(h.photos.path().join("notes.txt"), b"ignored")
        .await
        .unwrap();

    h.supervisor.trigger_scan().await.unwrap();
    wait_idle(&h.supervisor).await;

    let photos = h.catalog.list_photos(&Default::default()).await.unwrap();
    assert_eq!(photos.len(), 3, "txt files are not discovered");

    // Good files: full pixel pipeline done, external stages skipped.
    assert_eq!(status_of(&h, "a.jpg", Stage::Thumbnails).await, StageStatus::Done);
    assert_eq!(status_of(&h, "a.jpg", Stage::Phash).await, StageStatus::Done);
    assert_eq!(status_of(&h, "a.jpg", Stage::Exif).await, StageStatus::Done);
    assert_eq!(status_of(&h, "a.jpg", Stage::MotionPhoto).await, StageStatus::Done);
    // No GPS in generated images, so geocode skips silently.
    assert_eq!(status_of(&h, "a.jpg", Stage::Geocode).await, StageStatus::Skipped);
    // Disabled endpoint and detector: skipped, never failed.
    assert_eq!(status_of(&h, "a.jpg", Stage::Caption).await, StageStatus::Skipped);
    assert_eq!(status_of(&h, "a.jpg", Stage::Tagging).await, StageStatus::Skipped);
    assert_eq!(status_of(&h, "a.jpg", Stage::Faces).await, StageStatus::Skipped);

    // The corrupt file fails decode and is skipped downstream too.
    assert_eq!(status_of(&h, "c.jpg", Stage::Thumbnails).await, StageStatus::Skipped);
    assert_eq!(status_of(&h, "c.jpg", Stage::Phash).await, StageStatus::Skipped);
    assert_eq!(status_of(&h, "c.jpg", Stage::Caption).await, StageStatus::Skipped);
    // But non-pixel work still ran.
    assert_eq!(status_of(&h, "c.jpg", Stage::Exif).await, StageStatus::Done);

    // Thumbnails exist on disk for the good files.
    let a = photos.iter().find(|f| f.path.ends_with("a.jpg")).unwrap();
    for size in [200i64, 600, 1200] {
        let rel = h.catalog.thumbnail_path(&a.id, size).await.unwrap().unwrap();
        assert!(rel.contains(&format!("_{size}.jpg")), "{rel}");
    }

    // Width/height recorded from the decode.
    assert_eq!(a.width, Some(320));
    assert_eq!(a.height, Some(240));
}

#[tokio::test(flavor = "multi_thread")]
async fn rescan_of_unchanged_tree_hashes_nothing_and_reruns_nothing() {
    let h = harness().await;
    write_jpeg(h.photos.path(), "a.jpg", &scene(320, 240));
    write_jpeg(h.photos.path(), "b.jpg", &scene(200, 300));

    let first = h.supervisor.trigger_scan().await.unwrap();
    wait_idle(&h.supervisor).await;
    let second = h.supervisor.trigger_scan().await.unwrap();
    wait_idle(&h.supervisor).await;

    let runs = h.catalog.list_scan_runs(10).await.unwrap();
    let first_run = runs.iter().find(|r| r.id == first.to_string()).unwrap();
    let second_run = runs.iter().find(|r| r.id == second.to_string()).unwrap();

    assert_eq!(first_run.discovered, 2);
    assert_eq!(first_run.hashed, 2);
    assert!(first_run.completed > 0);

    assert_eq!(second_run.discovered, 2);
    assert_eq!(second_run.hashed, 0, "triple probe must hit");
    assert_eq!(second_run.completed, 0, "no stage re-execution");
    assert_eq!(second_run.failed, 0);
    assert_eq!(second_run.skipped, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn near_duplicates_land_in_one_group() {
    let h = harness().await;
    // Same scene at different resolutions.
    write_jpeg(h.photos.path(), "x.jpg", &scene(640, 480));
    write_jpeg(h.photos.path(), "x_resized.jpg", &scene(320, 240));

    h.supervisor.trigger_scan().await.unwrap();
    wait_idle(&h.supervisor).await;

    let groups = h.catalog.duplicate_groups(10).await.unwrap();
    assert_eq!(groups.len(), 1, "expected one duplicate group");
    assert_eq!(groups[0].files.len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_scan_triggers_are_refused() {
    let h = harness().await;
    for i in 0..40 {
        write_jpeg(
            h.photos.path(),
            &format!("p{i}.jpg"),
            &tinted_scene(160, 120, i as u8),
        );
    }

    h.supervisor.trigger_scan().await.unwrap();
    let second = h.supervisor.trigger_scan().await;
    assert!(matches!(
        second,
        Err(lumen_core::IndexError::ScanAlreadyRunning)
    ));
    wait_idle(&h.supervisor).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_scan_resumes_cleanly() {
    let h = harness().await;
    for i in 0..120 {
        write_jpeg(
            h.photos.path(),
            &format!("p{i:03}.jpg"),
            &tinted_scene(200, 150, i as u8),
        );
    }

    h.supervisor.trigger_scan().await.unwrap();
    // Cancel almost immediately; most files are still queued.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let _ = h.supervisor.stop_scan();
    wait_idle(&h.supervisor).await;

    let all = lumen_core::PhotoFilter {
        limit: Some(500),
        ..Default::default()
    };

    // Nothing stuck in-flight after the stop.
    for photo in h.catalog.list_photos(&all).await.unwrap() {
        for row in h.catalog.ledger_rows(&photo.id).await.unwrap() {
            assert_ne!(row.status, "in_flight", "row stuck in flight");
        }
    }

    // A fresh trigger completes everything without redoing committed work.
    h.supervisor.trigger_scan().await.unwrap();
    wait_idle(&h.supervisor).await;

    let photos = h.catalog.list_photos(&all).await.unwrap();
    assert_eq!(photos.len(), 120);
    for photo in &photos {
        assert!(
            h.catalog.all_stages_settled(&photo.id).await.unwrap(),
            "unsettled file {}",
            photo.path
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn motion_photo_trailer_is_extracted() {
    let h = harness().await;

    // A decodable JPEG with an MP4 container appended.
    let mut bytes = Vec::new();
    let img = scene(120, 90);
    let mut cursor = std::io::Cursor::new(&mut bytes);
    img.write_to(&mut cursor, image::ImageFormat::Jpeg).unwrap();
    let clip_start = bytes.len();
    bytes.extend(8192u32.to_be_bytes());
    bytes.extend(b"ftypisom");
    bytes.resize(clip_start + 8192, 0);
    tokio::fs::write(h.photos.path().join("m.jpg"), &bytes)
        .await
        .unwrap();

    h.supervisor.trigger_scan().await.unwrap();
    wait_idle(&h.supervisor).await;

    let photos = h.catalog.list_photos(&Default::default()).await.unwrap();
    let m = photos.iter().find(|f| f.path.ends_with("m.jpg")).unwrap();
    assert!(m.has_motion);
    let rel = m.motion_video.as_ref().unwrap();
    assert!(rel.starts_with("motion_videos/"), "{rel}");

    assert_eq!(status_of(&h, "m.jpg", Stage::MotionPhoto).await, StageStatus::Done);
}

#[tokio::test(flavor = "multi_thread")]
async fn clear_index_forces_full_reprocessing_without_rehashing() {
    let h = harness().await;
    write_jpeg(h.photos.path(), "a.jpg", &scene(320, 240));

    h.supervisor.trigger_scan().await.unwrap();
    wait_idle(&h.supervisor).await;
    h.supervisor.clear_index().await.unwrap();

    let stats = h.catalog.stats().await.unwrap();
    assert_eq!(stats.files, 1, "identities survive clear");

    let run = h.supervisor.trigger_scan().await.unwrap();
    wait_idle(&h.supervisor).await;

    let runs = h.catalog.list_scan_runs(10).await.unwrap();
    let rerun = runs.iter().find(|r| r.id == run.to_string()).unwrap();
    assert_eq!(rerun.hashed, 0, "content unchanged, probe still hits");
    assert!(rerun.completed > 0, "stages re-ran after clear");

    assert_eq!(status_of(&h, "a.jpg", Stage::Thumbnails).await, StageStatus::Done);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_without_active_scan_is_an_error() {
    let h = harness().await;
    assert!(h.supervisor.stop_scan().is_err());
}
