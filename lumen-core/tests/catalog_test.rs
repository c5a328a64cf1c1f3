//! Catalog store behaviour: identity probing, ledger semantics, committer
//! idempotence, and the query surface.

use std::path::Path;
use std::sync::Arc;

use lumen_core::catalog::{CatalogStore, PhotoFilter};
use lumen_model::{FileId, LocationRecord, Stage, StageStatus};
use tempfile::TempDir;

async fn open_catalog(dir: &TempDir) -> Arc<CatalogStore> {
    Arc::new(
        CatalogStore::open(&dir.path().join("db/lumen.db"))
            .await
            .expect("catalog opens"),
    )
}

async fn write_photo(dir: &TempDir, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    tokio::fs::write(&path, contents).await.unwrap();
    path
}

async fn mtime_of(path: &Path) -> i64 {
    tokio::fs::metadata(path)
        .await
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[tokio::test]
async fn identical_content_yields_identical_identifiers() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;

    let a = write_photo(&dir, "a.jpg", b"same bytes").await;
    let b = write_photo(&dir, "b.jpg", b"same bytes").await;

    let first = catalog
        .upsert_file(&a, 10, mtime_of(&a).await, "image/jpeg")
        .await
        .unwrap();
    let second = catalog
        .upsert_file(&b, 10, mtime_of(&b).await, "image/jpeg")
        .await
        .unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn triple_probe_skips_hashing_on_rescan() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;

    let path = write_photo(&dir, "a.jpg", b"content").await;
    let mtime = mtime_of(&path).await;

    let first = catalog
        .upsert_file(&path, 7, mtime, "image/jpeg")
        .await
        .unwrap();
    assert!(first.hashed);

    let again = catalog
        .upsert_file(&path, 7, mtime, "image/jpeg")
        .await
        .unwrap();
    assert!(!again.hashed, "unchanged triple must not re-hash");
    assert_eq!(again.id, first.id);
}

#[tokio::test]
async fn mtime_change_with_same_content_keeps_identifier() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;

    let path = write_photo(&dir, "a.jpg", b"stable content").await;
    let first = catalog
        .upsert_file(&path, 14, 1_000, "image/jpeg")
        .await
        .unwrap();

    // Touched but unchanged: the probe misses, the hash matches.
    let touched = catalog
        .upsert_file(&path, 14, 2_000, "image/jpeg")
        .await
        .unwrap();
    assert!(touched.hashed);
    assert!(!touched.created);
    assert_eq!(touched.id, first.id);
}

#[tokio::test]
async fn content_change_under_same_path_assigns_new_identifier() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;

    let path = write_photo(&dir, "a.jpg", b"old content").await;
    let old = catalog
        .upsert_file(&path, 11, 1_000, "image/jpeg")
        .await
        .unwrap();

    tokio::fs::write(&path, b"new content!").await.unwrap();
    let new = catalog
        .upsert_file(&path, 12, 2_000, "image/jpeg")
        .await
        .unwrap();

    assert_ne!(old.id, new.id);
    assert!(new.created);

    // The old identity no longer owns the path.
    let old_row = catalog.get_file(&old.id).await.unwrap().unwrap();
    assert!(old_row.missing);
    let new_row = catalog.get_file(&new.id).await.unwrap().unwrap();
    assert!(!new_row.missing);
}

#[tokio::test]
async fn ledger_drives_stage_needed() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;
    let path = write_photo(&dir, "a.jpg", b"x").await;
    let id = catalog
        .upsert_file(&path, 1, 1, "image/jpeg")
        .await
        .unwrap()
        .id;

    assert!(catalog.stage_needed(&id, Stage::Exif).await.unwrap());

    catalog
        .mark_stage(&id, Stage::Exif, StageStatus::Done, 1, None)
        .await
        .unwrap();
    assert!(!catalog.stage_needed(&id, Stage::Exif).await.unwrap());

    // Failed with attempts remaining stays runnable...
    catalog
        .mark_stage(&id, Stage::Thumbnails, StageStatus::Failed, 1, Some("io"))
        .await
        .unwrap();
    assert!(catalog.stage_needed(&id, Stage::Thumbnails).await.unwrap());

    // ...and becomes terminal once the budget is exhausted.
    catalog
        .mark_stage(
            &id,
            Stage::Thumbnails,
            StageStatus::Failed,
            Stage::Thumbnails.max_attempts(),
            Some("io"),
        )
        .await
        .unwrap();
    assert!(!catalog.stage_needed(&id, Stage::Thumbnails).await.unwrap());

    // Skipped is terminal.
    catalog
        .mark_stage(&id, Stage::Caption, StageStatus::Skipped, 1, None)
        .await
        .unwrap();
    assert!(!catalog.stage_needed(&id, Stage::Caption).await.unwrap());
}

#[tokio::test]
async fn stage_version_mismatch_invalidates_the_row() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;
    let path = write_photo(&dir, "a.jpg", b"x").await;
    let id = catalog
        .upsert_file(&path, 1, 1, "image/jpeg")
        .await
        .unwrap()
        .id;

    catalog
        .mark_stage(&id, Stage::Phash, StageStatus::Done, 1, None)
        .await
        .unwrap();
    assert!(!catalog.stage_needed(&id, Stage::Phash).await.unwrap());

    // Simulate an algorithm bump recorded by an older build.
    sqlx::query("UPDATE work_ledger SET stage_version = stage_version - 1 WHERE file_id = ?")
        .bind(id.as_str())
        .execute(catalog.reader())
        .await
        .unwrap();

    assert!(catalog.stage_needed(&id, Stage::Phash).await.unwrap());
    // The stale row was cleared entirely.
    assert!(catalog.ledger_rows(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn in_flight_rows_demote_to_pending_at_startup() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;
    let path = write_photo(&dir, "a.jpg", b"x").await;
    let id = catalog
        .upsert_file(&path, 1, 1, "image/jpeg")
        .await
        .unwrap()
        .id;

    catalog
        .mark_stage(&id, Stage::Exif, StageStatus::InFlight, 1, None)
        .await
        .unwrap();
    let demoted = catalog.demote_in_flight().await.unwrap();
    assert_eq!(demoted, 1);
    assert!(catalog.stage_needed(&id, Stage::Exif).await.unwrap());
}

#[tokio::test]
async fn favorite_toggle_is_involutive() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;
    let path = write_photo(&dir, "a.jpg", b"x").await;
    let id = catalog
        .upsert_file(&path, 1, 1, "image/jpeg")
        .await
        .unwrap()
        .id;

    catalog.set_favorite(&id, true).await.unwrap();
    catalog.set_favorite(&id, false).await.unwrap();
    let file = catalog.get_file(&id).await.unwrap().unwrap();
    assert!(!file.favorite);
}

#[tokio::test]
async fn location_round_trips_through_queries() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;
    let path = write_photo(&dir, "paris.jpg", b"x").await;
    let id = catalog
        .upsert_file(&path, 1, 1, "image/jpeg")
        .await
        .unwrap()
        .id;

    catalog
        .write_location(
            &LocationRecord {
                file_id: id.clone(),
                latitude: 48.8566,
                longitude: 2.3522,
                altitude: Some(35.0),
                country: Some("FR".into()),
                city: Some("Paris".into()),
                address: Some("Paris, Île-de-France, FR".into()),
            },
            1,
        )
        .await
        .unwrap();

    let detail = catalog.photo_detail(&id).await.unwrap().unwrap();
    let location = detail.location.unwrap();
    assert!((location.latitude - 48.8566).abs() < 1e-6);
    assert!((location.longitude - 2.3522).abs() < 1e-6);

    let countries = catalog.list_countries().await.unwrap();
    assert_eq!(countries, vec![("FR".to_string(), 1)]);
    assert!(!catalog.stage_needed(&id, Stage::Geocode).await.unwrap());
}

#[tokio::test]
async fn tags_and_search_work_together() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;
    let path = write_photo(&dir, "beach_day.jpg", b"x").await;
    let id = catalog
        .upsert_file(&path, 1, 1, "image/jpeg")
        .await
        .unwrap()
        .id;

    catalog
        .write_tags(&id, &["sunset".into(), "beach".into()], 1)
        .await
        .unwrap();
    catalog.write_caption(&id, "Golden hour by the sea", 1).await.unwrap();

    let by_tag = catalog
        .list_photos(&PhotoFilter {
            search: Some("sunset".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_tag.len(), 1);

    let by_caption = catalog
        .list_photos(&PhotoFilter {
            search: Some("golden sea".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_caption.len(), 1);

    let miss = catalog
        .list_photos(&PhotoFilter {
            search: Some("mountain".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(miss.is_empty());

    // Re-writing the same tag set is a no-op, not a duplication.
    catalog
        .write_tags(&id, &["sunset".into(), "beach".into()], 2)
        .await
        .unwrap();
    let detail = catalog.photo_detail(&id).await.unwrap().unwrap();
    assert_eq!(detail.tags, vec!["beach", "sunset"]);
}

#[tokio::test]
async fn clear_derived_keeps_identities_but_resets_stages() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;
    let path = write_photo(&dir, "a.jpg", b"x").await;
    let id = catalog
        .upsert_file(&path, 1, 1, "image/jpeg")
        .await
        .unwrap()
        .id;
    catalog
        .mark_stage(&id, Stage::Exif, StageStatus::Done, 1, None)
        .await
        .unwrap();

    catalog.clear_derived().await.unwrap();

    assert!(catalog.get_file(&id).await.unwrap().is_some());
    assert!(catalog.stage_needed(&id, Stage::Exif).await.unwrap());
}

#[tokio::test]
async fn missing_paths_are_flagged_by_reconcile() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;

    let kept = write_photo(&dir, "kept.jpg", b"k").await;
    let doomed = write_photo(&dir, "doomed.jpg", b"d").await;
    catalog.upsert_file(&kept, 1, 1, "image/jpeg").await.unwrap();
    let doomed_id = catalog
        .upsert_file(&doomed, 1, 1, "image/jpeg")
        .await
        .unwrap()
        .id;

    tokio::fs::remove_file(&doomed).await.unwrap();
    let flagged = catalog.mark_missing_paths().await.unwrap();
    assert_eq!(flagged, 1);
    assert!(catalog.get_file(&doomed_id).await.unwrap().unwrap().missing);
}

#[tokio::test]
async fn person_rename_and_merge() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;
    let path = write_photo(&dir, "a.jpg", b"x").await;
    let id = catalog
        .upsert_file(&path, 1, 1, "image/jpeg")
        .await
        .unwrap()
        .id;

    let alice = catalog.create_person(None).await.unwrap();
    let duplicate = catalog.create_person(None).await.unwrap();
    let embedding = lumen_model::FaceRecord::encode_embedding(&vec![0.5f32; 512]);
    catalog
        .write_faces(
            &id,
            &[
                lumen_core::catalog::NewFace {
                    x: 0,
                    y: 0,
                    w: 10,
                    h: 10,
                    embedding: embedding.clone(),
                    person_id: Some(alice),
                    crop_path: None,
                },
                lumen_core::catalog::NewFace {
                    x: 20,
                    y: 0,
                    w: 10,
                    h: 10,
                    embedding,
                    person_id: Some(duplicate),
                    crop_path: None,
                },
            ],
            1,
        )
        .await
        .unwrap();

    catalog.rename_person(alice, "Alice").await.unwrap();
    catalog.merge_persons(duplicate, alice).await.unwrap();

    let persons = catalog.list_persons().await.unwrap();
    assert_eq!(persons.len(), 1);
    assert_eq!(persons[0].name.as_deref(), Some("Alice"));
    assert_eq!(persons[0].face_count, 2);
}

#[tokio::test]
async fn unknown_file_id_is_none() {
    let dir = TempDir::new().unwrap();
    let catalog = open_catalog(&dir).await;
    assert!(catalog
        .get_file(&FileId::from_hex("feedbeef"))
        .await
        .unwrap()
        .is_none());
}
