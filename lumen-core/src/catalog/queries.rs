//! Read surface used by the HTTP API. Reads go through the read pool and
//! never block the writer.

use lumen_model::{
    DuplicateGroup, EventRecord, ExifRecord, FaceRecord, FileId, LedgerRow, LocationRecord,
    PersonId, PersonRecord, PhotoFile, ScanRunRecord, ThumbnailRecord,
};
use serde::{Deserialize, Serialize};
use sqlx::QueryBuilder;

use super::CatalogStore;
use crate::error::Result;

/// Filters for the paginated photo list. All optional; combined with AND.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhotoFilter {
    /// Prefix match on the directory part of the path.
    pub directory: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub person_id: Option<i64>,
    pub event_id: Option<i64>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub favorite: Option<bool>,
    pub min_size: Option<i64>,
    pub dup_group: Option<String>,
    /// Tokenized full-text search over paths, places, tags, captions, and
    /// person names.
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Everything the photo detail view needs in one shot.
#[derive(Debug, Clone, Serialize)]
pub struct PhotoDetail {
    pub file: PhotoFile,
    pub exif: Option<ExifRecord>,
    pub location: Option<LocationRecord>,
    pub thumbnails: Vec<ThumbnailRecord>,
    pub tags: Vec<String>,
    pub faces: Vec<FaceRecord>,
    pub ledger: Vec<LedgerRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineBucket {
    pub year: i32,
    pub month: u32,
    pub day: Option<u32>,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub files: i64,
    pub favorites: i64,
    pub total_bytes: i64,
    pub persons: i64,
    pub events: i64,
    pub duplicate_groups: i64,
    pub with_location: i64,
}

fn push_filters(builder: &mut QueryBuilder<'_, sqlx::Sqlite>, filter: &PhotoFilter) {
    builder.push(" WHERE f.missing = 0");

    if let Some(directory) = &filter.directory {
        let prefix = format!("{}%", directory.trim_end_matches('/'));
        builder.push(" AND f.path LIKE ").push_bind(prefix);
    }
    if let Some(year) = filter.year {
        builder
            .push(" AND CAST(strftime('%Y', f.taken_at, 'unixepoch') AS INTEGER) = ")
            .push_bind(year);
        if let Some(month) = filter.month {
            builder
                .push(" AND CAST(strftime('%m', f.taken_at, 'unixepoch') AS INTEGER) = ")
                .push_bind(month as i64);
        }
    }
    if let Some(person_id) = filter.person_id {
        builder
            .push(" AND f.id IN (SELECT file_id FROM faces WHERE person_id = ")
            .push_bind(person_id)
            .push(")");
    }
    if let Some(event_id) = filter.event_id {
        builder
            .push(" AND f.id IN (SELECT file_id FROM event_files WHERE event_id = ")
            .push_bind(event_id)
            .push(")");
    }
    if let Some(country) = &filter.country {
        builder
            .push(" AND f.id IN (SELECT file_id FROM locations WHERE country = ")
            .push_bind(country.clone())
            .push(")");
    }
    if let Some(city) = &filter.city {
        builder
            .push(" AND f.id IN (SELECT file_id FROM locations WHERE city = ")
            .push_bind(city.clone())
            .push(")");
    }
    if let Some(favorite) = filter.favorite {
        builder.push(" AND f.favorite = ").push_bind(favorite);
    }
    if let Some(min_size) = filter.min_size {
        builder.push(" AND f.size >= ").push_bind(min_size);
    }
    if let Some(group) = &filter.dup_group {
        builder
            .push(" AND f.id IN (SELECT file_id FROM phashes WHERE dup_group = ")
            .push_bind(group.clone())
            .push(")");
    }
    if let Some(search) = &filter.search {
        // Every token must match somewhere across the searchable text.
        for token in search.split_whitespace() {
            let needle = format!("%{}%", token.to_lowercase());
            builder.push(" AND (");
            builder
                .push("LOWER(f.path) LIKE ")
                .push_bind(needle.clone());
            builder
                .push(" OR LOWER(COALESCE(f.caption, '')) LIKE ")
                .push_bind(needle.clone());
            builder
                .push(" OR f.id IN (SELECT file_id FROM locations WHERE \
                       LOWER(COALESCE(city, '') || ' ' || COALESCE(country, '') || ' ' || COALESCE(address, '')) LIKE ")
                .push_bind(needle.clone())
                .push(")");
            builder
                .push(" OR f.id IN (SELECT ft.file_id FROM file_tags ft \
                       JOIN tags t ON t.id = ft.tag_id WHERE LOWER(t.label) LIKE ")
                .push_bind(needle.clone())
                .push(")");
            builder
                .push(" OR f.id IN (SELECT fa.file_id FROM faces fa \
                       JOIN persons p ON p.id = fa.person_id WHERE LOWER(COALESCE(p.name, '')) LIKE ")
                .push_bind(needle)
                .push(")");
            builder.push(")");
        }
    }
}

impl CatalogStore {
    pub async fn list_photos(&self, filter: &PhotoFilter) -> Result<Vec<PhotoFile>> {
        let mut builder = QueryBuilder::new("SELECT f.* FROM files f");
        push_filters(&mut builder, filter);
        builder.push(" ORDER BY f.taken_at IS NULL, f.taken_at DESC, f.path");
        builder
            .push(" LIMIT ")
            .push_bind(filter.limit.unwrap_or(100).clamp(1, 500));
        builder
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0).max(0));

        Ok(builder.build_query_as().fetch_all(self.reader()).await?)
    }

    pub async fn count_photos(&self, filter: &PhotoFilter) -> Result<i64> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM files f");
        push_filters(&mut builder, filter);
        let (count,): (i64,) = builder.build_query_as().fetch_one(self.reader()).await?;
        Ok(count)
    }

    pub async fn photo_detail(&self, id: &FileId) -> Result<Option<PhotoDetail>> {
        let Some(file) = self.get_file(id).await? else {
            return Ok(None);
        };

        let exif: Option<ExifRecord> = sqlx::query_as("SELECT * FROM exif WHERE file_id = ?")
            .bind(id)
            .fetch_optional(self.reader())
            .await?;
        let location: Option<LocationRecord> =
            sqlx::query_as("SELECT * FROM locations WHERE file_id = ?")
                .bind(id)
                .fetch_optional(self.reader())
                .await?;
        let thumbnails: Vec<ThumbnailRecord> =
            sqlx::query_as("SELECT * FROM thumbnails WHERE file_id = ? ORDER BY size")
                .bind(id)
                .fetch_all(self.reader())
                .await?;
        let tags: Vec<(String,)> = sqlx::query_as(
            "SELECT t.label FROM tags t JOIN file_tags ft ON ft.tag_id = t.id \
             WHERE ft.file_id = ? ORDER BY t.label",
        )
        .bind(id)
        .fetch_all(self.reader())
        .await?;
        let faces: Vec<FaceRecord> = sqlx::query_as("SELECT * FROM faces WHERE file_id = ?")
            .bind(id)
            .fetch_all(self.reader())
            .await?;
        let ledger = self.ledger_rows(id).await?;

        Ok(Some(PhotoDetail {
            file,
            exif,
            location,
            thumbnails,
            tags: tags.into_iter().map(|(label,)| label).collect(),
            faces,
            ledger,
        }))
    }

    pub async fn thumbnail_path(&self, id: &FileId, size: i64) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT path FROM thumbnails WHERE file_id = ? AND size = ?")
                .bind(id)
                .bind(size)
                .fetch_optional(self.reader())
                .await?;
        Ok(row.map(|(path,)| path))
    }

    /// Immediate child directories (with photo counts) under `parent`, plus
    /// the number of photos directly inside `parent`.
    pub async fn list_directories(&self, parent: &str) -> Result<Vec<(String, i64)>> {
        let prefix = if parent.is_empty() || parent.ends_with('/') {
            parent.to_string()
        } else {
            format!("{parent}/")
        };
        let like = format!("{prefix}%");
        let paths: Vec<(String,)> =
            sqlx::query_as("SELECT path FROM files WHERE missing = 0 AND path LIKE ?")
                .bind(&like)
                .fetch_all(self.reader())
                .await?;

        let mut children: std::collections::BTreeMap<String, i64> = Default::default();
        for (path,) in paths {
            let rest = path[prefix.len()..].trim_start_matches('/');
            match rest.split_once('/') {
                Some((segment, _)) => *children.entry(segment.to_string()).or_default() += 1,
                None => *children.entry(String::new()).or_default() += 1,
            }
        }
        Ok(children.into_iter().collect())
    }

    /// Photo counts bucketed by capture date. `by_day` adds day granularity
    /// (used when the UI is zoomed into a month).
    pub async fn timeline(&self, by_day: bool) -> Result<Vec<TimelineBucket>> {
        let granularity = if by_day { "%Y-%m-%d" } else { "%Y-%m" };
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT strftime(?, taken_at, 'unixepoch'), COUNT(*) FROM files \
             WHERE missing = 0 AND taken_at IS NOT NULL \
             GROUP BY 1 ORDER BY 1 DESC",
        )
        .bind(granularity)
        .fetch_all(self.reader())
        .await?;

        let mut buckets = Vec::with_capacity(rows.len());
        for (key, count) in rows {
            let mut parts = key.split('-');
            let year = parts.next().and_then(|y| y.parse().ok()).unwrap_or(0);
            let month = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
            let day = parts.next().and_then(|d| d.parse().ok());
            buckets.push(TimelineBucket {
                year,
                month,
                day,
                count,
            });
        }
        Ok(buckets)
    }

    pub async fn years_summary(&self) -> Result<Vec<(i32, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT strftime('%Y', taken_at, 'unixepoch'), COUNT(*) FROM files \
             WHERE missing = 0 AND taken_at IS NOT NULL GROUP BY 1 ORDER BY 1 DESC",
        )
        .fetch_all(self.reader())
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(year, count)| year.parse().ok().map(|y| (y, count)))
            .collect())
    }

    pub async fn list_persons(&self) -> Result<Vec<PersonRecord>> {
        Ok(sqlx::query_as(
            "SELECT p.id, p.name, p.cover_face_id, COUNT(f.id) AS face_count \
             FROM persons p LEFT JOIN faces f ON f.person_id = p.id \
             GROUP BY p.id ORDER BY face_count DESC",
        )
        .fetch_all(self.reader())
        .await?)
    }

    pub async fn get_person(&self, id: PersonId) -> Result<Option<PersonRecord>> {
        Ok(sqlx::query_as(
            "SELECT p.id, p.name, p.cover_face_id, COUNT(f.id) AS face_count \
             FROM persons p LEFT JOIN faces f ON f.person_id = p.id \
             WHERE p.id = ? GROUP BY p.id",
        )
        .bind(id)
        .fetch_optional(self.reader())
        .await?)
    }

    pub async fn list_events(&self) -> Result<Vec<EventRecord>> {
        Ok(sqlx::query_as(
            "SELECT e.id, e.name, e.started_at, e.ended_at, e.latitude, e.longitude, \
             e.cover_file_id, COUNT(ef.file_id) AS file_count \
             FROM events e LEFT JOIN event_files ef ON ef.event_id = e.id \
             GROUP BY e.id ORDER BY e.started_at DESC",
        )
        .fetch_all(self.reader())
        .await?)
    }

    pub async fn list_countries(&self) -> Result<Vec<(String, i64)>> {
        Ok(sqlx::query_as(
            "SELECT country, COUNT(*) FROM locations WHERE country IS NOT NULL \
             GROUP BY country ORDER BY 2 DESC",
        )
        .fetch_all(self.reader())
        .await?)
    }

    pub async fn list_cities(&self, country: Option<&str>) -> Result<Vec<(String, i64)>> {
        if let Some(country) = country {
            Ok(sqlx::query_as(
                "SELECT city, COUNT(*) FROM locations WHERE city IS NOT NULL AND country = ? \
                 GROUP BY city ORDER BY 2 DESC",
            )
            .bind(country)
            .fetch_all(self.reader())
            .await?)
        } else {
            Ok(sqlx::query_as(
                "SELECT city, COUNT(*) FROM locations WHERE city IS NOT NULL \
                 GROUP BY city ORDER BY 2 DESC",
            )
            .fetch_all(self.reader())
            .await?)
        }
    }

    /// (file id, lat, lon) triples for the map view.
    pub async fn map_points(&self) -> Result<Vec<(FileId, f64, f64)>> {
        Ok(sqlx::query_as(
            "SELECT file_id, latitude, longitude FROM locations",
        )
        .fetch_all(self.reader())
        .await?)
    }

    /// Groups with more than one member, largest first.
    pub async fn duplicate_groups(&self, limit: i64) -> Result<Vec<DuplicateGroup>> {
        let groups: Vec<(FileId,)> = sqlx::query_as(
            "SELECT dup_group FROM phashes WHERE dup_group IS NOT NULL \
             GROUP BY dup_group HAVING COUNT(*) > 1 \
             ORDER BY COUNT(*) DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.reader())
        .await?;

        let mut result = Vec::with_capacity(groups.len());
        for (group_id,) in groups {
            let files: Vec<PhotoFile> = sqlx::query_as(
                "SELECT f.* FROM files f JOIN phashes p ON p.file_id = f.id \
                 WHERE p.dup_group = ? ORDER BY f.size DESC",
            )
            .bind(&group_id)
            .fetch_all(self.reader())
            .await?;
            result.push(DuplicateGroup { group_id, files });
        }
        Ok(result)
    }

    pub async fn large_files(&self, min_size: i64, limit: i64) -> Result<Vec<PhotoFile>> {
        Ok(sqlx::query_as(
            "SELECT * FROM files WHERE missing = 0 AND size >= ? ORDER BY size DESC LIMIT ?",
        )
        .bind(min_size)
        .bind(limit)
        .fetch_all(self.reader())
        .await?)
    }

    pub async fn stats(&self) -> Result<CatalogStats> {
        let (files, favorites, total_bytes): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(favorite), 0), COALESCE(SUM(size), 0) \
             FROM files WHERE missing = 0",
        )
        .fetch_one(self.reader())
        .await?;
        let (persons,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM persons")
            .fetch_one(self.reader())
            .await?;
        let (events,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(self.reader())
            .await?;
        let (duplicate_groups,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM (SELECT dup_group FROM phashes WHERE dup_group IS NOT NULL \
             GROUP BY dup_group HAVING COUNT(*) > 1)",
        )
        .fetch_one(self.reader())
        .await?;
        let (with_location,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM locations")
            .fetch_one(self.reader())
            .await?;

        Ok(CatalogStats {
            files,
            favorites,
            total_bytes,
            persons,
            events,
            duplicate_groups,
            with_location,
        })
    }

    pub async fn list_scan_runs(&self, limit: i64) -> Result<Vec<ScanRunRecord>> {
        Ok(sqlx::query_as(
            "SELECT * FROM scan_runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.reader())
        .await?)
    }

    // Loads used to rebuild the in-memory indexes at startup and to feed the
    // batch event detector.

    pub async fn load_phashes(&self) -> Result<Vec<(FileId, i64, Option<FileId>)>> {
        Ok(sqlx::query_as("SELECT file_id, phash, dup_group FROM phashes")
            .fetch_all(self.reader())
            .await?)
    }

    pub async fn load_faces(&self) -> Result<Vec<FaceRecord>> {
        Ok(sqlx::query_as("SELECT * FROM faces")
            .fetch_all(self.reader())
            .await?)
    }

    /// Files with a capture timestamp, with resolved city when present,
    /// ordered by time. Input to event detection.
    pub async fn files_for_event_detection(
        &self,
    ) -> Result<Vec<(FileId, i64, Option<f64>, Option<f64>, Option<String>)>> {
        Ok(sqlx::query_as(
            "SELECT f.id, f.taken_at, f.latitude, f.longitude, l.city \
             FROM files f LEFT JOIN locations l ON l.file_id = f.id \
             WHERE f.missing = 0 AND f.taken_at IS NOT NULL \
             ORDER BY f.taken_at ASC",
        )
        .fetch_all(self.reader())
        .await?)
    }
}
