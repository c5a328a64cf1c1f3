//! EXIF extraction: metadata header only, no pixel decode. A file without
//! EXIF is not an error; the stage commits an empty record and moves on so
//! geocoding can make its own no-GPS decision downstream.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use exif::{In, Tag, Value};
use lumen_model::{ExifRecord, PhotoFile, Stage};
use tracing::trace;

use super::{StageContext, StageOp};
use crate::error::{IndexError, Result};

#[derive(Debug)]
pub struct ExifStage;

/// Everything the header yields in one pass.
#[derive(Debug, Default)]
pub struct ParsedExif {
    pub record: ExifRecord,
    pub taken_at: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

#[async_trait]
impl StageOp for ExifStage {
    fn stage(&self) -> Stage {
        Stage::Exif
    }

    async fn run(&self, cx: &StageContext, file: &PhotoFile, attempts: i64) -> Result<()> {
        let path = std::path::PathBuf::from(&file.path);
        let parsed = tokio::task::spawn_blocking(move || read_exif(&path))
            .await
            .map_err(|e| IndexError::Internal(format!("exif task panicked: {e}")))??;

        trace!(target: "stage::exif", path = %file.path, has_gps = parsed.latitude.is_some());

        let mut record = parsed.record;
        record.file_id = file.id.clone();
        cx.catalog
            .write_exif(
                &file.id,
                &record,
                parsed.taken_at,
                parsed.latitude,
                parsed.longitude,
                parsed.altitude,
                parsed.width,
                parsed.height,
                attempts,
            )
            .await
    }
}

/// Blocking header read. IO failures surface as transient; a container with
/// no EXIF segment parses to the empty default.
pub fn read_exif(path: &std::path::Path) -> Result<ParsedExif> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(exif::Error::Io(err)) => return Err(err.into()),
        // NotFound / InvalidFormat / BlankValue: no usable EXIF, not fatal.
        Err(_) => return Ok(ParsedExif::default()),
    };

    let ascii = |tag: Tag| -> Option<String> {
        exif.get_field(tag, In::PRIMARY).and_then(|f| match &f.value {
            Value::Ascii(chunks) => chunks.first().map(|c| {
                String::from_utf8_lossy(c).trim().trim_matches('\0').to_string()
            }),
            _ => None,
        })
    };
    let rational = |tag: Tag| -> Option<f64> {
        exif.get_field(tag, In::PRIMARY).and_then(|f| match &f.value {
            Value::Rational(v) => v.first().map(|r| r.to_f64()),
            _ => None,
        })
    };
    let uint = |tag: Tag| -> Option<i64> {
        exif.get_field(tag, In::PRIMARY)
            .and_then(|f| f.value.get_uint(0))
            .map(i64::from)
    };

    let record = ExifRecord {
        camera_make: ascii(Tag::Make),
        camera_model: ascii(Tag::Model),
        lens: ascii(Tag::LensModel),
        focal_length: rational(Tag::FocalLength),
        aperture: rational(Tag::FNumber),
        shutter: exif
            .get_field(Tag::ExposureTime, In::PRIMARY)
            .map(|f| f.display_value().to_string()),
        iso: uint(Tag::PhotographicSensitivity),
        orientation: uint(Tag::Orientation),
        ..Default::default()
    };

    let taken_at = ascii(Tag::DateTimeOriginal)
        .or_else(|| ascii(Tag::DateTime))
        .and_then(|raw| parse_exif_datetime(&raw));

    let latitude = gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S");
    let longitude = gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W");
    let altitude = rational(Tag::GPSAltitude).map(|alt| {
        let below_sea = exif
            .get_field(Tag::GPSAltitudeRef, In::PRIMARY)
            .and_then(|f| f.value.get_uint(0))
            == Some(1);
        if below_sea { -alt } else { alt }
    });

    Ok(ParsedExif {
        record,
        taken_at,
        // GPS is only meaningful as a pair.
        latitude: latitude.filter(|_| longitude.is_some()),
        longitude: longitude.filter(|_| latitude.is_some()),
        altitude,
        width: uint(Tag::PixelXDimension),
        height: uint(Tag::PixelYDimension),
    })
}

/// Orientation alone, parsed from in-memory bytes. Used by the thumbnail
/// stage, which runs in parallel with the EXIF stage and therefore cannot
/// rely on the catalog row being committed yet.
pub fn orientation_from_bytes(bytes: &[u8]) -> Option<i64> {
    let mut cursor = std::io::Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    exif.get_field(Tag::Orientation, In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .map(i64::from)
}

/// "YYYY:MM:DD HH:MM:SS", taken as UTC (EXIF carries no zone).
pub fn parse_exif_datetime(raw: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// Degrees/minutes/seconds rationals plus a hemisphere reference, folded to
/// signed decimal degrees.
fn gps_coordinate(exif: &exif::Exif, value_tag: Tag, ref_tag: Tag, negative_ref: &str) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let dms = match &field.value {
        Value::Rational(v) if !v.is_empty() => v,
        _ => return None,
    };
    let degrees = dms.first().map(|r| r.to_f64()).unwrap_or(0.0);
    let minutes = dms.get(1).map(|r| r.to_f64()).unwrap_or(0.0);
    let seconds = dms.get(2).map(|r| r.to_f64()).unwrap_or(0.0);
    let mut decimal = degrees + minutes / 60.0 + seconds / 3600.0;

    let reference = exif
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Ascii(chunks) => chunks
                .first()
                .map(|c| String::from_utf8_lossy(c).to_string()),
            _ => None,
        })
        .unwrap_or_default();
    if reference.trim().eq_ignore_ascii_case(negative_ref) {
        decimal = -decimal;
    }
    Some(decimal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_parses_exif_format() {
        let ts = parse_exif_datetime("2024:07:01 10:00:00").unwrap();
        // 2024-07-01T10:00:00Z
        assert_eq!(ts, 1_719_828_000);
    }

    #[test]
    fn datetime_rejects_garbage() {
        assert_eq!(parse_exif_datetime("not a date"), None);
        assert_eq!(parse_exif_datetime(""), None);
    }

    #[test]
    fn plain_file_without_exif_parses_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.jpg");
        // A bare JPEG SOI/EOI pair with no APP1 segment.
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();

        let parsed = read_exif(&path).unwrap();
        assert!(parsed.record.camera_make.is_none());
        assert!(parsed.taken_at.is_none());
        assert!(parsed.latitude.is_none());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = read_exif(std::path::Path::new("/nonexistent/x.jpg")).unwrap_err();
        assert!(matches!(err, IndexError::Io(_)));
    }
}
