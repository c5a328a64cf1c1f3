//! Batch event detection. Runs when the pipeline drains to idle (or on an
//! explicit trigger), never per file: files are sorted by capture timestamp
//! and greedily grouped, splitting on long time gaps or large location
//! jumps. Events are re-derived wholesale on every pass.

use chrono::{DateTime, Utc};
use lumen_model::FileId;
use tracing::info;

use crate::catalog::CatalogStore;
use crate::error::Result;

/// A new event begins when the time gap since the previous photo exceeds
/// this many seconds (6 hours)...
pub const GAP_SECONDS: i64 = 6 * 3600;
/// ...or when the distance to the previous geotagged photo exceeds this many
/// kilometres.
pub const JUMP_KM: f64 = 50.0;

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

#[derive(Debug, Clone)]
pub struct DetectedEvent {
    pub name: String,
    pub started_at: i64,
    pub ended_at: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub cover: Option<FileId>,
    pub members: Vec<FileId>,
}

/// One input photo: (id, taken_at, lat, lon, resolved city).
pub type EventInput = (FileId, i64, Option<f64>, Option<f64>, Option<String>);

/// Greedy grouping over time-ordered input. Pure; the pipeline feeds it from
/// the catalog and persists the result.
pub fn detect_events(mut input: Vec<EventInput>) -> Vec<DetectedEvent> {
    input.sort_by_key(|(_, taken_at, ..)| *taken_at);

    let mut events: Vec<Vec<EventInput>> = Vec::new();
    for photo in input {
        let split = match events.last() {
            None => true,
            Some(current) => {
                let (_, last_taken, ..) = current.last().expect("group never empty");
                let time_split = photo.1 - last_taken > GAP_SECONDS;
                let space_split = match (last_geotagged(current), photo.2.zip(photo.3)) {
                    (Some((lat1, lon1)), Some((lat2, lon2))) => {
                        haversine_km(lat1, lon1, lat2, lon2) > JUMP_KM
                    }
                    _ => false,
                };
                time_split || space_split
            }
        };
        if split {
            events.push(Vec::new());
        }
        events.last_mut().expect("just pushed").push(photo);
    }

    events.into_iter().map(summarise).collect()
}

fn last_geotagged(group: &[EventInput]) -> Option<(f64, f64)> {
    group
        .iter()
        .rev()
        .find_map(|(_, _, lat, lon, _)| lat.zip(*lon))
}

fn summarise(group: Vec<EventInput>) -> DetectedEvent {
    let started_at = group.first().map(|(_, t, ..)| *t).unwrap_or(0);
    let ended_at = group.last().map(|(_, t, ..)| *t).unwrap_or(started_at);

    // Dominant resolved city names the event; date range fills in the rest.
    let mut city_counts: std::collections::HashMap<&str, usize> = Default::default();
    for (_, _, _, _, city) in &group {
        if let Some(city) = city {
            *city_counts.entry(city.as_str()).or_default() += 1;
        }
    }
    let dominant_city = city_counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(city, _)| city.to_string());

    let name = match &dominant_city {
        Some(city) => format!("{city}, {}", date_range(started_at, ended_at)),
        None => date_range(started_at, ended_at),
    };

    let representative = group
        .iter()
        .find(|(_, _, lat, lon, _)| lat.is_some() && lon.is_some());

    DetectedEvent {
        name,
        started_at,
        ended_at,
        latitude: representative.and_then(|(_, _, lat, ..)| *lat),
        longitude: representative.and_then(|(_, _, _, lon, _)| *lon),
        cover: group.first().map(|(id, ..)| id.clone()),
        members: group.iter().map(|(id, ..)| id.clone()).collect(),
    }
}

fn date_range(started_at: i64, ended_at: i64) -> String {
    let start = DateTime::<Utc>::from_timestamp(started_at, 0).unwrap_or_default();
    let end = DateTime::<Utc>::from_timestamp(ended_at, 0).unwrap_or_default();
    let start_day = start.format("%-d %b %Y").to_string();
    let end_day = end.format("%-d %b %Y").to_string();
    if start_day == end_day {
        start_day
    } else {
        format!("{start_day} – {end_day}")
    }
}

/// Load inputs, detect, persist. The supervisor calls this at the idle
/// barrier and on explicit trigger.
pub async fn run_event_detection(catalog: &CatalogStore) -> Result<usize> {
    let input = catalog.files_for_event_detection().await?;
    let detected = detect_events(input);
    let count = detected.len();

    let rows: Vec<_> = detected
        .into_iter()
        .map(|e| {
            (
                e.name,
                e.started_at,
                e.ended_at,
                e.latitude,
                e.longitude,
                e.cover,
                e.members,
            )
        })
        .collect();
    catalog.replace_events(&rows).await?;
    info!(target: "pipeline", events = count, "event detection complete");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> FileId {
        FileId::from_hex(format!("{n:02x}"))
    }

    const PARIS: (f64, f64) = (48.8566, 2.3522);
    const LYON: (f64, f64) = (45.7640, 4.8357);

    #[test]
    fn haversine_known_distance() {
        // Paris to Lyon is roughly 392 km.
        let d = haversine_km(PARIS.0, PARIS.1, LYON.0, LYON.1);
        assert!((d - 392.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn photos_within_gap_form_one_event() {
        let t0 = 1_719_828_000; // 2024-07-01T10:00:00Z
        let input = vec![
            (id(1), t0, Some(PARIS.0), Some(PARIS.1), Some("Paris".into())),
            (id(2), t0 + 600, None, None, None),
        ];
        let events = detect_events(input);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].members.len(), 2);
        assert!(events[0].name.starts_with("Paris"), "{}", events[0].name);
    }

    #[test]
    fn long_gap_splits_events() {
        let t0 = 1_719_828_000;
        let input = vec![
            (id(1), t0, None, None, None),
            (id(2), t0 + GAP_SECONDS + 1, None, None, None),
        ];
        let events = detect_events(input);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn location_jump_splits_events_even_within_gap() {
        let t0 = 1_719_828_000;
        let input = vec![
            (id(1), t0, Some(PARIS.0), Some(PARIS.1), Some("Paris".into())),
            (id(2), t0 + 3600, Some(LYON.0), Some(LYON.1), Some("Lyon".into())),
        ];
        let events = detect_events(input);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn ungeotagged_photos_never_split_on_space() {
        let t0 = 1_719_828_000;
        let input = vec![
            (id(1), t0, Some(PARIS.0), Some(PARIS.1), None),
            (id(2), t0 + 100, None, None, None),
            (id(3), t0 + 200, Some(PARIS.0), Some(PARIS.1), None),
        ];
        assert_eq!(detect_events(input).len(), 1);
    }

    #[test]
    fn unsorted_input_is_sorted_first() {
        let t0 = 1_719_828_000;
        let input = vec![
            (id(2), t0 + 600, None, None, None),
            (id(1), t0, None, None, None),
        ];
        let events = detect_events(input);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].started_at, t0);
        assert_eq!(events[0].ended_at, t0 + 600);
    }

    #[test]
    fn empty_input_yields_no_events() {
        assert!(detect_events(Vec::new()).is_empty());
    }
}
