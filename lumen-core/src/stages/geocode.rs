//! Offline reverse geocoding against the embedded populated-places index.
//! Requires GPS on the file row (written by the EXIF stage); without it the
//! stage is skipped silently.

use async_trait::async_trait;
use lumen_model::{LocationRecord, PhotoFile, Stage};
use reverse_geocoder::ReverseGeocoder;
use tracing::trace;

use super::{StageContext, StageOp};
use crate::error::{IndexError, Result};

pub struct GeocodeStage {
    geocoder: ReverseGeocoder,
}

impl std::fmt::Debug for GeocodeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocodeStage").finish()
    }
}

impl Default for GeocodeStage {
    fn default() -> Self {
        Self::new()
    }
}

impl GeocodeStage {
    /// Loads the embedded places dataset; construct once per process.
    pub fn new() -> Self {
        Self {
            geocoder: ReverseGeocoder::new(),
        }
    }

    pub fn resolve(&self, latitude: f64, longitude: f64) -> LocationResult {
        let found = self.geocoder.search((latitude, longitude));
        let record = &found.record;
        LocationResult {
            city: record.name.clone(),
            country: record.cc.clone(),
            address: format!("{}, {}, {}", record.name, record.admin1, record.cc),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocationResult {
    pub city: String,
    pub country: String,
    pub address: String,
}

#[async_trait]
impl StageOp for GeocodeStage {
    fn stage(&self) -> Stage {
        Stage::Geocode
    }

    async fn run(&self, cx: &StageContext, file: &PhotoFile, attempts: i64) -> Result<()> {
        let (latitude, longitude) = match (file.latitude, file.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return Err(IndexError::NotFound("no GPS coordinates".into())),
        };

        let resolved = self.resolve(latitude, longitude);
        trace!(
            target: "stage::geocode",
            path = %file.path,
            city = %resolved.city,
            country = %resolved.country,
        );

        cx.catalog
            .write_location(
                &LocationRecord {
                    file_id: file.id.clone(),
                    latitude,
                    longitude,
                    altitude: file.altitude,
                    country: Some(resolved.country),
                    city: Some(resolved.city),
                    address: Some(resolved.address),
                },
                attempts,
            )
            .await
    }
}
