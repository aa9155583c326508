//! Weathercam camera entities.

use crate::config_entries::WeathercamData;
use crate::constants::DIGITRAFFIC_USER;
use crate::entity::{camera_unique_id, weathercam_device_info, EntitySink, EntityState, Platform};
use crate::weathercam::{CatalogPreset, WeathercamCatalog};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const FRAME_INTERVAL: Duration = Duration::from_secs(600);
const IMAGE_TIMEOUT: Duration = Duration::from_secs(10);
const CAMERA_ENTITY_PREFIX: &str = "camera.digitraffic_wc_";

#[derive(Debug, Default)]
struct CachedImage {
    bytes: Option<Vec<u8>>,
    last_updated: Option<DateTime<Utc>>,
    fetched: bool,
}

/// One camera entity per selected preset
#[derive(Debug)]
pub struct WeathercamCamera {
    entry_id: String,
    camera_id: String,
    camera_name: String,
    preset: CatalogPreset,
    nearest_weather_station_id: Option<i64>,
    client: reqwest::Client,
    image: Mutex<CachedImage>,
}

impl WeathercamCamera {
    pub fn new(
        entry_id: &str,
        camera_id: &str,
        camera_name: &str,
        preset: CatalogPreset,
        nearest_weather_station_id: Option<i64>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            entry_id: entry_id.to_string(),
            camera_id: camera_id.to_string(),
            camera_name: camera_name.to_string(),
            preset,
            nearest_weather_station_id,
            client,
            image: Mutex::new(CachedImage::default()),
        }
    }

    pub fn preset_id(&self) -> &str {
        &self.preset.id
    }

    pub fn unique_id(&self) -> String {
        camera_unique_id(&self.entry_id, &self.preset.id)
    }

    pub fn entity_id(&self) -> String {
        camera_entity_id(&self.preset.id)
    }

    pub fn name(&self) -> String {
        format!("{} - {}", self.camera_name, self.preset.display_name())
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.image.lock().ok().and_then(|image| image.last_updated)
    }

    /// Fetches the current image. On any failure the previously fetched image is returned.
    ///
    /// The outcome drives the published state: `last_updated` and availability.
    pub async fn camera_image(&self) -> Option<Vec<u8>> {
        let fetched = match self.fetch_image().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Error fetching weathercam image {}: {e}", self.preset.image_url);
                None
            }
        };
        let Ok(mut cache) = self.image.lock() else {
            return fetched;
        };
        cache.fetched = true;
        if let Some(bytes) = fetched {
            cache.bytes = Some(bytes);
            cache.last_updated = Some(Utc::now());
        }
        cache.bytes.clone()
    }

    /// Unavailable once a fetch has been tried and no image was ever received
    pub fn is_available(&self) -> bool {
        self.image
            .lock()
            .map(|cache| !cache.fetched || cache.bytes.is_some())
            .unwrap_or(true)
    }

    /// `Ok(None)` when the server answered but had no image for us
    async fn fetch_image(&self) -> Result<Option<Vec<u8>>, reqwest::Error> {
        let response = self
            .client
            .get(&self.preset.image_url)
            .timeout(IMAGE_TIMEOUT)
            .header(reqwest::header::ACCEPT, "image/jpeg,image/*")
            .header("Digitraffic-User", DIGITRAFFIC_USER)
            .send()
            .await?;

        match response.status() {
            reqwest::StatusCode::OK => Ok(Some(response.bytes().await?.to_vec())),
            reqwest::StatusCode::FORBIDDEN => {
                debug!(
                    "Access denied for weathercam image {} (camera may be offline)",
                    self.preset.image_url
                );
                Ok(None)
            }
            status => {
                warn!(
                    "Failed to fetch image from {}: {}",
                    self.preset.image_url, status
                );
                Ok(None)
            }
        }
    }

    pub fn entity_state(&self) -> EntityState {
        let mut attributes = Map::new();
        attributes.insert("camera_id".into(), Value::from(self.camera_id.clone()));
        attributes.insert("preset_id".into(), Value::from(self.preset.id.clone()));
        attributes.insert("image_url".into(), Value::from(self.preset.image_url.clone()));
        attributes.insert(
            "direction".into(),
            Value::from(self.preset.direction_code.clone().unwrap_or_default()),
        );
        attributes.insert(
            "presentation_name".into(),
            Value::from(self.preset.presentation_name.clone()),
        );
        attributes.insert(
            "nearest_weather_station_id".into(),
            self.nearest_weather_station_id.map_or(Value::Null, Value::from),
        );
        attributes.insert(
            "last_updated".into(),
            self.last_updated()
                .map_or(Value::Null, |t| Value::from(t.to_rfc3339())),
        );
        attributes.insert("frame_interval".into(), Value::from(FRAME_INTERVAL.as_secs()));
        attributes.insert(
            "entity_picture".into(),
            Value::from(self.preset.image_url.clone()),
        );

        EntityState {
            entity_id: self.entity_id(),
            unique_id: self.unique_id(),
            platform: Platform::Camera,
            name: self.name(),
            state: "idle".to_string(),
            icon: None,
            available: self.is_available(),
            attributes,
            device_info: weathercam_device_info(&self.entry_id),
        }
    }
}

pub fn camera_entity_id(preset_id: &str) -> String {
    format!("{CAMERA_ENTITY_PREFIX}{}", preset_id.to_lowercase())
}

/// Creates a camera for every configured preset the catalog knows about, in catalog order
pub fn build_cameras(
    entry_id: &str,
    data: &WeathercamData,
    catalog: &WeathercamCatalog,
    client: &reqwest::Client,
) -> Vec<WeathercamCamera> {
    let mut cameras = Vec::new();
    for config in &data.cameras {
        let Some(camera) = catalog.camera(&config.camera_id) else {
            warn!("Weathercam {} is not in the catalog", config.camera_id);
            continue;
        };
        debug!(
            camera_id = %config.camera_id,
            presets = config.presets.len(),
            "Processing camera {}",
            config.camera_name
        );
        for preset in camera.presets.iter().filter(|p| config.presets.contains(&p.id)) {
            cameras.push(WeathercamCamera::new(
                entry_id,
                &config.camera_id,
                &config.camera_name,
                preset.clone(),
                camera.nearest_weather_station_id,
                client.clone(),
            ));
        }
    }
    cameras
}

/// Camera entity ids in `known` that no longer match a configured preset
pub fn stale_camera_entities(known: &[String], data: &WeathercamData) -> Vec<String> {
    let expected: HashSet<String> = data
        .preset_ids()
        .into_iter()
        .map(camera_entity_id)
        .collect();
    known
        .iter()
        .filter(|id| id.starts_with(CAMERA_ENTITY_PREFIX) && !expected.contains(*id))
        .cloned()
        .collect()
}

/// Removes camera entities left behind by presets that were deselected
pub async fn cleanup_removed_cameras(
    sink: &dyn EntitySink,
    data: &WeathercamData,
) -> anyhow::Result<usize> {
    let known = sink.entity_ids().await?;
    let stale = stale_camera_entities(&known, data);
    for entity_id in &stale {
        info!("Removing weathercam entity {entity_id} (preset no longer in config)");
        sink.remove(entity_id).await?;
    }
    Ok(stale.len())
}
