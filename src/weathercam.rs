//! Static weathercam catalog.
//!
//! The catalog is produced offline by `preprocess-weathercams` so the config
//! flow can list municipalities, cameras and presets without hitting the API
//! once per station.

use crate::digitraffic_api::DigitrafficApiClient;
use anyhow::Context;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Pause between station detail requests during preprocessing
const PREPROCESS_REQUEST_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogCamera {
    pub name: String,
    pub municipality: String,
    #[serde(default)]
    pub presets: Vec<CatalogPreset>,
    #[serde(default)]
    pub names: HashMap<String, String>,
    #[serde(default)]
    pub nearest_weather_station_id: Option<i64>,
}

impl CatalogCamera {
    /// Finnish name when available, otherwise the station name
    pub fn display_name(&self) -> &str {
        self.names
            .get("fi")
            .map(String::as_str)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.name)
    }

    pub fn preset(&self, preset_id: &str) -> Option<&CatalogPreset> {
        self.presets.iter().find(|p| p.id == preset_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPreset {
    pub id: String,
    #[serde(default)]
    pub presentation_name: String,
    #[serde(default)]
    pub image_url: String,
    /// Only present on the processed catalog for cameras that report a direction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction_code: Option<String>,
}

impl CatalogPreset {
    pub fn display_name(&self) -> &str {
        if self.presentation_name.is_empty() {
            &self.id
        } else {
            &self.presentation_name
        }
    }
}

/// Option shown in a camera selection form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraChoice {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeathercamCatalog {
    cameras: BTreeMap<String, CatalogCamera>,
}

impl WeathercamCatalog {
    pub fn from_cameras(cameras: impl IntoIterator<Item = (String, CatalogCamera)>) -> Self {
        Self {
            cameras: cameras.into_iter().collect(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Weathercam data file {} not readable", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Weathercam data file {} is not valid", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn camera(&self, camera_id: &str) -> Option<&CatalogCamera> {
        self.cameras.get(camera_id)
    }

    /// Sorted, without duplicates
    pub fn municipalities_with_cameras(&self) -> Vec<String> {
        self.cameras
            .values()
            .map(|c| c.municipality.as_str())
            .filter(|m| !m.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn cameras_in_municipality(&self, municipality: &str) -> Vec<CameraChoice> {
        self.cameras
            .iter()
            .filter(|(_, c)| c.municipality == municipality)
            .map(|(id, c)| CameraChoice {
                id: id.clone(),
                name: c.display_name().to_string(),
            })
            .collect()
    }

    pub fn presets(&self, camera_id: &str) -> &[CatalogPreset] {
        self.cameras
            .get(camera_id)
            .map(|c| c.presets.as_slice())
            .unwrap_or_default()
    }

    /// Number of presets per municipality, for the preprocessing summary
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut per_municipality = BTreeMap::new();
        for camera in self.cameras.values() {
            *per_municipality.entry(camera.municipality.clone()).or_insert(0) += 1;
        }
        per_municipality
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StationDetails {
    properties: StationProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StationProperties {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    municipality: Option<String>,
    #[serde(default)]
    presets: Vec<RawPreset>,
    #[serde(default)]
    names: HashMap<String, String>,
    #[serde(default)]
    nearest_weather_station_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPreset {
    id: String,
    #[serde(default)]
    presentation_name: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    in_collection: bool,
    #[serde(default)]
    direction_code: Option<String>,
}

/// Converts one station detail response into a catalog camera.
/// Presets that are not in the public collection are dropped.
pub fn camera_from_station_details(
    camera_id: &str,
    details: &serde_json::Value,
) -> anyhow::Result<CatalogCamera> {
    let details: StationDetails = serde_json::from_value(details.clone())
        .with_context(|| format!("Unexpected station details for {camera_id}"))?;
    let props = details.properties;

    Ok(CatalogCamera {
        name: props.name.unwrap_or_else(|| camera_id.to_string()),
        municipality: props.municipality.unwrap_or_else(|| "Unknown".to_string()),
        presets: props
            .presets
            .into_iter()
            .filter(|p| p.in_collection)
            .map(|p| CatalogPreset {
                id: p.id,
                presentation_name: p.presentation_name.unwrap_or_default(),
                image_url: p.image_url.unwrap_or_default(),
                direction_code: p.direction_code,
            })
            .collect(),
        names: props.names,
        nearest_weather_station_id: props.nearest_weather_station_id,
    })
}

/// Builds a catalog from raw station details keyed by camera id (the archived API responses)
pub fn catalog_from_raw(raw: &BTreeMap<String, serde_json::Value>) -> (WeathercamCatalog, Vec<String>) {
    let mut cameras = Vec::new();
    let mut failed = Vec::new();
    for (camera_id, details) in raw {
        match camera_from_station_details(camera_id, details) {
            Ok(camera) => cameras.push((camera_id.clone(), camera)),
            Err(e) => {
                warn!("Skipping weathercam {camera_id}: {e:#}");
                failed.push(camera_id.clone());
            }
        }
    }
    (WeathercamCatalog::from_cameras(cameras), failed)
}

/// Fetches every station and its details from the API.
///
/// Returns the catalog, the raw detail responses and the ids that could not be fetched.
pub async fn fetch_catalog(
    api: &DigitrafficApiClient,
) -> anyhow::Result<(WeathercamCatalog, BTreeMap<String, serde_json::Value>, Vec<String>)> {
    let stations = api
        .fetch_weathercam_stations()
        .await
        .context("Failed to list weathercam stations")?;
    let total = stations.features.len();
    info!("Processing {total} weathercams");

    let mut raw = BTreeMap::new();
    let mut failed = Vec::new();
    for (i, station) in stations.features.iter().enumerate() {
        info!(
            "[{}/{}] Fetching details for {} ({})",
            i + 1,
            total,
            station.id,
            station.properties.name
        );
        match api.fetch_weathercam_station(&station.id).await {
            Ok(details) => {
                raw.insert(station.id.clone(), details);
            }
            Err(e) => {
                warn!("Failed to fetch weathercam {}: {e}", station.id);
                failed.push(station.id.clone());
            }
        }
        tokio::time::sleep(PREPROCESS_REQUEST_DELAY).await;
    }

    let (catalog, mut invalid) = catalog_from_raw(&raw);
    failed.append(&mut invalid);
    Ok((catalog, raw, failed))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_catalog() -> WeathercamCatalog {
        serde_json::from_value(json!({
            "C01503": {
                "name": "Tie 1 Espoo, Kehä III",
                "municipality": "Espoo",
                "names": {"fi": "Espoo Kehä III", "sv": "Esbo Ring III"},
                "nearestWeatherStationId": 1013,
                "presets": [
                    {"id": "C0150301", "presentationName": "Helsinkiin", "imageUrl": "https://weathercam.digitraffic.fi/C0150301.jpg"},
                    {"id": "C0150302", "presentationName": "Turkuun", "imageUrl": "https://weathercam.digitraffic.fi/C0150302.jpg"}
                ]
            },
            "C01504": {
                "name": "Tie 2 Espoo",
                "municipality": "Espoo",
                "presets": []
            },
            "C04507": {
                "name": "Tie 4 Oulu",
                "municipality": "Oulu",
                "presets": [
                    {"id": "C0450701", "presentationName": "", "imageUrl": "https://weathercam.digitraffic.fi/C0450701.jpg"}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_catalog_queries() {
        let catalog = sample_catalog();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.municipalities_with_cameras(), vec!["Espoo", "Oulu"]);

        let espoo = catalog.cameras_in_municipality("Espoo");
        assert_eq!(
            espoo,
            vec![
                CameraChoice {
                    id: "C01503".into(),
                    name: "Espoo Kehä III".into()
                },
                CameraChoice {
                    id: "C01504".into(),
                    name: "Tie 2 Espoo".into()
                },
            ]
        );
        assert!(catalog.cameras_in_municipality("Turku").is_empty());

        assert_eq!(catalog.presets("C01503").len(), 2);
        assert!(catalog.presets("missing").is_empty());
        assert_eq!(catalog.presets("C04507")[0].display_name(), "C0450701");
        assert_eq!(catalog.summary()["Espoo"], 2);
    }

    #[test]
    fn test_station_details_keep_only_collection_presets() {
        let details = json!({
            "id": "C01503",
            "properties": {
                "name": "Tie 1 Espoo",
                "municipality": "Espoo",
                "municipalityCode": 49,
                "names": {"fi": "Espoo Kehä III"},
                "nearestWeatherStationId": 1013,
                "presets": [
                    {"id": "C0150301", "presentationName": "Helsinkiin", "imageUrl": "u1", "inCollection": true},
                    {"id": "C0150309", "presentationName": "Huolto", "imageUrl": "u9", "inCollection": false}
                ]
            }
        });
        let camera = camera_from_station_details("C01503", &details).unwrap();
        assert_eq!(camera.presets.len(), 1);
        assert_eq!(camera.presets[0].id, "C0150301");
        assert_eq!(camera.nearest_weather_station_id, Some(1013));
        assert_eq!(camera.display_name(), "Espoo Kehä III");
    }

    #[test]
    fn test_catalog_from_raw_reports_failures() {
        let mut raw = BTreeMap::new();
        raw.insert("good".to_string(), json!({"properties": {"municipality": "Oulu"}}));
        raw.insert("bad".to_string(), json!({"nothing": true}));
        let (catalog, failed) = catalog_from_raw(&raw);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.camera("good").unwrap().name, "good");
        assert_eq!(failed, vec!["bad"]);
    }

    #[test]
    fn test_catalog_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("weathercam_data.json");
        let catalog = sample_catalog();
        catalog.save(&path).unwrap();
        assert_eq!(WeathercamCatalog::load(&path).unwrap(), catalog);
        assert!(WeathercamCatalog::load(dir.path().join("missing.json")).is_err());
    }

    #[tokio::test]
    async fn test_fetch_catalog_from_api() {
        let mut server = mockito::Server::new_async().await;
        let _list = server
            .mock("GET", "/api/weathercam/v1/stations")
            .match_query(mockito::Matcher::UrlEncoded("lastUpdated".into(), "false".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"features": [{"id": "C1", "properties": {"name": "One"}}, {"id": "C2", "properties": {"name": "Two"}}]}"#)
            .create_async()
            .await;
        let _one = server
            .mock("GET", "/api/weathercam/v1/stations/C1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"properties": {"name": "One", "municipality": "Kemi", "presets": [{"id": "C101", "inCollection": true}]}}"#)
            .create_async()
            .await;
        let _two = server
            .mock("GET", "/api/weathercam/v1/stations/C2")
            .with_status(404)
            .create_async()
            .await;

        let api = DigitrafficApiClient::with_base_url(reqwest::Client::new(), server.url());
        let (catalog, raw, failed) = fetch_catalog(&api).await.unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.presets("C1")[0].id, "C101");
        assert_eq!(raw.len(), 1);
        assert_eq!(failed, vec!["C2"]);
    }
}
