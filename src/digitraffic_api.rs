use crate::constants::{
    SituationType, DEFAULT_API_BASE, DIGITRAFFIC_USER, TRAFFIC_MESSAGES_PATH,
    WEATHERCAM_STATIONS_PATH,
};
use crate::error::ApiError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};

/// Anything that can produce the current set of active traffic messages
#[async_trait]
pub trait TrafficMessageSource: Send + Sync {
    async fn fetch_active_messages(
        &self,
        situation_types: Option<&[SituationType]>,
    ) -> Result<TrafficMessageCollection, ApiError>;
}

/// Thin client for the public Digitraffic road API.
///
/// Each call is a single GET; there is no retry or backoff. The underlying
/// `reqwest::Client` is shared, so cloning this is cheap.
#[derive(Clone, Debug)]
pub struct DigitrafficApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl DigitrafficApiClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, DEFAULT_API_BASE)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lists all weathercam stations (summary only)
    pub async fn fetch_weathercam_stations(&self) -> Result<WeathercamStationList, ApiError> {
        self.get_json(
            WEATHERCAM_STATIONS_PATH,
            &[("lastUpdated", "false".to_string())],
        )
        .await
    }

    /// Full details for a single station, returned untyped so it can be archived as-is
    pub async fn fetch_weathercam_station(
        &self,
        station_id: &str,
    ) -> Result<serde_json::Value, ApiError> {
        self.get_json(&format!("{WEATHERCAM_STATIONS_PATH}/{station_id}"), &[])
            .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .header("Digitraffic-User", DIGITRAFFIC_USER)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status { url, status });
        }

        response
            .json()
            .await
            .map_err(|source| ApiError::Decode { url, source })
    }
}

#[async_trait]
impl TrafficMessageSource for DigitrafficApiClient {
    async fn fetch_active_messages(
        &self,
        situation_types: Option<&[SituationType]>,
    ) -> Result<TrafficMessageCollection, ApiError> {
        let mut query = vec![
            ("inactiveHours", "0".to_string()),
            ("includeAreaGeometry", "false".to_string()),
        ];
        // The API takes one situationType parameter per selected type
        for situation_type in situation_types.unwrap_or_default() {
            query.push(("situationType", situation_type.as_str().to_string()));
        }
        self.get_json(TRAFFIC_MESSAGES_PATH, &query).await
    }
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficMessageCollection {
    pub features: Vec<Feature>,
}

/// One traffic message as a GeoJSON feature
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Feature {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    pub properties: FeatureProperties,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// Nesting depth depends on `kind`, so this stays untyped
    pub coordinates: serde_json::Value,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeatureProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub situation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub situation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_updated_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipality: Option<String>,
    pub announcements: Vec<Announcement>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Announcement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub features: Vec<AnnouncementFeature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_details: Option<LocationDetails>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnouncementFeature {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocationDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub road_address_location: Option<RoadAddressLocation>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoadAddressLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_point: Option<RoadPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_point: Option<RoadPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoadPoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub road_number: Option<i64>,
}

impl Feature {
    pub fn situation_id(&self) -> Option<&str> {
        self.properties
            .situation_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }

    pub fn situation_type(&self) -> Option<&str> {
        self.properties.situation_type.as_deref()
    }

    /// Title of the first announcement, if it has one
    pub fn title(&self) -> Option<&str> {
        self.properties
            .announcements
            .first()
            .and_then(|a| a.title.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// Every municipality this message touches, in order of appearance and without repeats.
    ///
    /// Looks at the flat `municipality` property and at the primary and
    /// secondary road points of every announcement.
    pub fn municipalities(&self) -> Vec<&str> {
        let road_points = self.properties.announcements.iter().flat_map(|announcement| {
            let location = announcement
                .location_details
                .as_ref()
                .and_then(|d| d.road_address_location.as_ref());
            [
                location.and_then(|l| l.primary_point.as_ref()),
                location.and_then(|l| l.secondary_point.as_ref()),
            ]
        });
        let candidates = std::iter::once(self.properties.municipality.as_deref()).chain(
            road_points.map(|point| point.and_then(|p| p.municipality.as_deref())),
        );

        let mut found: Vec<&str> = Vec::new();
        for municipality in candidates.flatten() {
            if !municipality.is_empty() && !found.contains(&municipality) {
                found.push(municipality);
            }
        }
        found
    }
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeathercamStationList {
    pub features: Vec<WeathercamStationSummary>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeathercamStationSummary {
    pub id: String,
    pub properties: WeathercamStationSummaryProperties,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeathercamStationSummaryProperties {
    pub name: String,
}
