use crate::constants::{situation_type_icon, situation_type_label, SituationType};
use crate::coordinator::CoordinatorData;
use crate::digitraffic_api::{Announcement, Feature, Geometry};
use crate::entity::{
    count_sensor_unique_id, message_sensor_unique_id, slugify, traffic_device_info, EntityState,
    Platform,
};
use crate::filter::MessageFilter;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// Everything about a traffic message entry that shapes its sensors
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub entry_id: String,
    /// Stable object id of the entry; every entity id of the entry starts with it
    pub object_id: String,
    pub title: String,
    pub municipalities: Vec<String>,
    pub situation_types: Option<Vec<SituationType>>,
    pub include_raw_data: bool,
    pub per_message_sensors: bool,
}

/// Sensor reporting how many active messages match one filter
#[derive(Debug, Clone)]
pub struct CountSensor {
    entry_id: String,
    object_id: String,
    title: String,
    municipality: Option<String>,
    filter: MessageFilter,
    include_raw_data: bool,
}

impl CountSensor {
    /// The `_all` sensor: no municipality filtering
    pub fn all(config: &SensorConfig) -> Self {
        Self {
            entry_id: config.entry_id.clone(),
            object_id: config.object_id.clone(),
            title: config.title.clone(),
            municipality: None,
            filter: MessageFilter::all().with_situation_types(config.situation_types.clone()),
            include_raw_data: config.include_raw_data,
        }
    }

    pub fn for_municipality(config: &SensorConfig, municipality: &str) -> Self {
        Self {
            entry_id: config.entry_id.clone(),
            object_id: config.object_id.clone(),
            title: config.title.clone(),
            municipality: Some(municipality.to_string()),
            filter: MessageFilter::new(&[municipality], config.situation_types.clone()),
            include_raw_data: config.include_raw_data,
        }
    }

    pub fn unique_id(&self) -> String {
        count_sensor_unique_id(&self.entry_id, self.municipality.as_deref())
    }

    pub fn entity_id(&self) -> String {
        let base = format!("sensor.digitraffic_{}", self.object_id);
        match &self.municipality {
            None => format!("{base}_all"),
            Some(m) => format!("{base}_{}", slugify(m)),
        }
    }

    pub fn render(&self, data: &CoordinatorData) -> EntityState {
        let matches = self.filter.apply(&data.features);

        let mut attributes = Map::new();
        attributes.insert(
            "municipality".into(),
            self.municipality.clone().map_or(Value::Null, Value::String),
        );
        attributes.insert(
            "messages".into(),
            Value::Array(matches.iter().map(|f| message_summary(f)).collect()),
        );
        attributes.insert(
            "last_update".into(),
            data.last_update_time
                .map_or(Value::Null, |t| Value::String(t.to_rfc3339())),
        );
        if self.include_raw_data {
            attributes.insert("raw".into(), json!(matches));
        }

        let name = match &self.municipality {
            None => self.title.clone(),
            Some(m) => format!("{} {m}", self.title),
        };

        EntityState {
            entity_id: self.entity_id(),
            unique_id: self.unique_id(),
            platform: Platform::Sensor,
            name,
            state: matches.len().to_string(),
            icon: Some("mdi:alert-circle".to_string()),
            available: true,
            attributes,
            device_info: traffic_device_info(&self.entry_id, &self.title),
        }
    }
}

fn message_summary(feature: &Feature) -> Value {
    json!({
        "situation_id": feature.situation_id(),
        "situation_type": feature.situation_type(),
        "title": feature.title(),
        "municipalities": feature.municipalities(),
    })
}

/// One sensor per active traffic message and entry, keyed by its situation id
pub fn message_sensor(config: &SensorConfig, feature: &Feature) -> Option<EntityState> {
    let situation_id = feature.situation_id()?;
    let announcements = &feature.properties.announcements;
    let situation_type = feature.situation_type().unwrap_or("UNKNOWN");

    let (latitude, longitude) = extract_coordinates(feature.geometry.as_ref());
    let (municipalities, road, direction) = extract_location_info(announcements);
    let message_title = feature.title();

    let geojson = json!({
        "type": "Feature",
        "geometry": {
            "type": feature.geometry.as_ref().map_or("LineString", |g| g.kind.as_str()),
            "coordinates": feature
                .geometry
                .as_ref()
                .map_or_else(|| json!([]), |g| g.coordinates.clone()),
        },
        "properties": {
            "title": message_title,
            "situation_id": situation_id,
            "situation_type": feature.situation_type(),
        },
    });

    let mut attributes = Map::new();
    attributes.insert("situation_id".into(), json!(situation_id));
    attributes.insert("title".into(), json!(message_title));
    attributes.insert("description".into(), json!(extract_description(announcements)));
    attributes.insert("latitude".into(), json!(latitude));
    attributes.insert("longitude".into(), json!(longitude));
    attributes.insert(
        "situation_type_label".into(),
        json!(situation_type_label(situation_type)),
    );
    attributes.insert("release_time".into(), json!(feature.properties.release_time));
    attributes.insert(
        "updated_time".into(),
        json!(feature.properties.data_updated_time),
    );
    attributes.insert(
        "municipalities".into(),
        if municipalities.is_empty() {
            Value::Null
        } else {
            json!(municipalities.join(", "))
        },
    );
    attributes.insert("road".into(), json!(road));
    attributes.insert("direction".into(), json!(direction));
    attributes.insert("geojson".into(), geojson);

    Some(EntityState {
        entity_id: format!(
            "sensor.digitraffic_{}_tm_{}",
            config.object_id,
            slugify(situation_id)
        ),
        unique_id: message_sensor_unique_id(&config.entry_id, situation_id),
        platform: Platform::Sensor,
        name: message_title
            .map(str::to_string)
            .unwrap_or_else(|| format!("Traffic Message {situation_id}")),
        state: "active".to_string(),
        icon: Some(situation_type_icon(situation_type).to_string()),
        available: true,
        attributes,
        device_info: traffic_device_info(&config.entry_id, &config.title),
    })
}

/// Every sensor a traffic message entry should currently expose
pub fn build_sensor_entities(config: &SensorConfig, data: &CoordinatorData) -> Vec<EntityState> {
    let mut entities = vec![CountSensor::all(config).render(data)];
    entities.extend(
        config
            .municipalities
            .iter()
            .map(|m| CountSensor::for_municipality(config, m).render(data)),
    );

    if config.per_message_sensors {
        let entry_filter =
            MessageFilter::new(config.municipalities.as_slice(), config.situation_types.clone());
        let mut seen = HashSet::new();
        for feature in entry_filter.apply(&data.features) {
            let Some(situation_id) = feature.situation_id() else {
                continue;
            };
            if !seen.insert(situation_id) {
                continue;
            }
            entities.extend(message_sensor(config, feature));
        }
    }
    entities
}

/// Latitude and longitude of the first point of a geometry.
///
/// GeoJSON stores positions as `[lon, lat]`; nested line geometries are
/// descended until the first position is found.
pub fn extract_coordinates(geometry: Option<&Geometry>) -> (Option<f64>, Option<f64>) {
    let mut coordinates = match geometry {
        Some(g) => &g.coordinates,
        None => return (None, None),
    };
    loop {
        let Some(items) = coordinates.as_array() else {
            return (None, None);
        };
        match items.first() {
            Some(Value::Array(_)) => coordinates = &items[0],
            Some(Value::Number(_)) if items.len() >= 2 => {
                return (items[1].as_f64(), items[0].as_f64());
            }
            _ => return (None, None),
        }
    }
}

/// Announcement comments followed by the feature names, joined with ` | `
pub fn extract_description(announcements: &[Announcement]) -> Option<String> {
    let mut parts: Vec<String> = announcements
        .iter()
        .filter_map(|a| a.comment.clone())
        .filter(|c| !c.is_empty())
        .collect();

    let feature_names: Vec<&str> = announcements
        .iter()
        .flat_map(|a| a.features.iter())
        .filter_map(|f| f.name.as_deref())
        .filter(|n| !n.is_empty())
        .collect();
    if !feature_names.is_empty() {
        parts.push(feature_names.join(", "));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

/// Municipalities, road number and direction from the first announcement's road address
pub fn extract_location_info(
    announcements: &[Announcement],
) -> (Vec<String>, Option<i64>, Option<String>) {
    let Some(location) = announcements
        .first()
        .and_then(|a| a.location_details.as_ref())
        .and_then(|d| d.road_address_location.as_ref())
    else {
        return (Vec::new(), None, None);
    };

    let primary = location
        .primary_point
        .as_ref()
        .and_then(|p| p.municipality.clone());
    let secondary = location
        .secondary_point
        .as_ref()
        .and_then(|p| p.municipality.clone());

    let mut municipalities = Vec::new();
    if let Some(primary) = &primary {
        municipalities.push(primary.clone());
    }
    if let Some(secondary) = secondary {
        if Some(&secondary) != primary.as_ref() {
            municipalities.push(secondary);
        }
    }

    let road = location.primary_point.as_ref().and_then(|p| p.road_number);
    (municipalities, road, location.direction.clone())
}
