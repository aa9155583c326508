//! Host-visible entity records and the sink they are published to.
//!
//! Entities are plain values rebuilt from every coordinator snapshot. The
//! identity strings derived here are persisted by Home Assistant, so their
//! formats must never change.

use crate::constants::{ATTRIBUTION, DOMAIN, MANUFACTURER, MODEL};
use async_trait::async_trait;
use serde_derive::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Sensor,
    Camera,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Sensor => "sensor",
            Platform::Camera => "camera",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<(String, String)>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
}

impl DeviceInfo {
    /// Config entry owning the device
    pub fn config_entry_id(&self) -> Option<&str> {
        self.identifiers
            .iter()
            .find(|(domain, _)| domain == DOMAIN)
            .map(|(_, id)| id.as_str())
    }
}

/// Device grouping every traffic message entity of one config entry
pub fn traffic_device_info(entry_id: &str, title: &str) -> DeviceInfo {
    DeviceInfo {
        identifiers: vec![(DOMAIN.to_string(), entry_id.to_string())],
        name: title.to_string(),
        manufacturer: MANUFACTURER.to_string(),
        model: MODEL.to_string(),
        entry_type: None,
    }
}

pub fn weathercam_device_info(entry_id: &str) -> DeviceInfo {
    DeviceInfo {
        identifiers: vec![(DOMAIN.to_string(), entry_id.to_string())],
        name: "Digitraffic Weathercams".to_string(),
        manufacturer: MODEL.to_string(),
        model: "Weathercam".to_string(),
        entry_type: Some("service".to_string()),
    }
}

/// Host attribute naming the config entry an entity belongs to
pub const CONFIG_ENTRY_ATTRIBUTE: &str = "config_entry_id";

/// A rendered entity, ready to hand to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub entity_id: String,
    pub unique_id: String,
    pub platform: Platform,
    pub name: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub available: bool,
    pub attributes: Map<String, Value>,
    pub device_info: DeviceInfo,
}

impl EntityState {
    /// Attributes as sent to Home Assistant: entity attributes plus name, icon and attribution
    pub fn host_attributes(&self) -> Map<String, Value> {
        let mut attributes = self.attributes.clone();
        attributes.insert("friendly_name".into(), Value::String(self.name.clone()));
        if let Some(icon) = &self.icon {
            attributes.insert("icon".into(), Value::String(icon.clone()));
        }
        attributes.insert("attribution".into(), Value::String(ATTRIBUTION.to_string()));
        if let Some(entry_id) = self.device_info.config_entry_id() {
            attributes.insert(CONFIG_ENTRY_ATTRIBUTE.into(), Value::String(entry_id.to_string()));
        }
        attributes
    }
}

/// `{entry_id}_all` for the unfiltered sensor, `{entry_id}_{municipality_lower}` otherwise
pub fn count_sensor_unique_id(entry_id: &str, municipality: Option<&str>) -> String {
    match municipality {
        None => format!("{entry_id}_all"),
        Some(m) => format!("{entry_id}_{}", m.to_lowercase()),
    }
}

pub fn message_sensor_unique_id(entry_id: &str, situation_id: &str) -> String {
    format!("{entry_id}_tm_{situation_id}")
}

pub fn camera_unique_id(entry_id: &str, preset_id: &str) -> String {
    format!("{entry_id}_wc_{preset_id}")
}

/// Lower-case ASCII object id suitable for an entity id
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        let c = match c {
            'ä' | 'å' | 'á' | 'à' => 'a',
            'ö' | 'ø' | 'ó' => 'o',
            'é' | 'è' => 'e',
            'ü' => 'u',
            c => c,
        };
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

/// Where rendered entities end up
#[async_trait]
pub trait EntitySink: Send + Sync {
    async fn publish(&self, entity: &EntityState) -> anyhow::Result<()>;
    async fn remove(&self, entity_id: &str) -> anyhow::Result<()>;
    /// Entity ids currently known to the sink, including ones published by earlier runs
    async fn entity_ids(&self) -> anyhow::Result<Vec<String>>;
}

/// Keeps the latest state of every entity in memory.
///
/// Used when no Home Assistant instance is configured, so the bridge can run
/// stand-alone and simply log what it would publish.
#[derive(Default)]
pub struct MemorySink {
    entities: Mutex<BTreeMap<String, EntityState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.entities
            .lock()
            .ok()
            .and_then(|entities| entities.get(entity_id).cloned())
    }

    pub fn ids(&self) -> Vec<String> {
        self.entities
            .lock()
            .map(|entities| entities.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EntitySink for MemorySink {
    async fn publish(&self, entity: &EntityState) -> anyhow::Result<()> {
        info!(
            entity_id = %entity.entity_id,
            state = %entity.state,
            "{}",
            entity.name
        );
        self.entities
            .lock()
            .map_err(|_| anyhow::anyhow!("entity store poisoned"))?
            .insert(entity.entity_id.clone(), entity.clone());
        Ok(())
    }

    async fn remove(&self, entity_id: &str) -> anyhow::Result<()> {
        info!(entity_id, "Entity removed");
        self.entities
            .lock()
            .map_err(|_| anyhow::anyhow!("entity store poisoned"))?
            .remove(entity_id);
        Ok(())
    }

    async fn entity_ids(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.ids())
    }
}
