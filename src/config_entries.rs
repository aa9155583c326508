//! Config entries: one persisted record per configured service.

use crate::constants::SituationType;
use crate::entity::slugify;
use crate::error::StoreError;
use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const STORE_VERSION: u32 = 1;

fn all_situation_types() -> Vec<SituationType> {
    SituationType::ALL.to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum EntryData {
    TrafficMessages(TrafficMessagesData),
    Weathercam(WeathercamData),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficMessagesData {
    /// Empty means every municipality
    #[serde(default)]
    pub municipalities: Vec<String>,
    #[serde(default = "all_situation_types")]
    pub situation_types: Vec<SituationType>,
    #[serde(default)]
    pub include_raw_data: bool,
}

impl Default for TrafficMessagesData {
    fn default() -> Self {
        Self {
            municipalities: Vec::new(),
            situation_types: all_situation_types(),
            include_raw_data: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeathercamData {
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
}

impl WeathercamData {
    /// Every preset id selected across all cameras
    pub fn preset_ids(&self) -> Vec<&str> {
        self.cameras
            .iter()
            .flat_map(|c| c.presets.iter().map(String::as_str))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub camera_id: String,
    pub camera_name: String,
    #[serde(default)]
    pub municipality: String,
    #[serde(default)]
    pub presets: Vec<String>,
}

/// Overrides set through the options flow, traffic message entries only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub municipalities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub situation_types: Option<Vec<SituationType>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub title: String,
    /// Fixed when the entry is created; entity ids derive from this, never from the title
    #[serde(default)]
    pub object_id: String,
    pub data: EntryData,
    #[serde(default)]
    pub options: EntryOptions,
}

impl ConfigEntry {
    pub fn new(title: impl Into<String>, data: EntryData) -> Self {
        let title = title.into();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            object_id: slugify(&title),
            title,
            data,
            options: EntryOptions::default(),
        }
    }

    /// Object id used in this entry's entity ids. Entries stored without one
    /// fall back to their entry id.
    pub fn entity_object_id(&self) -> String {
        if self.object_id.is_empty() {
            self.entry_id.to_lowercase()
        } else {
            self.object_id.clone()
        }
    }

    pub fn traffic(&self) -> Option<&TrafficMessagesData> {
        match &self.data {
            EntryData::TrafficMessages(data) => Some(data),
            EntryData::Weathercam(_) => None,
        }
    }

    pub fn weathercam(&self) -> Option<&WeathercamData> {
        match &self.data {
            EntryData::Weathercam(data) => Some(data),
            EntryData::TrafficMessages(_) => None,
        }
    }

    /// Municipalities in effect: options win over the data captured by the config flow
    pub fn effective_municipalities(&self) -> Vec<String> {
        match (&self.options.municipalities, self.traffic()) {
            (Some(municipalities), _) => municipalities.clone(),
            (None, Some(data)) => data.municipalities.clone(),
            (None, None) => Vec::new(),
        }
    }

    pub fn effective_situation_types(&self) -> Vec<SituationType> {
        match (&self.options.situation_types, self.traffic()) {
            (Some(types), _) => types.clone(),
            (None, Some(data)) => data.situation_types.clone(),
            (None, None) => all_situation_types(),
        }
    }

    /// Situation types to request from the API, `None` when the selection covers everything
    pub fn situation_type_filter(&self) -> Option<Vec<SituationType>> {
        let mut types = self.effective_situation_types();
        types.sort();
        types.dedup();
        if types.is_empty() || types.len() == SituationType::ALL.len() {
            None
        } else {
            Some(types)
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    entries: Vec<ConfigEntry>,
}

/// Config entries backed by a JSON file. Every mutation is written through immediately.
#[derive(Debug, Default)]
pub struct ConfigEntryStore {
    path: Option<PathBuf>,
    entries: Vec<ConfigEntry>,
}

impl ConfigEntryStore {
    /// Loads entries from `path`; a missing file is an empty store
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => {
                let file: StoreFile =
                    serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                file.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        debug!(path = %path.display(), entries = entries.len(), "Loaded config entries");
        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// Store that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    pub fn get(&self, entry_id: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|e| e.entry_id == entry_id)
    }

    /// Adds an entry, suffixing its object id (`_2`, `_3`, ...) if another entry already uses it
    pub fn add(&mut self, mut entry: ConfigEntry) -> Result<(), StoreError> {
        entry.object_id = self.free_object_id(&entry.entity_object_id());
        self.entries.push(entry);
        self.save()
    }

    fn free_object_id(&self, wanted: &str) -> String {
        let taken = |candidate: &str| {
            self.entries
                .iter()
                .any(|e| e.entity_object_id() == candidate)
        };
        if !taken(wanted) {
            return wanted.to_string();
        }
        (2..)
            .map(|n| format!("{wanted}_{n}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| wanted.to_string())
    }

    /// Replaces the entry with the same id
    pub fn update(&mut self, entry: ConfigEntry) -> Result<(), StoreError> {
        let slot = self
            .entries
            .iter_mut()
            .find(|e| e.entry_id == entry.entry_id)
            .ok_or_else(|| StoreError::NotFound(entry.entry_id.clone()))?;
        *slot = entry;
        self.save()
    }

    pub fn remove(&mut self, entry_id: &str) -> Result<ConfigEntry, StoreError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.entry_id == entry_id)
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))?;
        let removed = self.entries.remove(index);
        self.save()?;
        Ok(removed)
    }

    fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = StoreFile {
            version: STORE_VERSION,
            entries: self.entries.clone(),
        };
        let contents = serde_json::to_string_pretty(&file)?;

        // Write then rename so a crash never leaves a half-written store
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents).map_err(|source| StoreError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })
    }
}
