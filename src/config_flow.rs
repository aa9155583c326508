//! Config, reconfigure and options flows.
//!
//! Each step takes `None` to show its form and `Some(input)` to submit it.
//! Invalid input comes back as the same form with an error keyed by field,
//! or by `base` for errors that concern the whole form.

use crate::config_entries::{
    CameraConfig, ConfigEntry, ConfigEntryStore, EntryData, TrafficMessagesData, WeathercamData,
};
use crate::constants::{canonical_municipality, SituationType, FINNISH_MUNICIPALITIES};
use crate::error::FlowError;
use crate::weathercam::WeathercamCatalog;
use serde_derive::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::info;

pub const WEATHERCAM_ENTRY_TITLE: &str = "Weathercams";
pub const RECONFIGURED_TRAFFIC_TITLE: &str = "Traffic Messages";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Form {
    pub step_id: &'static str,
    /// Choices for the step's select field, empty for free-form steps
    pub options: Vec<SelectOption>,
    pub defaults: Map<String, Value>,
    pub errors: BTreeMap<String, &'static str>,
    pub description_placeholders: BTreeMap<String, String>,
}

impl Form {
    fn new(step_id: &'static str) -> Self {
        Self {
            step_id,
            options: Vec::new(),
            defaults: Map::new(),
            errors: BTreeMap::new(),
            description_placeholders: BTreeMap::new(),
        }
    }

    fn options(mut self, options: Vec<SelectOption>) -> Self {
        self.options = options;
        self
    }

    fn default_value(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.defaults.insert(field.to_string(), value.into());
        self
    }

    fn error(mut self, field: &str, error: &'static str) -> Self {
        self.errors.insert(field.to_string(), error);
        self
    }

    fn placeholder(mut self, key: &str, value: impl Into<String>) -> Self {
        self.description_placeholders
            .insert(key.to_string(), value.into());
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    Menu {
        step_id: &'static str,
        menu_options: Vec<&'static str>,
    },
    Form(Form),
    /// A new entry for the caller to add to the store
    CreateEntry { entry: ConfigEntry },
    /// An existing entry was changed in the store
    UpdateEntry { entry_id: String },
    Abort {
        reason: &'static str,
        description_placeholders: BTreeMap<String, String>,
    },
}

impl FlowResult {
    fn abort(reason: &'static str) -> Self {
        FlowResult::Abort {
            reason,
            description_placeholders: BTreeMap::new(),
        }
    }

    fn abort_with(reason: &'static str, key: &str, value: impl Into<String>) -> Self {
        let mut description_placeholders = BTreeMap::new();
        description_placeholders.insert(key.to_string(), value.into());
        FlowResult::Abort {
            reason,
            description_placeholders,
        }
    }

    pub fn step_id(&self) -> Option<&'static str> {
        match self {
            FlowResult::Menu { step_id, .. } => Some(*step_id),
            FlowResult::Form(form) => Some(form.step_id),
            _ => None,
        }
    }
}

/// Input of the traffic message steps. Values are raw user strings and are validated on submit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficMessagesInput {
    /// Empty selects every municipality
    pub municipalities: Vec<String>,
    /// Empty selects every situation type
    pub situation_types: Vec<String>,
    pub include_raw_data: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ValidatedTraffic {
    municipalities: Vec<String>,
    situation_types: Vec<SituationType>,
}

fn validate_traffic(
    municipalities: &[String],
    situation_types: &[String],
) -> Result<ValidatedTraffic, (&'static str, &'static str)> {
    let mut canonical = Vec::with_capacity(municipalities.len());
    for m in municipalities {
        let Some(name) = canonical_municipality(m) else {
            return Err(("municipalities", "invalid_municipality"));
        };
        if !canonical.iter().any(|c: &String| c == name) {
            canonical.push(name.to_string());
        }
    }

    let mut types = Vec::with_capacity(situation_types.len());
    for t in situation_types {
        let Ok(parsed) = t.trim().to_uppercase().parse::<SituationType>() else {
            return Err(("situation_types", "invalid_situation_type"));
        };
        if !types.contains(&parsed) {
            types.push(parsed);
        }
    }
    if types.is_empty() {
        types = SituationType::ALL.to_vec();
    }

    Ok(ValidatedTraffic {
        municipalities: canonical,
        situation_types: types,
    })
}

/// `Traffic: <municipalities> - <types>`
pub fn default_service_name(municipalities: &[String], situation_types: &[SituationType]) -> String {
    let muni_part = match municipalities {
        [] => "All municipalities".to_string(),
        [single] => single.clone(),
        many => format!("{} municipalities", many.len()),
    };
    let type_part = match situation_types {
        [single] => single.label().to_string(),
        types if types.len() == SituationType::ALL.len() => "All types".to_string(),
        types => format!("{} types", types.len()),
    };
    format!("Traffic: {muni_part} - {type_part}")
}

fn municipality_options() -> Vec<SelectOption> {
    FINNISH_MUNICIPALITIES
        .iter()
        .map(|m| SelectOption::new(*m, *m))
        .collect()
}

fn traffic_form(step_id: &'static str, municipalities: &[String], types: &[SituationType]) -> Form {
    let types: Vec<Value> = types.iter().map(|t| Value::from(t.as_str())).collect();
    Form::new(step_id)
        .options(municipality_options())
        .default_value("municipalities", municipalities.to_vec())
        .default_value("situation_types", types)
}

fn sorted_key(municipalities: &[String], types: &[SituationType]) -> (Vec<String>, Vec<SituationType>) {
    let mut municipalities: Vec<String> = municipalities.iter().map(|m| m.to_lowercase()).collect();
    municipalities.sort();
    let mut types = types.to_vec();
    types.sort();
    types.dedup();
    (municipalities, types)
}

/// Step ids of the three weathercam selection steps, which differ between
/// creating the weathercam entry and adding a camera to it
struct WeathercamSteps {
    municipality: &'static str,
    camera: &'static str,
    presets: &'static str,
}

const CREATE_WEATHERCAM: WeathercamSteps = WeathercamSteps {
    municipality: "weathercam",
    camera: "weathercam_select",
    presets: "weathercam_presets",
};

const RECONFIGURE_WEATHERCAM: WeathercamSteps = WeathercamSteps {
    municipality: "reconfigure_weathercam_municipality",
    camera: "reconfigure_weathercam_camera",
    presets: "reconfigure_weathercam_presets",
};

enum PresetOutcome {
    Show(FlowResult),
    Selected(CameraConfig),
}

/// Wizard that creates new entries or reconfigures an existing one
pub struct ConfigFlow<'a> {
    store: &'a mut ConfigEntryStore,
    catalog: &'a WeathercamCatalog,
    traffic: Option<(ValidatedTraffic, bool)>,
    weathercam_municipality: Option<String>,
    weathercam_camera: Option<(String, String)>,
    reconfigure_entry_id: Option<String>,
}

impl<'a> ConfigFlow<'a> {
    pub fn new(store: &'a mut ConfigEntryStore, catalog: &'a WeathercamCatalog) -> Self {
        Self {
            store,
            catalog,
            traffic: None,
            weathercam_municipality: None,
            weathercam_camera: None,
            reconfigure_entry_id: None,
        }
    }

    pub fn step_user(&self) -> FlowResult {
        FlowResult::Menu {
            step_id: "user",
            menu_options: vec!["traffic_messages", "weathercam"],
        }
    }

    pub fn step_traffic_messages(
        &mut self,
        input: Option<TrafficMessagesInput>,
    ) -> Result<FlowResult, FlowError> {
        let form = traffic_form("traffic_messages", &[], &SituationType::ALL);
        let Some(input) = input else {
            return Ok(FlowResult::Form(form));
        };

        let validated = match validate_traffic(&input.municipalities, &input.situation_types) {
            Ok(validated) => validated,
            Err((field, error)) => return Ok(FlowResult::Form(form.error(field, error))),
        };

        let wanted = sorted_key(&validated.municipalities, &validated.situation_types);
        let duplicate = self.store.entries().iter().find(|entry| {
            entry.traffic().is_some()
                && sorted_key(
                    &entry.effective_municipalities(),
                    &entry.effective_situation_types(),
                ) == wanted
        });
        if let Some(existing) = duplicate {
            return Ok(FlowResult::Form(
                form.error("base", "duplicate_config")
                    .placeholder("existing_service", existing.title.clone()),
            ));
        }

        self.traffic = Some((validated, input.include_raw_data));
        self.step_traffic_messages_name(None)
    }

    pub fn step_traffic_messages_name(
        &mut self,
        service_name: Option<String>,
    ) -> Result<FlowResult, FlowError> {
        let Some((traffic, include_raw_data)) = &self.traffic else {
            return Err(FlowError::OutOfOrder {
                step: "traffic_messages_name",
                missing: "traffic_messages",
            });
        };
        let default_name = default_service_name(&traffic.municipalities, &traffic.situation_types);
        let form = Form::new("traffic_messages_name").default_value("service_name", default_name);

        let Some(service_name) = service_name else {
            return Ok(FlowResult::Form(form));
        };
        let service_name = service_name.trim().to_string();
        if service_name.is_empty() || self.store.entries().iter().any(|e| e.title == service_name) {
            return Ok(FlowResult::Form(form.error("service_name", "duplicate_name")));
        }

        let entry = ConfigEntry::new(
            service_name,
            EntryData::TrafficMessages(TrafficMessagesData {
                municipalities: traffic.municipalities.clone(),
                situation_types: traffic.situation_types.clone(),
                include_raw_data: *include_raw_data,
            }),
        );
        info!(entry_id = %entry.entry_id, title = %entry.title, "Created traffic message entry");
        Ok(FlowResult::CreateEntry { entry })
    }

    pub fn step_weathercam(&mut self, municipality: Option<String>) -> Result<FlowResult, FlowError> {
        if self.store.entries().iter().any(|e| e.weathercam().is_some()) {
            return Ok(FlowResult::abort_with(
                "single_instance_allowed",
                "entity_type",
                WEATHERCAM_ENTRY_TITLE,
            ));
        }
        self.weathercam_municipality_step(&CREATE_WEATHERCAM, municipality)
    }

    pub fn step_weathercam_select(&mut self, camera_id: Option<String>) -> Result<FlowResult, FlowError> {
        self.weathercam_camera_step(&CREATE_WEATHERCAM, camera_id)
    }

    pub fn step_weathercam_presets(
        &mut self,
        presets: Option<Vec<String>>,
    ) -> Result<FlowResult, FlowError> {
        match self.weathercam_presets_step(&CREATE_WEATHERCAM, presets)? {
            PresetOutcome::Show(result) => Ok(result),
            PresetOutcome::Selected(camera) => {
                let entry = ConfigEntry::new(
                    WEATHERCAM_ENTRY_TITLE,
                    EntryData::Weathercam(WeathercamData {
                        cameras: vec![camera],
                    }),
                );
                info!(entry_id = %entry.entry_id, "Created weathercam entry");
                Ok(FlowResult::CreateEntry { entry })
            }
        }
    }

    /// Starts reconfiguring an existing entry. Traffic message entries submit
    /// their new selection here; weathercam entries continue with the camera steps.
    pub fn step_reconfigure(
        &mut self,
        entry_id: &str,
        input: Option<TrafficMessagesInput>,
    ) -> Result<FlowResult, FlowError> {
        let Some(entry) = self.store.get(entry_id).cloned() else {
            return Ok(FlowResult::abort("entry_not_found"));
        };
        self.reconfigure_entry_id = Some(entry.entry_id.clone());

        let current = match &entry.data {
            EntryData::TrafficMessages(data) => data,
            EntryData::Weathercam(_) => {
                self.weathercam_municipality = None;
                self.weathercam_camera = None;
                return self.weathercam_municipality_step(&RECONFIGURE_WEATHERCAM, None);
            }
        };

        let form = traffic_form("reconfigure", &current.municipalities, &current.situation_types)
            .default_value("include_raw_data", current.include_raw_data);
        let Some(input) = input else {
            return Ok(FlowResult::Form(form));
        };
        let validated = match validate_traffic(&input.municipalities, &input.situation_types) {
            Ok(validated) => validated,
            Err((field, error)) => return Ok(FlowResult::Form(form.error(field, error))),
        };

        let mut updated = entry;
        updated.title = RECONFIGURED_TRAFFIC_TITLE.to_string();
        updated.data = EntryData::TrafficMessages(TrafficMessagesData {
            municipalities: validated.municipalities,
            situation_types: validated.situation_types,
            include_raw_data: input.include_raw_data,
        });
        // Options would otherwise keep overriding the new selection
        updated.options = Default::default();
        self.store.update(updated)?;
        Ok(FlowResult::abort("reconfigure_successful"))
    }

    pub fn step_reconfigure_weathercam_municipality(
        &mut self,
        municipality: Option<String>,
    ) -> Result<FlowResult, FlowError> {
        self.require_reconfigure_entry("reconfigure_weathercam_municipality")?;
        self.weathercam_municipality_step(&RECONFIGURE_WEATHERCAM, municipality)
    }

    pub fn step_reconfigure_weathercam_camera(
        &mut self,
        camera_id: Option<String>,
    ) -> Result<FlowResult, FlowError> {
        self.require_reconfigure_entry("reconfigure_weathercam_camera")?;
        self.weathercam_camera_step(&RECONFIGURE_WEATHERCAM, camera_id)
    }

    pub fn step_reconfigure_weathercam_presets(
        &mut self,
        presets: Option<Vec<String>>,
    ) -> Result<FlowResult, FlowError> {
        let entry_id = self.require_reconfigure_entry("reconfigure_weathercam_presets")?;
        let camera = match self.weathercam_presets_step(&RECONFIGURE_WEATHERCAM, presets)? {
            PresetOutcome::Show(result) => return Ok(result),
            PresetOutcome::Selected(camera) => camera,
        };

        let Some(mut entry) = self.store.get(&entry_id).cloned() else {
            return Ok(FlowResult::abort("entry_not_found"));
        };
        let EntryData::Weathercam(data) = &mut entry.data else {
            return Err(FlowError::WrongEntryType(entry_id, "weathercam"));
        };

        // Adding a camera that is already configured merges its presets
        match data.cameras.iter_mut().find(|c| c.camera_id == camera.camera_id) {
            Some(existing) => {
                for preset in camera.presets {
                    if !existing.presets.contains(&preset) {
                        existing.presets.push(preset);
                    }
                }
            }
            None => data.cameras.push(camera),
        }
        info!(
            entry_id = %entry.entry_id,
            cameras = data.cameras.len(),
            "Added camera to weathercam entry"
        );
        self.store.update(entry)?;
        Ok(FlowResult::abort("reconfigure_successful"))
    }

    fn require_reconfigure_entry(&self, step: &'static str) -> Result<String, FlowError> {
        self.reconfigure_entry_id.clone().ok_or(FlowError::OutOfOrder {
            step,
            missing: "reconfigure",
        })
    }

    fn weathercam_municipality_step(
        &mut self,
        steps: &WeathercamSteps,
        municipality: Option<String>,
    ) -> Result<FlowResult, FlowError> {
        let available = self.catalog.municipalities_with_cameras();
        let form = Form::new(steps.municipality).options(
            available
                .iter()
                .map(|m| SelectOption::new(m.clone(), m.clone()))
                .collect(),
        );
        let Some(municipality) = municipality else {
            return Ok(FlowResult::Form(form));
        };

        let wanted = municipality.trim().to_lowercase();
        match available.into_iter().find(|m| m.to_lowercase() == wanted) {
            Some(municipality) => {
                self.weathercam_municipality = Some(municipality);
                self.weathercam_camera_step(steps, None)
            }
            None => Ok(FlowResult::Form(form.error("municipality", "invalid_municipality"))),
        }
    }

    fn weathercam_camera_step(
        &mut self,
        steps: &WeathercamSteps,
        camera_id: Option<String>,
    ) -> Result<FlowResult, FlowError> {
        let Some(municipality) = self.weathercam_municipality.clone() else {
            return Err(FlowError::OutOfOrder {
                step: steps.camera,
                missing: "municipality",
            });
        };

        let cameras = self.catalog.cameras_in_municipality(&municipality);
        if cameras.is_empty() {
            return Ok(FlowResult::abort_with("no_cameras_found", "municipality", municipality));
        }
        let form = Form::new(steps.camera)
            .options(
                cameras
                    .iter()
                    .map(|c| SelectOption::new(c.id.clone(), c.name.clone()))
                    .collect(),
            )
            .placeholder("municipality", municipality);

        let Some(camera_id) = camera_id else {
            return Ok(FlowResult::Form(form));
        };
        match cameras.into_iter().find(|c| c.id == camera_id) {
            Some(camera) => {
                self.weathercam_camera = Some((camera.id, camera.name));
                self.weathercam_presets_step(steps, None).map(|outcome| match outcome {
                    PresetOutcome::Show(result) => result,
                    // Unreachable with no input, shown as the form again
                    PresetOutcome::Selected(_) => FlowResult::Form(Form::new(steps.presets)),
                })
            }
            None => Ok(FlowResult::Form(form.error("weathercam_id", "invalid_camera"))),
        }
    }

    fn weathercam_presets_step(
        &mut self,
        steps: &WeathercamSteps,
        presets: Option<Vec<String>>,
    ) -> Result<PresetOutcome, FlowError> {
        let Some((camera_id, camera_name)) = self.weathercam_camera.clone() else {
            return Err(FlowError::OutOfOrder {
                step: steps.presets,
                missing: "weathercam_id",
            });
        };

        let available = self.catalog.presets(&camera_id);
        if available.is_empty() {
            return Ok(PresetOutcome::Show(FlowResult::abort_with(
                "no_presets_found",
                "camera_name",
                camera_name,
            )));
        }
        let form = Form::new(steps.presets)
            .options(
                available
                    .iter()
                    .map(|p| SelectOption::new(p.id.clone(), p.display_name()))
                    .collect(),
            )
            .placeholder("camera_name", camera_name.clone());

        let Some(presets) = presets else {
            return Ok(PresetOutcome::Show(FlowResult::Form(form)));
        };
        let known = |id: &String| available.iter().any(|p| &p.id == id);
        if presets.is_empty() || !presets.iter().all(known) {
            return Ok(PresetOutcome::Show(FlowResult::Form(
                form.error("presets", "invalid_preset"),
            )));
        }

        let mut selected: Vec<String> = Vec::with_capacity(presets.len());
        for preset in presets {
            if !selected.contains(&preset) {
                selected.push(preset);
            }
        }
        Ok(PresetOutcome::Selected(CameraConfig {
            camera_id,
            camera_name,
            municipality: self.weathercam_municipality.clone().unwrap_or_default(),
            presets: selected,
        }))
    }
}

/// Options of a traffic message entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficOptionsInput {
    pub municipalities: Vec<String>,
    pub situation_types: Vec<String>,
}

/// Changes settings of an existing entry without recreating it
pub struct OptionsFlow<'a> {
    store: &'a mut ConfigEntryStore,
    catalog: &'a WeathercamCatalog,
    entry_id: String,
}

impl<'a> OptionsFlow<'a> {
    pub fn new(
        store: &'a mut ConfigEntryStore,
        catalog: &'a WeathercamCatalog,
        entry_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            catalog,
            entry_id: entry_id.into(),
        }
    }

    fn entry(&self) -> Option<ConfigEntry> {
        self.store.get(&self.entry_id).cloned()
    }

    pub fn step_init(&mut self, input: Option<TrafficOptionsInput>) -> Result<FlowResult, FlowError> {
        let Some(mut entry) = self.entry() else {
            return Ok(FlowResult::abort("entry_not_found"));
        };
        if entry.weathercam().is_some() {
            if input.is_some() {
                return Err(FlowError::WrongEntryType(self.entry_id.clone(), "traffic message"));
            }
            return self.step_manage_weathercams(None);
        }

        let form = traffic_form(
            "init",
            &entry.effective_municipalities(),
            &entry.effective_situation_types(),
        );
        let Some(input) = input else {
            return Ok(FlowResult::Form(form));
        };
        let validated = match validate_traffic(&input.municipalities, &input.situation_types) {
            Ok(validated) => validated,
            Err((field, error)) => return Ok(FlowResult::Form(form.error(field, error))),
        };

        entry.options.municipalities = Some(validated.municipalities);
        entry.options.situation_types = Some(validated.situation_types);
        self.store.update(entry)?;
        Ok(FlowResult::UpdateEntry {
            entry_id: self.entry_id.clone(),
        })
    }

    /// Keeps only the submitted presets; cameras left without presets are dropped
    pub fn step_manage_weathercams(
        &mut self,
        presets: Option<Vec<String>>,
    ) -> Result<FlowResult, FlowError> {
        let Some(mut entry) = self.entry() else {
            return Ok(FlowResult::abort("entry_not_found"));
        };
        let EntryData::Weathercam(data) = &mut entry.data else {
            return Err(FlowError::WrongEntryType(self.entry_id.clone(), "weathercam"));
        };

        let mut options = Vec::new();
        for camera in &data.cameras {
            for preset_id in &camera.presets {
                let preset_name = self
                    .catalog
                    .camera(&camera.camera_id)
                    .and_then(|c| c.preset(preset_id))
                    .map(|p| p.display_name().to_string())
                    .unwrap_or_else(|| preset_id.clone());
                options.push(SelectOption::new(
                    preset_id.clone(),
                    format!("{} - {}", camera.camera_name, preset_name),
                ));
            }
        }
        let selected_now: Vec<Value> = options.iter().map(|o| Value::from(o.value.clone())).collect();
        let form = Form::new("manage_weathercams")
            .options(options)
            .default_value("presets", selected_now);

        let Some(keep) = presets else {
            return Ok(FlowResult::Form(form));
        };
        if !keep.iter().all(|p| form.options.iter().any(|o| &o.value == p)) {
            return Ok(FlowResult::Form(form.error("presets", "invalid_preset")));
        }

        for camera in &mut data.cameras {
            camera.presets.retain(|p| keep.contains(p));
        }
        data.cameras.retain(|c| !c.presets.is_empty());
        info!(
            entry_id = %entry.entry_id,
            cameras = data.cameras.len(),
            "Updated weathercam selection"
        );
        self.store.update(entry)?;
        Ok(FlowResult::UpdateEntry {
            entry_id: self.entry_id.clone(),
        })
    }
}
