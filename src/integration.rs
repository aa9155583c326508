//! Per-entry lifecycle: set up, update, refresh, unload and remove config entries.
//!
//! Every loaded entry owns an [`EntryContext`] holding its coordinator or
//! cameras, the reconciler that tracks what has been published, and the
//! background tasks driving it. Nothing is shared through globals.

use crate::camera::{build_cameras, cleanup_removed_cameras, WeathercamCamera, FRAME_INTERVAL};
use crate::config_entries::{ConfigEntry, EntryData, WeathercamData};
use crate::coordinator::{read_lock, write_lock, DataUpdateCoordinator, DEFAULT_UPDATE_INTERVAL};
use crate::digitraffic_api::TrafficMessageSource;
use crate::entity::EntitySink;
use crate::error::{SetupError, UpdateFailed};
use crate::reconciler::{apply_changes, EntityReconciler};
use crate::sensor::{build_sensor_entities, SensorConfig};
use crate::weathercam::WeathercamCatalog;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct TrafficEntry {
    coordinator: Arc<DataUpdateCoordinator>,
    config: RwLock<SensorConfig>,
    reconciler: Mutex<EntityReconciler>,
    sink: Arc<dyn EntitySink>,
}

impl TrafficEntry {
    fn sensor_config(&self) -> SensorConfig {
        read_lock(&self.config)
    }

    /// Brings the published sensors in line with the coordinator's snapshot.
    /// After a failed poll the previously published sensors are left untouched.
    async fn sync(&self) -> usize {
        // Held across rendering and publishing so concurrent syncs apply in order
        let mut reconciler = self.reconciler.lock().await;
        let data = self.coordinator.snapshot();
        if !data.last_update_success {
            debug!(coordinator = %self.coordinator.name(), "Last update failed, keeping entities");
            return 0;
        }

        let desired = build_sensor_entities(&self.sensor_config(), &data);
        let changes = reconciler.reconcile(desired);
        if !changes.is_empty() {
            debug!(
                coordinator = %self.coordinator.name(),
                changes = changes.len(),
                "Applying entity changes"
            );
        }
        apply_changes(self.sink.as_ref(), &changes).await
    }
}

struct WeathercamEntry {
    cameras: Vec<WeathercamCamera>,
    reconciler: Mutex<EntityReconciler>,
    sink: Arc<dyn EntitySink>,
}

impl WeathercamEntry {
    async fn sync(&self) -> usize {
        let mut reconciler = self.reconciler.lock().await;
        let desired = self.cameras.iter().map(|c| c.entity_state()).collect();
        let changes = reconciler.reconcile(desired);
        apply_changes(self.sink.as_ref(), &changes).await
    }

    /// Fetches every image so the published state carries `last_updated` and availability
    async fn refresh_images(&self) {
        for camera in &self.cameras {
            match camera.camera_image().await {
                Some(image) => debug!(entity_id = %camera.entity_id(), bytes = image.len(), "Weathercam image"),
                None => debug!(entity_id = %camera.entity_id(), "No weathercam image available"),
            }
        }
        self.sync().await;
    }
}

enum Runtime {
    Traffic(Arc<TrafficEntry>),
    Weathercam(Arc<WeathercamEntry>),
}

/// Runtime state of one loaded config entry
pub struct EntryContext {
    entry: ConfigEntry,
    runtime: Runtime,
    tasks: Vec<JoinHandle<()>>,
}

impl EntryContext {
    pub fn entry_id(&self) -> &str {
        &self.entry.entry_id
    }

    pub fn title(&self) -> &str {
        &self.entry.title
    }

    /// The config entry as it was last applied
    pub fn entry(&self) -> &ConfigEntry {
        &self.entry
    }

    pub fn coordinator(&self) -> Option<&Arc<DataUpdateCoordinator>> {
        match &self.runtime {
            Runtime::Traffic(traffic) => Some(&traffic.coordinator),
            Runtime::Weathercam(_) => None,
        }
    }

    async fn published_count(&self) -> usize {
        match &self.runtime {
            Runtime::Traffic(traffic) => traffic.reconciler.lock().await.len(),
            Runtime::Weathercam(weathercam) => weathercam.reconciler.lock().await.len(),
        }
    }

    fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// Removes every entity this entry published
    async fn remove_entities(&self) -> usize {
        let (reconciler, sink) = match &self.runtime {
            Runtime::Traffic(traffic) => (&traffic.reconciler, &traffic.sink),
            Runtime::Weathercam(weathercam) => (&weathercam.reconciler, &weathercam.sink),
        };
        let changes = reconciler.lock().await.reconcile(Vec::new());
        let failures = apply_changes(sink.as_ref(), &changes).await;
        changes.len() - failures
    }
}

impl Drop for EntryContext {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns every loaded config entry and the collaborators they share
pub struct Integration {
    source: Arc<dyn TrafficMessageSource>,
    client: reqwest::Client,
    sink: Arc<dyn EntitySink>,
    catalog: Arc<WeathercamCatalog>,
    poll_interval: Duration,
    frame_interval: Duration,
    per_message_sensors: bool,
    entries: HashMap<String, EntryContext>,
}

impl Integration {
    pub fn new(
        source: Arc<dyn TrafficMessageSource>,
        client: reqwest::Client,
        sink: Arc<dyn EntitySink>,
        catalog: Arc<WeathercamCatalog>,
    ) -> Self {
        Self {
            source,
            client,
            sink,
            catalog,
            poll_interval: DEFAULT_UPDATE_INTERVAL,
            frame_interval: FRAME_INTERVAL,
            per_message_sensors: true,
            entries: HashMap::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_frame_interval(mut self, frame_interval: Duration) -> Self {
        self.frame_interval = frame_interval;
        self
    }

    pub fn with_per_message_sensors(mut self, enabled: bool) -> Self {
        self.per_message_sensors = enabled;
        self
    }

    pub fn is_loaded(&self, entry_id: &str) -> bool {
        self.entries.contains_key(entry_id)
    }

    pub fn context(&self, entry_id: &str) -> Option<&EntryContext> {
        self.entries.get(entry_id)
    }

    pub fn loaded_entries(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }

    /// Number of entities currently published for an entry
    pub async fn published_count(&self, entry_id: &str) -> usize {
        match self.entries.get(entry_id) {
            Some(context) => context.published_count().await,
            None => 0,
        }
    }

    fn sensor_config(&self, entry: &ConfigEntry) -> SensorConfig {
        SensorConfig {
            entry_id: entry.entry_id.clone(),
            object_id: entry.entity_object_id(),
            title: entry.title.clone(),
            municipalities: entry.effective_municipalities(),
            situation_types: entry.situation_type_filter(),
            include_raw_data: entry.traffic().is_some_and(|d| d.include_raw_data),
            per_message_sensors: self.per_message_sensors,
        }
    }

    /// Sets up every entry, returning the ids of those that were not ready
    pub async fn setup_all(&mut self, entries: &[ConfigEntry]) -> Vec<String> {
        let mut not_ready = Vec::new();
        for entry in entries {
            if let Err(e) = self.setup_entry(entry).await {
                warn!("{e}");
                not_ready.push(entry.entry_id.clone());
            }
        }
        not_ready
    }

    pub async fn setup_entry(&mut self, entry: &ConfigEntry) -> Result<(), SetupError> {
        if self.entries.contains_key(&entry.entry_id) {
            return Err(SetupError::AlreadySetUp(entry.entry_id.clone()));
        }
        let context = match &entry.data {
            EntryData::TrafficMessages(_) => self.setup_traffic(entry).await?,
            EntryData::Weathercam(data) => self.setup_weathercam(entry, data).await,
        };
        info!(entry_id = %entry.entry_id, title = %entry.title, "Config entry set up");
        self.entries.insert(entry.entry_id.clone(), context);
        Ok(())
    }

    async fn setup_traffic(&self, entry: &ConfigEntry) -> Result<EntryContext, SetupError> {
        let coordinator = Arc::new(DataUpdateCoordinator::new(
            self.source.clone(),
            &entry.effective_municipalities(),
            entry.situation_type_filter(),
            self.poll_interval,
        ));
        coordinator
            .first_refresh()
            .await
            .map_err(|source| SetupError::NotReady {
                entry_id: entry.entry_id.clone(),
                source,
            })?;

        let traffic = Arc::new(TrafficEntry {
            coordinator: coordinator.clone(),
            config: RwLock::new(self.sensor_config(entry)),
            reconciler: Mutex::new(EntityReconciler::new()),
            sink: self.sink.clone(),
        });
        traffic.sync().await;

        let mut updates = coordinator.subscribe();
        let listener = traffic.clone();
        let reconcile_task = tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                listener.sync().await;
            }
        });

        Ok(EntryContext {
            entry: entry.clone(),
            runtime: Runtime::Traffic(traffic),
            tasks: vec![coordinator.spawn(), reconcile_task],
        })
    }

    async fn setup_weathercam(&self, entry: &ConfigEntry, data: &WeathercamData) -> EntryContext {
        if data.cameras.is_empty() {
            warn!(entry_id = %entry.entry_id, "No cameras found in config entry");
        }
        match cleanup_removed_cameras(self.sink.as_ref(), data).await {
            Ok(0) => {}
            Ok(removed) => info!("Removed {removed} weathercam entities no longer configured"),
            Err(e) => warn!("Failed to clean up weathercam entities: {e:#}"),
        }

        let weathercam = Arc::new(WeathercamEntry {
            cameras: build_cameras(&entry.entry_id, data, &self.catalog, &self.client),
            reconciler: Mutex::new(EntityReconciler::new()),
            sink: self.sink.clone(),
        });
        info!("Created {} weathercam camera entities", weathercam.cameras.len());
        weathercam.sync().await;

        let refresher = weathercam.clone();
        let frame_interval = self.frame_interval;
        let image_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                refresher.refresh_images().await;
            }
        });

        EntryContext {
            entry: entry.clone(),
            runtime: Runtime::Weathercam(weathercam),
            tasks: vec![image_task],
        }
    }

    /// Polls an entry immediately and syncs its entities with the result
    pub async fn refresh_entry(&self, entry_id: &str) -> Option<Result<(), UpdateFailed>> {
        let context = self.entries.get(entry_id)?;
        match &context.runtime {
            Runtime::Traffic(traffic) => {
                let result = traffic.coordinator.refresh().await;
                traffic.sync().await;
                Some(result)
            }
            Runtime::Weathercam(weathercam) => {
                weathercam.refresh_images().await;
                Some(Ok(()))
            }
        }
    }

    /// Applies changed options or data. Traffic entries keep their coordinator and
    /// re-render; weathercam entries are reloaded.
    pub async fn update_entry(&mut self, entry: &ConfigEntry) -> Result<(), SetupError> {
        let existing = match self.entries.get(&entry.entry_id).map(|c| &c.runtime) {
            Some(Runtime::Traffic(traffic)) if entry.traffic().is_some() => Some(traffic.clone()),
            _ => None,
        };
        let Some(traffic) = existing else {
            return self.reload_entry(entry).await;
        };

        let config = self.sensor_config(entry);
        traffic
            .coordinator
            .update_config(&config.municipalities, config.situation_types.clone());
        write_lock(&traffic.config, config);
        if let Some(context) = self.entries.get_mut(&entry.entry_id) {
            context.entry = entry.clone();
        }
        if let Err(e) = traffic.coordinator.refresh().await {
            warn!(entry_id = %entry.entry_id, "Refresh after options update failed: {e}");
        }
        traffic.sync().await;
        Ok(())
    }

    pub async fn reload_entry(&mut self, entry: &ConfigEntry) -> Result<(), SetupError> {
        self.unload_entry(&entry.entry_id);
        self.setup_entry(entry).await
    }

    /// Stops the entry's tasks. Published entities stay as they are.
    pub fn unload_entry(&mut self, entry_id: &str) -> bool {
        match self.entries.remove(entry_id) {
            Some(mut context) => {
                context.stop();
                info!(entry_id, "Config entry unloaded");
                true
            }
            None => false,
        }
    }

    /// Unloads the entry and removes everything it published
    pub async fn remove_entry(&mut self, entry_id: &str) -> bool {
        let Some(mut context) = self.entries.remove(entry_id) else {
            return false;
        };
        context.stop();
        let removed = context.remove_entities().await;
        info!(entry_id, removed, "Config entry removed");
        true
    }

    /// Brings the loaded entries in line with `entries`: new ones are set up, changed
    /// ones updated, and entries no longer present removed along with their entities.
    /// Returns the ids of entries that are not ready yet.
    pub async fn sync_entries(&mut self, entries: &[ConfigEntry]) -> Vec<String> {
        let gone: Vec<String> = self
            .entries
            .keys()
            .filter(|id| !entries.iter().any(|e| &e.entry_id == *id))
            .cloned()
            .collect();
        for entry_id in gone {
            self.remove_entry(&entry_id).await;
        }

        let mut not_ready = Vec::new();
        for entry in entries {
            let unchanged = self
                .entries
                .get(&entry.entry_id)
                .map(|context| context.entry == *entry);
            let result = match unchanged {
                Some(true) => continue,
                Some(false) => {
                    info!(entry_id = %entry.entry_id, "Config entry changed");
                    self.update_entry(entry).await
                }
                None => self.setup_entry(entry).await,
            };
            if let Err(e) = result {
                warn!("{e}");
                not_ready.push(entry.entry_id.clone());
            }
        }
        not_ready
    }

    pub fn unload_all(&mut self) {
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        for entry_id in ids {
            self.unload_entry(&entry_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_entries::{CameraConfig, ConfigEntryStore, EntryOptions, TrafficMessagesData};
    use crate::config_flow::{
        ConfigFlow, FlowResult, OptionsFlow, TrafficMessagesInput, TrafficOptionsInput,
    };
    use crate::constants::SituationType;
    use crate::coordinator::tests::{collection, ScriptedSource};
    use crate::entity::MemorySink;
    use crate::weathercam::{CatalogCamera, CatalogPreset};

    const MESSAGES: &str = r#"{"features": [
        {"properties": {"situationId": "GUID1", "situationType": "TRAFFIC_ANNOUNCEMENT", "municipality": "Helsinki",
            "announcements": [{"title": "Crash on Ring I"}]}},
        {"properties": {"situationId": "GUID2", "situationType": "ROAD_WORK", "municipality": "Turku",
            "announcements": [{"title": "Resurfacing"}]}},
        {"properties": {"situationId": "GUID3", "situationType": "ROAD_WORK", "municipality": "Helsinki",
            "announcements": [{"title": "Bridge repair"}]}}
    ]}"#;

    fn traffic_entry(municipalities: &[&str]) -> ConfigEntry {
        named_entry("entry1", "Traffic", municipalities)
    }

    fn named_entry(entry_id: &str, title: &str, municipalities: &[&str]) -> ConfigEntry {
        let mut entry = ConfigEntry::new(
            title,
            EntryData::TrafficMessages(TrafficMessagesData {
                municipalities: municipalities.iter().map(|m| m.to_string()).collect(),
                ..Default::default()
            }),
        );
        entry.entry_id = entry_id.to_string();
        entry
    }

    fn traffic_input(municipalities: &[&str]) -> TrafficMessagesInput {
        TrafficMessagesInput {
            municipalities: municipalities.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Creates an entry through the config flow under its default name and stores it
    fn create_through_flow(store: &mut ConfigEntryStore, municipalities: &[&str]) -> String {
        let catalog = WeathercamCatalog::default();
        let mut flow = ConfigFlow::new(store, &catalog);
        let name = match flow.step_traffic_messages(Some(traffic_input(municipalities))).unwrap() {
            FlowResult::Form(form) => form.defaults["service_name"].as_str().unwrap().to_string(),
            other => panic!("Expected the name form, got {other:?}"),
        };
        let entry = match flow.step_traffic_messages_name(Some(name)).unwrap() {
            FlowResult::CreateEntry { entry } => entry,
            other => panic!("Expected an entry, got {other:?}"),
        };
        let entry_id = entry.entry_id.clone();
        store.add(entry).unwrap();
        entry_id
    }

    fn reconfigure(store: &mut ConfigEntryStore, entry_id: &str, municipalities: &[&str]) {
        let catalog = WeathercamCatalog::default();
        let mut flow = ConfigFlow::new(store, &catalog);
        let result = flow
            .step_reconfigure(entry_id, Some(traffic_input(municipalities)))
            .unwrap();
        assert!(matches!(
            result,
            FlowResult::Abort {
                reason: "reconfigure_successful",
                ..
            }
        ));
    }

    fn integration(
        source: Arc<ScriptedSource>,
        sink: Arc<MemorySink>,
        catalog: WeathercamCatalog,
    ) -> Integration {
        Integration::new(source, reqwest::Client::new(), sink, Arc::new(catalog))
    }

    #[tokio::test]
    async fn test_traffic_entry_publishes_sensors() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(collection(MESSAGES))]));
        let sink = Arc::new(MemorySink::new());
        let mut integration = integration(source, sink.clone(), WeathercamCatalog::default());

        integration.setup_entry(&traffic_entry(&["Helsinki"])).await.unwrap();
        assert!(integration.is_loaded("entry1"));

        assert_eq!(sink.get("sensor.digitraffic_traffic_all").unwrap().state, "3");
        assert_eq!(sink.get("sensor.digitraffic_traffic_helsinki").unwrap().state, "2");
        assert!(sink.get("sensor.digitraffic_traffic_tm_guid1").is_some());
        assert!(sink.get("sensor.digitraffic_traffic_tm_guid3").is_some());
        assert!(sink.get("sensor.digitraffic_traffic_tm_guid2").is_none());
        assert_eq!(integration.published_count("entry1").await, 4);

        assert!(matches!(
            integration.setup_entry(&traffic_entry(&["Helsinki"])).await,
            Err(SetupError::AlreadySetUp(_))
        ));
        integration.unload_all();
        assert!(integration.loaded_entries().is_empty());
    }

    #[tokio::test]
    async fn test_failed_first_refresh_is_not_ready() {
        let source = Arc::new(ScriptedSource::new(vec![Err(500)]));
        let sink = Arc::new(MemorySink::new());
        let mut integration = integration(source, sink.clone(), WeathercamCatalog::default());

        let not_ready = integration.setup_all(&[traffic_entry(&[])]).await;
        assert_eq!(not_ready, vec!["entry1"]);
        assert!(!integration.is_loaded("entry1"));
        assert!(sink.ids().is_empty());
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_published_state() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(collection(MESSAGES)), Err(503)]));
        let sink = Arc::new(MemorySink::new());
        let mut integration = integration(source, sink.clone(), WeathercamCatalog::default());
        integration.setup_entry(&traffic_entry(&[])).await.unwrap();

        let result = integration.refresh_entry("entry1").await.unwrap();
        assert!(result.is_err());
        assert_eq!(sink.get("sensor.digitraffic_traffic_all").unwrap().state, "3");
        assert_eq!(sink.ids().len(), 4);

        let coordinator = integration.context("entry1").unwrap().coordinator().unwrap();
        assert!(!coordinator.snapshot().last_update_success);
    }

    #[tokio::test]
    async fn test_messages_come_and_go() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(collection(MESSAGES)),
            Ok(collection(
                r#"{"features": [
                    {"properties": {"situationId": "GUID3", "situationType": "ROAD_WORK", "municipality": "Helsinki"}},
                    {"properties": {"situationId": "GUID4", "situationType": "ROAD_WORK", "municipality": "Helsinki"}}
                ]}"#,
            )),
        ]));
        let sink = Arc::new(MemorySink::new());
        let mut integration = integration(source, sink.clone(), WeathercamCatalog::default());
        integration.setup_entry(&traffic_entry(&["Helsinki"])).await.unwrap();

        integration.refresh_entry("entry1").await.unwrap().unwrap();
        assert!(sink.get("sensor.digitraffic_traffic_tm_guid1").is_none());
        assert!(sink.get("sensor.digitraffic_traffic_tm_guid3").is_some());
        assert!(sink.get("sensor.digitraffic_traffic_tm_guid4").is_some());
        assert_eq!(sink.get("sensor.digitraffic_traffic_helsinki").unwrap().state, "2");
    }

    #[tokio::test]
    async fn test_options_update_reshapes_sensors() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(collection(MESSAGES))]));
        let sink = Arc::new(MemorySink::new());
        let mut integration = integration(source.clone(), sink.clone(), WeathercamCatalog::default());
        let mut entry = traffic_entry(&["Helsinki"]);
        integration.setup_entry(&entry).await.unwrap();

        entry.options = EntryOptions {
            municipalities: Some(vec!["Turku".to_string()]),
            situation_types: Some(vec![SituationType::RoadWork]),
        };
        integration.update_entry(&entry).await.unwrap();

        assert!(sink.get("sensor.digitraffic_traffic_helsinki").is_none());
        assert_eq!(sink.get("sensor.digitraffic_traffic_turku").unwrap().state, "1");
        assert_eq!(sink.get("sensor.digitraffic_traffic_all").unwrap().state, "2");
        assert!(sink.get("sensor.digitraffic_traffic_tm_guid2").is_some());
        assert!(sink.get("sensor.digitraffic_traffic_tm_guid1").is_none());

        let requested = source.requested_types.lock().unwrap().clone();
        assert_eq!(requested.last().unwrap(), &Some(vec![SituationType::RoadWork]));
    }

    #[tokio::test]
    async fn test_remove_entry_removes_entities() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(collection(MESSAGES))]));
        let sink = Arc::new(MemorySink::new());
        let mut integration = integration(source, sink.clone(), WeathercamCatalog::default());
        integration.setup_entry(&traffic_entry(&[])).await.unwrap();
        assert!(!sink.ids().is_empty());

        assert!(integration.remove_entry("entry1").await);
        assert!(sink.ids().is_empty());
        assert!(!integration.remove_entry("entry1").await);
        assert!(!integration.unload_entry("entry1"));
    }

    #[tokio::test]
    async fn test_weathercam_entry_publishes_cameras_and_cleans_up() {
        let catalog = WeathercamCatalog::from_cameras([(
            "C01503".to_string(),
            CatalogCamera {
                name: "Espoo".into(),
                municipality: "Espoo".into(),
                presets: vec![
                    CatalogPreset {
                        id: "C0150301".into(),
                        presentation_name: "Helsinkiin".into(),
                        image_url: "http://127.0.0.1:1/C0150301.jpg".into(),
                        direction_code: None,
                    },
                    CatalogPreset {
                        id: "C0150302".into(),
                        presentation_name: "Turkuun".into(),
                        image_url: "http://127.0.0.1:1/C0150302.jpg".into(),
                        direction_code: None,
                    },
                ],
                ..Default::default()
            },
        )]);
        let sink = Arc::new(MemorySink::new());

        // Left over from a previous configuration
        let stale = build_cameras(
            "old",
            &WeathercamData {
                cameras: vec![CameraConfig {
                    camera_id: "C01503".into(),
                    camera_name: "Espoo".into(),
                    municipality: "Espoo".into(),
                    presets: vec!["C0150302".into()],
                }],
            },
            &catalog,
            &reqwest::Client::new(),
        );
        sink.publish(&stale[0].entity_state()).await.unwrap();

        let source = Arc::new(ScriptedSource::new(vec![]));
        let mut integration = integration(source, sink.clone(), catalog);
        let entry = ConfigEntry::new(
            "Weathercams",
            EntryData::Weathercam(WeathercamData {
                cameras: vec![CameraConfig {
                    camera_id: "C01503".into(),
                    camera_name: "Espoo".into(),
                    municipality: "Espoo".into(),
                    presets: vec!["C0150301".into()],
                }],
            }),
        );
        integration.setup_entry(&entry).await.unwrap();

        assert_eq!(sink.ids(), vec!["camera.digitraffic_wc_c0150301"]);
        assert!(integration.context(&entry.entry_id).unwrap().coordinator().is_none());
        integration.unload_all();
    }

    #[tokio::test]
    async fn test_reconfigured_entries_keep_separate_sensors() {
        let mut store = ConfigEntryStore::in_memory();
        let helsinki = create_through_flow(&mut store, &["Helsinki"]);
        let espoo = create_through_flow(&mut store, &["Espoo"]);
        reconfigure(&mut store, &helsinki, &["Helsinki"]);
        reconfigure(&mut store, &espoo, &["Espoo"]);
        assert_eq!(store.get(&helsinki).unwrap().title, store.get(&espoo).unwrap().title);

        let source = Arc::new(ScriptedSource::new(vec![Ok(collection(MESSAGES))]));
        let sink = Arc::new(MemorySink::new());
        let mut integration = integration(source, sink.clone(), WeathercamCatalog::default());
        assert!(integration.setup_all(store.entries()).await.is_empty());

        let helsinki_all = sink.get("sensor.digitraffic_traffic_helsinki_all_types_all").unwrap();
        let espoo_all = sink.get("sensor.digitraffic_traffic_espoo_all_types_all").unwrap();
        assert_eq!(helsinki_all.unique_id, format!("{helsinki}_all"));
        assert_eq!(espoo_all.unique_id, format!("{espoo}_all"));
        assert_eq!(helsinki_all.name, "Traffic Messages");

        assert!(integration.remove_entry(&helsinki).await);
        assert_eq!(
            sink.ids(),
            vec![
                "sensor.digitraffic_traffic_espoo_all_types_all",
                "sensor.digitraffic_traffic_espoo_all_types_espoo",
            ]
        );
    }

    #[tokio::test]
    async fn test_title_change_keeps_entity_ids() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(collection(MESSAGES))]));
        let sink = Arc::new(MemorySink::new());
        let mut integration = integration(source, sink.clone(), WeathercamCatalog::default());
        let mut entry = traffic_entry(&["Helsinki"]);
        integration.setup_entry(&entry).await.unwrap();
        let before = sink.ids();

        entry.title = "Traffic Messages".to_string();
        integration.update_entry(&entry).await.unwrap();

        assert_eq!(sink.ids(), before);
        assert_eq!(sink.get("sensor.digitraffic_traffic_all").unwrap().name, "Traffic Messages");
        assert_eq!(integration.context("entry1").unwrap().title(), "Traffic Messages");
    }

    #[tokio::test]
    async fn test_overlapping_entries_keep_their_message_sensors() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(collection(MESSAGES))]));
        let sink = Arc::new(MemorySink::new());
        let mut integration = integration(source, sink.clone(), WeathercamCatalog::default());
        let finland = named_entry("finland", "Finland", &[]);
        let mut helsinki = named_entry("helsinki", "Helsinki", &["Helsinki"]);
        integration.setup_entry(&finland).await.unwrap();
        integration.setup_entry(&helsinki).await.unwrap();

        assert!(sink.get("sensor.digitraffic_finland_tm_guid1").is_some());
        assert!(sink.get("sensor.digitraffic_helsinki_tm_guid1").is_some());

        // GUID1 leaves the Helsinki entry only
        helsinki.options.situation_types = Some(vec![SituationType::RoadWork]);
        integration.update_entry(&helsinki).await.unwrap();
        assert!(sink.get("sensor.digitraffic_helsinki_tm_guid1").is_none());
        assert!(sink.get("sensor.digitraffic_finland_tm_guid1").is_some());

        assert!(integration.remove_entry("helsinki").await);
        let finland_ids: Vec<String> = sink
            .ids()
            .into_iter()
            .filter(|id| id.starts_with("sensor.digitraffic_finland_"))
            .collect();
        assert_eq!(sink.ids(), finland_ids);
        assert_eq!(finland_ids.len(), 4);
        assert_eq!(sink.get("sensor.digitraffic_finland_all").unwrap().state, "3");
    }

    #[tokio::test]
    async fn test_sync_entries_follows_the_store() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(collection(MESSAGES))]));
        let sink = Arc::new(MemorySink::new());
        let mut integration = integration(source, sink.clone(), WeathercamCatalog::default());
        let mut first = named_entry("first", "First", &["Helsinki"]);
        assert!(integration.sync_entries(std::slice::from_ref(&first)).await.is_empty());
        assert_eq!(sink.get("sensor.digitraffic_first_helsinki").unwrap().state, "2");

        first.options.municipalities = Some(vec!["Turku".to_string()]);
        let second = named_entry("second", "Second", &["Turku"]);
        let not_ready = integration
            .sync_entries(&[first.clone(), second.clone()])
            .await;
        assert!(not_ready.is_empty());
        assert_eq!(integration.loaded_entries(), vec!["first", "second"]);
        assert!(sink.get("sensor.digitraffic_first_helsinki").is_none());
        assert_eq!(sink.get("sensor.digitraffic_first_turku").unwrap().state, "1");
        assert_eq!(integration.context("first").unwrap().entry(), &first);

        integration.sync_entries(std::slice::from_ref(&second)).await;
        assert_eq!(integration.loaded_entries(), vec!["second"]);
        assert!(sink.ids().iter().all(|id| id.starts_with("sensor.digitraffic_second_")));
        integration.unload_all();
    }

    #[tokio::test]
    async fn test_stored_option_and_reconfigure_changes_reach_loaded_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entries.json");
        let source = Arc::new(ScriptedSource::new(vec![Ok(collection(MESSAGES))]));
        let sink = Arc::new(MemorySink::new());
        let mut integration = integration(source, sink.clone(), WeathercamCatalog::default());

        let mut store = ConfigEntryStore::open(&path).unwrap();
        let entry_id = create_through_flow(&mut store, &["Helsinki"]);
        let prefix = format!(
            "sensor.digitraffic_{}",
            store.get(&entry_id).unwrap().entity_object_id()
        );
        let loaded = ConfigEntryStore::open(&path).unwrap();
        assert!(integration.sync_entries(loaded.entries()).await.is_empty());
        assert_eq!(sink.get(&format!("{prefix}_helsinki")).unwrap().state, "2");

        // Options written by another process
        let mut store = ConfigEntryStore::open(&path).unwrap();
        let catalog = WeathercamCatalog::default();
        let result = OptionsFlow::new(&mut store, &catalog, entry_id.as_str())
            .step_init(Some(TrafficOptionsInput {
                municipalities: vec!["turku".to_string()],
                situation_types: vec![],
            }))
            .unwrap();
        assert!(matches!(result, FlowResult::UpdateEntry { .. }));

        let loaded = ConfigEntryStore::open(&path).unwrap();
        assert!(integration.sync_entries(loaded.entries()).await.is_empty());
        let coordinator = integration.context(&entry_id).unwrap().coordinator().unwrap();
        assert_eq!(coordinator.name(), "Digitraffic Traffic Messages (Turku)");
        assert!(sink.get(&format!("{prefix}_helsinki")).is_none());
        assert_eq!(sink.get(&format!("{prefix}_turku")).unwrap().state, "1");

        let mut store = ConfigEntryStore::open(&path).unwrap();
        reconfigure(&mut store, &entry_id, &["Helsinki"]);
        let loaded = ConfigEntryStore::open(&path).unwrap();
        assert!(integration.sync_entries(loaded.entries()).await.is_empty());
        assert_eq!(integration.context(&entry_id).unwrap().title(), "Traffic Messages");
        assert_eq!(sink.get(&format!("{prefix}_helsinki")).unwrap().state, "2");
        assert!(sink.get(&format!("{prefix}_turku")).is_none());
        assert!(sink.ids().iter().all(|id| id.starts_with(&prefix)));
        integration.unload_all();
    }
}
