use crate::constants::SituationType;
use crate::digitraffic_api::{Feature, TrafficMessageSource};
use crate::error::UpdateFailed;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// What entities see after each poll
#[derive(Debug, Clone, Default)]
pub struct CoordinatorData {
    /// Unfiltered result of the last successful poll
    pub features: Arc<Vec<Feature>>,
    pub last_update_success: bool,
    pub last_error: Option<String>,
    pub last_update_time: Option<DateTime<Utc>>,
}

/// Polls the traffic message source on a fixed interval and caches the last good result.
///
/// A failed poll never clears the cache: entities keep rendering the previous
/// features until the next successful poll.
pub struct DataUpdateCoordinator {
    name: RwLock<String>,
    source: Arc<dyn TrafficMessageSource>,
    update_interval: Duration,
    situation_types: RwLock<Option<Vec<SituationType>>>,
    data: watch::Sender<CoordinatorData>,
    // Serialises polls so only one request per coordinator is ever in flight
    poll_lock: Mutex<()>,
}

impl DataUpdateCoordinator {
    pub fn new(
        source: Arc<dyn TrafficMessageSource>,
        municipalities: &[String],
        situation_types: Option<Vec<SituationType>>,
        update_interval: Duration,
    ) -> Self {
        let (data, _) = watch::channel(CoordinatorData::default());

        Self {
            name: RwLock::new(coordinator_name(municipalities)),
            source,
            update_interval,
            situation_types: RwLock::new(situation_types),
            data,
            poll_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> String {
        read_lock(&self.name)
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Current cached snapshot
    pub fn snapshot(&self) -> CoordinatorData {
        self.data.borrow().clone()
    }

    /// Receiver that is notified after every poll, successful or not
    pub fn subscribe(&self) -> watch::Receiver<CoordinatorData> {
        self.data.subscribe()
    }

    /// Applies changed entry options; the situation types are requested from the next poll on
    pub fn update_config(&self, municipalities: &[String], situation_types: Option<Vec<SituationType>>) {
        write_lock(&self.name, coordinator_name(municipalities));
        write_lock(&self.situation_types, situation_types);
    }

    /// Initial poll made during entry setup; a failure here means the entry is not ready
    pub async fn first_refresh(&self) -> Result<(), UpdateFailed> {
        self.refresh().await
    }

    /// Performs one poll and publishes the outcome to subscribers
    pub async fn refresh(&self) -> Result<(), UpdateFailed> {
        let _poll = self.poll_lock.lock().await;
        let situation_types = read_lock(&self.situation_types);
        let name = self.name();

        match self
            .source
            .fetch_active_messages(situation_types.as_deref())
            .await
        {
            Ok(collection) => {
                debug!(
                    coordinator = %name,
                    features = collection.features.len(),
                    "Fetched traffic messages"
                );
                self.data.send_replace(CoordinatorData {
                    features: Arc::new(collection.features),
                    last_update_success: true,
                    last_error: None,
                    last_update_time: Some(Utc::now()),
                });
                Ok(())
            }
            Err(e) => {
                let failure = UpdateFailed(e.to_string());
                warn!(coordinator = %name, "Update failed: {failure}");
                self.data.send_modify(|data| {
                    data.last_update_success = false;
                    data.last_error = Some(failure.0.clone());
                });
                Err(failure)
            }
        }
    }

    /// Spawns the periodic poll loop. The first poll happens one interval from now,
    /// `first_refresh` covers the initial fetch. Abort the handle to stop polling.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(
                Instant::now() + self.update_interval,
                self.update_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // Failures are already published to subscribers
                let _ = self.refresh().await;
            }
        })
    }
}

fn coordinator_name(municipalities: &[String]) -> String {
    if municipalities.is_empty() {
        "Digitraffic Traffic Messages".to_string()
    } else {
        format!("Digitraffic Traffic Messages ({})", municipalities.join(", "))
    }
}

/// Reads the value, recovering it from a poisoned lock
pub(crate) fn read_lock<T: Clone>(lock: &RwLock<T>) -> T {
    match lock.read() {
        Ok(value) => value.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>, value: T) {
    match lock.write() {
        Ok(mut current) => *current = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::digitraffic_api::TrafficMessageCollection;
    use crate::error::ApiError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays scripted responses; once the script runs out the last response repeats
    pub(crate) struct ScriptedSource {
        responses: std::sync::Mutex<VecDeque<Result<TrafficMessageCollection, u16>>>,
        last: std::sync::Mutex<Option<Result<TrafficMessageCollection, u16>>>,
        pub calls: AtomicU32,
        pub requested_types: std::sync::Mutex<Vec<Option<Vec<SituationType>>>>,
    }

    impl ScriptedSource {
        pub(crate) fn new(responses: Vec<Result<TrafficMessageCollection, u16>>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses.into()),
                last: std::sync::Mutex::new(None),
                calls: AtomicU32::new(0),
                requested_types: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TrafficMessageSource for ScriptedSource {
        async fn fetch_active_messages(
            &self,
            situation_types: Option<&[SituationType]>,
        ) -> Result<TrafficMessageCollection, ApiError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.requested_types
                .lock()
                .unwrap()
                .push(situation_types.map(|t| t.to_vec()));
            let next = self.responses.lock().unwrap().pop_front();
            let response = match next {
                Some(response) => {
                    *self.last.lock().unwrap() = Some(response.clone());
                    response
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or(Ok(TrafficMessageCollection::default())),
            };
            response.map_err(|status| ApiError::Status {
                url: "http://digitraffic.test/messages".to_string(),
                status: reqwest::StatusCode::from_u16(status).unwrap(),
            })
        }
    }

    pub(crate) fn collection(json: &str) -> TrafficMessageCollection {
        serde_json::from_str(json).unwrap()
    }

    const HELSINKI: &str = r#"{"features": [{"properties": {"municipality": "Helsinki", "situationType": "TRAFFIC_ANNOUNCEMENT"}}]}"#;

    #[test]
    fn test_poisoned_lock_still_takes_updates() {
        let lock = Arc::new(RwLock::new(vec!["Helsinki".to_string()]));
        let poisoner = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(lock.is_poisoned());

        write_lock(&lock, vec!["Turku".to_string()]);
        assert_eq!(read_lock(&lock), vec!["Turku".to_string()]);
    }

    #[tokio::test]
    async fn test_successful_refresh_replaces_cache() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(collection(HELSINKI)),
            Ok(collection(r#"{"features": []}"#)),
        ]));
        let coordinator =
            DataUpdateCoordinator::new(source, &[], None, DEFAULT_UPDATE_INTERVAL);

        coordinator.first_refresh().await.unwrap();
        let data = coordinator.snapshot();
        assert!(data.last_update_success);
        assert_eq!(data.features.len(), 1);
        assert!(data.last_update_time.is_some());

        coordinator.refresh().await.unwrap();
        assert!(coordinator.snapshot().features.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_good_data() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(collection(HELSINKI)), Err(503)]));
        let coordinator =
            DataUpdateCoordinator::new(source, &[], None, DEFAULT_UPDATE_INTERVAL);

        coordinator.refresh().await.unwrap();
        let first_time = coordinator.snapshot().last_update_time;

        let err = coordinator.refresh().await.unwrap_err();
        assert!(err.to_string().starts_with("Digitraffic API error:"));

        let data = coordinator.snapshot();
        assert!(!data.last_update_success);
        assert_eq!(data.features.len(), 1);
        assert_eq!(data.last_update_time, first_time);
        assert!(data.last_error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_subscribers_are_notified() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(collection(HELSINKI))]));
        let coordinator =
            DataUpdateCoordinator::new(source, &[], None, DEFAULT_UPDATE_INTERVAL);
        let mut receiver = coordinator.subscribe();

        coordinator.refresh().await.unwrap();

        receiver.changed().await.unwrap();
        assert_eq!(receiver.borrow_and_update().features.len(), 1);
    }

    #[tokio::test]
    async fn test_situation_types_are_passed_to_source() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let coordinator = DataUpdateCoordinator::new(
            source.clone(),
            &["Helsinki".to_string(), "Espoo".to_string()],
            Some(vec![SituationType::RoadWork]),
            DEFAULT_UPDATE_INTERVAL,
        );
        assert_eq!(coordinator.name(), "Digitraffic Traffic Messages (Helsinki, Espoo)");

        coordinator.refresh().await.unwrap();
        coordinator.update_config(&["Turku".to_string()], None);
        assert_eq!(coordinator.name(), "Digitraffic Traffic Messages (Turku)");
        coordinator.refresh().await.unwrap();

        let requested = source.requested_types.lock().unwrap().clone();
        assert_eq!(requested, vec![Some(vec![SituationType::RoadWork]), None]);
    }

    #[tokio::test]
    async fn test_spawned_loop_polls_on_interval() {
        let source = Arc::new(ScriptedSource::new(vec![]));
        let coordinator = Arc::new(DataUpdateCoordinator::new(
            source.clone(),
            &[],
            None,
            Duration::from_millis(20),
        ));

        let handle = coordinator.clone().spawn();
        tokio::time::sleep(Duration::from_millis(110)).await;
        handle.abort();

        let calls = source.calls.load(Ordering::Relaxed);
        assert!(calls >= 2, "Expected several polls, got {calls}");
    }
}
