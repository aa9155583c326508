use crate::constants::DEFAULT_API_BASE;
use crate::coordinator::DEFAULT_UPDATE_INTERVAL;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Runtime settings, read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub poll_interval: Duration,
    /// How often `run` re-reads the entries file to pick up CLI changes
    pub entries_reload_interval: Duration,
    pub entries_path: PathBuf,
    pub weathercam_data_path: PathBuf,
    pub ha_url: String,
    pub ha_token: String,
    pub per_message_sensors: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_BASE.to_string(),
            poll_interval: DEFAULT_UPDATE_INTERVAL,
            entries_reload_interval: Duration::from_secs(30),
            entries_path: PathBuf::from("digitraffic_entries.json"),
            weathercam_data_path: PathBuf::from("data/weathercam_data.json"),
            ha_url: String::new(),
            ha_token: String::new(),
            per_message_sensors: true,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from any key lookup; unset or unparsable values keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let seconds = |key: &str, default: Duration| {
            non_empty(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            api_url: non_empty("DIGITRAFFIC_URL").unwrap_or(defaults.api_url),
            poll_interval: seconds("DIGITRAFFIC_POLL_SECONDS", defaults.poll_interval),
            entries_reload_interval: seconds(
                "DIGITRAFFIC_ENTRIES_RELOAD_SECONDS",
                defaults.entries_reload_interval,
            ),
            entries_path: non_empty("DIGITRAFFIC_ENTRIES")
                .map(PathBuf::from)
                .unwrap_or(defaults.entries_path),
            weathercam_data_path: non_empty("DIGITRAFFIC_WEATHERCAM_DATA")
                .map(PathBuf::from)
                .unwrap_or(defaults.weathercam_data_path),
            ha_url: lookup("HA_URL").unwrap_or_default(),
            ha_token: lookup("HA_TOKEN").unwrap_or_default(),
            per_message_sensors: parse_bool_safe(
                lookup("DIGITRAFFIC_PER_MESSAGE_SENSORS"),
                defaults.per_message_sensors,
            ),
        }
    }

    pub fn log(&self) {
        info!("Digitraffic bridge config:");
        info!("  API: {}", self.api_url);
        info!("  Poll interval: {}s", self.poll_interval.as_secs());
        info!(
            "  Entries: {} (reloaded every {}s)",
            self.entries_path.display(),
            self.entries_reload_interval.as_secs()
        );
        info!("  Weathercam data: {}", self.weathercam_data_path.display());
        info!(
            "  Home Assistant: {}",
            if self.ha_url.is_empty() {
                "none (logging only)"
            } else {
                &self.ha_url
            }
        );
        info!("  Per-message sensors: {}", self.per_message_sensors);
    }
}

fn parse_bool_safe(val: Option<String>, default: bool) -> bool {
    val.and_then(|v| v.trim().to_ascii_lowercase().parse().ok())
        .unwrap_or(default)
}
