//! Digitraffic Bridge Library
//!
//! Polls the Fintraffic Digitraffic road API for active traffic messages and
//! weathercam images, and exposes them as Home Assistant style entities:
//! per-municipality count sensors, one sensor per active message, and one
//! camera per weathercam preset.

pub mod camera;
pub mod config_entries;
pub mod config_flow;
pub mod constants;
pub mod coordinator;
pub mod digitraffic_api;
pub mod entity;
pub mod error;
pub mod filter;
pub mod home_assistant;
pub mod integration;
pub mod reconciler;
pub mod sensor;
pub mod settings;
pub mod weathercam;

// Re-export commonly used types for easier access
pub use config_entries::{ConfigEntry, ConfigEntryStore, EntryData};
pub use config_flow::{ConfigFlow, FlowResult, OptionsFlow};
pub use coordinator::{CoordinatorData, DataUpdateCoordinator};
pub use digitraffic_api::{DigitrafficApiClient, TrafficMessageSource};
pub use entity::{EntitySink, EntityState, MemorySink};
pub use filter::MessageFilter;
pub use home_assistant::HomeAssistantAPI;
pub use integration::Integration;
pub use settings::Settings;
pub use weathercam::WeathercamCatalog;
