use crate::entity::{EntitySink, EntityState, CONFIG_ENTRY_ATTRIBUTE};
use anyhow::Context;
use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;
use tracing::debug;

/// Publishes entity states through the Home Assistant REST API
pub struct HomeAssistantAPI {
    endpoint_url: String,
    auth_token: String,
    client: reqwest::Client,
}

impl Default for HomeAssistantAPI {
    fn default() -> Self {
        Self::new()
    }
}

impl HomeAssistantAPI {
    pub fn new() -> Self {
        Self::with_endpoint(
            env::var("HA_URL").unwrap_or_default(),
            env::var("HA_TOKEN").unwrap_or_default(),
            reqwest::Client::new(),
        )
    }

    pub fn with_endpoint(
        endpoint_url: impl Into<String>,
        auth_token: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
            client,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.endpoint_url.is_empty()
    }

    fn state_url(&self, entity_id: &str) -> anyhow::Result<String> {
        if self.endpoint_url.is_empty() {
            anyhow::bail!("No HA connection");
        }
        Ok(format!("{}/api/states/{}", self.endpoint_url, entity_id))
    }

    pub async fn read_state(&self, entity_id: &str) -> anyhow::Result<HAState> {
        let result = self
            .client
            .get(self.state_url(entity_id)?)
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(result)
    }

    pub async fn list_states(&self) -> anyhow::Result<Vec<HAState>> {
        if self.endpoint_url.is_empty() {
            anyhow::bail!("No HA connection");
        }
        let result = self
            .client
            .get(format!("{}/api/states", self.endpoint_url))
            .bearer_auth(&self.auth_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(result)
    }

    pub async fn publish_state(&self, entity: &EntityState) -> anyhow::Result<()> {
        let body = StateUpdate {
            state: if entity.available {
                entity.state.clone()
            } else {
                "unavailable".to_string()
            },
            attributes: entity.host_attributes(),
        };
        self.client
            .post(self.state_url(&entity.entity_id)?)
            .bearer_auth(&self.auth_token)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("Failed to publish {}", entity.entity_id))?;
        debug!(entity_id = %entity.entity_id, state = %body.state, "Published state");
        Ok(())
    }

    /// Removing an entity Home Assistant does not know is not an error
    pub async fn remove_state(&self, entity_id: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(self.state_url(entity_id)?)
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        response
            .error_for_status()
            .with_context(|| format!("Failed to remove {entity_id}"))?;
        Ok(())
    }

    /// Removes every state published for a config entry, whatever its entity id.
    /// Returns the removed entity ids.
    pub async fn remove_entry_states(&self, entry_id: &str) -> anyhow::Result<Vec<String>> {
        let owned: Vec<String> = self
            .list_states()
            .await?
            .into_iter()
            .filter(|s| {
                s.attributes.get(CONFIG_ENTRY_ATTRIBUTE).and_then(Value::as_str) == Some(entry_id)
            })
            .map(|s| s.entity_id)
            .collect();
        for entity_id in &owned {
            self.remove_state(entity_id).await?;
        }
        Ok(owned)
    }
}

#[async_trait]
impl EntitySink for HomeAssistantAPI {
    async fn publish(&self, entity: &EntityState) -> anyhow::Result<()> {
        self.publish_state(entity).await
    }

    async fn remove(&self, entity_id: &str) -> anyhow::Result<()> {
        self.remove_state(entity_id).await
    }

    async fn entity_ids(&self) -> anyhow::Result<Vec<String>> {
        Ok(self
            .list_states()
            .await?
            .into_iter()
            .map(|s| s.entity_id)
            .collect())
    }
}

#[derive(Debug, Serialize)]
struct StateUpdate {
    state: String,
    attributes: Map<String, Value>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HAState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub last_changed: String,
    #[serde(default)]
    pub last_updated: String,
}
