use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client,
    ClientBuilder,
    Url,
};

use crate::{entity::EntityState, prelude::*};

/// Somewhere entity states end up.
#[async_trait(?Send)]
pub trait Publisher {
    async fn publish(&self, states: &[EntityState]) -> Result;
}

/// Writes the states to the log, for running without Home Assistant.
pub struct LogPublisher;

#[async_trait(?Send)]
impl Publisher for LogPublisher {
    async fn publish(&self, states: &[EntityState]) -> Result {
        for state in states {
            info!(entity_id = %state.entity_id, state = %state.state, "state");
        }
        Ok(())
    }
}

/// Home Assistant REST API client.
pub struct Api {
    client: Client,
    base_url: Url,
}

impl Api {
    /// Base URL is the API root, for example: `http://localhost:8123/api`.
    pub fn try_new(access_token: &str, base_url: Url) -> Result<Self> {
        let headers = HeaderMap::from_iter([(
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&format!("Bearer {access_token}"))?,
        )]);
        let client =
            ClientBuilder::new().default_headers(headers).timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, base_url })
    }

    fn state_url(&self, entity_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("invalid base URL"))?
            .pop_if_empty()
            .push("states")
            .push(entity_id);
        Ok(url)
    }

    #[instrument(skip_all, level = "debug", fields(entity_id = %state.entity_id))]
    pub async fn set_state(&self, state: &EntityState) -> Result {
        self.client
            .post(self.state_url(&state.entity_id)?)
            .json(state)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("Home Assistant rejected `{}`", state.entity_id))?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl Publisher for Api {
    async fn publish(&self, states: &[EntityState]) -> Result {
        let mut n_failed = 0;
        for state in states {
            if let Err(error) = self.set_state(state).await {
                n_failed += 1;
                debug!("{error:#}");
            }
        }
        ensure!(n_failed == 0, "failed to publish {n_failed} of {} states", states.len());
        info!(n_states = states.len(), "published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value};

    use super::*;

    #[test]
    fn test_state_url() -> Result {
        let api = Api::try_new("token", Url::parse("http://localhost:8123/api/")?)?;
        assert_eq!(
            api.state_url("sensor.eg4_battery_rack_power")?.as_str(),
            "http://localhost:8123/api/states/sensor.eg4_battery_rack_power"
        );
        Ok(())
    }

    #[test]
    fn test_state_url_without_trailing_slash() -> Result {
        let api = Api::try_new("token", Url::parse("http://homeassistant.local/api")?)?;
        assert_eq!(
            api.state_url("sensor.x")?.as_str(),
            "http://homeassistant.local/api/states/sensor.x"
        );
        Ok(())
    }

    #[test]
    fn test_serialize_state_body() -> Result {
        let mut attributes = Map::new();
        attributes.insert("unit_of_measurement".to_owned(), Value::from("kWh"));
        let state = EntityState {
            entity_id: "sensor.eg4_battery_rack_energy_charged".to_owned(),
            state: "12.346".to_owned(),
            attributes,
        };
        // language=JSON
        let expected = r#"{"state":"12.346","attributes":{"unit_of_measurement":"kWh"}}"#;
        assert_eq!(serde_json::to_string(&state)?, expected);
        Ok(())
    }
}
