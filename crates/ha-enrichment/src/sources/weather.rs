//! Weather: polled every 15 min via an API-key-authenticated REST endpoint.

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::framework::{Fetch, SourceError};

pub struct WeatherFetcher {
    client: reqwest::Client,
    endpoint: String,
    api_key: RwLock<String>,
}

impl WeatherFetcher {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: String) -> Self {
        WeatherFetcher {
            client,
            endpoint,
            api_key: RwLock::new(api_key),
        }
    }
}

#[async_trait]
impl Fetch for WeatherFetcher {
    async fn fetch(&self) -> Result<Value, SourceError> {
        let api_key = self.api_key.read().unwrap().clone();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("key", api_key.as_str())])
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SourceError::Auth("weather API key rejected".to_owned()));
        }
        if !response.status().is_success() {
            return Err(SourceError::Http(format!(
                "weather endpoint returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;
        debug!("weather fetch succeeded");
        Ok(body)
    }

    fn rotate_credential(&self, new_value: String) -> Result<(), SourceError> {
        *self.api_key.write().unwrap() = new_value;
        Ok(())
    }
}
