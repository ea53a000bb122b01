//! Air quality: polled hourly, API-key authenticated via a header.

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::framework::{Fetch, SourceError};

pub struct AirQualityFetcher {
    client: reqwest::Client,
    endpoint: String,
    api_key: RwLock<String>,
}

impl AirQualityFetcher {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: String) -> Self {
        AirQualityFetcher {
            client,
            endpoint,
            api_key: RwLock::new(api_key),
        }
    }
}

#[async_trait]
impl Fetch for AirQualityFetcher {
    async fn fetch(&self) -> Result<Value, SourceError> {
        let api_key = self.api_key.read().unwrap().clone();
        let response = self
            .client
            .get(&self.endpoint)
            .header("X-Api-Key", &api_key)
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SourceError::Auth("air quality API key rejected".to_owned()));
        }
        if !response.status().is_success() {
            return Err(SourceError::Http(format!(
                "air quality endpoint returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }

    fn rotate_credential(&self, new_value: String) -> Result<(), SourceError> {
        *self.api_key.write().unwrap() = new_value;
        Ok(())
    }
}
