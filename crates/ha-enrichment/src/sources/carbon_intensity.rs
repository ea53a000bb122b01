//! Grid carbon intensity: polled every 15 min, bearer-token authenticated.

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::framework::{Fetch, SourceError};

pub struct CarbonIntensityFetcher {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: RwLock<String>,
}

impl CarbonIntensityFetcher {
    pub fn new(client: reqwest::Client, endpoint: String, bearer_token: String) -> Self {
        CarbonIntensityFetcher {
            client,
            endpoint,
            bearer_token: RwLock::new(bearer_token),
        }
    }
}

#[async_trait]
impl Fetch for CarbonIntensityFetcher {
    async fn fetch(&self) -> Result<Value, SourceError> {
        let bearer_token = self.bearer_token.read().unwrap().clone();
        let response = self
            .client
            .get(&self.endpoint)
            .bearer_auth(&bearer_token)
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SourceError::Auth("carbon intensity bearer token rejected".to_owned()));
        }
        if !response.status().is_success() {
            return Err(SourceError::Http(format!(
                "carbon intensity endpoint returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }

    fn rotate_credential(&self, new_value: String) -> Result<(), SourceError> {
        *self.bearer_token.write().unwrap() = new_value;
        Ok(())
    }
}
