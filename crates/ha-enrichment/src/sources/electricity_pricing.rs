//! Electricity pricing: polled hourly. Bearer auth is optional — some
//! tariff endpoints are public.

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::framework::{Fetch, SourceError};

pub struct ElectricityPricingFetcher {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: RwLock<Option<String>>,
}

impl ElectricityPricingFetcher {
    pub fn new(client: reqwest::Client, endpoint: String, bearer_token: Option<String>) -> Self {
        ElectricityPricingFetcher {
            client,
            endpoint,
            bearer_token: RwLock::new(bearer_token),
        }
    }
}

#[async_trait]
impl Fetch for ElectricityPricingFetcher {
    async fn fetch(&self) -> Result<Value, SourceError> {
        let bearer_token = self.bearer_token.read().unwrap().clone();
        let mut request = self.client.get(&self.endpoint);
        if let Some(token) = &bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| SourceError::Http(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SourceError::Auth("electricity pricing bearer token rejected".to_owned()));
        }
        if !response.status().is_success() {
            return Err(SourceError::Http(format!(
                "electricity pricing endpoint returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }

    fn rotate_credential(&self, new_value: String) -> Result<(), SourceError> {
        *self.bearer_token.write().unwrap() = Some(new_value);
        Ok(())
    }
}
