//! Sub-metered power: polled every 5 min from an in-home device with
//! device-specific authentication (a shared secret baked into the device's
//! local API, not a standard bearer/API-key scheme).

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::framework::{Fetch, SourceError};

pub struct SmartMeterFetcher {
    client: reqwest::Client,
    endpoint: String,
    device_secret: RwLock<String>,
}

impl SmartMeterFetcher {
    pub fn new(client: reqwest::Client, endpoint: String, device_secret: String) -> Self {
        SmartMeterFetcher {
            client,
            endpoint,
            device_secret: RwLock::new(device_secret),
        }
    }
}

#[async_trait]
impl Fetch for SmartMeterFetcher {
    async fn fetch(&self) -> Result<Value, SourceError> {
        let device_secret = self.device_secret.read().unwrap().clone();
        let response = self
            .client
            .get(&self.endpoint)
            .header("X-Device-Secret", &device_secret)
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        if response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::Auth("smart meter device secret rejected".to_owned()));
        }
        if !response.status().is_success() {
            return Err(SourceError::Http(format!(
                "smart meter endpoint returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }

    fn rotate_credential(&self, new_value: String) -> Result<(), SourceError> {
        *self.device_secret.write().unwrap() = new_value;
        Ok(())
    }
}
