//! Calendar: polled every 15 min via OAuth2 refresh-token auth.
//!
//! The refresh token (and the short-lived access token minted from it) is
//! the only durable local state the core keeps. It is loaded once on
//! start, and rewritten atomically — write to a temp file in the same
//! directory, then rename over the target — whenever the access token is
//! refreshed, the way `rt-updater` stages a downloaded binary before
//! putting it in place.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::framework::{Fetch, SourceError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    refresh_token: String,
    access_token: Option<String>,
}

/// Loads, caches, and atomically persists the calendar OAuth token.
pub struct TokenStore {
    path: PathBuf,
    state: RwLock<StoredToken>,
}

impl TokenStore {
    /// Load the token file at `path` if present; otherwise seed it with
    /// `initial_refresh_token` (first-run bootstrap from configuration).
    pub fn load_or_init(path: PathBuf, initial_refresh_token: &str) -> Result<Self, SourceError> {
        let state = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| SourceError::Parse(format!("token store: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredToken {
                refresh_token: initial_refresh_token.to_owned(),
                access_token: None,
            },
            Err(e) => return Err(SourceError::Http(format!("token store read: {e}"))),
        };
        let store = TokenStore {
            path,
            state: RwLock::new(state),
        };
        store.persist()?;
        Ok(store)
    }

    fn refresh_token(&self) -> String {
        self.state.read().unwrap().refresh_token.clone()
    }

    fn set_access_token(&self, access_token: String) -> Result<(), SourceError> {
        {
            let mut state = self.state.write().unwrap();
            state.access_token = Some(access_token);
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), SourceError> {
        let snapshot = self.state.read().unwrap().clone();
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| SourceError::Parse(format!("token store serialize: {e}")))?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| SourceError::Http(format!("token store tempfile: {e}")))?;
        use std::io::Write;
        tmp.write_all(&json)
            .map_err(|e| SourceError::Http(format!("token store write: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))
                .map_err(|e| SourceError::Http(format!("token store chmod: {e}")))?;
        }

        tmp.persist(&self.path)
            .map_err(|e| SourceError::Http(format!("token store rename: {e}")))?;
        Ok(())
    }
}

pub struct CalendarFetcher {
    client: reqwest::Client,
    token_endpoint: String,
    calendar_endpoint: String,
    client_id: String,
    client_secret: String,
    tokens: std::sync::Arc<TokenStore>,
}

impl CalendarFetcher {
    pub fn new(
        client: reqwest::Client,
        token_endpoint: String,
        calendar_endpoint: String,
        client_id: String,
        client_secret: String,
        tokens: std::sync::Arc<TokenStore>,
    ) -> Self {
        CalendarFetcher {
            client,
            token_endpoint,
            calendar_endpoint,
            client_id,
            client_secret,
            tokens,
        }
    }

    async fn refresh_access_token(&self) -> Result<String, SourceError> {
        #[derive(Serialize)]
        struct RefreshRequest<'a> {
            grant_type: &'a str,
            refresh_token: String,
            client_id: &'a str,
            client_secret: &'a str,
        }
        #[derive(Deserialize)]
        struct RefreshResponse {
            access_token: String,
        }

        let response = self
            .client
            .post(&self.token_endpoint)
            .form(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token: self.tokens.refresh_token(),
                client_id: &self.client_id,
                client_secret: &self.client_secret,
            })
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::Auth(format!(
                "calendar OAuth refresh returned {}",
                response.status()
            )));
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;
        self.tokens.set_access_token(parsed.access_token.clone())?;
        Ok(parsed.access_token)
    }
}

#[async_trait]
impl Fetch for CalendarFetcher {
    async fn fetch(&self) -> Result<Value, SourceError> {
        let access_token = self.refresh_access_token().await?;

        let response = self
            .client
            .get(&self.calendar_endpoint)
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SourceError::Auth("calendar access token rejected".to_owned()));
        }
        if !response.status().is_success() {
            return Err(SourceError::Http(format!(
                "calendar endpoint returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }
}
