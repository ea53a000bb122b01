//! HTTP client for the downstream time-series store's line-oriented write
//! API: `measurement,tags fields timestamp` per line, one request per batch.

use ha_protocol::write_batch::WriteBatch;

#[derive(Debug, Clone)]
pub struct StoreClientConfig {
    pub write_url: String,
    pub organization: String,
    pub bucket: String,
    pub precision: String,
    pub auth_token: String,
    pub write_timeout: std::time::Duration,
}

pub struct StoreClient {
    http: reqwest::Client,
    cfg: StoreClientConfig,
}

impl StoreClient {
    pub fn new(http: reqwest::Client, cfg: StoreClientConfig) -> Self {
        StoreClient { http, cfg }
    }

    pub async fn write(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let body = encode_line_protocol(batch);

        let response = tokio::time::timeout(
            self.cfg.write_timeout,
            self.http
                .post(&self.cfg.write_url)
                .bearer_auth(&self.cfg.auth_token)
                .query(&[
                    ("org", self.cfg.organization.as_str()),
                    ("bucket", self.cfg.bucket.as_str()),
                    ("precision", self.cfg.precision.as_str()),
                ])
                .header("Content-Type", "text/plain; charset=utf-8")
                .body(body)
                .send(),
        )
        .await
        .map_err(|_| StoreError::Transient("write request timed out".to_owned()))?
        .map_err(|e| StoreError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
            return Err(StoreError::Transient(format!("store returned {status}")));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(StoreError::Transient("store is rate-limiting writes".to_owned()));
        }
        Err(StoreError::NonTransient(format!("store returned {status}")))
    }
}

/// Line protocol: `measurement,entity_id=<id>,domain=<domain>,idempotency_key=<key> value=<normalized_value>[,<source>_fresh=<bool>,<source>="<json>"]... <unix_nanos>`
///
/// `idempotency_key` lives in the tag set, not the field set: the store
/// dedupes writes by tag set, so the key has to ride alongside
/// `entity_id`/`domain` to make retries of the same logical write collapse
/// to a single point.
///
/// One `<source>_fresh` and one `<source>` field per enrichment the event
/// carries, so a source that was omitted by the Joiner (never fetched, or
/// past `max_stale`) simply contributes no fields rather than a null.
fn encode_line_protocol(batch: &WriteBatch) -> String {
    let mut out = String::new();
    for point in &batch.points {
        let normalized = &point.event.normalized;
        let value_field = normalized
            .normalized_value
            .map(|v| format!("value={v}"))
            .unwrap_or_else(|| format!("state=\"{}\"", escape_field(&normalized.new_state.state)));

        out.push_str(&batch.measurement);
        out.push(',');
        out.push_str(&format!(
            "entity_id={},domain={},idempotency_key={}",
            escape_tag(&normalized.entity_id),
            escape_tag(&normalized.domain),
            escape_tag(&point.idempotency_key),
        ));
        out.push(' ');
        out.push_str(&value_field);
        for (source, enrichment) in &point.event.enrichments {
            out.push_str(&format!(",{source}_fresh={}", enrichment.fresh));
            out.push_str(&format!(
                ",{source}=\"{}\"",
                escape_field(&enrichment.values.to_string())
            ));
        }
        out.push(' ');
        out.push_str(&normalized.time_fired.timestamp_nanos_opt().unwrap_or(0).to_string());
        out.push('\n');
    }
    out
}

fn escape_tag(s: &str) -> String {
    s.replace(' ', "\\ ").replace(',', "\\,").replace('=', "\\=")
}

fn escape_field(s: &str) -> String {
    s.replace('"', "\\\"")
}

#[derive(Debug)]
pub enum StoreError {
    Transient(String),
    NonTransient(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Transient(s) => write!(f, "transient store error: {s}"),
            StoreError::NonTransient(s) => write!(f, "non-transient store error: {s}"),
        }
    }
}

impl std::error::Error for StoreError {}
