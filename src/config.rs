//! Core configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/ha-ingest-core/config.toml`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct Config {
    pub schema_version: u32,
    pub hub: HubConfig,
    pub normalizer: NormalizerConfig,
    pub sources: SourcesConfig,
    pub write_pipeline: WritePipelineConfig,
    pub store: StoreConfig,
    pub dead_letter_path: String,
    pub operator_http_bind: String,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub url: String,
    pub access_token: String,
    pub event_type: String,
    pub keepalive_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    pub known_domains: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SourceEndpointConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
    pub interval: Duration,
    pub ttl: Duration,
    pub max_stale: Duration,
    pub rate_limit_capacity: f64,
    pub rate_limit_refill_per_sec: f64,
}

#[derive(Debug, Clone)]
pub struct CalendarSourceConfig {
    pub enabled: bool,
    pub token_endpoint: String,
    pub calendar_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token_file: String,
    pub token_store_path: String,
    pub interval: Duration,
    pub ttl: Duration,
    pub max_stale: Duration,
}

#[derive(Debug, Clone)]
pub struct SourcesConfig {
    pub weather: SourceEndpointConfig,
    pub carbon_intensity: SourceEndpointConfig,
    pub electricity_pricing: SourceEndpointConfig,
    pub air_quality: SourceEndpointConfig,
    pub calendar: CalendarSourceConfig,
    pub smart_meter: SourceEndpointConfig,
}

#[derive(Debug, Clone)]
pub struct WritePipelineConfig {
    pub measurement: String,
    pub max_points: usize,
    pub max_age: Duration,
    pub max_in_flight: usize,
    pub write_attempts: u32,
    pub retry_initial: Duration,
    pub retry_max: Duration,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub write_url: String,
    pub organization: String,
    pub bucket: String,
    pub precision: String,
    pub auth_token: String,
    pub write_timeout: Duration,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    hub: Option<RawHubConfig>,
    normalizer: Option<RawNormalizerConfig>,
    sources: Option<RawSourcesConfig>,
    write_pipeline: Option<RawWritePipelineConfig>,
    store: Option<RawStoreConfig>,
    dead_letter: Option<RawDeadLetterConfig>,
    operator_http: Option<RawOperatorHttpConfig>,
}

#[derive(Debug, Deserialize)]
struct RawHubConfig {
    url: Option<String>,
    token_file: Option<String>,
    event_type: Option<String>,
    keepalive_timeout_secs: Option<u64>,
    reconnect_initial_ms: Option<u64>,
    reconnect_max_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawNormalizerConfig {
    known_domains: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSourceEndpointConfig {
    enabled: Option<bool>,
    endpoint: Option<String>,
    api_key_file: Option<String>,
    bearer_token_file: Option<String>,
    interval_secs: Option<u64>,
    ttl_secs: Option<u64>,
    max_stale_secs: Option<u64>,
    rate_limit_capacity: Option<f64>,
    rate_limit_refill_per_sec: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawCalendarSourceConfig {
    enabled: Option<bool>,
    token_endpoint: Option<String>,
    calendar_endpoint: Option<String>,
    client_id: Option<String>,
    client_secret_file: Option<String>,
    refresh_token_file: Option<String>,
    token_store_path: Option<String>,
    interval_secs: Option<u64>,
    ttl_secs: Option<u64>,
    max_stale_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSourcesConfig {
    weather: Option<RawSourceEndpointConfig>,
    carbon_intensity: Option<RawSourceEndpointConfig>,
    electricity_pricing: Option<RawSourceEndpointConfig>,
    air_quality: Option<RawSourceEndpointConfig>,
    calendar: Option<RawCalendarSourceConfig>,
    smart_meter: Option<RawSourceEndpointConfig>,
}

#[derive(Debug, Deserialize)]
struct RawWritePipelineConfig {
    measurement: Option<String>,
    max_points: Option<usize>,
    max_age_ms: Option<u64>,
    max_in_flight: Option<usize>,
    write_attempts: Option<u32>,
    retry_initial_ms: Option<u64>,
    retry_max_secs: Option<u64>,
    shutdown_grace_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawStoreConfig {
    write_url: Option<String>,
    organization: Option<String>,
    bucket: Option<String>,
    precision: Option<String>,
    token_file: Option<String>,
    write_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawDeadLetterConfig {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOperatorHttpConfig {
    bind: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<Config, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from_path(Path::new("/etc/ha-ingest-core/config.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let raw_hub = raw.hub.ok_or_else(|| ConfigError::MissingField("hub".to_owned()))?;
    let url = raw_hub.url.ok_or_else(|| ConfigError::MissingField("hub.url".to_owned()))?;
    let token_file = raw_hub
        .token_file
        .ok_or_else(|| ConfigError::MissingField("hub.token_file".to_owned()))?;
    let hub = HubConfig {
        url,
        access_token: read_secret_file(&token_file)?,
        event_type: raw_hub.event_type.unwrap_or_else(|| "state_changed".to_owned()),
        keepalive_timeout: Duration::from_secs(raw_hub.keepalive_timeout_secs.unwrap_or(60)),
        reconnect_initial: Duration::from_millis(raw_hub.reconnect_initial_ms.unwrap_or(1000)),
        reconnect_max: Duration::from_secs(raw_hub.reconnect_max_secs.unwrap_or(60)),
    };

    let known_domains = raw
        .normalizer
        .and_then(|n| n.known_domains)
        .unwrap_or_else(|| {
            ha_normalize::NormalizerConfig::default()
                .known_domains
                .into_iter()
                .collect()
        });
    let normalizer = NormalizerConfig { known_domains };

    let raw_sources = raw.sources.unwrap_or_default();
    let sources = SourcesConfig {
        weather: build_endpoint(
            raw_sources.weather,
            "sources.weather",
            900,
            1800,
            7200,
            EndpointAuth::ApiKey,
        )?,
        carbon_intensity: build_endpoint(
            raw_sources.carbon_intensity,
            "sources.carbon_intensity",
            900,
            1800,
            7200,
            EndpointAuth::Bearer,
        )?,
        electricity_pricing: build_endpoint(
            raw_sources.electricity_pricing,
            "sources.electricity_pricing",
            3600,
            5400,
            21600,
            EndpointAuth::OptionalBearer,
        )?,
        air_quality: build_endpoint(
            raw_sources.air_quality,
            "sources.air_quality",
            3600,
            5400,
            21600,
            EndpointAuth::ApiKey,
        )?,
        calendar: build_calendar(raw_sources.calendar)?,
        smart_meter: build_endpoint(
            raw_sources.smart_meter,
            "sources.smart_meter",
            300,
            600,
            1800,
            EndpointAuth::ApiKey,
        )?,
    };

    let raw_wp = raw.write_pipeline;
    let write_pipeline = match raw_wp {
        Some(w) => WritePipelineConfig {
            measurement: w.measurement.unwrap_or_else(|| "home_events".to_owned()),
            max_points: w.max_points.unwrap_or(1000),
            max_age: Duration::from_millis(w.max_age_ms.unwrap_or(1000)),
            max_in_flight: w.max_in_flight.unwrap_or(2),
            write_attempts: w.write_attempts.unwrap_or(5),
            retry_initial: Duration::from_millis(w.retry_initial_ms.unwrap_or(100)),
            retry_max: Duration::from_secs(w.retry_max_secs.unwrap_or(30)),
            shutdown_grace: Duration::from_secs(w.shutdown_grace_secs.unwrap_or(10)),
        },
        None => WritePipelineConfig {
            measurement: "home_events".to_owned(),
            max_points: 1000,
            max_age: Duration::from_millis(1000),
            max_in_flight: 2,
            write_attempts: 5,
            retry_initial: Duration::from_millis(100),
            retry_max: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
        },
    };

    let raw_store = raw.store.ok_or_else(|| ConfigError::MissingField("store".to_owned()))?;
    let write_url = raw_store
        .write_url
        .ok_or_else(|| ConfigError::MissingField("store.write_url".to_owned()))?;
    let store_token_file = raw_store
        .token_file
        .ok_or_else(|| ConfigError::MissingField("store.token_file".to_owned()))?;
    let store = StoreConfig {
        write_url,
        organization: raw_store
            .organization
            .ok_or_else(|| ConfigError::MissingField("store.organization".to_owned()))?,
        bucket: raw_store
            .bucket
            .ok_or_else(|| ConfigError::MissingField("store.bucket".to_owned()))?,
        precision: raw_store.precision.unwrap_or_else(|| "ns".to_owned()),
        auth_token: read_secret_file(&store_token_file)?,
        write_timeout: Duration::from_secs(raw_store.write_timeout_secs.unwrap_or(30)),
    };

    let dead_letter_path = raw
        .dead_letter
        .and_then(|d| d.path)
        .unwrap_or_else(|| "/var/lib/ha-ingest-core/dead_letter.ndjson".to_owned());

    let operator_http_bind = raw
        .operator_http
        .and_then(|h| h.bind)
        .unwrap_or_else(|| "127.0.0.1:9090".to_owned());

    Ok(Config {
        schema_version,
        hub,
        normalizer,
        sources,
        write_pipeline,
        store,
        dead_letter_path,
        operator_http_bind,
    })
}

enum EndpointAuth {
    ApiKey,
    Bearer,
    OptionalBearer,
}

fn build_endpoint(
    raw: Option<RawSourceEndpointConfig>,
    field_prefix: &str,
    default_interval_secs: u64,
    default_ttl_secs: u64,
    default_max_stale_secs: u64,
    auth: EndpointAuth,
) -> Result<SourceEndpointConfig, ConfigError> {
    let raw = raw.unwrap_or_default();
    let enabled = raw.enabled.unwrap_or(true);

    let endpoint = if enabled {
        raw.endpoint
            .ok_or_else(|| ConfigError::MissingField(format!("{field_prefix}.endpoint")))?
    } else {
        String::new()
    };

    let (api_key, bearer_token) = if !enabled {
        (None, None)
    } else {
        match auth {
            EndpointAuth::ApiKey => {
                let key_file = raw
                    .api_key_file
                    .ok_or_else(|| ConfigError::MissingField(format!("{field_prefix}.api_key_file")))?;
                (Some(read_secret_file(&key_file)?), None)
            }
            EndpointAuth::Bearer => {
                let token_file = raw.bearer_token_file.ok_or_else(|| {
                    ConfigError::MissingField(format!("{field_prefix}.bearer_token_file"))
                })?;
                (None, Some(read_secret_file(&token_file)?))
            }
            EndpointAuth::OptionalBearer => {
                let token = raw.bearer_token_file.map(|f| read_secret_file(&f)).transpose()?;
                (None, token)
            }
        }
    };

    let interval = Duration::from_secs(raw.interval_secs.unwrap_or(default_interval_secs));
    Ok(SourceEndpointConfig {
        enabled,
        endpoint,
        api_key,
        bearer_token,
        interval,
        ttl: Duration::from_secs(raw.ttl_secs.unwrap_or(default_ttl_secs)),
        max_stale: Duration::from_secs(raw.max_stale_secs.unwrap_or(default_max_stale_secs)),
        rate_limit_capacity: raw.rate_limit_capacity.unwrap_or(1.0),
        rate_limit_refill_per_sec: raw
            .rate_limit_refill_per_sec
            .unwrap_or(1.0 / interval.as_secs_f64()),
    })
}

fn build_calendar(raw: Option<RawCalendarSourceConfig>) -> Result<CalendarSourceConfig, ConfigError> {
    let raw = raw.unwrap_or_default();
    let enabled = raw.enabled.unwrap_or(true);

    if !enabled {
        return Ok(CalendarSourceConfig {
            enabled: false,
            token_endpoint: String::new(),
            calendar_endpoint: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token_file: String::new(),
            token_store_path: "/var/lib/ha-ingest-core/calendar_token.json".to_owned(),
            interval: Duration::from_secs(900),
            ttl: Duration::from_secs(1200),
            max_stale: Duration::from_secs(3600),
        });
    }

    let client_secret_file = raw
        .client_secret_file
        .ok_or_else(|| ConfigError::MissingField("sources.calendar.client_secret_file".to_owned()))?;

    Ok(CalendarSourceConfig {
        enabled: true,
        token_endpoint: raw
            .token_endpoint
            .ok_or_else(|| ConfigError::MissingField("sources.calendar.token_endpoint".to_owned()))?,
        calendar_endpoint: raw
            .calendar_endpoint
            .ok_or_else(|| ConfigError::MissingField("sources.calendar.calendar_endpoint".to_owned()))?,
        client_id: raw
            .client_id
            .ok_or_else(|| ConfigError::MissingField("sources.calendar.client_id".to_owned()))?,
        client_secret: read_secret_file(&client_secret_file)?,
        refresh_token_file: raw
            .refresh_token_file
            .ok_or_else(|| ConfigError::MissingField("sources.calendar.refresh_token_file".to_owned()))?,
        token_store_path: raw
            .token_store_path
            .unwrap_or_else(|| "/var/lib/ha-ingest-core/calendar_token.json".to_owned()),
        interval: Duration::from_secs(raw.interval_secs.unwrap_or(900)),
        ttl: Duration::from_secs(raw.ttl_secs.unwrap_or(1200)),
        max_stale: Duration::from_secs(raw.max_stale_secs.unwrap_or(3600)),
    })
}

fn read_secret_file(path: &str) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading secret file '{path}': {e}")))?;
    Ok(content.trim().to_owned())
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "missing required field: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_secret(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn rejects_unsupported_schema_version() {
        let err = load_config_from_str("schema_version = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn missing_hub_section_is_a_missing_field_error() {
        let err = load_config_from_str("schema_version = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "hub"));
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let hub_token = write_secret(&dir, "hub_token", "hub-secret\n");
        let weather_key = write_secret(&dir, "weather_key", "weather-secret\n");
        let carbon_token = write_secret(&dir, "carbon_token", "carbon-secret\n");
        let aq_key = write_secret(&dir, "aq_key", "aq-secret\n");
        let smart_meter_key = write_secret(&dir, "smart_meter_key", "sm-secret\n");
        let store_token = write_secret(&dir, "store_token", "store-secret\n");

        let toml_str = format!(
            r#"
schema_version = 1

[hub]
url = "wss://hub.example.internal/api/websocket"
token_file = "{hub_token}"

[sources.weather]
endpoint = "https://weather.example/v1/current"
api_key_file = "{weather_key}"

[sources.carbon_intensity]
endpoint = "https://carbon.example/v1/intensity"
bearer_token_file = "{carbon_token}"

[sources.electricity_pricing]
enabled = false

[sources.air_quality]
endpoint = "https://aq.example/v1/readings"
api_key_file = "{aq_key}"

[sources.calendar]
enabled = false

[sources.smart_meter]
endpoint = "https://meter.local/v1/reading"
api_key_file = "{smart_meter_key}"

[store]
write_url = "https://store.example/api/v2/write"
organization = "home"
bucket = "telemetry"
token_file = "{store_token}"
"#
        );

        let cfg = load_config_from_str(&toml_str).expect("config should load");
        assert_eq!(cfg.hub.access_token, "hub-secret");
        assert_eq!(cfg.sources.weather.api_key.as_deref(), Some("weather-secret"));
        assert!(!cfg.sources.electricity_pricing.enabled);
        assert!(!cfg.sources.calendar.enabled);
        assert_eq!(cfg.write_pipeline.max_points, 1000);
        assert_eq!(cfg.store.precision, "ns");
    }
}
