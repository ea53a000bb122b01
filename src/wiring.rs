//! Assembles the six components into a running pipeline: builds the
//! enrichment sources and Joiner, starts the Normalizer, Write Pipeline and
//! Connection Session tasks, and exposes the shared state the operator HTTP
//! surface reads.

use std::collections::BTreeMap;
use std::sync::Arc;

use ha_client::{ClientConfig, ConnectionSession, SessionState};
use ha_enrichment::framework::{EnrichmentSource, ErasedSource, SourceConfig};
use ha_enrichment::sources::{
    AirQualityFetcher, CalendarFetcher, CarbonIntensityFetcher, ElectricityPricingFetcher,
    SmartMeterFetcher, TokenStore, WeatherFetcher,
};
use ha_enrichment::Joiner;
use ha_normalize::{normalize, NormalizeOutcome, NormalizerConfig as NormalizeRulesConfig};
use ha_protocol::model::{RawEvent, SourceName};
use ha_write_pipeline::{DeadLetterLog, PipelineConfig, PipelineHealth, StoreClient, StoreClientConfig, WritePipeline};
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tracing::{info, warn};

use crate::config::Config;

const RAW_EVENT_CHANNEL_CAPACITY: usize = 256;
const NORMALIZED_EVENT_CHANNEL_CAPACITY: usize = 256;
const ENRICHED_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared, read-mostly state the operator HTTP surface queries. Everything
/// here is cheap to clone (Arcs and a watch::Receiver).
#[derive(Clone)]
pub struct AppState {
    pub session_state: watch::Receiver<SessionState>,
    pub sources: Arc<BTreeMap<SourceName, Arc<dyn ErasedSource>>>,
    pub pipeline_health: Arc<PipelineHealth>,
    pub supervisor: Arc<AsyncMutex<ha_supervisor::Supervisor>>,
    pub rejection_counts: Arc<RejectionCounters>,
    pub source_descriptors: Arc<BTreeMap<SourceName, crate::http::sources::SourceDescriptor>>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Default)]
pub struct RejectionCounters {
    pub invalid_entity_id: std::sync::atomic::AtomicU64,
    pub null_state: std::sync::atomic::AtomicU64,
    pub unparseable_timestamp: std::sync::atomic::AtomicU64,
    pub timestamp_order_violation: std::sync::atomic::AtomicU64,
    pub last_event_at: std::sync::atomic::AtomicI64,
    pub events_accepted: std::sync::atomic::AtomicU64,
}

/// Everything spawned by `wire_up`, so `main` can wait on it and trigger a
/// clean shutdown.
pub struct RunningCore {
    pub state: AppState,
    pub session_shutdown: oneshot::Sender<()>,
    pub pipeline_shutdown: oneshot::Sender<()>,
    pub handles: Vec<tokio::task::JoinHandle<()>>,
}

pub fn wire_up(cfg: &Config) -> anyhow::Result<RunningCore> {
    let http_client = reqwest::Client::builder()
        .build()
        .map_err(|e| anyhow::anyhow!("building HTTP client: {e}"))?;

    let mut sources: BTreeMap<SourceName, Arc<dyn ErasedSource>> = BTreeMap::new();
    let mut handles = Vec::new();

    if cfg.sources.weather.enabled {
        let source = EnrichmentSource::new(
            "weather",
            source_cfg(&cfg.sources.weather),
            WeatherFetcher::new(
                http_client.clone(),
                cfg.sources.weather.endpoint.clone(),
                cfg.sources.weather.api_key.clone().unwrap_or_default(),
            ),
        );
        handles.push(source.spawn());
        sources.insert(SourceName::Weather, source);
    }

    if cfg.sources.carbon_intensity.enabled {
        let source = EnrichmentSource::new(
            "carbon_intensity",
            source_cfg(&cfg.sources.carbon_intensity),
            CarbonIntensityFetcher::new(
                http_client.clone(),
                cfg.sources.carbon_intensity.endpoint.clone(),
                cfg.sources.carbon_intensity.bearer_token.clone().unwrap_or_default(),
            ),
        );
        handles.push(source.spawn());
        sources.insert(SourceName::CarbonIntensity, source);
    }

    if cfg.sources.electricity_pricing.enabled {
        let source = EnrichmentSource::new(
            "electricity_pricing",
            source_cfg(&cfg.sources.electricity_pricing),
            ElectricityPricingFetcher::new(
                http_client.clone(),
                cfg.sources.electricity_pricing.endpoint.clone(),
                cfg.sources.electricity_pricing.bearer_token.clone(),
            ),
        );
        handles.push(source.spawn());
        sources.insert(SourceName::ElectricityPricing, source);
    }

    if cfg.sources.air_quality.enabled {
        let source = EnrichmentSource::new(
            "air_quality",
            source_cfg(&cfg.sources.air_quality),
            AirQualityFetcher::new(
                http_client.clone(),
                cfg.sources.air_quality.endpoint.clone(),
                cfg.sources.air_quality.api_key.clone().unwrap_or_default(),
            ),
        );
        handles.push(source.spawn());
        sources.insert(SourceName::AirQuality, source);
    }

    if cfg.sources.calendar.enabled {
        let refresh_token_contents = std::fs::read_to_string(&cfg.sources.calendar.refresh_token_file)
            .map_err(|e| anyhow::anyhow!("reading calendar refresh token file: {e}"))?;
        let token_store = Arc::new(
            TokenStore::load_or_init(
                std::path::PathBuf::from(&cfg.sources.calendar.token_store_path),
                refresh_token_contents.trim(),
            )
            .map_err(|e| anyhow::anyhow!("initializing calendar token store: {e}"))?,
        );

        let calendar_cfg = SourceConfig::new(
            cfg.sources.calendar.interval,
            cfg.sources.calendar.ttl,
            cfg.sources.calendar.max_stale,
        );
        let source = EnrichmentSource::new(
            "calendar",
            calendar_cfg,
            CalendarFetcher::new(
                http_client.clone(),
                cfg.sources.calendar.token_endpoint.clone(),
                cfg.sources.calendar.calendar_endpoint.clone(),
                cfg.sources.calendar.client_id.clone(),
                cfg.sources.calendar.client_secret.clone(),
                token_store,
            ),
        );
        handles.push(source.spawn());
        sources.insert(SourceName::Calendar, source);
    }

    if cfg.sources.smart_meter.enabled {
        let source = EnrichmentSource::new(
            "smart_meter",
            source_cfg(&cfg.sources.smart_meter),
            SmartMeterFetcher::new(
                http_client.clone(),
                cfg.sources.smart_meter.endpoint.clone(),
                cfg.sources.smart_meter.api_key.clone().unwrap_or_default(),
            ),
        );
        handles.push(source.spawn());
        sources.insert(SourceName::SmartMeter, source);
    }

    let joiner = Arc::new(Joiner::new(sources.clone()));
    let sources = Arc::new(sources);

    let store_client = Arc::new(StoreClient::new(
        http_client.clone(),
        StoreClientConfig {
            write_url: cfg.store.write_url.clone(),
            organization: cfg.store.organization.clone(),
            bucket: cfg.store.bucket.clone(),
            precision: cfg.store.precision.clone(),
            auth_token: cfg.store.auth_token.clone(),
            write_timeout: cfg.store.write_timeout,
        },
    ));
    let dead_letter = Arc::new(DeadLetterLog::new(std::path::PathBuf::from(&cfg.dead_letter_path)));
    let write_pipeline = WritePipeline::new(
        PipelineConfig {
            measurement: cfg.write_pipeline.measurement.clone(),
            max_points: cfg.write_pipeline.max_points,
            max_age: cfg.write_pipeline.max_age,
            max_in_flight: cfg.write_pipeline.max_in_flight,
            write_attempts: cfg.write_pipeline.write_attempts,
            retry_initial: cfg.write_pipeline.retry_initial,
            retry_max: cfg.write_pipeline.retry_max,
            shutdown_grace: cfg.write_pipeline.shutdown_grace,
        },
        store_client,
        dead_letter,
    );
    let pipeline_health = write_pipeline.health();

    let (enriched_tx, enriched_rx) = mpsc::channel(ENRICHED_EVENT_CHANNEL_CAPACITY);
    let (pipeline_shutdown_tx, pipeline_shutdown_rx) = oneshot::channel();
    handles.push(tokio::spawn(async move {
        write_pipeline.run(enriched_rx, pipeline_shutdown_rx).await;
    }));

    let (normalized_tx, mut normalized_rx) = mpsc::channel(NORMALIZED_EVENT_CHANNEL_CAPACITY);
    let joiner_for_task = Arc::clone(&joiner);
    handles.push(tokio::spawn(async move {
        while let Some(normalized) = normalized_rx.recv().await {
            let enriched = joiner_for_task.join(normalized);
            if enriched_tx.send(enriched).await.is_err() {
                warn!("write pipeline channel closed, stopping joiner");
                break;
            }
        }
    }));

    let rejection_counts = Arc::new(RejectionCounters::default());
    let (raw_tx, mut raw_rx) = mpsc::channel::<RawEvent>(RAW_EVENT_CHANNEL_CAPACITY);
    let normalize_rules = build_normalizer_rules(cfg);
    let rejection_counts_for_task = Arc::clone(&rejection_counts);
    handles.push(tokio::spawn(async move {
        while let Some(raw) = raw_rx.recv().await {
            match normalize(raw, &normalize_rules) {
                NormalizeOutcome::Accepted(event) => {
                    rejection_counts_for_task
                        .last_event_at
                        .store(event.time_fired.timestamp(), std::sync::atomic::Ordering::Relaxed);
                    rejection_counts_for_task
                        .events_accepted
                        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    if normalized_tx.send(event).await.is_err() {
                        warn!("joiner channel closed, stopping normalizer");
                        break;
                    }
                }
                NormalizeOutcome::Rejected { reason, entity_id } => {
                    count_rejection(&rejection_counts_for_task, reason);
                    warn!(entity_id = %entity_id, reason = reason.as_str(), "event rejected by normalizer");
                }
            }
        }
    }));

    let (session_shutdown_tx, session_shutdown_rx) = oneshot::channel();
    let (session, session_state) = ConnectionSession::new(
        ClientConfig {
            hub_url: cfg.hub.url.clone(),
            access_token: cfg.hub.access_token.clone(),
            event_type: cfg.hub.event_type.clone(),
            keepalive_timeout: cfg.hub.keepalive_timeout,
            backoff: ha_client::BackoffConfig {
                initial: cfg.hub.reconnect_initial,
                max: cfg.hub.reconnect_max,
                multiplier: 2.0,
            },
        },
        raw_tx,
    );
    handles.push(tokio::spawn(async move {
        session.run(session_shutdown_rx).await;
    }));

    let mut supervisor = ha_supervisor::Supervisor::new();
    for name in ["session", "normalizer", "joiner", "write_pipeline"] {
        supervisor.register(name, ha_supervisor::RestartPolicy::default());
    }
    for name in SourceName::ALL {
        supervisor.register(name.as_str(), ha_supervisor::RestartPolicy::default());
    }

    info!("core pipeline wired up");

    Ok(RunningCore {
        state: AppState {
            session_state,
            sources,
            pipeline_health,
            supervisor: Arc::new(AsyncMutex::new(supervisor)),
            rejection_counts,
            source_descriptors: Arc::new(build_source_descriptors(cfg)),
            started_at: chrono::Utc::now(),
        },
        session_shutdown: session_shutdown_tx,
        pipeline_shutdown: pipeline_shutdown_tx,
        handles,
    })
}

fn source_cfg(endpoint: &crate::config::SourceEndpointConfig) -> SourceConfig {
    let mut cfg = SourceConfig::new(endpoint.interval, endpoint.ttl, endpoint.max_stale);
    cfg.rate_limit_capacity = endpoint.rate_limit_capacity;
    cfg.rate_limit_refill_per_sec = endpoint.rate_limit_refill_per_sec;
    cfg
}

fn endpoint_descriptor(endpoint: &crate::config::SourceEndpointConfig) -> crate::http::sources::SourceDescriptor {
    crate::http::sources::SourceDescriptor {
        endpoint: endpoint.endpoint.clone(),
        interval_secs: endpoint.interval.as_secs(),
        ttl_secs: endpoint.ttl.as_secs(),
        max_stale_secs: endpoint.max_stale.as_secs(),
    }
}

fn build_source_descriptors(cfg: &Config) -> BTreeMap<SourceName, crate::http::sources::SourceDescriptor> {
    let mut map = BTreeMap::new();
    if cfg.sources.weather.enabled {
        map.insert(SourceName::Weather, endpoint_descriptor(&cfg.sources.weather));
    }
    if cfg.sources.carbon_intensity.enabled {
        map.insert(
            SourceName::CarbonIntensity,
            endpoint_descriptor(&cfg.sources.carbon_intensity),
        );
    }
    if cfg.sources.electricity_pricing.enabled {
        map.insert(
            SourceName::ElectricityPricing,
            endpoint_descriptor(&cfg.sources.electricity_pricing),
        );
    }
    if cfg.sources.air_quality.enabled {
        map.insert(SourceName::AirQuality, endpoint_descriptor(&cfg.sources.air_quality));
    }
    if cfg.sources.calendar.enabled {
        map.insert(
            SourceName::Calendar,
            crate::http::sources::SourceDescriptor {
                endpoint: cfg.sources.calendar.calendar_endpoint.clone(),
                interval_secs: cfg.sources.calendar.interval.as_secs(),
                ttl_secs: cfg.sources.calendar.ttl.as_secs(),
                max_stale_secs: cfg.sources.calendar.max_stale.as_secs(),
            },
        );
    }
    if cfg.sources.smart_meter.enabled {
        map.insert(SourceName::SmartMeter, endpoint_descriptor(&cfg.sources.smart_meter));
    }
    map
}

fn build_normalizer_rules(cfg: &Config) -> NormalizeRulesConfig {
    NormalizeRulesConfig {
        known_domains: cfg.normalizer.known_domains.iter().cloned().collect(),
    }
}

fn count_rejection(counters: &RejectionCounters, reason: ha_protocol::model::RejectReason) {
    use ha_protocol::model::RejectReason;
    use std::sync::atomic::Ordering;
    match reason {
        RejectReason::InvalidEntityId => counters.invalid_entity_id.fetch_add(1, Ordering::Relaxed),
        RejectReason::NullState => counters.null_state.fetch_add(1, Ordering::Relaxed),
        RejectReason::UnparseableTimestamp => {
            counters.unparseable_timestamp.fetch_add(1, Ordering::Relaxed)
        }
        RejectReason::TimestampOrderViolation => {
            counters.timestamp_order_violation.fetch_add(1, Ordering::Relaxed)
        }
    };
}
