//! Shared machinery every enrichment source is built from: a ticking poll
//! loop, a token-bucket rate limiter, a three-state circuit breaker, and an
//! atomically-swapped last-good cache.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ha_protocol::health::{ComponentStatus, SourceHealth};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One source's fetch logic. Sources differ only in this implementation;
/// everything else (scheduling, rate limiting, circuit breaking, caching)
/// is shared.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    async fn fetch(&self) -> Result<Value, SourceError>;

    /// Replace the credential this source authenticates with, in place.
    /// Sources whose credential is managed some other way (the calendar
    /// source's OAuth refresh token) override this to reject rotation.
    fn rotate_credential(&self, _new_value: String) -> Result<(), SourceError> {
        Err(SourceError::Auth(
            "credential rotation is not supported for this source".to_owned(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub interval: Duration,
    pub ttl: Duration,
    pub max_stale: Duration,
    pub fetch_timeout: Duration,
    pub rate_limit_capacity: f64,
    pub rate_limit_refill_per_sec: f64,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown: Duration,
}

impl SourceConfig {
    pub fn new(interval: Duration, ttl: Duration, max_stale: Duration) -> Self {
        SourceConfig {
            interval,
            ttl,
            max_stale,
            fetch_timeout: Duration::from_secs(10),
            rate_limit_capacity: 1.0,
            rate_limit_refill_per_sec: 1.0 / interval.as_secs_f64(),
            circuit_failure_threshold: 5,
            circuit_cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    threshold: u32,
    cooldown: Duration,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        CircuitBreaker {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            threshold,
            cooldown,
            opened_at: None,
        }
    }

    /// Whether a fetch may be attempted right now. Moves `Open -> HalfOpen`
    /// once the cooldown has elapsed.
    fn allow(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.opened_at.is_some_and(|t| t.elapsed() >= self.cooldown) {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
            }
            CircuitState::Closed if self.consecutive_failures >= self.threshold => {
                self.state = CircuitState::Open;
                self.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    fn as_str(&self) -> &'static str {
        match self.state {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Token bucket used to throttle fetch attempts. Refilled lazily on
/// `try_acquire` rather than by a background task.
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        TokenBucket {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone)]
struct CachedSnapshot {
    values: Value,
    fetched_at: DateTime<Utc>,
}

struct SourceState {
    snapshot: Option<CachedSnapshot>,
    consecutive_failures: u32,
    circuit_label: &'static str,
}

/// A running enrichment source: the shared contract (`current`, `health`)
/// plus the ticker task spawned by `spawn`.
pub struct EnrichmentSource<F: Fetch> {
    name: &'static str,
    cfg: SourceConfig,
    fetcher: F,
    state: Arc<RwLock<SourceState>>,
    trigger_tx: tokio::sync::mpsc::Sender<()>,
    trigger_rx: tokio::sync::Mutex<Option<tokio::sync::mpsc::Receiver<()>>>,
}

impl<F: Fetch> EnrichmentSource<F> {
    pub fn new(name: &'static str, cfg: SourceConfig, fetcher: F) -> Arc<Self> {
        let (trigger_tx, trigger_rx) = tokio::sync::mpsc::channel(1);
        Arc::new(EnrichmentSource {
            name,
            cfg,
            fetcher,
            state: Arc::new(RwLock::new(SourceState {
                snapshot: None,
                consecutive_failures: 0,
                circuit_label: "closed",
            })),
            trigger_tx,
            trigger_rx: tokio::sync::Mutex::new(Some(trigger_rx)),
        })
    }

    /// Force an immediate fetch outside the regular schedule, bypassing the
    /// ticker but not the rate limiter or circuit breaker. A pending
    /// trigger already queued makes this a no-op.
    pub fn trigger_snapshot(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Spawn the polling ticker. The returned handle is owned by the
    /// Supervisor; aborting it stops the source.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    async fn run(self: Arc<Self>) {
        let mut breaker = CircuitBreaker::new(
            self.cfg.circuit_failure_threshold,
            self.cfg.circuit_cooldown,
        );
        let mut bucket = TokenBucket::new(
            self.cfg.rate_limit_capacity,
            self.cfg.rate_limit_refill_per_sec,
        );
        let mut ticker = tokio::time::interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut trigger_rx = self
            .trigger_rx
            .lock()
            .await
            .take()
            .expect("run is only ever invoked once per source");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = trigger_rx.recv() => {
                    info!(source = self.name, "forced snapshot requested");
                }
            }

            if !breaker.allow() {
                continue;
            }

            if !Self::await_token(&mut bucket).await {
                warn!(source = self.name, "rate limit token unavailable after 30s, skipping tick");
                continue;
            }

            match tokio::time::timeout(self.cfg.fetch_timeout, self.fetcher.fetch()).await {
                Ok(Ok(values)) => {
                    breaker.record_success();
                    let mut state = self.state.write().unwrap();
                    state.snapshot = Some(CachedSnapshot {
                        values,
                        fetched_at: Utc::now(),
                    });
                    state.consecutive_failures = 0;
                    state.circuit_label = breaker.as_str();
                }
                Ok(Err(err)) => {
                    breaker.record_failure();
                    warn!(source = self.name, error = %err, "enrichment fetch failed");
                    let mut state = self.state.write().unwrap();
                    state.consecutive_failures += 1;
                    state.circuit_label = breaker.as_str();
                }
                Err(_) => {
                    breaker.record_failure();
                    warn!(source = self.name, "enrichment fetch timed out");
                    let mut state = self.state.write().unwrap();
                    state.consecutive_failures += 1;
                    state.circuit_label = breaker.as_str();
                }
            }
        }
    }

    async fn await_token(bucket: &mut TokenBucket) -> bool {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            if bucket.try_acquire() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Non-blocking read of the last-good snapshot, with its freshness
    /// relative to `ttl`/`max_stale`. `None` once the snapshot is older than
    /// `max_stale`, or if nothing has ever succeeded.
    pub fn current(&self) -> Option<(Value, DateTime<Utc>, bool)> {
        let state = self.state.read().unwrap();
        let snapshot = state.snapshot.as_ref()?;
        let age = Utc::now() - snapshot.fetched_at;
        let age_std = age.to_std().unwrap_or(Duration::ZERO);
        if age_std >= self.cfg.max_stale {
            return None;
        }
        let fresh = age_std < self.cfg.ttl;
        Some((snapshot.values.clone(), snapshot.fetched_at, fresh))
    }

    pub fn health(&self) -> SourceHealth {
        let state = self.state.read().unwrap();
        let status = match (state.snapshot.is_some(), state.circuit_label) {
            (_, "open") => ComponentStatus::Unhealthy,
            (true, _) if state.consecutive_failures == 0 => ComponentStatus::Healthy,
            (true, _) => ComponentStatus::Degraded,
            (false, _) => ComponentStatus::Unhealthy,
        };
        let cache_age_seconds = state
            .snapshot
            .as_ref()
            .map(|s| (Utc::now() - s.fetched_at).num_seconds());
        SourceHealth {
            status,
            fetched_at: state.snapshot.as_ref().map(|s| s.fetched_at),
            consecutive_failures: state.consecutive_failures,
            cache_age_seconds,
            circuit_state: state.circuit_label.to_owned(),
        }
    }
}

/// Object-safe view of an `EnrichmentSource<F>`, used by the Joiner and the
/// operator HTTP surface so they don't need to be generic over every
/// concrete fetcher type.
pub trait ErasedSource: Send + Sync {
    fn current(&self) -> Option<(Value, DateTime<Utc>, bool)>;
    fn health(&self) -> SourceHealth;
    fn trigger_snapshot(&self);
    fn rotate_credential(&self, new_value: String) -> Result<(), SourceError>;
}

impl<F: Fetch> ErasedSource for EnrichmentSource<F> {
    fn current(&self) -> Option<(Value, DateTime<Utc>, bool)> {
        EnrichmentSource::current(self)
    }

    fn health(&self) -> SourceHealth {
        EnrichmentSource::health(self)
    }

    fn trigger_snapshot(&self) {
        EnrichmentSource::trigger_snapshot(self)
    }

    fn rotate_credential(&self, new_value: String) -> Result<(), SourceError> {
        self.fetcher.rotate_credential(new_value)
    }
}

#[derive(Debug)]
pub enum SourceError {
    Http(String),
    Parse(String),
    Auth(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Http(s) => write!(f, "http error: {s}"),
            SourceError::Parse(s) => write!(f, "parse error: {s}"),
            SourceError::Auth(s) => write!(f, "auth error: {s}"),
        }
    }
}

impl std::error::Error for SourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;

    #[async_trait]
    impl Fetch for AlwaysFails {
        async fn fetch(&self) -> Result<Value, SourceError> {
            Err(SourceError::Http("connection refused".to_owned()))
        }
    }

    #[test]
    fn circuit_opens_after_threshold_failures() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.allow());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(!breaker.allow());
    }

    #[test]
    fn token_bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(1.0, 1000.0);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        std::thread::sleep(Duration::from_millis(5));
        assert!(bucket.try_acquire());
    }

    #[tokio::test]
    async fn current_is_none_before_first_successful_fetch() {
        let cfg = SourceConfig::new(
            Duration::from_millis(10),
            Duration::from_secs(30),
            Duration::from_secs(120),
        );
        let source = EnrichmentSource::new("test_source", cfg, AlwaysFails);
        assert!(source.current().is_none());
        let health = source.health();
        assert_eq!(health.status, ComponentStatus::Unhealthy);
    }
}
