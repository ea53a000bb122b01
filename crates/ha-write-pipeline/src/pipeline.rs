//! Write Pipeline: accumulates enriched events into batches, writes them to
//! the time-series store with retry/bisect/dead-letter handling, and is the
//! downstream end of the system's single backpressure chain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ha_protocol::model::EnrichedEvent;
use ha_protocol::write_batch::{WriteBatch, WritePoint};
use rand::Rng;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{info, warn};

use crate::dead_letter::DeadLetterLog;
use crate::store_client::StoreClient;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub measurement: String,
    pub max_points: usize,
    pub max_age: Duration,
    pub max_in_flight: usize,
    pub write_attempts: u32,
    pub retry_initial: Duration,
    pub retry_max: Duration,
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            measurement: "home_events".to_owned(),
            max_points: 1000,
            max_age: Duration::from_secs(1),
            max_in_flight: 2,
            write_attempts: 5,
            retry_initial: Duration::from_millis(100),
            retry_max: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Atomics updated by in-flight delivery tasks and read by the health
/// roll-up. Values may be briefly stale; never torn.
#[derive(Default)]
pub struct PipelineHealth {
    pending_points: AtomicU64,
    consecutive_failures: AtomicU32,
    last_successful_write_at: AtomicI64,
}

impl PipelineHealth {
    pub fn batch_pending_count(&self) -> u64 {
        self.pending_points.load(Ordering::Relaxed)
    }

    pub fn consecutive_write_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn last_successful_write_at(&self) -> Option<DateTime<Utc>> {
        let nanos = self.last_successful_write_at.load(Ordering::Relaxed);
        if nanos == 0 {
            None
        } else {
            DateTime::from_timestamp(nanos / 1_000_000_000, (nanos % 1_000_000_000) as u32)
        }
    }
}

pub struct WritePipeline {
    cfg: PipelineConfig,
    store: Arc<StoreClient>,
    dead_letter: Arc<DeadLetterLog>,
    health: Arc<PipelineHealth>,
    in_flight: Arc<Semaphore>,
}

impl WritePipeline {
    pub fn new(cfg: PipelineConfig, store: Arc<StoreClient>, dead_letter: Arc<DeadLetterLog>) -> Self {
        let in_flight = Arc::new(Semaphore::new(cfg.max_in_flight));
        WritePipeline {
            cfg,
            store,
            dead_letter,
            health: Arc::new(PipelineHealth::default()),
            in_flight,
        }
    }

    pub fn health(&self) -> Arc<PipelineHealth> {
        Arc::clone(&self.health)
    }

    /// Consume enriched events from `rx`, batch and flush them, until
    /// `shutdown` fires. On shutdown, the inbound channel is closed, all
    /// pending batches are flushed (respecting retries) within
    /// `shutdown_grace`, and anything still unwritten after that is
    /// dead-lettered.
    pub async fn run(mut self, mut rx: mpsc::Receiver<EnrichedEvent>, mut shutdown: oneshot::Receiver<()>) {
        let mut pending: Vec<WritePoint> = Vec::new();
        let mut batch_opened_at: Option<tokio::time::Instant> = None;

        loop {
            let flush_deadline = batch_opened_at.map(|opened| opened + self.cfg.max_age);

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    rx.close();
                    self.drain_on_shutdown(rx, pending).await;
                    return;
                }

                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if batch_opened_at.is_none() {
                                batch_opened_at = Some(tokio::time::Instant::now());
                            }
                            pending.push(self.to_point(event));
                            self.health.pending_points.store(pending.len() as u64, Ordering::Relaxed);
                            if pending.len() >= self.cfg.max_points {
                                self.flush(&mut pending, &mut batch_opened_at).await;
                            }
                        }
                        None => {
                            self.drain_on_shutdown(rx, pending).await;
                            return;
                        }
                    }
                }

                _ = sleep_until_or_pending(flush_deadline), if flush_deadline.is_some() => {
                    self.flush(&mut pending, &mut batch_opened_at).await;
                }
            }
        }
    }

    async fn drain_on_shutdown(&mut self, mut rx: mpsc::Receiver<EnrichedEvent>, mut pending: Vec<WritePoint>) {
        while let Ok(event) = rx.try_recv() {
            pending.push(self.to_point(event));
        }
        let mut batch_opened_at = None;
        let flush = self.flush(&mut pending, &mut batch_opened_at);
        if tokio::time::timeout(self.cfg.shutdown_grace, flush).await.is_err() {
            warn!("shutdown grace period elapsed before all batches were flushed");
        }
        // Any delivery tasks still running past the grace period complete
        // in the background; their dead-letter fallback covers data loss.
    }

    fn to_point(&self, event: EnrichedEvent) -> WritePoint {
        let idempotency_key = event.idempotency_seed();
        WritePoint {
            event,
            idempotency_key,
        }
    }

    async fn flush(&self, pending: &mut Vec<WritePoint>, batch_opened_at: &mut Option<tokio::time::Instant>) {
        if pending.is_empty() {
            *batch_opened_at = None;
            return;
        }
        let points = std::mem::take(pending);
        *batch_opened_at = None;
        self.health.pending_points.store(0, Ordering::Relaxed);

        let batch = WriteBatch {
            measurement: self.cfg.measurement.clone(),
            points,
        };

        let permit = Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .expect("semaphore never closed");
        let store = Arc::clone(&self.store);
        let dead_letter = Arc::clone(&self.dead_letter);
        let health = Arc::clone(&self.health);
        let attempts_cap = self.cfg.write_attempts;
        let retry_initial = self.cfg.retry_initial;
        let retry_max = self.cfg.retry_max;

        tokio::spawn(async move {
            let _permit = permit;
            deliver(store, dead_letter, health, batch, attempts_cap, retry_initial, retry_max).await;
        });
    }
}

/// Writes a batch to the store, retrying transient failures with backoff up
/// to `attempts_cap`, and bisecting on non-transient failures until each
/// surviving piece either succeeds or is a single point, which is
/// dead-lettered. Iterative (not recursive) since bisection can fan out.
async fn deliver(
    store: Arc<StoreClient>,
    dead_letter: Arc<DeadLetterLog>,
    health: Arc<PipelineHealth>,
    initial_batch: WriteBatch,
    attempts_cap: u32,
    retry_initial: Duration,
    retry_max: Duration,
) {
    let mut queue: VecDeque<(WriteBatch, u32)> = VecDeque::new();
    queue.push_back((initial_batch, 0));

    while let Some((batch, mut attempt)) = queue.pop_front() {
        loop {
            match store.write(&batch).await {
                Ok(()) => {
                    health.consecutive_failures.store(0, Ordering::Relaxed);
                    let now = Utc::now();
                    health
                        .last_successful_write_at
                        .store(now.timestamp_nanos_opt().unwrap_or(0), Ordering::Relaxed);
                    break;
                }
                Err(err) if err.is_transient() => {
                    attempt += 1;
                    health.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                    if attempt >= attempts_cap {
                        warn!(error = %err, points = batch.len(), "write attempts exhausted, dead-lettering batch");
                        for point in &batch.points {
                            dead_letter.record(point, "write_attempts_exhausted").await;
                        }
                        break;
                    }
                    let delay = retry_delay(retry_initial, retry_max, attempt);
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(err) => {
                    health.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                    if batch.len() > 1 {
                        info!(error = %err, points = batch.len(), "non-transient store error, bisecting batch");
                        let (left, right) = batch.bisect();
                        queue.push_back((left, 0));
                        queue.push_back((right, 0));
                    } else {
                        warn!(error = %err, "non-transient store error on single point, dead-lettering");
                        for point in &batch.points {
                            dead_letter.record(point, "non_transient_store_error").await;
                        }
                    }
                    break;
                }
            }
        }
    }
}

fn retry_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = 2f64.powi(attempt as i32 - 1);
    let uncapped = initial.mul_f64(exp);
    let capped = uncapped.min(max);
    let jittered_millis = rand::thread_rng().gen_range(0..=capped.as_millis().max(1) as u64);
    Duration::from_millis(jittered_millis)
}

async fn sleep_until_or_pending(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_never_exceeds_max() {
        for attempt in 1..10 {
            let delay = retry_delay(Duration::from_millis(100), Duration::from_secs(30), attempt);
            assert!(delay <= Duration::from_secs(30));
        }
    }

    #[test]
    fn health_starts_with_no_successful_write() {
        let health = PipelineHealth::default();
        assert_eq!(health.batch_pending_count(), 0);
        assert_eq!(health.last_successful_write_at(), None);
    }
}
