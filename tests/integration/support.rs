//! Shared harness for the end-to-end tests: an in-process mock hub (the
//! WebSocket bus the Connection Session speaks to) and a mock time-series
//! store (the HTTP write endpoint), built the way the teacher's own e2e
//! suite spins up an in-process `server` via its library directly rather
//! than against a live dependency.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use ha_ingest_core::config::{CalendarSourceConfig, Config, HubConfig, NormalizerConfig, SourceEndpointConfig, SourcesConfig, StoreConfig, WritePipelineConfig};
use ha_protocol::hub::{AuthAccepted, EventFrame, HubFrame, SubscribeOk};
use ha_protocol::model::{EventContext, Origin, RawEvent, State as HaState};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Accepts hub connections one after another, replaying `events` to each new
/// connection after the auth/subscribe handshake completes, then holding the
/// socket open. A caller that wants a mid-stream disconnect should drop or
/// close the returned handle's connection itself; here the socket simply
/// closes once all events for that connection are sent, if `hold_open` is
/// false, which is how the reconnect test exercises a second accept.
pub async fn spawn_mock_hub(events_per_connection: Vec<Vec<RawEvent>>, hold_open: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock hub");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut remaining = events_per_connection.into_iter();
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Some(events) = remaining.next() else {
                // No more scripted connections; accept and idle so the
                // client doesn't see a connection refused.
                tokio::spawn(async move {
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                        while ws.next().await.is_some() {}
                    }
                });
                continue;
            };
            tokio::spawn(serve_one_connection(stream, events, hold_open));
        }
    });

    format!("ws://{addr}")
}

/// Like [`spawn_mock_hub`] but for a single connection whose events are each
/// preceded by a wait, so a test can control exactly when each event
/// reaches the Joiner relative to an enrichment source's poll cadence.
pub async fn spawn_mock_hub_paced(events: Vec<(RawEvent, Duration)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock hub");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        serve_one_paced_connection(stream, events).await;
    });

    format!("ws://{addr}")
}

async fn serve_one_paced_connection(stream: tokio::net::TcpStream, events: Vec<(RawEvent, Duration)>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    let Some(Ok(Message::Text(text))) = ws.next().await else {
        return;
    };
    let Ok(HubFrame::AuthRequest(_)) = serde_json::from_str::<HubFrame>(&text) else {
        return;
    };
    let accepted = HubFrame::AuthAccepted(AuthAccepted {
        ha_version: "2026.1.0".to_owned(),
    });
    if send(&mut ws, &accepted).await.is_err() {
        return;
    }

    let Some(Ok(Message::Text(text))) = ws.next().await else {
        return;
    };
    let Ok(HubFrame::SubscribeEvents(sub)) = serde_json::from_str::<HubFrame>(&text) else {
        return;
    };
    let ok = HubFrame::SubscribeOk(SubscribeOk { id: sub.id });
    if send(&mut ws, &ok).await.is_err() {
        return;
    }

    for (i, (event, delay)) in events.into_iter().enumerate() {
        tokio::time::sleep(delay).await;
        let frame = HubFrame::Event(EventFrame { id: i as u64, event });
        if send(&mut ws, &frame).await.is_err() {
            return;
        }
    }

    while ws.next().await.is_some() {}
}

async fn serve_one_connection(stream: tokio::net::TcpStream, events: Vec<RawEvent>, hold_open: bool) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    let Some(Ok(Message::Text(text))) = ws.next().await else {
        return;
    };
    let Ok(HubFrame::AuthRequest(_)) = serde_json::from_str::<HubFrame>(&text) else {
        return;
    };
    let accepted = HubFrame::AuthAccepted(AuthAccepted {
        ha_version: "2026.1.0".to_owned(),
    });
    if send(&mut ws, &accepted).await.is_err() {
        return;
    }

    let Some(Ok(Message::Text(text))) = ws.next().await else {
        return;
    };
    let Ok(HubFrame::SubscribeEvents(sub)) = serde_json::from_str::<HubFrame>(&text) else {
        return;
    };
    let ok = HubFrame::SubscribeOk(SubscribeOk { id: sub.id });
    if send(&mut ws, &ok).await.is_err() {
        return;
    }

    for (i, event) in events.into_iter().enumerate() {
        let frame = HubFrame::Event(EventFrame { id: i as u64, event });
        if send(&mut ws, &frame).await.is_err() {
            return;
        }
    }

    if hold_open {
        while ws.next().await.is_some() {}
    }
    // Otherwise: fall off the end, dropping `ws` and closing the socket so a
    // subsequent scripted connection can be exercised.
}

async fn send(
    ws: &mut tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    frame: &HubFrame,
) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    ws.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[derive(Clone)]
struct MockStoreState {
    received: Arc<Mutex<Vec<String>>>,
    fail_remaining: Arc<AtomicUsize>,
    response_delay: Duration,
}

pub struct MockStore {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
}

impl MockStore {
    pub async fn received_bodies(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }

    pub async fn total_lines(&self) -> usize {
        self.received
            .lock()
            .await
            .iter()
            .map(|body| body.lines().count())
            .sum()
    }
}

/// Starts a mock write endpoint. The first `fail_first_n` write requests
/// return 503 (transient, matching `StoreClient`'s retry classification);
/// every request after that succeeds and is recorded. `response_delay` is
/// applied before every response, to simulate a slow store for the
/// backpressure scenario.
pub async fn spawn_mock_store(fail_first_n: usize, response_delay: Duration) -> MockStore {
    let received = Arc::new(Mutex::new(Vec::new()));
    let state = MockStoreState {
        received: Arc::clone(&received),
        fail_remaining: Arc::new(AtomicUsize::new(fail_first_n)),
        response_delay,
    };

    let router = Router::new().route("/api/v2/write", post(handle_write)).with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock store");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("mock store server error");
    });

    MockStore { addr, received }
}

async fn handle_write(State(state): State<MockStoreState>, body: String) -> axum::http::StatusCode {
    if !state.response_delay.is_zero() {
        tokio::time::sleep(state.response_delay).await;
    }
    if state.fail_remaining.load(Ordering::SeqCst) > 0 {
        state.fail_remaining.fetch_sub(1, Ordering::SeqCst);
        return axum::http::StatusCode::SERVICE_UNAVAILABLE;
    }
    state.received.lock().await.push(body);
    axum::http::StatusCode::NO_CONTENT
}

pub fn disabled_source() -> SourceEndpointConfig {
    SourceEndpointConfig {
        enabled: false,
        endpoint: String::new(),
        api_key: None,
        bearer_token: None,
        interval: Duration::from_secs(900),
        ttl: Duration::from_secs(1800),
        max_stale: Duration::from_secs(7200),
        rate_limit_capacity: 1.0,
        rate_limit_refill_per_sec: 1.0,
    }
}

pub fn disabled_calendar() -> CalendarSourceConfig {
    CalendarSourceConfig {
        enabled: false,
        token_endpoint: String::new(),
        calendar_endpoint: String::new(),
        client_id: String::new(),
        client_secret: String::new(),
        refresh_token_file: String::new(),
        token_store_path: String::new(),
        interval: Duration::from_secs(900),
        ttl: Duration::from_secs(1200),
        max_stale: Duration::from_secs(3600),
    }
}

/// A `Config` with every enrichment source disabled, pointed at the given
/// mock hub and store, with a small batching window so tests don't have to
/// wait out production-sized defaults.
pub fn test_config(hub_url: &str, store_addr: SocketAddr) -> Config {
    Config {
        schema_version: 1,
        hub: HubConfig {
            url: hub_url.to_owned(),
            access_token: "test-token".to_owned(),
            event_type: "state_changed".to_owned(),
            keepalive_timeout: Duration::from_secs(30),
            reconnect_initial: Duration::from_millis(20),
            reconnect_max: Duration::from_millis(200),
        },
        normalizer: NormalizerConfig {
            known_domains: vec!["sensor".to_owned(), "binary_sensor".to_owned()],
        },
        sources: SourcesConfig {
            weather: disabled_source(),
            carbon_intensity: disabled_source(),
            electricity_pricing: disabled_source(),
            air_quality: disabled_source(),
            calendar: disabled_calendar(),
            smart_meter: disabled_source(),
        },
        write_pipeline: WritePipelineConfig {
            measurement: "home_events".to_owned(),
            max_points: 5,
            max_age: Duration::from_millis(50),
            max_in_flight: 2,
            write_attempts: 5,
            retry_initial: Duration::from_millis(10),
            retry_max: Duration::from_millis(200),
            shutdown_grace: Duration::from_secs(2),
        },
        store: StoreConfig {
            write_url: format!("http://{store_addr}/api/v2/write"),
            organization: "home".to_owned(),
            bucket: "telemetry".to_owned(),
            precision: "ns".to_owned(),
            auth_token: "store-token".to_owned(),
            write_timeout: Duration::from_secs(5),
        },
        dead_letter_path: std::env::temp_dir()
            .join(format!("ha-ingest-core-test-dead-letter-{}.ndjson", std::process::id()))
            .to_string_lossy()
            .into_owned(),
        operator_http_bind: "127.0.0.1:0".to_owned(),
    }
}

pub fn sample_event(entity_id: &str, state_value: &str, context_id: &str) -> RawEvent {
    let now = chrono::Utc::now();
    RawEvent {
        event_type: "state_changed".to_owned(),
        entity_id: entity_id.to_owned(),
        time_fired: now,
        origin: Origin::Local,
        context: EventContext {
            id: context_id.to_owned(),
            parent_id: None,
            user_id: None,
        },
        old_state: None,
        new_state: HaState {
            state: state_value.to_owned(),
            attributes: Default::default(),
            last_changed: now,
            last_updated: now,
        },
        raw: serde_json::Value::Null,
    }
}

/// Polls `check` until it returns `Some`, or panics after `timeout`.
pub async fn wait_for<F, Fut, T>(timeout: Duration, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return value;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition was not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
