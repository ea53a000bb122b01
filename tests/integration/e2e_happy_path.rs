//! Scenario A (happy path): a single state-change event arrives over the
//! hub connection, is enriched with a fresh weather snapshot, and is
//! written to the store exactly once with the expected fields.

mod support;

use std::time::Duration;

use ha_ingest_core::wiring::wire_up;
use support::{sample_event, spawn_mock_hub, spawn_mock_store, test_config, wait_for};

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_writes_one_enriched_point() {
    let event = sample_event("sensor.temp_lr", "22.5", "c1");

    let weather_hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let weather_hits_for_route = std::sync::Arc::clone(&weather_hits);
    let weather_router = axum::Router::new().route(
        "/weather",
        axum::routing::get(move || {
            let hits = std::sync::Arc::clone(&weather_hits_for_route);
            async move {
                hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                axum::Json(serde_json::json!({"temp_c": 19.0, "condition": "clear"}))
            }
        }),
    );
    let weather_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let weather_addr = weather_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(weather_listener, weather_router).await.unwrap();
    });

    let hub_url = spawn_mock_hub(vec![vec![event.clone()]], true).await;
    let store = spawn_mock_store(0, Duration::ZERO).await;

    let mut cfg = test_config(&hub_url, store.addr);
    cfg.sources.weather.enabled = true;
    cfg.sources.weather.endpoint = format!("http://{weather_addr}/weather");
    cfg.sources.weather.api_key = Some("test-key".to_owned());
    cfg.sources.weather.interval = Duration::from_millis(20);
    cfg.sources.weather.ttl = Duration::from_secs(30);
    cfg.sources.weather.max_stale = Duration::from_secs(60);

    let core = wire_up(&cfg).expect("wire up core");

    // Let the weather poller complete at least one successful fetch before
    // the hub event reaches the Joiner, so the snapshot is fresh.
    wait_for(Duration::from_secs(2), || {
        let hits = std::sync::Arc::clone(&weather_hits);
        async move {
            if hits.load(std::sync::atomic::Ordering::SeqCst) > 0 {
                Some(())
            } else {
                None
            }
        }
    })
    .await;

    let bodies = wait_for(Duration::from_secs(8), || {
        let store = &store;
        async move {
            let bodies = store.received_bodies().await;
            if bodies.is_empty() {
                None
            } else {
                Some(bodies)
            }
        }
    })
    .await;

    assert_eq!(bodies.len(), 1, "exactly one batch should have been written");
    let line = &bodies[0];
    assert_eq!(line.lines().count(), 1, "exactly one point in the batch");
    assert!(line.contains("home_events,entity_id=sensor.temp_lr,domain=sensor"));
    assert!(line.contains("value=22.5"));
    assert!(line.contains("weather_fresh=true"));
    assert!(line.contains("temp_c"));

    let _ = core.session_shutdown.send(());
    let _ = core.pipeline_shutdown.send(());
}
