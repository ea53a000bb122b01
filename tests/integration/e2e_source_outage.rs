//! Scenario D: the weather source fails after a single initial success.
//! Events join within `ttl` get `weather.fresh=true`; events joined after
//! `ttl` but before `max_stale` keep the `weather` key with `fresh=false`;
//! events joined after `max_stale` get no `weather` key at all. Other
//! enrichments (there are none configured in this test) are unaffected,
//! and the rest of the pipeline keeps operating throughout.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ha_ingest_core::wiring::wire_up;
use support::{sample_event, spawn_mock_hub_paced, spawn_mock_store, test_config, wait_for};

#[tokio::test(flavor = "multi_thread")]
async fn weather_outage_degrades_only_that_source() {
    let call_count = Arc::new(AtomicUsize::new(0));
    let call_count_for_route = Arc::clone(&call_count);
    let weather_router = axum::Router::new().route(
        "/weather",
        axum::routing::get(move || {
            let call_count = Arc::clone(&call_count_for_route);
            async move {
                let n = call_count.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    (
                        axum::http::StatusCode::OK,
                        axum::Json(serde_json::json!({"temp_c": 18.0})),
                    )
                } else {
                    (
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                        axum::Json(serde_json::json!({})),
                    )
                }
            }
        }),
    );
    let weather_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let weather_addr = weather_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(weather_listener, weather_router).await.unwrap();
    });

    let events = vec![
        (sample_event("sensor.temp_lr", "1", "c1"), Duration::from_millis(100)),
        (sample_event("sensor.temp_lr", "2", "c2"), Duration::from_millis(300)),
        (sample_event("sensor.temp_lr", "3", "c3"), Duration::from_millis(400)),
    ];
    let hub_url = spawn_mock_hub_paced(events).await;
    let store = spawn_mock_store(0, Duration::ZERO).await;

    let mut cfg = test_config(&hub_url, store.addr);
    cfg.sources.weather.enabled = true;
    cfg.sources.weather.endpoint = format!("http://{weather_addr}/weather");
    cfg.sources.weather.api_key = Some("test-key".to_owned());
    cfg.sources.weather.interval = Duration::from_millis(20);
    cfg.sources.weather.ttl = Duration::from_millis(300);
    cfg.sources.weather.max_stale = Duration::from_millis(700);
    cfg.write_pipeline.max_points = 1;
    cfg.write_pipeline.max_age = Duration::from_millis(10);
    cfg.write_pipeline.max_in_flight = 1;

    let core = wire_up(&cfg).expect("wire up core");

    let bodies = wait_for(Duration::from_secs(8), || {
        let store = &store;
        async move {
            let bodies = store.received_bodies().await;
            if bodies.len() >= 3 {
                Some(bodies)
            } else {
                None
            }
        }
    })
    .await;

    assert_eq!(bodies.len(), 3);
    assert!(
        bodies[0].contains("weather_fresh=true"),
        "first event should join while weather is still fresh: {}",
        bodies[0]
    );
    assert!(
        bodies[1].contains("weather_fresh=false"),
        "second event should join with a stale-but-present weather snapshot: {}",
        bodies[1]
    );
    assert!(
        !bodies[2].contains("weather"),
        "third event should join after max_stale, with no weather key at all: {}",
        bodies[2]
    );

    let _ = core.session_shutdown.send(());
    let _ = core.pipeline_shutdown.send(());
}
