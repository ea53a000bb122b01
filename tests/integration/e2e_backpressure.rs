//! Scenario F: the store is slow (simulating "stops accepting writes" for a
//! while), so the write pipeline's bounded inbound channel backs up. Events
//! continue to be forwarded through the Joiner/Normalizer/Session chain
//! without anything being dropped, and once the store catches up every
//! event that was ever sent shows up as exactly one written point.

mod support;

use std::time::Duration;

use ha_ingest_core::wiring::wire_up;
use support::{sample_event, spawn_mock_hub, spawn_mock_store, test_config, wait_for};

#[tokio::test(flavor = "multi_thread")]
async fn slow_store_applies_backpressure_without_dropping_events() {
    const EVENT_COUNT: usize = 300;

    let events: Vec<_> = (0..EVENT_COUNT)
        .map(|i| sample_event("sensor.temp_lr", &format!("{i}"), &format!("c{i}")))
        .collect();

    let hub_url = spawn_mock_hub(vec![events], true).await;
    // Every write takes 30ms; with max_in_flight=1 this is slower than the
    // hub can hand events off, so the pipeline's and upstream channels fill
    // up and the chain of backpressure described in spec.md section 5 must
    // hold for no event to be lost.
    let store = spawn_mock_store(0, Duration::from_millis(30)).await;

    let mut cfg = test_config(&hub_url, store.addr);
    cfg.write_pipeline.max_points = 5;
    cfg.write_pipeline.max_age = Duration::from_millis(20);
    cfg.write_pipeline.max_in_flight = 1;

    let core = wire_up(&cfg).expect("wire up core");

    let total_lines = wait_for(Duration::from_secs(30), || {
        let store = &store;
        async move {
            let total = store.total_lines().await;
            if total >= EVENT_COUNT {
                Some(total)
            } else {
                None
            }
        }
    })
    .await;

    assert_eq!(
        total_lines, EVENT_COUNT,
        "every event sent by the hub must be written exactly once, none dropped under backpressure"
    );

    let _ = core.session_shutdown.send(());
    let _ = core.pipeline_shutdown.send(());
}
