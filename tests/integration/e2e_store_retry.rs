//! Scenario B: the store returns 503 (transient) on the first two write
//! attempts and succeeds on the third. Exactly one point ends up stored, no
//! dead-letter entry is written, and the batch is not duplicated.

mod support;

use std::time::Duration;

use ha_ingest_core::wiring::wire_up;
use support::{sample_event, spawn_mock_hub, spawn_mock_store, test_config, wait_for};

#[tokio::test(flavor = "multi_thread")]
async fn transient_store_failures_are_retried_to_success() {
    let event = sample_event("sensor.temp_lr", "22.5", "c1");
    let hub_url = spawn_mock_hub(vec![vec![event.clone()]], true).await;
    // Fail the first two write attempts, succeed on the third.
    let store = spawn_mock_store(2, Duration::ZERO).await;

    let mut cfg = test_config(&hub_url, store.addr);
    cfg.write_pipeline.retry_initial = Duration::from_millis(5);
    cfg.write_pipeline.retry_max = Duration::from_millis(50);
    cfg.write_pipeline.write_attempts = 5;
    let dead_letter_path = cfg.dead_letter_path.clone();

    let core = wire_up(&cfg).expect("wire up core");

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

    assert_eq!(bodies.len(), 1, "exactly one point should end up stored");
    assert_eq!(bodies[0].lines().count(), 1);

    // Give the retry loop a moment to settle before asserting no dead-letter
    // entry was written (the write eventually succeeded within the attempts
    // cap, so nothing should have been dead-lettered).
    tokio::time::sleep(Duration::from_millis(100)).await;
    let dead_letter_contents = std::fs::read_to_string(&dead_letter_path).unwrap_or_default();
    assert!(
        dead_letter_contents.is_empty(),
        "no dead-letter entry expected for a write that eventually succeeded"
    );

    let _ = core.session_shutdown.send(());
    let _ = core.pipeline_shutdown.send(());
    let _ = std::fs::remove_file(&dead_letter_path);
}
