//! Scenario E: the hub connection drops mid-stream after delivering one
//! event. The session reconnects, a second scripted connection delivers a
//! second event, and both events reach the store as exactly two points —
//! no duplication from the reconnect itself.

mod support;

use std::time::Duration;

use ha_client::SessionState;
use ha_ingest_core::wiring::wire_up;
use support::{sample_event, spawn_mock_hub, spawn_mock_store, test_config, wait_for};

#[tokio::test(flavor = "multi_thread")]
async fn session_reconnects_and_resumes_without_duplicating_events() {
    let first = sample_event("sensor.temp_lr", "21.0", "c1");
    let second = sample_event("sensor.temp_lr", "21.5", "c2");

    // Each scripted connection serves its events and then closes (hold_open
    // = false), simulating a mid-stream transport drop after the first
    // connection's event and exercising a clean reconnect for the second.
    let hub_url = spawn_mock_hub(vec![vec![first.clone()], vec![second.clone()]], false).await;
    let store = spawn_mock_store(0, Duration::ZERO).await;

    let mut cfg = test_config(&hub_url, store.addr);
    cfg.hub.reconnect_initial = Duration::from_millis(10);
    cfg.hub.reconnect_max = Duration::from_millis(100);
    cfg.write_pipeline.max_points = 1;
    cfg.write_pipeline.max_age = Duration::from_millis(20);

    let core = wire_up(&cfg).expect("wire up core");

    // The session must pass through Reconnecting between the two scripted
    // connections.
    wait_for(Duration::from_secs(8), || {
        let rx = core.state.session_state.clone();
        async move {
            if *rx.borrow() == SessionState::Reconnecting {
                Some(())
            } else {
                None
            }
        }
    })
    .await;

    // ... and come back up to Subscribed for the second connection.
    wait_for(Duration::from_secs(8), || {
        let rx = core.state.session_state.clone();
        async move {
            if *rx.borrow() == SessionState::Subscribed {
                Some(())
            } else {
                None
            }
        }
    })
    .await;

    let total_lines = wait_for(Duration::from_secs(8), || {
        let store = &store;
        async move {
            let total = store.total_lines().await;
            if total >= 2 {
                Some(total)
            } else {
                None
            }
        }
    })
    .await;

    assert_eq!(total_lines, 2, "both events should be written exactly once each");

    let _ = core.session_shutdown.send(());
    let _ = core.pipeline_shutdown.send(());
}
