//! Idle-session expiry through the real TTL sweeper, using a short TTL.

mod common;

use common::Orchestrator;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn idle_session_is_evicted_and_its_worker_freed() {
    let orch = Orchestrator::start_with_ttl(1, 2, Duration::from_secs(2)).await;

    let (_, session) = orch.create_session(json!({"user": "alice"})).await;
    let id = session["id"].as_str().expect("no session id").to_string();

    let (status, _) = orch.get_session(&id).await;
    assert_eq!(status, StatusCode::OK);

    // TTL 2 s + 5 s sweep cadence: untouched, the session must be gone
    // after one full sweep interval past the TTL.
    tokio::time::sleep(Duration::from_secs(8)).await;

    let (status, _) = orch.get_session(&id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(orch.sessions.count(), 0);

    // Eviction released the worker back to the pool.
    orch.wait_for_available(1, Duration::from_secs(5)).await;
    let status = orch.status().await;
    assert!(status["workers"]
        .as_array()
        .unwrap()
        .iter()
        .all(|w| w["state"] != "busy"));
}

#[tokio::test(flavor = "multi_thread")]
async fn refreshed_session_outlives_its_ttl() {
    let orch = Orchestrator::start_with_ttl(1, 2, Duration::from_secs(4)).await;

    let (_, session) = orch.create_session(json!({"user": "bob"})).await;
    let id = session["id"].as_str().expect("no session id").to_string();

    // Touch the session on a cadence shorter than the TTL for longer than
    // the TTL itself; every get pushes the deadline out.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let (status, _) = orch.get_session(&id).await;
        assert_eq!(status, StatusCode::OK, "refreshed session expired early");
    }

    assert_eq!(orch.delete_session(&id).await, StatusCode::NO_CONTENT);
}
