//! Concurrent session creation against a bounded pool: every client is
//! eventually served and the pool never overshoots its ceiling.

mod common;

use common::Orchestrator;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn ten_parallel_clients_against_three_workers() {
    let orch = Orchestrator::start(2, 3).await;

    // Watch the pool size continuously while the load runs.
    let watcher_pool = orch.pool.clone();
    let peak = Arc::new(AtomicUsize::new(0));
    let peak_for_watcher = peak.clone();
    let watcher = tokio::spawn(async move {
        loop {
            peak_for_watcher.fetch_max(watcher_pool.worker_count(), Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    });

    let mut handles = Vec::new();
    for i in 0..10 {
        let http = orch.http.clone();
        let base = orch.base_url.clone();
        handles.push(tokio::spawn(async move {
            let resp = http
                .post(format!("{base}/sessions"))
                .json(&json!({"user": format!("u{i}")}))
                .send()
                .await
                .expect("create request failed");
            assert!(
                resp.status().is_success(),
                "create {i} failed with {}",
                resp.status()
            );
            let session: Value = resp.json().await.expect("create body was not JSON");
            let id = session["id"].as_str().expect("no session id").to_string();

            let got = http
                .get(format!("{base}/sessions/{id}"))
                .send()
                .await
                .expect("get request failed");
            assert_eq!(got.status(), 200, "get {i} failed");

            // Hold the session so the demand overlaps and the pool is
            // forced to its ceiling, then free the worker for the next
            // queued client.
            tokio::time::sleep(Duration::from_millis(300)).await;
            let del = http
                .delete(format!("{base}/sessions/{id}"))
                .send()
                .await
                .expect("delete request failed");
            assert_eq!(del.status(), 204, "delete {i} failed");

            id
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.expect("client task panicked"));
    }
    watcher.abort();

    assert_eq!(ids.len(), 10, "session ids were not distinct");

    // The pool grew to the ceiling under sustained demand and never past it.
    assert_eq!(orch.pool.worker_count(), 3);
    assert_eq!(peak.load(Ordering::SeqCst), 3);
}
