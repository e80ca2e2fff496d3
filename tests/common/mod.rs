#![allow(dead_code)]

//! Shared harness for the integration suite: runs a full orchestrator
//! in-process against real `mock-worker` child processes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde_json::Value;

use steel_orchestrator::config::OrchestratorConfig;
use steel_orchestrator::forward::Forwarder;
use steel_orchestrator::pool::WorkerPool;
use steel_orchestrator::server::{self, AppState};
use steel_orchestrator::session::SessionManager;

/// Path to the stub worker binary built alongside the crate.
pub const MOCK_WORKER: &str = env!("CARGO_BIN_EXE_mock-worker");

pub struct Orchestrator {
    pub pool: Arc<WorkerPool>,
    pub sessions: Arc<SessionManager>,
    pub base_url: String,
    pub http: reqwest::Client,
}

impl Orchestrator {
    /// Start an orchestrator with the default 60 s session TTL.
    pub async fn start(min: usize, max: usize) -> Self {
        Self::start_with_ttl(min, max, Duration::from_secs(60)).await
    }

    pub async fn start_with_ttl(min: usize, max: usize, ttl: Duration) -> Self {
        let config = OrchestratorConfig {
            min_workers: min,
            max_workers: max,
            binary_path: MOCK_WORKER.into(),
            session_ttl: ttl,
            ..Default::default()
        };

        let pool = WorkerPool::new(&config).expect("failed to create worker pool");
        let forwarder = Forwarder::new();
        let sessions = SessionManager::new(ttl, forwarder.clone());

        let sessions_for_crash = sessions.clone();
        pool.set_crash_handler(Arc::new(move |session_id: String| {
            sessions_for_crash.remove(&session_id);
        }));

        let state = Arc::new(AppState {
            pool: pool.clone(),
            sessions: sessions.clone(),
            forwarder,
        });
        let app = server::router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind orchestrator port");
        let addr = listener.local_addr().expect("no local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server failed");
        });

        let orchestrator = Self {
            pool,
            sessions,
            base_url: format!("http://{addr}"),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build HTTP client"),
        };
        orchestrator
            .wait_for_available(min, Duration::from_secs(15))
            .await;
        orchestrator
    }

    /// Poll until at least `n` workers are idle in the pool.
    pub async fn wait_for_available(&self, n: usize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.pool.queue_depth() < n {
            assert!(
                Instant::now() < deadline,
                "pool never reached {n} available workers (have {})",
                self.pool.queue_depth()
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Poll until the condition holds or the deadline elapses.
    pub async fn wait_until<F: Fn() -> bool>(&self, what: &str, timeout: Duration, cond: F) {
        let deadline = Instant::now() + timeout;
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// `POST /sessions` returning the status and parsed body.
    pub async fn create_session(&self, data: Value) -> (StatusCode, Value) {
        let resp = self
            .http
            .post(format!("{}/sessions", self.base_url))
            .json(&data)
            .send()
            .await
            .expect("create request failed");
        let status = resp.status();
        let body = resp.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    /// `GET /sessions/{id}` returning the status and parsed body.
    pub async fn get_session(&self, id: &str) -> (StatusCode, Value) {
        let resp = self
            .http
            .get(format!("{}/sessions/{}", self.base_url, id))
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body = resp.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    /// `DELETE /sessions/{id}` returning the status.
    pub async fn delete_session(&self, id: &str) -> StatusCode {
        self.http
            .delete(format!("{}/sessions/{}", self.base_url, id))
            .send()
            .await
            .expect("delete request failed")
            .status()
    }

    /// `GET /status` parsed as JSON.
    pub async fn status(&self) -> Value {
        self.http
            .get(format!("{}/status", self.base_url))
            .send()
            .await
            .expect("status request failed")
            .json()
            .await
            .expect("status body was not JSON")
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // Kill the child processes even when a test fails early.
        self.pool.shutdown();
    }
}
