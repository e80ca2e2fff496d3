//! Stand-in for the real browser worker, used by the integration suite.
//!
//! Implements the worker HTTP contract the orchestrator consumes: listens
//! on `127.0.0.1:$PORT`, answers `/health`, and serves an in-memory
//! `/sessions` CRUD where each session id is minted on create. Set
//! `MOCK_STARTUP_DELAY_MS` to delay binding and exercise the readiness
//! probe.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Serialize)]
struct Session {
    id: String,
    created_at: DateTime<Utc>,
    data: Value,
}

type Sessions = Arc<Mutex<HashMap<String, Session>>>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mock_worker=warn")),
        )
        .init();

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);

    if let Some(delay) = std::env::var("MOCK_STARTUP_DELAY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
    {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));

    let app = Router::new()
        .route("/health", get(health))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .with_state(sessions);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind worker port");
    info!(%addr, "mock worker listening");

    axum::serve(listener, app).await.expect("server failed");
}

async fn health() -> &'static str {
    "ok"
}

async fn create_session(State(sessions): State<Sessions>, body: axum::body::Bytes) -> Response {
    let data: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let session = Session {
        id: Uuid::new_v4().to_string(),
        created_at: Utc::now(),
        data,
    };
    sessions
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(session.id.clone(), session.clone());
    (StatusCode::CREATED, Json(session)).into_response()
}

async fn get_session(State(sessions): State<Sessions>, Path(id): Path<String>) -> Response {
    let sessions = sessions.lock().unwrap_or_else(|e| e.into_inner());
    match sessions.get(&id) {
        Some(session) => Json(session.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "session not found").into_response(),
    }
}

async fn delete_session(State(sessions): State<Sessions>, Path(id): Path<String>) -> Response {
    let mut sessions = sessions.lock().unwrap_or_else(|e| e.into_inner());
    match sessions.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => (StatusCode::NOT_FOUND, "session not found").into_response(),
    }
}
