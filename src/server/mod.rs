//! External HTTP surface of the orchestrator.
//!
//! Routing glue only: handlers acquire workers, forward session calls, and
//! apply the per-endpoint failure policies. The scheduling itself lives in
//! [`crate::pool`] and [`crate::session`].

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::forward::{ForwardReply, Forwarder, SessionResponse};
use crate::pool::WorkerPool;
use crate::session::SessionManager;

/// Total attempts for a session create before giving up.
const MAX_CREATE_ATTEMPTS: usize = 3;
/// How long a create may wait for a worker before 503.
const ACQUIRE_DEADLINE: Duration = Duration::from_secs(300);

/// Shared state behind every handler.
pub struct AppState {
    pub pool: Arc<WorkerPool>,
    pub sessions: Arc<SessionManager>,
    pub forwarder: Forwarder,
}

/// Build the orchestrator router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/debug/crash-worker", post(crash_worker))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Pass a worker's reply through verbatim.
fn passthrough(reply: ForwardReply) -> Response {
    (
        reply.status,
        [(header::CONTENT_TYPE, "application/json")],
        reply.body,
    )
        .into_response()
}

/// `POST /sessions`: acquire a worker, forward the create, register the
/// mapping. A forward failure or corrupt response kills the worker (the
/// monitor restarts it) and retries on another worker, up to 3 attempts.
async fn create_session(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let mut last_err = String::new();

    for attempt in 1..=MAX_CREATE_ATTEMPTS {
        let worker = match state.pool.acquire(ACQUIRE_DEADLINE).await {
            Ok(worker) => worker,
            Err(e) => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("no workers available: {e}"),
                )
                    .into_response();
            }
        };

        let reply = match state.forwarder.create_session(&worker, body.clone()).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    attempt,
                    max_attempts = MAX_CREATE_ATTEMPTS,
                    worker_id = worker.id,
                    error = %e,
                    "session create forward failed"
                );
                last_err = e.to_string();
                worker.kill();
                continue;
            }
        };

        if !reply.status.is_success() {
            // The worker answered; its error is authoritative. Hand the
            // worker back since no session was created on it.
            state.pool.release(&worker);
            return passthrough(reply);
        }

        let session = match SessionResponse::parse(&reply.body) {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    attempt,
                    max_attempts = MAX_CREATE_ATTEMPTS,
                    worker_id = worker.id,
                    error = %e,
                    "corrupt create response from worker"
                );
                last_err = format!("corrupt worker response: {e}");
                worker.kill();
                continue;
            }
        };

        state.sessions.add(&session.id, worker.clone());
        worker.set_session(&session.id);
        return passthrough(reply);
    }

    (
        StatusCode::BAD_GATEWAY,
        format!("all workers failed: {last_err}"),
    )
        .into_response()
}

/// `GET /sessions/{id}`: forward to the owning worker. A forward failure
/// means the session is lost: drop the mapping, kill the worker, 404.
async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let Some(worker) = state.sessions.get(&id) else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    match state.forwarder.get_session(&worker, &id).await {
        Ok(reply) => passthrough(reply),
        Err(e) => {
            warn!(
                session_id = %id,
                worker_id = worker.id,
                error = %e,
                "session get forward failed, session lost"
            );
            state.sessions.remove(&id);
            worker.kill();
            (StatusCode::NOT_FOUND, "session not found").into_response()
        }
    }
}

/// `DELETE /sessions/{id}`: drop the mapping first, then forward the delete
/// and free the worker. Succeeds even when the worker is unreachable.
async fn delete_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let Some(worker) = state.sessions.remove(&id) else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    let status = match state.forwarder.delete_session(&worker, &id).await {
        Ok(status) => status,
        Err(e) => {
            warn!(
                session_id = %id,
                worker_id = worker.id,
                error = %e,
                "session delete forward failed"
            );
            StatusCode::NO_CONTENT
        }
    };

    worker.clear_session();
    status.into_response()
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct WorkerStatus {
    id: u64,
    port: u16,
    state: String,
    session_id: String,
}

#[derive(Serialize)]
struct StatusResponse {
    active_sessions: usize,
    worker_count: usize,
    available_workers: usize,
    min_workers: usize,
    max_workers: usize,
    workers: Vec<WorkerStatus>,
}

/// `GET /status`: pool and session state for debugging.
async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let workers = state
        .pool
        .workers()
        .iter()
        .map(|w| WorkerStatus {
            id: w.id,
            port: w.port,
            state: w.state().to_string(),
            session_id: w.session_id(),
        })
        .collect();

    Json(StatusResponse {
        active_sessions: state.sessions.count(),
        worker_count: state.pool.worker_count(),
        available_workers: state.pool.queue_depth(),
        min_workers: state.pool.min_workers(),
        max_workers: state.pool.max_workers(),
        workers,
    })
}

#[derive(Deserialize)]
struct CrashParams {
    #[serde(default)]
    session_id: String,
}

/// `POST /debug/crash-worker?session_id=`: kill the worker holding the
/// given session. Testing only; the monitor restarts the worker.
async fn crash_worker(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CrashParams>,
) -> Response {
    if params.session_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "session_id required").into_response();
    }
    let Some(worker) = state.pool.find_by_session(&params.session_id) else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    info!(
        worker_id = worker.id,
        session_id = %params.session_id,
        "killing worker on debug request"
    );
    worker.kill();
    (StatusCode::OK, "worker killed").into_response()
}
