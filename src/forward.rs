//! Typed HTTP client for a worker's session API.
//!
//! The forwarder is the sole path through which the orchestrator reaches a
//! worker's HTTP API. Every call carries its own deadline, independent of
//! the caller's, so a slow worker fails fast even when the client is
//! patient. Transport-layer failures surface as [`ForwardError`]; worker
//! HTTP errors (a 404, say) come back as ordinary status codes.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::error::ForwardError;
use crate::pool::Worker;

/// Per-call deadline for requests forwarded to a worker.
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Response from a forwarded call: the worker's status and raw body.
#[derive(Debug)]
pub struct ForwardReply {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Session envelope returned by a worker's create/get endpoints. Only `id`
/// is interpreted; the rest is passed through verbatim.
#[derive(Debug, Deserialize)]
pub struct SessionResponse {
    pub id: String,
    #[serde(default)]
    pub created_at: serde_json::Value,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl SessionResponse {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// Client for forwarding session requests to a specific worker.
#[derive(Clone)]
pub struct Forwarder {
    http: reqwest::Client,
}

impl Forwarder {
    pub fn new() -> Self {
        Self::with_timeout(FORWARD_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    fn transport(&self, worker: &Worker, source: reqwest::Error) -> ForwardError {
        ForwardError {
            worker_id: worker.id,
            source,
        }
    }

    /// `POST /sessions` on the worker with a JSON body.
    pub async fn create_session(
        &self,
        worker: &Worker,
        body: Bytes,
    ) -> Result<ForwardReply, ForwardError> {
        let url = format!("{}/sessions", worker.base_url());
        debug!(worker_id = worker.id, "forwarding session create");

        let resp = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport(worker, e))?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| self.transport(worker, e))?;
        Ok(ForwardReply { status, body })
    }

    /// `GET /sessions/{id}` on the worker.
    pub async fn get_session(
        &self,
        worker: &Worker,
        session_id: &str,
    ) -> Result<ForwardReply, ForwardError> {
        let url = format!("{}/sessions/{}", worker.base_url(), session_id);
        debug!(worker_id = worker.id, session_id, "forwarding session get");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport(worker, e))?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| self.transport(worker, e))?;
        Ok(ForwardReply { status, body })
    }

    /// `DELETE /sessions/{id}` on the worker. The response body is discarded.
    pub async fn delete_session(
        &self,
        worker: &Worker,
        session_id: &str,
    ) -> Result<StatusCode, ForwardError> {
        let url = format!("{}/sessions/{}", worker.base_url(), session_id);
        debug!(worker_id = worker.id, session_id, "forwarding session delete");

        let resp = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| self.transport(worker, e))?;

        Ok(resp.status())
    }
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}
