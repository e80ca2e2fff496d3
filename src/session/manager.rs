//! Session-to-worker mapping with idle expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::forward::Forwarder;
use crate::pool::Worker;

/// Interval between TTL sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

struct SessionEntry {
    worker: Arc<Worker>,
    /// Refreshed on every successful get.
    last_accessed: Instant,
}

/// Maps session ids to the workers that own them and expires sessions that
/// go untouched past their TTL.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    ttl: Duration,
    forwarder: Forwarder,
}

impl SessionManager {
    /// Create a manager and start its TTL sweeper.
    pub fn new(ttl: Duration, forwarder: Forwarder) -> Arc<Self> {
        let manager = Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
            forwarder,
        });

        let sweeper = manager.clone();
        tokio::spawn(async move {
            loop {
                sleep(SWEEP_INTERVAL).await;
                sweeper.expire_stale().await;
            }
        });

        manager
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a session on its owning worker.
    pub fn add(&self, session_id: &str, worker: Arc<Worker>) {
        info!(session_id, worker_id = worker.id, "session registered");
        self.lock_sessions().insert(
            session_id.to_string(),
            SessionEntry {
                worker,
                last_accessed: Instant::now(),
            },
        );
    }

    /// Look up the owning worker and refresh the session's last access time.
    pub fn get(&self, session_id: &str) -> Option<Arc<Worker>> {
        let mut sessions = self.lock_sessions();
        let entry = sessions.get_mut(session_id)?;
        entry.last_accessed = Instant::now();
        Some(entry.worker.clone())
    }

    /// Delete a session mapping, returning the worker that owned it.
    pub fn remove(&self, session_id: &str) -> Option<Arc<Worker>> {
        self.lock_sessions()
            .remove(session_id)
            .map(|entry| entry.worker)
    }

    /// Number of active sessions.
    pub fn count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Expire every session idle past the TTL. The expired entries are
    /// collected and deleted under the lock; the per-worker delete forwards
    /// and releases happen outside it so concurrent lookups stay live.
    async fn expire_stale(&self) {
        for (session_id, worker) in self.collect_expired() {
            info!(
                session_id = %session_id,
                worker_id = worker.id,
                "session TTL expired"
            );
            if let Err(e) = self.forwarder.delete_session(&worker, &session_id).await {
                warn!(
                    session_id = %session_id,
                    worker_id = worker.id,
                    error = %e,
                    "failed to delete expired session from worker"
                );
            }
            worker.clear_session();
        }
    }

    fn collect_expired(&self) -> Vec<(String, Arc<Worker>)> {
        let mut sessions = self.lock_sessions();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| entry.last_accessed.elapsed() > self.ttl)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| sessions.remove(&id).map(|entry| (id, entry.worker)))
            .collect()
    }
}
