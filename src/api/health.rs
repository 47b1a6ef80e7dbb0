//! Shared health state for the /health endpoint.
//! Updated by the forecast orchestrator, read by the API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::types::SessionStatus;

/// Process-wide stream and session counters.
pub struct HealthState {
    started_at: Instant,
    /// Streams currently open (engine running or persisting).
    active_streams: AtomicU64,
    sessions_completed: AtomicU64,
    sessions_failed: AtomicU64,
    sessions_abandoned: AtomicU64,
    /// Terminal writes that errored. Never retried.
    persistence_failures: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            active_streams: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            sessions_abandoned: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
        }
    }

    /// Count a stream as active until the returned guard is dropped.
    pub fn stream_opened(self: &Arc<Self>) -> ActiveStream {
        self.active_streams.fetch_add(1, Ordering::Relaxed);
        ActiveStream {
            health: Arc::clone(self),
        }
    }

    pub fn record_terminal(&self, status: SessionStatus) {
        let counter = match status {
            SessionStatus::Completed => &self.sessions_completed,
            SessionStatus::Failed => &self.sessions_failed,
            SessionStatus::Abandoned => &self.sessions_abandoned,
            SessionStatus::Pending | SessionStatus::InProgress => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_persistence_failures(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_streams(&self) -> u64 {
        self.active_streams.load(Ordering::Relaxed)
    }

    pub fn sessions_completed(&self) -> u64 {
        self.sessions_completed.load(Ordering::Relaxed)
    }

    pub fn sessions_failed(&self) -> u64 {
        self.sessions_failed.load(Ordering::Relaxed)
    }

    pub fn sessions_abandoned(&self) -> u64 {
        self.sessions_abandoned.load(Ordering::Relaxed)
    }

    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ActiveStream {
    health: Arc<HealthState>,
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.health.active_streams.fetch_sub(1, Ordering::Relaxed);
    }
}
