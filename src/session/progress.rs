use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::stream::StreamEvent;
use crate::types::ProgressEvent;

struct AggregatorState {
    log: Vec<ProgressEvent>,
    /// Live mirror. `None` when running without a listener or after sealing.
    live: Option<mpsc::UnboundedSender<StreamEvent>>,
    sealed: bool,
}

/// Collects every progress callback of one run, in the order observed.
///
/// Each callback is timestamped on receipt and the same value is both pushed to
/// the live stream and appended to the log, under one lock, so the durable log
/// and the streamed `progress` events never diverge.
pub struct ProgressAggregator {
    session_id: Option<String>,
    state: Mutex<AggregatorState>,
}

impl ProgressAggregator {
    pub fn new(
        session_id: Option<String>,
        live: Option<mpsc::UnboundedSender<StreamEvent>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            state: Mutex::new(AggregatorState {
                log: Vec::new(),
                live,
                sealed: false,
            }),
        })
    }

    pub fn record(&self, step: &str, details: serde_json::Value) {
        let mut state = self.lock();
        if state.sealed {
            warn!(
                session_id = self.session_id.as_deref().unwrap_or("-"),
                step,
                "Progress reported after the run settled, ignoring"
            );
            return;
        }

        let event = ProgressEvent {
            step: step.to_string(),
            details,
            timestamp: Utc::now(),
        };
        debug!(
            session_id = self.session_id.as_deref().unwrap_or("-"),
            step,
            seq = state.log.len(),
            "progress"
        );
        if let Some(live) = &state.live {
            // A closed receiver means the client left; the log still gets the event.
            let _ = live.send(StreamEvent::Progress(event.clone()));
        }
        state.log.push(event);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().log.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting events, release the live sender and hand back the log.
    pub fn seal(&self) -> Vec<ProgressEvent> {
        let mut state = self.lock();
        state.sealed = true;
        state.live = None;
        std::mem::take(&mut state.log)
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Callback handle given to the forecast engine.
#[derive(Clone)]
pub struct ProgressSink {
    aggregator: Arc<ProgressAggregator>,
}

impl ProgressSink {
    pub fn new(aggregator: Arc<ProgressAggregator>) -> Self {
        Self { aggregator }
    }

    /// Report one step. Synchronous and non-blocking.
    pub fn emit(&self, step: &str, details: serde_json::Value) {
        self.aggregator.record(step, details);
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("session_id", &self.aggregator.session_id)
            .finish()
    }
}
