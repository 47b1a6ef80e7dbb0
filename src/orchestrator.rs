use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::db::StoreError;
use crate::engine::{EngineError, ForecastEngine, ForecastRequest};
use crate::session::{
    CompletionMetrics, LifecycleManager, ProgressAggregator, ProgressSink, Transition,
};
use crate::stream::StreamingChannel;
use crate::types::{ForecastCard, SessionStatus};

const CONNECTED_MESSAGE: &str = "Starting analysis...";
const DISCONNECT_REASON: &str = "Client disconnected before the analysis finished";

/// How one engine run ended.
enum RunOutcome {
    Settled(Result<ForecastCard, EngineError>),
    TimedOut,
    Disconnected,
}

/// Drives one analysis from `connected` to its terminal event and durable record.
pub struct Orchestrator {
    lifecycle: LifecycleManager,
    engine: Arc<dyn ForecastEngine>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
    run_timeout: Duration,
    cancel_on_disconnect: bool,
}

impl Orchestrator {
    pub fn new(
        lifecycle: LifecycleManager,
        engine: Arc<dyn ForecastEngine>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
        run_timeout: Duration,
        cancel_on_disconnect: bool,
    ) -> Self {
        Self {
            lifecycle,
            engine,
            health,
            latency,
            run_timeout,
            cancel_on_disconnect,
        }
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Run the engine for an already-created session and stream the result.
    ///
    /// Event order on `channel` is `connected`, zero or more `progress`, then
    /// exactly one of `complete`/`error`. The terminal write to the store happens
    /// before `channel` is dropped, so the stream ends only once the session is
    /// recorded (or the write has failed and been logged).
    pub async fn drive(&self, mut channel: StreamingChannel, request: ForecastRequest) {
        let _active = self.health.stream_opened();
        let session_id = channel.session_id().map(str::to_string);
        let sid = session_id.as_deref().unwrap_or("-");

        channel.connected(CONNECTED_MESSAGE);
        let aggregator = ProgressAggregator::new(session_id.clone(), Some(channel.live_sender()));
        let sink = ProgressSink::new(Arc::clone(&aggregator));

        info!(
            session_id = sid,
            engine = self.engine.name(),
            market_url = %request.market_url,
            timeout_secs = self.run_timeout.as_secs(),
            "Analysis started"
        );
        let started = Instant::now();
        let run = tokio::time::timeout(self.run_timeout, self.engine.run(request, sink));

        let outcome = if self.cancel_on_disconnect {
            tokio::select! {
                biased;
                res = run => res.map_or(RunOutcome::TimedOut, RunOutcome::Settled),
                _ = channel.closed() => RunOutcome::Disconnected,
            }
        } else {
            run.await.map_or(RunOutcome::TimedOut, RunOutcome::Settled)
        };
        let elapsed = started.elapsed();
        let progress_log = aggregator.seal();

        match outcome {
            RunOutcome::Settled(Ok(card)) => {
                self.latency.record(elapsed);
                info!(
                    session_id = sid,
                    elapsed_ms = elapsed.as_millis() as u64,
                    steps = progress_log.len(),
                    p_aware = card.p_aware,
                    "Analysis complete"
                );
                channel.complete(card.clone());
                if let Some(id) = session_id.as_deref() {
                    let report = markdown_report(&card);
                    let mut metrics = CompletionMetrics::from_card(&card);
                    metrics.duration_seconds = Some(elapsed.as_secs_f64().round() as i64);
                    let res = self
                        .lifecycle
                        .complete(id, &report, &progress_log, &card, metrics)
                        .await;
                    self.settle(id, SessionStatus::Completed, res);
                }
            }
            RunOutcome::Settled(Err(e)) => {
                self.latency.record(elapsed);
                warn!(
                    session_id = sid,
                    kind = e.kind(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Analysis failed: {e}"
                );
                let message = e.to_string();
                channel.error(message.clone(), Some(e.kind().to_string()));
                if let Some(id) = session_id.as_deref() {
                    let res = self.lifecycle.fail(id, &message).await;
                    self.settle(id, SessionStatus::Failed, res);
                }
            }
            RunOutcome::TimedOut => {
                let message = format!(
                    "Analysis exceeded the {}s time limit",
                    self.run_timeout.as_secs()
                );
                warn!(session_id = sid, steps = progress_log.len(), "{message}");
                channel.error(message.clone(), Some("timeout".to_string()));
                if let Some(id) = session_id.as_deref() {
                    let res = self.lifecycle.abandon(id, &message).await;
                    self.settle(id, SessionStatus::Abandoned, res);
                }
            }
            RunOutcome::Disconnected => {
                info!(
                    session_id = sid,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Client left, engine run cancelled"
                );
                if let Some(id) = session_id.as_deref() {
                    let res = self.lifecycle.abandon(id, DISCONNECT_REASON).await;
                    self.settle(id, SessionStatus::Abandoned, res);
                }
            }
        }
    }

    fn settle(&self, session_id: &str, status: SessionStatus, res: Result<Transition, StoreError>) {
        match res {
            Ok(Transition::Applied) => self.health.record_terminal(status),
            Ok(Transition::AlreadyTerminal) => {}
            Err(e) => {
                self.health.inc_persistence_failures();
                error!(
                    session_id,
                    status = %status,
                    "Failed to record session outcome: {e}"
                );
            }
        }
    }
}

/// The card's narrative report, or the whole card as JSON when it has none.
fn markdown_report(card: &ForecastCard) -> String {
    if !card.markdown_report.is_empty() {
        return card.markdown_report.clone();
    }
    serde_json::to_string(card).unwrap_or_default()
}
