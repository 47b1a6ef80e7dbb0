use std::sync::Arc;

use chrono::Utc;
use serde_json::value::{to_raw_value, RawValue};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{SessionStore, StoreError};
use crate::resolver::{self, ResolveError, ResolvedMarket};
use crate::types::{ForecastCard, NewSession, ProgressEvent, SessionPatch, SessionStatus};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error("failed to persist session: {0}")]
    Persistence(#[from] StoreError),
}

/// Result of a terminal write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// Another path already moved the session to a terminal state; nothing written.
    AlreadyTerminal,
}

/// Optional metrics written alongside `completed`. Absent fields are not touched.
#[derive(Debug, Clone, Default)]
pub struct CompletionMetrics {
    pub market_question: Option<String>,
    pub p0: Option<f64>,
    pub p_neutral: Option<f64>,
    pub p_aware: Option<f64>,
    pub drivers: Option<Vec<String>>,
    pub duration_seconds: Option<i64>,
    pub cost: Option<f64>,
}

impl CompletionMetrics {
    /// Headline metrics copied from a forecast card.
    pub fn from_card(card: &ForecastCard) -> Self {
        Self {
            market_question: Some(card.question.clone()).filter(|q| !q.is_empty()),
            p0: Some(card.p0),
            p_neutral: Some(card.p_neutral),
            p_aware: Some(card.p_aware),
            drivers: Some(card.drivers.clone()).filter(|d| !d.is_empty()),
            duration_seconds: None,
            cost: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub id: String,
    pub market: ResolvedMarket,
}

/// Owns the `pending → {completed, failed, abandoned}` state machine.
///
/// Only this type writes `status` and `completed_at`. Every terminal write is
/// conditional on the session still being open, so racing terminal writes
/// resolve to whichever landed first.
#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn SessionStore>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, user_id: &str, market_url: &str) -> Result<CreatedSession, LifecycleError> {
        let market = resolver::resolve(market_url)
            .inspect_err(|e| warn!(kind = e.kind(), user_id, "Market URL rejected"))?;
        let id = Uuid::new_v4().to_string();
        let id = self
            .store
            .create(NewSession {
                id,
                user_id: user_id.to_string(),
                market_url: market_url.to_string(),
                platform: market.platform,
                market_identifier: market.identifier.clone(),
                started_at: Utc::now(),
            })
            .await?;
        info!(
            session_id = %id,
            user_id,
            platform = %market.platform,
            identifier = %market.identifier,
            "Session created"
        );
        Ok(CreatedSession { id, market })
    }

    pub async fn complete(
        &self,
        session_id: &str,
        markdown_report: &str,
        progress_log: &[ProgressEvent],
        forecast_card: &ForecastCard,
        metrics: CompletionMetrics,
    ) -> Result<Transition, StoreError> {
        let patch = SessionPatch {
            status: Some(SessionStatus::Completed),
            completed_at: Some(Utc::now()),
            markdown_report: Some(markdown_report.to_string()),
            progress_events: Some(raw(session_id, progress_log)?),
            forecast_card: Some(raw(session_id, forecast_card)?),
            market_question: metrics.market_question,
            p0: metrics.p0,
            p_neutral: metrics.p_neutral,
            p_aware: metrics.p_aware,
            drivers: metrics
                .drivers
                .as_ref()
                .map(|d| raw(session_id, d))
                .transpose()?,
            duration_seconds: metrics.duration_seconds,
            cost: metrics.cost,
            error_message: None,
        };
        self.finish(session_id, SessionStatus::Completed, &patch).await
    }

    pub async fn fail(&self, session_id: &str, error_message: &str) -> Result<Transition, StoreError> {
        let patch = SessionPatch {
            status: Some(SessionStatus::Failed),
            completed_at: Some(Utc::now()),
            error_message: Some(error_message.to_string()),
            ..Default::default()
        };
        self.finish(session_id, SessionStatus::Failed, &patch).await
    }

    /// Record a run that was cancelled or cut off rather than settled by the engine.
    pub async fn abandon(&self, session_id: &str, reason: &str) -> Result<Transition, StoreError> {
        let patch = SessionPatch {
            status: Some(SessionStatus::Abandoned),
            completed_at: Some(Utc::now()),
            error_message: Some(reason.to_string()),
            ..Default::default()
        };
        self.finish(session_id, SessionStatus::Abandoned, &patch).await
    }

    async fn finish(
        &self,
        session_id: &str,
        to: SessionStatus,
        patch: &SessionPatch,
    ) -> Result<Transition, StoreError> {
        if self.store.update_if_open(session_id, patch).await? {
            info!(session_id, status = %to, "Session finished");
            Ok(Transition::Applied)
        } else {
            warn!(
                session_id,
                status = %to,
                "Session already terminal, transition ignored"
            );
            Ok(Transition::AlreadyTerminal)
        }
    }
}

fn raw<T: serde::Serialize + ?Sized>(session_id: &str, value: &T) -> Result<Box<RawValue>, StoreError> {
    to_raw_value(value).map_err(|e| StoreError::Corrupt {
        id: session_id.to_string(),
        reason: format!("unserializable payload: {e}"),
    })
}
