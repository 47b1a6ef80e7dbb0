use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Polymarket,
    Kalshi,
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Polymarket => "polymarket",
            Platform::Kalshi => "kalshi",
            Platform::Unknown => "unknown",
        }
    }

    /// Lenient parse for stored values; anything unrecognised is `Unknown`.
    pub fn from_stored(s: &str) -> Self {
        match s {
            "polymarket" => Platform::Polymarket,
            "kalshi" => Platform::Kalshi,
            _ => Platform::Unknown,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    /// Reserved. Nothing writes it; a running session stays `Pending` until terminal.
    InProgress,
    Completed,
    Failed,
    /// Cancelled on disconnect or cut off by the run-time bound.
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionStatus::Pending),
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "failed" => Some(SessionStatus::Failed),
            "abandoned" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Abandoned
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Engine output
// ---------------------------------------------------------------------------

/// One progress callback as observed by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step: String,
    /// Opaque payload owned by the engine.
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastCard {
    pub question: String,
    pub p0: f64,
    pub p_neutral: f64,
    pub p_aware: f64,
    #[serde(default)]
    pub drivers: Vec<String>,
    #[serde(default)]
    pub markdown_report: String,
}

// ---------------------------------------------------------------------------
// Persisted session
// ---------------------------------------------------------------------------

/// Durable record of one analysis request.
///
/// JSON-shaped columns are carried as raw JSON text so they survive storage
/// byte-for-byte; nothing below the lifecycle layer looks inside them.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSession {
    pub id: String,
    pub user_id: String,
    pub market_url: String,
    pub platform: Platform,
    pub market_identifier: String,
    pub market_question: Option<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress_events: Option<Box<RawValue>>,
    pub forecast_card: Option<Box<RawValue>>,
    pub markdown_report: Option<String>,
    pub p0: Option<f64>,
    pub p_neutral: Option<f64>,
    pub p_aware: Option<f64>,
    pub drivers: Option<Box<RawValue>>,
    pub duration_seconds: Option<i64>,
    pub cost: Option<f64>,
    pub error_message: Option<String>,
}

/// Insert payload for a fresh `pending` session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: String,
    pub user_id: String,
    pub market_url: String,
    pub platform: Platform,
    pub market_identifier: String,
    pub started_at: DateTime<Utc>,
}

impl NewSession {
    pub fn into_session(self) -> AnalysisSession {
        AnalysisSession {
            id: self.id,
            user_id: self.user_id,
            market_url: self.market_url,
            platform: self.platform,
            market_identifier: self.market_identifier,
            market_question: None,
            status: SessionStatus::Pending,
            started_at: self.started_at,
            completed_at: None,
            progress_events: None,
            forecast_card: None,
            markdown_report: None,
            p0: None,
            p_neutral: None,
            p_aware: None,
            drivers: None,
            duration_seconds: None,
            cost: None,
            error_message: None,
        }
    }
}

/// Partial update. `None` means "leave the column alone", never "set NULL".
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub market_question: Option<String>,
    pub progress_events: Option<Box<RawValue>>,
    pub forecast_card: Option<Box<RawValue>>,
    pub markdown_report: Option<String>,
    pub p0: Option<f64>,
    pub p_neutral: Option<f64>,
    pub p_aware: Option<f64>,
    pub drivers: Option<Box<RawValue>>,
    pub duration_seconds: Option<i64>,
    pub cost: Option<f64>,
    pub error_message: Option<String>,
}

impl SessionPatch {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.completed_at.is_none()
            && self.market_question.is_none()
            && self.progress_events.is_none()
            && self.forecast_card.is_none()
            && self.markdown_report.is_none()
            && self.p0.is_none()
            && self.p_neutral.is_none()
            && self.p_aware.is_none()
            && self.drivers.is_none()
            && self.duration_seconds.is_none()
            && self.cost.is_none()
            && self.error_message.is_none()
    }

    pub fn apply_to(&self, session: &mut AnalysisSession) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(at) = self.completed_at {
            session.completed_at = Some(at);
        }
        if let Some(q) = &self.market_question {
            session.market_question = Some(q.clone());
        }
        if let Some(events) = &self.progress_events {
            session.progress_events = Some(events.clone());
        }
        if let Some(card) = &self.forecast_card {
            session.forecast_card = Some(card.clone());
        }
        if let Some(report) = &self.markdown_report {
            session.markdown_report = Some(report.clone());
        }
        if self.p0.is_some() {
            session.p0 = self.p0;
        }
        if self.p_neutral.is_some() {
            session.p_neutral = self.p_neutral;
        }
        if self.p_aware.is_some() {
            session.p_aware = self.p_aware;
        }
        if let Some(drivers) = &self.drivers {
            session.drivers = Some(drivers.clone());
        }
        if self.duration_seconds.is_some() {
            session.duration_seconds = self.duration_seconds;
        }
        if self.cost.is_some() {
            session.cost = self.cost;
        }
        if let Some(msg) = &self.error_message {
            session.error_message = Some(msg.clone());
        }
    }
}
