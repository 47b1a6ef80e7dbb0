use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{ForecastCard, ProgressEvent};

/// Everything that can be written to an analysis stream.
///
/// Serialized as the frame's `data:` payload; the variant name doubles as the
/// frame's `event:` line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected {
        message: String,
        #[serde(rename = "sessionId")]
        session_id: Option<String>,
    },
    Progress(ProgressEvent),
    Complete {
        forecast: ForecastCard,
        #[serde(rename = "sessionId")]
        session_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Error {
        error: String,
        details: Option<String>,
        #[serde(rename = "sessionId")]
        session_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Connected { .. } => "connected",
            StreamEvent::Progress(_) => "progress",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }

    /// Frame as `event: <name>` + `data: <json>`.
    pub fn to_sse(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "error": format!("unserializable event: {e}") })
                .to_string()
        });
        Event::default().event(self.name()).data(data)
    }
}
