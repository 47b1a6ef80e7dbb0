//! Forecast engine seam.
//!
//! The engine is an opaque long-running computation: it receives the resolved
//! request, reports progress through a [`ProgressSink`] zero or more times and
//! then either yields a [`ForecastCard`] or fails. The orchestrator only ever
//! sees this trait, so tests swap in scripted engines.

pub mod http;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::session::ProgressSink;
use crate::types::ForecastCard;

pub use http::HttpForecastEngine;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine reported a failure. Displayed verbatim to the client.
    #[error("{0}")]
    Failed(String),

    #[error("engine unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("engine responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed engine frame: {0}")]
    Protocol(String),

    #[error("engine stream ended without a result")]
    NoResult,
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Failed(_) => "engine_failed",
            EngineError::Transport(_) => "transport",
            EngineError::Status { .. } => "http_status",
            EngineError::Protocol(_) => "protocol",
            EngineError::NoResult => "no_result",
        }
    }
}

/// Per-request credentials. Travels with the request, never stored globally.
#[derive(Clone, Default)]
pub struct RequestContext {
    pub access_token: Option<String>,
}

impl RequestContext {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            access_token: access_token.filter(|t| !t.is_empty()),
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastRequest {
    pub market_url: String,
    pub drivers: Vec<String>,
    pub history_interval: String,
    pub with_books: bool,
    pub with_trades: bool,
    pub session_id: Option<String>,
    #[serde(skip)]
    pub context: RequestContext,
}

#[async_trait]
pub trait ForecastEngine: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        request: ForecastRequest,
        progress: ProgressSink,
    ) -> Result<ForecastCard, EngineError>;
}
