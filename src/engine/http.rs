use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::engine::{EngineError, ForecastEngine, ForecastRequest};
use crate::session::ProgressSink;
use crate::types::ForecastCard;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound, in characters, on the error body echoed back from a non-2xx engine response.
const MAX_ERROR_BODY: usize = 512;

/// One line of the engine's NDJSON response.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum EngineFrame {
    Progress {
        step: String,
        #[serde(default)]
        details: serde_json::Value,
    },
    Result {
        forecast: ForecastCard,
    },
    Error {
        message: String,
    },
}

/// Splits a byte stream into complete lines. Partial lines are carried over
/// to the next chunk.
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to hold no newline.
    scanned: usize,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(rel) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + rel;
            let text = String::from_utf8_lossy(&self.buf[start..end]);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
            start = end + 1;
            self.scanned = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        lines
    }

    /// Whatever trails the last newline.
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Read at most `MAX_ERROR_BODY` characters of a failed response, without
/// buffering the rest of it.
async fn error_body(resp: reqwest::Response) -> String {
    // 4 bytes per char at most, plus room for one split char at the cut.
    let cap = MAX_ERROR_BODY * 4 + 4;
    let mut buf = Vec::new();
    let mut stream = resp.bytes_stream();
    while buf.len() < cap {
        match stream.next().await {
            Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
            _ => break,
        }
    }
    buf.truncate(cap);
    String::from_utf8_lossy(&buf)
        .chars()
        .take(MAX_ERROR_BODY)
        .collect()
}

fn parse_frame(line: &str) -> Result<EngineFrame, EngineError> {
    serde_json::from_str(line).map_err(|e| EngineError::Protocol(format!("{e}: {line}")))
}

/// Forecast engine reached over HTTP.
///
/// `POST {base}/forecast` with the request as JSON; the response is a stream of
/// newline-delimited frames. `progress` frames are forwarded to the sink as
/// they arrive, the first `result` or `error` frame settles the run.
pub struct HttpForecastEngine {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpForecastEngine {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/forecast", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Apply one frame. Returns the outcome once the run has settled.
    fn handle(
        frame: EngineFrame,
        progress: &ProgressSink,
    ) -> Option<Result<ForecastCard, EngineError>> {
        match frame {
            EngineFrame::Progress { step, details } => {
                progress.emit(&step, details);
                None
            }
            EngineFrame::Result { forecast } => Some(Ok(forecast)),
            EngineFrame::Error { message } => Some(Err(EngineError::Failed(message))),
        }
    }
}

#[async_trait]
impl ForecastEngine for HttpForecastEngine {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn run(
        &self,
        request: ForecastRequest,
        progress: ProgressSink,
    ) -> Result<ForecastCard, EngineError> {
        let token = request
            .context
            .access_token
            .as_deref()
            .or(self.api_key.as_deref());

        let mut req = self.client.post(&self.endpoint).json(&request);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        info!(
            endpoint = %self.endpoint,
            session_id = request.session_id.as_deref().unwrap_or("-"),
            per_request_token = request.context.access_token.is_some(),
            "Dispatching forecast run"
        );

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::Status {
                status: status.as_u16(),
                body: error_body(resp).await,
            });
        }

        let mut lines = LineBuffer::default();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for line in lines.push(&chunk) {
                if let Some(outcome) = Self::handle(parse_frame(&line)?, &progress) {
                    debug!(endpoint = %self.endpoint, "Engine run settled");
                    return outcome;
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let Some(outcome) = Self::handle(parse_frame(&line)?, &progress) {
                return outcome;
            }
        }
        warn!(endpoint = %self.endpoint, "Engine stream closed without a result frame");
        Err(EngineError::NoResult)
    }
}
