use std::convert::Infallible;

use axum::response::sse::Event;
use chrono::Utc;
use futures_util::stream::{self, Stream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::stream::events::StreamEvent;
use crate::types::ForecastCard;

/// Write side of one analysis stream.
///
/// Owned by the task driving the request. At most one terminal event is ever
/// written; the stream ends when this value (and every live sender handed out
/// for progress) is dropped.
pub struct StreamingChannel {
    tx: mpsc::UnboundedSender<StreamEvent>,
    session_id: Option<String>,
    terminated: bool,
}

impl StreamingChannel {
    pub fn open(session_id: Option<String>) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                session_id,
                terminated: false,
            },
            rx,
        )
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Sender for progress mirroring. Never blocks the caller.
    pub fn live_sender(&self) -> mpsc::UnboundedSender<StreamEvent> {
        self.tx.clone()
    }

    pub fn connected(&self, message: &str) {
        self.push(StreamEvent::Connected {
            message: message.to_string(),
            session_id: self.session_id.clone(),
        });
    }

    pub fn complete(&mut self, forecast: ForecastCard) {
        let ev = StreamEvent::Complete {
            forecast,
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
        };
        self.terminate(ev);
    }

    pub fn error(&mut self, error: String, details: Option<String>) {
        let ev = StreamEvent::Error {
            error,
            details,
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
        };
        self.terminate(ev);
    }

    /// Resolves when the client drops the stream.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    fn terminate(&mut self, ev: StreamEvent) {
        if self.terminated {
            warn!(
                session_id = self.session_id.as_deref().unwrap_or("-"),
                "Dropping second terminal event '{}'",
                ev.name()
            );
            return;
        }
        self.terminated = true;
        self.push(ev);
    }

    fn push(&self, ev: StreamEvent) {
        if self.terminated && !ev.is_terminal() {
            return;
        }
        if self.tx.send(ev).is_err() {
            debug!(
                session_id = self.session_id.as_deref().unwrap_or("-"),
                "Client gone, event not delivered"
            );
        }
    }
}

/// Adapt the read side into an SSE body stream.
pub fn sse_stream(
    rx: mpsc::UnboundedReceiver<StreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|ev| (Ok(ev.to_sse()), rx))
    })
}
