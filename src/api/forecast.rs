use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::api::routes::ApiState;
use crate::config::AppMode;
use crate::engine::{ForecastRequest, RequestContext};
use crate::error::AppError;
use crate::identity;
use crate::resolver::normalize_legacy_slug;
use crate::stream::{sse_stream, StreamingChannel};

const DEFAULT_HISTORY_INTERVAL: &str = "1d";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastBody {
    pub market_url: Option<String>,
    /// Legacy: bare Polymarket event slug.
    pub polymarket_slug: Option<String>,
    #[serde(default)]
    pub drivers: Vec<String>,
    #[serde(default = "default_history_interval")]
    pub history_interval: String,
    #[serde(default = "default_true")]
    pub with_books: bool,
    #[serde(default)]
    pub with_trades: bool,
    #[serde(default, alias = "valyuAccessToken")]
    pub access_token: Option<String>,
}

fn default_history_interval() -> String {
    DEFAULT_HISTORY_INTERVAL.to_string()
}

fn default_true() -> bool {
    true
}

impl ForecastBody {
    /// The market URL to analyse: `marketUrl` if non-empty, else the legacy slug expanded.
    fn target_url(&self) -> Result<String, AppError> {
        fn non_empty(v: &Option<String>) -> Option<&str> {
            v.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }
        if let Some(url) = non_empty(&self.market_url) {
            return Ok(url.to_string());
        }
        if let Some(slug) = non_empty(&self.polymarket_slug) {
            return normalize_legacy_slug(slug).map_err(|e| AppError::Validation(e.to_string()));
        }
        Err(AppError::Validation(
            "Either marketUrl or polymarketSlug is required".to_string(),
        ))
    }
}

/// `POST /api/forecast`: validate, create the session, then stream the run.
///
/// Every rejection happens before a session exists. Once the stream is
/// returned, failures are reported in-band as an `error` event.
pub async fn start_forecast(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: Result<Json<ForecastBody>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let caller = identity::caller(state.mode, state.identity.as_ref(), &headers)?;
    let Json(body) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    let context = RequestContext::new(body.access_token.clone());
    if state.mode == AppMode::Hosted && context.access_token.is_none() {
        return Err(AppError::Unauthorized(
            "An access token is required to analyze markets".to_string(),
        ));
    }

    let market_url = body.target_url()?;
    let created = state
        .orchestrator
        .lifecycle()
        .create(&caller.id, &market_url)
        .await?;

    info!(
        session_id = %created.id,
        user_id = %caller.id,
        platform = %created.market.platform,
        mode = %state.mode,
        per_request_token = context.access_token.is_some(),
        "Forecast stream opened"
    );

    let request = ForecastRequest {
        market_url,
        drivers: body.drivers,
        history_interval: body.history_interval,
        with_books: body.with_books,
        with_trades: body.with_trades,
        session_id: Some(created.id.clone()),
        context,
    };
    let (channel, rx) = StreamingChannel::open(Some(created.id));
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move { orchestrator.drive(channel, request).await });

    Ok(Sse::new(sse_stream(rx)).keep_alive(KeepAlive::default()))
}

/// `GET /api/forecast`: self-describing usage document.
pub async fn usage() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Multi-platform market forecasting API",
        "usage": "POST with { marketUrl: string, drivers?: string[], historyInterval?: string, withBooks?: boolean, withTrades?: boolean, accessToken?: string }",
        "response": "text/event-stream of connected, progress, then exactly one of complete or error",
        "parameters": {
            "marketUrl": "Required. Full market URL (Polymarket or Kalshi). Platform is detected from the host.",
            "polymarketSlug": "Deprecated. Bare Polymarket event slug, expanded to https://polymarket.com/event/{slug}.",
            "drivers": "Optional. Key factors to focus the analysis on (default: [])",
            "historyInterval": "Optional. Price history granularity, e.g. \"1h\", \"4h\", \"1d\", \"1w\" (default: \"1d\")",
            "withBooks": "Optional. Include order book data (default: true)",
            "withTrades": "Optional. Include recent trades (default: false)",
            "accessToken": "Per-request engine credential. Required in hosted mode. Alias: valyuAccessToken"
        },
        "supportedPlatforms": {
            "polymarket": {
                "name": "Polymarket",
                "urlFormat": "https://polymarket.com/event/{slug}",
                "example": "https://polymarket.com/event/will-trump-win-2024"
            },
            "kalshi": {
                "name": "Kalshi",
                "urlFormat": "https://kalshi.com/markets/{series}/{category}/{ticker}",
                "example": "https://kalshi.com/markets/kxtime/times-person-of-the-year/KXTIME-25"
            }
        },
        "examples": {
            "polymarket": { "marketUrl": "https://polymarket.com/event/will-ai-achieve-agi-by-2030" },
            "kalshi": { "marketUrl": "https://kalshi.com/markets/kxgovshut/government-shutdown/kxgovshut-25oct01" },
            "withCustomization": {
                "marketUrl": "https://polymarket.com/event/will-trump-win-2024",
                "drivers": ["Polling data", "Economic indicators", "Swing states"],
                "historyInterval": "4h"
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::router;
    use crate::api::test_support::{body_json, parse_sse, post_json, test_state, StaticEngine};
    use crate::config::DEV_USER_ID;
    use crate::db::SessionStore;
    use crate::types::{ProgressEvent, SessionStatus};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn hosted_mode_without_identity_is_401_and_creates_nothing() {
        let (state, store) = test_state(AppMode::Hosted, StaticEngine::succeeding(vec![]));
        let resp = router(state)
            .oneshot(post_json(
                "/api/forecast",
                json!({ "marketUrl": "https://polymarket.com/event/a", "accessToken": "t" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(body_json(resp).await["error"].is_string());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn hosted_mode_without_access_token_is_401() {
        let (state, store) = test_state(AppMode::Hosted, StaticEngine::succeeding(vec![]));
        let resp = router(state)
            .oneshot(post_json(
                "/api/forecast",
                json!({ "marketUrl": "https://polymarket.com/event/a" }),
                Some("u1"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn invalid_url_is_400_before_any_session() {
        let (state, store) = test_state(AppMode::SelfHosted, StaticEngine::succeeding(vec![]));
        let resp = router(state)
            .oneshot(post_json(
                "/api/forecast",
                json!({ "marketUrl": "https://example.com/event/a" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("Unsupported platform"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn missing_market_is_400() {
        let (state, _) = test_state(AppMode::SelfHosted, StaticEngine::succeeding(vec![]));
        let resp = router(state)
            .oneshot(post_json("/api/forecast", json!({ "marketUrl": "" }), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let (state, _) = test_state(AppMode::SelfHosted, StaticEngine::succeeding(vec![]));
        let req = Request::builder()
            .method("POST")
            .uri("/api/forecast")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn successful_run_streams_and_persists() {
        let (state, store) = test_state(
            AppMode::SelfHosted,
            StaticEngine::succeeding(vec!["fetching_market", "analyzing"]),
        );
        let resp = router(state)
            .oneshot(post_json(
                "/api/forecast",
                json!({ "polymarketSlug": "will-ai-win" }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let frames = parse_sse(resp).await;
        let names: Vec<_> = frames.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["connected", "progress", "progress", "complete"]);

        let session_id = frames[0].1["sessionId"].as_str().unwrap().to_string();
        assert_eq!(frames[3].1["sessionId"], session_id.as_str());
        assert_eq!(frames[3].1["forecast"]["pAware"], 0.5);

        let s = store.get_by_id(&session_id, DEV_USER_ID).await.unwrap().unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.market_url, "https://polymarket.com/event/will-ai-win");
        assert_eq!(s.market_identifier, "will-ai-win");
        assert!(s.completed_at.is_some());

        let stored: Vec<ProgressEvent> =
            serde_json::from_str(s.progress_events.unwrap().get()).unwrap();
        let live: Vec<ProgressEvent> = frames[1..3]
            .iter()
            .map(|(_, data)| {
                let mut data = data.clone();
                data.as_object_mut().unwrap().remove("type");
                serde_json::from_value(data).unwrap()
            })
            .collect();
        assert_eq!(stored, live);
    }

    #[tokio::test]
    async fn engine_error_is_reported_in_band() {
        let (state, store) = test_state(AppMode::SelfHosted, StaticEngine::failing("timeout"));
        let resp = router(state)
            .oneshot(post_json(
                "/api/forecast",
                json!({ "marketUrl": "https://kalshi.com/markets/kxgovshut/gov/kxgovshut-25oct01" }),
                Some("u7"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let frames = parse_sse(resp).await;
        let (name, data) = frames.last().unwrap();
        assert_eq!(name, "error");
        assert_eq!(data["error"], "timeout");

        let session_id = data["sessionId"].as_str().unwrap();
        let s = store.get_by_id(session_id, "u7").await.unwrap().unwrap();
        assert_eq!(s.status, SessionStatus::Failed);
        assert_eq!(s.error_message.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn usage_document_lists_platforms() {
        let (state, _) = test_state(AppMode::SelfHosted, StaticEngine::succeeding(vec![]));
        let resp = router(state)
            .oneshot(Request::get("/api/forecast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert!(body["supportedPlatforms"]["kalshi"].is_object());
    }

    #[test]
    fn body_defaults_and_token_alias() {
        let body: ForecastBody = serde_json::from_value(json!({
            "marketUrl": "https://polymarket.com/event/a",
            "valyuAccessToken": "tok"
        }))
        .unwrap();
        assert!(body.drivers.is_empty());
        assert_eq!(body.history_interval, "1d");
        assert!(body.with_books);
        assert!(!body.with_trades);
        assert_eq!(body.access_token.as_deref(), Some("tok"));
    }

    #[test]
    fn blank_market_url_falls_back_to_slug() {
        let body: ForecastBody = serde_json::from_value(json!({
            "marketUrl": "   ",
            "polymarketSlug": " will-ai-win "
        }))
        .unwrap();
        assert_eq!(
            body.target_url().unwrap(),
            "https://polymarket.com/event/will-ai-win"
        );
    }

    #[test]
    fn market_url_takes_precedence_over_slug() {
        let body: ForecastBody = serde_json::from_value(json!({
            "marketUrl": "https://kalshi.com/markets/a",
            "polymarketSlug": "b"
        }))
        .unwrap();
        assert_eq!(body.target_url().unwrap(), "https://kalshi.com/markets/a");
    }
}
