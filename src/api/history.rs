use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::info;

use crate::api::routes::ApiState;
use crate::config::HISTORY_LIMIT;
use crate::error::AppError;
use crate::identity;
use crate::types::{AnalysisSession, Platform, SessionStatus};

/// One row of `GET /api/user/history`. Omits the progress log and report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub market_url: String,
    pub market_question: Option<String>,
    pub platform: Platform,
    pub market_identifier: String,
    pub status: SessionStatus,
    pub p0: Option<f64>,
    pub p_neutral: Option<f64>,
    pub p_aware: Option<f64>,
    pub cost: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub forecast_card: Option<Box<RawValue>>,
}

impl From<AnalysisSession> for SessionSummary {
    fn from(s: AnalysisSession) -> Self {
        Self {
            id: s.id,
            market_url: s.market_url,
            market_question: s.market_question,
            platform: s.platform,
            market_identifier: s.market_identifier,
            status: s.status,
            p0: s.p0,
            p_neutral: s.p_neutral,
            p_aware: s.p_aware,
            cost: s.cost,
            started_at: s.started_at,
            completed_at: s.completed_at,
            duration_seconds: s.duration_seconds,
            forecast_card: s.forecast_card,
        }
    }
}

pub async fn list_history(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionSummary>>, AppError> {
    let caller = identity::caller(state.mode, state.identity.as_ref(), &headers)?;
    let sessions = state
        .store
        .get_history(&caller.id, HISTORY_LIMIT, true)
        .await?;
    Ok(Json(sessions.into_iter().map(SessionSummary::from).collect()))
}

pub async fn get_analysis(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<AnalysisSession>, AppError> {
    let caller = identity::caller(state.mode, state.identity.as_ref(), &headers)?;
    state
        .store
        .get_by_id(&id, &caller.id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Analysis not found".to_string()))
}

pub async fn delete_analysis(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let caller = identity::caller(state.mode, state.identity.as_ref(), &headers)?;
    if !state.store.delete(&id, &caller.id).await? {
        return Err(AppError::NotFound("Analysis not found".to_string()));
    }
    info!(session_id = %id, user_id = %caller.id, "Session deleted");
    Ok(Json(serde_json::json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::router;
    use crate::api::test_support::{body_json, test_state, StaticEngine};
    use crate::config::AppMode;
    use crate::db::SessionStore;
    use crate::types::{NewSession, SessionPatch};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn seed(store: &dyn SessionStore, id: &str, user: &str, completed: bool) {
        store
            .create(NewSession {
                id: id.to_string(),
                user_id: user.to_string(),
                market_url: format!("https://polymarket.com/event/{id}"),
                platform: Platform::Polymarket,
                market_identifier: id.to_string(),
                started_at: Utc::now(),
            })
            .await
            .unwrap();
        if completed {
            store
                .update(
                    id,
                    &SessionPatch {
                        status: Some(SessionStatus::Completed),
                        completed_at: Some(Utc::now()),
                        progress_events: Some(RawValue::from_string("[]".to_string()).unwrap()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
    }

    fn get(uri: &str, user: &str) -> Request<Body> {
        Request::get(uri)
            .header("x-user-id", user)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn history_lists_only_callers_completed_sessions() {
        let (state, store) = test_state(AppMode::Hosted, StaticEngine::succeeding(vec![]));
        seed(store.as_ref(), "a", "u1", true).await;
        seed(store.as_ref(), "b", "u1", false).await;
        seed(store.as_ref(), "c", "u2", true).await;

        let resp = router(state)
            .oneshot(get("/api/user/history", "u1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], "a");
        assert_eq!(rows[0]["status"], "completed");
        assert!(rows[0].get("progressEvents").is_none());
    }

    #[tokio::test]
    async fn history_requires_identity_in_hosted_mode() {
        let (state, _) = test_state(AppMode::Hosted, StaticEngine::succeeding(vec![]));
        let resp = router(state)
            .oneshot(Request::get("/api/user/history").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn detail_is_owner_scoped() {
        let (state, store) = test_state(AppMode::Hosted, StaticEngine::succeeding(vec![]));
        seed(store.as_ref(), "a", "u1", true).await;
        let app = router(state);

        let resp = app.clone().oneshot(get("/api/user/history/a", "u1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["marketIdentifier"], "a");
        assert_eq!(body["progressEvents"], serde_json::json!([]));

        let resp = app.oneshot(get("/api/user/history/a", "u2")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_removes_once() {
        let (state, store) = test_state(AppMode::Hosted, StaticEngine::succeeding(vec![]));
        seed(store.as_ref(), "a", "u1", true).await;
        let app = router(state);

        let delete = |user: &str| {
            Request::delete("/api/user/history/a")
                .header("x-user-id", user)
                .body(Body::empty())
                .unwrap()
        };

        let resp = app.clone().oneshot(delete("u2")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app.clone().oneshot(delete("u1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["success"], true);
        assert!(store.is_empty());

        let resp = app.oneshot(delete("u1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
