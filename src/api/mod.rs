pub mod forecast;
pub mod health;
pub mod history;
pub mod latency;
pub mod routes;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;
    use serde_json::json;

    use crate::api::health::HealthState;
    use crate::api::latency::LatencyStats;
    use crate::api::routes::ApiState;
    use crate::config::AppMode;
    use crate::db::MemorySessionStore;
    use crate::engine::{EngineError, ForecastEngine, ForecastRequest};
    use crate::identity::{HeaderIdentityProvider, USER_ID_HEADER};
    use crate::orchestrator::Orchestrator;
    use crate::session::{LifecycleManager, ProgressSink};
    use crate::types::ForecastCard;

    /// Emits the given steps, then returns a fixed card or a fixed error.
    pub struct StaticEngine {
        steps: Vec<&'static str>,
        failure: Option<&'static str>,
    }

    impl StaticEngine {
        pub fn succeeding(steps: Vec<&'static str>) -> Arc<dyn ForecastEngine> {
            Arc::new(Self {
                steps,
                failure: None,
            })
        }

        pub fn failing(message: &'static str) -> Arc<dyn ForecastEngine> {
            Arc::new(Self {
                steps: vec!["fetching_market"],
                failure: Some(message),
            })
        }
    }

    #[async_trait]
    impl ForecastEngine for StaticEngine {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn run(
            &self,
            request: ForecastRequest,
            progress: ProgressSink,
        ) -> Result<ForecastCard, EngineError> {
            for step in &self.steps {
                progress.emit(step, json!({ "marketUrl": request.market_url }));
            }
            if let Some(message) = self.failure {
                return Err(EngineError::Failed(message.to_string()));
            }
            Ok(ForecastCard {
                question: "Will it happen?".to_string(),
                p0: 0.4,
                p_neutral: 0.45,
                p_aware: 0.5,
                drivers: vec!["x".to_string()],
                markdown_report: "# Report".to_string(),
            })
        }
    }

    pub fn test_state(
        mode: AppMode,
        engine: Arc<dyn ForecastEngine>,
    ) -> (ApiState, Arc<MemorySessionStore>) {
        let store = MemorySessionStore::new();
        let health = Arc::new(HealthState::new());
        let latency = Arc::new(LatencyStats::new().unwrap());
        let orchestrator = Orchestrator::new(
            LifecycleManager::new(store.clone()),
            engine,
            health.clone(),
            latency.clone(),
            Duration::from_secs(5),
            true,
        );
        let state = ApiState {
            mode,
            store: store.clone(),
            orchestrator: Arc::new(orchestrator),
            identity: Arc::new(HeaderIdentityProvider),
            health,
            latency,
        };
        (state, store)
    }

    pub fn post_json(uri: &str, body: serde_json::Value, user: Option<&str>) -> Request<Body> {
        let mut req = Request::post(uri).header("content-type", "application/json");
        if let Some(user) = user {
            req = req.header(USER_ID_HEADER, user);
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    pub async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    pub async fn body_json(resp: Response) -> serde_json::Value {
        serde_json::from_str(&body_text(resp).await).unwrap()
    }

    /// Read an event stream to its end as `(event, data)` pairs. Comment frames are skipped.
    pub async fn parse_sse(resp: Response) -> Vec<(String, serde_json::Value)> {
        let text = body_text(resp).await;
        let mut frames = Vec::new();
        for block in text.split("\n\n") {
            let mut event = None;
            let mut data = String::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push_str(v.trim_start());
                }
            }
            if let Some(event) = event {
                frames.push((event, serde_json::from_str(&data).unwrap()));
            }
        }
        frames
    }
}
