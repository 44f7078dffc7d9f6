use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;

use pricewatch_core::batch::{BatchItem, BatchOptions};
use pricewatch_core::error::WatchError;
use pricewatch_core::registry::is_http_url;
use pricewatch_core::runtime::SubmitRequest;
use pricewatch_core::traits::{ReportSink, TabRuntime, WorklistSource};

use crate::dto::{BatchParseRequest, HealthResponse, ParseRequest, ResumeResponse};
use crate::error::ApiError;
use crate::state::AppState;

/// Build the router with all routes. Middleware layers (trace, CORS) are
/// applied by the binary.
pub fn router<R, S, K>(state: Arc<AppState<R, S, K>>) -> Router
where
    R: TabRuntime,
    S: WorklistSource + 'static,
    K: ReportSink + 'static,
{
    Router::new()
        .route("/health", get(health::<R, S, K>))
        .route("/parse", post(parse::<R, S, K>))
        .route("/parse/batch", post(parse_batch::<R, S, K>))
        .route("/run-now", post(run_now::<R, S, K>))
        .route("/resume", post(resume::<R, S, K>))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

/// Single on-demand extraction. The caller's wait is bounded by
/// `timeoutMs`; on expiry the request fails with 504 while the job itself
/// keeps running and settles as an orphan.
pub async fn parse<R, S, K>(
    State(state): State<Arc<AppState<R, S, K>>>,
    axum::Json(body): axum::Json<ParseRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    R: TabRuntime,
    S: WorklistSource + 'static,
    K: ReportSink + 'static,
{
    if !is_http_url(&body.url) {
        return Err(WatchError::Generic(format!("invalid URL: {}", body.url)).into());
    }

    let wait = body
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(state.config.per_item_timeout);

    let mut request = SubmitRequest::new(&body.url);
    if let Some(key) = body.unique_key {
        request = request.with_fingerprint(key);
    }

    match tokio::time::timeout(wait, state.manager.submit(request)).await {
        Ok(outcome) => Ok(axum::Json(outcome)),
        Err(_) => Err(WatchError::JobTimeout(wait.as_millis() as u64).into()),
    }
}

/// Batch extraction through the bounded tab pool; one outcome per URL, in
/// request order.
pub async fn parse_batch<R, S, K>(
    State(state): State<Arc<AppState<R, S, K>>>,
    axum::Json(body): axum::Json<BatchParseRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    R: TabRuntime,
    S: WorklistSource + 'static,
    K: ReportSink + 'static,
{
    let items: Vec<BatchItem> = body
        .urls
        .iter()
        .enumerate()
        .map(|(index, url)| BatchItem {
            id: index.to_string(),
            target: url.clone(),
        })
        .collect();

    let options = BatchOptions {
        max_concurrency: state.config.concurrency,
        per_item_timeout: body
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(state.config.per_item_timeout),
        ..BatchOptions::default()
    };

    let outcomes = state.batch.run_batch(&items, &options).await;
    Ok(axum::Json(outcomes))
}

// ---------------------------------------------------------------------------
// Cycle control
// ---------------------------------------------------------------------------

/// Trigger a full check cycle immediately. The summary is returned even
/// when the cycle aborts; only the HTTP transport itself can fail here.
pub async fn run_now<R, S, K>(
    State(state): State<Arc<AppState<R, S, K>>>,
) -> impl IntoResponse
where
    R: TabRuntime,
    S: WorklistSource + 'static,
    K: ReportSink + 'static,
{
    let summary = state.cycle.run_cycle().await;
    axum::Json(summary)
}

/// Operator action: leave the paused state entered by hold-on-error.
pub async fn resume<R, S, K>(State(state): State<Arc<AppState<R, S, K>>>) -> impl IntoResponse
where
    R: TabRuntime,
    S: WorklistSource + 'static,
    K: ReportSink + 'static,
{
    state.manager.resume();
    axum::Json(ResumeResponse {
        state: state.manager.state(),
    })
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn health<R, S, K>(State(state): State<Arc<AppState<R, S, K>>>) -> impl IntoResponse
where
    R: TabRuntime,
    S: WorklistSource + 'static,
    K: ReportSink + 'static,
{
    axum::Json(HealthResponse {
        status: "healthy",
        runtime_state: state.manager.state(),
        queue_depth: state.manager.queue_depth(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use pricewatch_core::batch::BatchScheduler;
    use pricewatch_core::cycle::{CycleConfig, CycleOrchestrator};
    use pricewatch_core::models::{MarketData, WorkItem};
    use pricewatch_core::registry::ExtractorRegistry;
    use pricewatch_core::runtime::RuntimeManager;
    use pricewatch_core::testutil::{
        MockMarketExtractor, MockRuntime, MockWorklistSource, RecordingSink,
    };

    use crate::config::ServiceConfig;

    type TestState = AppState<MockRuntime, MockWorklistSource, RecordingSink>;

    fn test_app(extractor: MockMarketExtractor, source: MockWorklistSource) -> Router {
        let runtime = MockRuntime::new();
        let registry = Arc::new(ExtractorRegistry::new().register("shop", Arc::new(extractor)));
        let manager = RuntimeManager::new(runtime.clone(), Arc::clone(&registry), false);
        let cycle = CycleOrchestrator::new(
            Arc::new(manager.clone()),
            source,
            RecordingSink::new(),
            CycleConfig {
                per_item_timeout: Duration::from_millis(500),
                ..CycleConfig::default()
            },
        );
        let state: Arc<TestState> = Arc::new(AppState {
            manager,
            batch: BatchScheduler::new(runtime, registry),
            cycle,
            config: ServiceConfig::default(),
        });
        router(state)
    }

    fn app() -> Router {
        test_app(
            MockMarketExtractor::always(MarketData::price_only(4099.0)),
            MockWorklistSource::failing("offline"),
        )
    }

    async fn send(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = match body {
            Some(json) => Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_idle_runtime() {
        let (status, body) = send(app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["runtime_state"], "idle");
        assert_eq!(body["queue_depth"], 0);
    }

    #[tokio::test]
    async fn parse_returns_extraction_outcome() {
        let (status, body) = send(
            app(),
            "POST",
            "/parse",
            Some(serde_json::json!({"url": "https://shop.pl/p/1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["price"], 4099.0);
    }

    #[tokio::test]
    async fn parse_rejects_invalid_url() {
        let (status, body) = send(
            app(),
            "POST",
            "/parse",
            Some(serde_json::json!({"url": "not a url"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "error");
    }

    #[tokio::test]
    async fn parse_times_out_with_504() {
        let app = test_app(
            MockMarketExtractor::slow(MarketData::price_only(1.0), Duration::from_secs(5)),
            MockWorklistSource::failing("offline"),
        );
        let (status, body) = send(
            app,
            "POST",
            "/parse",
            Some(serde_json::json!({"url": "https://shop.pl/p/1", "timeoutMs": 20})),
        )
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], "job_timeout");
    }

    #[tokio::test]
    async fn parse_batch_returns_ordered_outcomes() {
        let (status, body) = send(
            app(),
            "POST",
            "/parse/batch",
            Some(serde_json::json!({
                "urls": ["https://shop.pl/p/1", "https://shop.pl/p/2", "https://shop.pl/p/3"]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let outcomes = body.as_array().unwrap();
        assert_eq!(outcomes.len(), 3);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome["id"], i.to_string());
            assert_eq!(outcome["data"]["price"], 4099.0);
        }
    }

    #[tokio::test]
    async fn run_now_returns_aborted_summary_when_source_is_down() {
        let (status, body) = send(app(), "POST", "/run-now", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], false);
        assert_eq!(body["total"], 0);
    }

    #[tokio::test]
    async fn run_now_checks_every_item() {
        let app = test_app(
            MockMarketExtractor::always(MarketData::price_only(1.0)),
            MockWorklistSource::with_items(vec![
                WorkItem {
                    id: "1".into(),
                    url: "https://shop.pl/p/1".into(),
                },
                WorkItem {
                    id: "2".into(),
                    url: "https://shop.pl/p/2".into(),
                },
            ]),
        );
        let (status, body) = send(app, "POST", "/run-now", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["total"], 2);
        assert_eq!(body["succeeded"], 2);
    }

    #[tokio::test]
    async fn resume_reports_runtime_state() {
        let (status, body) = send(app(), "POST", "/resume", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "idle");
    }
}
