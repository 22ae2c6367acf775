//! HTTP API endpoints

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use logsink_core::flush::FlushReport;
use logsink_core::pipeline::{Pipeline, PipelineStatus};
use logsink_core::{EventRecord, SinkError};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

/// Application state
pub type AppState = Arc<Pipeline>;

/// Create the API router
pub fn create_router(pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health))
        .route("/ping", get(ping))
        // Ingestion
        .route("/log", post(ingest))
        .route("/flush", post(flush))
        // Stats
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

// ============================================================================
// Request/Response types
// ============================================================================

/// Body of `POST /log`
#[derive(Debug, Deserialize)]
pub struct LogRequest {
    pub unix_ts: i64,
    pub user_id: i64,
    pub event_name: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error carrying its HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<SinkError> for ApiError {
    fn from(err: SinkError) -> Self {
        Self {
            status: status_for(&err),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        if self.status == StatusCode::SERVICE_UNAVAILABLE {
            (self.status, [(header::RETRY_AFTER, "1")], body).into_response()
        } else {
            (self.status, body).into_response()
        }
    }
}

/// HTTP status for a pipeline error
pub fn status_for(err: &SinkError) -> StatusCode {
    match err {
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        SinkError::Backpressure { .. } | SinkError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: logsink_core::VERSION.to_string(),
    })
}

async fn ping() -> &'static str {
    "pong"
}

async fn ingest(State(pipeline): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let request: LogRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Failed to decode log data: {}", e)))?;

    let record = EventRecord::new(request.unix_ts, request.user_id, request.event_name)?;
    debug!("Received {}", record);

    pipeline.ingest(record).await.map_err(|e| {
        warn!("Rejected log event: {}", e);
        ApiError::from(e)
    })?;

    Ok(StatusCode::OK)
}

async fn flush(State(pipeline): State<AppState>) -> Result<Json<FlushReport>, ApiError> {
    let report = pipeline.flush().await.map_err(|e| {
        error!("Manual flush failed: {}", e);
        ApiError::from(e)
    })?;
    Ok(Json(report))
}

async fn stats(State(pipeline): State<AppState>) -> Json<PipelineStatus> {
    Json(pipeline.status())
}

async fn metrics(State(pipeline): State<AppState>) -> String {
    render_metrics(&pipeline.status())
}

/// Prometheus text exposition of the pipeline status
fn render_metrics(status: &PipelineStatus) -> String {
    let counters = &status.counters;
    let series: [(&str, &str, &str, u64); 12] = [
        ("logsink_queue_length", "gauge", "Records waiting in the event queue", status.queue_len as u64),
        ("logsink_queue_capacity", "gauge", "Event queue capacity", status.queue_capacity as u64),
        ("logsink_journal_bytes", "gauge", "Size of the active journal file", status.journal_bytes),
        ("logsink_pending_segments", "gauge", "Sealed journal segments awaiting commit", status.pending_segments as u64),
        ("logsink_events_accepted_total", "counter", "Events accepted into the queue", counters.accepted),
        ("logsink_events_rejected_total", "counter", "Events rejected by backpressure or shutdown", counters.rejected),
        ("logsink_events_appended_total", "counter", "Events appended to the journal", counters.appended),
        ("logsink_events_dropped_total", "counter", "Events lost to journal write failures", counters.dropped),
        ("logsink_flushes_total", "counter", "Successful flushes", counters.flushes),
        ("logsink_flush_failures_total", "counter", "Failed flushes", counters.flush_failures),
        ("logsink_events_committed_total", "counter", "Events committed to the store", counters.committed),
        ("logsink_lines_skipped_total", "counter", "Malformed journal lines skipped", counters.skipped),
    ];

    let mut output = String::new();
    for (name, kind, help, value) in series {
        let _ = writeln!(output, "# HELP {} {}", name, help);
        let _ = writeln!(output, "# TYPE {} {}", name, kind);
        let _ = writeln!(output, "{} {}", name, value);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use logsink_core::journal::JournalConfig;
    use logsink_core::pipeline::PipelineConfig;
    use logsink_core::store::MemoryStore;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn setup() -> (TempDir, MemoryStore, Arc<Pipeline>) {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let config = PipelineConfig {
            journal: JournalConfig::new(temp_dir.path().join("logs.ndjson")),
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let pipeline = Arc::new(Pipeline::start(config, Arc::new(store.clone())).unwrap());
        (temp_dir, store, pipeline)
    }

    fn post_log(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/log")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn error_message(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_log_is_accepted_and_committed() {
        let (_dir, store, pipeline) = setup();
        let app = create_router(pipeline.clone());

        let response = app
            .oneshot(post_log(
                r#"{"unix_ts": 1700000000, "user_id": 42, "event_name": "login"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        pipeline.shutdown().await.unwrap();
        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject_id(), 42);
        assert_eq!(rows[0].event_name(), "login");
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let (_dir, store, pipeline) = setup();
        let app = create_router(pipeline.clone());

        let response = app.oneshot(post_log("{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(error_message(response).await.contains("Failed to decode"));

        pipeline.shutdown().await.unwrap();
        assert_eq!(store.row_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_field_is_rejected() {
        let (_dir, _store, pipeline) = setup();
        let app = create_router(pipeline.clone());

        let response = app
            .oneshot(post_log(r#"{"unix_ts": 1700000000, "event_name": "login"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(error_message(response).await.contains("user_id"));

        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_event_name_is_rejected() {
        let (_dir, _store, pipeline) = setup();
        let app = create_router(pipeline.clone());

        let response = app
            .oneshot(post_log(
                r#"{"unix_ts": 1700000000, "user_id": 1, "event_name": "  "}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(pipeline.stats().accepted, 0);

        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_log_after_shutdown_is_unavailable() {
        let (_dir, _store, pipeline) = setup();
        pipeline.shutdown().await.unwrap();
        let app = create_router(pipeline.clone());

        let response = app
            .oneshot(post_log(
                r#"{"unix_ts": 1700000000, "user_id": 1, "event_name": "late"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }

    #[tokio::test]
    async fn test_manual_flush_and_metrics() {
        let (_dir, store, pipeline) = setup();
        for i in 0..3 {
            pipeline
                .ingest(EventRecord::new(1_700_000_000 + i, i, "click").unwrap())
                .await
                .unwrap();
        }
        while pipeline.stats().appended < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let app = create_router(pipeline.clone());
        let response = app
            .clone()
            .oneshot(Request::post("/flush").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let report: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(report["trigger"], "manual");
        assert_eq!(report["committed"], 3);
        assert_eq!(store.row_count(), 3);

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("logsink_events_committed_total 3"));
        assert!(text.contains("# TYPE logsink_queue_length gauge"));

        pipeline.shutdown().await.unwrap();
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&SinkError::InvalidRecord("empty".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&SinkError::Backpressure { capacity: 10 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for(&SinkError::QueueClosed), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&SinkError::Transaction("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
