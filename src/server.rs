// Scrape Server
// HTTP surface: the metrics scrape target plus a health probe.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::aggregator::{self, AggregateError};
use crate::config::Config;
use crate::exporter::{self, ExportError};
use crate::repository::TransactionRepository;

/// Shared application state. Holds no metric values: every scrape recomputes
/// from the repository.
#[derive(Clone)]
pub struct AppState {
    repo: Arc<dyn TransactionRepository>,
    window: chrono::Duration,
    scrape_timeout: Duration,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn TransactionRepository>,
        window: chrono::Duration,
        scrape_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            window,
            scrape_timeout,
        }
    }

    pub fn from_config(repo: Arc<dyn TransactionRepository>, config: &Config) -> Self {
        Self::new(repo, config.window, config.scrape_timeout)
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("scrape timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("aggregation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ScrapeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Aggregate(AggregateError::Repository(e)) if e.is_transient() => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ScrapeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            warn!(error = %self, "scrape failed");
        } else {
            error!(error = %self, "scrape failed");
        }

        // One line of plain text; never a partial exposition document
        (status, format!("failed to collect metrics: {}\n", self)).into_response()
    }
}

/// Aggregate and render one snapshot. The blocking repository read runs off
/// the async workers and is abandoned once `scrape_timeout` elapses.
pub async fn collect_snapshot(state: &AppState) -> Result<String, ScrapeError> {
    let repo = Arc::clone(&state.repo);
    let window = state.window;
    let task = tokio::task::spawn_blocking(move || aggregator::compute_now(repo.as_ref(), window));

    let aggregates = tokio::time::timeout(state.scrape_timeout, task)
        .await
        .map_err(|_| ScrapeError::Timeout(state.scrape_timeout))???;

    Ok(exporter::render_api_transactions(&aggregates)?)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /metrics - Scrape target
async fn scrape_metrics(State(state): State<AppState>) -> Result<Response, ScrapeError> {
    let body = collect_snapshot(&state).await?;

    Ok(([(header::CONTENT_TYPE, exporter::CONTENT_TYPE)], body).into_response())
}

/// GET /health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

pub fn router(state: AppState, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(scrape_metrics))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_or_create_api, get_or_create_status, insert_transaction_at, setup_database};
    use crate::repository::{RepositoryError, SqliteRepository, TransactionRecord};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::{DateTime, Utc};
    use rusqlite::Connection;
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    enum FakeRepository {
        Fails(fn() -> RepositoryError),
        Slow(Duration),
    }

    impl TransactionRepository for FakeRepository {
        fn list_transactions_modified_since(
            &self,
            _since: DateTime<Utc>,
        ) -> Result<Vec<TransactionRecord>, RepositoryError> {
            match self {
                Self::Fails(make_error) => Err(make_error()),
                Self::Slow(delay) => {
                    std::thread::sleep(*delay);
                    Ok(Vec::new())
                }
            }
        }
    }

    fn app_with(repo: Arc<dyn TransactionRepository>, scrape_timeout: Duration) -> Router {
        let state = AppState::new(repo, aggregator::default_window(), scrape_timeout);
        router(state, "/metrics")
    }

    fn scenario_repository() -> SqliteRepository {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let express = get_or_create_api(&conn, "Mpesa Express", "Mpesa Express", &serde_json::json!({})).unwrap();
        let b2c = get_or_create_api(&conn, "Mpesa B2C", "Mpesa B2C", &serde_json::json!({})).unwrap();
        let processed = get_or_create_status(&conn, "Processed", "Processed").unwrap();
        let failed = get_or_create_status(&conn, "Failed", "Failed").unwrap();

        let now = Utc::now();
        insert_transaction_at(&conn, express.id, processed.id, dec!(250.00), now).unwrap();
        insert_transaction_at(&conn, express.id, processed.id, dec!(300.10), now).unwrap();
        insert_transaction_at(&conn, b2c.id, failed.id, dec!(999.99), now).unwrap();

        SqliteRepository::new(conn)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_scrape_renders_current_window() {
        let app = app_with(Arc::new(scenario_repository()), Duration::from_secs(5));

        let (status, content_type, body) = get(app, "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(exporter::CONTENT_TYPE));
        assert!(body.starts_with("# HELP api_transactions "));
        assert!(body.contains("# TYPE api_transactions gauge\n"));
        assert!(body.contains("api_transactions{api=\"Mpesa Express\",status=\"Processed\"} 2\n"));
        assert!(body.contains("api_transactions{api=\"Mpesa B2C\",status=\"Failed\"} 1\n"));
    }

    #[tokio::test]
    async fn test_repository_timeout_returns_server_error() {
        let app = app_with(
            Arc::new(FakeRepository::Fails(|| RepositoryError::Timeout)),
            Duration::from_secs(5),
        );

        let (status, _, body) = get(app, "/metrics").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.contains("api_transactions"));
    }

    #[tokio::test]
    async fn test_slow_repository_hits_scrape_timeout() {
        let app = app_with(
            Arc::new(FakeRepository::Slow(Duration::from_millis(500))),
            Duration::from_millis(20),
        );

        let (status, _, body) = get(app, "/metrics").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.contains("# TYPE"));
    }

    #[tokio::test]
    async fn test_integrity_fault_returns_internal_error() {
        let app = app_with(
            Arc::new(FakeRepository::Fails(|| RepositoryError::DanglingReference {
                transaction_id: 3,
                relation: "api",
            })),
            Duration::from_secs(5),
        );

        let (status, _, body) = get(app, "/metrics").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("api_transactions"));
    }

    #[tokio::test]
    async fn test_failed_scrape_does_not_poison_later_scrapes() {
        let flaky = app_with(
            Arc::new(FakeRepository::Fails(|| RepositoryError::Unavailable("gone".into()))),
            Duration::from_secs(5),
        );
        let (status, _, _) = get(flaky, "/metrics").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let healthy = app_with(Arc::new(scenario_repository()), Duration::from_secs(5));
        let (first, _, body_a) = get(healthy.clone(), "/metrics").await;
        let (second, _, body_b) = get(healthy, "/metrics").await;

        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::OK);
        assert_eq!(body_a, body_b);
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = app_with(Arc::new(FakeRepository::Slow(Duration::ZERO)), Duration::from_secs(1));

        let (status, _, body) = get(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"success":true,"data":"OK"}"#);
    }
}
