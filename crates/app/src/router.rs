use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;

use estate_desk_core::{CodeAllocator, FollowUpSchedule, HighlightQuota};
use estate_desk_storage::Database;

use crate::issuer::CodeIssuer;
use crate::problem::ProblemResponse;
use crate::session::SessionVerifier;
use crate::{leads, properties, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    sessions: SessionVerifier,
    issuer: CodeIssuer,
    schedule: FollowUpSchedule,
    highlight_quota: HighlightQuota,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        sessions: SessionVerifier,
        allocator: CodeAllocator,
        schedule: FollowUpSchedule,
        highlight_quota: HighlightQuota,
    ) -> Self {
        let issuer = CodeIssuer::new(allocator, storage.codes());
        Self {
            metrics,
            storage,
            clock: Arc::new(Utc::now),
            sessions,
            issuer,
            schedule,
            highlight_quota,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn sessions(&self) -> &SessionVerifier {
        &self.sessions
    }

    pub fn issuer(&self) -> &CodeIssuer {
        &self.issuer
    }

    pub fn schedule(&self) -> &FollowUpSchedule {
        &self.schedule
    }

    pub fn highlight_quota(&self) -> HighlightQuota {
        self.highlight_quota
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(
            "/api/properties",
            get(properties::list).post(properties::create),
        )
        .route(
            "/api/properties/:id",
            get(properties::fetch)
                .patch(properties::update)
                .delete(properties::remove),
        )
        .route("/api/properties/:id/highlight", put(properties::highlight))
        .route("/api/leads", get(leads::list).post(leads::create))
        .route("/api/leads/overdue", get(leads::overdue))
        .route(
            "/api/leads/:id",
            get(leads::fetch).patch(leads::update).delete(leads::remove),
        )
        .route("/api/leads/:id/contact", post(leads::contact))
        .with_state(state)
}

/// Counts an API call by route and outcome, passing the result through.
pub(crate) fn observe(
    route: &'static str,
    result: Result<Response, ProblemResponse>,
) -> Result<Response, ProblemResponse> {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(problem) if problem.status().is_client_error() => "rejected",
        Err(_) => "error",
    };
    counter!("api_requests_total", "route" => route, "result" => outcome).increment(1);
    result
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> Response {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn api_requires_a_session() {
        let app = app_router(setup_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/properties")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }

    #[tokio::test]
    async fn session_is_checked_before_query_string() {
        let state = setup_state().await;

        for uri in ["/api/properties?limit=abc", "/api/leads/overdue?limit=abc"] {
            let response = app_router(state.clone())
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .expect("handler should respond");
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(
                response.headers().get(header::CONTENT_TYPE).unwrap(),
                "application/problem+json"
            );
        }

        let (status, body) = send(&state, "GET", "/api/properties?highlighted=yes", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "invalid_payload");
        let (status, body) = send(&state, "GET", "/api/leads?limit=abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "invalid_payload");
    }

    #[tokio::test]
    async fn expired_sessions_are_rejected() {
        let state = setup_state().await;
        let stale = bearer("agent-1", fixed_now() - chrono::Duration::hours(2));

        let response = app_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/leads")
                    .header(header::AUTHORIZATION, stale)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let collected = response.into_body().collect().await.expect("body");
        let body: serde_json::Value = serde_json::from_slice(&collected.to_bytes()).expect("json");
        assert_eq!(body["type"], "session_expired");
    }

    #[test]
    fn observe_passes_results_through() {
        let ok = observe("test.route", Ok(StatusCode::NO_CONTENT.into_response()));
        assert_eq!(ok.unwrap().status(), StatusCode::NO_CONTENT);

        let rejected = observe(
            "test.route",
            Err(ProblemResponse::not_found("missing")),
        );
        assert_eq!(rejected.unwrap_err().status(), StatusCode::NOT_FOUND);
    }
}
