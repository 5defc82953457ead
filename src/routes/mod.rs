//! Router assembly: HTTP endpoints, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - JSON API under `/api/v1/...`
/// - CORS (allow any origin/method/headers); tighten for production
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/problems/generate", post(http::http_post_generate))
        .route("/api/v1/problems/:id", get(http::http_get_problem))
        .route("/api/v1/sessions", post(http::http_post_session))
        .route("/api/v1/sessions/:id/statistics", get(http::http_get_session_statistics))
        .route("/api/v1/attempts", post(http::http_post_attempt))
        .route("/api/v1/attempts/:id", get(http::http_get_attempt))
        .route("/api/v1/grade", post(http::http_post_grade))
        .route("/api/v1/validate", post(http::http_post_validate))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::EngineConfig;

    fn app() -> Router {
        build_router(Arc::new(AppState::from_config(EngineConfig::default(), None)))
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ai_off() {
        let (status, body) = call(app(), "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "ai": false}));
    }

    #[tokio::test]
    async fn generate_then_fetch_and_grade() {
        let app = app();
        let req = json!({
            "config": {"type": "algebra", "difficulty": "beginner", "quantity": 1},
            "userId": "u1",
            "seed": 42
        });
        let (status, body) = call(app.clone(), "POST", "/api/v1/problems/generate", Some(req)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        let problem = &body["data"]["problems"][0]["problem"];
        let id = problem["id"].as_str().unwrap().to_string();
        assert_eq!(body["data"]["problems"][0]["provenance"]["generationMethod"], json!("template"));

        let (status, fetched) = call(app.clone(), "GET", &format!("/api/v1/problems/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&fetched["data"]["problem"], problem);

        let (_, attempt) =
            call(app.clone(), "POST", "/api/v1/attempts", Some(json!({"userId": "u1", "problemIds": [id.clone()]}))).await;
        let attempt_id = attempt["data"]["id"].as_str().unwrap().to_string();
        let grade = json!({
            "attemptId": attempt_id,
            "problemId": id,
            "userId": "u1",
            "submittedAnswer": problem["correctAnswer"].clone()
        });
        let (status, graded) = call(app.clone(), "POST", "/api/v1/grade", Some(grade.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(graded["data"]["isCorrect"], json!(true));
        assert_eq!(graded["data"]["attemptState"], json!("completed"));

        let (status, again) = call(app, "POST", "/api/v1/grade", Some(grade)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(again["error"]["code"], json!("CONFLICT"));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (status, body) = call(app(), "GET", "/api/v1/problems/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"]["code"], json!("NOT_FOUND"));
    }

    #[tokio::test]
    async fn validate_rejects_unset_tolerance() {
        let req = json!({
            "canonical": {"format": "NUMERIC", "value": 3.14159},
            "submitted": {"format": "NUMERIC", "value": 3.15, "tolerance": 0.0}
        });
        let (status, body) = call(app(), "POST", "/api/v1/validate", Some(req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], json!("VALIDATION_AMBIGUOUS"));

        let req = json!({
            "canonical": {"format": "NUMERIC", "value": 3.14159, "tolerance": 0.01},
            "submitted": {"format": "TEXT", "value": "3.15"}
        });
        let (status, body) = call(app(), "POST", "/api/v1/validate", Some(req)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isCorrect"], json!(true));
    }
}
