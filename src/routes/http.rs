//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs its parameters and basic result info.
//! Engine errors become an `ApiResponse` envelope with a matching status code.

use std::sync::Arc;

use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;
use tracing::{info, instrument};

use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::logic::{generate_problems, grade_submission, open_attempt};
use crate::protocol::*;
use crate::state::AppState;

fn status_for(code: ErrorCode) -> StatusCode {
  match code {
    ErrorCode::InvalidConfig | ErrorCode::ParseError | ErrorCode::ValidationAmbiguous => StatusCode::BAD_REQUEST,
    ErrorCode::NotFound => StatusCode::NOT_FOUND,
    ErrorCode::Conflict => StatusCode::CONFLICT,
    ErrorCode::GenerationTimeout => StatusCode::GATEWAY_TIMEOUT,
    ErrorCode::SolutionMismatch | ErrorCode::GenerationFailed => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

fn respond<T: Serialize>(result: EngineResult<T>) -> Response {
  match result {
    Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))).into_response(),
    Err(e) => (status_for(e.code()), Json(ApiResponse::<T>::err(&e))).into_response(),
  }
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, ai: state.ai_available() })
}

#[instrument(level = "info", skip(state, body), fields(problem_type = %body.config.problem_type, quantity = body.config.quantity))]
pub async fn http_post_generate(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerationRequest>,
) -> Response {
  let result = generate_problems(&state, body).await;
  info!(target: "generator", generated = result.problems.len(), ms = result.generation_time_ms, "HTTP generate served");
  let status = if result.success { StatusCode::OK } else { StatusCode::UNPROCESSABLE_ENTITY };
  let error = if result.success {
    None
  } else {
    result.errors.as_ref().and_then(|e| e.first()).map(|e| ApiError { code: e.code, message: e.message.clone() })
  };
  (status, Json(ApiResponse { success: result.success, data: Some(result), error })).into_response()
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_get_problem(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
  respond(state.get_problem(&id).await.ok_or(EngineError::UnknownProblem(id)))
}

#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id))]
pub async fn http_post_session(State(state): State<Arc<AppState>>, Json(body): Json<SessionIn>) -> Response {
  respond(Ok(state.grading.start_session(&body.user_id).await))
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_get_session_statistics(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
  respond(state.grading.session_statistics(&id).await)
}

#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id))]
pub async fn http_post_attempt(State(state): State<Arc<AppState>>, Json(body): Json<AttemptIn>) -> Response {
  respond(open_attempt(&state, body).await)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_get_attempt(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
  respond(state.grading.attempt(&id).await)
}

#[instrument(level = "info", skip(state, body), fields(attempt_id = %body.attempt_id, problem_id = %body.problem_id))]
pub async fn http_post_grade(State(state): State<Arc<AppState>>, Json(body): Json<ProblemGradeRequest>) -> Response {
  let result = grade_submission(&state, body).await;
  if let Ok(r) = &result {
    info!(target: "grading", correct = r.is_correct, score = r.score, "HTTP grade served");
  }
  respond(result)
}

#[instrument(level = "info", skip(state, body))]
pub async fn http_post_validate(State(state): State<Arc<AppState>>, Json(body): Json<ValidateIn>) -> Response {
  let result = body
    .canonical
    .require_tolerance()
    .map(|_| state.validator.validate(&body.canonical, &body.submitted, body.equation.as_deref(), &[]));
  respond(result)
}
