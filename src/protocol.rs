//! Public protocol structs for the HTTP endpoints (serde ready).
//! Keep this small and stable to evolve the engine and its callers independently.

use serde::{Deserialize, Serialize};

use crate::domain::{GeneratedProblem, ProblemConfig};
use crate::error::{EngineError, ErrorCode};
use crate::grading::{AttemptState, GradeAnalysis};
use crate::value::Answer;

/// Envelope for every HTTP response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
  pub success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<T>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
  pub fn ok(data: T) -> Self {
    Self { success: true, data: Some(data), error: None }
  }

  pub fn err(e: &EngineError) -> Self {
    Self { success: false, data: None, error: Some(ApiError::from(e)) }
  }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ApiError {
  pub code: ErrorCode,
  pub message: String,
}

impl From<&EngineError> for ApiError {
  fn from(e: &EngineError) -> Self {
    Self { code: e.code(), message: e.to_string() }
  }
}

//
// Generation
//

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationPreferences {
  /// Try the AI path first; templates remain the fallback.
  #[serde(default)]
  pub ai_assisted: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
  pub config: ProblemConfig,
  pub user_id: String,
  #[serde(default)]
  pub session_id: Option<String>,
  #[serde(default)]
  pub seed: Option<u64>,
  #[serde(default)]
  pub preferences: Option<GenerationPreferences>,
}

/// A problem of the batch that could not be produced.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct GenerationError {
  pub index: u32,
  pub code: ErrorCode,
  pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
  pub success: bool,
  pub problems: Vec<GeneratedProblem>,
  pub generation_time_ms: u64,
  /// Base seed of the batch; replaying it with the same config gives the same problems.
  pub seed: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub warnings: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub errors: Option<Vec<GenerationError>>,
}

//
// Grading
//

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemGradeRequest {
  pub attempt_id: String,
  pub problem_id: String,
  pub user_id: String,
  pub submitted_answer: Answer,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
  pub explanation: String,
  pub gradable: bool,
  pub suggestions: Vec<String>,
  pub similar_answers: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemGradeResponse {
  pub is_correct: bool,
  pub score: f64,
  pub max_score: f64,
  pub feedback: Feedback,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub detailed_analysis: Option<GradeAnalysis>,
  pub attempt_state: AttemptState,
  pub attempt_total_score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIn {
  pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptIn {
  pub user_id: String,
  #[serde(default)]
  pub session_id: Option<String>,
  pub problem_ids: Vec<String>,
  #[serde(default)]
  pub time_limit_secs: Option<i64>,
}

/// Stateless check of one answer against a given canonical answer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateIn {
  pub canonical: Answer,
  pub submitted: Answer,
  #[serde(default)]
  pub equation: Option<String>,
}

#[derive(Serialize)]
pub struct HealthOut {
  pub ok: bool,
  pub ai: bool,
}
