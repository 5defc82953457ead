//! Engine error taxonomy.
//!
//! Configuration-time problems (`UnsupportedConfig`, `ValidationAmbiguous`) are
//! rejected outright. `SolutionMismatch` is fatal for a single problem instance.
//! `Parse` never reaches a learner as a hard failure: the validator turns it into
//! an ungradable result. `GenerationTimeout` only ever triggers the template fallback.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
  #[error("unsupported configuration: {0}")]
  UnsupportedConfig(String),

  #[error("solution mismatch: expected {expected}, solver derived {derived}")]
  SolutionMismatch { expected: String, derived: String },

  #[error("parse error at {position}: {message}")]
  Parse { message: String, position: usize },

  #[error("AI generation exceeded {budget_ms} ms")]
  GenerationTimeout { budget_ms: u64 },

  #[error("ambiguous validation rule: {0}")]
  ValidationAmbiguous(String),

  #[error("AI generation failed: {0}")]
  AiGeneration(String),

  #[error("unknown attempt: {0}")]
  UnknownAttempt(String),

  #[error("unknown problem: {0}")]
  UnknownProblem(String),

  #[error("unknown session: {0}")]
  UnknownSession(String),

  #[error("attempt {attempt_id} is {state} and no longer accepts answers")]
  AttemptClosed { attempt_id: String, state: String },

  #[error("problem {problem_id} was already answered in attempt {attempt_id}")]
  AlreadyAnswered { attempt_id: String, problem_id: String },

  #[error("internal error: {0}")]
  Internal(String),
}

/// Error codes handed to the HTTP wrapper for its envelope.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
  InvalidConfig,
  SolutionMismatch,
  ParseError,
  GenerationTimeout,
  ValidationAmbiguous,
  GenerationFailed,
  NotFound,
  Conflict,
}

impl EngineError {
  pub fn parse(message: impl Into<String>, position: usize) -> Self {
    Self::Parse { message: message.into(), position }
  }

  pub fn unsupported(message: impl Into<String>) -> Self {
    Self::UnsupportedConfig(message.into())
  }

  pub fn code(&self) -> ErrorCode {
    match self {
      Self::UnsupportedConfig(_) => ErrorCode::InvalidConfig,
      Self::SolutionMismatch { .. } => ErrorCode::SolutionMismatch,
      Self::Parse { .. } => ErrorCode::ParseError,
      Self::GenerationTimeout { .. } => ErrorCode::GenerationTimeout,
      Self::ValidationAmbiguous(_) => ErrorCode::ValidationAmbiguous,
      Self::AiGeneration(_) | Self::Internal(_) => ErrorCode::GenerationFailed,
      Self::UnknownAttempt(_) | Self::UnknownProblem(_) | Self::UnknownSession(_) => ErrorCode::NotFound,
      Self::AttemptClosed { .. } | Self::AlreadyAnswered { .. } => ErrorCode::Conflict,
    }
  }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn codes_follow_taxonomy() {
    assert_eq!(EngineError::unsupported("x").code(), ErrorCode::InvalidConfig);
    assert_eq!(EngineError::parse("bad", 3).code(), ErrorCode::ParseError);
    assert_eq!(EngineError::UnknownAttempt("a".into()).code(), ErrorCode::NotFound);
    let e = EngineError::SolutionMismatch { expected: "4".into(), derived: "5".into() };
    assert_eq!(e.to_string(), "solution mismatch: expected 4, solver derived 5");
  }
}
