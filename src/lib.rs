//! mathgen · math problem generation, solving and validation engine
//!
//! - `generators`: one deterministic generator per problem type
//! - `solver`: step-by-step solutions that re-derive and check each answer
//! - `validator`: format-aware answer equivalence and scoring
//! - `grading`: attempts, sessions and their statistics
//! - `routes`: the thin axum surface used by the `mathgen-server` binary

pub mod config;
pub mod domain;
pub mod error;
pub mod expr;
pub mod generators;
pub mod grading;
pub mod logic;
pub mod openai;
pub mod protocol;
pub mod routes;
pub mod solver;
pub mod state;
pub mod telemetry;
pub mod util;
pub mod validator;
pub mod value;

pub use domain::{GeneratedProblem, Problem, ProblemConfig};
pub use error::{EngineError, EngineResult};
pub use generators::GeneratorSet;
pub use validator::{AnswerValidationResult, Validator};
pub use value::Answer;
