//! Domain models: problem configuration, problems, solutions and provenance.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::value::{Answer, ShapeKind};

/// Upper bound on `quantity` for a single request.
pub const MAX_BATCH: u32 = 50;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
  Arithmetic,
  Algebra,
  Geometry,
  Trigonometry,
  Calculus,
  Statistics,
  Probability,
  LinearAlgebra,
  WordProblems,
}

impl ProblemType {
  pub const ALL: [ProblemType; 9] = [
    ProblemType::Arithmetic,
    ProblemType::Algebra,
    ProblemType::Geometry,
    ProblemType::Trigonometry,
    ProblemType::Calculus,
    ProblemType::Statistics,
    ProblemType::Probability,
    ProblemType::LinearAlgebra,
    ProblemType::WordProblems,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      ProblemType::Arithmetic => "arithmetic",
      ProblemType::Algebra => "algebra",
      ProblemType::Geometry => "geometry",
      ProblemType::Trigonometry => "trigonometry",
      ProblemType::Calculus => "calculus",
      ProblemType::Statistics => "statistics",
      ProblemType::Probability => "probability",
      ProblemType::LinearAlgebra => "linear_algebra",
      ProblemType::WordProblems => "word_problems",
    }
  }
}

impl fmt::Display for ProblemType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
  Beginner,
  Intermediate,
  Advanced,
  Expert,
}

impl DifficultyLevel {
  pub const ALL: [DifficultyLevel; 4] = [
    DifficultyLevel::Beginner,
    DifficultyLevel::Intermediate,
    DifficultyLevel::Advanced,
    DifficultyLevel::Expert,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      DifficultyLevel::Beginner => "beginner",
      DifficultyLevel::Intermediate => "intermediate",
      DifficultyLevel::Advanced => "advanced",
      DifficultyLevel::Expert => "expert",
    }
  }
}

impl fmt::Display for DifficultyLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// What the caller asks the generator for.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProblemConfig {
  #[serde(rename = "type")]
  pub problem_type: ProblemType,
  pub difficulty: DifficultyLevel,
  #[serde(default = "default_quantity")]
  pub quantity: u32,
  #[serde(default = "default_true")]
  pub include_steps: bool,
  #[serde(default)]
  pub include_hints: bool,
  #[serde(default)]
  pub allow_multiple_choice: bool,
  /// Generator-specific knobs; unknown keys are rejected by the generator.
  #[serde(default)]
  pub custom_parameters: BTreeMap<String, serde_json::Value>,
}

fn default_quantity() -> u32 {
  1
}

fn default_true() -> bool {
  true
}

impl ProblemConfig {
  pub fn new(problem_type: ProblemType, difficulty: DifficultyLevel) -> Self {
    Self {
      problem_type,
      difficulty,
      quantity: 1,
      include_steps: true,
      include_hints: false,
      allow_multiple_choice: false,
      custom_parameters: BTreeMap::new(),
    }
  }

  pub fn with_param(mut self, key: &str, value: serde_json::Value) -> Self {
    self.custom_parameters.insert(key.to_string(), value);
    self
  }

  pub fn validate(&self) -> EngineResult<()> {
    if self.quantity == 0 || self.quantity > MAX_BATCH {
      return Err(EngineError::unsupported(format!(
        "quantity must be between 1 and {MAX_BATCH}, got {}",
        self.quantity
      )));
    }
    Ok(())
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
  Area,
  Perimeter,
}

impl Measure {
  pub fn as_str(self) -> &'static str {
    match self {
      Measure::Area => "area",
      Measure::Perimeter => "perimeter",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s.trim() {
      "area" => Some(Measure::Area),
      "perimeter" => Some(Measure::Perimeter),
      _ => None,
    }
  }
}

/// Structured figure attached to geometry problems.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Diagram {
  pub shape: ShapeKind,
  /// Known dimensions only; an unknown being solved for is absent.
  pub dimensions: BTreeMap<String, f64>,
}

/// Why a learner's answer went wrong. Generators advertise the categories
/// their distractors model; the grading analysis recognises them in submissions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MistakeCategory {
  SignError,
  OffByOne,
  OrderOfOperations,
  SwappedOperands,
  Reciprocal,
  MagnitudeError,
  Rounding,
  WrongFormula,
  AngleMode,
  TransposedResult,
  DimensionMismatch,
  FormatMismatch,
  Unparseable,
  Conceptual,
}

impl MistakeCategory {
  pub fn label(self) -> &'static str {
    match self {
      MistakeCategory::SignError => "sign error",
      MistakeCategory::OffByOne => "off-by-one",
      MistakeCategory::OrderOfOperations => "order-of-operations",
      MistakeCategory::SwappedOperands => "swapped operands",
      MistakeCategory::Reciprocal => "inverted fraction",
      MistakeCategory::MagnitudeError => "magnitude error",
      MistakeCategory::Rounding => "rounding",
      MistakeCategory::WrongFormula => "wrong formula",
      MistakeCategory::AngleMode => "degrees vs radians",
      MistakeCategory::TransposedResult => "transposed result",
      MistakeCategory::DimensionMismatch => "dimension mismatch",
      MistakeCategory::FormatMismatch => "answer format",
      MistakeCategory::Unparseable => "unreadable answer",
      MistakeCategory::Conceptual => "conceptual",
    }
  }

  pub fn suggestion(self) -> &'static str {
    match self {
      MistakeCategory::SignError => "Check the sign of each term when moving it across the equals sign or subtracting.",
      MistakeCategory::OffByOne => "Recount carefully; the answer is one away from the correct value.",
      MistakeCategory::OrderOfOperations => "Apply multiplication and division before addition and subtraction, and respect parentheses.",
      MistakeCategory::SwappedOperands => "Keep the operands in the order given; subtraction and division are not commutative.",
      MistakeCategory::Reciprocal => "You divided the wrong way round; check which quantity is the numerator.",
      MistakeCategory::MagnitudeError => "The digits look right but the magnitude is off; check decimal places and powers of ten.",
      MistakeCategory::Rounding => "You are close; round only at the last step and to the required precision.",
      MistakeCategory::WrongFormula => "Revisit which formula applies to this figure or quantity.",
      MistakeCategory::AngleMode => "Angles here are in degrees; make sure your calculator is not in radian mode.",
      MistakeCategory::TransposedResult => "Rows and columns are swapped; check the orientation of the result.",
      MistakeCategory::DimensionMismatch => "The result has the wrong shape; check the dimensions of each operand.",
      MistakeCategory::FormatMismatch => "Answer in the format the question asks for.",
      MistakeCategory::Unparseable => "Write the answer as a number or a well-formed expression.",
      MistakeCategory::Conceptual => "Work through the solution steps and compare them with your own.",
    }
  }
}

/// Closed vocabulary of solution-step operations.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StepOperation {
  // arithmetic
  Add,
  Subtract,
  Multiply,
  Divide,
  Exponentiate,
  Evaluate,
  // algebra
  Simplify,
  CollectLikeTerms,
  IsolateVariable,
  DivideBothSides,
  Substitute,
  // geometry
  ApplyFormula,
  SolveForUnknown,
  // trigonometry
  ApplyTrigRatio,
  // calculus
  Differentiate,
  Integrate,
  EvaluateBounds,
  // statistics
  Sum,
  Sort,
  SelectMiddle,
  // probability
  CountOutcomes,
  MultiplyProbabilities,
  // linear algebra
  MatrixAdd,
  MatrixMultiply,
  Transpose,
  Determinant,
  // word problems
  Translate,
  // shared
  Verify,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MathExpression {
  pub expression: String,
  /// Numeric value when the expression is a constant.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MathStep {
  pub step_number: u32,
  pub expression: MathExpression,
  pub operation: StepOperation,
  pub justification: String,
  /// The step restates the previous step's quantity in reduced form, so both
  /// evaluate to the same value.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub rewrites_previous: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MathSolution {
  pub steps: Vec<MathStep>,
  pub final_answer: Answer,
}

/// Immutable once generated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
  pub id: String,
  #[serde(rename = "type")]
  pub problem_type: ProblemType,
  pub difficulty: DifficultyLevel,
  pub problem_statement: String,
  #[serde(default)]
  pub equation: Option<String>,
  #[serde(default)]
  pub diagram: Option<Diagram>,
  pub correct_answer: Answer,
  #[serde(default)]
  pub alternatives: Option<Vec<Answer>>,
  #[serde(default)]
  pub steps: Vec<MathStep>,
  #[serde(default)]
  pub hints: Vec<String>,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub concepts: Vec<String>,
  #[serde(default)]
  pub common_mistakes: Vec<MistakeCategory>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMethod {
  Template,
  AiAssisted,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationProvenance {
  pub problem_id: String,
  pub generation_method: GenerationMethod,
  pub seed: u64,
  #[serde(default)]
  pub ai_model: Option<String>,
}

/// A problem plus where it came from. Provenance never changes the problem.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeneratedProblem {
  pub problem: Problem,
  pub provenance: GenerationProvenance,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn config_defaults_from_json() {
    let cfg: ProblemConfig = serde_json::from_str(r#"{"type":"algebra","difficulty":"beginner"}"#).unwrap();
    assert_eq!(cfg.quantity, 1);
    assert!(cfg.include_steps);
    assert!(!cfg.allow_multiple_choice);
    assert!(cfg.validate().is_ok());
  }

  #[test]
  fn quantity_bounds() {
    let mut cfg = ProblemConfig::new(ProblemType::Arithmetic, DifficultyLevel::Expert);
    cfg.quantity = 0;
    assert!(matches!(cfg.validate(), Err(EngineError::UnsupportedConfig(_))));
    cfg.quantity = MAX_BATCH + 1;
    assert!(cfg.validate().is_err());
  }

  #[test]
  fn step_operations_are_kebab_case() {
    let s = serde_json::to_string(&StepOperation::IsolateVariable).unwrap();
    assert_eq!(s, "\"isolate-variable\"");
  }
}
