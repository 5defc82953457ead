//! Engine configuration (AI path, prompts, grading knobs, difficulty tables) from TOML.
//!
//! Every section is optional; anything missing takes the defaults below.
//!
//! ```toml
//! [ai]
//! timeout_ms = 8000
//! model = "gpt-4o-mini"
//!
//! [grading]
//! partial_credit_slope = 4.0
//! retention_secs = 86400
//!
//! [[difficulty]]
//! type = "arithmetic"
//! level = "beginner"
//! min_operand = 1
//! max_operand = 12
//! operations = 1
//! allow_negative = false
//! allow_fractions = false
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::domain::{DifficultyLevel, ProblemType};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct EngineConfig {
  #[serde(default)]
  pub ai: AiConfig,
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub grading: GradingConfig,
  #[serde(default)]
  pub difficulty: Vec<DifficultyOverride>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AiConfig {
  /// Master switch; the AI path also needs OPENAI_API_KEY.
  pub enabled: bool,
  /// Budget for one AI generation call before falling back to templates.
  pub timeout_ms: u64,
  /// Overrides OPENAI_MODEL.
  pub model: Option<String>,
}

impl Default for AiConfig {
  fn default() -> Self {
    Self { enabled: true, timeout_ms: 8_000, model: None }
  }
}

/// Prompts used by the OpenAI client.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub problem_system: String,
  pub problem_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      problem_system: "You write short math exercises. Respond ONLY with strict JSON.".into(),
      problem_user_template: "Write one {problem_type} exercise at {difficulty} level. Return JSON with fields: statement (the question in plain English), equation (a machine-checkable form: an arithmetic expression to evaluate, or a linear equation in x such as '3x + 4 = 19'), answer (the final numeric value or 'x = value').".into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GradingConfig {
  pub max_score: f64,
  /// NUMERIC partial credit: score falls by `slope` × relative error beyond tolerance.
  pub partial_credit_slope: f64,
  /// TEXT/SHORT_ANSWER edit distance that still counts as "close".
  pub similar_answer_distance: usize,
  /// LONG_ANSWER keyword coverage needed to pass.
  pub long_answer_pass_ratio: f64,
  pub attempt_time_limit_secs: i64,
  pub session_ttl_secs: i64,
  /// How long expired sessions, finished attempts and generated problems stay
  /// readable before the sweeper drops them.
  pub retention_secs: i64,
}

impl Default for GradingConfig {
  fn default() -> Self {
    Self {
      max_score: 100.0,
      partial_credit_slope: 5.0,
      similar_answer_distance: 2,
      long_answer_pass_ratio: 0.6,
      attempt_time_limit_secs: 30 * 60,
      session_ttl_secs: 2 * 60 * 60,
      retention_secs: 24 * 60 * 60,
    }
  }
}

/// Bounded ranges a generator draws from at one difficulty level.
/// `operations` is the structural size: operator count, polynomial degree,
/// data-set growth or matrix size depending on the generator.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct DifficultyParams {
  pub min_operand: i64,
  pub max_operand: i64,
  pub operations: u32,
  pub allow_negative: bool,
  pub allow_fractions: bool,
}

impl DifficultyParams {
  pub fn base(level: DifficultyLevel) -> Self {
    match level {
      DifficultyLevel::Beginner => Self { min_operand: 1, max_operand: 10, operations: 1, allow_negative: false, allow_fractions: false },
      DifficultyLevel::Intermediate => Self { min_operand: 1, max_operand: 20, operations: 2, allow_negative: false, allow_fractions: false },
      DifficultyLevel::Advanced => Self { min_operand: 1, max_operand: 50, operations: 3, allow_negative: true, allow_fractions: false },
      DifficultyLevel::Expert => Self { min_operand: 1, max_operand: 100, operations: 4, allow_negative: true, allow_fractions: true },
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DifficultyOverride {
  #[serde(rename = "type")]
  pub problem_type: ProblemType,
  pub level: DifficultyLevel,
  #[serde(flatten)]
  pub params: DifficultyParams,
}

/// Read-only table of difficulty ranges, shared by all generator calls.
#[derive(Clone, Debug)]
pub struct DifficultyTable {
  entries: HashMap<(ProblemType, DifficultyLevel), DifficultyParams>,
}

impl Default for DifficultyTable {
  fn default() -> Self {
    let mut entries = HashMap::new();
    for t in ProblemType::ALL {
      for l in DifficultyLevel::ALL {
        entries.insert((t, l), default_params(t, l));
      }
    }
    Self { entries }
  }
}

fn default_params(t: ProblemType, l: DifficultyLevel) -> DifficultyParams {
  let mut p = DifficultyParams::base(l);
  match t {
    ProblemType::LinearAlgebra => {
      p.max_operand = p.max_operand.min(9);
      p.operations = p.operations.min(3);
    }
    ProblemType::Calculus => {
      p.max_operand = p.max_operand.min(12);
    }
    ProblemType::Probability => {
      p.max_operand = p.max_operand.min(12);
    }
    ProblemType::Geometry | ProblemType::Trigonometry => {
      p.min_operand = p.min_operand.max(2);
    }
    _ => {}
  }
  p
}

impl DifficultyTable {
  pub fn with_overrides(overrides: &[DifficultyOverride]) -> Self {
    let mut table = Self::default();
    for o in overrides {
      if o.params.min_operand > o.params.max_operand {
        warn!(target: "mathgen", problem_type = %o.problem_type, level = %o.level, "Ignoring difficulty override with min_operand > max_operand");
        continue;
      }
      table.entries.insert((o.problem_type, o.level), o.params);
    }
    table
  }

  pub fn params(&self, t: ProblemType, l: DifficultyLevel) -> DifficultyParams {
    self.entries.get(&(t, l)).copied().unwrap_or_else(|| default_params(t, l))
  }
}

/// Attempt to load `EngineConfig` from ENGINE_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_engine_config_from_env() -> Option<EngineConfig> {
  let path = std::env::var("ENGINE_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<EngineConfig>(&s) {
      Ok(cfg) => {
        info!(target: "mathgen", %path, overrides = cfg.difficulty.len(), "Loaded engine config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "mathgen", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "mathgen", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn toml_overrides_apply() {
    let src = r#"
      [ai]
      timeout_ms = 50

      [[difficulty]]
      type = "arithmetic"
      level = "beginner"
      min_operand = 2
      max_operand = 5
      operations = 1
      allow_negative = false
      allow_fractions = false
    "#;
    let cfg: EngineConfig = toml::from_str(src).unwrap();
    assert_eq!(cfg.ai.timeout_ms, 50);
    assert!(cfg.ai.enabled);
    assert_eq!(cfg.grading, GradingConfig::default());
    let table = DifficultyTable::with_overrides(&cfg.difficulty);
    let p = table.params(ProblemType::Arithmetic, DifficultyLevel::Beginner);
    assert_eq!((p.min_operand, p.max_operand), (2, 5));
    let untouched = table.params(ProblemType::Arithmetic, DifficultyLevel::Expert);
    assert_eq!(untouched, DifficultyParams::base(DifficultyLevel::Expert));
  }

  #[test]
  fn beginner_is_small_and_positive() {
    let table = DifficultyTable::default();
    let p = table.params(ProblemType::Arithmetic, DifficultyLevel::Beginner);
    assert!(p.min_operand > 0 && p.max_operand <= 10);
    assert_eq!(p.operations, 1);
    assert!(!p.allow_negative && !p.allow_fractions);
  }
}
