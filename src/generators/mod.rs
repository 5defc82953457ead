//! Generator set: one generator per `ProblemType`, each a pure function of
//! `(ProblemConfig, seed)`.
//!
//! Flow for one problem:
//! 1) Resolve difficulty ranges (table entry, then `customParameters` overrides).
//! 2) Seed a ChaCha20 RNG; everything random (id, operands, option order) comes from it.
//! 3) The type's generator drafts statement, machine-readable equation, canonical
//!    answer and common-mistake distractors.
//! 4) Optionally wrap the answer into a multiple-choice question.
//!
//! Steps are not attached here; the solver recomputes them independently.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::{DifficultyParams, DifficultyTable};
use crate::domain::{Diagram, DifficultyLevel, MistakeCategory, Problem, ProblemConfig, ProblemType};
use crate::error::{EngineError, EngineResult};
use crate::validator::answers_equivalent;
use crate::value::Answer;

pub mod algebra;
pub mod arithmetic;
pub mod calculus;
pub mod geometry;
pub mod linear_algebra;
pub mod probability;
pub mod statistics;
pub mod trigonometry;
pub mod word_problems;

/// Range keys every generator accepts in `customParameters`.
const SHARED_KEYS: [&str; 5] = ["minOperand", "maxOperand", "operations", "allowNegative", "allowFractions"];
const CHOICE_LABELS: [&str; 4] = ["A", "B", "C", "D"];
const DISTRACTORS_WANTED: usize = 3;

/// A wrong answer modelled on a specific learner mistake.
#[derive(Clone, Debug)]
pub struct Distractor {
  pub answer: Answer,
  pub mistake: MistakeCategory,
}

impl Distractor {
  pub fn new(answer: Answer, mistake: MistakeCategory) -> Self {
    Self { answer, mistake }
  }
}

/// What a generator produces before packaging.
#[derive(Clone, Debug)]
pub struct Draft {
  pub statement: String,
  pub equation: Option<String>,
  pub diagram: Option<Diagram>,
  pub answer: Answer,
  pub distractors: Vec<Distractor>,
  pub concepts: Vec<&'static str>,
}

/// Everything a generator may read while drafting.
pub struct GenContext {
  pub rng: ChaCha20Rng,
  pub level: DifficultyLevel,
  pub params: DifficultyParams,
  extras: BTreeMap<String, Value>,
}

impl GenContext {
  /// Operand in the configured range; negated now and then when negatives are allowed.
  pub fn operand(&mut self) -> i64 {
    let v = self.rng.gen_range(self.params.min_operand..=self.params.max_operand);
    if self.params.allow_negative && self.rng.gen_bool(0.3) { -v } else { v }
  }

  /// Positive operand in the configured range, clamped to `lo..=hi`.
  pub fn positive_in(&mut self, lo: i64, hi: i64) -> i64 {
    let lo = lo.max(self.params.min_operand).max(1);
    let hi = hi.min(self.params.max_operand).max(lo);
    self.rng.gen_range(lo..=hi)
  }

  pub fn int_in(&mut self, lo: i64, hi: i64) -> i64 {
    self.rng.gen_range(lo..=hi.max(lo))
  }

  pub fn chance(&mut self, p: f64) -> bool {
    self.rng.gen_bool(p)
  }

  pub fn pick<T: Copy>(&mut self, items: &[T]) -> T {
    *items.choose(&mut self.rng).unwrap_or(&items[0])
  }

  pub fn extra_str(&self, key: &str) -> EngineResult<Option<String>> {
    match self.extras.get(key) {
      None => Ok(None),
      Some(Value::String(s)) => Ok(Some(s.trim().to_lowercase())),
      Some(other) => Err(EngineError::unsupported(format!("'{key}' must be a string, got {other}"))),
    }
  }

  pub fn extra_u32(&self, key: &str) -> EngineResult<Option<u32>> {
    match self.extras.get(key) {
      None => Ok(None),
      Some(v) => v
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| EngineError::unsupported(format!("'{key}' must be a non-negative integer, got {v}"))),
    }
  }
}

pub trait ProblemGenerator: Send + Sync {
  fn problem_type(&self) -> ProblemType;

  /// `customParameters` keys this generator understands beyond the shared range keys.
  fn extra_keys(&self) -> &'static [&'static str] {
    &[]
  }

  fn draft(&self, ctx: &mut GenContext) -> EngineResult<Draft>;
}

/// Immutable registry of generators plus their difficulty table.
/// Cheap to clone and safe to share across concurrent generation calls.
#[derive(Clone)]
pub struct GeneratorSet {
  table: Arc<DifficultyTable>,
  generators: Arc<BTreeMap<ProblemType, Box<dyn ProblemGenerator>>>,
}

impl Default for GeneratorSet {
  fn default() -> Self {
    Self::new(DifficultyTable::default())
  }
}

impl GeneratorSet {
  pub fn new(table: DifficultyTable) -> Self {
    let all: Vec<Box<dyn ProblemGenerator>> = vec![
      Box::new(arithmetic::ArithmeticGenerator),
      Box::new(algebra::AlgebraGenerator),
      Box::new(geometry::GeometryGenerator),
      Box::new(trigonometry::TrigonometryGenerator),
      Box::new(calculus::CalculusGenerator),
      Box::new(statistics::StatisticsGenerator),
      Box::new(probability::ProbabilityGenerator),
      Box::new(linear_algebra::LinearAlgebraGenerator),
      Box::new(word_problems::WordProblemGenerator),
    ];
    let generators = all.into_iter().map(|g| (g.problem_type(), g)).collect();
    Self { table: Arc::new(table), generators: Arc::new(generators) }
  }

  pub fn table(&self) -> &DifficultyTable {
    &self.table
  }

  /// `generate(config, seed) -> (Problem, canonical answer)`.
  ///
  /// The returned problem has no steps yet. For multiple-choice problems the
  /// canonical answer is the correct choice.
  #[instrument(level = "debug", skip(self, config), fields(problem_type = %config.problem_type, difficulty = %config.difficulty, seed))]
  pub fn generate(&self, config: &ProblemConfig, seed: u64) -> EngineResult<(Problem, Answer)> {
    config.validate()?;
    let generator = self
      .generators
      .get(&config.problem_type)
      .ok_or_else(|| EngineError::unsupported(format!("no generator for {}", config.problem_type)))?;

    let (params, extras) = resolve_params(
      self.table.params(config.problem_type, config.difficulty),
      &config.custom_parameters,
      generator.extra_keys(),
    )?;

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let id = uuid::Builder::from_random_bytes(rng.gen()).into_uuid().to_string();
    let mut ctx = GenContext { rng, level: config.difficulty, params, extras };

    let draft = generator.draft(&mut ctx)?;
    draft.answer.require_tolerance()?;

    let mut tags = vec![config.problem_type.as_str().to_string(), config.difficulty.as_str().to_string()];
    tags.extend(draft.concepts.iter().map(|c| c.to_string()));
    let mut common_mistakes: Vec<MistakeCategory> = draft.distractors.iter().map(|d| d.mistake).collect();
    common_mistakes.sort();
    common_mistakes.dedup();

    let (correct_answer, alternatives) = if config.allow_multiple_choice {
      let (correct, options) = build_choices(&draft, &mut ctx.rng)?;
      (correct, Some(options))
    } else {
      (draft.answer.clone(), None)
    };

    debug!(target: "generator", %id, answer = %correct_answer.display(), distractors = draft.distractors.len(), "Drafted problem");

    let problem = Problem {
      id,
      problem_type: config.problem_type,
      difficulty: config.difficulty,
      problem_statement: draft.statement,
      equation: draft.equation,
      diagram: draft.diagram,
      correct_answer: correct_answer.clone(),
      alternatives,
      steps: Vec::new(),
      hints: Vec::new(),
      tags,
      concepts: draft.concepts.iter().map(|c| c.to_string()).collect(),
      common_mistakes,
    };
    Ok((problem, correct_answer))
  }
}

/// Apply `customParameters` over the table entry, rejecting unknown keys and
/// ill-typed or inconsistent values. Generator-specific keys pass through.
fn resolve_params(
  mut params: DifficultyParams,
  custom: &BTreeMap<String, Value>,
  extra_keys: &[&str],
) -> EngineResult<(DifficultyParams, BTreeMap<String, Value>)> {
  let mut extras = BTreeMap::new();
  for (key, value) in custom {
    let as_int = || {
      value
        .as_i64()
        .ok_or_else(|| EngineError::unsupported(format!("'{key}' must be an integer, got {value}")))
    };
    let as_bool = || {
      value
        .as_bool()
        .ok_or_else(|| EngineError::unsupported(format!("'{key}' must be a boolean, got {value}")))
    };
    match key.as_str() {
      "minOperand" => params.min_operand = as_int()?,
      "maxOperand" => params.max_operand = as_int()?,
      "operations" => {
        let n = as_int()?;
        if !(1..=6).contains(&n) {
          return Err(EngineError::unsupported(format!("'operations' must be between 1 and 6, got {n}")));
        }
        params.operations = n as u32;
      }
      "allowNegative" => params.allow_negative = as_bool()?,
      "allowFractions" => params.allow_fractions = as_bool()?,
      k if extra_keys.contains(&k) => {
        extras.insert(key.clone(), value.clone());
      }
      other => {
        let mut known: Vec<&str> = SHARED_KEYS.to_vec();
        known.extend_from_slice(extra_keys);
        return Err(EngineError::unsupported(format!(
          "unknown custom parameter '{other}' (accepted: {})",
          known.join(", ")
        )));
      }
    }
  }
  if params.min_operand > params.max_operand {
    return Err(EngineError::unsupported(format!(
      "minOperand ({}) exceeds maxOperand ({})",
      params.min_operand, params.max_operand
    )));
  }
  if params.min_operand < 0 || params.max_operand > 10_000 {
    return Err(EngineError::unsupported("operand range must lie within 0..=10000; use allowNegative for signs"));
  }
  Ok((params, extras))
}

/// Shuffle the correct answer among up to three distractors.
/// Distractors equivalent to the answer, to each other, or of another format are dropped.
fn build_choices(draft: &Draft, rng: &mut ChaCha20Rng) -> EngineResult<(Answer, Vec<Answer>)> {
  let format = draft.answer.format();
  let mut picked: Vec<Answer> = Vec::new();
  for d in &draft.distractors {
    if picked.len() == DISTRACTORS_WANTED {
      break;
    }
    let a = &d.answer;
    if a.format() != format
      || answers_equivalent(&draft.answer, a)
      || picked.iter().any(|p| answers_equivalent(p, a))
    {
      continue;
    }
    picked.push(a.clone());
  }
  if picked.len() < 2 {
    return Err(EngineError::unsupported(
      "not enough plausible distractors for a multiple-choice version of this problem",
    ));
  }

  let mut options: Vec<(Answer, bool)> = picked.into_iter().map(|a| (a, false)).collect();
  options.push((draft.answer.clone(), true));
  options.shuffle(rng);

  let mut correct = None;
  let choices: Vec<Answer> = options
    .into_iter()
    .zip(CHOICE_LABELS)
    .map(|((value, is_correct), label)| {
      let choice = Answer::MultipleChoice { label: label.to_string(), value: Some(Box::new(value)) };
      if is_correct {
        correct = Some(choice.clone());
      }
      choice
    })
    .collect();
  let correct = correct.ok_or_else(|| EngineError::unsupported("multiple-choice construction lost the answer"))?;
  Ok((correct, choices))
}

/// Generic numeric distractors: sign error, off-by-one both ways, magnitude slip.
pub fn numeric_slips(value: f64, tolerance: f64) -> Vec<Distractor> {
  vec![
    Distractor::new(Answer::numeric(-value, tolerance), MistakeCategory::SignError),
    Distractor::new(Answer::numeric(value + 1.0, tolerance), MistakeCategory::OffByOne),
    Distractor::new(Answer::numeric(value - 1.0, tolerance), MistakeCategory::OffByOne),
    Distractor::new(Answer::numeric(value * 10.0, tolerance), MistakeCategory::MagnitudeError),
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn same_seed_same_problem_for_every_type() {
    let set = GeneratorSet::default();
    for t in ProblemType::ALL {
      for l in DifficultyLevel::ALL {
        let cfg = ProblemConfig::new(t, l);
        let (p1, a1) = set.generate(&cfg, 42).expect("generate");
        let (p2, a2) = set.generate(&cfg, 42).expect("generate");
        assert_eq!(p1, p2, "{t}/{l}");
        assert_eq!(a1, a2);
        assert_eq!(
          serde_json::to_string(&p1).unwrap(),
          serde_json::to_string(&p2).unwrap()
        );
      }
    }
  }

  #[test]
  fn different_seeds_usually_differ() {
    let set = GeneratorSet::default();
    let cfg = ProblemConfig::new(ProblemType::Arithmetic, DifficultyLevel::Advanced);
    let statements: std::collections::BTreeSet<String> =
      (0..10).map(|s| set.generate(&cfg, s).unwrap().0.problem_statement).collect();
    assert!(statements.len() > 1);
  }

  #[test]
  fn unknown_parameter_is_rejected() {
    let set = GeneratorSet::default();
    let cfg = ProblemConfig::new(ProblemType::Arithmetic, DifficultyLevel::Beginner).with_param("shape", json!("circle"));
    assert!(matches!(set.generate(&cfg, 1), Err(EngineError::UnsupportedConfig(_))));
  }

  #[test]
  fn inconsistent_range_is_rejected() {
    let set = GeneratorSet::default();
    let cfg = ProblemConfig::new(ProblemType::Algebra, DifficultyLevel::Beginner)
      .with_param("minOperand", json!(9))
      .with_param("maxOperand", json!(3));
    assert!(matches!(set.generate(&cfg, 1), Err(EngineError::UnsupportedConfig(_))));
    let cfg = ProblemConfig::new(ProblemType::Algebra, DifficultyLevel::Beginner).with_param("operations", json!("many"));
    assert!(set.generate(&cfg, 1).is_err());
  }

  #[test]
  fn multiple_choice_has_exactly_one_correct_option() {
    let set = GeneratorSet::default();
    for t in ProblemType::ALL {
      for seed in 0..5 {
        let mut cfg = ProblemConfig::new(t, DifficultyLevel::Intermediate);
        cfg.allow_multiple_choice = true;
        let (p, answer) = set.generate(&cfg, seed).expect("generate");
        let alts = p.alternatives.as_ref().expect("alternatives");
        assert!(alts.len() >= 3, "{t}: {} options", alts.len());
        assert!(alts.iter().all(|a| a.format() == answer.format()));
        let matching = alts.iter().filter(|a| answers_equivalent(&answer, a)).count();
        assert_eq!(matching, 1, "{t} seed {seed}");
      }
    }
  }

  #[test]
  fn overrides_bound_operands() {
    let set = GeneratorSet::default();
    let cfg = ProblemConfig::new(ProblemType::Arithmetic, DifficultyLevel::Expert)
      .with_param("minOperand", json!(2))
      .with_param("maxOperand", json!(3))
      .with_param("allowFractions", json!(false));
    for seed in 0..20 {
      let (p, _) = set.generate(&cfg, seed).unwrap();
      let eq = p.equation.unwrap();
      for tok in eq.split(|c: char| !c.is_ascii_digit() && c != '.').filter(|t| !t.is_empty()) {
        let v: f64 = tok.parse().unwrap();
        // operands come from 2..=3, exact dividends are products of two of them
        assert!((2.0..=9.0).contains(&v), "operand {v} in {eq}");
      }
    }
  }
}
