//! Answer validation: compare a submitted `Answer` with the canonical one.
//!
//! Rules by canonical format:
//! - NUMERIC: `|s - c| <= tolerance`; beyond it the score decays linearly with
//!   the relative deviation and bottoms out at 0.
//! - EQUATION: symbolic equivalence (`x = 5`, `5 = x`, `2x = 10` agree). A bare
//!   number is accepted against a solved equation.
//! - TEXT / SHORT_ANSWER: trimmed, whitespace-collapsed, case-insensitive unless
//!   `case_sensitive`. Near misses (small edit distance) are reported.
//! - LONG_ANSWER: keyword coverage of the reference text.
//! - MULTIPLE_CHOICE: exact label identity, no partial credit.
//! - MATRIX / GRAPH: elementwise within tolerance / structural equivalence.
//!
//! Malformed submissions are "ungradable" (score 0), never just "incorrect".
//! Validation has no side effects.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GradingConfig;
use crate::domain::{MistakeCategory, Problem};
use crate::error::{EngineError, EngineResult};
use crate::expr::{equations_equivalent, expressions_equivalent, parse_equation, parse_expr};
use crate::util::{edit_distance, format_number, round_to, trunc_for_log};
use crate::value::{numbers_equal, Answer, AnswerFormat, GraphValue, Matrix};

const STOPWORDS: &[&str] = &[
  "about", "after", "also", "because", "been", "before", "being", "both", "each", "from", "have", "into", "just",
  "more", "most", "only", "other", "over", "same", "some", "than", "that", "their", "them", "then", "there", "these",
  "they", "this", "those", "through", "very", "were", "what", "when", "where", "which", "while", "will", "with",
  "would", "your",
];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerValidationResult {
  pub is_correct: bool,
  pub score: f64,
  pub max_score: f64,
  /// False when the submission could not be read (parse error, unknown shape).
  pub gradable: bool,
  pub explanation: String,
  #[serde(default)]
  pub suggestions: Vec<String>,
  #[serde(default)]
  pub similar_answers: Vec<String>,
  #[serde(default)]
  pub mistakes: Vec<MistakeCategory>,
}

/// Outcome of a single comparison before scoring.
struct Verdict {
  correct: bool,
  /// Share of the max score, 0..=1.
  credit: f64,
  explanation: String,
  similar: Vec<String>,
  format_mismatch: bool,
}

impl Verdict {
  fn exact(correct: bool, explanation: impl Into<String>) -> Self {
    Self { correct, credit: if correct { 1.0 } else { 0.0 }, explanation: explanation.into(), similar: Vec::new(), format_mismatch: false }
  }

  fn mismatch(expected: AnswerFormat, got: AnswerFormat) -> Self {
    Self {
      format_mismatch: true,
      ..Self::exact(false, format!("Expected a {expected} answer but received {got}."))
    }
  }
}

/// True when `submitted` is equivalent to `canonical` under the format rules.
/// Unreadable submissions are never equivalent.
pub fn answers_equivalent(canonical: &Answer, submitted: &Answer) -> bool {
  let v = Validator::default();
  matches!(v.compare(canonical, submitted), Ok(verdict) if verdict.correct)
}

#[derive(Clone, Debug, Default)]
pub struct Validator {
  cfg: GradingConfig,
}

impl Validator {
  pub fn new(cfg: GradingConfig) -> Self {
    Self { cfg }
  }

  pub fn max_score(&self) -> f64 {
    self.cfg.max_score
  }

  /// Validate against a stored problem: its canonical answer, its equation
  /// (for mistake inference) and its advertised common mistakes.
  pub fn validate_problem(&self, problem: &Problem, submitted: &Answer) -> AnswerValidationResult {
    self.validate(&problem.correct_answer, submitted, problem.equation.as_deref(), &problem.common_mistakes)
  }

  pub fn validate(
    &self,
    canonical: &Answer,
    submitted: &Answer,
    equation: Option<&str>,
    common_mistakes: &[MistakeCategory],
  ) -> AnswerValidationResult {
    let max_score = self.cfg.max_score;
    let verdict = match self.compare(canonical, submitted) {
      Ok(v) => v,
      Err(e) => {
        debug!(target: "grading", error = %e, submitted = %trunc_for_log(&submitted.display(), 120), "Ungradable answer");
        let what = match &e {
          EngineError::Parse { .. } => format!("Could not read the answer: {e}."),
          other => format!("Could not grade the answer: {other}."),
        };
        return AnswerValidationResult {
          is_correct: false,
          score: 0.0,
          max_score,
          gradable: false,
          explanation: what,
          suggestions: vec![MistakeCategory::Unparseable.suggestion().to_string()],
          similar_answers: Vec::new(),
          mistakes: vec![MistakeCategory::Unparseable],
        };
      }
    };

    let score = round_to((verdict.credit.clamp(0.0, 1.0)) * max_score, 2);
    let mut mistakes = Vec::new();
    let mut suggestions = Vec::new();
    if !verdict.correct {
      mistakes = if verdict.format_mismatch {
        vec![MistakeCategory::FormatMismatch]
      } else {
        infer_mistakes(canonical, submitted, equation)
      };
      if mistakes.is_empty() {
        mistakes.push(MistakeCategory::Conceptual);
      }
      suggestions.extend(mistakes.iter().map(|m| m.suggestion().to_string()));
      // the generator's own list of typical slips for this problem
      for m in common_mistakes.iter().filter(|m| !mistakes.contains(m)).take(2) {
        suggestions.push(format!("Watch for {}: {}", m.label(), m.suggestion()));
      }
    }

    AnswerValidationResult {
      is_correct: verdict.correct,
      score,
      max_score,
      gradable: true,
      explanation: verdict.explanation,
      suggestions,
      similar_answers: verdict.similar,
      mistakes,
    }
  }

  fn compare(&self, canonical: &Answer, submitted: &Answer) -> EngineResult<Verdict> {
    match canonical {
      Answer::MultipleChoice { label, value } => self.compare_choice(label, value.as_deref(), submitted),
      Answer::Numeric { value, tolerance } => {
        let tolerance = tolerance.unwrap_or(0.0);
        let Some(s) = submitted_number(submitted)? else {
          return Ok(Verdict::mismatch(AnswerFormat::Numeric, submitted.format()));
        };
        Ok(self.compare_numbers(*value, tolerance, s))
      }
      Answer::Equation { expression } => compare_equation(expression, submitted),
      Answer::Text { value, case_sensitive } | Answer::ShortAnswer { value, case_sensitive } => {
        Ok(self.compare_text(value, *case_sensitive, submitted))
      }
      Answer::LongAnswer { value } => Ok(self.compare_long(value, submitted)),
      Answer::Matrix { rows, tolerance } => {
        let expected = Matrix { rows: rows.clone() };
        let got = match submitted {
          Answer::Matrix { rows, .. } => Matrix::new(rows.clone())?,
          Answer::Text { value, .. } | Answer::ShortAnswer { value, .. } => Matrix::parse(value)?,
          other => return Ok(Verdict::mismatch(AnswerFormat::Matrix, other.format())),
        };
        if expected.dims() != got.dims() {
          let (r, c) = expected.dims();
          let (gr, gc) = got.dims();
          return Ok(Verdict::exact(false, format!("The result should be {r}×{c}, but the answer is {gr}×{gc}.")));
        }
        let ok = expected.approx_eq(&got, tolerance.unwrap_or(0.0));
        Ok(Verdict::exact(ok, if ok { "All entries match.".to_string() } else { format!("Expected {expected}.") }))
      }
      Answer::Graph { graph, tolerance } => {
        let got = match submitted {
          Answer::Graph { graph, .. } => graph.clone(),
          Answer::Text { value, .. } | Answer::ShortAnswer { value, .. } => match serde_json::from_str::<GraphValue>(value) {
            Ok(g) => g,
            Err(e) => match graph {
              GraphValue::Shape { shape, .. } => GraphValue::parse_measures(*shape, value)
                .ok_or_else(|| EngineError::parse("expected 'area = A, perimeter = P' or a graph object", 0))?,
              GraphValue::Network { .. } => {
                return Err(EngineError::parse(format!("invalid graph: {e}"), e.column().saturating_sub(1)));
              }
            },
          },
          other => return Ok(Verdict::mismatch(AnswerFormat::Graph, other.format())),
        };
        let ok = graph.equivalent(&got, tolerance.unwrap_or(0.0));
        Ok(Verdict::exact(ok, if ok { "The figure matches.".to_string() } else { format!("Expected {graph}.") }))
      }
    }
  }

  fn compare_choice(&self, label: &str, value: Option<&Answer>, submitted: &Answer) -> EngineResult<Verdict> {
    let picked = match submitted {
      Answer::MultipleChoice { label, .. } => Some(label.trim().to_uppercase()),
      Answer::Text { value, .. } | Answer::ShortAnswer { value, .. }
        if value.trim().len() == 1 && value.trim().chars().all(|c| c.is_ascii_alphabetic()) =>
      {
        Some(value.trim().to_uppercase())
      }
      _ => None,
    };
    match (picked, value) {
      (Some(p), _) => {
        let ok = p == label.trim().to_uppercase();
        Ok(Verdict::exact(ok, if ok { format!("Option {label} is correct.") } else { format!("Option {p} is not correct; the answer is {label}.") }))
      }
      // the learner wrote the value instead of picking a label
      (None, Some(inner)) => self.compare(inner, submitted),
      (None, None) => Ok(Verdict::mismatch(AnswerFormat::MultipleChoice, submitted.format())),
    }
  }

  fn compare_numbers(&self, expected: f64, tolerance: f64, got: f64) -> Verdict {
    if numbers_equal(got, expected, tolerance) {
      return Verdict::exact(true, format!("{} is correct.", format_number(got)));
    }
    let deviation = (got - expected).abs() - tolerance;
    let credit = (1.0 - self.cfg.partial_credit_slope * deviation / expected.abs().max(1.0)).max(0.0);
    let explanation = if tolerance > 0.0 {
      format!("Expected {} (within {}), got {}.", format_number(expected), format_number(tolerance), format_number(got))
    } else {
      format!("Expected {}, got {}.", format_number(expected), format_number(got))
    };
    Verdict { correct: false, credit, explanation, similar: Vec::new(), format_mismatch: false }
  }

  fn compare_text(&self, expected: &str, case_sensitive: bool, submitted: &Answer) -> Verdict {
    let got = match submitted {
      Answer::Text { value, .. } | Answer::ShortAnswer { value, .. } | Answer::LongAnswer { value } => value.clone(),
      Answer::Numeric { value, .. } => format_number(*value),
      Answer::Equation { expression } => expression.clone(),
      other => return Verdict::mismatch(AnswerFormat::Text, other.format()),
    };
    let norm = |s: &str| {
      let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
      if case_sensitive { collapsed } else { collapsed.to_lowercase() }
    };
    let (e, g) = (norm(expected), norm(&got));
    if e == g {
      return Verdict::exact(true, "Correct.");
    }
    // "4" against "2 + 2"
    if let (Ok(x), Ok(y)) = (
      parse_expr(&e).and_then(|x| x.eval_constant()),
      parse_expr(&g).and_then(|y| y.eval_constant()),
    ) {
      if numbers_equal(x, y, 0.0) {
        return Verdict::exact(true, "Correct (same value).");
      }
    }
    let distance = edit_distance(&e, &g);
    let mut v = Verdict::exact(false, format!("Expected \"{expected}\"."));
    if distance <= self.cfg.similar_answer_distance {
      v.explanation = format!("Close: expected \"{expected}\" (differs by {distance} character(s)).");
      v.similar.push(expected.to_string());
    }
    v
  }

  fn compare_long(&self, reference: &str, submitted: &Answer) -> Verdict {
    let got = match submitted {
      Answer::LongAnswer { value } | Answer::Text { value, .. } | Answer::ShortAnswer { value, .. } => value.to_lowercase(),
      other => return Verdict::mismatch(AnswerFormat::LongAnswer, other.format()),
    };
    let keywords = keywords(reference);
    if keywords.is_empty() {
      let ok = got.trim() == reference.trim().to_lowercase();
      return Verdict::exact(ok, if ok { "Correct." } else { "Does not match the reference answer." });
    }
    let words: std::collections::BTreeSet<String> = tokens(&got).collect();
    let missing: Vec<&String> = keywords.iter().filter(|k| !words.contains(*k)).collect();
    let coverage = (keywords.len() - missing.len()) as f64 / keywords.len() as f64;
    let correct = coverage + 1e-12 >= self.cfg.long_answer_pass_ratio;
    let mut explanation = format!("Covers {} of {} key points.", keywords.len() - missing.len(), keywords.len());
    if !missing.is_empty() {
      let shown: Vec<&str> = missing.iter().take(5).map(|s| s.as_str()).collect();
      explanation.push_str(&format!(" Missing: {}.", shown.join(", ")));
    }
    Verdict { correct, credit: coverage, explanation, similar: Vec::new(), format_mismatch: false }
  }
}

fn tokens(s: &str) -> impl Iterator<Item = String> + '_ {
  s.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).map(|w| w.to_lowercase())
}

/// Content words of a reference text, deduplicated in order of appearance.
fn keywords(reference: &str) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for w in tokens(reference) {
    if w.len() >= 4 && !STOPWORDS.contains(&w.as_str()) && !out.contains(&w) {
      out.push(w);
    }
  }
  out
}

/// A number read from any numeric-looking submission, `None` when the format
/// cannot carry one. Malformed text is a parse error.
fn submitted_number(submitted: &Answer) -> EngineResult<Option<f64>> {
  match submitted {
    Answer::Numeric { value, .. } => Ok(Some(*value)),
    Answer::Text { value, .. } | Answer::ShortAnswer { value, .. } => {
      if value.contains('=') {
        return solved_value(value).map(Some);
      }
      let e = parse_expr(value)?;
      if !e.is_constant() {
        return Err(EngineError::parse("expected a number, found an expression with variables", 0));
      }
      e.eval_constant().map(Some)
    }
    Answer::Equation { expression } => {
      if expression.contains('=') { solved_value(expression).map(Some) } else { parse_expr(expression)?.eval_constant().map(Some) }
    }
    Answer::MultipleChoice { value: Some(inner), .. } => submitted_number(inner),
    _ => Ok(None),
  }
}

fn solved_value(src: &str) -> EngineResult<f64> {
  let eq = parse_equation(src)?;
  eq.solved_form()
    .map(|(_, v)| v)
    .ok_or_else(|| EngineError::parse("expected the form 'x = value'", 0))
}

fn compare_equation(expected: &str, submitted: &Answer) -> EngineResult<Verdict> {
  let got_src = match submitted {
    Answer::Equation { expression } => expression.clone(),
    Answer::Text { value, .. } | Answer::ShortAnswer { value, .. } => value.clone(),
    Answer::Numeric { value, .. } => format_number(*value),
    other => return Ok(Verdict::mismatch(AnswerFormat::Equation, other.format())),
  };

  if expected.contains('=') {
    let canonical = parse_equation(expected)?;
    if got_src.contains('=') {
      let got = parse_equation(&got_src)?;
      let ok = equations_equivalent(&canonical, &got);
      return Ok(Verdict::exact(ok, if ok { format!("{got} is equivalent to {canonical}.") } else { format!("Expected {canonical}.") }));
    }
    // bare value against a solved equation
    let got = parse_expr(&got_src)?;
    return match canonical.solved_form() {
      Some((var, v)) if got.is_constant() => {
        let g = got.eval_constant()?;
        let ok = numbers_equal(g, v, 0.0);
        Ok(Verdict::exact(ok, if ok { format!("{var} = {} is correct.", format_number(g)) } else { format!("Expected {canonical}.") }))
      }
      _ => Ok(Verdict::exact(false, format!("Expected an equation equivalent to {canonical}."))),
    };
  }

  let canonical = parse_expr(expected)?;
  let got = parse_expr(&got_src)?;
  let ok = expressions_equivalent(&canonical, &got);
  Ok(Verdict::exact(ok, if ok { format!("{got} is equivalent to {canonical}.") } else { format!("Expected {canonical}.") }))
}

/// Mistakes recognisable from the shape of a wrong answer.
pub fn infer_mistakes(canonical: &Answer, submitted: &Answer, equation: Option<&str>) -> Vec<MistakeCategory> {
  let mut out = Vec::new();
  match canonical {
    Answer::MultipleChoice { value: Some(inner), .. } => {
      if let Answer::MultipleChoice { .. } = submitted {
        return out;
      }
      return infer_mistakes(inner, submitted, equation);
    }
    Answer::Matrix { rows, tolerance } => {
      let expected = Matrix { rows: rows.clone() };
      let got = match submitted {
        Answer::Matrix { rows, .. } => Matrix::new(rows.clone()).ok(),
        Answer::Text { value, .. } | Answer::ShortAnswer { value, .. } => Matrix::parse(value).ok(),
        _ => None,
      };
      if let Some(got) = got {
        let tol = tolerance.unwrap_or(0.0);
        if expected.transpose().approx_eq(&got, tol) {
          out.push(MistakeCategory::TransposedResult);
        } else if expected.dims() != got.dims() {
          out.push(MistakeCategory::DimensionMismatch);
        } else {
          let negated = Matrix { rows: expected.rows.iter().map(|r| r.iter().map(|v| -v).collect()).collect() };
          if negated.approx_eq(&got, tol) {
            out.push(MistakeCategory::SignError);
          }
        }
      }
      return out;
    }
    _ => {}
  }

  let (Some(c), Ok(Some(s))) = (canonical_number(canonical), submitted_number(submitted)) else {
    return out;
  };
  let tol = match canonical {
    Answer::Numeric { tolerance, .. } => tolerance.unwrap_or(0.0),
    _ => 0.0,
  }
  .max(1e-9);
  let near = |x: f64| numbers_equal(s, x, tol);

  if c != 0.0 && near(-c) {
    out.push(MistakeCategory::SignError);
  }
  if near(c + 1.0) || near(c - 1.0) {
    out.push(MistakeCategory::OffByOne);
  }
  if let Some(src) = equation {
    if let Ok(e) = parse_expr(src) {
      if let Some(v) = e.eval_left_to_right() {
        if !numbers_equal(v, c, tol) && near(v) {
          out.push(MistakeCategory::OrderOfOperations);
        }
      }
      if let Some(v) = crate::generators::arithmetic::swap_first_noncommutative(&e).and_then(|x| x.eval_constant().ok()) {
        if !numbers_equal(v, c, tol) && near(v) {
          out.push(MistakeCategory::SwappedOperands);
        }
      }
    }
  }
  if c != 0.0 && c.abs() != 1.0 && near(1.0 / c) {
    out.push(MistakeCategory::Reciprocal);
  }
  if c != 0.0 {
    for k in [10.0, 100.0, 1000.0] {
      if near(c * k) || near(c / k) {
        out.push(MistakeCategory::MagnitudeError);
        break;
      }
    }
  }
  if out.is_empty() && (s - c).abs() <= 0.05_f64.max(c.abs() * 0.01) {
    out.push(MistakeCategory::Rounding);
  }
  out
}

fn canonical_number(canonical: &Answer) -> Option<f64> {
  match canonical {
    Answer::Numeric { value, .. } => Some(*value),
    Answer::Equation { expression } => parse_equation(expression).ok().and_then(|e| e.solved_form()).map(|(_, v)| v),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::value::ShapeKind;
  use proptest::prelude::*;

  fn text(s: &str) -> Answer {
    Answer::Text { value: s.into(), case_sensitive: false }
  }

  #[test]
  fn numeric_tolerance_decides_correctness() {
    let v = Validator::default();
    let c = Answer::numeric(3.14159, 0.01);
    assert!(v.validate(&c, &Answer::numeric(3.15, 0.0), None, &[]).is_correct);
    let wrong = v.validate(&c, &Answer::numeric(3.00, 0.0), None, &[]);
    assert!(!wrong.is_correct);
    assert!(wrong.gradable);
    assert!(wrong.score > 0.0 && wrong.score < 100.0);
    assert!(!wrong.suggestions.is_empty());
  }

  #[test]
  fn cross_format_numbers() {
    let v = Validator::default();
    let c = Answer::numeric(4.0, 0.0);
    assert!(v.validate(&c, &text("2+2"), None, &[]).is_correct);
    assert!(v.validate(&c, &Answer::equation("x = 4"), None, &[]).is_correct);
    let eq = Answer::equation("x = 5");
    assert!(v.validate(&eq, &Answer::numeric(5.0, 0.0), None, &[]).is_correct);
    assert!(v.validate(&eq, &Answer::equation("5 = x"), None, &[]).is_correct);
    assert!(v.validate(&eq, &Answer::equation("2x = 10"), None, &[]).is_correct);
    assert!(!v.validate(&eq, &Answer::equation("x = -5"), None, &[]).is_correct);
  }

  #[test]
  fn malformed_submission_is_ungradable() {
    let v = Validator::default();
    let r = v.validate(&Answer::numeric(4.0, 0.0), &text("2 + * 3"), None, &[]);
    assert!(!r.is_correct);
    assert!(!r.gradable);
    assert_eq!(r.score, 0.0);
    assert_eq!(r.mistakes, vec![MistakeCategory::Unparseable]);
  }

  #[test]
  fn text_is_case_insensitive_and_reports_near_misses() {
    let v = Validator::default();
    let c = text("Paris");
    assert!(v.validate(&c, &text("paris"), None, &[]).is_correct);
    assert!(v.validate(&c, &text("  PARIS "), None, &[]).is_correct);
    let near = v.validate(&c, &text("Pariss"), None, &[]);
    assert!(!near.is_correct);
    assert_eq!(near.similar_answers, vec!["Paris".to_string()]);
    let strict = Answer::ShortAnswer { value: "Paris".into(), case_sensitive: true };
    assert!(!v.validate(&strict, &text("paris"), None, &[]).is_correct);
  }

  #[test]
  fn multiple_choice_is_label_identity() {
    let v = Validator::default();
    let c = Answer::MultipleChoice { label: "B".into(), value: Some(Box::new(Answer::numeric(12.0, 0.0))) };
    let pick = |l: &str| Answer::MultipleChoice { label: l.into(), value: None };
    let right = v.validate(&c, &pick("B"), None, &[]);
    assert!(right.is_correct);
    assert_eq!(right.score, 100.0);
    let wrong = v.validate(&c, &pick("C"), None, &[]);
    assert_eq!(wrong.score, 0.0);
    assert!(v.validate(&c, &text("b"), None, &[]).is_correct);
    assert!(v.validate(&c, &pick(" b "), None, &[]).is_correct);
    assert!(!v.validate(&c, &pick("c"), None, &[]).is_correct);
    assert!(v.validate(&c, &Answer::numeric(12.0, 0.0), None, &[]).is_correct);
  }

  #[test]
  fn hostile_submissions_are_ungradable() {
    let v = Validator::default();
    let c = Answer::numeric(1.0, 0.0);
    let nested = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
    let r = v.validate(&c, &text(&nested), None, &[]);
    assert!(!r.gradable && !r.is_correct);
    assert_eq!(r.score, 0.0);
    let r = v.validate(&c, &text("comb(100000000000000, 50000000000000)"), None, &[]);
    assert!(!r.gradable && !r.is_correct);
  }

  #[test]
  fn shape_answers_accept_written_measures() {
    let v = Validator::default();
    let c = Answer::Graph {
      graph: GraphValue::Shape { shape: ShapeKind::RightTriangle, area: 6.0, perimeter: 12.0 },
      tolerance: Some(0.01),
    };
    assert!(v.validate(&c, &text("area = 6, perimeter = 12"), None, &[]).is_correct);
    assert!(!v.validate(&c, &text("area = 6, perimeter = 13"), None, &[]).is_correct);
    assert!(!v.validate(&c, &text("six and twelve"), None, &[]).gradable);
  }

  #[test]
  fn matrices_and_mistakes() {
    let v = Validator::default();
    let c = Answer::Matrix { rows: vec![vec![1.0, 2.0], vec![3.0, 4.0]], tolerance: Some(0.0) };
    let t = Answer::Matrix { rows: vec![vec![1.0, 3.0], vec![2.0, 4.0]], tolerance: None };
    let r = v.validate(&c, &t, None, &[]);
    assert!(!r.is_correct);
    assert_eq!(r.mistakes, vec![MistakeCategory::TransposedResult]);
    let wide = Answer::Matrix { rows: vec![vec![1.0, 2.0, 3.0]], tolerance: None };
    let r = v.validate(&c, &wide, None, &[]);
    assert!(r.gradable && !r.is_correct);
    assert_eq!(r.mistakes, vec![MistakeCategory::DimensionMismatch]);
    assert!(v.validate(&c, &text("[[1, 2], [3, 4]]"), None, &[]).is_correct);
  }

  #[test]
  fn long_answers_by_coverage() {
    let v = Validator::default();
    let c = Answer::LongAnswer { value: "The derivative measures the instantaneous rate of change of a function".into() };
    let good = Answer::LongAnswer { value: "A derivative gives the instantaneous rate of change of the function.".into() };
    let r = v.validate(&c, &good, None, &[]);
    assert!(r.is_correct, "{}", r.explanation);
    let poor = Answer::LongAnswer { value: "It is a slope.".into() };
    let r = v.validate(&c, &poor, None, &[]);
    assert!(!r.is_correct);
    assert!(r.score < 60.0);
  }

  #[test]
  fn order_of_operations_is_recognised() {
    let v = Validator::default();
    let r = v.validate(&Answer::numeric(14.0, 0.0), &Answer::numeric(20.0, 0.0), Some("2 + 3 * 4"), &[]);
    assert!(r.mistakes.contains(&MistakeCategory::OrderOfOperations));
    let r = v.validate(&Answer::numeric(14.0, 0.0), &Answer::numeric(-14.0, 0.0), None, &[]);
    assert_eq!(r.mistakes, vec![MistakeCategory::SignError]);
  }

  proptest! {
    #[test]
    fn numeric_validation_is_reflexive(c in -1.0e6f64..1.0e6, t in 0.0f64..10.0) {
      prop_assert!(answers_equivalent(&Answer::numeric(c, t), &Answer::numeric(c, 0.0)));
    }

    #[test]
    fn correct_iff_within_tolerance(c in -1.0e3f64..1.0e3, d in -20.0f64..20.0, t in 0.0f64..10.0) {
      let s = c + d;
      // stay clear of the boundary where binary rounding decides
      prop_assume!(((s - c).abs() - t).abs() > 1e-6);
      let r = Validator::default().validate(&Answer::numeric(c, t), &Answer::numeric(s, 0.0), None, &[]);
      prop_assert_eq!(r.is_correct, (s - c).abs() <= t);
      prop_assert!(r.score >= 0.0 && r.score <= r.max_score);
    }

    #[test]
    fn solved_equations_are_symmetric(v in -1000i64..1000) {
      let a = Answer::equation(format!("x = {v}"));
      let b = Answer::equation(format!("{v} = x"));
      prop_assert!(answers_equivalent(&a, &b));
      prop_assert!(answers_equivalent(&b, &a));
    }
  }
}
