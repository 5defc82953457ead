//! Polynomial calculus: a derivative at a point, or a definite integral.
//!
//! Task grammar (`Problem.equation`):
//! - `derivative of <polynomial in x> at x = <value>`
//! - `integral of <polynomial in x> from <a> to <b>`

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::{DifficultyLevel, MistakeCategory, ProblemType};
use crate::error::{EngineError, EngineResult};
use crate::expr::{parse_expr, to_poly, Poly};
use crate::util::format_number;
use crate::value::Answer;

use super::arithmetic::canonical_value;
use super::{numeric_slips, Distractor, Draft, GenContext, ProblemGenerator};

pub const VARIABLE: &str = "x";

#[derive(Clone, Debug, PartialEq)]
pub enum CalculusTask {
  Derivative { poly: Poly, at: f64 },
  Integral { poly: Poly, from: f64, to: f64 },
}

impl CalculusTask {
  pub fn parse(src: &str) -> EngineResult<Self> {
    let src = src.trim();
    if let Some(rest) = src.strip_prefix("derivative of ") {
      let (body, at) = rest
        .rsplit_once(" at x =")
        .ok_or_else(|| EngineError::parse("expected 'at x = <value>'", src.len()))?;
      return Ok(CalculusTask::Derivative { poly: polynomial(body)?, at: number(at)? });
    }
    if let Some(rest) = src.strip_prefix("integral of ") {
      let (body, bounds) = rest
        .rsplit_once(" from ")
        .ok_or_else(|| EngineError::parse("expected 'from <a> to <b>'", src.len()))?;
      let (from, to) = bounds
        .split_once(" to ")
        .ok_or_else(|| EngineError::parse("expected 'to <b>'", src.len()))?;
      return Ok(CalculusTask::Integral { poly: polynomial(body)?, from: number(from)?, to: number(to)? });
    }
    Err(EngineError::parse("expected 'derivative of ...' or 'integral of ...'", 0))
  }

  pub fn poly(&self) -> &Poly {
    match self {
      CalculusTask::Derivative { poly, .. } | CalculusTask::Integral { poly, .. } => poly,
    }
  }
}

impl fmt::Display for CalculusTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CalculusTask::Derivative { poly, at } => write!(f, "derivative of {poly} at x = {}", format_number(*at)),
      CalculusTask::Integral { poly, from, to } => {
        write!(f, "integral of {poly} from {} to {}", format_number(*from), format_number(*to))
      }
    }
  }
}

fn polynomial(src: &str) -> EngineResult<Poly> {
  let expr = parse_expr(src)?;
  if expr.variables().iter().any(|v| v != VARIABLE) {
    return Err(EngineError::parse("only the variable x is allowed", 0));
  }
  to_poly(&expr).ok_or_else(|| EngineError::parse("not a polynomial", 0))
}

fn number(src: &str) -> EngineResult<f64> {
  parse_expr(src)?.eval_constant()
}

pub fn at(x: f64) -> BTreeMap<String, f64> {
  BTreeMap::from([(VARIABLE.to_string(), x)])
}

/// `sum c_k x^k` from coefficients indexed by power.
fn from_coefficients(coeffs: &[f64]) -> Poly {
  let x = Poly::variable(VARIABLE);
  coeffs
    .iter()
    .enumerate()
    .fold(Poly::default(), |acc, (k, c)| acc.add(&x.pow(k as u32).scale(*c)))
}

fn eval_coefficients(coeffs: &[f64], x: f64) -> f64 {
  coeffs.iter().enumerate().map(|(k, c)| c * x.powi(k as i32)).sum()
}

pub struct CalculusGenerator;

impl ProblemGenerator for CalculusGenerator {
  fn problem_type(&self) -> ProblemType {
    ProblemType::Calculus
  }

  fn extra_keys(&self) -> &'static [&'static str] {
    &["task"]
  }

  fn draft(&self, ctx: &mut GenContext) -> EngineResult<Draft> {
    let integral = match ctx.extra_str("task")?.as_deref() {
      Some("derivative") => false,
      Some("integral") => true,
      Some(other) => return Err(EngineError::unsupported(format!("'task' must be derivative or integral, got '{other}'"))),
      None => ctx.level >= DifficultyLevel::Advanced && ctx.chance(0.5),
    };

    let degree = (ctx.params.operations + 1).clamp(2, 4) as usize;
    let coeff_hi = ctx.params.max_operand.clamp(1, 9);
    let mut coeffs: Vec<f64> = (0..=degree)
      .map(|_| {
        let c = ctx.int_in(0, coeff_hi);
        if ctx.params.allow_negative && ctx.chance(0.3) { -c as f64 } else { c as f64 }
      })
      .collect();
    coeffs[degree] = ctx.int_in(1, coeff_hi) as f64;
    if coeffs[1..degree].iter().all(|c| *c == 0.0) {
      coeffs[1] = 1.0;
    }
    let poly = from_coefficients(&coeffs);

    let (task, value, slips, concepts) = if integral {
      let from = (if ctx.params.allow_negative { ctx.int_in(-2, 1) } else { ctx.int_in(0, 2) }) as f64;
      let to = from + ctx.int_in(1, 3) as f64;
      let anti: Vec<f64> = std::iter::once(0.0).chain(coeffs.iter().enumerate().map(|(k, c)| c / (k + 1) as f64)).collect();
      let big_f = |x: f64| eval_coefficients(&anti, x);
      let value = big_f(to) - big_f(from);
      // forgetting to divide by the new power
      let undivided: Vec<f64> = std::iter::once(0.0).chain(coeffs.iter().copied()).collect();
      let mut slips = vec![
        (eval_coefficients(&undivided, to) - eval_coefficients(&undivided, from), MistakeCategory::WrongFormula),
        (eval_coefficients(&coeffs, to) - eval_coefficients(&coeffs, from), MistakeCategory::Conceptual),
      ];
      if from != 0.0 {
        slips.push((big_f(to), MistakeCategory::Conceptual));
      }
      (CalculusTask::Integral { poly, from, to }, value, slips, vec!["integration", "power-rule", "definite-integrals"])
    } else {
      let x0 = (if ctx.params.allow_negative { ctx.int_in(-3, 3) } else { ctx.int_in(1, 4) }) as f64;
      let deriv: Vec<f64> = coeffs.iter().enumerate().skip(1).map(|(k, c)| c * k as f64).collect();
      let value = eval_coefficients(&deriv, x0);
      // power rule without the factor k
      let dropped: Vec<f64> = coeffs.iter().skip(1).copied().collect();
      let slips = vec![
        (eval_coefficients(&coeffs, x0), MistakeCategory::Conceptual),
        (eval_coefficients(&dropped, x0), MistakeCategory::WrongFormula),
      ];
      (CalculusTask::Derivative { poly, at: x0 }, value, slips, vec!["differentiation", "power-rule"])
    };

    let (value, tolerance) = canonical_value(value);
    let tolerance = tolerance.max(if integral { 0.001 } else { 0.0 });
    let mut distractors: Vec<Distractor> = slips
      .into_iter()
      .map(|(v, m)| Distractor::new(Answer::numeric(canonical_value(v).0, tolerance), m))
      .collect();
    distractors.extend(numeric_slips(value, tolerance));

    let statement = match &task {
      CalculusTask::Derivative { poly, at } => {
        format!("Let f(x) = {poly}. Find f'({}).", format_number(*at))
      }
      CalculusTask::Integral { poly, from, to } => format!(
        "Evaluate the integral of {poly} with respect to x from {} to {}. Round to 4 decimal places.",
        format_number(*from),
        format_number(*to)
      ),
    };

    Ok(Draft {
      statement,
      equation: Some(task.to_string()),
      diagram: None,
      answer: Answer::numeric(value, tolerance),
      distractors,
      concepts,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::ProblemConfig;
  use crate::generators::GeneratorSet;

  #[test]
  fn task_grammar_round_trips() {
    let t = CalculusTask::parse("derivative of 3x^2 + 2x - 5 at x = 2").unwrap();
    let CalculusTask::Derivative { poly, at } = &t else { panic!("derivative expected") };
    assert_eq!(*at, 2.0);
    assert_eq!(poly.derivative("x").eval(&super::at(2.0)), Some(14.0));
    assert_eq!(t.to_string(), "derivative of 3x^2 + 2x - 5 at x = 2");

    let t = CalculusTask::parse("integral of 3x^2 from 0 to 2").unwrap();
    assert!(matches!(t, CalculusTask::Integral { from, to, .. } if from == 0.0 && to == 2.0));
    assert!(CalculusTask::parse("limit of x at 0").is_err());
    assert!(CalculusTask::parse("derivative of sin(x) at x = 1").is_err());
  }

  #[test]
  fn integral_answers_match_the_antiderivative() {
    let set = GeneratorSet::default();
    let cfg = ProblemConfig::new(ProblemType::Calculus, DifficultyLevel::Expert).with_param("task", serde_json::json!("integral"));
    for seed in 0..10 {
      let (p, answer) = set.generate(&cfg, seed).unwrap();
      let CalculusTask::Integral { poly, from, to } = CalculusTask::parse(p.equation.as_deref().unwrap()).unwrap() else {
        panic!("integral expected")
      };
      let anti = poly.antiderivative("x");
      let exact = anti.eval(&at(to)).unwrap() - anti.eval(&at(from)).unwrap();
      let Answer::Numeric { value, .. } = answer else { panic!("numeric expected") };
      assert!((value - exact).abs() <= 0.0001, "{}", p.problem_statement);
    }
  }
}
