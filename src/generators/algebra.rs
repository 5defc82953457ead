//! Linear equations in one variable.
//!
//! Structure grows with `operations`: `x + b = c` / `ax = c`, then `ax + b = c`,
//! then unknowns on both sides, then a bracket to distribute.

use crate::domain::{MistakeCategory, ProblemType};
use crate::error::{EngineError, EngineResult};
use crate::util::format_number;
use crate::value::Answer;

use super::arithmetic::canonical_value;
use super::{Distractor, Draft, GenContext, ProblemGenerator};

pub struct AlgebraGenerator;

impl ProblemGenerator for AlgebraGenerator {
  fn problem_type(&self) -> ProblemType {
    ProblemType::Algebra
  }

  fn extra_keys(&self) -> &'static [&'static str] {
    &["variable"]
  }

  fn draft(&self, ctx: &mut GenContext) -> EngineResult<Draft> {
    let var = match ctx.extra_str("variable")? {
      None => "x".to_string(),
      Some(v) if v.len() == 1 && v.chars().all(|c| c.is_ascii_lowercase()) && v != "e" => v,
      Some(v) => return Err(EngineError::unsupported(format!("'variable' must be a single letter other than 'e', got '{v}'"))),
    };

    let solution = pick_solution(ctx);
    let coef_hi = ctx.params.max_operand.clamp(2, 9);
    let mut a = ctx.int_in(2, coef_hi);
    if ctx.params.allow_negative && ctx.chance(0.3) {
      a = -a;
    }
    let b = nonzero_operand(ctx);

    let (equation, distractor_values, concepts) = match ctx.params.operations {
      1 => {
        if ctx.chance(0.5) {
          let c = solution + b as f64;
          (
            format!("{} = {}", linear_side(1, &var, b), format_number(c)),
            vec![(c + b as f64, MistakeCategory::SignError), (-solution, MistakeCategory::SignError)],
            vec!["linear-equations", "inverse-operations"],
          )
        } else {
          let c = a as f64 * solution;
          (
            format!("{} = {}", linear_side(a, &var, 0), format_number(c)),
            vec![(a as f64 / c, MistakeCategory::Reciprocal), (c - a as f64, MistakeCategory::Conceptual)],
            vec!["linear-equations", "inverse-operations"],
          )
        }
      }
      2 => {
        let c = a as f64 * solution + b as f64;
        (
          format!("{} = {}", linear_side(a, &var, b), format_number(c)),
          vec![
            ((c + b as f64) / a as f64, MistakeCategory::SignError),
            (a as f64 / (c - b as f64), MistakeCategory::Reciprocal),
            (c / a as f64 - b as f64, MistakeCategory::OrderOfOperations),
          ],
          vec!["linear-equations", "two-step-equations"],
        )
      }
      3 => {
        let c = other_coefficient(ctx, a);
        let d = (a - c) as f64 * solution + b as f64;
        (
          format!("{} = {}", linear_side(a, &var, b), linear_side_f(c, &var, d)),
          vec![
            ((d - b as f64) / (a + c) as f64, MistakeCategory::SignError),
            ((d + b as f64) / (a - c) as f64, MistakeCategory::SignError),
          ],
          vec!["linear-equations", "variables-on-both-sides"],
        )
      }
      _ => {
        let c = other_coefficient(ctx, a);
        // a(x + b) = c x + d
        let d = (a - c) as f64 * solution + (a * b) as f64;
        (
          format!("{}({} {} {}) = {}", coef_prefix(a), var, if b < 0 { "-" } else { "+" }, b.abs(), linear_side_f(c, &var, d)),
          vec![
            ((d - b as f64) / (a - c) as f64, MistakeCategory::Conceptual),
            ((d - (a * b) as f64) / (a + c) as f64, MistakeCategory::SignError),
          ],
          vec!["linear-equations", "distributive-property", "variables-on-both-sides"],
        )
      }
    };

    let (value, _) = canonical_value(solution);
    let mut distractors: Vec<Distractor> = distractor_values
      .into_iter()
      .filter(|(v, _)| v.is_finite())
      .map(|(v, m)| Distractor::new(solved(&var, canonical_value(v).0), m))
      .collect();
    distractors.push(Distractor::new(solved(&var, -value), MistakeCategory::SignError));
    distractors.push(Distractor::new(solved(&var, value + 1.0), MistakeCategory::OffByOne));
    distractors.push(Distractor::new(solved(&var, value - 1.0), MistakeCategory::OffByOne));

    Ok(Draft {
      statement: format!("Solve for {var}: {equation}"),
      equation: Some(equation),
      diagram: None,
      answer: solved(&var, value),
      distractors,
      concepts,
    })
  }
}

fn solved(var: &str, v: f64) -> Answer {
  Answer::equation(format!("{var} = {}", format_number(v)))
}

fn pick_solution(ctx: &mut GenContext) -> f64 {
  let hi = ctx.params.max_operand.clamp(2, 12);
  let mut x = ctx.int_in(1, hi) as f64;
  if ctx.params.allow_negative && ctx.chance(0.4) {
    x = -x;
  }
  if ctx.params.allow_fractions && ctx.chance(0.3) {
    x += 0.5;
  }
  x
}

fn nonzero_operand(ctx: &mut GenContext) -> i64 {
  let v = ctx.operand();
  if v == 0 { 1 } else { v }
}

fn other_coefficient(ctx: &mut GenContext, a: i64) -> i64 {
  let hi = ctx.params.max_operand.clamp(2, 9);
  let c = ctx.int_in(1, hi);
  if c == a { c + 1 } else { c }
}

fn coef_prefix(a: i64) -> String {
  match a {
    1 => String::new(),
    -1 => "-".into(),
    _ => a.to_string(),
  }
}

/// `a·var + b` rendered the way it is written by hand.
fn linear_side(a: i64, var: &str, b: i64) -> String {
  linear_side_f(a, var, b as f64)
}

fn linear_side_f(a: i64, var: &str, b: f64) -> String {
  let head = if a == 0 { String::new() } else { format!("{}{}", coef_prefix(a), var) };
  match (head.is_empty(), b) {
    (true, _) => format_number(b),
    (false, b) if b == 0.0 => head,
    (false, b) if b < 0.0 => format!("{head} - {}", format_number(-b)),
    (false, b) => format!("{head} + {}", format_number(b)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{DifficultyLevel, ProblemConfig};
  use crate::expr::{parse_equation, to_poly};
  use crate::generators::GeneratorSet;

  fn solve_numerically(eq: &str, var: &str) -> f64 {
    let e = parse_equation(eq).unwrap();
    let p = to_poly(&e.residual()).unwrap();
    let a = p.coefficient(&vec![(var.to_string(), 1)]);
    let b = p.coefficient(&vec![]);
    -b / a
  }

  #[test]
  fn equations_have_the_stated_solution() {
    let set = GeneratorSet::default();
    for level in DifficultyLevel::ALL {
      for seed in 0..10 {
        let cfg = ProblemConfig::new(ProblemType::Algebra, level);
        let (p, answer) = set.generate(&cfg, seed).unwrap();
        let Answer::Equation { expression } = answer else { panic!("equation expected") };
        let expected: f64 = expression.trim_start_matches("x = ").parse().unwrap();
        let got = solve_numerically(p.equation.as_deref().unwrap(), "x");
        assert!((got - expected).abs() < 1e-9, "{} -> {got} vs {expected}", p.problem_statement);
      }
    }
  }

  #[test]
  fn custom_variable_is_used() {
    let set = GeneratorSet::default();
    let cfg = ProblemConfig::new(ProblemType::Algebra, DifficultyLevel::Intermediate)
      .with_param("variable", serde_json::json!("y"));
    let (p, answer) = set.generate(&cfg, 3).unwrap();
    assert!(p.problem_statement.starts_with("Solve for y:"));
    assert!(answer.display().starts_with("y = "));
    let bad = ProblemConfig::new(ProblemType::Algebra, DifficultyLevel::Intermediate)
      .with_param("variable", serde_json::json!("xy"));
    assert!(set.generate(&bad, 3).is_err());
  }

  #[test]
  fn rendering() {
    assert_eq!(linear_side(3, "x", -4), "3x - 4");
    assert_eq!(linear_side(-1, "x", 0), "-x");
    assert_eq!(linear_side_f(0, "x", 7.0), "7");
  }
}
