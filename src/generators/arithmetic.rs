//! Mixed-operation arithmetic with operator precedence.
//!
//! `operations` is the operator count. Beginners get one `+ - *` on small
//! positive integers; division joins at intermediate; parentheses and negative
//! operands at advanced; decimals at expert.

use crate::domain::{DifficultyLevel, MistakeCategory, ProblemType};
use crate::error::{EngineError, EngineResult};
use crate::expr::{parse_expr, BinOp, Expr};
use crate::util::{format_number, round_to};
use crate::value::Answer;

use super::{numeric_slips, Distractor, Draft, GenContext, ProblemGenerator};

const MAX_TRIES: usize = 32;

pub struct ArithmeticGenerator;

impl ProblemGenerator for ArithmeticGenerator {
  fn problem_type(&self) -> ProblemType {
    ProblemType::Arithmetic
  }

  fn draft(&self, ctx: &mut GenContext) -> EngineResult<Draft> {
    let expr = build_expression(ctx)?;
    let (value, tolerance) = canonical_value(expr.eval_constant()?);

    let statement = format!("Evaluate: {}", pretty_operators(&expr.to_string()));
    Ok(Draft {
      statement,
      equation: Some(expr.to_string()),
      diagram: None,
      answer: Answer::numeric(value, tolerance),
      distractors: arithmetic_distractors(&expr, value, tolerance),
      concepts: concepts_for(&expr),
    })
  }
}

/// Integral results are exact; anything else is rounded to 4 places with a 0.001 tolerance.
pub fn canonical_value(v: f64) -> (f64, f64) {
  if (v - v.round()).abs() < 1e-9 {
    (v.round(), 0.0)
  } else {
    (round_to(v, 4), 0.001)
  }
}

pub fn pretty_operators(s: &str) -> String {
  s.replace(" * ", " × ").replace(" / ", " ÷ ")
}

fn build_expression(ctx: &mut GenContext) -> EngineResult<Expr> {
  for _ in 0..MAX_TRIES {
    let src = random_source(ctx);
    let expr = parse_expr(&src)?;
    match expr.eval_constant() {
      Ok(v) if ctx.params.allow_negative || v >= 0.0 => return Ok(expr),
      _ => continue,
    }
  }
  Err(EngineError::unsupported(
    "could not build a non-negative arithmetic expression in the configured range",
  ))
}

fn random_source(ctx: &mut GenContext) -> String {
  let pool: &[char] = match ctx.level {
    DifficultyLevel::Beginner => &['+', '-', '*'],
    _ => &['+', '-', '*', '/'],
  };
  let parens = ctx.level >= DifficultyLevel::Advanced;

  let mut toks: Vec<String> = vec![operand_token(ctx)];
  let mut last_is_leaf = true;
  for _ in 0..ctx.params.operations {
    let op = ctx.pick(pool);
    let grouping = matches!(op, '*' | '/') && toks.len() > 1;
    if parens && grouping && ctx.chance(0.4) {
      toks.insert(0, "(".into());
      toks.push(")".into());
      last_is_leaf = false;
    }
    if op == '/' {
      let hi = ctx.params.max_operand.clamp(2, 9);
      let d = ctx.int_in(2, hi);
      if last_is_leaf {
        // keep the division exact when the dividend is a single number
        let k = ctx.positive_in(1, 10);
        if let Some(last) = toks.last_mut() {
          *last = (d * k).to_string();
        }
      }
      toks.push("/".into());
      toks.push(d.to_string());
    } else {
      toks.push(op.to_string());
      toks.push(operand_token(ctx));
    }
    last_is_leaf = true;
  }
  toks.join(" ")
}

fn operand_token(ctx: &mut GenContext) -> String {
  let v = ctx.operand();
  let text = if ctx.params.allow_fractions && ctx.chance(0.3) {
    let tenths = ctx.int_in(1, 9);
    let mag = v.abs() as f64 + tenths as f64 / 10.0;
    format_number(if v < 0 { -mag } else { mag })
  } else {
    v.to_string()
  };
  if text.starts_with('-') { format!("({text})") } else { text }
}

/// Swap the operands of the first subtraction or division.
pub fn swap_first_noncommutative(e: &Expr) -> Option<Expr> {
  match e {
    Expr::Bin(op @ (BinOp::Sub | BinOp::Div), a, b) => Some(Expr::Bin(*op, b.clone(), a.clone())),
    Expr::Bin(op, a, b) => {
      if let Some(sa) = swap_first_noncommutative(a) {
        return Some(Expr::Bin(*op, Box::new(sa), b.clone()));
      }
      swap_first_noncommutative(b).map(|sb| Expr::Bin(*op, a.clone(), Box::new(sb)))
    }
    Expr::Neg(inner) => swap_first_noncommutative(inner).map(|s| Expr::Neg(Box::new(s))),
    _ => None,
  }
}

pub fn arithmetic_distractors(expr: &Expr, value: f64, tolerance: f64) -> Vec<Distractor> {
  let mut out = Vec::new();
  if let Some(v) = expr.eval_left_to_right() {
    out.push(Distractor::new(Answer::numeric(canonical_value(v).0, tolerance), MistakeCategory::OrderOfOperations));
  }
  if let Some(v) = swap_first_noncommutative(expr).and_then(|s| s.eval_constant().ok()) {
    out.push(Distractor::new(Answer::numeric(canonical_value(v).0, tolerance), MistakeCategory::SwappedOperands));
  }
  out.extend(numeric_slips(value, tolerance));
  out
}

fn concepts_for(expr: &Expr) -> Vec<&'static str> {
  let mut ops = Vec::new();
  collect_ops(expr, &mut ops);
  let mut concepts = Vec::new();
  for (op, name) in [
    (BinOp::Add, "addition"),
    (BinOp::Sub, "subtraction"),
    (BinOp::Mul, "multiplication"),
    (BinOp::Div, "division"),
  ] {
    if ops.contains(&op) {
      concepts.push(name);
    }
  }
  if ops.len() > 1 {
    concepts.push("order-of-operations");
  }
  let text = expr.to_string();
  if text.contains("(-") {
    concepts.push("negative-numbers");
  }
  if text.contains('.') {
    concepts.push("decimals");
  }
  concepts
}

fn collect_ops(e: &Expr, out: &mut Vec<BinOp>) {
  match e {
    Expr::Bin(op, a, b) => {
      out.push(*op);
      collect_ops(a, out);
      collect_ops(b, out);
    }
    Expr::Neg(inner) => collect_ops(inner, out),
    _ => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::ProblemConfig;
  use crate::generators::GeneratorSet;

  #[test]
  fn beginner_is_one_small_positive_operation() {
    let set = GeneratorSet::default();
    let cfg = ProblemConfig::new(ProblemType::Arithmetic, DifficultyLevel::Beginner);
    for seed in 0..30 {
      let (p, answer) = set.generate(&cfg, seed).unwrap();
      let expr = parse_expr(p.equation.as_deref().unwrap()).unwrap();
      let mut ops = Vec::new();
      collect_ops(&expr, &mut ops);
      assert_eq!(ops.len(), 1, "{}", p.problem_statement);
      let Answer::Numeric { value, tolerance } = answer else { panic!("numeric expected") };
      assert!(value >= 0.0);
      assert_eq!(tolerance, Some(0.0));
    }
  }

  #[test]
  fn expert_uses_several_operations() {
    let set = GeneratorSet::default();
    let cfg = ProblemConfig::new(ProblemType::Arithmetic, DifficultyLevel::Expert);
    let (p, _) = set.generate(&cfg, 7).unwrap();
    let expr = parse_expr(p.equation.as_deref().unwrap()).unwrap();
    let mut ops = Vec::new();
    collect_ops(&expr, &mut ops);
    assert_eq!(ops.len(), 4);
  }

  #[test]
  fn order_of_operations_distractor() {
    let e = parse_expr("2 + 3 * 4").unwrap();
    let ds = arithmetic_distractors(&e, 14.0, 0.0);
    assert_eq!(ds[0].mistake, MistakeCategory::OrderOfOperations);
    assert_eq!(ds[0].answer, Answer::numeric(20.0, 0.0));
  }

  #[test]
  fn swapping_targets_subtraction() {
    let e = parse_expr("2 * 3 - 10").unwrap();
    let s = swap_first_noncommutative(&e).unwrap();
    assert_eq!(s.eval_constant().unwrap(), 4.0);
  }
}
