//! Trigonometric ratios in degrees: special-angle values first, then sides of
//! right triangles from one side and one acute angle.

use crate::domain::{DifficultyLevel, MistakeCategory, ProblemType};
use crate::error::{EngineError, EngineResult};
use crate::expr::{parse_expr, BinOp, Expr, Func};
use crate::value::Answer;

use super::arithmetic::canonical_value;
use super::{numeric_slips, Distractor, Draft, GenContext, ProblemGenerator};

const SPECIAL_ANGLES: [i64; 5] = [0, 30, 45, 60, 90];
const WIDE_ANGLES: [i64; 8] = [0, 30, 45, 60, 90, 120, 135, 150];

pub struct TrigonometryGenerator;

impl ProblemGenerator for TrigonometryGenerator {
  fn problem_type(&self) -> ProblemType {
    ProblemType::Trigonometry
  }

  fn extra_keys(&self) -> &'static [&'static str] {
    &["function"]
  }

  fn draft(&self, ctx: &mut GenContext) -> EngineResult<Draft> {
    let requested = match ctx.extra_str("function")? {
      None => None,
      Some(f) => Some(match f.as_str() {
        "sin" => Func::Sin,
        "cos" => Func::Cos,
        "tan" => Func::Tan,
        other => return Err(EngineError::unsupported(format!("'function' must be sin, cos or tan, got '{other}'"))),
      }),
    };

    let (source, statement, concepts) = match ctx.level {
      DifficultyLevel::Beginner | DifficultyLevel::Intermediate => {
        let beginner = ctx.level == DifficultyLevel::Beginner;
        let func = requested.unwrap_or_else(|| {
          if beginner { ctx.pick(&[Func::Sin, Func::Cos]) } else { ctx.pick(&[Func::Sin, Func::Cos, Func::Tan]) }
        });
        let pool: &[i64] = if beginner { &SPECIAL_ANGLES } else { &WIDE_ANGLES };
        let mut angle = ctx.pick(pool);
        if func == Func::Tan && angle == 90 {
          angle = 60;
        }
        let src = format!("{}({angle}°)", func.name());
        let statement = format!("Find the value of {src}, rounded to 4 decimal places.");
        (src, statement, vec!["special-angles", "trig-ratios"])
      }
      _ => {
        let angle = ctx.int_in(10, 80);
        let known = ctx.positive_in(2, 40);
        let expert = ctx.level == DifficultyLevel::Expert;
        let func = requested.unwrap_or_else(|| ctx.pick(&[Func::Sin, Func::Cos, Func::Tan]));
        let (src, statement) = if expert {
          // given the side opposite the angle, find another side
          match func {
            Func::Tan => (
              format!("{known} / tan({angle}°)"),
              format!("In a right triangle, the side opposite a {angle}° angle is {known}. Find the adjacent side."),
            ),
            _ => (
              format!("{known} / sin({angle}°)"),
              format!("In a right triangle, the side opposite a {angle}° angle is {known}. Find the hypotenuse."),
            ),
          }
        } else {
          match func {
            Func::Cos => (
              format!("{known} * cos({angle}°)"),
              format!("In a right triangle with hypotenuse {known}, find the side adjacent to a {angle}° angle."),
            ),
            Func::Tan => (
              format!("{known} * tan({angle}°)"),
              format!("In a right triangle, the side adjacent to a {angle}° angle is {known}. Find the opposite side."),
            ),
            _ => (
              format!("{known} * sin({angle}°)"),
              format!("In a right triangle with hypotenuse {known}, find the side opposite a {angle}° angle."),
            ),
          }
        };
        (src, format!("{statement} Round to 4 decimal places."), vec!["right-triangles", "trig-ratios"])
      }
    };

    let expr = parse_expr(&source)?;
    let (value, _) = canonical_value(expr.eval_constant()?);
    let tolerance = 0.001;

    let mut distractors = Vec::new();
    for (alt, mistake) in [
      (swap_ratio(&expr), MistakeCategory::WrongFormula),
      (Some(as_radians(&expr)), MistakeCategory::AngleMode),
    ] {
      if let Some(v) = alt.and_then(|e| e.eval_constant().ok()) {
        distractors.push(Distractor::new(Answer::numeric(canonical_value(v).0, tolerance), mistake));
      }
    }
    distractors.extend(numeric_slips(value, tolerance));

    Ok(Draft {
      statement,
      equation: Some(expr.to_string()),
      diagram: None,
      answer: Answer::numeric(value, tolerance),
      distractors,
      concepts,
    })
  }
}

/// sin <-> cos, tan -> 1/tan: the "wrong ratio" slip.
fn swap_ratio(e: &Expr) -> Option<Expr> {
  match e {
    Expr::Call(Func::Sin, args) => Some(Expr::Call(Func::Cos, args.clone())),
    Expr::Call(Func::Cos, args) => Some(Expr::Call(Func::Sin, args.clone())),
    Expr::Call(Func::Tan, args) => Some(Expr::bin(BinOp::Div, Expr::num(1.0), Expr::Call(Func::Tan, args.clone()))),
    Expr::Bin(op, a, b) => {
      if let Some(sa) = swap_ratio(a) {
        return Some(Expr::Bin(*op, Box::new(sa), b.clone()));
      }
      swap_ratio(b).map(|sb| Expr::Bin(*op, a.clone(), Box::new(sb)))
    }
    _ => None,
  }
}

/// The same expression with every degree mark dropped, as a calculator in radian mode reads it.
fn as_radians(e: &Expr) -> Expr {
  match e {
    Expr::Degrees(inner) => as_radians(inner),
    Expr::Neg(inner) => Expr::Neg(Box::new(as_radians(inner))),
    Expr::Bin(op, a, b) => Expr::bin(*op, as_radians(a), as_radians(b)),
    Expr::Call(f, args) => Expr::Call(*f, args.iter().map(as_radians).collect()),
    other => other.clone(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::ProblemConfig;
  use crate::generators::GeneratorSet;

  #[test]
  fn special_angle_values() {
    let e = parse_expr("sin(30°)").unwrap();
    assert_eq!(canonical_value(e.eval_constant().unwrap()), (0.5, 0.001));
    let swapped = swap_ratio(&e).unwrap().eval_constant().unwrap();
    assert!((swapped - 0.8660).abs() < 1e-4);
    let radians = as_radians(&e).eval_constant().unwrap();
    assert!((radians - 30f64.sin()).abs() < 1e-12);
  }

  #[test]
  fn requested_function_is_used() {
    let set = GeneratorSet::default();
    let cfg = ProblemConfig::new(ProblemType::Trigonometry, DifficultyLevel::Advanced)
      .with_param("function", serde_json::json!("cos"));
    for seed in 0..5 {
      let (p, answer) = set.generate(&cfg, seed).unwrap();
      assert!(p.equation.as_deref().unwrap().contains("cos("));
      assert!(matches!(answer, Answer::Numeric { tolerance: Some(t), .. } if t == 0.001));
    }
  }
}
