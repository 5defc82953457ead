//! Matrix arithmetic on small integer matrices.
//!
//! Task grammar: `add(A; B)`, `multiply(A; B)`, `transpose(A)`,
//! `determinant(A)` with matrices written as `[[1, 2], [3, 4]]`.

use std::fmt;

use crate::domain::{DifficultyLevel, MistakeCategory, ProblemType};
use crate::error::{EngineError, EngineResult};
use crate::value::{Answer, Matrix};

use super::{numeric_slips, Distractor, Draft, GenContext, ProblemGenerator};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatrixOp {
  Add,
  Multiply,
  Transpose,
  Determinant,
}

impl MatrixOp {
  pub fn name(self) -> &'static str {
    match self {
      MatrixOp::Add => "add",
      MatrixOp::Multiply => "multiply",
      MatrixOp::Transpose => "transpose",
      MatrixOp::Determinant => "determinant",
    }
  }

  fn parse(s: &str) -> Option<Self> {
    Some(match s.trim() {
      "add" => MatrixOp::Add,
      "multiply" => MatrixOp::Multiply,
      "transpose" => MatrixOp::Transpose,
      "determinant" => MatrixOp::Determinant,
      _ => return None,
    })
  }

  fn arity(self) -> usize {
    match self {
      MatrixOp::Add | MatrixOp::Multiply => 2,
      MatrixOp::Transpose | MatrixOp::Determinant => 1,
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatrixTask {
  pub op: MatrixOp,
  pub operands: Vec<Matrix>,
}

impl MatrixTask {
  pub fn parse(src: &str) -> EngineResult<Self> {
    let src = src.trim();
    let open = src.find('(').ok_or_else(|| EngineError::parse("expected '<operation>(...)'", 0))?;
    let op = MatrixOp::parse(&src[..open])
      .ok_or_else(|| EngineError::parse(format!("unknown matrix operation '{}'", &src[..open]), 0))?;
    let body = src[open + 1..]
      .strip_suffix(')')
      .ok_or_else(|| EngineError::parse("expected ')'", src.len()))?;
    let operands = body.split(';').map(Matrix::parse).collect::<EngineResult<Vec<_>>>()?;
    if operands.len() != op.arity() {
      return Err(EngineError::parse(format!("{} takes {} matrix operand(s)", op.name(), op.arity()), open));
    }
    Ok(Self { op, operands })
  }

  /// The exact result: a matrix, or a number for determinants.
  pub fn evaluate(&self) -> EngineResult<Answer> {
    let a = &self.operands[0];
    Ok(match self.op {
      MatrixOp::Add => Answer::matrix(&a.add(&self.operands[1])?, 0.0),
      MatrixOp::Multiply => Answer::matrix(&a.mul(&self.operands[1])?, 0.0),
      MatrixOp::Transpose => Answer::matrix(&a.transpose(), 0.0),
      MatrixOp::Determinant => Answer::numeric(a.determinant()?, 0.0),
    })
  }
}

impl fmt::Display for MatrixTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let ms: Vec<String> = self.operands.iter().map(|m| m.to_string()).collect();
    write!(f, "{}({})", self.op.name(), ms.join("; "))
  }
}

pub struct LinearAlgebraGenerator;

impl ProblemGenerator for LinearAlgebraGenerator {
  fn problem_type(&self) -> ProblemType {
    ProblemType::LinearAlgebra
  }

  fn extra_keys(&self) -> &'static [&'static str] {
    &["operation", "size"]
  }

  fn draft(&self, ctx: &mut GenContext) -> EngineResult<Draft> {
    let op = match ctx.extra_str("operation")? {
      Some(s) => MatrixOp::parse(&s).ok_or_else(|| {
        EngineError::unsupported(format!("'operation' must be add, multiply, transpose or determinant, got '{s}'"))
      })?,
      None => {
        let pool: &[MatrixOp] = match ctx.level {
          DifficultyLevel::Beginner => &[MatrixOp::Add, MatrixOp::Transpose],
          DifficultyLevel::Intermediate => &[MatrixOp::Add, MatrixOp::Transpose, MatrixOp::Multiply],
          _ => &[MatrixOp::Add, MatrixOp::Multiply, MatrixOp::Determinant, MatrixOp::Transpose],
        };
        ctx.pick(pool)
      }
    };
    let size = match ctx.extra_u32("size")? {
      Some(s) if (2..=4).contains(&s) => s as usize,
      Some(s) => return Err(EngineError::unsupported(format!("'size' must be between 2 and 4, got {s}"))),
      None => ctx.params.operations.clamp(2, 3) as usize,
    };

    let a = random_matrix(ctx, size, size)?;
    let operands = match op {
      MatrixOp::Add => vec![a.clone(), random_matrix(ctx, size, size)?],
      MatrixOp::Multiply => {
        if ctx.level == DifficultyLevel::Expert && ctx.chance(0.5) {
          // rectangular: (n × n+1)(n+1 × n)
          vec![random_matrix(ctx, size, size + 1)?, random_matrix(ctx, size + 1, size)?]
        } else {
          vec![a.clone(), random_matrix(ctx, size, size)?]
        }
      }
      MatrixOp::Transpose => {
        if ctx.level >= DifficultyLevel::Intermediate && ctx.chance(0.5) {
          vec![random_matrix(ctx, size, size + 1)?]
        } else {
          vec![a.clone()]
        }
      }
      MatrixOp::Determinant => vec![a.clone()],
    };
    let task = MatrixTask { op, operands };
    let answer = task.evaluate()?;
    let distractors = distractors_for(&task, &answer)?;

    let names = ["A", "B"];
    let given: Vec<String> = task.operands.iter().zip(names).map(|(m, n)| format!("{n} = {m}")).collect();
    let ask = match op {
      MatrixOp::Add => "A + B",
      MatrixOp::Multiply => "the product AB",
      MatrixOp::Transpose => "the transpose of A",
      MatrixOp::Determinant => "the determinant of A",
    };
    let concepts = match op {
      MatrixOp::Add => vec!["matrix-addition"],
      MatrixOp::Multiply => vec!["matrix-multiplication"],
      MatrixOp::Transpose => vec!["transpose"],
      MatrixOp::Determinant => vec!["determinants", "cofactor-expansion"],
    };

    Ok(Draft {
      statement: format!("Given {}, compute {ask}.", given.join(" and ")),
      equation: Some(task.to_string()),
      diagram: None,
      answer,
      distractors,
      concepts,
    })
  }
}

fn random_matrix(ctx: &mut GenContext, rows: usize, cols: usize) -> EngineResult<Matrix> {
  let hi = ctx.params.max_operand;
  let data = (0..rows)
    .map(|_| {
      (0..cols)
        .map(|_| {
          let v = ctx.positive_in(0, hi);
          if ctx.params.allow_negative && ctx.chance(0.3) { -v as f64 } else { v as f64 }
        })
        .collect()
    })
    .collect();
  Matrix::new(data)
}

/// A copy of `m` with one entry nudged by `delta`.
fn nudged(m: &Matrix, row: usize, col: usize, delta: f64) -> Matrix {
  let mut rows = m.rows.clone();
  rows[row][col] += delta;
  Matrix { rows }
}

fn distractors_for(task: &MatrixTask, answer: &Answer) -> EngineResult<Vec<Distractor>> {
  let a = &task.operands[0];
  let mat = |m: Matrix, mistake| Distractor::new(Answer::matrix(&m, 0.0), mistake);
  let mut out = Vec::new();
  match task.op {
    MatrixOp::Add => {
      let b = &task.operands[1];
      let diff = Matrix { rows: a.rows.iter().zip(&b.rows).map(|(x, y)| x.iter().zip(y).map(|(p, q)| p - q).collect()).collect() };
      out.push(mat(diff, MistakeCategory::SignError));
      out.push(mat(a.add(&b.transpose())?, MistakeCategory::TransposedResult));
    }
    MatrixOp::Multiply => {
      let b = &task.operands[1];
      out.push(mat(b.mul(a)?, MistakeCategory::SwappedOperands));
      if a.dims() == b.dims() {
        let hadamard = Matrix { rows: a.rows.iter().zip(&b.rows).map(|(x, y)| x.iter().zip(y).map(|(p, q)| p * q).collect()).collect() };
        out.push(mat(hadamard, MistakeCategory::WrongFormula));
      }
      out.push(mat(a.mul(b)?.transpose(), MistakeCategory::TransposedResult));
    }
    MatrixOp::Transpose => {
      out.push(mat(a.clone(), MistakeCategory::Conceptual));
      let mut reversed = a.rows.clone();
      reversed.reverse();
      out.push(mat(Matrix { rows: reversed }.transpose(), MistakeCategory::WrongFormula));
    }
    MatrixOp::Determinant => {
      let (n, _) = a.dims();
      if n == 2 {
        let r = &a.rows;
        out.push(Distractor::new(Answer::numeric(r[0][0] * r[1][1] + r[0][1] * r[1][0], 0.0), MistakeCategory::SignError));
        out.push(Distractor::new(Answer::numeric(r[0][0] * r[1][1], 0.0), MistakeCategory::Conceptual));
      } else {
        // products down the diagonal only
        let diag: f64 = (0..n).map(|i| a.rows[i][i]).product();
        out.push(Distractor::new(Answer::numeric(diag, 0.0), MistakeCategory::Conceptual));
      }
      if let Answer::Numeric { value, .. } = answer {
        out.extend(numeric_slips(*value, 0.0));
      }
      return Ok(out);
    }
  }
  if let Answer::Matrix { rows, .. } = answer {
    let result = Matrix { rows: rows.clone() };
    let (r, c) = result.dims();
    out.push(mat(nudged(&result, 0, 0, 1.0), MistakeCategory::OffByOne));
    out.push(mat(nudged(&result, r - 1, c - 1, -1.0), MistakeCategory::OffByOne));
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::ProblemConfig;
  use crate::generators::GeneratorSet;
  use serde_json::json;

  #[test]
  fn task_grammar() {
    let t = MatrixTask::parse("multiply([[1, 2], [3, 4]]; [[5, 6], [7, 8]])").unwrap();
    assert_eq!(t.op, MatrixOp::Multiply);
    assert_eq!(t.evaluate().unwrap(), Answer::Matrix { rows: vec![vec![19.0, 22.0], vec![43.0, 50.0]], tolerance: Some(0.0) });
    assert_eq!(t.to_string(), "multiply([[1, 2], [3, 4]]; [[5, 6], [7, 8]])");
    assert!(MatrixTask::parse("transpose([[1, 2]]; [[3, 4]])").is_err());
    assert!(MatrixTask::parse("invert([[1]])").is_err());
  }

  #[test]
  fn size_parameter_is_checked() {
    let set = GeneratorSet::default();
    let cfg = ProblemConfig::new(ProblemType::LinearAlgebra, DifficultyLevel::Advanced)
      .with_param("operation", json!("determinant"))
      .with_param("size", json!(3));
    let (p, answer) = set.generate(&cfg, 5).unwrap();
    let task = MatrixTask::parse(p.equation.as_deref().unwrap()).unwrap();
    assert_eq!(task.operands[0].dims(), (3, 3));
    assert!(matches!(answer, Answer::Numeric { .. }));

    let bad = ProblemConfig::new(ProblemType::LinearAlgebra, DifficultyLevel::Advanced).with_param("size", json!(7));
    assert!(matches!(set.generate(&bad, 5), Err(EngineError::UnsupportedConfig(_))));
  }
}
