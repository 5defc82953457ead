//! Canonical value model: the closed `Answer` variant and the equality rules
//! for each payload kind.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::expr::parse_expr;
use crate::util::format_number;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerFormat {
  Text,
  Numeric,
  Equation,
  MultipleChoice,
  ShortAnswer,
  LongAnswer,
  Matrix,
  Graph,
}

impl fmt::Display for AnswerFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      AnswerFormat::Text => "TEXT",
      AnswerFormat::Numeric => "NUMERIC",
      AnswerFormat::Equation => "EQUATION",
      AnswerFormat::MultipleChoice => "MULTIPLE_CHOICE",
      AnswerFormat::ShortAnswer => "SHORT_ANSWER",
      AnswerFormat::LongAnswer => "LONG_ANSWER",
      AnswerFormat::Matrix => "MATRIX",
      AnswerFormat::Graph => "GRAPH",
    };
    write!(f, "{s}")
  }
}

/// An answer, tagged by format. Canonical NUMERIC and MATRIX answers must carry
/// a tolerance (see [`Answer::require_tolerance`]); submitted ones need not.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "format", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Answer {
  Text {
    value: String,
    #[serde(default, rename = "caseSensitive")]
    case_sensitive: bool,
  },
  Numeric {
    value: f64,
    #[serde(default)]
    tolerance: Option<f64>,
  },
  Equation {
    expression: String,
  },
  MultipleChoice {
    label: String,
    #[serde(default)]
    value: Option<Box<Answer>>,
  },
  ShortAnswer {
    value: String,
    #[serde(default, rename = "caseSensitive")]
    case_sensitive: bool,
  },
  LongAnswer {
    value: String,
  },
  Matrix {
    rows: Vec<Vec<f64>>,
    #[serde(default)]
    tolerance: Option<f64>,
  },
  Graph {
    graph: GraphValue,
    #[serde(default)]
    tolerance: Option<f64>,
  },
}

impl Answer {
  pub fn numeric(value: f64, tolerance: f64) -> Self {
    Answer::Numeric { value, tolerance: Some(tolerance) }
  }

  pub fn equation(expression: impl Into<String>) -> Self {
    Answer::Equation { expression: expression.into() }
  }

  pub fn matrix(m: &Matrix, tolerance: f64) -> Self {
    Answer::Matrix { rows: m.rows.clone(), tolerance: Some(tolerance) }
  }

  pub fn format(&self) -> AnswerFormat {
    match self {
      Answer::Text { .. } => AnswerFormat::Text,
      Answer::Numeric { .. } => AnswerFormat::Numeric,
      Answer::Equation { .. } => AnswerFormat::Equation,
      Answer::MultipleChoice { .. } => AnswerFormat::MultipleChoice,
      Answer::ShortAnswer { .. } => AnswerFormat::ShortAnswer,
      Answer::LongAnswer { .. } => AnswerFormat::LongAnswer,
      Answer::Matrix { .. } => AnswerFormat::Matrix,
      Answer::Graph { .. } => AnswerFormat::Graph,
    }
  }

  /// Canonical answers with numeric payloads must state their tolerance.
  /// An explicit `0.0` means exact equality.
  pub fn require_tolerance(&self) -> EngineResult<()> {
    let bad = |t: &Option<f64>| match t {
      None => Some("tolerance is unset"),
      Some(t) if !t.is_finite() || *t < 0.0 => Some("tolerance must be a finite value >= 0"),
      _ => None,
    };
    let problem = match self {
      Answer::Numeric { tolerance, .. } | Answer::Matrix { tolerance, .. } => bad(tolerance),
      Answer::Graph { graph: GraphValue::Shape { .. }, tolerance } => bad(tolerance),
      Answer::MultipleChoice { value: Some(inner), .. } => return inner.require_tolerance(),
      _ => None,
    };
    match problem {
      Some(msg) => Err(EngineError::ValidationAmbiguous(format!("{} answer: {msg}", self.format()))),
      None => Ok(()),
    }
  }

  /// The answer as a learner would write it.
  pub fn display(&self) -> String {
    match self {
      Answer::Text { value, .. } | Answer::ShortAnswer { value, .. } | Answer::LongAnswer { value } => value.clone(),
      Answer::Numeric { value, .. } => format_number(*value),
      Answer::Equation { expression } => expression.clone(),
      Answer::MultipleChoice { label, value } => match value {
        Some(v) => format!("{label}) {}", v.display()),
        None => label.clone(),
      },
      Answer::Matrix { rows, .. } => Matrix { rows: rows.clone() }.to_string(),
      Answer::Graph { graph, .. } => graph.to_string(),
    }
  }
}

/// `|a - b| <= tolerance`.
pub fn numbers_equal(a: f64, b: f64, tolerance: f64) -> bool {
  // small slack so that e.g. |3.15 - 3.14| == 0.01 is not lost to binary rounding
  (a - b).abs() <= tolerance + 1e-12 * 1f64.max(a.abs()).max(b.abs())
}

// ---------------- Matrices ----------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
  pub rows: Vec<Vec<f64>>,
}

impl Matrix {
  pub fn new(rows: Vec<Vec<f64>>) -> EngineResult<Self> {
    let width = rows.first().map(|r| r.len()).unwrap_or(0);
    if rows.is_empty() || width == 0 || rows.iter().any(|r| r.len() != width) {
      return Err(EngineError::parse("matrix rows must be non-empty and of equal length", 0));
    }
    Ok(Self { rows })
  }

  /// Parse a literal such as `[[1, 2], [3, 4]]`.
  pub fn parse(src: &str) -> EngineResult<Self> {
    let rows: Vec<Vec<f64>> = serde_json::from_str(src.trim())
      .map_err(|e| EngineError::parse(format!("invalid matrix literal: {e}"), e.column().saturating_sub(1)))?;
    Self::new(rows)
  }

  pub fn dims(&self) -> (usize, usize) {
    (self.rows.len(), self.rows.first().map(|r| r.len()).unwrap_or(0))
  }

  pub fn add(&self, other: &Matrix) -> EngineResult<Matrix> {
    if self.dims() != other.dims() {
      return Err(EngineError::unsupported("matrix addition needs equal dimensions"));
    }
    let rows = self
      .rows
      .iter()
      .zip(&other.rows)
      .map(|(a, b)| a.iter().zip(b).map(|(x, y)| x + y).collect())
      .collect();
    Ok(Matrix { rows })
  }

  pub fn mul(&self, other: &Matrix) -> EngineResult<Matrix> {
    let (n, k) = self.dims();
    let (k2, m) = other.dims();
    if k != k2 {
      return Err(EngineError::unsupported("matrix product needs inner dimensions to agree"));
    }
    let rows = (0..n)
      .map(|i| (0..m).map(|j| (0..k).map(|t| self.rows[i][t] * other.rows[t][j]).sum()).collect())
      .collect();
    Ok(Matrix { rows })
  }

  pub fn transpose(&self) -> Matrix {
    let (n, m) = self.dims();
    Matrix { rows: (0..m).map(|j| (0..n).map(|i| self.rows[i][j]).collect()).collect() }
  }

  /// Determinant by cofactor expansion along the first row (small matrices only).
  pub fn determinant(&self) -> EngineResult<f64> {
    let (n, m) = self.dims();
    if n != m {
      return Err(EngineError::unsupported("determinant needs a square matrix"));
    }
    Ok(det(&self.rows))
  }

  /// Elementwise equality within tolerance; mismatched shapes are simply unequal.
  pub fn approx_eq(&self, other: &Matrix, tolerance: f64) -> bool {
    self.dims() == other.dims()
      && self
        .rows
        .iter()
        .zip(&other.rows)
        .all(|(a, b)| a.iter().zip(b).all(|(x, y)| numbers_equal(*x, *y, tolerance)))
  }
}

fn det(rows: &[Vec<f64>]) -> f64 {
  match rows.len() {
    1 => rows[0][0],
    2 => rows[0][0] * rows[1][1] - rows[0][1] * rows[1][0],
    n => (0..n)
      .map(|j| {
        let minor: Vec<Vec<f64>> = rows[1..]
          .iter()
          .map(|r| r.iter().enumerate().filter(|(c, _)| *c != j).map(|(_, v)| *v).collect())
          .collect();
        let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
        sign * rows[0][j] * det(&minor)
      })
      .sum(),
  }
}

impl fmt::Display for Matrix {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let rows: Vec<String> = self
      .rows
      .iter()
      .map(|r| format!("[{}]", r.iter().map(|v| format_number(*v)).collect::<Vec<_>>().join(", ")))
      .collect();
    write!(f, "[{}]", rows.join(", "))
  }
}

// ---------------- Graphs & shapes ----------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
  Rectangle,
  Square,
  Circle,
  RightTriangle,
  Trapezoid,
}

impl ShapeKind {
  pub fn name(self) -> &'static str {
    match self {
      ShapeKind::Rectangle => "rectangle",
      ShapeKind::Square => "square",
      ShapeKind::Circle => "circle",
      ShapeKind::RightTriangle => "right triangle",
      ShapeKind::Trapezoid => "isosceles trapezoid",
    }
  }

  /// Dimension names, in the order the area/perimeter formulas consume them.
  pub fn dimensions(self) -> &'static [&'static str] {
    match self {
      ShapeKind::Rectangle => &["width", "height"],
      ShapeKind::Square => &["side"],
      ShapeKind::Circle => &["radius"],
      ShapeKind::RightTriangle => &["leg_a", "leg_b"],
      ShapeKind::Trapezoid => &["base_a", "base_b", "height"],
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    Some(match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
      "rectangle" => ShapeKind::Rectangle,
      "square" => ShapeKind::Square,
      "circle" => ShapeKind::Circle,
      "right_triangle" | "triangle" => ShapeKind::RightTriangle,
      "trapezoid" | "isosceles_trapezoid" => ShapeKind::Trapezoid,
      _ => return None,
    })
  }
}

/// Graph answers. Two comparison rules apply:
/// - `Network`: same vertex set and same edge relation. Undirected edges are
///   unordered pairs; directedness itself must agree.
/// - `Shape`: same kind, and `area` and `perimeter` both within tolerance.
///   Dimensions are not compared, so a 2×6 and a 3×4 rectangle differ
///   (perimeter 16 vs 14) while any two descriptions of the same figure agree.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphValue {
  Network {
    vertices: Vec<String>,
    edges: Vec<(String, String)>,
    #[serde(default)]
    directed: bool,
  },
  Shape {
    shape: ShapeKind,
    area: f64,
    perimeter: f64,
  },
}

impl GraphValue {
  fn edge_set(&self) -> Option<(BTreeSet<&str>, BTreeSet<(&str, &str)>, bool)> {
    match self {
      GraphValue::Network { vertices, edges, directed } => {
        let vs = vertices.iter().map(|v| v.as_str()).collect();
        let es = edges
          .iter()
          .map(|(a, b)| {
            let (a, b) = (a.as_str(), b.as_str());
            if !directed && b < a { (b, a) } else { (a, b) }
          })
          .collect();
        Some((vs, es, *directed))
      }
      GraphValue::Shape { .. } => None,
    }
  }

  pub fn equivalent(&self, other: &GraphValue, tolerance: f64) -> bool {
    match (self, other) {
      (
        GraphValue::Shape { shape: s1, area: a1, perimeter: p1 },
        GraphValue::Shape { shape: s2, area: a2, perimeter: p2 },
      ) => s1 == s2 && numbers_equal(*a1, *a2, tolerance) && numbers_equal(*p1, *p2, tolerance),
      (GraphValue::Network { .. }, GraphValue::Network { .. }) => self.edge_set() == other.edge_set(),
      _ => false,
    }
  }
}

impl GraphValue {
  /// The two measures of a figure as a learner would write them.
  pub fn measures_text(area: f64, perimeter: f64) -> String {
    format!("area = {}, perimeter = {}", format_number(area), format_number(perimeter))
  }

  /// Reads `area = A, perimeter = P` (either order) as the measures of a figure
  /// of the given kind. `None` unless both measures are present exactly once.
  pub fn parse_measures(shape: ShapeKind, src: &str) -> Option<GraphValue> {
    let (mut area, mut perimeter) = (None, None);
    for part in src.split([',', ';']) {
      let (name, value) = part.split_once('=')?;
      let value = parse_expr(value).ok()?.eval_constant().ok()?;
      let slot = match name.trim().to_lowercase().as_str() {
        "area" | "a" => &mut area,
        "perimeter" | "p" => &mut perimeter,
        _ => return None,
      };
      if slot.replace(value).is_some() {
        return None;
      }
    }
    Some(GraphValue::Shape { shape, area: area?, perimeter: perimeter? })
  }
}

impl fmt::Display for GraphValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GraphValue::Network { vertices, edges, directed } => {
        let arrow = if *directed { "->" } else { "-" };
        let es: Vec<String> = edges.iter().map(|(a, b)| format!("{a}{arrow}{b}")).collect();
        write!(f, "V={{{}}} E={{{}}}", vertices.join(", "), es.join(", "))
      }
      GraphValue::Shape { shape, area, perimeter } => write!(
        f,
        "{}: area {}, perimeter {}",
        shape.name(),
        format_number(*area),
        format_number(*perimeter)
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn numeric_tolerance_is_inclusive() {
    assert!(numbers_equal(3.15, 3.14159, 0.01));
    assert!(!numbers_equal(3.00, 3.14159, 0.01));
    assert!(numbers_equal(0.1 + 0.2, 0.3, 0.0));
    assert!(!numbers_equal(4.0, 5.0, 0.0));
  }

  #[test]
  fn unset_tolerance_is_ambiguous() {
    let a = Answer::Numeric { value: 1.0, tolerance: None };
    assert!(matches!(a.require_tolerance(), Err(EngineError::ValidationAmbiguous(_))));
    assert!(Answer::numeric(1.0, 0.0).require_tolerance().is_ok());
    assert!(Answer::equation("x = 1").require_tolerance().is_ok());
  }

  #[test]
  fn matrix_ops_and_equality() {
    let a = Matrix::parse("[[1, 2], [3, 4]]").unwrap();
    let b = Matrix::parse("[[5, 6], [7, 8]]").unwrap();
    assert_eq!(a.mul(&b).unwrap().rows, vec![vec![19.0, 22.0], vec![43.0, 50.0]]);
    assert_eq!(a.determinant().unwrap(), -2.0);
    assert_eq!(a.transpose().rows, vec![vec![1.0, 3.0], vec![2.0, 4.0]]);
    let c = Matrix::parse("[[1, 2, 3]]").unwrap();
    assert!(!a.approx_eq(&c, 0.5));
    assert!(Matrix::parse("[[1, 2], [3]]").is_err());
    let m3 = Matrix::parse("[[2, 0, 1], [1, 3, 2], [1, 1, 2]]").unwrap();
    assert_eq!(m3.determinant().unwrap(), 6.0);
  }

  #[test]
  fn shape_measures_read_from_text() {
    let g = GraphValue::parse_measures(ShapeKind::Square, "perimeter = 24, area = 36").unwrap();
    assert_eq!(g, GraphValue::Shape { shape: ShapeKind::Square, area: 36.0, perimeter: 24.0 });
    assert_eq!(GraphValue::measures_text(36.0, 24.0), "area = 36, perimeter = 24");
    assert!(GraphValue::parse_measures(ShapeKind::Square, "area = 36").is_none());
    assert!(GraphValue::parse_measures(ShapeKind::Square, "area = 36, area = 24").is_none());
    assert!(GraphValue::parse_measures(ShapeKind::Square, "volume = 1, area = 36").is_none());
  }

  #[test]
  fn undirected_edges_ignore_orientation() {
    let g1 = GraphValue::Network {
      vertices: vec!["A".into(), "B".into(), "C".into()],
      edges: vec![("A".into(), "B".into()), ("C".into(), "B".into())],
      directed: false,
    };
    let g2 = GraphValue::Network {
      vertices: vec!["C".into(), "B".into(), "A".into()],
      edges: vec![("B".into(), "C".into()), ("B".into(), "A".into())],
      directed: false,
    };
    assert!(g1.equivalent(&g2, 0.0));
    let GraphValue::Network { vertices, edges, .. } = g2 else { unreachable!() };
    let g3 = GraphValue::Network { vertices, edges, directed: true };
    assert!(!g1.equivalent(&g3, 0.0));
  }

  #[test]
  fn shapes_compare_by_invariants() {
    let a = GraphValue::Shape { shape: ShapeKind::Circle, area: 78.54, perimeter: 31.42 };
    let b = GraphValue::Shape { shape: ShapeKind::Circle, area: 78.5398, perimeter: 31.4159 };
    assert!(a.equivalent(&b, 0.01));
    let c = GraphValue::Shape { shape: ShapeKind::Square, area: 78.54, perimeter: 31.42 };
    assert!(!a.equivalent(&c, 0.01));
  }

  #[test]
  fn answers_serialize_with_format_tag() {
    let a = Answer::numeric(4.0, 0.0);
    let json = serde_json::to_value(&a).unwrap();
    assert_eq!(json["format"], "NUMERIC");
    let back: Answer = serde_json::from_value(json).unwrap();
    assert_eq!(back, a);
  }
}
