//! Area and perimeter of plane figures, and solving a figure for a missing dimension.
//!
//! The machine-readable task (`Problem.equation`) is one of
//! `area`, `perimeter`, `area, perimeter` or `<dimension>: <measure> = <value>`;
//! the figure itself lives in the diagram.

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::{Diagram, DifficultyLevel, Measure, MistakeCategory, ProblemType};
use crate::error::{EngineError, EngineResult};
use crate::expr::parse_expr;
use crate::util::{format_number, round_to};
use crate::value::{Answer, GraphValue, ShapeKind};

use super::{numeric_slips, Distractor, Draft, GenContext, ProblemGenerator};

pub const TOLERANCE: f64 = 0.01;
const PLACES: u32 = 2;

/// Formula for a measure of a figure, over the names in `ShapeKind::dimensions`.
pub fn formula(shape: ShapeKind, measure: Measure) -> &'static str {
  match (shape, measure) {
    (ShapeKind::Rectangle, Measure::Area) => "width * height",
    (ShapeKind::Rectangle, Measure::Perimeter) => "2 * (width + height)",
    (ShapeKind::Square, Measure::Area) => "side^2",
    (ShapeKind::Square, Measure::Perimeter) => "4 * side",
    (ShapeKind::Circle, Measure::Area) => "pi * radius^2",
    (ShapeKind::Circle, Measure::Perimeter) => "2 * pi * radius",
    (ShapeKind::RightTriangle, Measure::Area) => "leg_a * leg_b / 2",
    (ShapeKind::RightTriangle, Measure::Perimeter) => "leg_a + leg_b + sqrt(leg_a^2 + leg_b^2)",
    (ShapeKind::Trapezoid, Measure::Area) => "(base_a + base_b) / 2 * height",
    (ShapeKind::Trapezoid, Measure::Perimeter) => "base_a + base_b + 2 * sqrt(height^2 + ((base_a - base_b) / 2)^2)",
  }
}

pub fn measure_value(shape: ShapeKind, measure: Measure, dims: &BTreeMap<String, f64>) -> EngineResult<f64> {
  parse_expr(formula(shape, measure))?.eval(dims)
}

pub fn rounded(v: f64) -> f64 {
  round_to(v, PLACES)
}

/// What a geometry problem asks for.
#[derive(Clone, Debug, PartialEq)]
pub enum GeometryTask {
  Measures(Vec<Measure>),
  Unknown { dimension: String, measure: Measure, value: f64 },
}

impl GeometryTask {
  pub fn parse(src: &str) -> EngineResult<Self> {
    if let Some((dim, rest)) = src.split_once(':') {
      let (m, v) = rest
        .split_once('=')
        .ok_or_else(|| EngineError::parse("expected '<measure> = <value>' after ':'", dim.len() + 1))?;
      let measure = Measure::parse(m).ok_or_else(|| EngineError::parse(format!("unknown measure '{}'", m.trim()), dim.len() + 1))?;
      let value = v
        .trim()
        .parse::<f64>()
        .map_err(|_| EngineError::parse(format!("invalid value '{}'", v.trim()), src.len() - v.len()))?;
      return Ok(GeometryTask::Unknown { dimension: dim.trim().to_string(), measure, value });
    }
    let mut measures = Vec::new();
    for part in src.split(',') {
      let m = Measure::parse(part).ok_or_else(|| EngineError::parse(format!("unknown measure '{}'", part.trim()), 0))?;
      measures.push(m);
    }
    Ok(GeometryTask::Measures(measures))
  }
}

impl fmt::Display for GeometryTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GeometryTask::Measures(ms) => {
        let names: Vec<&str> = ms.iter().map(|m| m.as_str()).collect();
        write!(f, "{}", names.join(", "))
      }
      GeometryTask::Unknown { dimension, measure, value } => {
        write!(f, "{dimension}: {} = {}", measure.as_str(), format_number(*value))
      }
    }
  }
}

pub struct GeometryGenerator;

impl ProblemGenerator for GeometryGenerator {
  fn problem_type(&self) -> ProblemType {
    ProblemType::Geometry
  }

  fn extra_keys(&self) -> &'static [&'static str] {
    &["shape", "measure"]
  }

  fn draft(&self, ctx: &mut GenContext) -> EngineResult<Draft> {
    let shape = match ctx.extra_str("shape")? {
      Some(s) => ShapeKind::parse(&s).ok_or_else(|| EngineError::unsupported(format!("unknown shape '{s}'")))?,
      None => {
        let pool: &[ShapeKind] = match ctx.level {
          DifficultyLevel::Beginner => &[ShapeKind::Rectangle, ShapeKind::Square],
          DifficultyLevel::Intermediate => &[ShapeKind::Rectangle, ShapeKind::Square, ShapeKind::Circle, ShapeKind::RightTriangle],
          _ => &[ShapeKind::Rectangle, ShapeKind::Square, ShapeKind::Circle, ShapeKind::RightTriangle, ShapeKind::Trapezoid],
        };
        ctx.pick(pool)
      }
    };
    let requested = ctx.extra_str("measure")?;
    let both = match requested.as_deref() {
      Some("both") => true,
      Some(_) => false,
      None => ctx.level == DifficultyLevel::Expert && ctx.chance(0.5),
    };
    let fixed_measure = match requested.as_deref() {
      None | Some("both") => None,
      Some(m) => Some(Measure::parse(m).ok_or_else(|| EngineError::unsupported(format!("'measure' must be area, perimeter or both, got '{m}'")))?),
    };

    let dims = draw_dimensions(ctx, shape);

    if both {
      return draft_both(shape, dims);
    }
    let measure = match fixed_measure {
      Some(m) => m,
      None => ctx.pick(&[Measure::Area, Measure::Perimeter]),
    };

    let solvable_unknown = matches!(shape, ShapeKind::Rectangle | ShapeKind::Square)
      || (shape == ShapeKind::RightTriangle && measure == Measure::Area);
    if ctx.level >= DifficultyLevel::Advanced && solvable_unknown && ctx.chance(0.4) {
      return draft_unknown(ctx, shape, measure, dims);
    }
    draft_measure(shape, measure, dims)
  }
}

fn draw_dimensions(ctx: &mut GenContext, shape: ShapeKind) -> BTreeMap<String, f64> {
  let mut dims = BTreeMap::new();
  for name in shape.dimensions() {
    let mut v = ctx.positive_in(1, 30) as f64;
    if ctx.params.allow_fractions && ctx.chance(0.3) {
      v += 0.5;
    }
    dims.insert(name.to_string(), v);
  }
  if shape == ShapeKind::Trapezoid {
    let a = dims.get("base_a").copied().unwrap_or(1.0);
    let b = dims.get("base_b").copied().unwrap_or(1.0);
    if a == b {
      dims.insert("base_a".into(), a + 2.0);
    } else if a < b {
      dims.insert("base_a".into(), b);
      dims.insert("base_b".into(), a);
    }
  }
  dims
}

fn describe(shape: ShapeKind, dims: &BTreeMap<String, f64>) -> String {
  let parts: Vec<String> = shape
    .dimensions()
    .iter()
    .filter_map(|d| dims.get(*d).map(|v| format!("{} {}", d.replace('_', " "), format_number(*v))))
    .collect();
  parts.join(" and ")
}

fn shape_concept(shape: ShapeKind) -> &'static str {
  match shape {
    ShapeKind::Rectangle => "rectangles",
    ShapeKind::Square => "squares",
    ShapeKind::Circle => "circles",
    ShapeKind::RightTriangle => "right-triangles",
    ShapeKind::Trapezoid => "trapezoids",
  }
}

fn other(measure: Measure) -> Measure {
  match measure {
    Measure::Area => Measure::Perimeter,
    Measure::Perimeter => Measure::Area,
  }
}

fn draft_measure(shape: ShapeKind, measure: Measure, dims: BTreeMap<String, f64>) -> EngineResult<Draft> {
  let value = rounded(measure_value(shape, measure, &dims)?);
  let num = |v: f64| Answer::numeric(rounded(v), TOLERANCE);

  let mut distractors = vec![Distractor::new(num(measure_value(shape, other(measure), &dims)?), MistakeCategory::WrongFormula)];
  let get = |k: &str| dims.get(k).copied().unwrap_or(0.0);
  match (shape, measure) {
    (ShapeKind::Rectangle, Measure::Perimeter) => {
      distractors.push(Distractor::new(num(get("width") + get("height")), MistakeCategory::Conceptual));
    }
    (ShapeKind::Square, Measure::Area) => {
      distractors.push(Distractor::new(num(2.0 * get("side")), MistakeCategory::WrongFormula));
    }
    (ShapeKind::Circle, _) => {
      let mut as_diameter = dims.clone();
      as_diameter.insert("radius".into(), 2.0 * get("radius"));
      distractors.push(Distractor::new(num(measure_value(shape, measure, &as_diameter)?), MistakeCategory::Conceptual));
      let coarse = round_to(value, 1);
      if (coarse - value).abs() > TOLERANCE {
        distractors.push(Distractor::new(num(coarse), MistakeCategory::Rounding));
      }
    }
    (ShapeKind::RightTriangle, Measure::Area) => {
      distractors.push(Distractor::new(num(get("leg_a") * get("leg_b")), MistakeCategory::WrongFormula));
    }
    (ShapeKind::RightTriangle, Measure::Perimeter) => {
      distractors.push(Distractor::new(num(get("leg_a") + get("leg_b")), MistakeCategory::Conceptual));
    }
    (ShapeKind::Trapezoid, Measure::Area) => {
      distractors.push(Distractor::new(num((get("base_a") + get("base_b")) * get("height")), MistakeCategory::WrongFormula));
    }
    _ => {}
  }
  distractors.extend(numeric_slips(value, TOLERANCE));

  Ok(Draft {
    statement: format!("A {} has {}. Find its {}.", shape.name(), describe(shape, &dims), measure.as_str()),
    equation: Some(GeometryTask::Measures(vec![measure]).to_string()),
    diagram: Some(Diagram { shape, dimensions: dims }),
    answer: Answer::numeric(value, TOLERANCE),
    distractors,
    concepts: vec![measure.as_str(), shape_concept(shape)],
  })
}

fn draft_unknown(ctx: &mut GenContext, shape: ShapeKind, measure: Measure, mut dims: BTreeMap<String, f64>) -> EngineResult<Draft> {
  let names = shape.dimensions();
  let unknown = ctx.pick(names);
  let given = rounded(measure_value(shape, measure, &dims)?);
  let value = dims.remove(unknown).unwrap_or(0.0);
  let known: f64 = dims.values().product();

  let num = |v: f64| Answer::numeric(rounded(v), TOLERANCE);
  let mut distractors = Vec::new();
  if known > 0.0 && shape != ShapeKind::Square {
    distractors.push(Distractor::new(num(known / given), MistakeCategory::Reciprocal));
    distractors.push(Distractor::new(num(given - known), MistakeCategory::WrongFormula));
  }
  match (shape, measure) {
    (ShapeKind::Square, Measure::Area) => distractors.push(Distractor::new(num(given / 2.0), MistakeCategory::WrongFormula)),
    (ShapeKind::Square, Measure::Perimeter) => distractors.push(Distractor::new(num(given / 2.0), MistakeCategory::Conceptual)),
    (ShapeKind::RightTriangle, _) => distractors.push(Distractor::new(num(given / known), MistakeCategory::WrongFormula)),
    (ShapeKind::Rectangle, Measure::Perimeter) => distractors.push(Distractor::new(num(given / 2.0), MistakeCategory::Conceptual)),
    _ => {}
  }
  distractors.extend(numeric_slips(rounded(value), TOLERANCE));

  let task = GeometryTask::Unknown { dimension: unknown.to_string(), measure, value: given };
  let statement = if dims.is_empty() {
    format!("A {} has {} {}. Find its {}.", shape.name(), measure.as_str(), format_number(given), unknown.replace('_', " "))
  } else {
    format!(
      "A {} has {} {} and {}. Find its {}.",
      shape.name(),
      measure.as_str(),
      format_number(given),
      describe(shape, &dims),
      unknown.replace('_', " ")
    )
  };
  Ok(Draft {
    statement,
    equation: Some(task.to_string()),
    diagram: Some(Diagram { shape, dimensions: dims }),
    answer: Answer::numeric(rounded(value), TOLERANCE),
    distractors,
    concepts: vec![measure.as_str(), shape_concept(shape), "solving-for-unknown"],
  })
}

fn draft_both(shape: ShapeKind, dims: BTreeMap<String, f64>) -> EngineResult<Draft> {
  let area = rounded(measure_value(shape, Measure::Area, &dims)?);
  let perimeter = rounded(measure_value(shape, Measure::Perimeter, &dims)?);
  let graph = |shape: ShapeKind, area: f64, perimeter: f64| Answer::Graph {
    graph: GraphValue::Shape { shape, area: rounded(area), perimeter: rounded(perimeter) },
    tolerance: Some(TOLERANCE),
  };
  let distractors = vec![
    Distractor::new(graph(shape, perimeter, area), MistakeCategory::WrongFormula),
    Distractor::new(graph(shape, area + 1.0, perimeter), MistakeCategory::OffByOne),
    Distractor::new(graph(shape, area, perimeter * 2.0), MistakeCategory::MagnitudeError),
  ];
  Ok(Draft {
    statement: format!("A {} has {}. Find its area and perimeter.", shape.name(), describe(shape, &dims)),
    equation: Some(GeometryTask::Measures(vec![Measure::Area, Measure::Perimeter]).to_string()),
    diagram: Some(Diagram { shape, dimensions: dims }),
    answer: graph(shape, area, perimeter),
    distractors,
    concepts: vec!["area", "perimeter", shape_concept(shape)],
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::ProblemConfig;
  use crate::generators::GeneratorSet;
  use serde_json::json;

  #[test]
  fn task_grammar() {
    let t = GeometryTask::parse("width: area = 24").unwrap();
    assert_eq!(t, GeometryTask::Unknown { dimension: "width".into(), measure: Measure::Area, value: 24.0 });
    assert_eq!(t.to_string(), "width: area = 24");
    assert_eq!(GeometryTask::parse("area, perimeter").unwrap(), GeometryTask::Measures(vec![Measure::Area, Measure::Perimeter]));
    assert!(GeometryTask::parse("volume").is_err());
  }

  #[test]
  fn circle_area() {
    let dims = BTreeMap::from([("radius".to_string(), 3.0)]);
    assert_eq!(rounded(measure_value(ShapeKind::Circle, Measure::Area, &dims).unwrap()), 28.27);
  }

  #[test]
  fn requested_shape_and_both_measures() {
    let set = GeneratorSet::default();
    let cfg = ProblemConfig::new(ProblemType::Geometry, DifficultyLevel::Beginner)
      .with_param("shape", json!("circle"))
      .with_param("measure", json!("both"));
    let (p, answer) = set.generate(&cfg, 11).unwrap();
    assert_eq!(p.diagram.as_ref().unwrap().shape, ShapeKind::Circle);
    let Answer::Graph { graph: GraphValue::Shape { shape, .. }, .. } = answer else { panic!("shape answer expected") };
    assert_eq!(shape, ShapeKind::Circle);

    let bad = ProblemConfig::new(ProblemType::Geometry, DifficultyLevel::Beginner).with_param("shape", json!("hexagon"));
    assert!(matches!(set.generate(&bad, 1), Err(EngineError::UnsupportedConfig(_))));
  }

  #[test]
  fn unknown_dimension_is_hidden_from_the_diagram() {
    let set = GeneratorSet::default();
    let cfg = ProblemConfig::new(ProblemType::Geometry, DifficultyLevel::Advanced).with_param("shape", json!("rectangle"));
    let mut seen = false;
    for seed in 0..40 {
      let (p, _) = set.generate(&cfg, seed).unwrap();
      if let GeometryTask::Unknown { dimension, .. } = GeometryTask::parse(p.equation.as_deref().unwrap()).unwrap() {
        assert!(!p.diagram.as_ref().unwrap().dimensions.contains_key(&dimension));
        seen = true;
      }
    }
    assert!(seen);
  }
}
