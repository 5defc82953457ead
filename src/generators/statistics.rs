//! Descriptive statistics over a small data set.
//!
//! Task grammar: `<measure>(v1, v2, ...)` with measure one of
//! `mean`, `median`, `mode`, `range`, `stdev` (population standard deviation).

use std::fmt;

use rand::seq::SliceRandom;

use crate::domain::{DifficultyLevel, MistakeCategory, ProblemType};
use crate::error::{EngineError, EngineResult};
use crate::util::format_number;
use crate::value::Answer;

use super::arithmetic::canonical_value;
use super::{numeric_slips, Distractor, Draft, GenContext, ProblemGenerator};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatMeasure {
  Mean,
  Median,
  Mode,
  Range,
  Stdev,
}

impl StatMeasure {
  pub fn name(self) -> &'static str {
    match self {
      StatMeasure::Mean => "mean",
      StatMeasure::Median => "median",
      StatMeasure::Mode => "mode",
      StatMeasure::Range => "range",
      StatMeasure::Stdev => "stdev",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    Some(match s.trim() {
      "mean" | "average" => StatMeasure::Mean,
      "median" => StatMeasure::Median,
      "mode" => StatMeasure::Mode,
      "range" => StatMeasure::Range,
      "stdev" | "std" | "standard_deviation" => StatMeasure::Stdev,
      _ => return None,
    })
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StatTask {
  pub measure: StatMeasure,
  pub data: Vec<f64>,
}

impl StatTask {
  pub fn parse(src: &str) -> EngineResult<Self> {
    let src = src.trim();
    let open = src.find('(').ok_or_else(|| EngineError::parse("expected '<measure>(...)'", 0))?;
    let measure = StatMeasure::parse(&src[..open])
      .ok_or_else(|| EngineError::parse(format!("unknown statistic '{}'", &src[..open]), 0))?;
    let body = src[open + 1..]
      .strip_suffix(')')
      .ok_or_else(|| EngineError::parse("expected ')'", src.len()))?;
    let mut data = Vec::new();
    let mut offset = open + 1;
    for item in body.split(',') {
      let v = item
        .trim()
        .parse::<f64>()
        .map_err(|_| EngineError::parse(format!("invalid data value '{}'", item.trim()), offset))?;
      data.push(v);
      offset += item.len() + 1;
    }
    if data.is_empty() {
      return Err(EngineError::parse("empty data set", open + 1));
    }
    Ok(Self { measure, data })
  }
}

impl fmt::Display for StatTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let items: Vec<String> = self.data.iter().map(|v| format_number(*v)).collect();
    write!(f, "{}({})", self.measure.name(), items.join(", "))
  }
}

pub fn sorted(data: &[f64]) -> Vec<f64> {
  let mut s = data.to_vec();
  s.sort_by(|a, b| a.total_cmp(b));
  s
}

pub fn mean(data: &[f64]) -> f64 {
  data.iter().sum::<f64>() / data.len() as f64
}

/// Middle of an already ordered list; average of the two middles for even lengths.
pub fn middle(ordered: &[f64]) -> f64 {
  let n = ordered.len();
  if n % 2 == 1 {
    ordered[n / 2]
  } else {
    (ordered[n / 2 - 1] + ordered[n / 2]) / 2.0
  }
}

/// Most frequent value; the generator guarantees it is unique.
pub fn mode(data: &[f64]) -> Option<f64> {
  let ordered = sorted(data);
  let mut best: Option<(f64, usize)> = None;
  let mut tie = false;
  let mut i = 0;
  while i < ordered.len() {
    let mut j = i;
    while j < ordered.len() && ordered[j] == ordered[i] {
      j += 1;
    }
    let count = j - i;
    match best {
      Some((_, c)) if count == c => tie = true,
      Some((_, c)) if count < c => {}
      _ => {
        best = Some((ordered[i], count));
        tie = false;
      }
    }
    i = j;
  }
  match best {
    Some((v, c)) if c > 1 && !tie => Some(v),
    _ => None,
  }
}

pub fn variance(data: &[f64], denominator: f64) -> f64 {
  let m = mean(data);
  data.iter().map(|v| (v - m).powi(2)).sum::<f64>() / denominator
}

pub fn compute(task: &StatTask) -> EngineResult<f64> {
  let d = &task.data;
  Ok(match task.measure {
    StatMeasure::Mean => mean(d),
    StatMeasure::Median => middle(&sorted(d)),
    StatMeasure::Mode => mode(d).ok_or_else(|| EngineError::unsupported("data set has no unique mode"))?,
    StatMeasure::Range => {
      let s = sorted(d);
      s[s.len() - 1] - s[0]
    }
    StatMeasure::Stdev => variance(d, d.len() as f64).sqrt(),
  })
}

pub struct StatisticsGenerator;

impl ProblemGenerator for StatisticsGenerator {
  fn problem_type(&self) -> ProblemType {
    ProblemType::Statistics
  }

  fn extra_keys(&self) -> &'static [&'static str] {
    &["measure"]
  }

  fn draft(&self, ctx: &mut GenContext) -> EngineResult<Draft> {
    let measure = match ctx.extra_str("measure")? {
      Some(m) => StatMeasure::parse(&m)
        .ok_or_else(|| EngineError::unsupported(format!("'measure' must be mean, median, mode, range or stdev, got '{m}'")))?,
      None => {
        let pool: &[StatMeasure] = match ctx.level {
          DifficultyLevel::Beginner => &[StatMeasure::Mean, StatMeasure::Range, StatMeasure::Mode],
          DifficultyLevel::Intermediate => &[StatMeasure::Mean, StatMeasure::Median, StatMeasure::Range, StatMeasure::Mode],
          _ => &[StatMeasure::Mean, StatMeasure::Median, StatMeasure::Stdev],
        };
        ctx.pick(pool)
      }
    };

    let n = 4 + ctx.params.operations as usize;
    let mut data: Vec<f64> = (0..n).map(|_| ctx.operand() as f64).collect();
    if measure == StatMeasure::Mode {
      // plant a clear mode: one value three times, everything else at most once
      let v = data[0];
      data.retain(|x| *x != v);
      data.sort_by(|a, b| a.total_cmp(b));
      data.dedup();
      data.truncate(n.saturating_sub(3));
      let at = ctx.int_in(0, data.len() as i64) as usize;
      for _ in 0..3 {
        data.insert(at.min(data.len()), v);
      }
      data.shuffle(&mut ctx.rng);
    }

    let task = StatTask { measure, data };
    let (value, tolerance) = canonical_value(compute(&task)?);
    let tolerance = tolerance.max(if measure == StatMeasure::Stdev || measure == StatMeasure::Mean { 0.001 } else { 0.0 });

    let d = &task.data;
    let s = sorted(d);
    let slips: Vec<(f64, MistakeCategory)> = match measure {
      StatMeasure::Mean => vec![
        (d.iter().sum::<f64>() / (d.len() - 1) as f64, MistakeCategory::OffByOne),
        (middle(&s), MistakeCategory::Conceptual),
      ],
      StatMeasure::Median => vec![(middle(d), MistakeCategory::Conceptual), (mean(d), MistakeCategory::Conceptual)],
      StatMeasure::Mode => vec![(middle(&s), MistakeCategory::Conceptual), (mean(d), MistakeCategory::Conceptual)],
      StatMeasure::Range => vec![(s[s.len() - 1], MistakeCategory::Conceptual), (d[d.len() - 1] - d[0], MistakeCategory::Conceptual)],
      StatMeasure::Stdev => vec![
        (variance(d, (d.len() - 1) as f64).sqrt(), MistakeCategory::OffByOne),
        (variance(d, d.len() as f64), MistakeCategory::Conceptual),
      ],
    };
    let mut distractors: Vec<Distractor> = slips
      .into_iter()
      .map(|(v, m)| Distractor::new(Answer::numeric(canonical_value(v).0, tolerance), m))
      .collect();
    distractors.extend(numeric_slips(value, tolerance));

    let listing: Vec<String> = d.iter().map(|v| format_number(*v)).collect();
    let what = match measure {
      StatMeasure::Stdev => "population standard deviation",
      other => other.name(),
    };
    let mut statement = format!("Find the {what} of the data set: {}.", listing.join(", "));
    if tolerance > 0.0 {
      statement.push_str(" Round to 4 decimal places.");
    }

    Ok(Draft {
      statement,
      equation: Some(task.to_string()),
      diagram: None,
      answer: Answer::numeric(value, tolerance),
      distractors,
      concepts: vec![measure.name(), "descriptive-statistics"],
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::ProblemConfig;
  use crate::generators::GeneratorSet;
  use serde_json::json;

  #[test]
  fn measures() {
    let t = StatTask::parse("median(7, 1, 3, 9)").unwrap();
    assert_eq!(compute(&t).unwrap(), 5.0);
    let t = StatTask::parse("stdev(2, 4, 4, 4, 5, 5, 7, 9)").unwrap();
    assert_eq!(compute(&t).unwrap(), 2.0);
    let t = StatTask::parse("mode(3, 1, 3, 2)").unwrap();
    assert_eq!(compute(&t).unwrap(), 3.0);
    assert!(compute(&StatTask::parse("mode(1, 2, 3)").unwrap()).is_err());
    assert_eq!(t.to_string(), "mode(3, 1, 3, 2)");
    assert!(StatTask::parse("mean(1, x)").is_err());
    assert!(StatTask::parse("variance(1, 2)").is_err());
  }

  #[test]
  fn generated_mode_is_unique() {
    let set = GeneratorSet::default();
    for level in DifficultyLevel::ALL {
      let cfg = ProblemConfig::new(ProblemType::Statistics, level).with_param("measure", json!("mode"));
      for seed in 0..10 {
        let (p, _) = set.generate(&cfg, seed).unwrap();
        let task = StatTask::parse(p.equation.as_deref().unwrap()).unwrap();
        assert!(mode(&task.data).is_some(), "{}", p.problem_statement);
      }
    }
  }
}
