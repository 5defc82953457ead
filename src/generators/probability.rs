//! Probability of simple experiments: dice totals and draws without replacement.
//!
//! Task grammar:
//! - `dice(count=<n>, faces=<f>, sum=<s>)`: n fair f-sided dice show total s
//! - `draw(red=<r>, blue=<b>, take=<k>, want=<colour>)`: k draws without
//!   replacement are all of the wanted colour

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::{DifficultyLevel, MistakeCategory, ProblemType};
use crate::error::{EngineError, EngineResult};
use crate::expr::binomial;
use crate::value::Answer;

use super::arithmetic::canonical_value;
use super::{Distractor, Draft, GenContext, ProblemGenerator};

pub const TOLERANCE: f64 = 0.001;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Experiment {
  Dice { count: u32, faces: u32, sum: u32 },
  Draw { red: u32, blue: u32, take: u32, want_red: bool },
}

impl Experiment {
  pub fn parse(src: &str) -> EngineResult<Self> {
    let src = src.trim();
    let open = src.find('(').ok_or_else(|| EngineError::parse("expected '<experiment>(...)'", 0))?;
    let body = src[open + 1..]
      .strip_suffix(')')
      .ok_or_else(|| EngineError::parse("expected ')'", src.len()))?;
    let mut args: BTreeMap<&str, &str> = BTreeMap::new();
    for part in body.split(',') {
      let (k, v) = part
        .split_once('=')
        .ok_or_else(|| EngineError::parse(format!("expected key=value, got '{}'", part.trim()), open + 1))?;
      args.insert(k.trim(), v.trim());
    }
    let int = |key: &str| -> EngineResult<u32> {
      args
        .get(key)
        .ok_or_else(|| EngineError::parse(format!("missing '{key}'"), open + 1))?
        .parse::<u32>()
        .map_err(|_| EngineError::parse(format!("'{key}' must be a non-negative integer"), open + 1))
    };
    match &src[..open] {
      "dice" => Ok(Experiment::Dice { count: int("count")?, faces: int("faces")?, sum: int("sum")? }),
      "draw" => {
        let want_red = match args.get("want").copied() {
          Some("red") => true,
          Some("blue") => false,
          _ => return Err(EngineError::parse("'want' must be red or blue", open + 1)),
        };
        Ok(Experiment::Draw { red: int("red")?, blue: int("blue")?, take: int("take")?, want_red })
      }
      other => Err(EngineError::parse(format!("unknown experiment '{other}'"), 0)),
    }
  }
}

impl fmt::Display for Experiment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Experiment::Dice { count, faces, sum } => write!(f, "dice(count={count}, faces={faces}, sum={sum})"),
      Experiment::Draw { red, blue, take, want_red } => write!(
        f,
        "draw(red={red}, blue={blue}, take={take}, want={})",
        if *want_red { "red" } else { "blue" }
      ),
    }
  }
}

/// Number of ways `count` dice with `faces` faces total `sum`, by dynamic programming over dice.
pub fn dice_ways(count: u32, faces: u32, sum: u32) -> u64 {
  let max = (count * faces) as usize;
  let mut ways = vec![0u64; max + 1];
  ways[0] = 1;
  for _ in 0..count {
    let mut next = vec![0u64; max + 1];
    for (total, w) in ways.iter().enumerate() {
      if *w == 0 {
        continue;
      }
      for face in 1..=faces as usize {
        if total + face <= max {
          next[total + face] += w;
        }
      }
    }
    ways = next;
  }
  ways.get(sum as usize).copied().unwrap_or(0)
}

pub struct ProbabilityGenerator;

impl ProblemGenerator for ProbabilityGenerator {
  fn problem_type(&self) -> ProblemType {
    ProblemType::Probability
  }

  fn extra_keys(&self) -> &'static [&'static str] {
    &["experiment"]
  }

  fn draft(&self, ctx: &mut GenContext) -> EngineResult<Draft> {
    let dice = match ctx.extra_str("experiment")?.as_deref() {
      Some("dice") => true,
      Some("draw") => false,
      Some(other) => return Err(EngineError::unsupported(format!("'experiment' must be dice or draw, got '{other}'"))),
      None => ctx.chance(0.5),
    };

    let (experiment, value, slips, statement, concepts) = if dice {
      let count = match ctx.level {
        DifficultyLevel::Beginner => 1,
        DifficultyLevel::Intermediate => 2,
        _ => ctx.int_in(2, 3) as u32,
      };
      let faces = if ctx.level == DifficultyLevel::Expert { ctx.pick(&[4u32, 6, 8]) } else { 6 };
      let sum = ctx.int_in(count as i64, (count * faces) as i64) as u32;
      let total = (faces as u64).pow(count);
      let ways = dice_ways(count, faces, sum);
      let p = ways as f64 / total as f64;
      let slips = vec![
        (1.0 - p, MistakeCategory::Conceptual),
        ((ways + 1) as f64 / total as f64, MistakeCategory::OffByOne),
        (ways as f64 / (faces * count) as f64, MistakeCategory::WrongFormula),
      ];
      let statement = if count == 1 {
        format!("A fair {faces}-sided die is rolled. What is the probability of rolling a {sum}?")
      } else {
        format!("{count} fair {faces}-sided dice are rolled. What is the probability that the total is {sum}?")
      };
      (Experiment::Dice { count, faces, sum }, p, slips, statement, vec!["counting-outcomes", "equally-likely-outcomes"])
    } else {
      let hi = ctx.params.max_operand.clamp(3, 12);
      let red = ctx.positive_in(2, hi) as u32;
      let blue = ctx.positive_in(2, hi) as u32;
      let take = match ctx.level {
        DifficultyLevel::Beginner => 1,
        DifficultyLevel::Intermediate => 2,
        _ => ctx.int_in(2, 3) as u32,
      };
      let want_red = ctx.chance(0.5);
      let wanted = if want_red { red } else { blue };
      let take = take.min(wanted);
      let n = red + blue;
      let p = binomial(wanted as f64, take as f64) / binomial(n as f64, take as f64);
      let slips = vec![
        ((wanted as f64 / n as f64).powi(take as i32), MistakeCategory::Conceptual),
        (1.0 - p, MistakeCategory::Conceptual),
        // odds instead of probability
        (wanted as f64 / (n - wanted) as f64, MistakeCategory::WrongFormula),
        (binomial(wanted as f64, take as f64) / binomial((n + 1) as f64, take as f64), MistakeCategory::OffByOne),
      ];
      let colour = if want_red { "red" } else { "blue" };
      let statement = if take == 1 {
        format!("A bag holds {red} red and {blue} blue marbles. One marble is drawn at random. What is the probability that it is {colour}?")
      } else {
        format!(
          "A bag holds {red} red and {blue} blue marbles. {take} marbles are drawn without replacement. What is the probability that all of them are {colour}?"
        )
      };
      (
        Experiment::Draw { red, blue, take, want_red },
        p,
        slips,
        statement,
        vec!["combinations", "without-replacement"],
      )
    };

    let value = canonical_value(value).0;
    let distractors = slips
      .into_iter()
      .filter(|(v, _)| v.is_finite())
      .map(|(v, m)| Distractor::new(Answer::numeric(canonical_value(v).0, TOLERANCE), m))
      .collect();

    Ok(Draft {
      statement: format!("{statement} Give the answer as a decimal rounded to 4 places."),
      equation: Some(experiment.to_string()),
      diagram: None,
      answer: Answer::numeric(value, TOLERANCE),
      distractors,
      concepts,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn two_dice_totals() {
    assert_eq!(dice_ways(2, 6, 7), 6);
    assert_eq!(dice_ways(2, 6, 2), 1);
    assert_eq!(dice_ways(2, 6, 13), 0);
    assert_eq!((2..=12).map(|s| dice_ways(2, 6, s)).sum::<u64>(), 36);
  }

  #[test]
  fn grammar() {
    let e = Experiment::parse("draw(red=5, blue=3, take=2, want=red)").unwrap();
    assert_eq!(e, Experiment::Draw { red: 5, blue: 3, take: 2, want_red: true });
    assert_eq!(e.to_string(), "draw(red=5, blue=3, take=2, want=red)");
    assert!(Experiment::parse("dice(count=2, faces=6)").is_err());
    assert!(Experiment::parse("coin(flips=3)").is_err());
  }
}
