//! Step-by-step solutions.
//!
//! `solve` works from a problem's `equation` and `diagram` only, never from the
//! stored answer, and then cross-checks its own result against `correct_answer`.
//! Each step records the expression a learner would write at that point; when
//! the expression is a constant its value is recorded alongside, computed from
//! the displayed text so a reader can re-check every step.

use std::collections::BTreeMap;

use tracing::{debug, instrument, warn};

use crate::domain::{Diagram, MathExpression, MathSolution, MathStep, Measure, Problem, ProblemType, StepOperation};
use crate::error::{EngineError, EngineResult};
use crate::expr::{binomial, parse_equation, parse_expr, to_poly, BinOp, Expr, Func, Poly};
use crate::generators::arithmetic::canonical_value;
use crate::generators::calculus::{at, CalculusTask, VARIABLE};
use crate::generators::geometry::{formula, rounded, GeometryTask, TOLERANCE as GEOMETRY_TOLERANCE};
use crate::generators::linear_algebra::{MatrixOp, MatrixTask};
use crate::generators::probability::{dice_ways, Experiment, TOLERANCE as PROBABILITY_TOLERANCE};
use crate::generators::statistics::{self, StatMeasure, StatTask};
use crate::util::format_number;
use crate::validator::answers_equivalent;
use crate::value::{Answer, GraphValue, Matrix};

const TRIG_TOLERANCE: f64 = 0.001;

#[derive(Default)]
struct Trace {
  steps: Vec<MathStep>,
}

impl Trace {
  fn step(&mut self, expression: impl Into<String>, operation: StepOperation, justification: impl Into<String>) {
    self.push(expression.into(), operation, justification.into(), false);
  }

  /// A step that reduces the previous one without changing its value.
  fn rewrite(&mut self, expression: impl Into<String>, operation: StepOperation, justification: impl Into<String>) {
    let chained = !self.steps.is_empty();
    self.push(expression.into(), operation, justification.into(), chained);
  }

  fn push(&mut self, expression: String, operation: StepOperation, justification: String, rewrites_previous: bool) {
    if self.steps.last().is_some_and(|s| s.expression.expression == expression) {
      return;
    }
    let value = constant_value(&expression);
    self.steps.push(MathStep {
      step_number: self.steps.len() as u32 + 1,
      expression: MathExpression { expression, value },
      operation,
      justification,
      rewrites_previous,
    });
  }

  /// Final "round to the required precision" step, unless the last step already shows it.
  fn round(&mut self, value: f64, precision: &str) {
    self.step(format_number(value), StepOperation::Evaluate, format!("Evaluate and round to {precision}."));
  }
}

fn constant_value(src: &str) -> Option<f64> {
  let e = parse_expr(src).ok()?;
  if !e.is_constant() {
    return None;
  }
  e.eval_constant().ok()
}

/// Negative numbers wrapped in parentheses, for use inside larger expressions.
fn num_tok(v: f64) -> String {
  if v < 0.0 { format!("({})", format_number(v)) } else { format_number(v) }
}

/// Steps display at most six decimals, so a reduced step may drift from its
/// predecessor by that much.
const CHAIN_RTOL: f64 = 1e-4;

fn mismatch(expected: String, derived: String) -> EngineError {
  EngineError::SolutionMismatch { expected, derived }
}

impl MathSolution {
  /// Steps are numbered 1..n, every constant step expression evaluates to the
  /// value recorded with it, every rewriting step keeps its predecessor's
  /// value, and the last step reads as the final answer.
  pub fn check_consistency(&self) -> EngineResult<()> {
    let Some(last) = self.steps.last() else {
      return Err(mismatch("at least one step".into(), "no steps".into()));
    };
    for (i, step) in self.steps.iter().enumerate() {
      let n = i as u32 + 1;
      if step.step_number != n {
        return Err(mismatch(format!("step number {n}"), format!("step number {}", step.step_number)));
      }
      let actual = constant_value(&step.expression.expression);
      if let Some(recorded) = step.expression.value {
        let ok = actual.is_some_and(|a| (a - recorded).abs() <= 1e-9 * 1f64.max(a.abs()));
        if !ok {
          return Err(mismatch(
            format!("step {n} '{}' = {}", step.expression.expression, format_number(recorded)),
            actual.map(format_number).unwrap_or_else(|| "no value".into()),
          ));
        }
      }
      if step.rewrites_previous {
        let before = i.checked_sub(1).and_then(|j| self.steps[j].expression.value);
        let kept = matches!((before, actual), (Some(b), Some(a)) if (a - b).abs() <= CHAIN_RTOL * 1f64.max(a.abs()).max(b.abs()));
        if !kept {
          return Err(mismatch(
            format!("step {n} '{}' to keep the value {}", step.expression.expression, before.map(format_number).unwrap_or_else(|| "of the previous step".into())),
            actual.map(format_number).unwrap_or_else(|| "no value".into()),
          ));
        }
      }
    }
    let answer = match &self.final_answer {
      Answer::MultipleChoice { value: Some(inner), .. } => inner.as_ref(),
      other => other,
    };
    let shown = Answer::Text { value: last.expression.expression.clone(), case_sensitive: false };
    if !answers_equivalent(answer, &shown) {
      return Err(mismatch(answer.display(), format!("last step '{}'", last.expression.expression)));
    }
    Ok(())
  }
}

/// Derive the full solution and check it against the stored answer.
#[instrument(level = "debug", skip(problem), fields(problem_id = %problem.id, problem_type = %problem.problem_type))]
pub fn solve(problem: &Problem) -> EngineResult<MathSolution> {
  let (steps, derived) = derive(problem)?;
  self_check(problem, &derived)?;
  let solution = MathSolution { steps, final_answer: problem.correct_answer.clone() };
  solution.check_consistency()?;
  debug!(target: "solver", steps = solution.steps.len(), answer = %derived.display(), "Solved");
  Ok(solution)
}

/// Steps and the answer they arrive at, with no cross-check.
pub fn derive(problem: &Problem) -> EngineResult<(Vec<MathStep>, Answer)> {
  let equation = problem
    .equation
    .as_deref()
    .ok_or_else(|| EngineError::unsupported(format!("{} problem has no equation to solve", problem.problem_type)))?;
  let mut t = Trace::default();
  let answer = match problem.problem_type {
    ProblemType::Arithmetic => solve_arithmetic(&mut t, equation, false)?,
    ProblemType::WordProblems => solve_arithmetic(&mut t, equation, true)?,
    ProblemType::Algebra => solve_linear(&mut t, equation)?,
    ProblemType::Geometry => {
      let diagram = problem
        .diagram
        .as_ref()
        .ok_or_else(|| EngineError::unsupported("geometry problem has no diagram"))?;
      solve_geometry(&mut t, equation, diagram)?
    }
    ProblemType::Trigonometry => solve_trig(&mut t, equation)?,
    ProblemType::Calculus => solve_calculus(&mut t, equation)?,
    ProblemType::Statistics => solve_statistics(&mut t, equation)?,
    ProblemType::Probability => solve_probability(&mut t, equation)?,
    ProblemType::LinearAlgebra => solve_matrix(&mut t, equation)?,
  };
  Ok((t.steps, answer))
}

fn self_check(problem: &Problem, derived: &Answer) -> EngineResult<()> {
  let expected = match &problem.correct_answer {
    Answer::MultipleChoice { value: Some(inner), .. } => inner.as_ref(),
    Answer::MultipleChoice { value: None, .. } => {
      return Err(EngineError::unsupported("multiple-choice answer carries no value to check"));
    }
    other => other,
  };
  if answers_equivalent(expected, derived) {
    return Ok(());
  }
  warn!(target: "solver", problem_id = %problem.id, expected = %expected.display(), derived = %derived.display(), "Solver disagrees with the stored answer");
  Err(EngineError::SolutionMismatch { expected: expected.display(), derived: derived.display() })
}

/// Short hints drawn from the solution's first move, the concepts and the usual slips.
pub fn hints(problem: &Problem, solution: &MathSolution) -> Vec<String> {
  let mut out = Vec::new();
  if let Some(first) = solution.steps.first() {
    out.push(format!("Start here: {}", first.justification));
  }
  if !problem.concepts.is_empty() {
    let names: Vec<String> = problem.concepts.iter().map(|c| c.replace('-', " ")).collect();
    out.push(format!("This uses {}.", names.join(", ")));
  }
  if let Some(m) = problem.common_mistakes.first() {
    out.push(format!("Common slip ({}): {}", m.label(), m.suggestion()));
  }
  out
}

// ---------------- arithmetic ----------------

fn reduction(op: BinOp) -> (StepOperation, &'static str) {
  match op {
    BinOp::Add => (StepOperation::Add, "Add, working left to right."),
    BinOp::Sub => (StepOperation::Subtract, "Subtract, working left to right."),
    BinOp::Mul => (StepOperation::Multiply, "Multiply; multiplication and division come before addition and subtraction."),
    BinOp::Div => (StepOperation::Divide, "Divide; multiplication and division come before addition and subtraction."),
    BinOp::Pow => (StepOperation::Exponentiate, "Evaluate the power first."),
  }
}

/// One operator per step, innermost and leftmost first.
fn reduce_all(t: &mut Trace, mut current: Expr) {
  while let Some((next, op)) = current.reduce_once() {
    let (operation, why) = reduction(op);
    t.rewrite(next.to_string(), operation, why);
    current = next;
  }
}

fn solve_arithmetic(t: &mut Trace, src: &str, from_story: bool) -> EngineResult<Answer> {
  let expr = parse_expr(src)?;
  if !expr.is_constant() {
    return Err(EngineError::unsupported("arithmetic expression contains variables"));
  }
  let exact = expr.eval_constant()?;
  if from_story {
    t.step(expr.to_string(), StepOperation::Translate, "Write the story as an arithmetic expression.");
  }
  reduce_all(t, expr);
  let (value, tolerance) = canonical_value(exact);
  t.round(value, "4 decimal places");
  Ok(Answer::numeric(value, tolerance))
}

// ---------------- algebra ----------------

fn solve_linear(t: &mut Trace, src: &str) -> EngineResult<Answer> {
  let eq = parse_equation(src)?;
  let vars = eq.variables();
  let var = match (vars.len(), vars.iter().next()) {
    (1, Some(v)) => v.clone(),
    _ => return Err(EngineError::unsupported("expected a linear equation in one variable")),
  };
  let (Some(lhs), Some(rhs)) = (to_poly(&eq.lhs), to_poly(&eq.rhs)) else {
    return Err(EngineError::unsupported("equation is not polynomial"));
  };
  t.step(format!("{lhs} = {rhs}"), StepOperation::Simplify, "Expand brackets and simplify each side.");

  let residual = lhs.sub(&rhs);
  if residual.degree_in(&var) != 1 {
    return Err(EngineError::unsupported("only linear equations are solved"));
  }
  let a = residual.coefficient(&vec![(var.clone(), 1)]);
  let c = -residual.coefficient(&vec![]);
  t.step(
    format!("{} = {}", Poly::variable(&var).scale(a), format_number(c)),
    StepOperation::CollectLikeTerms,
    format!("Collect the {var} terms on the left and the constants on the right."),
  );

  let (value, _) = canonical_value(c / a);
  let solved = format!("{var} = {}", format_number(value));
  if (a - 1.0).abs() < 1e-12 {
    t.step(solved.clone(), StepOperation::IsolateVariable, format!("{var} is now alone on one side."));
  } else {
    t.step(solved.clone(), StepOperation::DivideBothSides, format!("Divide both sides by {}.", format_number(a)));
  }

  let env = BTreeMap::from([(var.clone(), value)]);
  let left = eq.lhs.substitute(&env);
  let right = eq.rhs.substitute(&env).eval_constant()?;
  t.step(
    left.to_string(),
    StepOperation::Verify,
    format!("Check: with {solved} the left side equals the right side, {}.", format_number(right)),
  );
  t.step(solved.clone(), StepOperation::IsolateVariable, format!("The solution is {solved}."));
  Ok(Answer::equation(solved))
}

// ---------------- geometry ----------------

fn apply_formula(t: &mut Trace, d: &Diagram, measure: Measure) -> EngineResult<f64> {
  let f = formula(d.shape, measure);
  t.step(f, StepOperation::ApplyFormula, format!("The {} of a {} is {f}.", measure.as_str(), d.shape.name()));
  let e = parse_expr(f)?.substitute(&d.dimensions);
  if !e.is_constant() {
    return Err(EngineError::unsupported(format!("diagram is missing a dimension of the {}", d.shape.name())));
  }
  t.step(e.to_string(), StepOperation::Substitute, "Substitute the given dimensions.");
  let v = rounded(e.eval_constant()?);
  t.round(v, "2 decimal places");
  Ok(v)
}

fn solve_geometry(t: &mut Trace, src: &str, d: &Diagram) -> EngineResult<Answer> {
  match GeometryTask::parse(src)? {
    GeometryTask::Measures(measures) => {
      let (mut area, mut perimeter) = (None, None);
      for m in &measures {
        let v = apply_formula(t, d, *m)?;
        match m {
          Measure::Area => area = Some(v),
          Measure::Perimeter => perimeter = Some(v),
        }
      }
      match (measures.len(), area, perimeter) {
        (1, Some(v), None) | (1, None, Some(v)) => Ok(Answer::numeric(v, GEOMETRY_TOLERANCE)),
        (2, Some(area), Some(perimeter)) => {
          t.step(GraphValue::measures_text(area, perimeter), StepOperation::Evaluate, format!("Both measures of the {}.", d.shape.name()));
          Ok(Answer::Graph {
            graph: GraphValue::Shape { shape: d.shape, area, perimeter },
            tolerance: Some(GEOMETRY_TOLERANCE),
          })
        }
        _ => Err(EngineError::parse("expected 'area', 'perimeter' or 'area, perimeter'", 0)),
      }
    }
    GeometryTask::Unknown { dimension, measure, value } => {
      if !d.shape.dimensions().contains(&dimension.as_str()) {
        return Err(EngineError::parse(format!("a {} has no dimension '{dimension}'", d.shape.name()), 0));
      }
      let f = formula(d.shape, measure);
      let given = format_number(value);
      t.step(format!("{f} = {given}"), StepOperation::ApplyFormula, format!("The {} of a {} is {f}.", measure.as_str(), d.shape.name()));
      let known = parse_expr(f)?.substitute(&d.dimensions);
      if known.variables().into_iter().any(|v| v != dimension) {
        return Err(EngineError::unsupported(format!("diagram leaves more than {dimension} unknown")));
      }
      t.step(format!("{known} = {given}"), StepOperation::Substitute, "Substitute the known dimensions.");

      let residual = to_poly(&Expr::bin(BinOp::Sub, known, Expr::num(value)))
        .ok_or_else(|| EngineError::unsupported(format!("cannot solve the {} formula for {dimension}", measure.as_str())))?;
      let c1 = residual.coefficient(&vec![(dimension.clone(), 1)]);
      let c0 = residual.coefficient(&vec![]);
      let (root, how) = match residual.degree_in(&dimension) {
        1 => (-c0 / c1, "Solve the linear equation"),
        2 => {
          let c2 = residual.coefficient(&vec![(dimension.clone(), 2)]);
          let disc = c1 * c1 - 4.0 * c2 * c0;
          if disc < 0.0 {
            return Err(EngineError::unsupported(format!("no real {dimension} gives that {}", measure.as_str())));
          }
          let r1 = (-c1 + disc.sqrt()) / (2.0 * c2);
          let r2 = (-c1 - disc.sqrt()) / (2.0 * c2);
          (r1.max(r2), "Solve the quadratic and keep the positive root")
        }
        _ => return Err(EngineError::unsupported(format!("cannot solve the {} formula for {dimension}", measure.as_str()))),
      };
      if root <= 0.0 {
        return Err(EngineError::unsupported(format!("no positive {dimension} gives that {}", measure.as_str())));
      }
      let v = rounded(root);
      t.step(format!("{dimension} = {}", format_number(v)), StepOperation::SolveForUnknown, format!("{how} for {}.", dimension.replace('_', " ")));

      let mut all = d.dimensions.clone();
      all.insert(dimension.clone(), v);
      let check = parse_expr(f)?.substitute(&all);
      t.step(check.to_string(), StepOperation::Verify, format!("Check: the {} comes out as {given}.", measure.as_str()));
      let found = format!("{dimension} = {}", format_number(v));
      t.step(found, StepOperation::SolveForUnknown, format!("The missing {} is {}.", dimension.replace('_', " "), format_number(v)));
      Ok(Answer::numeric(v, GEOMETRY_TOLERANCE))
    }
  }
}

// ---------------- trigonometry ----------------

fn collect_calls(e: &Expr, out: &mut Vec<Expr>) {
  match e {
    Expr::Call(..) => out.push(e.clone()),
    Expr::Neg(inner) | Expr::Degrees(inner) => collect_calls(inner, out),
    Expr::Bin(_, a, b) => {
      collect_calls(a, out);
      collect_calls(b, out);
    }
    Expr::Num(_) | Expr::Var(_) => {}
  }
}

fn replace_calls(e: &Expr) -> EngineResult<Expr> {
  Ok(match e {
    Expr::Call(..) => Expr::num(e.eval_constant()?),
    Expr::Neg(inner) => Expr::Neg(Box::new(replace_calls(inner)?)),
    Expr::Bin(op, a, b) => Expr::bin(*op, replace_calls(a)?, replace_calls(b)?),
    other => other.clone(),
  })
}

fn ratio_justification(call: &Expr) -> String {
  match call {
    Expr::Call(Func::Sin, _) => format!("{call}: sine is opposite over hypotenuse; the angle is in degrees."),
    Expr::Call(Func::Cos, _) => format!("{call}: cosine is adjacent over hypotenuse; the angle is in degrees."),
    Expr::Call(Func::Tan, _) => format!("{call}: tangent is opposite over adjacent; the angle is in degrees."),
    other => format!("Evaluate {other}."),
  }
}

fn solve_trig(t: &mut Trace, src: &str) -> EngineResult<Answer> {
  let expr = parse_expr(src)?;
  if !expr.is_constant() {
    return Err(EngineError::unsupported("trigonometric expression contains variables"));
  }
  let exact = expr.eval_constant()?;
  let mut calls = Vec::new();
  collect_calls(&expr, &mut calls);
  for call in &calls {
    t.step(call.to_string(), StepOperation::ApplyTrigRatio, ratio_justification(call));
  }
  if !matches!(expr, Expr::Call(..)) {
    let replaced = replace_calls(&expr)?;
    t.step(replaced.to_string(), StepOperation::Substitute, "Substitute the ratio values.");
    reduce_all(t, replaced);
  }
  let (value, _) = canonical_value(exact);
  t.round(value, "4 decimal places");
  Ok(Answer::numeric(value, TRIG_TOLERANCE))
}

// ---------------- calculus ----------------

fn solve_calculus(t: &mut Trace, src: &str) -> EngineResult<Answer> {
  let task = CalculusTask::parse(src)?;
  let unbound = || EngineError::unsupported("polynomial has variables other than x");
  let (exact, integral) = match &task {
    CalculusTask::Derivative { poly, at: x0 } => {
      let d = poly.derivative(VARIABLE);
      t.step(d.to_string(), StepOperation::Differentiate, "Differentiate term by term with the power rule: the derivative of xⁿ is n·xⁿ⁻¹.");
      let at_x0 = parse_expr(&d.to_string())?.substitute(&at(*x0));
      t.step(at_x0.to_string(), StepOperation::Substitute, format!("Substitute x = {}.", format_number(*x0)));
      reduce_all(t, at_x0);
      (d.eval(&at(*x0)).ok_or_else(unbound)?, false)
    }
    CalculusTask::Integral { poly, from, to } => {
      let anti = poly.antiderivative(VARIABLE);
      t.step(anti.to_string(), StepOperation::Integrate, "Find an antiderivative with the power rule: xⁿ integrates to xⁿ⁺¹ / (n + 1).");
      let f = parse_expr(&anti.to_string())?;
      let (a, b) = (format_number(*from), format_number(*to));
      t.step(
        format!("({}) - ({})", f.substitute(&at(*to)), f.substitute(&at(*from))),
        StepOperation::EvaluateBounds,
        format!("Evaluate F({b}) - F({a})."),
      );
      let upper = anti.eval(&at(*to)).ok_or_else(unbound)?;
      let lower = anti.eval(&at(*from)).ok_or_else(unbound)?;
      t.rewrite(format!("{} - {}", format_number(upper), num_tok(lower)), StepOperation::Evaluate, "Evaluate each bound.");
      (upper - lower, true)
    }
  };
  let (value, tolerance) = canonical_value(exact);
  let tolerance = tolerance.max(if integral { 0.001 } else { 0.0 });
  t.round(value, "4 decimal places");
  Ok(Answer::numeric(value, tolerance))
}

// ---------------- statistics ----------------

fn listing(data: &[f64]) -> String {
  data.iter().map(|v| format_number(*v)).collect::<Vec<_>>().join(", ")
}

fn sum_step(t: &mut Trace, data: &[f64]) -> f64 {
  let terms: Vec<String> = data.iter().map(|v| num_tok(*v)).collect();
  t.step(terms.join(" + "), StepOperation::Sum, format!("Add up all {} values.", data.len()));
  data.iter().sum()
}

fn solve_statistics(t: &mut Trace, src: &str) -> EngineResult<Answer> {
  let task = StatTask::parse(src)?;
  let d = &task.data;
  let n = d.len();
  let ordered = statistics::sorted(d);
  match task.measure {
    StatMeasure::Mean => {
      let sum = sum_step(t, d);
      t.step(format!("{} / {n}", num_tok(sum)), StepOperation::Divide, "Divide the total by the number of values.");
    }
    StatMeasure::Median => {
      t.step(listing(&ordered), StepOperation::Sort, "Order the values from smallest to largest.");
      if n % 2 == 1 {
        t.step(format_number(ordered[n / 2]), StepOperation::SelectMiddle, format!("With {n} values the middle one is number {}.", n / 2 + 1));
      } else {
        t.step(
          format!("({} + {}) / 2", num_tok(ordered[n / 2 - 1]), num_tok(ordered[n / 2])),
          StepOperation::SelectMiddle,
          "With an even count, average the two middle values.",
        );
      }
    }
    StatMeasure::Mode => {
      t.step(listing(&ordered), StepOperation::Sort, "Order the values so equal ones sit together.");
      let m = statistics::mode(d).ok_or_else(|| EngineError::unsupported("data set has no unique mode"))?;
      let count = d.iter().filter(|v| **v == m).count();
      t.step(format_number(m), StepOperation::Evaluate, format!("{} appears {count} times, more often than any other value.", format_number(m)));
    }
    StatMeasure::Range => {
      t.step(listing(&ordered), StepOperation::Sort, "Order the values to find the smallest and largest.");
      t.step(
        format!("{} - {}", num_tok(ordered[n - 1]), num_tok(ordered[0])),
        StepOperation::Subtract,
        "Subtract the smallest value from the largest.",
      );
    }
    StatMeasure::Stdev => {
      let sum = sum_step(t, d);
      t.step(format!("{} / {n}", num_tok(sum)), StepOperation::Divide, "The mean is the total divided by the count.");
      let mean = statistics::mean(d);
      let m = format_number(mean);
      let squares: Vec<String> = d.iter().map(|v| format!("({} - {m})^2", num_tok(*v))).collect();
      t.step(
        format!("({}) / {n}", squares.join(" + ")),
        StepOperation::Evaluate,
        "The population variance is the average squared distance from the mean.",
      );
      let variance = statistics::variance(d, n as f64);
      t.step(format!("sqrt({})", format_number(variance)), StepOperation::Exponentiate, "The standard deviation is the square root of the variance.");
    }
  }
  let (value, tolerance) = canonical_value(statistics::compute(&task)?);
  let tolerance = tolerance.max(if matches!(task.measure, StatMeasure::Mean | StatMeasure::Stdev) { 0.001 } else { 0.0 });
  t.round(value, "4 decimal places");
  Ok(Answer::numeric(value, tolerance))
}

// ---------------- probability ----------------

fn solve_probability(t: &mut Trace, src: &str) -> EngineResult<Answer> {
  let p = match Experiment::parse(src)? {
    Experiment::Dice { count, faces, sum } => {
      if count == 0 || faces == 0 {
        return Err(EngineError::unsupported("need at least one die with at least one face"));
      }
      let total = (faces as f64).powi(count as i32);
      t.step(format!("{faces}^{count}"), StepOperation::CountOutcomes, format!("{count} dice with {faces} equally likely faces each."));
      let ways = dice_ways(count, faces, sum);
      t.step(ways.to_string(), StepOperation::CountOutcomes, format!("Count the outcomes with total {sum}."));
      t.step(format!("{ways} / {}", format_number(total)), StepOperation::Divide, "Favourable outcomes over all outcomes.");
      ways as f64 / total
    }
    Experiment::Draw { red, blue, take, want_red } => {
      let n = red + blue;
      let wanted = if want_red { red } else { blue };
      if n == 0 || take == 0 || take > n {
        return Err(EngineError::unsupported("the bag cannot supply that many marbles"));
      }
      let colour = if want_red { "red" } else { "blue" };
      if take == 1 {
        t.step(format!("{wanted} / {n}"), StepOperation::Divide, format!("{wanted} of the {n} marbles are {colour}."));
      } else {
        t.step(format!("comb({wanted}, {take})"), StepOperation::CountOutcomes, format!("Ways to choose {take} {colour} marbles."));
        t.step(format!("comb({n}, {take})"), StepOperation::CountOutcomes, format!("Ways to choose any {take} marbles."));
        let (w, all) = (binomial(wanted as f64, take as f64), binomial(n as f64, take as f64));
        t.step(format!("{} / {}", format_number(w), format_number(all)), StepOperation::Divide, "Favourable choices over all choices.");
      }
      binomial(wanted as f64, take as f64) / binomial(n as f64, take as f64)
    }
  };
  let value = canonical_value(p).0;
  t.round(value, "4 decimal places");
  Ok(Answer::numeric(value, PROBABILITY_TOLERANCE))
}

// ---------------- linear algebra ----------------

fn cofactor_expansion(m: &Matrix) -> EngineResult<String> {
  let n = m.rows.len();
  let mut terms = Vec::new();
  for j in 0..n {
    let minor = Matrix {
      rows: m.rows[1..].iter().map(|r| r.iter().enumerate().filter(|(c, _)| *c != j).map(|(_, v)| *v).collect()).collect(),
    };
    let term = format!("{} * {}", num_tok(m.rows[0][j]), num_tok(minor.determinant()?));
    terms.push(if j == 0 { term } else { format!("{} {term}", if j % 2 == 0 { "+" } else { "-" }) });
  }
  Ok(terms.join(" "))
}

fn solve_matrix(t: &mut Trace, src: &str) -> EngineResult<Answer> {
  let task = MatrixTask::parse(src)?;
  let answer = task.evaluate()?;
  let a = &task.operands[0];
  match task.op {
    MatrixOp::Add => {
      let b = &task.operands[1];
      t.step(
        format!("{} + {}", num_tok(a.rows[0][0]), num_tok(b.rows[0][0])),
        StepOperation::MatrixAdd,
        "Add corresponding entries, starting top left.",
      );
    }
    MatrixOp::Multiply => {
      let b = &task.operands[1];
      let (_, k) = a.dims();
      let products: Vec<String> = (0..k).map(|j| format!("{} * {}", num_tok(a.rows[0][j]), num_tok(b.rows[j][0]))).collect();
      t.step(products.join(" + "), StepOperation::MatrixMultiply, "Entry (1, 1) is row 1 of A times column 1 of B.");
    }
    MatrixOp::Transpose => {}
    MatrixOp::Determinant => {
      let (n, _) = a.dims();
      let r = &a.rows;
      let expansion = match n {
        1 => format_number(r[0][0]),
        2 => format!("{} * {} - {} * {}", num_tok(r[0][0]), num_tok(r[1][1]), num_tok(r[0][1]), num_tok(r[1][0])),
        _ => cofactor_expansion(a)?,
      };
      let why = if n == 2 { "For a 2×2 matrix the determinant is ad - bc." } else { "Expand along the first row using cofactors." };
      t.step(expansion.clone(), StepOperation::Determinant, why);
      reduce_all(t, parse_expr(&expansion)?);
    }
  }
  match &answer {
    Answer::Matrix { rows, .. } => {
      let (operation, why) = match task.op {
        MatrixOp::Add => (StepOperation::MatrixAdd, "Repeat for every entry."),
        MatrixOp::Multiply => (StepOperation::MatrixMultiply, "Repeat for every row of A and column of B."),
        _ => (StepOperation::Transpose, "Row i of A becomes column i of the result."),
      };
      t.step(Matrix { rows: rows.clone() }.to_string(), operation, why);
    }
    other => t.step(other.display(), StepOperation::Evaluate, "Evaluate."),
  }
  Ok(answer)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{DifficultyLevel, ProblemConfig};
  use crate::generators::GeneratorSet;
  use serde_json::json;

  fn problem(problem_type: ProblemType, equation: &str) -> Problem {
    let set = GeneratorSet::default();
    let (mut p, _) = set.generate(&ProblemConfig::new(problem_type, DifficultyLevel::Beginner), 1).unwrap();
    p.equation = Some(equation.to_string());
    p
  }

  #[test]
  fn every_generated_problem_passes_its_self_check() {
    let set = GeneratorSet::default();
    for problem_type in ProblemType::ALL {
      for level in DifficultyLevel::ALL {
        for seed in 0..12 {
          let cfg = ProblemConfig::new(problem_type, level);
          let (p, _) = set.generate(&cfg, seed).unwrap();
          let solution = solve(&p).unwrap_or_else(|e| panic!("{problem_type}/{level}/{seed}: {e} for {:?}", p.equation));
          assert!(!solution.steps.is_empty());
          assert_eq!(solution.final_answer, p.correct_answer);
        }
      }
    }
  }

  #[test]
  fn multiple_choice_problems_check_the_inner_value() {
    let set = GeneratorSet::default();
    let mut cfg = ProblemConfig::new(ProblemType::Arithmetic, DifficultyLevel::Intermediate);
    cfg.allow_multiple_choice = true;
    let (p, _) = set.generate(&cfg, 42).unwrap();
    assert!(matches!(p.correct_answer, Answer::MultipleChoice { .. }));
    assert!(solve(&p).is_ok());
  }

  #[test]
  fn arithmetic_reduces_one_operator_per_step() {
    let mut p = problem(ProblemType::Arithmetic, "2 + 3 * 4");
    p.correct_answer = Answer::numeric(14.0, 0.0);
    let s = solve(&p).unwrap();
    let shown: Vec<&str> = s.steps.iter().map(|s| s.expression.expression.as_str()).collect();
    assert_eq!(shown, vec!["2 + 12", "14"]);
    assert_eq!(s.steps[0].operation, StepOperation::Multiply);
    assert_eq!(s.steps[1].expression.value, Some(14.0));
  }

  #[test]
  fn wrong_stored_answer_is_a_mismatch() {
    let mut p = problem(ProblemType::Arithmetic, "2 + 3 * 4");
    p.correct_answer = Answer::numeric(20.0, 0.0);
    assert!(matches!(solve(&p), Err(EngineError::SolutionMismatch { .. })));
  }

  #[test]
  fn linear_equation_steps() {
    let mut p = problem(ProblemType::Algebra, "3x + 4 = 19");
    p.correct_answer = Answer::equation("x = 5");
    let s = solve(&p).unwrap();
    let ops: Vec<StepOperation> = s.steps.iter().map(|s| s.operation).collect();
    assert_eq!(
      ops,
      vec![
        StepOperation::Simplify,
        StepOperation::CollectLikeTerms,
        StepOperation::DivideBothSides,
        StepOperation::Verify,
        StepOperation::IsolateVariable
      ]
    );
    assert_eq!(s.steps[1].expression.expression, "3x = 15");
    assert_eq!(s.steps[3].expression.value, Some(19.0));
    assert_eq!(s.steps[4].expression.expression, "x = 5");
  }

  #[test]
  fn unknown_side_of_a_square() {
    let set = GeneratorSet::default();
    let cfg = ProblemConfig::new(ProblemType::Geometry, DifficultyLevel::Advanced).with_param("shape", json!("square"));
    let mut p = set.generate(&cfg, 3).unwrap().0;
    p.diagram = Some(Diagram { shape: crate::value::ShapeKind::Square, dimensions: BTreeMap::new() });
    p.equation = Some("side: area = 30.25".into());
    p.correct_answer = Answer::numeric(5.5, GEOMETRY_TOLERANCE);
    let s = solve(&p).unwrap();
    assert!(s.steps.iter().any(|s| s.operation == StepOperation::SolveForUnknown && s.expression.expression == "side = 5.5"));
  }

  #[test]
  fn determinant_by_cofactors() {
    let mut p = problem(ProblemType::LinearAlgebra, "determinant([[2, 0, 1], [1, 3, 2], [1, 1, 2]])");
    p.correct_answer = Answer::numeric(6.0, 0.0);
    let s = solve(&p).unwrap();
    assert_eq!(s.steps[0].expression.expression, "2 * 4 - 0 * 0 + 1 * (-2)");
    assert_eq!(s.steps.last().unwrap().expression.value, Some(6.0));
  }

  #[test]
  fn consistency_catches_bad_numbering_and_values() {
    let mut p = problem(ProblemType::Arithmetic, "6 / 3 + 1");
    p.correct_answer = Answer::numeric(3.0, 0.0);
    let mut s = solve(&p).unwrap();
    assert!(s.check_consistency().is_ok());
    s.steps[0].expression.value = Some(99.0);
    assert!(s.check_consistency().is_err());
    s.steps[0].expression.value = None;
    s.steps[0].step_number = 7;
    assert!(s.check_consistency().is_err());
  }

  #[test]
  fn last_step_reads_as_the_answer() {
    let set = GeneratorSet::default();
    for problem_type in ProblemType::ALL {
      for level in DifficultyLevel::ALL {
        for seed in 0..6 {
          let (p, _) = set.generate(&ProblemConfig::new(problem_type, level), seed).unwrap();
          let s = solve(&p).unwrap();
          let last = Answer::Text { value: s.steps.last().unwrap().expression.expression.clone(), case_sensitive: false };
          assert!(answers_equivalent(&p.correct_answer, &last), "{problem_type}/{level}/{seed}: {:?}", s.steps.last());
        }
      }
    }
  }

  #[test]
  fn both_measures_end_on_a_combined_step() {
    let mut p = problem(ProblemType::Geometry, "area, perimeter");
    p.diagram = Some(Diagram {
      shape: crate::value::ShapeKind::Rectangle,
      dimensions: BTreeMap::from([("width".to_string(), 3.0), ("height".to_string(), 4.0)]),
    });
    p.correct_answer = Answer::Graph {
      graph: GraphValue::Shape { shape: crate::value::ShapeKind::Rectangle, area: 12.0, perimeter: 14.0 },
      tolerance: Some(GEOMETRY_TOLERANCE),
    };
    let s = solve(&p).unwrap();
    assert_eq!(s.steps.last().unwrap().expression.expression, "area = 12, perimeter = 14");
  }

  #[test]
  fn a_rewritten_step_must_keep_its_value() {
    let mut p = problem(ProblemType::Arithmetic, "2 + 3 * 4 - 1");
    p.correct_answer = Answer::numeric(13.0, 0.0);
    let mut s = solve(&p).unwrap();
    let shown: Vec<&str> = s.steps.iter().map(|s| s.expression.expression.as_str()).collect();
    assert_eq!(shown, vec!["2 + 12 - 1", "14 - 1", "13"]);
    assert!(s.steps[1].rewrites_previous);

    // self-consistent on its own, but no longer follows from step 1
    s.steps[1].expression = MathExpression { expression: "15 - 1".into(), value: Some(14.0) };
    assert!(matches!(s.check_consistency(), Err(EngineError::SolutionMismatch { .. })));
  }

  #[test]
  fn a_solution_must_end_on_its_answer() {
    let mut p = problem(ProblemType::Algebra, "3x + 4 = 19");
    p.correct_answer = Answer::equation("x = 5");
    let mut s = solve(&p).unwrap();
    s.steps.pop();
    assert_eq!(s.steps.last().unwrap().operation, StepOperation::Verify);
    assert!(matches!(s.check_consistency(), Err(EngineError::SolutionMismatch { .. })));
  }

  #[test]
  fn hints_come_from_the_first_step() {
    let set = GeneratorSet::default();
    let (p, _) = set.generate(&ProblemConfig::new(ProblemType::Statistics, DifficultyLevel::Beginner), 9).unwrap();
    let s = solve(&p).unwrap();
    let h = hints(&p, &s);
    assert!(h[0].starts_with("Start here: "));
  }
}
