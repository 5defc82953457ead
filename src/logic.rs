//! Core engine flows shared by the HTTP handlers and library callers.
//!
//! This includes:
//!   - Generating batches (template generator + solver, optional AI path with one fallback)
//!   - Grading a submission (validator + grading store)
//!   - Opening attempts over stored problems

use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Prompts;
use crate::domain::{GeneratedProblem, GenerationMethod, GenerationProvenance, Problem, ProblemConfig, ProblemType};
use crate::error::{EngineError, EngineResult, ErrorCode};
use crate::expr::{parse_equation, parse_expr};
use crate::generators::GeneratorSet;
use crate::grading::ProblemAttempt;
use crate::openai::{AiProblemDraft, OpenAI};
use crate::protocol::{
  AttemptIn, Feedback, GenerationError, GenerationRequest, GenerationResult, ProblemGradeRequest, ProblemGradeResponse,
};
use crate::solver;
use crate::state::AppState;
use crate::util::derive_seed;
use crate::validator::answers_equivalent;
use crate::value::Answer;

/// Types whose equations the model can be asked for and the solver can check.
const AI_TYPES: [ProblemType; 3] = [ProblemType::Arithmetic, ProblemType::Algebra, ProblemType::WordProblems];

/// Solve the problem, then attach steps and hints as the config asks.
/// The solver runs even when neither is wanted: it is the self-check.
fn attach_solution(problem: &mut Problem, config: &ProblemConfig) -> EngineResult<()> {
  let solution = solver::solve(problem)?;
  if config.include_hints {
    problem.hints = solver::hints(problem, &solution);
  }
  if config.include_steps {
    problem.steps = solution.steps;
  }
  Ok(())
}

/// Template path for one problem: a pure function of `(config, seed)`.
pub fn build_template_problem(generators: &GeneratorSet, config: &ProblemConfig, seed: u64) -> EngineResult<GeneratedProblem> {
  let (mut problem, _) = generators.generate(config, seed)?;
  attach_solution(&mut problem, config)?;
  Ok(GeneratedProblem {
    provenance: GenerationProvenance {
      problem_id: problem.id.clone(),
      generation_method: GenerationMethod::Template,
      seed,
      ai_model: None,
    },
    problem,
  })
}

/// Turn a model draft into a problem. The answer is derived by the solver and
/// the model's own answer only has to agree with it.
pub fn assemble_ai_problem(config: &ProblemConfig, draft: AiProblemDraft, model: &str, seed: u64) -> EngineResult<GeneratedProblem> {
  let equation = match config.problem_type {
    ProblemType::Arithmetic | ProblemType::WordProblems => parse_expr(&draft.equation)?.to_string(),
    ProblemType::Algebra => parse_equation(&draft.equation)?.to_string(),
    other => return Err(EngineError::unsupported(format!("AI drafting is not available for {other}"))),
  };

  let mut problem = Problem {
    id: Uuid::new_v4().to_string(),
    problem_type: config.problem_type,
    difficulty: config.difficulty,
    problem_statement: draft.statement.trim().to_string(),
    equation: Some(equation),
    diagram: None,
    // replaced by the derived answer below
    correct_answer: Answer::numeric(0.0, 0.0),
    alternatives: None,
    steps: Vec::new(),
    hints: Vec::new(),
    tags: vec![config.problem_type.as_str().into(), config.difficulty.as_str().into(), "ai-assisted".into()],
    concepts: Vec::new(),
    common_mistakes: Vec::new(),
  };
  let (_, derived) = solver::derive(&problem)?;
  derived.require_tolerance()?;
  let claimed = Answer::Text { value: draft.answer.clone(), case_sensitive: false };
  if !answers_equivalent(&derived, &claimed) {
    return Err(EngineError::SolutionMismatch { expected: draft.answer, derived: derived.display() });
  }
  problem.correct_answer = derived;
  attach_solution(&mut problem, config)?;

  Ok(GeneratedProblem {
    provenance: GenerationProvenance {
      problem_id: problem.id.clone(),
      generation_method: GenerationMethod::AiAssisted,
      seed,
      ai_model: Some(model.to_string()),
    },
    problem,
  })
}

/// One bounded AI call. Timeouts and failures come back as errors, never retried here.
async fn draft_with_ai(oa: &OpenAI, prompts: &Prompts, config: &ProblemConfig, seed: u64, budget_ms: u64) -> EngineResult<GeneratedProblem> {
  let draft = match timeout(Duration::from_millis(budget_ms), oa.generate_problem(prompts, config)).await {
    Err(_) => return Err(EngineError::GenerationTimeout { budget_ms }),
    Ok(Err(e)) => return Err(EngineError::AiGeneration(e)),
    Ok(Ok(d)) => d,
  };
  assemble_ai_problem(config, draft, &oa.model, seed)
}

/// Why the AI path cannot serve this config, if it cannot.
fn ai_unavailable(state: &AppState, config: &ProblemConfig) -> Option<String> {
  if !state.ai_available() {
    return Some("AI-assisted generation is not configured; using templates".into());
  }
  if config.allow_multiple_choice {
    return Some("AI drafts carry no distractors; multiple-choice problems use templates".into());
  }
  if !AI_TYPES.contains(&config.problem_type) {
    return Some(format!("AI drafting is not available for {}; using templates", config.problem_type));
  }
  None
}

/// One problem: the AI path when asked for, then the template path at most once.
/// Returns the problem and a warning when the fallback was taken.
pub async fn generate_one(state: &AppState, config: &ProblemConfig, seed: u64, try_ai: bool) -> EngineResult<(GeneratedProblem, Option<String>)> {
  let mut warning = None;
  if try_ai {
    if let Some(oa) = &state.openai {
      match draft_with_ai(oa, &state.prompts, config, seed, state.ai.timeout_ms).await {
        Ok(p) => return Ok((p, None)),
        Err(e) => {
          warn!(target: "generator", error = %e, code = ?e.code(), seed, "AI generation failed; falling back to templates");
          warning = Some(format!("{e}; used a template instead"));
        }
      }
    }
  }

  let generators = state.generators.clone();
  let config = config.clone();
  let problem = tokio::task::spawn_blocking(move || build_template_problem(&generators, &config, seed))
    .await
    .map_err(|e| EngineError::Internal(format!("generation task failed: {e}")))??;
  Ok((problem, warning))
}

/// Generate a batch. Item `i` uses `derive_seed(seed, i)` and runs on its own
/// task; a failing item is reported and the rest of the batch is kept.
#[instrument(
  level = "info",
  skip(state, req),
  fields(problem_type = %req.config.problem_type, difficulty = %req.config.difficulty, quantity = req.config.quantity, user_id = %req.user_id)
)]
pub async fn generate_problems(state: &AppState, req: GenerationRequest) -> GenerationResult {
  let started = Instant::now();
  let seed = req.seed.unwrap_or_else(rand::random);
  let config = req.config;
  let elapsed_ms = |s: Instant| s.elapsed().as_millis() as u64;

  if let Err(e) = config.validate() {
    warn!(target: "generator", error = %e, "Rejected generation request");
    return GenerationResult {
      success: false,
      problems: Vec::new(),
      generation_time_ms: elapsed_ms(started),
      seed,
      warnings: None,
      errors: Some(vec![GenerationError { index: 0, code: e.code(), message: e.to_string() }]),
    };
  }

  let mut warnings = Vec::new();
  let want_ai = req.preferences.map(|p| p.ai_assisted).unwrap_or(false);
  let try_ai = want_ai
    && match ai_unavailable(state, &config) {
      None => true,
      Some(reason) => {
        warnings.push(reason);
        false
      }
    };

  let handles: Vec<_> = (0..config.quantity)
    .map(|i| {
      let state = state.clone();
      let config = config.clone();
      let item_seed = derive_seed(seed, i as u64);
      tokio::spawn(async move { generate_one(&state, &config, item_seed, try_ai).await })
    })
    .collect();

  let mut problems = Vec::new();
  let mut errors = Vec::new();
  for (i, handle) in handles.into_iter().enumerate() {
    let index = i as u32;
    match handle.await {
      Ok(Ok((p, warning))) => {
        if let Some(w) = warning {
          warnings.push(format!("problem {index}: {w}"));
        }
        problems.push(p);
      }
      Ok(Err(e)) => {
        warn!(target: "generator", index, error = %e, "Problem dropped from batch");
        errors.push(GenerationError { index, code: e.code(), message: e.to_string() });
      }
      Err(e) => errors.push(GenerationError {
        index,
        code: ErrorCode::GenerationFailed,
        message: format!("generation task failed: {e}"),
      }),
    }
  }

  state.insert_problems(&problems).await;
  let generation_time_ms = elapsed_ms(started);
  info!(
    target: "generator",
    seed,
    generated = problems.len(),
    failed = errors.len(),
    generation_time_ms,
    session_id = ?req.session_id,
    "Batch generated"
  );

  GenerationResult {
    success: !problems.is_empty(),
    problems,
    generation_time_ms,
    seed,
    warnings: if warnings.is_empty() { None } else { Some(warnings) },
    errors: if errors.is_empty() { None } else { Some(errors) },
  }
}

/// Open an attempt over problems that exist in the store.
#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id, problems = body.problem_ids.len()))]
pub async fn open_attempt(state: &AppState, body: AttemptIn) -> EngineResult<ProblemAttempt> {
  for id in &body.problem_ids {
    if !state.has_problem(id).await {
      return Err(EngineError::UnknownProblem(id.clone()));
    }
  }
  state
    .grading
    .create_attempt(&body.user_id, body.session_id.as_deref(), body.problem_ids, body.time_limit_secs)
    .await
}

/// Validate a submission against the stored canonical answer and record it on the attempt.
#[instrument(level = "info", skip(state, req), fields(attempt_id = %req.attempt_id, problem_id = %req.problem_id))]
pub async fn grade_submission(state: &AppState, req: ProblemGradeRequest) -> EngineResult<ProblemGradeResponse> {
  let stored = state
    .get_problem(&req.problem_id)
    .await
    .ok_or_else(|| EngineError::UnknownProblem(req.problem_id.clone()))?;
  let result = state.validator.validate_problem(&stored.problem, &req.submitted_answer);
  debug!(target: "grading", correct = result.is_correct, score = result.score, gradable = result.gradable, "Validated");

  let (answer, attempt) = state
    .grading
    .submit(&req.attempt_id, &req.problem_id, &req.user_id, req.submitted_answer, result)
    .await?;
  let analysis = state.grading.analysis_for(&stored.problem, &req.user_id).await;

  let r = answer.result;
  Ok(ProblemGradeResponse {
    is_correct: r.is_correct,
    score: r.score,
    max_score: r.max_score,
    feedback: Feedback {
      explanation: r.explanation,
      gradable: r.gradable,
      suggestions: r.suggestions,
      similar_answers: r.similar_answers,
    },
    detailed_analysis: Some(analysis),
    attempt_state: attempt.state,
    attempt_total_score: attempt.total_score,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::EngineConfig;
  use crate::domain::DifficultyLevel;
  use crate::grading::AttemptState;
  use crate::protocol::GenerationPreferences;
  use serde_json::json;

  fn request(config: ProblemConfig, seed: Option<u64>) -> GenerationRequest {
    GenerationRequest { config, user_id: "u1".into(), session_id: None, seed, preferences: None }
  }

  fn state() -> AppState {
    AppState::from_config(EngineConfig::default(), None)
  }

  #[tokio::test]
  async fn seed_42_gives_the_same_batch() {
    let st = state();
    for t in ProblemType::ALL {
      let mut cfg = ProblemConfig::new(t, DifficultyLevel::Intermediate);
      cfg.quantity = 4;
      cfg.include_hints = true;
      let a = generate_problems(&st, request(cfg.clone(), Some(42))).await;
      let b = generate_problems(&st, request(cfg, Some(42))).await;
      assert!(a.success && a.errors.is_none(), "{t}: {:?}", a.errors);
      assert_eq!(a.problems.len(), 4);
      assert_eq!(serde_json::to_string(&a.problems).unwrap(), serde_json::to_string(&b.problems).unwrap());
      assert!(a.problems.iter().all(|p| !p.problem.steps.is_empty() && !p.problem.hints.is_empty()));
      assert!(a.problems.iter().all(|p| p.provenance.generation_method == GenerationMethod::Template));
    }
  }

  #[tokio::test]
  async fn steps_are_left_out_on_request() {
    let mut cfg = ProblemConfig::new(ProblemType::Algebra, DifficultyLevel::Beginner);
    cfg.include_steps = false;
    let out = generate_problems(&state(), request(cfg, Some(7))).await;
    assert!(out.problems[0].problem.steps.is_empty());
  }

  #[tokio::test]
  async fn bad_config_fails_every_item_without_panicking() {
    let mut cfg = ProblemConfig::new(ProblemType::Arithmetic, DifficultyLevel::Beginner).with_param("colour", json!("red"));
    cfg.quantity = 3;
    let out = generate_problems(&state(), request(cfg, Some(1))).await;
    assert!(!out.success);
    let errors = out.errors.unwrap();
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|e| e.code == ErrorCode::InvalidConfig));

    let mut cfg = ProblemConfig::new(ProblemType::Arithmetic, DifficultyLevel::Beginner);
    cfg.quantity = 0;
    let out = generate_problems(&state(), request(cfg, None)).await;
    assert_eq!(out.errors.unwrap()[0].code, ErrorCode::InvalidConfig);
  }

  #[tokio::test]
  async fn ai_timeout_falls_back_to_templates_once() {
    // accepts connections and never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let mut held = Vec::new();
      while let Ok((sock, _)) = listener.accept().await {
        held.push(sock);
      }
    });

    let mut cfg = EngineConfig::default();
    cfg.ai.timeout_ms = 50;
    let oa = OpenAI::new("test-key", format!("http://{addr}"), "test-model").unwrap();
    let st = AppState::from_config(cfg, Some(oa));

    let mut req = request(ProblemConfig::new(ProblemType::Arithmetic, DifficultyLevel::Beginner), Some(3));
    req.preferences = Some(GenerationPreferences { ai_assisted: true });
    let out = generate_problems(&st, req).await;

    assert!(out.success);
    assert_eq!(out.problems[0].provenance.generation_method, GenerationMethod::Template);
    let warnings = out.warnings.unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("exceeded 50 ms"), "{warnings:?}");
  }

  #[tokio::test]
  async fn ai_is_skipped_for_unsupported_requests() {
    let oa = OpenAI::new("k", "http://127.0.0.1:9", "m").unwrap();
    let st = AppState::from_config(EngineConfig::default(), Some(oa));
    let mut req = request(ProblemConfig::new(ProblemType::Geometry, DifficultyLevel::Beginner), Some(3));
    req.preferences = Some(GenerationPreferences { ai_assisted: true });
    let out = generate_problems(&st, req).await;
    assert!(out.success);
    assert!(out.warnings.unwrap()[0].contains("geometry"));
  }

  #[test]
  fn ai_drafts_are_checked_by_the_solver() {
    let cfg = ProblemConfig::new(ProblemType::Algebra, DifficultyLevel::Beginner);
    let good = AiProblemDraft { statement: "Solve 3x + 4 = 19.".into(), equation: "3x + 4 = 19".into(), answer: "x = 5".into() };
    let p = assemble_ai_problem(&cfg, good, "m", 9).unwrap();
    assert_eq!(p.provenance.generation_method, GenerationMethod::AiAssisted);
    assert_eq!(p.provenance.ai_model.as_deref(), Some("m"));
    assert!(answers_equivalent(&p.problem.correct_answer, &Answer::equation("x = 5")));
    assert!(!p.problem.steps.is_empty());

    let wrong = AiProblemDraft { statement: "What is 6 * 7?".into(), equation: "6 * 7".into(), answer: "48".into() };
    let cfg = ProblemConfig::new(ProblemType::Arithmetic, DifficultyLevel::Beginner);
    assert!(matches!(assemble_ai_problem(&cfg, wrong, "m", 9), Err(EngineError::SolutionMismatch { .. })));

    let cfg = ProblemConfig::new(ProblemType::Statistics, DifficultyLevel::Beginner);
    let any = AiProblemDraft { statement: "s".into(), equation: "1 + 1".into(), answer: "2".into() };
    assert!(matches!(assemble_ai_problem(&cfg, any, "m", 9), Err(EngineError::UnsupportedConfig(_))));
  }

  #[tokio::test]
  async fn grading_flow_records_and_analyses() {
    let st = state();
    let mut cfg = ProblemConfig::new(ProblemType::Arithmetic, DifficultyLevel::Beginner);
    cfg.quantity = 2;
    let out = generate_problems(&st, request(cfg, Some(11))).await;
    let ids: Vec<String> = out.problems.iter().map(|p| p.problem.id.clone()).collect();

    let missing = AttemptIn { user_id: "u1".into(), session_id: None, problem_ids: vec!["nope".into()], time_limit_secs: None };
    assert!(matches!(open_attempt(&st, missing).await, Err(EngineError::UnknownProblem(_))));

    let attempt = open_attempt(&st, AttemptIn { user_id: "u1".into(), session_id: None, problem_ids: ids.clone(), time_limit_secs: None })
      .await
      .unwrap();

    let first = &out.problems[0].problem;
    let res = grade_submission(
      &st,
      ProblemGradeRequest {
        attempt_id: attempt.id.clone(),
        problem_id: first.id.clone(),
        user_id: "u1".into(),
        submitted_answer: first.correct_answer.clone(),
      },
    )
    .await
    .unwrap();
    assert!(res.is_correct);
    assert_eq!(res.score, res.max_score);
    assert_eq!(res.attempt_state, AttemptState::InProgress);
    assert_eq!(res.detailed_analysis.unwrap().correct_answers, 1);

    let second = &out.problems[1].problem;
    let res = grade_submission(
      &st,
      ProblemGradeRequest {
        attempt_id: attempt.id.clone(),
        problem_id: second.id.clone(),
        user_id: "u1".into(),
        submitted_answer: Answer::Text { value: "not a number (".into(), case_sensitive: false },
      },
    )
    .await
    .unwrap();
    assert!(!res.is_correct && !res.feedback.gradable);
    assert_eq!(res.score, 0.0);
    assert_eq!(res.attempt_state, AttemptState::Completed);
  }
}
