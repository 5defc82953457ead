//! Grading aggregator: attempts, their scored answers, sessions and the
//! statistics derived from them.
//!
//! Attempt lifecycle: `Created -> InProgress -> {Completed, Abandoned}`.
//! The first answer starts an attempt. Answering every problem or running out
//! of time completes it; an attempt that times out before its first answer is
//! abandoned instead, as is one whose session expires. Terminal attempts never
//! change again, and the sweeper drops them once the retention window passes.
//!
//! Every attempt sits behind its own mutex; the maps only guard membership.
//! `SessionStatistics` are always recomputed from the attempts. Sessions also
//! keep running counters, and the two must agree exactly.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::GradingConfig;
use crate::domain::{MistakeCategory, Problem};
use crate::error::{EngineError, EngineResult};
use crate::validator::AnswerValidationResult;
use crate::value::Answer;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
  Created,
  InProgress,
  Completed,
  Abandoned,
}

impl AttemptState {
  pub fn as_str(self) -> &'static str {
    match self {
      AttemptState::Created => "created",
      AttemptState::InProgress => "in_progress",
      AttemptState::Completed => "completed",
      AttemptState::Abandoned => "abandoned",
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, AttemptState::Completed | AttemptState::Abandoned)
  }
}

// Scores are summed in hundredths so totals do not depend on summation order.
fn centi(score: f64) -> i64 {
  (score * 100.0).round() as i64
}

fn from_centi(c: i64) -> f64 {
  c as f64 / 100.0
}

/// One scored submission. Immutable once recorded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentAnswer {
  pub id: String,
  pub attempt_id: String,
  pub problem_id: String,
  pub user_id: String,
  pub submitted_answer: Answer,
  pub result: AnswerValidationResult,
  pub score: f64,
  pub answered_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProblemAttempt {
  pub id: String,
  pub user_id: String,
  #[serde(default)]
  pub session_id: Option<String>,
  pub problem_ids: Vec<String>,
  pub answers: Vec<StudentAnswer>,
  pub state: AttemptState,
  /// Sum of `answers[].score`.
  pub total_score: f64,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub finished_at: Option<DateTime<Utc>>,
  pub time_limit_secs: i64,
  /// Expiry of the owning session, fixed when the attempt is created.
  #[serde(default)]
  pub session_expires_at: Option<DateTime<Utc>>,
}

impl ProblemAttempt {
  pub fn deadline(&self) -> DateTime<Utc> {
    self.created_at + Duration::seconds(self.time_limit_secs)
  }

  /// Apply the time-driven transitions. Returns the new state when one happened.
  fn settle(&mut self, now: DateTime<Utc>) -> Option<AttemptState> {
    if self.state.is_terminal() {
      return None;
    }
    let deadline = self.deadline();
    let next = match self.session_expires_at {
      // whichever ran out first decides
      Some(expiry) if now >= expiry && expiry < deadline => AttemptState::Abandoned,
      // never started, so there is nothing to complete
      _ if now >= deadline && self.state == AttemptState::Created => AttemptState::Abandoned,
      _ if now >= deadline => AttemptState::Completed,
      _ => return None,
    };
    self.finish(next, now);
    Some(next)
  }

  fn finish(&mut self, state: AttemptState, now: DateTime<Utc>) {
    self.state = state;
    self.finished_at = Some(now);
  }

  fn record(&mut self, answer: StudentAnswer, now: DateTime<Utc>) -> EngineResult<()> {
    if answer.user_id != self.user_id {
      return Err(EngineError::UnknownAttempt(format!("{} (not owned by {})", self.id, answer.user_id)));
    }
    self.settle(now);
    if self.state.is_terminal() {
      return Err(EngineError::AttemptClosed { attempt_id: self.id.clone(), state: self.state.as_str().into() });
    }
    if !self.problem_ids.contains(&answer.problem_id) {
      return Err(EngineError::UnknownProblem(format!("{} is not part of attempt {}", answer.problem_id, self.id)));
    }
    if self.answers.iter().any(|a| a.problem_id == answer.problem_id) {
      return Err(EngineError::AlreadyAnswered { attempt_id: self.id.clone(), problem_id: answer.problem_id });
    }

    if self.state == AttemptState::Created {
      self.state = AttemptState::InProgress;
      self.started_at = Some(now);
    }
    self.answers.push(answer);
    self.total_score = from_centi(self.answers.iter().map(|a| centi(a.score)).sum());
    if self.answers.len() == self.problem_ids.len() {
      self.finish(AttemptState::Completed, now);
    }
    Ok(())
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
  pub id: String,
  pub user_id: String,
  pub created_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
  pub attempt_ids: Vec<String>,
  pub expired: bool,
}

/// The three figures a session tracks incrementally.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionTotals {
  pub total_problems_attempted: u64,
  pub problems_correct: u64,
  pub total_score: f64,
}

#[derive(Debug, Default)]
struct Tally {
  answered: AtomicU64,
  correct: AtomicU64,
  score_centi: AtomicI64,
}

impl Tally {
  fn add(&self, answer: &StudentAnswer) {
    self.answered.fetch_add(1, Ordering::Relaxed);
    if answer.result.is_correct {
      self.correct.fetch_add(1, Ordering::Relaxed);
    }
    self.score_centi.fetch_add(centi(answer.score), Ordering::Relaxed);
  }

  fn totals(&self) -> SessionTotals {
    SessionTotals {
      total_problems_attempted: self.answered.load(Ordering::Relaxed),
      problems_correct: self.correct.load(Ordering::Relaxed),
      total_score: from_centi(self.score_centi.load(Ordering::Relaxed)),
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatistics {
  pub session_id: String,
  pub total_problems_attempted: u64,
  pub problems_correct: u64,
  /// 0..=100
  pub correct_percentage: f64,
  pub total_score: f64,
  pub max_possible_score: f64,
  pub average_score: f64,
  pub attempts: u64,
  pub attempts_completed: u64,
  pub attempts_abandoned: u64,
  pub mistake_counts: BTreeMap<MistakeCategory, u64>,
  pub time_spent_secs: i64,
}

impl SessionStatistics {
  /// Rebuild the aggregate from scratch. This is the source of truth.
  pub fn recompute(session_id: &str, attempts: &[ProblemAttempt], max_score: f64) -> Self {
    let answers = || attempts.iter().flat_map(|a| a.answers.iter());
    let attempted = answers().count() as u64;
    let correct = answers().filter(|a| a.result.is_correct).count() as u64;
    let score_centi: i64 = answers().map(|a| centi(a.score)).sum();

    let mut mistake_counts = BTreeMap::new();
    for m in answers().flat_map(|a| a.result.mistakes.iter()) {
      *mistake_counts.entry(*m).or_insert(0u64) += 1;
    }

    let time_spent_secs = attempts
      .iter()
      .filter_map(|a| {
        let start = a.started_at?;
        let end = a.finished_at.or_else(|| a.answers.last().map(|x| x.answered_at))?;
        Some((end - start).num_seconds().max(0))
      })
      .sum();

    let total_score = from_centi(score_centi);
    Self {
      session_id: session_id.to_string(),
      total_problems_attempted: attempted,
      problems_correct: correct,
      correct_percentage: if attempted == 0 { 0.0 } else { correct as f64 * 100.0 / attempted as f64 },
      total_score,
      max_possible_score: attempted as f64 * max_score,
      average_score: if attempted == 0 { 0.0 } else { total_score / attempted as f64 },
      attempts: attempts.len() as u64,
      attempts_completed: attempts.iter().filter(|a| a.state == AttemptState::Completed).count() as u64,
      attempts_abandoned: attempts.iter().filter(|a| a.state == AttemptState::Abandoned).count() as u64,
      mistake_counts,
      time_spent_secs,
    }
  }

  pub fn totals(&self) -> SessionTotals {
    SessionTotals {
      total_problems_attempted: self.total_problems_attempted,
      problems_correct: self.problems_correct,
      total_score: self.total_score,
    }
  }
}

/// How one learner is doing on one problem.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GradeAnalysis {
  pub problem_id: String,
  pub answers_seen: u32,
  pub correct_answers: u32,
  pub mistake_buckets: BTreeMap<MistakeCategory, u32>,
  pub concepts_understood: Vec<String>,
  pub concepts_needing_work: Vec<String>,
  pub suggestions: Vec<String>,
  pub common_mistakes: Vec<MistakeCategory>,
}

impl GradeAnalysis {
  pub fn from_answers<'a>(problem: &Problem, answers: impl IntoIterator<Item = &'a StudentAnswer>) -> Self {
    let mut seen = 0u32;
    let mut correct = 0u32;
    let mut buckets: BTreeMap<MistakeCategory, u32> = BTreeMap::new();
    for a in answers.into_iter().filter(|a| a.problem_id == problem.id) {
      seen += 1;
      if a.result.is_correct {
        correct += 1;
      }
      for m in &a.result.mistakes {
        *buckets.entry(*m).or_insert(0) += 1;
      }
    }

    let understood = correct > 0 && correct * 2 >= seen;
    let (concepts_understood, concepts_needing_work) =
      if understood { (problem.concepts.clone(), Vec::new()) } else { (Vec::new(), problem.concepts.clone()) };

    // most frequent first, then the problem's usual slips not seen yet
    let mut ranked: Vec<(MistakeCategory, u32)> = buckets.iter().map(|(m, n)| (*m, *n)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut suggestions: Vec<String> = ranked.iter().map(|(m, _)| m.suggestion().to_string()).collect();
    if !understood {
      for m in problem.common_mistakes.iter().filter(|m| !buckets.contains_key(m)).take(2) {
        suggestions.push(format!("Watch for {}: {}", m.label(), m.suggestion()));
      }
    }

    Self {
      problem_id: problem.id.clone(),
      answers_seen: seen,
      correct_answers: correct,
      mistake_buckets: buckets,
      concepts_understood,
      concepts_needing_work,
      suggestions,
      common_mistakes: problem.common_mistakes.clone(),
    }
  }
}

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
  pub sessions_expired: usize,
  pub attempts_completed: usize,
  pub attempts_abandoned: usize,
  pub sessions_evicted: usize,
  pub attempts_evicted: usize,
  pub problems_evicted: usize,
}

struct AttemptSlot {
  attempt: Mutex<ProblemAttempt>,
  session_tally: Option<Arc<Tally>>,
}

struct SessionEntry {
  session: Session,
  tally: Arc<Tally>,
}

/// In-memory attempt and session store.
#[derive(Clone)]
pub struct GradingStore {
  cfg: GradingConfig,
  attempts: Arc<RwLock<HashMap<String, Arc<AttemptSlot>>>>,
  sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl GradingStore {
  pub fn new(cfg: GradingConfig) -> Self {
    Self { cfg, attempts: Arc::new(RwLock::new(HashMap::new())), sessions: Arc::new(RwLock::new(HashMap::new())) }
  }

  pub fn config(&self) -> &GradingConfig {
    &self.cfg
  }

  #[instrument(level = "info", skip(self))]
  pub async fn start_session(&self, user_id: &str) -> Session {
    let now = Utc::now();
    let session = Session {
      id: Uuid::new_v4().to_string(),
      user_id: user_id.to_string(),
      created_at: now,
      expires_at: now + Duration::seconds(self.cfg.session_ttl_secs),
      attempt_ids: Vec::new(),
      expired: false,
    };
    self
      .sessions
      .write()
      .await
      .insert(session.id.clone(), SessionEntry { session: session.clone(), tally: Arc::new(Tally::default()) });
    info!(target: "grading", session_id = %session.id, %user_id, "Session started");
    session
  }

  pub async fn create_attempt(
    &self,
    user_id: &str,
    session_id: Option<&str>,
    problem_ids: Vec<String>,
    time_limit_secs: Option<i64>,
  ) -> EngineResult<ProblemAttempt> {
    self.create_attempt_at(user_id, session_id, problem_ids, time_limit_secs, Utc::now()).await
  }

  #[instrument(level = "info", skip(self, problem_ids), fields(problems = problem_ids.len()))]
  pub async fn create_attempt_at(
    &self,
    user_id: &str,
    session_id: Option<&str>,
    mut problem_ids: Vec<String>,
    time_limit_secs: Option<i64>,
    now: DateTime<Utc>,
  ) -> EngineResult<ProblemAttempt> {
    let mut seen = HashSet::new();
    problem_ids.retain(|id| seen.insert(id.clone()));
    if problem_ids.is_empty() {
      return Err(EngineError::unsupported("an attempt needs at least one problem"));
    }
    let time_limit_secs = time_limit_secs.unwrap_or(self.cfg.attempt_time_limit_secs);
    if time_limit_secs <= 0 {
      return Err(EngineError::unsupported(format!("time limit must be positive, got {time_limit_secs}")));
    }

    let id = Uuid::new_v4().to_string();
    let mut sessions = self.sessions.write().await;
    let (session_expires_at, session_tally) = match session_id {
      None => (None, None),
      Some(sid) => {
        let entry = sessions.get_mut(sid).ok_or_else(|| EngineError::UnknownSession(sid.to_string()))?;
        if entry.session.user_id != user_id {
          return Err(EngineError::UnknownSession(format!("{sid} (not owned by {user_id})")));
        }
        if entry.session.expired || now >= entry.session.expires_at {
          return Err(EngineError::UnknownSession(format!("{sid} has expired")));
        }
        entry.session.attempt_ids.push(id.clone());
        (Some(entry.session.expires_at), Some(entry.tally.clone()))
      }
    };

    let attempt = ProblemAttempt {
      id: id.clone(),
      user_id: user_id.to_string(),
      session_id: session_id.map(str::to_string),
      problem_ids,
      answers: Vec::new(),
      state: AttemptState::Created,
      total_score: 0.0,
      created_at: now,
      started_at: None,
      finished_at: None,
      time_limit_secs,
      session_expires_at,
    };
    self
      .attempts
      .write()
      .await
      .insert(id.clone(), Arc::new(AttemptSlot { attempt: Mutex::new(attempt.clone()), session_tally }));
    drop(sessions);
    debug!(target: "grading", attempt_id = %id, %user_id, "Attempt created");
    Ok(attempt)
  }

  async fn slot(&self, attempt_id: &str) -> EngineResult<Arc<AttemptSlot>> {
    self
      .attempts
      .read()
      .await
      .get(attempt_id)
      .cloned()
      .ok_or_else(|| EngineError::UnknownAttempt(attempt_id.to_string()))
  }

  pub async fn submit(
    &self,
    attempt_id: &str,
    problem_id: &str,
    user_id: &str,
    submitted: Answer,
    result: AnswerValidationResult,
  ) -> EngineResult<(StudentAnswer, ProblemAttempt)> {
    self.submit_at(attempt_id, problem_id, user_id, submitted, result, Utc::now()).await
  }

  /// Record a scored answer. Only this attempt's mutex is held while it changes.
  #[instrument(level = "info", skip(self, submitted, result), fields(%attempt_id, %problem_id, score = result.score))]
  pub async fn submit_at(
    &self,
    attempt_id: &str,
    problem_id: &str,
    user_id: &str,
    submitted: Answer,
    result: AnswerValidationResult,
    now: DateTime<Utc>,
  ) -> EngineResult<(StudentAnswer, ProblemAttempt)> {
    let slot = self.slot(attempt_id).await?;
    let answer = StudentAnswer {
      id: Uuid::new_v4().to_string(),
      attempt_id: attempt_id.to_string(),
      problem_id: problem_id.to_string(),
      user_id: user_id.to_string(),
      submitted_answer: submitted,
      score: result.score,
      result,
      answered_at: now,
    };

    let mut attempt = slot.attempt.lock().await;
    attempt.record(answer.clone(), now)?;
    if let Some(tally) = &slot.session_tally {
      tally.add(&answer);
    }
    info!(
      target: "grading",
      %attempt_id,
      %problem_id,
      correct = answer.result.is_correct,
      total = attempt.total_score,
      state = attempt.state.as_str(),
      "Answer recorded"
    );
    Ok((answer, attempt.clone()))
  }

  /// Snapshot of an attempt, with any due time-driven transition applied.
  pub async fn attempt(&self, attempt_id: &str) -> EngineResult<ProblemAttempt> {
    let slot = self.slot(attempt_id).await?;
    let mut attempt = slot.attempt.lock().await;
    attempt.settle(Utc::now());
    Ok(attempt.clone())
  }

  pub async fn session(&self, session_id: &str) -> EngineResult<Session> {
    self
      .sessions
      .read()
      .await
      .get(session_id)
      .map(|e| e.session.clone())
      .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))
  }

  async fn session_attempts(&self, session_id: &str) -> EngineResult<Vec<ProblemAttempt>> {
    let ids = self.session(session_id).await?.attempt_ids;
    let slots: Vec<Arc<AttemptSlot>> = {
      let map = self.attempts.read().await;
      ids.iter().filter_map(|id| map.get(id).cloned()).collect()
    };
    let mut out = Vec::with_capacity(slots.len());
    for slot in slots {
      out.push(slot.attempt.lock().await.clone());
    }
    Ok(out)
  }

  /// Recompute a session's statistics from its attempts.
  #[instrument(level = "debug", skip(self))]
  pub async fn session_statistics(&self, session_id: &str) -> EngineResult<SessionStatistics> {
    let attempts = self.session_attempts(session_id).await?;
    let stats = SessionStatistics::recompute(session_id, &attempts, self.cfg.max_score);
    let tracked = self.tracked_totals(session_id).await?;
    if tracked != stats.totals() {
      // only transient while a submission is between its attempt and the tally
      debug!(target: "grading", %session_id, ?tracked, recomputed = ?stats.totals(), "Running totals differ from recomputed statistics");
    }
    Ok(stats)
  }

  /// The incrementally maintained counters of a session.
  pub async fn tracked_totals(&self, session_id: &str) -> EngineResult<SessionTotals> {
    self
      .sessions
      .read()
      .await
      .get(session_id)
      .map(|e| e.tally.totals())
      .ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))
  }

  /// One learner's answers to one problem, across all of their attempts.
  pub async fn analysis_for(&self, problem: &Problem, user_id: &str) -> GradeAnalysis {
    let slots: Vec<Arc<AttemptSlot>> = self.attempts.read().await.values().cloned().collect();
    let mut answers = Vec::new();
    for slot in slots {
      let attempt = slot.attempt.lock().await;
      if attempt.user_id == user_id && attempt.problem_ids.contains(&problem.id) {
        answers.extend(attempt.answers.iter().filter(|a| a.problem_id == problem.id).cloned());
      }
    }
    GradeAnalysis::from_answers(problem, &answers)
  }

  /// Expire due sessions, close attempts whose time is up, then drop what has
  /// been finished for longer than the retention window. A session goes
  /// together with its attempts; attempts outside a session go on their own.
  #[instrument(level = "debug", skip(self))]
  pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport::default();
    let retention = Duration::seconds(self.cfg.retention_secs);
    {
      let mut sessions = self.sessions.write().await;
      for entry in sessions.values_mut() {
        if !entry.session.expired && now >= entry.session.expires_at {
          entry.session.expired = true;
          report.sessions_expired += 1;
        }
      }
    }
    let slots: Vec<(String, Arc<AttemptSlot>)> =
      self.attempts.read().await.iter().map(|(id, slot)| (id.clone(), slot.clone())).collect();
    let mut stale = Vec::new();
    for (id, slot) in slots {
      let mut attempt = slot.attempt.lock().await;
      match attempt.settle(now) {
        Some(AttemptState::Completed) => report.attempts_completed += 1,
        Some(AttemptState::Abandoned) => report.attempts_abandoned += 1,
        _ => {}
      }
      let finished_long_ago = attempt.finished_at.is_some_and(|at| now >= at + retention);
      if attempt.session_id.is_none() && finished_long_ago {
        stale.push(id);
      }
    }

    let evicted: Vec<Session> = {
      let mut sessions = self.sessions.write().await;
      let due: Vec<String> = sessions
        .values()
        .filter(|e| e.session.expired && now >= e.session.expires_at + retention)
        .map(|e| e.session.id.clone())
        .collect();
      due.iter().filter_map(|id| sessions.remove(id)).map(|e| e.session).collect()
    };
    report.sessions_evicted = evicted.len();
    stale.extend(evicted.into_iter().flat_map(|s| s.attempt_ids));
    {
      let mut attempts = self.attempts.write().await;
      report.attempts_evicted = stale.iter().filter(|id| attempts.remove(*id).is_some()).count();
    }

    if report != SweepReport::default() {
      info!(target: "grading", ?report, "Sweep closed stale work");
    }
    report
  }

  /// Problem ids referenced by any attempt still held.
  pub async fn problems_in_use(&self) -> HashSet<String> {
    let slots: Vec<Arc<AttemptSlot>> = self.attempts.read().await.values().cloned().collect();
    let mut out = HashSet::new();
    for slot in slots {
      out.extend(slot.attempt.lock().await.problem_ids.iter().cloned());
    }
    out
  }
}

impl Default for GradingStore {
  fn default() -> Self {
    Self::new(GradingConfig::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{DifficultyLevel, ProblemType};
  use crate::validator::Validator;

  fn graded(expected: f64, got: f64) -> (Answer, AnswerValidationResult) {
    let submitted = Answer::numeric(got, 0.0);
    let result = Validator::default().validate(&Answer::numeric(expected, 0.0), &submitted, None, &[]);
    (submitted, result)
  }

  fn ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("p{i}")).collect()
  }

  #[tokio::test]
  async fn first_answer_starts_and_last_completes() {
    let store = GradingStore::default();
    let a = store.create_attempt("u1", None, ids(2), None).await.unwrap();
    assert_eq!(a.state, AttemptState::Created);

    let (s, r) = graded(4.0, 4.0);
    let (_, a) = store.submit(&a.id, "p0", "u1", s, r).await.unwrap();
    assert_eq!(a.state, AttemptState::InProgress);
    assert!(a.started_at.is_some());

    let (s, r) = graded(4.0, 5.0);
    let (answer, a) = store.submit(&a.id, "p1", "u1", s, r).await.unwrap();
    assert_eq!(a.state, AttemptState::Completed);
    assert!(!answer.result.is_correct);
    assert_eq!(a.total_score, a.answers.iter().map(|x| x.score).sum::<f64>());

    let (s, r) = graded(4.0, 4.0);
    let err = store.submit(&a.id, "p0", "u1", s, r).await.unwrap_err();
    assert!(matches!(err, EngineError::AttemptClosed { .. }));
  }

  #[tokio::test]
  async fn answers_are_checked_against_the_attempt() {
    let store = GradingStore::default();
    let a = store.create_attempt("u1", None, ids(3), None).await.unwrap();
    let (s, r) = graded(1.0, 1.0);
    assert!(matches!(
      store.submit(&a.id, "nope", "u1", s.clone(), r.clone()).await,
      Err(EngineError::UnknownProblem(_))
    ));
    assert!(matches!(store.submit("missing", "p0", "u1", s.clone(), r.clone()).await, Err(EngineError::UnknownAttempt(_))));
    assert!(matches!(store.submit(&a.id, "p0", "someone-else", s.clone(), r.clone()).await, Err(EngineError::UnknownAttempt(_))));
    store.submit(&a.id, "p0", "u1", s.clone(), r.clone()).await.unwrap();
    assert!(matches!(store.submit(&a.id, "p0", "u1", s, r).await, Err(EngineError::AlreadyAnswered { .. })));
  }

  #[tokio::test]
  async fn time_limit_completes_and_session_expiry_abandons() {
    let store = GradingStore::default();
    let t0 = Utc::now();
    let timed = store.create_attempt_at("u1", None, ids(2), Some(60), t0).await.unwrap();
    let (s, r) = graded(2.0, 2.0);
    store.submit_at(&timed.id, "p0", "u1", s.clone(), r.clone(), t0 + Duration::seconds(10)).await.unwrap();
    let late = store.submit_at(&timed.id, "p1", "u1", s.clone(), r.clone(), t0 + Duration::seconds(61)).await;
    assert!(matches!(late, Err(EngineError::AttemptClosed { ref state, .. }) if state == "completed"));

    let session = store.start_session("u2").await;
    let a = store.create_attempt_at("u2", Some(&session.id), ids(2), Some(10 * 24 * 3600), session.created_at).await.unwrap();
    store.submit_at(&a.id, "p0", "u2", s, r, session.created_at + Duration::seconds(5)).await.unwrap();
    let report = store.sweep(session.expires_at + Duration::seconds(1)).await;
    assert_eq!(report.sessions_expired, 1);
    assert_eq!(report.attempts_abandoned, 1);
    assert_eq!(store.attempt(&a.id).await.unwrap().state, AttemptState::Abandoned);
    assert!(store.session(&session.id).await.unwrap().expired);
    assert!(matches!(
      store.create_attempt("u2", Some(&session.id), ids(1), None).await,
      Err(EngineError::UnknownSession(_))
    ));
  }

  #[tokio::test]
  async fn unstarted_attempt_is_abandoned_at_its_deadline() {
    let store = GradingStore::default();
    let t0 = Utc::now();
    let idle = store.create_attempt_at("u1", None, ids(2), Some(60), t0).await.unwrap();
    let report = store.sweep(t0 + Duration::seconds(61)).await;
    assert_eq!(report.attempts_abandoned, 1);
    assert_eq!(report.attempts_completed, 0);
    let late = store.submit_at(&idle.id, "p0", "u1", Answer::numeric(1.0, 0.0), graded(1.0, 1.0).1, t0 + Duration::seconds(62)).await;
    assert!(matches!(late, Err(EngineError::AttemptClosed { ref state, .. }) if state == "abandoned"));
  }

  #[test]
  fn statistics_from_attempts() {
    let stats = SessionStatistics::recompute("s", &[], 100.0);
    assert_eq!(stats.correct_percentage, 0.0);
    assert_eq!(stats.total_problems_attempted, 0);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn concurrent_submissions_keep_aggregates_consistent() {
    let store = GradingStore::default();
    let session = store.start_session("learner").await;
    let mut attempts = Vec::new();
    for _ in 0..16 {
      attempts.push(store.create_attempt("learner", Some(&session.id), ids(5), None).await.unwrap().id);
    }

    let mut handles = Vec::new();
    for (i, attempt_id) in attempts.iter().cloned().enumerate() {
      let store = store.clone();
      handles.push(tokio::spawn(async move {
        for (j, pid) in ids(5).into_iter().enumerate() {
          // a mix of exact hits and near misses with partial credit
          let got = if (i + j) % 3 == 0 { 10.0 } else { 10.0 + (i % 4) as f64 * 0.3 };
          let (s, r) = graded(10.0, got);
          store.submit(&attempt_id, &pid, "learner", s, r).await.unwrap();
          tokio::task::yield_now().await;
        }
      }));
    }
    for h in handles {
      h.await.unwrap();
    }

    let stats = store.session_statistics(&session.id).await.unwrap();
    let tracked = store.tracked_totals(&session.id).await.unwrap();
    assert_eq!(stats.total_problems_attempted, 80);
    assert_eq!(stats.attempts_completed, 16);
    assert_eq!(tracked, stats.totals());
    assert_eq!(stats.total_score.to_bits(), tracked.total_score.to_bits());
    assert_eq!(stats.correct_percentage, stats.problems_correct as f64 * 100.0 / 80.0);
  }

  #[test]
  fn analysis_buckets_mistakes() {
    let problem = Problem {
      id: "p0".into(),
      problem_type: ProblemType::Arithmetic,
      difficulty: DifficultyLevel::Beginner,
      problem_statement: "Compute 12 - 5.".into(),
      equation: Some("12 - 5".into()),
      diagram: None,
      correct_answer: Answer::numeric(7.0, 0.0),
      alternatives: None,
      steps: Vec::new(),
      hints: Vec::new(),
      tags: Vec::new(),
      concepts: vec!["subtraction".into()],
      common_mistakes: vec![MistakeCategory::SignError, MistakeCategory::SwappedOperands],
    };
    let v = Validator::default();
    let answer = |got: f64| StudentAnswer {
      id: "a".into(),
      attempt_id: "t".into(),
      problem_id: "p0".into(),
      user_id: "u".into(),
      submitted_answer: Answer::numeric(got, 0.0),
      result: v.validate_problem(&problem, &Answer::numeric(got, 0.0)),
      score: 0.0,
      answered_at: Utc::now(),
    };
    let answers = [answer(-7.0), answer(-7.0), answer(8.0)];
    let g = GradeAnalysis::from_answers(&problem, &answers);
    assert_eq!(g.answers_seen, 3);
    assert_eq!(g.correct_answers, 0);
    assert_eq!(g.mistake_buckets.get(&MistakeCategory::SignError), Some(&2));
    assert_eq!(g.concepts_needing_work, vec!["subtraction".to_string()]);
    assert_eq!(g.suggestions[0], MistakeCategory::SignError.suggestion());
  }
}
