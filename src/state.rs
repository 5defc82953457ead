//! Application state: generator set, validator, in-memory stores and the optional OpenAI client.
//!
//! This module owns:
//!   - the immutable generator set (difficulty table from TOML or defaults)
//!   - the validator with its grading knobs
//!   - the generated-problem store (by id), standing in for persistence
//!   - the grading store (attempts and sessions)
//!   - the sweeper that expires and evicts both
//!   - prompts and the AI budget, plus the OpenAI client when configured

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::config::{load_engine_config_from_env, AiConfig, DifficultyTable, EngineConfig, Prompts};
use crate::domain::GeneratedProblem;
use crate::generators::GeneratorSet;
use crate::grading::{GradingStore, SweepReport};
use crate::openai::OpenAI;
use crate::validator::Validator;

/// A generated problem and when it entered the store.
#[derive(Clone)]
pub struct StoredProblem {
    pub problem: GeneratedProblem,
    pub stored_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AppState {
    pub generators: GeneratorSet,
    pub validator: Validator,
    pub problems: Arc<RwLock<HashMap<String, StoredProblem>>>,
    pub grading: GradingStore,
    pub openai: Option<OpenAI>,
    pub prompts: Prompts,
    pub ai: AiConfig,
}

impl AppState {
    /// Build state from env: load config, build the difficulty table, init OpenAI.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let cfg = load_engine_config_from_env().unwrap_or_default();

        let openai = if cfg.ai.enabled { OpenAI::from_env() } else { None };
        let openai = match (openai, &cfg.ai.model) {
            (Some(mut oa), Some(model)) => {
                oa.model = model.clone();
                Some(oa)
            }
            (oa, _) => oa,
        };
        if let Some(oa) = &openai {
            info!(target: "mathgen", base_url = %oa.base_url, model = %oa.model, timeout_ms = cfg.ai.timeout_ms, "OpenAI enabled.");
        } else {
            info!(target: "mathgen", "OpenAI disabled. Using template generators only.");
        }

        Self::from_config(cfg, openai)
    }

    pub fn from_config(cfg: EngineConfig, openai: Option<OpenAI>) -> Self {
        let table = DifficultyTable::with_overrides(&cfg.difficulty);
        info!(target: "mathgen", overrides = cfg.difficulty.len(), max_score = cfg.grading.max_score, "Engine tables ready");
        Self {
            generators: GeneratorSet::new(table),
            validator: Validator::new(cfg.grading.clone()),
            problems: Arc::new(RwLock::new(HashMap::new())),
            grading: GradingStore::new(cfg.grading),
            openai,
            prompts: cfg.prompts,
            ai: cfg.ai,
        }
    }

    pub fn ai_available(&self) -> bool {
        self.ai.enabled && self.openai.is_some()
    }

    /// Insert generated problems into the store.
    #[instrument(level = "debug", skip(self, items), fields(count = items.len()))]
    pub async fn insert_problems(&self, items: &[GeneratedProblem]) {
        self.insert_problems_at(items, Utc::now()).await
    }

    pub async fn insert_problems_at(&self, items: &[GeneratedProblem], now: DateTime<Utc>) {
        let mut by_id = self.problems.write().await;
        for p in items {
            by_id.insert(p.problem.id.clone(), StoredProblem { problem: p.clone(), stored_at: now });
        }
    }

    /// Read-only access to a problem by id.
    #[instrument(level = "debug", skip(self), fields(%id))]
    pub async fn get_problem(&self, id: &str) -> Option<GeneratedProblem> {
        let by_id = self.problems.read().await;
        by_id.get(id).map(|s| s.problem.clone())
    }

    pub async fn has_problem(&self, id: &str) -> bool {
        self.problems.read().await.contains_key(id)
    }

    /// Sweep the grading store, then drop problems older than the retention
    /// window that no remaining attempt refers to.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = self.grading.sweep(now).await;
        let cutoff = now - chrono::Duration::seconds(self.grading.config().retention_secs);
        let in_use = self.grading.problems_in_use().await;
        let mut by_id = self.problems.write().await;
        let before = by_id.len();
        by_id.retain(|id, s| s.stored_at > cutoff || in_use.contains(id));
        report.problems_evicted = before - by_id.len();
        if report.problems_evicted > 0 {
            info!(target: "mathgen", evicted = report.problems_evicted, kept = by_id.len(), "Problem store swept");
        }
        report
    }

    /// Periodic sweep until the process exits.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                state.sweep(Utc::now()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DifficultyLevel, ProblemConfig, ProblemType};
    use crate::logic::build_template_problem;

    fn problems(state: &AppState, n: u64) -> Vec<GeneratedProblem> {
        let cfg = ProblemConfig::new(ProblemType::Arithmetic, DifficultyLevel::Beginner);
        (0..n).map(|seed| build_template_problem(&state.generators, &cfg, seed).unwrap()).collect()
    }

    #[tokio::test]
    async fn sweep_evicts_what_outlived_retention() {
        let state = AppState::from_config(EngineConfig::default(), None);
        let retention = chrono::Duration::seconds(state.grading.config().retention_secs);
        let t0 = Utc::now();
        let items = problems(&state, 3);
        state.insert_problems_at(&items, t0).await;
        let ids: Vec<String> = items.iter().map(|p| p.problem.id.clone()).collect();

        // a finished attempt outside any session keeps its problem until it goes itself
        let done = state.grading.create_attempt_at("u1", None, vec![ids[0].clone()], Some(60), t0).await.unwrap();
        let session = state.grading.start_session("u2").await;
        let open = state
            .grading
            .create_attempt_at("u2", Some(&session.id), vec![ids[1].clone()], Some(60), session.created_at)
            .await
            .unwrap();

        let report = state.sweep(t0 + chrono::Duration::seconds(120)).await;
        assert_eq!(report.attempts_abandoned, 2);
        assert_eq!(report.attempts_evicted, 0);
        assert_eq!(report.problems_evicted, 0);

        let later = session.expires_at.max(t0 + chrono::Duration::seconds(60)) + retention + chrono::Duration::seconds(1);
        let report = state.sweep(later).await;
        assert_eq!(report.sessions_evicted, 1);
        assert_eq!(report.attempts_evicted, 2);
        assert_eq!(report.problems_evicted, 3);
        assert!(state.problems.read().await.is_empty());
        assert!(matches!(state.grading.attempt(&done.id).await, Err(crate::error::EngineError::UnknownAttempt(_))));
        assert!(matches!(state.grading.attempt(&open.id).await, Err(crate::error::EngineError::UnknownAttempt(_))));
        assert!(state.grading.session(&session.id).await.is_err());
    }

    #[tokio::test]
    async fn problems_held_by_a_live_attempt_survive() {
        let state = AppState::from_config(EngineConfig::default(), None);
        let retention = chrono::Duration::seconds(state.grading.config().retention_secs);
        let t0 = Utc::now() - retention - chrono::Duration::seconds(10);
        let items = problems(&state, 2);
        state.insert_problems_at(&items, t0).await;
        let id = items[0].problem.id.clone();
        state.grading.create_attempt("u1", None, vec![id.clone()], None).await.unwrap();

        let report = state.sweep(Utc::now()).await;
        assert_eq!(report.problems_evicted, 1);
        assert!(state.has_problem(&id).await);
    }
}
