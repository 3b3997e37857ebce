use rand::seq::SliceRandom;
use std::sync::Arc;
use uuid::Uuid;

use crate::adaptive::AdaptivePool;
use crate::catalog::QuestionBank;
use crate::config::QuizConfig;
use crate::errors::QuizError;
use crate::models::{Outcome, QuestionView, QuizReport, QuizState};
use crate::quiz_engine::{Peek, QuizEngine, Step};
use crate::results;
use crate::state_store::StateStore;
use crate::{log_service_start, log_service_success};

/// Where an attempt stands after a service call.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    InProgress {
        handle: String,
        state: QuizState,
        question: QuestionView,
    },
    Finished {
        report: QuizReport,
    },
}

/// Runs attempts end to end over a pluggable [`StateStore`].
#[derive(Clone)]
pub struct QuizService {
    bank: QuestionBank,
    engine: QuizEngine,
    store: Arc<dyn StateStore>,
    adaptive: AdaptivePool,
    config: QuizConfig,
}

impl QuizService {
    pub fn new(
        bank: QuestionBank,
        engine: QuizEngine,
        store: Arc<dyn StateStore>,
        adaptive: AdaptivePool,
        config: QuizConfig,
    ) -> Self {
        Self {
            bank,
            engine,
            store,
            adaptive,
            config,
        }
    }

    /// Sample a fresh attempt. Sessions with preferences draw from their filtered pool.
    pub async fn start(&self, session_id: Option<Uuid>) -> Result<Progress, QuizError> {
        let catalog = self.bank.snapshot().await;

        let pool: Vec<String> = match session_id {
            Some(session) => self
                .adaptive
                .candidate_pool(session, catalog.clone())
                .await
                .unwrap_or_else(|| catalog.all().iter().map(|q| q.id.clone()).collect()),
            None => catalog.all().iter().map(|q| q.id.clone()).collect(),
        };
        if pool.is_empty() {
            return Err(QuizError::Validation("question bank is empty".to_string()));
        }

        log_service_start!("quiz_service", "start", question_count = pool.len());

        let count = self.config.question_count.min(pool.len());
        let order: Vec<String> = pool
            .choose_multiple(&mut rand::thread_rng(), count)
            .cloned()
            .collect();

        let state = QuizState::new(
            order,
            self.engine.now_epoch_seconds(),
            self.config.duration_seconds,
        );
        let progress = self.settle(None, state).await?;

        log_service_success!("quiz_service", "start", format!("{} attempt started with {} questions", self.store.kind(), count));
        Ok(progress)
    }

    pub async fn peek(&self, handle: &str) -> Result<Progress, QuizError> {
        let state = self.store.load(handle).await?;
        self.settle(Some(handle), state).await
    }

    pub async fn answer(&self, handle: &str, answer: Option<&str>) -> Result<Progress, QuizError> {
        let state = self.store.load(handle).await?;
        self.answer_state(Some(handle), state, answer).await
    }

    /// Advance an already-decoded state (e.g. one that arrived as form fields).
    pub async fn answer_state(
        &self,
        handle: Option<&str>,
        state: QuizState,
        answer: Option<&str>,
    ) -> Result<Progress, QuizError> {
        let catalog = self.bank.snapshot().await;
        match self.engine.advance(&catalog, state, answer)? {
            Step::AwaitingAnswer(next) => self.settle(handle, next).await,
            Step::Finished { state, outcome } => self.finish(handle, state, outcome).await,
        }
    }

    /// Final report, or `None` while the attempt is still live.
    ///
    /// Handing out the report releases the attempt from the store.
    pub async fn result(&self, handle: &str) -> Result<Option<QuizReport>, QuizError> {
        let state = self.store.load(handle).await?;
        let report = self.report_if_finished(&state);
        if report.is_some() {
            self.store.discard(handle).await;
        }
        Ok(report)
    }

    pub fn report_if_finished(&self, state: &QuizState) -> Option<QuizReport> {
        self.engine
            .terminal_outcome(state)
            .map(|outcome| results::aggregate(state, outcome))
    }

    /// Persist a live state and render its current question, or report if it is over.
    pub async fn settle(&self, handle: Option<&str>, state: QuizState) -> Result<Progress, QuizError> {
        let catalog = self.bank.snapshot().await;
        match self.engine.peek(&catalog, &state)? {
            Peek::Question(question) => {
                let handle = self.store.save(handle, &state).await?;
                Ok(Progress::InProgress {
                    handle,
                    state,
                    question,
                })
            }
            Peek::Finished(outcome) => self.finish(handle, state, outcome).await,
        }
    }

    /// Keep the terminal state under its handle so the result can still be fetched.
    async fn finish(
        &self,
        handle: Option<&str>,
        state: QuizState,
        outcome: Outcome,
    ) -> Result<Progress, QuizError> {
        if let Some(handle) = handle {
            self.store.save(Some(handle), &state).await?;
        }
        Ok(Progress::Finished {
            report: results::aggregate(&state, outcome),
        })
    }
}
