use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::catalog::QuestionCatalog;
use crate::errors::QuizError;
use crate::models::{Outcome, QuestionView, QuizState};

/// Source of wall-clock time. Read fresh on every engine call.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a settable instant, for tests and replay.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<std::sync::RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn at_epoch_seconds(seconds: i64) -> Self {
        Self {
            now: Arc::new(std::sync::RwLock::new(
                DateTime::from_timestamp(seconds, 0).unwrap_or_default(),
            )),
        }
    }

    pub fn set_epoch_seconds(&self, seconds: i64) {
        if let Ok(mut now) = self.now.write() {
            *now = DateTime::from_timestamp(seconds, 0).unwrap_or_default();
        }
    }

    pub fn advance_seconds(&self, seconds: i64) {
        if let Ok(mut now) = self.now.write() {
            *now += chrono::Duration::seconds(seconds);
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.read().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

/// Result of [`QuizEngine::advance`].
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Still live; the state points at the next question.
    AwaitingAnswer(QuizState),
    Finished { state: QuizState, outcome: Outcome },
}

impl Step {
    pub fn state(&self) -> &QuizState {
        match self {
            Step::AwaitingAnswer(state) => state,
            Step::Finished { state, .. } => state,
        }
    }

    pub fn into_state(self) -> QuizState {
        match self {
            Step::AwaitingAnswer(state) => state,
            Step::Finished { state, .. } => state,
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Step::AwaitingAnswer(_) => None,
            Step::Finished { outcome, .. } => Some(*outcome),
        }
    }
}

/// Result of [`QuizEngine::peek`].
#[derive(Debug, Clone, PartialEq)]
pub enum Peek {
    Question(QuestionView),
    Finished(Outcome),
}

/// The quiz progression state machine.
///
/// The deadline `started_at + duration` is checked against the engine's clock
/// before anything else on every call; once it has passed no answer is
/// evaluated and the tallies are returned exactly as they were.
#[derive(Clone)]
pub struct QuizEngine {
    clock: Arc<dyn Clock>,
}

impl QuizEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    pub fn now_epoch_seconds(&self) -> i64 {
        self.clock.now().timestamp()
    }

    /// Outcome if the attempt can no longer accept answers.
    pub fn terminal_outcome(&self, state: &QuizState) -> Option<Outcome> {
        Self::outcome_at(state, self.now_epoch_seconds())
    }

    fn outcome_at(state: &QuizState, now: i64) -> Option<Outcome> {
        if state.is_complete() {
            Some(Outcome::Completed)
        } else if state.remaining_seconds(now) == 0 {
            Some(Outcome::TimedOut)
        } else {
            None
        }
    }

    /// Evaluate one submitted answer and move the cursor forward.
    pub fn advance(
        &self,
        catalog: &QuestionCatalog,
        state: QuizState,
        submitted: Option<&str>,
    ) -> Result<Step, QuizError> {
        // A finished attempt stays finished; nothing more is counted.
        if state.is_complete() {
            return Ok(Step::Finished {
                state,
                outcome: Outcome::Completed,
            });
        }

        let now = self.now_epoch_seconds();
        if state.remaining_seconds(now) == 0 {
            debug!(
                cursor = state.cursor,
                deadline = state.deadline(),
                now,
                "Answer arrived after the deadline"
            );
            return Ok(Step::Finished {
                state,
                outcome: Outcome::TimedOut,
            });
        }

        let question_id = state
            .current_question_id()
            .ok_or_else(|| QuizError::malformed("cursor out of range"))?;
        let question = catalog.lookup(question_id)?;
        let correct = question.is_correct(submitted);

        let mut next = state;
        next.total_count += 1;
        let bucket = next
            .category_tally
            .entry(question.category_key())
            .or_default();
        bucket.total += 1;
        if correct {
            next.correct_count += 1;
            bucket.correct += 1;
        }
        next.cursor += 1;

        debug!(
            question_id = %question.id,
            correct,
            cursor = next.cursor,
            total = next.order.len(),
            "Answer evaluated"
        );

        if next.is_complete() {
            Ok(Step::Finished {
                state: next,
                outcome: Outcome::Completed,
            })
        } else {
            Ok(Step::AwaitingAnswer(next))
        }
    }

    /// Read-only view of the current question. Safe to repeat.
    pub fn peek(&self, catalog: &QuestionCatalog, state: &QuizState) -> Result<Peek, QuizError> {
        let now = self.now_epoch_seconds();
        if let Some(outcome) = Self::outcome_at(state, now) {
            return Ok(Peek::Finished(outcome));
        }

        let question_id = state
            .current_question_id()
            .ok_or_else(|| QuizError::malformed("cursor out of range"))?;
        let question = catalog.lookup(question_id)?;

        Ok(Peek::Question(QuestionView {
            id: question.id.clone(),
            text: question.text.clone(),
            options: question.options.clone(),
            position: state.cursor + 1,
            total_questions: state.order.len(),
            remaining_seconds: state.remaining_seconds(now),
            is_last: state.cursor + 1 == state.order.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryCounts, Question};

    const START: i64 = 1_700_000_000;

    fn question(id: &str, btl: Option<i64>) -> Question {
        Question {
            id: id.to_string(),
            text: format!("Text of {}", id),
            options: vec!["zero".into(), "one".into(), "two".into()],
            correct_option_index: Some(2),
            correct_text: None,
            predicted_btl: btl,
            topic: None,
        }
    }

    fn setup() -> (QuestionCatalog, QuizEngine, FixedClock, QuizState) {
        let catalog = QuestionCatalog::new(vec![
            question("q_1", Some(1)),
            question("q_2", Some(1)),
            question("q_3", Some(2)),
        ]);
        let clock = FixedClock::at_epoch_seconds(START);
        let engine = QuizEngine::new(Arc::new(clock.clone()));
        let state = QuizState::new(vec!["q_1".into(), "q_2".into(), "q_3".into()], START, 1200);
        (catalog, engine, clock, state)
    }

    #[test]
    fn test_full_run_all_correct() {
        let (catalog, engine, _, mut state) = setup();
        for _ in 0..2 {
            match engine.advance(&catalog, state, Some("2")).unwrap() {
                Step::AwaitingAnswer(next) => state = next,
                other => panic!("finished early: {:?}", other),
            }
        }
        let step = engine.advance(&catalog, state, Some("2")).unwrap();
        assert_eq!(step.outcome(), Some(Outcome::Completed));

        let state = step.into_state();
        assert_eq!(state.correct_count, 3);
        assert_eq!(state.total_count, 3);
        assert_eq!(state.category_tally["1"], CategoryCounts { correct: 2, total: 2 });
        assert_eq!(state.category_tally["2"], CategoryCounts { correct: 1, total: 1 });
        assert_eq!(state.category_tally.len(), 2);
    }

    #[test]
    fn test_expired_attempt_times_out_without_evaluation() {
        let (catalog, engine, clock, state) = setup();
        clock.set_epoch_seconds(START + 1201);

        let step = engine.advance(&catalog, state.clone(), Some("2")).unwrap();
        assert_eq!(
            step,
            Step::Finished {
                state: state.clone(),
                outcome: Outcome::TimedOut
            }
        );
        assert_eq!(step.state().total_count, 0);
        assert_eq!(step.state().correct_count, 0);
        assert_eq!(engine.peek(&catalog, &state).unwrap(), Peek::Finished(Outcome::TimedOut));
    }

    #[test]
    fn test_deadline_is_inclusive() {
        let (catalog, engine, clock, state) = setup();
        clock.set_epoch_seconds(START + 1200);
        let step = engine.advance(&catalog, state, Some("2")).unwrap();
        assert_eq!(step.outcome(), Some(Outcome::TimedOut));
    }

    #[test]
    fn test_timeout_mid_quiz_keeps_tallies() {
        let (catalog, engine, clock, state) = setup();
        let state = engine.advance(&catalog, state, Some("2")).unwrap().into_state();
        clock.advance_seconds(5_000);

        let step = engine.advance(&catalog, state.clone(), Some("2")).unwrap();
        assert_eq!(step.outcome(), Some(Outcome::TimedOut));
        assert_eq!(step.state(), &state);
        assert_eq!(step.state().total_count, 1);
    }

    #[test]
    fn test_wrong_and_missing_answers_count_as_incorrect() {
        let (catalog, engine, _, state) = setup();
        let state = engine.advance(&catalog, state, Some("02")).unwrap().into_state();
        let state = engine.advance(&catalog, state, None).unwrap().into_state();
        let step = engine.advance(&catalog, state, Some("b")).unwrap();
        let state = step.state();
        assert_eq!(state.total_count, 3);
        assert_eq!(state.correct_count, 0);
        assert_eq!(state.category_tally["1"], CategoryCounts { correct: 0, total: 2 });
    }

    #[test]
    fn test_terminal_state_is_unchanged() {
        let (catalog, engine, _, mut state) = setup();
        loop {
            match engine.advance(&catalog, state, Some("2")).unwrap() {
                Step::AwaitingAnswer(next) => state = next,
                Step::Finished { state: done, .. } => {
                    state = done;
                    break;
                }
            }
        }
        let again = engine.advance(&catalog, state.clone(), Some("2")).unwrap();
        assert_eq!(again.state(), &state);
        assert_eq!(again.outcome(), Some(Outcome::Completed));
        assert_eq!(engine.peek(&catalog, &state).unwrap(), Peek::Finished(Outcome::Completed));
    }

    #[test]
    fn test_counts_are_monotonic() {
        let (catalog, engine, _, mut state) = setup();
        let answers = [Some("2"), Some("0"), Some("2")];
        for answer in answers {
            let before = state.clone();
            let step = engine.advance(&catalog, state, answer).unwrap();
            let after = step.state().clone();
            assert!(after.cursor > before.cursor);
            assert!(after.total_count > before.total_count);
            assert!(after.correct_count <= after.total_count);
            state = after;
        }
    }

    #[test]
    fn test_unlabelled_question_goes_to_unknown_bucket() {
        let catalog = QuestionCatalog::new(vec![question("q_1", None), question("q_2", Some(7))]);
        let engine = QuizEngine::new(Arc::new(FixedClock::at_epoch_seconds(START)));
        let state = QuizState::new(vec!["q_1".into(), "q_2".into()], START, 60);
        let state = engine.advance(&catalog, state, Some("2")).unwrap().into_state();
        let state = engine.advance(&catalog, state, Some("1")).unwrap().into_state();
        assert_eq!(state.category_tally["Unknown"], CategoryCounts { correct: 1, total: 1 });
        assert_eq!(state.category_tally["7"], CategoryCounts { correct: 0, total: 1 });
    }

    #[test]
    fn test_unknown_question_id_is_not_found() {
        let (catalog, engine, _, _) = setup();
        let state = QuizState::new(vec!["q_404".into()], START, 60);
        assert!(matches!(
            engine.advance(&catalog, state.clone(), Some("1")),
            Err(QuizError::NotFound(id)) if id == "q_404"
        ));
        assert!(matches!(engine.peek(&catalog, &state), Err(QuizError::NotFound(_))));
    }

    #[test]
    fn test_peek_is_idempotent() {
        let (catalog, engine, clock, state) = setup();
        clock.advance_seconds(200);
        let first = engine.peek(&catalog, &state).unwrap();
        let second = engine.peek(&catalog, &state).unwrap();
        assert_eq!(first, second);
        match first {
            Peek::Question(view) => {
                assert_eq!(view.id, "q_1");
                assert_eq!(view.position, 1);
                assert_eq!(view.total_questions, 3);
                assert_eq!(view.remaining_seconds, 1000);
                assert!(!view.is_last);
            }
            other => panic!("expected question, got {:?}", other),
        }
    }

    #[test]
    fn test_peek_marks_last_question() {
        let (catalog, engine, _, state) = setup();
        let state = engine.advance(&catalog, state, Some("2")).unwrap().into_state();
        let state = engine.advance(&catalog, state, Some("2")).unwrap().into_state();
        match engine.peek(&catalog, &state).unwrap() {
            Peek::Question(view) => {
                assert_eq!(view.id, "q_3");
                assert_eq!(view.position, 3);
                assert!(view.is_last);
            }
            other => panic!("expected question, got {:?}", other),
        }
    }

    /// Moves one second forward every time it is read.
    struct TickingClock(std::sync::atomic::AtomicI64);

    impl Clock for TickingClock {
        fn now(&self) -> DateTime<Utc> {
            let seconds = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            DateTime::from_timestamp(seconds, 0).unwrap_or_default()
        }
    }

    #[test]
    fn test_peek_reads_the_clock_once() {
        let (catalog, _, _, state) = setup();
        let engine = QuizEngine::new(Arc::new(TickingClock(std::sync::atomic::AtomicI64::new(
            START + 1199,
        ))));
        match engine.peek(&catalog, &state).unwrap() {
            Peek::Question(view) => assert_eq!(view.remaining_seconds, 1),
            other => panic!("expected question, got {:?}", other),
        }
    }
}
