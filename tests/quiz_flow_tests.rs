use btl_quiz::{
    quiz_engine::{Peek, Step},
    results, CategoryCounts, ClientStateStore, FixedClock, Outcome, Question, QuestionCatalog,
    QuizEngine, QuizState, StateCodec, StateStore,
};
use std::sync::Arc;

const START: i64 = 1_700_000_000;

fn question(id: &str, btl: i64) -> Question {
    Question {
        id: id.to_string(),
        text: format!("Question {}", id),
        options: vec!["right".into(), "wrong".into()],
        correct_option_index: Some(0),
        correct_text: None,
        predicted_btl: Some(btl),
        topic: None,
    }
}

fn catalog() -> QuestionCatalog {
    QuestionCatalog::new(vec![
        question("q_1", 1),
        question("q_2", 1),
        question("q_3", 2),
    ])
}

fn fresh_state() -> QuizState {
    QuizState::new(vec!["q_1".into(), "q_2".into(), "q_3".into()], START, 1200)
}

#[test]
fn test_full_run_all_correct() {
    let clock = FixedClock::at_epoch_seconds(START);
    let engine = QuizEngine::new(Arc::new(clock));
    let catalog = catalog();

    let mut state = fresh_state();
    let mut outcome = None;
    for _ in 0..3 {
        match engine.advance(&catalog, state.clone(), Some("0")).unwrap() {
            Step::AwaitingAnswer(next) => state = next,
            Step::Finished { state: last, outcome: o } => {
                state = last;
                outcome = Some(o);
            }
        }
    }

    assert_eq!(outcome, Some(Outcome::Completed));
    assert_eq!(state.correct_count, 3);
    assert_eq!(state.total_count, 3);
    assert_eq!(
        state.category_tally.get("1"),
        Some(&CategoryCounts { correct: 2, total: 2 })
    );
    assert_eq!(
        state.category_tally.get("2"),
        Some(&CategoryCounts { correct: 1, total: 1 })
    );

    let report = results::aggregate(&state, Outcome::Completed);
    assert_eq!(report.percentages["1"], 100.0);
    assert_eq!(report.percentages["2"], 100.0);
    assert_eq!(report.outcome, Outcome::Completed);
}

#[test]
fn test_late_first_answer_times_out_without_scoring() {
    let clock = FixedClock::at_epoch_seconds(START + 1201);
    let engine = QuizEngine::new(Arc::new(clock));

    let step = engine.advance(&catalog(), fresh_state(), Some("0")).unwrap();
    assert_eq!(step.outcome(), Some(Outcome::TimedOut));
    let state = step.into_state();
    assert_eq!(state.correct_count, 0);
    assert_eq!(state.total_count, 0);
    assert!(state.category_tally.is_empty());
}

#[test]
fn test_deadline_is_inclusive() {
    let clock = FixedClock::at_epoch_seconds(START + 1199);
    let engine = QuizEngine::new(Arc::new(clock.clone()));

    let step = engine.advance(&catalog(), fresh_state(), Some("0")).unwrap();
    assert!(matches!(step, Step::AwaitingAnswer(_)));

    clock.set_epoch_seconds(START + 1200);
    let step = engine.advance(&catalog(), fresh_state(), Some("0")).unwrap();
    assert_eq!(step.outcome(), Some(Outcome::TimedOut));
}

#[test]
fn test_missing_answer_counts_as_wrong() {
    let engine = QuizEngine::new(Arc::new(FixedClock::at_epoch_seconds(START)));
    let state = engine
        .advance(&catalog(), fresh_state(), None)
        .unwrap()
        .into_state();
    assert_eq!(state.cursor, 1);
    assert_eq!(state.total_count, 1);
    assert_eq!(state.correct_count, 0);
}

#[test]
fn test_peek_after_timeout_reports_finished() {
    let clock = FixedClock::at_epoch_seconds(START);
    let engine = QuizEngine::new(Arc::new(clock.clone()));
    let catalog = catalog();

    match engine.peek(&catalog, &fresh_state()).unwrap() {
        Peek::Question(view) => {
            assert_eq!(view.id, "q_1");
            assert_eq!(view.remaining_seconds, 1200);
            assert!(!view.is_last);
        }
        other => panic!("expected a question, got {:?}", other),
    }

    clock.advance_seconds(5000);
    assert_eq!(
        engine.peek(&catalog, &fresh_state()).unwrap(),
        Peek::Finished(Outcome::TimedOut)
    );
}

#[tokio::test]
async fn test_state_survives_client_round_trips() {
    let engine = QuizEngine::new(Arc::new(FixedClock::at_epoch_seconds(START)));
    let store = ClientStateStore::new(StateCodec::with_key(b"flow-key"));
    let catalog = catalog();

    let mut token = store.save(None, &fresh_state()).await.unwrap();
    for answer in ["0", "1"] {
        let state = store.load(&token).await.unwrap();
        let next = engine
            .advance(&catalog, state, Some(answer))
            .unwrap()
            .into_state();
        token = store.save(Some(&token), &next).await.unwrap();
    }

    let state = store.load(&token).await.unwrap();
    assert_eq!(state.cursor, 2);
    assert_eq!(state.correct_count, 1);
    assert_eq!(state.total_count, 2);
    assert_eq!(
        state.category_tally.get("1"),
        Some(&CategoryCounts { correct: 1, total: 2 })
    );
}
