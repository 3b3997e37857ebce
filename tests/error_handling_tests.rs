use async_trait::async_trait;
use axum::http::StatusCode;
use btl_quiz::{
    BtlClassifier, ClientStateStore, ContributeRequest, QuestionBank, QuizError, QuizState,
    SessionStateStore, StateCodec, StateFields, StateStore,
};
use btl_quiz::errors::ApiError;
use tempfile::TempDir;

struct FailingClassifier;

#[async_trait]
impl BtlClassifier for FailingClassifier {
    async fn classify(&self, _text: &str) -> anyhow::Result<i64> {
        Err(anyhow::anyhow!("connection refused"))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

#[tokio::test]
async fn test_classifier_failure_does_not_touch_library() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("library.json");
    let bank = QuestionBank::open(&path).await.unwrap();

    let result = bank
        .contribute(
            ContributeRequest {
                question: "List the planets".to_string(),
                options: vec!["Mercury..".to_string()],
                topic: None,
            },
            &FailingClassifier,
        )
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error, QuizError::Classifier(_)));
    let (status, _) = ApiError::from(error).to_response();
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    assert!(!path.exists());
    assert!(bank.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_corrupt_library_fails_to_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("library.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(QuestionBank::open(&path).await.is_err());
}

#[tokio::test]
async fn test_bare_array_library_is_accepted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("library.json");
    std::fs::write(
        &path,
        r#"[{"q_id": "q_1", "question": "What is 2+2?", "answer": "4"}]"#,
    )
    .unwrap();

    let bank = QuestionBank::open(&path).await.unwrap();
    let catalog = bank.snapshot().await;
    assert_eq!(catalog.len(), 1);
    assert!(catalog.lookup("q_1").unwrap().is_correct(Some(" 4 ")));
}

#[test]
fn test_structurally_invalid_fields() {
    let codec = StateCodec::unsigned();
    let base = StateFields {
        q_index: Some("0".into()),
        correct_count: Some("0".into()),
        total_count: Some("0".into()),
        category_scores: Some("{}".into()),
        questions_order: Some("q_1,q_2".into()),
        started_at: Some("100".into()),
        duration: Some("60".into()),
        sig: None,
    };
    assert!(codec.decode_fields(&base).is_ok());

    let cases = [
        StateFields { q_index: Some("3".into()), ..base.clone() },
        StateFields { q_index: Some("-1".into()), ..base.clone() },
        StateFields { correct_count: Some("1".into()), ..base.clone() },
        StateFields { category_scores: Some("[1,2]".into()), ..base.clone() },
        StateFields { questions_order: Some("".into()), ..base.clone() },
        StateFields { started_at: Some("yesterday".into()), ..base.clone() },
        StateFields { duration: None, ..base.clone() },
    ];
    for fields in cases {
        assert!(
            matches!(codec.decode_fields(&fields), Err(QuizError::MalformedState(_))),
            "expected rejection for {:?}",
            fields
        );
    }
}

#[tokio::test]
async fn test_tokens_from_other_keys_are_rejected() {
    let state = QuizState::new(vec!["q_1".into()], 100, 60);
    let ours = ClientStateStore::new(StateCodec::with_key(b"ours"));
    let theirs = ClientStateStore::new(StateCodec::with_key(b"theirs"));

    let token = theirs.save(None, &state).await.unwrap();
    assert!(matches!(
        ours.load(&token).await,
        Err(QuizError::MalformedState(_))
    ));

    let unsigned = ClientStateStore::new(StateCodec::unsigned())
        .save(None, &state)
        .await
        .unwrap();
    assert!(ours.load(&unsigned).await.is_err());
}

#[tokio::test]
async fn test_malformed_state_maps_to_bad_request() {
    let store = SessionStateStore::new();
    let error = store.load("nope").await.unwrap_err();
    let (status, body) = ApiError::from(error).to_response();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!body.0.success);
}
