use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Form, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::{
    adaptive::{AdaptivePool, AdaptiveStats},
    catalog::QuestionBank,
    classifier::BtlClassifier,
    errors::{ApiError, ApiErrorResponse, ErrorContext, QuizError},
    models::*,
    quiz_service::{Progress, QuizService},
    state_codec::{StateCodec, StateFields},
};

// Import logging macros
use crate::{api_error, log_api_error, log_api_start, log_api_success, log_api_warn, log_validation};

#[derive(Clone)]
pub struct AppState {
    pub bank: QuestionBank,
    pub classifier: Arc<dyn BtlClassifier>,
    /// Attempts whose progress travels with the client.
    pub client_quiz: QuizService,
    /// Attempts whose progress is kept in server memory.
    pub session_quiz: QuizService,
    pub adaptive: AdaptivePool,
    pub codec: StateCodec,
}

#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiErrorResponse>;

/// What a quiz taker sees after any start, peek or answer call.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuizStep {
    InProgress {
        #[serde(skip_serializing_if = "Option::is_none")]
        attempt_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        fields: Option<StateFields>,
        /// Link that re-renders the current question from the flat fields.
        #[serde(skip_serializing_if = "Option::is_none")]
        question_url: Option<String>,
        question: QuestionView,
    },
    Finished {
        outcome: Outcome,
        report: QuizReport,
    },
}

impl QuizStep {
    fn finished(report: QuizReport) -> Self {
        QuizStep::Finished {
            outcome: report.outcome,
            report,
        }
    }

    fn for_client(progress: Progress, codec: &StateCodec) -> Result<Self, QuizError> {
        Ok(match progress {
            Progress::InProgress {
                handle,
                state,
                question,
            } => QuizStep::InProgress {
                attempt_id: None,
                fields: Some(codec.encode_fields(&state)?),
                question_url: Some(format!("/api/quiz/question?{}", codec.query_string(&state)?)),
                state: Some(handle),
                question,
            },
            Progress::Finished { report } => Self::finished(report),
        })
    }

    fn for_session(progress: Progress) -> Self {
        match progress {
            Progress::InProgress {
                handle, question, ..
            } => QuizStep::InProgress {
                attempt_id: Some(handle),
                state: None,
                fields: None,
                question_url: None,
                question,
            },
            Progress::Finished { report } => Self::finished(report),
        }
    }
}

/// Client-carried state: either the compact token or the flat hidden fields.
#[derive(Debug, Default, Deserialize)]
pub struct StateParams {
    pub state: Option<String>,
    pub q_index: Option<String>,
    pub correct_count: Option<String>,
    pub total_count: Option<String>,
    pub category_scores: Option<String>,
    pub questions_order: Option<String>,
    pub started_at: Option<String>,
    pub duration: Option<String>,
    pub sig: Option<String>,
}

impl StateParams {
    fn fields(&self) -> StateFields {
        StateFields {
            q_index: self.q_index.clone(),
            correct_count: self.correct_count.clone(),
            total_count: self.total_count.clone(),
            category_scores: self.category_scores.clone(),
            questions_order: self.questions_order.clone(),
            started_at: self.started_at.clone(),
            duration: self.duration.clone(),
            sig: self.sig.clone(),
        }
    }

    fn decode(&self, codec: &StateCodec) -> Result<QuizState, QuizError> {
        match self.state.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => codec.decode_token(token),
            _ => {
                let fields = self.fields();
                if fields.is_empty() {
                    return Err(QuizError::malformed("missing state"));
                }
                codec.decode_fields(&fields)
            }
        }
    }
}

/// Answer submission for the client-carried flow, posted as a form.
#[derive(Debug, Default, Deserialize)]
pub struct AnswerForm {
    pub answer: Option<String>,
    pub state: Option<String>,
    pub q_index: Option<String>,
    pub correct_count: Option<String>,
    pub total_count: Option<String>,
    pub category_scores: Option<String>,
    pub questions_order: Option<String>,
    pub started_at: Option<String>,
    pub duration: Option<String>,
    pub sig: Option<String>,
}

impl AnswerForm {
    fn into_parts(self) -> (Option<String>, StateParams) {
        (
            self.answer,
            StateParams {
                state: self.state,
                q_index: self.q_index,
                correct_count: self.correct_count,
                total_count: self.total_count,
                category_scores: self.category_scores,
                questions_order: self.questions_order,
                started_at: self.started_at,
                duration: self.duration,
                sig: self.sig,
            },
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionAnswerRequest {
    #[serde(default)]
    pub answer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PreferencesResponse {
    pub session_id: Uuid,
    pub weights: PreferenceVector,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub question_count: usize,
    pub catalog_revision: u64,
    pub classifier: &'static str,
    pub state_signing: bool,
    pub adaptive: AdaptiveStats,
}

// Question bank endpoints
pub async fn list_questions(State(state): State<AppState>) -> ApiResult<Vec<Question>> {
    log_api_start!("list_questions");
    let catalog = state.bank.snapshot().await;
    log_api_success!("list_questions", count = catalog.len(), "questions listed");
    Ok(Json(ApiResponse::success(catalog.all().to_vec())))
}

pub async fn get_question(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Question> {
    log_api_start!("get_question", question_id = id);

    let catalog = state.bank.snapshot().await;
    match catalog.lookup(&id) {
        Ok(question) => {
            log_api_success!("get_question", question_id = id, "question retrieved");
            Ok(Json(ApiResponse::success(question.clone())))
        }
        Err(_) => {
            log_api_warn!("get_question", question_id = id, "question not found");
            Err(api_error!(not_found, "get_question", "question", &id))
        }
    }
}

pub async fn contribute_question(
    State(state): State<AppState>,
    Json(request): Json<ContributeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Question>>), ApiErrorResponse> {
    info!(
        option_count = request.options.len(),
        topic = ?request.topic,
        classifier = state.classifier.name(),
        "Contributing new question"
    );

    match state.bank.contribute(request, state.classifier.as_ref()).await {
        Ok(question) => {
            log_api_success!("contribute_question", question_id = question.id, "question added to bank");
            Ok((StatusCode::CREATED, Json(ApiResponse::success(question))))
        }
        Err(e) => {
            log_api_error!("contribute_question", error = e, "question rejected");
            Err(api_error!(quiz, "contribute_question", "question", e))
        }
    }
}

// Preference endpoints
pub async fn set_preferences(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SetPreferencesRequest>,
) -> ApiResult<PreferencesResponse> {
    log_api_start!("set_preferences", session_id = session_id);

    state
        .adaptive
        .set_preferences(session_id, request.weights)
        .await
        .map_err(|e| {
            log_validation!(failure, "preferences", error = e);
            ApiError::from(e).to_response_with_context(
                ErrorContext::new("set_preferences", "preferences").with_id(&session_id.to_string()),
            )
        })?;

    log_api_success!("set_preferences", session_id = session_id, "preferences stored");
    Ok(Json(ApiResponse::success(PreferencesResponse {
        session_id,
        weights: request.weights,
    })))
}

pub async fn get_preferences(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<PreferencesResponse> {
    match state.adaptive.get_preferences(session_id).await {
        Some(weights) => Ok(Json(ApiResponse::success(PreferencesResponse {
            session_id,
            weights,
        }))),
        None => Err(ApiError::NotFound(format!("preferences for session '{}'", session_id))
            .to_response_with_context(
                ErrorContext::new("get_preferences", "preferences")
                    .with_id(&session_id.to_string())
                    .with_user_message("No preferences set for this session"),
            )),
    }
}

pub async fn clear_preferences(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiErrorResponse> {
    if state.adaptive.clear_preferences(session_id).await {
        log_api_success!("clear_preferences", session_id = session_id, "preferences cleared");
        Ok(StatusCode::NO_CONTENT)
    } else {
        log_api_warn!("clear_preferences", session_id = session_id, "no preferences to clear");
        Err(api_error!(
            not_found,
            "clear_preferences",
            "preferences",
            &session_id.to_string()
        ))
    }
}

// Client-carried quiz endpoints
pub async fn start_client_quiz(
    State(state): State<AppState>,
    request: Option<Json<StartQuizRequest>>,
) -> ApiResult<QuizStep> {
    let session_id = request.and_then(|Json(r)| r.session_id);
    log_api_start!("start_client_quiz");

    let step = state
        .client_quiz
        .start(session_id)
        .await
        .and_then(|progress| QuizStep::for_client(progress, &state.codec))
        .map_err(|e| api_error!(quiz, "start_client_quiz", "quiz", e))?;

    log_api_success!("start_client_quiz", "attempt started");
    Ok(Json(ApiResponse::success(step)))
}

pub async fn peek_client_quiz(
    State(state): State<AppState>,
    Query(params): Query<StateParams>,
) -> ApiResult<QuizStep> {
    let quiz_state = params
        .decode(&state.codec)
        .map_err(|e| api_error!(quiz, "peek_client_quiz", "quiz", e))?;

    let step = state
        .client_quiz
        .settle(None, quiz_state)
        .await
        .and_then(|progress| QuizStep::for_client(progress, &state.codec))
        .map_err(|e| api_error!(quiz, "peek_client_quiz", "quiz", e))?;
    Ok(Json(ApiResponse::success(step)))
}

pub async fn answer_client_quiz(
    State(state): State<AppState>,
    Form(form): Form<AnswerForm>,
) -> ApiResult<QuizStep> {
    let (answer, params) = form.into_parts();
    let quiz_state = params.decode(&state.codec).map_err(|e| {
        log_api_warn!("answer_client_quiz", "rejected client state");
        api_error!(quiz, "answer_client_quiz", "quiz", e)
    })?;
    let cursor = quiz_state.cursor;
    log_api_start!("answer_client_quiz", cursor = cursor);

    let step = state
        .client_quiz
        .answer_state(None, quiz_state, answer.as_deref())
        .await
        .and_then(|progress| QuizStep::for_client(progress, &state.codec))
        .map_err(|e| {
            log_api_error!("answer_client_quiz", cursor = cursor, error = e, "answer not recorded");
            api_error!(quiz, "answer_client_quiz", "quiz", e)
        })?;
    Ok(Json(ApiResponse::success(step)))
}

pub async fn client_quiz_result(
    State(state): State<AppState>,
    Query(params): Query<StateParams>,
) -> ApiResult<QuizReport> {
    let quiz_state = params
        .decode(&state.codec)
        .map_err(|e| api_error!(quiz, "client_quiz_result", "quiz", e))?;

    match state.client_quiz.report_if_finished(&quiz_state) {
        Some(report) => Ok(Json(ApiResponse::success(report))),
        None => Err(api_error!(
            conflict,
            "client_quiz_result",
            "quiz",
            "quiz is still in progress"
        )),
    }
}

// Session-backed quiz endpoints
pub async fn start_session_quiz(
    State(state): State<AppState>,
    request: Option<Json<StartQuizRequest>>,
) -> ApiResult<QuizStep> {
    let session_id = request.and_then(|Json(r)| r.session_id);
    log_api_start!("start_session_quiz");

    let progress = state
        .session_quiz
        .start(session_id)
        .await
        .map_err(|e| api_error!(quiz, "start_session_quiz", "quiz", e))?;

    let step = QuizStep::for_session(progress);
    if let QuizStep::InProgress { attempt_id: Some(id), .. } = &step {
        info!(attempt_id = %id, "Session attempt started");
    }
    Ok(Json(ApiResponse::success(step)))
}

pub async fn peek_session_quiz(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> ApiResult<QuizStep> {
    log_api_start!("peek_session_quiz", attempt = attempt_id);
    let progress = state.session_quiz.peek(&attempt_id).await.map_err(|e| {
        ApiError::from(e).to_response_with_context(
            ErrorContext::new("peek_session_quiz", "quiz").with_id(&attempt_id),
        )
    })?;
    Ok(Json(ApiResponse::success(QuizStep::for_session(progress))))
}

pub async fn answer_session_quiz(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
    Json(request): Json<SessionAnswerRequest>,
) -> ApiResult<QuizStep> {
    log_api_start!("answer_session_quiz", attempt = attempt_id);
    let progress = state
        .session_quiz
        .answer(&attempt_id, request.answer.as_deref())
        .await
        .map_err(|e| {
            log_api_error!("answer_session_quiz", attempt = attempt_id, error = e, "answer not recorded");
            ApiError::from(e).to_response_with_context(
                ErrorContext::new("answer_session_quiz", "quiz").with_id(&attempt_id),
            )
        })?;
    Ok(Json(ApiResponse::success(QuizStep::for_session(progress))))
}

pub async fn session_quiz_result(
    State(state): State<AppState>,
    Path(attempt_id): Path<String>,
) -> ApiResult<QuizReport> {
    let report = state.session_quiz.result(&attempt_id).await.map_err(|e| {
        ApiError::from(e).to_response_with_context(
            ErrorContext::new("session_quiz_result", "quiz").with_id(&attempt_id),
        )
    })?;

    match report {
        Some(report) => Ok(Json(ApiResponse::success(report))),
        None => Err(api_error!(
            conflict,
            "session_quiz_result",
            "quiz",
            "quiz is still in progress"
        )),
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let catalog = state.bank.snapshot().await;
    Json(HealthResponse {
        status: "ok",
        question_count: catalog.len(),
        catalog_revision: catalog.revision(),
        classifier: state.classifier.name(),
        state_signing: state.codec.is_signed(),
        adaptive: state.adaptive.get_stats().await,
    })
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Question bank routes
        .route("/api/questions", get(list_questions).post(contribute_question))
        .route("/api/questions/:id", get(get_question))
        // Preference routes
        .route(
            "/api/preferences/:session_id",
            put(set_preferences).get(get_preferences).delete(clear_preferences),
        )
        // Client-carried quiz routes
        .route("/api/quiz/start", post(start_client_quiz))
        .route("/api/quiz/question", get(peek_client_quiz))
        .route("/api/quiz/answer", post(answer_client_quiz))
        .route("/api/quiz/result", get(client_quiz_result))
        // Session-backed quiz routes
        .route("/api/quiz/sessions", post(start_session_quiz))
        .route("/api/quiz/sessions/:id", get(peek_session_quiz))
        .route("/api/quiz/sessions/:id/answer", post(answer_session_quiz))
        .route("/api/quiz/sessions/:id/result", get(session_quiz_result))
        .with_state(state)
}
