use crate::api::ApiResponse;
use axum::{http::StatusCode, response::Json};
use tracing::{error, info, warn};

/// Errors raised by the quiz core (catalog, codec, engine, services)
#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    #[error("question '{0}' not found")]
    NotFound(String),

    #[error("malformed quiz state: {0}")]
    MalformedState(String),

    #[error("{0}")]
    Validation(String),

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl QuizError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        QuizError::MalformedState(reason.into())
    }
}

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Malformed quiz state: {0}")]
    MalformedState(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Classifier error: {0}")]
    ClassifierError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] anyhow::Error),
}

impl From<QuizError> for ApiError {
    fn from(err: QuizError) -> Self {
        match err {
            QuizError::NotFound(id) => ApiError::NotFound(format!("question '{}'", id)),
            QuizError::MalformedState(reason) => ApiError::MalformedState(reason),
            QuizError::Validation(message) => ApiError::ValidationError(message),
            QuizError::Classifier(message) => ApiError::ClassifierError(message),
            QuizError::Storage(e) => ApiError::StorageError(e),
        }
    }
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
    pub user_friendly_message: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
            user_friendly_message: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn with_user_message(mut self, message: &str) -> Self {
        self.user_friendly_message = Some(message.to_string());
        self
    }
}

pub type ApiErrorResponse = (StatusCode, Json<ApiResponse<()>>);

impl ApiError {
    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(self, context: ErrorContext) -> ApiErrorResponse {
        match &self {
            ApiError::NotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Resource not found"
                );
                (
                    StatusCode::NOT_FOUND,
                    Json(ApiResponse::error(
                        context
                            .user_friendly_message
                            .unwrap_or_else(|| format!("{} not found", context.resource_type)),
                    )),
                )
            }
            ApiError::MalformedState(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Rejected quiz state"
                );
                (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::error(
                        "Quiz state is invalid or has expired. Please start a new quiz.".to_string(),
                    )),
                )
            }
            ApiError::ValidationError(message) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Validation error"
                );
                (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::error(message.clone())),
                )
            }
            ApiError::Conflict(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Conflicting request"
                );
                (StatusCode::CONFLICT, Json(ApiResponse::error(self.to_string())))
            }
            ApiError::ClassifierError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Classifier service error"
                );
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ApiResponse::error(
                        "Classification service temporarily unavailable. Please try again.".to_string(),
                    )),
                )
            }
            ApiError::StorageError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Storage error"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error(
                        "Question bank operation failed. Please try again.".to_string(),
                    )),
                )
            }
        }
    }

    /// Simple conversion without context
    pub fn to_response(self) -> ApiErrorResponse {
        let context = ErrorContext::new("unknown", "resource");
        self.to_response_with_context(context)
    }
}

/// Helper macro for structured error logging
#[macro_export]
macro_rules! api_error {
    (not_found, $operation:expr, $resource_type:expr, $id:expr) => {
        $crate::errors::ApiError::NotFound(format!("{} with id '{}' not found", $resource_type, $id))
            .to_response_with_context(
                $crate::errors::ErrorContext::new($operation, $resource_type).with_id($id),
            )
    };

    (validation, $operation:expr, $resource_type:expr, $message:expr) => {
        $crate::errors::ApiError::ValidationError($message.to_string())
            .to_response_with_context($crate::errors::ErrorContext::new($operation, $resource_type))
    };

    (conflict, $operation:expr, $resource_type:expr, $message:expr) => {
        $crate::errors::ApiError::Conflict($message.to_string())
            .to_response_with_context($crate::errors::ErrorContext::new($operation, $resource_type))
    };

    (quiz, $operation:expr, $resource_type:expr, $error:expr) => {
        $crate::errors::ApiError::from($error)
            .to_response_with_context($crate::errors::ErrorContext::new($operation, $resource_type))
    };
}
