// Macros file - tracing macros are imported within the macro definitions

/// Standardized logging macros for consistent field names and message patterns across the service
///
/// Field names used throughout:
/// - `operation`: the API or service operation being performed
/// - `attempt`: opaque handle of a quiz attempt (token prefix or session id)
/// - `cursor`: zero-based position of the question being answered
/// - `question_id`: catalog id of a question
/// - `session_id`: preference session identifier
/// - `count` / `duration_ms`: sizes and timings

// ============================================================================
// API Operation Logging Macros
// ============================================================================

/// Log the start of an API operation with consistent fields
#[macro_export]
macro_rules! log_api_start {
    ($operation:expr, question_id = $question_id:expr) => {
        tracing::debug!(
            operation = $operation,
            question_id = %$question_id,
            "API operation started"
        );
    };
    ($operation:expr, session_id = $session_id:expr) => {
        tracing::debug!(
            operation = $operation,
            session_id = %$session_id,
            "API operation started"
        );
    };
    ($operation:expr, attempt = $attempt:expr) => {
        tracing::debug!(
            operation = $operation,
            attempt = %$attempt,
            "API operation started"
        );
    };
    ($operation:expr, cursor = $cursor:expr) => {
        tracing::debug!(
            operation = $operation,
            cursor = $cursor,
            "API operation started"
        );
    };
    ($operation:expr) => {
        tracing::debug!(operation = $operation, "API operation started");
    };
}

/// Log successful completion of an API operation
#[macro_export]
macro_rules! log_api_success {
    ($operation:expr, question_id = $question_id:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            question_id = %$question_id,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, session_id = $session_id:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            session_id = %$session_id,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, count = $count:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            count = $count,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::info!(operation = $operation, "API operation completed: {}", $msg);
    };
}

/// Log API operation errors with consistent structure
#[macro_export]
macro_rules! log_api_error {
    ($operation:expr, attempt = $attempt:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            attempt = %$attempt,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
    ($operation:expr, cursor = $cursor:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            cursor = $cursor,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
    ($operation:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
}

/// Log API warnings with context
#[macro_export]
macro_rules! log_api_warn {
    ($operation:expr, question_id = $question_id:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            question_id = %$question_id,
            "API operation warning: {}", $msg
        );
    };
    ($operation:expr, session_id = $session_id:expr, $msg:expr) => {
        tracing::warn!(
            operation = $operation,
            session_id = %$session_id,
            "API operation warning: {}", $msg
        );
    };
    ($operation:expr, $msg:expr) => {
        tracing::warn!(operation = $operation, "API operation warning: {}", $msg);
    };
}

// ============================================================================
// Service Layer Logging Macros
// ============================================================================

/// Log service operation start with context
#[macro_export]
macro_rules! log_service_start {
    ($service:expr, $operation:expr, question_count = $count:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            question_count = $count,
            "Service operation started"
        );
    };
    ($service:expr, $operation:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            "Service operation started"
        );
    };
}

/// Log service operation success
#[macro_export]
macro_rules! log_service_success {
    ($service:expr, $operation:expr, question_count = $count:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            question_count = $count,
            duration_ms = $duration,
            "Service operation completed successfully"
        );
    };
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::info!(
            service = $service,
            operation = $operation,
            "Service operation completed: {}", $msg
        );
    };
}

/// Log service warnings (degraded paths that do not fail the request)
#[macro_export]
macro_rules! log_service_warn {
    ($service:expr, $operation:expr, error = $error:expr, $msg:expr) => {
        tracing::warn!(
            service = $service,
            operation = $operation,
            error = %$error,
            "Service operation degraded: {}", $msg
        );
    };
    ($service:expr, $operation:expr, $msg:expr) => {
        tracing::warn!(
            service = $service,
            operation = $operation,
            "Service operation degraded: {}", $msg
        );
    };
}

// ============================================================================
// Question Bank Storage Logging Macros
// ============================================================================

/// Log question bank file operations
#[macro_export]
macro_rules! log_store_operation {
    (debug, $operation:expr, path = $path:expr, count = $count:expr) => {
        tracing::debug!(
            event_type = "store",
            operation = $operation,
            path = %$path,
            count = $count,
            "Question bank operation"
        );
    };
    (info, $operation:expr, path = $path:expr, $msg:expr) => {
        tracing::info!(
            event_type = "store",
            operation = $operation,
            path = %$path,
            "Question bank operation: {}", $msg
        );
    };
}

// ============================================================================
// System Event Logging Macros
// ============================================================================

/// Log system startup and shutdown events
#[macro_export]
macro_rules! log_system_event {
    (startup, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "startup",
            component = $component,
            "System event: {}",
            $msg
        );
    };
    (config, $msg:expr) => {
        tracing::info!(event_type = "configuration", "System event: {}", $msg);
    };
}

// ============================================================================
// Performance Logging Macros
// ============================================================================

/// Log performance metrics with consistent structure
#[macro_export]
macro_rules! log_performance {
    ($operation:expr, duration_ms = $duration:expr, count = $count:expr) => {
        tracing::debug!(
            event_type = "performance",
            operation = $operation,
            duration_ms = $duration,
            count = $count,
            "Performance metrics"
        );
    };
}

// ============================================================================
// Validation Logging Macros
// ============================================================================

/// Log validation results consistently
#[macro_export]
macro_rules! log_validation {
    (success, $component:expr, $msg:expr) => {
        tracing::debug!(
            event_type = "validation",
            component = $component,
            result = "success",
            "Validation completed: {}", $msg
        );
    };
    (failure, $component:expr, error = $error:expr) => {
        tracing::warn!(
            event_type = "validation",
            component = $component,
            result = "failure",
            error = %$error,
            "Validation failed"
        );
    };
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    #[test]
    fn test_logging_macros_compile() {
        let session_id = Uuid::new_v4();
        let error = anyhow::anyhow!("test error");

        log_api_start!("peek_question", question_id = "q_1");
        log_api_start!("set_preferences", session_id = session_id);
        log_api_start!("answer_question", attempt = "abc123");
        log_api_start!("answer_question", cursor = 3);
        log_api_start!("list_questions");

        log_api_success!("get_question", question_id = "q_1", "question retrieved");
        log_api_success!("set_preferences", session_id = session_id, "stored");
        log_api_success!("list_questions", count = 5, "questions listed");
        log_api_success!("health", "ok");

        log_api_error!("answer_question", attempt = "abc123", error = error, "failed");
        log_api_error!("answer_question", cursor = 3, error = error, "failed");
        log_api_error!("contribute", error = error, "failed");

        log_api_warn!("get_question", question_id = "q_404", "missing");
        log_api_warn!("clear_preferences", session_id = session_id, "nothing to clear");
        log_api_warn!("start_quiz", "empty pool");

        log_service_start!("quiz_service", "start", question_count = 25);
        log_service_start!("difficulty_filter", "fit");
        log_service_success!("difficulty_filter", "fit", question_count = 40, duration_ms = 12);
        log_service_success!("quiz_service", "start", "attempt started");
        log_service_warn!("difficulty_filter", "fit", error = error, "fail-open");
        log_service_warn!("difficulty_filter", "fit", "fail-open");

        log_store_operation!(debug, "load", path = "library.json", count = 3);
        log_store_operation!(info, "append", path = "library.json", "question appended");

        log_system_event!(startup, component = "server", "server starting");
        log_system_event!(config, "configuration loaded successfully");

        log_performance!("fit_scorer", duration_ms = 250, count = 40);

        log_validation!(success, "configuration", "validated");
        log_validation!(failure, "preferences", error = "negative weight");
    }
}
