use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tutor_core::error::{self, ApiError, TutorError};

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Malformed request body or parameters (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Any domain failure raised by the tutor
    Tutor(TutorError),
}

impl From<TutorError> for AppError {
    fn from(err: TutorError) -> Self {
        AppError::Tutor(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                    retryable: false,
                },
            ),
            AppError::Tutor(err) => tutor_error_body(err, request_id),
        };

        (status, Json(api_error)).into_response()
    }
}

fn tutor_error_body(err: TutorError, request_id: String) -> (StatusCode, ApiError) {
    let code = err.code().to_string();
    let retryable = err.is_retryable();
    let message = err.to_string();

    let (status, field, received, docs_hint) = match err {
        TutorError::Validation { field, .. } => (StatusCode::BAD_REQUEST, field, None, None),
        TutorError::MissingContext {
            required_fields, ..
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            required_fields.first().cloned(),
            Some(json!({ "required_fields": required_fields })),
            Some("Explain the topic or request a question before continuing.".to_string()),
        ),
        TutorError::StateCorruption { violations } => {
            tracing::warn!(request_id = %request_id, violations = ?violations, "request refused: profile state is corrupted");
            (
                StatusCode::CONFLICT,
                None,
                Some(json!({ "violations": violations })),
                Some(
                    "Send 'repair', 'new' or 'export' through POST /v1/chat, or reset the profile."
                        .to_string(),
                ),
            )
        }
        TutorError::StorageFailure {
            operation,
            attempts,
            ..
        } => {
            tracing::error!(request_id = %request_id, operation = %operation, attempts, "storage failure");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                None,
                Some(json!({ "operation": operation, "attempts": attempts })),
                Some("Storage is temporarily unavailable. Retry the request.".to_string()),
            )
        }
        TutorError::EvaluationFailure { .. } => (
            StatusCode::BAD_GATEWAY,
            None,
            None,
            Some("The grading service did not respond. Retry the request.".to_string()),
        ),
        TutorError::ExternalService { service, .. } => {
            tracing::warn!(request_id = %request_id, service = %service, "upstream failure");
            (
                StatusCode::BAD_GATEWAY,
                None,
                Some(json!({ "service": service })),
                Some("The AI service is unavailable. Retry in a moment.".to_string()),
            )
        }
    };

    (
        status,
        ApiError {
            error: code,
            message,
            field,
            received,
            request_id,
            docs_hint,
            retryable,
        },
    )
}
