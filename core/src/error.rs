use serde::Serialize;
use utoipa::ToSchema;

/// Structured error response returned by every endpoint.
/// Carries enough detail for a client to tell whether to retry, fix its
/// input, or walk the learner through a recovery action.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "state_corrupted")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Structured context: violations, missing fields, attempt counts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what to do next
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
    /// Whether repeating the same request may succeed
    pub retryable: bool,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const STATE_CORRUPTED: &str = "state_corrupted";
    pub const MISSING_CONTEXT: &str = "missing_context";
    pub const STORAGE_FAILURE: &str = "storage_failure";
    pub const UPSTREAM_FAILURE: &str = "upstream_failure";
}

/// Domain error taxonomy shared by every tutor component.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TutorError {
    /// Malformed request-level input. Never retried.
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },
    /// The profile document fails its invariants. Read-only until repaired or reset.
    #[error("profile state is corrupted: {}", violations.join("; "))]
    StateCorruption { violations: Vec<String> },
    /// An operation's precondition is absent.
    #[error("{message}")]
    MissingContext {
        message: String,
        required_fields: Vec<String>,
    },
    /// Persistence exhausted its retries.
    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    StorageFailure {
        operation: String,
        attempts: u32,
        message: String,
    },
    /// The grading collaborator could not produce a score.
    #[error("evaluation failed: {message}")]
    EvaluationFailure { message: String },
    /// Any other opaque collaborator failed.
    #[error("{service} unavailable: {message}")]
    ExternalService { service: String, message: String },
}

impl TutorError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn missing_context(message: impl Into<String>, required_fields: &[&str]) -> Self {
        Self::MissingContext {
            message: message.into(),
            required_fields: required_fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn external(service: &str, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => codes::VALIDATION_FAILED,
            Self::StateCorruption { .. } => codes::STATE_CORRUPTED,
            Self::MissingContext { .. } => codes::MISSING_CONTEXT,
            Self::StorageFailure { .. } => codes::STORAGE_FAILURE,
            Self::EvaluationFailure { .. } | Self::ExternalService { .. } => {
                codes::UPSTREAM_FAILURE
            }
        }
    }

    /// Storage and collaborator failures may succeed on a later attempt;
    /// bad input and corrupted state will not.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageFailure { .. }
                | Self::EvaluationFailure { .. }
                | Self::ExternalService { .. }
        )
    }
}
