//! Request extractors that turn axum rejections into `ApiError` bodies.
//!
//! Handlers take `AppJson<T>` instead of `axum::Json<T>` so a malformed chat
//! or assessment body yields a 400 with the offending field, not axum's
//! plain-text 422.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use crate::error::AppError;

/// JSON body extractor whose rejection is [`AppError::Validation`].
///
/// ```ignore
/// async fn chat(AppJson(req): AppJson<ChatRequest>) -> Result<Json<TurnReply>, AppError> { .. }
/// ```
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

/// Enum-valued request fields, recognised by the variants serde lists as
/// expected. serde names the bad value but not the field.
const VARIANT_FIELDS: &[(&str, &str)] = &[("`mcq`", "kind"), ("`medium`", "length")];

/// Convert a `JsonRejection` to a structured `AppError::Validation`.
pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    let hint = field_hint(&body_text);

    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(hint.field.unwrap_or_else(|| "body".to_string())),
        received: hint.received.map(serde_json::Value::String),
        docs_hint: Some(
            "Check the request body against the endpoint's schema (GET /api-doc/openapi.json)."
                .to_string(),
        ),
    }
}

#[derive(Debug, Default, PartialEq)]
struct FieldHint {
    field: Option<String>,
    received: Option<String>,
}

fn field_hint(msg: &str) -> FieldHint {
    if let Some(field) =
        quoted_after(msg, "missing field `").or_else(|| quoted_after(msg, "unknown field `"))
    {
        return FieldHint {
            field: Some(field),
            received: None,
        };
    }
    if let Some(value) = quoted_after(msg, "unknown variant `") {
        let field = VARIANT_FIELDS
            .iter()
            .find(|(variant, _)| msg.contains(variant))
            .map(|(_, field)| field.to_string());
        return FieldHint {
            field,
            received: Some(value),
        };
    }
    FieldHint::default()
}

/// The backtick-quoted text right after `marker`.
fn quoted_after(msg: &str, marker: &str) -> Option<String> {
    let start = msg.find(marker)? + marker.len();
    let after = &msg[start..];
    let end = after.find('`')?;
    Some(after[..end].to_string())
}
