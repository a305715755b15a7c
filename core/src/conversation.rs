//! Per-user conversation log, stored separately from the profile document.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::TutorError;

/// Number of trailing messages the turn loop reads by default.
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            timestamp: Some(timestamp),
        }
    }

    pub fn assistant(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp: Some(timestamp),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConversationLog {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl ConversationLog {
    /// Decode a stored log. Accepts the current `{messages: [...]}` shape and
    /// the older bare array of `{type: human|ai, data: {content, additional_kwargs}}`.
    pub fn from_document(document: Value) -> Result<Self, TutorError> {
        match document {
            Value::Array(items) => Ok(Self {
                messages: items.iter().filter_map(legacy_message).collect(),
            }),
            other => serde_json::from_value(other).map_err(|err| TutorError::StateCorruption {
                violations: vec![format!("Conversation log could not be decoded: {err}")],
            }),
        }
    }

    pub fn to_document(&self) -> Result<Value, TutorError> {
        serde_json::to_value(self).map_err(|err| TutorError::StorageFailure {
            operation: "encode_history".to_string(),
            attempts: 0,
            message: err.to_string(),
        })
    }

    /// The last `window` messages, oldest first.
    pub fn recent(&self, window: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(window);
        &self.messages[start..]
    }

    /// Append the learner message and the reply with the same timestamp.
    pub fn push_exchange(&mut self, user: &str, assistant: &str, at: DateTime<Utc>) {
        self.messages.push(ChatMessage::user(user, at));
        self.messages.push(ChatMessage::assistant(assistant, at));
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn legacy_message(item: &Value) -> Option<ChatMessage> {
    let role = match item.get("type").and_then(Value::as_str)? {
        "human" => MessageRole::User,
        "ai" => MessageRole::Assistant,
        _ => return None,
    };
    let data = item.get("data")?;
    let content = data.get("content").and_then(Value::as_str)?.to_string();
    let timestamp = data
        .pointer("/additional_kwargs/timestamp")
        .and_then(Value::as_f64)
        .and_then(|secs| Utc.timestamp_millis_opt((secs * 1000.0).round() as i64).single());
    Some(ChatMessage {
        role,
        content,
        timestamp,
    })
}
