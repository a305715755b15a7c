use clap::ValueEnum;
use serde_json::json;

use crate::util::api_request;

#[derive(Clone, Copy, ValueEnum)]
pub enum QuestionKind {
    Mcq,
    Qna,
}

impl QuestionKind {
    fn as_str(self) -> &'static str {
        match self {
            QuestionKind::Mcq => "mcq",
            QuestionKind::Qna => "qna",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AnswerLength {
    Short,
    Medium,
    Long,
}

impl AnswerLength {
    fn as_str(self) -> &'static str {
        match self {
            AnswerLength::Short => "short",
            AnswerLength::Medium => "medium",
            AnswerLength::Long => "long",
        }
    }
}

pub async fn question(
    api_url: &str,
    user_id: &str,
    topic: &str,
    kind: QuestionKind,
    length: Option<AnswerLength>,
    raw: bool,
) -> i32 {
    let mut body = json!({
        "topic": topic,
        "kind": kind.as_str(),
    });
    if let Some(l) = length {
        body["length"] = json!(l.as_str());
    }
    api_request(
        api_url,
        reqwest::Method::POST,
        &["v1", "users", user_id, "assessment", "question"],
        Some(body),
        raw,
    )
    .await
}

pub async fn answer(
    api_url: &str,
    user_id: &str,
    topic: &str,
    kind: QuestionKind,
    answer: &str,
    raw: bool,
) -> i32 {
    let body = json!({
        "topic": topic,
        "kind": kind.as_str(),
        "answer": answer,
    });
    api_request(
        api_url,
        reqwest::Method::POST,
        &["v1", "users", user_id, "assessment", "answer"],
        Some(body),
        raw,
    )
    .await
}
