use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tutor_core::challenges::LengthMode;
use tutor_core::conversation::{ChatMessage, MessageRole};
use tutor_core::error::TutorError;
use tutor_core::grading::Difficulty;
use tutor_core::intent::IntentDecision;
use tutor_core::summary::ProfileSummary;

use crate::store::RetryPolicy;

use super::{
    ExplainRequest, GeneratedMcq, GeneratedQna, IntentClassifier, McqEvaluation, QnaEvaluation,
    QnaGrading, Tutoring,
};

const SERVICE: &str = "ollama";

const JSON_ONLY: &str = "Respond with a single JSON object and nothing else.";

/// Talks to an Ollama server's `/api/generate` endpoint.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaClient {
    pub fn new(
        base_url: &str,
        model: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, TutorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TutorError::external(SERVICE, e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            retry,
        })
    }

    async fn generate(&self, prompt: &str, json: bool) -> Result<String, TutorError> {
        with_backoff(self.retry, "generate", move || async move {
            self.generate_once(prompt, json).await
        })
        .await
    }

    /// A reply that is not the expected JSON is retried like a failed call.
    async fn generate_json<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, TutorError> {
        with_backoff(self.retry, "generate_json", move || async move {
            let raw = self.generate_once(prompt, true).await?;
            parse_json_reply(&raw)
        })
        .await
    }

    async fn generate_once(&self, prompt: &str, json: bool) -> Result<String, TutorError> {
        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
                format: json.then_some("json"),
            })
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "LLM request failed");
                TutorError::external(SERVICE, e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(status = %status, model = %self.model, "LLM returned an error status");
            return Err(TutorError::external(SERVICE, format!("HTTP {status}")));
        }

        let body = response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| TutorError::external(SERVICE, format!("malformed reply: {e}")))?;
        let text = body.response.trim().to_string();
        if text.is_empty() {
            return Err(TutorError::external(SERVICE, "empty reply"));
        }
        Ok(text)
    }

}

/// Run `call` up to `policy.attempts` times, doubling the delay after each
/// retryable failure. Non-retryable errors return at once.
pub(crate) async fn with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, TutorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TutorError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match call().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "LLM call recovered");
                }
                return Ok(value);
            }
            Err(err) => err,
        };
        if attempt >= attempts || !err.is_retryable() {
            return Err(err);
        }
        let delay = policy.backoff(attempt);
        tracing::warn!(
            operation,
            attempt,
            max_attempts = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "LLM call failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Parse the JSON object embedded in a model reply, tolerating code fences
/// or prose around it.
pub(crate) fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> Result<T, TutorError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let candidate = match (start, end) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw,
    };
    serde_json::from_str(candidate)
        .map_err(|e| TutorError::external(SERVICE, format!("reply is not the expected JSON: {e}")))
}

fn render_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| {
            let who = match m.role {
                MessageRole::User => "Learner",
                MessageRole::Assistant => "Tutor",
            };
            format!("{who}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn classify_prompt(input: &str, history: &[ChatMessage], summary: &ProfileSummary) -> String {
    format!(
        "You route messages for a study tutor.\n\
         Learner level: {level} (mastery {mastery}).\n\
         Strong topics: {strong:?}. Weak topics: {weak:?}.\n\
         Recent conversation:\n{history}\n\n\
         Learner message: {input}\n\n\
         Pick one intent: add_topic (learner wants a topic added to their session), \
         explain_topic (learner asks to understand something), start_assessment \
         (learner asks to be quizzed), answer_question (learner is answering a pending \
         question or confirmation), general_chat (anything else).\n\
         {JSON_ONLY} Keys: intent, strategy, depth (beginner|intermediate|advanced), \
         focus_area (topic name or \"general\"), confidence_level (0-1), \
         confusion_detected (bool), detected_concepts (list of strings).",
        level = summary.knowledge_level,
        mastery = summary.mastery_display,
        strong = summary.strong_names(),
        weak = summary.weak_names(),
        history = render_history(history),
    )
}

fn explain_prompt(request: &ExplainRequest<'_>) -> String {
    format!(
        "You are a patient tutor. Strategy: {strategy}. Depth: {depth}.\n\
         Learner level: {level}. Topics they know well: {strong:?}. Topics they struggle with: {weak:?}.\n\
         Topic: {topic}\n\
         Recent conversation:\n{history}\n\n\
         Learner message: {input}\n\n\
         Explain clearly, build on what they already know, and end by offering a quick quiz.",
        strategy = request.strategy,
        depth = request.depth,
        level = request.summary.knowledge_level,
        strong = request.summary.strong_names(),
        weak = request.summary.weak_names(),
        topic = request.topic.unwrap_or("(not specified)"),
        history = render_history(request.history),
        input = request.input,
    )
}

fn mcq_prompt(topic: &str, difficulty: Difficulty) -> String {
    format!(
        "Write one multiple-choice question about {topic} at {level} difficulty.\n\
         Exactly four options labelled A, B, C and D, exactly one correct.\n\
         {JSON_ONLY} Keys: question, options (object keyed by letter), \
         correct_answer (the letter), explanation.",
        level = difficulty.as_str(),
    )
}

fn qna_prompt(topic: &str, difficulty: Difficulty, length: LengthMode) -> String {
    format!(
        "Write one open question about {topic} at {level} difficulty that needs a \
         {length} answer (short: a definition in 2-4 sentences; medium: concept and \
         explanation; long: concept, explanation, example and limitations).\n\
         {JSON_ONLY} Keys: question, expected_points (list of strings), length.",
        level = difficulty.as_str(),
        length = length.as_str(),
    )
}

fn mcq_feedback_prompt(question: &str, correct_answer: &str, user_answer: &str) -> String {
    format!(
        "Question: {question}\nCorrect answer: {correct_answer}\nLearner answer: {user_answer}\n\
         Grading is exact match on the option letter. If correct, confirm why in 1-2 \
         sentences. If incorrect, explain the right answer and what was wrong with the \
         learner's choice in 3-5 sentences.\n\
         {JSON_ONLY} Keys: is_correct, marks (0 or 1), feedback, correct_explanation."
    )
}

fn qna_grading_prompt(grading: &QnaGrading<'_>) -> String {
    format!(
        "Grade the learner's answer.\nTopic: {topic}\nQuestion: {question}\n\
         Expected mode: {length}\nExpected points: {points:?}\nLearner answer: {answer}\n\n\
         Rubric: correctness 0-5, completeness 0-3 for the expected mode, clarity 0-2. \
         Empty or meaningless answers score 0 everywhere. Always explain the complete \
         correct answer.\n\
         {JSON_ONLY} Keys: concept_score, completeness_score, clarity_score, total_marks, \
         feedback, correct_explanation.",
        topic = grading.topic,
        question = grading.question,
        length = grading.length.as_str(),
        points = grading.expected_points,
        answer = grading.answer,
    )
}

impl IntentClassifier for OllamaClient {
    async fn classify(
        &self,
        input: &str,
        history: &[ChatMessage],
        summary: &ProfileSummary,
    ) -> Result<IntentDecision, TutorError> {
        self.generate_json(&classify_prompt(input, history, summary))
            .await
    }
}

impl Tutoring for OllamaClient {
    async fn explain(&self, request: &ExplainRequest<'_>) -> Result<String, TutorError> {
        self.generate(&explain_prompt(request), false).await
    }

    async fn chat(&self, input: &str, history: &[ChatMessage]) -> Result<String, TutorError> {
        let prompt = format!(
            "You are a friendly study tutor.\nRecent conversation:\n{}\n\nLearner: {input}\nTutor:",
            render_history(history)
        );
        self.generate(&prompt, false).await
    }

    async fn generate_mcq(
        &self,
        topic: &str,
        difficulty: Difficulty,
    ) -> Result<GeneratedMcq, TutorError> {
        let mcq: GeneratedMcq = self.generate_json(&mcq_prompt(topic, difficulty)).await?;
        mcq.validated()
    }

    async fn generate_qna(
        &self,
        topic: &str,
        difficulty: Difficulty,
        length: LengthMode,
    ) -> Result<GeneratedQna, TutorError> {
        let qna: GeneratedQna = self
            .generate_json(&qna_prompt(topic, difficulty, length))
            .await?;
        if qna.question.trim().is_empty() {
            return Err(TutorError::external(SERVICE, "question is empty"));
        }
        Ok(qna)
    }

    async fn evaluate_mcq(
        &self,
        question: &str,
        correct_answer: &str,
        user_answer: &str,
    ) -> Result<McqEvaluation, TutorError> {
        self.generate_json(&mcq_feedback_prompt(question, correct_answer, user_answer))
            .await
    }

    async fn evaluate_qna(&self, grading: &QnaGrading<'_>) -> Result<QnaEvaluation, TutorError> {
        self.generate_json::<QnaEvaluation>(&qna_grading_prompt(grading))
            .await
            .map(QnaEvaluation::reconciled)
            .map_err(|e| TutorError::EvaluationFailure {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn json_reply_is_extracted_from_surrounding_text() {
        let raw = "Sure! ```json\n{\"intent\": \"add_topic\", \"focus_area\": \"Recursion\"}\n```";
        let decision: IntentDecision = parse_json_reply(raw).expect("parse");
        assert_eq!(decision.intent, "add_topic");
        assert_eq!(decision.focus_area.as_deref(), Some("Recursion"));
        assert_eq!(decision.depth, "intermediate");
    }

    #[test]
    fn non_json_reply_is_an_external_failure() {
        let err = parse_json_reply::<IntentDecision>("I cannot help with that").unwrap_err();
        assert!(matches!(err, TutorError::ExternalService { ref service, .. } if service == "ollama"));
    }

    fn quick_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn unreachable_server_maps_to_external_service() {
        let client = OllamaClient::new(
            "http://127.0.0.1:9/",
            "llama3",
            Duration::from_millis(500),
            quick_retry(2),
        )
        .expect("client");
        let err = client.chat("hello", &[]).await.unwrap_err();
        assert!(matches!(err, TutorError::ExternalService { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn retryable_failures_are_attempted_until_the_budget_runs_out() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), TutorError> = with_backoff(quick_retry(3), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TutorError::external(SERVICE, "connection refused"))
        })
        .await;
        assert!(matches!(result, Err(TutorError::ExternalService { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn a_later_success_is_returned() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_backoff(quick_retry(3), "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TutorError::external(SERVICE, "timeout"))
            } else {
                Ok("reply")
            }
        })
        .await;
        assert_eq!(result.expect("second attempt succeeds"), "reply");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_are_not_repeated() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), TutorError> = with_backoff(quick_retry(3), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TutorError::validation("bad prompt", "prompt"))
        })
        .await;
        assert!(matches!(result, Err(TutorError::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prompts_carry_their_inputs() {
        let prompt = qna_prompt("Photosynthesis", Difficulty::Beginner, LengthMode::Short);
        assert!(prompt.contains("Photosynthesis"));
        assert!(prompt.contains("beginner"));
        assert!(prompt.contains("short answer"));
    }
}
