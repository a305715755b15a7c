//! Opaque collaborators: intent classification, content generation and
//! answer evaluation. The tutor only sees these traits.

use std::collections::BTreeMap;
use std::future::Future;

use serde::Deserialize;
use tutor_core::challenges::LengthMode;
use tutor_core::conversation::ChatMessage;
use tutor_core::error::TutorError;
use tutor_core::grading::Difficulty;
use tutor_core::intent::IntentDecision;
use tutor_core::summary::ProfileSummary;

mod ollama;
#[cfg(test)]
pub mod scripted;

pub use ollama::OllamaClient;

/// Everything an explanation prompt is built from.
pub struct ExplainRequest<'a> {
    pub input: &'a str,
    pub topic: Option<&'a str>,
    pub strategy: &'a str,
    pub depth: &'a str,
    pub summary: &'a ProfileSummary,
    pub history: &'a [ChatMessage],
}

/// Inputs for grading one open-ended answer.
pub struct QnaGrading<'a> {
    pub topic: &'a str,
    pub question: &'a str,
    pub expected_points: &'a [String],
    pub length: LengthMode,
    pub answer: &'a str,
}

pub trait IntentClassifier: Send + Sync + 'static {
    fn classify(
        &self,
        input: &str,
        history: &[ChatMessage],
        summary: &ProfileSummary,
    ) -> impl Future<Output = Result<IntentDecision, TutorError>> + Send;
}

pub trait Tutoring: Send + Sync + 'static {
    fn explain(
        &self,
        request: &ExplainRequest<'_>,
    ) -> impl Future<Output = Result<String, TutorError>> + Send;

    fn chat(
        &self,
        input: &str,
        history: &[ChatMessage],
    ) -> impl Future<Output = Result<String, TutorError>> + Send;

    fn generate_mcq(
        &self,
        topic: &str,
        difficulty: Difficulty,
    ) -> impl Future<Output = Result<GeneratedMcq, TutorError>> + Send;

    fn generate_qna(
        &self,
        topic: &str,
        difficulty: Difficulty,
        length: LengthMode,
    ) -> impl Future<Output = Result<GeneratedQna, TutorError>> + Send;

    /// Feedback for a choice the tutor has already graded.
    fn evaluate_mcq(
        &self,
        question: &str,
        correct_answer: &str,
        user_answer: &str,
    ) -> impl Future<Output = Result<McqEvaluation, TutorError>> + Send;

    /// Rubric score for an open answer. Failures are `EvaluationFailure`.
    fn evaluate_qna(
        &self,
        grading: &QnaGrading<'_>,
    ) -> impl Future<Output = Result<QnaEvaluation, TutorError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedMcq {
    pub question: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
}

impl GeneratedMcq {
    /// A usable question has text, at least four options and an answer key
    /// naming one of them. The key is normalized to its option letter.
    pub fn validated(mut self) -> Result<Self, TutorError> {
        if self.question.trim().is_empty() {
            return Err(TutorError::external("question_generator", "question is empty"));
        }
        if self.options.len() < 4 {
            return Err(TutorError::external(
                "question_generator",
                format!("expected at least 4 options, got {}", self.options.len()),
            ));
        }
        let key = self.correct_answer.trim();
        let Some(letter) = self
            .options
            .keys()
            .find(|letter| letter.eq_ignore_ascii_case(key))
            .cloned()
        else {
            return Err(TutorError::external(
                "question_generator",
                format!("answer key '{key}' is not among the options"),
            ));
        };
        self.correct_answer = letter;
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeneratedQna {
    pub question: String,
    #[serde(default)]
    pub expected_points: Vec<String>,
    #[serde(default)]
    pub length: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McqEvaluation {
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub marks: f64,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub correct_explanation: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QnaEvaluation {
    #[serde(default)]
    pub concept_score: f64,
    #[serde(default)]
    pub completeness_score: f64,
    #[serde(default)]
    pub clarity_score: f64,
    #[serde(default)]
    pub total_marks: f64,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub correct_explanation: String,
}

impl QnaEvaluation {
    /// The zero score given to answers with no gradable content.
    pub fn zero(feedback: impl Into<String>) -> Self {
        Self {
            concept_score: 0.0,
            completeness_score: 0.0,
            clarity_score: 0.0,
            total_marks: 0.0,
            feedback: feedback.into(),
            correct_explanation: String::new(),
        }
    }

    /// Models sometimes return a total that disagrees with the parts; the
    /// parts win when they are present.
    pub fn reconciled(mut self) -> Self {
        let parts = self.concept_score + self.completeness_score + self.clarity_score;
        if parts > 0.0 {
            self.total_marks = parts;
        }
        self.total_marks = self.total_marks.clamp(0.0, 10.0);
        self
    }
}
