//! In-process collaborators with canned replies.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use tutor_core::challenges::LengthMode;
use tutor_core::conversation::ChatMessage;
use tutor_core::error::TutorError;
use tutor_core::grading::Difficulty;
use tutor_core::intent::IntentDecision;
use tutor_core::summary::ProfileSummary;

use super::{
    ExplainRequest, GeneratedMcq, GeneratedQna, IntentClassifier, McqEvaluation, QnaEvaluation,
    QnaGrading, Tutoring,
};

/// Each queue is consumed front to back; an empty queue is a collaborator
/// outage.
#[derive(Default)]
pub struct Scripted {
    intents: Mutex<VecDeque<IntentDecision>>,
    explanations: Mutex<VecDeque<String>>,
    mcqs: Mutex<VecDeque<GeneratedMcq>>,
    qnas: Mutex<VecDeque<GeneratedQna>>,
    qna_marks: Mutex<VecDeque<f64>>,
    mcq_feedback: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<String>>,
}

fn outage(what: &str) -> TutorError {
    TutorError::external("scripted", format!("no scripted {what}"))
}

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().expect("scripted lock").pop_front()
}

impl Scripted {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intent(self, intent: &str, focus_area: Option<&str>) -> Self {
        let decision = IntentDecision {
            intent: intent.to_string(),
            strategy: "explain".to_string(),
            depth: "intermediate".to_string(),
            focus_area: focus_area.map(str::to_string),
            confidence_level: 0.9,
            confusion_detected: false,
            detected_concepts: Vec::new(),
        };
        self.intents.lock().expect("scripted lock").push_back(decision);
        self
    }

    pub fn explanation(self, text: &str) -> Self {
        self.explanations
            .lock()
            .expect("scripted lock")
            .push_back(text.to_string());
        self
    }

    /// A four-option question whose key is `correct`.
    pub fn mcq(self, question: &str, correct: &str) -> Self {
        let options: BTreeMap<String, String> = ["A", "B", "C", "D"]
            .iter()
            .map(|l| (l.to_string(), format!("Option {l}")))
            .collect();
        self.mcqs.lock().expect("scripted lock").push_back(GeneratedMcq {
            question: question.to_string(),
            options,
            correct_answer: correct.to_string(),
            explanation: format!("The answer is {correct}."),
        });
        self
    }

    pub fn qna(self, question: &str) -> Self {
        self.qnas.lock().expect("scripted lock").push_back(GeneratedQna {
            question: question.to_string(),
            expected_points: vec!["key idea".to_string()],
            length: None,
        });
        self
    }

    pub fn qna_marks(self, total: f64) -> Self {
        self.qna_marks.lock().expect("scripted lock").push_back(total);
        self
    }

    pub fn mcq_feedback(self, text: &str) -> Self {
        self.mcq_feedback
            .lock()
            .expect("scripted lock")
            .push_back(text.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("scripted lock").clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().expect("scripted lock").push(call.to_string());
    }
}

impl IntentClassifier for Scripted {
    async fn classify(
        &self,
        _input: &str,
        _history: &[ChatMessage],
        _summary: &ProfileSummary,
    ) -> Result<IntentDecision, TutorError> {
        self.record("classify");
        pop(&self.intents).ok_or_else(|| outage("intent"))
    }
}

impl Tutoring for Scripted {
    async fn explain(&self, _request: &ExplainRequest<'_>) -> Result<String, TutorError> {
        self.record("explain");
        pop(&self.explanations).ok_or_else(|| outage("explanation"))
    }

    async fn chat(&self, _input: &str, _history: &[ChatMessage]) -> Result<String, TutorError> {
        self.record("chat");
        Err(outage("chat"))
    }

    async fn generate_mcq(
        &self,
        _topic: &str,
        _difficulty: Difficulty,
    ) -> Result<GeneratedMcq, TutorError> {
        self.record("generate_mcq");
        pop(&self.mcqs).ok_or_else(|| outage("mcq"))?.validated()
    }

    async fn generate_qna(
        &self,
        _topic: &str,
        _difficulty: Difficulty,
        _length: LengthMode,
    ) -> Result<GeneratedQna, TutorError> {
        self.record("generate_qna");
        pop(&self.qnas).ok_or_else(|| outage("qna"))
    }

    async fn evaluate_mcq(
        &self,
        _question: &str,
        correct_answer: &str,
        _user_answer: &str,
    ) -> Result<McqEvaluation, TutorError> {
        self.record("evaluate_mcq");
        let feedback = pop(&self.mcq_feedback).ok_or_else(|| outage("mcq feedback"))?;
        Ok(McqEvaluation {
            is_correct: false,
            marks: 0.0,
            feedback,
            correct_explanation: format!("{correct_answer} is correct."),
        })
    }

    async fn evaluate_qna(&self, _grading: &QnaGrading<'_>) -> Result<QnaEvaluation, TutorError> {
        self.record("evaluate_qna");
        let total = pop(&self.qna_marks).ok_or_else(|| TutorError::EvaluationFailure {
            message: "no scripted marks".to_string(),
        })?;
        Ok(QnaEvaluation {
            concept_score: 0.0,
            completeness_score: 0.0,
            clarity_score: 0.0,
            total_marks: total,
            feedback: format!("Scored {total}."),
            correct_explanation: "The full answer.".to_string(),
        })
    }
}
