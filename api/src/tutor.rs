//! The tutor service: every read-modify-write of a learner's documents goes
//! through here, under that learner's lock.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tutor_core::challenges::{self, Challenge, ChallengeKey, ChallengeKind, LengthMode};
use tutor_core::conversation::{ChatMessage, ConversationLog};
use tutor_core::error::TutorError;
use tutor_core::grading::{Difficulty, is_gibberish_answer};
use tutor_core::mastery::{RawOutcome, ThresholdPolicy, choice_matches, record_result};
use tutor_core::profile::{AnswerOutcome, ScoreKind, Topic, UserProfile};
use tutor_core::recovery::{self, RecoveryAction, RepairOutcome};
use tutor_core::summary::{ProfileSummary, TopicListing};
use tutor_core::topics::{self, TopicInsert, TopicUpdate};
use tutor_core::validation::validate;
use utoipa::ToSchema;

use crate::collaborators::{IntentClassifier, QnaEvaluation, QnaGrading, Tutoring};
use crate::locks::UserLocks;
use crate::store::{DocumentBackend, ProfileStore};

const USER_ID_MAX_LEN: usize = 128;

pub(crate) const GIBBERISH_FEEDBACK: &str = "That answer doesn't contain enough meaningful \
     content to grade, so it scores 0. Try explaining the idea in your own words.";

pub(crate) const HISTORY_CLEARED_REPLY: &str =
    "New session started. Your topics and progress are kept.";

pub(crate) const GRADING_UNAVAILABLE_FEEDBACK: &str = "I couldn't grade that answer right now. \
     Your question is still open, so try submitting it again in a moment.";

/// A question as shown to the learner. The answer key stays on the server.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct QuestionView {
    pub topic: String,
    pub kind: ScoreKind,
    pub question: String,
    /// Option letter → text. Empty for open questions.
    pub options: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<LengthMode>,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RubricScores {
    /// 0-5
    pub correctness: f64,
    /// 0-3
    pub completeness: f64,
    /// 0-2
    pub clarity: f64,
}

/// Result of one submitted answer.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AnswerFeedback {
    pub topic: String,
    pub kind: ScoreKind,
    /// False when grading could not happen and nothing was recorded.
    pub scored: bool,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AnswerOutcome>,
    /// 1 or 0 for choices, the rubric total out of 10 for open answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marks: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rubric: Option<RubricScores>,
    pub feedback: String,
    pub correct_explanation: String,
    /// "B) Chlorophyll" for choice questions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    /// Topic counters after the attempt was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_state: Option<Topic>,
}

/// What a recovery action did.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryResult {
    pub action: RecoveryAction,
    pub reply: String,
    pub fixes: Vec<String>,
}

pub struct Tutor<B, C> {
    pub(crate) store: ProfileStore<B>,
    pub(crate) collaborators: C,
    pub(crate) locks: UserLocks,
    pub(crate) policy: ThresholdPolicy,
    pub(crate) history_window: usize,
}

impl<B, C> Tutor<B, C>
where
    B: DocumentBackend,
    C: IntentClassifier + Tutoring,
{
    pub fn new(store: ProfileStore<B>, collaborators: C, history_window: usize) -> Self {
        Self {
            store,
            collaborators,
            locks: UserLocks::new(),
            policy: ThresholdPolicy::default(),
            history_window: history_window.max(1),
        }
    }

    pub async fn storage_ready(&self) -> bool {
        self.store.ping().await
    }

    pub async fn summary(&self, user_id: &str) -> Result<ProfileSummary, TutorError> {
        let user_id = check_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;
        let (profile, _) = self.load_valid(user_id).await?;
        Ok(ProfileSummary::from_profile(&profile))
    }

    pub async fn topics(&self, user_id: &str) -> Result<TopicListing, TutorError> {
        let user_id = check_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;
        let (profile, _) = self.load_valid(user_id).await?;
        Ok(TopicListing::from_profile(&profile))
    }

    pub async fn add_topic(
        &self,
        user_id: &str,
        name: &str,
        parent_topic_id: Option<String>,
        explanation_summary: Option<String>,
    ) -> Result<TopicInsert, TutorError> {
        let user_id = check_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;
        let (mut profile, _) = self.load_valid(user_id).await?;

        let inserted = topics::add_topic(
            &mut profile,
            name.trim(),
            parent_topic_id,
            explanation_summary,
        )?;
        if inserted.created {
            self.store.save(user_id, &mut profile).await?;
            tracing::info!(user_id, topic = %inserted.key, "topic added");
        }
        Ok(inserted)
    }

    pub async fn update_topic(
        &self,
        user_id: &str,
        name: &str,
        update: TopicUpdate,
    ) -> Result<Topic, TutorError> {
        let user_id = check_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;
        let (mut profile, _) = self.load_valid(user_id).await?;

        let topic = topics::update_topic(&mut profile, name.trim(), update)?;
        self.store.save(user_id, &mut profile).await?;
        tracing::info!(user_id, topic = %topic.name, "topic updated");
        Ok(topic)
    }

    /// Open a question on a topic that has been explained. Replaces any
    /// question of the same kind already pending on that topic.
    pub async fn request_question(
        &self,
        user_id: &str,
        topic: &str,
        kind: ScoreKind,
        length: Option<LengthMode>,
    ) -> Result<QuestionView, TutorError> {
        let user_id = check_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;
        let (mut profile, _) = self.load_valid(user_id).await?;

        let Some(known) = topics::find_topic(&profile, topic.trim()) else {
            return Err(TutorError::missing_context(
                format!(
                    "Topic '{}' has not been explained yet. Only explained topics can be assessed.",
                    topic.trim()
                ),
                &["topic"],
            ));
        };
        let name = known.name.clone();

        let view = self
            .open_question(&mut profile, &name, kind, length.unwrap_or_default(), Utc::now())
            .await?;
        self.store.save(user_id, &mut profile).await?;
        Ok(view)
    }

    /// Grade an answer against the pending question of `kind` on `topic`.
    pub async fn submit_answer(
        &self,
        user_id: &str,
        topic: &str,
        kind: ScoreKind,
        answer: &str,
    ) -> Result<AnswerFeedback, TutorError> {
        let user_id = check_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;
        let (mut profile, _) = self.load_valid(user_id).await?;

        let name = topics::find_topic(&profile, topic.trim())
            .map(|t| t.name.clone())
            .unwrap_or_else(|| topic.trim().to_string());
        let key = ChallengeKey::new(ChallengeKind::from_score_kind(kind), name);
        let Some(challenge) = challenges::peek(&profile, &key).cloned() else {
            return Err(TutorError::missing_context(
                format!(
                    "No pending {} question for '{}'. Request a question first.",
                    kind.as_str(),
                    key.topic
                ),
                &["challenge"],
            ));
        };

        let feedback = self
            .grade(user_id, &mut profile, &key, challenge, answer, Utc::now())
            .await?;
        if feedback.scored {
            self.store.save(user_id, &mut profile).await?;
        }
        Ok(feedback)
    }

    pub async fn history(&self, user_id: &str) -> Result<Vec<ChatMessage>, TutorError> {
        let user_id = check_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;
        Ok(self.store.load_history(user_id).await?.messages)
    }

    /// Start a new session: drop the conversation, keep topics and mastery.
    /// An undecodable log is replaced rather than reported.
    pub async fn clear_history(&self, user_id: &str) -> Result<String, TutorError> {
        let user_id = check_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;
        let mut log = match self.store.load_history(user_id).await {
            Ok(log) => log,
            Err(TutorError::StateCorruption { .. }) => ConversationLog::default(),
            Err(err) => return Err(err),
        };
        let dropped = log.messages.len();
        log.clear();
        self.store.save_history(user_id, &log).await?;
        tracing::info!(user_id, dropped, "conversation history cleared");
        Ok(HISTORY_CLEARED_REPLY.to_string())
    }

    /// The stored profile document as persisted. Works on documents that
    /// fail validation or do not decode.
    pub async fn export(&self, user_id: &str) -> Result<Value, TutorError> {
        let user_id = check_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;
        match self.store.load_raw(user_id).await? {
            Some(document) => Ok(document),
            None => UserProfile::default().to_document(),
        }
    }

    /// Replace the profile with a fresh one and clear the conversation.
    pub async fn reset(&self, user_id: &str) -> Result<RecoveryResult, TutorError> {
        let user_id = check_user_id(user_id)?;
        let _guard = self.locks.acquire(user_id).await;
        self.recover(user_id, RecoveryAction::Reset, None).await
    }

    /// Run one recovery action. `decoded` is the loaded profile when the
    /// stored document decoded at all. The caller holds the user's lock.
    pub(crate) async fn recover(
        &self,
        user_id: &str,
        action: RecoveryAction,
        decoded: Option<UserProfile>,
    ) -> Result<RecoveryResult, TutorError> {
        let result = match action {
            RecoveryAction::Repair => {
                let outcome = match decoded {
                    Some(mut profile) => {
                        let outcome = recovery::repair(&mut profile);
                        if matches!(outcome, RepairOutcome::Repaired(_)) {
                            self.store.save(user_id, &mut profile).await?;
                        }
                        outcome
                    }
                    None => RepairOutcome::NothingToRepair,
                };
                let fixes = match &outcome {
                    RepairOutcome::Repaired(fixes) => fixes.clone(),
                    RepairOutcome::NothingToRepair => Vec::new(),
                };
                RecoveryResult {
                    action,
                    reply: outcome.reply(),
                    fixes,
                }
            }
            RecoveryAction::Reset => {
                let mut fresh = UserProfile::default();
                self.store.save(user_id, &mut fresh).await?;
                self.store
                    .save_history(user_id, &ConversationLog::default())
                    .await?;
                RecoveryResult {
                    action,
                    reply: recovery::RESET_REPLY.to_string(),
                    fixes: Vec::new(),
                }
            }
            RecoveryAction::Export => {
                let pretty = match self.store.load_raw(user_id).await? {
                    Some(document) => recovery::export_raw(&document)?,
                    None => recovery::export(&UserProfile::default())?,
                };
                RecoveryResult {
                    action,
                    reply: recovery::export_reply(&pretty),
                    fixes: Vec::new(),
                }
            }
        };

        tracing::info!(
            target: "tutor::recovery",
            user_id,
            action = action.as_str(),
            fixes = ?result.fixes,
            "recovery action applied"
        );
        Ok(result)
    }

    /// Load the profile and history and refuse to go on if the profile
    /// fails validation.
    pub(crate) async fn load_valid(
        &self,
        user_id: &str,
    ) -> Result<(UserProfile, ConversationLog), TutorError> {
        let profile = self.store.load(user_id).await?;
        let log = self.store.load_history(user_id).await?;
        let report = validate(&profile, log.recent(self.history_window));
        if !report.is_valid() {
            tracing::warn!(
                user_id,
                violations = ?report.violations(),
                "profile failed validation"
            );
            return Err(TutorError::StateCorruption {
                violations: report.violations().to_vec(),
            });
        }
        Ok((profile, log))
    }

    /// Generate a question and park it in the challenge ledger.
    pub(crate) async fn open_question(
        &self,
        profile: &mut UserProfile,
        topic: &str,
        kind: ScoreKind,
        length: LengthMode,
        now: DateTime<Utc>,
    ) -> Result<QuestionView, TutorError> {
        let mastery = topics::find_topic(profile, topic)
            .map(|t| t.mastery_score)
            .unwrap_or(0.0);
        let difficulty = Difficulty::for_mastery(mastery);

        let (challenge, view) = match kind {
            ScoreKind::Mcq => {
                let mcq = self.collaborators.generate_mcq(topic, difficulty).await?;
                let view = QuestionView {
                    topic: topic.to_string(),
                    kind,
                    question: mcq.question.clone(),
                    options: mcq.options.clone(),
                    length: None,
                    difficulty,
                };
                let challenge = Challenge::McqPending {
                    question: mcq.question,
                    options: mcq.options,
                    correct_answer: mcq.correct_answer,
                    explanation: mcq.explanation,
                };
                (challenge, view)
            }
            ScoreKind::Qna => {
                let qna = self
                    .collaborators
                    .generate_qna(topic, difficulty, length)
                    .await?;
                let view = QuestionView {
                    topic: topic.to_string(),
                    kind,
                    question: qna.question.clone(),
                    options: BTreeMap::new(),
                    length: Some(length),
                    difficulty,
                };
                let challenge = Challenge::QnaPending {
                    question: qna.question,
                    length_mode: length,
                    expected_points: qna.expected_points,
                };
                (challenge, view)
            }
        };

        let key = ChallengeKey::new(ChallengeKind::from_score_kind(kind), topic);
        if challenges::open(profile, &key, challenge, now).is_some() {
            tracing::debug!(challenge = %key, "replaced pending challenge");
        }
        tracing::info!(
            topic,
            kind = kind.as_str(),
            difficulty = difficulty.as_str(),
            "question opened"
        );
        Ok(view)
    }

    /// Score an answer to a pending graded challenge and resolve it.
    ///
    /// Choices are graded locally; the evaluator only contributes feedback.
    /// Open answers are scored by the evaluator, and if it fails nothing is
    /// recorded and the challenge stays pending.
    pub(crate) async fn grade(
        &self,
        user_id: &str,
        profile: &mut UserProfile,
        key: &ChallengeKey,
        challenge: Challenge,
        answer: &str,
        now: DateTime<Utc>,
    ) -> Result<AnswerFeedback, TutorError> {
        match challenge {
            Challenge::McqPending {
                question,
                options,
                correct_answer,
                explanation,
            } => {
                let correct = choice_matches(answer, &correct_answer);
                let correct_text = options
                    .get(&correct_answer)
                    .map(|text| format!("{correct_answer}) {text}"))
                    .unwrap_or_else(|| correct_answer.clone());

                let (feedback, correct_explanation) = match self
                    .collaborators
                    .evaluate_mcq(&question, &correct_answer, answer)
                    .await
                {
                    Ok(eval) if !eval.feedback.trim().is_empty() => {
                        let explanation = if eval.correct_explanation.trim().is_empty() {
                            explanation
                        } else {
                            eval.correct_explanation
                        };
                        (eval.feedback, explanation)
                    }
                    Ok(_) => (template_mcq_feedback(correct, &correct_text), explanation),
                    Err(err) => {
                        tracing::warn!(user_id, error = %err, "MCQ feedback unavailable, using template");
                        (template_mcq_feedback(correct, &correct_text), explanation)
                    }
                };

                let raw = RawOutcome::Choice {
                    selected: answer.to_string(),
                    correct: correct_answer,
                };
                let recorded = record_result(
                    profile,
                    &key.topic,
                    ScoreKind::Mcq,
                    &raw,
                    &self.policy,
                    now,
                )?;
                challenges::peek_and_resolve(profile, key);
                tracing::info!(
                    user_id,
                    topic = %key.topic,
                    correct = recorded.outcome.is_correct(),
                    mastery = recorded.topic.mastery_score,
                    "MCQ answer recorded"
                );

                Ok(AnswerFeedback {
                    topic: key.topic.clone(),
                    kind: ScoreKind::Mcq,
                    scored: true,
                    retryable: false,
                    outcome: Some(recorded.outcome),
                    marks: Some(if recorded.outcome.is_correct() { 1.0 } else { 0.0 }),
                    rubric: None,
                    feedback,
                    correct_explanation,
                    correct_answer: Some(correct_text),
                    topic_state: Some(recorded.topic),
                })
            }
            Challenge::QnaPending {
                question,
                length_mode,
                expected_points,
            } => {
                let evaluation = if is_gibberish_answer(answer) {
                    QnaEvaluation::zero(GIBBERISH_FEEDBACK)
                } else {
                    let grading = QnaGrading {
                        topic: &key.topic,
                        question: &question,
                        expected_points: &expected_points,
                        length: length_mode,
                        answer,
                    };
                    match self.collaborators.evaluate_qna(&grading).await {
                        Ok(evaluation) => evaluation,
                        Err(err) => {
                            tracing::warn!(
                                user_id,
                                topic = %key.topic,
                                error = %err,
                                "QnA evaluation failed, answer not scored"
                            );
                            return Ok(AnswerFeedback {
                                topic: key.topic.clone(),
                                kind: ScoreKind::Qna,
                                scored: false,
                                retryable: true,
                                outcome: None,
                                marks: None,
                                rubric: None,
                                feedback: GRADING_UNAVAILABLE_FEEDBACK.to_string(),
                                correct_explanation: String::new(),
                                correct_answer: None,
                                topic_state: None,
                            });
                        }
                    }
                };

                let raw = RawOutcome::Rubric {
                    total_marks: evaluation.total_marks,
                };
                let recorded = record_result(
                    profile,
                    &key.topic,
                    ScoreKind::Qna,
                    &raw,
                    &self.policy,
                    now,
                )?;
                challenges::peek_and_resolve(profile, key);
                tracing::info!(
                    user_id,
                    topic = %key.topic,
                    total_marks = evaluation.total_marks,
                    correct = recorded.outcome.is_correct(),
                    mastery = recorded.topic.mastery_score,
                    "QnA answer recorded"
                );

                Ok(AnswerFeedback {
                    topic: key.topic.clone(),
                    kind: ScoreKind::Qna,
                    scored: true,
                    retryable: false,
                    outcome: Some(recorded.outcome),
                    marks: Some(evaluation.total_marks),
                    rubric: Some(RubricScores {
                        correctness: evaluation.concept_score,
                        completeness: evaluation.completeness_score,
                        clarity: evaluation.clarity_score,
                    }),
                    feedback: evaluation.feedback,
                    correct_explanation: evaluation.correct_explanation,
                    correct_answer: None,
                    topic_state: Some(recorded.topic),
                })
            }
            Challenge::TopicConfirmation { .. } => Err(TutorError::missing_context(
                format!("'{}' is waiting for a confirmation, not an answer.", key.topic),
                &["challenge"],
            )),
        }
    }
}

fn template_mcq_feedback(correct: bool, correct_text: &str) -> String {
    if correct {
        "Correct! Nicely done.".to_string()
    } else {
        format!("Not quite. The correct answer is {correct_text}.")
    }
}

pub(crate) fn check_user_id(user_id: &str) -> Result<&str, TutorError> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(TutorError::validation("user_id must not be empty", "user_id"));
    }
    if trimmed.chars().count() > USER_ID_MAX_LEN {
        return Err(TutorError::validation(
            format!("user_id must be at most {USER_ID_MAX_LEN} characters"),
            "user_id",
        ));
    }
    Ok(trimmed)
}
