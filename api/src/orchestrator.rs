//! One chat turn: observe, validate, classify, route, update, persist,
//! respond, log. The whole turn runs under the learner's lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tutor_core::challenges::{self, Challenge, ChallengeKey, ChallengeKind};
use tutor_core::conversation::{ChatMessage, ConversationLog};
use tutor_core::error::TutorError;
use tutor_core::intent::{Intent, IntentDecision, is_affirmative, topic_from_add_request};
use tutor_core::profile::{ScoreKind, UserProfile};
use tutor_core::recovery::{self, RecoveryAction};
use tutor_core::summary::ProfileSummary;
use tutor_core::topics::{self, clip_summary, validate_topic_name};
use tutor_core::validation::{ValidationReport, validate};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::collaborators::{ExplainRequest, IntentClassifier, Tutoring};
use crate::store::DocumentBackend;
use crate::tutor::{AnswerFeedback, QuestionView, Tutor, check_user_id};

pub(crate) const NO_PENDING_REPLY: &str =
    "I don't see an active assessment or request. What would you like to do?";
pub(crate) const AI_UNAVAILABLE_REPLY: &str =
    "AI service is unavailable. Please ensure Ollama is running. You can try again in a moment.";
pub(crate) const CHAT_FALLBACK_REPLY: &str =
    "I'm not sure how to help with that yet, but I'm here to study with you!";
pub(crate) const DECLINED_TOPIC_REPLY: &str =
    "Okay, I won't add that topic. What else would you like to study?";
pub(crate) const MISSING_CONTEXT_REPLY: &str = "I don't have enough context to answer that accurately.\n\n\
     Could you:\n\
     - Specify which topic you're referring to?\n\
     - Rephrase with more detail?\n\
     - Or, let me know if you'd like to start a new topic.";

const MESSAGE_MAX_CHARS: usize = 4_000;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TurnReply {
    pub response: String,
    pub metadata: TurnMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct TurnMetadata {
    /// The routed intent, or "recovery" for blocked turns.
    pub intent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<AnswerFeedback>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

/// What routing produced before it is rendered into a reply.
#[derive(Debug, Default)]
struct Routed {
    response: String,
    template_type: Option<&'static str>,
    topic: Option<String>,
    question: Option<QuestionView>,
    feedback: Option<AnswerFeedback>,
}

impl Routed {
    fn reply(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }

    fn template(template_type: &'static str, response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            template_type: Some(template_type),
            ..Self::default()
        }
    }

    fn about(mut self, topic: &str) -> Self {
        self.topic = Some(topic.to_string());
        self
    }
}

/// Audit-only record of what a turn changed.
#[derive(Debug, Default, PartialEq)]
struct TurnDiff {
    topics_added: Vec<String>,
    challenges_opened: Vec<String>,
    challenges_resolved: Vec<String>,
    attempts_recorded: i64,
}

impl TurnDiff {
    fn between(before: &UserProfile, after: &UserProfile) -> Self {
        let topics_added = after
            .topics
            .keys()
            .filter(|name| !before.topics.contains_key(*name))
            .cloned()
            .collect();
        let challenges_opened = after
            .active_challenges
            .iter()
            .filter(|(key, entry)| {
                before
                    .active_challenges
                    .get(*key)
                    .is_none_or(|old| old.opened_at != entry.opened_at)
            })
            .map(|(key, _)| key.clone())
            .collect();
        let challenges_resolved = before
            .active_challenges
            .keys()
            .filter(|key| !after.active_challenges.contains_key(*key))
            .cloned()
            .collect();
        let attempts = |p: &UserProfile| -> i64 {
            p.topics.values().map(|t| t.questions_attempted).sum()
        };

        Self {
            topics_added,
            challenges_opened,
            challenges_resolved,
            attempts_recorded: attempts(after) - attempts(before),
        }
    }
}

impl<B, C> Tutor<B, C>
where
    B: DocumentBackend,
    C: IntentClassifier + Tutoring,
{
    pub async fn handle_turn(&self, user_id: &str, message: &str) -> Result<TurnReply, TutorError> {
        let user_id = check_user_id(user_id)?;
        let message = message.trim();
        if message.is_empty() {
            return Err(TutorError::validation("message must not be empty", "message"));
        }
        if message.chars().count() > MESSAGE_MAX_CHARS {
            return Err(TutorError::validation(
                format!("message must be at most {MESSAGE_MAX_CHARS} characters"),
                "message",
            ));
        }

        let _guard = self.locks.acquire(user_id).await;
        let now = Utc::now();

        // Observe
        let loaded = match self.store.load(user_id).await {
            Ok(profile) => Ok(profile),
            Err(TutorError::StateCorruption { violations }) => Err(violations),
            Err(other) => return Err(other),
        };
        let (mut log, log_violations) = match self.store.load_history(user_id).await {
            Ok(log) => (log, Vec::new()),
            Err(TutorError::StateCorruption { violations }) => {
                (ConversationLog::default(), violations)
            }
            Err(other) => return Err(other),
        };
        let recent: Vec<ChatMessage> = log.recent(self.history_window).to_vec();

        // Validate
        let (profile, mut report) = match loaded {
            Ok(profile) => {
                let report = validate(&profile, &recent);
                (Some(profile), report)
            }
            Err(violations) => (None, ValidationReport::Invalid(violations)),
        };
        if !log_violations.is_empty() {
            let mut violations = report.violations().to_vec();
            violations.extend(log_violations);
            report = ValidationReport::Invalid(violations);
        }
        let mut profile = match (profile, report) {
            (Some(profile), ValidationReport::Valid) => profile,
            (profile, report) => {
                return self
                    .blocked_turn(user_id, message, profile, report.violations())
                    .await;
            }
        };

        // Classify
        let summary = ProfileSummary::from_profile(&profile);
        let decision = match self
            .collaborators
            .classify(message, &recent, &summary)
            .await
        {
            Ok(decision) => decision.normalized(message),
            Err(err) => {
                let pending = !challenges::pending(&profile).is_empty();
                tracing::warn!(
                    user_id,
                    error = %err,
                    pending_challenge = pending,
                    "intent classification failed, using fallback"
                );
                let fallback = IntentDecision::fallback(message);
                if pending {
                    IntentDecision {
                        intent: Intent::AnswerQuestion.as_str().to_string(),
                        ..fallback
                    }
                } else {
                    fallback
                }
            }
        };
        let intent = decision.intent();

        // Route & execute
        let before = profile.clone();
        let routed = match intent {
            Intent::AddTopic => route_add_topic(&mut profile, &decision, message, now),
            Intent::AnswerQuestion => {
                self.route_answer(user_id, &mut profile, &decision, message, now)
                    .await?
            }
            Intent::ExplainTopic => {
                self.route_explain(user_id, &mut profile, &decision, message, &summary, &recent)
                    .await
            }
            Intent::StartAssessment => {
                self.route_assessment(user_id, &mut profile, &decision, now)
                    .await
            }
            Intent::GeneralChat => self.route_chat(user_id, message, &recent).await,
        };

        // Update state
        let diff = TurnDiff::between(&before, &profile);

        // Persist
        self.store.save(user_id, &mut profile).await?;

        // Respond
        log.push_exchange(message, &routed.response, now);
        if let Err(err) = self.store.save_history(user_id, &log).await {
            tracing::warn!(user_id, error = %err, "conversation history not saved");
        }

        // Log
        tracing::info!(
            target: "tutor::audit",
            user_id,
            intent = intent.as_str(),
            confidence = decision.confidence_level,
            confusion = decision.confusion_detected,
            topic = routed.topic.as_deref().unwrap_or(""),
            diff = ?diff,
            "turn completed"
        );

        Ok(TurnReply {
            response: routed.response,
            metadata: TurnMetadata {
                intent: intent.as_str().to_string(),
                confidence: Some(decision.confidence_level),
                template_type: routed.template_type.map(str::to_string),
                topic: routed.topic,
                question: routed.question,
                feedback: routed.feedback,
                ..TurnMetadata::default()
            },
        })
    }

    /// A turn on a document that failed validation: run a recovery action if
    /// the message is one, otherwise list the options.
    async fn blocked_turn(
        &self,
        user_id: &str,
        message: &str,
        profile: Option<UserProfile>,
        violations: &[String],
    ) -> Result<TurnReply, TutorError> {
        if let Some(action) = RecoveryAction::parse(message) {
            let result = self.recover(user_id, action, profile).await?;
            return Ok(TurnReply {
                response: result.reply,
                metadata: TurnMetadata {
                    intent: "recovery".to_string(),
                    recovery_action: Some(action.as_str().to_string()),
                    ..TurnMetadata::default()
                },
            });
        }

        let error_id = new_error_id();
        tracing::error!(
            target: "tutor::recovery",
            user_id,
            error_id = %error_id,
            violations = ?violations,
            "turn blocked by invalid profile"
        );
        Ok(TurnReply {
            response: recovery::corrupted_state_reply(&error_id),
            metadata: TurnMetadata {
                intent: "recovery".to_string(),
                template_type: Some("corrupted_state".to_string()),
                error_id: Some(error_id),
                violations: violations.to_vec(),
                ..TurnMetadata::default()
            },
        })
    }

    async fn route_answer(
        &self,
        user_id: &str,
        profile: &mut UserProfile,
        decision: &IntentDecision,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Routed, TutorError> {
        let Some((key, challenge)) = select_challenge(profile, decision.focus_topic()) else {
            return Ok(Routed::template("no_pending", NO_PENDING_REPLY));
        };

        match challenge {
            Challenge::TopicConfirmation { topic_name } => {
                challenges::peek_and_resolve(profile, &key);
                if !is_affirmative(message) {
                    return Ok(Routed::reply(DECLINED_TOPIC_REPLY).about(&topic_name));
                }
                let inserted = topics::add_topic(profile, &topic_name, None, None)?;
                tracing::info!(user_id, topic = %inserted.key, "topic confirmed");
                Ok(Routed::reply(format!(
                    "Added '{topic_name}' to your active topics! Would you like an explanation or a quick quiz?"
                ))
                .about(&topic_name))
            }
            graded => {
                let feedback = self
                    .grade(user_id, profile, &key, graded, message, now)
                    .await?;
                Ok(Routed {
                    response: render_feedback(&feedback),
                    template_type: (!feedback.scored).then_some("grading_unavailable"),
                    topic: Some(key.topic.clone()),
                    question: None,
                    feedback: Some(feedback),
                })
            }
        }
    }

    async fn route_explain(
        &self,
        user_id: &str,
        profile: &mut UserProfile,
        decision: &IntentDecision,
        message: &str,
        summary: &ProfileSummary,
        recent: &[ChatMessage],
    ) -> Routed {
        let topic = decision.focus_topic();
        let request = ExplainRequest {
            input: message,
            topic,
            strategy: &decision.strategy,
            depth: &decision.depth,
            summary,
            history: recent,
        };
        let explanation = match self.collaborators.explain(&request).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(user_id, error = %err, "explanation unavailable");
                return Routed::template("upstream_unavailable", AI_UNAVAILABLE_REPLY);
            }
        };

        let Some(topic) = topic else {
            return Routed::reply(explanation);
        };
        // The topic joins the session once it has been explained.
        if validate_topic_name(topic).is_ok() && topics::find_topic(profile, topic).is_none() {
            match topics::add_topic(profile, topic, None, Some(clip_summary(&explanation))) {
                Ok(inserted) => tracing::info!(user_id, topic = %inserted.key, "topic added after explanation"),
                Err(err) => tracing::warn!(user_id, topic, error = %err, "explained topic not added"),
            }
        }
        Routed::reply(explanation).about(topic)
    }

    async fn route_assessment(
        &self,
        user_id: &str,
        profile: &mut UserProfile,
        decision: &IntentDecision,
        now: DateTime<Utc>,
    ) -> Routed {
        let Some(known) = decision
            .focus_topic()
            .and_then(|focus| topics::find_topic(profile, focus))
        else {
            return Routed::template("missing_context", MISSING_CONTEXT_REPLY);
        };
        let name = known.name.clone();
        if !known.is_assessed() {
            return Routed::template(
                "unassessed_topic",
                unassessed_reply(&name, known.mastery_score),
            )
            .about(&name);
        }

        match self
            .open_question(profile, &name, ScoreKind::Mcq, Default::default(), now)
            .await
        {
            Ok(view) => Routed {
                response: render_question(&view),
                template_type: None,
                topic: Some(name),
                question: Some(view),
                feedback: None,
            },
            Err(err) => {
                tracing::warn!(user_id, topic = %name, error = %err, "question generation failed");
                Routed::template("upstream_unavailable", AI_UNAVAILABLE_REPLY).about(&name)
            }
        }
    }

    async fn route_chat(&self, user_id: &str, message: &str, recent: &[ChatMessage]) -> Routed {
        match self.collaborators.chat(message, recent).await {
            Ok(text) => Routed::reply(text),
            Err(err) => {
                tracing::warn!(user_id, error = %err, "chat reply unavailable");
                Routed::reply(CHAT_FALLBACK_REPLY)
            }
        }
    }
}

fn route_add_topic(
    profile: &mut UserProfile,
    decision: &IntentDecision,
    message: &str,
    now: DateTime<Utc>,
) -> Routed {
    let topic = decision
        .focus_topic()
        .map(str::to_string)
        .unwrap_or_else(|| topic_from_add_request(message));

    if let Err(err) = validate_topic_name(&topic) {
        return Routed::template("invalid_topic", err.to_string());
    }
    if let Some(existing) = topics::find_topic(profile, &topic) {
        let name = existing.name.clone();
        return Routed::template(
            "topic_exists",
            format!("'{name}' is already in your session! Would you like an explanation or a quiz on it?"),
        )
        .about(&name);
    }

    let key = ChallengeKey::new(ChallengeKind::Confirm, topic.as_str());
    challenges::open(
        profile,
        &key,
        Challenge::TopicConfirmation {
            topic_name: topic.clone(),
        },
        now,
    );
    Routed::template(
        "topic_confirmation",
        format!("I'll add '{topic}' to your session. Correct?"),
    )
    .about(&topic)
}

/// The pending challenge on the focus topic, else the most recent one.
fn select_challenge(
    profile: &UserProfile,
    focus: Option<&str>,
) -> Option<(ChallengeKey, Challenge)> {
    let on_focus = focus.and_then(|focus| {
        challenges::pending(profile)
            .into_iter()
            .filter(|(key, _)| key.topic.eq_ignore_ascii_case(focus))
            .max_by_key(|(_, entry)| entry.opened_at)
    });
    on_focus
        .or_else(|| challenges::latest(profile))
        .map(|(key, entry)| (key, entry.challenge.clone()))
}

fn render_question(view: &QuestionView) -> String {
    let mut content = format!("Starting MCQ for {}:\n\n{}\n", view.topic, view.question);
    for (letter, text) in &view.options {
        content.push_str(&format!("{letter}) {text}\n"));
    }
    content
}

fn render_feedback(feedback: &AnswerFeedback) -> String {
    if !feedback.scored {
        return feedback.feedback.clone();
    }
    let counted = feedback.outcome.is_some_and(|o| o.is_correct());
    let marks = feedback.marks.unwrap_or(0.0);
    let fully_correct = match feedback.kind {
        ScoreKind::Mcq => counted,
        ScoreKind::Qna => marks >= 7.0,
    };
    let status = if fully_correct {
        "✅ Correct!"
    } else if counted {
        "⚠️ Partially Correct"
    } else {
        "❌ Incorrect"
    };

    let mut content = format!("{status}\n\n");
    if let Some(rubric) = &feedback.rubric {
        content.push_str(&format!("**Score:** {marks}/10\n"));
        content.push_str(&format!(
            "**Rubric:** Correctness: {}/5, Completeness: {}/3, Clarity: {}/2\n\n",
            rubric.correctness, rubric.completeness, rubric.clarity
        ));
    }
    if !feedback.feedback.is_empty() {
        content.push_str(&format!("**Explanation:** {}\n\n", feedback.feedback));
    }

    let correct_answer = match (&feedback.correct_answer, feedback.correct_explanation.is_empty()) {
        (Some(answer), true) => answer.clone(),
        (Some(answer), false) => format!("{answer}. {}", feedback.correct_explanation),
        (None, _) => feedback.correct_explanation.clone(),
    };
    if fully_correct {
        content.push_str(&feedback.correct_explanation);
    } else if !correct_answer.is_empty() {
        content.push_str(&format!("**Correct Answer:** {correct_answer}"));
    } else {
        content.push_str("**Note:** Review this topic to strengthen your understanding.");
    }
    content.trim_end().to_string()
}

fn unassessed_reply(topic: &str, mastery: f64) -> String {
    format!(
        "{topic} - {pct}% mastery\n\
         Status: Unassessed 🔵\n\n\
         You haven't attempted any questions for this topic yet.\n\n\
         Would you like to:\n\
         1. Learn the basics first (I'll explain the concept)\n\
         2. Test your current knowledge (Start assessment)\n\n\
         Choose 1 or 2.",
        pct = (mastery * 100.0).round() as u32
    )
}

/// Short id quoted to the learner and logged with the violations.
fn new_error_id() -> String {
    let simple = Uuid::now_v7().simple().to_string();
    simple[simple.len() - 8..].to_string()
}
