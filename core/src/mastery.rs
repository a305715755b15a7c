//! Mastery rules: the only code path that writes attempt/correctness counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::TutorError;
use crate::profile::{AnswerOutcome, Classification, ResultRecord, ScoreKind, Topic, UserProfile};
use crate::topics;

/// Topics below this mastery are weak; at or above it they are strong.
pub const WEAK_THRESHOLD: f64 = 0.40;

/// Open answers scoring at least this many of [`QNA_MAX_MARKS`] count as correct.
pub const QNA_PASS_MARK: f64 = 4.0;
pub const QNA_MAX_MARKS: f64 = 10.0;

pub fn round_score(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// `round(correct / attempted, 4)`, or exactly `0.0` before the first attempt.
pub fn derive_mastery(questions_attempted: i64, correct_answers: i64) -> f64 {
    if questions_attempted > 0 {
        round_score(correct_answers as f64 / questions_attempted as f64)
    } else {
        0.0
    }
}

pub fn classify(questions_attempted: i64, mastery_score: f64) -> Classification {
    if questions_attempted == 0 {
        Classification::Unassessed
    } else if mastery_score < WEAK_THRESHOLD {
        Classification::Weak
    } else {
        Classification::Strong
    }
}

/// What the grader observed before it is reduced to correct/incorrect.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutcome {
    /// A multiple-choice selection and the stored answer key.
    Choice { selected: String, correct: String },
    /// Rubric total for an open-ended answer, out of [`QNA_MAX_MARKS`].
    Rubric { total_marks: f64 },
}

/// Caller-supplied policy that turns a raw outcome into a binary result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    pub qna_pass_mark: f64,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            qna_pass_mark: QNA_PASS_MARK,
        }
    }
}

impl ThresholdPolicy {
    pub fn judge(&self, outcome: &RawOutcome) -> AnswerOutcome {
        let correct = match outcome {
            RawOutcome::Choice { selected, correct } => choice_matches(selected, correct),
            RawOutcome::Rubric { total_marks } => *total_marks >= self.qna_pass_mark,
        };
        if correct {
            AnswerOutcome::Correct
        } else {
            AnswerOutcome::Incorrect
        }
    }
}

/// Exact match on the option letter, ignoring case and surrounding whitespace.
/// An empty selection never matches.
pub fn choice_matches(selected: &str, correct: &str) -> bool {
    let selected = selected.trim();
    !selected.is_empty() && selected.eq_ignore_ascii_case(correct.trim())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RecordedResult {
    pub topic: Topic,
    pub outcome: AnswerOutcome,
    /// True when the topic did not exist before this attempt.
    pub topic_created: bool,
}

/// Record one graded attempt against a topic.
///
/// Creates the topic if it does not exist yet, always increments
/// `questions_attempted`, increments `correct_answers` only on a correct
/// outcome, appends to the bounded result history and re-derives mastery,
/// classification and weak/strong membership. Persisting is the caller's job.
pub fn record_result(
    profile: &mut UserProfile,
    topic_name: &str,
    score_kind: ScoreKind,
    raw_outcome: &RawOutcome,
    policy: &ThresholdPolicy,
    now: DateTime<Utc>,
) -> Result<RecordedResult, TutorError> {
    let inserted = topics::add_topic(profile, topic_name, None, None)?;
    let key = inserted.key;
    let outcome = policy.judge(raw_outcome);

    let topic = profile
        .topics
        .get_mut(&key)
        .ok_or_else(|| missing_topic(&key))?;
    topic.questions_attempted += 1;
    if outcome.is_correct() {
        topic.correct_answers += 1;
    }
    topic.last_assessed = Some(now);
    topic.push_result(ResultRecord {
        result: outcome,
        score_type: score_kind,
        timestamp: now,
    });

    topics::recompute_derived(profile, &key);

    let topic = profile
        .topics
        .get(&key)
        .cloned()
        .ok_or_else(|| missing_topic(&key))?;
    Ok(RecordedResult {
        topic,
        outcome,
        topic_created: inserted.created,
    })
}

fn missing_topic(key: &str) -> TutorError {
    TutorError::missing_context(format!("Topic '{key}' is not in the profile"), &["topic"])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mcq(selected: &str, correct: &str) -> RawOutcome {
        RawOutcome::Choice {
            selected: selected.to_string(),
            correct: correct.to_string(),
        }
    }

    fn record(profile: &mut UserProfile, kind: ScoreKind, outcome: RawOutcome) -> RecordedResult {
        record_result(
            profile,
            "Photosynthesis",
            kind,
            &outcome,
            &ThresholdPolicy::default(),
            Utc::now(),
        )
        .expect("result should record")
    }

    #[test]
    fn mastery_is_rounded_to_four_decimals() {
        assert_eq!(derive_mastery(3, 1), 0.3333);
        assert_eq!(derive_mastery(3, 2), 0.6667);
        assert_eq!(derive_mastery(0, 0), 0.0);
    }

    #[test]
    fn classification_threshold_is_inclusive_for_strong() {
        assert_eq!(classify(0, 0.0), Classification::Unassessed);
        assert_eq!(classify(5, 0.3999), Classification::Weak);
        assert_eq!(classify(5, 0.40), Classification::Strong);
    }

    #[test]
    fn rubric_pass_mark_is_four_of_ten() {
        let policy = ThresholdPolicy::default();
        assert_eq!(
            policy.judge(&RawOutcome::Rubric { total_marks: 3.0 }),
            AnswerOutcome::Incorrect
        );
        assert_eq!(
            policy.judge(&RawOutcome::Rubric { total_marks: 4.0 }),
            AnswerOutcome::Correct
        );
    }

    #[test]
    fn choice_match_ignores_case_and_whitespace() {
        assert!(choice_matches(" b ", "B"));
        assert!(!choice_matches("A", "B"));
        assert!(!choice_matches("   ", ""));
    }

    #[test]
    fn photosynthesis_scenario() {
        let mut profile = UserProfile::default();
        crate::topics::add_topic(&mut profile, "Photosynthesis", None, None).expect("add");

        let first = record(&mut profile, ScoreKind::Mcq, mcq("A", "B"));
        assert_eq!(first.topic.questions_attempted, 1);
        assert_eq!(first.topic.correct_answers, 0);
        assert_eq!(first.topic.mastery_score, 0.0);
        assert_eq!(first.topic.classification, Classification::Weak);

        let second = record(
            &mut profile,
            ScoreKind::Qna,
            RawOutcome::Rubric { total_marks: 3.0 },
        );
        assert_eq!(second.topic.questions_attempted, 2);
        assert_eq!(second.topic.correct_answers, 0);
        assert_eq!(second.topic.classification, Classification::Weak);

        let third = record(&mut profile, ScoreKind::Mcq, mcq("B", "B"));
        assert_eq!(third.topic.questions_attempted, 3);
        assert_eq!(third.topic.correct_answers, 1);
        assert_eq!(third.topic.mastery_score, 0.3333);
        assert_eq!(third.topic.classification, Classification::Weak);
        assert_eq!(profile.weak_areas, vec![third.topic.topic_id.clone()]);
        assert!(profile.strong_areas.is_empty());
    }

    #[test]
    fn n_results_with_k_correct_match_the_derivation() {
        let mut profile = UserProfile::default();
        let pattern = [true, false, true, true, false, false, false, true, false, false, false];
        let mut correct = 0;
        for (i, is_correct) in pattern.iter().enumerate() {
            let outcome = if *is_correct { mcq("C", "C") } else { mcq("A", "C") };
            if *is_correct {
                correct += 1;
            }
            let result = record(&mut profile, ScoreKind::Mcq, outcome);
            let attempted = i as i64 + 1;
            let topic = &result.topic;
            assert!(topic.correct_answers <= topic.questions_attempted);
            assert_eq!(topic.questions_attempted, attempted);
            assert_eq!(topic.correct_answers, correct);
            assert_eq!(topic.mastery_score, derive_mastery(attempted, correct));
            let expected = if topic.mastery_score >= WEAK_THRESHOLD {
                Classification::Strong
            } else {
                Classification::Weak
            };
            assert_eq!(topic.classification, expected);
        }
    }

    #[test]
    fn first_graded_attempt_creates_the_topic() {
        let mut profile = UserProfile::default();
        let result = record(&mut profile, ScoreKind::Mcq, mcq("D", "D"));
        assert!(result.topic_created);
        assert_eq!(result.topic.classification, Classification::Strong);
        assert_eq!(profile.strong_areas, vec![result.topic.topic_id]);
    }

    #[test]
    fn invalid_topic_names_are_rejected_before_counting() {
        let mut profile = UserProfile::default();
        let err = record_result(
            &mut profile,
            "x",
            ScoreKind::Mcq,
            &mcq("A", "A"),
            &ThresholdPolicy::default(),
            Utc::now(),
        )
        .expect_err("two-letter topic must be rejected");
        assert!(matches!(err, TutorError::Validation { .. }));
        assert!(profile.topics.is_empty());
    }
}
