//! Read-only invariant checks over a profile and its recent history.

use chrono::{DateTime, Utc};

use crate::conversation::ChatMessage;
use crate::mastery::derive_mastery;
use crate::profile::UserProfile;

/// Allowed drift between stored and derived mastery.
pub const MASTERY_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationReport {
    Valid,
    Invalid(Vec<String>),
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn violations(&self) -> &[String] {
        match self {
            Self::Valid => &[],
            Self::Invalid(violations) => violations,
        }
    }
}

/// Run every check and collect all violations. Never short-circuits.
pub fn validate(profile: &UserProfile, recent_history: &[ChatMessage]) -> ValidationReport {
    let mut violations = Vec::new();
    check_references(profile, &mut violations);
    check_counters(profile, &mut violations);
    check_mastery(profile, &mut violations);
    check_assessment(profile, &mut violations);
    check_timestamps(recent_history, &mut violations);

    if violations.is_empty() {
        ValidationReport::Valid
    } else {
        ValidationReport::Invalid(violations)
    }
}

fn check_references(profile: &UserProfile, violations: &mut Vec<String>) {
    let known = profile.topic_ids();
    for (area, ids) in [
        ("weak_areas", &profile.weak_areas),
        ("strong_areas", &profile.strong_areas),
    ] {
        for id in ids {
            if !known.contains(id.as_str()) {
                violations.push(format!("Orphaned topic ID {id} found in {area}"));
            }
        }
    }
}

fn check_counters(profile: &UserProfile, violations: &mut Vec<String>) {
    for (name, topic) in &profile.topics {
        let attempted = topic.questions_attempted;
        let correct = topic.correct_answers;
        if attempted < 0 {
            violations.push(format!("Negative attempted count for topic {name}"));
        }
        if correct < 0 {
            violations.push(format!("Negative correct count for topic {name}"));
        }
        if correct > attempted {
            violations.push(format!(
                "Correct answers ({correct}) exceed attempted ({attempted}) for topic {name}"
            ));
        }
    }
}

fn check_mastery(profile: &UserProfile, violations: &mut Vec<String>) {
    for (name, topic) in &profile.topics {
        let stored = topic.mastery_score;
        if topic.questions_attempted > 0 {
            let expected = derive_mastery(topic.questions_attempted, topic.correct_answers);
            if (stored - expected).abs() > MASTERY_TOLERANCE {
                violations.push(format!(
                    "Mastery mismatch for topic {name}: stored {stored}, expected {expected}"
                ));
            }
        } else if stored != 0.0 {
            violations.push(format!(
                "Mastery should be 0.0 for unattempted topic {name}"
            ));
        }
    }
}

fn check_assessment(profile: &UserProfile, violations: &mut Vec<String>) {
    let Some(snapshot) = &profile.assessment_state else {
        return;
    };
    let total = snapshot.total_questions;
    let current = snapshot.current_question_index;
    if total > 0 && current >= total {
        violations.push(format!(
            "Assessment index {current} out of bounds for total {total}"
        ));
    }
    for idx in &snapshot.answered_questions {
        if !snapshot.user_answers.contains_key(idx) {
            violations.push(format!("Answered question {idx} has no recorded answer"));
        }
    }
}

fn check_timestamps(history: &[ChatMessage], violations: &mut Vec<String>) {
    let mut last: Option<DateTime<Utc>> = None;
    for (i, message) in history.iter().enumerate() {
        let Some(ts) = message.timestamp else {
            continue;
        };
        if last.is_some_and(|prev| ts < prev) {
            violations.push(format!("Out-of-order timestamp at message {i}"));
        }
        last = Some(ts);
    }
}
