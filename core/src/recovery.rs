//! Recovery actions offered after a profile fails validation.
//!
//! Repair applies exactly two fixes: stale mastery scores are overwritten
//! with the derived value (re-deriving classification and weak/strong
//! membership with it), and weak/strong ids that name no topic are dropped.
//! Anything else needs a reset.

use serde_json::Value;

use crate::error::TutorError;
use crate::mastery::derive_mastery;
use crate::profile::UserProfile;
use crate::topics::recompute_derived;
use crate::validation::MASTERY_TOLERANCE;

pub const RESET_REPLY: &str = "Profile reset. How can I help you today?";
pub const NOTHING_TO_REPAIR_REPLY: &str =
    "No automatic repairs possible. Please use 'New' to reset.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Repair,
    Reset,
    Export,
}

impl RecoveryAction {
    /// Exact token match after trimming, ignoring case. Anything else is
    /// not a recovery request.
    pub fn parse(input: &str) -> Option<Self> {
        let token = input.trim();
        if token.eq_ignore_ascii_case("repair") {
            Some(Self::Repair)
        } else if token.eq_ignore_ascii_case("new") {
            Some(Self::Reset)
        } else if token.eq_ignore_ascii_case("export") {
            Some(Self::Export)
        } else {
            None
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Repair => "repair",
            Self::Reset => "new",
            Self::Export => "export",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    Repaired(Vec<String>),
    NothingToRepair,
}

impl RepairOutcome {
    pub fn reply(&self) -> String {
        match self {
            Self::Repaired(fixes) => format!("Repair successful: {}.", fixes.join(", ")),
            Self::NothingToRepair => NOTHING_TO_REPAIR_REPLY.to_string(),
        }
    }
}

/// Apply the sanctioned fixes in place. The caller persists only on
/// [`RepairOutcome::Repaired`].
pub fn repair(profile: &mut UserProfile) -> RepairOutcome {
    let mut fixes = Vec::new();

    let stale: Vec<String> = profile
        .topics
        .iter()
        .filter(|(_, topic)| {
            let expected = derive_mastery(topic.questions_attempted, topic.correct_answers);
            if topic.questions_attempted > 0 {
                (topic.mastery_score - expected).abs() > MASTERY_TOLERANCE
            } else {
                topic.mastery_score != 0.0
            }
        })
        .map(|(name, _)| name.clone())
        .collect();
    for name in stale {
        // Classification and weak/strong membership follow the new score.
        recompute_derived(profile, &name);
        fixes.push(format!("Fixed mastery for {name}"));
    }

    let known: Vec<String> = profile
        .topics
        .values()
        .map(|t| t.topic_id.clone())
        .collect();
    for (area, ids) in [
        ("weak_areas", &mut profile.weak_areas),
        ("strong_areas", &mut profile.strong_areas),
    ] {
        let before = ids.len();
        ids.retain(|id| known.contains(id));
        if ids.len() != before {
            fixes.push(format!("Cleaned {area}"));
        }
    }

    if fixes.is_empty() {
        RepairOutcome::NothingToRepair
    } else {
        RepairOutcome::Repaired(fixes)
    }
}

/// Pretty-printed snapshot of a decoded profile.
pub fn export(profile: &UserProfile) -> Result<String, TutorError> {
    let document = profile.to_document()?;
    export_raw(&document)
}

/// Pretty-printed snapshot of a stored document that may not decode.
pub fn export_raw(document: &Value) -> Result<String, TutorError> {
    serde_json::to_string_pretty(document).map_err(|err| TutorError::StorageFailure {
        operation: "export_profile".to_string(),
        attempts: 0,
        message: err.to_string(),
    })
}

pub fn export_reply(pretty: &str) -> String {
    format!("Current State:\n```json\n{pretty}\n```")
}

/// Reply for a turn blocked by a failed validation.
pub fn corrupted_state_reply(error_id: &str) -> String {
    format!(
        "⚠️ Session Data Issue Detected\n\n\
         Your session data appears inconsistent.\n\n\
         Options:\n\
         1. Attempt automatic repair (reply 'repair')\n\
         2. Start a new session (reply 'new')\n\
         3. Export data for support (reply 'export')\n\n\
         Which would you like to do?\n\n\
         Error ID: {error_id} - Logged for investigation."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Classification, Topic};
    use crate::summary::ProfileSummary;
    use crate::validation::validate;

    fn corrupted() -> UserProfile {
        let mut profile = UserProfile::default();
        profile.topics.insert(
            "Sets".to_string(),
            Topic {
                questions_attempted: 4,
                correct_answers: 1,
                mastery_score: 0.9,
                ..Topic::new("sets-id".to_string(), "Sets".to_string())
            },
        );
        profile.weak_areas.push("sets-id".to_string());
        profile.strong_areas.push("ghost".to_string());
        profile
    }

    #[test]
    fn tokens_are_exact_trimmed_and_case_insensitive() {
        assert_eq!(RecoveryAction::parse("  REPAIR "), Some(RecoveryAction::Repair));
        assert_eq!(RecoveryAction::parse("New"), Some(RecoveryAction::Reset));
        assert_eq!(RecoveryAction::parse("export"), Some(RecoveryAction::Export));
        assert_eq!(RecoveryAction::parse("please repair"), None);
        assert_eq!(RecoveryAction::parse("reset"), None);
    }

    #[test]
    fn repair_fixes_mastery_and_orphans_then_validates() {
        let mut profile = corrupted();
        assert!(!validate(&profile, &[]).is_valid());

        let outcome = repair(&mut profile);
        assert_eq!(
            outcome,
            RepairOutcome::Repaired(vec![
                "Fixed mastery for Sets".to_string(),
                "Cleaned strong_areas".to_string(),
            ])
        );
        assert_eq!(
            outcome.reply(),
            "Repair successful: Fixed mastery for Sets, Cleaned strong_areas."
        );
        assert_eq!(profile.topics["Sets"].mastery_score, 0.25);
        assert!(validate(&profile, &[]).is_valid());
    }

    #[test]
    fn repair_rederives_classification_and_membership() {
        let mut profile = UserProfile::default();
        profile.topics.insert(
            "Sets".to_string(),
            Topic {
                questions_attempted: 4,
                correct_answers: 1,
                mastery_score: 0.9,
                classification: Classification::Strong,
                ..Topic::new("sets-id".to_string(), "Sets".to_string())
            },
        );
        profile.strong_areas.push("sets-id".to_string());

        let outcome = repair(&mut profile);
        assert_eq!(
            outcome,
            RepairOutcome::Repaired(vec!["Fixed mastery for Sets".to_string()])
        );
        let sets = &profile.topics["Sets"];
        assert_eq!(sets.mastery_score, 0.25);
        assert_eq!(sets.classification, Classification::Weak);
        assert_eq!(profile.weak_areas, vec!["sets-id".to_string()]);
        assert!(profile.strong_areas.is_empty());
        assert!(ProfileSummary::from_profile(&profile).strong.areas.is_empty());
        assert!(validate(&profile, &[]).is_valid());
    }

    #[test]
    fn repair_zeroes_mastery_on_unattempted_topics() {
        let mut profile = UserProfile::default();
        profile.topics.insert(
            "Sets".to_string(),
            Topic {
                mastery_score: 0.25,
                ..Topic::new("sets-id".to_string(), "Sets".to_string())
            },
        );
        assert!(!validate(&profile, &[]).is_valid());

        let outcome = repair(&mut profile);
        assert_eq!(
            outcome,
            RepairOutcome::Repaired(vec!["Fixed mastery for Sets".to_string()])
        );
        assert_eq!(profile.topics["Sets"].mastery_score, 0.0);
        assert_eq!(profile.topics["Sets"].classification, Classification::Unassessed);
        assert!(validate(&profile, &[]).is_valid());
    }

    #[test]
    fn repair_leaves_counter_violations_alone() {
        let mut profile = UserProfile::default();
        profile.topics.insert(
            "Sets".to_string(),
            Topic {
                questions_attempted: -1,
                ..Topic::new("sets-id".to_string(), "Sets".to_string())
            },
        );
        assert_eq!(repair(&mut profile), RepairOutcome::NothingToRepair);
        assert_eq!(profile.topics["Sets"].questions_attempted, -1);
        assert!(!validate(&profile, &[]).is_valid());
    }

    #[test]
    fn export_is_read_only() {
        let profile = corrupted();
        let before = profile.clone();
        let pretty = export(&profile).expect("export");
        assert_eq!(profile, before);
        assert!(pretty.contains("\"ghost\""));
        assert!(export_reply(&pretty).starts_with("Current State:\n```json\n{"));
    }

    #[test]
    fn corrupted_reply_lists_options_and_error_id() {
        let reply = corrupted_state_reply("1a2b3c4d");
        assert!(reply.contains("'repair'"));
        assert!(reply.contains("'new'"));
        assert!(reply.contains("'export'"));
        assert!(reply.contains("Error ID: 1a2b3c4d"));
    }
}
