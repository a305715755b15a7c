//! Pending interactive exchanges, keyed by (kind, topic).
//!
//! A key holds at most one challenge. Opening under an occupied key
//! overwrites the old entry; the follow-up turn consumes it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::profile::{ScoreKind, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    Confirm,
    Mcq,
    Qna,
}

impl ChallengeKind {
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Confirm => "confirm_topic_",
            Self::Mcq => "mcq_",
            Self::Qna => "qna_",
        }
    }

    pub const fn from_score_kind(kind: ScoreKind) -> Self {
        match kind {
            ScoreKind::Mcq => Self::Mcq,
            ScoreKind::Qna => Self::Qna,
        }
    }

    const ALL: [Self; 3] = [Self::Confirm, Self::Mcq, Self::Qna];
}

/// Deterministic ledger key: `confirm_topic_<topic>`, `mcq_<topic>`, `qna_<topic>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChallengeKey {
    pub kind: ChallengeKind,
    pub topic: String,
}

impl ChallengeKey {
    pub fn new(kind: ChallengeKind, topic: impl Into<String>) -> Self {
        Self {
            kind,
            topic: topic.into(),
        }
    }

    /// Split a stored key back into kind and topic. Topics may contain `_`,
    /// so only the known prefix is stripped.
    pub fn parse(raw: &str) -> Option<Self> {
        ChallengeKind::ALL.into_iter().find_map(|kind| {
            raw.strip_prefix(kind.prefix())
                .filter(|topic| !topic.is_empty())
                .map(|topic| Self::new(kind, topic))
        })
    }
}

impl fmt::Display for ChallengeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.topic)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LengthMode {
    Short,
    #[default]
    Medium,
    Long,
}

impl LengthMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Challenge {
    /// Waiting for the learner to confirm adding a topic.
    TopicConfirmation { topic_name: String },
    /// A multiple-choice question whose answer key never leaves the server.
    McqPending {
        question: String,
        #[serde(default)]
        options: BTreeMap<String, String>,
        correct_answer: String,
        #[serde(default)]
        explanation: String,
    },
    QnaPending {
        question: String,
        #[serde(default)]
        length_mode: LengthMode,
        #[serde(default)]
        expected_points: Vec<String>,
    },
}

impl Challenge {
    pub const fn kind(&self) -> ChallengeKind {
        match self {
            Self::TopicConfirmation { .. } => ChallengeKind::Confirm,
            Self::McqPending { .. } => ChallengeKind::Mcq,
            Self::QnaPending { .. } => ChallengeKind::Qna,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChallengeEntry {
    pub challenge: Challenge,
    /// Absent on entries carried over from untagged documents.
    #[serde(default)]
    pub opened_at: Option<DateTime<Utc>>,
}

/// Upsert a challenge. Returns the entry it replaced, if any.
pub fn open(
    profile: &mut UserProfile,
    key: &ChallengeKey,
    challenge: Challenge,
    now: DateTime<Utc>,
) -> Option<ChallengeEntry> {
    profile.active_challenges.insert(
        key.to_string(),
        ChallengeEntry {
            challenge,
            opened_at: Some(now),
        },
    )
}

pub fn peek<'a>(profile: &'a UserProfile, key: &ChallengeKey) -> Option<&'a Challenge> {
    profile
        .active_challenges
        .get(&key.to_string())
        .map(|entry| &entry.challenge)
}

/// Remove and return the challenge under `key`. The removal is only durable
/// once the caller persists the profile.
pub fn peek_and_resolve(profile: &mut UserProfile, key: &ChallengeKey) -> Option<Challenge> {
    profile
        .active_challenges
        .remove(&key.to_string())
        .map(|entry| entry.challenge)
}

/// All pending entries whose key parses, in key order.
pub fn pending(profile: &UserProfile) -> Vec<(ChallengeKey, &ChallengeEntry)> {
    profile
        .active_challenges
        .iter()
        .filter_map(|(raw, entry)| ChallengeKey::parse(raw).map(|key| (key, entry)))
        .collect()
}

/// The most recently opened entry. Entries without a timestamp sort oldest.
pub fn latest(profile: &UserProfile) -> Option<(ChallengeKey, &ChallengeEntry)> {
    pending(profile)
        .into_iter()
        .max_by_key(|(_, entry)| entry.opened_at)
}
