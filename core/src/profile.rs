//! The per-user learning record.
//!
//! One document per user id. Mastery, classification and the weak/strong
//! sets are derived fields: they are recomputed from the counters by
//! [`crate::topics::recompute_derived`] and must never be edited directly.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::challenges::ChallengeEntry;
use crate::error::TutorError;
use crate::mastery::round_score;

/// Version stamped on every document written by this crate.
/// Version 0 is the untagged legacy shape.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Number of graded outcomes kept per topic.
pub const RESULT_HISTORY_CAP: usize = 10;

pub const DEFAULT_MODE: &str = "idle";

/// Fields the legacy shape carried at the top level and that no longer
/// belong in the profile document.
const LEGACY_TOP_LEVEL_FIELDS: &[&str] = &["session_id", "conversation_history"];

/// Per-topic fields that used to be cached in the document.
const LEGACY_TOPIC_FIELDS: &[&str] = &["status", "explanation_cache"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    #[serde(default)]
    pub schema_version: u32,
    /// Mean mastery over assessed topics. Derived on every save.
    #[serde(default)]
    pub mastery: f64,
    /// Topic name → topic.
    #[serde(default)]
    pub topics: BTreeMap<String, Topic>,
    /// Ids of topics classified weak, in classification order.
    #[serde(default)]
    pub weak_areas: Vec<String>,
    /// Ids of topics classified strong, in classification order.
    #[serde(default)]
    pub strong_areas: Vec<String>,
    /// Challenge key → pending interactive exchange.
    #[serde(default)]
    pub active_challenges: BTreeMap<String, ChallengeEntry>,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub assessment_state: Option<AssessmentSnapshot>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            mastery: 0.0,
            topics: BTreeMap::new(),
            weak_areas: Vec::new(),
            strong_areas: Vec::new(),
            active_challenges: BTreeMap::new(),
            mode: default_mode(),
            assessment_state: None,
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Topic {
    /// Opaque id, generated once and never reassigned.
    pub topic_id: String,
    pub name: String,
    #[serde(default)]
    pub parent_topic_id: Option<String>,
    /// Short summary of the explanation that created the topic.
    #[serde(default)]
    pub explanation_summary: String,
    #[serde(default)]
    pub mastery_score: f64,
    /// Signed so that a corrupted document still deserializes and can be reported.
    #[serde(default)]
    pub questions_attempted: i64,
    #[serde(default)]
    pub correct_answers: i64,
    #[serde(default)]
    pub last_assessed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub classification: Classification,
    #[serde(default)]
    pub result_history: Vec<ResultRecord>,
}

impl Topic {
    pub fn new(topic_id: String, name: String) -> Self {
        Self {
            topic_id,
            name,
            parent_topic_id: None,
            explanation_summary: String::new(),
            mastery_score: 0.0,
            questions_attempted: 0,
            correct_answers: 0,
            last_assessed: None,
            classification: Classification::Unassessed,
            result_history: Vec::new(),
        }
    }

    pub fn is_assessed(&self) -> bool {
        self.questions_attempted > 0
    }

    /// Append a graded outcome, dropping the oldest beyond the cap.
    pub fn push_result(&mut self, record: ResultRecord) {
        self.result_history.push(record);
        if self.result_history.len() > RESULT_HISTORY_CAP {
            let overflow = self.result_history.len() - RESULT_HISTORY_CAP;
            self.result_history.drain(..overflow);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    #[default]
    Unassessed,
    Weak,
    Strong,
}

impl Classification {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unassessed => "Unassessed",
            Self::Weak => "Weak",
            Self::Strong => "Strong",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    Mcq,
    Qna,
}

impl ScoreKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mcq => "mcq",
            Self::Qna => "qna",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Correct,
    Incorrect,
}

impl AnswerOutcome {
    pub const fn is_correct(self) -> bool {
        matches!(self, Self::Correct)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResultRecord {
    pub result: AnswerOutcome,
    pub score_type: ScoreKind,
    pub timestamp: DateTime<Utc>,
}

/// Progress of a multi-question assessment run. Validated, but only
/// written by the assessment panel flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AssessmentSnapshot {
    #[serde(default)]
    pub total_questions: i64,
    #[serde(default)]
    pub current_question_index: i64,
    #[serde(default)]
    pub answered_questions: Vec<i64>,
    #[serde(default)]
    pub unanswered_questions: Vec<i64>,
    /// Question index → learner answer.
    #[serde(default)]
    pub user_answers: BTreeMap<i64, String>,
    #[serde(default)]
    pub correct_answers: i64,
    #[serde(default)]
    pub incorrect_answers: i64,
    #[serde(default)]
    pub submitted: bool,
    #[serde(default)]
    pub evaluated: bool,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

impl UserProfile {
    /// Decode a stored document, upgrading legacy shapes first.
    ///
    /// A document that still does not fit the typed model is reported as
    /// corruption rather than replaced: the caller routes it to recovery.
    pub fn from_document(document: Value) -> Result<Self, TutorError> {
        let migrated = migrate(document);
        serde_json::from_value(migrated).map_err(|err| TutorError::StateCorruption {
            violations: vec![format!("Profile document could not be decoded: {err}")],
        })
    }

    pub fn to_document(&self) -> Result<Value, TutorError> {
        serde_json::to_value(self).map_err(|err| TutorError::StorageFailure {
            operation: "encode_profile".to_string(),
            attempts: 0,
            message: err.to_string(),
        })
    }

    /// Mean mastery over topics with at least one attempt; unassessed topics
    /// do not pull the average down.
    pub fn overall_mastery(&self) -> f64 {
        let assessed: Vec<f64> = self
            .topics
            .values()
            .filter(|t| t.is_assessed())
            .map(|t| t.mastery_score)
            .collect();
        if assessed.is_empty() {
            return 0.0;
        }
        round_score(assessed.iter().sum::<f64>() / assessed.len() as f64)
    }

    /// Called by the store immediately before every write.
    pub fn prepare_for_save(&mut self, now: DateTime<Utc>) {
        self.mastery = self.overall_mastery();
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        self.schema_version = CURRENT_SCHEMA_VERSION;
    }

    pub fn topic_ids(&self) -> HashSet<&str> {
        self.topics.values().map(|t| t.topic_id.as_str()).collect()
    }

    pub fn topic_by_id(&self, topic_id: &str) -> Option<&Topic> {
        self.topics.values().find(|t| t.topic_id == topic_id)
    }
}

/// Upgrade a raw document to [`CURRENT_SCHEMA_VERSION`].
///
/// Only shape changes happen here. Derived fields are left untouched so that
/// an inconsistent legacy document still fails validation after loading.
pub fn migrate(document: Value) -> Value {
    let Value::Object(mut root) = document else {
        return document;
    };

    let version = root
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if version >= u64::from(CURRENT_SCHEMA_VERSION) {
        return Value::Object(root);
    }

    for field in LEGACY_TOP_LEVEL_FIELDS {
        root.remove(*field);
    }
    epoch_to_rfc3339(root.get_mut("created_at"));

    if let Some(Value::Object(topics)) = root.get_mut("topics") {
        for (key, topic) in topics.iter_mut() {
            let Value::Object(fields) = topic else {
                continue;
            };
            for field in LEGACY_TOPIC_FIELDS {
                fields.remove(*field);
            }
            // Legacy topics without an id were addressed by their key.
            if !fields.contains_key("topic_id") {
                fields.insert("topic_id".to_string(), Value::String(key.clone()));
            }
            if !fields.contains_key("name") {
                fields.insert("name".to_string(), Value::String(key.clone()));
            }
            epoch_to_rfc3339(fields.get_mut("last_assessed"));
            if let Some(Value::Array(history)) = fields.get_mut("result_history") {
                for record in history.iter_mut() {
                    if let Value::Object(record) = record {
                        epoch_to_rfc3339(record.get_mut("timestamp"));
                    }
                }
            }
        }
    }

    if let Some(Value::Object(challenges)) = root.get_mut("active_challenges") {
        for (key, entry) in challenges.iter_mut() {
            wrap_legacy_challenge(key, entry);
        }
    }

    if let Some(Value::Object(assessment)) = root.get_mut("assessment_state") {
        // Legacy snapshots kept the generated questions inline.
        assessment.remove("questions");
    }

    root.insert(
        "schema_version".to_string(),
        Value::from(CURRENT_SCHEMA_VERSION),
    );
    Value::Object(root)
}

/// Legacy challenges were bare payloads; the kind was only encoded in the key.
fn wrap_legacy_challenge(key: &str, entry: &mut Value) {
    let Value::Object(fields) = entry else {
        return;
    };
    if fields.contains_key("challenge") {
        return;
    }
    let mut payload: Map<String, Value> = std::mem::take(fields);
    if !payload.contains_key("type") {
        let inferred = if key.starts_with("confirm_topic_") {
            "topic_confirmation"
        } else if key.starts_with("mcq_") {
            "mcq_pending"
        } else if key.starts_with("qna_") {
            "qna_pending"
        } else {
            "unknown"
        };
        payload.insert("type".to_string(), Value::String(inferred.to_string()));
    }
    fields.insert("challenge".to_string(), Value::Object(payload));
    fields.insert("opened_at".to_string(), Value::Null);
}

fn epoch_to_rfc3339(slot: Option<&mut Value>) {
    let Some(slot) = slot else {
        return;
    };
    let Some(seconds) = slot.as_f64() else {
        return;
    };
    let millis = (seconds * 1000.0).round() as i64;
    if let Some(ts) = Utc.timestamp_millis_opt(millis).single() {
        *slot = Value::String(ts.to_rfc3339());
    }
}
