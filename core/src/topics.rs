//! Topic creation, lookup and derived-state maintenance within a loaded profile.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::TutorError;
use crate::mastery::{classify, derive_mastery};
use crate::profile::{Classification, Topic, UserProfile};

pub const TOPIC_NAME_MIN_LEN: usize = 3;
pub const TOPIC_NAME_MAX_LEN: usize = 50;

/// Explanation summaries are clipped to this many characters.
pub const SUMMARY_MAX_CHARS: usize = 200;

static TOPIC_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9 \-&]+$").expect("topic name regex must compile")
});

pub fn validate_topic_name(name: &str) -> Result<(), TutorError> {
    let len = name.chars().count();
    if !(TOPIC_NAME_MIN_LEN..=TOPIC_NAME_MAX_LEN).contains(&len) {
        return Err(TutorError::validation(
            format!(
                "Topic name must be between {TOPIC_NAME_MIN_LEN} and {TOPIC_NAME_MAX_LEN} characters."
            ),
            "name",
        ));
    }
    if !TOPIC_NAME_RE.is_match(name) {
        return Err(TutorError::validation(
            "Topic name may only contain letters, digits, spaces, '-' and '&'.",
            "name",
        ));
    }
    Ok(())
}

/// Map key of the topic whose name matches case-insensitively.
pub fn find_topic_key<'a>(profile: &'a UserProfile, name: &str) -> Option<&'a str> {
    let needle = name.trim().to_lowercase();
    profile
        .topics
        .iter()
        .find(|(key, topic)| topic.name.to_lowercase() == needle || key.to_lowercase() == needle)
        .map(|(key, _)| key.as_str())
}

pub fn find_topic<'a>(profile: &'a UserProfile, name: &str) -> Option<&'a Topic> {
    find_topic_key(profile, name).and_then(|key| profile.topics.get(key))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicInsert {
    /// Key of the topic in [`UserProfile::topics`].
    pub key: String,
    pub topic: Topic,
    pub created: bool,
}

/// Add a topic, or return the existing one if the name is already known
/// (case-insensitive). An existing topic is returned unchanged.
pub fn add_topic(
    profile: &mut UserProfile,
    name: &str,
    parent_topic_id: Option<String>,
    explanation_summary: Option<String>,
) -> Result<TopicInsert, TutorError> {
    validate_topic_name(name)?;

    if let Some(key) = find_topic_key(profile, name) {
        let key = key.to_string();
        let topic = profile.topics[&key].clone();
        return Ok(TopicInsert {
            key,
            topic,
            created: false,
        });
    }

    let mut topic = Topic::new(Uuid::now_v7().to_string(), name.to_string());
    topic.parent_topic_id = parent_topic_id;
    topic.explanation_summary = explanation_summary
        .map(|s| clip_summary(&s))
        .unwrap_or_default();
    profile.topics.insert(name.to_string(), topic);
    recompute_derived(profile, name);

    Ok(TopicInsert {
        key: name.to_string(),
        topic: profile.topics[name].clone(),
        created: true,
    })
}

/// Fields a caller may merge into an existing topic. Counters and
/// `last_assessed` are not here: only [`crate::mastery::record_result`]
/// writes them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicUpdate {
    /// `Some(None)` clears the parent.
    pub parent_topic_id: Option<Option<String>>,
    pub explanation_summary: Option<String>,
}

pub fn update_topic(
    profile: &mut UserProfile,
    name: &str,
    update: TopicUpdate,
) -> Result<Topic, TutorError> {
    let Some(key) = find_topic_key(profile, name).map(str::to_string) else {
        return Err(TutorError::missing_context(
            format!("Topic '{name}' has not been explained yet."),
            &["topic"],
        ));
    };
    if let Some(topic) = profile.topics.get_mut(&key) {
        if let Some(parent) = update.parent_topic_id {
            topic.parent_topic_id = parent;
        }
        if let Some(summary) = update.explanation_summary {
            topic.explanation_summary = clip_summary(&summary);
        }
    }
    recompute_derived(profile, &key);
    Ok(profile.topics[&key].clone())
}

/// Recalculate mastery and classification for one topic and move its id into
/// exactly the right one of {weak, strong, neither}.
pub fn recompute_derived(profile: &mut UserProfile, topic_key: &str) {
    let Some(topic) = profile.topics.get_mut(topic_key) else {
        return;
    };
    topic.mastery_score = derive_mastery(topic.questions_attempted, topic.correct_answers);
    topic.classification = classify(topic.questions_attempted, topic.mastery_score);

    let topic_id = topic.topic_id.clone();
    match topic.classification {
        Classification::Strong => {
            insert_once(&mut profile.strong_areas, &topic_id);
            profile.weak_areas.retain(|id| id != &topic_id);
        }
        Classification::Weak => {
            insert_once(&mut profile.weak_areas, &topic_id);
            profile.strong_areas.retain(|id| id != &topic_id);
        }
        Classification::Unassessed => {
            profile.weak_areas.retain(|id| id != &topic_id);
            profile.strong_areas.retain(|id| id != &topic_id);
        }
    }
}

fn insert_once(set: &mut Vec<String>, id: &str) {
    if !set.iter().any(|existing| existing == id) {
        set.push(id.to_string());
    }
}

pub fn clip_summary(text: &str) -> String {
    text.chars().take(SUMMARY_MAX_CHARS).collect()
}
