//! Read-only projection of a profile for clients.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::mastery::classify;
use crate::profile::{AssessmentSnapshot, Classification, Topic, UserProfile};

/// Weak and strong lists show at most this many entries.
pub const AREA_DISPLAY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AreaEntry {
    pub topic_id: String,
    pub name: String,
    pub mastery_pct: u32,
    pub last_assessed: Option<DateTime<Utc>>,
    pub parent_topic_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AreaList {
    pub areas: Vec<AreaEntry>,
    /// Entries beyond [`AREA_DISPLAY_LIMIT`].
    pub more_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ProfileSummary {
    /// Unassessed, Weak or Strong, from overall mastery.
    pub knowledge_level: String,
    pub mastery: f64,
    /// e.g. "33%"
    pub mastery_display: String,
    pub all_topics: Vec<String>,
    pub weak: AreaList,
    pub strong: AreaList,
    pub mode: String,
    pub assessment_state: Option<AssessmentSnapshot>,
}

impl ProfileSummary {
    pub fn from_profile(profile: &UserProfile) -> Self {
        let mastery = profile.overall_mastery();
        let assessed = profile.topics.values().filter(|t| t.is_assessed()).count();

        let mut weak = area_entries(profile, &profile.weak_areas);
        weak.sort_by_key(|entry| entry.mastery_pct);
        let mut strong = area_entries(profile, &profile.strong_areas);
        strong.sort_by_key(|entry| std::cmp::Reverse(entry.mastery_pct));

        Self {
            knowledge_level: classify(assessed as i64, mastery).label().to_string(),
            mastery,
            mastery_display: format!("{}%", percent(mastery)),
            all_topics: profile.topics.values().map(|t| t.name.clone()).collect(),
            weak: truncate(weak),
            strong: truncate(strong),
            mode: profile.mode.clone(),
            assessment_state: profile.assessment_state.clone(),
        }
    }

    /// Names of strong topics, for prompt context.
    pub fn strong_names(&self) -> Vec<&str> {
        self.strong.areas.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn weak_names(&self) -> Vec<&str> {
        self.weak.areas.iter().map(|a| a.name.as_str()).collect()
    }
}

/// Topic listing used by the topics endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TopicListing {
    pub all: Vec<Topic>,
    pub weak: Vec<Topic>,
    pub strong: Vec<Topic>,
}

impl TopicListing {
    pub fn from_profile(profile: &UserProfile) -> Self {
        let by_class = |class: Classification| {
            profile
                .topics
                .values()
                .filter(|t| t.classification == class)
                .cloned()
                .collect::<Vec<_>>()
        };
        Self {
            all: profile.topics.values().cloned().collect(),
            weak: by_class(Classification::Weak),
            strong: by_class(Classification::Strong),
        }
    }
}

fn area_entries(profile: &UserProfile, ids: &[String]) -> Vec<AreaEntry> {
    ids.iter()
        .filter_map(|id| profile.topic_by_id(id))
        .map(|topic| AreaEntry {
            topic_id: topic.topic_id.clone(),
            name: topic.name.clone(),
            mastery_pct: percent(topic.mastery_score),
            last_assessed: topic.last_assessed,
            parent_topic_id: topic.parent_topic_id.clone(),
        })
        .collect()
}

fn truncate(mut areas: Vec<AreaEntry>) -> AreaList {
    let more_count = areas.len().saturating_sub(AREA_DISPLAY_LIMIT);
    areas.truncate(AREA_DISPLAY_LIMIT);
    AreaList { areas, more_count }
}

fn percent(score: f64) -> u32 {
    (score.clamp(0.0, 1.0) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::mastery::{RawOutcome, ThresholdPolicy, record_result};
    use crate::profile::ScoreKind;

    fn grade(profile: &mut UserProfile, topic: &str, correct: bool) {
        let outcome = RawOutcome::Choice {
            selected: if correct { "A" } else { "B" }.to_string(),
            correct: "A".to_string(),
        };
        record_result(
            profile,
            topic,
            ScoreKind::Mcq,
            &outcome,
            &ThresholdPolicy::default(),
            Utc::now(),
        )
        .expect("record");
    }

    #[test]
    fn empty_profile_is_unassessed() {
        let summary = ProfileSummary::from_profile(&UserProfile::default());
        assert_eq!(summary.knowledge_level, "Unassessed");
        assert_eq!(summary.mastery_display, "0%");
        assert!(summary.all_topics.is_empty());
    }

    #[test]
    fn weak_list_is_capped_with_more_count() {
        let mut profile = UserProfile::default();
        for i in 0..12 {
            grade(&mut profile, &format!("Weak Topic {i:02}"), false);
        }
        grade(&mut profile, "Strong Topic", true);

        let summary = ProfileSummary::from_profile(&profile);
        assert_eq!(summary.weak.areas.len(), AREA_DISPLAY_LIMIT);
        assert_eq!(summary.weak.more_count, 2);
        assert_eq!(summary.strong_names(), vec!["Strong Topic"]);
        assert_eq!(summary.all_topics.len(), 13);
        // 1.0 / 13 topics
        assert_eq!(summary.mastery_display, "8%");
        assert_eq!(summary.knowledge_level, "Weak");
    }

    #[test]
    fn strong_entries_sort_by_highest_mastery() {
        let mut profile = UserProfile::default();
        grade(&mut profile, "Half Known", true);
        grade(&mut profile, "Half Known", false);
        grade(&mut profile, "Fully Known", true);

        let summary = ProfileSummary::from_profile(&profile);
        assert_eq!(summary.strong_names(), vec!["Fully Known", "Half Known"]);
        assert_eq!(summary.strong.areas[1].mastery_pct, 50);

        let listing = TopicListing::from_profile(&profile);
        assert_eq!(listing.all.len(), 2);
        assert_eq!(listing.strong.len(), 2);
        assert!(listing.weak.is_empty());
    }
}
