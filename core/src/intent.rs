//! Intent decisions produced by the classifier, plus the deterministic
//! fallback used when the classifier is unavailable.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const GENERAL_FOCUS: &str = "general";

const AFFIRMATIVE_TOKENS: &[&str] = &["yes", "y", "sure", "correct", "yep", "ok"];

const STOP_WORDS: &[&str] = &[
    "is", "are", "the", "a", "an", "of", "in", "on", "to", "for", "and", "or", "it", "this",
    "that", "can", "you", "me", "please", "what", "how", "why", "does", "do",
];

static QUESTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:what is|what are|what's)\s+(?:a |an |the )?(.+?)(?:\?|$)",
        r"(?:explain|tell me about|describe)\s+(?:a |an |the )?(.+?)(?:\?|$)",
        r"(?:how does|how do|how is)\s+(.+?)(?:\s+work|\?|$)",
        r"(?:why is|why are|why does|why do)\s+(.+?)(?:\?|$)",
        r"(?:can you explain|please explain)\s+(?:a |an |the )?(.+?)(?:\?|$)",
        r"(?:teach me about|learn about)\s+(?:a |an |the )?(.+?)(?:\?|$)",
        r"(?:define|definition of)\s+(?:a |an |the )?(.+?)(?:\?|$)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("question pattern must compile"))
    .collect()
});

static TRAILING_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?.!,;:]+$").expect("punctuation regex must compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    AddTopic,
    ExplainTopic,
    StartAssessment,
    AnswerQuestion,
    GeneralChat,
}

impl Intent {
    /// Unknown labels fall through to general chat.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "add_topic" => Self::AddTopic,
            "explain_topic" | "explain" => Self::ExplainTopic,
            "start_assessment" => Self::StartAssessment,
            "answer_question" => Self::AnswerQuestion,
            _ => Self::GeneralChat,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddTopic => "add_topic",
            Self::ExplainTopic => "explain_topic",
            Self::StartAssessment => "start_assessment",
            Self::AnswerQuestion => "answer_question",
            Self::GeneralChat => "general_chat",
        }
    }
}

/// Classifier output. Every field is optional on the wire; a model that
/// omits fields still yields a usable decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct IntentDecision {
    #[serde(default = "default_intent")]
    pub intent: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_depth")]
    pub depth: String,
    #[serde(default)]
    pub focus_area: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence_level: f64,
    #[serde(default)]
    pub confusion_detected: bool,
    #[serde(default)]
    pub detected_concepts: Vec<String>,
}

fn default_intent() -> String {
    Intent::GeneralChat.as_str().to_string()
}

fn default_strategy() -> String {
    "explain".to_string()
}

fn default_depth() -> String {
    "intermediate".to_string()
}

fn default_confidence() -> f64 {
    0.5
}

impl IntentDecision {
    pub fn intent(&self) -> Intent {
        Intent::parse(&self.intent)
    }

    /// Decision used when the classifier fails: extract a topic from the
    /// message and explain it, otherwise fall back to general chat.
    pub fn fallback(input: &str) -> Self {
        let extracted = extract_topic(input);
        let intent = if extracted.is_some() {
            Intent::ExplainTopic
        } else {
            Intent::GeneralChat
        };
        Self {
            intent: intent.as_str().to_string(),
            strategy: default_strategy(),
            depth: default_depth(),
            focus_area: Some(extracted.clone().unwrap_or_else(|| GENERAL_FOCUS.to_string())),
            confidence_level: default_confidence(),
            confusion_detected: false,
            detected_concepts: extracted.into_iter().collect(),
        }
    }

    /// Fill in a missing or "general" focus from the message itself. A
    /// conversational or explain decision that gains a topic becomes an
    /// explanation; other intents keep their label.
    pub fn normalized(mut self, input: &str) -> Self {
        if self.focus_topic().is_some() {
            return self;
        }
        if let Some(topic) = extract_topic(input) {
            self.focus_area = Some(topic);
            if matches!(self.intent(), Intent::GeneralChat | Intent::ExplainTopic) {
                self.intent = Intent::ExplainTopic.as_str().to_string();
            }
        }
        self
    }

    /// The focus topic, unless absent, blank or the "general" placeholder.
    pub fn focus_topic(&self) -> Option<&str> {
        self.focus_area
            .as_deref()
            .map(str::trim)
            .filter(|focus| !focus.is_empty() && !focus.eq_ignore_ascii_case(GENERAL_FOCUS))
    }
}

/// Pull a topic out of a question such as "what is a binary tree?".
pub fn extract_topic(input: &str) -> Option<String> {
    let lowered = input.trim().to_lowercase();

    for pattern in QUESTION_PATTERNS.iter() {
        let Some(captures) = pattern.captures(&lowered) else {
            continue;
        };
        let Some(raw) = captures.get(1) else {
            continue;
        };
        let topic = TRAILING_PUNCT_RE.replace(raw.as_str().trim(), "");
        let topic = topic.trim();
        let len = topic.chars().count();
        if len > 2 && len <= 50 {
            return Some(if topic.split_whitespace().count() <= 4 {
                title_case(topic)
            } else {
                topic.chars().take(50).collect()
            });
        }
    }

    let looks_like_question = input.contains('?')
        || ["what", "how", "why", "explain", "describe"]
            .iter()
            .any(|lead| lowered.starts_with(lead));
    if !looks_like_question {
        return None;
    }
    let cleaned = lowered.replace('?', "");
    let words: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|word| !STOP_WORDS.contains(word) && word.chars().count() > 2)
        .take(3)
        .collect();
    if words.is_empty() {
        None
    } else {
        Some(title_case(&words.join(" ")))
    }
}

/// Topic named by an add-topic request when the classifier gave none.
pub fn topic_from_add_request(input: &str) -> String {
    let trimmed = input.trim();
    for lead in ["teach me about ", "teach me ", "add topic ", "add "] {
        let matches = trimmed
            .get(..lead.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(lead));
        if let (true, Some(rest)) = (matches, trimmed.get(lead.len()..)) {
            return rest.trim().to_string();
        }
    }
    trimmed.to_string()
}

pub fn is_affirmative(input: &str) -> bool {
    let token = input.trim().to_lowercase();
    AFFIRMATIVE_TOKENS.contains(&token.as_str())
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
