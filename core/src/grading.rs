//! Local grading helpers that run before any collaborator is asked.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

static SINGLE_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{3,}$").expect("single word regex must compile"));

static SHORT_GROUPS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]{1,3}(\s+[a-z]{1,3}){0,5}$").expect("short group regex must compile")
});

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z]{3,}").expect("word regex must compile"));

const FILLER_WORDS: &[&str] = &[
    "asdf", "qwerty", "zxcv", "aaa", "bbb", "ccc", "xxx", "yyy", "zzz", "test", "testing123",
];

/// True when an open answer carries no gradable content. Such answers score
/// zero without reaching the evaluator.
pub fn is_gibberish_answer(answer: &str) -> bool {
    let cleaned = answer.trim();
    let len = cleaned.chars().count();
    if len < 3 {
        return true;
    }

    let letters = cleaned.chars().filter(|c| c.is_alphabetic()).count();
    if (letters as f64) / (len as f64) < 0.5 {
        return true;
    }

    let lowered = cleaned.to_lowercase();
    // A lone word is not an explanation, even a real one.
    if SINGLE_WORD_RE.is_match(&lowered) || SHORT_GROUPS_RE.is_match(&lowered) {
        return true;
    }
    if !lowered.chars().any(|c| c.is_ascii_alphabetic()) {
        return true;
    }
    if is_repeated_unit(&lowered) {
        return true;
    }

    let words: Vec<String> = WORD_RE
        .find_iter(cleaned)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if words.is_empty() {
        return true;
    }
    words.iter().all(|word| FILLER_WORDS.contains(&word.as_str()))
}

/// "ababab", "xxx": one or two characters repeated at least three times.
fn is_repeated_unit(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    (1..=2).any(|unit| {
        chars.len() >= unit * 3
            && chars.len() % unit == 0
            && chars.chunks(unit).all(|chunk| chunk == &chars[..unit])
    })
}

/// Question difficulty for a given mastery score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Developing,
    Proficient,
    Mastery,
}

impl Difficulty {
    pub fn for_mastery(mastery: f64) -> Self {
        if mastery >= 0.9 {
            Self::Mastery
        } else if mastery >= 0.7 {
            Self::Proficient
        } else if mastery >= 0.4 {
            Self::Developing
        } else {
            Self::Beginner
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Developing => "developing",
            Self::Proficient => "proficient",
            Self::Mastery => "mastery",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_short_answers_are_gibberish() {
        assert!(is_gibberish_answer(""));
        assert!(is_gibberish_answer("   "));
        assert!(is_gibberish_answer("ok"));
    }

    #[test]
    fn symbol_heavy_and_mashed_answers_are_gibberish() {
        assert!(is_gibberish_answer("12345!!"));
        assert!(is_gibberish_answer("asdfgh"));
        assert!(is_gibberish_answer("ab cd ef"));
        assert!(is_gibberish_answer("abababab"));
        assert!(is_gibberish_answer("test test"));
    }

    #[test]
    fn single_word_answers_are_not_graded() {
        assert!(is_gibberish_answer("chlorophyll"));
        assert!(is_gibberish_answer("  Chlorophyll "));
        assert!(!is_gibberish_answer("chlorophyll absorbs light"));
    }

    #[test]
    fn real_sentences_are_not_gibberish() {
        assert!(!is_gibberish_answer(
            "Plants convert light energy into chemical energy stored in glucose."
        ));
        assert!(!is_gibberish_answer("It uses a stack"));
    }

    #[test]
    fn difficulty_tiers_follow_mastery() {
        assert_eq!(Difficulty::for_mastery(0.0), Difficulty::Beginner);
        assert_eq!(Difficulty::for_mastery(0.39), Difficulty::Beginner);
        assert_eq!(Difficulty::for_mastery(0.4), Difficulty::Developing);
        assert_eq!(Difficulty::for_mastery(0.75), Difficulty::Proficient);
        assert_eq!(Difficulty::for_mastery(0.9), Difficulty::Mastery);
    }
}
