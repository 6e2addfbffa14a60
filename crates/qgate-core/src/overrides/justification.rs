//! Justification quality gate.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{OverrideError, OverrideResult};

pub const DEFAULT_MIN_LENGTH: usize = 50;
pub const DEFAULT_MIN_DISTINCT_WORDS: usize = 5;

fn word_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\p{Alphabetic}{2,}").expect("Invalid word pattern"))
}

/// Minimum-length and non-empty-reasoning predicate for justifications.
///
/// A justification passes when, after trimming, it is at least
/// `min_length` characters long and contains at least
/// `min_distinct_words` distinct alphabetic words. Padding like
/// `"................"` or `"fix fix fix fix"` fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JustificationPolicy {
    pub min_length: usize,
    pub min_distinct_words: usize,
}

impl Default for JustificationPolicy {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_LENGTH,
            min_distinct_words: DEFAULT_MIN_DISTINCT_WORDS,
        }
    }
}

impl JustificationPolicy {
    pub fn validate(&self, text: &str) -> OverrideResult<()> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(invalid("justification is empty".to_string()));
        }
        let len = trimmed.chars().count();
        if len < self.min_length {
            return Err(invalid(format!(
                "justification is {len} characters; at least {} required",
                self.min_length
            )));
        }
        let words: BTreeSet<String> = word_pattern()
            .find_iter(trimmed)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        if words.len() < self.min_distinct_words {
            return Err(invalid(format!(
                "justification has {} distinct words; at least {} required",
                words.len(),
                self.min_distinct_words
            )));
        }
        Ok(())
    }
}

fn invalid(reason: String) -> OverrideError {
    OverrideError::InvalidJustification { reason }
}
