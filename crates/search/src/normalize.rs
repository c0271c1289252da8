//! Query normalization.
//!
//! The same tokenizer runs over product fields when the index is built, so a
//! query token and an index term compare equal exactly when they should.

use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Split text into lower-cased alphanumeric tokens.
///
/// Word boundaries follow Unicode segmentation; punctuation inside a word
/// (hyphens, apostrophes, decimal points) splits it further.
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words()
        .flat_map(|word| word.split(|c: char| !c.is_alphanumeric()))
        .map(|part| {
            part.chars()
                .flat_map(char::to_lowercase)
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|part| !part.is_empty())
        .collect()
}

/// A validated, tokenized query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedQuery {
    /// Original text, trimmed, for display and logging
    pub display: String,
    /// Lower-cased tokens in query order
    pub tokens: Vec<String>,
}

impl NormalizedQuery {
    /// Tokens joined by single spaces; equal for queries that differ only in
    /// case, punctuation or spacing.
    pub fn canonical(&self) -> String {
        self.tokens.join(" ")
    }

    /// Tokens long enough to take part in term scoring.
    pub fn scoring_tokens(&self, min_len: usize) -> impl Iterator<Item = &str> {
        self.tokens
            .iter()
            .map(String::as_str)
            .filter(move |t| t.chars().count() >= min_len)
    }
}

/// Validates and tokenizes raw query text.
#[derive(Debug, Clone)]
pub struct QueryNormalizer {
    max_length: usize,
}

impl QueryNormalizer {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Normalize raw query text.
    ///
    /// Fails with `InvalidQuery` when the trimmed text is empty, longer than
    /// the configured maximum, or contains nothing searchable.
    pub fn normalize(&self, raw: &str) -> Result<NormalizedQuery> {
        let display = raw.trim();
        if display.is_empty() {
            return Err(SearchError::invalid_query("query is empty"));
        }

        let length = display.chars().count();
        if length > self.max_length {
            return Err(SearchError::invalid_query(format!(
                "query is {length} characters long; the maximum is {}",
                self.max_length
            )));
        }

        let tokens = tokenize(display);
        if tokens.is_empty() {
            return Err(SearchError::invalid_query("query contains no searchable terms"));
        }

        Ok(NormalizedQuery {
            display: display.to_string(),
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tokenize_lowercases_and_strips_punctuation() {
        assert_eq!(tokenize("Gaming Laptop, 16GB!"), vec!["gaming", "laptop", "16gb"]);
    }

    #[test]
    fn test_tokenize_splits_inner_punctuation() {
        assert_eq!(tokenize("USB-C charger"), vec!["usb", "c", "charger"]);
        assert_eq!(tokenize("15.6\" screen"), vec!["15", "6", "screen"]);
    }

    #[test]
    fn test_tokenize_unicode() {
        assert_eq!(tokenize("Café Crème"), vec!["café", "crème"]);
    }

    #[test]
    fn test_normalize_trims_for_display() {
        let q = QueryNormalizer::new(500).normalize("  Laptop Bag  ").unwrap();
        assert_eq!(q.display, "Laptop Bag");
        assert_eq!(q.canonical(), "laptop bag");
    }

    #[test]
    fn test_empty_query_rejected() {
        let err = QueryNormalizer::new(500).normalize("   ").unwrap_err();
        assert_eq!(err.code(), "INVALID_QUERY");
    }

    #[test]
    fn test_too_long_query_rejected() {
        let normalizer = QueryNormalizer::new(10);
        assert!(normalizer.normalize("0123456789").is_ok());
        assert!(normalizer.normalize("0123456789a").is_err());
    }

    #[test]
    fn test_punctuation_only_query_rejected() {
        assert!(QueryNormalizer::new(500).normalize("?!...").is_err());
    }

    #[test]
    fn test_short_tokens_kept_but_not_scored() {
        let q = QueryNormalizer::new(500).normalize("usb c hub").unwrap();
        assert_eq!(q.tokens, vec!["usb", "c", "hub"]);
        let scoring: Vec<&str> = q.scoring_tokens(2).collect();
        assert_eq!(scoring, vec!["usb", "hub"]);
    }

    proptest! {
        #[test]
        fn prop_tokens_are_alphanumeric(text in "\\PC{0,64}") {
            for token in tokenize(&text) {
                prop_assert!(!token.is_empty());
                prop_assert!(token.chars().all(char::is_alphanumeric));
            }
        }

        #[test]
        fn prop_ascii_tokens_are_lowercase(text in "[ -~]{0,64}") {
            for token in tokenize(&text) {
                prop_assert!(!token.chars().any(|c| c.is_ascii_uppercase()));
            }
        }

        #[test]
        fn prop_canonical_is_case_insensitive(text in "[a-zA-Z ]{1,40}") {
            let normalizer = QueryNormalizer::new(500);
            if let (Ok(a), Ok(b)) = (normalizer.normalize(&text), normalizer.normalize(&text.to_uppercase())) {
                prop_assert_eq!(a.canonical(), b.canonical());
            }
        }
    }
}
