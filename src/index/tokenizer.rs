// Text Tokenization
//
// Turns free text into index terms: lowercase, split on non-alphanumeric
// boundaries, drop short tokens and stopwords. Duplicates are preserved so
// term frequencies stay accurate; the caller deduplicates when it needs a
// term set.

use super::stopwords::DEFAULT_STOPWORDS;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct Tokenizer {
    stopwords: HashSet<String>,
}

impl Tokenizer {
    /// Tokenizer with the built-in English + Spanish stopword set.
    pub fn new() -> Self {
        Self {
            stopwords: DEFAULT_STOPWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Tokenizer with a caller-supplied stopword list.
    pub fn with_stopwords(stopwords: impl IntoIterator<Item = String>) -> Self {
        Self {
            stopwords: stopwords.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// Tokenize text into terms; output order follows the input and
    /// duplicates are kept.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|raw| !raw.is_empty())
            .map(|raw| raw.to_lowercase())
            .filter(|token| token.chars().count() >= 2)
            .filter(|token| !self.stopwords.contains(token))
            .collect()
    }

    /// Distinct terms of a text, for directory updates and AND-queries.
    pub fn unique_terms(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tokenize(text)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }

    pub fn is_stopword(&self, token: &str) -> bool {
        self.stopwords.contains(token)
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}
