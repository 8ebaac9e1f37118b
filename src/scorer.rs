//! Lexical relevance between free text and a report's keyword set.
//!
//! Containment catches multi-word phrases but over-matches short keywords
//! hidden inside longer words; token overlap is strict but never matches a
//! phrase. Both are kept and selected by configuration.

use crate::config::ScoringMode;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn word_regex() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\w+").expect("word pattern is valid"))
}

/// Case-fold text the same way keywords are folded at catalog load
pub fn fold(text: &str) -> String {
    text.to_lowercase()
}

/// Split folded text into its set of word tokens
pub fn tokenize(text: &str) -> HashSet<String> {
    PreparedText::new(text).tokens
}

/// Text folded and tokenized once, then scored against many keyword sets
#[derive(Debug, Clone)]
pub struct PreparedText {
    folded: String,
    tokens: HashSet<String>,
}

impl PreparedText {
    pub fn new(text: &str) -> Self {
        let folded = fold(text);
        let tokens = word_regex()
            .find_iter(&folded)
            .map(|m| m.as_str().to_string())
            .collect();
        Self { folded, tokens }
    }

    pub fn folded(&self) -> &str {
        &self.folded
    }

    pub fn tokens(&self) -> &HashSet<String> {
        &self.tokens
    }
}

/// Keyword scorer for one configured mode
#[derive(Debug, Clone, Copy, Default)]
pub struct Scorer {
    mode: ScoringMode,
}

impl Scorer {
    pub fn new(mode: ScoringMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ScoringMode {
        self.mode
    }

    /// Score raw text against keywords
    pub fn score(&self, text: &str, keywords: &[String]) -> u32 {
        self.score_prepared(&PreparedText::new(text), keywords)
    }

    /// Score already-prepared text; each distinct keyword counts at most once
    pub fn score_prepared(&self, text: &PreparedText, keywords: &[String]) -> u32 {
        let mut seen: HashSet<&str> = HashSet::new();
        keywords
            .iter()
            .map(|k| k.as_str())
            .filter(|k| !k.is_empty() && seen.insert(*k))
            .filter(|k| {
                let keyword = fold(k);
                match self.mode {
                    ScoringMode::Containment => text.folded.contains(&keyword),
                    ScoringMode::TokenOverlap => text.tokens.contains(&keyword),
                }
            })
            .count() as u32
    }
}
