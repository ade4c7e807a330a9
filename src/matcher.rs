//! # Pattern Matcher
//! Shared text-matching primitives used by every detector: lowercase
//! normalization, case-insensitive containment, and compiled pattern sets.
//!
//! A `PatternSet` is built from configured pattern strings. Each entry is
//! compiled as a case-insensitive, unanchored regex; entries that fail to
//! compile degrade to plain substring containment so a bad admin edit never
//! disables the whole rule.

use regex::{Regex, RegexBuilder};
use tracing::warn;

/// Lowercase (ASCII) and collapse runs of whitespace to a single space.
/// Han characters pass through unchanged, which is what the detectors need.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        let lc = ch.to_ascii_lowercase();
        if lc.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(lc);
            last_space = false;
        }
    }
    out.trim().to_string()
}

/// Case/whitespace-insensitive containment over normalized text.
pub fn contains(text: &str, pat: &str) -> bool {
    let t = normalize(text);
    let p = normalize(pat);
    if p.is_empty() {
        return true;
    }
    t.contains(p.as_str())
}

#[derive(Debug)]
enum Compiled {
    Regex(Regex),
    /// Fallback for patterns that do not compile: normalized literal.
    Literal(String),
}

/// A list of patterns compiled once and matched many times.
#[derive(Debug, Default)]
pub struct PatternSet {
    entries: Vec<Compiled>,
}

impl PatternSet {
    pub fn compile(patterns: &[String]) -> Self {
        let mut entries = Vec::with_capacity(patterns.len());
        for pat in patterns {
            match RegexBuilder::new(pat).case_insensitive(true).build() {
                Ok(re) => entries.push(Compiled::Regex(re)),
                Err(_) => {
                    warn!(pattern_len = pat.chars().count(), "pattern failed to compile, using literal match");
                    entries.push(Compiled::Literal(normalize(pat)));
                }
            }
        }
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if any pattern matches anywhere in `text`.
    pub fn is_match(&self, text: &str) -> bool {
        let normalized = normalize(text);
        self.entries.iter().any(|e| match e {
            Compiled::Regex(re) => re.is_match(text),
            Compiled::Literal(lit) => !lit.is_empty() && normalized.contains(lit.as_str()),
        })
    }

    /// All matched substrings, deduplicated, in first-seen order.
    pub fn find_matches(&self, text: &str) -> Vec<String> {
        let normalized = normalize(text);
        let mut out: Vec<String> = Vec::new();
        for e in &self.entries {
            match e {
                Compiled::Regex(re) => {
                    for m in re.find_iter(text) {
                        let s = m.as_str().to_string();
                        if !s.is_empty() && !out.contains(&s) {
                            out.push(s);
                        }
                    }
                }
                Compiled::Literal(lit) => {
                    if !lit.is_empty() && normalized.contains(lit.as_str()) && !out.contains(lit) {
                        out.push(lit.clone());
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        assert_eq!(normalize("  Hello\t WORLD "), "hello world");
        assert_eq!(normalize("你好  世界"), "你好 世界");
    }

    #[test]
    fn contains_is_case_insensitive() {
        assert!(contains("POLICY   EASING confirmed", "policy easing"));
        assert!(contains("我想死", "想死"));
        assert!(!contains("hello", "bye"));
    }

    #[test]
    fn pattern_set_matches_regex_and_cjk() {
        let set = PatternSet::compile(&["想死".to_string(), r"\burgent\b".to_string()]);
        assert!(set.is_match("我想死，因為投資失敗"));
        assert!(set.is_match("This is URGENT business"));
        assert!(!set.is_match("nothing here"));
    }

    #[test]
    fn bad_pattern_falls_back_to_literal() {
        let set = PatternSet::compile(&["((unclosed".to_string()]);
        assert!(set.is_match("look ((unclosed here"));
        assert!(!set.is_match("clean"));
    }

    #[test]
    fn find_matches_dedupes() {
        let set = PatternSet::compile(&["投資".to_string(), "保證".to_string()]);
        let hits = set.find_matches("投資保證獲利，快來投資");
        assert_eq!(hits, vec!["投資".to_string(), "保證".to_string()]);
    }
}
