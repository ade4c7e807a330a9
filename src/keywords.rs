//! # Keyword Responder
//! Small-talk shortcut: scores the message against keyword categories and
//! answers from a canned response pool, keeping trivial greetings away from
//! the conversation backend.
//!
//! A category's score is the fraction of its keywords present in the
//! message, with a fuzzy fallback for near-miss spellings.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;
use tracing::debug;

use crate::defaults;
use crate::matcher::{contains, normalize};
use crate::picker::ResponsePicker;
use crate::store::ConfigStore;

pub const KEYWORD_CONFIG_KEY: &str = "keyword_response_config";

/// Similarity floor for counting a keyword as a fuzzy hit against the whole
/// message. Catches short typo'd greetings without firing on long text.
const FUZZY_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordCategory {
    pub id: String,
    pub name: String,
    pub keywords: Vec<String>,
    pub responses: Vec<String>,
    /// Minimum matched fraction of `keywords` for the category to qualify.
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordConfig {
    pub enabled: bool,
    /// Ordered; ties between equal scores go to the earlier category.
    pub categories: Vec<KeywordCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordMatch {
    pub matched: bool,
    pub category: Option<String>,
    pub score: f64,
    pub response: Option<String>,
}

impl KeywordMatch {
    fn miss() -> Self {
        Self {
            matched: false,
            category: None,
            score: 0.0,
            response: None,
        }
    }
}

pub struct KeywordResponder {
    config: Arc<ConfigStore>,
    picker: Arc<dyn ResponsePicker>,
}

impl KeywordResponder {
    pub fn new(config: Arc<ConfigStore>, picker: Arc<dyn ResponsePicker>) -> Self {
        Self { config, picker }
    }

    pub fn current_config(&self) -> KeywordConfig {
        self.config
            .get_or_default(KEYWORD_CONFIG_KEY, defaults::keyword_config)
    }

    pub fn replace_config(&self, cfg: &KeywordConfig) -> anyhow::Result<()> {
        self.config.replace(KEYWORD_CONFIG_KEY, cfg)
    }

    pub fn set_enabled(&self, enabled: bool) -> anyhow::Result<KeywordConfig> {
        let mut cfg = self.current_config();
        cfg.enabled = enabled;
        self.replace_config(&cfg)?;
        Ok(cfg)
    }

    pub fn respond(&self, message: &str) -> KeywordMatch {
        let cfg = self.current_config();
        if !cfg.enabled || message.trim().is_empty() {
            return KeywordMatch::miss();
        }

        let mut best: Option<(&KeywordCategory, f64)> = None;
        for category in &cfg.categories {
            let score = category_score(message, category);
            if score < category.threshold || score <= 0.0 {
                continue;
            }
            // Strictly-greater keeps the earlier category on ties.
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((category, score));
            }
        }

        let Some((category, score)) = best else {
            return KeywordMatch::miss();
        };
        debug!(category = %category.id, score, "keyword category matched");
        KeywordMatch {
            matched: true,
            category: Some(category.id.clone()),
            score,
            response: self.picker.pick(&category.responses).map(str::to_string),
        }
    }
}

fn category_score(message: &str, category: &KeywordCategory) -> f64 {
    if category.keywords.is_empty() {
        return 0.0;
    }
    let hits = category
        .keywords
        .iter()
        .filter(|k| keyword_hits(message, k))
        .count();
    hits as f64 / category.keywords.len() as f64
}

fn keyword_hits(message: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    if contains(message, keyword) {
        return true;
    }
    // Fuzzy path sees the same normalized text as the substring path.
    let keyword = normalize(keyword);
    let message = normalize(message);
    !keyword.is_empty() && normalized_levenshtein(&keyword, &message) >= FUZZY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picker::FixedPicker;

    fn responder_with(categories: Vec<KeywordCategory>) -> KeywordResponder {
        let r = KeywordResponder::new(
            Arc::new(ConfigStore::in_memory()),
            Arc::new(FixedPicker(0)),
        );
        r.replace_config(&KeywordConfig {
            enabled: true,
            categories,
        })
        .unwrap();
        r
    }

    fn category(id: &str, keywords: &[&str], threshold: f64) -> KeywordCategory {
        KeywordCategory {
            id: id.to_string(),
            name: id.to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            responses: vec![format!("{id}-reply")],
            threshold,
        }
    }

    #[test]
    fn half_of_two_keywords_meets_half_threshold() {
        let r = responder_with(vec![category("greeting", &["你好", "嗨"], 0.5)]);
        let m = r.respond("嗨");
        assert!(m.matched);
        assert_eq!(m.category.as_deref(), Some("greeting"));
        assert_eq!(m.score, 0.5);
        assert_eq!(m.response.as_deref(), Some("greeting-reply"));
    }

    #[test]
    fn below_threshold_is_a_miss() {
        let r = responder_with(vec![category("greeting", &["你好", "嗨", "早安", "午安"], 0.5)]);
        let m = r.respond("嗨");
        assert!(!m.matched);
        assert!(m.response.is_none());
    }

    #[test]
    fn best_score_wins_over_earlier_category() {
        let r = responder_with(vec![
            category("thanks", &["謝謝", "感恩"], 0.4),
            category("greeting", &["你好"], 0.4),
        ]);
        let m = r.respond("你好");
        assert_eq!(m.category.as_deref(), Some("greeting"));
        assert_eq!(m.score, 1.0);
    }

    #[test]
    fn tie_goes_to_earlier_category() {
        let r = responder_with(vec![
            category("a", &["你好"], 0.4),
            category("b", &["你好"], 0.4),
        ]);
        let m = r.respond("你好");
        assert_eq!(m.category.as_deref(), Some("a"));
    }

    #[test]
    fn fuzzy_match_catches_near_miss() {
        // One dropped letter out of twelve keeps similarity above the floor.
        let r = responder_with(vec![category("function", &["capabilities"], 0.5)]);
        let m = r.respond("capabilitie");
        assert!(m.matched, "score {}", m.score);
    }

    #[test]
    fn fuzzy_match_ignores_case_and_padding() {
        let r = responder_with(vec![category("function", &["capabilities"], 0.5)]);
        let m = r.respond("  Capabilitie ");
        assert!(m.matched, "score {}", m.score);
    }

    #[test]
    fn disabled_responder_is_inert() {
        let r = responder_with(vec![category("greeting", &["你好"], 0.1)]);
        let mut cfg = r.current_config();
        cfg.enabled = false;
        r.replace_config(&cfg).unwrap();
        assert!(!r.respond("你好").matched);
    }

    #[test]
    fn empty_message_is_a_miss() {
        let r = responder_with(vec![category("greeting", &["你好"], 0.1)]);
        assert!(!r.respond("   ").matched);
    }
}
