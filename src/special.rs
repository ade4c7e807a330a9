//! # Special Situation Detector
//! Ordered regex rules for safety-critical situations (self-harm crisis,
//! scam victims in distress, group mentions, emotional support).
//!
//! Rules are data, not code: the configured order is a priority list and the
//! first enabled rule with any matching pattern wins outright.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::defaults;
use crate::matcher::PatternSet;
use crate::picker::ResponsePicker;
use crate::store::ConfigStore;

pub const SPECIAL_CONFIG_KEY: &str = "special_response_config";
pub const DEFAULT_LANGUAGE: &str = "zh";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialResponseRule {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Case-insensitive, unanchored regexes; any match selects the rule.
    pub patterns: Vec<String>,
    /// Templates keyed by language code; selection falls back to `zh`.
    pub response_templates: HashMap<String, Vec<String>>,
    pub emergency_level: EmergencyLevel,
    pub action_type: Option<String>,
    /// Skip this rule entirely outside group chats.
    #[serde(default)]
    pub group_only: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialResponseConfig {
    pub system_enabled: bool,
    pub rules: Vec<SpecialResponseRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hotline {
    pub name: String,
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionNeeded {
    #[serde(rename = "type")]
    pub kind: String,
    pub hotlines: Vec<Hotline>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SituationReport {
    pub situation_detected: bool,
    pub situation_type: Option<String>,
    pub response: Option<String>,
    pub emergency_level: EmergencyLevel,
    pub action_needed: Option<ActionNeeded>,
}

impl SituationReport {
    pub fn none() -> Self {
        Self {
            situation_detected: false,
            situation_type: None,
            response: None,
            emergency_level: EmergencyLevel::None,
            action_needed: None,
        }
    }
}

pub struct SpecialSituationDetector {
    config: Arc<ConfigStore>,
    picker: Arc<dyn ResponsePicker>,
    /// Per-rule pattern sets compiled once per config revision.
    compiled: Mutex<Option<(SpecialResponseConfig, Arc<Vec<PatternSet>>)>>,
}

impl SpecialSituationDetector {
    pub fn new(config: Arc<ConfigStore>, picker: Arc<dyn ResponsePicker>) -> Self {
        Self {
            config,
            picker,
            compiled: Mutex::new(None),
        }
    }

    pub fn current_config(&self) -> SpecialResponseConfig {
        self.config
            .get_or_default(SPECIAL_CONFIG_KEY, defaults::special_config)
    }

    pub fn replace_config(&self, cfg: &SpecialResponseConfig) -> anyhow::Result<()> {
        self.config.replace(SPECIAL_CONFIG_KEY, cfg)
    }

    pub fn set_enabled(&self, enabled: bool) -> anyhow::Result<SpecialResponseConfig> {
        let mut cfg = self.current_config();
        cfg.system_enabled = enabled;
        self.replace_config(&cfg)?;
        Ok(cfg)
    }

    pub fn detect(&self, text: &str, is_group: bool, language: &str) -> SituationReport {
        let cfg = self.current_config();
        if !cfg.system_enabled || text.trim().is_empty() {
            return SituationReport::none();
        }

        let sets = self.compiled_for(&cfg);
        for (rule, set) in cfg.rules.iter().zip(sets.iter()) {
            if !rule.enabled {
                continue;
            }
            if rule.group_only && !is_group {
                continue;
            }
            if !set.is_match(text) {
                continue;
            }
            // First enabled matching rule wins; later rules are never consulted.
            info!(rule = %rule.id, level = ?rule.emergency_level, "special situation detected");
            return SituationReport {
                situation_detected: true,
                situation_type: Some(rule.id.clone()),
                response: Some(self.pick_template(rule, language)),
                emergency_level: rule.emergency_level,
                action_needed: action_for(rule.action_type.as_deref()),
            };
        }

        SituationReport::none()
    }

    fn compiled_for(&self, cfg: &SpecialResponseConfig) -> Arc<Vec<PatternSet>> {
        let mut cache = self
            .compiled
            .lock()
            .expect("special pattern cache mutex poisoned");
        match cache.as_ref() {
            Some((cached, sets)) if cached == cfg => sets.clone(),
            _ => {
                let sets: Arc<Vec<PatternSet>> = Arc::new(
                    cfg.rules
                        .iter()
                        .map(|r| PatternSet::compile(&r.patterns))
                        .collect(),
                );
                *cache = Some((cfg.clone(), sets.clone()));
                sets
            }
        }
    }

    fn pick_template(&self, rule: &SpecialResponseRule, language: &str) -> String {
        let templates = rule
            .response_templates
            .get(language)
            .filter(|t| !t.is_empty())
            .or_else(|| rule.response_templates.get(DEFAULT_LANGUAGE));
        templates
            .and_then(|t| self.picker.pick(t))
            .unwrap_or("我已注意到您的情況。有什麼需要我協助的嗎？")
            .to_string()
    }
}

fn action_for(action_type: Option<&str>) -> Option<ActionNeeded> {
    match action_type {
        Some("hotline_referral") => Some(ActionNeeded {
            kind: "hotline_referral".into(),
            hotlines: vec![
                Hotline {
                    name: "自殺防治專線".into(),
                    number: "1925".into(),
                },
                Hotline {
                    name: "關懷專線".into(),
                    number: "1995".into(),
                },
            ],
        }),
        Some("police_report") => Some(ActionNeeded {
            kind: "police_report".into(),
            hotlines: vec![Hotline {
                name: "反詐騙專線".into(),
                number: "165".into(),
            }],
        }),
        _ => None,
    }
}
