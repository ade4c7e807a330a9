//! # Abuse Detector
//! Flags hostile messages, escalates a per-user violation count, and maps
//! the count to a block duration through configured buckets.
//!
//! A user who is still inside an active block gets the block reported back
//! without a further violation increment.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::defaults;
use crate::matcher::contains;
use crate::picker::ResponsePicker;
use crate::ratelimit::format_duration;
use crate::store::ConfigStore;

pub const ABUSE_CONFIG_KEY: &str = "abuse_protection_config";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbuseConfig {
    pub enabled: bool,
    pub sensitive_words: Vec<String>,
    /// Violation count at which warnings turn into blocks. A threshold of 1
    /// means the first violation already blocks.
    pub warn_threshold: u32,
    /// Bucket key (stringified violation count, optionally with a trailing
    /// `+`) to block duration in seconds.
    pub block_durations: HashMap<String, u64>,
    #[serde(default)]
    pub warn_messages: Vec<String>,
    /// `{duration}` is replaced with a formatted duration.
    #[serde(default)]
    pub block_messages: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbuseAction {
    None,
    Warn,
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbuseVerdict {
    pub is_abusive: bool,
    pub action: AbuseAction,
    pub block_duration: u64,
    pub message: Option<String>,
    pub violation_count: u32,
}

impl AbuseVerdict {
    fn clean(violation_count: u32) -> Self {
        Self {
            is_abusive: false,
            action: AbuseAction::None,
            block_duration: 0,
            message: None,
            violation_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AbuseRecord {
    violation_count: u32,
    /// 0 means not blocked.
    blocked_until: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbuseUserStatus {
    pub user_id: String,
    pub is_blocked: bool,
    pub violation_count: u32,
    pub blocked_until: u64,
    pub block_remaining: u64,
    pub block_remaining_text: String,
}

pub struct AbuseDetector {
    config: Arc<ConfigStore>,
    picker: Arc<dyn ResponsePicker>,
    records: Mutex<HashMap<String, AbuseRecord>>,
}

impl AbuseDetector {
    pub fn new(config: Arc<ConfigStore>, picker: Arc<dyn ResponsePicker>) -> Self {
        Self {
            config,
            picker,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn current_config(&self) -> AbuseConfig {
        self.config
            .get_or_default(ABUSE_CONFIG_KEY, defaults::abuse_config)
    }

    pub fn replace_config(&self, cfg: &AbuseConfig) -> anyhow::Result<()> {
        self.config.replace(ABUSE_CONFIG_KEY, cfg)
    }

    pub fn set_enabled(&self, enabled: bool) -> anyhow::Result<AbuseConfig> {
        let mut cfg = self.current_config();
        cfg.enabled = enabled;
        self.replace_config(&cfg)?;
        Ok(cfg)
    }

    pub fn check(&self, message: &str, user_id: &str) -> AbuseVerdict {
        self.check_at(now_unix(), message, user_id)
    }

    pub fn check_at(&self, now: u64, message: &str, user_id: &str) -> AbuseVerdict {
        let cfg = self.current_config();
        if !cfg.enabled {
            return AbuseVerdict::clean(0);
        }

        let mut records = self.records.lock().expect("abuse records mutex poisoned");
        let record = records.entry(user_id.to_string()).or_default();

        // Still blocked: report the remaining block, no further escalation.
        if record.blocked_until > now {
            let remaining = record.blocked_until - now;
            return AbuseVerdict {
                is_abusive: true,
                action: AbuseAction::Block,
                block_duration: remaining,
                message: Some(self.block_message(&cfg, remaining)),
                violation_count: record.violation_count,
            };
        }

        if !is_abusive_text(message, &cfg.sensitive_words) {
            return AbuseVerdict::clean(record.violation_count);
        }

        record.violation_count += 1;
        let count = record.violation_count;
        info!(
            user = %crate::anon_hash(user_id),
            violation_count = count,
            "abusive message detected"
        );

        if count >= cfg.warn_threshold {
            let duration = block_duration_for(&cfg.block_durations, count);
            record.blocked_until = now + duration;
            AbuseVerdict {
                is_abusive: true,
                action: AbuseAction::Block,
                block_duration: duration,
                message: Some(self.block_message(&cfg, duration)),
                violation_count: count,
            }
        } else {
            AbuseVerdict {
                is_abusive: true,
                action: AbuseAction::Warn,
                block_duration: 0,
                message: Some(self.warn_message(&cfg)),
                violation_count: count,
            }
        }
    }

    pub fn user_status(&self, user_id: &str) -> AbuseUserStatus {
        self.user_status_at(now_unix(), user_id)
    }

    pub fn user_status_at(&self, now: u64, user_id: &str) -> AbuseUserStatus {
        let records = self.records.lock().expect("abuse records mutex poisoned");
        let record = records.get(user_id).copied().unwrap_or_default();
        let remaining = record.blocked_until.saturating_sub(now);
        AbuseUserStatus {
            user_id: user_id.to_string(),
            is_blocked: remaining > 0,
            violation_count: record.violation_count,
            blocked_until: record.blocked_until,
            block_remaining: remaining,
            block_remaining_text: if remaining > 0 {
                format_duration(remaining)
            } else {
                String::new()
            },
        }
    }

    /// Clear the user's violations and any active block. Idempotent.
    pub fn reset_user(&self, user_id: &str) -> bool {
        let mut records = self.records.lock().expect("abuse records mutex poisoned");
        records.remove(user_id).is_some()
    }

    fn warn_message(&self, cfg: &AbuseConfig) -> String {
        self.picker
            .pick(&cfg.warn_messages)
            .unwrap_or("請保有善意與禮貌進行交流。")
            .to_string()
    }

    fn block_message(&self, cfg: &AbuseConfig, duration: u64) -> String {
        let text = format_duration(duration);
        self.picker
            .pick(&cfg.block_messages)
            .unwrap_or("您暫時無法使用此服務{duration}。")
            .replace("{duration}", &text)
    }
}

/// Any sensitive word appearing as a case-insensitive substring counts.
pub fn is_abusive_text(message: &str, sensitive_words: &[String]) -> bool {
    if message.trim().is_empty() {
        return false;
    }
    sensitive_words
        .iter()
        .any(|w| !w.is_empty() && contains(message, w))
}

/// Smallest configured bucket key >= the violation count; if none qualifies,
/// the highest configured bucket. A trailing `+` in a key is ignored,
/// unparseable keys are skipped.
pub fn block_duration_for(buckets: &HashMap<String, u64>, violation_count: u32) -> u64 {
    let mut parsed: Vec<(u32, u64)> = buckets
        .iter()
        .filter_map(|(k, &v)| k.trim_end_matches('+').parse::<u32>().ok().map(|n| (n, v)))
        .collect();
    if parsed.is_empty() {
        return 0;
    }
    parsed.sort_by_key(|&(n, _)| n);
    parsed
        .iter()
        .find(|&&(n, _)| n >= violation_count)
        .map(|&(_, d)| d)
        .unwrap_or_else(|| parsed[parsed.len() - 1].1)
}

fn now_unix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
