//! # Rate Limiter
//! Per-user session windows plus global fixed-boundary counters.
//!
//! Per-user limits use a rolling window reset lazily at read time; global
//! hourly/daily limits roll on fixed clock boundaries (top of the hour,
//! midnight UTC). No background timers. Messages containing an emergency
//! keyword bypass all limits so crisis messages are never throttled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::defaults;
use crate::matcher::contains;
use crate::picker::ResponsePicker;
use crate::store::ConfigStore;

pub const USAGE_CONFIG_KEY: &str = "usage_limits_config";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageConfig {
    pub enabled: bool,
    /// Max requests per user within one session window.
    pub session_limit: u32,
    /// Max tokens per user within one session window.
    pub session_token_limit: u64,
    /// Session window length in seconds.
    pub session_window: u64,
    /// Cooldown applied when a session limit is exceeded, in seconds.
    pub session_cooldown: u64,
    pub global_hourly_limit: u64,
    pub global_daily_limit: u64,
    /// Presence of any of these terms bypasses rate limiting entirely.
    #[serde(default)]
    pub emergency_keywords: Vec<String>,
    /// Deny templates; `{cooldown}` is replaced with a formatted duration.
    #[serde(default)]
    pub session_limit_messages: Vec<String>,
    #[serde(default)]
    pub global_limit_messages: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Cooldown,
    LimitExceeded,
    GlobalLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Gate {
    Allow,
    Deny {
        reason: DenyReason,
        retry_after: u64,
        message: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserUsageRecord {
    pub request_count_in_window: u32,
    pub token_count_in_window: u64,
    pub window_start: u64,
    /// 0 means not cooling.
    pub cooling_until: u64,
    pub total_requests: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Default)]
struct GlobalUsage {
    hourly_count: u64,
    hourly_window_start: u64,
    daily_count: u64,
    daily_window_start: u64,
    all_time_count: u64,
    all_time_tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowStats {
    pub count: u64,
    pub window_start: u64,
    pub window_start_iso: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub hourly: WindowStats,
    pub daily: WindowStats,
    pub all_time_count: u64,
    pub all_time_tokens: u64,
    pub tracked_users: usize,
    pub active_users: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserStats {
    pub user_id: String,
    pub is_cooling: bool,
    pub cooldown_remaining: u64,
    pub cooldown_remaining_text: String,
    pub session_requests: u32,
    pub session_tokens: u64,
    pub total_requests: u64,
    pub total_tokens: u64,
}

impl UserStats {
    /// Zeroed stats for a user with no recorded traffic yet.
    pub fn empty(user_id: String) -> Self {
        Self {
            user_id,
            is_cooling: false,
            cooldown_remaining: 0,
            cooldown_remaining_text: String::new(),
            session_requests: 0,
            session_tokens: 0,
            total_requests: 0,
            total_tokens: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TopUser {
    pub user_id: String,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub is_cooling: bool,
}

pub struct RateLimiter {
    config: Arc<ConfigStore>,
    picker: Arc<dyn ResponsePicker>,
    users: Mutex<HashMap<String, UserUsageRecord>>,
    global: Mutex<GlobalUsage>,
}

impl RateLimiter {
    pub fn new(config: Arc<ConfigStore>, picker: Arc<dyn ResponsePicker>) -> Self {
        Self {
            config,
            picker,
            users: Mutex::new(HashMap::new()),
            global: Mutex::new(GlobalUsage::default()),
        }
    }

    pub fn current_config(&self) -> UsageConfig {
        self.config
            .get_or_default(USAGE_CONFIG_KEY, defaults::usage_config)
    }

    pub fn replace_config(&self, cfg: &UsageConfig) -> anyhow::Result<()> {
        self.config.replace(USAGE_CONFIG_KEY, cfg)
    }

    pub fn set_enabled(&self, enabled: bool) -> anyhow::Result<UsageConfig> {
        let mut cfg = self.current_config();
        cfg.enabled = enabled;
        self.replace_config(&cfg)?;
        Ok(cfg)
    }

    /// Admission check for one inbound message. The check-then-increment
    /// sequence runs under the per-map locks so concurrent requests from the
    /// same user cannot lose updates.
    pub fn check(&self, user_id: &str, message: &str, estimated_tokens: u64) -> Gate {
        self.check_at(now_unix(), user_id, message, estimated_tokens)
    }

    pub fn check_at(&self, now: u64, user_id: &str, message: &str, estimated_tokens: u64) -> Gate {
        let cfg = self.current_config();

        if !cfg.enabled {
            return Gate::Allow;
        }
        if has_emergency_keyword(message, &cfg.emergency_keywords) {
            debug!(user = %crate::anon_hash(user_id), "emergency keyword bypass");
            return Gate::Allow;
        }

        let mut users = self.users.lock().expect("usage records mutex poisoned");
        let record = users
            .entry(user_id.to_string())
            .or_insert_with(|| UserUsageRecord {
                window_start: now,
                ..Default::default()
            });

        if record.cooling_until > now {
            let remaining = record.cooling_until - now;
            return Gate::Deny {
                reason: DenyReason::Cooldown,
                retry_after: remaining,
                message: self.session_message(&cfg, remaining),
            };
        }

        // Lazy window rollover.
        if now.saturating_sub(record.window_start) > cfg.session_window {
            record.request_count_in_window = 0;
            record.token_count_in_window = 0;
            record.window_start = now;
        }

        if u64::from(record.request_count_in_window) + 1 > u64::from(cfg.session_limit)
            || record.token_count_in_window + estimated_tokens > cfg.session_token_limit
        {
            record.cooling_until = now + cfg.session_cooldown;
            return Gate::Deny {
                reason: DenyReason::LimitExceeded,
                retry_after: cfg.session_cooldown,
                message: self.session_message(&cfg, cfg.session_cooldown),
            };
        }

        let mut global = self.global.lock().expect("global usage mutex poisoned");
        let hour_start = now - now % 3600;
        let day_start = now - now % 86_400;
        if global.hourly_window_start != hour_start {
            global.hourly_window_start = hour_start;
            global.hourly_count = 0;
        }
        if global.daily_window_start != day_start {
            global.daily_window_start = day_start;
            global.daily_count = 0;
        }
        if global.hourly_count + 1 > cfg.global_hourly_limit {
            return Gate::Deny {
                reason: DenyReason::GlobalLimit,
                retry_after: hour_start + 3600 - now,
                message: self.global_message(&cfg),
            };
        }
        if global.daily_count + 1 > cfg.global_daily_limit {
            return Gate::Deny {
                reason: DenyReason::GlobalLimit,
                retry_after: day_start + 86_400 - now,
                message: self.global_message(&cfg),
            };
        }

        record.request_count_in_window += 1;
        record.token_count_in_window += estimated_tokens;
        record.total_requests += 1;
        record.total_tokens += estimated_tokens;
        global.hourly_count += 1;
        global.daily_count += 1;
        global.all_time_count += 1;
        global.all_time_tokens += estimated_tokens;

        Gate::Allow
    }

    /// Fold in actual token usage reported after the upstream reply, so
    /// totals reflect real consumption and not just the admission estimate.
    pub fn record_tokens(&self, user_id: &str, tokens: u64) {
        let mut users = self.users.lock().expect("usage records mutex poisoned");
        if let Some(record) = users.get_mut(user_id) {
            record.token_count_in_window += tokens;
            record.total_tokens += tokens;
        }
        let mut global = self.global.lock().expect("global usage mutex poisoned");
        global.all_time_tokens += tokens;
    }

    /// Zero the user's record entirely. Irreversible; idempotent.
    pub fn reset_user(&self, user_id: &str) -> bool {
        let mut users = self.users.lock().expect("usage records mutex poisoned");
        users.remove(user_id).is_some()
    }

    pub fn usage_stats(&self) -> UsageStats {
        self.usage_stats_at(now_unix())
    }

    pub fn usage_stats_at(&self, now: u64) -> UsageStats {
        let cfg = self.current_config();
        let users = self.users.lock().expect("usage records mutex poisoned");
        let active = users
            .values()
            .filter(|r| {
                r.request_count_in_window > 0
                    && now.saturating_sub(r.window_start) <= cfg.session_window
            })
            .count();
        let global = self.global.lock().expect("global usage mutex poisoned");
        UsageStats {
            hourly: window_stats(global.hourly_count, global.hourly_window_start),
            daily: window_stats(global.daily_count, global.daily_window_start),
            all_time_count: global.all_time_count,
            all_time_tokens: global.all_time_tokens,
            tracked_users: users.len(),
            active_users: active,
        }
    }

    pub fn user_stats(&self, user_id: &str) -> Option<UserStats> {
        self.user_stats_at(now_unix(), user_id)
    }

    pub fn user_stats_at(&self, now: u64, user_id: &str) -> Option<UserStats> {
        let users = self.users.lock().expect("usage records mutex poisoned");
        let r = users.get(user_id)?;
        let remaining = r.cooling_until.saturating_sub(now);
        Some(UserStats {
            user_id: user_id.to_string(),
            is_cooling: remaining > 0,
            cooldown_remaining: remaining,
            cooldown_remaining_text: if remaining > 0 {
                format_duration(remaining)
            } else {
                String::new()
            },
            session_requests: r.request_count_in_window,
            session_tokens: r.token_count_in_window,
            total_requests: r.total_requests,
            total_tokens: r.total_tokens,
        })
    }

    /// Top N users by lifetime requests; ties broken by user id ascending.
    pub fn top_users(&self, limit: usize) -> Vec<TopUser> {
        let now = now_unix();
        let users = self.users.lock().expect("usage records mutex poisoned");
        let mut rows: Vec<TopUser> = users
            .iter()
            .filter(|(_, r)| r.total_requests > 0)
            .map(|(id, r)| TopUser {
                user_id: id.clone(),
                total_requests: r.total_requests,
                total_tokens: r.total_tokens,
                is_cooling: r.cooling_until > now,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_requests
                .cmp(&a.total_requests)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        rows.truncate(limit);
        rows
    }

    pub fn tracked_user_count(&self) -> usize {
        self.users.lock().expect("usage records mutex poisoned").len()
    }

    fn session_message(&self, cfg: &UsageConfig, cooldown: u64) -> String {
        let text = format_duration(cooldown);
        self.picker
            .pick(&cfg.session_limit_messages)
            .unwrap_or("已達使用上限，請稍後再試。")
            .replace("{cooldown}", &text)
    }

    fn global_message(&self, cfg: &UsageConfig) -> String {
        self.picker
            .pick(&cfg.global_limit_messages)
            .unwrap_or("目前使用量較大，請稍後再試。")
            .to_string()
    }
}

/// Case- and whitespace-insensitive so admin-entered Latin keywords still
/// bypass when users shout them.
pub fn has_emergency_keyword(message: &str, keywords: &[String]) -> bool {
    !message.is_empty()
        && keywords
            .iter()
            .any(|k| !k.is_empty() && contains(message, k))
}

/// Rough admission-time token estimate; actuals are folded in after the
/// upstream reply via [`RateLimiter::record_tokens`].
pub fn estimate_tokens(message: &str) -> u64 {
    message.chars().count() as u64
}

/// Human-readable duration: 秒 / 分鐘 / 小時 / 天.
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{seconds}秒")
    } else if seconds < 3600 {
        format!("{}分鐘", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}小時", seconds / 3600)
    } else {
        format!("{}天", seconds / 86_400)
    }
}

fn window_stats(count: u64, start: u64) -> WindowStats {
    let iso = chrono::DateTime::from_timestamp(start as i64, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();
    WindowStats {
        count,
        window_start: start,
        window_start_iso: iso,
    }
}

fn now_unix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picker::FixedPicker;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(ConfigStore::in_memory()), Arc::new(FixedPicker(0)))
    }

    fn small_config() -> UsageConfig {
        UsageConfig {
            enabled: true,
            session_limit: 3,
            session_token_limit: 1_000,
            session_window: 3600,
            session_cooldown: 600,
            global_hourly_limit: 1000,
            global_daily_limit: 10_000,
            emergency_keywords: vec!["救命".into()],
            session_limit_messages: vec!["請休息{cooldown}".into()],
            global_limit_messages: vec!["全域上限".into()],
        }
    }

    #[test]
    fn session_limit_denies_then_cools_down() {
        let rl = limiter();
        rl.replace_config(&small_config()).unwrap();
        let now = 1_700_000_000;
        for _ in 0..3 {
            assert_eq!(rl.check_at(now, "u1", "hello", 10), Gate::Allow);
        }
        match rl.check_at(now, "u1", "hello", 10) {
            Gate::Deny {
                reason,
                retry_after,
                message,
            } => {
                assert_eq!(reason, DenyReason::LimitExceeded);
                assert_eq!(retry_after, 600);
                assert_eq!(message, "請休息10分鐘");
            }
            other => panic!("expected deny, got {other:?}"),
        }
        // Subsequent request during the cooldown is a cooldown deny.
        match rl.check_at(now + 10, "u1", "hello", 10) {
            Gate::Deny { reason, .. } => assert_eq!(reason, DenyReason::Cooldown),
            other => panic!("expected cooldown deny, got {other:?}"),
        }
    }

    #[test]
    fn twenty_first_request_in_window_is_denied() {
        let rl = limiter();
        let mut cfg = small_config();
        cfg.session_limit = 20;
        rl.replace_config(&cfg).unwrap();
        let now = 1_700_000_000;
        for i in 0..20 {
            assert_eq!(rl.check_at(now + i, "u1", "msg", 1), Gate::Allow, "request {i}");
        }
        match rl.check_at(now + 30, "u1", "msg", 1) {
            Gate::Deny {
                reason, retry_after, ..
            } => {
                assert_eq!(reason, DenyReason::LimitExceeded);
                assert_eq!(retry_after, cfg.session_cooldown);
            }
            other => panic!("expected deny, got {other:?}"),
        }
    }

    #[test]
    fn window_resets_lazily() {
        let rl = limiter();
        rl.replace_config(&small_config()).unwrap();
        let now = 1_700_000_000;
        for _ in 0..3 {
            assert_eq!(rl.check_at(now, "u1", "m", 1), Gate::Allow);
        }
        // Past the window: counters reset on access, no timer involved.
        assert_eq!(rl.check_at(now + 3601, "u1", "m", 1), Gate::Allow);
        let stats = rl.user_stats_at(now + 3601, "u1").unwrap();
        assert_eq!(stats.session_requests, 1);
        assert_eq!(stats.total_requests, 4);
    }

    #[test]
    fn emergency_keyword_always_allows() {
        let rl = limiter();
        rl.replace_config(&small_config()).unwrap();
        let now = 1_700_000_000;
        for _ in 0..3 {
            assert_eq!(rl.check_at(now, "u1", "m", 1), Gate::Allow);
        }
        // Over limit and even during cooldown, the bypass wins.
        assert!(matches!(rl.check_at(now, "u1", "m", 1), Gate::Deny { .. }));
        assert_eq!(rl.check_at(now + 5, "u1", "救命，我被騙了", 1), Gate::Allow);
    }

    #[test]
    fn global_hourly_limit_rolls_on_clock_boundary() {
        let rl = limiter();
        let mut cfg = small_config();
        cfg.session_limit = 100;
        cfg.global_hourly_limit = 2;
        rl.replace_config(&cfg).unwrap();
        let hour_start = 1_700_000_000 - 1_700_000_000 % 3600;
        let now = hour_start + 100;
        assert_eq!(rl.check_at(now, "a", "m", 1), Gate::Allow);
        assert_eq!(rl.check_at(now, "b", "m", 1), Gate::Allow);
        match rl.check_at(now, "c", "m", 1) {
            Gate::Deny {
                reason, retry_after, ..
            } => {
                assert_eq!(reason, DenyReason::GlobalLimit);
                assert_eq!(retry_after, 3600 - 100);
            }
            other => panic!("expected global deny, got {other:?}"),
        }
        // Next fixed hour: counter starts fresh.
        assert_eq!(rl.check_at(hour_start + 3600, "c", "m", 1), Gate::Allow);
    }

    #[test]
    fn reset_is_idempotent() {
        let rl = limiter();
        rl.replace_config(&small_config()).unwrap();
        rl.check_at(1_700_000_000, "u1", "m", 5);
        assert!(rl.reset_user("u1"));
        assert!(!rl.reset_user("u1"));
        assert!(rl.user_stats("u1").is_none());
    }

    #[test]
    fn top_users_orders_by_requests_then_id() {
        let rl = limiter();
        let mut cfg = small_config();
        cfg.session_limit = 100;
        rl.replace_config(&cfg).unwrap();
        let now = 1_700_000_000;
        for _ in 0..2 {
            rl.check_at(now, "bob", "m", 1);
            rl.check_at(now, "alice", "m", 1);
        }
        rl.check_at(now, "carol", "m", 1);
        let top = rl.top_users(10);
        let ids: Vec<&str> = top.iter().map(|t| t.user_id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn record_tokens_updates_totals() {
        let rl = limiter();
        rl.replace_config(&small_config()).unwrap();
        rl.check_at(1_700_000_000, "u1", "hi", 2);
        rl.record_tokens("u1", 400);
        let stats = rl.user_stats_at(1_700_000_000, "u1").unwrap();
        assert_eq!(stats.total_tokens, 402);
    }

    #[test]
    fn emergency_keywords_match_case_insensitively() {
        let keywords = vec!["help".to_string(), "救命".to_string()];
        assert!(has_emergency_keyword("HELP me please", &keywords));
        assert!(has_emergency_keyword("快來救命", &keywords));
        assert!(!has_emergency_keyword("hello there", &keywords));
        assert!(!has_emergency_keyword("", &keywords));
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(45), "45秒");
        assert_eq!(format_duration(600), "10分鐘");
        assert_eq!(format_duration(7200), "2小時");
        assert_eq!(format_duration(864_000), "10天");
    }
}
