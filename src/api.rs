//! # HTTP surface
//! Thin Axum layer over the decision pipeline. Handlers validate input,
//! delegate to a component, and serialize its result; no business logic
//! lives here.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::abuse::{AbuseConfig, AbuseDetector, AbuseUserStatus, AbuseVerdict};
use crate::conversation::{ChatTurn, ConversationBackend};
use crate::error::ApiError;
use crate::keywords::{KeywordConfig, KeywordMatch, KeywordResponder};
use crate::orchestrator::{ConversationResponse, Orchestrator};
use crate::picker::ResponsePicker;
use crate::ratelimit::{
    estimate_tokens, DenyReason, Gate, RateLimiter, TopUser, UsageConfig, UsageStats, UserStats,
};
use crate::scam::{ScamAnalysis, ScamCatalog, ScamDetector, ScamExample};
use crate::special::{SituationReport, SpecialResponseConfig, SpecialSituationDetector};
use crate::store::ConfigStore;

/// Any markup-looking input is rejected outright rather than sanitized.
static MARKUP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("markup regex"));

#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub abuse: Arc<AbuseDetector>,
    pub special: Arc<SpecialSituationDetector>,
    pub keywords: Arc<KeywordResponder>,
    pub scams: Arc<ScamDetector>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn build_state(
    store: Arc<ConfigStore>,
    picker: Arc<dyn ResponsePicker>,
    backend: Arc<dyn ConversationBackend>,
) -> AppState {
    let limiter = Arc::new(RateLimiter::new(store.clone(), picker.clone()));
    let abuse = Arc::new(AbuseDetector::new(store.clone(), picker.clone()));
    let special = Arc::new(SpecialSituationDetector::new(store.clone(), picker.clone()));
    let keywords = Arc::new(KeywordResponder::new(store.clone(), picker));
    let scams = Arc::new(ScamDetector::new(store));
    let orchestrator = Arc::new(Orchestrator::new(
        limiter.clone(),
        abuse.clone(),
        special.clone(),
        keywords.clone(),
        scams.clone(),
        backend,
    ));
    AppState {
        limiter,
        abuse,
        special,
        keywords,
        scams,
        orchestrator,
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/chat", post(chat))
        .route("/abuse/check", post(abuse_check))
        .route("/abuse/config", get(abuse_get_config).post(abuse_set_config))
        .route("/abuse/toggle", post(abuse_toggle))
        .route("/abuse/user-status/{user_id}", get(abuse_user_status))
        .route("/abuse/reset/{user_id}", delete(abuse_reset))
        .route("/usage/check", post(usage_check))
        .route("/usage/config", get(usage_get_config).post(usage_set_config))
        .route("/usage/toggle", post(usage_toggle))
        .route("/usage/stats", get(usage_stats))
        .route("/usage/user/{user_id}", get(usage_user_stats))
        .route("/usage/reset/{user_id}", delete(usage_reset))
        .route("/usage/top-users", get(usage_top_users))
        .route("/special/detect", post(special_detect))
        .route(
            "/special/config",
            get(special_get_config).post(special_set_config),
        )
        .route("/special/toggle", post(special_toggle))
        .route("/keywords/match", post(keywords_match))
        .route(
            "/keywords/config",
            get(keywords_get_config).post(keywords_set_config),
        )
        .route("/keywords/toggle", post(keywords_toggle))
        .route("/scam/analyze-text", post(scam_analyze_text))
        .route("/scam/analyze-image", post(scam_analyze_image))
        .route("/scam/catalog", get(scam_get_catalog).post(scam_set_catalog))
        .route("/scam/examples", get(scam_examples))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn validate_message(message: &str) -> Result<(), ApiError> {
    if message.trim().is_empty() {
        return Err(ApiError::validation("message", "must not be empty"));
    }
    if MARKUP_RE.is_match(message) {
        return Err(ApiError::validation("message", "markup is not accepted"));
    }
    Ok(())
}

fn validate_user_id(user_id: &str) -> Result<(), ApiError> {
    if user_id.trim().is_empty() {
        return Err(ApiError::validation("user_id", "must not be empty"));
    }
    Ok(())
}

fn default_language() -> String {
    "zh".to_string()
}

#[derive(serde::Deserialize)]
struct ChatReq {
    user_id: String,
    message: String,
    #[serde(default)]
    history: Vec<ChatTurn>,
    #[serde(default)]
    is_group: bool,
    #[serde(default = "default_language")]
    language: String,
}

async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatReq>,
) -> Result<Json<ConversationResponse>, ApiError> {
    validate_user_id(&body.user_id)?;
    validate_message(&body.message)?;
    let resp = state
        .orchestrator
        .handle(
            &body.user_id,
            &body.message,
            &body.history,
            body.is_group,
            &body.language,
        )
        .await;
    Ok(Json(resp))
}

#[derive(serde::Deserialize)]
struct UserMessageReq {
    user_id: String,
    message: String,
    /// Originating channel (e.g. `line`, `web`); informational only.
    #[serde(default)]
    channel: Option<String>,
}

#[derive(serde::Deserialize)]
struct ToggleReq {
    enabled: bool,
}

#[derive(serde::Serialize)]
struct ResetResp {
    user_id: String,
    reset: bool,
}

// --- abuse ---

async fn abuse_check(
    State(state): State<AppState>,
    Json(body): Json<UserMessageReq>,
) -> Result<Json<AbuseVerdict>, ApiError> {
    validate_user_id(&body.user_id)?;
    validate_message(&body.message)?;
    if let Some(channel) = &body.channel {
        tracing::debug!(channel, user = %crate::anon_hash(&body.user_id), "abuse check");
    }
    Ok(Json(state.abuse.check(&body.message, &body.user_id)))
}

async fn abuse_get_config(State(state): State<AppState>) -> Json<AbuseConfig> {
    Json(state.abuse.current_config())
}

async fn abuse_set_config(
    State(state): State<AppState>,
    Json(cfg): Json<AbuseConfig>,
) -> Result<Json<AbuseConfig>, ApiError> {
    if cfg.warn_threshold == 0 {
        return Err(ApiError::validation("warn_threshold", "must be at least 1"));
    }
    state.abuse.replace_config(&cfg)?;
    Ok(Json(cfg))
}

async fn abuse_toggle(
    State(state): State<AppState>,
    Json(body): Json<ToggleReq>,
) -> Result<Json<AbuseConfig>, ApiError> {
    Ok(Json(state.abuse.set_enabled(body.enabled)?))
}

async fn abuse_user_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<AbuseUserStatus> {
    Json(state.abuse.user_status(&user_id))
}

async fn abuse_reset(State(state): State<AppState>, Path(user_id): Path<String>) -> Json<ResetResp> {
    let reset = state.abuse.reset_user(&user_id);
    Json(ResetResp { user_id, reset })
}

// --- usage ---

#[derive(serde::Serialize)]
struct UsageCheckResp {
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<DenyReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

async fn usage_check(
    State(state): State<AppState>,
    Json(body): Json<UserMessageReq>,
) -> Result<Json<UsageCheckResp>, ApiError> {
    validate_user_id(&body.user_id)?;
    validate_message(&body.message)?;
    let gate = state
        .limiter
        .check(&body.user_id, &body.message, estimate_tokens(&body.message));
    let resp = match gate {
        Gate::Allow => UsageCheckResp {
            allowed: true,
            reason: None,
            retry_after: None,
            message: None,
        },
        Gate::Deny {
            reason,
            retry_after,
            message,
        } => UsageCheckResp {
            allowed: false,
            reason: Some(reason),
            retry_after: Some(retry_after),
            message: Some(message),
        },
    };
    Ok(Json(resp))
}

async fn usage_get_config(State(state): State<AppState>) -> Json<UsageConfig> {
    Json(state.limiter.current_config())
}

async fn usage_set_config(
    State(state): State<AppState>,
    Json(cfg): Json<UsageConfig>,
) -> Result<Json<UsageConfig>, ApiError> {
    if cfg.session_limit == 0 {
        return Err(ApiError::validation("session_limit", "must be at least 1"));
    }
    if cfg.session_window == 0 {
        return Err(ApiError::validation("session_window", "must be at least 1"));
    }
    state.limiter.replace_config(&cfg)?;
    Ok(Json(cfg))
}

async fn usage_toggle(
    State(state): State<AppState>,
    Json(body): Json<ToggleReq>,
) -> Result<Json<UsageConfig>, ApiError> {
    Ok(Json(state.limiter.set_enabled(body.enabled)?))
}

async fn usage_stats(State(state): State<AppState>) -> Json<UsageStats> {
    Json(state.limiter.usage_stats())
}

async fn usage_user_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<UserStats> {
    // Users with no traffic yet get a zeroed record, not an error.
    let stats = state
        .limiter
        .user_stats(&user_id)
        .unwrap_or_else(|| UserStats::empty(user_id));
    Json(stats)
}

async fn usage_reset(State(state): State<AppState>, Path(user_id): Path<String>) -> Json<ResetResp> {
    let reset = state.limiter.reset_user(&user_id);
    Json(ResetResp { user_id, reset })
}

#[derive(serde::Deserialize)]
struct TopUsersQuery {
    #[serde(default = "default_top_limit")]
    limit: usize,
}

fn default_top_limit() -> usize {
    10
}

async fn usage_top_users(
    State(state): State<AppState>,
    Query(q): Query<TopUsersQuery>,
) -> Json<Vec<TopUser>> {
    Json(state.limiter.top_users(q.limit))
}

// --- special situations ---

#[derive(serde::Deserialize)]
struct DetectReq {
    message: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    is_group: bool,
    #[serde(default = "default_language")]
    language: String,
}

async fn special_detect(
    State(state): State<AppState>,
    Json(body): Json<DetectReq>,
) -> Result<Json<SituationReport>, ApiError> {
    validate_message(&body.message)?;
    if let Some(user_id) = &body.user_id {
        tracing::debug!(user = %crate::anon_hash(user_id), "situation detect");
    }
    Ok(Json(
        state
            .special
            .detect(&body.message, body.is_group, &body.language),
    ))
}

async fn special_get_config(State(state): State<AppState>) -> Json<SpecialResponseConfig> {
    Json(state.special.current_config())
}

async fn special_set_config(
    State(state): State<AppState>,
    Json(cfg): Json<SpecialResponseConfig>,
) -> Result<Json<SpecialResponseConfig>, ApiError> {
    for rule in &cfg.rules {
        if rule.patterns.is_empty() {
            return Err(ApiError::validation("rules", "every rule needs patterns"));
        }
    }
    state.special.replace_config(&cfg)?;
    Ok(Json(cfg))
}

async fn special_toggle(
    State(state): State<AppState>,
    Json(body): Json<ToggleReq>,
) -> Result<Json<SpecialResponseConfig>, ApiError> {
    Ok(Json(state.special.set_enabled(body.enabled)?))
}

// --- keywords ---

#[derive(serde::Deserialize)]
struct MessageReq {
    message: String,
}

async fn keywords_match(
    State(state): State<AppState>,
    Json(body): Json<MessageReq>,
) -> Result<Json<KeywordMatch>, ApiError> {
    validate_message(&body.message)?;
    Ok(Json(state.keywords.respond(&body.message)))
}

async fn keywords_get_config(State(state): State<AppState>) -> Json<KeywordConfig> {
    Json(state.keywords.current_config())
}

async fn keywords_set_config(
    State(state): State<AppState>,
    Json(cfg): Json<KeywordConfig>,
) -> Result<Json<KeywordConfig>, ApiError> {
    for category in &cfg.categories {
        if !(0.0..=1.0).contains(&category.threshold) {
            return Err(ApiError::validation(
                "threshold",
                format!("category `{}` threshold must be within 0..=1", category.id),
            ));
        }
    }
    state.keywords.replace_config(&cfg)?;
    Ok(Json(cfg))
}

async fn keywords_toggle(
    State(state): State<AppState>,
    Json(body): Json<ToggleReq>,
) -> Result<Json<KeywordConfig>, ApiError> {
    Ok(Json(state.keywords.set_enabled(body.enabled)?))
}

// --- scam analysis ---

#[derive(serde::Deserialize)]
struct AnalyzeTextReq {
    message: String,
    #[serde(default = "default_language")]
    language: String,
}

async fn scam_analyze_text(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeTextReq>,
) -> Result<Json<ScamAnalysis>, ApiError> {
    validate_message(&body.message)?;
    Ok(Json(state.scams.analyze(&body.message, &body.language)))
}

#[derive(serde::Deserialize)]
struct AnalyzeImageReq {
    image_url: String,
}

async fn scam_analyze_image(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeImageReq>,
) -> Result<Json<ScamAnalysis>, ApiError> {
    if body.image_url.trim().is_empty() {
        return Err(ApiError::validation("image_url", "must not be empty"));
    }
    Ok(Json(state.scams.analyze_image(&body.image_url)))
}

async fn scam_get_catalog(State(state): State<AppState>) -> Json<ScamCatalog> {
    Json(state.scams.current_catalog())
}

async fn scam_set_catalog(
    State(state): State<AppState>,
    Json(catalog): Json<ScamCatalog>,
) -> Result<Json<ScamCatalog>, ApiError> {
    if !(0.0..=1.0).contains(&catalog.detection_threshold) {
        return Err(ApiError::validation(
            "detection_threshold",
            "must be within 0..=1",
        ));
    }
    state.scams.replace_catalog(&catalog)?;
    Ok(Json(catalog))
}

async fn scam_examples(State(state): State<AppState>) -> Json<Vec<ScamExample>> {
    Json(state.scams.examples())
}
