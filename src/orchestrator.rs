//! # Orchestrator
//! Fixed-priority decision pipeline for one inbound message:
//! rate limit, abuse, special situations, keyword shortcuts, then scam
//! analysis alongside the conversation backend.
//!
//! The pipeline never surfaces an error to the caller. A failing or slow
//! backend degrades to a canned apology with `outcome = "error"`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::abuse::{AbuseAction, AbuseDetector};
use crate::conversation::{ChatTurn, ConversationBackend};
use crate::keywords::KeywordResponder;
use crate::ratelimit::{estimate_tokens, Gate, RateLimiter};
use crate::scam::{ScamDetector, ScamTypeInfo};
use crate::special::SpecialSituationDetector;

const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(12);

const APOLOGY: &str =
    "小安這邊暫時出了點狀況，請稍後再試一次。若您遇到緊急詐騙疑慮，請直接撥打165反詐騙專線。";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    RateLimited,
    Blocked,
    EmergencyHandled,
    KeywordHandled,
    AiHandled,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationResponse {
    pub response: String,
    pub outcome: Outcome,
    pub is_scam: bool,
    /// Deterministic rule-engine summary, present when scam analysis ran.
    pub analysis: Option<String>,
    pub scam_info: Option<ScamTypeInfo>,
    /// Reserved field, always null until an emotion model lands.
    pub emotion_analysis: Option<serde_json::Value>,
}

impl ConversationResponse {
    fn terminal(response: String, outcome: Outcome) -> Self {
        Self {
            response,
            outcome,
            is_scam: false,
            analysis: None,
            scam_info: None,
            emotion_analysis: None,
        }
    }
}

pub struct Orchestrator {
    limiter: Arc<RateLimiter>,
    abuse: Arc<AbuseDetector>,
    special: Arc<SpecialSituationDetector>,
    keywords: Arc<KeywordResponder>,
    scams: Arc<ScamDetector>,
    backend: Arc<dyn ConversationBackend>,
    backend_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        limiter: Arc<RateLimiter>,
        abuse: Arc<AbuseDetector>,
        special: Arc<SpecialSituationDetector>,
        keywords: Arc<KeywordResponder>,
        scams: Arc<ScamDetector>,
        backend: Arc<dyn ConversationBackend>,
    ) -> Self {
        Self {
            limiter,
            abuse,
            special,
            keywords,
            scams,
            backend,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub async fn handle(
        &self,
        user_id: &str,
        message: &str,
        history: &[ChatTurn],
        is_group: bool,
        language: &str,
    ) -> ConversationResponse {
        let estimated = estimate_tokens(message);

        if let Gate::Deny { message: text, .. } = self.limiter.check(user_id, message, estimated) {
            return ConversationResponse::terminal(text, Outcome::RateLimited);
        }

        let verdict = self.abuse.check(message, user_id);
        if verdict.action != AbuseAction::None {
            let text = verdict
                .message
                .unwrap_or_else(|| "請保有善意與禮貌進行交流。".to_string());
            return ConversationResponse::terminal(text, Outcome::Blocked);
        }

        let situation = self.special.detect(message, is_group, language);
        if situation.situation_detected {
            if let Some(text) = situation.response {
                return ConversationResponse::terminal(text, Outcome::EmergencyHandled);
            }
        }

        let keyword = self.keywords.respond(message);
        if keyword.matched {
            if let Some(text) = keyword.response {
                return ConversationResponse::terminal(text, Outcome::KeywordHandled);
            }
        }

        // Scam analysis always runs before the backend so the model can be
        // primed with the verdict, and the caller gets it either way.
        let analysis = self.scams.analyze(message, language);

        let generated = timeout(
            self.backend_timeout,
            self.backend.generate(message, history, Some(&analysis)),
        )
        .await;

        let (text, outcome) = match generated {
            Ok(Ok(reply)) => {
                self.limiter.record_tokens(user_id, reply.total_tokens);
                info!(
                    user = %crate::anon_hash(user_id),
                    backend = self.backend.name(),
                    tokens = reply.total_tokens,
                    "conversation handled"
                );
                (reply.text, Outcome::AiHandled)
            }
            Ok(Err(e)) => {
                warn!(backend = self.backend.name(), error = %e, "backend failed");
                (APOLOGY.to_string(), Outcome::Error)
            }
            Err(_) => {
                warn!(backend = self.backend.name(), "backend timed out");
                (APOLOGY.to_string(), Outcome::Error)
            }
        };

        ConversationResponse {
            response: text,
            outcome,
            is_scam: analysis.is_scam,
            analysis: Some(analysis.analysis_summary),
            scam_info: analysis.scam_type,
            emotion_analysis: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{DisabledBackend, MockBackend};
    use crate::picker::FixedPicker;
    use crate::store::ConfigStore;

    fn orchestrator(backend: Arc<dyn ConversationBackend>) -> Orchestrator {
        let store = Arc::new(ConfigStore::in_memory());
        let picker: Arc<FixedPicker> = Arc::new(FixedPicker(0));
        Orchestrator::new(
            Arc::new(RateLimiter::new(store.clone(), picker.clone())),
            Arc::new(AbuseDetector::new(store.clone(), picker.clone())),
            Arc::new(SpecialSituationDetector::new(store.clone(), picker.clone())),
            Arc::new(KeywordResponder::new(store.clone(), picker.clone())),
            Arc::new(ScamDetector::new(store)),
            backend,
        )
    }

    #[tokio::test]
    async fn abuse_beats_special_and_keywords() {
        let orch = orchestrator(Arc::new(MockBackend::new("ai")));
        // Contains a sensitive word and a crisis phrase; abuse wins.
        let r = orch.handle("u1", "白痴，我不想活了", &[], false, "zh").await;
        assert_eq!(r.outcome, Outcome::Blocked);
    }

    #[tokio::test]
    async fn special_beats_keywords() {
        let orch = orchestrator(Arc::new(MockBackend::new("ai")));
        let r = orch.handle("u1", "你好，我真的不想活了", &[], false, "zh").await;
        assert_eq!(r.outcome, Outcome::EmergencyHandled);
        assert!(r.response.contains("1925"));
    }

    #[tokio::test]
    async fn keyword_shortcut_skips_backend() {
        let orch = orchestrator(Arc::new(DisabledBackend));
        let r = orch.handle("u1", "哈囉", &[], false, "zh").await;
        assert_eq!(r.outcome, Outcome::KeywordHandled);
    }

    #[tokio::test]
    async fn scam_analysis_rides_along_with_ai_reply() {
        let orch = orchestrator(Arc::new(MockBackend::new("請小心這則訊息")));
        let text = "老師帶單，保證獲利！加密貨幣投資穩賺，名額有限立即加入！";
        let r = orch.handle("u1", text, &[], false, "zh").await;
        assert_eq!(r.outcome, Outcome::AiHandled);
        assert!(r.is_scam);
        assert_eq!(r.scam_info.unwrap().id, "investment_scam");
        assert!(r.analysis.unwrap().contains("投資詐騙"));
    }

    #[tokio::test]
    async fn backend_failure_degrades_to_apology() {
        let orch = orchestrator(Arc::new(DisabledBackend));
        let r = orch.handle("u1", "請問這是正常訊息嗎", &[], false, "zh").await;
        assert_eq!(r.outcome, Outcome::Error);
        assert!(r.response.contains("165"));
    }

    #[tokio::test]
    async fn rate_limit_denies_before_anything_else() {
        let orch = orchestrator(Arc::new(MockBackend::new("ai")));
        let mut cfg = orch.limiter.current_config();
        cfg.session_limit = 1;
        orch.limiter.replace_config(&cfg).unwrap();
        assert_ne!(
            orch.handle("u1", "這則訊息可疑嗎", &[], false, "zh").await.outcome,
            Outcome::RateLimited
        );
        let r = orch.handle("u1", "這則訊息可疑嗎", &[], false, "zh").await;
        assert_eq!(r.outcome, Outcome::RateLimited);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        struct SlowBackend;
        #[async_trait::async_trait]
        impl ConversationBackend for SlowBackend {
            async fn generate(
                &self,
                _message: &str,
                _history: &[ChatTurn],
                _scam_context: Option<&crate::scam::ScamAnalysis>,
            ) -> anyhow::Result<crate::conversation::BackendReply> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                unreachable!()
            }
            fn name(&self) -> &'static str {
                "slow"
            }
        }

        tokio::time::pause();
        let orch = orchestrator(Arc::new(SlowBackend))
            .with_backend_timeout(Duration::from_millis(50));
        let handle = tokio::spawn(async move {
            orch.handle("u1", "請幫我分析這段話", &[], false, "zh").await
        });
        tokio::time::advance(Duration::from_secs(1)).await;
        let r = handle.await.unwrap();
        assert_eq!(r.outcome, Outcome::Error);
    }
}
