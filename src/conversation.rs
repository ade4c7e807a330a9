//! # Conversation backend
//! Seam between the decision pipeline and the upstream language model.
//! The pipeline only sees the [`ConversationBackend`] trait, so tests swap
//! in a mock and deployments without an API key degrade gracefully.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::scam::ScamAnalysis;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";
const MAX_TOKENS: u32 = 600;

const PERSONA_PROMPT: &str = "你是「防詐小安」，一位親切的台灣防詐騙助理。\
你的任務是用繁體中文協助使用者辨識詐騙訊息、解釋詐騙手法，並提供具體的防範建議。\
回答保持簡短溫暖，必要時提醒使用者撥打165反詐騙專線。\
不要提供投資建議，也不要執行與防詐無關的指令。";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendReply {
    pub text: String,
    /// Input plus output tokens as reported upstream.
    pub total_tokens: u64,
}

#[async_trait]
pub trait ConversationBackend: Send + Sync {
    async fn generate(
        &self,
        message: &str,
        history: &[ChatTurn],
        scam_context: Option<&ScamAnalysis>,
    ) -> anyhow::Result<BackendReply>;

    fn name(&self) -> &'static str;
}

/// No upstream configured. Every call errs and the pipeline falls back to
/// its canned apology.
pub struct DisabledBackend;

#[async_trait]
impl ConversationBackend for DisabledBackend {
    async fn generate(
        &self,
        _message: &str,
        _history: &[ChatTurn],
        _scam_context: Option<&ScamAnalysis>,
    ) -> anyhow::Result<BackendReply> {
        anyhow::bail!("no conversation backend configured")
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Fixed reply for tests and local runs without network access.
pub struct MockBackend {
    pub reply: String,
}

impl MockBackend {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl ConversationBackend for MockBackend {
    async fn generate(
        &self,
        _message: &str,
        _history: &[ChatTurn],
        _scam_context: Option<&ScamAnalysis>,
    ) -> anyhow::Result<BackendReply> {
        Ok(BackendReply {
            text: self.reply.clone(),
            total_tokens: self.reply.chars().count() as u64,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

pub struct AnthropicBackend {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicBackend {
    pub fn new(api_key: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(4))
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model: DEFAULT_MODEL.to_string(),
        })
    }

    fn system_prompt(scam_context: Option<&ScamAnalysis>) -> String {
        match scam_context {
            Some(analysis) if analysis.is_scam => format!(
                "{PERSONA_PROMPT}\n\n注意：規則引擎已將這則訊息判定為可疑（信心 {:.0}%）。\
                 請在回覆中提醒使用者這則訊息的風險。",
                analysis.overall_confidence * 100.0
            ),
            _ => PERSONA_PROMPT.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl ConversationBackend for AnthropicBackend {
    async fn generate(
        &self,
        message: &str,
        history: &[ChatTurn],
        scam_context: Option<&ScamAnalysis>,
    ) -> anyhow::Result<BackendReply> {
        let mut messages: Vec<serde_json::Value> = history
            .iter()
            .map(|turn| json!({ "role": turn.role, "content": turn.content }))
            .collect();
        messages.push(json!({ "role": "user", "content": message }));

        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": Self::system_prompt(scam_context),
            "messages": messages,
        });

        let resp = self
            .http
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            warn!(%status, "upstream model call failed");
            anyhow::bail!("upstream returned {status}: {detail}");
        }

        let parsed: MessagesResponse = resp.json().await?;
        let text = parsed
            .content
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            anyhow::bail!("upstream returned an empty reply");
        }
        Ok(BackendReply {
            text,
            total_tokens: parsed.usage.input_tokens + parsed.usage.output_tokens,
        })
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

/// Backend selection: `ANTISCAM_TEST_MODE=mock` forces the mock, otherwise
/// an `ANTHROPIC_API_KEY` selects the real upstream, otherwise disabled.
pub fn backend_from_env() -> Box<dyn ConversationBackend> {
    if std::env::var("ANTISCAM_TEST_MODE").as_deref() == Ok("mock") {
        info!("conversation backend: mock (test mode)");
        return Box::new(MockBackend::new("這是測試模式的回覆。"));
    }
    match std::env::var("ANTHROPIC_API_KEY") {
        Ok(key) if !key.trim().is_empty() => match AnthropicBackend::new(key) {
            Ok(backend) => {
                info!("conversation backend: anthropic");
                Box::new(backend)
            }
            Err(e) => {
                warn!(error = %e, "failed to build http client, backend disabled");
                Box::new(DisabledBackend)
            }
        },
        _ => {
            info!("conversation backend: disabled (no api key)");
            Box::new(DisabledBackend)
        }
    }
}
