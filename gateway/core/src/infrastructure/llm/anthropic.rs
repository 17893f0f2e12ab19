// Anthropic Messages API adapter.
//
// Serves the gateway's two LLM consumers: the security-advisory call,
// which expects a bare JSON verdict, and the pipeline's phrasing and
// insight calls. Structured calls are steered with an assistant prefill
// so the reply starts at the opening brace; non-text content blocks in
// the reply are skipped rather than failing the call.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::llm::{
    FinishReason, GenerationOptions, GenerationResponse, LlmError, LlmProvider,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const CALL_TIMEOUT_SECS: u64 = 30;
const JSON_PREFILL: &str = "{";

pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<&'a [String]>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
    stop_reason: Option<String>,
}

/// Reply content. Anything that is not plain text (tool use, thinking)
/// carries nothing the gateway can render and is ignored.
#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicAdapter {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CALL_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicAdapter {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LlmError> {
        let mut messages = vec![Message {
            role: "user",
            content: prompt,
        }];
        // Prefill the assistant turn so structured verdicts come back as
        // bare JSON starting at the opening brace.
        if options.force_json {
            messages.push(Message {
                role: "assistant",
                content: JSON_PREFILL,
            });
        }

        let request = MessagesRequest {
            model: &self.model,
            messages,
            max_tokens: options.max_tokens.unwrap_or(1024),
            temperature: options.temperature,
            stop_sequences: options.stop_sequences.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(CALL_TIMEOUT_SECS)
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => LlmError::Authentication(detail),
                404 => LlmError::ModelNotFound(self.model.clone()),
                // 529 is the provider's overloaded signal; treat it like
                // throttling so callers back off the same way.
                429 | 529 => LlmError::RateLimit,
                _ => LlmError::Provider(format!("HTTP {status}: {detail}")),
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Provider(format!("unexpected response shape: {e}")))?;

        let mut text = String::new();
        if options.force_json {
            text.push_str(JSON_PREFILL);
        }
        for block in &parsed.content {
            if let ContentBlock::Text { text: chunk } = block {
                text.push_str(chunk);
            }
        }

        Ok(GenerationResponse {
            text,
            tokens_used: parsed.usage.input_tokens + parsed.usage.output_tokens,
            finish_reason: match parsed.stop_reason.as_deref() {
                Some("max_tokens") => FinishReason::Length,
                Some("refusal") => FinishReason::ContentFilter,
                _ => FinishReason::Stop,
            },
        })
    }

    /// Cheapest authenticated round trip: a one-token generation. Proves
    /// the key, the model id, and the endpoint in a single call.
    async fn health_check(&self) -> Result<(), LlmError> {
        let options = GenerationOptions {
            max_tokens: Some(1),
            temperature: Some(0.0),
            stop_sequences: None,
            force_json: false,
        };
        self.generate("ping", &options).await.map(|_| ())
    }
}
