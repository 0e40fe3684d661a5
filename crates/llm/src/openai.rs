//! OpenAI-compatible chat-completion backend.
//!
//! Works with any endpoint that accepts the OpenAI request format by
//! changing the base URL — the original deployment targets a DeepSeek model
//! behind such an endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use pipeline::provider::{LlmError, StructuredRequest};

use crate::backend::{salvage_json_object, ChatBackend};

/// Connection settings for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Backend name for log events.
    pub name: String,
    /// Base URL up to (and including) the API version segment,
    /// e.g. `https://api.siliconflow.cn/v1`.
    pub base_url: String,
    /// Bearer credential. Resolved by the composition root; never logged.
    pub api_key: String,
    /// Model identifier sent with every request.
    pub model: String,
}

/// A [`ChatBackend`] speaking the OpenAI chat-completion protocol.
pub struct OpenAiChatBackend {
    config: EndpointConfig,
    http: reqwest::Client,
}

impl OpenAiChatBackend {
    /// Creates a backend with a pooled HTTP client.
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn completions_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn prepare(&self, request: &StructuredRequest) -> Value {
        json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.payload},
                {"role": "user", "content": request.directive},
            ],
            "response_format": {"type": "json_object"},
            "temperature": request.options.temperature,
            "max_tokens": request.options.max_output_tokens,
            "stream": false,
        })
    }

    async fn transmit(&self, body: &Value, timeout: Duration) -> Result<Value, LlmError> {
        let url = self.completions_url();
        debug!(backend = %self.config.name, %url, timeout_ms = timeout.as_millis() as u64, "sending chat completion request");

        let classify_send = |e: reqwest::Error| {
            if e.is_timeout() {
                LlmError::Timeout { timeout }
            } else {
                LlmError::Transport(e.to_string())
            }
        };

        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(classify_send)?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                warn!(backend = %self.config.name, retry_after_s = retry_after.map(|d| d.as_secs()), "throttled by endpoint");
                return Err(LlmError::Throttled { retry_after });
            }
            let message = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(LlmError::Server {
                    status: status.as_u16(),
                    message,
                });
            }
            return Err(LlmError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response.json::<Value>().await.map_err(classify_send)
    }

    fn parse(&self, raw: &Value) -> Result<Value, LlmError> {
        let content = raw
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                LlmError::Malformed("completion carries no choices[0].message.content".into())
            })?;
        salvage_json_object(content.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::provider::SamplingOptions;

    fn backend() -> OpenAiChatBackend {
        OpenAiChatBackend::new(EndpointConfig {
            name: "test".into(),
            base_url: "https://example.invalid/v1/".into(),
            api_key: "sk-test".into(),
            model: "test-model".into(),
        })
    }

    #[test]
    fn completions_url_strips_trailing_slash() {
        assert_eq!(
            backend().completions_url(),
            "https://example.invalid/v1/chat/completions"
        );
    }

    #[test]
    fn prepare_builds_message_triple() {
        let request = StructuredRequest {
            system: "persona".into(),
            payload: "{\"asset\":{}}".into(),
            directive: "do the thing".into(),
            options: SamplingOptions {
                temperature: 0.2,
                max_output_tokens: 512,
            },
        };
        let body = backend().prepare(&request);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["content"], "do the thing");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 512);
    }

    #[test]
    fn parse_extracts_and_salvages_content() {
        let raw = json!({
            "choices": [{"message": {"content": "sure! {\"k\": \"v\"} done"}}]
        });
        let value = backend().parse(&raw).unwrap();
        assert_eq!(value, json!({"k": "v"}));
    }

    #[test]
    fn parse_rejects_envelope_without_content() {
        let raw = json!({"choices": []});
        assert!(matches!(
            backend().parse(&raw),
            Err(LlmError::Malformed(_))
        ));
    }
}
