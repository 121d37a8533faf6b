//! OpenAI-Compatible Backend
//!
//! Adapter for hosted chat-completions APIs (DeepSeek and anything else that
//! speaks the OpenAI wire format). The API key is held as a `SecretString`
//! and only exposed when building the `Authorization` header.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{
    Backend, BackendConfig, BackendKind, BackendReply, BackendRequest, TokenUsage,
    validate_endpoint,
};
use crate::constants::backend as backend_constants;
use crate::types::{BackendFailure, FxError, Result};

/// OpenAI-compatible chat backend with secure API key handling
pub struct OpenAiCompatibleBackend {
    name: String,
    /// Never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatibleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleBackend")
            .field("name", &self.name)
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl OpenAiCompatibleBackend {
    pub fn new(name: &str, config: &BackendConfig) -> Result<Self> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            FxError::Config(format!(
                "API key for backend '{}' not found. Set backends.{}.api_key{}",
                name,
                name,
                config
                    .api_key_env
                    .as_ref()
                    .map(|v| format!(" or the {} env var", v))
                    .unwrap_or_default()
            ))
        })?;

        let api_base = config
            .url
            .clone()
            .unwrap_or_else(|| backend_constants::DEEPSEEK_API_BASE.to_string());
        let api_base = validate_endpoint(&api_base, "OpenAI-compatible")?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(
                backend_constants::CONNECT_TIMEOUT_SECS,
            ))
            .build()
            .map_err(|e| FxError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: name.to_string(),
            api_key: SecretString::from(api_key),
            api_base,
            client,
        })
    }

    /// `{base}/v1/...`, tolerating a base that already ends in `/v1`
    fn endpoint(&self, path: &str) -> String {
        if self.api_base.ends_with("/v1") {
            format!("{}/{}", self.api_base, path)
        } else {
            format!("{}/v1/{}", self.api_base, path)
        }
    }

    fn build_request(request: &BackendRequest) -> ChatCompletionRequest<'_> {
        let mut messages = Vec::with_capacity(2);
        if !request.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &request.system_prompt,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.user_content,
        });

        ChatCompletionRequest {
            model: &request.model,
            messages,
            temperature: request.temperature,
            stream: false,
            response_format: request.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        }
    }
}

#[async_trait]
impl Backend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::OpenaiCompatible
    }

    async fn send(&self, request: &BackendRequest) -> std::result::Result<BackendReply, BackendFailure> {
        let start = Instant::now();
        let url = self.endpoint("chat/completions");
        let body = Self::build_request(request);

        debug!(backend = %self.name, model = %request.model, "Sending chat completion request");

        let fail = |f: BackendFailure| f.at(&self.name, &request.model).elapsed(start.elapsed());

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| fail(BackendFailure::from_transport(&e, request.timeout)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(fail(BackendFailure::from_http_status(
                status.as_u16(),
                &text,
                &request.model,
            )));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                fail(BackendFailure::timeout(request.timeout))
            } else {
                fail(BackendFailure::invalid_response(format!(
                    "Failed to parse chat completion response: {}",
                    e
                )))
            }
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(fail(BackendFailure::invalid_response(
                "No content in chat completion response",
            )));
        }

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(BackendReply {
            text,
            usage,
            latency: start.elapsed(),
        })
    }

    async fn health_check(&self) -> bool {
        let response = self
            .client
            .get(self.endpoint("models"))
            .timeout(Duration::from_secs(
                backend_constants::HEALTH_CHECK_TIMEOUT_SECS,
            ))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(backend = %self.name, status = %resp.status(), "API health check failed");
                false
            }
            Err(e) => {
                warn!(backend = %self.name, "API not reachable: {}", e);
                false
            }
        }
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> BackendConfig {
        BackendConfig {
            kind: BackendKind::OpenaiCompatible,
            url: Some(url.into()),
            api_key: Some("sk-test".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let config = BackendConfig {
            kind: BackendKind::OpenaiCompatible,
            api_key_env: Some("FXDESK_TEST_DEFINITELY_UNSET_KEY".into()),
            ..Default::default()
        };
        let err = OpenAiCompatibleBackend::new("deepseek_api", &config).unwrap_err();
        assert!(matches!(err, FxError::Config(_)));
        assert!(err.to_string().contains("FXDESK_TEST_DEFINITELY_UNSET_KEY"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let backend =
            OpenAiCompatibleBackend::new("deepseek_api", &config("https://api.deepseek.com"))
                .unwrap();
        let debug = format!("{:?}", backend);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-test"));
    }

    #[test]
    fn test_endpoint_joins_v1_once() {
        let plain =
            OpenAiCompatibleBackend::new("a", &config("https://api.deepseek.com")).unwrap();
        assert_eq!(
            plain.endpoint("chat/completions"),
            "https://api.deepseek.com/v1/chat/completions"
        );

        let versioned =
            OpenAiCompatibleBackend::new("b", &config("https://example.com/v1/")).unwrap();
        assert_eq!(versioned.endpoint("models"), "https://example.com/v1/models");
    }

    #[test]
    fn test_request_body_json_mode() {
        let req = BackendRequest {
            model: "deepseek-chat".into(),
            system_prompt: String::new(),
            user_content: "hi".into(),
            temperature: 0.0,
            timeout: Duration::from_secs(1),
            json_mode: true,
        };
        let body = serde_json::to_value(OpenAiCompatibleBackend::build_request(&req)).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_without_content_parses() {
        let parsed: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"role": "assistant"}}]}"#).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
