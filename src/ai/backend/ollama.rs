//! Ollama Backend
//!
//! Adapter for Ollama's chat API. Serves both the local branch (a developer
//! machine) and the server branch (a shared GPU host); only the URL differs.
//!
//! - `POST {url}/api/chat` with `stream: false`
//! - `GET {url}/api/tags` as the health check

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{
    Backend, BackendConfig, BackendKind, BackendReply, BackendRequest, TokenUsage,
    validate_endpoint,
};
use crate::constants::backend as backend_constants;
use crate::types::{BackendFailure, FxError, Result};

/// Ollama chat backend
pub struct OllamaBackend {
    name: String,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OllamaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaBackend")
            .field("name", &self.name)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl OllamaBackend {
    pub fn new(name: &str, config: &BackendConfig) -> Result<Self> {
        let api_base = config
            .url
            .clone()
            .unwrap_or_else(|| backend_constants::OLLAMA_LOCAL_URL.to_string());
        let api_base = validate_endpoint(&api_base, "Ollama")?;

        // Per-call deadlines are set on each request from the router's
        // resolved timeout; only the connect phase is bounded here.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(
                backend_constants::CONNECT_TIMEOUT_SECS,
            ))
            .build()
            .map_err(|e| FxError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: name.to_string(),
            api_base,
            client,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn build_request(request: &BackendRequest) -> OllamaChatRequest<'_> {
        let mut messages = Vec::with_capacity(2);
        if !request.system_prompt.is_empty() {
            messages.push(OllamaMessage {
                role: "system",
                content: &request.system_prompt,
            });
        }
        messages.push(OllamaMessage {
            role: "user",
            content: &request.user_content,
        });

        OllamaChatRequest {
            model: &request.model,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
            },
            format: request.json_mode.then_some("json"),
        }
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    async fn send(&self, request: &BackendRequest) -> std::result::Result<BackendReply, BackendFailure> {
        let start = Instant::now();
        let url = format!("{}/api/chat", self.api_base);
        let body = Self::build_request(request);

        debug!(backend = %self.name, model = %request.model, "Sending request to Ollama");

        let fail = |f: BackendFailure| f.at(&self.name, &request.model).elapsed(start.elapsed());

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
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

        let parsed: OllamaChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                fail(BackendFailure::timeout(request.timeout))
            } else {
                fail(BackendFailure::invalid_response(format!(
                    "Failed to parse Ollama response: {}",
                    e
                )))
            }
        })?;

        if let Some(error) = parsed.error {
            return Err(fail(BackendFailure::from_http_status(500, &error, &request.model)));
        }

        let text = parsed.message.map(|m| m.content).unwrap_or_default();
        if text.trim().is_empty() {
            return Err(fail(BackendFailure::invalid_response(
                "Empty response from Ollama",
            )));
        }

        Ok(BackendReply {
            text,
            usage: TokenUsage {
                input_tokens: parsed.prompt_eval_count.unwrap_or(0),
                output_tokens: parsed.eval_count.unwrap_or(0),
            },
            latency: start.elapsed(),
        })
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.api_base);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(
                backend_constants::HEALTH_CHECK_TIMEOUT_SECS,
            ))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(backend = %self.name, status = %resp.status(), "Ollama health check failed");
                false
            }
            Err(e) => {
                warn!(backend = %self.name, "Ollama not reachable: {}. Start with: ollama serve", e);
                false
            }
        }
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct OllamaMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaReplyMessage>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaReplyMessage {
    content: String,
}
