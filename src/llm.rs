//! Hosted LLM clients.
//!
//! Three collaborators use a model: the documentation generator, the plan
//! generator, and chat. Each gets its own [`LlmClient`] built from its
//! `[llm.*]` section. A `disabled` section yields no client and the caller
//! falls back to its offline output.
//!
//! # Retry Strategy
//!
//! Both providers retry transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LlmConfig, LlmEndpointConfig};

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A text-completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider and model, e.g. `anthropic/claude-sonnet-4-20250514`.
    fn name(&self) -> String;
    /// Token budget configured for this endpoint.
    fn max_tokens(&self) -> u32;
    /// Send one user prompt and return the model's text reply.
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

/// Clients for the three generation stages; `None` means offline.
#[derive(Clone, Default)]
pub struct LlmClients {
    pub docs: Option<Arc<dyn LlmClient>>,
    pub plan: Option<Arc<dyn LlmClient>>,
    pub chat: Option<Arc<dyn LlmClient>>,
}

impl LlmClients {
    /// No remote clients at all.
    pub fn offline() -> Self {
        Self::default()
    }

    /// Build each enabled endpoint, reading its API key from the environment
    /// variable the endpoint names.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            docs: build_client(config, &config.docs).context("llm.docs")?,
            plan: build_client(config, &config.plan).context("llm.plan")?,
            chat: build_client(config, &config.chat).context("llm.chat")?,
        })
    }
}

fn build_client(
    config: &LlmConfig,
    endpoint: &LlmEndpointConfig,
) -> Result<Option<Arc<dyn LlmClient>>> {
    if !endpoint.is_enabled() {
        return Ok(None);
    }

    let key_env = endpoint.key_env();
    let api_key = match std::env::var(&key_env) {
        Ok(key) if !key.trim().is_empty() => key,
        _ => bail!("{} environment variable not set", key_env),
    };

    let client: Arc<dyn LlmClient> = match endpoint.provider.as_str() {
        "anthropic" => Arc::new(AnthropicClient::new(endpoint, config, api_key)?),
        "openai" => Arc::new(OpenAIClient::new(endpoint, config, api_key)?),
        other => bail!("Unknown LLM provider: {}", other),
    };
    tracing::debug!(client = %client.name(), "llm client ready");
    Ok(Some(client))
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// POST a JSON body with retry/backoff and return the decoded JSON reply.
pub(crate) async fn post_json_with_retry<F>(
    label: &str,
    max_retries: u32,
    request: F,
) -> Result<serde_json::Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider = label, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        label,
                        status,
                        body_text
                    ));
                    continue;
                }

                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} request failed: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", label)))
}

// ============ Anthropic ============

/// Anthropic Messages API client.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    max_retries: u32,
}

impl AnthropicClient {
    pub fn new(endpoint: &LlmEndpointConfig, config: &LlmConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            http: http_client(config.timeout_secs)?,
            api_key,
            model: endpoint
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            base_url: endpoint
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
            max_tokens: endpoint.max_tokens,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn name(&self) -> String {
        format!("anthropic/{}", self.model)
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let json = post_json_with_retry("Anthropic", self.max_retries, || {
            self.http
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("Content-Type", "application/json")
                .json(&body)
        })
        .await?;

        parse_anthropic_response(&json)
    }
}

/// Concatenate the `text` blocks of a Messages API reply.
fn parse_anthropic_response(json: &serde_json::Value) -> Result<String> {
    let blocks = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Anthropic response: missing content array"))?;

    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        bail!("Invalid Anthropic response: no text content");
    }
    Ok(text.concat())
}

// ============ OpenAI ============

/// OpenAI Chat Completions client.
pub struct OpenAIClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    max_retries: u32,
}

impl OpenAIClient {
    pub fn new(endpoint: &LlmEndpointConfig, config: &LlmConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            http: http_client(config.timeout_secs)?,
            api_key,
            model: endpoint
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: endpoint
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            max_tokens: endpoint.max_tokens,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    fn name(&self) -> String {
        format!("openai/{}", self.model)
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let json = post_json_with_retry("OpenAI", self.max_retries, || {
            self.http
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
        })
        .await?;

        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_parse_anthropic_joins_text_blocks() {
        let json = serde_json::json!({
            "content": [
                { "type": "text", "text": "Hello, " },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "world" }
            ]
        });
        assert_eq!(parse_anthropic_response(&json).unwrap(), "Hello, world");
        assert!(parse_anthropic_response(&serde_json::json!({ "content": [] })).is_err());
    }

    #[test]
    fn test_parse_openai() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hi" } }]
        });
        assert_eq!(parse_openai_response(&json).unwrap(), "Hi");
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_disabled_endpoints_build_nothing() {
        let clients = LlmClients::from_config(&LlmConfig::default()).unwrap();
        assert!(clients.docs.is_none());
        assert!(clients.plan.is_none());
        assert!(clients.chat.is_none());
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let mut config = LlmConfig::default();
        config.chat.provider = "anthropic".to_string();
        config.chat.api_key_env = Some("CODEKT_TEST_KEY_THAT_IS_NEVER_SET".to_string());
        let err = LlmClients::from_config(&config).err().unwrap();
        assert!(format!("{:#}", err).contains("CODEKT_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    async fn mock_server(fail_first: usize, fail_status: StatusCode) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/v1/messages",
                post(
                    move |State(hits): State<Arc<AtomicUsize>>| async move {
                        let n = hits.fetch_add(1, Ordering::SeqCst);
                        if n < fail_first {
                            (fail_status, Json(serde_json::json!({ "error": "busy" })))
                        } else {
                            (
                                StatusCode::OK,
                                Json(serde_json::json!({
                                    "content": [{ "type": "text", "text": "done" }]
                                })),
                            )
                        }
                    },
                ),
            )
            .with_state(hits.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), hits)
    }

    fn anthropic_at(base_url: String, max_retries: u32) -> AnthropicClient {
        let endpoint = LlmEndpointConfig {
            provider: "anthropic".to_string(),
            base_url: Some(base_url),
            ..LlmEndpointConfig::default()
        };
        let config = LlmConfig {
            max_retries,
            timeout_secs: 5,
            ..LlmConfig::default()
        };
        AnthropicClient::new(&endpoint, &config, "test-key".to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let (url, hits) = mock_server(1, StatusCode::SERVICE_UNAVAILABLE).await;
        let client = anthropic_at(url, 2);
        let reply = client.complete("hi", 16).await.unwrap();
        assert_eq!(reply, "done");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_errors_fail_fast() {
        let (url, hits) = mock_server(usize::MAX, StatusCode::BAD_REQUEST).await;
        let client = anthropic_at(url, 3);
        let err = client.complete("hi", 16).await.unwrap_err();
        assert!(err.to_string().contains("400"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
