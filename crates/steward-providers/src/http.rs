//! HTTP backend adapters and the config-driven router builder.
//!
//! Two wire dialects are supported:
//!
//! - `OpenAiCompatibleBackend`: `POST {base}/chat/completions`,
//!   `GET {base}/models`, bearer auth.
//! - `OllamaBackend`: `POST {base}/api/chat`, `GET {base}/api/tags`.
//!
//! Non-2xx statuses are classified with `BackendError::from_status`;
//! transport failures with `transport_error`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use steward_contracts::{
    chat::{ChatRequest, ChatResponse, TokenUsage},
    config::{EngineConfig, ProviderConfig, ProviderKind},
    error::{BackendError, BackendErrorKind, StewardError, StewardResult},
};

use crate::{
    backend::ChatBackend,
    router::{BackendOptions, ProviderRouter},
};

/// Classify a reqwest transport failure (no HTTP status available).
pub fn transport_error(err: &reqwest::Error) -> BackendError {
    let kind = if err.is_timeout() {
        BackendErrorKind::Timeout
    } else if err.is_connect() {
        BackendErrorKind::Connection
    } else {
        BackendErrorKind::Other
    };
    BackendError::new(kind, err.to_string())
}

fn decode_error(err: impl std::fmt::Display) -> BackendError {
    BackendError::new(BackendErrorKind::Other, format!("malformed response body: {}", err))
}

fn build_client(timeout_secs: u64) -> StewardResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| StewardError::Config {
            reason: format!("failed to build HTTP client: {}", e),
        })
}

/// GET `url` and return the parsed JSON body, classifying failures.
async fn get_json(client: &Client, url: &str, bearer: Option<&str>) -> Result<Value, BackendError> {
    let mut req = client.get(url);
    if let Some(key) = bearer {
        req = req.bearer_auth(key);
    }
    let resp = req.send().await.map_err(|e| transport_error(&e))?;
    let status = resp.status();
    let text = resp.text().await.map_err(|e| transport_error(&e))?;
    if !status.is_success() {
        return Err(BackendError::from_status(status.as_u16(), &text));
    }
    serde_json::from_str(&text).map_err(decode_error)
}

/// POST `body` as JSON to `url` and return the parsed JSON body.
async fn post_json(client: &Client, url: &str, bearer: Option<&str>, body: &Value) -> Result<Value, BackendError> {
    let mut req = client.post(url).json(body);
    if let Some(key) = bearer {
        req = req.bearer_auth(key);
    }
    let resp = req.send().await.map_err(|e| transport_error(&e))?;
    let status = resp.status();
    let text = resp.text().await.map_err(|e| transport_error(&e))?;
    if !status.is_success() {
        return Err(BackendError::from_status(status.as_u16(), &text));
    }
    serde_json::from_str(&text).map_err(decode_error)
}

// ── OpenAI-compatible ─────────────────────────────────────────────────────────

pub struct OpenAiCompatibleBackend {
    name: String,
    client: Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        api_key: Option<String>,
        default_model: impl Into<String>,
        timeout_secs: u64,
    ) -> StewardResult<Self> {
        Ok(Self {
            name: name.into(),
            client: build_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
        })
    }
}

/// Request body for `/chat/completions`.
pub fn openai_body(request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages,
    });
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(n) = request.max_tokens {
        body["max_tokens"] = json!(n);
    }
    body
}

/// Parse a `/chat/completions` response.
pub fn parse_openai_response(data: &Value) -> Result<ChatResponse, BackendError> {
    let choice = data["choices"].get(0).ok_or_else(|| decode_error("no choices in response"))?;
    let content = choice["message"]["content"].as_str().unwrap_or_default().to_string();

    let usage = data.get("usage").and_then(|u| {
        let prompt = u.get("prompt_tokens")?.as_u64()?;
        let completion = u.get("completion_tokens")?.as_u64()?;
        Some(TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(prompt + completion),
        })
    });

    Ok(ChatResponse {
        content,
        model: data["model"].as_str().map(str::to_string),
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
        usage,
    })
}

#[async_trait]
impl ChatBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(backend = %self.name, model = %request.model, url = %url, "POST chat completion");
        let data = post_json(&self.client, &url, self.api_key.as_deref(), &openai_body(request)).await?;
        parse_openai_response(&data)
    }

    async fn health_check(&self) -> bool {
        self.list_models().await.is_ok()
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/models", self.base_url);
        let data = get_json(&self.client, &url, self.api_key.as_deref()).await?;
        // { "data": [{ "id": "model-name" }, ...] }
        Ok(data["data"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|m| m["id"].as_str().map(str::to_string)).collect())
            .unwrap_or_default())
    }
}

// ── Ollama ────────────────────────────────────────────────────────────────────

pub struct OllamaBackend {
    name: String,
    client: Client,
    base_url: String,
    default_model: String,
}

impl OllamaBackend {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        default_model: impl Into<String>,
        timeout_secs: u64,
    ) -> StewardResult<Self> {
        Ok(Self {
            name: name.into(),
            client: build_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model: default_model.into(),
        })
    }
}

/// Request body for `/api/chat`. Streaming is always off.
pub fn ollama_body(request: &ChatRequest) -> Value {
    let mut options = serde_json::Map::new();
    if let Some(t) = request.temperature {
        options.insert("temperature".into(), json!(t));
    }
    if let Some(n) = request.max_tokens {
        options.insert("num_predict".into(), json!(n));
    }
    json!({
        "model": request.model,
        "messages": request.messages,
        "stream": false,
        "options": options,
    })
}

/// Parse a non-streaming `/api/chat` response.
pub fn parse_ollama_response(data: &Value) -> Result<ChatResponse, BackendError> {
    let content = data["message"]["content"]
        .as_str()
        .ok_or_else(|| decode_error("missing message.content"))?
        .to_string();

    let usage = match (data["prompt_eval_count"].as_u64(), data["eval_count"].as_u64()) {
        (Some(prompt), Some(completion)) => Some(TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }),
        _ => None,
    };

    Ok(ChatResponse {
        content,
        model: data["model"].as_str().map(str::to_string),
        finish_reason: data["done_reason"].as_str().map(str::to_string),
        usage,
    })
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, BackendError> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(backend = %self.name, model = %request.model, url = %url, "POST ollama chat");
        let data = post_json(&self.client, &url, None, &ollama_body(request)).await?;
        parse_ollama_response(&data)
    }

    async fn health_check(&self) -> bool {
        self.list_models().await.is_ok()
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/api/tags", self.base_url);
        let data = get_json(&self.client, &url, None).await?;
        // { "models": [{ "name": "qwen2.5-coder:latest" }, ...] }
        Ok(data["models"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|m| m["name"].as_str().map(str::to_string)).collect())
            .unwrap_or_default())
    }
}

// ── Config wiring ─────────────────────────────────────────────────────────────

/// Build the HTTP backend for one `[providers.<name>]` section.
///
/// The API key is read from the environment variable named by
/// `api_key_env`; a missing variable is logged, not fatal, since the first
/// call will then fail with an auth error and fail over.
pub fn backend_from_config(name: &str, config: &ProviderConfig) -> StewardResult<Arc<dyn ChatBackend>> {
    let timeout = config.timeout_secs();
    Ok(match config.kind {
        ProviderKind::OpenAi => {
            let api_key = config.api_key_env.as_deref().and_then(|var| match std::env::var(var) {
                Ok(key) if !key.trim().is_empty() => Some(key),
                _ => {
                    warn!(backend = %name, env = %var, "API key variable is not set");
                    None
                }
            });
            Arc::new(OpenAiCompatibleBackend::new(name, &config.api_base, api_key, &config.default_model, timeout)?)
        }
        ProviderKind::Ollama => Arc::new(OllamaBackend::new(name, &config.api_base, &config.default_model, timeout)?),
    })
}

/// Build a router with one HTTP backend per configured provider, registered
/// default-first.
pub fn router_from_config(config: &EngineConfig) -> StewardResult<ProviderRouter> {
    let mut router = ProviderRouter::new();
    for name in config.provider_order() {
        let Some(provider) = config.providers.get(&name) else {
            continue;
        };
        let options = BackendOptions {
            catalog: provider.models.iter().map(|m| m.code.clone()).collect(),
            fallbacks: provider.fallbacks.clone(),
        };
        router.register(backend_from_config(&name, provider)?, options)?;
    }
    if let Some(default) = config.default_provider() {
        router.set_default(default);
    }
    for (task_type, route) in config.model_routes() {
        router.set_route(task_type, route);
    }
    info!(backends = ?router.backend_names(), default = ?router.default_backend(), "provider router ready");
    Ok(router)
}
