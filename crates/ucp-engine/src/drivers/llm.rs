//! `llm` capability
//!
//! Every action builds a single prompt and sends it to an `LlmBackend`.
//! Output is `{ response, model, tokens: {input, output} }`; when the
//! backend reports no usage, token counts are estimated at one token per
//! four characters, rounded up.
//!
//! - `invoke`: `prompt`, optional `context`, `json_schema`, `model`
//! - `analyze`: `data`, optional `instruction`
//! - `generate`: `template`, optional `variables`
//! - `summarize`: `text`, optional `max_length` (words, default 100)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use ucp_core_types::{RequestContext, Sensitive};

use super::args::{optional_str, optional_u64, required, required_str};
use super::{Driver, DriverError};
use crate::config::LlmConfig;

const ACTIONS: &[&str] = &["invoke", "analyze", "generate", "summarize"];
const DEFAULT_SUMMARY_WORDS: u64 = 100;

/// One completion request, already reduced to a prompt
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub prompt: String,
    /// Overrides the backend's configured model
    pub model: Option<String>,
    /// Ask for structured output matching this schema
    pub json_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmCompletion {
    pub content: String,
    pub model: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// ## Errors
    ///
    /// Returns `DriverError` when the model cannot be reached or answers
    /// with an error.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion, DriverError>;
}

/// Token estimate used when the backend reports no usage
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

pub struct LlmDriver {
    backend: Arc<dyn LlmBackend>,
}

impl LlmDriver {
    pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self { backend }
    }

    fn build_request(action: &str, args: &Map<String, Value>) -> Result<LlmRequest, DriverError> {
        let prompt = match action {
            "invoke" => {
                let prompt = required_str(args, "prompt")?;
                match args.get("context").filter(|c| !c.is_null()) {
                    Some(context) => format!("{prompt}\n\nContext:\n{}", pretty(context)),
                    None => prompt.to_string(),
                }
            }
            "analyze" => {
                let data = required(args, "data")?;
                let instruction = optional_str(args, "instruction")?
                    .unwrap_or("Analyze the following data and report the key findings.");
                format!("{instruction}\n\nData:\n{}", pretty(data))
            }
            "generate" => {
                let template = required_str(args, "template")?;
                match args.get("variables").filter(|v| !v.is_null()) {
                    Some(variables) => format!(
                        "Generate content from this template:\n{template}\n\nVariables:\n{}",
                        pretty(variables)
                    ),
                    None => format!("Generate content from this template:\n{template}"),
                }
            }
            "summarize" => {
                let text = required_str(args, "text")?;
                let words = optional_u64(args, "max_length")?.unwrap_or(DEFAULT_SUMMARY_WORDS);
                format!("Summarize the following text in at most {words} words:\n\n{text}")
            }
            other => return Err(DriverError::UnknownAction(other.to_string())),
        };

        Ok(LlmRequest {
            prompt,
            model: optional_str(args, "model")?.map(str::to_string),
            json_schema: args.get("json_schema").filter(|s| !s.is_null()).cloned(),
        })
    }
}

fn pretty(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[async_trait]
impl Driver for LlmDriver {
    fn capability(&self) -> &str {
        "llm"
    }

    fn actions(&self) -> &[&'static str] {
        ACTIONS
    }

    fn meters_tokens(&self) -> bool {
        true
    }

    async fn invoke(
        &self,
        action: &str,
        args: &Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<Value, DriverError> {
        let request = Self::build_request(action, args)?;
        tracing::debug!(
            node_path = %ctx.node_path,
            action,
            prompt_chars = request.prompt.len(),
            "llm request"
        );

        let completion = self.backend.complete(&request).await?;
        let input = completion
            .input_tokens
            .unwrap_or_else(|| estimate_tokens(&request.prompt));
        let output = completion
            .output_tokens
            .unwrap_or_else(|| estimate_tokens(&completion.content));

        let response = if request.json_schema.is_some() {
            serde_json::from_str(&completion.content)
                .unwrap_or(Value::String(completion.content))
        } else {
            Value::String(completion.content)
        };

        Ok(json!({
            "response": response,
            "model": completion.model,
            "tokens": {"input": input, "output": output},
        }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Chat-completions client for any OpenAI-compatible endpoint
pub struct OpenAiCompatibleBackend {
    client: Client,
    endpoint: String,
    model: String,
    timeout_ms: u64,
    api_key: Option<Sensitive<String>>,
}

impl OpenAiCompatibleBackend {
    /// ## Errors
    ///
    /// Returns `DriverError::Failed` if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig, api_key: Option<Sensitive<String>>) -> Result<Self, DriverError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| DriverError::failed(format!("failed to build LLM client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            timeout_ms: config.timeout_ms,
            api_key,
        })
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion, DriverError> {
        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = ChatCompletionRequest {
            model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            response_format: request.json_schema.as_ref().map(|schema| {
                json!({
                    "type": "json_schema",
                    "json_schema": {"name": "response", "schema": schema},
                })
            }),
        };

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key.expose());
        }

        let response = http.send().await.map_err(|e| {
            if e.is_timeout() {
                DriverError::Timeout(self.timeout_ms)
            } else {
                DriverError::failed(format!("LLM request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DriverError::failed(format!(
                "LLM server error: HTTP {} - {}",
                status.as_u16(),
                text
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| DriverError::failed(format!("invalid LLM response: {e}")))?;

        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(DriverError::failed("LLM returned an empty response"));
        }

        Ok(LlmCompletion {
            content,
            model: completion.model.unwrap_or_else(|| model.to_string()),
            input_tokens: completion.usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens: completion.usage.as_ref().map(|u| u.completion_tokens),
        })
    }
}
