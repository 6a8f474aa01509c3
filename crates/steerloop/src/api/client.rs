//! Reference [`ModelInvoker`] over the OpenRouter chat completions API.
//!
//! Maps the part-based [`Message`] history onto the OpenAI wire format:
//! instructions become a leading system message, tool-call parts become
//! `tool_calls` with JSON-encoded `arguments`, and each tool-result part
//! becomes its own `tool` message.

use super::invoke::{
    InvocationRequest, ModelFuture, ModelInvoker, ModelResponse, ToolCallRecord, ToolChoice,
};
use crate::{ContentPart, Message, MessageRole, Plugin, ToolDef, Usage};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default per-response token limit.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

// ── Wire types ─────────────────────────────────────────────────────

/// Chat completion request body. Unused optional fields are omitted.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<Plugin>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

/// Structured output request (`json_schema` mode).
#[derive(Serialize, Debug)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub fmt_type: &'static str,
    pub json_schema: JsonSchemaFormat,
}

#[derive(Serialize, Debug)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub strict: bool,
    pub schema: serde_json::Value,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WireMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl WireMessage {
    fn plain(role: &'static str, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: WireFunctionCall,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WireFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

#[derive(Deserialize, Debug)]
struct RawUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

// ── Conversion ─────────────────────────────────────────────────────

/// Convert instructions plus part-based history into wire messages.
pub fn to_wire_messages(instructions: &str, messages: &[Message]) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    if !instructions.is_empty() {
        wire.push(WireMessage::plain("system", instructions.to_string()));
    }

    for msg in messages {
        match msg.role {
            MessageRole::User => wire.push(WireMessage::plain("user", msg.text())),
            MessageRole::Assistant => {
                let calls: Vec<WireToolCall> = msg
                    .content
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::ToolCall { id, name, input } => Some(WireToolCall {
                            id: id.clone(),
                            call_type: "function".into(),
                            function: WireFunctionCall {
                                name: name.clone(),
                                arguments: encode_arguments(input),
                            },
                        }),
                        _ => None,
                    })
                    .collect();
                let text = msg.text();
                wire.push(WireMessage {
                    role: "assistant",
                    content: (!text.is_empty()).then_some(text),
                    tool_calls: (!calls.is_empty()).then_some(calls),
                    tool_call_id: None,
                });
            }
            MessageRole::Tool => {
                for part in &msg.content {
                    if let ContentPart::ToolResult { id, output, .. } = part {
                        wire.push(WireMessage {
                            role: "tool",
                            content: Some(output.clone()),
                            tool_calls: None,
                            tool_call_id: Some(id.clone()),
                        });
                    }
                }
            }
        }
    }
    wire
}

fn encode_arguments(input: &serde_json::Value) -> String {
    match input {
        serde_json::Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Decode wire `arguments`. Unparseable payloads are kept as a JSON string
/// so the sanitizer can repair them before the next request.
fn decode_arguments(arguments: &str) -> serde_json::Value {
    serde_json::from_str(arguments)
        .unwrap_or_else(|_| serde_json::Value::String(arguments.to_string()))
}

/// Build the wire request body for an invocation.
pub fn build_chat_request(request: &InvocationRequest<'_>, max_tokens: u32) -> ChatRequest {
    let has_tools = !request.tools.is_empty();
    ChatRequest {
        model: request.model.to_string(),
        messages: to_wire_messages(request.instructions, request.messages),
        max_tokens,
        temperature: request.temperature,
        tools: has_tools.then(|| request.tools.to_vec()),
        tool_choice: has_tools.then_some(request.tool_choice),
        plugins: (!request.plugins.is_empty()).then(|| request.plugins.to_vec()),
        response_format: request.response_schema.map(|s| ResponseFormat {
            fmt_type: "json_schema",
            json_schema: JsonSchemaFormat {
                name: s.name.clone(),
                strict: true,
                schema: s.schema.clone(),
            },
        }),
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    referer: String,
    title: String,
    max_tokens: u32,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_headers(api_key, "https://crates.io/crates/steerloop", "steerloop")
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("steerloop/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            referer: referer.into(),
            title: title.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    /// Override the per-response token limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ModelResponse, String> {
        debug!(
            "LLM request: model={}, messages={}, tools={}, max_tokens={}",
            body.model,
            body.messages.len(),
            body.tools.as_ref().map_or(0, |t| t.len()),
            body.max_tokens,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("OpenRouter API HTTP {status}: {text}"));
        }

        parse_chat_response(&text)
    }
}

/// Parse a raw response body into a [`ModelResponse`].
pub fn parse_chat_response(body: &str) -> Result<ModelResponse, String> {
    let parsed: RawChatResponse =
        serde_json::from_str(body).map_err(|e| format!("failed to parse response: {e}"))?;

    if let Some(err) = parsed.error {
        return Err(format!("OpenRouter API error: {}", err.message));
    }

    let usage = parsed
        .usage
        .map(|u| Usage::new(u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0)))
        .unwrap_or_default();

    let Some(choice) = parsed.choices.and_then(|c| c.into_iter().next()) else {
        debug!("LLM output: empty (no choices)");
        return Ok(ModelResponse {
            usage,
            ..Default::default()
        });
    };

    let tool_calls: Vec<ToolCallRecord> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCallRecord {
            input: decode_arguments(&c.function.arguments),
            id: c.id,
            name: c.function.name,
        })
        .collect();

    debug!(
        "LLM output: {} chars text, {} tool call(s)",
        choice.message.content.as_ref().map_or(0, |s| s.len()),
        tool_calls.len()
    );

    Ok(ModelResponse {
        text: choice.message.content,
        tool_calls,
        usage,
    })
}

impl ModelInvoker for OpenRouterClient {
    fn invoke<'a>(&'a self, request: InvocationRequest<'a>) -> ModelFuture<'a> {
        let body = build_chat_request(&request, self.max_tokens);
        Box::pin(async move { self.chat(&body).await })
    }
}
