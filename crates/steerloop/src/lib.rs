//! Bounded controller for LLM tool-calling loops.
//!
//! `steerloop` decides *what* to send to a model and *when* to stop. It does
//! not execute tools itself and it does not own the model transport; both are
//! plugged in through traits. The core abstraction is the
//! [`LoopDriver`](agent::driver::LoopDriver): it classifies a request, picks a
//! model and a step budget, keeps the conversation inside a token budget, and
//! guarantees that the loop ends with a text answer instead of a dangling
//! tool call.
//!
//! # Getting started
//!
//! ```ignore
//! use steerloop::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OpenRouterClient::new(std::env::var("OPENROUTER_KEY")?)?;
//!     let tools = ToolSet::new().with(my_search_tool());
//!     let overrides = StaticOverrides::new(AdminOverrides::default());
//!
//!     let result = LoopDriver::new(&client, &tools, LoopConfig::chat())
//!         .with_overrides_provider(&overrides)
//!         .with_event_handler(&LoggingHandler)
//!         .run(vec![Message::user("Why does my build fail?")], RunOptions::default())
//!         .await?;
//!
//!     println!("{}", result.text);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Run a loop:** [`LoopDriver`](agent::driver::LoopDriver) with a
//!   [`LoopConfig`](agent::config::LoopConfig) (chat or admin mode).
//! - **Per-step decisions:** [`agent::policy`] (forced synthesis),
//!   [`context::compaction`] (history pruning), [`context::sanitize`]
//!   (tool-call input repair).
//! - **Per-call decisions:** [`api::router`] (complexity classification) and
//!   [`agent::params`] (step budget and model precedence).
//! - **Plug in collaborators:** [`ModelInvoker`](api::invoke::ModelInvoker),
//!   [`Tool`](tools::Tool) / [`ToolSet`](tools::ToolSet),
//!   [`OverridesProvider`](agent::overrides::OverridesProvider), and
//!   [`EventHandler`](agent::events::EventHandler).

pub mod agent;
pub mod api;
pub mod context;
pub mod prelude;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Global fallback model, used when neither the caller, the admin overrides,
/// nor the router name one.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

/// Cheap model used for request classification.
pub const ROUTER_MODEL: &str = "google/gemini-2.5-flash-lite";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`.
///
/// Used for tool parameter schemas, for the router's structured output, and
/// for validating [`RunOptions`](agent::options::RunOptions).
///
/// ```
/// use steerloop::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     query: String,
///     #[serde(default)]
///     limit: Option<u32>,
/// }
///
/// let schema = json_schema_for::<SearchArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"query".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Usage ──────────────────────────────────────────────────────────

/// Token usage reported by the provider for one model invocation, or
/// accumulated over a whole loop.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Add another usage record into this one (saturating).
    pub fn accumulate(&mut self, other: Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens as u64 + self.output_tokens as u64
    }
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation history.
///
/// Instructions travel separately from the history, so there is no system
/// role here.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// One part of a message's content.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// A tool call requested by the model. `input` should be a JSON object;
    /// some providers deliver it as a JSON-encoded string instead, which
    /// [`sanitize_tool_call_inputs`](context::sanitize::sanitize_tool_call_inputs)
    /// repairs.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        name: String,
        output: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        ContentPart::ToolCall {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(
        id: impl Into<String>,
        name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        ContentPart::ToolResult {
            id: id.into(),
            name: name.into(),
            output: output.into(),
        }
    }

    /// Whether this part is a tool call or a tool result.
    pub fn is_tool_content(&self) -> bool {
        matches!(
            self,
            ContentPart::ToolCall { .. } | ContentPart::ToolResult { .. }
        )
    }
}

/// A message in the conversation history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: MessageRole, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![ContentPart::text(text)])
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, vec![ContentPart::text(text)])
    }

    pub fn assistant(content: Vec<ContentPart>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool_results(content: Vec<ContentPart>) -> Self {
        Self::new(MessageRole::Tool, content)
    }

    /// Concatenated text parts, separated by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of tool-call parts in this message.
    pub fn tool_call_count(&self) -> usize {
        self.content
            .iter()
            .filter(|p| matches!(p, ContentPart::ToolCall { .. }))
            .count()
    }
}

// ── Tool definitions ───────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the model (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

// ── Provider tools ─────────────────────────────────────────────────

/// A provider-native tool (OpenRouter plugin).
///
/// These run on the provider side, so the driver only decides whether to
/// attach them; they never reach the [`ToolSet`](tools::ToolSet).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "id")]
pub enum Plugin {
    /// Web search plugin.
    #[serde(rename = "web")]
    Web {
        #[serde(skip_serializing_if = "Option::is_none")]
        max_results: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        search_prompt: Option<String>,
    },
    /// Response healing plugin (repairs truncated JSON output).
    #[serde(rename = "response-healing")]
    ResponseHealing,
}

impl Plugin {
    /// Web-search plugin with provider defaults.
    pub fn web() -> Self {
        Plugin::Web {
            max_results: None,
            search_prompt: None,
        }
    }

    /// The plugin's ID string.
    pub fn id(&self) -> &str {
        match self {
            Plugin::Web { .. } => "web",
            Plugin::ResponseHealing => "response-healing",
        }
    }
}
