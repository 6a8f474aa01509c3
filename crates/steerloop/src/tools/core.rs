//! Tool abstraction for the loop's function-calling steps.
//!
//! The [`Tool`] trait defines what the registry needs from a tool: a static
//! API definition and an async `execute`. Tools are collected into a
//! [`ToolSet`], which handles dispatch, definition export, optional argument
//! validation, and result truncation. The loop never interprets tool output;
//! it only passes it back to the model.

use crate::ToolDef;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, trace};

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = String> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool the model can call.
///
/// ```ignore
/// struct Lookup { client: KbClient }
///
/// impl Tool for Lookup {
///     fn definition(&self) -> ToolDef {
///         ToolDef::new("lookup", "Look up a KB article", json_schema_for::<LookupArgs>())
///     }
///
///     fn execute(&self, input: &Value) -> ToolFuture<'_> {
///         let args: Result<LookupArgs, _> = parse_tool_args(input);
///         Box::pin(async move {
///             match args {
///                 Ok(a) => self.client.fetch(&a.slug).await,
///                 Err(e) => e,
///             }
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The tool definition sent to the model.
    fn definition(&self) -> ToolDef;

    /// Execute the tool with the call's JSON input.
    ///
    /// Failures are returned as `"Error: ..."` strings; the model sees them
    /// as the tool result.
    fn execute(&self, input: &Value) -> ToolFuture<'_>;

    fn name(&self) -> String {
        self.definition().function.name
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools dispatched by name.
///
/// Iteration order is by name, so the definitions sent to the model are
/// stable across steps.
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with_max_result_bytes(15_000)
///     .with_arg_validation(true)
///     .with(SearchDocs::new(index))
///     .with_if(allow_tickets, CreateTicket::new(tracker));
/// ```
pub struct ToolSet {
    tools: BTreeMap<String, Box<dyn Tool>>,
    max_result_bytes: usize,
    validate_args: bool,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("max_result_bytes", &self.max_result_bytes)
            .finish()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_args: false,
        }
    }

    /// Set the maximum result size in bytes before truncation.
    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Validate inputs against each tool's JSON Schema before execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Conditionally register a tool without breaking the builder chain.
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// All tool definitions, ordered by name.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Definitions of the named tools that are registered, ordered by name.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDef> {
        self.tools
            .iter()
            .filter(|(name, _)| names.contains(*name))
            .map(|(_, t)| t.definition())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call by name.
    ///
    /// Unknown tools and validation failures produce an error string for
    /// the model instead of failing the loop. The result is truncated to
    /// the configured size.
    pub async fn execute(&self, name: &str, input: &Value) -> String {
        let Some(tool) = self.tools.get(name) else {
            return format!("Error: unknown tool '{name}'");
        };

        if self.validate_args
            && let Some(error) = validate_tool_input(tool.as_ref(), input)
        {
            return error;
        }

        log_tool_call(name, input);
        let start = std::time::Instant::now();
        let result = tool.execute(input).await;

        debug!(
            "Tool {name} completed in {:.0}ms ({} bytes)",
            start.elapsed().as_secs_f64() * 1000.0,
            result.len()
        );
        trace!(
            "Tool {name} result preview: {}",
            result.chars().take(300).collect::<String>()
        );

        truncate_result(result, self.max_result_bytes)
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

// ── FnTool ────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler =
    Box<dyn Fn(&Value) -> Pin<Box<dyn Future<Output = String> + Send>> + Send + Sync>;

/// A closure-based tool that deserializes its input and delegates to a handler.
///
/// For tools that need shared state, implement [`Tool`] on a struct instead.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct SearchArgs {
///     /// The search query.
///     query: String,
/// }
///
/// let tool = FnTool::new(
///     ToolDef::new("search", "Search the docs", json_schema_for::<SearchArgs>()),
///     |args: SearchArgs| async move { format!("No results for {}", args.query) },
/// );
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: ErasedToolHandler,
}

impl FnTool {
    pub fn new<A, F, Fut>(def: ToolDef, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        let erased = move |input: &Value| -> Pin<Box<dyn Future<Output = String> + Send>> {
            match parse_tool_args::<A>(input) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => Box::pin(async move { e }),
            }
        };
        Self {
            def,
            handler: Box::new(erased),
        }
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute(&self, input: &Value) -> ToolFuture<'_> {
        (self.handler)(input)
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.function.name)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate a tool input against the tool's declared JSON Schema.
///
/// Returns `None` if valid (or if the schema itself does not compile), or
/// an error string the model can act on.
pub fn validate_tool_input(tool: &dyn Tool, input: &Value) -> Option<String> {
    let schema = tool.definition().function.parameters;
    let validator = jsonschema::validator_for(&schema).ok()?;

    let errors: Vec<String> = validator
        .iter_errors(input)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Error: argument validation failed for tool '{}':\n{}\n\
             Please fix the arguments and try again.",
            tool.name(),
            errors.join("\n")
        ))
    }
}

/// Log a tool call at INFO level with a truncated preview of the input.
pub fn log_tool_call(name: &str, input: &Value) {
    let rendered = input.to_string();
    let preview: String = rendered.chars().take(120).collect();
    info!(
        "[tool] {}({preview}{})",
        name,
        if rendered.len() > preview.len() { "..." } else { "" }
    );
    trace!("[tool] {name} input: {rendered}");
}

/// Truncate a string to at most `max` bytes on a char boundary, appending a
/// notice if trimmed.
pub fn truncate_result(mut s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let total = s.len();
    let cut = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max)
        .last()
        .unwrap_or(0);
    s.truncate(cut);
    format!("{s}...\n[truncated: {total} bytes total]")
}

/// Deserialize a tool input into a typed struct.
///
/// The error is formatted for returning directly from [`Tool::execute`].
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(input: &Value) -> Result<T, String> {
    T::deserialize(input).map_err(|e| {
        format!(
            "Error: invalid tool arguments: {e}. \
             Please provide valid JSON matching the tool's parameter schema."
        )
    })
}

// ── Pseudo-tools ───────────────────────────────────────────────────

/// A no-op scratchpad tool. The reasoning is echoed back unchanged.
pub struct ThinkTool;

#[derive(Deserialize, JsonSchema)]
pub struct ThinkArgs {
    /// Your step-by-step reasoning or analysis.
    pub reasoning: String,
}

impl Tool for ThinkTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "think",
            "Think through a problem step-by-step before acting. Write your \
             reasoning as the 'reasoning' argument. This performs no action.",
            crate::json_schema_for::<ThinkArgs>(),
        )
    }

    fn execute(&self, input: &Value) -> ToolFuture<'_> {
        let result = match parse_tool_args::<ThinkArgs>(input) {
            Ok(args) => args.reasoning,
            Err(e) => e,
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_schema_for;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct EchoArgs {
        text: String,
    }

    fn echo() -> FnTool {
        FnTool::new(
            ToolDef::new("echo", "Echo text", json_schema_for::<EchoArgs>()),
            |args: EchoArgs| async move { args.text },
        )
    }

    #[tokio::test]
    async fn dispatches_by_name() {
        let tools = ToolSet::new().with(echo()).with(ThinkTool);
        assert_eq!(tools.names(), ["echo", "think"]);
        assert_eq!(tools.execute("echo", &json!({"text": "hi"})).await, "hi");
        assert_eq!(
            tools.execute("think", &json!({"reasoning": "plan"})).await,
            "plan"
        );
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_string() {
        let tools = ToolSet::new();
        let out = tools.execute("nope", &json!({})).await;
        assert!(out.starts_with("Error: unknown tool"));
    }

    #[tokio::test]
    async fn bad_input_reports_parse_error() {
        let tools = ToolSet::new().with(echo());
        let out = tools.execute("echo", &json!({"text": 5})).await;
        assert!(out.starts_with("Error: invalid tool arguments"));
    }

    #[tokio::test]
    async fn validation_runs_before_execution() {
        let tools = ToolSet::new().with_arg_validation(true).with(echo());
        let out = tools.execute("echo", &json!({})).await;
        assert!(out.contains("argument validation failed for tool 'echo'"));
    }

    #[tokio::test]
    async fn results_are_truncated() {
        let tools = ToolSet::new().with_max_result_bytes(4).with(echo());
        let out = tools.execute("echo", &json!({"text": "abcdefgh"})).await;
        assert!(out.starts_with("abcd..."));
        assert!(out.contains("[truncated: 8 bytes total]"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let out = truncate_result("ééé".to_string(), 3);
        assert!(out.starts_with("é..."));
    }

    #[test]
    fn definitions_for_filters_names() {
        let tools = ToolSet::new().with(echo()).with(ThinkTool).with_if(false, echo());
        let defs = tools.definitions_for(&["think".to_string(), "missing".to_string()]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name(), "think");
        assert!(tools.contains("echo"));
        assert_eq!(tools.len(), 2);
    }
}
