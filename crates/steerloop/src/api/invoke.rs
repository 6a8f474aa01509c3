//! The model-invocation seam.
//!
//! The loop never talks to a provider directly. It builds an
//! [`InvocationRequest`] and hands it to a [`ModelInvoker`]; the
//! [`OpenRouterClient`](super::client::OpenRouterClient) is one
//! implementation, tests use [`FnInvoker`].

use crate::agent::config::ExecutionContext;
use crate::{Message, Plugin, ToolDef, Usage};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`ModelInvoker::invoke`].
pub type ModelFuture<'a> = Pin<Box<dyn Future<Output = Result<ModelResponse, String>> + Send + 'a>>;

/// How the model may use the offered tools.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    /// The model must answer in text.
    None,
    Required,
}

/// A named JSON schema for structured output.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

/// Everything one model call needs. Borrowed from the driver's per-step
/// state, so building a request never clones the history.
#[derive(Debug, Clone, Copy)]
pub struct InvocationRequest<'a> {
    pub model: &'a str,
    pub instructions: &'a str,
    pub tools: &'a [ToolDef],
    pub plugins: &'a [Plugin],
    pub messages: &'a [Message],
    pub tool_choice: ToolChoice,
    pub temperature: Option<f32>,
    pub response_schema: Option<&'a ResponseSchema>,
    /// Read-only run metadata for observability.
    pub context: Option<&'a ExecutionContext>,
}

impl<'a> InvocationRequest<'a> {
    /// A tool-less request, as used for classification calls.
    pub fn text_only(model: &'a str, instructions: &'a str, messages: &'a [Message]) -> Self {
        Self {
            model,
            instructions,
            tools: &[],
            plugins: &[],
            messages,
            tool_choice: ToolChoice::None,
            temperature: None,
            response_schema: None,
            context: None,
        }
    }
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// The result of one model invocation.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: Usage,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>, usage: Usage) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
            usage,
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallRecord>, usage: Usage) -> Self {
        Self {
            text: None,
            tool_calls: calls,
            usage,
        }
    }

    /// Text content, if present and non-blank.
    pub fn non_empty_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// A model provider capable of executing one invocation.
///
/// Uses a boxed future so that the trait is dyn-compatible; the driver holds
/// a `&dyn ModelInvoker`. Errors are plain strings: the loop reports them
/// verbatim and never retries.
pub trait ModelInvoker: Send + Sync {
    fn invoke<'a>(&'a self, request: InvocationRequest<'a>) -> ModelFuture<'a>;
}

/// A synchronous closure-backed invoker.
///
/// Handy for scripted providers in tests and demos:
///
/// ```
/// use steerloop::api::invoke::{FnInvoker, ModelResponse};
/// use steerloop::Usage;
///
/// let invoker = FnInvoker::new(|_req| Ok(ModelResponse::text("hi", Usage::default())));
/// ```
pub struct FnInvoker<F>(F)
where
    F: Fn(&InvocationRequest<'_>) -> Result<ModelResponse, String> + Send + Sync;

impl<F> FnInvoker<F>
where
    F: Fn(&InvocationRequest<'_>) -> Result<ModelResponse, String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> ModelInvoker for FnInvoker<F>
where
    F: Fn(&InvocationRequest<'_>) -> Result<ModelResponse, String> + Send + Sync,
{
    fn invoke<'a>(&'a self, request: InvocationRequest<'a>) -> ModelFuture<'a> {
        let result = (self.0)(&request);
        Box::pin(async move { result })
    }
}
