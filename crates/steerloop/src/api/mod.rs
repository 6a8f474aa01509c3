//! Model interaction layer: invocation seam, transport, routing, and cost tracking.
//!
//! These modules handle everything between the
//! [`LoopDriver`](crate::agent::driver::LoopDriver) and a model provider:
//!
//! - [`invoke`]: the [`ModelInvoker`] trait and the request/response types
//!   the loop speaks.
//! - [`client`]: [`OpenRouterClient`], a reference invoker over the
//!   OpenRouter chat completions API.
//! - [`router`]: [`ComplexityRouter`], which classifies a request once per
//!   call and suggests a step budget and model.
//! - [`tracing`]: correlation IDs (`trace_id` / `span_id`), per-model pricing
//!   tables, and cumulative [`CostTracker`] for spend monitoring.

pub mod client;
pub mod invoke;
pub mod router;
pub mod tracing;

// Re-export commonly used items at the module level.
pub use client::OpenRouterClient;
pub use invoke::{InvocationRequest, ModelInvoker, ModelResponse, ToolCallRecord, ToolChoice};
pub use router::{ComplexityRouter, ComplexityTier, RouterDecision};
pub use tracing::{CostTracker, generate_span_id, generate_trace_id, pricing_for_model};
