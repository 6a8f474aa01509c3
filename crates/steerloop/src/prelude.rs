//! Convenience re-exports for common `steerloop` types.
//!
//! Meant to be glob-imported when wiring up a loop:
//!
//! ```ignore
//! use steerloop::prelude::*;
//! ```
//!
//! Covers the driver and its configuration, message constructors, the
//! collaborator traits, and the stock event handlers. Tuning knobs such as
//! [`CompactionConfig`] are included; wire types and pricing tables are not.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ContentPart, Message, Plugin, ToolDef, Usage, json_schema_for};

// ── Loop runtime ────────────────────────────────────────────────────
pub use crate::agent::{
    AdminLoopConfig, AdminOverrides, ChatLoopConfig, CompositeEventHandler, EventHandler,
    FileOverridesProvider, FinishReason, FnEventHandler, LoggingHandler, LoopConfig, LoopDriver,
    LoopError, LoopEvent, LoopResult, NoopHandler, OverridesProvider, RunOptions, StaticOverrides,
    Step, SystemPromptBuilder,
};

// ── Model layer ─────────────────────────────────────────────────────
pub use crate::api::{ModelInvoker, ModelResponse, OpenRouterClient, ToolCallRecord};
pub use crate::api::router::{RouterConfig, ThreadMetadata};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::CompactionConfig;

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{FnTool, ThinkTool, Tool, ToolFuture, ToolSet, parse_tool_args};

pub use tokio_util::sync::CancellationToken;
