//! Loop runtime: the [`LoopDriver`] and the decisions it makes.
//!
//! - [`driver::LoopDriver`]: the bounded tool-calling loop. Start here.
//! - [`config`]: [`LoopConfig`] with its chat and admin variants, and the
//!   [`ExecutionContext`] attached to every model call.
//! - [`events`]: [`EventHandler`] and [`LoopEvent`] for observing a run,
//!   plus the [`LoopResult`] it returns.
//! - [`policy`]: forced synthesis, i.e. when tools are withheld so the model
//!   has to answer.
//! - [`params`]: step budget and model precedence.
//! - [`overrides`]: operator-controlled [`AdminOverrides`] and where they
//!   come from.
//! - [`prompt`]: [`SystemPromptBuilder`] and the chat-mode instructions.
//! - [`options`]: per-call [`RunOptions`].

pub mod config;
pub mod driver;
pub mod events;
pub mod options;
pub mod overrides;
pub mod params;
pub mod policy;
pub mod prompt;

// Re-export commonly used items at the module level.
pub use config::{AdminLoopConfig, ChatLoopConfig, ExecutionContext, LoopConfig, LoopMode};
pub use driver::{LoopDriver, LoopError};
pub use events::{
    CompositeEventHandler, EventHandler, FinishReason, FnEventHandler, LoggingHandler, LoopEvent,
    LoopResult, NoopHandler, Step,
};
pub use options::RunOptions;
pub use overrides::{AdminOverrides, FileOverridesProvider, OverridesProvider, StaticOverrides};
pub use params::EffectiveParameters;
pub use policy::{ForceReason, StepMode};
pub use prompt::SystemPromptBuilder;
