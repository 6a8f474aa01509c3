//! History hygiene run before every model call.
//!
//! Two passes, applied in this order by
//! [`LoopDriver`](crate::agent::driver::LoopDriver) at the start of each step:
//!
//! 1. **[`sanitize`]**: repairs tool-call inputs that a provider delivered as
//!    JSON-encoded strings instead of objects. Mutates in place.
//!
//! 2. **[`compaction`]**: once the latest step's input tokens cross a
//!    threshold, drops old tool-call and tool-result parts while protecting
//!    the most recent user turns. Returns a new message list; never edits a
//!    message.

pub mod compaction;
pub mod sanitize;

pub use compaction::{CompactedContext, CompactionConfig, compact_context};
pub use sanitize::{normalized_tool_input, sanitize_tool_call_inputs};
