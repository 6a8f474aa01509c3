//! Tool registry: the [`Tool`] trait, [`ToolSet`], and helpers.

pub mod core;

pub use self::core::{
    DEFAULT_MAX_RESULT_BYTES, FnTool, ThinkTool, Tool, ToolFuture, ToolSet, parse_tool_args,
    truncate_result, validate_tool_input,
};
