//! Tool-call input repair.
//!
//! Some providers occasionally return a tool call's arguments as a
//! JSON-encoded string rather than an object. Sent back verbatim, the next
//! request is rejected, so the history is repaired before every step.

use crate::{ContentPart, Message, MessageRole};
use serde_json::Value;
use std::borrow::Cow;
use tracing::warn;

/// Decode a string-encoded tool input: the object it holds, or `{}`.
fn decode_string_input(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(obj @ Value::Object(_)) => obj,
        Ok(_) | Err(_) => Value::Object(Default::default()),
    }
}

/// The input a tool should receive for a call, decoding string-encoded
/// inputs the same way [`sanitize_tool_call_inputs`] will.
pub fn normalized_tool_input(input: &Value) -> Cow<'_, Value> {
    match input {
        Value::String(raw) => Cow::Owned(decode_string_input(raw)),
        other => Cow::Borrowed(other),
    }
}

/// Replace string-typed tool-call inputs with JSON objects.
///
/// A string that parses to an object is replaced by that object. Anything
/// else becomes `{}`. Returns the number of inputs repaired.
pub fn sanitize_tool_call_inputs(messages: &mut [Message]) -> usize {
    let mut repaired = 0;
    for msg in messages.iter_mut().filter(|m| m.role == MessageRole::Assistant) {
        for part in &mut msg.content {
            let ContentPart::ToolCall { name, input, .. } = part else {
                continue;
            };
            let Value::String(raw) = &*input else {
                continue;
            };
            let fixed = decode_string_input(raw);
            if fixed.as_object().is_some_and(|o| o.is_empty()) {
                warn!("Replaced unparseable input for tool '{name}' with {{}}");
            } else {
                warn!("Repaired string-encoded input for tool '{name}'");
            }
            *input = fixed;
            repaired += 1;
        }
    }
    repaired
}
