//! Per-call options for [`LoopDriver::run`](super::driver::LoopDriver::run).

use crate::api::router::ThreadMetadata;
use crate::json_schema_for;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Caller-supplied options for one run. Unknown fields are rejected.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RunOptions {
    /// Model override; wins over every other model source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Free-form metadata forwarded in the execution context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_context: Option<serde_json::Map<String, serde_json::Value>>,
    /// Thread metadata given to the router.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadMetadata>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_custom_context(
        mut self,
        context: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.custom_context = Some(context);
        self
    }

    pub fn with_thread(mut self, thread: ThreadMetadata) -> Self {
        self.thread = Some(thread);
        self
    }

    /// Validate untrusted JSON against the options schema, then parse it.
    pub fn from_value(value: serde_json::Value) -> Result<Self, String> {
        validate_against(&json_schema_for::<RunOptions>(), &value)
            .map_err(|e| format!("invalid run options: {e}"))?;
        serde_json::from_value(value).map_err(|e| format!("invalid run options: {e}"))
    }
}

/// Validate `value` against a JSON schema, joining every violation.
pub fn validate_against(schema: &serde_json::Value, value: &serde_json::Value) -> Result<(), String> {
    let validator =
        jsonschema::validator_for(schema).map_err(|e| format!("invalid schema: {e}"))?;
    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| {
            let path = e.instance_path().to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{path}: {e}")
            }
        })
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_valid_options() {
        let opts = RunOptions::from_value(json!({
            "model": "openai/gpt-4o",
            "customContext": {"tenant": "acme"},
            "thread": {"title": "Login fails", "labels": ["auth"]}
        }))
        .unwrap();
        assert_eq!(opts.model.as_deref(), Some("openai/gpt-4o"));
        assert_eq!(opts.custom_context.unwrap()["tenant"], "acme");
        assert_eq!(opts.thread.unwrap().labels, ["auth"]);
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = RunOptions::from_value(json!({"maxSteps": 3})).unwrap_err();
        assert!(err.contains("invalid run options"));
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(RunOptions::from_value(json!({"model": 7})).is_err());
        assert!(RunOptions::from_value(json!({"customContext": "flat"})).is_err());
    }

    #[test]
    fn empty_object_is_default() {
        assert_eq!(RunOptions::from_value(json!({})).unwrap(), RunOptions::default());
    }

    #[test]
    fn schema_validation_reports_path() {
        let schema = json!({
            "type": "object",
            "properties": {"tenant": {"type": "string"}},
            "required": ["tenant"]
        });
        assert!(validate_against(&schema, &json!({"tenant": "acme"})).is_ok());
        let err = validate_against(&schema, &json!({"tenant": 5})).unwrap_err();
        assert!(err.contains("/tenant"));
    }
}
