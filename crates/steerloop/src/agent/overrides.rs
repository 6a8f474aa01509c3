//! Administrator-configured overrides and the stores that provide them.
//!
//! Overrides are read once per chat-mode call, concurrently with routing.
//! The loop never writes them back.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use tracing::debug;

/// Allowed range of [`AdminOverrides::max_steps_multiplier`].
pub const MULTIPLIER_RANGE: std::ops::RangeInclusive<f64> = 0.5..=3.0;

/// Allowed range of [`AdminOverrides::temperature`].
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;

#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStyle {
    Concise,
    #[default]
    Balanced,
    Detailed,
}

#[derive(Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CitationFormat {
    #[default]
    Inline,
    Footnotes,
    None,
}

/// Operator settings applied to every chat-mode call.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AdminOverrides {
    pub response_style: ResponseStyle,
    /// Response language, or `"auto"` to follow the user.
    pub language: String,
    /// Model preferred over the router's suggestion.
    pub default_model: Option<String>,
    /// Scales the router's step budget. Must lie in `0.5..=3.0`.
    pub max_steps_multiplier: f64,
    pub temperature: f32,
    pub search_instructions: Option<String>,
    pub citation_format: CitationFormat,
    /// Free-form text appended to the instructions.
    pub additional_prompt: Option<String>,
}

impl Default for AdminOverrides {
    fn default() -> Self {
        Self {
            response_style: ResponseStyle::Balanced,
            language: "auto".into(),
            default_model: None,
            max_steps_multiplier: 1.0,
            temperature: 0.7,
            search_instructions: None,
            citation_format: CitationFormat::Inline,
            additional_prompt: None,
        }
    }
}

impl AdminOverrides {
    /// Check numeric domains. The resolver itself does not clamp.
    pub fn validate(&self) -> Result<(), String> {
        if !MULTIPLIER_RANGE.contains(&self.max_steps_multiplier) {
            return Err(format!(
                "maxStepsMultiplier {} outside {}..={}",
                self.max_steps_multiplier,
                MULTIPLIER_RANGE.start(),
                MULTIPLIER_RANGE.end()
            ));
        }
        if !TEMPERATURE_RANGE.contains(&self.temperature) {
            return Err(format!(
                "temperature {} outside {}..={}",
                self.temperature,
                TEMPERATURE_RANGE.start(),
                TEMPERATURE_RANGE.end()
            ));
        }
        Ok(())
    }

    /// Parse and validate overrides from JSON text.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let overrides: Self =
            serde_json::from_str(json).map_err(|e| format!("invalid overrides JSON: {e}"))?;
        overrides.validate()?;
        Ok(overrides)
    }
}

// ── Providers ──────────────────────────────────────────────────────

/// Boxed future returned by [`OverridesProvider::get`].
pub type OverridesFuture<'a> =
    Pin<Box<dyn Future<Output = Result<AdminOverrides, String>> + Send + 'a>>;

/// Read-only source of [`AdminOverrides`]. Caching is the provider's concern.
pub trait OverridesProvider: Send + Sync {
    fn get(&self) -> OverridesFuture<'_>;
}

/// Fixed overrides held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticOverrides(AdminOverrides);

impl StaticOverrides {
    pub fn new(overrides: AdminOverrides) -> Self {
        Self(overrides)
    }
}

impl OverridesProvider for StaticOverrides {
    fn get(&self) -> OverridesFuture<'_> {
        let overrides = self.0.clone();
        Box::pin(async move { Ok(overrides) })
    }
}

/// Overrides read from a JSON file on every call.
#[derive(Debug, Clone)]
pub struct FileOverridesProvider {
    path: PathBuf,
}

impl FileOverridesProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OverridesProvider for FileOverridesProvider {
    fn get(&self) -> OverridesFuture<'_> {
        Box::pin(async move {
            let text = tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| format!("failed to read {}: {e}", self.path.display()))?;
            debug!("Loaded admin overrides from {}", self.path.display());
            AdminOverrides::from_json(&text)
        })
    }
}
