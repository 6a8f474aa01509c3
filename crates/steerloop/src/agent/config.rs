//! Configuration types for the [`LoopDriver`](super::driver::LoopDriver).
//!
//! A driver runs in one of two modes, fixed at construction:
//!
//! - **Chat** ([`ChatLoopConfig`]): routes every call through the
//!   [`ComplexityRouter`](crate::api::router::ComplexityRouter), applies the
//!   admin overrides, and enforces the forced-synthesis policy.
//! - **Admin** ([`AdminLoopConfig`]): static instructions, a fixed step cap,
//!   and no routing or forced synthesis.
//!
//! ```ignore
//! let chat = LoopConfig::Chat(
//!     ChatLoopConfig::new("You answer questions about the billing API.")
//!         .with_provider_tool("perplexity/", Plugin::web())
//!         .with_compaction(CompactionConfig::new().with_token_threshold(60_000)),
//! );
//!
//! let admin = LoopConfig::Admin(
//!     AdminLoopConfig::new("You maintain the knowledge base.").with_max_steps(25),
//! );
//! ```

use super::overrides::AdminOverrides;
use super::params::DEFAULT_ADMIN_MAX_STEPS;
use crate::api::router::{RouterConfig, RouterDecision};
use crate::api::tracing::generate_span_id;
use crate::context::compaction::CompactionConfig;
use crate::{DEFAULT_MODEL, Plugin};
use serde::Serialize;

/// Which variant of the loop is running.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    Chat,
    Admin,
}

impl std::fmt::Display for LoopMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopMode::Chat => write!(f, "chat"),
            LoopMode::Admin => write!(f, "admin"),
        }
    }
}

/// Attach a provider plugin when the model ID starts with a prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderToolRule {
    pub model_prefix: String,
    pub plugin: Plugin,
}

impl ProviderToolRule {
    pub fn new(model_prefix: impl Into<String>, plugin: Plugin) -> Self {
        Self {
            model_prefix: model_prefix.into(),
            plugin,
        }
    }

    pub fn matches(&self, model: &str) -> bool {
        model.starts_with(&self.model_prefix)
    }
}

/// Plugins whose rule matches `model`, in rule order.
pub fn plugins_for_model(rules: &[ProviderToolRule], model: &str) -> Vec<Plugin> {
    rules
        .iter()
        .filter(|r| r.matches(model))
        .map(|r| r.plugin.clone())
        .collect()
}

// ── Chat mode ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChatLoopConfig {
    /// Base instructions; the admin overrides are rendered after them.
    pub base_instructions: String,
    pub router: RouterConfig,
    pub compaction: CompactionConfig,
    /// Provider plugins attached per model prefix.
    pub provider_tools: Vec<ProviderToolRule>,
    /// Model used when nothing else names one.
    pub fallback_model: String,
}

impl Default for ChatLoopConfig {
    fn default() -> Self {
        Self {
            base_instructions: String::new(),
            router: RouterConfig::default(),
            compaction: CompactionConfig::default(),
            provider_tools: Vec::new(),
            fallback_model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl ChatLoopConfig {
    pub fn new(base_instructions: impl Into<String>) -> Self {
        Self {
            base_instructions: base_instructions.into(),
            ..Default::default()
        }
    }

    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    pub fn with_provider_tool(mut self, model_prefix: impl Into<String>, plugin: Plugin) -> Self {
        self.provider_tools
            .push(ProviderToolRule::new(model_prefix, plugin));
        self
    }

    /// Set the fallback model for both routing and resolution.
    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = model.into();
        self.router.fallback_model = self.fallback_model.clone();
        self
    }
}

// ── Admin mode ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AdminLoopConfig {
    pub instructions: String,
    /// Step cap. Default: 15.
    pub max_steps: u32,
    pub fallback_model: String,
    pub compaction: CompactionConfig,
    pub temperature: Option<f32>,
    /// Restrict the offered tools to these names. `None` offers all.
    pub allowed_tools: Option<Vec<String>>,
}

impl Default for AdminLoopConfig {
    fn default() -> Self {
        Self {
            instructions: String::new(),
            max_steps: DEFAULT_ADMIN_MAX_STEPS,
            fallback_model: DEFAULT_MODEL.to_string(),
            compaction: CompactionConfig::default(),
            temperature: None,
            allowed_tools: None,
        }
    }
}

impl AdminLoopConfig {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            ..Default::default()
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = model.into();
        self
    }

    pub fn with_compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_allowed_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

// ── Loop config ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum LoopConfig {
    Chat(ChatLoopConfig),
    Admin(AdminLoopConfig),
}

impl LoopConfig {
    /// Chat mode with default settings.
    pub fn chat() -> Self {
        LoopConfig::Chat(ChatLoopConfig::default())
    }

    /// Admin mode with default settings.
    pub fn admin() -> Self {
        LoopConfig::Admin(AdminLoopConfig::default())
    }

    pub fn mode(&self) -> LoopMode {
        match self {
            LoopConfig::Chat(_) => LoopMode::Chat,
            LoopConfig::Admin(_) => LoopMode::Admin,
        }
    }

    pub fn compaction(&self) -> &CompactionConfig {
        match self {
            LoopConfig::Chat(c) => &c.compaction,
            LoopConfig::Admin(c) => &c.compaction,
        }
    }
}

// ── Execution context ──────────────────────────────────────────────

/// Run metadata attached to every model invocation for observability.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub trace_id: String,
    /// `trace_id:sN` for the step being invoked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    pub mode: LoopMode,
    pub model: String,
    pub max_steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router_decision: Option<RouterDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_overrides: Option<AdminOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_context: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ExecutionContext {
    /// Point the span at `step`.
    pub fn enter_step(&mut self, step: usize) {
        self.span_id = Some(generate_span_id(&self.trace_id, step));
    }
}
