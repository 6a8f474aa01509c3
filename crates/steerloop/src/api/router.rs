//! Complexity routing: one cheap classification per call.
//!
//! The [`ComplexityRouter`] asks a small model to place the request into a
//! [`ComplexityTier`]. The tier then selects a step budget and a model from
//! the [`RouterConfig`] tier table, so cost and latency scale with how hard
//! the request looks.
//!
//! Routing never fails: an empty question, a provider error, or output that
//! does not match the classification schema all produce
//! [`RouterDecision::fallback`].

use super::invoke::{InvocationRequest, ModelInvoker, ResponseSchema};
use crate::{DEFAULT_MODEL, Message, MessageRole, ROUTER_MODEL, Usage, json_schema_for};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Reasoning attached to the default decision.
pub const FALLBACK_REASONING: &str = "Default fallback configuration";

/// Step budget of the default decision.
pub const FALLBACK_MAX_STEPS: u32 = 15;

/// Longest slice of a thread body forwarded to the classifier, in characters.
const MAX_THREAD_BODY_CHARS: usize = 2_000;

const CLASSIFIER_INSTRUCTIONS: &str = "\
You classify requests for a tool-using assistant by how much work they need.

Tiers:
- trivial: greetings, one-line facts, no lookup needed.
- simple: a single lookup or a short explanation.
- moderate: several lookups or a multi-part answer.
- complex: open-ended investigation across many sources or files.

Answer with the tier and one sentence of reasoning.";

// ── Types ──────────────────────────────────────────────────────────

/// Ordinal request complexity.
#[derive(
    Serialize, Deserialize, JsonSchema, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

impl ComplexityTier {
    pub const ALL: [ComplexityTier; 4] = [
        ComplexityTier::Trivial,
        ComplexityTier::Simple,
        ComplexityTier::Moderate,
        ComplexityTier::Complex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityTier::Trivial => "trivial",
            ComplexityTier::Simple => "simple",
            ComplexityTier::Moderate => "moderate",
            ComplexityTier::Complex => "complex",
        }
    }
}

impl std::fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured output expected from the classifier model.
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RouterClassification {
    /// Complexity tier of the request.
    pub complexity: ComplexityTier,
    /// One sentence explaining the tier.
    pub reasoning: String,
}

/// Thread metadata accompanying a request (issue, ticket, discussion).
#[derive(Serialize, Deserialize, JsonSchema, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ThreadMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// What the router classifies.
#[derive(Debug, Clone, Default)]
pub struct RouterInput {
    pub question: String,
    pub thread: Option<ThreadMetadata>,
}

impl RouterInput {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            thread: None,
        }
    }

    pub fn with_thread(mut self, thread: ThreadMetadata) -> Self {
        self.thread = Some(thread);
        self
    }

    /// Use the text of the latest user message as the question.
    pub fn from_messages(messages: &[Message], thread: Option<ThreadMetadata>) -> Self {
        let question = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.text())
            .unwrap_or_default();
        Self { question, thread }
    }

    /// Render the classifier prompt.
    fn render(&self) -> String {
        let mut out = format!("Request:\n{}", self.question.trim());
        let Some(thread) = &self.thread else {
            return out;
        };
        if let Some(source) = &thread.source {
            out.push_str(&format!("\n\nSource: {source}"));
        }
        if let Some(title) = &thread.title {
            out.push_str(&format!("\nThread title: {title}"));
        }
        if !thread.labels.is_empty() {
            out.push_str(&format!("\nLabels: {}", thread.labels.join(", ")));
        }
        if let Some(body) = &thread.body {
            let clipped: String = body.chars().take(MAX_THREAD_BODY_CHARS).collect();
            out.push_str(&format!("\nThread body:\n{clipped}"));
        }
        out
    }
}

/// The router's verdict for one call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouterDecision {
    pub complexity: ComplexityTier,
    pub suggested_max_steps: u32,
    pub suggested_model: String,
    pub reasoning: String,
}

impl RouterDecision {
    /// The documented default: moderate, 15 steps, the fallback model.
    pub fn fallback(fallback_model: &str) -> Self {
        Self {
            complexity: ComplexityTier::Moderate,
            suggested_max_steps: FALLBACK_MAX_STEPS,
            suggested_model: fallback_model.to_string(),
            reasoning: FALLBACK_REASONING.to_string(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.reasoning == FALLBACK_REASONING
    }
}

// ── Configuration ──────────────────────────────────────────────────

/// Step budget and model for one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct TierProfile {
    pub max_steps: u32,
    pub model: String,
}

impl TierProfile {
    pub fn new(max_steps: u32, model: impl Into<String>) -> Self {
        Self {
            max_steps,
            model: model.into(),
        }
    }
}

/// Fast tier model.
pub const FAST_MODEL: &str = "anthropic/claude-3.5-haiku";
/// Standard tier model.
pub const STANDARD_MODEL: &str = "anthropic/claude-sonnet-4";
/// Advanced tier model.
pub const ADVANCED_MODEL: &str = "anthropic/claude-opus-4";

/// Router configuration: classifier model, fallback model, tier table.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub classifier_model: String,
    pub fallback_model: String,
    /// Indexed by `ComplexityTier as usize`.
    pub tiers: [TierProfile; 4],
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            classifier_model: ROUTER_MODEL.to_string(),
            fallback_model: DEFAULT_MODEL.to_string(),
            tiers: [
                TierProfile::new(3, FAST_MODEL),
                TierProfile::new(8, FAST_MODEL),
                TierProfile::new(15, STANDARD_MODEL),
                TierProfile::new(30, ADVANCED_MODEL),
            ],
        }
    }
}

impl RouterConfig {
    pub fn with_classifier_model(mut self, model: impl Into<String>) -> Self {
        self.classifier_model = model.into();
        self
    }

    pub fn with_fallback_model(mut self, model: impl Into<String>) -> Self {
        self.fallback_model = model.into();
        self
    }

    pub fn with_tier(mut self, tier: ComplexityTier, profile: TierProfile) -> Self {
        self.tiers[tier as usize] = profile;
        self
    }

    pub fn tier(&self, tier: ComplexityTier) -> &TierProfile {
        &self.tiers[tier as usize]
    }
}

// ── Router ─────────────────────────────────────────────────────────

/// Classifies requests into complexity tiers.
#[derive(Debug, Clone, Default)]
pub struct ComplexityRouter {
    config: RouterConfig,
}

impl ComplexityRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Classify a request. Never fails.
    pub async fn classify(&self, invoker: &dyn ModelInvoker, input: &RouterInput) -> RouterDecision {
        self.classify_with_usage(invoker, input).await.0
    }

    /// Classify a request and report the classifier's token usage.
    pub async fn classify_with_usage(
        &self,
        invoker: &dyn ModelInvoker,
        input: &RouterInput,
    ) -> (RouterDecision, Usage) {
        if input.question.trim().is_empty() {
            debug!("Router: empty question, using default decision");
            return (self.fallback(), Usage::default());
        }

        let schema = ResponseSchema {
            name: "complexity_classification".into(),
            schema: json_schema_for::<RouterClassification>(),
        };
        let messages = [Message::user(input.render())];
        let mut request = InvocationRequest::text_only(
            &self.config.classifier_model,
            CLASSIFIER_INSTRUCTIONS,
            &messages,
        );
        request.temperature = Some(0.0);
        request.response_schema = Some(&schema);

        let response = match invoker.invoke(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Router classification failed: {e}");
                return (self.fallback(), Usage::default());
            }
        };

        let Some(text) = response.non_empty_text() else {
            warn!("Router classification returned no output");
            return (self.fallback(), response.usage);
        };

        match parse_classification(text) {
            Ok(c) => (self.decide(c), response.usage),
            Err(e) => {
                warn!("Router classification output malformed: {e}");
                (self.fallback(), response.usage)
            }
        }
    }

    /// Map a classification onto the tier table.
    pub fn decide(&self, classification: RouterClassification) -> RouterDecision {
        let profile = self.config.tier(classification.complexity);
        debug!(
            "Router: {} -> {} steps on {}",
            classification.complexity, profile.max_steps, profile.model
        );
        RouterDecision {
            complexity: classification.complexity,
            suggested_max_steps: profile.max_steps,
            suggested_model: profile.model.clone(),
            reasoning: classification.reasoning,
        }
    }

    pub fn fallback(&self) -> RouterDecision {
        RouterDecision::fallback(&self.config.fallback_model)
    }
}

/// Parse classifier output, tolerating a surrounding code fence.
fn parse_classification(text: &str) -> Result<RouterClassification, String> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).map_err(|e| e.to_string())
}
