//! Correlation IDs and cost tracking for loop runs.
//!
//! Assigns a unique `trace_id` to each [`LoopDriver::run`](crate::agent::driver::LoopDriver::run)
//! and a `span_id` to each step within it. Tracks cumulative token usage and
//! estimated cost.

use crate::Usage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Generate a unique trace ID for a loop run.
pub fn generate_trace_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("sl-{ts:x}-{count:04x}")
}

/// Generate a span ID for a step within a run.
pub fn generate_span_id(trace_id: &str, step: usize) -> String {
    format!("{trace_id}:s{step}")
}

/// Per-model pricing for cost estimation (USD per 1M tokens).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Estimate cost for one usage record.
    pub fn estimate_cost(&self, usage: Usage) -> f64 {
        (usage.input_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (usage.output_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self::new(3.0, 15.0)
    }
}

/// Lookup approximate pricing for a model by name.
///
/// Matches on the segment after the last `/`, so org prefixes such as
/// `"my-org/custom-sonnet-finetune"` only match on the model part.
pub fn pricing_for_model(model: &str) -> ModelPricing {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();

    // Approximate list prices. Good enough to spot runaway loops.
    if name.contains("opus") {
        ModelPricing::new(15.0, 75.0)
    } else if name.contains("sonnet") {
        ModelPricing::new(3.0, 15.0)
    } else if name.contains("haiku") {
        ModelPricing::new(0.80, 4.0)
    } else if name.contains("4o-mini") {
        ModelPricing::new(0.15, 0.60)
    } else if name.contains("gpt-4") {
        ModelPricing::new(2.50, 10.0)
    } else if name.contains("gemini") && name.contains("flash-lite") {
        ModelPricing::new(0.10, 0.40)
    } else if name.contains("gemini") && name.contains("flash") {
        ModelPricing::new(0.30, 2.50)
    } else if name.contains("gemini") {
        ModelPricing::new(1.25, 10.0)
    } else if name.contains("deepseek") {
        ModelPricing::new(0.27, 1.10)
    } else {
        ModelPricing::default()
    }
}

/// Cumulative cost tracker for a loop run, router call included.
#[derive(Debug, Default, Clone)]
pub struct CostTracker {
    pub usage: Usage,
    pub estimated_cost_usd: f64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage of one invocation against a model's pricing.
    pub fn record(&mut self, model: &str, usage: Usage) {
        self.usage.accumulate(usage);
        self.estimated_cost_usd += pricing_for_model(model).estimate_cost(usage);
    }

    /// Format as a short summary string.
    pub fn summary(&self) -> String {
        format!(
            "tokens: {} input + {} output = {} total, est. cost: ${:.4}",
            self.usage.input_tokens,
            self.usage.output_tokens,
            self.usage.total_tokens(),
            self.estimated_cost_usd,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_unique() {
        let id1 = generate_trace_id();
        let id2 = generate_trace_id();
        assert_ne!(id1, id2);
        assert!(id1.starts_with("sl-"));
    }

    #[test]
    fn span_id_includes_step() {
        let span = generate_span_id("sl-abc-0000", 3);
        assert_eq!(span, "sl-abc-0000:s3");
    }

    #[test]
    fn cost_estimation() {
        let pricing = ModelPricing::new(3.0, 15.0);
        let cost = pricing.estimate_cost(Usage::new(1_000_000, 100_000));
        assert!((cost - 4.5).abs() < 0.01);
    }

    #[test]
    fn tracker_accumulates_across_models() {
        let mut tracker = CostTracker::new();
        tracker.record("anthropic/claude-3.5-haiku", Usage::new(1000, 500));
        tracker.record("anthropic/claude-opus-4", Usage::new(2000, 1000));
        assert_eq!(tracker.usage, Usage::new(3000, 1500));
        let expected = pricing_for_model("haiku").estimate_cost(Usage::new(1000, 500))
            + pricing_for_model("opus").estimate_cost(Usage::new(2000, 1000));
        assert!((tracker.estimated_cost_usd - expected).abs() < 1e-9);
        assert!(tracker.summary().contains("4500 total"));
    }

    #[test]
    fn pricing_lookup_uses_model_segment() {
        assert!(pricing_for_model("anthropic/claude-opus-4").input_per_million > 10.0);
        assert!(pricing_for_model("google/gemini-2.5-flash-lite").input_per_million < 0.2);
        assert_eq!(
            pricing_for_model("opus-labs/unknown"),
            ModelPricing::default()
        );
    }
}
