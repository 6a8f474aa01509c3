//! Budget and model resolution.
//!
//! Merges the router's suggestion, the admin overrides, and an optional
//! per-call model override into [`EffectiveParameters`], once per call.

use super::overrides::AdminOverrides;
use crate::api::router::RouterDecision;
use serde::Serialize;

/// Default step cap for admin-mode loops.
pub const DEFAULT_ADMIN_MAX_STEPS: u32 = 15;

/// What a call runs with.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveParameters {
    pub model: String,
    pub max_steps: u32,
    pub instructions: String,
}

/// Scale a suggested step budget, rounding half away from zero.
///
/// The multiplier is used as given; callers validate its range upstream.
/// The result is never below 1.
pub fn effective_max_steps(suggested: u32, multiplier: f64) -> u32 {
    let scaled = (suggested as f64 * multiplier).round();
    if scaled.is_nan() || scaled < 1.0 {
        1
    } else if scaled >= u32::MAX as f64 {
        u32::MAX
    } else {
        scaled as u32
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Pick a model: call override, then admin default, then router suggestion,
/// then the global fallback. Blank values count as absent.
pub fn select_model(
    call_override: Option<&str>,
    admin_default: Option<&str>,
    router_suggested: Option<&str>,
    fallback: &str,
) -> String {
    present(call_override)
        .or_else(|| present(admin_default))
        .or_else(|| present(router_suggested))
        .unwrap_or(fallback)
        .to_string()
}

/// Chat-mode parameters: router budget scaled by the admin multiplier.
pub fn resolve_chat(
    decision: &RouterDecision,
    overrides: &AdminOverrides,
    call_override: Option<&str>,
    fallback: &str,
    instructions: String,
) -> EffectiveParameters {
    EffectiveParameters {
        model: select_model(
            call_override,
            overrides.default_model.as_deref(),
            Some(&decision.suggested_model),
            fallback,
        ),
        max_steps: effective_max_steps(
            decision.suggested_max_steps,
            overrides.max_steps_multiplier,
        ),
        instructions,
    }
}

/// Admin-mode parameters: fixed cap, caller override or fallback model.
pub fn resolve_admin(
    max_steps_cap: u32,
    call_override: Option<&str>,
    fallback: &str,
    instructions: String,
) -> EffectiveParameters {
    EffectiveParameters {
        model: select_model(call_override, None, None, fallback),
        max_steps: max_steps_cap.max(1),
        instructions,
    }
}
