//! Forced-synthesis policy.
//!
//! Evaluated fresh before every chat-mode step from the step history alone.
//! A step either runs with tools enabled or with tools withheld, in which
//! case the model has to answer in text. Two rules withhold tools:
//!
//! 1. The last two steps of the budget are reserved for synthesis.
//! 2. Past 60% of the budget (and never before step 3), a trailing streak of
//!    four or more tool-calling steps forces a text step.
//!
//! Together they guarantee that the loop ends on text, not on a dangling
//! tool call.

use super::events::Step;
use serde::{Deserialize, Serialize};

/// Trailing tool-calling steps that trigger rule 2.
pub const TOOL_STREAK_LIMIT: usize = 4;

/// Earliest step index at which rule 2 may apply.
pub const MIN_STREAK_STEP: usize = 3;

/// Appended to the instructions on a tools-disabled step.
pub const FORCE_TEXT_INSTRUCTION: &str = "\
Tools are unavailable for this step. Using only the information already \
gathered above, write your final answer to the user now. If something could \
not be verified, say so briefly instead of requesting more tool calls.";

/// Why tools were withheld.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ForceReason {
    /// One of the last two steps of the budget.
    ReservedForSynthesis,
    /// Too many consecutive tool-calling steps.
    ToolStreak,
}

impl std::fmt::Display for ForceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForceReason::ReservedForSynthesis => write!(f, "reserved for synthesis"),
            ForceReason::ToolStreak => write!(f, "tool-call streak"),
        }
    }
}

/// Policy outcome for one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepMode {
    ToolsEnabled,
    ToolsDisabled(ForceReason),
}

impl StepMode {
    pub fn tools_enabled(&self) -> bool {
        matches!(self, StepMode::ToolsEnabled)
    }
}

/// Number of trailing steps that each made at least one tool call.
pub fn tool_streak(steps: &[Step]) -> usize {
    steps.iter().rev().take_while(|s| s.has_tool_calls()).count()
}

/// Decide whether `step_index` (zero-based) may use tools.
pub fn evaluate_step(step_index: usize, max_steps: u32, steps: &[Step]) -> StepMode {
    let max_steps = max_steps as usize;
    if step_index >= max_steps.saturating_sub(2) {
        return StepMode::ToolsDisabled(ForceReason::ReservedForSynthesis);
    }
    let streak_floor = MIN_STREAK_STEP.max(max_steps * 3 / 5);
    if step_index >= streak_floor && tool_streak(steps) >= TOOL_STREAK_LIMIT {
        return StepMode::ToolsDisabled(ForceReason::ToolStreak);
    }
    StepMode::ToolsEnabled
}

/// Whether `step_index` must be a text-only step.
pub fn should_force_text_only_step(step_index: usize, max_steps: u32, steps: &[Step]) -> bool {
    !evaluate_step(step_index, max_steps, steps).tools_enabled()
}
