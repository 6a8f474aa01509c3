//! Token-budget compaction of the conversation history.
//!
//! Tool traffic dominates a long loop's context: a single search or file read
//! can be tens of kilobytes, and the model rarely needs it once it has
//! answered the turn that asked for it. Compaction removes tool-call and
//! tool-result parts that precede the last few user turns and keeps all text.
//!
//! Compaction only triggers when the provider reports that the latest step's
//! input crossed [`CompactionConfig::token_threshold`], and only applies when
//! the estimated savings are worth invalidating the provider's prompt cache.

use crate::agent::events::Step;
use crate::{Message, MessageRole};
use tracing::debug;

/// Characters-per-token ratio used for savings estimates.
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Compaction thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionConfig {
    /// Latest-step input tokens above which compaction is considered.
    pub token_threshold: u32,
    /// Number of trailing user messages whose turns are never pruned.
    pub protect_last_user_messages: usize,
    /// Minimum estimated savings, in tokens, for a compaction to apply.
    pub min_trim_savings: usize,
    pub chars_per_token: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            token_threshold: 40_000,
            protect_last_user_messages: 3,
            min_trim_savings: 20_000,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl CompactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token_threshold(mut self, tokens: u32) -> Self {
        self.token_threshold = tokens;
        self
    }

    pub fn with_protected_user_messages(mut self, count: usize) -> Self {
        self.protect_last_user_messages = count;
        self
    }

    pub fn with_min_trim_savings(mut self, tokens: usize) -> Self {
        self.min_trim_savings = tokens;
        self
    }

    pub fn with_chars_per_token(mut self, chars: usize) -> Self {
        self.chars_per_token = chars.max(1);
        self
    }
}

/// A pruned copy of the history.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactedContext {
    pub messages: Vec<Message>,
    /// Tool-call and tool-result parts dropped.
    pub removed_parts: usize,
    pub estimated_tokens_saved: usize,
}

/// Index of the first protected message.
///
/// Everything at or after it is kept verbatim. `0` protects the whole
/// history; `messages.len()` protects nothing.
pub fn protection_cutoff(messages: &[Message], protect_last_user_messages: usize) -> usize {
    if protect_last_user_messages == 0 {
        return messages.len();
    }
    messages
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, m)| m.role == MessageRole::User)
        .nth(protect_last_user_messages - 1)
        .map_or(0, |(i, _)| i)
}

/// Prune old tool traffic if the latest step crossed the token threshold.
///
/// Returns `None` when no compaction applies: no steps yet, the latest step
/// stayed within the threshold, or the estimated savings are below
/// [`CompactionConfig::min_trim_savings`]. The input is never modified.
pub fn compact_context(
    messages: &[Message],
    steps: &[Step],
    config: &CompactionConfig,
) -> Option<CompactedContext> {
    let latest = steps.last()?;
    if latest.usage.input_tokens <= config.token_threshold {
        return None;
    }

    let cutoff = protection_cutoff(messages, config.protect_last_user_messages);
    let (prunable, protected) = messages.split_at(cutoff);

    let mut removed_parts = 0;
    let mut removed_chars = 0;
    for part in prunable.iter().flat_map(|m| &m.content) {
        if part.is_tool_content() {
            removed_parts += 1;
            removed_chars += serde_json::to_string(part).map_or(0, |s| s.len());
        }
    }

    let estimated_tokens_saved = removed_chars / config.chars_per_token.max(1);
    if removed_parts == 0 || estimated_tokens_saved < config.min_trim_savings {
        debug!(
            "Compaction skipped: {} input tokens, ~{} tokens reclaimable",
            latest.usage.input_tokens, estimated_tokens_saved
        );
        return None;
    }

    let mut compacted: Vec<Message> = prunable
        .iter()
        .filter_map(|m| {
            let content: Vec<_> = m
                .content
                .iter()
                .filter(|p| !p.is_tool_content())
                .cloned()
                .collect();
            (!content.is_empty()).then(|| Message::new(m.role, content))
        })
        .collect();
    compacted.extend_from_slice(protected);

    Some(CompactedContext {
        messages: compacted,
        removed_parts,
        estimated_tokens_saved,
    })
}
