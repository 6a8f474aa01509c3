//! Events, handlers, and run results for the [`LoopDriver`](super::driver::LoopDriver).
//!
//! The driver reports progress through [`LoopEvent`] variants covering a run
//! from call-level setup to completion. Handlers are observers only: the
//! loop's termination and results never depend on them.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | Custom `impl EventHandler` | Metrics, UI updates, persistence |

use super::config::ExecutionContext;
use super::policy::ForceReason;
use crate::api::invoke::ToolCallRecord;
use crate::api::router::RouterDecision;
use crate::{Message, Usage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ── Steps ──────────────────────────────────────────────────────────

/// One completed loop iteration. Never mutated after it is recorded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Step {
    /// Zero-based step index.
    pub index: usize,
    /// Tool calls the model requested, in order.
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: Usage,
    /// Non-blank text produced on this step.
    pub text: Option<String>,
    /// Whether tools were offered to the model on this step.
    pub tools_offered: bool,
}

impl Step {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the driver during a run.
#[derive(Debug)]
pub enum LoopEvent<'a> {
    /// The router classified the request (chat mode only).
    RouterDecided { decision: &'a RouterDecision },
    /// Call-level setup finished; the first step is about to start.
    CallStarted { context: &'a ExecutionContext },
    /// The sanitizer repaired string-encoded tool-call inputs.
    InputsRepaired { step: usize, count: usize },
    /// Old tool traffic was pruned from the history.
    ContextCompacted {
        step: usize,
        removed_parts: usize,
        estimated_tokens_saved: usize,
    },
    /// Tools were withheld for this step to force a text answer.
    ToolsDisabled { step: usize, reason: ForceReason },
    /// A tool finished executing.
    ToolExecuted {
        step: usize,
        name: &'a str,
        call_id: &'a str,
        output: &'a str,
    },
    /// A step finished; totals cover every step so far.
    StepFinished {
        step: &'a Step,
        total_usage: Usage,
        total_tool_calls: usize,
    },
    /// The run was cancelled before completing.
    Cancelled { steps_completed: usize },
    /// The loop ended. Fired exactly once per successful run.
    LoopFinished { text: &'a str, total_usage: Usage },
}

/// Observer for loop events.
///
/// ```ignore
/// struct PrintSteps;
///
/// impl EventHandler for PrintSteps {
///     fn on_event(&self, event: &LoopEvent<'_>) {
///         if let LoopEvent::StepFinished { step, total_usage, .. } = event {
///             println!("step {} ({} tokens so far)", step.index, total_usage.total_tokens());
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &LoopEvent<'_>) {
        let _ = event;
    }
}

/// A handler that ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let LoopEvent::LoopFinished { text, .. } = event {
///         println!("{text}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&LoopEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&LoopEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&LoopEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &LoopEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers, in
/// registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, my_metrics_handler);
/// ```
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler without breaking the builder chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &LoopEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &LoopEvent<'_>) {
        match event {
            LoopEvent::RouterDecided { decision } => {
                info!(
                    "Router: {} ({} steps, {}): {}",
                    decision.complexity,
                    decision.suggested_max_steps,
                    decision.suggested_model,
                    decision.reasoning
                );
            }
            LoopEvent::CallStarted { context } => {
                info!(
                    "[{}] {} mode, model={}, max_steps={}",
                    context.trace_id, context.mode, context.model, context.max_steps
                );
            }
            LoopEvent::InputsRepaired { step, count } => {
                warn!("Step {step}: repaired {count} tool-call input(s)");
            }
            LoopEvent::ContextCompacted {
                step,
                removed_parts,
                estimated_tokens_saved,
            } => {
                info!(
                    "Step {step}: compacted context, dropped {removed_parts} tool part(s), ~{estimated_tokens_saved} tokens saved"
                );
            }
            LoopEvent::ToolsDisabled { step, reason } => {
                info!("Step {step}: tools disabled ({reason})");
            }
            LoopEvent::ToolExecuted { name, output, .. } => {
                debug!("Tool {name} result: {} bytes", output.len());
            }
            LoopEvent::StepFinished {
                step,
                total_usage,
                total_tool_calls,
            } => {
                debug!(
                    "Step {} done: {} tool call(s), tokens in={} out={} (run total {} tokens, {} tool calls)",
                    step.index,
                    step.tool_calls.len(),
                    step.usage.input_tokens,
                    step.usage.output_tokens,
                    total_usage.total_tokens(),
                    total_tool_calls
                );
            }
            LoopEvent::Cancelled { steps_completed } => {
                info!("Loop cancelled after {steps_completed} step(s)");
            }
            LoopEvent::LoopFinished { text, total_usage } => {
                let preview: String = text.chars().take(200).collect();
                info!(
                    "Loop finished ({} tokens): {preview}{}",
                    total_usage.total_tokens(),
                    if text.chars().count() > 200 { "..." } else { "" }
                );
            }
        }
    }
}

// ── Run result ─────────────────────────────────────────────────────

/// Why the loop stopped.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model answered without requesting tools.
    Completed,
    /// `max_steps` steps were taken.
    StepBudgetExhausted,
    /// The cancellation token fired.
    Cancelled,
}

/// The result of a [`LoopDriver::run`](super::driver::LoopDriver::run).
#[derive(Debug, Clone)]
pub struct LoopResult {
    pub trace_id: String,
    /// Final answer: the last step's text, or the latest non-blank text.
    pub text: String,
    pub steps: Vec<Step>,
    /// Full history, including the caller's initial messages.
    pub messages: Vec<Message>,
    /// Usage of loop steps. Router usage is only reflected in the cost.
    pub total_usage: Usage,
    pub finish: FinishReason,
    pub estimated_cost_usd: f64,
    pub model: String,
    pub max_steps: u32,
}

impl LoopResult {
    pub fn completed(&self) -> bool {
        self.finish == FinishReason::Completed
    }

    pub fn total_tool_calls(&self) -> usize {
        self.steps.iter().map(|s| s.tool_calls.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn composite_dispatches_in_order() {
        static SEEN: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(|_| SEEN.lock().unwrap().push("first")))
            .with_if(false, FnEventHandler::new(|_| SEEN.lock().unwrap().push("skipped")))
            .with_opt(Some(FnEventHandler::new(|_| SEEN.lock().unwrap().push("second"))));
        handler.on_event(&LoopEvent::Cancelled { steps_completed: 0 });
        assert_eq!(*SEEN.lock().unwrap(), ["first", "second"]);
    }

    #[test]
    fn fn_handler_observes_step_totals() {
        let calls = AtomicUsize::new(0);
        let handler = FnEventHandler::new(|event| {
            if let LoopEvent::StepFinished {
                total_tool_calls, ..
            } = event
            {
                calls.store(*total_tool_calls, Ordering::SeqCst);
            }
        });
        let step = Step {
            index: 1,
            tool_calls: vec![],
            usage: Usage::new(10, 1),
            text: Some("done".into()),
            tools_offered: false,
        };
        handler.on_event(&LoopEvent::StepFinished {
            step: &step,
            total_usage: Usage::new(20, 2),
            total_tool_calls: 3,
        });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!step.has_tool_calls());
    }

    #[test]
    fn logging_handler_handles_every_variant() {
        let step = Step {
            index: 0,
            tool_calls: vec![],
            usage: Usage::default(),
            text: None,
            tools_offered: true,
        };
        LoggingHandler.on_event(&LoopEvent::StepFinished {
            step: &step,
            total_usage: Usage::default(),
            total_tool_calls: 0,
        });
        LoggingHandler.on_event(&LoopEvent::ToolsDisabled {
            step: 4,
            reason: ForceReason::ToolStreak,
        });
        LoggingHandler.on_event(&LoopEvent::LoopFinished {
            text: &"é".repeat(300),
            total_usage: Usage::default(),
        });
    }
}
