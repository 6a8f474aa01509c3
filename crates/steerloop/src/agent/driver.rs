//! The [`LoopDriver`]: a bounded tool-calling loop.
//!
//! A run has two phases:
//!
//! 1. **Call-level setup**, once. Chat mode classifies the request and reads
//!    the admin overrides concurrently, then resolves the model, the step
//!    budget, the instructions, and the tools. Admin mode uses its static
//!    configuration.
//! 2. **Steps**, at most `max_steps`. Before each model call the history is
//!    sanitized and possibly compacted, and in chat mode the forced-synthesis
//!    policy decides whether tools are offered. Requested tools run in order
//!    through the [`ToolSet`]; a step without tool calls ends the loop.
//!
//! # Example
//!
//! ```ignore
//! let tools = ToolSet::new().with(SearchDocs::new(index));
//! let overrides = FileOverridesProvider::new("overrides.json");
//! let cancel = CancellationToken::new();
//!
//! let result = LoopDriver::new(&client, &tools, LoopConfig::Chat(ChatLoopConfig::new(BASE)))
//!     .with_overrides_provider(&overrides)
//!     .with_event_handler(&LoggingHandler)
//!     .with_cancellation(cancel.clone())
//!     .run(vec![Message::user("How do I rotate my API key?")], RunOptions::default())
//!     .await?;
//!
//! match result.finish {
//!     FinishReason::Cancelled => eprintln!("stopped"),
//!     _ => println!("{}", result.text),
//! }
//! ```

use super::config::{
    AdminLoopConfig, ChatLoopConfig, ExecutionContext, LoopConfig, LoopMode, plugins_for_model,
};
use super::events::{EventHandler, FinishReason, LoopEvent, LoopResult, NoopHandler, Step};
use super::options::{RunOptions, validate_against};
use super::overrides::{AdminOverrides, OverridesProvider};
use super::params::{EffectiveParameters, resolve_admin, resolve_chat};
use super::policy::{StepMode, evaluate_step};
use super::prompt::{build_chat_instructions, with_force_text_instruction};
use crate::api::invoke::{InvocationRequest, ModelInvoker, ToolChoice};
use crate::api::router::{ComplexityRouter, RouterInput};
use crate::api::tracing::{CostTracker, generate_trace_id};
use crate::context::compaction::compact_context;
use crate::context::sanitize::{normalized_tool_input, sanitize_tool_call_inputs};
use crate::tools::ToolSet;
use crate::{ContentPart, Message, Plugin, ToolDef, Usage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ── Errors ─────────────────────────────────────────────────────────

/// Why a run failed. Cancellation is not an error; see
/// [`FinishReason::Cancelled`].
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// Run options or custom context failed validation. No model was called.
    #[error("invalid run options: {0}")]
    InvalidOptions(String),
    /// The model invocation failed. `steps` holds the steps completed before
    /// the failure.
    #[error("model invocation failed at step {step}: {message}")]
    Model {
        step: usize,
        message: String,
        steps: Vec<Step>,
    },
}

impl LoopError {
    /// Steps completed before the failure.
    pub fn partial_steps(&self) -> &[Step] {
        match self {
            LoopError::InvalidOptions(_) => &[],
            LoopError::Model { steps, .. } => steps,
        }
    }
}

// ── Setup types ────────────────────────────────────────────────────

/// Everything fixed for the duration of one call.
#[derive(Debug, Clone)]
pub struct CallSetup {
    pub params: EffectiveParameters,
    pub tools: Vec<ToolDef>,
    pub plugins: Vec<Plugin>,
    pub temperature: Option<f32>,
    /// Whether the forced-synthesis policy applies (chat mode).
    pub force_text_policy: bool,
    pub context: ExecutionContext,
    /// Classifier usage and model, for cost accounting.
    pub router_usage: Option<(String, Usage)>,
}

/// What one step sends to the model.
#[derive(Debug, Clone)]
pub struct StepPlan {
    pub mode: StepMode,
    pub tools: Vec<ToolDef>,
    pub plugins: Vec<Plugin>,
    pub tool_choice: ToolChoice,
    pub instructions: String,
}

impl StepPlan {
    pub fn tools_offered(&self) -> bool {
        !self.tools.is_empty() || !self.plugins.is_empty()
    }

    /// Whether `name` is one of the tool definitions sent on this step.
    pub fn offers(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }
}

/// Mutable state of one run.
struct RunAccumulator {
    trace_id: String,
    steps: Vec<Step>,
    total_usage: Usage,
    total_tool_calls: usize,
    latest_text: Option<String>,
    cost_tracker: CostTracker,
}

impl RunAccumulator {
    /// Final answer: the last step's text, else the latest non-blank text.
    fn final_text(&self) -> String {
        self.steps
            .last()
            .and_then(|s| s.text.clone())
            .or_else(|| self.latest_text.clone())
            .unwrap_or_default()
    }

    fn into_result(self, finish: FinishReason, messages: Vec<Message>, setup: &CallSetup) -> LoopResult {
        let text = self.final_text();
        LoopResult {
            trace_id: self.trace_id,
            text,
            steps: self.steps,
            messages,
            total_usage: self.total_usage,
            finish,
            estimated_cost_usd: self.cost_tracker.estimated_cost_usd,
            model: setup.params.model.clone(),
            max_steps: setup.params.max_steps,
        }
    }
}

// ── Driver ─────────────────────────────────────────────────────────

/// Drives one bounded tool-calling loop per [`run`](Self::run).
pub struct LoopDriver<'a> {
    invoker: &'a dyn ModelInvoker,
    tools: &'a ToolSet,
    config: LoopConfig,
    overrides: Option<&'a dyn OverridesProvider>,
    event_handler: &'a dyn EventHandler,
    cancel: Option<CancellationToken>,
    custom_context_schema: Option<serde_json::Value>,
}

impl<'a> LoopDriver<'a> {
    pub fn new(invoker: &'a dyn ModelInvoker, tools: &'a ToolSet, config: LoopConfig) -> Self {
        Self {
            invoker,
            tools,
            config,
            overrides: None,
            event_handler: &NoopHandler,
            cancel: None,
            custom_context_schema: None,
        }
    }

    /// Source of admin overrides. Without one, chat mode uses defaults.
    pub fn with_overrides_provider(mut self, provider: &'a dyn OverridesProvider) -> Self {
        self.overrides = Some(provider);
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Cancel the run when `token` fires. Checked before every step and
    /// raced against in-flight model calls.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// JSON schema that [`RunOptions::custom_context`] must satisfy.
    pub fn with_custom_context_schema(mut self, schema: serde_json::Value) -> Self {
        self.custom_context_schema = Some(schema);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run the loop over `messages` until the model answers without tools,
    /// the step budget runs out, or the run is cancelled.
    pub async fn run(
        &self,
        mut messages: Vec<Message>,
        options: RunOptions,
    ) -> Result<LoopResult, LoopError> {
        self.validate_custom_context(&options)?;

        let token = self.cancel.clone().unwrap_or_default();
        let trace_id = generate_trace_id();
        let mode = self.config.mode();
        info!("Loop run started: trace_id={trace_id}, mode={mode}");

        let setup = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            setup = self.call_setup(trace_id.clone(), &messages, options) => Some(setup),
        };
        let Some(setup) = setup else {
            info!("Cancelled during call-level setup");
            self.event_handler
                .on_event(&LoopEvent::Cancelled { steps_completed: 0 });
            return Ok(self.cancelled_before_setup(trace_id, messages));
        };
        self.event_handler.on_event(&LoopEvent::CallStarted {
            context: &setup.context,
        });

        let mut acc = RunAccumulator {
            trace_id,
            steps: Vec::new(),
            total_usage: Usage::default(),
            total_tool_calls: 0,
            latest_text: None,
            cost_tracker: CostTracker::new(),
        };
        if let Some((model, usage)) = &setup.router_usage {
            acc.cost_tracker.record(model, *usage);
        }

        let mut context = setup.context.clone();
        let max_steps = setup.params.max_steps as usize;
        let mut finish = FinishReason::StepBudgetExhausted;

        for index in 0..max_steps {
            if token.is_cancelled() {
                return Ok(self.cancelled(acc, messages, &setup));
            }

            context.enter_step(index);
            let plan = self.prepare_step(&setup, index, &mut messages, &acc.steps);

            let request = InvocationRequest {
                model: &setup.params.model,
                instructions: &plan.instructions,
                tools: &plan.tools,
                plugins: &plan.plugins,
                messages: &messages,
                tool_choice: plan.tool_choice,
                temperature: setup.temperature,
                response_schema: None,
                context: Some(&context),
            };
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                r = self.invoker.invoke(request) => Some(r),
            };
            let Some(outcome) = outcome else {
                return Ok(self.cancelled(acc, messages, &setup));
            };
            let response = match outcome {
                Ok(r) => r,
                Err(message) => {
                    warn!("Model invocation failed at step {index}: {message}");
                    return Err(LoopError::Model {
                        step: index,
                        message,
                        steps: acc.steps,
                    });
                }
            };

            acc.cost_tracker.record(&setup.params.model, response.usage);
            acc.total_usage.accumulate(response.usage);

            let text = response.non_empty_text().map(str::to_string);
            let mut tool_calls = response.tool_calls;
            if !plan.tools_offered() && !tool_calls.is_empty() {
                warn!(
                    "Step {index}: discarding {} tool call(s) requested without tools",
                    tool_calls.len()
                );
                tool_calls.clear();
            }

            let mut parts = Vec::with_capacity(tool_calls.len() + 1);
            if let Some(t) = &text {
                parts.push(ContentPart::text(t));
            }
            parts.extend(
                tool_calls
                    .iter()
                    .map(|c| ContentPart::tool_call(&c.id, &c.name, c.input.clone())),
            );
            if !parts.is_empty() {
                messages.push(Message::assistant(parts));
            }

            if !tool_calls.is_empty() {
                let mut results = Vec::with_capacity(tool_calls.len());
                for call in &tool_calls {
                    let output = if plan.offers(&call.name) {
                        let input = normalized_tool_input(&call.input);
                        self.tools.execute(&call.name, &input).await
                    } else {
                        warn!("Step {index}: refusing tool '{}', not offered", call.name);
                        format!("Error: tool '{}' is not available", call.name)
                    };
                    self.event_handler.on_event(&LoopEvent::ToolExecuted {
                        step: index,
                        name: &call.name,
                        call_id: &call.id,
                        output: &output,
                    });
                    results.push(ContentPart::tool_result(&call.id, &call.name, output));
                }
                messages.push(Message::tool_results(results));
            }

            acc.total_tool_calls += tool_calls.len();
            if text.is_some() {
                acc.latest_text.clone_from(&text);
            }
            let step = Step {
                index,
                tool_calls,
                usage: response.usage,
                text,
                tools_offered: plan.tools_offered(),
            };
            self.event_handler.on_event(&LoopEvent::StepFinished {
                step: &step,
                total_usage: acc.total_usage,
                total_tool_calls: acc.total_tool_calls,
            });

            let answered = !step.has_tool_calls();
            acc.steps.push(step);
            if answered {
                finish = FinishReason::Completed;
                break;
            }
        }

        if finish == FinishReason::StepBudgetExhausted {
            info!("Step budget exhausted ({max_steps} steps)");
        }
        info!("Loop run finished: {}", acc.cost_tracker.summary());

        let result = acc.into_result(finish, messages, &setup);
        self.event_handler.on_event(&LoopEvent::LoopFinished {
            text: &result.text,
            total_usage: result.total_usage,
        });
        Ok(result)
    }

    fn validate_custom_context(&self, options: &RunOptions) -> Result<(), LoopError> {
        let Some(schema) = &self.custom_context_schema else {
            return Ok(());
        };
        let value = serde_json::Value::Object(options.custom_context.clone().unwrap_or_default());
        validate_against(schema, &value)
            .map_err(|e| LoopError::InvalidOptions(format!("customContext: {e}")))
    }

    // ── Call-level setup ───────────────────────────────────────────

    /// Resolve the parameters fixed for this call.
    pub async fn call_setup(
        &self,
        trace_id: String,
        messages: &[Message],
        options: RunOptions,
    ) -> CallSetup {
        match &self.config {
            LoopConfig::Chat(config) => self.chat_setup(config, trace_id, messages, options).await,
            LoopConfig::Admin(config) => self.admin_setup(config, trace_id, options),
        }
    }

    async fn fetch_overrides(&self) -> AdminOverrides {
        let Some(provider) = self.overrides else {
            return AdminOverrides::default();
        };
        let fetched = provider
            .get()
            .await
            .and_then(|o| o.validate().map(|()| o));
        match fetched {
            Ok(o) => o,
            Err(e) => {
                warn!("Admin overrides unavailable, using defaults: {e}");
                AdminOverrides::default()
            }
        }
    }

    async fn chat_setup(
        &self,
        config: &ChatLoopConfig,
        trace_id: String,
        messages: &[Message],
        options: RunOptions,
    ) -> CallSetup {
        let router = ComplexityRouter::new(config.router.clone());
        let input = RouterInput::from_messages(messages, options.thread);

        let ((decision, router_usage), overrides) = futures::join!(
            router.classify_with_usage(self.invoker, &input),
            self.fetch_overrides()
        );
        self.event_handler
            .on_event(&LoopEvent::RouterDecided { decision: &decision });

        let instructions = build_chat_instructions(&config.base_instructions, &overrides);
        let params = resolve_chat(
            &decision,
            &overrides,
            options.model.as_deref(),
            &config.fallback_model,
            instructions,
        );
        let plugins = plugins_for_model(&config.provider_tools, &params.model);
        debug!(
            "Chat setup: model={}, max_steps={}, {} tool(s), {} plugin(s)",
            params.model,
            params.max_steps,
            self.tools.len(),
            plugins.len()
        );

        CallSetup {
            tools: self.tools.definitions(),
            plugins,
            temperature: Some(overrides.temperature),
            force_text_policy: true,
            context: ExecutionContext {
                trace_id,
                span_id: None,
                mode: LoopMode::Chat,
                model: params.model.clone(),
                max_steps: params.max_steps,
                router_decision: Some(decision),
                admin_overrides: Some(overrides),
                custom_context: options.custom_context,
            },
            router_usage: Some((router.config().classifier_model.clone(), router_usage)),
            params,
        }
    }

    fn admin_setup(&self, config: &AdminLoopConfig, trace_id: String, options: RunOptions) -> CallSetup {
        let params = resolve_admin(
            config.max_steps,
            options.model.as_deref(),
            &config.fallback_model,
            config.instructions.clone(),
        );
        let tools = match &config.allowed_tools {
            Some(names) => self.tools.definitions_for(names),
            None => self.tools.definitions(),
        };
        CallSetup {
            tools,
            plugins: Vec::new(),
            temperature: config.temperature,
            force_text_policy: false,
            context: ExecutionContext {
                trace_id,
                span_id: None,
                mode: LoopMode::Admin,
                model: params.model.clone(),
                max_steps: params.max_steps,
                router_decision: None,
                admin_overrides: None,
                custom_context: options.custom_context,
            },
            router_usage: None,
            params,
        }
    }

    // ── Step-level setup ───────────────────────────────────────────

    /// Sanitize, compact, then apply the step policy (chat mode only).
    pub fn prepare_step(
        &self,
        setup: &CallSetup,
        step_index: usize,
        messages: &mut Vec<Message>,
        steps: &[Step],
    ) -> StepPlan {
        let repaired = sanitize_tool_call_inputs(messages);
        if repaired > 0 {
            self.event_handler.on_event(&LoopEvent::InputsRepaired {
                step: step_index,
                count: repaired,
            });
        }

        if let Some(compacted) = compact_context(messages, steps, self.config.compaction()) {
            self.event_handler.on_event(&LoopEvent::ContextCompacted {
                step: step_index,
                removed_parts: compacted.removed_parts,
                estimated_tokens_saved: compacted.estimated_tokens_saved,
            });
            *messages = compacted.messages;
        }

        let mode = if setup.force_text_policy {
            evaluate_step(step_index, setup.params.max_steps, steps)
        } else {
            StepMode::ToolsEnabled
        };

        match mode {
            StepMode::ToolsEnabled => StepPlan {
                mode,
                tools: setup.tools.clone(),
                plugins: setup.plugins.clone(),
                tool_choice: ToolChoice::Auto,
                instructions: setup.params.instructions.clone(),
            },
            StepMode::ToolsDisabled(reason) => {
                self.event_handler.on_event(&LoopEvent::ToolsDisabled {
                    step: step_index,
                    reason,
                });
                StepPlan {
                    mode,
                    tools: Vec::new(),
                    plugins: Vec::new(),
                    tool_choice: ToolChoice::None,
                    instructions: with_force_text_instruction(&setup.params.instructions),
                }
            }
        }
    }

    // ── Cancellation ───────────────────────────────────────────────

    fn cancelled(&self, acc: RunAccumulator, messages: Vec<Message>, setup: &CallSetup) -> LoopResult {
        info!("Loop cancelled after {} step(s)", acc.steps.len());
        self.event_handler.on_event(&LoopEvent::Cancelled {
            steps_completed: acc.steps.len(),
        });
        acc.into_result(FinishReason::Cancelled, messages, setup)
    }

    fn cancelled_before_setup(&self, trace_id: String, messages: Vec<Message>) -> LoopResult {
        let (model, max_steps) = match &self.config {
            LoopConfig::Chat(c) => (c.fallback_model.clone(), 0),
            LoopConfig::Admin(c) => (c.fallback_model.clone(), c.max_steps),
        };
        LoopResult {
            trace_id,
            text: String::new(),
            steps: Vec::new(),
            messages,
            total_usage: Usage::default(),
            finish: FinishReason::Cancelled,
            estimated_cost_usd: 0.0,
            model,
            max_steps,
        }
    }
}
