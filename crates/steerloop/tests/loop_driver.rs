//! End-to-end tests for the loop driver.
//!
//! A scripted [`FnInvoker`] stands in for the provider. Classification
//! requests are recognized by their response schema; everything else is a
//! loop step.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use steerloop::api::invoke::{FnInvoker, InvocationRequest};
use steerloop::api::router::{ComplexityTier, FALLBACK_MAX_STEPS, TierProfile};
use steerloop::prelude::*;
use steerloop::{DEFAULT_MODEL, MessageRole};

const TEST_MODEL: &str = "test/loop-model";

fn classification(tier: &str) -> Result<ModelResponse, String> {
    Ok(ModelResponse::text(
        format!(r#"{{"complexity":"{tier}","reasoning":"scripted"}}"#),
        Usage::new(20, 5),
    ))
}

fn think_call(id: usize) -> ToolCallRecord {
    ToolCallRecord {
        id: format!("call-{id}"),
        name: "think".into(),
        input: json!({"reasoning": format!("pass {id}")}),
    }
}

/// Chat config whose `tier` maps to `max_steps` steps on the test model.
fn chat_config(tier: ComplexityTier, max_steps: u32) -> LoopConfig {
    LoopConfig::Chat(
        ChatLoopConfig::new("You answer questions.").with_router(
            RouterConfig::default().with_tier(tier, TierProfile::new(max_steps, TEST_MODEL)),
        ),
    )
}

/// Calls a tool whenever tools are offered, answers in text otherwise.
fn tool_happy_model<'a>(tier: &'static str, steps: &'a AtomicUsize) -> impl ModelInvoker + 'a {
    FnInvoker::new(move |req: &InvocationRequest<'_>| {
        if req.response_schema.is_some() {
            return classification(tier);
        }
        let n = steps.fetch_add(1, Ordering::SeqCst);
        if req.tools.is_empty() {
            Ok(ModelResponse::text("final answer", Usage::new(100, 20)))
        } else {
            Ok(ModelResponse::tool_calls(vec![think_call(n)], Usage::new(100, 10)))
        }
    })
}

/// Collects every event as a short label.
#[derive(Default)]
struct Recorder(Mutex<Vec<String>>);

impl Recorder {
    fn labels(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.labels().iter().filter(|l| l.starts_with(prefix)).count()
    }
}

impl EventHandler for Recorder {
    fn on_event(&self, event: &LoopEvent<'_>) {
        let label = match event {
            LoopEvent::RouterDecided { decision } => format!("router:{}", decision.complexity),
            LoopEvent::CallStarted { context } => format!("started:{}", context.max_steps),
            LoopEvent::InputsRepaired { step, count } => format!("repaired:{step}:{count}"),
            LoopEvent::ContextCompacted { step, .. } => format!("compacted:{step}"),
            LoopEvent::ToolsDisabled { step, reason } => format!("disabled:{step}:{reason:?}"),
            LoopEvent::ToolExecuted { name, .. } => format!("tool:{name}"),
            LoopEvent::StepFinished { step, .. } => format!("step:{}", step.index),
            LoopEvent::Cancelled { steps_completed } => format!("cancelled:{steps_completed}"),
            LoopEvent::LoopFinished { .. } => "finished".to_string(),
        };
        self.0.lock().unwrap().push(label);
    }
}

fn tools() -> ToolSet {
    ToolSet::new().with(ThinkTool)
}

fn question() -> Vec<Message> {
    vec![Message::user("How do I rotate my API key?")]
}

// ── Termination ────────────────────────────────────────────────────

#[tokio::test]
async fn tool_happy_model_ends_on_text_within_budget() {
    let calls = AtomicUsize::new(0);
    let model = tool_happy_model("simple", &calls);
    let tools = tools();
    let recorder = Recorder::default();

    let result = LoopDriver::new(&model, &tools, chat_config(ComplexityTier::Simple, 5))
        .with_event_handler(&recorder)
        .run(question(), RunOptions::default())
        .await
        .unwrap();

    // Steps 3 and 4 are reserved for synthesis; step 3 answers.
    assert_eq!(result.finish, FinishReason::Completed);
    assert_eq!(result.text, "final answer");
    assert_eq!(result.steps.len(), 4);
    assert_eq!(result.total_tool_calls(), 3);
    assert_eq!(result.max_steps, 5);
    assert_eq!(result.model, TEST_MODEL);
    assert!(!result.steps[3].tools_offered);
    assert_eq!(recorder.count("disabled:3:ReservedForSynthesis"), 1);
    assert_eq!(recorder.count("tool:think"), 3);
    assert_eq!(recorder.count("step:"), 4);
    assert_eq!(recorder.labels().last().map(String::as_str), Some("finished"));

    // user, 3 x (assistant call + tool result), final assistant text
    assert_eq!(result.messages.len(), 8);
    let last = result.messages.last().unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert_eq!(last.text(), "final answer");
}

#[tokio::test]
async fn tool_streak_forces_text_past_sixty_percent() {
    let calls = AtomicUsize::new(0);
    let model = tool_happy_model("complex", &calls);
    let tools = tools();
    let recorder = Recorder::default();

    let result = LoopDriver::new(&model, &tools, chat_config(ComplexityTier::Complex, 20))
        .with_event_handler(&recorder)
        .run(question(), RunOptions::default())
        .await
        .unwrap();

    // Streak rule applies from step 12 (60% of 20).
    assert_eq!(result.finish, FinishReason::Completed);
    assert_eq!(result.steps.len(), 13);
    assert_eq!(recorder.count("disabled:12:ToolStreak"), 1);
    assert_eq!(result.text, "final answer");
}

#[tokio::test]
async fn single_step_budget_answers_without_tools() {
    let calls = AtomicUsize::new(0);
    let model = tool_happy_model("trivial", &calls);
    let tools = tools();

    let result = LoopDriver::new(&model, &tools, chat_config(ComplexityTier::Trivial, 1))
        .run(question(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.steps.len(), 1);
    assert!(!result.steps[0].tools_offered);
    assert_eq!(result.text, "final answer");
}

#[tokio::test]
async fn tool_calls_on_tool_less_steps_are_discarded() {
    let model = FnInvoker::new(|req| {
        if req.response_schema.is_some() {
            return classification("trivial");
        }
        let mut response = ModelResponse::tool_calls(vec![think_call(0)], Usage::new(10, 1));
        response.text = Some("best effort".into());
        Ok(response)
    });
    let tools = tools();

    let result = LoopDriver::new(&model, &tools, chat_config(ComplexityTier::Trivial, 2))
        .run(question(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.finish, FinishReason::Completed);
    assert_eq!(result.steps.len(), 1);
    assert!(result.steps[0].tool_calls.is_empty());
    assert_eq!(result.text, "best effort");
}

// ── Admin mode ─────────────────────────────────────────────────────

#[tokio::test]
async fn admin_mode_never_forces_text() {
    let calls = AtomicUsize::new(0);
    let model = FnInvoker::new(|req| {
        assert!(req.response_schema.is_none(), "admin mode must not route");
        let n = calls.fetch_add(1, Ordering::SeqCst);
        assert!(!req.tools.is_empty());
        assert_eq!(req.instructions, "Static admin prompt.");
        let mut response = ModelResponse::tool_calls(vec![think_call(n)], Usage::new(50, 5));
        response.text = Some(format!("working {n}"));
        Ok(response)
    });
    let tools = tools();
    let recorder = Recorder::default();
    let config = AdminLoopConfig::new("Static admin prompt.").with_max_steps(3);

    let result = LoopDriver::new(&model, &tools, LoopConfig::Admin(config))
        .with_event_handler(&recorder)
        .run(question(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.finish, FinishReason::StepBudgetExhausted);
    assert_eq!(result.steps.len(), 3);
    assert_eq!(result.text, "working 2");
    assert_eq!(result.model, DEFAULT_MODEL);
    assert_eq!(recorder.count("disabled"), 0);
    assert_eq!(recorder.count("router"), 0);
}

#[tokio::test]
async fn admin_mode_refuses_tools_outside_the_allowed_set() {
    static PURGED: AtomicUsize = AtomicUsize::new(0);
    let calls = AtomicUsize::new(0);
    let model = FnInvoker::new(|req| {
        let names: Vec<&str> = req.tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, ["think"]);
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            let call = ToolCallRecord {
                id: "call-0".into(),
                name: "purge_index".into(),
                input: json!({}),
            };
            return Ok(ModelResponse::tool_calls(vec![call], Usage::new(10, 1)));
        }
        Ok(ModelResponse::text("done", Usage::new(10, 1)))
    });
    let tools = ToolSet::new().with(ThinkTool).with(FnTool::new(
        ToolDef::new("purge_index", "Delete the search index", json!({"type": "object"})),
        |_: serde_json::Value| {
            PURGED.fetch_add(1, Ordering::SeqCst);
            async { "purged".to_string() }
        },
    ));
    let config = AdminLoopConfig::new("Static admin prompt.").with_allowed_tools(["think"]);

    let result = LoopDriver::new(&model, &tools, LoopConfig::Admin(config))
        .run(question(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(PURGED.load(Ordering::SeqCst), 0);
    assert!(result.completed());
    let output = result.messages.iter().flat_map(|m| &m.content).find_map(|p| match p {
        ContentPart::ToolResult { output, .. } => Some(output.clone()),
        _ => None,
    });
    assert_eq!(
        output.as_deref(),
        Some("Error: tool 'purge_index' is not available")
    );
}

// ── Routing and parameters ─────────────────────────────────────────

#[tokio::test]
async fn malformed_classification_uses_fallback_budget() {
    let model = FnInvoker::new(|req| {
        if req.response_schema.is_some() {
            return Ok(ModelResponse::text("definitely not json", Usage::default()));
        }
        Ok(ModelResponse::text("ok", Usage::new(10, 1)))
    });
    let tools = tools();

    let result = LoopDriver::new(&model, &tools, LoopConfig::chat())
        .run(question(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.max_steps, FALLBACK_MAX_STEPS);
    assert_eq!(result.model, DEFAULT_MODEL);
    assert_eq!(result.text, "ok");
}

#[tokio::test]
async fn classifier_failure_does_not_fail_the_run() {
    let model = FnInvoker::new(|req| {
        if req.response_schema.is_some() {
            return Err("classifier unavailable".to_string());
        }
        Ok(ModelResponse::text("ok", Usage::new(10, 1)))
    });
    let tools = tools();

    let result = LoopDriver::new(&model, &tools, LoopConfig::chat())
        .run(question(), RunOptions::default())
        .await
        .unwrap();
    assert!(result.completed());
    assert_eq!(result.max_steps, FALLBACK_MAX_STEPS);
}

#[tokio::test]
async fn overrides_scale_budget_and_pick_model() {
    let seen_model = Mutex::new(String::new());
    let model = FnInvoker::new(|req| {
        if req.response_schema.is_some() {
            return classification("moderate");
        }
        *seen_model.lock().unwrap() = req.model.to_string();
        assert_eq!(req.temperature, Some(0.2));
        Ok(ModelResponse::text("ok", Usage::new(10, 1)))
    });
    let tools = tools();
    let overrides = StaticOverrides::new(AdminOverrides {
        max_steps_multiplier: 0.5,
        default_model: Some("admin/pick".into()),
        temperature: 0.2,
        ..Default::default()
    });

    // moderate: 15 steps, scaled by 0.5 and rounded half away from zero.
    let result = LoopDriver::new(&model, &tools, LoopConfig::chat())
        .with_overrides_provider(&overrides)
        .run(question(), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(result.max_steps, 8);
    assert_eq!(result.model, "admin/pick");
    assert_eq!(*seen_model.lock().unwrap(), "admin/pick");

    // The per-call override still wins.
    let result = LoopDriver::new(&model, &tools, LoopConfig::chat())
        .with_overrides_provider(&overrides)
        .run(question(), RunOptions::new().with_model("caller/pick"))
        .await
        .unwrap();
    assert_eq!(result.model, "caller/pick");
}

#[tokio::test]
async fn router_usage_is_excluded_from_loop_usage() {
    let model = FnInvoker::new(|req| {
        if req.response_schema.is_some() {
            return classification("simple");
        }
        Ok(ModelResponse::text("ok", Usage::new(1_000, 100)))
    });
    let tools = tools();

    let result = LoopDriver::new(&model, &tools, LoopConfig::chat())
        .run(question(), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(result.total_usage, Usage::new(1_000, 100));
    assert!(result.estimated_cost_usd > 0.0);
}

#[tokio::test]
async fn every_call_carries_the_execution_context() {
    let spans = Mutex::new(Vec::new());
    let calls = AtomicUsize::new(0);
    let model = FnInvoker::new(|req| {
        if req.response_schema.is_some() {
            return classification("simple");
        }
        let context = req.context.expect("loop steps carry a context");
        assert_eq!(context.custom_context.as_ref().unwrap()["tenant"], "acme");
        spans.lock().unwrap().push(context.span_id.clone().unwrap());
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
            Ok(ModelResponse::tool_calls(vec![think_call(n)], Usage::new(10, 1)))
        } else {
            Ok(ModelResponse::text("done", Usage::new(10, 1)))
        }
    });
    let tools = tools();
    let mut ctx = serde_json::Map::new();
    ctx.insert("tenant".into(), json!("acme"));

    let result = LoopDriver::new(&model, &tools, LoopConfig::chat())
        .run(question(), RunOptions::new().with_custom_context(ctx))
        .await
        .unwrap();

    let spans = spans.lock().unwrap();
    assert_eq!(spans.len(), 3);
    for (i, span) in spans.iter().enumerate() {
        assert_eq!(*span, format!("{}:s{i}", result.trace_id));
    }
}

// ── History hygiene ────────────────────────────────────────────────

#[tokio::test]
async fn string_encoded_inputs_are_executed_and_repaired() {
    let calls = AtomicUsize::new(0);
    let model = FnInvoker::new(|req| {
        if req.response_schema.is_some() {
            return classification("simple");
        }
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            let call = ToolCallRecord {
                id: "call-0".into(),
                name: "think".into(),
                input: json!("{\"reasoning\":\"decoded\"}"),
            };
            return Ok(ModelResponse::tool_calls(vec![call], Usage::new(10, 1)));
        }
        // The history sent back holds an object, not a string.
        let input = req
            .messages
            .iter()
            .flat_map(|m| &m.content)
            .find_map(|p| match p {
                ContentPart::ToolCall { input, .. } => Some(input.clone()),
                _ => None,
            });
        assert_eq!(input, Some(json!({"reasoning": "decoded"})));
        Ok(ModelResponse::text("done", Usage::new(10, 1)))
    });
    let tools = tools();
    let recorder = Recorder::default();

    let result = LoopDriver::new(&model, &tools, LoopConfig::chat())
        .with_event_handler(&recorder)
        .run(question(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(recorder.count("repaired:1:1"), 1);
    let output = result.messages.iter().flat_map(|m| &m.content).find_map(|p| match p {
        ContentPart::ToolResult { output, .. } => Some(output.clone()),
        _ => None,
    });
    assert_eq!(output.as_deref(), Some("decoded"));
}

#[tokio::test]
async fn large_tool_traffic_is_compacted() {
    let calls = AtomicUsize::new(0);
    let model = FnInvoker::new(|req| {
        if req.response_schema.is_some() {
            return classification("simple");
        }
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
            let call = ToolCallRecord {
                id: format!("call-{n}"),
                name: "think".into(),
                input: json!({"reasoning": "x".repeat(400)}),
            };
            Ok(ModelResponse::tool_calls(vec![call], Usage::new(50_000, 10)))
        } else {
            Ok(ModelResponse::text("done", Usage::new(1_000, 10)))
        }
    });
    let tools = tools();
    let recorder = Recorder::default();
    let config = ChatLoopConfig::new("base").with_compaction(
        CompactionConfig::new()
            .with_min_trim_savings(100)
            .with_protected_user_messages(1),
    );
    // A follow-up turn so the first turn's tool traffic becomes prunable.
    let messages = vec![
        Message::user("first question"),
        Message::assistant(vec![ContentPart::tool_call(
            "old",
            "think",
            json!({"reasoning": "y".repeat(2_000)}),
        )]),
        Message::tool_results(vec![ContentPart::tool_result("old", "think", "y".repeat(2_000))]),
        Message::assistant_text("first answer"),
        Message::user("follow-up"),
    ];

    let result = LoopDriver::new(&model, &tools, LoopConfig::Chat(config))
        .with_event_handler(&recorder)
        .run(messages, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(recorder.count("compacted:1"), 1);
    assert!(result.messages.iter().any(|m| m.text() == "first answer"));
    assert!(
        !result
            .messages
            .iter()
            .flat_map(|m| &m.content)
            .any(|p| matches!(p, ContentPart::ToolCall { id, .. } if id == "old"))
    );
}

// ── Failure and cancellation ───────────────────────────────────────

#[tokio::test]
async fn model_error_keeps_partial_steps() {
    let calls = AtomicUsize::new(0);
    let model = FnInvoker::new(|req| {
        if req.response_schema.is_some() {
            return classification("complex");
        }
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n == 2 {
            return Err("upstream 502".to_string());
        }
        Ok(ModelResponse::tool_calls(vec![think_call(n)], Usage::new(10, 1)))
    });
    let tools = tools();

    let err = LoopDriver::new(&model, &tools, LoopConfig::chat())
        .run(question(), RunOptions::default())
        .await
        .unwrap_err();

    match &err {
        LoopError::Model { step, message, .. } => {
            assert_eq!(*step, 2);
            assert_eq!(message, "upstream 502");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.partial_steps().len(), 2);
    assert!(err.to_string().contains("upstream 502"));
}

#[tokio::test]
async fn cancelled_before_start() {
    let model = FnInvoker::new(|_req| panic!("no model call after cancellation"));
    let tools = tools();
    let token = CancellationToken::new();
    token.cancel();
    let recorder = Recorder::default();

    let result = LoopDriver::new(&model, &tools, LoopConfig::chat())
        .with_event_handler(&recorder)
        .with_cancellation(token)
        .run(question(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.finish, FinishReason::Cancelled);
    assert!(result.steps.is_empty());
    assert_eq!(recorder.labels(), ["cancelled:0"]);
}

#[tokio::test]
async fn cancelled_mid_run_returns_completed_steps() {
    let token = CancellationToken::new();
    let calls = AtomicUsize::new(0);
    let model = FnInvoker::new(|req| {
        if req.response_schema.is_some() {
            return classification("complex");
        }
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n == 1 {
            token.cancel();
        }
        Ok(ModelResponse::tool_calls(vec![think_call(n)], Usage::new(10, 1)))
    });
    let tools = tools();
    let recorder = Recorder::default();

    let result = LoopDriver::new(&model, &tools, LoopConfig::chat())
        .with_event_handler(&recorder)
        .with_cancellation(token.clone())
        .run(question(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(result.finish, FinishReason::Cancelled);
    assert_eq!(result.steps.len(), 1);
    assert_eq!(recorder.count("cancelled:1"), 1);
    assert_eq!(recorder.count("finished"), 0);
}

// ── Options ────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_custom_context_is_rejected_before_any_call() {
    let model = FnInvoker::new(|_req| panic!("no model call for invalid options"));
    let tools = tools();
    let mut ctx = serde_json::Map::new();
    ctx.insert("tenant".into(), json!(42));

    let err = LoopDriver::new(&model, &tools, LoopConfig::chat())
        .with_custom_context_schema(json!({
            "type": "object",
            "properties": {"tenant": {"type": "string"}}
        }))
        .run(question(), RunOptions::new().with_custom_context(ctx))
        .await
        .unwrap_err();

    assert!(matches!(err, LoopError::InvalidOptions(_)));
    assert!(err.to_string().contains("/tenant"));
}

#[test]
fn unknown_option_fields_are_rejected() {
    assert!(RunOptions::from_value(json!({"maxSteps": 99})).is_err());
}
