//! Multi-round tool loop: model call, tool execution, continuation, repeat.
//!
//! Each round executes every tool call the model produced, concurrently, and
//! feeds the results back as `function_call_output` items. The loop stops when
//! the model answers without tools, after [`MAX_TOOL_ROUNDS`] rounds, on a
//! channel error, or when the cancellation token fires.

use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::artifacts::{
    Artifact, ArtifactRole, Citation, push_unique_artifact, push_unique_citation,
};
use crate::core::channel::{ChannelRequest, ChannelResult, ChannelStatus, open_channel};
use crate::core::events::{ChannelEvent, EventSender, ToolOutput};
use crate::core::tool_tracker::ToolCallState;
use crate::providers::UsageStats;
use crate::providers::openai::responses::{InputItem, ResponsesTransport};
use crate::tools::{ToolContext, ToolExecutionResult, ToolRegistry, ToolReport};

pub const MAX_TOOL_ROUNDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    AwaitingModel,
    ExecutingTools,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionStatus {
    Pending,
    Running,
    Success,
    Error,
}

/// One tool call as it ran inside a round.
#[derive(Debug, Clone, Serialize)]
pub struct ToolExecution {
    /// The call id the model used.
    pub id: String,
    pub tool_name: String,
    pub status: ToolExecutionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Decoded arguments, or the raw buffer when decoding failed.
    pub input: Value,
    pub input_artifacts: Vec<Artifact>,
    pub output_artifacts: Vec<Artifact>,
    /// Envelope that went back to the model.
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub round: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolExecutionRound {
    pub round: usize,
    pub executions: Vec<ToolExecution>,
    /// Text the model wrote after seeing this round's results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_reasoning: Option<String>,
    pub has_error: bool,
    pub total_duration_ms: u64,
}

/// Accumulated outcome of a whole loop.
#[derive(Debug, Clone, Serialize)]
pub struct ToolLoopResult {
    pub instance_id: String,
    pub model: String,
    pub content: String,
    pub reasoning_content: String,
    pub artifacts: Vec<Artifact>,
    pub citations: Vec<Citation>,
    /// Model usage summed over every call of the loop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
    pub rounds: Vec<ToolExecutionRound>,
    pub state: LoopState,
    /// Status of the last model call.
    pub status: ChannelStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The round cap ended the loop while the model still wanted tools.
    pub rounds_exhausted: bool,
}

impl ToolLoopResult {
    fn new(request: &ChannelRequest) -> Self {
        Self {
            instance_id: request.instance.id.clone(),
            model: request.instance.model.clone(),
            content: String::new(),
            reasoning_content: String::new(),
            artifacts: Vec::new(),
            citations: Vec::new(),
            usage: None,
            rounds: Vec::new(),
            state: LoopState::AwaitingModel,
            status: ChannelStatus::Streaming,
            error: None,
            rounds_exhausted: false,
        }
    }

    pub fn is_errored(&self) -> bool {
        self.status == ChannelStatus::Errored
    }

    fn absorb_channel(&mut self, result: &ChannelResult) {
        if !result.content.is_empty() {
            self.content.clone_from(&result.content);
        }
        if !result.reasoning_content.is_empty() {
            self.reasoning_content.clone_from(&result.reasoning_content);
        }
        if let Some(usage) = &result.usage {
            self.usage = Some(UsageStats::merge(self.usage, usage));
        }
        for artifact in &result.artifacts {
            push_unique_artifact(&mut self.artifacts, artifact.clone());
        }
        for citation in &result.citations {
            push_unique_citation(&mut self.citations, citation.clone());
        }
        self.status = result.status;
        self.error.clone_from(&result.error);

        let text = result.content.trim();
        if let Some(previous) = self.rounds.last_mut()
            && previous.model_reasoning.is_none()
            && !text.is_empty()
        {
            previous.model_reasoning = Some(text.to_string());
        }
    }

    fn absorb_round(&mut self, round: ToolExecutionRound, results: &[ToolExecutionResult]) {
        for result in results {
            for artifact in &result.artifacts {
                push_unique_artifact(&mut self.artifacts, artifact.clone());
            }
            for citation in &result.citations {
                push_unique_citation(&mut self.citations, citation.clone());
            }
        }
        self.rounds.push(round);
    }

    fn has_output(&self) -> bool {
        !self.content.is_empty()
            || !self.reasoning_content.is_empty()
            || !self.rounds.is_empty()
            || self.usage.is_some()
    }

    fn finish(mut self, state: LoopState) -> Self {
        self.state = state;
        if self.status == ChannelStatus::Streaming {
            self.status = ChannelStatus::Completed;
        }
        info!(
            instance = %self.instance_id,
            model = %self.model,
            state = ?self.state,
            rounds = self.rounds.len(),
            exhausted = self.rounds_exhausted,
            "tool loop finished"
        );
        self
    }

    fn abort(self) -> Option<Self> {
        if self.has_output() {
            Some(self.finish(LoopState::Aborted))
        } else {
            info!(instance = %self.instance_id, "tool loop cancelled before any output");
            None
        }
    }
}

/// Drives one instance through model calls and tool rounds.
///
/// The request is sent with the registry's manifest and tool tracking on.
/// Returns `None` only when cancellation fired before the first model call
/// produced anything.
pub async fn stream_with_tool_execution(
    transport: &dyn ResponsesTransport,
    registry: &ToolRegistry,
    request: &ChannelRequest,
    ctx: &ToolContext,
    cancel: &CancellationToken,
    events: &EventSender,
) -> Option<ToolLoopResult> {
    let mut request = request.clone();
    request.track_tool_calls = true;
    request.settings.tools = registry.manifest();
    let mut outcome = ToolLoopResult::new(&request);

    loop {
        if cancel.is_cancelled() {
            return outcome.abort();
        }
        outcome.state = LoopState::AwaitingModel;
        let Some(result) = open_channel(transport, &request, cancel, events).await else {
            return outcome.abort();
        };
        outcome.absorb_channel(&result);

        if result.cancelled {
            return outcome.abort();
        }
        if result.status == ChannelStatus::Errored {
            return Some(outcome.finish(LoopState::Done));
        }
        if result.tool_calls.is_empty() {
            return Some(outcome.finish(LoopState::Done));
        }
        if outcome.rounds.len() >= MAX_TOOL_ROUNDS {
            warn!(
                instance = %request.instance.id,
                pending_calls = result.tool_calls.len(),
                "tool round limit reached"
            );
            outcome.rounds_exhausted = true;
            return Some(outcome.finish(LoopState::Done));
        }

        outcome.state = LoopState::ExecutingTools;
        let round = outcome.rounds.len() + 1;
        let (executed, results) =
            run_round(registry, &request, ctx, cancel, events, round, &result.tool_calls).await;

        append_continuation(&mut request.input, &result, &result.tool_calls, &results);
        outcome.absorb_round(executed, &results);
    }
}

async fn run_round(
    registry: &ToolRegistry,
    request: &ChannelRequest,
    ctx: &ToolContext,
    cancel: &CancellationToken,
    events: &EventSender,
    round: usize,
    calls: &[ToolCallState],
) -> (ToolExecutionRound, Vec<ToolExecutionResult>) {
    let instance_id = &request.instance.id;
    info!(instance = %instance_id, round, tools = calls.len(), "tool round started");
    events
        .send_important(ChannelEvent::RoundStarted {
            instance_id: instance_id.clone(),
            round,
            tool_count: calls.len(),
        })
        .await;

    let round_ctx = ctx.for_round(instance_id, &request.instance.model, round, cancel);
    let started = Instant::now();
    let outcomes = join_all(
        calls
            .iter()
            .map(|call| execute_one(registry, &round_ctx, events, call)),
    )
    .await;
    let total_duration_ms = started.elapsed().as_millis() as u64;

    let (executions, results): (Vec<_>, Vec<_>) = outcomes.into_iter().unzip();
    let has_error = executions
        .iter()
        .any(|execution: &ToolExecution| execution.status == ToolExecutionStatus::Error);
    info!(instance = %instance_id, round, has_error, duration_ms = total_duration_ms, "tool round completed");
    events
        .send_important(ChannelEvent::RoundCompleted {
            instance_id: instance_id.clone(),
            round,
            has_error,
        })
        .await;

    (
        ToolExecutionRound {
            round,
            executions,
            model_reasoning: None,
            has_error,
            total_duration_ms,
        },
        results,
    )
}

async fn execute_one(
    registry: &ToolRegistry,
    ctx: &ToolContext,
    events: &EventSender,
    call: &ToolCallState,
) -> (ToolExecution, ToolExecutionResult) {
    let call_id = call.reply_id().to_string();
    let mut execution = ToolExecution {
        id: call_id.clone(),
        tool_name: call.name.clone(),
        status: ToolExecutionStatus::Pending,
        start_time: Utc::now(),
        end_time: None,
        duration_ms: None,
        input: call
            .parsed_arguments
            .clone()
            .map_or_else(|| Value::String(call.arguments_buffer.clone()), Value::Object),
        input_artifacts: Vec::new(),
        output_artifacts: Vec::new(),
        output: String::new(),
        error: None,
        round: ctx.round,
        usage: None,
    };
    events
        .send_important(ChannelEvent::ToolExecutionStarted {
            instance_id: ctx.instance_id.clone(),
            round: ctx.round,
            execution_id: call_id.clone(),
            tool_name: call.name.clone(),
        })
        .await;

    let started = Instant::now();
    execution.status = ToolExecutionStatus::Running;
    let result = match call.to_tool_call() {
        Some(tool_call) => registry.execute(&tool_call, ctx).await,
        None => {
            let details = call
                .error
                .clone()
                .unwrap_or_else(|| "arguments missing".to_string());
            warn!(instance = %ctx.instance_id, round = ctx.round, tool = %call.name, error = %details, "skipping call with invalid arguments");
            let report = ToolReport::new(ToolOutput::failure_with_details(
                "invalid_arguments",
                format!("Invalid arguments for {}", call.name),
                details,
            ));
            ToolExecutionResult::from_report(report, &call_id)
        }
    };

    execution.end_time = Some(Utc::now());
    execution.duration_ms = Some(started.elapsed().as_millis() as u64);
    execution.status = if result.success {
        ToolExecutionStatus::Success
    } else {
        ToolExecutionStatus::Error
    };
    execution.error.clone_from(&result.error);
    execution.output.clone_from(&result.output);
    execution.usage = result.usage;
    let (inputs, outputs): (Vec<Artifact>, Vec<Artifact>) = result
        .artifacts
        .iter()
        .cloned()
        .partition(|artifact| artifact.role == ArtifactRole::Input);
    execution.input_artifacts = inputs;
    execution.output_artifacts = outputs;

    events
        .send_important(ChannelEvent::ToolExecutionFinished {
            instance_id: ctx.instance_id.clone(),
            round: ctx.round,
            execution_id: call_id,
            tool_name: call.name.clone(),
            success: result.success,
        })
        .await;
    (execution, result)
}

/// Appends the model's lead text, one `function_call` echo per call and one
/// `function_call_output` per result.
fn append_continuation(
    input: &mut Vec<InputItem>,
    channel: &ChannelResult,
    calls: &[ToolCallState],
    results: &[ToolExecutionResult],
) {
    if !channel.content.trim().is_empty() {
        input.push(InputItem::assistant(channel.content.clone()));
    }
    for call in calls {
        input.push(InputItem::FunctionCall {
            call_id: call.reply_id().to_string(),
            name: call.name.clone(),
            arguments: call.arguments_buffer.clone(),
        });
    }
    for (call, result) in calls.iter().zip(results) {
        input.push(InputItem::FunctionCallOutput {
            call_id: call.reply_id().to_string(),
            output: continuation_output(result),
        });
    }
}

/// The envelope, with an `artifacts` manifest added when the call produced
/// any. Payloads stay out of the model context.
fn continuation_output(result: &ToolExecutionResult) -> String {
    if result.artifacts.is_empty() {
        return result.output.clone();
    }
    let manifest: Vec<Value> = result.artifacts.iter().map(Artifact::manifest_entry).collect();
    match serde_json::from_str::<Value>(&result.output) {
        Ok(Value::Object(mut envelope)) => {
            envelope.insert("artifacts".to_string(), Value::Array(manifest));
            Value::Object(envelope).to_string()
        }
        _ => json!({"result": result.output, "artifacts": manifest}).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::core::artifacts::ArtifactKind;
    use crate::core::channel::ModelInstance;
    use crate::core::testing::{Reply, ScriptedTransport, text_turn, tool_turn};
    use crate::providers::ProviderError;
    use crate::tools::{ToolDefinition, ToolServices, handler};

    fn request() -> ChannelRequest {
        ChannelRequest::new(
            ModelInstance::new("gpt", "gpt-5"),
            vec![InputItem::user("What were Q3 sales?")],
        )
    }

    fn ctx() -> ToolContext {
        ToolContext::new(Arc::new(ToolServices::default()))
    }

    fn definition(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: "test tool".to_string(),
            parameters: json!({"type": "object"}),
        }
    }

    fn echo_registry() -> ToolRegistry {
        ToolRegistry::new().with_tool(
            definition("echo"),
            handler(|call, _ctx| async move {
                ToolReport::new(ToolOutput::success(serde_json::Value::Object(call.arguments)))
            }),
        )
    }

    async fn run(transport: &ScriptedTransport, registry: &ToolRegistry) -> Option<ToolLoopResult> {
        stream_with_tool_execution(
            transport,
            registry,
            &request(),
            &ctx(),
            &CancellationToken::new(),
            &EventSender::disabled(),
        )
        .await
    }

    fn outputs(request: &crate::providers::openai::responses::RequestBody) -> Vec<(String, String)> {
        request
            .input
            .iter()
            .filter_map(|item| match item {
                InputItem::FunctionCallOutput { call_id, output } => {
                    Some((call_id.clone(), output.clone()))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_no_tool_calls_is_single_call() {
        let transport = ScriptedTransport::new(vec![Reply::Sse(text_turn("Hello", 12))]);
        let result = run(&transport, &echo_registry()).await.unwrap();

        assert_eq!(result.state, LoopState::Done);
        assert_eq!(result.content, "Hello");
        assert!(result.rounds.is_empty());
        assert_eq!(result.usage.unwrap().total_tokens, 12);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let tools = serde_json::to_value(&requests[0].tools).unwrap();
        assert_eq!(tools[0]["name"], json!("echo"));
    }

    #[tokio::test]
    async fn test_one_round_feeds_results_back() {
        let transport = ScriptedTransport::new(vec![
            Reply::Sse(tool_turn("Let me check.", &[("call_1", "echo", json!({"q": 1}))], 10)),
            Reply::Sse(text_turn("Sales were flat.", 20)),
        ]);
        let result = run(&transport, &echo_registry()).await.unwrap();

        assert_eq!(result.content, "Sales were flat.");
        assert_eq!(result.rounds.len(), 1);
        let round = &result.rounds[0];
        assert_eq!(round.round, 1);
        assert!(!round.has_error);
        assert_eq!(round.model_reasoning.as_deref(), Some("Sales were flat."));
        assert_eq!(round.executions[0].status, ToolExecutionStatus::Success);
        assert_eq!(round.executions[0].input, json!({"q": 1}));

        let second = &transport.requests()[1];
        assert!(second.input.contains(&InputItem::assistant("Let me check.")));
        assert!(second.input.contains(&InputItem::FunctionCall {
            call_id: "call_1".to_string(),
            name: "echo".to_string(),
            arguments: r#"{"q":1}"#.to_string(),
        }));
        assert_eq!(
            outputs(second),
            vec![("call_1".to_string(), r#"{"ok":true,"data":{"q":1}}"#.to_string())]
        );
    }

    #[tokio::test]
    async fn test_failing_call_does_not_block_sibling() {
        let registry = echo_registry().with_tool(
            definition("boom"),
            handler(|_call, _ctx| async { panic!("executor blew up") }),
        );
        let transport = ScriptedTransport::new(vec![
            Reply::Sse(tool_turn(
                "",
                &[("call_a", "boom", json!({})), ("call_b", "echo", json!({"v": 2}))],
                10,
            )),
            Reply::Sse(text_turn("Partial answer", 10)),
        ]);
        let result = run(&transport, &registry).await.unwrap();

        let round = &result.rounds[0];
        assert!(round.has_error);
        assert_eq!(round.executions.len(), 2);
        assert_eq!(round.executions[0].status, ToolExecutionStatus::Error);
        assert_eq!(round.executions[1].status, ToolExecutionStatus::Success);
        assert_eq!(outputs(&transport.requests()[1]).len(), 2);
    }

    #[tokio::test]
    async fn test_rounds_are_capped() {
        let transport =
            ScriptedTransport::repeating(tool_turn("again", &[("call_1", "echo", json!({}))], 10));
        let result = run(&transport, &echo_registry()).await.unwrap();

        assert_eq!(result.state, LoopState::Done);
        assert_eq!(result.rounds.len(), MAX_TOOL_ROUNDS);
        assert!(result.rounds_exhausted);
        assert_eq!(
            result.rounds.iter().map(|r| r.round).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5]
        );
        assert_eq!(transport.requests().len(), MAX_TOOL_ROUNDS + 1);
    }

    #[tokio::test]
    async fn test_usage_adds_up_across_rounds() {
        let transport = ScriptedTransport::new(vec![
            Reply::Sse(tool_turn("", &[("c1", "echo", json!({}))], 10)),
            Reply::Sse(tool_turn("", &[("c2", "echo", json!({}))], 20)),
            Reply::Sse(tool_turn("", &[("c3", "echo", json!({}))], 30)),
            Reply::Sse(text_turn("done", 40)),
        ]);
        let result = run(&transport, &echo_registry()).await.unwrap();

        assert_eq!(result.rounds.len(), 3);
        let usage = result.usage.unwrap();
        assert_eq!(usage.total_tokens, 100);
        assert_eq!(usage.input_tokens + usage.output_tokens, 100);
    }

    #[tokio::test]
    async fn test_malformed_sql_error_goes_back_to_model() {
        let transport = ScriptedTransport::new(vec![
            Reply::Sse(tool_turn(
                "",
                &[("call_sql", "sql_query", json!({"query": "SELEC * FROM sales"}))],
                10,
            )),
            Reply::Sse(text_turn("The query failed.", 10)),
        ]);
        let result = run(&transport, &ToolRegistry::builtins()).await.unwrap();

        let round = &result.rounds[0];
        assert!(round.has_error);
        let execution = &round.executions[0];
        assert_eq!(execution.status, ToolExecutionStatus::Error);
        assert!(execution.error.as_deref().unwrap().starts_with("sql_error"));
        assert_eq!(execution.input_artifacts[0].kind, ArtifactKind::Code);

        let fed_back = outputs(&transport.requests()[1]);
        assert_eq!(fed_back[0].0, "call_sql");
        assert!(fed_back[0].1.contains(r#""code":"sql_error""#));
        assert!(fed_back[0].1.contains(r#""artifacts""#));
        assert_eq!(result.content, "The query failed.");
    }

    #[tokio::test]
    async fn test_invalid_arguments_fail_only_that_call() {
        let transport = ScriptedTransport::new(vec![
            Reply::Sse(tool_turn(
                "",
                &[("bad", "echo", json!("not an object")), ("good", "echo", json!({}))],
                10,
            )),
            Reply::Sse(text_turn("ok", 10)),
        ]);
        let result = run(&transport, &echo_registry()).await.unwrap();

        let executions = &result.rounds[0].executions;
        assert_eq!(executions[0].status, ToolExecutionStatus::Error);
        assert_eq!(executions[0].input, json!(r#""not an object""#));
        assert!(executions[0].error.as_deref().unwrap().starts_with("invalid_arguments"));
        assert_eq!(executions[1].status, ToolExecutionStatus::Success);
    }

    #[tokio::test]
    async fn test_cancel_between_rounds_keeps_first_round() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let registry = ToolRegistry::new().with_tool(
            definition("stop"),
            handler(move |_call, _ctx| {
                let trigger = trigger.clone();
                async move {
                    trigger.cancel();
                    ToolReport::new(ToolOutput::success(json!("stopped")))
                }
            }),
        );
        let transport = ScriptedTransport::new(vec![
            Reply::Sse(tool_turn("Checking", &[("c1", "stop", json!({}))], 15)),
            Reply::Sse(text_turn("never sent", 10)),
        ]);

        let result = stream_with_tool_execution(
            &transport,
            &registry,
            &request(),
            &ctx(),
            &cancel,
            &EventSender::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(result.state, LoopState::Aborted);
        assert_eq!(result.status, ChannelStatus::Completed);
        assert_eq!(result.content, "Checking");
        assert_eq!(result.usage.unwrap().total_tokens, 15);
        assert_eq!(result.rounds.len(), 1);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start_returns_none() {
        let transport = ScriptedTransport::new(vec![Reply::Sse(text_turn("hi", 1))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = stream_with_tool_execution(
            &transport,
            &echo_registry(),
            &request(),
            &ctx(),
            &cancel,
            &EventSender::disabled(),
        )
        .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_channel_error_ends_loop() {
        let transport = ScriptedTransport::new(vec![
            Reply::Sse(tool_turn("", &[("c1", "echo", json!({}))], 10)),
            Reply::Fail(ProviderError::http_status(502, "")),
        ]);
        let result = run(&transport, &echo_registry()).await.unwrap();

        assert_eq!(result.state, LoopState::Done);
        assert!(result.is_errored());
        assert_eq!(result.error.as_deref(), Some("HTTP 502"));
        assert_eq!(result.rounds.len(), 1);
        assert_eq!(result.usage.unwrap().total_tokens, 10);
    }

    #[tokio::test]
    async fn test_artifacts_dedupe_and_manifest() {
        let registry = ToolRegistry::new().with_tool(
            definition("html"),
            handler(|_call, _ctx| async {
                let mut artifact = Artifact::new(ArtifactKind::Html, json!("<p>hi</p>"));
                artifact.id = "art_fixed".to_string();
                ToolReport::new(ToolOutput::success(json!({}))).with_artifact(artifact)
            }),
        );
        let transport = ScriptedTransport::new(vec![
            Reply::Sse(tool_turn("", &[("c1", "html", json!({}))], 5)),
            Reply::Sse(tool_turn("", &[("c2", "html", json!({}))], 5)),
            Reply::Sse(text_turn("done", 5)),
        ]);
        let result = run(&transport, &registry).await.unwrap();

        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].tool_call_id.as_deref(), Some("c1"));
        let fed_back = outputs(&transport.requests()[1]);
        let envelope: Value = serde_json::from_str(&fed_back[0].1).unwrap();
        assert_eq!(envelope["artifacts"][0]["id"], json!("art_fixed"));
        assert_eq!(envelope["artifacts"][0]["type"], json!("html"));
    }

    #[test]
    fn test_non_object_output_is_wrapped() {
        let result = ToolExecutionResult {
            success: true,
            output: "plain".to_string(),
            error: None,
            citations: Vec::new(),
            artifacts: vec![Artifact::new(ArtifactKind::Chart, json!({}))],
            usage: None,
        };
        let wrapped: Value = serde_json::from_str(&continuation_output(&result)).unwrap();
        assert_eq!(wrapped["result"], json!("plain"));
        assert_eq!(wrapped["artifacts"].as_array().unwrap().len(), 1);
    }
}
