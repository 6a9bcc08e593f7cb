//! Sub-agent delegation tool.
//!
//! Runs a scoped task through a fresh model channel in two phases: an open
//! investigation, then a cooler summary of it. Only the summary goes back to
//! the calling model; both phases land in one `Agent` artifact.

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{ToolCall, ToolContext, ToolDefinition, ToolReport, check_name, parse_input};
use crate::core::artifacts::{Artifact, ArtifactKind};
use crate::core::channel::{ChannelRequest, ChannelResult, ChannelStatus, ModelInstance, open_channel};
use crate::core::events::{EventSender, ToolOutput};
use crate::providers::UsageStats;
use crate::providers::openai::responses::InputItem;

pub const TOOL_NAME: &str = "delegate_task";

const INVESTIGATE_PROMPT: &str = "You are a focused research sub-agent. Work through the task \
    step by step and write down everything relevant you find, including uncertainties.";
const SUMMARY_PROMPT: &str = "Condense the investigation below into a direct answer for the \
    agent that delegated the task. Keep concrete facts and numbers; drop the working.";

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Delegate a scoped sub-task to a sub-agent. The sub-agent investigates \
            on its own and returns a concise summary. Use for self-contained research that \
            would clutter the main answer."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "What the sub-agent should find out. Be specific about the expected output."
                },
                "context": {
                    "type": "string",
                    "description": "Background the sub-agent needs"
                }
            },
            "required": ["task"],
            "additionalProperties": false
        }),
    }
}

#[derive(Debug, Deserialize)]
struct DelegateInput {
    task: String,
    #[serde(default)]
    context: Option<String>,
}

pub async fn execute(call: ToolCall, ctx: ToolContext) -> ToolReport {
    if let Err(report) = check_name(&call, TOOL_NAME) {
        return report;
    }
    let input: DelegateInput = match parse_input(&call) {
        Ok(input) => input,
        Err(report) => return report,
    };
    let task = input.task.trim();
    if task.is_empty() {
        return ToolReport::failure("invalid_input", "task cannot be empty", None);
    }

    let Some(transport) = ctx.services.transport.as_deref() else {
        return ToolReport::failure("not_configured", "No model transport for sub-agents", None);
    };
    let settings = &ctx.services.sub_agent;
    let model = settings
        .model
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(&ctx.model)
        .to_string();
    if model.is_empty() {
        return ToolReport::failure(
            "invalid_config",
            "No model available for delegate_task",
            Some("Set [sub_agent].model".to_string()),
        );
    }
    info!(instance = %ctx.instance_id, round = ctx.round, model = %model, "delegating task");

    let brief = match input.context.as_deref().map(str::trim) {
        Some(context) if !context.is_empty() => format!("{task}\n\nContext:\n{context}"),
        _ => task.to_string(),
    };
    let silent = EventSender::disabled();

    let mut instance = ModelInstance::new(format!("{}/{TOOL_NAME}", ctx.instance_id), &model);
    instance.params.max_output_tokens = settings.max_output_tokens;
    let investigate = ChannelRequest::new(
        instance.clone(),
        vec![InputItem::developer(INVESTIGATE_PROMPT), InputItem::user(&brief)],
    );
    let investigation = match finished(open_channel(transport, &investigate, &ctx.cancel, &silent).await) {
        Ok(result) => result,
        Err(report) => return report,
    };

    instance.params.temperature = Some(settings.summary_temperature);
    let summarize = ChannelRequest::new(
        instance,
        vec![
            InputItem::developer(SUMMARY_PROMPT),
            InputItem::user(&brief),
            InputItem::assistant(&investigation.content),
            InputItem::user("Summarize the findings above."),
        ],
    );
    let summary = match finished(open_channel(transport, &summarize, &ctx.cancel, &silent).await) {
        Ok(result) => result,
        Err(report) => return report,
    };

    let usage = [investigation.usage, summary.usage]
        .iter()
        .flatten()
        .fold(None, |acc, u| Some(UsageStats::merge(acc, u)));
    let artifact = Artifact::new(
        ArtifactKind::Agent,
        json!({
            "task": task,
            "model": model,
            "investigation": investigation.content,
            "summary": summary.content,
        }),
    )
    .titled(format!("Sub-agent: {task}"));

    ToolReport::new(ToolOutput::success(json!({"summary": summary.content})))
        .with_artifact(artifact)
        .with_usage(usage)
}

fn finished(result: Option<ChannelResult>) -> Result<ChannelResult, ToolReport> {
    match result {
        None => Err(ToolOutput::canceled("Sub-agent canceled").into()),
        Some(result) if result.cancelled => Err(ToolOutput::canceled("Sub-agent canceled").into()),
        Some(result) if result.status == ChannelStatus::Errored => Err(ToolReport::failure(
            "delegate_failed",
            "Sub-agent model call failed",
            result.error,
        )),
        Some(result) => Ok(result),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::testing::{Reply, ScriptedTransport, text_turn};
    use crate::providers::ProviderError;
    use crate::providers::openai::responses::{InputContent, ResponsesTransport};
    use crate::tools::{ToolServices, call};

    fn ctx(transport: Arc<ScriptedTransport>) -> ToolContext {
        let services = ToolServices {
            transport: Some(transport as Arc<dyn ResponsesTransport>),
            ..ToolServices::default()
        };
        let mut ctx = ToolContext::new(Arc::new(services));
        ctx.instance_id = "gpt".to_string();
        ctx.model = "gpt-5".to_string();
        ctx
    }

    #[tokio::test]
    async fn test_two_phases_return_summary_only() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Reply::Sse(text_turn("Long investigation notes", 100)),
            Reply::Sse(text_turn("Short answer", 20)),
        ]));

        let report = execute(
            call("c1", TOOL_NAME, json!({"task": "Find Q3 revenue", "context": "FY24"})),
            ctx(Arc::clone(&transport)),
        )
        .await;

        assert_eq!(report.output.data().unwrap(), &json!({"summary": "Short answer"}));
        let artifact = &report.artifacts[0];
        assert_eq!(artifact.kind, ArtifactKind::Agent);
        assert_eq!(artifact.data["investigation"], json!("Long investigation notes"));
        assert_eq!(artifact.data["summary"], json!("Short answer"));
        assert_eq!(report.usage.unwrap().total_tokens, 120);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].temperature, None);
        assert_eq!(requests[1].temperature, Some(0.3));
        assert_eq!(requests[1].model, "gpt-5");
        let echoed = requests[1].input.iter().any(|item| {
            matches!(item, InputItem::Message { role, content }
                if role == "assistant"
                    && matches!(&content[0], InputContent::OutputText { text } if text == "Long investigation notes"))
        });
        assert!(echoed);
    }

    #[tokio::test]
    async fn test_phase_failure_is_reported() {
        let transport = Arc::new(ScriptedTransport::new(vec![Reply::Fail(
            ProviderError::http_status(500, ""),
        )]));
        let report = execute(call("c1", TOOL_NAME, json!({"task": "x"})), ctx(transport)).await;

        let (code, _, details) = report.output.error_info().unwrap();
        assert_eq!(code, "delegate_failed");
        assert_eq!(details, Some("HTTP 500"));
    }

    #[tokio::test]
    async fn test_requires_transport() {
        let ctx = ToolContext::new(Arc::new(ToolServices::default()));
        let report = execute(call("c1", TOOL_NAME, json!({"task": "x"})), ctx).await;
        assert_eq!(report.output.error_info().unwrap().0, "not_configured");
    }
}
