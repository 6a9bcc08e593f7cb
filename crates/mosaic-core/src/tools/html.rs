//! `render_html`: hands a self-contained HTML document to the UI.

use serde::Deserialize;
use serde_json::json;

use super::{ToolCall, ToolContext, ToolDefinition, ToolReport, check_name, parse_input};
use crate::core::artifacts::{Artifact, ArtifactKind};
use crate::core::events::ToolOutput;

pub const TOOL_NAME: &str = "render_html";
const MAX_HTML_BYTES: usize = 512 * 1024;

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Render a self-contained HTML document (inline CSS and scripts) for \
            the user."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "html": {"type": "string", "description": "Complete HTML document"},
                "title": {"type": "string", "description": "Short label for the document"}
            },
            "required": ["html"],
            "additionalProperties": false
        }),
    }
}

#[derive(Debug, Deserialize)]
struct HtmlInput {
    html: String,
    #[serde(default)]
    title: Option<String>,
}

pub async fn execute(call: ToolCall, _ctx: ToolContext) -> ToolReport {
    if let Err(report) = check_name(&call, TOOL_NAME) {
        return report;
    }
    let input: HtmlInput = match parse_input(&call) {
        Ok(input) => input,
        Err(report) => return report,
    };
    if input.html.trim().is_empty() {
        return ToolReport::failure("invalid_input", "html cannot be empty", None);
    }
    if input.html.len() > MAX_HTML_BYTES {
        return ToolReport::failure(
            "invalid_input",
            format!("html exceeds {MAX_HTML_BYTES} bytes"),
            None,
        );
    }

    let bytes = input.html.len();
    let mut artifact = Artifact::new(ArtifactKind::Html, json!({"html": input.html})).mime("text/html");
    if let Some(title) = input.title {
        artifact = artifact.titled(title);
    }
    let id = artifact.id.clone();
    ToolReport::new(ToolOutput::success(json!({"artifact_id": id, "bytes": bytes})))
        .with_artifact(artifact)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tools::{ToolServices, call};

    #[tokio::test]
    async fn test_emits_html_artifact() {
        let ctx = ToolContext::new(Arc::new(ToolServices::default()));
        let report = execute(
            call("c1", TOOL_NAME, json!({"html": "<h1>Hi</h1>", "title": "Greeting"})),
            ctx,
        )
        .await;

        let artifact = &report.artifacts[0];
        assert_eq!(artifact.kind, ArtifactKind::Html);
        assert_eq!(artifact.mime_type.as_deref(), Some("text/html"));
        assert_eq!(artifact.title.as_deref(), Some("Greeting"));
        assert_eq!(report.output.data().unwrap()["artifact_id"], json!(artifact.id));
    }

    #[tokio::test]
    async fn test_wrong_name_rejected() {
        let ctx = ToolContext::new(Arc::new(ToolServices::default()));
        let report = execute(call("c1", "create_chart", json!({"html": "<p>"})), ctx).await;
        assert_eq!(report.output.error_info().unwrap().0, "tool_name_mismatch");
    }
}
