//! `display_artifacts`: lets the model choose how earlier artifacts are shown.

use serde::Deserialize;
use serde_json::json;

use super::{ToolCall, ToolContext, ToolDefinition, ToolReport, check_name, parse_input};
use crate::core::artifacts::{Artifact, ArtifactKind};
use crate::core::events::ToolOutput;

pub const TOOL_NAME: &str = "display_artifacts";

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Choose which artifacts from this turn are shown prominently and which \
            are collapsed. Refer to artifacts by the ids listed in earlier tool results."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "primary": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Artifact ids to show expanded, in order"
                },
                "collapsed": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Artifact ids to keep but collapse"
                }
            },
            "required": ["primary"],
            "additionalProperties": false
        }),
    }
}

#[derive(Debug, Deserialize)]
struct DisplayInput {
    primary: Vec<String>,
    #[serde(default)]
    collapsed: Vec<String>,
}

pub async fn execute(call: ToolCall, _ctx: ToolContext) -> ToolReport {
    if let Err(report) = check_name(&call, TOOL_NAME) {
        return report;
    }
    let input: DisplayInput = match parse_input(&call) {
        Ok(input) => input,
        Err(report) => return report,
    };
    if input.primary.is_empty() {
        return ToolReport::failure("invalid_input", "primary must list at least one artifact id", None);
    }
    if let Some(id) = input.primary.iter().find(|id| input.collapsed.contains(id)) {
        return ToolReport::failure(
            "invalid_input",
            format!("Artifact '{id}' cannot be both primary and collapsed"),
            None,
        );
    }

    let selection = json!({"primary": input.primary, "collapsed": input.collapsed});
    ToolReport::new(ToolOutput::success(selection.clone()))
        .with_artifact(Artifact::new(ArtifactKind::DisplaySelection, selection))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tools::{ToolServices, call};

    fn ctx() -> ToolContext {
        ToolContext::new(Arc::new(ToolServices::default()))
    }

    #[tokio::test]
    async fn test_selection_artifact_only() {
        let report = execute(
            call("c1", TOOL_NAME, json!({"primary": ["art_1"], "collapsed": ["art_2"]})),
            ctx(),
        )
        .await;

        assert!(report.output.is_ok());
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(report.artifacts[0].kind, ArtifactKind::DisplaySelection);
        assert_eq!(report.artifacts[0].data["collapsed"], json!(["art_2"]));
        assert!(report.citations.is_empty());
    }

    #[tokio::test]
    async fn test_overlap_rejected() {
        let report = execute(
            call("c1", TOOL_NAME, json!({"primary": ["art_1"], "collapsed": ["art_1"]})),
            ctx(),
        )
        .await;
        assert_eq!(report.output.error_info().unwrap().0, "invalid_input");
        assert!(report.artifacts.is_empty());
    }
}
