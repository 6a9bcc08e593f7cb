//! `create_chart`: validates a Vega-Lite spec and emits it as a chart artifact.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{ToolCall, ToolContext, ToolDefinition, ToolReport, check_name, parse_input};
use crate::core::artifacts::{Artifact, ArtifactKind};
use crate::core::events::ToolOutput;

pub const TOOL_NAME: &str = "create_chart";
const VEGA_LITE_SCHEMA: &str = "https://vega.github.io/schema/vega-lite/v5.json";
const VEGA_LITE_MIME: &str = "application/vnd.vegalite.v5+json";
const COMPOSITE_KEYS: [&str; 5] = ["layer", "concat", "hconcat", "vconcat", "facet"];

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Create a chart from a Vega-Lite v5 specification. Inline the data \
            under data.values."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "spec": {
                    "type": "object",
                    "description": "Vega-Lite specification with mark, encoding and data"
                },
                "title": {"type": "string", "description": "Chart title"}
            },
            "required": ["spec"],
            "additionalProperties": false
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ChartInput {
    spec: Value,
    #[serde(default)]
    title: Option<String>,
}

pub async fn execute(call: ToolCall, _ctx: ToolContext) -> ToolReport {
    if let Err(report) = check_name(&call, TOOL_NAME) {
        return report;
    }
    let input: ChartInput = match parse_input(&call) {
        Ok(input) => input,
        Err(report) => return report,
    };
    let mut spec = match validate_spec(input.spec) {
        Ok(spec) => spec,
        Err(message) => return ToolReport::failure("invalid_chart", message, None),
    };
    spec.entry("$schema")
        .or_insert_with(|| Value::String(VEGA_LITE_SCHEMA.to_string()));

    let title = input.title.or_else(|| {
        spec.get("title")
            .and_then(Value::as_str)
            .map(ToString::to_string)
    });
    let mut artifact = Artifact::new(ArtifactKind::Chart, Value::Object(spec)).mime(VEGA_LITE_MIME);
    if let Some(title) = title {
        artifact = artifact.titled(title);
    }
    let id = artifact.id.clone();
    ToolReport::new(ToolOutput::success(json!({"artifact_id": id})))
        .with_artifact(artifact)
}

fn validate_spec(spec: Value) -> Result<Map<String, Value>, String> {
    let Value::Object(spec) = spec else {
        return Err("spec must be a JSON object".to_string());
    };

    let has_mark = match spec.get("mark") {
        Some(Value::String(mark)) => !mark.is_empty(),
        Some(Value::Object(mark)) => mark.get("type").is_some_and(Value::is_string),
        _ => false,
    };
    let composite = COMPOSITE_KEYS.iter().any(|key| spec.contains_key(*key));
    if !has_mark && !composite {
        return Err("spec needs a mark (or a layer/concat/facet composition)".to_string());
    }

    let has_data = match spec.get("data") {
        Some(Value::Object(data)) => {
            data.get("values").is_some_and(Value::is_array)
                || data.get("url").is_some_and(Value::is_string)
                || data.get("name").is_some_and(Value::is_string)
        }
        _ => false,
    };
    let has_datasets = spec.get("datasets").is_some_and(Value::is_object);
    if !has_data && !has_datasets && !composite {
        return Err("spec needs data.values, data.url or datasets".to_string());
    }
    Ok(spec)
}
