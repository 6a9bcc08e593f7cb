//! Parallel fan-out of one turn across several model instances.

use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::channel::{ChannelRequest, ChannelSettings, ModelInstance};
use crate::core::events::EventSender;
use crate::core::tool_loop::{ToolLoopResult, stream_with_tool_execution};
use crate::providers::openai::responses::{InputItem, ResponsesTransport};
use crate::tools::{ToolContext, ToolRegistry};

/// Result for one instance. `result` is `None` when the instance was
/// cancelled before producing anything.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceOutcome {
    pub instance_id: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub result: Option<ToolLoopResult>,
}

impl InstanceOutcome {
    pub fn is_errored(&self) -> bool {
        self.result.as_ref().is_some_and(ToolLoopResult::is_errored)
    }
}

/// Runs the tool loop for every instance concurrently and returns one
/// outcome per instance, in input order.
#[allow(clippy::too_many_arguments)]
pub async fn run_instances(
    transport: &dyn ResponsesTransport,
    registry: &ToolRegistry,
    instances: &[ModelInstance],
    input: &[InputItem],
    settings: &ChannelSettings,
    ctx: &ToolContext,
    cancel: &CancellationToken,
    events: &EventSender,
) -> Vec<InstanceOutcome> {
    info!(instances = instances.len(), "fanning out turn");
    let runs = instances.iter().map(|instance| async move {
        let mut request = ChannelRequest::new(instance.clone(), input.to_vec());
        request.settings = settings.clone();
        let result =
            stream_with_tool_execution(transport, registry, &request, ctx, cancel, events).await;
        InstanceOutcome {
            instance_id: instance.id.clone(),
            model: instance.model.clone(),
            label: instance.label.clone(),
            result,
        }
    });
    join_all(runs).await
}
