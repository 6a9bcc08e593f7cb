//! Channel orchestration: one streamed model call for one instance.
//!
//! The orchestrator is the only writer of [`ChannelState`]. Observers see
//! [`ChannelEvent`]s while it runs and the caller gets a [`ChannelResult`].

use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::InstanceParams;
use crate::core::artifacts::{
    Artifact, ArtifactKind, Citation, push_unique_artifact, push_unique_citation,
};
use crate::core::events::{ChannelEvent, ErrorKind, EventSender};
use crate::core::tool_tracker::{ToolCallState, ToolCallTracker, TrackerUpdate};
use crate::providers::openai::responses::{
    Annotation, FileSearchHit, InputItem, OutputContent, OutputItem, ReasoningConfig,
    RequestBody, ResponseEvent, ResponseSummary, ResponsesSseParser, ResponsesTransport,
    ToolManifestEntry,
};
use crate::providers::{ProviderError, UsageStats};

/// A configured model reference plus its own parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInstance {
    pub id: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub params: InstanceParams,
}

impl ModelInstance {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            label: None,
            params: InstanceParams::default(),
        }
    }
}

/// Settings shared by every instance of a turn.
#[derive(Debug, Clone, Default)]
pub struct ChannelSettings {
    pub instructions: Option<String>,
    pub defaults: InstanceParams,
    pub tools: Vec<ToolManifestEntry>,
}

#[derive(Debug, Clone)]
pub struct ChannelRequest {
    pub instance: ModelInstance,
    pub input: Vec<InputItem>,
    pub settings: ChannelSettings,
    pub track_tool_calls: bool,
}

impl ChannelRequest {
    pub fn new(instance: ModelInstance, input: Vec<InputItem>) -> Self {
        Self {
            instance,
            input,
            settings: ChannelSettings::default(),
            track_tool_calls: false,
        }
    }

    /// Wire body. Instance parameters override the shared defaults.
    pub fn body(&self) -> RequestBody {
        let params = self.instance.params.overriding(&self.settings.defaults);
        RequestBody {
            model: self.instance.model.clone(),
            input: self.input.clone(),
            stream: true,
            instructions: self.settings.instructions.clone(),
            tools: self.settings.tools.clone(),
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            max_output_tokens: params.max_output_tokens,
            reasoning: params.reasoning_effort.map(|effort| ReasoningConfig {
                effort: effort.as_str().to_string(),
                summary: Some("auto".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Streaming,
    Completed,
    Errored,
}

/// Per-instance accumulation for one channel.
///
/// Text fields only grow while `Streaming`; once the status leaves
/// `Streaming` every mutator is a no-op.
#[derive(Debug)]
pub struct ChannelState {
    pub instance_id: String,
    pub content: String,
    pub reasoning_content: String,
    pub tool_calls: ToolCallTracker,
    pub artifacts: Vec<Artifact>,
    pub citations: Vec<Citation>,
    pub usage: Option<UsageStats>,
    pub status: ChannelStatus,
    pub error: Option<String>,
    /// Reasoning deltas arrived since the last `reasoning*.done`.
    reasoning_streamed: bool,
}

impl ChannelState {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            content: String::new(),
            reasoning_content: String::new(),
            tool_calls: ToolCallTracker::new(),
            artifacts: Vec::new(),
            citations: Vec::new(),
            usage: None,
            status: ChannelStatus::Streaming,
            error: None,
            reasoning_streamed: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.status == ChannelStatus::Streaming
    }

    pub fn append_content(&mut self, text: &str) -> bool {
        if !self.is_streaming() || text.is_empty() {
            return false;
        }
        self.content.push_str(text);
        true
    }

    pub fn append_reasoning(&mut self, text: &str) -> bool {
        if !self.is_streaming() || text.is_empty() {
            return false;
        }
        self.reasoning_content.push_str(text);
        true
    }

    pub fn add_artifact(&mut self, artifact: Artifact) -> bool {
        self.is_streaming() && push_unique_artifact(&mut self.artifacts, artifact)
    }

    pub fn add_citation(&mut self, citation: Citation) -> bool {
        self.is_streaming() && push_unique_citation(&mut self.citations, citation)
    }

    /// Applies the authoritative `response.completed` summary: its output text
    /// and usage replace what the deltas accumulated.
    pub fn apply_summary(&mut self, summary: &ResponseSummary) {
        if !self.is_streaming() {
            return;
        }
        if let Some(text) = summary.final_text() {
            self.content = text;
        }
        if let Some(usage) = summary.usage_stats() {
            self.usage = Some(usage);
        }
    }

    /// True once anything user-visible has been accumulated.
    pub fn has_committed_data(&self) -> bool {
        !self.content.is_empty()
            || !self.reasoning_content.is_empty()
            || !self.tool_calls.is_empty()
            || !self.artifacts.is_empty()
            || !self.citations.is_empty()
            || self.usage.is_some()
    }

    pub fn complete(&mut self) {
        if self.is_streaming() {
            self.status = ChannelStatus::Completed;
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if self.is_streaming() {
            self.status = ChannelStatus::Errored;
            self.error = Some(message.into());
        }
    }
}

/// Final outcome of one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelResult {
    pub instance_id: String,
    pub model: String,
    pub content: String,
    pub reasoning_content: String,
    /// Completed tool calls in first-seen order.
    pub tool_calls: Vec<ToolCallState>,
    pub artifacts: Vec<Artifact>,
    pub citations: Vec<Citation>,
    pub usage: Option<UsageStats>,
    pub status: ChannelStatus,
    pub error: Option<String>,
    /// Cancellation cut the stream short; content is partial.
    pub cancelled: bool,
}

impl ChannelResult {
    fn from_state(state: ChannelState, model: &str, cancelled: bool) -> Self {
        Self {
            tool_calls: state.tool_calls.completed(),
            instance_id: state.instance_id,
            model: model.to_string(),
            content: state.content,
            reasoning_content: state.reasoning_content,
            artifacts: state.artifacts,
            citations: state.citations,
            usage: state.usage,
            status: state.status,
            error: state.error,
            cancelled,
        }
    }
}

enum Flow {
    Continue,
    Finished(Box<ResponseSummary>),
    Failed(ProviderError),
}

struct ChannelRun<'a> {
    state: ChannelState,
    model: &'a str,
    track_tool_calls: bool,
    events: &'a EventSender,
}

impl<'a> ChannelRun<'a> {
    fn new(request: &'a ChannelRequest, events: &'a EventSender) -> Self {
        Self {
            state: ChannelState::new(request.instance.id.clone()),
            model: &request.instance.model,
            track_tool_calls: request.track_tool_calls,
            events,
        }
    }

    fn instance_id(&self) -> String {
        self.state.instance_id.clone()
    }

    async fn handle(&mut self, event: ResponseEvent) -> Flow {
        match event {
            ResponseEvent::OutputTextDelta { delta, .. } | ResponseEvent::RefusalDelta { delta } => {
                if self.state.append_content(&delta) {
                    self.events.send_delta(ChannelEvent::TextDelta {
                        instance_id: self.instance_id(),
                        text: delta,
                    });
                }
            }
            ResponseEvent::AnnotationAdded { annotation } => {
                if let Some(citation) = citation_from_annotation(annotation) {
                    self.add_citation(citation).await;
                }
            }
            ResponseEvent::ReasoningDelta { delta } => {
                self.state.reasoning_streamed = true;
                if self.state.append_reasoning(&delta) {
                    self.events.send_delta(ChannelEvent::ReasoningDelta {
                        instance_id: self.instance_id(),
                        text: delta,
                    });
                }
            }
            ResponseEvent::ReasoningDone { text } => {
                // Providers that skip deltas only send the full text here.
                if !self.state.reasoning_streamed {
                    self.append_reasoning_block(&text);
                }
                self.state.reasoning_streamed = false;
            }
            ResponseEvent::OutputItemAdded { .. }
            | ResponseEvent::FunctionCallArgumentsDelta { .. }
            | ResponseEvent::FunctionCallArgumentsDone { .. }
            | ResponseEvent::OutputItemDone {
                item: OutputItem::FunctionCall { .. },
                ..
            } => {
                self.track(&event).await;
            }
            ResponseEvent::OutputItemDone { item, .. } => self.handle_item_done(item).await,
            ResponseEvent::FileSearchCallInProgress { item_id }
            | ResponseEvent::FileSearchCallSearching { item_id }
            | ResponseEvent::FileSearchCallCompleted { item_id } => {
                trace!(instance = %self.state.instance_id, item = %item_id, "file search progress");
            }
            ResponseEvent::ImageGenerationCallInProgress { item_id }
            | ResponseEvent::ImageGenerationCallGenerating { item_id }
            | ResponseEvent::ImageGenerationCallCompleted { item_id } => {
                trace!(instance = %self.state.instance_id, item = %item_id, "image generation progress");
            }
            ResponseEvent::ImageGenerationCallPartialImage {
                item_id,
                partial_image_index,
            } => {
                debug!(
                    instance = %self.state.instance_id,
                    item = %item_id,
                    partial = partial_image_index,
                    "partial image superseded by final result"
                );
            }
            ResponseEvent::Completed { response } => return Flow::Finished(Box::new(response)),
            ResponseEvent::Incomplete { response } => {
                info!(
                    instance = %self.state.instance_id,
                    status = ?response.status,
                    "response ended incomplete"
                );
                return Flow::Finished(Box::new(response));
            }
            ResponseEvent::Failed { response } => {
                return Flow::Failed(ProviderError::api_error(
                    "response_failed",
                    &response.error_message(),
                ));
            }
            ResponseEvent::Error { code, message } => {
                return Flow::Failed(ProviderError::api_error(
                    code.as_deref().unwrap_or_default(),
                    &message,
                ));
            }
            ResponseEvent::Created { .. } | ResponseEvent::Unknown => {}
        }
        Flow::Continue
    }

    async fn track(&mut self, event: &ResponseEvent) {
        if !self.track_tool_calls || !self.state.is_streaming() {
            return;
        }
        match self.state.tool_calls.apply(event) {
            TrackerUpdate::Started { id, name } => {
                self.events
                    .send_important(ChannelEvent::ToolCallStarted {
                        instance_id: self.instance_id(),
                        id,
                        name,
                    })
                    .await;
            }
            TrackerUpdate::Completed { id } => self.announce_completed(&id).await,
            TrackerUpdate::None => {}
        }
    }

    async fn announce_completed(&self, id: &str) {
        let Some(call) = self.state.tool_calls.get(id) else {
            return;
        };
        if let Some(error) = &call.error {
            warn!(instance = %self.state.instance_id, tool = %call.name, error = %error, "tool call arguments invalid");
        }
        self.events
            .send_important(ChannelEvent::ToolCallCompleted {
                instance_id: self.instance_id(),
                id: id.to_string(),
                name: call.name.clone(),
                error: call.error.clone(),
            })
            .await;
    }

    async fn handle_item_done(&mut self, item: OutputItem) {
        match item {
            OutputItem::Message { content, .. } => {
                let mut text = String::new();
                for part in content {
                    match part {
                        OutputContent::OutputText {
                            text: part_text,
                            annotations,
                        } => {
                            text.push_str(&part_text);
                            for annotation in annotations {
                                if let Some(citation) = citation_from_annotation(annotation) {
                                    self.add_citation(citation).await;
                                }
                            }
                        }
                        OutputContent::Refusal { refusal } => text.push_str(&refusal),
                        OutputContent::Other => {}
                    }
                }
                // Only fills in when no deltas were streamed for the answer.
                if self.state.content.is_empty() && self.state.append_content(&text) {
                    self.events.send_delta(ChannelEvent::TextDelta {
                        instance_id: self.instance_id(),
                        text,
                    });
                }
            }
            OutputItem::Reasoning {
                summary, content, ..
            } => {
                if self.state.reasoning_content.is_empty() {
                    let text = summary
                        .iter()
                        .chain(content.iter())
                        .map(|part| part.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n\n");
                    self.append_reasoning_block(&text);
                }
            }
            OutputItem::FileSearchCall {
                id,
                queries,
                results,
            } => self.record_file_search(&id, queries, results.unwrap_or_default()).await,
            OutputItem::ImageGenerationCall {
                id,
                result: Some(image),
                revised_prompt,
            } => {
                let mut artifact = Artifact::with_stable_id(
                    ArtifactKind::Image,
                    &id,
                    serde_json::json!({"b64": image, "revised_prompt": revised_prompt}),
                )
                .mime("image/png");
                if let Some(prompt) = revised_prompt {
                    artifact = artifact.titled(prompt);
                }
                self.add_artifact(artifact).await;
            }
            OutputItem::ImageGenerationCall { result: None, .. }
            | OutputItem::FunctionCall { .. }
            | OutputItem::Other => {}
        }
    }

    async fn record_file_search(&mut self, id: &str, queries: Vec<String>, hits: Vec<FileSearchHit>) {
        for hit in &hits {
            let mut citation = Citation::file(hit.file_id.clone(), hit.filename.clone());
            citation.snippet.clone_from(&hit.text);
            citation.score = hit.score;
            self.add_citation(citation).await;
        }
        let results: Vec<serde_json::Value> = hits
            .iter()
            .map(|hit| {
                serde_json::json!({
                    "file_id": hit.file_id,
                    "filename": hit.filename,
                    "score": hit.score,
                    "text": hit.text,
                })
            })
            .collect();
        let artifact = Artifact::with_stable_id(
            ArtifactKind::FileSearch,
            id,
            serde_json::json!({"queries": queries, "results": results}),
        )
        .titled("File search");
        self.add_artifact(artifact).await;
    }

    fn append_reasoning_block(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.state.reasoning_content.is_empty() {
            self.state.append_reasoning("\n\n");
        }
        if self.state.append_reasoning(text) {
            self.events.send_delta(ChannelEvent::ReasoningDelta {
                instance_id: self.instance_id(),
                text: text.to_string(),
            });
        }
    }

    async fn add_artifact(&mut self, artifact: Artifact) {
        if self.state.add_artifact(artifact.clone()) {
            self.events
                .send_important(ChannelEvent::ArtifactAdded {
                    instance_id: self.instance_id(),
                    artifact,
                })
                .await;
        }
    }

    async fn add_citation(&mut self, citation: Citation) {
        if self.state.add_citation(citation.clone()) {
            self.events
                .send_important(ChannelEvent::CitationAdded {
                    instance_id: self.instance_id(),
                    citation,
                })
                .await;
        }
    }

    async fn finish(mut self, summary: Option<&ResponseSummary>) -> ChannelResult {
        if let Some(summary) = summary {
            self.state.apply_summary(summary);
        }
        if self.state.content.is_empty() && !self.state.reasoning_content.is_empty() {
            let reasoning = self.state.reasoning_content.clone();
            self.state.append_content(&reasoning);
        }
        if self.track_tool_calls {
            for id in self.state.tool_calls.finish_pending() {
                self.announce_completed(&id).await;
            }
        }
        self.state.complete();

        if let Some(usage) = self.state.usage {
            self.events
                .send_important(ChannelEvent::UsageUpdated {
                    instance_id: self.instance_id(),
                    usage,
                })
                .await;
        }
        self.events
            .send_important(ChannelEvent::ChannelCompleted {
                instance_id: self.instance_id(),
            })
            .await;
        info!(
            instance = %self.state.instance_id,
            model = %self.model,
            content_len = self.state.content.len(),
            tool_calls = self.state.tool_calls.len(),
            "channel completed"
        );
        ChannelResult::from_state(self.state, self.model, false)
    }

    async fn fail(mut self, err: &ProviderError) -> ChannelResult {
        warn!(
            instance = %self.state.instance_id,
            model = %self.model,
            kind = %err.kind,
            error = %err,
            "channel errored"
        );
        self.state.fail(err.message.clone());
        self.events
            .send_important(ChannelEvent::ChannelErrored {
                instance_id: self.instance_id(),
                kind: ErrorKind::from(err.kind.clone()),
                message: err.message.clone(),
            })
            .await;
        ChannelResult::from_state(self.state, self.model, false)
    }

    async fn cancel(mut self) -> Option<ChannelResult> {
        info!(instance = %self.state.instance_id, model = %self.model, "channel cancelled");
        self.events
            .send_important(ChannelEvent::ChannelCancelled {
                instance_id: self.instance_id(),
            })
            .await;
        if !self.state.has_committed_data() {
            return None;
        }
        self.state.complete();
        Some(ChannelResult::from_state(self.state, self.model, true))
    }
}

fn citation_from_annotation(annotation: Annotation) -> Option<Citation> {
    match annotation {
        Annotation::UrlCitation { url, title } => Some(Citation::url(url, title)),
        Annotation::FileCitation { file_id, filename } => Some(Citation::file(file_id, filename)),
        Annotation::Other => None,
    }
}

/// Streams one model call for one instance.
///
/// Returns `None` only when `cancel` fired before anything was accumulated.
/// Transport failures come back as `Some` with [`ChannelStatus::Errored`].
pub async fn open_channel(
    transport: &dyn ResponsesTransport,
    request: &ChannelRequest,
    cancel: &CancellationToken,
    events: &EventSender,
) -> Option<ChannelResult> {
    let body = request.body();
    let mut run = ChannelRun::new(request, events);
    info!(
        instance = %request.instance.id,
        model = %request.instance.model,
        tools = body.tools.len(),
        input_items = body.input.len(),
        "opening channel"
    );
    events
        .send_important(ChannelEvent::ChannelStarted {
            instance_id: request.instance.id.clone(),
            model: request.instance.model.clone(),
        })
        .await;

    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = transport.open_stream(&body) => Some(result),
    };
    let bytes = match opened {
        None => return run.cancel().await,
        Some(Err(err)) => return Some(run.fail(&err).await),
        Some(Ok(bytes)) => bytes,
    };

    let mut stream = ResponsesSseParser::new(bytes);
    let mut summary = None;
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return run.cancel().await,
            next = stream.next() => next,
        };
        match next {
            None => break,
            Some(Err(err)) => return Some(run.fail(&err).await),
            Some(Ok(event)) => match run.handle(event).await {
                Flow::Continue => {}
                Flow::Finished(response) => {
                    summary = Some(response);
                    break;
                }
                Flow::Failed(err) => return Some(run.fail(&err).await),
            },
        }
    }
    Some(run.finish(summary.as_deref()).await)
}
