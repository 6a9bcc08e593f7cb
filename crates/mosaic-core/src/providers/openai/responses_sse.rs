//! SSE parsing for OpenAI-compatible Responses streaming.
//!
//! Records are decoded into [`ResponseEvent`] at this boundary. Anything that
//! is not a recognizable event (blank payloads, invalid JSON, unknown `type`)
//! is skipped so one bad record never takes the channel down.

use std::pin::Pin;
use std::task::{Context, Poll};

use eventsource_stream::{EventStream, Eventsource};
use futures_util::Stream;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::providers::{ProviderError, ProviderResult, UsageStats};

const DONE_SENTINEL: &str = "[DONE]";

/// A decoded Responses stream event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseEvent {
    #[serde(rename = "response.created", alias = "response.in_progress")]
    Created {
        #[serde(default)]
        response: ResponseSummary,
    },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        output_index: usize,
        delta: String,
    },
    #[serde(rename = "response.output_text.annotation.added")]
    AnnotationAdded { annotation: Annotation },
    #[serde(rename = "response.refusal.delta")]
    RefusalDelta { delta: String },
    #[serde(
        rename = "response.reasoning_text.delta",
        alias = "response.reasoning_summary_text.delta"
    )]
    ReasoningDelta { delta: String },
    #[serde(
        rename = "response.reasoning_text.done",
        alias = "response.reasoning_summary_text.done"
    )]
    ReasoningDone {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        #[serde(default)]
        output_index: usize,
        item: OutputItem,
    },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        #[serde(default)]
        output_index: usize,
        item: OutputItem,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        output_index: Option<usize>,
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        output_index: Option<usize>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default, deserialize_with = "arguments_as_text")]
        arguments: Option<String>,
    },
    #[serde(rename = "response.file_search_call.in_progress")]
    FileSearchCallInProgress {
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "response.file_search_call.searching")]
    FileSearchCallSearching {
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "response.file_search_call.completed")]
    FileSearchCallCompleted {
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "response.image_generation_call.in_progress")]
    ImageGenerationCallInProgress {
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "response.image_generation_call.generating")]
    ImageGenerationCallGenerating {
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "response.image_generation_call.partial_image")]
    ImageGenerationCallPartialImage {
        #[serde(default)]
        item_id: String,
        #[serde(default)]
        partial_image_index: usize,
    },
    #[serde(rename = "response.image_generation_call.completed")]
    ImageGenerationCallCompleted {
        #[serde(default)]
        item_id: String,
    },
    #[serde(rename = "response.completed", alias = "response.done")]
    Completed { response: ResponseSummary },
    #[serde(rename = "response.incomplete")]
    Incomplete { response: ResponseSummary },
    #[serde(rename = "response.failed")]
    Failed { response: ResponseSummary },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

/// Output item payload carried by `output_item.added`/`.done` and summaries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        #[serde(default)]
        id: String,
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    FunctionCall {
        #[serde(default)]
        id: String,
        #[serde(default)]
        call_id: String,
        #[serde(default)]
        name: String,
        #[serde(default, deserialize_with = "arguments_as_text")]
        arguments: Option<String>,
    },
    Reasoning {
        #[serde(default)]
        id: String,
        #[serde(default)]
        summary: Vec<TextPart>,
        #[serde(default)]
        content: Vec<TextPart>,
    },
    FileSearchCall {
        #[serde(default)]
        id: String,
        #[serde(default)]
        queries: Vec<String>,
        #[serde(default)]
        results: Option<Vec<FileSearchHit>>,
    },
    ImageGenerationCall {
        #[serde(default)]
        id: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        revised_prompt: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    OutputText {
        #[serde(default)]
        text: String,
        #[serde(default)]
        annotations: Vec<Annotation>,
    },
    Refusal {
        #[serde(default)]
        refusal: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TextPart {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileSearchHit {
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    UrlCitation {
        url: String,
        #[serde(default)]
        title: Option<String>,
    },
    FileCitation {
        #[serde(default)]
        file_id: String,
        #[serde(default)]
        filename: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// The `response` object carried by lifecycle events.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    /// Convenience aggregate some gateways include alongside `output`.
    #[serde(default)]
    pub output_text: Option<String>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
    #[serde(default)]
    pub error: Option<WireError>,
}

impl ResponseSummary {
    /// Final answer text, if the summary carries any.
    pub fn final_text(&self) -> Option<String> {
        if let Some(text) = self.output_text.as_deref()
            && !text.is_empty()
        {
            return Some(text.to_string());
        }
        let text: String = self
            .output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Message { content, .. } => Some(content),
                _ => None,
            })
            .flatten()
            .filter_map(|part| match part {
                OutputContent::OutputText { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        (!text.is_empty()).then_some(text)
    }

    pub fn usage_stats(&self) -> Option<UsageStats> {
        self.usage.as_ref().map(WireUsage::to_stats)
    }

    pub fn error_message(&self) -> String {
        self.error.as_ref().map_or_else(
            || "response failed".to_string(),
            |err| match err.code.as_deref() {
                Some(code) if !code.is_empty() => format!("{code}: {}", err.message),
                _ => err.message.clone(),
            },
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub input_tokens_details: Option<InputTokenDetails>,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub output_tokens_details: Option<OutputTokenDetails>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InputTokenDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OutputTokenDetails {
    #[serde(default)]
    pub reasoning_tokens: u64,
}

impl WireUsage {
    pub fn to_stats(&self) -> UsageStats {
        UsageStats {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cached_tokens: self
                .input_tokens_details
                .as_ref()
                .map_or(0, |d| d.cached_tokens),
            reasoning_tokens: self
                .output_tokens_details
                .as_ref()
                .map_or(0, |d| d.reasoning_tokens),
            total_tokens: self
                .total_tokens
                .unwrap_or(self.input_tokens + self.output_tokens),
            cost: self.cost,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WireError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Function-call arguments arrive as a JSON string, but some gateways send
/// the decoded object instead.
fn arguments_as_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

/// Decodes one SSE `data` payload.
enum Record {
    Event(Box<ResponseEvent>),
    Done,
    Skip,
}

fn decode_record(data: &str) -> Record {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Record::Skip;
    }
    if trimmed == DONE_SENTINEL {
        return Record::Done;
    }
    match serde_json::from_str::<ResponseEvent>(trimmed) {
        Ok(ResponseEvent::Unknown) => {
            debug!(record = %truncate_for_log(trimmed), "skipping unrecognized event type");
            Record::Skip
        }
        Ok(event) => Record::Event(Box::new(event)),
        Err(err) => {
            debug!(error = %err, record = %truncate_for_log(trimmed), "skipping malformed SSE record");
            Record::Skip
        }
    }
}

fn truncate_for_log(text: &str) -> &str {
    const MAX: usize = 200;
    if text.len() <= MAX {
        return text;
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Lazy, finite parser over a Responses byte stream.
pub struct ResponsesSseParser<S> {
    inner: EventStream<S>,
    finished: bool,
}

impl<S> ResponsesSseParser<S> {
    pub fn new(stream: S) -> Self
    where
        S: Eventsource,
    {
        Self {
            inner: stream.eventsource(),
            finished: false,
        }
    }
}

impl<S, E> Stream for ResponsesSseParser<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = ProviderResult<ResponseEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.finished {
                return Poll::Ready(None);
            }

            let inner = Pin::new(&mut self.inner);
            match inner.poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => match decode_record(&event.data) {
                    Record::Event(event) => return Poll::Ready(Some(Ok(*event))),
                    Record::Done => {
                        self.finished = true;
                        return Poll::Ready(None);
                    }
                    Record::Skip => {}
                },
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(ProviderError::parse(format!(
                        "SSE stream error: {e}"
                    )))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
