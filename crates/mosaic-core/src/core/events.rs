//! Channel event types and the tool output envelope.
//!
//! `ChannelEvent` is the contract between the orchestrator and anyone watching
//! a channel (CLI, UI). Events are serializable for JSON output mode.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::artifacts::{Artifact, Citation};
use crate::providers::{ProviderErrorKind, UsageStats};

/// Events published while a channel streams and its tool loop runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// The request for a model call was sent.
    ChannelStarted { instance_id: String, model: String },

    /// Incremental answer text.
    TextDelta { instance_id: String, text: String },

    /// Incremental reasoning text.
    ReasoningDelta { instance_id: String, text: String },

    /// The model began emitting a tool call.
    ToolCallStarted {
        instance_id: String,
        id: String,
        name: String,
    },

    /// A tool call's arguments are complete (or failed to decode).
    ToolCallCompleted {
        instance_id: String,
        id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    ArtifactAdded {
        instance_id: String,
        artifact: Artifact,
    },

    CitationAdded {
        instance_id: String,
        citation: Citation,
    },

    UsageUpdated {
        instance_id: String,
        usage: UsageStats,
    },

    /// The model call finished normally.
    ChannelCompleted { instance_id: String },

    /// The model call failed; the channel is frozen.
    ChannelErrored {
        instance_id: String,
        kind: ErrorKind,
        message: String,
    },

    /// Cancellation fired while the channel was open.
    ChannelCancelled { instance_id: String },

    /// A tool round is about to execute.
    RoundStarted {
        instance_id: String,
        round: usize,
        tool_count: usize,
    },

    ToolExecutionStarted {
        instance_id: String,
        round: usize,
        execution_id: String,
        tool_name: String,
    },

    ToolExecutionFinished {
        instance_id: String,
        round: usize,
        execution_id: String,
        tool_name: String,
        success: bool,
    },

    RoundCompleted {
        instance_id: String,
        round: usize,
        has_error: bool,
    },
}

/// Error categories for `ChannelEvent::ChannelErrored`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connection/request timeout
    Timeout,
    /// Response parsing failed
    Parse,
    /// API-level error from provider
    ApiError,
    /// Internal/unknown error
    Internal,
}

impl From<ProviderErrorKind> for ErrorKind {
    fn from(kind: ProviderErrorKind) -> Self {
        match kind {
            ProviderErrorKind::HttpStatus => ErrorKind::HttpStatus,
            ProviderErrorKind::Timeout => ErrorKind::Timeout,
            ProviderErrorKind::Parse => ErrorKind::Parse,
            ProviderErrorKind::ApiError => ErrorKind::ApiError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::HttpStatus => write!(f, "http_status"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Parse => write!(f, "parse"),
            ErrorKind::ApiError => write!(f, "api_error"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Sender half of an observer channel.
pub type ChannelEventTx = mpsc::Sender<Arc<ChannelEvent>>;
/// Receiver half of an observer channel.
pub type ChannelEventRx = mpsc::Receiver<Arc<ChannelEvent>>;

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Creates a bounded observer channel.
pub fn create_event_channel() -> (ChannelEventTx, ChannelEventRx) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Publishes channel events to an optional observer.
///
/// A disabled sender drops everything, so orchestration code never branches
/// on whether someone is watching.
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    tx: Option<ChannelEventTx>,
}

impl EventSender {
    pub fn new(tx: ChannelEventTx) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sender with no observer attached.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Best-effort send: never awaits, drops if the channel is full.
    /// Use for high-volume events like `TextDelta` that can afford loss.
    pub fn send_delta(&self, ev: ChannelEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(Arc::new(ev));
        }
    }

    /// Reliable send: awaits delivery.
    /// Use for lifecycle events (tool execution, completion, errors).
    pub async fn send_important(&self, ev: ChannelEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Arc::new(ev)).await;
        }
    }
}

/// What a tool sends back to the model.
///
/// Serialized as `{"ok":true,"data":…}` or
/// `{"ok":false,"error":{"code","message","details"?}}`. A canceled call is a
/// failure with code `canceled` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutput {
    Success(Value),
    Failure(ToolError),
    Canceled(String),
}

const CANCELED: &str = "canceled";
const SERIALIZE_FALLBACK: &str =
    r#"{"ok":false,"error":{"code":"serialize_error","message":"tool output could not be encoded"}}"#;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorRef<'a>>,
}

#[derive(Serialize)]
struct ErrorRef<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

#[derive(Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<ToolError>,
}

impl Serialize for ToolOutput {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let envelope = match self {
            Self::Success(data) => EnvelopeRef {
                ok: true,
                data: Some(data),
                error: None,
            },
            _ => EnvelopeRef {
                ok: false,
                data: None,
                error: self.error_info().map(|(code, message, details)| ErrorRef {
                    code,
                    message,
                    details,
                }),
            },
        };
        envelope.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ToolOutput {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let envelope = Envelope::deserialize(deserializer)?;
        Ok(match (envelope.ok, envelope.error) {
            (true, _) => Self::Success(envelope.data),
            (false, Some(error)) if error.code == CANCELED => Self::Canceled(error.message),
            (false, Some(error)) => Self::Failure(error),
            (false, None) => Self::Failure(ToolError {
                code: "unknown".to_string(),
                message: "failure without error body".to_string(),
                details: None,
            }),
        })
    }
}

impl ToolOutput {
    pub fn success(data: Value) -> Self {
        Self::Success(data)
    }

    pub fn failure(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self::Failure(ToolError {
            code: code.into(),
            message: message.into(),
            details,
        })
    }

    pub fn failure_with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::failure(code, message, Some(details.into()))
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::Canceled(message.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Success(data) => Some(data),
            Self::Failure(_) | Self::Canceled(_) => None,
        }
    }

    /// `(code, message, details)` for failures and cancellations.
    pub fn error_info(&self) -> Option<(&str, &str, Option<&str>)> {
        match self {
            Self::Success(_) => None,
            Self::Failure(error) => Some((
                error.code.as_str(),
                error.message.as_str(),
                error.details.as_deref(),
            )),
            Self::Canceled(message) => Some((CANCELED, message.as_str(), None)),
        }
    }

    /// `code: message`, the form stored in `ToolExecutionResult::error`.
    pub fn error_summary(&self) -> Option<String> {
        self.error_info()
            .map(|(code, message, _)| format!("{code}: {message}"))
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| SERIALIZE_FALLBACK.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    /// Extra context: stderr, a raw response body, the offending SQL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
