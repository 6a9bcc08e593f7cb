//! Scripted transport that feeds canned SSE bytes through the real parser.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt, stream};
use serde_json::{Value, json};

use crate::providers::openai::responses::{ByteStream, RequestBody, ResponsesTransport};
use crate::providers::{ProviderError, ProviderResult};

pub(crate) enum Reply {
    /// Stream these records, then end.
    Sse(Vec<String>),
    /// Stream these records, then stay open forever.
    Hang(Vec<String>),
    Fail(ProviderError),
}

pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    repeat: Option<Vec<String>>,
    requests: Mutex<Vec<RequestBody>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every request with the same records.
    pub(crate) fn repeating(records: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            repeat: Some(records),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<RequestBody> {
        self.requests.lock().unwrap().clone()
    }
}

impl ResponsesTransport for ScriptedTransport {
    fn open_stream<'a>(&'a self, body: &'a RequestBody) -> BoxFuture<'a, ProviderResult<ByteStream>> {
        self.requests.lock().unwrap().push(body.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.clone().map(Reply::Sse));
        let result = match reply {
            Some(Reply::Sse(records)) => Ok(byte_stream(records, false)),
            Some(Reply::Hang(records)) => Ok(byte_stream(records, true)),
            Some(Reply::Fail(err)) => Err(err),
            None => Err(ProviderError::parse("scripted transport exhausted")),
        };
        futures_util::future::ready(result).boxed()
    }
}

fn byte_stream(records: Vec<String>, hang: bool) -> ByteStream {
    let chunks = stream::iter(
        records
            .into_iter()
            .map(|record| Ok::<_, std::io::Error>(Bytes::from(record))),
    );
    if hang {
        chunks.chain(stream::pending()).boxed()
    } else {
        chunks.boxed()
    }
}

/// Frames events as SSE records followed by `[DONE]`.
pub(crate) fn sse(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .map(|event| format!("data: {event}\n\n"))
        .chain(std::iter::once("data: [DONE]\n\n".to_string()))
        .collect()
}

pub(crate) fn usage_json(total_tokens: u64) -> Value {
    let input = total_tokens / 2;
    json!({
        "input_tokens": input,
        "output_tokens": total_tokens - input,
        "total_tokens": total_tokens,
    })
}

pub(crate) fn text_delta(text: &str) -> Value {
    json!({"type": "response.output_text.delta", "item_id": "msg_1", "output_index": 0, "delta": text})
}

pub(crate) fn completed(total_tokens: u64) -> Value {
    json!({
        "type": "response.completed",
        "response": {"id": "resp_1", "status": "completed", "output": [], "usage": usage_json(total_tokens)}
    })
}

/// A plain text answer streamed in two halves.
pub(crate) fn text_turn(text: &str, total_tokens: u64) -> Vec<String> {
    let mid = text.char_indices().nth(text.chars().count() / 2).map_or(0, |(i, _)| i);
    let (head, tail) = text.split_at(mid);
    sse(&[text_delta(head), text_delta(tail), completed(total_tokens)])
}

/// Tool calls with arguments streamed as two fragments each, optionally
/// preceded by leading text.
pub(crate) fn tool_turn(lead: &str, calls: &[(&str, &str, Value)], total_tokens: u64) -> Vec<String> {
    let mut events = Vec::new();
    if !lead.is_empty() {
        events.push(text_delta(lead));
    }
    for (offset, (call_id, name, arguments)) in calls.iter().enumerate() {
        let index = offset + 1;
        let item_id = format!("fc_{call_id}");
        let args = arguments.to_string();
        let mid = args.len() / 2;
        events.push(json!({
            "type": "response.output_item.added",
            "output_index": index,
            "item": {"type": "function_call", "id": item_id, "call_id": call_id, "name": name, "arguments": ""}
        }));
        events.push(json!({
            "type": "response.function_call_arguments.delta",
            "item_id": item_id, "output_index": index, "delta": &args[..mid]
        }));
        events.push(json!({
            "type": "response.function_call_arguments.delta",
            "item_id": item_id, "output_index": index, "delta": &args[mid..]
        }));
        events.push(json!({
            "type": "response.output_item.done",
            "output_index": index,
            "item": {"type": "function_call", "id": item_id, "call_id": call_id, "name": name, "arguments": args}
        }));
    }
    events.push(completed(total_tokens));
    sse(&events)
}
