//! Accumulates streamed tool-call fragments into complete calls.
//!
//! Calls are keyed by the provider item id (falling back to `call_id`).
//! Fragments that only carry an `output_index` are resolved through the index,
//! and fragments with neither go to the most recent open call.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::providers::openai::responses::{OutputItem, ResponseEvent};
use crate::tools::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Executing,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallState {
    pub id: String,
    pub call_id: String,
    pub name: String,
    pub output_index: usize,
    pub arguments_buffer: String,
    pub status: ToolCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_arguments: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallState {
    fn new(id: String, call_id: String, name: String, output_index: usize) -> Self {
        Self {
            id,
            call_id,
            name,
            output_index,
            arguments_buffer: String::new(),
            status: ToolCallStatus::Pending,
            parsed_arguments: None,
            error: None,
        }
    }

    /// Decodes the buffer and marks the call completed.
    fn finalize(&mut self) {
        self.status = ToolCallStatus::Completed;
        match decode_arguments(&self.arguments_buffer) {
            Ok(map) => {
                self.parsed_arguments = Some(map);
                self.error = None;
            }
            Err(err) => {
                self.parsed_arguments = None;
                self.error = Some(err);
            }
        }
    }

    /// Id to echo back in `function_call_output`.
    pub fn reply_id(&self) -> &str {
        if self.call_id.is_empty() {
            &self.id
        } else {
            &self.call_id
        }
    }

    /// Executable form of a completed call. `None` while arguments are
    /// missing or invalid.
    pub fn to_tool_call(&self) -> Option<ToolCall> {
        let arguments = self.parsed_arguments.clone()?;
        Some(ToolCall {
            id: self.reply_id().to_string(),
            name: self.name.clone(),
            arguments,
        })
    }
}

fn decode_arguments(buffer: &str) -> Result<Map<String, Value>, String> {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!(
            "tool arguments must be a JSON object, got {}",
            json_type_name(&other)
        )),
        Err(err) => Err(format!("invalid JSON arguments: {err}")),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// What a single event did to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerUpdate {
    None,
    Started { id: String, name: String },
    Completed { id: String },
}

#[derive(Debug, Default)]
pub struct ToolCallTracker {
    calls: HashMap<String, ToolCallState>,
    order: Vec<String>,
    by_output_index: HashMap<usize, String>,
}

impl ToolCallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call. Returns `false` for an id that is already tracked.
    pub fn started(&mut self, id: &str, call_id: &str, name: &str, output_index: usize) -> bool {
        let key = key_for(id, call_id);
        if key.is_empty() || self.calls.contains_key(&key) {
            return false;
        }
        self.by_output_index.insert(output_index, key.clone());
        self.order.push(key.clone());
        self.calls.insert(
            key.clone(),
            ToolCallState::new(key, call_id.to_string(), name.to_string(), output_index),
        );
        true
    }

    pub fn arguments_delta(&mut self, id: Option<&str>, output_index: Option<usize>, delta: &str) {
        let Some(key) = self.resolve(id, output_index) else {
            return;
        };
        if let Some(state) = self.calls.get_mut(&key)
            && state.status != ToolCallStatus::Completed
        {
            state.arguments_buffer.push_str(delta);
            state.status = ToolCallStatus::Executing;
        }
    }

    /// Applies the authoritative argument string and completes the call.
    pub fn arguments_done(
        &mut self,
        id: Option<&str>,
        output_index: Option<usize>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> Option<String> {
        let key = self.resolve(id, output_index)?;
        let state = self.calls.get_mut(&key)?;
        if let Some(arguments) = arguments {
            state.arguments_buffer = arguments.to_string();
        }
        if state.name.is_empty()
            && let Some(name) = name
        {
            state.name = name.to_string();
        }
        state.finalize();
        Some(key)
    }

    /// Completes a call from its terminal item, synthesizing it if no start
    /// was seen. Returns the key only when this event completed the call.
    pub fn item_done(
        &mut self,
        output_index: usize,
        id: &str,
        call_id: &str,
        name: &str,
        arguments: Option<&str>,
    ) -> Option<String> {
        let lookup = if id.is_empty() { call_id } else { id };
        let key = match self.resolve(Some(lookup).filter(|s| !s.is_empty()), Some(output_index)) {
            Some(key) => key,
            None => {
                let key = key_for(id, call_id);
                if key.is_empty() {
                    return None;
                }
                self.started(&key, call_id, name, output_index);
                key
            }
        };

        let state = self.calls.get_mut(&key)?;
        if state.call_id.is_empty() {
            state.call_id = call_id.to_string();
        }
        if state.name.is_empty() {
            state.name = name.to_string();
        }
        let already_completed = state.status == ToolCallStatus::Completed;
        if let Some(arguments) = arguments
            && (!already_completed || arguments != state.arguments_buffer)
        {
            state.arguments_buffer = arguments.to_string();
            state.finalize();
        } else if !already_completed {
            state.finalize();
        }
        (!already_completed).then_some(key)
    }

    /// Mirrors one parsed event into the tracker.
    pub fn apply(&mut self, event: &ResponseEvent) -> TrackerUpdate {
        match event {
            ResponseEvent::OutputItemAdded {
                output_index,
                item:
                    OutputItem::FunctionCall {
                        id,
                        call_id,
                        name,
                        arguments,
                    },
            } => {
                let key = key_for(id, call_id);
                if !self.started(id, call_id, name, *output_index) {
                    return TrackerUpdate::None;
                }
                if let Some(arguments) = arguments.as_deref().filter(|a| !a.is_empty()) {
                    self.arguments_delta(Some(&key), None, arguments);
                }
                TrackerUpdate::Started {
                    id: key,
                    name: name.clone(),
                }
            }
            ResponseEvent::FunctionCallArgumentsDelta {
                item_id,
                output_index,
                delta,
            } => {
                self.arguments_delta(item_id.as_deref(), *output_index, delta);
                TrackerUpdate::None
            }
            ResponseEvent::FunctionCallArgumentsDone {
                item_id,
                output_index,
                name,
                arguments,
            } => {
                let was_open = self
                    .resolve(item_id.as_deref(), *output_index)
                    .and_then(|key| self.calls.get(&key))
                    .is_some_and(|s| s.status != ToolCallStatus::Completed);
                match self.arguments_done(
                    item_id.as_deref(),
                    *output_index,
                    name.as_deref(),
                    arguments.as_deref(),
                ) {
                    Some(id) if was_open => TrackerUpdate::Completed { id },
                    _ => TrackerUpdate::None,
                }
            }
            ResponseEvent::OutputItemDone {
                output_index,
                item:
                    OutputItem::FunctionCall {
                        id,
                        call_id,
                        name,
                        arguments,
                    },
            } => match self.item_done(*output_index, id, call_id, name, arguments.as_deref()) {
                Some(id) => TrackerUpdate::Completed { id },
                None => TrackerUpdate::None,
            },
            _ => TrackerUpdate::None,
        }
    }

    /// Finalizes calls still open when the stream ended. Returns their keys.
    pub fn finish_pending(&mut self) -> Vec<String> {
        let mut finished = Vec::new();
        for key in &self.order {
            if let Some(state) = self.calls.get_mut(key)
                && state.status != ToolCallStatus::Completed
            {
                state.finalize();
                finished.push(key.clone());
            }
        }
        finished
    }

    pub fn get(&self, id: &str) -> Option<&ToolCallState> {
        self.calls.get(id)
    }

    /// Completed calls in the order they were first seen.
    pub fn completed(&self) -> Vec<ToolCallState> {
        self.order
            .iter()
            .filter_map(|key| self.calls.get(key))
            .filter(|state| state.status == ToolCallStatus::Completed)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
        self.order.clear();
        self.by_output_index.clear();
    }

    fn resolve(&self, id: Option<&str>, output_index: Option<usize>) -> Option<String> {
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            if self.calls.contains_key(id) {
                return Some(id.to_string());
            }
            // Some gateways reference calls by `call_id` in fragments.
            if let Some(state) = self.calls.values().find(|s| s.call_id == id) {
                return Some(state.id.clone());
            }
        }
        if let Some(index) = output_index
            && let Some(key) = self.by_output_index.get(&index)
        {
            return Some(key.clone());
        }
        if id.is_some_and(|id| !id.is_empty()) {
            return None;
        }
        self.order
            .iter()
            .rev()
            .find(|key| {
                self.calls
                    .get(*key)
                    .is_some_and(|s| s.status != ToolCallStatus::Completed)
            })
            .cloned()
    }
}

fn key_for(id: &str, call_id: &str) -> String {
    if id.is_empty() {
        call_id.to_string()
    } else {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> ResponseEvent {
        serde_json::from_str(json).unwrap()
    }

    fn started(tracker: &mut ToolCallTracker, id: &str, call_id: &str, name: &str, index: usize) {
        let update = tracker.apply(&event(&format!(
            r#"{{"type":"response.output_item.added","output_index":{index},
                "item":{{"type":"function_call","id":"{id}","call_id":"{call_id}","name":"{name}","arguments":""}}}}"#
        )));
        assert!(matches!(update, TrackerUpdate::Started { .. }));
    }

    #[test]
    fn test_fragments_then_arguments_done_complete_call() {
        let mut tracker = ToolCallTracker::new();
        started(&mut tracker, "fc_1", "call_1", "file_search", 0);

        tracker.apply(&event(
            r#"{"type":"response.function_call_arguments.delta","item_id":"fc_1","delta":"{\"query\":\"rev"}"#,
        ));
        assert_eq!(tracker.get("fc_1").unwrap().status, ToolCallStatus::Executing);
        tracker.apply(&event(
            r#"{"type":"response.function_call_arguments.delta","item_id":"fc_1","delta":"enue\"}"}"#,
        ));
        let update = tracker.apply(&event(
            r#"{"type":"response.function_call_arguments.done","item_id":"fc_1","arguments":"{\"query\":\"revenue\"}"}"#,
        ));
        assert_eq!(
            update,
            TrackerUpdate::Completed {
                id: "fc_1".to_string()
            }
        );

        let completed = tracker.completed();
        assert_eq!(completed.len(), 1);
        let call = &completed[0];
        assert_eq!(call.call_id, "call_1");
        assert_eq!(call.name, "file_search");
        assert_eq!(
            call.parsed_arguments.as_ref().unwrap()["query"],
            Value::String("revenue".to_string())
        );
        assert!(call.error.is_none());
    }

    #[test]
    fn test_item_done_after_arguments_done_does_not_duplicate() {
        let mut tracker = ToolCallTracker::new();
        started(&mut tracker, "fc_1", "call_1", "sql_query", 0);
        tracker.apply(&event(
            r#"{"type":"response.function_call_arguments.done","item_id":"fc_1","arguments":"{\"query\":\"select 1\"}"}"#,
        ));
        let update = tracker.apply(&event(
            r#"{"type":"response.output_item.done","output_index":0,
                "item":{"type":"function_call","id":"fc_1","call_id":"call_1","name":"sql_query","arguments":"{\"query\":\"select 1\"}"}}"#,
        ));

        assert_eq!(update, TrackerUpdate::None);
        assert_eq!(tracker.completed().len(), 1);
    }

    #[test]
    fn test_index_only_fragments_resolve_through_output_index() {
        let mut tracker = ToolCallTracker::new();
        started(&mut tracker, "fc_a", "call_a", "sql_query", 1);
        started(&mut tracker, "fc_b", "call_b", "create_chart", 2);

        tracker.apply(&event(
            r#"{"type":"response.function_call_arguments.delta","output_index":1,"delta":"{\"query\":"}"#,
        ));
        tracker.apply(&event(
            r#"{"type":"response.function_call_arguments.delta","output_index":2,"delta":"{\"spec\":{}}"}"#,
        ));
        tracker.apply(&event(
            r#"{"type":"response.function_call_arguments.delta","output_index":1,"delta":"\"select 2\"}"}"#,
        ));
        tracker.finish_pending();

        let a = tracker.get("fc_a").unwrap();
        assert_eq!(a.arguments_buffer, r#"{"query":"select 2"}"#);
        assert!(a.parsed_arguments.is_some());
        let b = tracker.get("fc_b").unwrap();
        assert_eq!(b.arguments_buffer, r#"{"spec":{}}"#);
    }

    #[test]
    fn test_terminal_only_call_is_synthesized() {
        let mut tracker = ToolCallTracker::new();
        let update = tracker.apply(&event(
            r#"{"type":"response.output_item.done","output_index":3,
                "item":{"type":"function_call","id":"fc_9","call_id":"call_9","name":"render_html","arguments":"{\"html\":\"<p>x</p>\"}"}}"#,
        ));

        assert_eq!(
            update,
            TrackerUpdate::Completed {
                id: "fc_9".to_string()
            }
        );
        let call = tracker.get("fc_9").unwrap();
        assert_eq!(call.status, ToolCallStatus::Completed);
        assert_eq!(call.output_index, 3);
        assert_eq!(call.to_tool_call().unwrap().id, "call_9");
    }

    #[test]
    fn test_invalid_arguments_set_error_on_that_call_only() {
        let mut tracker = ToolCallTracker::new();
        started(&mut tracker, "fc_1", "call_1", "sql_query", 0);
        started(&mut tracker, "fc_2", "call_2", "sql_query", 1);

        tracker.arguments_done(Some("fc_1"), None, None, Some("{\"query\": "));
        tracker.arguments_done(Some("fc_2"), None, None, Some("{\"query\":\"select 1\"}"));
        tracker.arguments_done(Some("missing"), None, None, Some("{}"));

        let bad = tracker.get("fc_1").unwrap();
        assert_eq!(bad.status, ToolCallStatus::Completed);
        assert!(bad.parsed_arguments.is_none());
        assert!(bad.error.as_deref().unwrap().starts_with("invalid JSON arguments"));
        assert!(bad.to_tool_call().is_none());

        let good = tracker.get("fc_2").unwrap();
        assert!(good.error.is_none());
        assert_eq!(tracker.completed().len(), 2);
    }

    #[test]
    fn test_non_object_arguments_are_rejected() {
        let mut tracker = ToolCallTracker::new();
        started(&mut tracker, "fc_1", "call_1", "render_html", 0);
        tracker.arguments_done(Some("fc_1"), None, None, Some("[1,2]"));
        assert_eq!(
            tracker.get("fc_1").unwrap().error.as_deref(),
            Some("tool arguments must be a JSON object, got array")
        );
    }

    #[test]
    fn test_duplicate_start_is_ignored() {
        let mut tracker = ToolCallTracker::new();
        started(&mut tracker, "fc_1", "call_1", "sql_query", 0);
        assert!(!tracker.started("fc_1", "call_1", "sql_query", 0));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_every_started_call_completes_exactly_once() {
        // Starts, fragments, and terminal events interleaved across three calls,
        // with one call never receiving a terminal event.
        let mut tracker = ToolCallTracker::new();
        let mut completions: Vec<String> = Vec::new();
        let script = [
            r#"{"type":"response.output_item.added","output_index":0,"item":{"type":"function_call","id":"fc_0","call_id":"c0","name":"t"}}"#,
            r#"{"type":"response.output_item.added","output_index":1,"item":{"type":"function_call","id":"fc_1","call_id":"c1","name":"t"}}"#,
            r#"{"type":"response.function_call_arguments.delta","item_id":"fc_1","delta":"{}"}"#,
            r#"{"type":"response.function_call_arguments.delta","item_id":"fc_0","delta":"{\"a\":1}"}"#,
            r#"{"type":"response.output_item.added","output_index":2,"item":{"type":"function_call","id":"fc_2","call_id":"c2","name":"t"}}"#,
            r#"{"type":"response.output_item.done","output_index":1,"item":{"type":"function_call","id":"fc_1","call_id":"c1","name":"t","arguments":"{}"}}"#,
            r#"{"type":"response.function_call_arguments.done","item_id":"fc_0","arguments":"{\"a\":1}"}"#,
            r#"{"type":"response.output_item.done","output_index":0,"item":{"type":"function_call","id":"fc_0","call_id":"c0","name":"t","arguments":"{\"a\":1}"}}"#,
            r#"{"type":"response.function_call_arguments.delta","item_id":"fc_2","delta":"{\"b\":"}"#,
        ];
        for record in script {
            if let TrackerUpdate::Completed { id } = tracker.apply(&event(record)) {
                completions.push(id);
            }
        }
        completions.extend(tracker.finish_pending());

        completions.sort();
        assert_eq!(completions, vec!["fc_0", "fc_1", "fc_2"]);
        let all = tracker.completed();
        assert_eq!(all.len(), 3);
        assert!(
            all.iter()
                .all(|c| c.parsed_arguments.is_some() != c.error.is_some())
        );
        assert!(tracker.get("fc_2").unwrap().error.is_some());
    }

    #[test]
    fn test_clear_empties_tracker() {
        let mut tracker = ToolCallTracker::new();
        started(&mut tracker, "fc_1", "call_1", "t", 0);
        tracker.clear();
        assert!(tracker.is_empty());
        assert!(tracker.completed().is_empty());
    }
}
