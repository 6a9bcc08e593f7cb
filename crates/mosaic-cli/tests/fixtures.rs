//! SSE fixture helpers for integration tests.

#![allow(dead_code)]

use wiremock::ResponseTemplate;

pub const SSE_TEXT: &str = include_str!("fixtures/sse_text_response.sse");
pub const SSE_FUNCTION_CALL: &str = include_str!("fixtures/sse_function_call_response.sse");

/// A Responses stream that answers with `text`.
pub fn text_sse(text: &str) -> String {
    SSE_TEXT.replace("{{TEXT}}", &escape_json(text))
}

/// A Responses stream that requests one function call.
pub fn function_call_sse(call_id: &str, tool_name: &str, arguments_json: &str) -> String {
    SSE_FUNCTION_CALL
        .replace("{{CALL_ID}}", call_id)
        .replace("{{TOOL_NAME}}", tool_name)
        .replace("{{ARGUMENTS}}", &escape_json(arguments_json))
}

/// Wrap SSE body string in a ResponseTemplate.
pub fn sse_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}

pub fn text_response(text: &str) -> ResponseTemplate {
    sse_response(&text_sse(text))
}

pub fn function_call_response(call_id: &str, tool_name: &str, arguments_json: &str) -> ResponseTemplate {
    sse_response(&function_call_sse(call_id, tool_name, arguments_json))
}

/// Escape special characters for JSON string embedding.
fn escape_json(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}
