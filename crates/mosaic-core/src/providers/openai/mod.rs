//! OpenAI-compatible Responses API client.

pub mod responses;
mod responses_sse;
mod responses_types;
