//! Core module: streaming orchestration and the tool loop.
//!
//! - `artifacts`: artifacts and citations produced alongside output
//! - `channel`: one streamed model call per instance
//! - `events`: observer events and the tool output envelope
//! - `instances`: parallel fan-out across instances
//! - `tool_loop`: bounded model/tool rounds
//! - `tool_tracker`: streamed tool-call accumulation

pub mod artifacts;
pub mod channel;
pub mod events;
pub mod instances;
pub mod tool_loop;
pub mod tool_tracker;

#[cfg(test)]
pub(crate) mod testing;
