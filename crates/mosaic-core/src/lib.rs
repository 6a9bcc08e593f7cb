//! Core mosaic library: streaming channels, the tool loop, tools, config.

pub mod config;
pub mod core;
pub mod logging;
pub mod providers;
pub mod tools;
