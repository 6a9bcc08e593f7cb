//! Runtime execution modes.
//!
//! - `exec`: Non-interactive mode (results on stdout, progress on stderr)

pub mod exec;
