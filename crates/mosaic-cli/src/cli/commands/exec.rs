//! Exec command handler.

use anyhow::{Context, Result};
use mosaic_core::config;
use mosaic_core::tools::ToolRegistry;

use crate::modes;

pub struct ExecRunOptions<'a> {
    pub prompt: &'a str,
    pub config: &'a config::Config,
    pub models: &'a [String],
    pub tools_override: Option<&'a str>,
    pub no_tools: bool,
    pub json: bool,
}

pub async fn run(options: ExecRunOptions<'_>) -> Result<()> {
    if options.prompt.trim().is_empty() {
        anyhow::bail!("--prompt cannot be empty");
    }

    let config = {
        let mut c = options.config.clone();
        if options.no_tools {
            c.tools.enabled = Some(Vec::new());
            c.tools.native_file_search = false;
            c.tool_servers.clear();
        } else if let Some(raw) = options.tools_override {
            c.tools.enabled = Some(parse_tools_override(raw)?);
        }
        c
    };

    let exec_opts = modes::exec::ExecOptions {
        prompt: options.prompt.to_string(),
        models: options.models.to_vec(),
        json: options.json,
    };

    modes::exec::run_exec(&exec_opts, &config)
        .await
        .context("execute prompt")
}

fn parse_tools_override(raw: &str) -> Result<Vec<String>> {
    let tools: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect();

    if tools.is_empty() {
        anyhow::bail!("--tools requires a comma-separated list of tool names");
    }

    let available = ToolRegistry::builtins().tool_names();
    let mut unknown: Vec<String> = tools
        .iter()
        .filter(|t| !available.iter().any(|a| a.eq_ignore_ascii_case(t)))
        .cloned()
        .collect();

    if !unknown.is_empty() {
        unknown.sort();
        let mut available_sorted = available;
        available_sorted.sort();
        anyhow::bail!(
            "Unknown tool(s): {}. Available tools: {}",
            unknown.join(", "),
            available_sorted.join(", ")
        );
    }

    Ok(tools)
}
