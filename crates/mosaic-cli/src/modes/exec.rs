//! Non-interactive exec mode.
//!
//! Progress (tool activity, errors) goes to stderr while instances run.
//! Final answers go to stdout once every instance has finished.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use mosaic_core::config::Config;
use mosaic_core::core::channel::ChannelSettings;
use mosaic_core::core::events::{ChannelEvent, ChannelEventRx, EventSender, create_event_channel};
use mosaic_core::core::instances::{InstanceOutcome, run_instances};
use mosaic_core::providers::openai::responses::{
    InputItem, ResponsesClient, ResponsesConfig, ResponsesTransport,
};
use mosaic_core::tools::external::ExternalTools;
use mosaic_core::tools::{ToolContext, ToolRegistry, ToolServices};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::interrupt;

#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub prompt: String,
    pub models: Vec<String>,
    pub json: bool,
}

/// Runs one prompt across every resolved instance.
///
/// # Errors
/// Returns an error on setup failure, on Ctrl+C, or when every instance
/// errored.
pub async fn run_exec(options: &ExecOptions, config: &Config) -> Result<()> {
    let responses = ResponsesConfig::from_provider(&config.provider).context("resolve provider")?;
    let transport: Arc<dyn ResponsesTransport> =
        Arc::new(ResponsesClient::new(&responses).context("build responses client")?);
    let services = Arc::new(ToolServices::from_config(
        config,
        &responses,
        Arc::clone(&transport),
    )?);

    let mut registry = ToolRegistry::from_config(config);
    if !config.tool_servers.is_empty() {
        let external = ExternalTools::discover(&config.tool_servers).await;
        registry = registry.with_external(Arc::new(external));
    }

    let instances = config.resolve_instances(&options.models);
    let settings = ChannelSettings {
        instructions: config.instructions.clone(),
        defaults: config.defaults.clone(),
        tools: Vec::new(),
    };
    let ctx = ToolContext::new(services).with_timeout(config.tool_timeout());
    let cancel = CancellationToken::new();
    interrupt::init(cancel.clone())?;
    info!(
        instances = instances.len(),
        tools = registry.tool_names().len(),
        "starting exec"
    );

    let (tx, rx) = create_event_channel();
    let progress = tokio::spawn(render_progress(rx));
    let outcomes = {
        let events = EventSender::new(tx);
        run_instances(
            transport.as_ref(),
            &registry,
            &instances,
            &[InputItem::user(options.prompt.clone())],
            &settings,
            &ctx,
            &cancel,
            &events,
        )
        .await
    };
    let _ = progress.await;

    print_outcomes(&outcomes, options.json)?;

    if interrupt::is_interrupted() {
        return Err(interrupt::InterruptedError.into());
    }
    if !outcomes.is_empty() && outcomes.iter().all(InstanceOutcome::is_errored) {
        anyhow::bail!("all {} instance(s) failed", outcomes.len());
    }
    Ok(())
}

async fn render_progress(mut rx: ChannelEventRx) {
    while let Some(event) = rx.recv().await {
        match event.as_ref() {
            ChannelEvent::ToolExecutionStarted {
                instance_id,
                round,
                tool_name,
                ..
            } => eprintln!("[{instance_id}] round {round}: {tool_name}"),
            ChannelEvent::ToolExecutionFinished {
                instance_id,
                tool_name,
                success: false,
                ..
            } => eprintln!("[{instance_id}] {tool_name} failed"),
            ChannelEvent::ChannelErrored {
                instance_id,
                kind,
                message,
            } => eprintln!("[{instance_id}] error ({kind}): {message}"),
            ChannelEvent::ChannelCancelled { instance_id } => {
                eprintln!("[{instance_id}] interrupted");
            }
            _ => {}
        }
    }
}

fn print_outcomes(outcomes: &[InstanceOutcome], json: bool) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    if json {
        let text = serde_json::to_string_pretty(outcomes).context("serialize results")?;
        writeln!(stdout, "{text}").context("write results")?;
        return Ok(());
    }

    let headed = outcomes.len() > 1;
    for outcome in outcomes {
        if headed {
            let name = outcome.label.as_deref().unwrap_or(&outcome.instance_id);
            writeln!(stdout, "=== {name} ({}) ===", outcome.model).context("write results")?;
        }
        match &outcome.result {
            Some(result) if result.is_errored() && result.content.is_empty() => {
                eprintln!(
                    "[{}] {}",
                    outcome.instance_id,
                    result.error.as_deref().unwrap_or("request failed")
                );
            }
            Some(result) => writeln!(stdout, "{}", result.content).context("write results")?,
            None => eprintln!("[{}] no output", outcome.instance_id),
        }
        if headed {
            writeln!(stdout).context("write results")?;
        }
    }
    Ok(())
}
