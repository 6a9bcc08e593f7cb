//! CLI entry and dispatch.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use mosaic_core::config::{self, Config};

mod commands;

#[derive(Parser)]
#[command(name = "mosaic")]
#[command(version)]
#[command(about = "Fan one prompt out to several models with client-side tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of $MOSAIC_HOME/config.toml
    #[arg(long, global = true, value_name = "PATH", env = "MOSAIC_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Runs a prompt against every requested model instance in parallel
    Exec {
        /// The prompt to send
        #[arg(short, long)]
        prompt: String,

        /// Model to run (repeat for several instances; replaces [[instances]])
        #[arg(short = 'm', long = "model", value_name = "MODEL")]
        models: Vec<String>,

        /// Comma-separated list of tools to enable (full override)
        #[arg(long, value_name = "TOOLS")]
        tools: Option<String>,

        /// Disable all tools
        #[arg(long = "no-tools", conflicts_with = "tools")]
        no_tools: bool,

        /// Print every instance's result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(config::paths::config_path);

    match cli.command {
        Commands::Exec {
            prompt,
            models,
            tools,
            no_tools,
            json,
        } => {
            let config = load_config(&config_path)?;
            let _log = mosaic_core::logging::init(&config.logging).context("init logging")?;
            commands::exec::run(commands::exec::ExecRunOptions {
                prompt: &prompt,
                config: &config,
                models: &models,
                tools_override: tools.as_deref(),
                no_tools,
                json,
            })
            .await
        }

        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path(&config_path);
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(&config_path),
        },
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load_from(path).context("load config")
}
