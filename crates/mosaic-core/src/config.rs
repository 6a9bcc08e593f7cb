use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::channel::ModelInstance;
use crate::tools::external::SEPARATOR;

/// Reasoning effort requested from reasoning-capable models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    /// Wire value for `reasoning.effort`.
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl FromStr for ReasoningEffort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(ReasoningEffort::Minimal),
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            _ => anyhow::bail!(
                "Invalid reasoning effort '{s}'. Valid options: minimal, low, medium, high"
            ),
        }
    }
}

/// Sampling parameters. Unset fields defer to the next layer down
/// (instance > `[defaults]` > provider default).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl InstanceParams {
    /// Fields set on `self` win over `base`.
    #[must_use]
    pub fn overriding(&self, base: &InstanceParams) -> InstanceParams {
        InstanceParams {
            temperature: self.temperature.or(base.temperature),
            top_p: self.top_p.or(base.top_p),
            top_k: self.top_k.or(base.top_k),
            frequency_penalty: self.frequency_penalty.or(base.frequency_penalty),
            presence_penalty: self.presence_penalty.or(base.presence_penalty),
            max_output_tokens: self.max_output_tokens.or(base.max_output_tokens),
            reasoning_effort: self.reasoning_effort.or(base.reasoning_effort),
        }
    }
}

/// Responses endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Local gateways often run without auth.
    pub allow_missing_key: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// One `[[instances]]` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub id: Option<String>,
    pub model: String,
    pub label: Option<String>,
    #[serde(flatten)]
    pub params: InstanceParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Tools advertised to the model. `None` enables every built-in tool.
    pub enabled: Option<Vec<String>>,
    pub timeout_secs: u64,
    /// Advertise provider-hosted `file_search` instead of the client executor.
    pub native_file_search: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            timeout_secs: 120,
            native_file_search: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub python: String,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            timeout_secs: 30,
            max_output_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSearchConfig {
    /// Defaults to the provider base URL.
    pub base_url: Option<String>,
    pub vector_store_ids: Vec<String>,
    pub max_results: u32,
    pub requests_per_window: usize,
    pub window_secs: u64,
}

impl Default for FileSearchConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            vector_store_ids: Vec::new(),
            max_results: 8,
            requests_per_window: 20,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubAgentConfig {
    /// Defaults to the delegating instance's model.
    pub model: Option<String>,
    pub summary_temperature: f32,
    pub max_output_tokens: Option<u32>,
}

impl Default for SubAgentConfig {
    fn default() -> Self {
        Self {
            model: None,
            summary_temperature: 0.3,
            max_output_tokens: None,
        }
    }
}

/// One `[[tool_servers]]` entry (MCP over streamable HTTP).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServerConfig {
    pub id: String,
    pub url: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub requests_per_window: Option<usize>,
}

/// One `[[datasets]]` entry: a JSON array of objects exposed to `sql_query`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `MOSAIC_LOG` is unset.
    pub filter: Option<String>,
    /// Write logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

pub mod paths {
    //! Path resolution for mosaic configuration.
    //!
    //! `MOSAIC_HOME` resolution order:
    //! 1. `MOSAIC_HOME` environment variable (if set)
    //! 2. `~/.config/mosaic` (default)

    use std::path::PathBuf;

    pub fn mosaic_home() -> PathBuf {
        if let Ok(home) = std::env::var("MOSAIC_HOME")
            && !home.trim().is_empty()
        {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".config")
            .join("mosaic")
    }

    pub fn config_path() -> PathBuf {
        mosaic_home().join("config.toml")
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model used when no `[[instances]]` are configured
    pub model: String,
    /// Developer instructions sent with every request
    pub instructions: Option<String>,
    /// Parameters shared by every instance
    pub defaults: InstanceParams,
    pub instances: Vec<InstanceConfig>,
    pub provider: ProviderConfig,
    pub tools: ToolsConfig,
    pub sandbox: SandboxConfig,
    pub file_search: FileSearchConfig,
    pub sub_agent: SubAgentConfig,
    pub tool_servers: Vec<ToolServerConfig>,
    pub datasets: Vec<DatasetConfig>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: Self::DEFAULT_MODEL.to_string(),
            instructions: None,
            defaults: InstanceParams::default(),
            instances: Vec::new(),
            provider: ProviderConfig::default(),
            tools: ToolsConfig::default(),
            sandbox: SandboxConfig::default(),
            file_search: FileSearchConfig::default(),
            sub_agent: SubAgentConfig::default(),
            tool_servers: Vec::new(),
            datasets: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub const DEFAULT_MODEL: &'static str = "gpt-5-mini";

    /// Loads `$MOSAIC_HOME/config.toml`, or defaults when it does not exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?;
            config
                .validate()
                .with_context(|| format!("Invalid config in {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Checks values serde cannot: tool server ids must be non-empty,
    /// unique, and free of the `__` separator used in `mcp__{id}__{tool}`.
    ///
    /// # Errors
    /// Returns an error naming the first bad entry.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for server in &self.tool_servers {
            if server.id.is_empty() {
                anyhow::bail!("[[tool_servers]] entry for {} has no id", server.url);
            }
            if server.id.contains(SEPARATOR) {
                anyhow::bail!(
                    "tool server id '{}' must not contain '{SEPARATOR}'",
                    server.id
                );
            }
            if !ids.insert(server.id.as_str()) {
                anyhow::bail!("duplicate tool server id '{}'", server.id);
            }
        }
        Ok(())
    }

    /// Writes the default config to `path`. Refuses to overwrite.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents =
            toml::to_string_pretty(&Config::default()).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tools.timeout_secs > 0).then(|| Duration::from_secs(self.tools.timeout_secs))
    }

    /// Instances to run. `models` (from the CLI) replaces configured instances;
    /// with neither, a single instance of `model` runs.
    ///
    /// Ids are unique: repeated ids get a `#n` suffix.
    pub fn resolve_instances(&self, models: &[String]) -> Vec<ModelInstance> {
        let mut instances: Vec<ModelInstance> = if !models.is_empty() {
            models
                .iter()
                .map(|model| ModelInstance::new(model.clone(), model.clone()))
                .collect()
        } else if !self.instances.is_empty() {
            self.instances
                .iter()
                .map(|entry| {
                    let id = entry
                        .id
                        .clone()
                        .or_else(|| entry.label.clone())
                        .unwrap_or_else(|| entry.model.clone());
                    ModelInstance {
                        id,
                        model: entry.model.clone(),
                        label: entry.label.clone(),
                        params: entry.params.clone(),
                    }
                })
                .collect()
        } else {
            vec![ModelInstance::new(self.model.clone(), self.model.clone())]
        };

        let mut seen = HashSet::new();
        for instance in &mut instances {
            if !seen.insert(instance.id.clone()) {
                let mut n = 2;
                while seen.contains(&format!("{}#{n}", instance.id)) {
                    n += 1;
                }
                instance.id = format!("{}#{n}", instance.id);
                seen.insert(instance.id.clone());
            }
        }
        instances
    }
}
