//! Client-side tools the models can call.
//!
//! The registry maps tool names to executors and owns the dispatch rules:
//! built-in handlers first, then `mcp__{server}__{tool}` names resolved
//! against discovered tool servers, then a structured `tool_not_supported`.

pub mod chart;
pub mod delegate;
pub mod display;
pub mod execute_code;
pub mod external;
pub mod file_search;
pub mod html;
pub mod rate_limit;
pub mod sql_query;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{Config, SubAgentConfig};
use crate::core::artifacts::{Artifact, Citation};
use crate::core::events::ToolOutput;
use crate::providers::UsageStats;
use crate::providers::openai::responses::{ResponsesConfig, ResponsesTransport, ToolManifestEntry};
use crate::providers::shared::USER_AGENT;
use execute_code::SandboxRuntime;
use external::ExternalTools;
use file_search::FileSearchSettings;
use rate_limit::RateLimiters;
use sql_query::Dataset;

/// Function tool definition offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

/// A complete tool call ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Id the result is reported under (`call_id` on the wire).
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// What an executor hands back before the registry tags and flattens it.
#[derive(Debug, Clone)]
pub struct ToolReport {
    pub output: ToolOutput,
    pub artifacts: Vec<Artifact>,
    pub citations: Vec<Citation>,
    pub usage: Option<UsageStats>,
}

impl ToolReport {
    pub fn new(output: ToolOutput) -> Self {
        Self {
            output,
            artifacts: Vec::new(),
            citations: Vec::new(),
            usage: None,
        }
    }

    pub fn failure(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self::new(ToolOutput::failure(code, message, details))
    }

    #[must_use]
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    #[must_use]
    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations.extend(citations);
        self
    }

    #[must_use]
    pub fn with_usage(mut self, usage: Option<UsageStats>) -> Self {
        self.usage = usage;
        self
    }
}

impl From<ToolOutput> for ToolReport {
    fn from(output: ToolOutput) -> Self {
        Self::new(output)
    }
}

/// Result of one tool call as the loop records it.
#[derive(Debug, Clone, Serialize)]
pub struct ToolExecutionResult {
    pub success: bool,
    /// JSON envelope sent back to the model.
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub citations: Vec<Citation>,
    pub artifacts: Vec<Artifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
}

impl ToolExecutionResult {
    pub(crate) fn from_report(report: ToolReport, call_id: &str) -> Self {
        let artifacts = report
            .artifacts
            .into_iter()
            .map(|mut artifact| {
                artifact
                    .tool_call_id
                    .get_or_insert_with(|| call_id.to_string());
                artifact
            })
            .collect();
        Self {
            success: report.output.is_ok(),
            output: report.output.to_json_string(),
            error: report.output.error_summary(),
            citations: report.citations,
            artifacts,
            usage: report.usage,
        }
    }
}

/// Shared services injected into every executor.
pub struct ToolServices {
    pub http: reqwest::Client,
    pub rate_limits: RateLimiters,
    pub sandbox: SandboxRuntime,
    pub file_search: FileSearchSettings,
    pub sub_agent: SubAgentConfig,
    /// Model transport for `delegate_task`.
    pub transport: Option<Arc<dyn ResponsesTransport>>,
    pub datasets: Vec<Dataset>,
}

impl std::fmt::Debug for ToolServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServices")
            .field("sandbox", &self.sandbox)
            .field("file_search", &self.file_search)
            .field("sub_agent", &self.sub_agent)
            .field("has_transport", &self.transport.is_some())
            .field("datasets", &self.datasets.len())
            .finish_non_exhaustive()
    }
}

impl Default for ToolServices {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
            rate_limits: RateLimiters::new(),
            sandbox: SandboxRuntime::default(),
            file_search: FileSearchSettings::default(),
            sub_agent: SubAgentConfig::default(),
            transport: None,
            datasets: Vec::new(),
        }
    }
}

impl ToolServices {
    /// Builds services from config. Datasets are loaded eagerly.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built or a dataset
    /// file cannot be read.
    pub fn from_config(
        config: &Config,
        responses: &ResponsesConfig,
        transport: Arc<dyn ResponsesTransport>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        let rate_limits = RateLimiters::new();
        rate_limits.configure(
            file_search::RATE_LIMIT_KIND,
            config.file_search.requests_per_window,
            Duration::from_secs(config.file_search.window_secs),
        );
        for server in &config.tool_servers {
            if let Some(budget) = server.requests_per_window {
                rate_limits.configure(
                    &external::rate_limit_kind(&server.id),
                    budget,
                    rate_limit::DEFAULT_WINDOW,
                );
            }
        }

        let datasets = config
            .datasets
            .iter()
            .map(Dataset::load)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            http,
            rate_limits,
            sandbox: SandboxRuntime::from_config(&config.sandbox),
            file_search: FileSearchSettings::from_config(&config.file_search, responses),
            sub_agent: config.sub_agent.clone(),
            transport: Some(transport),
            datasets,
        })
    }
}

/// Per-call execution context.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub services: Arc<ToolServices>,
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
    pub instance_id: String,
    pub model: String,
    pub round: usize,
}

impl ToolContext {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self {
            services,
            cancel: CancellationToken::new(),
            timeout: None,
            instance_id: String::new(),
            model: String::new(),
            round: 0,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Context for one round of one instance, cancelled with `parent`.
    #[must_use]
    pub fn for_round(
        &self,
        instance_id: &str,
        model: &str,
        round: usize,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            services: Arc::clone(&self.services),
            cancel: parent.child_token(),
            timeout: self.timeout,
            instance_id: instance_id.to_string(),
            model: model.to_string(),
            round,
        }
    }
}

/// Async tool handler function.
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolReport> + Send>>;
pub type ToolHandler = Arc<dyn Fn(ToolCall, ToolContext) -> ToolFuture + Send + Sync>;

/// Wraps an `async fn(ToolCall, ToolContext) -> ToolReport` as a handler.
pub fn handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(ToolCall, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolReport> + Send + 'static,
{
    Arc::new(move |call, ctx| Box::pin(f(call, ctx)))
}

/// Tool registry (definitions + executors).
#[derive(Clone, Default)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    handlers: HashMap<String, ToolHandler>,
    external: Option<Arc<ExternalTools>>,
    native_file_search: Option<ToolManifestEntry>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("definitions", &self.definitions)
            .field("handlers_len", &self.handlers.len())
            .field("external", &self.external)
            .field("native_file_search", &self.native_file_search)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtins() -> Self {
        let mut registry = Self::new();
        registry.register(execute_code::definition(), handler(execute_code::execute));
        registry.register(sql_query::definition(), handler(sql_query::execute));
        registry.register(file_search::definition(), handler(file_search::execute));
        registry.register(delegate::definition(), handler(delegate::execute));
        registry.register(display::definition(), handler(display::execute));
        registry.register(chart::definition(), handler(chart::execute));
        registry.register(html::definition(), handler(html::execute));
        registry
    }

    /// Builtins narrowed by `[tools]`, with the native file search swap.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::builtins();
        if let Some(enabled) = &config.tools.enabled {
            registry.retain(enabled);
        }
        if config.tools.native_file_search && !config.file_search.vector_store_ids.is_empty() {
            registry.use_native_file_search(
                config.file_search.vector_store_ids.clone(),
                Some(config.file_search.max_results),
            );
        }
        registry
    }

    #[must_use]
    pub fn with_tool(mut self, definition: ToolDefinition, handler: ToolHandler) -> Self {
        self.register(definition, handler);
        self
    }

    #[must_use]
    pub fn with_external(mut self, external: Arc<ExternalTools>) -> Self {
        self.external = Some(external);
        self
    }

    pub fn register(&mut self, definition: ToolDefinition, handler: ToolHandler) {
        let name = definition.name.to_ascii_lowercase();
        self.definitions
            .retain(|t| !t.name.eq_ignore_ascii_case(&definition.name));
        self.definitions.push(definition);
        self.handlers.insert(name, handler);
    }

    /// Keeps only the named built-in tools.
    pub fn retain(&mut self, names: &[String]) {
        let keep = |name: &str| names.iter().any(|n| n.trim().eq_ignore_ascii_case(name));
        self.definitions.retain(|t| keep(&t.name));
        self.handlers.retain(|name, _| keep(name));
    }

    /// Replaces the client-side `file_search` function with the provider's
    /// native file search over `vector_store_ids`.
    pub fn use_native_file_search(&mut self, vector_store_ids: Vec<String>, max_results: Option<u32>) {
        self.definitions
            .retain(|t| t.name != file_search::TOOL_NAME);
        self.handlers.remove(file_search::TOOL_NAME);
        self.native_file_search = Some(ToolManifestEntry::FileSearch {
            vector_store_ids,
            max_num_results: max_results,
        });
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.definitions.iter().map(|t| t.name.clone()).collect()
    }

    /// Manifest entries for the request: built-ins, native file search,
    /// then discovered external tools.
    pub fn manifest(&self) -> Vec<ToolManifestEntry> {
        let mut manifest: Vec<ToolManifestEntry> =
            self.definitions.iter().map(ToolManifestEntry::from).collect();
        if let Some(native) = &self.native_file_search {
            manifest.push(native.clone());
        }
        if let Some(external) = &self.external {
            manifest.extend(external.definitions().iter().map(ToolManifestEntry::from));
        }
        manifest
    }

    /// Executes one call. Never fails: every problem becomes a failed result.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolExecutionResult {
        let report = self.dispatch(call, ctx).await;
        if let Some(error) = report.output.error_summary() {
            warn!(
                instance = %ctx.instance_id,
                round = ctx.round,
                tool = %call.name,
                error = %error,
                "tool call failed"
            );
        }
        ToolExecutionResult::from_report(report, &call.id)
    }

    async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> ToolReport {
        let future: ToolFuture = if let Some(handler) = self.handlers.get(&call.name.to_ascii_lowercase()) {
            handler(call.clone(), ctx.clone())
        } else if let Some(external) = self
            .external
            .as_ref()
            .filter(|external| external.resolves(&call.name))
        {
            let external = Arc::clone(external);
            let call = call.clone();
            let ctx = ctx.clone();
            Box::pin(async move { external.execute(call, ctx).await })
        } else {
            return not_supported(&call.name, &self.tool_names());
        };
        run_guarded(future, ctx.timeout, &ctx.cancel).await
    }
}

/// Runs a handler on its own task with timeout, cancellation, and panic
/// isolation.
async fn run_guarded(
    future: ToolFuture,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> ToolReport {
    let handle = tokio::spawn(future);
    let abort = handle.abort_handle();
    let joined = async move {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, handle).await.ok(),
            None => Some(handle.await),
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            abort.abort();
            ToolOutput::canceled("Tool execution canceled").into()
        }
        joined = joined => match joined {
            Some(Ok(report)) => report,
            Some(Err(_)) => ToolReport::failure(
                "panic",
                "Tool execution panicked",
                Some("The tool task panicked or was aborted".to_string()),
            ),
            None => {
                abort.abort();
                let secs = timeout.map_or(0, |t| t.as_secs());
                ToolReport::failure(
                    "timeout",
                    format!("Tool execution timed out after {secs} seconds"),
                    None,
                )
            }
        },
    }
}

fn not_supported(name: &str, available: &[String]) -> ToolReport {
    ToolReport::new(ToolOutput::failure_with_details(
        "tool_not_supported",
        format!("Tool not supported: {name}"),
        format!("Available tools: {}", available.join(", ")),
    ))
}

/// Guards an executor against being dispatched under the wrong name.
pub(crate) fn check_name(call: &ToolCall, expected: &str) -> Result<(), ToolReport> {
    if call.name.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ToolReport::failure(
            "tool_name_mismatch",
            format!("Executor for '{expected}' received call for '{}'", call.name),
            None,
        ))
    }
}

/// Decodes call arguments into an executor's input type.
pub(crate) fn parse_input<T: DeserializeOwned>(call: &ToolCall) -> Result<T, ToolReport> {
    serde_json::from_value(Value::Object(call.arguments.clone())).map_err(|e| {
        ToolReport::failure(
            "invalid_input",
            format!("Invalid input for {} tool", call.name),
            Some(format!("Parse error: {e}")),
        )
    })
}

#[cfg(test)]
pub(crate) fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        },
    }
}
