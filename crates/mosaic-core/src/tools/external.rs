//! External tool servers reached over MCP streamable HTTP.
//!
//! Tools are discovered once per registry build and exposed to the model as
//! `mcp__{server_id}__{tool}`. Each server gets its own rate-limit kind.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::{CallToolRequestParam, CallToolResult, RawContent, Tool};
use rmcp::service::RunningService;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::{RoleClient, ServiceExt};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{ToolCall, ToolContext, ToolDefinition, ToolReport};
use crate::config::ToolServerConfig;
use crate::core::artifacts::{Artifact, ArtifactKind};
use crate::core::events::ToolOutput;
use crate::providers::shared::USER_AGENT;

pub const EXTERNAL_PREFIX: &str = "mcp__";
pub const SEPARATOR: &str = "__";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub fn external_tool_name(server_id: &str, tool: &str) -> String {
    format!("{EXTERNAL_PREFIX}{server_id}{SEPARATOR}{tool}")
}

/// Splits `mcp__{server}__{tool}` into `(server, tool)`.
///
/// Server ids never contain the separator (config loading rejects them), so
/// the first separator ends the server id.
pub fn parse_external_tool_name(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix(EXTERNAL_PREFIX)?;
    let (server, tool) = rest.split_once(SEPARATOR)?;
    (!server.is_empty() && !tool.is_empty()).then_some((server, tool))
}

pub fn rate_limit_kind(server_id: &str) -> String {
    format!("mcp:{server_id}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct McpTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl From<Tool> for McpTool {
    fn from(tool: Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool.description.map(|d| d.to_string()),
            input_schema: Value::Object((*tool.input_schema).clone()),
        }
    }
}

struct ExternalServer {
    id: String,
    service: RunningService<RoleClient, ()>,
    tools: Vec<McpTool>,
}

impl fmt::Debug for ExternalServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalServer")
            .field("id", &self.id)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

/// Discovered tool servers and their namespaced definitions.
#[derive(Debug, Default)]
pub struct ExternalTools {
    servers: Vec<ExternalServer>,
    definitions: Vec<ToolDefinition>,
}

impl ExternalTools {
    /// Connects to every configured server. Servers that fail are logged
    /// and left out.
    pub async fn discover(configs: &[ToolServerConfig]) -> Self {
        let mut external = Self::default();
        for config in configs {
            match connect(config).await {
                Ok(server) => {
                    info!(server = %server.id, tools = server.tools.len(), "tool server connected");
                    external.add(server);
                }
                Err(err) => warn!(server = %config.id, error = %format!("{err:#}"), "tool server unavailable"),
            }
        }
        external
    }

    fn add(&mut self, server: ExternalServer) {
        self.definitions.extend(server.tools.iter().map(|tool| ToolDefinition {
            name: external_tool_name(&server.id, &tool.name),
            description: format!(
                "[{}] {}",
                server.id,
                tool.description.as_deref().unwrap_or(&tool.name)
            ),
            parameters: tool.input_schema.clone(),
        }));
        self.servers.push(server);
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// True if `name` names a tool on a discovered server.
    pub fn resolves(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    fn find(&self, name: &str) -> Option<(&ExternalServer, &McpTool)> {
        let (server_id, tool_name) = parse_external_tool_name(name)?;
        let server = self.servers.iter().find(|s| s.id == server_id)?;
        let tool = server.tools.iter().find(|t| t.name == tool_name)?;
        Some((server, tool))
    }

    pub async fn execute(&self, call: ToolCall, ctx: ToolContext) -> ToolReport {
        let Some((server, tool)) = self.find(&call.name) else {
            return ToolReport::failure(
                "tool_not_supported",
                format!("Tool not supported: {}", call.name),
                None,
            );
        };

        let kind = rate_limit_kind(&server.id);
        if !ctx.services.rate_limits.acquire(&kind, &ctx.cancel).await {
            return ToolOutput::canceled("External tool canceled").into();
        }

        let request = CallToolRequestParam {
            name: tool.name.clone().into(),
            arguments: Some(call.arguments),
        };
        let result = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return ToolOutput::canceled("External tool canceled").into(),
            result = server.service.call_tool(request) => result,
        };
        match result {
            Ok(result) => report_from_result(&server.id, &tool.name, result),
            Err(err) => ToolReport::failure(
                "external_tool_error",
                format!("{} on {} failed", tool.name, server.id),
                Some(err.to_string()),
            ),
        }
    }
}

fn http_client(config: &ToolServerConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header {name}"))?;
        headers.insert(name, value);
    }
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .default_headers(headers)
        .build()
        .context("build tool server HTTP client")
}

async fn connect(config: &ToolServerConfig) -> Result<ExternalServer> {
    let transport = StreamableHttpClientTransport::with_client(
        http_client(config)?,
        StreamableHttpClientTransportConfig::with_uri(config.url.clone()),
    );
    let service = tokio::time::timeout(CONNECT_TIMEOUT, ().serve(transport))
        .await
        .with_context(|| format!("handshake with {} timed out", config.id))?
        .with_context(|| format!("initialize {}", config.id))?;
    let tools = service
        .list_all_tools()
        .await
        .with_context(|| format!("list tools on {}", config.id))?;
    Ok(ExternalServer {
        id: config.id.clone(),
        service,
        tools: tools.into_iter().map(McpTool::from).collect(),
    })
}

fn report_from_result(server_id: &str, tool: &str, result: CallToolResult) -> ToolReport {
    let mut texts = Vec::new();
    let mut artifacts = Vec::new();
    for block in result.content {
        match block.raw {
            RawContent::Text(text) => texts.push(text.text),
            RawContent::Image(image) => artifacts.push(
                Artifact::new(ArtifactKind::Image, json!({"b64": image.data}))
                    .titled(format!("{server_id}: {tool}"))
                    .mime(image.mime_type),
            ),
            _ => {}
        }
    }
    let text = texts.join("\n");

    if result.is_error.unwrap_or(false) {
        return ToolReport::failure(
            "external_tool_error",
            format!("{tool} on {server_id} reported an error"),
            (!text.is_empty()).then_some(text),
        );
    }

    let mut data = json!({"server": server_id, "tool": tool, "content": text});
    if let Some(structured) = result.structured_content {
        data["structured"] = structured;
    }
    let mut report = ToolReport::new(ToolOutput::success(data));
    report.artifacts = artifacts;
    report
}
