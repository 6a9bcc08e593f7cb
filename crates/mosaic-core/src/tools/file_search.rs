//! Knowledge-base search over vector stores.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{ToolCall, ToolContext, ToolDefinition, ToolReport, check_name, parse_input};
use crate::config::FileSearchConfig;
use crate::core::artifacts::{Artifact, ArtifactKind, Citation};
use crate::core::events::ToolOutput;
use crate::providers::openai::responses::ResponsesConfig;

pub const TOOL_NAME: &str = "file_search";
/// Limiter key shared by every file search call.
pub const RATE_LIMIT_KIND: &str = "file_search";
const MAX_RESULTS_CAP: u32 = 50;

/// Where and how to search.
#[derive(Debug, Clone, Default)]
pub struct FileSearchSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub vector_store_ids: Vec<String>,
    pub max_results: u32,
}

impl FileSearchSettings {
    /// Defaults to the Responses endpoint and key unless `[file_search]`
    /// names its own base URL.
    pub fn from_config(config: &FileSearchConfig, responses: &ResponsesConfig) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(&responses.base_url)
            .trim_end_matches('/')
            .to_string();
        Self {
            base_url,
            api_key: responses.api_key.clone(),
            vector_store_ids: config.vector_store_ids.clone(),
            max_results: config.max_results,
        }
    }
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_string(),
        description: "Search the knowledge base for passages relevant to a query. Returns \
            ranked excerpts with their source files."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Natural language search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum passages to return",
                    "minimum": 1,
                    "maximum": MAX_RESULTS_CAP
                }
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    }
}

#[derive(Debug, Deserialize)]
struct FileSearchInput {
    query: String,
    #[serde(default)]
    max_results: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_num_results: u32,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    file_id: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    content: Vec<SearchContent>,
}

#[derive(Debug, Deserialize)]
struct SearchContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize)]
struct Passage {
    file_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    score: f64,
    text: String,
}

pub async fn execute(call: ToolCall, ctx: ToolContext) -> ToolReport {
    if let Err(report) = check_name(&call, TOOL_NAME) {
        return report;
    }
    let input: FileSearchInput = match parse_input(&call) {
        Ok(input) => input,
        Err(report) => return report,
    };
    let query = input.query.trim();
    if query.is_empty() {
        return ToolReport::failure("invalid_input", "query cannot be empty", None);
    }

    let settings = &ctx.services.file_search;
    if settings.vector_store_ids.is_empty() {
        return ToolReport::failure(
            "not_configured",
            "No vector stores are configured for file search",
            Some("Set [file_search].vector_store_ids".to_string()),
        );
    }
    let limit = input
        .max_results
        .unwrap_or(settings.max_results)
        .clamp(1, MAX_RESULTS_CAP);

    let mut passages = Vec::new();
    for store_id in &settings.vector_store_ids {
        if !ctx
            .services
            .rate_limits
            .acquire(RATE_LIMIT_KIND, &ctx.cancel)
            .await
        {
            return ToolOutput::canceled("File search canceled").into();
        }
        match search_store(&ctx, settings, store_id, query, limit).await {
            Ok(hits) => passages.extend(hits),
            Err(report) => return report,
        }
    }
    passages.sort_by(|a, b| b.score.total_cmp(&a.score));
    passages.truncate(limit as usize);
    debug!(query = %query, passages = passages.len(), "file search finished");

    let citations: Vec<Citation> = passages
        .iter()
        .map(|p| {
            let mut citation = Citation::file(p.file_id.clone(), p.filename.clone());
            citation.snippet = Some(p.text.clone());
            citation.score = Some(p.score);
            citation
        })
        .collect();
    let artifact = Artifact::new(
        ArtifactKind::FileSearch,
        json!({"queries": [query], "results": passages}),
    )
    .titled(format!("Search: {query}"));

    ToolReport::new(ToolOutput::success(json!({
        "query": query,
        "results": passages,
    })))
    .with_artifact(artifact)
    .with_citations(citations)
}

async fn search_store(
    ctx: &ToolContext,
    settings: &FileSearchSettings,
    store_id: &str,
    query: &str,
    limit: u32,
) -> Result<Vec<Passage>, ToolReport> {
    let url = format!("{}/vector_stores/{store_id}/search", settings.base_url);
    let mut request = ctx.services.http.post(&url).json(&SearchRequest {
        query,
        max_num_results: limit,
    });
    if let Some(key) = &settings.api_key {
        request = request.bearer_auth(key);
    }

    let sent = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => {
            return Err(ToolOutput::canceled("File search canceled").into());
        }
        sent = request.send() => sent,
    };
    let response = sent.map_err(|e| {
        ToolReport::failure("fetch_error", "Vector store search failed", Some(e.to_string()))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ToolReport::failure(
            "http_error",
            format!("Vector store {store_id} returned HTTP {}", status.as_u16()),
            (!body.is_empty()).then_some(body),
        ));
    }

    let page: SearchPage = response.json().await.map_err(|e| {
        ToolReport::failure("parse_error", "Unexpected vector store response", Some(e.to_string()))
    })?;
    Ok(page
        .data
        .into_iter()
        .map(|hit| Passage {
            file_id: hit.file_id,
            filename: hit.filename,
            score: hit.score,
            text: hit
                .content
                .into_iter()
                .map(|c| c.text)
                .collect::<Vec<_>>()
                .join("\n"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::core::artifacts::CitationKind;
    use crate::tools::{ToolServices, call};

    fn ctx(server: &MockServer, stores: &[&str]) -> ToolContext {
        let services = ToolServices {
            file_search: FileSearchSettings {
                base_url: server.uri(),
                api_key: Some("sk-test".to_string()),
                vector_store_ids: stores.iter().map(ToString::to_string).collect(),
                max_results: 3,
            },
            ..ToolServices::default()
        };
        ToolContext::new(Arc::new(services))
    }

    fn hit(file_id: &str, score: f64, text: &str) -> serde_json::Value {
        json!({
            "file_id": file_id,
            "filename": format!("{file_id}.pdf"),
            "score": score,
            "content": [{"type": "text", "text": text}]
        })
    }

    #[tokio::test]
    async fn test_search_merges_stores_by_score() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/vector_stores/vs_a/search"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"query": "q3 revenue", "max_num_results": 3})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "vector_store.search_results.page",
                "data": [hit("file_a", 0.4, "Q3 flat")]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/vector_stores/vs_b/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [hit("file_b", 0.9, "Q3 revenue grew 12%")]
            })))
            .mount(&server)
            .await;

        let report = execute(
            call("c1", TOOL_NAME, json!({"query": "q3 revenue"})),
            ctx(&server, &["vs_a", "vs_b"]),
        )
        .await;

        let data = report.output.data().unwrap();
        assert_eq!(data["results"][0]["file_id"], json!("file_b"));
        assert_eq!(data["results"][1]["file_id"], json!("file_a"));
        assert_eq!(report.citations.len(), 2);
        assert_eq!(report.citations[0].kind, CitationKind::File);
        assert_eq!(report.citations[0].snippet.as_deref(), Some("Q3 revenue grew 12%"));
        assert_eq!(report.artifacts[0].kind, ArtifactKind::FileSearch);
        assert_eq!(report.artifacts[0].data["queries"], json!(["q3 revenue"]));
    }

    #[tokio::test]
    async fn test_http_error_is_failed_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/vector_stores/vs_a/search"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such store"))
            .mount(&server)
            .await;

        let report = execute(
            call("c1", TOOL_NAME, json!({"query": "x"})),
            ctx(&server, &["vs_a"]),
        )
        .await;

        let (code, message, details) = report.output.error_info().unwrap();
        assert_eq!(code, "http_error");
        assert!(message.contains("404"));
        assert_eq!(details, Some("no such store"));
    }

    #[tokio::test]
    async fn test_requires_vector_stores() {
        let server = MockServer::start().await;
        let report = execute(call("c1", TOOL_NAME, json!({"query": "x"})), ctx(&server, &[])).await;
        assert_eq!(report.output.error_info().unwrap().0, "not_configured");
    }

    #[test]
    fn test_settings_fall_back_to_responses_endpoint() {
        let responses = ResponsesConfig {
            base_url: "https://gateway.test/v1".to_string(),
            api_key: Some("sk".to_string()),
            headers: std::collections::BTreeMap::new(),
        };
        let settings = FileSearchSettings::from_config(&FileSearchConfig::default(), &responses);
        assert_eq!(settings.base_url, "https://gateway.test/v1");

        let own = FileSearchConfig {
            base_url: Some("http://kb.local/".to_string()),
            ..FileSearchConfig::default()
        };
        assert_eq!(
            FileSearchSettings::from_config(&own, &responses).base_url,
            "http://kb.local"
        );
    }
}
