//! Responses API transport: the seam between the orchestrator and the network.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

pub use super::responses_sse::{
    Annotation, FileSearchHit, OutputContent, OutputItem, ResponseEvent, ResponseSummary,
    ResponsesSseParser, WireUsage,
};
pub use super::responses_types::{
    InputContent, InputItem, ReasoningConfig, RequestBody, ToolManifestEntry,
};
use crate::config::ProviderConfig;
use crate::providers::shared::{
    USER_AGENT, classify_reqwest_error, resolve_api_key, resolve_base_url,
};
use crate::providers::{ProviderError, ProviderResult};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const RESPONSES_PATH: &str = "/responses";
const API_KEY_ENV_VARS: &[&str] = &["MOSAIC_API_KEY", "OPENAI_API_KEY"];
const BASE_URL_ENV_VAR: &str = "MOSAIC_BASE_URL";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Raw SSE bytes of one response.
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Opens a streaming Responses request and hands back the raw body.
///
/// Parsing stays with the caller so every transport goes through the same
/// [`ResponsesSseParser`].
pub trait ResponsesTransport: Send + Sync {
    fn open_stream<'a>(&'a self, body: &'a RequestBody) -> BoxFuture<'a, ProviderResult<ByteStream>>;
}

/// Connection settings for [`ResponsesClient`].
#[derive(Debug, Clone)]
pub struct ResponsesConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl ResponsesConfig {
    /// Builds transport settings from config plus environment.
    ///
    /// Authentication resolution order:
    /// 1. `[provider].api_key`
    /// 2. `MOSAIC_API_KEY`, then `OPENAI_API_KEY`
    ///
    /// A missing key is allowed only for local gateways (`allow_missing_key`).
    ///
    /// # Errors
    /// Returns an error for a malformed base URL or a missing key.
    pub fn from_provider(provider: &ProviderConfig) -> Result<Self> {
        let base_url = resolve_base_url(
            provider.base_url.as_deref(),
            BASE_URL_ENV_VAR,
            DEFAULT_BASE_URL,
            "Responses",
        )?;
        let api_key = match resolve_api_key(provider.api_key.as_deref(), API_KEY_ENV_VARS, "provider")
        {
            Ok(key) => Some(key),
            Err(_) if provider.allow_missing_key => None,
            Err(err) => return Err(err),
        };

        Ok(Self {
            base_url,
            api_key,
            headers: provider.headers.clone(),
        })
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}")).context("invalid api key")?,
            );
        }
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name: {name}"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header {name}"))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// reqwest-backed Responses client.
#[derive(Debug, Clone)]
pub struct ResponsesClient {
    http: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl ResponsesClient {
    /// # Errors
    /// Returns an error if headers are invalid or the HTTP client cannot be built.
    pub fn new(config: &ResponsesConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("build http client")?;
        Self::with_http(http, config)
    }

    /// Reuses an existing HTTP client (shared connection pool).
    ///
    /// # Errors
    /// Returns an error if headers are invalid.
    pub fn with_http(http: reqwest::Client, config: &ResponsesConfig) -> Result<Self> {
        Ok(Self {
            http,
            url: format!("{}{}", config.base_url, RESPONSES_PATH),
            headers: config.header_map()?,
        })
    }

    async fn send(&self, body: &RequestBody) -> ProviderResult<ByteStream> {
        debug!(url = %self.url, model = %body.model, "opening responses stream");
        let response = self
            .http
            .post(&self.url)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let err = ProviderError::http_status(status.as_u16(), &error_body);
            warn!(model = %body.model, error = %err, "responses request rejected");
            return Err(err);
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed())
    }
}

impl ResponsesTransport for ResponsesClient {
    fn open_stream<'a>(&'a self, body: &'a RequestBody) -> BoxFuture<'a, ProviderResult<ByteStream>> {
        self.send(body).boxed()
    }
}
