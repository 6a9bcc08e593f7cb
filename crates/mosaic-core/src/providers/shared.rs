//! Provider-agnostic types shared across the Responses transport.

use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard User-Agent header for mosaic API requests.
pub const USER_AGENT: &str = concat!("mosaic/", env!("CARGO_PKG_VERSION"));

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Picks the API key from config first, then the first non-empty env var.
///
/// # Errors
/// Returns an error when neither config nor any env var provides a key.
pub fn resolve_api_key(
    config_api_key: Option<&str>,
    env_vars: &[&str],
    config_section: &str,
) -> Result<String> {
    config_api_key
        .and_then(non_empty)
        .map(str::to_string)
        .or_else(|| {
            env_vars.iter().find_map(|var| {
                std::env::var(var)
                    .ok()
                    .and_then(|value| non_empty(&value).map(str::to_string))
            })
        })
        .with_context(|| {
            format!(
                "No API key available. Set {} or api_key in [{config_section}].",
                env_vars.join(" or ")
            )
        })
}

/// Picks the base URL from the env var, then config, then `default_url`.
/// Trailing slashes are dropped.
///
/// # Errors
/// Returns an error if the chosen URL does not parse.
pub fn resolve_base_url(
    config_base_url: Option<&str>,
    env_var: &str,
    default_url: &str,
    provider_name: &str,
) -> Result<String> {
    let from_env = std::env::var(env_var).ok();
    let chosen = from_env
        .as_deref()
        .and_then(non_empty)
        .or_else(|| config_base_url.and_then(non_empty));
    let Some(url) = chosen else {
        return Ok(default_url.to_string());
    };
    url::Url::parse(url).with_context(|| format!("Invalid {provider_name} base URL: {url}"))?;
    Ok(url.trim_end_matches('/').to_string())
}

/// Transport failure categories. Channel errors surface these as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Non-2xx response
    HttpStatus,
    /// Connect failure or request timeout
    Timeout,
    /// Broken SSE framing or body
    Parse,
    /// `error` / `response.failed` event mid-stream
    ApiError,
}

impl ProviderErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HttpStatus => "http_status",
            Self::Timeout => "timeout",
            Self::Parse => "parse",
            Self::ApiError => "api_error",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// One line, shown to users.
    pub message: String,
    /// Raw error body, when there was one.
    pub details: Option<String>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Creates an HTTP status error, pulling `error.message` out of JSON bodies.
    pub fn http_status(status: u16, body: &str) -> Self {
        if body.is_empty() {
            return Self::new(ProviderErrorKind::HttpStatus, format!("HTTP {status}"));
        }
        if let Ok(json) = serde_json::from_str::<Value>(body)
            && let Some(msg) = json
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
        {
            return Self {
                kind: ProviderErrorKind::HttpStatus,
                message: format!("HTTP {status}: {msg}"),
                details: Some(body.to_string()),
            };
        }
        Self {
            kind: ProviderErrorKind::HttpStatus,
            message: format!("HTTP {status}"),
            details: Some(body.to_string()),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Parse, message)
    }

    /// Creates an API error (from a mid-stream error event).
    pub fn api_error(error_type: &str, message: &str) -> Self {
        let message = if error_type.is_empty() {
            message.to_string()
        } else {
            format!("{error_type}: {message}")
        };
        Self::new(ProviderErrorKind::ApiError, message)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ProviderError {}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Classifies a reqwest failure into a provider error kind.
pub fn classify_reqwest_error(e: &reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::timeout(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ProviderError::timeout(format!("Connection failed: {e}"))
    } else if e.is_request() {
        ProviderError::new(ProviderErrorKind::HttpStatus, format!("Request error: {e}"))
    } else if e.is_body() || e.is_decode() {
        ProviderError::parse(format!("Response body error: {e}"))
    } else {
        ProviderError::new(ProviderErrorKind::HttpStatus, format!("Network error: {e}"))
    }
}

/// Token usage and cost for one or more model calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Input tokens served from the provider's prompt cache
    pub cached_tokens: u64,
    /// Output tokens spent on reasoning
    pub reasoning_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl UsageStats {
    /// Adds another usage record into this one. Cost stays `None` only when
    /// neither side reported it.
    pub fn accumulate(&mut self, other: &UsageStats) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_tokens += other.cached_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
        self.total_tokens += other.total_tokens;
        self.cost = match (self.cost, other.cost) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
        };
    }

    /// Sums an optional accumulator with a new record.
    pub fn merge(acc: Option<UsageStats>, next: &UsageStats) -> UsageStats {
        let mut total = acc.unwrap_or_default();
        total.accumulate(next);
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_extracts_json_message() {
        let err = ProviderError::http_status(
            429,
            r#"{"error":{"message":"Rate limit reached","type":"rate_limit"}}"#,
        );
        assert_eq!(err.kind, ProviderErrorKind::HttpStatus);
        assert_eq!(err.message, "HTTP 429: Rate limit reached");
        assert!(err.details.is_some());
    }

    #[test]
    fn test_http_status_plain_body_kept_as_details() {
        let err = ProviderError::http_status(502, "bad gateway");
        assert_eq!(err.message, "HTTP 502");
        assert_eq!(err.details.as_deref(), Some("bad gateway"));
    }

    #[test]
    fn test_usage_accumulate_sums_tokens_and_cost() {
        let mut total = UsageStats {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            ..Default::default()
        };
        total.accumulate(&UsageStats {
            input_tokens: 20,
            output_tokens: 7,
            cached_tokens: 4,
            reasoning_tokens: 2,
            total_tokens: 27,
            cost: Some(0.25),
        });

        assert_eq!(total.input_tokens, 30);
        assert_eq!(total.output_tokens, 12);
        assert_eq!(total.cached_tokens, 4);
        assert_eq!(total.reasoning_tokens, 2);
        assert_eq!(total.total_tokens, 42);
        assert_eq!(total.cost, Some(0.25));
    }

    #[test]
    fn test_usage_cost_stays_none_without_reports() {
        let total = UsageStats::merge(None, &UsageStats::default());
        assert_eq!(total.cost, None);
    }

    #[test]
    fn test_resolve_api_key_prefers_config() {
        let key = resolve_api_key(Some("  sk-config  "), &["MOSAIC_TEST_UNSET_KEY"], "provider")
            .unwrap();
        assert_eq!(key, "sk-config");
    }

    #[test]
    fn test_resolve_api_key_missing_names_env_vars() {
        let err = resolve_api_key(None, &["MOSAIC_TEST_UNSET_A", "MOSAIC_TEST_UNSET_B"], "provider")
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("MOSAIC_TEST_UNSET_A or MOSAIC_TEST_UNSET_B"));
        assert!(msg.contains("[provider]"));
    }

    #[test]
    fn test_resolve_base_url_rejects_malformed_config() {
        let err = resolve_base_url(
            Some("not a url"),
            "MOSAIC_TEST_UNSET_BASE_URL",
            "https://api.openai.com/v1",
            "Responses",
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_resolve_base_url_trims_trailing_slash() {
        let url = resolve_base_url(
            Some("http://localhost:8080/v1/"),
            "MOSAIC_TEST_UNSET_BASE_URL",
            "https://api.openai.com/v1",
            "Responses",
        )
        .unwrap();
        assert_eq!(url, "http://localhost:8080/v1");
    }
}
