//! Domain types for the fetch gateway.
//!
//! Request and response shapes, configuration, and the structured error type
//! shared by every stage of the pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of a scrape request.
///
/// Both fields default to empty so a missing key behaves like an empty value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default)]
    pub url: String,

    /// CSS selector. Empty means "use the default tag scan".
    #[serde(default)]
    pub selector: String,
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            selector: String::new(),
        }
    }

    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = selector.into();
        self
    }
}

/// One labeled text fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedField {
    /// `Item N` for selector matches, `Text N` for the default scan.
    pub field: String,
    pub value: String,
}

/// Successful scrape result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeOutput {
    pub data: Vec<ExtractedField>,

    /// First 500 characters of the serialized document followed by `...`.
    pub html_preview: String,

    /// Number of entries in `data`.
    pub count: usize,
}

/// Answer to a pre-flight URL check. Denials are normal outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub allowed: bool,
    pub message: String,
}

impl CheckOutcome {
    pub fn allowed(message: impl Into<String>) -> Self {
        Self {
            allowed: true,
            message: message.into(),
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: message.into(),
        }
    }
}

/// Gateway configuration.
///
/// Maps to `[webfetch]` in config.toml. Every field is optional; defaults are
/// applied once by `ResolvedConfig`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WebFetchConfig {
    /// User-Agent sent on every outbound request.
    pub user_agent: Option<String>,

    /// Total page fetch timeout in seconds, redirects included. Default: 10.
    pub timeout_seconds: Option<u32>,

    /// robots.txt probe timeout in seconds. Default: 5.
    pub robots_timeout_seconds: Option<u32>,

    /// DNS resolution timeout in seconds. Default: 5.
    pub dns_timeout_seconds: Option<u32>,

    /// Maximum redirects to follow. Default: 10.
    pub max_redirects: Option<u32>,

    /// Maximum response body size in bytes. Default: 10 MiB.
    pub max_download_bytes: Option<u64>,

    pub rate_limit: Option<RateLimitConfig>,

    pub security: Option<SecurityConfig>,

    pub robots: Option<RobotsConfig>,
}

impl WebFetchConfig {
    pub const DEFAULT_TIMEOUT_SECONDS: u32 = 10;

    pub const DEFAULT_ROBOTS_TIMEOUT_SECONDS: u32 = 5;

    pub const DEFAULT_DNS_TIMEOUT_SECONDS: u32 = 5;

    pub const DEFAULT_MAX_REDIRECTS: u32 = 10;

    /// Default max download bytes (10 MiB).
    pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 10 * 1024 * 1024;

    #[must_use]
    pub fn timeout_seconds(&self) -> u32 {
        self.timeout_seconds
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECONDS)
    }

    #[must_use]
    pub fn robots_timeout_seconds(&self) -> u32 {
        self.robots_timeout_seconds
            .unwrap_or(Self::DEFAULT_ROBOTS_TIMEOUT_SECONDS)
    }

    #[must_use]
    pub fn dns_timeout_seconds(&self) -> u32 {
        self.dns_timeout_seconds
            .unwrap_or(Self::DEFAULT_DNS_TIMEOUT_SECONDS)
    }

    #[must_use]
    pub fn max_redirects(&self) -> u32 {
        self.max_redirects.unwrap_or(Self::DEFAULT_MAX_REDIRECTS)
    }

    #[must_use]
    pub fn max_download_bytes(&self) -> u64 {
        self.max_download_bytes
            .unwrap_or(Self::DEFAULT_MAX_DOWNLOAD_BYTES)
    }
}

/// Per-client cooldown configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RateLimitConfig {
    /// Minimum seconds between two admitted scrapes from one client. Default: 2.
    pub cooldown_seconds: Option<u32>,

    /// How often stale entries are swept from the table. Default: 60.
    pub sweep_interval_seconds: Option<u32>,
}

impl RateLimitConfig {
    pub const DEFAULT_COOLDOWN_SECONDS: u32 = 2;

    pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u32 = 60;
}

/// Security-specific configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    /// Additional blocked CIDR ranges, classified as reserved.
    pub blocked_cidrs: Option<Vec<String>>,

    /// Accept loopback addresses after DNS resolution (local testing only).
    ///
    /// Requires `PLAYGROUND_ALLOW_INSECURE_OVERRIDES=1` as well. Literal
    /// loopback hostnames and private-network ranges stay blocked.
    #[serde(default)]
    pub allow_insecure_overrides: bool,
}

/// robots.txt-specific configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RobotsConfig {
    /// Also refuse scrapes of sites whose robots.txt disallows all bots.
    #[serde(default)]
    pub enforce_on_scrape: bool,
}

/// Gateway error with structured details.
///
/// - `code`: Stable error code
/// - `message`: Human-readable description
/// - `retryability`: Whether retry may succeed
/// - `details`: Optional error-specific context
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct WebFetchError {
    pub code: ErrorCode,

    pub message: String,

    pub retryability: Retryability,

    pub details: ErrorDetails,
}

impl WebFetchError {
    pub fn new(code: ErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryability: Retryability::from_bool(retryable),
            details: ErrorDetails::default(),
        }
    }

    /// Add a detail field.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.0.push((key.into(), value.into()));
        self
    }

    /// Look up a detail value by key.
    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Serialize to the JSON body returned to HTTP clients.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "error": true,
            "code": self.code,
            "message": self.message,
            "retryability": self.retryability,
        });

        if !self.details.0.is_empty() {
            let details: serde_json::Map<String, serde_json::Value> = self
                .details
                .0
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            obj["details"] = serde_json::Value::Object(details);
        }

        obj
    }
}

impl Serialize for WebFetchError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retryability {
    Retryable,
    NotRetryable,
}

impl Retryability {
    #[must_use]
    pub const fn from_bool(retryable: bool) -> Self {
        if retryable {
            Self::Retryable
        } else {
            Self::NotRetryable
        }
    }
}

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Missing or empty request parameters.
    BadArgs,
    /// Selector failed to parse.
    InvalidSelector,
    /// URL failed admission (scheme, host, DNS, address class, or policy).
    NotAllowed,
    /// Client is inside its cooldown window.
    RateLimited,
    /// Request timeout.
    Timeout,
    /// Network/connection error.
    Network,
    /// HTTP 4xx from upstream.
    Http4xx,
    /// HTTP 5xx from upstream.
    Http5xx,
    /// Max redirects exceeded.
    RedirectLimit,
    /// Response exceeds size limit.
    ResponseTooLarge,
    /// Unexpected internal error.
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::BadArgs | ErrorCode::InvalidSelector | ErrorCode::NotAllowed => {
                ErrorCategory::BadRequest
            }
            ErrorCode::RateLimited => ErrorCategory::RateLimited,
            ErrorCode::Timeout => ErrorCategory::Timeout,
            ErrorCode::Network
            | ErrorCode::Http4xx
            | ErrorCode::Http5xx
            | ErrorCode::RedirectLimit
            | ErrorCode::ResponseTooLarge => ErrorCategory::UpstreamFetch,
            ErrorCode::Internal => ErrorCategory::Internal,
        }
    }
}

/// Client-visible grouping of error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    BadRequest,
    RateLimited,
    Timeout,
    UpstreamFetch,
    Internal,
}

/// Error details as key-value pairs.
#[derive(Debug, Clone, Default)]
pub struct ErrorDetails(pub Vec<(String, String)>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_json_includes_details() {
        let err = WebFetchError::new(ErrorCode::NotAllowed, "URL not allowed", false)
            .with_detail("reason", "private_address");
        let json = err.to_json();
        assert_eq!(json["code"], "not_allowed");
        assert_eq!(json["retryability"], "not_retryable");
        assert_eq!(json["details"]["reason"], "private_address");
        assert_eq!(err.detail("reason"), Some("private_address"));
    }

    #[test]
    fn error_json_omits_empty_details() {
        let err = WebFetchError::new(ErrorCode::Timeout, "request timed out", true);
        let json = err.to_json();
        assert!(json.get("details").is_none());
        assert_eq!(json["retryability"], "retryable");
    }

    #[test]
    fn categories_separate_rate_limit_from_bad_request() {
        assert_eq!(ErrorCode::BadArgs.category(), ErrorCategory::BadRequest);
        assert_eq!(
            ErrorCode::InvalidSelector.category(),
            ErrorCategory::BadRequest
        );
        assert_eq!(ErrorCode::RateLimited.category(), ErrorCategory::RateLimited);
        assert_eq!(ErrorCode::Timeout.category(), ErrorCategory::Timeout);
        assert_eq!(ErrorCode::Http4xx.category(), ErrorCategory::UpstreamFetch);
    }

    #[test]
    fn scrape_request_defaults_missing_fields() {
        let request: ScrapeRequest = serde_json::from_str(r#"{"url":"https://example.com"}"#)
            .expect("valid request");
        assert_eq!(request.url, "https://example.com");
        assert!(request.selector.is_empty());

        let empty: ScrapeRequest = serde_json::from_str("{}").expect("valid request");
        assert!(empty.url.is_empty());
    }
}
