//! Bounded HTTP GET with DNS pinning.
//!
//! - Connections go only to addresses that passed admission (the client's
//!   resolver is overridden per host, so the Host header and TLS SNI are
//!   unchanged)
//! - Redirects are followed by hand; every hop is admitted and pinned again
//! - One deadline covers every hop and the body stream
//! - Bodies larger than the budget are refused
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use tokio::time::{Instant, timeout};
use url::Url;

use crate::admission::{AdmissionDecision, UrlAdmission};
use crate::charset::{self, CharsetResolution};
use crate::resolved::ResolvedConfig;
use crate::types::{ErrorCode, WebFetchError};

/// Connection attempts per hop when a host resolves to several addresses.
const MAX_CONNECT_ATTEMPTS: usize = 3;

/// Time and size limits for one logical fetch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestBudget {
    pub timeout: Duration,
    pub max_bytes: u64,
}

#[derive(Debug)]
pub(crate) struct HttpResponse {
    /// Final URL after redirects.
    pub final_url: Url,

    pub status: StatusCode,

    pub body: Vec<u8>,

    pub charset: CharsetResolution,
}

impl HttpResponse {
    /// Body decoded with the resolved charset.
    pub fn text(&self) -> String {
        if let CharsetResolution::HeaderFallbackUtf8(label) = &self.charset {
            tracing::debug!(charset = %label, "unsupported charset, decoding as UTF-8");
        }
        charset::decode(&self.body, self.charset.charset())
    }
}

/// GET `url`, connecting only to `addrs`.
///
/// Non-2xx responses are errors. Redirect targets that fail admission are
/// refused with `NotAllowed`.
pub(crate) async fn fetch(
    url: &Url,
    addrs: &[IpAddr],
    admission: &UrlAdmission,
    config: &ResolvedConfig,
    budget: RequestBudget,
) -> Result<HttpResponse, WebFetchError> {
    let deadline = Instant::now() + budget.timeout;
    let mut current_url = url.clone();
    let mut current_addrs = addrs.to_vec();
    let mut redirect_count = 0u32;

    loop {
        let response = send_pinned(&current_url, &current_addrs, config, deadline, budget).await?;
        let status = response.status();

        if status.is_redirection() && response.headers().contains_key(LOCATION) {
            redirect_count += 1;
            if redirect_count > config.max_redirects {
                return Err(WebFetchError::new(
                    ErrorCode::RedirectLimit,
                    "redirect limit exceeded",
                    false,
                )
                .with_detail("count", redirect_count.to_string())
                .with_detail("max", config.max_redirects.to_string()));
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let next_url = current_url.join(location).map_err(|_| {
                WebFetchError::new(
                    ErrorCode::Network,
                    "fetch error: redirect Location could not be resolved",
                    false,
                )
                .with_detail("location", location)
            })?;

            current_addrs = match admission.admit_url(&next_url).await {
                AdmissionDecision::Allowed { addrs } => addrs,
                AdmissionDecision::Denied(reason) => {
                    return Err(WebFetchError::new(
                        ErrorCode::NotAllowed,
                        format!("redirect not allowed: {reason}"),
                        false,
                    )
                    .with_detail("reason", reason.as_str())
                    .with_detail("url", next_url.as_str()));
                }
            };
            tracing::debug!(from = %current_url, to = %next_url, "following redirect");
            current_url = next_url;
            continue;
        }

        if !status.is_success() {
            return Err(status_error(status));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = read_body(response, deadline, budget).await?;
        let charset = charset::determine_charset(content_type.as_deref(), &body);
        return Ok(HttpResponse {
            final_url: current_url,
            status,
            body,
            charset,
        });
    }
}

async fn send_pinned(
    url: &Url,
    addrs: &[IpAddr],
    config: &ResolvedConfig,
    deadline: Instant,
    budget: RequestBudget,
) -> Result<reqwest::Response, WebFetchError> {
    let host = url
        .host_str()
        .ok_or_else(|| WebFetchError::new(ErrorCode::NotAllowed, "URL has no host", false))?;
    let port = url.port_or_known_default().unwrap_or(80);
    let is_literal = url.domain().is_none();

    let mut first_error: Option<String> = None;
    let mut attempted = Vec::new();

    for ip in addrs.iter().take(MAX_CONNECT_ATTEMPTS) {
        attempted.push(ip.to_string());
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timeout_error(budget));
        }

        let client = build_client(config, host, *ip, port, !is_literal, remaining)?;
        let response = match timeout(remaining, client.get(url.clone()).send()).await {
            Ok(res) => res,
            Err(_) => return Err(timeout_error(budget)),
        };

        match response {
            Ok(resp) => return Ok(resp),
            Err(err) => {
                if err.is_timeout() {
                    return Err(timeout_error(budget));
                }
                tracing::debug!(%ip, error = %err, "connection attempt failed");
                if first_error.is_none() {
                    first_error = Some(error_chain(&err));
                }
            }
        }
    }

    let cause = first_error.unwrap_or_else(|| "no addresses to connect to".to_string());
    Err(
        WebFetchError::new(ErrorCode::Network, format!("fetch error: {cause}"), true)
            .with_detail("error", cause)
            .with_detail("attempted_ips", attempted.join(",")),
    )
}

fn build_client(
    config: &ResolvedConfig,
    host: &str,
    ip: IpAddr,
    port: u16,
    pin_dns: bool,
    request_timeout: Duration,
) -> Result<reqwest::Client, WebFetchError> {
    let mut builder = reqwest::Client::builder()
        .redirect(Policy::none())
        .user_agent(&config.user_agent)
        .timeout(request_timeout)
        .no_proxy();

    if pin_dns {
        builder = builder.resolve(host, SocketAddr::new(ip, port));
    }

    builder.build().map_err(|e| {
        WebFetchError::new(
            ErrorCode::Internal,
            format!("failed to build HTTP client: {e}"),
            false,
        )
    })
}

async fn read_body(
    response: reqwest::Response,
    deadline: Instant,
    budget: RequestBudget,
) -> Result<Vec<u8>, WebFetchError> {
    let max_bytes = budget.max_bytes as usize;
    if let Some(len) = response.content_length()
        && len > budget.max_bytes
    {
        return Err(too_large(len, budget.max_bytes));
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timeout_error(budget));
        }
        let next = timeout(remaining, stream.next())
            .await
            .map_err(|_| timeout_error(budget))?;
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                return timeout_error(budget);
            }
            WebFetchError::new(
                ErrorCode::Network,
                format!("fetch error: response stream error: {e}"),
                true,
            )
            .with_detail("error", e.to_string())
        })?;

        if body.len() + chunk.len() > max_bytes {
            return Err(too_large(
                (body.len() + chunk.len()) as u64,
                budget.max_bytes,
            ));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

fn status_error(status: StatusCode) -> WebFetchError {
    let code = status.as_u16();
    let (error_code, retryable) = if status.is_client_error() {
        (ErrorCode::Http4xx, matches!(code, 408 | 429))
    } else if status.is_server_error() {
        (ErrorCode::Http5xx, true)
    } else {
        (ErrorCode::Network, false)
    };

    WebFetchError::new(
        error_code,
        format!("fetch error: HTTP {code}"),
        retryable,
    )
    .with_detail("status", code.to_string())
    .with_detail(
        "status_text",
        status.canonical_reason().unwrap_or("").to_string(),
    )
}

fn too_large(size: u64, max_bytes: u64) -> WebFetchError {
    WebFetchError::new(
        ErrorCode::ResponseTooLarge,
        "response exceeds size limit",
        false,
    )
    .with_detail("size", size.to_string())
    .with_detail("max_bytes", max_bytes.to_string())
}

fn timeout_error(budget: RequestBudget) -> WebFetchError {
    WebFetchError::new(ErrorCode::Timeout, "timeout fetching page", true)
        .with_detail("timeout_ms", (budget.timeout.as_millis() as u64).to_string())
}

/// Render an error with its sources; reqwest's top-level message alone rarely
/// names the cause.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Layered(&'static str, Option<Box<Layered>>);

    impl fmt::Display for Layered {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl std::error::Error for Layered {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            self.1
                .as_deref()
                .map(|inner| inner as &(dyn std::error::Error + 'static))
        }
    }

    #[test]
    fn status_errors_split_by_class() {
        let not_found = status_error(StatusCode::NOT_FOUND);
        assert_eq!(not_found.code, ErrorCode::Http4xx);
        assert_eq!(not_found.message, "fetch error: HTTP 404");
        assert_eq!(not_found.detail("status_text"), Some("Not Found"));

        let too_many = status_error(StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(too_many.code, ErrorCode::Http4xx);
        assert_eq!(
            too_many.retryability,
            crate::types::Retryability::Retryable
        );

        let bad_gateway = status_error(StatusCode::BAD_GATEWAY);
        assert_eq!(bad_gateway.code, ErrorCode::Http5xx);

        let not_modified = status_error(StatusCode::NOT_MODIFIED);
        assert_eq!(not_modified.code, ErrorCode::Network);
    }

    #[test]
    fn error_chain_joins_sources() {
        let err = Layered(
            "error sending request",
            Some(Box::new(Layered("connection refused", None))),
        );
        assert_eq!(
            error_chain(&err),
            "error sending request: connection refused"
        );
    }

    #[test]
    fn timeout_error_reports_budget() {
        let err = timeout_error(RequestBudget {
            timeout: Duration::from_secs(10),
            max_bytes: 1,
        });
        assert_eq!(err.code, ErrorCode::Timeout);
        assert_eq!(err.detail("timeout_ms"), Some("10000"));
    }
}
