//! Best-effort robots.txt probe.
//!
//! This is a deliberately narrow check: a site counts as closed to bots only
//! when its robots.txt contains both `User-agent: *` and `Disallow: /`. It is a
//! substring test, not a parser.
//!
//! The probe fails open. If robots.txt cannot be fetched for any reason the
//! site is treated as permitting access.

use url::Url;

use crate::admission::{AdmissionDecision, UrlAdmission};
use crate::http::{self, RequestBudget};
use crate::resolved::ResolvedConfig;
use crate::types::{ErrorCode, WebFetchError};

/// Maximum robots.txt file size.
pub const MAX_ROBOTS_SIZE: u64 = 512 * 1024; // 512 KiB

const WILDCARD_AGENT: &str = "User-agent: *";
const DISALLOW_ROOT: &str = "Disallow: /";

/// Outcome of probing a site's robots.txt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyVerdict {
    /// robots.txt was fetched and does not disallow everything.
    Permitted,
    /// robots.txt disallows all bots.
    DisallowAll,
    /// robots.txt could not be fetched; treated as permitted.
    Unavailable,
}

impl PolicyVerdict {
    #[must_use]
    pub fn is_permitted(&self) -> bool {
        !matches!(self, PolicyVerdict::DisallowAll)
    }
}

/// Decide a verdict from robots.txt text.
#[must_use]
pub fn evaluate(body: &str) -> PolicyVerdict {
    if body.contains(WILDCARD_AGENT) && body.contains(DISALLOW_ROOT) {
        PolicyVerdict::DisallowAll
    } else {
        PolicyVerdict::Permitted
    }
}

/// Fetch and evaluate robots.txt for the origin of `base`.
pub(crate) async fn check_policy(
    base: &Url,
    admission: &UrlAdmission,
    config: &ResolvedConfig,
) -> PolicyVerdict {
    match fetch_robots(base, admission, config).await {
        Ok(body) => evaluate(&body),
        Err(e) => fail_open(base, &e),
    }
}

/// Probe failures never deny.
fn fail_open(base: &Url, err: &WebFetchError) -> PolicyVerdict {
    tracing::debug!(
        url = %base,
        code = ?err.code,
        error = %err.message,
        "robots.txt unavailable, continuing"
    );
    PolicyVerdict::Unavailable
}

async fn fetch_robots(
    base: &Url,
    admission: &UrlAdmission,
    config: &ResolvedConfig,
) -> Result<String, WebFetchError> {
    let robots_url = build_robots_url(base)?;

    let addrs = match admission.admit_url(&robots_url).await {
        AdmissionDecision::Allowed { addrs } => addrs,
        AdmissionDecision::Denied(reason) => {
            return Err(WebFetchError::new(
                ErrorCode::NotAllowed,
                format!("robots.txt not fetchable: {reason}"),
                false,
            ));
        }
    };

    let budget = RequestBudget {
        timeout: config.robots_timeout,
        max_bytes: MAX_ROBOTS_SIZE,
    };
    let response = http::fetch(&robots_url, &addrs, admission, config, budget).await?;

    // Only a plain 200 counts; other 2xx codes carry no policy.
    if response.status.as_u16() != 200 {
        return Err(WebFetchError::new(
            ErrorCode::Network,
            format!("unexpected status {}", response.status.as_u16()),
            false,
        ));
    }

    Ok(response.text())
}

/// Build the robots.txt URL for the origin of `url`.
fn build_robots_url(url: &Url) -> Result<Url, WebFetchError> {
    let host = url
        .host_str()
        .ok_or_else(|| WebFetchError::new(ErrorCode::BadArgs, "URL has no host", false))?;

    let robots = match url.port() {
        Some(port) => format!("{}://{}:{}/robots.txt", url.scheme(), host, port),
        None => format!("{}://{}/robots.txt", url.scheme(), host),
    };

    Url::parse(&robots).map_err(|e| {
        WebFetchError::new(
            ErrorCode::BadArgs,
            format!("failed to build robots.txt URL: {e}"),
            false,
        )
    })
}
