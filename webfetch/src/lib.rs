//! SSRF-guarded page fetching and text extraction.
//!
//! This crate is the core of the scraping playground: it decides whether a
//! user-supplied URL is safe to fetch, rate limits fetches per client, fetches
//! the page under strict time and size limits, and extracts labeled text.
//!
//! # Pipeline
//!
//! [`Gateway::scrape`] processes a request through these stages:
//!
//! 1. **Validation** - URL must be non-empty
//! 2. **Admission** - scheme, hostname denylist, DNS, address classification
//! 3. **Rate limit** - per-client cooldown
//! 4. **Policy** - robots.txt probe, only when `robots.enforce_on_scrape` is set
//! 5. **Fetch** - pinned to admitted addresses; redirects re-admitted per hop
//! 6. **Decode** - charset from `Content-Type`, then `<meta>`, then UTF-8
//! 7. **Extraction** - CSS selector or default tag scan, plus a markup preview
//!
//! [`Gateway::check_url`] runs admission and the robots.txt probe without
//! fetching the page.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`classify`] | Public/private/loopback/reserved address classes |
//! | [`admission`] | URL admission and the DNS resolver seam |
//! | [`ratelimit`] | Per-client cooldown table |
//! | [`robots`] | Narrow "disallow all" robots.txt probe |
//! | [`extract`] | Selector and default-tag text extraction |
//! | [`types`] | Requests, outputs, configuration, structured errors |
//!
//! # Failure policy
//!
//! Admission fails closed: any error while vetting a URL denies it. The
//! robots.txt probe fails open: if robots.txt cannot be read the site is
//! treated as permitting access. Every other failure is returned to the caller
//! as a [`WebFetchError`] with a stable [`ErrorCode`].

pub mod admission;
mod charset;
pub mod classify;
pub mod extract;
mod http;
pub mod ratelimit;
mod resolved;
pub mod robots;
pub mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use url::Url;

use http::RequestBudget;
use resolved::ResolvedConfig;

pub use admission::{
    AdmissionDecision, DenialReason, Resolve, ResolveFut, SystemResolver, UrlAdmission,
};
pub use classify::{AddressClass, AddressClassifier};
pub use ratelimit::RateLimiter;
pub use robots::PolicyVerdict;
pub use types::{
    CheckOutcome, ErrorCategory, ErrorCode, ErrorDetails, ExtractedField, RateLimitConfig,
    Retryability, RobotsConfig, ScrapeOutput, ScrapeRequest, SecurityConfig, WebFetchConfig,
    WebFetchError,
};

/// Orchestrates admission, rate limiting, fetching, and extraction.
#[derive(Debug)]
pub struct Gateway {
    config: ResolvedConfig,
    admission: UrlAdmission,
    limiter: Arc<RateLimiter>,
}

impl Gateway {
    /// Build a gateway that resolves hostnames with the system resolver.
    pub fn new(config: &WebFetchConfig) -> Result<Self, WebFetchError> {
        Self::with_resolver(config, Arc::new(SystemResolver))
    }

    pub fn with_resolver(
        config: &WebFetchConfig,
        resolver: Arc<dyn Resolve>,
    ) -> Result<Self, WebFetchError> {
        let config = ResolvedConfig::from_config(config);
        let classifier = AddressClassifier::with_blocked_cidrs(&config.security.blocked_cidrs)?;
        let admission = UrlAdmission::from_config(&config, classifier, resolver);
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.cooldown));

        if config.security.allow_insecure_overrides {
            tracing::warn!("insecure overrides enabled: resolved loopback addresses are admitted");
        }

        Ok(Self {
            config,
            admission,
            limiter,
        })
    }

    /// Shared handle to the rate-limit table (for the stale-entry sweeper).
    #[must_use]
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.config.rate_limit.sweep_interval
    }

    /// Pre-flight check: admission plus the robots.txt probe.
    ///
    /// Never errors; a refusal is an outcome with `allowed = false`.
    pub async fn check_url(&self, url: &str) -> CheckOutcome {
        let url = url.trim();
        if url.is_empty() {
            return CheckOutcome::denied("URL is empty");
        }

        let parsed = match self.admit(url).await {
            Ok((parsed, _)) => parsed,
            Err(reason) => return CheckOutcome::denied(format!("Not allowed: {reason}")),
        };

        match self.probe_policy(&parsed).await {
            PolicyVerdict::DisallowAll => {
                CheckOutcome::denied("Blocked by robots.txt (disallows all bots)")
            }
            PolicyVerdict::Permitted | PolicyVerdict::Unavailable => {
                CheckOutcome::allowed("Allowed to scrape (be respectful!)")
            }
        }
    }

    /// Probe robots.txt for the origin of `url`. Fails open.
    pub async fn probe_policy(&self, url: &Url) -> PolicyVerdict {
        robots::check_policy(url, &self.admission, &self.config).await
    }

    /// Fetch a page for `client_id` and extract labeled text.
    pub async fn scrape(
        &self,
        request: ScrapeRequest,
        client_id: &str,
    ) -> Result<ScrapeOutput, WebFetchError> {
        let url = request.url.trim();
        if url.is_empty() {
            return Err(
                WebFetchError::new(ErrorCode::BadArgs, "URL required", false)
                    .with_detail("field", "url"),
            );
        }

        let (parsed, addrs) = self.admit(url).await.map_err(not_allowed)?;

        // A rate-limited client triggers no outbound request, robots.txt included.
        self.check_rate_limit(client_id)?;

        if self.config.robots.enforce_on_scrape
            && !self.probe_policy(&parsed).await.is_permitted()
        {
            tracing::info!(url, "scrape refused by robots.txt");
            return Err(not_allowed(DenialReason::PolicyDisallowed));
        }

        let budget = RequestBudget {
            timeout: self.config.timeout,
            max_bytes: self.config.max_download_bytes,
        };
        let response = http::fetch(&parsed, &addrs, &self.admission, &self.config, budget)
            .await
            .inspect_err(|e| {
                tracing::warn!(url, code = ?e.code, error = %e.message, "fetch failed");
            })?;

        let html = response.text();
        let extraction = extract::extract(&html, &request.selector)?;

        tracing::info!(
            url,
            final_url = %response.final_url,
            status = response.status.as_u16(),
            bytes = response.body.len(),
            count = extraction.fields.len(),
            "scrape complete"
        );

        let count = extraction.fields.len();
        Ok(ScrapeOutput {
            data: extraction.fields,
            html_preview: extraction.preview,
            count,
        })
    }

    async fn admit(&self, url: &str) -> Result<(Url, Vec<std::net::IpAddr>), DenialReason> {
        match self.admission.admit(url).await {
            AdmissionDecision::Allowed { addrs } => Url::parse(url)
                .map(|parsed| (parsed, addrs))
                .map_err(|_| DenialReason::BadScheme),
            AdmissionDecision::Denied(reason) => Err(reason),
        }
    }

    fn check_rate_limit(&self, client_id: &str) -> Result<(), WebFetchError> {
        let now = Instant::now();
        if self.limiter.try_admit(client_id, now) {
            return Ok(());
        }

        let retry_after = self
            .limiter
            .retry_after(client_id, now)
            .unwrap_or_else(|| self.limiter.cooldown());
        let retry_after_ms = retry_after.as_millis() as u64;
        tracing::info!(client = client_id, retry_after_ms, "rate limited");
        Err(WebFetchError::new(
            ErrorCode::RateLimited,
            format!(
                "rate limited: retry after {} seconds",
                retry_after_ms.div_ceil(1000).max(1)
            ),
            true,
        )
        .with_detail("retry_after_ms", retry_after_ms.to_string()))
    }
}

fn not_allowed(reason: DenialReason) -> WebFetchError {
    WebFetchError::new(
        ErrorCode::NotAllowed,
        format!("URL not allowed: {reason}"),
        false,
    )
    .with_detail("reason", reason.as_str())
}
