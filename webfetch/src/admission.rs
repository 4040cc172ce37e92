//! URL admission: the SSRF gate in front of every outbound request.
//!
//! Checks run in a fixed order and stop at the first failure:
//! 1. Scheme must be http or https (unparseable URLs fail here too)
//! 2. Host must be present and not a denylisted loopback name
//! 3. Domain hosts are resolved through [`Resolve`]
//! 4. Every resolved address must classify as public
//!
//! Any failure on this path denies. The addresses returned with an
//! [`AdmissionDecision::Allowed`] are the only ones the fetch may connect to.
use std::fmt;
use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::lookup_host;
use tokio::time::timeout;
use url::{Host, Url};

use crate::classify::{AddressClass, AddressClassifier};
use crate::resolved::ResolvedConfig;

/// Hostnames refused before any DNS lookup (compared case-insensitively).
pub const DENYLISTED_HOSTNAMES: &[&str] = &["localhost", "127.0.0.1", "::1", "0.0.0.0"];

pub type ResolveFut<'a> = Pin<Box<dyn Future<Output = io::Result<Vec<IpAddr>>> + Send + 'a>>;

/// Hostname resolution seam.
pub trait Resolve: Send + Sync {
    fn resolve<'a>(&'a self, host: &'a str, port: u16) -> ResolveFut<'a>;
}

/// Resolver backed by the system's `getaddrinfo` via tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve<'a>(&'a self, host: &'a str, port: u16) -> ResolveFut<'a> {
        Box::pin(async move {
            let addrs = lookup_host((host, port)).await?;
            Ok(addrs.map(|addr| addr.ip()).collect())
        })
    }
}

/// Why a URL was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenialReason {
    /// Unparseable URL or a scheme other than http/https.
    BadScheme,
    EmptyHostname,
    DenylistedHostname,
    DnsFailure,
    /// A resolved address is private, loopback, or reserved.
    PrivateAddress,
    /// The site's robots.txt disallows all bots.
    PolicyDisallowed,
}

impl DenialReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DenialReason::BadScheme => "bad_scheme",
            DenialReason::EmptyHostname => "empty_hostname",
            DenialReason::DenylistedHostname => "denylisted_hostname",
            DenialReason::DnsFailure => "dns_failure",
            DenialReason::PrivateAddress => "private_address",
            DenialReason::PolicyDisallowed => "policy_disallowed",
        }
    }

    /// Human-readable explanation for API clients.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            DenialReason::BadScheme => "invalid URL or scheme (only http and https are allowed)",
            DenialReason::EmptyHostname => "URL has no hostname",
            DenialReason::DenylistedHostname => "localhost and loopback hosts are not allowed",
            DenialReason::DnsFailure => "hostname could not be resolved",
            DenialReason::PrivateAddress => {
                "hostname resolves to a private, loopback, or reserved address"
            }
            DenialReason::PolicyDisallowed => "robots.txt disallows all bots",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Safe to fetch. `addrs` holds the vetted addresses to connect to.
    Allowed { addrs: Vec<IpAddr> },
    Denied(DenialReason),
}

impl AdmissionDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allowed { .. })
    }

    #[must_use]
    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            AdmissionDecision::Allowed { .. } => None,
            AdmissionDecision::Denied(reason) => Some(*reason),
        }
    }
}

/// The admission gate.
#[derive(Clone)]
pub struct UrlAdmission {
    classifier: AddressClassifier,
    resolver: Arc<dyn Resolve>,
    dns_timeout: Duration,
    allow_loopback: bool,
}

impl fmt::Debug for UrlAdmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlAdmission")
            .field("classifier", &self.classifier)
            .field("dns_timeout", &self.dns_timeout)
            .field("allow_loopback", &self.allow_loopback)
            .finish_non_exhaustive()
    }
}

impl UrlAdmission {
    pub const DEFAULT_DNS_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(classifier: AddressClassifier, resolver: Arc<dyn Resolve>) -> Self {
        Self {
            classifier,
            resolver,
            dns_timeout: Self::DEFAULT_DNS_TIMEOUT,
            allow_loopback: false,
        }
    }

    pub(crate) fn from_config(
        config: &ResolvedConfig,
        classifier: AddressClassifier,
        resolver: Arc<dyn Resolve>,
    ) -> Self {
        Self::new(classifier, resolver)
            .with_dns_timeout(config.dns_timeout)
            .with_loopback_allowed(config.security.allow_insecure_overrides)
    }

    #[must_use]
    pub fn with_dns_timeout(mut self, dns_timeout: Duration) -> Self {
        self.dns_timeout = dns_timeout;
        self
    }

    /// Accept resolved loopback addresses. Literal loopback hostnames stay denied.
    #[must_use]
    pub fn with_loopback_allowed(mut self, allow: bool) -> Self {
        self.allow_loopback = allow;
        self
    }

    /// Decide whether `raw` may be fetched.
    pub async fn admit(&self, raw: &str) -> AdmissionDecision {
        let decision = match Url::parse(raw.trim()) {
            Ok(url) => self.evaluate(&url).await,
            Err(_) => Err(DenialReason::BadScheme),
        };
        settle(raw, decision)
    }

    /// Decide whether an already-parsed URL may be fetched.
    pub async fn admit_url(&self, url: &Url) -> AdmissionDecision {
        settle(url.as_str(), self.evaluate(url).await)
    }

    async fn evaluate(&self, url: &Url) -> Result<Vec<IpAddr>, DenialReason> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DenialReason::BadScheme);
        }

        let host = url.host().ok_or(DenialReason::EmptyHostname)?;
        let host_str = url.host_str().unwrap_or_default();
        if host_str.is_empty() {
            return Err(DenialReason::EmptyHostname);
        }
        if is_denylisted(host_str) {
            return Err(DenialReason::DenylistedHostname);
        }

        let mut addrs = match host {
            Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
            Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
            Host::Domain(name) => {
                let port = url.port_or_known_default().unwrap_or(80);
                self.resolve(name, port).await?
            }
        };
        addrs.sort_unstable();
        addrs.dedup();

        for ip in &addrs {
            let class = self.classifier.classify(*ip);
            if !self.class_permitted(class) {
                tracing::info!(host = host_str, %ip, %class, "resolved address is not public");
                return Err(DenialReason::PrivateAddress);
            }
        }

        Ok(addrs)
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<IpAddr>, DenialReason> {
        let addrs = match timeout(self.dns_timeout, self.resolver.resolve(host, port)).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => {
                tracing::debug!(host, error = %e, "dns lookup failed");
                return Err(DenialReason::DnsFailure);
            }
            Err(_) => {
                tracing::debug!(
                    host,
                    timeout_ms = self.dns_timeout.as_millis() as u64,
                    "dns lookup timed out"
                );
                return Err(DenialReason::DnsFailure);
            }
        };

        if addrs.is_empty() {
            return Err(DenialReason::DnsFailure);
        }
        Ok(addrs)
    }

    fn class_permitted(&self, class: AddressClass) -> bool {
        match class {
            AddressClass::Public => true,
            AddressClass::Loopback => self.allow_loopback,
            AddressClass::Private | AddressClass::Reserved | AddressClass::Invalid => false,
        }
    }
}

fn settle(target: &str, decision: Result<Vec<IpAddr>, DenialReason>) -> AdmissionDecision {
    match decision {
        Ok(addrs) => AdmissionDecision::Allowed { addrs },
        Err(reason) => fail_closed(target, reason),
    }
}

/// Admission failures always deny.
fn fail_closed(target: &str, reason: DenialReason) -> AdmissionDecision {
    tracing::info!(url = target, reason = reason.as_str(), "URL denied");
    AdmissionDecision::Denied(reason)
}

fn is_denylisted(host: &str) -> bool {
    let normalized = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    DENYLISTED_HOSTNAMES.contains(&normalized.as_str())
}
