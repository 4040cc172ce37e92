//! Invariant-safe configuration resolution.
//!
//! This module transforms optional boundary-level configuration ([`WebFetchConfig`])
//! into a concrete [`ResolvedConfig`] with no `Option` fields. Optional
//! configuration is resolved once when the gateway is built, and core logic
//! operates on concrete durations and limits.
use std::env;
use std::time::Duration;

use crate::types::{RateLimitConfig, WebFetchConfig};

pub(crate) const DEFAULT_USER_AGENT: &str = "playground-webfetch/1.0";
const ENV_ALLOW_INSECURE_OVERRIDES: &str = "PLAYGROUND_ALLOW_INSECURE_OVERRIDES";

#[derive(Debug, Clone)]
pub(crate) struct ResolvedConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub robots_timeout: Duration,
    pub dns_timeout: Duration,
    pub max_redirects: u32,
    pub max_download_bytes: u64,
    pub rate_limit: ResolvedRateLimitConfig,
    pub security: ResolvedSecurityConfig,
    pub robots: ResolvedRobotsConfig,
}

impl ResolvedConfig {
    pub fn from_config(config: &WebFetchConfig) -> Self {
        let user_agent = config
            .user_agent
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        Self {
            user_agent,
            timeout: seconds(config.timeout_seconds().max(1)),
            robots_timeout: seconds(config.robots_timeout_seconds().max(1)),
            dns_timeout: seconds(config.dns_timeout_seconds().max(1)),
            max_redirects: config.max_redirects(),
            max_download_bytes: config.max_download_bytes(),
            rate_limit: ResolvedRateLimitConfig::from_config(config),
            security: ResolvedSecurityConfig::from_config(config),
            robots: ResolvedRobotsConfig::from_config(config),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedRateLimitConfig {
    pub cooldown: Duration,
    pub sweep_interval: Duration,
}

impl ResolvedRateLimitConfig {
    fn from_config(config: &WebFetchConfig) -> Self {
        let rate_limit = config.rate_limit.as_ref();
        let cooldown = rate_limit
            .and_then(|r| r.cooldown_seconds)
            .unwrap_or(RateLimitConfig::DEFAULT_COOLDOWN_SECONDS);
        let sweep_interval = rate_limit
            .and_then(|r| r.sweep_interval_seconds)
            .unwrap_or(RateLimitConfig::DEFAULT_SWEEP_INTERVAL_SECONDS)
            .max(1);

        Self {
            cooldown: seconds(cooldown),
            sweep_interval: seconds(sweep_interval),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ResolvedSecurityConfig {
    pub blocked_cidrs: Vec<String>,
    pub allow_insecure_overrides: bool,
}

impl ResolvedSecurityConfig {
    fn from_config(config: &WebFetchConfig) -> Self {
        let security = config.security.as_ref();
        let blocked_cidrs = security
            .and_then(|s| s.blocked_cidrs.clone())
            .unwrap_or_default();
        let requested_insecure_overrides = security.is_some_and(|s| s.allow_insecure_overrides);
        let insecure_overrides_opt_in = env_opt_in_enabled(ENV_ALLOW_INSECURE_OVERRIDES);

        if requested_insecure_overrides && !insecure_overrides_opt_in {
            tracing::warn!(
                "allow_insecure_overrides requested in config but disabled: set {}=1 to opt in",
                ENV_ALLOW_INSECURE_OVERRIDES
            );
        }

        Self {
            blocked_cidrs,
            allow_insecure_overrides: requested_insecure_overrides && insecure_overrides_opt_in,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedRobotsConfig {
    pub enforce_on_scrape: bool,
}

impl ResolvedRobotsConfig {
    fn from_config(config: &WebFetchConfig) -> Self {
        Self {
            enforce_on_scrape: config.robots.as_ref().is_some_and(|r| r.enforce_on_scrape),
        }
    }
}

fn seconds(value: u32) -> Duration {
    Duration::from_secs(u64::from(value))
}

fn env_opt_in_enabled(name: &str) -> bool {
    env::var(name).is_ok_and(|raw| {
        matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RobotsConfig, SecurityConfig};

    #[test]
    fn defaults_match_documented_values() {
        let resolved = ResolvedConfig::from_config(&WebFetchConfig::default());
        assert_eq!(resolved.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(resolved.timeout, Duration::from_secs(10));
        assert_eq!(resolved.robots_timeout, Duration::from_secs(5));
        assert_eq!(resolved.max_redirects, 10);
        assert_eq!(resolved.max_download_bytes, 10 * 1024 * 1024);
        assert_eq!(resolved.rate_limit.cooldown, Duration::from_secs(2));
        assert_eq!(resolved.rate_limit.sweep_interval, Duration::from_secs(60));
        assert!(!resolved.security.allow_insecure_overrides);
        assert!(!resolved.robots.enforce_on_scrape);
    }

    #[test]
    fn blank_user_agent_falls_back_to_default() {
        let config = WebFetchConfig {
            user_agent: Some("   ".to_string()),
            ..Default::default()
        };
        let resolved = ResolvedConfig::from_config(&config);
        assert_eq!(resolved.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = WebFetchConfig {
            timeout_seconds: Some(3),
            max_redirects: Some(0),
            rate_limit: Some(RateLimitConfig {
                cooldown_seconds: Some(7),
                sweep_interval_seconds: Some(0),
            }),
            security: Some(SecurityConfig {
                blocked_cidrs: Some(vec!["198.19.0.0/16".to_string()]),
                allow_insecure_overrides: false,
            }),
            robots: Some(RobotsConfig {
                enforce_on_scrape: true,
            }),
            ..Default::default()
        };
        let resolved = ResolvedConfig::from_config(&config);
        assert_eq!(resolved.timeout, Duration::from_secs(3));
        assert_eq!(resolved.max_redirects, 0);
        assert_eq!(resolved.rate_limit.cooldown, Duration::from_secs(7));
        assert_eq!(resolved.rate_limit.sweep_interval, Duration::from_secs(1));
        assert_eq!(resolved.security.blocked_cidrs, vec!["198.19.0.0/16"]);
        assert!(resolved.robots.enforce_on_scrape);
    }
}
