//! Configuration file loading for the scraping playground.
//!
//! The file lives at `~/.playground/config.toml` unless `PLAYGROUND_CONFIG`
//! points elsewhere. A missing file is not an error: every setting has a
//! default.
use std::path::{Path, PathBuf};
use std::{env, fs};

use playground_webfetch::WebFetchConfig;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable that overrides the config file location.
pub const ENV_CONFIG_PATH: &str = "PLAYGROUND_CONFIG";

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

#[derive(Debug, Default, Deserialize)]
pub struct PlaygroundConfig {
    pub server: Option<ServerConfig>,
    /// Fetch gateway settings, passed through to `playground-webfetch`.
    pub webfetch: Option<WebFetchConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Listen address. Supports `${VAR}` expansion.
    pub bind: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Replace `${VAR}` with the variable's value. Unset variables become empty;
/// an unclosed `${` is kept as written.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(end_rel) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..start + 2 + end_rel];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[start + 2 + end_rel + 1..];
    }

    out.push_str(rest);
    out
}

impl PlaygroundConfig {
    /// Load from [`config_path`]. `Ok(None)` when no file exists.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Listen address with `${VAR}` expanded, or [`DEFAULT_BIND`].
    #[must_use]
    pub fn bind_addr(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.as_deref())
            .map(expand_env_vars)
            .filter(|bind| !bind.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
    }

    #[must_use]
    pub fn webfetch(&self) -> WebFetchConfig {
        self.webfetch.clone().unwrap_or_default()
    }
}

pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(ENV_CONFIG_PATH).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".playground").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // expand_env_vars tests

    #[test]
    fn expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("127.0.0.1:8000"), "127.0.0.1:8000");
    }

    #[test]
    fn expand_env_vars_single_var() {
        unsafe {
            env::set_var("PLAYGROUND_TEST_PORT", "9000");
        }
        let result = expand_env_vars("0.0.0.0:${PLAYGROUND_TEST_PORT}");
        assert_eq!(result, "0.0.0.0:9000");
        unsafe {
            env::remove_var("PLAYGROUND_TEST_PORT");
        }
    }

    #[test]
    fn expand_env_vars_missing_var_becomes_empty() {
        unsafe {
            env::remove_var("PLAYGROUND_MISSING_FOR_TEST");
        }
        let result = expand_env_vars("before ${PLAYGROUND_MISSING_FOR_TEST} after");
        assert_eq!(result, "before  after");
    }

    #[test]
    fn expand_env_vars_unclosed_brace_preserved() {
        assert_eq!(expand_env_vars("host:${UNCLOSED"), "host:${UNCLOSED");
    }

    #[test]
    fn expand_env_vars_empty_var_name_dropped() {
        assert_eq!(expand_env_vars("a ${} b"), "a  b");
    }

    #[test]
    fn expand_env_vars_adjacent_vars() {
        unsafe {
            env::set_var("PLAYGROUND_ADJ_A", "X");
            env::set_var("PLAYGROUND_ADJ_B", "Y");
        }
        assert_eq!(expand_env_vars("${PLAYGROUND_ADJ_A}${PLAYGROUND_ADJ_B}"), "XY");
        unsafe {
            env::remove_var("PLAYGROUND_ADJ_A");
            env::remove_var("PLAYGROUND_ADJ_B");
        }
    }

    // PlaygroundConfig parsing tests

    #[test]
    fn parse_empty_config() {
        let config: PlaygroundConfig = toml::from_str("").unwrap();
        assert!(config.server.is_none());
        assert!(config.webfetch.is_none());
        assert_eq!(config.bind_addr(), DEFAULT_BIND);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[server]
bind = "0.0.0.0:8080"

[webfetch]
user_agent = "custom/2.0"
timeout_seconds = 20
robots_timeout_seconds = 3
max_redirects = 4
max_download_bytes = 2048

[webfetch.rate_limit]
cooldown_seconds = 5
sweep_interval_seconds = 30

[webfetch.security]
blocked_cidrs = ["198.19.0.0/16"]
allow_insecure_overrides = true

[webfetch.robots]
enforce_on_scrape = true
"#;
        let config: PlaygroundConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");

        let webfetch = config.webfetch();
        assert_eq!(webfetch.user_agent.as_deref(), Some("custom/2.0"));
        assert_eq!(webfetch.timeout_seconds(), 20);
        assert_eq!(webfetch.robots_timeout_seconds(), 3);
        assert_eq!(webfetch.dns_timeout_seconds(), 5);
        assert_eq!(webfetch.max_redirects(), 4);
        assert_eq!(webfetch.max_download_bytes(), 2048);

        let rate_limit = webfetch.rate_limit.unwrap();
        assert_eq!(rate_limit.cooldown_seconds, Some(5));
        assert_eq!(rate_limit.sweep_interval_seconds, Some(30));

        let security = webfetch.security.unwrap();
        assert_eq!(
            security.blocked_cidrs,
            Some(vec!["198.19.0.0/16".to_string()])
        );
        assert!(security.allow_insecure_overrides);
        assert!(webfetch.robots.unwrap().enforce_on_scrape);
    }

    #[test]
    fn bind_addr_expands_env() {
        unsafe {
            env::set_var("PLAYGROUND_TEST_BIND", "127.0.0.1:7000");
        }
        let config: PlaygroundConfig =
            toml::from_str("[server]\nbind = \"${PLAYGROUND_TEST_BIND}\"\n").unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:7000");
        unsafe {
            env::remove_var("PLAYGROUND_TEST_BIND");
        }
    }

    #[test]
    fn bind_addr_falls_back_when_expansion_is_empty() {
        unsafe {
            env::remove_var("PLAYGROUND_UNSET_BIND");
        }
        let config: PlaygroundConfig =
            toml::from_str("[server]\nbind = \"${PLAYGROUND_UNSET_BIND}\"\n").unwrap();
        assert_eq!(config.bind_addr(), DEFAULT_BIND);
    }

    // load_from tests

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[webfetch.rate_limit]\ncooldown_seconds = 7\n").unwrap();

        let config = PlaygroundConfig::load_from(&path).unwrap();
        let rate_limit = config.webfetch().rate_limit.unwrap();
        assert_eq!(rate_limit.cooldown_seconds, Some(7));
    }

    #[test]
    fn load_from_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = PlaygroundConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert_eq!(err.path(), &path);
    }

    #[test]
    fn load_from_bad_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[webfetch\ntimeout_seconds = ").unwrap();

        let err = PlaygroundConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("failed to parse config at"));
    }

    #[test]
    fn load_from_wrong_type_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[webfetch]\ntimeout_seconds = \"ten\"\n").unwrap();

        let err = PlaygroundConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn config_path_honors_override() {
        unsafe {
            env::set_var(ENV_CONFIG_PATH, "/tmp/playground-test/config.toml");
        }
        assert_eq!(
            config_path(),
            Some(PathBuf::from("/tmp/playground-test/config.toml"))
        );
        unsafe {
            env::remove_var(ENV_CONFIG_PATH);
        }
    }
}
