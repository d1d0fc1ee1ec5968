//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving secrets.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Listener configuration
    pub server: ServerConfig,
    /// Upstream origin and the real credential
    pub upstream: UpstreamConfig,
    /// Token issuance and lifecycle
    pub tokens: TokenConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum inbound request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8401,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 32 * 1024 * 1024, // 32MB
        }
    }
}

/// Upstream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Fixed upstream origin every request is forwarded to
    pub base_url: String,
    /// The real API key: a literal value or `env:VAR_NAME`
    pub api_key: String,
    /// Protocol version header value injected when the caller omits it
    pub api_version: String,
    /// Total upstream request timeout (covers slow generation)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Upstream connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Read size for the event-stream relay loop (bytes)
    pub stream_chunk_size: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key: "env:ANTHROPIC_API_KEY".to_string(),
            api_version: "2023-06-01".to_string(),
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            stream_chunk_size: 4096,
        }
    }
}

/// Token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Literal prefix on every issued token
    pub prefix: String,
    /// TTL used when an issuance request does not specify one
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Shortest TTL a token may be issued with
    #[serde(with = "humantime_serde")]
    pub min_ttl: Duration,
    /// Longest TTL a token may be issued with
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,
    /// How often expired tokens are swept from the store
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    /// Mount the standalone `POST /token` and `DELETE /token` routes.
    /// Off unless asked for: anyone who can reach them can mint tokens
    /// unless `admin_token` is also set.
    pub issuance_enabled: bool,
    /// Bearer token guarding the issuance routes: literal or `env:VAR_NAME`
    pub admin_token: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            prefix: "crd_".to_string(),
            default_ttl: Duration::from_secs(10 * 60),
            min_ttl: Duration::from_secs(1),
            max_ttl: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60),
            issuance_enabled: false,
            admin_token: None,
        }
    }
}

impl TokenConfig {
    /// Resolve the admin token (expand `env:` references).
    ///
    /// An unset variable or empty value disables the admin check.
    #[must_use]
    pub fn resolve_admin_token(&self) -> Option<String> {
        let token = self.admin_token.as_ref()?;
        let resolved = if let Some(var_name) = token.strip_prefix("env:") {
            env::var(var_name).ok()?
        } else {
            token.clone()
        };
        if resolved.is_empty() { None } else { Some(resolved) }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed,
    /// or if the resulting values are inconsistent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("CREDPROXY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before secret resolution)
        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let tokens = &self.tokens;
        if tokens.min_ttl.is_zero() {
            return Err(Error::Config("tokens.min_ttl must be positive".to_string()));
        }
        if tokens.max_ttl <= tokens.min_ttl {
            return Err(Error::Config(
                "tokens.max_ttl must be greater than tokens.min_ttl".to_string(),
            ));
        }
        if tokens.cleanup_interval.is_zero() {
            return Err(Error::Config(
                "tokens.cleanup_interval must be positive".to_string(),
            ));
        }
        if tokens.prefix.is_empty() {
            return Err(Error::Config("tokens.prefix must not be empty".to_string()));
        }
        if self.server.max_body_size == 0 {
            return Err(Error::Config(
                "server.max_body_size must be positive".to_string(),
            ));
        }
        if self.upstream.stream_chunk_size == 0 {
            return Err(Error::Config(
                "upstream.stream_chunk_size must be positive".to_string(),
            ));
        }
        if !self.upstream.base_url.starts_with("http://")
            && !self.upstream.base_url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "upstream.base_url must be an http(s) URL, got {}",
                self.upstream.base_url
            )));
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 8401);
        assert_eq!(config.upstream.base_url, "https://api.anthropic.com");
        assert_eq!(config.upstream.api_version, "2023-06-01");
        assert_eq!(config.upstream.timeout, Duration::from_secs(300));
        assert_eq!(config.upstream.stream_chunk_size, 4096);
        assert_eq!(config.tokens.prefix, "crd_");
        assert_eq!(config.tokens.max_ttl, Duration::from_secs(86_400));
        assert_eq!(config.tokens.cleanup_interval, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn token_minting_routes_are_off_by_default() {
        let tokens = TokenConfig::default();
        assert!(!tokens.issuance_enabled);
        assert_eq!(tokens.resolve_admin_token(), None);
    }

    #[test]
    fn load_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  port: 9999\nupstream:\n  base_url: http://127.0.0.1:1234\n  timeout: 2m\ntokens:\n  max_ttl: 1h\n  admin_token: hunter2"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.upstream.base_url, "http://127.0.0.1:1234");
        assert_eq!(config.upstream.timeout, Duration::from_secs(120));
        assert_eq!(config.tokens.max_ttl, Duration::from_secs(3600));
        assert_eq!(config.tokens.resolve_admin_token().as_deref(), Some("hunter2"));
        // untouched sections keep their defaults
        assert_eq!(config.tokens.prefix, "crd_");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn max_ttl_must_exceed_min_ttl() {
        let mut config = Config::default();
        config.tokens.max_ttl = config.tokens.min_ttl;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn base_url_must_be_http() {
        let mut config = Config::default();
        config.upstream.base_url = "ftp://example.com".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn empty_admin_token_disables_check() {
        let tokens = TokenConfig {
            admin_token: Some(String::new()),
            ..TokenConfig::default()
        };
        assert_eq!(tokens.resolve_admin_token(), None);
    }
}
