//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{RouteGroupRule, RouteRules};

/// Prefix for environment variable overrides, e.g. `TURNSTILE__SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    ///
    /// Only enable this behind a proxy that overwrites these headers.
    #[serde(default)]
    pub trust_forwarded_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trust_forwarded_headers: false,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Optional path to a separate route rules file; replaces `groups` when set
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Seconds between idle-client sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Protected route groups
    #[serde(default = "default_groups")]
    pub groups: Vec<RouteGroupRule>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            sweep_interval_secs: default_sweep_interval(),
            groups: default_groups(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_groups() -> Vec<RouteGroupRule> {
    RouteRules::default().groups
}

impl RateLimitingConfig {
    /// Period between sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Resolve the route rules, reading `rules_path` if configured.
    pub fn rules(&self) -> Result<RouteRules> {
        if let Some(ref path) = self.rules_path {
            return RouteRules::from_file(path);
        }

        let rules = RouteRules {
            groups: self.groups.clone(),
        };
        rules.validate()?;
        Ok(rules)
    }
}

impl TurnstileConfig {
    /// Load configuration from an optional file, layered with environment overrides.
    ///
    /// The file format is picked from its extension (YAML, TOML or JSON).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: TurnstileConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.sweep_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.rate_limiting.rules_path.is_none() {
            self.rate_limiting.rules()?;
        }
        Ok(())
    }
}
