//! Route group rules and limiter configuration.
//!
//! Each protected route group is described by a [`RouteGroupRule`] carrying
//! its own refill interval, burst and idle TTL. Rules are loaded from YAML
//! and turned into an immutable [`LimiterConfig`] when the group is built.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};

/// Immutable limiter settings for one route group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Time needed to earn one token
    pub refill_interval: Duration,
    /// Maximum number of tokens a client can accumulate
    pub burst: u32,
    /// How long a client may stay unseen before its bucket is evicted
    pub idle_ttl: Duration,
}

impl LimiterConfig {
    /// Create a new limiter configuration.
    pub fn new(refill_interval: Duration, burst: u32, idle_ttl: Duration) -> Self {
        Self {
            refill_interval,
            burst,
            idle_ttl,
        }
    }

    /// Check that the configuration describes a usable bucket.
    pub fn validate(&self) -> Result<()> {
        if self.refill_interval.is_zero() {
            return Err(TurnstileError::Config(
                "refill interval must be greater than zero".to_string(),
            ));
        }
        if self.burst == 0 {
            return Err(TurnstileError::Config(
                "burst must be at least 1".to_string(),
            ));
        }
        if self.idle_ttl.is_zero() {
            return Err(TurnstileError::Config(
                "idle TTL must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A rate limit rule for a group of routes sharing a path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteGroupRule {
    /// Group name, used in logs
    pub name: String,
    /// Path prefix the group is mounted at
    pub prefix: String,
    /// Milliseconds needed to earn one token
    pub refill_interval_ms: u64,
    /// Burst capacity
    pub burst: u32,
    /// Idle TTL in seconds
    pub idle_ttl_secs: u64,
}

impl RouteGroupRule {
    /// Create a new rule.
    ///
    /// Rules store the refill interval in whole milliseconds and the idle TTL
    /// in whole seconds; durations that do not convert exactly are rejected.
    pub fn new(
        name: &str,
        prefix: &str,
        refill_interval: Duration,
        burst: u32,
        idle_ttl: Duration,
    ) -> Result<Self> {
        if refill_interval.subsec_nanos() % 1_000_000 != 0 {
            return Err(TurnstileError::Config(format!(
                "route group '{}': refill interval {:?} is not a whole number of milliseconds",
                name, refill_interval
            )));
        }
        if idle_ttl.subsec_nanos() != 0 {
            return Err(TurnstileError::Config(format!(
                "route group '{}': idle TTL {:?} is not a whole number of seconds",
                name, idle_ttl
            )));
        }
        let refill_interval_ms = u64::try_from(refill_interval.as_millis()).map_err(|_| {
            TurnstileError::Config(format!(
                "route group '{}': refill interval {:?} is too large",
                name, refill_interval
            ))
        })?;

        Ok(Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            refill_interval_ms,
            burst,
            idle_ttl_secs: idle_ttl.as_secs(),
        })
    }

    /// The limiter settings described by this rule.
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig::new(
            Duration::from_millis(self.refill_interval_ms),
            self.burst,
            Duration::from_secs(self.idle_ttl_secs),
        )
    }

    /// Whether `path` falls under this group's prefix.
    ///
    /// Matching is segment-aware: `/auth` covers `/auth` and `/auth/login`
    /// but not `/authors`.
    pub fn matches(&self, path: &str) -> bool {
        let prefix = self.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Validate the rule.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TurnstileError::Config(
                "route group name must not be empty".to_string(),
            ));
        }
        if !self.prefix.starts_with('/') {
            return Err(TurnstileError::Config(format!(
                "route group '{}': prefix '{}' must start with '/'",
                self.name, self.prefix
            )));
        }
        self.limiter_config()
            .validate()
            .map_err(|e| TurnstileError::Config(format!("route group '{}': {}", self.name, e)))
    }
}

/// The set of rate-limited route groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRules {
    /// Route groups, each with an independent limiter
    #[serde(default)]
    pub groups: Vec<RouteGroupRule>,
}

impl Default for RouteRules {
    fn default() -> Self {
        Self {
            groups: default_groups(),
        }
    }
}

impl RouteRules {
    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading route group rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    ///
    /// Accepts either a document with a `groups` list or a bare list of groups.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if let Ok(groups) = serde_yaml::from_str::<Vec<RouteGroupRule>>(yaml) {
            let rules = Self { groups };
            rules.validate()?;
            return Ok(rules);
        }

        let rules: Self = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse route rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Validate every group and reject duplicate names or prefixes.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut prefixes = HashSet::new();

        for group in &self.groups {
            group.validate()?;

            if !names.insert(group.name.as_str()) {
                return Err(TurnstileError::Config(format!(
                    "duplicate route group name '{}'",
                    group.name
                )));
            }
            if !prefixes.insert(group.prefix.trim_end_matches('/')) {
                return Err(TurnstileError::Config(format!(
                    "duplicate route group prefix '{}'",
                    group.prefix
                )));
            }
        }
        Ok(())
    }

    /// Find the group with the longest prefix covering `path`.
    pub fn find_group(&self, path: &str) -> Option<&RouteGroupRule> {
        self.groups
            .iter()
            .filter(|group| group.matches(path))
            .max_by_key(|group| group.prefix.trim_end_matches('/').len())
    }

    /// Get a group by name.
    pub fn get(&self, name: &str) -> Option<&RouteGroupRule> {
        self.groups.iter().find(|group| group.name == name)
    }
}

/// The route groups served by the department backend.
fn default_groups() -> Vec<RouteGroupRule> {
    vec![
        default_group("auth", "/auth", 30_000, 1, 5 * 60),
        default_group("departments", "/api/v1/departments", 5_000, 2, 10 * 60),
        default_group("users", "/api/v1/users", 1_000, 10, 15 * 60),
        default_group("dataredis", "/api/v1/dataredis", 3_000, 5, 10 * 60),
    ]
}

fn default_group(
    name: &str,
    prefix: &str,
    refill_interval_ms: u64,
    burst: u32,
    idle_ttl_secs: u64,
) -> RouteGroupRule {
    RouteGroupRule {
        name: name.to_string(),
        prefix: prefix.to_string(),
        refill_interval_ms,
        burst,
        idle_ttl_secs,
    }
}
