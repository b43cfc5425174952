//! Admission gate for a protected route group.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::Result;
use crate::http::ApiResponse;

use super::clock::{Clock, SystemClock};
use super::key::{ClientKey, UNKNOWN_CLIENT};
use super::registry::ClientRegistry;
use super::rules::{LimiterConfig, RouteGroupRule};
use super::sweeper::{Sweeper, DEFAULT_SWEEP_INTERVAL};

/// The parts of a request the limiter keys on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// Resolved client address, if any
    pub client_addr: Option<IpAddr>,
    /// HTTP method
    pub method: String,
    /// Request path as received
    pub path: String,
}

impl RequestDescriptor {
    /// Create a new request descriptor.
    pub fn new(client_addr: Option<IpAddr>, method: &str, path: &str) -> Self {
        Self {
            client_addr,
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    /// Derive the rate limit key for this request.
    pub fn client_key(&self) -> ClientKey {
        let addr = self
            .client_addr
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
        ClientKey::new(&addr, &self.method, &self.path)
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone)]
pub enum Admission {
    /// The request may continue down the pipeline
    Allowed,
    /// The request is rejected with the given body
    Denied(ApiResponse),
}

impl Admission {
    /// Whether the request was admitted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Rate limiter for one route group.
///
/// Owns the group's registry and its sweeper. Groups never share a
/// `RouteLimiter`, so one group's traffic cannot drain another's buckets.
#[derive(Debug)]
pub struct RouteLimiter {
    name: String,
    registry: Arc<ClientRegistry>,
    sweeper: Sweeper,
}

impl RouteLimiter {
    /// Create a limiter on the system clock with the default sweep period.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(name: &str, config: LimiterConfig) -> Result<Self> {
        Self::with_clock(name, config, Arc::new(SystemClock), DEFAULT_SWEEP_INTERVAL)
    }

    /// Create a limiter for a configured route group.
    pub fn from_rule(
        rule: &RouteGroupRule,
        clock: Arc<dyn Clock>,
        sweep_interval: Duration,
    ) -> Result<Self> {
        rule.validate()?;
        Self::with_clock(&rule.name, rule.limiter_config(), clock, sweep_interval)
    }

    /// Create a limiter with an explicit clock and sweep period.
    pub fn with_clock(
        name: &str,
        config: LimiterConfig,
        clock: Arc<dyn Clock>,
        sweep_interval: Duration,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(ClientRegistry::new(config, clock));
        let sweeper = Sweeper::spawn(&registry, sweep_interval, config.idle_ttl)?;

        info!(
            group = %name,
            refill_interval = ?config.refill_interval,
            burst = config.burst,
            idle_ttl = ?config.idle_ttl,
            sweep_interval = ?sweep_interval,
            "Route limiter initialized"
        );

        Ok(Self {
            name: name.to_string(),
            registry,
            sweeper,
        })
    }

    /// Decide whether `request` may proceed.
    ///
    /// The client's last-seen time is refreshed whether or not the request
    /// is admitted.
    pub fn check(&self, request: &RequestDescriptor) -> Admission {
        let key = request.client_key();

        if self.registry.admit(&key) {
            return Admission::Allowed;
        }

        debug!(
            group = %self.name,
            key = %key,
            "Rate limit exceeded"
        );
        Admission::Denied(ApiResponse::rate_limited(&request.path))
    }

    /// Get the group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The group's limiter settings.
    pub fn config(&self) -> &LimiterConfig {
        self.registry.config()
    }

    /// The group's client registry.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Get the number of tracked clients.
    pub fn tracked_clients(&self) -> usize {
        self.registry.len()
    }

    /// Whether the idle-client sweeper is still running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper.is_running()
    }

    /// Stop the background sweeper and wait for it to exit.
    pub async fn shutdown(&self) {
        self.sweeper.stop().await;
        info!(group = %self.name, "Route limiter stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::net::Ipv4Addr;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100));

    fn limiter(
        refill: Duration,
        burst: u32,
        idle_ttl: Duration,
    ) -> (RouteLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = LimiterConfig::new(refill, burst, idle_ttl);
        let limiter =
            RouteLimiter::with_clock("test", config, clock.clone(), Duration::from_secs(60))
                .unwrap();
        (limiter, clock)
    }

    fn assert_rate_limited(admission: &Admission, path: &str) {
        let Admission::Denied(body) = admission else {
            panic!("expected a denial, got {:?}", admission);
        };
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json["message"], "Rate limit exceeded");
        assert_eq!(
            json["error"],
            "You have exceeded the rate limit. Please try again later."
        );
        assert_eq!(json["path"], path);
        assert_eq!(json["status"], 429);
        assert!(json["data"].is_null());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_descriptor_key_uses_unknown_without_address() {
        let request = RequestDescriptor::new(None, "GET", "/a");
        assert_eq!(request.client_key().addr, UNKNOWN_CLIENT);
    }

    #[test]
    fn test_new_requires_runtime() {
        let config = LimiterConfig::new(Duration::from_secs(1), 1, Duration::from_secs(1));
        assert!(RouteLimiter::new("test", config).is_err());
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let config = LimiterConfig::new(Duration::from_secs(1), 0, Duration::from_secs(1));
        assert!(RouteLimiter::new("test", config).is_err());
    }

    #[tokio::test]
    async fn test_login_scenario() {
        // Auth group: one request every 30 seconds, burst 1, 5 minute TTL
        let (limiter, clock) = limiter(Duration::from_secs(30), 1, Duration::from_secs(300));
        let login = RequestDescriptor::new(Some(CLIENT), "POST", "/auth/login");

        assert!(limiter.check(&login).is_allowed());

        clock.advance(Duration::from_secs(10));
        assert_rate_limited(&limiter.check(&login), "/auth/login");

        clock.advance(Duration::from_secs(30));
        assert!(limiter.check(&login).is_allowed());

        limiter.shutdown().await;
    }

    #[tokio::test]
    async fn test_department_read_scenario() {
        // Department group: one request every 5 seconds, burst 2, 10 minute TTL
        let (limiter, clock) = limiter(Duration::from_secs(5), 2, Duration::from_secs(600));
        let read = RequestDescriptor::new(Some(CLIENT), "GET", "/api/v1/departments");

        assert!(limiter.check(&read).is_allowed());
        assert!(limiter.check(&read).is_allowed());
        assert_rate_limited(&limiter.check(&read), "/api/v1/departments");

        clock.advance(Duration::from_secs(5));
        assert!(limiter.check(&read).is_allowed());
        assert!(!limiter.check(&read).is_allowed());

        limiter.shutdown().await;
    }

    #[tokio::test]
    async fn test_method_and_path_are_limited_separately() {
        let (limiter, _) = limiter(Duration::from_secs(60), 1, Duration::from_secs(600));

        let get = RequestDescriptor::new(Some(CLIENT), "GET", "/api/v1/departments/1");
        let put = RequestDescriptor::new(Some(CLIENT), "PUT", "/api/v1/departments/1");
        let other = RequestDescriptor::new(Some(CLIENT), "GET", "/api/v1/departments/2");

        assert!(limiter.check(&get).is_allowed());
        assert!(!limiter.check(&get).is_allowed());
        assert!(limiter.check(&put).is_allowed());
        assert!(limiter.check(&other).is_allowed());
        assert_eq!(limiter.tracked_clients(), 3);

        limiter.shutdown().await;
    }

    #[tokio::test]
    async fn test_trailing_slash_shares_bucket() {
        let (limiter, _) = limiter(Duration::from_secs(60), 1, Duration::from_secs(600));

        let bare = RequestDescriptor::new(Some(CLIENT), "GET", "/api/v1/users");
        let slashed = RequestDescriptor::new(Some(CLIENT), "GET", "/api/v1/users/");

        assert!(limiter.check(&bare).is_allowed());
        // The rejection still reports the path as received
        assert_rate_limited(&limiter.check(&slashed), "/api/v1/users/");

        limiter.shutdown().await;
    }

    #[tokio::test]
    async fn test_denial_refreshes_last_seen() {
        let (limiter, clock) = limiter(Duration::from_secs(3600), 1, Duration::from_secs(60));
        let request = RequestDescriptor::new(Some(CLIENT), "GET", "/a");
        let key = request.client_key();

        assert!(limiter.check(&request).is_allowed());
        clock.advance(Duration::from_secs(50));
        assert!(!limiter.check(&request).is_allowed());

        // 70s after creation but only 20s after the denied request
        clock.advance(Duration::from_secs(20));
        let removed = limiter.registry().sweep(Duration::from_secs(60), clock.now());
        assert_eq!(removed, 0);
        assert!(limiter.registry().contains(&key));

        limiter.shutdown().await;
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let clock = Arc::new(ManualClock::new());
        let config = LimiterConfig::new(Duration::from_secs(60), 1, Duration::from_secs(600));
        let auth =
            RouteLimiter::with_clock("auth", config, clock.clone(), Duration::from_secs(60)).unwrap();
        let users =
            RouteLimiter::with_clock("users", config, clock.clone(), Duration::from_secs(60)).unwrap();

        let request = RequestDescriptor::new(Some(CLIENT), "GET", "/shared");
        assert!(auth.check(&request).is_allowed());
        assert!(!auth.check(&request).is_allowed());
        assert!(users.check(&request).is_allowed());

        auth.shutdown().await;
        users.shutdown().await;
    }

    #[tokio::test]
    async fn test_from_rule() {
        let rule = RouteGroupRule::new(
            "departments",
            "/api/v1/departments",
            Duration::from_secs(5),
            2,
            Duration::from_secs(600),
        )
        .unwrap();
        let limiter = RouteLimiter::from_rule(
            &rule,
            Arc::new(ManualClock::new()),
            Duration::from_secs(60),
        )
        .unwrap();

        assert_eq!(limiter.name(), "departments");
        assert_eq!(limiter.config().burst, 2);
        assert!(limiter.is_sweeping());

        limiter.shutdown().await;
        assert!(!limiter.is_sweeping());
    }
}
