//! Route group wiring.
//!
//! Every configured group gets its own [`RouteLimiter`]; its routes are
//! wrapped in the [`rate_limit`] middleware so over-limit requests never reach
//! the group's handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{OriginalUri, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{any, get};
use axum::Router;
use serde_json::json;
use tracing::info;

use tower_http::compression::CompressionLayer;

use super::headers::{cors_layer, with_security_headers};
use super::middleware::{
    preflight_no_content, rate_limit, request_id, request_log, ClientAddrSource,
    RateLimitState, RequestLogState,
};
use super::response::ApiResponse;
use crate::error::Result;
use crate::ratelimit::{Clock, RouteGroupRule, RouteLimiter, RouteRules};

/// A configured route group and its limiter.
#[derive(Debug, Clone)]
pub struct RouteGroup {
    /// The group's rule
    pub rule: RouteGroupRule,
    /// The group's limiter
    pub limiter: Arc<RouteLimiter>,
}

/// All protected route groups of the service.
#[derive(Debug)]
pub struct RouteGroups {
    groups: Vec<RouteGroup>,
    rules: Arc<RouteRules>,
    addr_source: ClientAddrSource,
}

impl RouteGroups {
    /// Build one limiter per group. Must be called from within a Tokio runtime.
    pub fn build(
        rules: RouteRules,
        clock: Arc<dyn Clock>,
        sweep_interval: Duration,
        addr_source: ClientAddrSource,
    ) -> Result<Self> {
        rules.validate()?;

        let mut groups = Vec::with_capacity(rules.groups.len());
        for rule in &rules.groups {
            let limiter = RouteLimiter::from_rule(rule, Arc::clone(&clock), sweep_interval)?;
            info!(group = %rule.name, prefix = %rule.prefix, "Registered route group");
            groups.push(RouteGroup {
                rule: rule.clone(),
                limiter: Arc::new(limiter),
            });
        }

        Ok(Self {
            groups,
            rules: Arc::new(rules),
            addr_source,
        })
    }

    /// Get a group by name.
    pub fn get(&self, name: &str) -> Option<&RouteGroup> {
        self.groups.iter().find(|group| group.rule.name == name)
    }

    /// Iterate over the groups.
    pub fn iter(&self) -> impl Iterator<Item = &RouteGroup> {
        self.groups.iter()
    }

    /// Wrap the routes of `router` in the named group's rate limiter.
    ///
    /// `router` must already contain its routes. Returns `None` for an
    /// unknown group.
    pub fn protect<S>(&self, name: &str, router: Router<S>) -> Option<Router<S>>
    where
        S: Clone + Send + Sync + 'static,
    {
        let group = self.get(name)?;
        Some(self.protect_group(group, router))
    }

    fn protect_group<S>(&self, group: &RouteGroup, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let state = RateLimitState {
            limiter: Arc::clone(&group.limiter),
            addr_source: self.addr_source,
        };
        router.route_layer(from_fn_with_state(state, rate_limit))
    }

    /// The service router.
    ///
    /// Each group is mounted at its prefix with a handler that acknowledges
    /// admitted requests; the handlers behind the groups live in the host
    /// application. Unknown paths answer with a 404 envelope and do not
    /// consume tokens.
    ///
    /// Outermost first, every request passes security headers, CORS (which
    /// answers preflights with 204), request id, request log and gzip
    /// compression before reaching a group.
    pub fn router(&self) -> Router {
        let mut router =
            Router::new().route("/health", get(health).fallback(method_not_allowed));

        for group in &self.groups {
            router = router.merge(self.protect_group(group, group_routes(&group.rule)));
        }

        let log_state = RequestLogState {
            rules: Arc::clone(&self.rules),
            addr_source: self.addr_source,
        };

        let router = router
            .fallback(not_found)
            .layer(CompressionLayer::new())
            .layer(from_fn_with_state(log_state, request_log))
            .layer(from_fn(request_id))
            .layer(cors_layer())
            .layer(from_fn(preflight_no_content));

        with_security_headers(router)
    }

    /// Stop every group's sweeper.
    pub async fn shutdown(&self) {
        for group in &self.groups {
            group.limiter.shutdown().await;
        }
    }
}

fn group_routes(rule: &RouteGroupRule) -> Router {
    let prefix = rule.prefix.trim_end_matches('/');
    let name: Arc<str> = Arc::from(rule.name.as_str());

    let (exact, nested) = if prefix.is_empty() {
        ("/".to_string(), "/*rest".to_string())
    } else {
        (prefix.to_string(), format!("{}/*rest", prefix))
    };

    Router::new()
        .route(&exact, any(admitted))
        .route(&nested, any(admitted))
        .with_state(name)
}

async fn admitted(
    State(group): State<Arc<str>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
) -> ApiResponse {
    ApiResponse::success(
        StatusCode::OK,
        "Request admitted",
        uri.path(),
        json!({ "group": group.as_ref(), "method": method.as_str() }),
    )
}

async fn health(OriginalUri(uri): OriginalUri) -> ApiResponse {
    ApiResponse::success(StatusCode::OK, "OK", uri.path(), json!({ "status": "up" }))
}

async fn not_found(OriginalUri(uri): OriginalUri) -> ApiResponse {
    ApiResponse::not_found(uri.path())
}

async fn method_not_allowed(OriginalUri(uri): OriginalUri) -> ApiResponse {
    ApiResponse::method_not_allowed(uri.path())
}
