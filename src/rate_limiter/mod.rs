//! Fixed-window request limiter.
//!
//! Counters live in-process in a [`DashMap`]; the storefront runs as a
//! single instance, so there is no shared backend. Keys are client IPs as
//! reported by the proxy headers, and per-path policies let the checkout
//! and tracking endpoints run tighter windows than the rest of the API.

use axum::extract::Request;
use axum::http::{HeaderValue, Response, StatusCode};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

fn num_to_header_value<T: ToString>(n: T) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

#[derive(Debug, Clone)]
struct WindowEntry {
    count: u32,
    window_start: Instant,
}

impl WindowEntry {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }

    /// Counts one request against the window, resetting it first if it has
    /// expired. Returns the count after the increment.
    fn hit(&mut self, window: Duration) -> u32 {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= window {
            self.count = 0;
            self.window_start = now;
        }
        self.count += 1;
        self.count
    }

    fn time_until_reset(&self, window: Duration) -> Duration {
        window.saturating_sub(self.window_start.elapsed())
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window_duration: Duration,
    pub enable_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            window_duration: Duration::from_secs(60),
            enable_headers: true,
        }
    }
}

#[derive(Debug)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

/// A tighter limit for one path prefix. The first matching prefix wins, so
/// more specific prefixes must come first in configuration.
#[derive(Clone, Debug)]
pub struct PathPolicy {
    pub prefix: String,
    pub requests_per_window: u32,
    pub window_duration: Duration,
}

#[derive(Clone)]
pub struct RateLimiter {
    entries: Arc<DashMap<String, WindowEntry>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn check(&self, key: &str) -> RateLimitResult {
        self.check_with(key, &self.config)
    }

    /// Checks `key` against `config`, sharing the same counter store so a
    /// path policy and the global limit see one count per client.
    pub fn check_with(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(WindowEntry::new);

        let count = entry.hit(config.window_duration);
        let allowed = count <= config.requests_per_window;
        RateLimitResult {
            allowed,
            limit: config.requests_per_window,
            remaining: config.requests_per_window.saturating_sub(count),
            reset_after: entry.time_until_reset(config.window_duration),
        }
    }

    /// Drops counters whose window has passed. Run periodically; correctness
    /// does not depend on it, only memory use.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let window = self.config.window_duration;
        self.entries
            .retain(|_, entry| now.duration_since(entry.window_start) < window);
    }
}

/// Derives the limiter key for a request. Behind the proxy the client IP
/// arrives in `x-forwarded-for` (first hop) or `x-real-ip`.
pub fn extract_ip_key(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(ip) = value.split(',').next() {
                let ip = ip.trim();
                if !ip.is_empty() {
                    return format!("ip:{}", ip);
                }
            }
        }
    }
    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip) = real_ip.to_str() {
            return format!("ip:{}", ip.trim());
        }
    }
    "ip:unknown".to_string()
}

#[derive(Debug, Error)]
pub enum PolicyParseError {
    #[error("expected 'prefix:limit:window_secs', got {parts} parts in '{spec}'")]
    InvalidFormat { spec: String, parts: usize },
    #[error("path prefix must start with '/': got '{path}'")]
    InvalidPathFormat { path: String },
    #[error("invalid limit in '{spec}': {reason}")]
    InvalidLimit { spec: String, reason: String },
    #[error("invalid window in '{spec}': {reason}")]
    InvalidWindow { spec: String, reason: String },
    #[error("limit and window must both be at least 1")]
    OutOfRange,
    #[error("empty policy specification")]
    EmptySpec,
}

/// Parses one `prefix:limit:window_secs` policy, e.g. `/api/v1/orders:20:60`.
pub fn parse_path_policy(spec: &str) -> Result<PathPolicy, PolicyParseError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(PolicyParseError::EmptySpec);
    }

    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() != 3 {
        return Err(PolicyParseError::InvalidFormat {
            spec: spec.to_string(),
            parts: parts.len(),
        });
    }

    let path = parts[0].trim();
    if !path.starts_with('/') {
        return Err(PolicyParseError::InvalidPathFormat {
            path: path.to_string(),
        });
    }

    let limit: u32 = parts[1]
        .trim()
        .parse()
        .map_err(|e| PolicyParseError::InvalidLimit {
            spec: spec.to_string(),
            reason: format!("{}", e),
        })?;
    let window_secs: u64 = parts[2]
        .trim()
        .parse()
        .map_err(|e| PolicyParseError::InvalidWindow {
            spec: spec.to_string(),
            reason: format!("{}", e),
        })?;

    if limit < 1 || window_secs < 1 {
        return Err(PolicyParseError::OutOfRange);
    }

    Ok(PathPolicy {
        prefix: path.to_string(),
        requests_per_window: limit,
        window_duration: Duration::from_secs(window_secs),
    })
}

/// Parses a comma-separated policy list, skipping bad entries with a
/// warning so a typo in configuration never takes the service down.
pub fn parse_path_policies(policies_str: &str) -> (Vec<PathPolicy>, Vec<String>) {
    let mut policies = Vec::new();
    let mut warnings = Vec::new();

    for spec in policies_str
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        match parse_path_policy(spec) {
            Ok(policy) => policies.push(policy),
            Err(e) => warnings.push(format!("Skipping invalid path policy '{}': {}", spec, e)),
        }
    }

    (policies, warnings)
}

#[derive(Clone)]
pub struct RateLimitLayer {
    rate_limiter: RateLimiter,
    path_policies: Arc<Vec<PathPolicy>>,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            rate_limiter: RateLimiter::new(config),
            path_policies: Arc::new(Vec::new()),
        }
    }

    pub fn with_policies(mut self, policies: Vec<PathPolicy>) -> Self {
        self.path_policies = Arc::new(policies);
        self
    }

    /// Handle to the underlying limiter, e.g. for the cleanup task. Clones
    /// share the same counter store.
    pub fn limiter(&self) -> RateLimiter {
        self.rate_limiter.clone()
    }
}

impl<S> tower::Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            rate_limiter: self.rate_limiter.clone(),
            path_policies: self.path_policies.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    rate_limiter: RateLimiter,
    path_policies: Arc<Vec<PathPolicy>>,
}

impl<S> tower::Service<Request> for RateLimitService<S>
where
    S: tower::Service<Request, Response = Response<axum::body::Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<axum::body::Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let rate_limiter = self.rate_limiter.clone();
        let mut inner = self.inner.clone();
        let policies = self.path_policies.clone();

        Box::pin(async move {
            let path = request.uri().path().to_string();
            if path.starts_with("/health") {
                return inner.call(request).await;
            }

            let ip = extract_ip_key(&request);

            // The first matching prefix decides the policy, and its counter
            // is kept separate per prefix so a burst on one endpoint does
            // not consume another endpoint's budget.
            let mut effective = rate_limiter.config().clone();
            let mut key = ip.clone();
            for policy in policies.iter() {
                if path.starts_with(&policy.prefix) {
                    effective.requests_per_window = policy.requests_per_window;
                    effective.window_duration = policy.window_duration;
                    key = format!("{}:{}", policy.prefix, ip);
                    break;
                }
            }

            let result = rate_limiter.check_with(&key, &effective);
            if !result.allowed {
                warn!(%key, %path, "rate limit exceeded");

                let mut response =
                    Response::new(axum::body::Body::from("Too many requests. Please retry shortly."));
                *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;

                let headers = response.headers_mut();
                let retry_secs = result.reset_after.as_secs().max(1);
                headers.insert("Retry-After", num_to_header_value(retry_secs));
                if effective.enable_headers {
                    headers.insert("X-RateLimit-Limit", num_to_header_value(result.limit));
                    headers.insert("X-RateLimit-Remaining", num_to_header_value(0));
                    headers.insert("X-RateLimit-Reset", num_to_header_value(retry_secs));
                }
                return Ok(response);
            }

            let mut response = inner.call(request).await?;
            if effective.enable_headers {
                let headers = response.headers_mut();
                headers.insert("X-RateLimit-Limit", num_to_header_value(result.limit));
                headers.insert(
                    "X-RateLimit-Remaining",
                    num_to_header_value(result.remaining),
                );
                headers.insert(
                    "X-RateLimit-Reset",
                    num_to_header_value(result.reset_after.as_secs()),
                );
            }
            Ok(response)
        })
    }
}

/// Periodically drops expired counters.
pub async fn start_cleanup_task(rate_limiter: RateLimiter, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        rate_limiter.cleanup_expired();
        debug!("rate limiter cleanup completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(limit: u32, window_secs: u64) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_window: limit,
            window_duration: Duration::from_secs(window_secs),
            enable_headers: true,
        }
    }

    #[test]
    fn requests_over_the_limit_are_denied() {
        let limiter = RateLimiter::new(config(2, 60));
        assert!(limiter.check("ip:1.2.3.4").allowed);
        assert!(limiter.check("ip:1.2.3.4").allowed);
        let third = limiter.check("ip:1.2.3.4");
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
    }

    #[test]
    fn keys_are_isolated() {
        let limiter = RateLimiter::new(config(1, 60));
        assert!(limiter.check("ip:1.1.1.1").allowed);
        assert!(limiter.check("ip:2.2.2.2").allowed);
        assert!(!limiter.check("ip:1.1.1.1").allowed);
    }

    #[test]
    fn window_reset_restores_quota() {
        let limiter = RateLimiter::new(config(1, 60));
        let tight = config(1, 0);
        // Zero-length window: every hit starts a fresh window
        assert!(limiter.check_with("ip:9.9.9.9", &tight).allowed);
        assert!(limiter.check_with("ip:9.9.9.9", &tight).allowed);
    }

    #[test]
    fn parse_valid_policy() {
        let policy = parse_path_policy("/api/v1/orders:20:60").unwrap();
        assert_eq!(policy.prefix, "/api/v1/orders");
        assert_eq!(policy.requests_per_window, 20);
        assert_eq!(policy.window_duration, Duration::from_secs(60));
    }

    #[test]
    fn parse_rejects_malformed_policies() {
        assert!(matches!(
            parse_path_policy("/api:20"),
            Err(PolicyParseError::InvalidFormat { .. })
        ));
        assert!(matches!(
            parse_path_policy("api:20:60"),
            Err(PolicyParseError::InvalidPathFormat { .. })
        ));
        assert!(matches!(
            parse_path_policy("/api:zero:60"),
            Err(PolicyParseError::InvalidLimit { .. })
        ));
        assert!(matches!(
            parse_path_policy("/api:20:0"),
            Err(PolicyParseError::OutOfRange)
        ));
    }

    #[test]
    fn parse_list_skips_bad_entries() {
        let (policies, warnings) =
            parse_path_policies("/api/v1/orders/track:40:60,bogus,/api/v1/orders:20:60");
        assert_eq!(policies.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("bogus"));
    }

    #[test]
    fn ip_key_prefers_forwarded_header() {
        let request = Request::builder()
            .uri("/api/v1/orders")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "10.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(extract_ip_key(&request), "ip:203.0.113.7");

        let request = Request::builder()
            .uri("/api/v1/orders")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(extract_ip_key(&request), "ip:unknown");
    }
}
