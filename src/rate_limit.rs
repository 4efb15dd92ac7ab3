use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::{net::IpAddr, num::NonZeroU32, sync::Arc};
use tracing::warn;

// SECURITY: Rate limiting configuration, keyed per client IP.
pub const REQUESTS_PER_MINUTE: u32 = 60; // Allow 60 requests per minute per IP
pub const TASK_REQUESTS_PER_MINUTE: u32 = 10; // More restrictive for requirement/task submission

type KeyedLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub general_limiter: Arc<KeyedLimiter>,
    pub task_limiter: Arc<KeyedLimiter>,
}

impl RateLimitConfig {
    pub fn new() -> Self {
        let general_quota = Quota::per_minute(NonZeroU32::new(REQUESTS_PER_MINUTE).unwrap());
        let task_quota = Quota::per_minute(NonZeroU32::new(TASK_REQUESTS_PER_MINUTE).unwrap());

        Self {
            general_limiter: Arc::new(RateLimiter::keyed(general_quota)),
            task_limiter: Arc::new(RateLimiter::keyed(task_quota)),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn is_restricted(path: &str, method: &axum::http::Method) -> bool {
    method == axum::http::Method::POST && (path.starts_with("/requirements") || path.starts_with("/tasks"))
}

/// Enforces the per-IP general quota on every request, and the stricter
/// task quota on requirement/task submission on top of it.
pub async fn rate_limit_middleware(
    State(limits): State<RateLimitConfig>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let ip = addr.ip();
    let path = request.uri().path().to_string();
    let method = request.method().clone();

    if limits.general_limiter.check_key(&ip).is_err() {
        warn!("rate limit exceeded for {} on {}", ip, path);
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    if is_restricted(&path, &method) && limits.task_limiter.check_key(&ip).is_err() {
        warn!("task submission rate limit exceeded for {} on {}", ip, path);
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ip_passes_both_limiters() {
        let config = RateLimitConfig::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(config.general_limiter.check_key(&ip).is_ok());
        assert!(config.task_limiter.check_key(&ip).is_ok());
    }

    #[test]
    fn task_quota_exhausts_before_general_quota() {
        let config = RateLimitConfig::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        for _ in 0..TASK_REQUESTS_PER_MINUTE {
            assert!(config.task_limiter.check_key(&ip).is_ok());
        }
        assert!(config.task_limiter.check_key(&ip).is_err());
        assert!(config.general_limiter.check_key(&ip).is_ok());
    }

    #[test]
    fn restricted_paths_match_post_only() {
        assert!(is_restricted("/tasks", &axum::http::Method::POST));
        assert!(is_restricted("/requirements", &axum::http::Method::POST));
        assert!(!is_restricted("/tasks", &axum::http::Method::GET));
        assert!(!is_restricted("/agents", &axum::http::Method::POST));
    }
}
