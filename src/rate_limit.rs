//! Rate limiting for the login endpoint.
//!
//! Uses a token bucket per client IP so password guessing from one address
//! is throttled without affecting other clients.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::api::ApiError;

/// Default login attempts allowed per IP per minute.
pub const DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE: u32 = 10;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Login rate limiter shared by every login route.
#[derive(Clone)]
pub struct LoginRateLimit {
    limiter: Arc<IpLimiter>,
}

impl LoginRateLimit {
    /// Allow `per_minute` attempts per IP, all of which may be spent at once.
    /// Zero is treated as one.
    pub fn per_minute(per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
        }
    }

    pub fn check(&self, ip: &str) -> bool {
        self.limiter.check_key(&ip.to_string()).is_ok()
    }
}

impl Default for LoginRateLimit {
    fn default() -> Self {
        Self::per_minute(DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE)
    }
}

/// Client address: first `X-Forwarded-For` entry, then the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware rejecting login attempts over the per-IP quota.
pub async fn rate_limit_login(
    State(limit): State<LoginRateLimit>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let ip = client_ip(request.headers(), peer);

    if limit.check(&ip) {
        next.run(request).await
    } else {
        warn!(ip = %ip, "Login rate limit exceeded");
        ApiError::TooManyRequests.into_response()
    }
}
