//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// One bucket per caller, keyed by the presented credentials
pub type CallerRateLimiter = DefaultKeyedRateLimiter<String>;

/// Create a new rate limiter; zero values fall back to one request
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Arc<CallerRateLimiter> {
    let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(per_second);
    let quota = Quota::per_second(per_second).allow_burst(burst);

    Arc::new(RateLimiter::keyed(quota))
}

fn caller_key(request: &Request) -> String {
    request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    request: Request,
    next: Next,
    limiter: Arc<CallerRateLimiter>,
) -> Result<Response, StatusCode> {
    match limiter.check_key(&caller_key(&request)) {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            Err(StatusCode::TOO_MANY_REQUESTS)
        }
    }
}
