// src/server/middleware.rs

//! HTTP middleware: the token-bucket rate limiter and the response header
//! advertising the effective body-size limit.

use crate::core::SignalsdError;
use crate::server::state::AppState;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

pub const MAX_REQUEST_SIZE_HEADER: &str = "x-max-request-size";

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A process-wide token bucket: capacity is the burst allowance, refilled at
/// the steady rate.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(rps: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            refill_per_sec: f64::from(rps),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.rate_limiter.try_acquire() {
        return SignalsdError::RateLimited.into_response();
    }
    next.run(request).await
}

/// Stamps `X-Max-Request-Size` on responses so clients can discover the
/// effective limit. A value set by an inner (per-route) layer wins over the
/// group default.
pub async fn advertise_body_limit(request: Request, next: Next, limit: usize) -> Response {
    let mut response = next.run(request).await;
    let name = HeaderName::from_static(MAX_REQUEST_SIZE_HEADER);
    if !response.headers().contains_key(&name)
        && let Ok(value) = HeaderValue::from_str(&limit.to_string())
    {
        response.headers_mut().insert(name, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_exhausts_then_refills() {
        let limiter = RateLimiter::new(1000, 3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        // The burst is spent; at 1000 rps the next token arrives within a
        // millisecond, so only an immediate fourth call can fail.
        let _ = limiter.try_acquire();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(limiter.try_acquire());
    }
}
