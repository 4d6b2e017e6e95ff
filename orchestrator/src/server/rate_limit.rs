use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::err::ApiError;

/// Fixed-window request counter shared by all workers.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    started_at: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> RateLimiter {
        RateLimiter {
            limit,
            window,
            state: Mutex::new(Window {
                started_at: Instant::now(),
                count: 0,
            }),
        }
    }

    pub fn per_minute(limit: u32) -> RateLimiter {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Count one request at `now`. Returns whether it is allowed.
    pub fn check_at(&self, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        let mut window = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if now.duration_since(window.started_at) >= self.window {
            window.started_at = now;
            window.count = 0;
        }
        if window.count >= self.limit {
            return false;
        }
        window.count += 1;
        true
    }

    pub fn check(&self) -> bool {
        self.check_at(Instant::now())
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    if !limiter.check() {
        tracing::warn!(uri = %req.uri(), "Rate limit exceeded");
        return ApiError::RateLimited.into_response();
    }
    next.run(req).await
}
