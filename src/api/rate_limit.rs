//! Rate limiting for the JSON API and for second-factor attempts.
//!
//! Fixed windows keyed by client address. The limiter sits behind a trait so a
//! shared store can replace the in-process map when running several instances.

use axum::{
    extract::{Extension, Request},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tracing::warn;

use super::state::AuthState;

pub const API_PREFIX: &str = "/api";
const ANONYMOUS_KEY: &str = "anonymous";
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Api,
    MfaVerify,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limited: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch milliseconds at which the current window ends.
    pub reset_at_ms: i64,
}

impl RateLimitStatus {
    #[must_use]
    pub fn retry_after_seconds(&self, now_ms: i64) -> i64 {
        let remaining_ms = (self.reset_at_ms - now_ms).max(0);
        (remaining_ms + 999) / 1000
    }
}

pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str, action: RateLimitAction) -> RateLimitStatus;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _key: &str, _action: RateLimitAction) -> RateLimitStatus {
        RateLimitStatus {
            limited: false,
            limit: u32::MAX,
            remaining: u32::MAX,
            reset_at_ms: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

#[derive(Clone, Copy, Debug)]
struct Window {
    count: u32,
    started_ms: i64,
}

#[derive(Debug)]
pub struct FixedWindowLimiter {
    api: RateLimitPolicy,
    mfa_verify: RateLimitPolicy,
    windows: Mutex<HashMap<(RateLimitAction, String), Window>>,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(api: RateLimitPolicy, mfa_verify: RateLimitPolicy) -> Self {
        Self {
            api,
            mfa_verify,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn policy(&self, action: RateLimitAction) -> RateLimitPolicy {
        match action {
            RateLimitAction::Api => self.api,
            RateLimitAction::MfaVerify => self.mfa_verify,
        }
    }

    fn check_at(&self, key: &str, action: RateLimitAction, now_ms: i64) -> RateLimitStatus {
        let policy = self.policy(action);
        let window_ms = policy.window_ms();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|(entry_action, _), window| {
                now_ms - window.started_ms <= self.policy(*entry_action).window_ms()
            });
        }

        let window = windows
            .entry((action, key.to_string()))
            .or_insert(Window {
                count: 0,
                started_ms: now_ms,
            });
        if now_ms - window.started_ms > window_ms {
            window.count = 0;
            window.started_ms = now_ms;
        }
        window.count = window.count.saturating_add(1);

        RateLimitStatus {
            limited: window.count > policy.limit,
            limit: policy.limit,
            remaining: policy.limit.saturating_sub(window.count),
            reset_at_ms: window.started_ms.saturating_add(window_ms),
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str, action: RateLimitAction) -> RateLimitStatus {
        self.check_at(key, action, Utc::now().timestamp_millis())
    }
}

/// Extract a client key for rate limiting from common proxy headers.
pub(crate) fn client_key(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(|| ANONYMOUS_KEY.to_string(), str::to_string)
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: impl ToString) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

pub(crate) fn apply_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    insert_header(headers, "x-ratelimit-limit", status.limit);
    insert_header(headers, "x-ratelimit-remaining", status.remaining);
    insert_header(headers, "x-ratelimit-reset", status.reset_at_ms);
}

/// `429 Too Many Requests` with the window headers and `Retry-After`.
pub(crate) fn limited_response(status: &RateLimitStatus) -> Response {
    let mut response = (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
    let headers = response.headers_mut();
    apply_headers(headers, status);
    insert_header(
        headers,
        "retry-after",
        status.retry_after_seconds(Utc::now().timestamp_millis()),
    );
    response
}

fn is_api_path(path: &str) -> bool {
    path == API_PREFIX
        || path
            .strip_prefix(API_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Middleware limiting every `/api` request per client.
pub async fn limit_api(
    Extension(state): Extension<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    if !is_api_path(request.uri().path()) {
        return next.run(request).await;
    }
    let key = client_key(request.headers());
    let status = state.rate_limiter().check(&key, RateLimitAction::Api);
    if status.limited {
        warn!(client = %key, path = request.uri().path(), "API rate limit exceeded");
        return limited_response(&status);
    }
    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &status);
    response
}
