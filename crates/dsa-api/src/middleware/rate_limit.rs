//! # Tiered Rate Limiting
//!
//! Fixed-window request quotas, one [`RateLimiter`] per tier:
//!
//! | Tier | Default | Key |
//! |---|---|---|
//! | general | 100 / 15 min | caller identity, else client address |
//! | auth | 10 / 15 min | as general |
//! | otp | 3 / 1 min | phone number from body or path, else as general |
//! | external | 20 / 5 min | as general |
//!
//! Counters live behind the [`CounterStore`] trait. The in-process
//! [`InMemoryCounterStore`] is the default; a shared store can replace it
//! without touching the middleware. Keys are prefixed with the tier name so
//! tiers never share a counter.
//!
//! Every response from a limited route carries `RateLimit-Limit`,
//! `RateLimit-Remaining` and `RateLimit-Reset`. A rejected request gets 429
//! with a `Retry-After` header and never reaches the handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{RawPathParams, Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use serde_json::Value;

use crate::auth::AuthContext;
use crate::config::RateLimitSettings;
use crate::error::AppError;
use crate::middleware::client_ip::client_ip_string;
use crate::middleware::MAX_BODY_BYTES;

/// Quota for one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests accepted per key per window.
    pub max_requests: u64,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

/// Counter state after one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Hits in the current window, including this one.
    pub count: u64,
    /// Time until the window resets.
    pub reset_after: Duration,
}

/// Backing store for rate-limit counters.
///
/// `hit` must increment and read atomically per key.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    async fn hit(&self, key: &str, window: Duration) -> WindowCount;
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    window_start: Instant,
    window: Duration,
}

impl Bucket {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_start) >= self.window
    }
}

/// Default cap on live keys held by [`InMemoryCounterStore`].
pub const DEFAULT_MAX_KEYS: usize = 100_000;

/// Default minimum spacing between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Buckets {
    map: HashMap<String, Bucket>,
    last_sweep: Instant,
}

/// Process-local fixed-window counters.
///
/// Expired buckets are swept at most once per sweep interval. When the key
/// cap is reached and nothing has expired, the bucket with the oldest window
/// is evicted to make room.
#[derive(Debug)]
pub struct InMemoryCounterStore {
    buckets: Mutex<Buckets>,
    max_keys: usize,
    sweep_interval: Duration,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_KEYS, DEFAULT_SWEEP_INTERVAL)
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_keys: usize, sweep_interval: Duration) -> Self {
        Self {
            buckets: Mutex::new(Buckets {
                map: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            max_keys: max_keys.max(1),
            sweep_interval,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.buckets.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> WindowCount {
        let mut guard = self.buckets.lock();
        let buckets = &mut *guard;
        let now = Instant::now();

        if now.duration_since(buckets.last_sweep) >= self.sweep_interval {
            buckets.map.retain(|_, b| !b.expired(now));
            buckets.last_sweep = now;
        }

        if !buckets.map.contains_key(key) && buckets.map.len() >= self.max_keys {
            let oldest = buckets
                .map
                .iter()
                .min_by_key(|(_, b)| b.window_start)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                buckets.map.remove(&oldest);
            }
        }

        let bucket = buckets.map.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            window_start: now,
            window,
        });

        if bucket.expired(now) {
            bucket.count = 0;
            bucket.window_start = now;
            bucket.window = window;
        }

        bucket.count += 1;
        WindowCount {
            count: bucket.count,
            reset_after: bucket.window.saturating_sub(now.duration_since(bucket.window_start)),
        }
    }
}

/// Rate-limit tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitTier {
    General,
    Auth,
    Otp,
    External,
}

impl LimitTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Auth => "auth",
            Self::Otp => "otp",
            Self::External => "external",
        }
    }

    /// Error code returned when this tier rejects a request.
    pub fn code(&self) -> &'static str {
        match self {
            Self::General => "RATE_LIMIT_EXCEEDED",
            Self::Auth => "AUTH_RATE_LIMIT_EXCEEDED",
            Self::Otp => "OTP_RATE_LIMIT_EXCEEDED",
            Self::External => "EXTERNAL_API_RATE_LIMIT_EXCEEDED",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::General => "Too many requests, please try again later",
            Self::Auth => "Too many authentication attempts, please try again later",
            Self::Otp => "Too many OTP requests. Please wait before requesting again",
            Self::External => "Too many verification requests, please try again later",
        }
    }
}

/// Outcome of one limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_secs: u64,
}

/// A single tier's limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    tier: LimitTier,
    config: RateLimitConfig,
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(tier: LimitTier, config: RateLimitConfig, store: Arc<dyn CounterStore>) -> Self {
        Self {
            tier,
            config,
            store,
        }
    }

    pub fn tier(&self) -> LimitTier {
        self.tier
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request against `key` and decide whether it may proceed.
    pub async fn check(&self, key: &str) -> Decision {
        let namespaced = format!("{}:{key}", self.tier.as_str());
        let hit = self.store.hit(&namespaced, self.config.window).await;
        let reset_secs = hit.reset_after.as_secs() + u64::from(hit.reset_after.subsec_nanos() > 0);
        Decision {
            allowed: hit.count <= self.config.max_requests,
            limit: self.config.max_requests,
            remaining: self.config.max_requests.saturating_sub(hit.count),
            reset_secs,
        }
    }

    fn rejection(&self) -> AppError {
        let err = AppError::too_many_requests(self.tier.message()).with_code(self.tier.code());
        match self.tier {
            LimitTier::Otp => err.with_retry_after(self.config.window.as_secs()),
            _ => err,
        }
    }
}

/// One limiter per tier, all sharing one counter store.
#[derive(Debug, Clone)]
pub struct Limiters {
    pub general: RateLimiter,
    pub auth: RateLimiter,
    pub otp: RateLimiter,
    pub external: RateLimiter,
}

impl Limiters {
    pub fn new(settings: &RateLimitSettings, store: Arc<dyn CounterStore>) -> Self {
        Self {
            general: RateLimiter::new(LimitTier::General, settings.general.clone(), store.clone()),
            auth: RateLimiter::new(LimitTier::Auth, settings.auth.clone(), store.clone()),
            otp: RateLimiter::new(LimitTier::Otp, settings.otp.clone(), store.clone()),
            external: RateLimiter::new(LimitTier::External, settings.external.clone(), store),
        }
    }

    pub fn in_memory(settings: &RateLimitSettings) -> Self {
        Self::new(settings, Arc::new(InMemoryCounterStore::new()))
    }
}

fn identity_key(request: &Request) -> String {
    match request.extensions().get::<AuthContext>() {
        Some(ctx) => format!("user:{}", ctx.user_id),
        None => format!("ip:{}", client_ip_string(request.extensions())),
    }
}

fn phone_from_json(bytes: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    match value.get("phone")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Middleware enforcing one tier. Install with
/// `axum::middleware::from_fn_with_state(limiter, rate_limit_middleware)`.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    path_params: Option<RawPathParams>,
    request: Request,
    next: Next,
) -> Response {
    let (key, request) = match limiter.tier {
        LimitTier::Otp => {
            let from_path = path_params.as_ref().and_then(|params| {
                params
                    .iter()
                    .find(|(name, _)| *name == "phone")
                    .map(|(_, value)| value.trim().to_string())
            });
            let (parts, body) = request.into_parts();
            let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    return AppError::payload_too_large("Request body too large").into_response()
                }
            };
            let phone = from_path.or_else(|| phone_from_json(&bytes));
            let request = Request::from_parts(parts, Body::from(bytes));
            let key = match phone {
                Some(phone) => format!("phone:{phone}"),
                None => identity_key(&request),
            };
            (key, request)
        }
        _ => (identity_key(&request), request),
    };

    let decision = limiter.check(&key).await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!(
            tier = limiter.tier.as_str(),
            key = %key,
            "rate limit exceeded"
        );
        let mut response = limiter.rejection().into_response();
        response.headers_mut().insert(
            axum::http::header::RETRY_AFTER,
            HeaderValue::from(limiter.config.window.as_secs()),
        );
        response
    };

    // Nested tiers: the innermost limiter that ran owns the headers.
    let headers = response.headers_mut();
    if !headers.contains_key("ratelimit-limit") {
        headers.insert(
            HeaderName::from_static("ratelimit-limit"),
            HeaderValue::from(decision.limit),
        );
        headers.insert(
            HeaderName::from_static("ratelimit-remaining"),
            HeaderValue::from(decision.remaining),
        );
        headers.insert(
            HeaderName::from_static("ratelimit-reset"),
            HeaderValue::from(decision.reset_secs),
        );
    }
    response
}
