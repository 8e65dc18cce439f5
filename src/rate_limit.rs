//! Fixed-window request quotas per caller.
//!
//! Each caller identity gets a counter under `rate-limit:<identity>`. Every
//! request increments it and asks for a time-to-live of one window with
//! `EXPIRE … NX`, so the first request of a window starts the clock and a
//! counter never outlives a missed expiry. Requests beyond the limit are
//! refused until it expires. The reported reset time is the end of the
//! current aligned window (`now - now % interval + interval`).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

/// Outcome of one quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub success: bool,
    pub limit: u64,
    pub remaining: u64,
    /// End of the current window, unix seconds.
    pub reset: u64,
}

impl RateLimitDecision {
    fn from_count(count: u64, config: &RateLimitConfig, now: u64) -> Self {
        Self {
            success: count <= config.limit,
            limit: config.limit,
            remaining: config.limit.saturating_sub(count),
            reset: window_start(now, config.interval_secs) + config.interval_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Rate-limit store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Rate-limit store returned an error: {0}")]
    Store(String),
}

/// Counts requests per identity.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, identity: &str) -> Result<RateLimitDecision, RateLimitError>;
}

fn counter_key(identity: &str) -> String {
    format!("rate-limit:{identity}")
}

fn window_start(now: u64, interval: u64) -> u64 {
    now - now % interval.max(1)
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

// ── Upstash (Redis over REST) ────────────────────────────────────────────

/// [`RateLimiter`] backed by an Upstash-compatible Redis REST endpoint.
#[derive(Debug, Clone)]
pub struct UpstashRateLimiter {
    http: reqwest::Client,
    url: String,
    token: String,
    config: RateLimitConfig,
}

/// One entry of a `/pipeline` reply.
#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl CommandResponse {
    fn into_result(self) -> Result<Value, RateLimitError> {
        match (self.result, self.error) {
            (_, Some(err)) => Err(RateLimitError::Store(err)),
            (Some(result), None) => Ok(result),
            (None, None) => Err(RateLimitError::Store("empty response".into())),
        }
    }
}

impl UpstashRateLimiter {
    pub fn new(url: impl Into<String>, token: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            config,
        }
    }

    /// Run `commands` in one round trip; replies come back in order.
    async fn pipeline(&self, commands: Value) -> Result<Vec<CommandResponse>, RateLimitError> {
        let replies = self
            .http
            .post(format!("{}/pipeline", self.url))
            .bearer_auth(&self.token)
            .json(&commands)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(replies)
    }
}

#[async_trait]
impl RateLimiter for UpstashRateLimiter {
    async fn check(&self, identity: &str) -> Result<RateLimitDecision, RateLimitError> {
        let key = counter_key(identity);
        let now = unix_now();

        let mut replies = self
            .pipeline(json!([
                ["INCR", key],
                ["EXPIRE", key, self.config.interval_secs, "NX"]
            ]))
            .await?
            .into_iter();

        let count = replies
            .next()
            .ok_or_else(|| RateLimitError::Store("empty pipeline reply".into()))?
            .into_result()?
            .as_u64()
            .ok_or_else(|| RateLimitError::Store("INCR did not return an integer".into()))?;
        // The next request retries the expiry.
        if let Some(Err(e)) = replies.next().map(CommandResponse::into_result) {
            warn!("Could not set expiry on {key}: {e}");
        }

        debug!("Rate limit {key}: {count}/{}", self.config.limit);
        Ok(RateLimitDecision::from_count(count, &self.config, now))
    }
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Process-local [`RateLimiter`] for single-instance deployments and tests.
///
/// Windows are aligned, so every identity shares the current one; counters
/// from an earlier window are dropped as soon as a new one begins.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    config: RateLimitConfig,
    window: Mutex<Window>,
}

#[derive(Debug, Default)]
struct Window {
    start: u64,
    counts: HashMap<String, u64>,
}

impl InMemoryRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: Mutex::new(Window::default()),
        }
    }

    /// Count one request for `identity` at unix time `now`.
    pub fn check_at(&self, identity: &str, now: u64) -> Result<RateLimitDecision, RateLimitError> {
        let start = window_start(now, self.config.interval_secs);
        let mut window = self
            .window
            .lock()
            .map_err(|_| RateLimitError::Store("rate-limit table lock poisoned".into()))?;
        if window.start != start {
            window.start = start;
            window.counts.clear();
        }
        let count = window.counts.entry(counter_key(identity)).or_insert(0);
        *count += 1;
        Ok(RateLimitDecision::from_count(*count, &self.config, now))
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, identity: &str) -> Result<RateLimitDecision, RateLimitError> {
        self.check_at(identity, unix_now())
    }
}
