//! Rate-limit aware pacing.
//!
//! The tenant reports its rate-limit budget on every response
//! (`X-Rate-Limit-Limit`, `X-Rate-Limit-Remaining`, `X-Rate-Limit-Reset`).
//! The pacer remembers the most recent report and holds new requests back
//! until the reset once the configured share of the budget is spent.
//!
//! One pacer is shared by every resource handled by a provider handle. It is
//! the only mutable state shared across concurrent reconciles.

use crate::context::CallContext;
use crate::error::ApiResult;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const LIMIT_HEADER: &str = "x-rate-limit-limit";
pub const REMAINING_HEADER: &str = "x-rate-limit-remaining";
pub const RESET_HEADER: &str = "x-rate-limit-reset";

/// Rate-limit figures reported by one response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitSnapshot {
    /// Read the rate-limit headers. Missing or malformed headers are ignored.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| -> Option<i64> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
        };
        Self {
            limit: number(LIMIT_HEADER).and_then(|v| u32::try_from(v).ok()),
            remaining: number(REMAINING_HEADER).and_then(|v| u32::try_from(v).ok()),
            reset_at: number(RESET_HEADER).and_then(|v| Utc.timestamp_opt(v, 0).single()),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.remaining.is_none() && self.reset_at.is_none()
    }

    /// Time until the reported reset, if it lies in the future.
    #[must_use]
    pub fn until_reset(&self, now: DateTime<Utc>) -> Option<Duration> {
        let reset = self.reset_at?;
        (reset - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

/// Shared pacer handle. Clones share state.
#[derive(Debug, Clone)]
pub struct RateLimitPacer {
    /// Percentage (1-100) of the remote budget this provider may consume.
    capacity_percent: u8,
    state: Arc<Mutex<RateLimitSnapshot>>,
}

impl Default for RateLimitPacer {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RateLimitPacer {
    /// Create a pacer consuming at most `capacity_percent` of the budget.
    /// Values outside 1-100 are clamped.
    #[must_use]
    pub fn new(capacity_percent: u8) -> Self {
        Self {
            capacity_percent: capacity_percent.clamp(1, 100),
            state: Arc::new(Mutex::new(RateLimitSnapshot::default())),
        }
    }

    #[must_use]
    pub fn capacity_percent(&self) -> u8 {
        self.capacity_percent
    }

    /// Record the figures of a response. Reports without a reset timestamp
    /// are ignored, and an older reset never replaces a newer one.
    pub async fn observe(&self, snapshot: RateLimitSnapshot) {
        let Some(reset_at) = snapshot.reset_at else {
            return;
        };
        let mut state = self.state.lock().await;
        if state.reset_at.map_or(true, |current| reset_at >= current) {
            *state = snapshot;
        }
    }

    /// Most recently observed figures.
    pub async fn snapshot(&self) -> RateLimitSnapshot {
        *self.state.lock().await
    }

    /// How long the next request must wait, given the last report.
    #[must_use]
    pub fn delay_needed(&self, snapshot: &RateLimitSnapshot, now: DateTime<Utc>) -> Option<Duration> {
        let (Some(limit), Some(remaining)) = (snapshot.limit, snapshot.remaining) else {
            return None;
        };
        let reserved = u64::from(limit) * u64::from(100 - self.capacity_percent) / 100;
        if u64::from(remaining) > reserved {
            return None;
        }
        snapshot.until_reset(now)
    }

    /// Wait until this provider may issue another request.
    pub async fn wait_turn(&self, ctx: &CallContext) -> ApiResult<()> {
        let snapshot = self.snapshot().await;
        let Some(delay) = self.delay_needed(&snapshot, Utc::now()) else {
            return Ok(());
        };
        info!(
            wait_ms = delay.as_millis() as u64,
            remaining = snapshot.remaining,
            limit = snapshot.limit,
            capacity_percent = self.capacity_percent,
            "Rate-limit budget spent, pausing until reset"
        );
        ctx.sleep(delay).await?;
        debug!("Rate-limit window reset, resuming");
        Ok(())
    }
}
