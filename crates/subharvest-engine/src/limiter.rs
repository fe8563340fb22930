//! Adaptive request pacing.
//!
//! [`AdaptiveLimiter`] wraps a `governor` token bucket whose rate is
//! continuously re-estimated from per-request outcomes: failures shrink it
//! multiplicatively, sustained low-latency success grows it gently, and
//! server-declared limits (from rate-limit headers) cap it outright. The
//! bucket itself is rebuilt whenever the effective rate changes; callers
//! only ever see `acquire` / `report` / `observe`.

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use tokio_util::sync::CancellationToken;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const LATENCY_WINDOW: usize = 100;
const EMA_ALPHA: f64 = 0.1;
const HIGH_LATENCY: Duration = Duration::from_millis(500);
const LOW_LATENCY: Duration = Duration::from_millis(200);

/// The caller's cancellation signal fired while waiting for a token.
#[derive(Debug, thiserror::Error)]
#[error("rate limiter wait cancelled")]
pub struct Cancelled;

/// Configuration for [`AdaptiveLimiter`].
#[derive(Debug, Clone, Copy)]
pub struct LimiterConfig {
    /// Starting rate in requests per second.
    pub initial_rate: f64,
    /// Floor the rate never drops below.
    pub min_rate: f64,
    /// Ceiling the rate never exceeds (may be lowered by server limits).
    pub max_rate: f64,
    /// Token bucket capacity; permits short spikes above the steady rate.
    pub burst: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            initial_rate: 5.0,
            min_rate: 1.0,
            max_rate: 50.0,
            burst: 10,
        }
    }
}

impl LimiterConfig {
    /// Replace non-positive fields with defaults and restore ordering
    /// (`min <= initial <= max`, `burst >= 1`).
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.initial_rate <= 0.0 {
            self.initial_rate = defaults.initial_rate;
        }
        if self.min_rate <= 0.0 {
            self.min_rate = defaults.min_rate;
        }
        if self.max_rate <= 0.0 {
            self.max_rate = defaults.max_rate;
        }
        if self.burst == 0 {
            self.burst = defaults.burst;
        }
        if self.min_rate > self.initial_rate {
            self.initial_rate = self.min_rate;
        }
        if self.max_rate < self.initial_rate {
            self.max_rate = self.initial_rate;
        }
        self
    }
}

struct LimiterState {
    current_rate: f64,
    min_rate: f64,
    max_rate: f64,
    burst: u32,
    success_ema: f64,
    remaining: Option<u32>,
    reset_at: Option<DateTime<Utc>>,
    bucket: Arc<DirectLimiter>,
}

/// Token-bucket pacer that adapts to observed success and latency.
///
/// Safe for concurrent callers: the adaptive state sits behind one mutex,
/// the latency ring behind another, and the bucket handles its own waiters.
pub struct AdaptiveLimiter {
    state: Mutex<LimiterState>,
    latencies: Mutex<VecDeque<Duration>>,
}

impl AdaptiveLimiter {
    /// Build a limiter from (normalized) configuration.
    #[must_use]
    pub fn new(config: LimiterConfig) -> Self {
        let config = config.normalized();
        let bucket = Arc::new(RateLimiter::direct(quota_for(
            config.initial_rate,
            config.burst,
        )));
        Self {
            state: Mutex::new(LimiterState {
                current_rate: config.initial_rate,
                min_rate: config.min_rate,
                max_rate: config.max_rate,
                burst: config.burst,
                success_ema: 1.0,
                remaining: None,
                reset_at: None,
                bucket,
            }),
            latencies: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }

    /// Block until one token is available at the current rate.
    ///
    /// When the server reset is less than 10 s away and fewer than 10
    /// requests remain, the rate is halved before waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when `cancel` fires before a token is granted.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let bucket = {
            let mut state = self.lock_state();
            if let (Some(reset_at), Some(remaining)) = (state.reset_at, state.remaining) {
                if reset_at - Utc::now() < TimeDelta::seconds(10) && remaining < 10 {
                    tracing::warn!(
                        remaining,
                        reset_at = %reset_at,
                        "approaching gateway rate limit, halving request rate"
                    );
                    let halved = state.current_rate * 0.5;
                    apply_rate(&mut state, halved);
                }
            }
            state.bucket.clone()
        };

        tokio::select! {
            () = cancel.cancelled() => Err(Cancelled),
            () = bucket.until_ready() => Ok(()),
        }
    }

    /// Record the outcome of one completed request. Never blocks the caller
    /// on anything but the two internal locks.
    pub fn report(&self, success: bool, latency: Duration) {
        self.record_latency(latency);
        let avg_latency = self.average_latency();

        let mut state = self.lock_state();
        state.success_ema =
            (1.0 - EMA_ALPHA) * state.success_ema + EMA_ALPHA * f64::from(u8::from(success));

        if !success {
            let factor = if state.success_ema < 0.7 { 0.5 } else { 0.8 };
            let reduced = state.current_rate * factor;
            apply_rate(&mut state, reduced);
            tracing::info!(
                rate = state.current_rate,
                success_ema = state.success_ema,
                avg_latency_ms = avg_latency.as_millis() as u64,
                "reduced request rate after failure"
            );
            return;
        }

        if avg_latency > HIGH_LATENCY {
            let braked = state.current_rate * 0.95;
            apply_rate(&mut state, braked);
            tracing::debug!(
                rate = state.current_rate,
                avg_latency_ms = avg_latency.as_millis() as u64,
                "reduced request rate due to high latency"
            );
            return;
        }

        if state.success_ema > 0.95 && avg_latency < LOW_LATENCY {
            let grown = state.current_rate * 1.05;
            apply_rate(&mut state, grown);
            tracing::debug!(
                rate = state.current_rate,
                success_ema = state.success_ema,
                "increased request rate"
            );
        }
    }

    /// Feed server-declared limits from response headers.
    pub fn observe(
        &self,
        limit: Option<u32>,
        remaining: Option<u32>,
        reset_at: Option<DateTime<Utc>>,
    ) {
        let mut state = self.lock_state();
        if remaining.is_some() {
            state.remaining = remaining;
        }
        if reset_at.is_some() {
            state.reset_at = reset_at;
        }

        let nearly_exhausted = matches!(
            (remaining, reset_at),
            (Some(rem), Some(reset))
                if rem < 5 && reset - Utc::now() > TimeDelta::seconds(5)
        );
        if nearly_exhausted {
            let floor = state.min_rate;
            apply_rate(&mut state, floor);
            tracing::warn!(
                rate = state.current_rate,
                "gateway budget nearly exhausted, dropping to minimum rate"
            );
        } else if let Some(declared) = limit.filter(|l| *l > 0) {
            let suggested_max = f64::from(declared) * 0.8;
            if suggested_max < state.max_rate {
                state.max_rate = suggested_max;
                if state.current_rate > state.max_rate {
                    let capped = state.max_rate;
                    apply_rate(&mut state, capped);
                }
                tracing::info!(
                    declared,
                    max_rate = state.max_rate,
                    rate = state.current_rate,
                    "capped maximum rate from gateway limit"
                );
            }
        }
    }

    /// Current effective rate in requests per second.
    #[must_use]
    pub fn current_rate(&self) -> f64 {
        self.lock_state().current_rate
    }

    /// Current exponential moving average of request success.
    #[must_use]
    pub fn success_ema(&self) -> f64 {
        self.lock_state().success_ema
    }

    /// Current rate ceiling (may have been lowered by server limits).
    #[must_use]
    pub fn max_rate(&self) -> f64 {
        self.lock_state().max_rate
    }

    fn lock_state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().expect("limiter state lock poisoned")
    }

    fn record_latency(&self, latency: Duration) {
        let mut latencies = self
            .latencies
            .lock()
            .expect("limiter latency lock poisoned");
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(latency);
    }

    fn average_latency(&self) -> Duration {
        let latencies = self
            .latencies
            .lock()
            .expect("limiter latency lock poisoned");
        if latencies.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = latencies.iter().sum();
        total / latencies.len() as u32
    }
}

fn apply_rate(state: &mut LimiterState, rate: f64) {
    let clamped = rate.clamp(state.min_rate, state.max_rate);
    if (clamped - state.current_rate).abs() < f64::EPSILON {
        return;
    }
    state.current_rate = clamped;
    state.bucket = Arc::new(RateLimiter::direct(quota_for(clamped, state.burst)));
}

fn quota_for(rate: f64, burst: u32) -> Quota {
    let seconds_per_token = (1.0 / rate).max(0.001);
    let burst = NonZeroU32::new(burst.max(1)).expect("burst is at least one");
    Quota::with_period(Duration::from_secs_f64(seconds_per_token))
        .expect("period is always greater than zero")
        .allow_burst(burst)
}
