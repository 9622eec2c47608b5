//! Per-phone limit on OTP issuance using a keyed governor limiter.
//!
//! The quota allows a burst of `max_requests` and replenishes one request per
//! `window`, so no rolling window ever sees more than `max_requests` codes.

use std::{num::NonZeroU32, time::Duration};

use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
};

use crate::error::{AppError, AppResult};

const SWEEP_THRESHOLD: usize = 1024;

type PhoneLimiter<C> =
    RateLimiter<String, DashMapStateStore<String>, C, NoOpMiddleware<<C as Clock>::Instant>>;

pub struct OtpRateLimiter<C: Clock = DefaultClock> {
    limiter: PhoneLimiter<C>,
}

impl OtpRateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_clock(max_requests, window, DefaultClock::default())
    }
}

impl<C: Clock> OtpRateLimiter<C> {
    /// # Panics
    ///
    /// Does not panic: the window is clamped to at least one second, which
    /// `Quota::with_period` always accepts.
    pub fn with_clock(max_requests: u32, window: Duration, clock: C) -> Self {
        let burst = NonZeroU32::new(max_requests).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window.max(Duration::from_secs(1)))
            .expect("otp quota with a non-zero period is valid")
            .allow_burst(burst);
        Self {
            limiter: RateLimiter::dashmap_with_clock(quota, clock),
        }
    }

    /// Takes one request for `phone`, or rejects it with the whole seconds
    /// until the next one would be accepted.
    pub fn check(&self, phone: &str) -> AppResult<()> {
        if self.limiter.len() > SWEEP_THRESHOLD {
            self.limiter.retain_recent();
        }

        self.limiter
            .check_key(&phone.to_string())
            .map_err(|not_until| {
                let wait = not_until.wait_time_from(self.limiter.clock().now());
                let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
                AppError::RateLimited {
                    retry_after: secs.max(1),
                }
            })
    }
}
