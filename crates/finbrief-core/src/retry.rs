//! Retry policy for upstream fetches.
//!
//! Quote and feed requests retry transport timeouts, refused connections and
//! the transient statuses in [`TRANSIENT_STATUSES`]. Any other 4xx is final.

use std::time::Duration;

use crate::http_client::{HttpError, HttpErrorKind};

/// Statuses worth another attempt: request timeout, rate limiting, and
/// gateway or server hiccups.
pub const TRANSIENT_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles from `base` up to `cap`. With `jitter` each delay is drawn
    /// uniformly from `[delay / 2, delay * 3 / 2]`.
    Doubling {
        base: Duration,
        cap: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Doubling {
            base: Duration::from_millis(200),
            cap: Duration::from_secs(3),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => delay,
            Self::Doubling { base, cap, jitter } => {
                let delay = doubled(base, cap, attempt);
                if jitter {
                    delay.mul_f64(0.5 + fastrand::f64())
                } else {
                    delay
                }
            }
        }
    }

    /// Longest delay [`delay`](Self::delay) can return for `attempt`.
    pub fn max_delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => delay,
            Self::Doubling { base, cap, jitter } => {
                let delay = doubled(base, cap, attempt);
                if jitter {
                    delay.saturating_add(delay / 2)
                } else {
                    delay
                }
            }
        }
    }
}

fn doubled(base: Duration, cap: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt.min(31))).min(cap)
}

/// Retry budget applied by [`execute_with_retry`](crate::http_client::execute_with_retry).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::exponential(3)
    }
}

impl RetryConfig {
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            enabled: true,
            max_retries,
            backoff: Backoff::default(),
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            enabled: true,
            max_retries,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    /// Upper bound on requests made for one call, first attempt included.
    pub fn attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        TRANSIENT_STATUSES.contains(&status)
    }

    pub fn should_retry_error(&self, error: &HttpError) -> bool {
        matches!(error.kind(), HttpErrorKind::Timeout | HttpErrorKind::Connect)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Worst-case time spent sleeping between attempts of one call.
    pub fn max_total_backoff(&self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        (0..self.max_retries).fold(Duration::ZERO, |total, attempt| {
            total.saturating_add(self.backoff.max_delay(attempt))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubling_backoff_stops_at_cap() {
        let backoff = Backoff::Doubling {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(1),
            jitter: false,
        };

        let delays: Vec<u128> = (0..5).map(|attempt| backoff.delay(attempt).as_millis()).collect();
        assert_eq!(delays, vec![250, 500, 1000, 1000, 1000]);
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn jitter_keeps_delay_within_half_either_side() {
        let backoff = Backoff::Doubling {
            base: Duration::from_millis(400),
            cap: Duration::from_secs(3),
            jitter: true,
        };

        for _ in 0..50 {
            let delay = backoff.delay(1);
            assert!(delay >= Duration::from_millis(400), "delay {delay:?} too short");
            assert!(delay <= Duration::from_millis(1200), "delay {delay:?} too long");
        }
    }

    #[test]
    fn only_transient_failures_are_retried() {
        let config = RetryConfig::default();

        for status in [408, 429, 500, 502, 503, 504] {
            assert!(config.should_retry_status(status), "{status} should be retried");
        }
        for status in [400, 401, 403, 404, 501] {
            assert!(!config.should_retry_status(status), "{status} should be final");
        }
        assert!(config.should_retry_error(&HttpError::timeout("slow feed")));
        assert!(config.should_retry_error(&HttpError::connect("refused")));
        assert!(!config.should_retry_error(&HttpError::other("bad body")));
    }

    #[test]
    fn total_backoff_bounds_every_sleep_of_one_call() {
        let jittered = RetryConfig::exponential(3);
        // 200 + 400 + 800 ms, each up to one and a half times with jitter.
        assert_eq!(jittered.max_total_backoff(), Duration::from_millis(2_100));
        for _ in 0..50 {
            let slept: Duration = (0..3).map(|attempt| jittered.delay_for_attempt(attempt)).sum();
            assert!(slept <= jittered.max_total_backoff(), "slept {slept:?}");
        }

        assert_eq!(
            RetryConfig::fixed(Duration::from_millis(50), 2).max_total_backoff(),
            Duration::from_millis(100)
        );
        assert_eq!(RetryConfig::disabled().max_total_backoff(), Duration::ZERO);
    }

    #[test]
    fn attempts_include_the_first_request() {
        assert_eq!(RetryConfig::default().attempts(), 4);
        assert_eq!(RetryConfig::fixed(Duration::from_millis(5), 1).attempts(), 2);
        assert_eq!(RetryConfig::disabled().attempts(), 1);
    }
}
