//! Pacing of code host API calls against the remaining quota.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::domain::errors::DomainResult;
use crate::domain::models::{RateLimit, ThrottleConfig};
use crate::domain::ports::CodeHost;

/// Delay to wait before the next batch of calls.
///
/// Compares the consumed fraction of the quota with the elapsed fraction
/// of the quota window. When consumption runs ahead of linear pacing, the
/// delay is the time needed for the window to catch up, bounded by the
/// time left before the reset. At or below the threshold remaining
/// fraction, no delay is computed: exhaustion is handled by the callers.
pub fn compute_throttling(now: DateTime<Utc>, rate: &RateLimit, config: &ThrottleConfig) -> Duration {
    if rate.limit == 0 || config.window_secs == 0 {
        return Duration::ZERO;
    }

    #[allow(clippy::cast_precision_loss)]
    let (limit, remaining, window) = (
        rate.limit as f64,
        rate.remaining.min(rate.limit) as f64,
        config.window_secs as f64,
    );

    let remaining_fraction = remaining / limit;
    if remaining_fraction <= config.threshold {
        return Duration::ZERO;
    }
    let consumed_fraction = 1.0 - remaining_fraction;

    #[allow(clippy::cast_precision_loss)]
    let time_left = ((rate.reset_at - now).num_milliseconds() as f64 / 1000.0).clamp(0.0, window);
    let elapsed_fraction = 1.0 - time_left / window;

    if consumed_fraction <= elapsed_fraction {
        return Duration::ZERO;
    }

    let ahead = ((consumed_fraction - elapsed_fraction) * window).min(time_left);
    Duration::from_secs_f64(ahead.max(0.0))
}

/// Consults the quota and sleeps when calls run ahead of budget.
#[derive(Clone)]
pub struct ThrottleController {
    code_host: Arc<dyn CodeHost>,
    config: ThrottleConfig,
}

impl ThrottleController {
    pub fn new(code_host: Arc<dyn CodeHost>, config: ThrottleConfig) -> Self {
        Self { code_host, config }
    }

    /// Sleep as long as needed, returning the delay applied.
    pub async fn throttle(&self) -> DomainResult<Duration> {
        let rate = self.code_host.rate_limit().await?;
        let delay = compute_throttling(Utc::now(), &rate, &self.config);

        if delay.is_zero() {
            debug!(remaining = rate.remaining, limit = rate.limit, "API quota within budget");
        } else {
            info!(
                remaining = rate.remaining,
                limit = rate.limit,
                reset_at = %rate.reset_at,
                delay_secs = delay.as_secs(),
                "Throttling API calls"
            );
            tokio::time::sleep(delay).await;
        }

        Ok(delay)
    }

    /// Log the remaining quota.
    pub async fn log_remaining(&self) -> DomainResult<RateLimit> {
        let rate = self.code_host.rate_limit().await?;
        info!(
            remaining = rate.remaining,
            limit = rate.limit,
            reset_at = %rate.reset_at,
            "Remaining API calls"
        );
        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 1, 18, 12, 0, 0).unwrap()
    }

    fn rate(remaining: u64, reset_in_secs: i64) -> RateLimit {
        RateLimit {
            limit: 5000,
            remaining,
            reset_at: now() + chrono::Duration::seconds(reset_in_secs),
        }
    }

    #[test]
    fn test_early_in_window() {
        let delay = compute_throttling(now(), &rate(4900, 3500), &ThrottleConfig::default());
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn test_consumption_within_budget() {
        // A fifth consumed after two thirds of the window.
        let delay = compute_throttling(now(), &rate(4000, 1200), &ThrottleConfig::default());
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn test_consumption_ahead_of_budget() {
        // Four fifths consumed after a third of the window.
        let delay = compute_throttling(now(), &rate(1000, 2400), &ThrottleConfig::default());
        assert!(delay > Duration::ZERO);
        assert!(delay <= Duration::from_secs(2400));
    }

    #[test]
    fn test_below_threshold_is_not_throttled() {
        let config = ThrottleConfig {
            threshold: 0.1,
            ..ThrottleConfig::default()
        };
        let delay = compute_throttling(now(), &rate(400, 3000), &config);
        assert_eq!(delay, Duration::ZERO);

        let delay = compute_throttling(now(), &rate(0, 3000), &ThrottleConfig::default());
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn test_reset_passed() {
        let delay = compute_throttling(now(), &rate(10, -60), &ThrottleConfig::default());
        assert_eq!(delay, Duration::ZERO);
    }
}
