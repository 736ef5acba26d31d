use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::SmallRng};

/// Reconnect pacing contract.
///
/// Policy lives outside the session engine so callers can tune base/max/
/// factor per deployment, or disable retries entirely in tests.
pub trait ReconnectPolicy: Send + 'static {
    fn next_delay(&mut self) -> Duration;
    fn reset(&mut self);
    fn should_retry(&self) -> bool;
}

/// Exponential backoff with a cap.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor > 1.0 {
            factor
        } else {
            1.5
        };
        Self {
            base,
            max,
            factor,
            current: base,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let next = (self.current.as_secs_f64() * self.factor).min(self.max.as_secs_f64());
        self.current = Duration::from_secs_f64(next);
        delay
    }

    fn reset(&mut self) {
        self.current = self.base;
    }

    fn should_retry(&self) -> bool {
        true
    }
}

/// Scale a delay by a uniform factor in [0.5, 1.0] so reconnecting clients
/// do not stampede the gateway in lockstep.
pub fn jitter_delay(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }

    let mut rng = SmallRng::from_entropy();
    let jitter: f64 = rng.gen_range(0.5..=1.0);
    let nanos = (base.as_nanos() as f64 * jitter) as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

/// Delay before re-identifying after a non-resumable INVALID_SESSION:
/// uniform in [1, 5] seconds per the gateway contract.
pub fn invalid_session_delay() -> Duration {
    let mut rng = SmallRng::from_entropy();
    Duration::from_millis(rng.gen_range(1_000..=5_000))
}

/// Offset of the first heartbeat within the interval: `interval * U(0, 1)`.
/// Spreads the per-session heartbeat phase so a fleet of sessions started
/// together does not tick in unison.
pub fn first_heartbeat_delay(interval: Duration, jitter: bool) -> Duration {
    if !jitter || interval.is_zero() {
        return interval;
    }
    let mut rng = SmallRng::from_entropy();
    let scale: f64 = rng.gen_range(0.0..1.0);
    Duration::from_nanos((interval.as_nanos() as f64 * scale) as u64)
}
