//! Retry pacing for transient broker failures.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Bounded exponential backoff with jitter.
///
/// Each [`next_delay`](Backoff::next_delay) returns the current step plus up
/// to half of it again as jitter, then doubles the step up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let step = self.current;
        self.current = (self.current * 2).min(self.max);
        step + random_delay(step / 2 + Duration::from_millis(1))
    }

    /// Back to the initial step after a success.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(5))
    }
}

/// Uniform random delay in `[0, max)`. Zero when `max` is zero.
pub fn random_delay(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}

/// Sleep for `delay` unless `cancel` fires first. Returns `false` when
/// cancelled.
pub async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(400));
        let steps: Vec<Duration> = (0..5).map(|_| backoff.next_delay()).collect();

        let floors = [100, 200, 400, 400, 400];
        for (delay, floor) in steps.iter().zip(floors) {
            let floor = Duration::from_millis(floor);
            assert!(*delay >= floor, "{delay:?} below {floor:?}");
            assert!(*delay <= floor + floor / 2, "{delay:?} above jitter bound");
        }
    }

    #[test]
    fn reset_returns_to_initial_step() {
        let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_secs(1));
        for _ in 0..4 {
            backoff.next_delay();
        }
        backoff.reset();
        assert!(backoff.next_delay() < Duration::from_millis(76));
    }

    #[test]
    fn random_delay_respects_bound() {
        assert_eq!(random_delay(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(random_delay(Duration::from_millis(10)) < Duration::from_millis(10));
        }
    }
}
