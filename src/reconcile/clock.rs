//! Time, budgets and backoff
//!
//! Every poll loop reads time and sleeps through a [`Clock`] so tests can
//! drive timeouts with [`ManualClock`] instead of waiting.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `tokio::time`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock that only moves when slept on or advanced.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += duration;
    }

    /// Total time slept or advanced so far
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        // let other tasks observe the new time
        tokio::task::yield_now().await;
    }
}

/// The wall-clock allowance for every phase of one mutation.
///
/// Built once from the caller's timeout; each phase asks for what remains.
/// The remaining budget is clamped at zero: an exhausted budget still allows
/// one attempt, then expires.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutBudget {
    started: Instant,
    total: Duration,
}

impl TimeoutBudget {
    pub fn start(clock: &dyn Clock, total: Duration) -> Self {
        Self {
            started: clock.now(),
            total,
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn elapsed(&self, clock: &dyn Clock) -> Duration {
        clock.now().saturating_duration_since(self.started)
    }

    pub fn remaining(&self, clock: &dyn Clock) -> Duration {
        self.total.saturating_sub(self.elapsed(clock))
    }

    pub fn is_exhausted(&self, clock: &dyn Clock) -> bool {
        self.remaining(clock).is_zero()
    }
}

/// Exponential polling schedule: `initial`, doubling up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub fn delays(&self) -> Delays {
        Delays {
            next: self.initial,
            max: self.max,
        }
    }
}

/// Iterator over the delays of a [`Backoff`]; never ends.
#[derive(Debug, Clone)]
pub struct Delays {
    next: Duration,
    max: Duration,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = (current * 2).min(self.max);
        Some(current)
    }
}

/// How a [`pause`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    Elapsed,
    Cancelled,
}

/// Sleep for `delay`, cut short by the remaining budget and by cancellation.
pub async fn pause(
    clock: &dyn Clock,
    budget: &TimeoutBudget,
    delay: Duration,
    cancel: &CancellationToken,
) -> Pause {
    if cancel.is_cancelled() {
        return Pause::Cancelled;
    }
    let delay = delay.min(budget.remaining(clock));
    tokio::select! {
        _ = cancel.cancelled() => Pause::Cancelled,
        _ = clock.sleep(delay) => Pause::Elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_max() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<u64> = backoff.delays().take(5).map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_budget_clamps_to_zero() {
        let clock = ManualClock::new();
        let budget = TimeoutBudget::start(&clock, Duration::from_secs(10));

        clock.advance(Duration::from_secs(4));
        assert_eq!(budget.remaining(&clock), Duration::from_secs(6));

        clock.advance(Duration::from_secs(30));
        assert_eq!(budget.remaining(&clock), Duration::ZERO);
        assert!(budget.is_exhausted(&clock));
    }

    #[tokio::test]
    async fn test_pause_is_capped_by_budget() {
        let clock = ManualClock::new();
        let budget = TimeoutBudget::start(&clock, Duration::from_secs(3));
        let cancel = CancellationToken::new();

        let outcome = pause(&clock, &budget, Duration::from_secs(10), &cancel).await;

        assert_eq!(outcome, Pause::Elapsed);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_pause_observes_cancellation() {
        let clock = ManualClock::new();
        let budget = TimeoutBudget::start(&clock, Duration::from_secs(3));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = pause(&clock, &budget, Duration::from_secs(1), &cancel).await;

        assert_eq!(outcome, Pause::Cancelled);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
