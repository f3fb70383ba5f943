//! Time source for the indexer.
//!
//! Everything that sleeps or asks for "now" goes through [`Clock`], so retry
//! loops and window maintenance can be driven by a [`ManualClock`] in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Wall clock plus sleep.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Real time backed by tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic clock: sleeping returns immediately and advances `now` by the
/// requested duration. Every sleep is recorded.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    /// Clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                now,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Durations passed to [`Clock::sleep`], in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state().sleeps.clone()
    }

    /// Move time forward without sleeping.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state();
        state.now += chrono::Duration::from_std(by).unwrap_or_default();
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // A poisoned lock only means a test panicked while holding it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state().now
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.state();
        state.sleeps.push(duration);
        state.now += chrono::Duration::from_std(duration).unwrap_or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_records_sleeps() {
        let start = DateTime::<Utc>::from_timestamp(1_756_425_600, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.sleep(Duration::from_secs(2)).await;
        clock.sleep(Duration::from_secs(4)).await;

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
        assert_eq!((clock.now() - start).num_seconds(), 6);
    }
}
