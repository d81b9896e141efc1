//! Exponential backoff for retrying rate-limited AI requests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Exponential backoff with configurable base and cap.
///
/// The delay before retry `n` (1-based) is `base * 2^(n-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    /// Creates a new backoff starting at `base`, capping at `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Returns the delay to wait after failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl Default for ExponentialBackoff {
    /// Two seconds doubling to at most ten.
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(10))
    }
}

/// Suspends execution between retries.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested delays without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every delay requested so far.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_starts_at_base() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(300));
        assert_eq!(backoff.delay(1), Duration::from_secs(5));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(300));
        assert_eq!(backoff.delay(2), Duration::from_secs(10));
        assert_eq!(backoff.delay(3), Duration::from_secs(20));
    }

    #[test]
    fn backoff_caps_at_max() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(4), Duration::from_secs(10));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn attempt_zero_uses_base() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.delay(0), Duration::from_secs(2));
    }

    #[test]
    fn recording_sleeper_does_not_wait() {
        let sleeper = RecordingSleeper::new();
        tokio_test::block_on(sleeper.sleep(Duration::from_secs(3600)));
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(3600)]);
    }
}
