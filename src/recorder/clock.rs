//! Active recording clock
//!
//! Measures recorded time, excluding paused intervals. Uses the tokio clock
//! so it follows paused time in tests.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct ClockInner {
    started: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
    stopped_at: Option<Instant>,
}

impl ClockInner {
    fn now(&self) -> Instant {
        self.stopped_at.unwrap_or_else(Instant::now)
    }

    fn paused_total(&self) -> Duration {
        let current = self
            .paused_at
            .map(|at| self.now().saturating_duration_since(at))
            .unwrap_or_default();
        self.paused_total + current
    }
}

/// Shared clock for one recording
#[derive(Debug, Clone, Default)]
pub struct ActiveClock {
    inner: Arc<Mutex<ClockInner>>,
}

impl ActiveClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        let mut inner = self.inner.lock();
        *inner = ClockInner {
            started: Some(Instant::now()),
            ..ClockInner::default()
        };
    }

    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if inner.paused_at.is_none() && inner.stopped_at.is_none() {
            inner.paused_at = Some(Instant::now());
        }
    }

    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        if let Some(at) = inner.paused_at.take() {
            inner.paused_total += Instant::now().saturating_duration_since(at);
        }
    }

    /// Freeze the clock; later reads return the value at this instant
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if inner.stopped_at.is_none() {
            inner.stopped_at = Some(Instant::now());
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused_at.is_some()
    }

    /// Time spent paused so far, including an ongoing pause
    pub fn paused_total(&self) -> Duration {
        self.inner.lock().paused_total()
    }

    /// Wall time since start minus paused time
    pub fn active_elapsed(&self) -> Duration {
        let inner = self.inner.lock();
        let Some(started) = inner.started else {
            return Duration::ZERO;
        };
        inner
            .now()
            .saturating_duration_since(started)
            .saturating_sub(inner.paused_total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_paused_time_is_excluded() {
        let clock = ActiveClock::new();
        clock.start();
        tokio::time::advance(Duration::from_millis(300)).await;
        clock.pause();
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(clock.active_elapsed(), Duration::from_millis(300));
        assert_eq!(clock.paused_total(), Duration::from_millis(500));
        clock.resume();
        tokio::time::advance(Duration::from_millis(200)).await;
        clock.stop();
        tokio::time::advance(Duration::from_millis(999)).await;

        assert_eq!(clock.active_elapsed(), Duration::from_millis(500));
        assert_eq!(clock.paused_total(), Duration::from_millis(500));
    }

    #[test]
    fn test_unstarted_clock_reads_zero() {
        let clock = ActiveClock::new();
        assert_eq!(clock.active_elapsed(), Duration::ZERO);
        assert!(!clock.is_paused());
    }
}
