//! Ping/Pong liveness tracking
//!
//! Timestamps are stored as milliseconds since the tracker was created so
//! they fit in an `AtomicU64`; the background thread records, callers read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Sentinel for "never"
const NEVER: u64 = u64::MAX;

pub struct Liveness {
    epoch: Instant,
    last_ping_sent_ms: AtomicU64,
    /// Starts at 0 (creation), so a fresh connection counts as alive
    last_pong_received_ms: AtomicU64,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ping_sent_ms: AtomicU64::new(NEVER),
            last_pong_received_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn record_ping_sent(&self) {
        self.last_ping_sent_ms.store(self.now_ms(), Ordering::Release);
    }

    pub fn record_pong_received(&self) {
        self.last_pong_received_ms.store(self.now_ms(), Ordering::Release);
    }

    /// Restart the clock, e.g. when the connection opens
    pub fn reset(&self) {
        self.last_ping_sent_ms.store(NEVER, Ordering::Release);
        self.last_pong_received_ms.store(self.now_ms(), Ordering::Release);
    }

    /// Time since the last Pong (or since creation/reset if none arrived)
    pub fn time_since_last_pong(&self) -> Duration {
        let pong_ms = self.last_pong_received_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(pong_ms))
    }

    /// None if no Ping has been sent since the last reset
    pub fn time_since_last_ping(&self) -> Option<Duration> {
        let ping_ms = self.last_ping_sent_ms.load(Ordering::Acquire);
        if ping_ms == NEVER {
            return None;
        }
        Some(Duration::from_millis(self.now_ms().saturating_sub(ping_ms)))
    }

    /// False once no Pong arrived for longer than `timeout`
    ///
    /// Advisory only; nothing closes the connection based on it.
    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.time_since_last_pong() <= timeout
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_alive_when_fresh() {
        let liveness = Liveness::new();
        assert!(liveness.is_alive(Duration::from_secs(30)));
        assert!(liveness.time_since_last_ping().is_none());
    }

    #[test]
    fn test_dead_after_timeout_without_pong() {
        let liveness = Liveness::new();
        liveness.record_ping_sent();
        sleep(Duration::from_millis(60));
        assert!(!liveness.is_alive(Duration::from_millis(50)));

        liveness.record_pong_received();
        assert!(liveness.is_alive(Duration::from_millis(50)));
    }

    #[test]
    fn test_reset() {
        let liveness = Liveness::new();
        liveness.record_ping_sent();
        sleep(Duration::from_millis(60));
        assert!(!liveness.is_alive(Duration::from_millis(50)));

        liveness.reset();
        assert!(liveness.is_alive(Duration::from_millis(50)));
        assert!(liveness.time_since_last_ping().is_none());
    }

    #[test]
    fn test_time_since_last_pong() {
        let liveness = Liveness::new();
        liveness.record_pong_received();
        sleep(Duration::from_millis(10));
        assert!(liveness.time_since_last_pong() >= Duration::from_millis(10));
    }
}
