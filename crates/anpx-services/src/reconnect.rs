//! Reconnect backoff state machine shared by every Receiver dial loop.
//!
//! Grounded on `original_source/anp_proxy/receiver/reconnect.py`'s
//! `ReconnectManager`, stripped of its `asyncio.Task`/callback plumbing: the
//! driving loop lives in `anpx-receiver` and owns the actual socket dial,
//! this type only tracks state and computes the next delay.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `<= 0` means unbounded attempts.
    pub max_attempts: i64,
}

impl From<&anpx_core::ReceiverConfig> for ReconnectPolicy {
    fn from(config: &anpx_core::ReceiverConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.reconnect_initial_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            max_attempts: config.reconnect_max_attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectStats {
    pub state: ReconnectState,
    pub attempt: u32,
    pub max_attempts: i64,
    pub uptime: Option<Duration>,
}

/// `delay = min(initial * 2^(attempt-1), max)`, attempt counted from 1.
pub struct ReconnectManager {
    policy: ReconnectPolicy,
    state: ReconnectState,
    attempt: u32,
    last_connected: Option<Instant>,
}

impl ReconnectManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ReconnectState::Disconnected,
            attempt: 0,
            last_connected: None,
        }
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    pub fn on_connecting(&mut self) {
        self.state = ReconnectState::Connecting;
    }

    pub fn on_connected(&mut self) {
        self.state = ReconnectState::Connected;
        self.attempt = 0;
        self.last_connected = Some(Instant::now());
    }

    pub fn on_connection_lost(&mut self) {
        self.state = ReconnectState::Disconnected;
    }

    /// Advances to the next backoff attempt. Returns the delay to wait
    /// before redialing, or `None` if the attempt budget is exhausted (the
    /// manager is now [`ReconnectState::Failed`] and will not recover
    /// without [`Self::reset`]).
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.policy.max_attempts > 0 && self.attempt as i64 >= self.policy.max_attempts {
            self.state = ReconnectState::Failed;
            return None;
        }
        self.attempt += 1;
        let scale = 1u64.checked_shl(self.attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let delay = self
            .policy
            .initial_delay
            .checked_mul(scale as u32)
            .unwrap_or(self.policy.max_delay)
            .min(self.policy.max_delay);
        self.state = ReconnectState::Reconnecting;
        Some(delay)
    }

    /// Manual reset, e.g. after an operator-triggered reconnect.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.state = ReconnectState::Disconnected;
    }

    pub fn stats(&self) -> ReconnectStats {
        let uptime = match (self.state, self.last_connected) {
            (ReconnectState::Connected, Some(t)) => Some(t.elapsed()),
            _ => None,
        };
        ReconnectStats {
            state: self.state,
            attempt: self.attempt,
            max_attempts: self.policy.max_attempts,
            uptime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: i64) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts,
        }
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let mut mgr = ReconnectManager::new(policy(0));
        assert_eq!(mgr.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(mgr.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(mgr.next_backoff(), Some(Duration::from_millis(400)));
        for _ in 0..10 {
            mgr.next_backoff();
        }
        assert_eq!(mgr.next_backoff(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn exhausting_max_attempts_moves_to_failed() {
        let mut mgr = ReconnectManager::new(policy(2));
        assert!(mgr.next_backoff().is_some());
        assert!(mgr.next_backoff().is_some());
        assert_eq!(mgr.next_backoff(), None);
        assert_eq!(mgr.state(), ReconnectState::Failed);
    }

    #[test]
    fn connecting_resets_attempt_counter() {
        let mut mgr = ReconnectManager::new(policy(0));
        mgr.next_backoff();
        mgr.next_backoff();
        mgr.on_connected();
        assert_eq!(mgr.stats().attempt, 0);
        assert_eq!(mgr.next_backoff(), Some(Duration::from_millis(100)));
    }
}
