//! Engine configuration.

use std::time::Duration;

use crate::store::IsolationLevel;

/// How long a requester waits for its allocation before being told to retry.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded wait per request (`TRIAGE_WAIT_TIMEOUT`, seconds).
    pub wait_timeout: Duration,
    /// Allocation worker tasks (`TRIAGE_WORKERS`).
    pub workers: usize,
    /// Isolation for allocate transactions. Withdraw always runs serializable.
    pub allocate_isolation: IsolationLevel,
    /// How long shutdown lets workers finish queued requests
    /// (`TRIAGE_DRAIN_TIMEOUT`, seconds).
    pub drain_timeout: Duration,
}

fn env_seconds(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(Duration::from_secs_f64)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait_timeout: env_seconds("TRIAGE_WAIT_TIMEOUT").unwrap_or(DEFAULT_WAIT_TIMEOUT),
            workers: std::env::var("TRIAGE_WORKERS")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(1),
            allocate_isolation: IsolationLevel::ReadCommitted,
            drain_timeout: env_seconds("TRIAGE_DRAIN_TIMEOUT").unwrap_or(DEFAULT_DRAIN_TIMEOUT),
        }
    }
}

impl EngineConfig {
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the allocate isolation, clamped to at least read-committed.
    pub fn with_allocate_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.allocate_isolation = isolation.max(IsolationLevel::ReadCommitted);
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_clamp() {
        let config = EngineConfig::default()
            .with_workers(0)
            .with_allocate_isolation(IsolationLevel::ReadUncommitted)
            .with_wait_timeout(Duration::from_millis(250));

        assert_eq!(config.workers, 1);
        assert_eq!(config.allocate_isolation, IsolationLevel::ReadCommitted);
        assert_eq!(config.wait_timeout, Duration::from_millis(250));

        let config = config.with_allocate_isolation(IsolationLevel::Serializable);
        assert_eq!(config.allocate_isolation, IsolationLevel::Serializable);
    }

    #[test]
    fn default_isolation_is_read_committed() {
        assert_eq!(
            EngineConfig::default().allocate_isolation,
            IsolationLevel::ReadCommitted
        );
    }
}
