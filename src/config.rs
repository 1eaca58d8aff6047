//! # Global engine configuration.
//!
//! Provides [`EngineConfig`], the centralized settings for the dispatch engine.
//!
//! The config is consumed once at [`Engine::new`](crate::Engine::new); all
//! components (worker pool, escalation manager, aggregator) receive their
//! knobs from it, so there are no process-wide singletons to mutate later.
//!
//! ## Defaults
//! 10 workers, a 5s provider timeout, a 120s escalation timeout with 30s
//! follow-up cadence capped at 10 firings.

use std::time::Duration;

/// Global configuration for the dispatch engine.
///
/// Defines:
/// - **Worker pool**: pool size and the bounded provider-call timeout
/// - **Escalation cadence**: initial timeout, follow-up interval, follow-up cap
/// - **Shutdown behavior**: grace period for graceful termination
/// - **Event system**: bus capacity for event delivery
/// - **Store resilience**: bounded retries for counter/audit persistence
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Number of concurrent delivery workers draining the job queue.
    ///
    /// Minimum effective value is 1 (clamped by the pool).
    pub workers: usize,

    /// Bounded timeout applied to every provider call.
    ///
    /// A timeout is classified as a retryable failure, not fatal.
    pub provider_timeout: Duration,

    /// How long to wait for a primary-contact acknowledgment before the
    /// escalation timer fires for the first time.
    pub escalation_timeout: Duration,

    /// Cadence of escalation re-fires after the first firing.
    pub follow_up_interval: Duration,

    /// Maximum number of escalation firings per emergency.
    ///
    /// Reaching the cap without acknowledgment transitions the escalation
    /// to its exhausted terminal state; the event is reported, not retried.
    pub max_follow_ups: u32,

    /// Maximum time to wait for workers to stop during shutdown.
    ///
    /// When exceeded, [`Engine::shutdown`](crate::Engine::shutdown) returns
    /// `RuntimeError::GraceExceeded`.
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` messages
    /// observe `Lagged` and skip older items. Minimum value is 1.
    pub bus_capacity: usize,

    /// Bounded attempts for persisting counter updates and audit records.
    ///
    /// Sustained failure is logged as critical and reported on the bus;
    /// it never blocks or fails the delivery path.
    pub store_retry_attempts: u32,

    /// Delay between store persistence retries.
    pub store_retry_delay: Duration,
}

impl EngineConfig {
    /// Returns the worker count clamped to a minimum of 1.
    #[inline]
    pub fn workers_clamped(&self) -> usize {
        self.workers.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for EngineConfig {
    /// Default configuration:
    ///
    /// - `workers = 10`
    /// - `provider_timeout = 5s`
    /// - `escalation_timeout = 120s`
    /// - `follow_up_interval = 30s`
    /// - `max_follow_ups = 10`
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    /// - `store_retry_attempts = 3`, `store_retry_delay = 100ms`
    fn default() -> Self {
        Self {
            workers: 10,
            provider_timeout: Duration::from_secs(5),
            escalation_timeout: Duration::from_secs(120),
            follow_up_interval: Duration::from_secs(30),
            max_follow_ups: 10,
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            store_retry_attempts: 3,
            store_retry_delay: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.workers, 10);
        assert_eq!(cfg.escalation_timeout, Duration::from_secs(120));
        assert_eq!(cfg.follow_up_interval, Duration::from_secs(30));
        assert_eq!(cfg.max_follow_ups, 10);
    }

    #[test]
    fn test_clamps() {
        let cfg = EngineConfig {
            workers: 0,
            bus_capacity: 0,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.workers_clamped(), 1);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
