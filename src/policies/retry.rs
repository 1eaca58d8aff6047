//! # Per-channel retry policy and fallback chain.
//!
//! [`ChannelPolicy`] is a closed policy table consulted uniformly by the
//! worker; there is no per-channel retry code anywhere else:
//!
//! | Channel | Max attempts | Backoff            | Delays        | Fallback |
//! |---------|--------------|--------------------|---------------|----------|
//! | Push    | 3            | exponential (×3)   | 5s, 15s, 45s  | Sms      |
//! | Sms     | 2            | fixed              | 10s, 10s      | Email    |
//! | Email   | 3            | exponential (×2)   | 10s, 20s, 40s | —        |
//!
//! The delay for attempt `n` (1-based) is derived purely from `n`, so jitter
//! output never feeds back into subsequent calculations.

use std::time::Duration;

use crate::model::Channel;
use crate::policies::jitter::JitterPolicy;

/// Retry delay curve.
#[derive(Clone, Copy, Debug)]
pub enum Backoff {
    /// Constant delay between attempts.
    Fixed(Duration),
    /// `first × factor^(n-1)` for attempt `n`, uncapped within the attempt
    /// budget (max attempts bound the curve, not a delay cap).
    Exponential {
        /// Delay after the first failed attempt.
        first: Duration,
        /// Multiplicative growth factor (`>= 1.0`).
        factor: f64,
    },
}

impl Backoff {
    /// Computes the base delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Exponential { first, factor } => {
                let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = first.as_secs_f64() * factor.powi(exp);
                if secs.is_finite() && secs >= 0.0 {
                    Duration::from_secs_f64(secs)
                } else {
                    first
                }
            }
        }
    }
}

/// Per-channel retry and fallback policy.
///
/// Pure and stateless: the worker looks the policy up per job, never
/// mutates it.
#[derive(Clone, Copy, Debug)]
pub struct ChannelPolicy {
    /// Maximum delivery attempts on this channel (1-based attempt counter).
    pub max_attempts: u32,
    /// Delay curve for retryable failures.
    pub backoff: Backoff,
    /// Randomization applied on top of the base delay.
    pub jitter: JitterPolicy,
    /// Channel substituted on terminal failure or attempt exhaustion.
    pub fallback: Option<Channel>,
}

impl ChannelPolicy {
    /// Returns the closed policy table entry for a channel.
    pub fn for_channel(channel: Channel) -> Self {
        match channel {
            Channel::Push => Self {
                max_attempts: 3,
                backoff: Backoff::Exponential {
                    first: Duration::from_secs(5),
                    factor: 3.0,
                },
                jitter: JitterPolicy::None,
                fallback: Some(Channel::Sms),
            },
            Channel::Sms => Self {
                max_attempts: 2,
                backoff: Backoff::Fixed(Duration::from_secs(10)),
                jitter: JitterPolicy::None,
                fallback: Some(Channel::Email),
            },
            Channel::Email => Self {
                max_attempts: 3,
                backoff: Backoff::Exponential {
                    first: Duration::from_secs(10),
                    factor: 2.0,
                },
                jitter: JitterPolicy::None,
                fallback: None,
            },
        }
    }

    /// True when another attempt on the same channel is allowed after
    /// `attempt` (1-based) failed.
    #[inline]
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Computes the retry delay after the given failed attempt, with jitter
    /// applied.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.backoff.delay(attempt))
    }
}
