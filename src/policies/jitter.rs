//! # Jitter policy for retry delays.
//!
//! [`JitterPolicy`] adds randomness to retry delays to prevent thundering
//! herd effects when many jobs retry against the same provider at once.
//!
//! - [`JitterPolicy::None`] — no randomization, deterministic delays (the
//!   engine's per-channel table uses this so delivery timing stays
//!   predictable and testable)
//! - [`JitterPolicy::Full`] — random delay in `[0, delay]`
//! - [`JitterPolicy::Equal`] — `delay/2 + random[0, delay/2]`

use rand::Rng;
use std::time::Duration;

/// Policy controlling randomization of retry delays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JitterPolicy {
    /// No jitter: use the exact backoff delay.
    None,
    /// Full jitter: random delay in `[0, delay]`. Most aggressive spreading.
    Full,
    /// Equal jitter: `delay/2 + random[0, delay/2]`. Preserves ~75% of the
    /// original delay on average.
    Equal,
}

impl Default for JitterPolicy {
    /// Returns [`JitterPolicy::None`].
    fn default() -> Self {
        JitterPolicy::None
    }
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Self::full_jitter(delay),
            JitterPolicy::Equal => Self::equal_jitter(delay),
        }
    }

    /// Full jitter: `random[0, delay]`.
    fn full_jitter(delay: Duration) -> Duration {
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(0..=ms))
    }

    /// Equal jitter: `delay/2 + random[0, delay/2]`.
    fn equal_jitter(delay: Duration) -> Duration {
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        let half = ms / 2;
        let mut rng = rand::rng();
        let jitter = if half == 0 {
            0
        } else {
            rng.random_range(0..=half)
        };
        Duration::from_millis(half + jitter)
    }
}
