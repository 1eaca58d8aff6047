//! Error types used by the dispatch engine and its capability boundaries.
//!
//! This module defines four error enums:
//!
//! - [`SendError`] — errors returned by a channel provider ([`ChannelSender`](crate::ChannelSender)).
//! - [`StoreError`] — errors returned by the persistence boundary ([`NotificationStore`](crate::NotificationStore)).
//! - [`DispatchError`] — errors surfaced to callers of [`Dispatcher::dispatch`](crate::Dispatcher::dispatch).
//! - [`RuntimeError`] — errors raised by the engine lifecycle itself.
//!
//! The types provide helper methods (`as_label`) for logging/metrics and
//! [`SendError::is_retryable`] for the worker's retry decision.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by a channel provider call.
///
/// The worker classifies every provider failure into exactly one of these
/// variants; the classification drives the retry/fallback decision:
/// retryable errors are re-enqueued per the channel policy, terminal errors
/// go straight to the fallback chain.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum SendError {
    /// Transient provider failure (outage, rate limit). Safe to retry.
    #[error("retryable provider error: {reason}")]
    Retryable {
        /// The underlying provider message.
        reason: String,
    },

    /// Permanent rejection (invalid token, bad address, carrier rejection).
    /// Never retried; triggers the fallback chain instead.
    #[error("terminal provider error (no retry): {reason}")]
    Terminal {
        /// The underlying provider message.
        reason: String,
    },

    /// Provider call exceeded the engine's bounded timeout.
    /// Treated as retryable, not fatal.
    #[error("provider call timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },
}

impl SendError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use alertvisor::SendError;
    ///
    /// let err = SendError::Retryable { reason: "503".into() };
    /// assert_eq!(err.as_label(), "send_retryable");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SendError::Retryable { .. } => "send_retryable",
            SendError::Terminal { .. } => "send_terminal",
            SendError::Timeout { .. } => "send_timeout",
        }
    }

    /// Indicates whether the error is safe to retry on the same channel.
    ///
    /// Returns `true` for [`SendError::Retryable`] and [`SendError::Timeout`],
    /// `false` for [`SendError::Terminal`].
    ///
    /// # Example
    /// ```
    /// use alertvisor::SendError;
    ///
    /// let transient = SendError::Retryable { reason: "rate limited".into() };
    /// assert!(transient.is_retryable());
    ///
    /// let rejected = SendError::Terminal { reason: "invalid token".into() };
    /// assert!(!rejected.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SendError::Retryable { .. } | SendError::Timeout { .. }
        )
    }
}

/// # Errors produced by the persistence boundary.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The backing store is unreachable or rejected the write.
    #[error("store unavailable: {reason}")]
    Unavailable {
        /// The underlying store message.
        reason: String,
    },
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Unavailable { .. } => "store_unavailable",
        }
    }
}

/// # Errors surfaced to callers of `dispatch`.
///
/// A dispatch fails only when the initial batch record cannot be persisted.
/// The failure is atomic: no jobs were enqueued and no timer was armed, so
/// the caller must retry the full dispatch.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The initial batch record could not be persisted.
    #[error("dispatch aborted: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatchError::Store(_) => "dispatch_store",
        }
    }
}

/// # Errors produced by the engine lifecycle.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some workers remained stuck.
    #[error("shutdown grace {grace:?} exceeded; {stuck} workers still running")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Number of workers that did not stop in time.
        stuck: usize,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}
