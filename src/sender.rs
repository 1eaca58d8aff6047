//! # Channel provider capability boundary.
//!
//! The engine never talks to push/SMS/email providers directly; it invokes
//! an injected [`ChannelSender`]. The engine is agnostic to the concrete
//! provider: it only consumes the [`SendError`] classification to drive the
//! retry/fallback decision.
//!
//! Implementations should perform their own network I/O asynchronously; the
//! worker wraps every call in a bounded timeout, so a hung provider cannot
//! pin a worker.

use async_trait::async_trait;

use crate::error::SendError;
use crate::model::{Channel, Destination};

/// # Injected provider capability.
///
/// One implementation typically multiplexes all three channels (or delegates
/// to per-channel SDK clients); the engine calls it from every worker
/// concurrently, so implementations must be `Send + Sync`.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use alertvisor::{Channel, ChannelSender, Destination, SendError};
///
/// struct NullSender;
///
/// #[async_trait]
/// impl ChannelSender for NullSender {
///     async fn send(
///         &self,
///         _channel: Channel,
///         _destination: &Destination,
///         _content: &str,
///     ) -> Result<(), SendError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ChannelSender: Send + Sync + 'static {
    /// Delivers `content` to `destination` over `channel`.
    ///
    /// Implementations classify failures: transient provider trouble as
    /// [`SendError::Retryable`], permanent rejections as
    /// [`SendError::Terminal`]. They should **not** implement their own
    /// retries; the engine owns the retry policy.
    async fn send(
        &self,
        channel: Channel,
        destination: &Destination,
        content: &str,
    ) -> Result<(), SendError>;
}
