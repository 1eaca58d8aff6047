//! Retry and fallback policies.
//!
//! This module groups the knobs that control **how often** a failing job is
//! retried, **how long** to wait between attempts, and **which channel**
//! substitutes for a dead one.
//!
//! ## Contents
//! - [`ChannelPolicy`] — per-channel max attempts, backoff, fallback target
//! - [`Backoff`] — fixed or exponential delay curves
//! - [`JitterPolicy`] — randomization strategy to avoid thundering herd
//!
//! ## Quick wiring
//! ```text
//! worker sees a failure
//!      └─► ChannelPolicy::for_channel(job.channel)
//!           ├─ retryable && attempt < max  → delay(attempt), delayed re-enqueue
//!           └─ terminal || attempts gone   → fallback channel (if endpoint exists)
//! ```
//!
//! The table is closed: every channel's policy is fixed at compile time, and
//! the fallback chain Push → Sms → Email terminates because Email has no
//! fallback target.

mod jitter;
mod retry;

pub use jitter::JitterPolicy;
pub use retry::{Backoff, ChannelPolicy};
