//! # Runtime events emitted by the dispatch engine.
//!
//! The [`EventKind`] enum classifies event types across five categories:
//! - **Job lifecycle**: enqueue, send, failure, retry, fallback
//! - **Batch lifecycle**: opened, completed, delivery confirmed
//! - **Escalation lifecycle**: armed, fired, acknowledged, exhausted
//! - **Shutdown**: requested, all-stopped, grace exceeded
//! - **Subscriber faults**: overflow, panic
//!
//! The [`Event`] struct carries additional metadata such as timestamps,
//! emergency/batch/contact ids, channel, attempt counters, and delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore the exact order when events are
//! observed out of order across subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use uuid::Uuid;

use crate::model::Channel;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Job lifecycle ===
    /// A job entered the queue (initial dispatch, retry, fallback, or
    /// escalation enqueue).
    JobEnqueued,
    /// Provider accepted the message for a job.
    JobSent,
    /// A job reached terminal failure on its channel.
    JobFailed,
    /// A retryable failure scheduled the same job for a delayed re-enqueue.
    RetryScheduled,
    /// A terminal failure substituted an equivalent job on the fallback
    /// channel.
    FallbackEnqueued,
    /// A provider call exceeded the bounded timeout (always followed by
    /// `RetryScheduled` or `JobFailed`).
    ProviderTimeout,

    // === Batch lifecycle ===
    /// A batch was opened by the dispatcher.
    BatchOpened,
    /// A batch's pending count reached zero for the first time.
    BatchCompleted,
    /// A webhook confirmed delivery for a job in the batch.
    DeliveryConfirmed,

    // === Escalation lifecycle ===
    /// An escalation timer was armed for an emergency.
    EscalationArmed,
    /// The timer fired: secondary-contact jobs were enqueued.
    EscalationFired,
    /// An acknowledgment cancelled the escalation.
    EscalationAcknowledged,
    /// The follow-up cap was reached without acknowledgment.
    EscalationExhausted,

    // === Store faults ===
    /// Bounded store retries were exhausted; the update is lost for
    /// aggregation purposes.
    StoreRetryExhausted,

    // === Shutdown ===
    /// Engine shutdown was requested.
    ShutdownRequested,
    /// All workers stopped within the configured grace period.
    AllStoppedWithin,
    /// Grace period exceeded; some workers did not stop in time.
    GraceExceeded,

    // === Subscriber faults ===
    /// Subscriber dropped an event (queue full or worker closed).
    SubscriberOverflow,
    /// Subscriber panicked during event processing.
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Emergency the event belongs to, if applicable.
    pub emergency_id: Option<Uuid>,
    /// Batch the event belongs to, if applicable.
    pub batch_id: Option<Uuid>,
    /// Recipient contact, if applicable.
    pub contact_id: Option<Uuid>,
    /// Delivery channel, if applicable.
    pub channel: Option<Channel>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Retry/backoff delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            emergency_id: None,
            batch_id: None,
            contact_id: None,
            channel: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Attaches the emergency id.
    #[inline]
    pub fn with_emergency(mut self, id: Uuid) -> Self {
        self.emergency_id = Some(id);
        self
    }

    /// Attaches the batch id.
    #[inline]
    pub fn with_batch(mut self, id: Uuid) -> Self {
        self.batch_id = Some(id);
        self
    }

    /// Attaches the recipient contact id.
    #[inline]
    pub fn with_contact(mut self, id: Uuid) -> Self {
        self.contact_id = Some(id);
        self
    }

    /// Attaches the delivery channel.
    #[inline]
    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a retry delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::now(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::now(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} panic={info}"))
    }

    #[inline]
    pub fn is_subscriber_fault(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
