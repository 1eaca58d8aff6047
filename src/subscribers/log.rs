//! # Tracing-backed logging subscriber.
//!
//! [`LogWriter`] forwards engine events to `tracing` in a compact
//! human-readable form. Enabled via the `logging` feature; useful as a
//! default observability hook and as a reference `Subscribe` implementation.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Logging subscriber writing through `tracing`.
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::JobEnqueued => {
                info!(emergency = ?e.emergency_id, contact = ?e.contact_id, channel = ?e.channel, "job enqueued");
            }
            EventKind::JobSent => {
                info!(emergency = ?e.emergency_id, contact = ?e.contact_id, channel = ?e.channel, attempt = ?e.attempt, "job sent");
            }
            EventKind::JobFailed => {
                warn!(emergency = ?e.emergency_id, contact = ?e.contact_id, channel = ?e.channel, reason = ?e.reason, "job failed");
            }
            EventKind::RetryScheduled => {
                info!(contact = ?e.contact_id, channel = ?e.channel, attempt = ?e.attempt, delay_ms = ?e.delay_ms, "retry scheduled");
            }
            EventKind::FallbackEnqueued => {
                info!(contact = ?e.contact_id, channel = ?e.channel, "fallback enqueued");
            }
            EventKind::ProviderTimeout => {
                warn!(contact = ?e.contact_id, channel = ?e.channel, "provider timeout");
            }
            EventKind::BatchOpened => {
                info!(emergency = ?e.emergency_id, batch = ?e.batch_id, "batch opened");
            }
            EventKind::BatchCompleted => {
                info!(emergency = ?e.emergency_id, batch = ?e.batch_id, "batch completed");
            }
            EventKind::DeliveryConfirmed => {
                info!(batch = ?e.batch_id, contact = ?e.contact_id, "delivery confirmed");
            }
            EventKind::EscalationArmed => {
                info!(emergency = ?e.emergency_id, "escalation armed");
            }
            EventKind::EscalationFired => {
                warn!(emergency = ?e.emergency_id, attempt = ?e.attempt, "escalation fired");
            }
            EventKind::EscalationAcknowledged => {
                info!(emergency = ?e.emergency_id, contact = ?e.contact_id, "escalation acknowledged");
            }
            EventKind::EscalationExhausted => {
                warn!(emergency = ?e.emergency_id, "escalation exhausted");
            }
            EventKind::StoreRetryExhausted => {
                warn!(reason = ?e.reason, "store retries exhausted");
            }
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::AllStoppedWithin => info!("all workers stopped within grace"),
            EventKind::GraceExceeded => warn!("shutdown grace exceeded"),
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                warn!(reason = ?e.reason, "subscriber fault");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
