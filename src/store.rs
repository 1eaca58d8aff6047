//! # Persistence capability boundary.
//!
//! Batch records and per-attempt audit records are persisted through an
//! injected [`NotificationStore`]. The engine distinguishes two failure
//! situations:
//!
//! - `create_batch` during dispatch: fatal to that dispatch call, surfaced
//!   to the caller, fully rolled back (nothing was enqueued yet).
//! - `update_batch` / `record_outcome` on the delivery path: retried with
//!   bounded attempts via [`persist_with_retry`]; sustained failure is logged
//!   as critical and reported on the bus, never propagated to workers.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::{Bus, Event, EventKind};
use crate::model::{Batch, DeliveryOutcome};

/// # Injected persistence capability.
///
/// Backs batch counters and the delivery audit trail. Batch records are
/// never deleted; they are retained for audit.
#[async_trait]
pub trait NotificationStore: Send + Sync + 'static {
    /// Persists a freshly opened batch. Called exactly once per dispatch,
    /// before any job is enqueued.
    async fn create_batch(&self, batch: &Batch) -> Result<(), StoreError>;

    /// Persists an updated counter snapshot for an existing batch.
    async fn update_batch(&self, batch: &Batch) -> Result<(), StoreError>;

    /// Reads a batch record back, `None` when unknown.
    ///
    /// The engine keeps live counters in memory and never calls this on the
    /// delivery path; it exists for the surrounding service's read side.
    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>, StoreError>;

    /// Appends one delivery outcome to the audit trail.
    async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<(), StoreError>;
}

/// Runs a store operation with bounded retries and a fixed delay.
///
/// On sustained failure the update is considered lost for aggregation
/// purposes: a critical log line is emitted, a
/// [`EventKind::StoreRetryExhausted`] event is published, and the delivery
/// path continues (delivery may still have occurred).
pub(crate) async fn persist_with_retry<F, Fut>(
    bus: &Bus,
    attempts: u32,
    delay: Duration,
    what: &'static str,
    op: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match op().await {
            Ok(()) => return,
            Err(err) if attempt < attempts => {
                warn!(what, attempt, error = %err, "store write failed, retrying");
                time::sleep(delay).await;
            }
            Err(err) => {
                error!(what, attempts, error = %err, "store write lost after bounded retries");
                bus.publish(
                    Event::now(EventKind::StoreRetryExhausted).with_reason(format!(
                        "{what}: {err}"
                    )),
                );
            }
        }
    }
}
