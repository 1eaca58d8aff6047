//! # Dispatch entry point.
//!
//! [`Dispatcher`] turns one inbound emergency into a batch of notification
//! jobs and arms the escalation timer. The call is non-blocking with respect
//! to delivery: it persists the batch record, enqueues the jobs, and
//! returns; workers take over from there.
//!
//! ## Rules
//! - The batch record is persisted **before** any job becomes visible to a
//!   worker; a failed `create_batch` aborts the dispatch atomically (no jobs
//!   enqueued, no timer armed).
//! - Contacts with no reachable endpoint are skipped; an emergency whose
//!   contacts are all unreachable still yields a valid, already-completed
//!   zero-job batch, and no timer is armed.
//! - Operator-triggered escalations reuse the same fan-out at High priority
//!   without arming a second timer.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::events::{Bus, Event, EventKind};
use crate::model::{
    Batch, BatchHandle, Emergency, EmergencyCreated, EmergencyEscalation, NotificationJob,
    NotificationPriority,
};
use crate::resolve;
use crate::store::NotificationStore;

use super::aggregator::BatchAggregator;
use super::escalation::EscalationManager;
use super::queue::JobQueue;

/// Fan-out entry point of the engine.
pub struct Dispatcher {
    queue: Arc<JobQueue>,
    aggregator: Arc<BatchAggregator>,
    escalation: Arc<EscalationManager>,
    store: Arc<dyn NotificationStore>,
    bus: Bus,
}

impl Dispatcher {
    pub(crate) fn new(
        queue: Arc<JobQueue>,
        aggregator: Arc<BatchAggregator>,
        escalation: Arc<EscalationManager>,
        store: Arc<dyn NotificationStore>,
        bus: Bus,
    ) -> Self {
        Self {
            queue,
            aggregator,
            escalation,
            store,
            bus,
        }
    }

    /// Dispatches a newly created emergency: full contact fan-out plus an
    /// armed escalation timer.
    pub async fn dispatch(&self, event: EmergencyCreated) -> Result<BatchHandle, DispatchError> {
        let emergency = event.into_emergency();
        let batch_id = Uuid::new_v4();
        let jobs = resolve::jobs_for_emergency(&emergency, batch_id);

        let handle = self.open_and_enqueue(&emergency, batch_id, jobs).await?;
        if handle.total > 0 {
            self.escalation.arm(emergency, batch_id);
        }
        Ok(handle)
    }

    /// Dispatches an operator-triggered escalation: secondary contacts only,
    /// at High priority, no timer.
    pub async fn dispatch_escalation(
        &self,
        event: EmergencyEscalation,
    ) -> Result<BatchHandle, DispatchError> {
        let emergency = event.into_emergency();
        let batch_id = Uuid::new_v4();
        let jobs: Vec<NotificationJob> = emergency
            .contacts
            .iter()
            .filter_map(|contact| {
                resolve::job_for_contact(&emergency, batch_id, contact, NotificationPriority::High)
            })
            .collect();

        self.open_and_enqueue(&emergency, batch_id, jobs).await
    }

    /// Acknowledgment from a contact: cancels the emergency's escalation.
    ///
    /// Returns `false` when no escalation was active.
    pub fn acknowledge(&self, emergency_id: Uuid, contact_id: Uuid) -> bool {
        self.escalation.acknowledge(emergency_id, contact_id)
    }

    /// Webhook-confirmed delivery for a job in a batch.
    pub async fn confirm_delivery(&self, batch_id: Uuid, contact_id: Option<Uuid>) {
        self.aggregator.record_delivered(batch_id, contact_id).await;
    }

    /// Point-in-time batch counters, if the batch is known.
    pub fn batch_snapshot(&self, batch_id: Uuid) -> Option<Batch> {
        self.aggregator.snapshot(batch_id)
    }

    async fn open_and_enqueue(
        &self,
        emergency: &Emergency,
        batch_id: Uuid,
        jobs: Vec<NotificationJob>,
    ) -> Result<BatchHandle, DispatchError> {
        let total = jobs.len() as u32;
        let batch = Batch::open(emergency.id, batch_id, total);

        // Persist first: a store failure here aborts before anything is
        // visible to workers.
        self.store.create_batch(&batch).await?;
        self.aggregator.open(batch);

        info!(
            emergency_id = %emergency.id,
            %batch_id,
            total,
            kind = emergency.emergency_type.as_label(),
            "dispatching emergency"
        );

        for job in jobs {
            self.bus.publish(
                Event::now(EventKind::JobEnqueued)
                    .with_emergency(job.emergency_id)
                    .with_batch(job.batch_id)
                    .with_contact(job.contact.id)
                    .with_channel(job.channel),
            );
            self.queue.push(job);
        }

        Ok(BatchHandle {
            emergency_id: emergency.id,
            batch_id,
            total,
        })
    }
}
