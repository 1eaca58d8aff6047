//! # Batch aggregator: per-batch counters under concurrent worker writes.
//!
//! Tracks delivery counters per batch id and preserves the sum invariant
//! `sent + failed + pending == total` at every observed point. Mutable state
//! is partitioned by batch id: one mutex per batch, a shared read-mostly map
//! to find it, no global lock, so throughput scales with the number of
//! concurrent emergencies.
//!
//! ## Rules
//! - All increments are commutative and applied under the batch's mutex;
//!   the mutex is never held across an await.
//! - Completion (`completed_at` set) happens when `pending` reaches zero.
//!   An extension past zero pending (an escalation wave landing after the
//!   initial jobs resolved) reopens the batch; a later drain publishes a
//!   fresh `BatchCompleted`.
//! - `delivered` is webhook-driven and informational: it never touches the
//!   pending/sent/failed triad. A confirmation for an already-completed
//!   batch is logged, not reconciled.
//! - Every mutation persists a snapshot through the store with bounded
//!   retries; sustained store failure never blocks the delivery path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use tracing::warn;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::events::{Bus, Event, EventKind};
use crate::model::Batch;
use crate::store::{NotificationStore, persist_with_retry};

/// Aggregates batch counters from concurrent workers and webhook
/// confirmations.
pub struct BatchAggregator {
    slots: RwLock<HashMap<Uuid, Arc<Mutex<Batch>>>>,
    store: Arc<dyn NotificationStore>,
    bus: Bus,
    cfg: EngineConfig,
}

impl BatchAggregator {
    pub fn new(store: Arc<dyn NotificationStore>, bus: Bus, cfg: EngineConfig) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            store,
            bus,
            cfg,
        }
    }

    /// Registers a freshly persisted batch and publishes `BatchOpened`.
    ///
    /// A zero-job batch arrives already completed and additionally publishes
    /// `BatchCompleted`.
    pub fn open(&self, batch: Batch) {
        let opened = Event::now(EventKind::BatchOpened)
            .with_emergency(batch.emergency_id)
            .with_batch(batch.batch_id);
        let completed = batch.is_completed().then(|| {
            Event::now(EventKind::BatchCompleted)
                .with_emergency(batch.emergency_id)
                .with_batch(batch.batch_id)
        });

        self.slots
            .write()
            .expect("aggregator map poisoned")
            .insert(batch.batch_id, Arc::new(Mutex::new(batch)));

        self.bus.publish(opened);
        if let Some(ev) = completed {
            self.bus.publish(ev);
        }
    }

    /// Extends a batch by `n` additional pending jobs (fallback or
    /// escalation enqueues).
    ///
    /// Extending a drained batch clears `completed_at`: snapshots never
    /// report a completed batch with live pending jobs.
    pub async fn extend(&self, batch_id: Uuid, n: u32) {
        self.mutate(batch_id, |batch| {
            batch.total += n;
            batch.pending += n;
            if batch.pending > 0 {
                batch.completed_at = None;
            }
        })
        .await;
    }

    /// Applies a `SENT` outcome: pending → sent.
    pub async fn record_sent(&self, batch_id: Uuid) {
        self.mutate(batch_id, |batch| {
            batch.pending = batch.pending.saturating_sub(1);
            batch.sent += 1;
        })
        .await;
    }

    /// Applies a terminal `FAILED` outcome: pending → failed.
    pub async fn record_failed(&self, batch_id: Uuid) {
        self.mutate(batch_id, |batch| {
            batch.pending = batch.pending.saturating_sub(1);
            batch.failed += 1;
        })
        .await;
    }

    /// Applies a webhook-confirmed `DELIVERED`: increments `delivered` only.
    pub async fn record_delivered(&self, batch_id: Uuid, contact_id: Option<Uuid>) {
        let Some(slot) = self.slot(batch_id) else {
            warn!(%batch_id, "delivery confirmation for unknown batch");
            return;
        };
        let snapshot = {
            let mut batch = slot.lock().expect("batch mutex poisoned");
            batch.delivered += 1;
            if batch.is_completed() && batch.delivered > batch.sent {
                // Late confirmation for a leaf the engine counted FAILED.
                // Log-only: the triad is never rewritten after the fact.
                warn!(%batch_id, delivered = batch.delivered, sent = batch.sent,
                    "delivery confirmed for a job already counted failed");
            }
            batch.clone()
        };

        let mut ev = Event::now(EventKind::DeliveryConfirmed)
            .with_emergency(snapshot.emergency_id)
            .with_batch(batch_id);
        if let Some(contact) = contact_id {
            ev = ev.with_contact(contact);
        }
        self.bus.publish(ev);
        self.persist(&snapshot).await;
    }

    /// Returns a point-in-time copy of the batch counters.
    pub fn snapshot(&self, batch_id: Uuid) -> Option<Batch> {
        self.slot(batch_id)
            .map(|slot| slot.lock().expect("batch mutex poisoned").clone())
    }

    fn slot(&self, batch_id: Uuid) -> Option<Arc<Mutex<Batch>>> {
        self.slots
            .read()
            .expect("aggregator map poisoned")
            .get(&batch_id)
            .cloned()
    }

    /// Applies `f` under the batch mutex, detects the one-time completion
    /// transition, then publishes/persists outside the lock.
    async fn mutate<F>(&self, batch_id: Uuid, f: F)
    where
        F: FnOnce(&mut Batch),
    {
        let Some(slot) = self.slot(batch_id) else {
            warn!(%batch_id, "counter update for unknown batch");
            return;
        };
        let (snapshot, completed_now) = {
            let mut batch = slot.lock().expect("batch mutex poisoned");
            f(&mut batch);
            debug_assert!(batch.sum_holds());
            let completed_now = batch.pending == 0 && batch.completed_at.is_none();
            if completed_now {
                batch.completed_at = Some(SystemTime::now());
            }
            (batch.clone(), completed_now)
        };

        if completed_now {
            self.bus.publish(
                Event::now(EventKind::BatchCompleted)
                    .with_emergency(snapshot.emergency_id)
                    .with_batch(batch_id),
            );
        }
        self.persist(&snapshot).await;
    }

    async fn persist(&self, snapshot: &Batch) {
        persist_with_retry(
            &self.bus,
            self.cfg.store_retry_attempts,
            self.cfg.store_retry_delay,
            "update_batch",
            || async { self.store.update_batch(snapshot).await },
        )
        .await;
    }
}
