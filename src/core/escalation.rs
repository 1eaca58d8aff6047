//! # Escalation timer manager.
//!
//! Per-emergency cancellable timers that, absent an acknowledgment, enqueue
//! follow-up jobs to secondary contacts on a fixed cadence up to a cap.
//!
//! ## State machine (per emergency id)
//! ```text
//! ARMED ──(timeout)──► ESCALATING ──(cap reached)──► EXHAUSTED (terminal)
//!   │                      │
//!   └──(acknowledge)───────┴──(acknowledge)──► ACKNOWLEDGED (terminal)
//! ```
//!
//! State lives in an arena of [`EscalationState`] indexed by emergency id,
//! with an explicit [`CancellationToken`] per entry, so cancellation never
//! races timer callbacks against map mutation.
//!
//! ## Rules
//! - One timer per emergency id; re-arming an armed emergency is a no-op.
//! - Acknowledgment at any point cancels all pending firings and discards
//!   the state.
//! - The firing task re-checks its token immediately before enqueueing, so
//!   once cancellation is observed no further jobs are enqueued.
//! - Reaching the cap without acknowledgment is reported, not retried.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::events::{Bus, Event, EventKind};
use crate::model::{ContactPriority, Emergency, NotificationPriority};
use crate::resolve;

use super::aggregator::BatchAggregator;
use super::queue::JobQueue;

/// Observable phase of one emergency's escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationPhase {
    /// Waiting for the initial timeout; no firing yet.
    Armed,
    /// At least one firing happened; follow-ups are on the cadence.
    Escalating,
}

/// Mutable per-emergency escalation bookkeeping.
#[derive(Debug, Clone, Copy)]
struct EscalationState {
    phase: EscalationPhase,
    follow_ups: u32,
}

struct Entry {
    token: CancellationToken,
    state: Arc<Mutex<EscalationState>>,
}

/// Arena of per-emergency escalation timers.
pub struct EscalationManager {
    entries: Mutex<HashMap<Uuid, Entry>>,
    queue: Arc<JobQueue>,
    aggregator: Arc<BatchAggregator>,
    bus: Bus,
    cfg: EngineConfig,
    /// Parent token; engine shutdown cancels every timer at once.
    runtime_token: CancellationToken,
}

impl EscalationManager {
    pub fn new(
        queue: Arc<JobQueue>,
        aggregator: Arc<BatchAggregator>,
        bus: Bus,
        cfg: EngineConfig,
        runtime_token: CancellationToken,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            queue,
            aggregator,
            bus,
            cfg,
            runtime_token,
        }
    }

    /// Arms the escalation timer for an emergency.
    ///
    /// The emergency snapshot is kept so firings can build secondary-contact
    /// jobs without a store round-trip; the jobs extend `batch_id`.
    pub fn arm(self: &Arc<Self>, emergency: Emergency, batch_id: Uuid) {
        let token = self.runtime_token.child_token();
        let state = {
            let mut entries = self.entries.lock().expect("escalation map poisoned");
            if entries.contains_key(&emergency.id) {
                warn!(emergency_id = %emergency.id, "escalation already armed");
                return;
            }
            let state = Arc::new(Mutex::new(EscalationState {
                phase: EscalationPhase::Armed,
                follow_ups: 0,
            }));
            entries.insert(
                emergency.id,
                Entry {
                    token: token.clone(),
                    state: Arc::clone(&state),
                },
            );
            state
        };

        self.bus
            .publish(Event::now(EventKind::EscalationArmed).with_emergency(emergency.id));

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_timer(emergency, batch_id, token, state).await;
        });
    }

    /// Acknowledgment signal: cancels all pending firings for the emergency
    /// and discards its state.
    ///
    /// Returns `false` when no escalation was armed (already acknowledged,
    /// exhausted, or never dispatched).
    pub fn acknowledge(&self, emergency_id: Uuid, contact_id: Uuid) -> bool {
        let entry = {
            let mut entries = self.entries.lock().expect("escalation map poisoned");
            entries.remove(&emergency_id)
        };
        match entry {
            Some(entry) => {
                entry.token.cancel();
                self.bus.publish(
                    Event::now(EventKind::EscalationAcknowledged)
                        .with_emergency(emergency_id)
                        .with_contact(contact_id),
                );
                true
            }
            None => false,
        }
    }

    /// Observable phase for an emergency, `None` once terminal.
    pub fn phase(&self, emergency_id: Uuid) -> Option<EscalationPhase> {
        self.state_of(emergency_id).map(|s| s.phase)
    }

    /// Number of follow-up firings so far, `None` once terminal.
    pub fn follow_up_count(&self, emergency_id: Uuid) -> Option<u32> {
        self.state_of(emergency_id).map(|s| s.follow_ups)
    }

    fn state_of(&self, emergency_id: Uuid) -> Option<EscalationState> {
        let entries = self.entries.lock().expect("escalation map poisoned");
        entries
            .get(&emergency_id)
            .map(|e| *e.state.lock().expect("escalation state poisoned"))
    }

    /// Number of emergencies currently being monitored.
    pub fn active_count(&self) -> usize {
        self.entries.lock().expect("escalation map poisoned").len()
    }

    async fn run_timer(
        &self,
        emergency: Emergency,
        batch_id: Uuid,
        token: CancellationToken,
        state: Arc<Mutex<EscalationState>>,
    ) {
        select! {
            _ = time::sleep(self.cfg.escalation_timeout) => {}
            _ = token.cancelled() => return,
        }

        for fire in 1..=self.cfg.max_follow_ups {
            // An acknowledgment may have landed while the sleep elapsed;
            // never enqueue once cancellation is observed.
            if token.is_cancelled() {
                return;
            }
            {
                let mut s = state.lock().expect("escalation state poisoned");
                s.phase = EscalationPhase::Escalating;
                s.follow_ups = fire;
            }
            self.fire(&emergency, batch_id, fire).await;

            select! {
                _ = time::sleep(self.cfg.follow_up_interval) => {}
                _ = token.cancelled() => return,
            }
        }

        // Cap reached without acknowledgment: report, do not retry.
        let mut entries = self.entries.lock().expect("escalation map poisoned");
        if entries.remove(&emergency.id).is_some() {
            self.bus.publish(
                Event::now(EventKind::EscalationExhausted)
                    .with_emergency(emergency.id)
                    .with_attempt(self.cfg.max_follow_ups),
            );
        }
    }

    /// Builds and enqueues one follow-up wave to secondary contacts.
    async fn fire(&self, emergency: &Emergency, batch_id: Uuid, fire: u32) {
        let jobs: Vec<_> = emergency
            .contacts_with_priority(ContactPriority::Secondary)
            .into_iter()
            .filter_map(|contact| {
                resolve::job_for_contact(
                    emergency,
                    batch_id,
                    contact,
                    NotificationPriority::High,
                )
            })
            .collect();

        if !jobs.is_empty() {
            self.aggregator.extend(batch_id, jobs.len() as u32).await;
            for job in jobs {
                let enqueued = Event::now(EventKind::JobEnqueued)
                    .with_emergency(job.emergency_id)
                    .with_batch(job.batch_id)
                    .with_contact(job.contact.id)
                    .with_channel(job.channel);
                if self.queue.push(job) {
                    self.bus.publish(enqueued);
                } else {
                    // Shutdown closed the queue mid-wave; close the slot the
                    // extension above opened for this job.
                    self.aggregator.record_failed(batch_id).await;
                }
            }
        }

        self.bus.publish(
            Event::now(EventKind::EscalationFired)
                .with_emergency(emergency.id)
                .with_batch(batch_id)
                .with_attempt(fire),
        );
    }
}
