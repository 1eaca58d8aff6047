//! # Batch accounting types.
//!
//! A [`Batch`] tracks partial completion of one dispatch fan-out. Its
//! counters obey the invariant
//!
//! ```text
//! sent + failed + pending == total        (at every observed point)
//! ```
//!
//! `delivered` sits outside the sum: it reflects asynchronous provider
//! confirmations (a subset of `sent`) and is informational only.
//!
//! A [`DeliveryOutcome`] is the per-attempt audit record a worker emits
//! after each provider call.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::job::Channel;

/// Fan-out counters for one dispatch of one emergency.
///
/// Created once by the dispatcher; mutated only through the batch
/// aggregator's atomic increments; never deleted (retained for audit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub emergency_id: Uuid,
    pub batch_id: Uuid,
    pub total: u32,
    pub sent: u32,
    /// Provider-confirmed deliveries; subset of `sent`, not part of the sum.
    pub delivered: u32,
    pub failed: u32,
    pub pending: u32,
    pub created_at: SystemTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<SystemTime>,
}

impl Batch {
    /// Opens a new batch: everything pending, nothing sent or failed.
    ///
    /// A zero-job batch is valid and starts already completed.
    pub fn open(emergency_id: Uuid, batch_id: Uuid, total: u32) -> Self {
        let now = SystemTime::now();
        Self {
            emergency_id,
            batch_id,
            total,
            sent: 0,
            delivered: 0,
            failed: 0,
            pending: total,
            created_at: now,
            completed_at: if total == 0 { Some(now) } else { None },
        }
    }

    /// True while every job is in a terminal state. Cleared again when an
    /// extension (fallback or escalation wave) adds pending jobs to a
    /// drained batch.
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Checks the counter-sum invariant. Used by tests and debug assertions.
    pub fn sum_holds(&self) -> bool {
        self.sent + self.failed + self.pending == self.total
    }
}

/// Handle returned by a dispatch call.
///
/// Carries just enough identity to correlate later webhook confirmations
/// and acknowledgments; the dispatch itself never blocks on delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHandle {
    pub emergency_id: Uuid,
    pub batch_id: Uuid,
    /// Number of jobs produced at dispatch time (fallback and escalation
    /// jobs extend the batch later).
    pub total: u32,
}

/// Terminal (or scheduled) status of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Provider accepted the message.
    Sent,
    /// Provider confirmed delivery (webhook-driven, after the fact).
    Delivered,
    /// Terminal failure for this leaf; no further attempts on this channel.
    Failed,
    /// Retryable failure; the same job was re-enqueued with a delay.
    RetryScheduled,
}

impl DeliveryStatus {
    /// Returns a short stable label (snake_case) for logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::RetryScheduled => "retry_scheduled",
        }
    }
}

/// Audit record produced by a worker after each provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub emergency_id: Uuid,
    pub batch_id: Uuid,
    pub contact_id: Uuid,
    pub channel: Channel,
    pub attempt: u32,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: SystemTime,
}
