//! # Two-lane strict-priority job queue.
//!
//! Holds pending [`NotificationJob`]s in two FIFO lanes: emergency and
//! normal. Consumers drain the emergency lane to exhaustion before touching
//! the normal lane — strict priority, not weighted. An emergency lane that
//! never empties starves normal jobs by design; the system's purpose is
//! emergency delivery.
//!
//! ## Rules
//! - Safe for concurrent producers (dispatcher, escalation timers, retry
//!   re-enqueues) and concurrent consumers (workers).
//! - FIFO within each lane.
//! - `close()` wakes all waiting consumers; `pop()` keeps draining remaining
//!   jobs after close and returns `None` once the lanes are empty.
//! - Jobs at `NotificationPriority::Emergency` go to the emergency lane;
//!   everything else goes to the normal lane.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::model::NotificationJob;

#[derive(Default)]
struct Lanes {
    emergency: VecDeque<NotificationJob>,
    normal: VecDeque<NotificationJob>,
}

/// Two-lane FIFO queue feeding the worker pool.
///
/// Lane access is a short critical section under a `std` mutex (never held
/// across an await); waiting consumers park on a [`Notify`].
pub struct JobQueue {
    lanes: Mutex<Lanes>,
    notify: Notify,
    closed: AtomicBool,
}

impl JobQueue {
    /// Creates an empty open queue.
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(Lanes::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues a job into the lane matching its priority.
    ///
    /// Returns `false` (dropping the job) when the queue is closed.
    pub fn push(&self, job: NotificationJob) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        {
            let mut lanes = self.lanes.lock().expect("queue mutex poisoned");
            if job.is_emergency() {
                lanes.emergency.push_back(job);
            } else {
                lanes.normal.push_back(job);
            }
        }
        self.notify.notify_one();
        true
    }

    /// Takes the next job, preferring the emergency lane.
    ///
    /// Waits when both lanes are empty; returns `None` once the queue is
    /// closed and fully drained.
    pub async fn pop(&self) -> Option<NotificationJob> {
        loop {
            // Create the permit future before the emptiness check so a push
            // landing in between cannot be lost.
            let notified = self.notify.notified();
            if let Some(job) = self.try_pop() {
                return Some(job);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Non-blocking variant of [`JobQueue::pop`].
    pub fn try_pop(&self) -> Option<NotificationJob> {
        let mut lanes = self.lanes.lock().expect("queue mutex poisoned");
        lanes.emergency.pop_front().or_else(|| lanes.normal.pop_front())
    }

    /// Closes the queue: rejects further pushes and wakes all consumers.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Total number of queued jobs across both lanes.
    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock().expect("queue mutex poisoned");
        lanes.emergency.len() + lanes.normal.len()
    }

    /// True when both lanes are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
