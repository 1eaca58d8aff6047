//! # Notification jobs.
//!
//! A [`NotificationJob`] is one delivery attempt on one channel for one
//! contact. Jobs are created by the dispatcher or the escalation timer
//! manager, consumed exactly once per attempt by a worker, and re-enqueued
//! (same identity, incremented attempt) on retryable failure.
//!
//! The job carries a full [`Contact`](crate::Contact) snapshot rather than
//! just the active destination: on terminal failure the worker consults the
//! snapshot for the fallback channel's endpoint without a store round-trip.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::emergency::Contact;

/// Delivery mechanism for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Push,
    Sms,
    Email,
}

impl Channel {
    /// Returns a short stable label (snake_case) for logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Sms => "sms",
            Channel::Email => "email",
        }
    }
}

/// Urgency of a notification job.
///
/// Jobs at [`NotificationPriority::Emergency`] are routed to the queue's
/// emergency lane; everything else goes to the normal lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Emergency,
}

/// Channel-specific delivery endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    PushToken(String),
    Phone(String),
    Email(String),
}

impl Destination {
    /// The channel this destination belongs to.
    pub fn channel(&self) -> Channel {
        match self {
            Destination::PushToken(_) => Channel::Push,
            Destination::Phone(_) => Channel::Sms,
            Destination::Email(_) => Channel::Email,
        }
    }
}

/// One pending delivery on one channel for one contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub emergency_id: Uuid,
    pub batch_id: Uuid,
    /// Snapshot of the recipient, including fallback endpoints.
    pub contact: Contact,
    pub channel: Channel,
    pub priority: NotificationPriority,
    /// Rendered alert text sent to the provider.
    pub content: String,
    pub destination: Destination,
    /// 1-based attempt counter; incremented on each retryable re-enqueue.
    pub attempt: u32,
    pub created_at: SystemTime,
}

impl NotificationJob {
    /// Returns a copy of this job for its next attempt on the same channel.
    pub fn next_attempt(&self) -> Self {
        let mut job = self.clone();
        job.attempt += 1;
        job
    }

    /// True when this job belongs in the queue's emergency lane.
    pub fn is_emergency(&self) -> bool {
        self.priority == NotificationPriority::Emergency
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::emergency::ContactPriority;

    fn job() -> NotificationJob {
        NotificationJob {
            emergency_id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            contact: Contact {
                id: Uuid::new_v4(),
                name: "Ada".into(),
                phone: Some("+4915700000000".into()),
                email: None,
                push_token: Some("tok-1".into()),
                priority: ContactPriority::Primary,
            },
            channel: Channel::Push,
            priority: NotificationPriority::Emergency,
            content: "help".into(),
            destination: Destination::PushToken("tok-1".into()),
            attempt: 1,
            created_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_next_attempt_preserves_identity() {
        let first = job();
        let second = first.next_attempt();
        assert_eq!(second.attempt, 2);
        assert_eq!(second.batch_id, first.batch_id);
        assert_eq!(second.channel, first.channel);
        assert_eq!(second.priority, first.priority);
    }

    #[test]
    fn test_destination_channel() {
        assert_eq!(Destination::Phone("x".into()).channel(), Channel::Sms);
        assert_eq!(Destination::Email("x".into()).channel(), Channel::Email);
    }
}
