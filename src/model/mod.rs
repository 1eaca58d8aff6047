//! # Data model for the dispatch engine.
//!
//! This module groups the domain types that flow through the engine:
//! - [`Emergency`], [`Contact`] — the input side: one emergency plus its
//!   ordered contact list
//! - [`NotificationJob`] — one delivery attempt on one channel for one contact
//! - [`Batch`], [`DeliveryOutcome`] — the accounting side: fan-out counters
//!   and per-attempt audit records
//! - [`EmergencyCreated`], [`EmergencyEscalation`] — inbound event payloads
//!   decoded by the (external) event-stream consumer
//!
//! All types are serde-serializable so the surrounding service can move them
//! over its event stream and persistence boundary unchanged.

mod batch;
mod emergency;
mod inbound;
mod job;

pub use batch::{Batch, BatchHandle, DeliveryOutcome, DeliveryStatus};
pub use emergency::{Contact, ContactPriority, Emergency, EmergencyType, Location};
pub use inbound::{EmergencyCreated, EmergencyEscalation};
pub use job::{Channel, Destination, NotificationJob, NotificationPriority};
