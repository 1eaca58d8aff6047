//! # alertvisor
//!
//! **Alertvisor** is an emergency notification dispatch engine for Rust.
//!
//! Given one emergency and its ordered contact list, it fans out
//! multi-channel alerts (push, SMS, email) through a bounded worker pool,
//! retries transient provider failures per channel policy, substitutes
//! fallback channels on permanent failures, tracks per-batch delivery
//! counters under full concurrency, and escalates to secondary contacts when
//! nobody acknowledges in time. The crate is a building block: provider
//! clients, persistence, and the inbound event stream are injected.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   EmergencyCreated / EmergencyEscalation (decoded upstream)
//!            │
//!            ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Engine (wiring + lifecycle)                                      │
//! │  - Dispatcher (fan-out entry point)                               │
//! │  - JobQueue (two lanes: emergency > normal, strict priority)      │
//! │  - BatchAggregator (per-batch counters, one mutex per batch)      │
//! │  - EscalationManager (per-emergency cancellable timers)           │
//! │  - Bus (broadcast events) + SubscriberSet (per-sub queues)        │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │    worker    │   │    worker    │   │    worker    │
//!     │ (send+policy)│   │ (send+policy)│   │ (send+policy)│
//!     └┬─────────────┘   └┬─────────────┘   └┬─────────────┘
//!      │                  │                  │
//!      │ Publishes        │ Publishes        │ Publishes
//!      │ Events:          │ Events:          │ Events:
//!      │ - JobSent        │ - RetryScheduled │ - ProviderTimeout
//!      │ - JobFailed      │ - FallbackEnq.   │ - ...
//!      ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │                 (capacity: EngineConfig::bus_capacity)            │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │    event listener      │
//!                       │     (in Engine)        │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                           (per-sub queues)
//!                        ┌─────────┼─────────┐
//!                        ▼         ▼         ▼
//!                        worker1  worker2  workerN
//!                        ▼         ▼         ▼
//!                   sub1.on   sub2.on   subN.on
//!                    _event()  _event()  _event()
//! ```
//!
//! ### One job's lifecycle
//! ```text
//! Dispatcher ──► JobQueue ──► worker ──► ChannelSender::send (bounded timeout)
//!
//! loop per attempt {
//!   ├─► Ok ─────────────► SENT: batch pending → sent, audit outcome
//!   │
//!   ├─► retryable error, attempt < max:
//!   │       ├─ delay = ChannelPolicy backoff(attempt) (+ jitter)
//!   │       ├─ publish RetryScheduled{ delay, attempt }
//!   │       └─ delayed re-enqueue, attempt + 1 (worker does not wait)
//!   │
//!   └─► terminal error (or attempts exhausted):
//!           ├─ fallback chain Push → Sms → Email, skipping missing endpoints
//!           ├─ endpoint found ─► batch total+1, substitute job at attempt 1
//!           └─ chain exhausted ─► FAILED leaf: batch pending → failed
//! }
//!
//! Batch completes the first time pending reaches zero.
//! Unacknowledged emergencies re-alert secondary contacts on a timer until
//! acknowledged or the follow-up cap is reached.
//! ```
//!
//! ## Features
//! | Area              | Description                                                              | Key types / traits                         |
//! |-------------------|--------------------------------------------------------------------------|--------------------------------------------|
//! | **Dispatch**      | Fan one emergency out into per-contact jobs, batch-tracked.              | [`Engine`], [`Dispatcher`], [`BatchHandle`]|
//! | **Policies**      | Per-channel retry/backoff and the fallback chain.                        | [`ChannelPolicy`], [`Backoff`]             |
//! | **Escalation**    | Cancellable per-emergency timers to secondary contacts.                  | [`EscalationPhase`]                        |
//! | **Capabilities**  | Injected provider and persistence boundaries.                            | [`ChannelSender`], [`NotificationStore`]   |
//! | **Subscriber API**| Hook into engine events (logging, metrics, custom subscribers).          | [`Subscribe`]                              |
//! | **Errors**        | Typed errors per boundary.                                               | [`SendError`], [`DispatchError`]           |
//! | **Configuration** | Centralize runtime settings.                                             | [`EngineConfig`]                           |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::SystemTime;
//!
//! use async_trait::async_trait;
//! use uuid::Uuid;
//!
//! use alertvisor::{
//!     Batch, Channel, ChannelSender, Contact, ContactPriority, DeliveryOutcome, Destination,
//!     EmergencyCreated, EmergencyType, Engine, EngineConfig, Location, NotificationStore,
//!     SendError, StoreError,
//! };
//!
//! struct PrintSender;
//!
//! #[async_trait]
//! impl ChannelSender for PrintSender {
//!     async fn send(
//!         &self,
//!         channel: Channel,
//!         _destination: &Destination,
//!         content: &str,
//!     ) -> Result<(), SendError> {
//!         println!("[{}] {content}", channel.as_label());
//!         Ok(())
//!     }
//! }
//!
//! struct MemoryStore;
//!
//! #[async_trait]
//! impl NotificationStore for MemoryStore {
//!     async fn create_batch(&self, _batch: &Batch) -> Result<(), StoreError> {
//!         Ok(())
//!     }
//!     async fn update_batch(&self, _batch: &Batch) -> Result<(), StoreError> {
//!         Ok(())
//!     }
//!     async fn get_batch(&self, _batch_id: Uuid) -> Result<Option<Batch>, StoreError> {
//!         Ok(None)
//!     }
//!     async fn record_outcome(&self, _outcome: &DeliveryOutcome) -> Result<(), StoreError> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(
//!         Arc::new(PrintSender),
//!         Arc::new(MemoryStore),
//!         vec![], // subscribers (optional)
//!         EngineConfig::default(),
//!     );
//!     engine.start();
//!
//!     let handle = engine
//!         .dispatcher()
//!         .dispatch(EmergencyCreated {
//!             emergency_id: Uuid::new_v4(),
//!             user_id: Uuid::new_v4(),
//!             user_name: "Maya".into(),
//!             emergency_type: EmergencyType::Medical,
//!             location: Location {
//!                 latitude: 48.85,
//!                 longitude: 2.35,
//!                 address: Some("12 Rue de Rivoli, Paris".into()),
//!             },
//!             initial_message: Some("please hurry".into()),
//!             contacts: vec![Contact {
//!                 id: Uuid::new_v4(),
//!                 name: "Ada".into(),
//!                 phone: Some("+4915700000000".into()),
//!                 email: None,
//!                 push_token: None,
//!                 priority: ContactPriority::Primary,
//!             }],
//!             timestamp: SystemTime::now(),
//!         })
//!         .await?;
//!
//!     // The primary contact acknowledged: cancel the escalation timer.
//!     engine.dispatcher().acknowledge(handle.emergency_id, Uuid::new_v4());
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod model;
mod policies;
mod resolve;
mod sender;
mod store;
mod subscribers;

// ---- Public re-exports ----

pub use config::EngineConfig;
pub use core::{Dispatcher, Engine, EscalationPhase};
pub use error::{DispatchError, RuntimeError, SendError, StoreError};
pub use events::{Event, EventKind};
pub use model::{
    Batch, BatchHandle, Channel, Contact, ContactPriority, DeliveryOutcome, DeliveryStatus,
    Destination, Emergency, EmergencyCreated, EmergencyEscalation, EmergencyType, Location,
    NotificationJob, NotificationPriority,
};
pub use policies::{Backoff, ChannelPolicy, JitterPolicy};
pub use sender::ChannelSender;
pub use store::NotificationStore;
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
