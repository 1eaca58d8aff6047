//! Engine core: dispatch, delivery, aggregation, escalation.
//!
//! This module contains the embedded implementation of the dispatch engine.
//! The public API from this module is [`Engine`] (wiring + lifecycle),
//! [`Dispatcher`] (fan-out entry point), and the read-side types the engine
//! exposes ([`EscalationPhase`]).
//!
//! Internal modules:
//! - [`queue`]: two-lane strict-priority job queue;
//! - [`worker`]: fixed pool of delivery workers applying the retry/fallback
//!   policy;
//! - [`aggregator`]: per-batch counter updates under per-batch mutual
//!   exclusion;
//! - [`escalation`]: per-emergency cancellable escalation timers;
//! - [`dispatcher`]: job construction, batch opening, timer arming;
//! - [`engine`]: constructor-injected wiring with explicit start/shutdown.

mod aggregator;
mod dispatcher;
mod engine;
mod escalation;
mod queue;
mod worker;

pub use dispatcher::Dispatcher;
pub use engine::Engine;
pub use escalation::EscalationPhase;
