//! # Engine wiring and lifecycle.
//!
//! [`Engine`] assembles the queue, worker pool, batch aggregator, escalation
//! manager, and subscriber fan-out from injected capabilities, and owns the
//! start/shutdown lifecycle.
//!
//! ```text
//!   EmergencyCreated ──► Dispatcher ──► JobQueue ──► WorkerPool ──► ChannelSender
//!                            │              ▲            │
//!                            │   escalation │ retry      ├──► BatchAggregator ──► NotificationStore
//!                            ▼   fallback   │            │
//!                     EscalationManager ────┘            ▼
//!                                                  Bus ──► SubscriberSet
//! ```
//!
//! ## Rules
//! - `start` is idempotent; the first call spawns the workers and the event
//!   listener, later calls are no-ops.
//! - `shutdown` closes the queue (workers drain remaining jobs), cancels
//!   every escalation timer and delayed retry, then waits up to the grace
//!   period for the workers. Exceeding the grace is an error, not a hang.
//! - The event listener drains the bus before stopping, so shutdown events
//!   still reach subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::sender::ChannelSender;
use crate::store::NotificationStore;
use crate::subscribers::{Subscribe, SubscriberSet};

use super::aggregator::BatchAggregator;
use super::dispatcher::Dispatcher;
use super::escalation::{EscalationManager, EscalationPhase};
use super::queue::JobQueue;
use super::worker::WorkerPool;

/// Assembled dispatch engine.
///
/// Constructed from injected capabilities ([`ChannelSender`],
/// [`NotificationStore`]) plus optional event subscribers; call
/// [`Engine::start`] before dispatching and [`Engine::shutdown`] to stop.
pub struct Engine {
    cfg: EngineConfig,
    bus: Bus,
    queue: Arc<JobQueue>,
    escalation: Arc<EscalationManager>,
    pool: Arc<WorkerPool>,
    dispatcher: Dispatcher,

    /// Runtime token: cancels escalation timers and delayed retries.
    token: CancellationToken,
    /// Listener-only token, cancelled last so final events still fan out.
    listener_stop: CancellationToken,

    started: AtomicBool,
    stopped: AtomicBool,
    pending_subs: Mutex<Option<Vec<Arc<dyn Subscribe>>>>,
    workers: Mutex<Option<JoinSet<()>>>,
    listener: Mutex<Option<JoinHandle<SubscriberSet>>>,
}

impl Engine {
    /// Wires an engine from its injected capabilities.
    ///
    /// Nothing runs until [`Engine::start`].
    pub fn new(
        sender: Arc<dyn ChannelSender>,
        store: Arc<dyn NotificationStore>,
        subscribers: Vec<Arc<dyn Subscribe>>,
        cfg: EngineConfig,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let token = CancellationToken::new();
        let queue = Arc::new(JobQueue::new());
        let aggregator = Arc::new(BatchAggregator::new(
            Arc::clone(&store),
            bus.clone(),
            cfg.clone(),
        ));
        let escalation = Arc::new(EscalationManager::new(
            Arc::clone(&queue),
            Arc::clone(&aggregator),
            bus.clone(),
            cfg.clone(),
            token.clone(),
        ));
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            Arc::clone(&aggregator),
            sender,
            Arc::clone(&store),
            bus.clone(),
            cfg.clone(),
            token.clone(),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            aggregator,
            Arc::clone(&escalation),
            store,
            bus.clone(),
        );

        Self {
            cfg,
            bus,
            queue,
            escalation,
            pool,
            dispatcher,
            token,
            listener_stop: CancellationToken::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            pending_subs: Mutex::new(Some(subscribers)),
            workers: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    /// Spawns the worker pool and the subscriber event listener.
    ///
    /// Idempotent; must be called from within a Tokio runtime.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut set = JoinSet::new();
        for _ in 0..self.cfg.workers_clamped() {
            let pool = Arc::clone(&self.pool);
            set.spawn(pool.run());
        }
        *self.workers.lock().expect("workers mutex poisoned") = Some(set);

        let subs = self
            .pending_subs
            .lock()
            .expect("subscriber mutex poisoned")
            .take()
            .unwrap_or_default();
        let fanout = SubscriberSet::new(subs, self.bus.clone());
        let mut rx = self.bus.subscribe();
        let stop = self.listener_stop.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = rx.recv() => match res {
                        Ok(ev) => fanout.emit(&ev),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event listener lagged behind the bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => {
                        // Drain what is already buffered, then stop.
                        loop {
                            match rx.try_recv() {
                                Ok(ev) => fanout.emit(&ev),
                                Err(TryRecvError::Lagged(skipped)) => {
                                    warn!(skipped, "event listener lagged behind the bus");
                                }
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
            fanout
        });
        *self.listener.lock().expect("listener mutex poisoned") = Some(handle);

        info!(workers = self.cfg.workers_clamped(), "engine started");
    }

    /// Stops the engine: drains the queue, cancels timers and delayed
    /// retries, waits up to the grace period for the workers.
    ///
    /// Returns [`RuntimeError::GraceExceeded`] when workers are still
    /// running after the grace period; the stuck tasks are abandoned, not
    /// aborted mid-send.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        if !self.started.load(Ordering::SeqCst) || self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.bus.publish(Event::now(EventKind::ShutdownRequested));
        self.queue.close();
        self.token.cancel();
        if !self.queue.is_empty() {
            info!(remaining = self.queue.len(), "draining queued jobs before stop");
        }

        let workers = self.workers.lock().expect("workers mutex poisoned").take();
        let result = if let Some(mut set) = workers {
            match time::timeout(self.cfg.grace, async {
                while set.join_next().await.is_some() {}
            })
            .await
            {
                Ok(()) => {
                    self.bus.publish(Event::now(EventKind::AllStoppedWithin));
                    Ok(())
                }
                Err(_) => {
                    let stuck = set.len();
                    self.bus.publish(Event::now(EventKind::GraceExceeded));
                    warn!(stuck, grace = ?self.cfg.grace, "workers outlived the shutdown grace");
                    Err(RuntimeError::GraceExceeded {
                        grace: self.cfg.grace,
                        stuck,
                    })
                }
            }
        } else {
            Ok(())
        };

        // Stop the listener last so the shutdown events above still reach
        // subscribers, then drain the subscriber queues.
        self.listener_stop.cancel();
        let listener = self.listener.lock().expect("listener mutex poisoned").take();
        if let Some(handle) = listener {
            if let Ok(fanout) = handle.await {
                fanout.shutdown().await;
            }
        }

        info!("engine stopped");
        result
    }

    /// The fan-out entry point.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// A fresh receiver for the engine's runtime events.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Observable escalation phase for an emergency, `None` once terminal.
    pub fn escalation_phase(&self, emergency_id: Uuid) -> Option<EscalationPhase> {
        self.escalation.phase(emergency_id)
    }

    /// Number of escalation follow-ups fired for an emergency so far,
    /// `None` once terminal.
    pub fn escalation_follow_ups(&self, emergency_id: Uuid) -> Option<u32> {
        self.escalation.follow_up_count(emergency_id)
    }

    /// Number of emergencies with an active (armed or escalating) timer.
    pub fn active_escalations(&self) -> usize {
        self.escalation.active_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SendError, StoreError};
    use crate::model::{
        Batch, Channel, Contact, ContactPriority, DeliveryOutcome, DeliveryStatus, Destination,
        EmergencyCreated, EmergencyType, Location,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::{Duration, SystemTime};

    /// Installs a test-writer subscriber so `RUST_LOG` filters the engine's
    /// tracing output under `--nocapture`. First caller wins.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    }

    struct NullStore;

    #[async_trait]
    impl NotificationStore for NullStore {
        async fn create_batch(&self, _b: &Batch) -> Result<(), StoreError> {
            Ok(())
        }
        async fn update_batch(&self, _b: &Batch) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get_batch(&self, _id: uuid::Uuid) -> Result<Option<Batch>, StoreError> {
            Ok(None)
        }
        async fn record_outcome(&self, _o: &DeliveryOutcome) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct AuditStore {
        outcomes: Mutex<Vec<DeliveryOutcome>>,
    }

    #[async_trait]
    impl NotificationStore for AuditStore {
        async fn create_batch(&self, _b: &Batch) -> Result<(), StoreError> {
            Ok(())
        }
        async fn update_batch(&self, _b: &Batch) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get_batch(&self, _id: uuid::Uuid) -> Result<Option<Batch>, StoreError> {
            Ok(None)
        }
        async fn record_outcome(&self, outcome: &DeliveryOutcome) -> Result<(), StoreError> {
            self.outcomes.lock().unwrap().push(outcome.clone());
            Ok(())
        }
    }

    struct ScriptedSender {
        script: Mutex<HashMap<Channel, Vec<Result<(), SendError>>>>,
    }

    impl ScriptedSender {
        fn ok() -> Self {
            Self::new(vec![])
        }

        fn new(script: Vec<(Channel, Result<(), SendError>)>) -> Self {
            let mut map: HashMap<Channel, Vec<Result<(), SendError>>> = HashMap::new();
            for (channel, result) in script {
                map.entry(channel).or_default().push(result);
            }
            for results in map.values_mut() {
                results.reverse();
            }
            Self {
                script: Mutex::new(map),
            }
        }
    }

    #[async_trait]
    impl ChannelSender for ScriptedSender {
        async fn send(
            &self,
            channel: Channel,
            _destination: &Destination,
            _content: &str,
        ) -> Result<(), SendError> {
            self.script
                .lock()
                .unwrap()
                .get_mut(&channel)
                .and_then(Vec::pop)
                .unwrap_or(Ok(()))
        }
    }

    struct HangingSender;

    #[async_trait]
    impl ChannelSender for HangingSender {
        async fn send(
            &self,
            _channel: Channel,
            _destination: &Destination,
            _content: &str,
        ) -> Result<(), SendError> {
            futures::future::pending().await
        }
    }

    fn contact(priority: ContactPriority, push: Option<&str>, phone: Option<&str>) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            name: "c".into(),
            phone: phone.map(Into::into),
            email: None,
            push_token: push.map(Into::into),
            priority,
        }
    }

    fn created_event(contacts: Vec<Contact>) -> EmergencyCreated {
        EmergencyCreated {
            emergency_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            user_name: "Maya".into(),
            emergency_type: EmergencyType::Medical,
            location: Location {
                latitude: 48.85,
                longitude: 2.35,
                address: None,
            },
            initial_message: None,
            contacts,
            timestamp: SystemTime::now(),
        }
    }

    async fn completed_batch(engine: &Engine, batch_id: Uuid) -> Batch {
        for _ in 0..100 {
            if let Some(batch) = engine.dispatcher().batch_snapshot(batch_id) {
                if batch.is_completed() {
                    return batch;
                }
            }
            time::sleep(Duration::from_millis(50)).await;
        }
        panic!("batch {batch_id} never completed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_to_completion() {
        init_tracing();
        let engine = Engine::new(
            Arc::new(ScriptedSender::ok()),
            Arc::new(NullStore),
            vec![],
            EngineConfig::default(),
        );
        engine.start();

        let handle = engine
            .dispatcher()
            .dispatch(created_event(vec![
                contact(ContactPriority::Primary, Some("tok-1"), None),
                contact(ContactPriority::Secondary, None, Some("+2")),
            ]))
            .await
            .unwrap();
        assert_eq!(handle.total, 2);

        let batch = completed_batch(&engine, handle.batch_id).await;
        assert_eq!(batch.sent, 2);
        assert_eq!(batch.failed, 0);

        engine.dispatcher().acknowledge(handle.emergency_id, Uuid::new_v4());
        engine.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_push_falls_back_to_sms_end_to_end() {
        init_tracing();
        let sender = ScriptedSender::new(vec![(
            Channel::Push,
            Err(SendError::Terminal {
                reason: "unregistered token".into(),
            }),
        )]);
        let engine = Engine::new(
            Arc::new(sender),
            Arc::new(NullStore),
            vec![],
            EngineConfig::default(),
        );
        engine.start();

        let handle = engine
            .dispatcher()
            .dispatch(created_event(vec![contact(
                ContactPriority::Primary,
                Some("tok-1"),
                Some("+1"),
            )]))
            .await
            .unwrap();

        let batch = completed_batch(&engine, handle.batch_id).await;
        assert_eq!(batch.total, 2);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.sent, 1);
        assert!(batch.sum_holds());

        engine.dispatcher().acknowledge(handle.emergency_id, Uuid::new_v4());
        engine.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_recipient_reached_via_full_fallback_chain() {
        // Push and Sms reject terminally, Email succeeds: the recipient is
        // reached, with one audit outcome per leaf.
        init_tracing();
        let sender = ScriptedSender::new(vec![
            (
                Channel::Push,
                Err(SendError::Terminal {
                    reason: "unregistered token".into(),
                }),
            ),
            (
                Channel::Sms,
                Err(SendError::Terminal {
                    reason: "carrier rejected".into(),
                }),
            ),
        ]);
        let store = Arc::new(AuditStore::default());
        let engine = Engine::new(
            Arc::new(sender),
            store.clone(),
            vec![],
            EngineConfig::default(),
        );
        engine.start();

        let mut c = contact(ContactPriority::Primary, Some("tok-1"), Some("+1"));
        c.email = Some("ada@example.com".into());
        let handle = engine
            .dispatcher()
            .dispatch(created_event(vec![c]))
            .await
            .unwrap();

        let batch = completed_batch(&engine, handle.batch_id).await;
        assert_eq!(batch.total, 3);
        assert_eq!(batch.failed, 2);
        assert_eq!(batch.sent, 1);
        assert!(batch.sum_holds());

        let statuses: Vec<DeliveryStatus> = store
            .outcomes
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                DeliveryStatus::Failed,
                DeliveryStatus::Failed,
                DeliveryStatus::Sent
            ]
        );

        engine.dispatcher().acknowledge(handle.emergency_id, Uuid::new_v4());
        engine.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_emergency_escalates() {
        init_tracing();
        let engine = Engine::new(
            Arc::new(ScriptedSender::ok()),
            Arc::new(NullStore),
            vec![],
            EngineConfig::default(),
        );
        engine.start();

        let handle = engine
            .dispatcher()
            .dispatch(created_event(vec![
                contact(ContactPriority::Primary, Some("tok-1"), None),
                contact(ContactPriority::Secondary, None, Some("+2")),
            ]))
            .await
            .unwrap();

        assert_eq!(
            engine.escalation_phase(handle.emergency_id),
            Some(EscalationPhase::Armed)
        );

        // Past the timeout and one follow-up interval: two firings, one
        // secondary job each.
        time::sleep(Duration::from_secs(155)).await;
        assert_eq!(
            engine.escalation_phase(handle.emergency_id),
            Some(EscalationPhase::Escalating)
        );
        assert_eq!(engine.escalation_follow_ups(handle.emergency_id), Some(2));
        assert_eq!(engine.active_escalations(), 1);
        let batch = engine.dispatcher().batch_snapshot(handle.batch_id).unwrap();
        assert_eq!(batch.total, 4);

        assert!(engine.dispatcher().acknowledge(handle.emergency_id, Uuid::new_v4()));
        assert_eq!(engine.escalation_phase(handle.emergency_id), None);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_within_grace_reports_all_stopped() {
        init_tracing();
        let engine = Engine::new(
            Arc::new(ScriptedSender::ok()),
            Arc::new(NullStore),
            vec![],
            EngineConfig::default(),
        );
        engine.start();
        let mut rx = engine.events();

        engine.shutdown().await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert!(kinds.contains(&EventKind::ShutdownRequested));
        assert!(kinds.contains(&EventKind::AllStoppedWithin));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_grace_exceeded_with_hung_provider() {
        init_tracing();
        let cfg = EngineConfig {
            workers: 1,
            provider_timeout: Duration::from_secs(600),
            grace: Duration::from_secs(1),
            ..EngineConfig::default()
        };
        let engine = Engine::new(Arc::new(HangingSender), Arc::new(NullStore), vec![], cfg);
        engine.start();

        engine
            .dispatcher()
            .dispatch(created_event(vec![contact(
                ContactPriority::Primary,
                Some("tok-1"),
                None,
            )]))
            .await
            .unwrap();
        // Let the worker pick the job up and block in the provider call.
        tokio::task::yield_now().await;

        match engine.shutdown().await {
            Err(RuntimeError::GraceExceeded { stuck, .. }) => assert_eq!(stuck, 1),
            other => panic!("expected GraceExceeded, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown_are_idempotent() {
        init_tracing();
        let engine = Engine::new(
            Arc::new(ScriptedSender::ok()),
            Arc::new(NullStore),
            vec![],
            EngineConfig::default(),
        );
        engine.start();
        engine.start();
        engine.shutdown().await.unwrap();
        engine.shutdown().await.unwrap();
    }
}
