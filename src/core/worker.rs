//! # Delivery workers.
//!
//! A fixed pool of identical workers drains the [`JobQueue`]. Each worker
//! loops: pop a job, call the provider under a bounded timeout, classify the
//! result, and apply the retry/fallback policy.
//!
//! ```text
//!                 ┌──────────── provider call (bounded timeout) ───────────┐
//!                 │                                                        │
//!   pop ──► send ─┤ Ok ────────────────► SENT: pending → sent              │
//!                 │ retryable, budget ─► RETRY: delayed re-enqueue, n+1    │
//!                 │ retryable, spent ──► treat as terminal                 │
//!                 │ terminal ──────────► FALLBACK or FAILED leaf           │
//!                 └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - Workers never sleep: retry delays are served by a spawned
//!   sleep-then-push task so the worker returns to the queue immediately.
//! - A fallback substitution extends the batch **before** the failed leaf is
//!   counted, so `pending` cannot touch zero while the substitute is in
//!   flight.
//! - Re-enqueues respect engine shutdown: when the runtime token is
//!   cancelled or the queue rejects a push, the leaf is counted failed
//!   instead of leaking a pending slot in its batch.
//! - Every provider call appends one audit outcome through the store, with
//!   bounded retries that never block the delivery path.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::SendError;
use crate::events::{Bus, Event, EventKind};
use crate::model::{DeliveryOutcome, DeliveryStatus, NotificationJob};
use crate::policies::ChannelPolicy;
use crate::resolve;
use crate::sender::ChannelSender;
use crate::store::{NotificationStore, persist_with_retry};

use super::aggregator::BatchAggregator;
use super::queue::JobQueue;

/// Shared state of the delivery worker pool.
///
/// The engine spawns `cfg.workers` tasks over one `Arc<WorkerPool>`; the
/// pool itself holds no per-worker state.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    aggregator: Arc<BatchAggregator>,
    sender: Arc<dyn ChannelSender>,
    store: Arc<dyn NotificationStore>,
    bus: Bus,
    cfg: EngineConfig,
    /// Runtime token guarding delayed re-enqueues.
    token: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        aggregator: Arc<BatchAggregator>,
        sender: Arc<dyn ChannelSender>,
        store: Arc<dyn NotificationStore>,
        bus: Bus,
        cfg: EngineConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            queue,
            aggregator,
            sender,
            store,
            bus,
            cfg,
            token,
        }
    }

    /// One worker's loop: drains the queue until it is closed and empty.
    pub async fn run(self: Arc<Self>) {
        while let Some(job) = self.queue.pop().await {
            self.process(job).await;
        }
    }

    /// Executes one delivery attempt and applies the policy to its result.
    pub async fn process(self: &Arc<Self>, job: NotificationJob) {
        let call = self
            .sender
            .send(job.channel, &job.destination, &job.content);
        match time::timeout(self.cfg.provider_timeout, call).await {
            Ok(Ok(())) => self.on_sent(job).await,
            Ok(Err(err)) => self.on_failure(job, err).await,
            Err(_) => {
                self.bus.publish(
                    Event::now(EventKind::ProviderTimeout)
                        .with_emergency(job.emergency_id)
                        .with_batch(job.batch_id)
                        .with_contact(job.contact.id)
                        .with_channel(job.channel)
                        .with_attempt(job.attempt),
                );
                let err = SendError::Timeout {
                    timeout: self.cfg.provider_timeout,
                };
                self.on_failure(job, err).await;
            }
        }
    }

    async fn on_sent(&self, job: NotificationJob) {
        self.bus.publish(
            Event::now(EventKind::JobSent)
                .with_emergency(job.emergency_id)
                .with_batch(job.batch_id)
                .with_contact(job.contact.id)
                .with_channel(job.channel)
                .with_attempt(job.attempt),
        );
        self.record(&job, DeliveryStatus::Sent, None).await;
        self.aggregator.record_sent(job.batch_id).await;
    }

    async fn on_failure(self: &Arc<Self>, job: NotificationJob, err: SendError) {
        let policy = ChannelPolicy::for_channel(job.channel);
        if err.is_retryable() && policy.allows_retry(job.attempt) {
            self.schedule_retry(job, &policy, err).await;
        } else {
            self.on_terminal(job, err).await;
        }
    }

    /// Re-enqueues the same job with an incremented attempt after the
    /// policy's delay. The worker does not wait; a detached task serves the
    /// delay and fails the leaf if shutdown wins the race.
    async fn schedule_retry(
        self: &Arc<Self>,
        job: NotificationJob,
        policy: &ChannelPolicy,
        err: SendError,
    ) {
        let delay = policy.retry_delay(job.attempt);
        self.bus.publish(
            Event::now(EventKind::RetryScheduled)
                .with_emergency(job.emergency_id)
                .with_batch(job.batch_id)
                .with_contact(job.contact.id)
                .with_channel(job.channel)
                .with_attempt(job.attempt)
                .with_delay(delay)
                .with_reason(err.to_string()),
        );
        self.record(&job, DeliveryStatus::RetryScheduled, Some(err.to_string()))
            .await;

        let pool = Arc::clone(self);
        let token = self.token.clone();
        let next = job.next_attempt();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(delay) => {
                    if !pool.queue.push(next.clone()) {
                        pool.fail_dropped(next, "queue closed before the retry landed").await;
                    }
                }
                _ = token.cancelled() => {
                    pool.fail_dropped(next, "shutdown cancelled the scheduled retry").await;
                }
            }
        });
    }

    /// Terminal failure on this channel: substitute the fallback channel if
    /// the contact is reachable there, then count the failed leaf.
    async fn on_terminal(&self, job: NotificationJob, err: SendError) {
        if let Some(substitute) = fallback_job(&job) {
            // Grow the batch first: the failed leaf below must not be able
            // to drive pending to zero while the substitute is in flight.
            self.aggregator.extend(job.batch_id, 1).await;
            if self.queue.push(substitute.clone()) {
                self.bus.publish(
                    Event::now(EventKind::FallbackEnqueued)
                        .with_emergency(substitute.emergency_id)
                        .with_batch(substitute.batch_id)
                        .with_contact(substitute.contact.id)
                        .with_channel(substitute.channel),
                );
                self.bus.publish(
                    Event::now(EventKind::JobEnqueued)
                        .with_emergency(substitute.emergency_id)
                        .with_batch(substitute.batch_id)
                        .with_contact(substitute.contact.id)
                        .with_channel(substitute.channel),
                );
            } else {
                // The queue closed between the extension and the push; close
                // the slot we just opened so the batch can still complete.
                self.fail_dropped(substitute, "queue closed before the fallback could run")
                    .await;
            }
        }

        self.bus.publish(
            Event::now(EventKind::JobFailed)
                .with_emergency(job.emergency_id)
                .with_batch(job.batch_id)
                .with_contact(job.contact.id)
                .with_channel(job.channel)
                .with_attempt(job.attempt)
                .with_reason(err.to_string()),
        );
        self.record(&job, DeliveryStatus::Failed, Some(err.to_string()))
            .await;
        self.aggregator.record_failed(job.batch_id).await;
    }

    /// Fails the leaf of a job the queue will never run (rejected push or a
    /// retry cancelled by shutdown), keeping the batch counters closed.
    async fn fail_dropped(&self, job: NotificationJob, reason: &str) {
        warn!(
            batch_id = %job.batch_id,
            channel = ?job.channel,
            reason,
            "undeliverable job counted as failed"
        );
        self.bus.publish(
            Event::now(EventKind::JobFailed)
                .with_emergency(job.emergency_id)
                .with_batch(job.batch_id)
                .with_contact(job.contact.id)
                .with_channel(job.channel)
                .with_attempt(job.attempt)
                .with_reason(reason.to_string()),
        );
        self.record(&job, DeliveryStatus::Failed, Some(reason.to_string()))
            .await;
        self.aggregator.record_failed(job.batch_id).await;
    }

    async fn record(&self, job: &NotificationJob, status: DeliveryStatus, reason: Option<String>) {
        let outcome = DeliveryOutcome {
            emergency_id: job.emergency_id,
            batch_id: job.batch_id,
            contact_id: job.contact.id,
            channel: job.channel,
            attempt: job.attempt,
            status,
            reason,
            at: SystemTime::now(),
        };
        persist_with_retry(
            &self.bus,
            self.cfg.store_retry_attempts,
            self.cfg.store_retry_delay,
            "record_outcome",
            || async { self.store.record_outcome(&outcome).await },
        )
        .await;
    }
}

/// Builds the substitute job on the failed channel's fallback chain.
///
/// Walks Push → Sms → Email from the failed channel, skipping channels the
/// contact has no endpoint for. The substitute restarts at attempt 1 with
/// its own retry budget. Returns `None` when the chain is exhausted.
fn fallback_job(job: &NotificationJob) -> Option<NotificationJob> {
    let mut channel = job.channel;
    while let Some(next) = ChannelPolicy::for_channel(channel).fallback {
        channel = next;
        if let Some(destination) = resolve::destination_for(&job.contact, next) {
            let mut substitute = job.clone();
            substitute.channel = next;
            substitute.destination = destination;
            substitute.attempt = 1;
            substitute.created_at = SystemTime::now();
            return Some(substitute);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::{
        Batch, Channel, Contact, ContactPriority, Destination, NotificationPriority,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    struct NullStore;

    #[async_trait]
    impl NotificationStore for NullStore {
        async fn create_batch(&self, _b: &Batch) -> Result<(), StoreError> {
            Ok(())
        }
        async fn update_batch(&self, _b: &Batch) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get_batch(&self, _id: Uuid) -> Result<Option<Batch>, StoreError> {
            Ok(None)
        }
        async fn record_outcome(&self, _o: &DeliveryOutcome) -> Result<(), StoreError> {
            Ok(())
        }
    }

    /// Scripted sender: pops the next result for the requested channel;
    /// defaults to success once the script runs out.
    struct ScriptedSender {
        script: Mutex<HashMap<Channel, Vec<Result<(), SendError>>>>,
    }

    impl ScriptedSender {
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

    /// Sender whose calls never return; exercises the bounded timeout.
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

    fn contact_all_channels() -> Contact {
        Contact {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            phone: Some("+4915700000000".into()),
            email: Some("ada@example.com".into()),
            push_token: Some("tok-1".into()),
            priority: ContactPriority::Primary,
        }
    }

    fn push_job(contact: Contact, batch_id: Uuid) -> NotificationJob {
        NotificationJob {
            emergency_id: Uuid::new_v4(),
            batch_id,
            contact,
            channel: Channel::Push,
            priority: NotificationPriority::Emergency,
            content: "help".into(),
            destination: Destination::PushToken("tok-1".into()),
            attempt: 1,
            created_at: SystemTime::now(),
        }
    }

    fn pool(sender: Arc<dyn ChannelSender>) -> (Arc<WorkerPool>, Arc<JobQueue>, Arc<BatchAggregator>, Bus)
    {
        let cfg = EngineConfig::default();
        let bus = Bus::new(256);
        let queue = Arc::new(JobQueue::new());
        let aggregator = Arc::new(BatchAggregator::new(
            Arc::new(NullStore),
            bus.clone(),
            cfg.clone(),
        ));
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            Arc::clone(&aggregator),
            sender,
            Arc::new(NullStore),
            bus.clone(),
            cfg,
            CancellationToken::new(),
        ));
        (pool, queue, aggregator, bus)
    }

    #[tokio::test]
    async fn test_success_counts_sent() {
        let (pool, _queue, aggregator, _bus) = pool(Arc::new(ScriptedSender::new(vec![])));
        let batch_id = Uuid::new_v4();
        aggregator.open(Batch::open(Uuid::new_v4(), batch_id, 1));

        pool.process(push_job(contact_all_channels(), batch_id)).await;

        let batch = aggregator.snapshot(batch_id).unwrap();
        assert_eq!(batch.sent, 1);
        assert_eq!(batch.pending, 0);
        assert!(batch.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_schedules_delayed_reattempt() {
        let sender = ScriptedSender::new(vec![(
            Channel::Push,
            Err(SendError::Retryable {
                reason: "503".into(),
            }),
        )]);
        let (pool, queue, aggregator, _bus) = pool(Arc::new(sender));
        let batch_id = Uuid::new_v4();
        aggregator.open(Batch::open(Uuid::new_v4(), batch_id, 1));

        pool.process(push_job(contact_all_channels(), batch_id)).await;

        // Still pending: a retry keeps the leaf open.
        let batch = aggregator.snapshot(batch_id).unwrap();
        assert_eq!(batch.pending, 1);
        assert!(queue.is_empty());

        // First push retry lands after 5s.
        time::sleep(Duration::from_secs(6)).await;
        let retried = queue.try_pop().unwrap();
        assert_eq!(retried.attempt, 2);
        assert_eq!(retried.channel, Channel::Push);
    }

    #[tokio::test]
    async fn test_terminal_failure_substitutes_fallback_channel() {
        let sender = ScriptedSender::new(vec![(
            Channel::Push,
            Err(SendError::Terminal {
                reason: "invalid token".into(),
            }),
        )]);
        let (pool, queue, aggregator, _bus) = pool(Arc::new(sender));
        let batch_id = Uuid::new_v4();
        aggregator.open(Batch::open(Uuid::new_v4(), batch_id, 1));

        pool.process(push_job(contact_all_channels(), batch_id)).await;

        let substitute = queue.try_pop().unwrap();
        assert_eq!(substitute.channel, Channel::Sms);
        assert_eq!(substitute.attempt, 1);
        assert!(matches!(substitute.destination, Destination::Phone(_)));

        // One leaf failed, one substitute pending; batch grew and stayed open.
        let batch = aggregator.snapshot(batch_id).unwrap();
        assert_eq!(batch.total, 2);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.pending, 1);
        assert!(!batch.is_completed());
        assert!(batch.sum_holds());
    }

    #[tokio::test]
    async fn test_fallback_skips_channels_without_endpoint() {
        // Push fails terminally and the contact has no phone: the chain
        // skips Sms and lands on Email.
        let sender = ScriptedSender::new(vec![(
            Channel::Push,
            Err(SendError::Terminal {
                reason: "unregistered".into(),
            }),
        )]);
        let (pool, queue, aggregator, _bus) = pool(Arc::new(sender));
        let batch_id = Uuid::new_v4();
        aggregator.open(Batch::open(Uuid::new_v4(), batch_id, 1));

        let mut contact = contact_all_channels();
        contact.phone = None;
        pool.process(push_job(contact, batch_id)).await;

        let substitute = queue.try_pop().unwrap();
        assert_eq!(substitute.channel, Channel::Email);
    }

    #[tokio::test]
    async fn test_push_only_contact_has_no_fallback() {
        let sender = ScriptedSender::new(vec![(
            Channel::Push,
            Err(SendError::Terminal {
                reason: "unregistered".into(),
            }),
        )]);
        let (pool, queue, aggregator, _bus) = pool(Arc::new(sender));
        let batch_id = Uuid::new_v4();
        aggregator.open(Batch::open(Uuid::new_v4(), batch_id, 1));

        let mut contact = contact_all_channels();
        contact.phone = None;
        contact.email = None;
        pool.process(push_job(contact, batch_id)).await;

        assert!(queue.is_empty());
        let batch = aggregator.snapshot(batch_id).unwrap();
        assert_eq!(batch.total, 1);
        assert_eq!(batch.failed, 1);
        assert!(batch.is_completed());
    }

    #[tokio::test]
    async fn test_exhausted_chain_fails_the_leaf() {
        // Email is the end of the chain; a terminal failure there has no
        // substitute and closes the leaf.
        let sender = ScriptedSender::new(vec![(
            Channel::Email,
            Err(SendError::Terminal {
                reason: "bounced".into(),
            }),
        )]);
        let (pool, queue, aggregator, _bus) = pool(Arc::new(sender));
        let batch_id = Uuid::new_v4();
        aggregator.open(Batch::open(Uuid::new_v4(), batch_id, 1));

        let mut job = push_job(contact_all_channels(), batch_id);
        job.channel = Channel::Email;
        job.destination = Destination::Email("ada@example.com".into());
        pool.process(job).await;

        assert!(queue.is_empty());
        let batch = aggregator.snapshot(batch_id).unwrap();
        assert_eq!(batch.failed, 1);
        assert!(batch.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_provider_times_out_and_retries() {
        let (pool, queue, _aggregator, bus) = pool(Arc::new(HangingSender));
        let mut rx = bus.subscribe();
        let batch_id = Uuid::new_v4();
        pool.aggregator
            .open(Batch::open(Uuid::new_v4(), batch_id, 1));

        pool.process(push_job(contact_all_channels(), batch_id)).await;

        let mut saw_timeout = false;
        let mut saw_retry = false;
        while let Ok(ev) = rx.try_recv() {
            saw_timeout |= ev.kind == EventKind::ProviderTimeout;
            saw_retry |= ev.kind == EventKind::RetryScheduled;
        }
        assert!(saw_timeout);
        assert!(saw_retry);

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.try_pop().unwrap().attempt, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_fall_back() {
        // Sms allows 2 attempts; a retryable failure on attempt 2 is
        // treated as terminal and falls back to Email.
        let sender = ScriptedSender::new(vec![(
            Channel::Sms,
            Err(SendError::Retryable {
                reason: "carrier busy".into(),
            }),
        )]);
        let (pool, queue, aggregator, _bus) = pool(Arc::new(sender));
        let batch_id = Uuid::new_v4();
        aggregator.open(Batch::open(Uuid::new_v4(), batch_id, 1));

        let mut job = push_job(contact_all_channels(), batch_id);
        job.channel = Channel::Sms;
        job.destination = Destination::Phone("+4915700000000".into());
        job.attempt = 2;
        pool.process(job).await;

        let substitute = queue.try_pop().unwrap();
        assert_eq!(substitute.channel, Channel::Email);
        assert_eq!(substitute.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_fails_delayed_retries() {
        let sender = ScriptedSender::new(vec![(
            Channel::Push,
            Err(SendError::Retryable {
                reason: "503".into(),
            }),
        )]);
        let token = CancellationToken::new();
        let cfg = EngineConfig::default();
        let bus = Bus::new(256);
        let queue = Arc::new(JobQueue::new());
        let aggregator = Arc::new(BatchAggregator::new(
            Arc::new(NullStore),
            bus.clone(),
            cfg.clone(),
        ));
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            Arc::clone(&aggregator),
            Arc::new(sender),
            Arc::new(NullStore),
            bus,
            cfg,
            token.clone(),
        ));
        let batch_id = Uuid::new_v4();
        aggregator.open(Batch::open(Uuid::new_v4(), batch_id, 1));

        pool.process(push_job(contact_all_channels(), batch_id)).await;
        token.cancel();

        // The cancelled retry never re-enqueues; its leaf is counted failed
        // so the batch still completes.
        time::sleep(Duration::from_secs(60)).await;
        assert!(queue.is_empty());
        let batch = aggregator.snapshot(batch_id).unwrap();
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.pending, 0);
        assert!(batch.is_completed());
        assert!(batch.sum_holds());
    }

    #[tokio::test]
    async fn test_closed_queue_fails_the_substitute_leaf() {
        let sender = ScriptedSender::new(vec![(
            Channel::Push,
            Err(SendError::Terminal {
                reason: "invalid token".into(),
            }),
        )]);
        let (pool, queue, aggregator, _bus) = pool(Arc::new(sender));
        let batch_id = Uuid::new_v4();
        aggregator.open(Batch::open(Uuid::new_v4(), batch_id, 1));

        queue.close();
        pool.process(push_job(contact_all_channels(), batch_id)).await;

        // The batch was extended for the substitute, so the rejected push
        // must fail that leaf too or pending would never drain.
        let batch = aggregator.snapshot(batch_id).unwrap();
        assert_eq!(batch.total, 2);
        assert_eq!(batch.failed, 2);
        assert_eq!(batch.pending, 0);
        assert!(batch.is_completed());
        assert!(batch.sum_holds());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_into_closed_queue_fails_the_leaf() {
        let sender = ScriptedSender::new(vec![(
            Channel::Push,
            Err(SendError::Retryable {
                reason: "503".into(),
            }),
        )]);
        let (pool, queue, aggregator, _bus) = pool(Arc::new(sender));
        let batch_id = Uuid::new_v4();
        aggregator.open(Batch::open(Uuid::new_v4(), batch_id, 1));

        pool.process(push_job(contact_all_channels(), batch_id)).await;
        queue.close();

        time::sleep(Duration::from_secs(6)).await;
        assert!(queue.is_empty());
        let batch = aggregator.snapshot(batch_id).unwrap();
        assert_eq!(batch.failed, 1);
        assert!(batch.is_completed());
    }
}
