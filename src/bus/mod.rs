//! Best-effort publication of rate changes to the message bus

pub mod redis_bus;

use crate::audit::{Audit, TASK_BUS_PUBLISH};
use crate::core::bus::MessageBus;
use crate::events::BusEvent;
use anyhow::{Result, anyhow};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub use redis_bus::RedisBus;

/// Connection to one bus channel. Every operation is bounded by `timeout`
/// and reports failures to the audit log instead of the caller.
struct BusLink {
    bus: Arc<dyn MessageBus>,
    channel: String,
    timeout: Duration,
    audit: Audit,
}

enum Job {
    Publish(Vec<BusEvent>),
    Flush(oneshot::Sender<()>),
}

/// Fire-and-forget publisher. Events are queued in order and delivered by a
/// background worker, so callers never wait on the bus.
pub struct MessageBusPublisher {
    link: Arc<BusLink>,
    jobs: mpsc::UnboundedSender<Job>,
    idle_worker: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
}

async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| anyhow!("timed out after {limit:?}"))?
}

impl BusLink {
    async fn connect(&self) -> bool {
        match bounded(self.timeout, self.bus.connect()).await {
            Ok(()) => {
                info!(channel = %self.channel, "Connected to message bus");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to connect to message bus");
                self.audit
                    .failure(TASK_BUS_PUBLISH, "connect", &self.channel, &format!("{e:#}"))
                    .await;
                false
            }
        }
    }

    async fn publish(&self, event: &BusEvent) -> bool {
        if !self.bus.is_connected() && !self.connect().await {
            return false;
        }

        let key = event.pair().to_string();
        let result = match event.to_bytes() {
            Ok(payload) => bounded(self.timeout, self.bus.publish(&self.channel, payload)).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!(
                    channel = %self.channel,
                    action = %event.action(),
                    pair = %key,
                    "Published to message bus"
                );
                true
            }
            Err(e) => {
                warn!(pair = %key, error = %e, "Failed to publish to message bus");
                self.audit_publish_failure(event, &format!("{e:#}")).await;
                false
            }
        }
    }

    async fn audit_publish_failure(&self, event: &BusEvent, cause: &str) {
        self.audit
            .failure(
                TASK_BUS_PUBLISH,
                &format!("publish {}", event.action()),
                &event.pair().to_string(),
                cause,
            )
            .await;
    }

    /// Publishes in order. After the first failure the rest of the batch is
    /// audited as skipped without touching the bus again.
    async fn publish_batch(&self, events: Vec<BusEvent>) {
        let mut events = events.iter();
        for event in events.by_ref() {
            if !self.publish(event).await {
                break;
            }
        }
        let mut skipped = 0;
        for event in events {
            self.audit_publish_failure(event, "skipped after earlier bus failure")
                .await;
            skipped += 1;
        }
        if skipped > 0 {
            warn!(skipped, "Skipped remaining bus events after a failure");
        }
    }
}

async fn run_worker(link: Arc<BusLink>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Publish(events) => link.publish_batch(events).await,
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Bus publish worker stopped");
}

impl MessageBusPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, channel: &str, timeout: Duration, audit: Audit) -> Self {
        let (jobs, receiver) = mpsc::unbounded_channel();
        MessageBusPublisher {
            link: Arc::new(BusLink {
                bus,
                channel: channel.to_string(),
                timeout,
                audit,
            }),
            jobs,
            idle_worker: Mutex::new(Some(receiver)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.bus.is_connected()
    }

    /// One bounded connection attempt. Failure is logged and leaves the bus
    /// disconnected; the next publish tries again.
    pub async fn connect(&self) -> bool {
        self.link.connect().await
    }

    /// Publishes one event inline, bounded by the bus timeout. Returns
    /// whether it was delivered; failures are audited, never returned.
    pub async fn publish(&self, event: &BusEvent) -> bool {
        self.link.publish(event).await
    }

    // The worker starts on first use so construction needs no runtime.
    fn ensure_worker(&self) {
        let receiver = self
            .idle_worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(receiver) = receiver {
            tokio::spawn(run_worker(Arc::clone(&self.link), receiver));
        }
    }

    /// Queues events for background delivery and returns immediately.
    pub fn enqueue(&self, events: Vec<BusEvent>) {
        if events.is_empty() {
            return;
        }
        self.ensure_worker();
        if self.jobs.send(Job::Publish(events)).is_err() {
            warn!("Bus publish worker is gone, dropping events");
        }
    }

    /// Waits until everything queued so far has been attempted.
    pub async fn flush(&self) {
        self.ensure_worker();
        let (done, wait) = oneshot::channel();
        if self.jobs.send(Job::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Drains the queue, then drops the bus connection.
    pub async fn close(&self) {
        self.flush().await;
        self.link.bus.close().await;
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeBus;
    use super::*;
    use crate::core::rate::{RatePair, RateRecord};
    use crate::core::store::{RateStore, TaskStatus};
    use crate::store::MemoryRateStore;
    use chrono::Utc;
    use std::sync::atomic::Ordering;

    fn event() -> BusEvent {
        BusEvent::Created(RateRecord::new(
            &RatePair::new("USD", "EUR"),
            0.9,
            Utc::now(),
        ))
    }

    fn publisher(bus: Arc<FakeBus>, store: Arc<MemoryRateStore>) -> MessageBusPublisher {
        MessageBusPublisher::new(
            bus,
            "currency.updates",
            Duration::from_millis(200),
            Audit::new(store),
        )
    }

    #[tokio::test]
    async fn test_publish_connects_lazily() {
        let bus = Arc::new(FakeBus::default());
        let store = Arc::new(MemoryRateStore::new());
        let publisher = publisher(bus.clone(), store);

        assert!(!publisher.is_connected());
        publisher.publish(&event()).await;
        publisher.publish(&event()).await;

        assert!(publisher.is_connected());
        assert_eq!(bus.connect_attempts.load(Ordering::SeqCst), 1);
        let published = bus.published.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "currency.updates");
    }

    #[tokio::test]
    async fn test_unreachable_bus_is_logged_and_retried_next_call() {
        let bus = Arc::new(FakeBus::unreachable());
        let store = Arc::new(MemoryRateStore::new());
        let publisher = publisher(bus.clone(), store.clone());

        publisher.publish(&event()).await;
        assert!(!publisher.is_connected());
        assert_eq!(bus.connect_attempts.load(Ordering::SeqCst), 1);

        // A single attempt per call, no retry loop of its own
        publisher.publish(&event()).await;
        assert_eq!(bus.connect_attempts.load(Ordering::SeqCst), 2);
        assert!(bus.published.lock().unwrap().is_empty());

        let logs = store.task_logs(10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.status == TaskStatus::Failed));
        assert!(logs[0].details.contains("connection refused"));

        // Bus comes back
        bus.refuse_connect.store(false, Ordering::SeqCst);
        publisher.publish(&event()).await;
        assert_eq!(bus.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_audited_with_key() {
        let bus = Arc::new(FakeBus::default());
        bus.fail_publish.store(true, Ordering::SeqCst);
        let store = Arc::new(MemoryRateStore::new());
        let publisher = publisher(bus.clone(), store.clone());

        publisher.publish(&event()).await;

        let logs = store.task_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].task_name, TASK_BUS_PUBLISH);
        assert!(logs[0].details.contains("publish created"));
        assert!(logs[0].details.contains("USD/EUR"));
        assert!(logs[0].details.contains("broken pipe"));
    }

    #[tokio::test]
    async fn test_enqueue_delivers_in_order() {
        let bus = Arc::new(FakeBus::default());
        let store = Arc::new(MemoryRateStore::new());
        let publisher = publisher(bus.clone(), store);

        let deleted = BusEvent::Deleted(RatePair::new("USD", "EUR"));
        publisher.enqueue(vec![event(), deleted]);
        publisher.enqueue(vec![event()]);
        publisher.flush().await;

        let actions: Vec<_> = bus
            .payloads()
            .iter()
            .map(|p| p["action"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(actions, vec!["created", "deleted", "created"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_bus_costs_one_timeout_per_batch() {
        let bus = Arc::new(FakeBus::stalled());
        let store = Arc::new(MemoryRateStore::new());
        let publisher = publisher(bus.clone(), store.clone());

        let started = tokio::time::Instant::now();
        publisher.enqueue((0..30).map(|_| event()).collect());
        assert!(started.elapsed() < Duration::from_millis(1));

        publisher.flush().await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(bus.connect_attempts.load(Ordering::SeqCst), 1);

        // One connect failure plus one skipped entry per remaining event
        let logs = store.task_logs(100).await.unwrap();
        assert_eq!(logs.len(), 30);
        assert!(logs[0].details.contains("skipped after earlier bus failure"));
        assert!(logs[29].details.contains("connect failed"));
    }
}
