//! Batch dispatcher
//!
//! Runs each incoming message through the gate, classifier and policy, and
//! hands accepted ones to the delivery client on a background task. The
//! caller never waits for a delivery; counters move only after a confirmed
//! send.

use crate::classifier::Classifier;
use crate::clock::Clock;
use crate::config::ForwardConfig;
use crate::delivery::DeliveryClient;
use crate::messages::IncomingMessage;
use crate::policy::{self, Decision};
use crate::store::ConfigStore;
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Launches fire-and-forget work without tying the dispatcher to a runtime
pub trait Spawner: Send + Sync {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Spawns onto a tokio runtime and remembers the handles so a host can
/// wait for in-flight deliveries before shutting down.
pub struct TokioSpawner {
    handle: Handle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TokioSpawner {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawner for the runtime the caller is running on.
    /// Panics outside a tokio runtime, like `Handle::current`.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn in_flight(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Wait for every task spawned so far, including ones spawned while waiting
    pub async fn drain(&self) {
        loop {
            let tasks = {
                let mut guard = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
                std::mem::take(&mut *guard)
            };
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    error!("Delivery task panicked: {}", e);
                }
            }
        }
    }
}

impl Spawner for TokioSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        let join = self.handle.spawn(task);
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(join);
    }
}

/// What happened to a batch, for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub skipped: usize,
    pub filtered: usize,
    pub dispatched: usize,
}

pub struct Dispatcher {
    classifier: Arc<Classifier>,
    client: Arc<DeliveryClient>,
    store: Arc<dyn ConfigStore>,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn Spawner>,
}

impl Dispatcher {
    pub fn new(
        client: Arc<DeliveryClient>,
        store: Arc<dyn ConfigStore>,
        clock: Arc<dyn Clock>,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        Self {
            classifier: Arc::new(Classifier::new()),
            client,
            store,
            clock,
            spawner,
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Entry point for the receiver glue, once per batch. Returns immediately;
    /// deliveries continue on the spawner.
    pub fn process_batch(
        &self,
        messages: &[IncomingMessage],
        config: &ForwardConfig,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for message in messages {
            match self.process_message(message, config) {
                Decision::Forward => summary.dispatched += 1,
                Decision::Filtered => summary.filtered += 1,
                Decision::Disabled | Decision::Empty => summary.skipped += 1,
            }
        }
        debug!(
            "Batch of {}: {} dispatched, {} filtered, {} skipped",
            messages.len(),
            summary.dispatched,
            summary.filtered,
            summary.skipped
        );
        summary
    }

    /// Same as `process_batch` with a fresh snapshot from the store
    pub fn process_batch_with_store_config(&self, messages: &[IncomingMessage]) -> BatchSummary {
        let config = self.store.get();
        self.process_batch(messages, &config)
    }

    pub fn process_message(
        &self,
        message: &IncomingMessage,
        config: &ForwardConfig,
    ) -> Decision {
        if policy::gate(config) == Decision::Disabled {
            debug!(
                "Relay disabled or no webhook configured, skipping message from {}",
                message.sender
            );
            return Decision::Disabled;
        }

        if message.body.trim().is_empty() {
            debug!("Empty message from {}, skipping", message.sender);
            return Decision::Empty;
        }

        let classification = self.classifier.classify(&message.body, &message.sender);
        let decision = policy::evaluate(config, &classification);
        debug!(
            "Classified message from {}: verification={} confidence={} code={:?}",
            message.sender,
            classification.is_verification_like,
            classification.confidence_score,
            classification.extracted_code
        );

        if decision != Decision::Forward {
            debug!("Filtered message from {}: {}", message.sender, message.preview());
            return decision;
        }

        info!("Forwarding message from {}: {}", message.sender, message.preview());
        self.spawn_delivery(message, config);
        Decision::Forward
    }

    fn spawn_delivery(&self, message: &IncomingMessage, config: &ForwardConfig) {
        let client = self.client.clone();
        let store = self.store.clone();
        let clock = self.clock.clone();
        let url = config.destination_url.clone();
        let sender = message.sender.clone();
        let body = message.body.clone();

        self.spawner.spawn(Box::pin(async move {
            let outcome = client.deliver(&url, &sender, &body, clock.as_ref()).await;
            if outcome.succeeded {
                let total = store.increment_forward_count(clock.now());
                info!("Forwarded message from {} (total forwarded: {})", sender, total);

                // File-backed stores write to disk; keep that off the async workers
                match tokio::task::spawn_blocking(move || store.persist()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Failed to save forward counters: {}", e),
                    Err(e) => error!("Counter save task failed: {}", e),
                }
            } else {
                error!(
                    "Failed to forward message from {} after {} attempts: {:?}",
                    sender, outcome.attempts_made, outcome.last_error
                );
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::delivery::{
        DeliveryTimeouts, HttpResponse, HttpTransport, RetryPolicy, WebhookRequest,
    };
    use crate::error::{Error, Result};
    use crate::network::StaticNetwork;
    use crate::store::{MemoryStore, Settings};
    use async_trait::async_trait;
    use chrono::Local;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const URL: &str = "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=test";

    /// Fails any request whose payload contains `poison`
    struct RecordingTransport {
        calls: AtomicU32,
        poison: Option<&'static str>,
    }

    #[async_trait]
    impl HttpTransport for RecordingTransport {
        async fn post(&self, request: &WebhookRequest) -> Result<HttpResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            if let Some(p) = self.poison {
                if request.body.contains(p) {
                    return Err(Error::Parse("refused".into()));
                }
            }
            Ok(HttpResponse { status: 200, body: String::new() })
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        spawner: Arc<TokioSpawner>,
        store: Arc<MemoryStore>,
        transport: Arc<RecordingTransport>,
    }

    fn harness(poison: Option<&'static str>) -> Harness {
        let transport = Arc::new(RecordingTransport {
            calls: AtomicU32::new(0),
            poison,
        });
        let client = Arc::new(DeliveryClient::new(
            transport.clone(),
            Arc::new(StaticNetwork(true)),
            RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
            DeliveryTimeouts::default(),
        ));
        let store = Arc::new(MemoryStore::new(Settings {
            webhook_url: URL.into(),
            enabled: true,
            ..Default::default()
        }));
        let spawner = Arc::new(TokioSpawner::current());
        let dispatcher = Dispatcher::new(
            client,
            store.clone(),
            Arc::new(SystemClock),
            spawner.clone(),
        );
        Harness {
            dispatcher,
            spawner,
            store,
            transport,
        }
    }

    fn msg(sender: &str, body: &str) -> IncomingMessage {
        IncomingMessage::new(sender, body, Local::now())
    }

    fn config(only_codes: bool) -> ForwardConfig {
        ForwardConfig {
            destination_url: URL.into(),
            enabled: true,
            verification_only_mode: only_codes,
        }
    }

    #[tokio::test]
    async fn test_disabled_skips_everything() {
        let h = harness(None);
        let mut cfg = config(false);
        cfg.enabled = false;

        let summary = h.dispatcher.process_batch(&[msg("95555", "验证码 123456")], &cfg);
        h.spawner.drain().await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(h.transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.store.snapshot().total_forward_count, 0);
    }

    #[tokio::test]
    async fn test_empty_url_skips() {
        let h = harness(None);
        let mut cfg = config(false);
        cfg.destination_url.clear();

        let summary = h.dispatcher.process_batch(&[msg("1", "hi")], &cfg);
        assert_eq!(summary, BatchSummary { skipped: 1, filtered: 0, dispatched: 0 });
    }

    #[tokio::test]
    async fn test_empty_body_skipped_before_classification() {
        let h = harness(None);
        let batch = [msg("10086", ""), msg("10086", "  \n\t ")];

        let summary = h.dispatcher.process_batch(&batch, &config(false));
        h.spawner.drain().await;

        assert_eq!(summary, BatchSummary { skipped: 2, filtered: 0, dispatched: 0 });
        assert_eq!(h.transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.store.snapshot().total_forward_count, 0);
    }

    #[tokio::test]
    async fn test_verification_only_filters_chat() {
        let h = harness(None);
        let batch = [
            msg("95555", "您的验证码是 385920，5分钟内有效"),
            msg("+8613800001111", "今晚一起吃饭吗"),
        ];

        let summary = h.dispatcher.process_batch(&batch, &config(true));
        h.spawner.drain().await;

        assert_eq!(summary.dispatched, 1);
        assert_eq!(summary.filtered, 1);
        assert_eq!(h.store.snapshot().total_forward_count, 1);
        assert!(h.store.snapshot().last_forward_time.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_successes_all_counted() {
        let h = harness(None);
        let batch: Vec<_> = (0..50).map(|i| msg("10086", &format!("message {}", i))).collect();

        let summary = h.dispatcher.process_batch(&batch, &config(false));
        h.spawner.drain().await;

        assert_eq!(summary.dispatched, 50);
        assert_eq!(h.store.snapshot().total_forward_count, 50);
        assert_eq!(h.spawner.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let h = harness(Some("poison"));
        let batch = [msg("1", "first"), msg("2", "poison pill"), msg("3", "third")];

        let summary = h.dispatcher.process_batch(&batch, &config(false));
        h.spawner.drain().await;

        assert_eq!(summary.dispatched, 3);
        assert_eq!(h.store.snapshot().total_forward_count, 2);
        // 1 + 2 attempts for the poisoned message + 1
        assert_eq!(h.transport.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_batch_from_store_snapshot() {
        let h = harness(None);
        let summary = h
            .dispatcher
            .process_batch_with_store_config(&[msg("1", "hello")]);
        h.spawner.drain().await;
        assert_eq!(summary.dispatched, 1);
        assert_eq!(h.store.snapshot().total_forward_count, 1);
    }

    #[tokio::test]
    async fn test_process_batch_does_not_wait() {
        let h = harness(None);
        let summary = h.dispatcher.process_batch(&[msg("1", "hello")], &config(false));
        // Nothing has been awaited yet on this single-threaded runtime
        assert_eq!(summary.dispatched, 1);
        assert_eq!(h.store.snapshot().total_forward_count, 0);
        h.spawner.drain().await;
        assert_eq!(h.store.snapshot().total_forward_count, 1);
    }
}
