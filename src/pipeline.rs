//! Pipeline coordinator: wires watches through aggregation into fan-out.
//!
//! One background task drives everything: it drains the record channel fed
//! by the watch registry, buffers records in the aggregator, and flushes
//! on a fixed tick or immediately when a record demands it. Lifecycle is
//! `Stopped -> Running -> Stopped`, restart allowed, both transitions
//! idempotent.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::aggregate::EventAggregator;
use crate::broadcast::{Broadcaster, NotificationSink, SubscriberId};
use crate::config::Settings;
use crate::event::{ChangeRecord, Envelope, describe};
use crate::watcher::{WatchDescriptor, WatchError, WatchRegistry, WatchStatus};

/// Handle for a registered side-effect callback.
pub type HandlerId = u64;

type Handler = Arc<dyn Fn(&ChangeRecord) + Send + Sync>;

struct RunState {
    token: Option<CancellationToken>,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// Owns the watch table, aggregation buffer, and subscriber set. Multiple
/// independent pipelines can coexist; nothing here is global.
pub struct Pipeline {
    settings: Settings,
    registry: Arc<WatchRegistry>,
    aggregator: Arc<Mutex<EventAggregator>>,
    broadcaster: Arc<Broadcaster>,
    handlers: Arc<RwLock<HashMap<HandlerId, Handler>>>,
    next_handler_id: AtomicU64,
    record_tx: mpsc::Sender<ChangeRecord>,
    record_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ChangeRecord>>>,
    run: Mutex<RunState>,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Self {
        let (record_tx, record_rx) = mpsc::channel(settings.pipeline.channel_capacity);
        let aggregator = EventAggregator::new(
            settings.pipeline.aggregation_window(),
            settings.pipeline.max_pending_paths,
        );
        let broadcaster = Broadcaster::new(settings.pipeline.send_timeout());
        let registry = WatchRegistry::new(settings.pipeline.channel_capacity);

        Self {
            settings,
            registry: Arc::new(registry),
            aggregator: Arc::new(Mutex::new(aggregator)),
            broadcaster: Arc::new(broadcaster),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_handler_id: AtomicU64::new(1),
            record_tx,
            record_rx: Arc::new(tokio::sync::Mutex::new(record_rx)),
            run: Mutex::new(RunState {
                token: None,
                task: None,
            }),
        }
    }

    /// Spawn the flush loop. No-op when already running.
    pub fn start(&self) {
        let mut run = self.run.lock();
        if run.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let token = CancellationToken::new();
        let worker = Worker {
            record_rx: Arc::clone(&self.record_rx),
            aggregator: Arc::clone(&self.aggregator),
            broadcaster: Arc::clone(&self.broadcaster),
            handlers: Arc::clone(&self.handlers),
            // interval() panics on zero
            flush_interval: self
                .settings
                .pipeline
                .flush_interval()
                .max(std::time::Duration::from_millis(1)),
        };
        run.task = Some(tokio::spawn(worker.run(token.clone())));
        run.token = Some(token);
        crate::log_event!("pipeline", "started");
    }

    /// Cancel the flush loop promptly and discard any in-flight buffer.
    /// Safe to call when already stopped.
    pub async fn stop(&self) {
        let (token, task) = {
            let mut run = self.run.lock();
            (run.token.take(), run.task.take())
        };
        let Some(task) = task else { return };

        if let Some(token) = token {
            token.cancel();
        }
        let _ = task.await;
        self.aggregator.lock().drain_pending();
        crate::log_event!("pipeline", "stopped");
    }

    /// Stop the flush loop and tear down every watch.
    pub async fn shutdown(&self) {
        self.registry.stop_all();
        self.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .task
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Descriptor seeded from the configured per-watch defaults.
    pub fn watch_descriptor(&self, root: impl AsRef<Path>) -> WatchDescriptor {
        WatchDescriptor::new(root.as_ref())
            .recursive(self.settings.watch.recursive)
            .ignore_rules(self.settings.watch.ignore_patterns.clone())
            .debounce_window(self.settings.watch.debounce_window())
            .max_file_size_bytes(self.settings.watch.max_file_size_bytes)
    }

    /// Start (or re-arm) a watch feeding this pipeline.
    pub fn request_watch(&self, descriptor: WatchDescriptor) -> Result<(), WatchError> {
        self.registry.start_watch(descriptor, self.record_tx.clone())
    }

    /// Stop a watch. Returns false when the root was not being watched.
    pub fn cancel_watch(&self, root: &Path) -> bool {
        self.registry.stop_watch(root)
    }

    pub fn watch_status(&self, root: &Path) -> Option<WatchStatus> {
        self.registry.status(root)
    }

    pub fn watch_statuses(&self) -> Vec<WatchStatus> {
        self.registry.statuses()
    }

    pub fn is_watching(&self, root: &Path) -> bool {
        self.registry.is_watching(root)
    }

    pub fn subscribe(&self, sink: Arc<dyn NotificationSink>, scope: Option<String>) -> SubscriberId {
        self.broadcaster.subscribe(sink, scope)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    pub fn scope_counts(&self) -> HashMap<String, usize> {
        self.broadcaster.scope_counts()
    }

    /// Register a callback invoked once per delivered record, after
    /// broadcast. Failures are isolated per handler.
    pub fn add_handler(&self, handler: impl Fn(&ChangeRecord) + Send + Sync + 'static) -> HandlerId {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().insert(id, Arc::new(handler));
        id
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.handlers.write().remove(&id).is_some()
    }

    #[cfg(test)]
    pub(crate) fn inject(&self, record: ChangeRecord) {
        self.record_tx
            .try_send(record)
            .expect("record channel full in test");
    }
}

/// State captured by the background task.
struct Worker {
    record_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ChangeRecord>>>,
    aggregator: Arc<Mutex<EventAggregator>>,
    broadcaster: Arc<Broadcaster>,
    handlers: Arc<RwLock<HashMap<HandlerId, Handler>>>,
    flush_interval: std::time::Duration,
}

impl Worker {
    async fn run(self, token: CancellationToken) {
        // exclusive while running; released on exit so a restart can take it
        let mut record_rx = self.record_rx.lock().await;

        let mut tick = tokio::time::interval(self.flush_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,

                Some(record) = record_rx.recv() => {
                    let flush_now = self.aggregator.lock().offer(record);
                    if flush_now {
                        self.flush().await;
                    }
                }

                _ = tick.tick() => {
                    self.flush().await;
                }
            }
        }
    }

    async fn flush(&self) {
        let records = self.aggregator.lock().drain_pending();
        for record in records {
            self.deliver(record).await;
        }
    }

    async fn deliver(&self, record: ChangeRecord) {
        let payload = Envelope::file_event(record.payload()).to_json();
        let delivered = self
            .broadcaster
            .broadcast(&payload, record.scope.as_deref())
            .await;
        crate::debug_event!(
            "pipeline",
            "delivered",
            "{} to {delivered} subscriber(s)",
            describe(&record)
        );

        let handlers: Vec<(HandlerId, Handler)> = self
            .handlers
            .read()
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect();
        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&record))).is_err() {
                tracing::error!("[pipeline] handler {id} panicked, continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ChannelSink;
    use crate::event::ChangeKind;
    use std::time::Duration;

    fn settings(flush_ms: u64) -> Settings {
        let mut settings = Settings::default();
        settings.pipeline.flush_interval_ms = flush_ms;
        settings
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let pipeline = Pipeline::new(settings(50));
        assert!(!pipeline.is_running());

        pipeline.start();
        pipeline.start();
        assert!(pipeline.is_running());

        pipeline.stop().await;
        pipeline.stop().await;
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let pipeline = Pipeline::new(settings(50));
        pipeline.start();
        pipeline.stop().await;
        pipeline.start();
        assert!(pipeline.is_running());

        let (sink, mut rx) = ChannelSink::new(8);
        pipeline.subscribe(Arc::new(sink), None);
        pipeline.inject(ChangeRecord::new(ChangeKind::Created, "/proj/a.rs"));

        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no delivery after restart")
            .unwrap();
        assert!(payload.contains("/proj/a.rs"));
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_periodic_flush_coalesces_same_path() {
        let pipeline = Pipeline::new(settings(100));
        pipeline.start();

        let (sink, mut rx) = ChannelSink::new(8);
        pipeline.subscribe(Arc::new(sink), None);

        for _ in 0..3 {
            pipeline.inject(ChangeRecord::new(ChangeKind::Modified, "/proj/a.rs"));
        }

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no flush")
            .unwrap();
        assert!(first.contains("modified"));

        // a tick may split the burst once, but never deliver per-record
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut extra = 0;
        while rx.try_recv().is_ok() {
            extra += 1;
        }
        assert!(extra <= 1, "burst not coalesced: {} deliveries", extra + 1);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_delete_flushes_before_tick() {
        // tick far in the future so only the immediate path can deliver
        let pipeline = Pipeline::new(settings(60_000));
        pipeline.start();

        let (sink, mut rx) = ChannelSink::new(8);
        pipeline.subscribe(Arc::new(sink), None);
        pipeline.inject(ChangeRecord::new(ChangeKind::Deleted, "/proj/gone.rs"));

        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delete not delivered immediately")
            .unwrap();
        assert!(payload.contains("deleted"));
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_scoped_record_routed() {
        let pipeline = Pipeline::new(settings(50));
        pipeline.start();

        let (sink_a, mut rx_a) = ChannelSink::new(8);
        let (sink_b, mut rx_b) = ChannelSink::new(8);
        pipeline.subscribe(Arc::new(sink_a), Some("proj-1".to_string()));
        pipeline.subscribe(Arc::new(sink_b), Some("proj-2".to_string()));

        let record = ChangeRecord::new(ChangeKind::Deleted, "/proj/x.rs")
            .with_scope(Some("proj-1".to_string()));
        pipeline.inject(record);

        let payload = tokio::time::timeout(Duration::from_secs(2), rx_a.recv())
            .await
            .expect("scoped delivery missing")
            .unwrap();
        assert!(payload.contains("proj-1"));
        assert!(rx_b.try_recv().is_err());
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_handler_panic_isolated() {
        let pipeline = Pipeline::new(settings(50));
        pipeline.start();

        let (sink, mut rx) = ChannelSink::new(8);
        pipeline.subscribe(Arc::new(sink), None);

        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = Arc::clone(&seen);
        pipeline.add_handler(|_| panic!("broken handler"));
        pipeline.add_handler(move |_| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        pipeline.inject(ChangeRecord::new(ChangeKind::Deleted, "/proj/x.rs"));

        // broadcast still happens and the healthy handler still runs
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("broadcast blocked by handler panic")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_remove_handler() {
        let pipeline = Pipeline::new(settings(50));
        let id = pipeline.add_handler(|_| {});
        assert!(pipeline.remove_handler(id));
        assert!(!pipeline.remove_handler(id));
    }
}
