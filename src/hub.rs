//! Polling hub: owns the transport, the latest snapshot and the
//! subscriber registry
//!
//! The hub is a two-state machine. It is `Idle` (no subscribers, no
//! connection, no timer) until the first subscriber arrives, which opens
//! the Modbus connection and starts the recurring poll task; removing
//! the last subscriber stops the task and closes the connection again.
//! Each poll cycle reads the family's register block, decodes it and,
//! only on a fully successful decode, atomically replaces the stored
//! snapshot before notifying every subscriber. Notifications carry no
//! payload; consumers pull the values they care about via
//! [`PollingHub::get_value`].

use crate::config::Settings;
use crate::decoder::{Snapshot, Value, decode};
use crate::error::Result;
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::modbus::{ModbusClient, Transport};
use crate::registers::status_description;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};

/// Handle identifying one registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Ordered set of subscriber callbacks.
///
/// `insert` of an already-present handle and `remove` of an absent one
/// are both no-ops; emptiness drives the hub's connect/disconnect
/// transitions.
#[derive(Default)]
struct SubscriberRegistry {
    next_id: u64,
    entries: Vec<(SubscriberId, Callback)>,
}

impl SubscriberRegistry {
    fn add(&mut self, callback: Callback) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.insert(id, callback);
        id
    }

    fn insert(&mut self, id: SubscriberId, callback: Callback) {
        if self.contains(id) {
            return;
        }
        self.entries.push((id, callback));
    }

    fn contains(&self, id: SubscriberId) -> bool {
        self.entries.iter().any(|(entry_id, _)| *entry_id == id)
    }

    fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Callbacks in subscription order, cloned so they can be invoked
    /// without holding the registry lock
    fn callbacks(&self) -> Vec<Callback> {
        self.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }
}

/// Running poll task plus its stop signal
struct PollerTask {
    handle: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

struct HubInner {
    settings: Settings,
    /// Single mutual-exclusion guard around the transport; serializes the
    /// block read against connect/close from subscribe/unsubscribe
    client: Mutex<Box<dyn Transport>>,
    /// Latest fully decoded snapshot, replaced atomically
    snapshot: RwLock<Snapshot>,
    subscribers: StdMutex<SubscriberRegistry>,
    /// Consecutive transport failures since the last successful cycle
    failures: AtomicU32,
    logger: StructuredLogger,
}

impl HubInner {
    fn lock_subscribers(&self) -> MutexGuard<'_, SubscriberRegistry> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// One poll cycle: read the family's register block, decode, swap
    /// the snapshot in and notify. Any failure leaves the previous
    /// snapshot untouched; the next timer tick is the retry.
    async fn poll_cycle(&self) {
        let map = self.settings.family.register_map();

        let read_result = {
            let mut client = self.client.lock().await;

            let threshold = self.settings.reconnect_after_failures;
            if threshold > 0 && self.failures.load(Ordering::Relaxed) >= threshold {
                self.logger.warn(&format!(
                    "{} consecutive transport failures, reopening connection",
                    self.failures.load(Ordering::Relaxed)
                ));
                let _ = client.close().await;
                if let Err(e) = client.connect().await {
                    self.logger.error(&format!("Reconnect failed: {}", e));
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                self.failures.store(0, Ordering::Relaxed);
            }

            client
                .read_holding_registers(map.base_address, map.register_count)
                .await
        };

        let words = match read_result {
            Ok(words) => words,
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                self.logger.warn(&format!(
                    "Poll cycle transport fault ({} consecutive): {}",
                    failures, e
                ));
                return;
            }
        };

        match decode(&words, self.settings.family) {
            Ok(snapshot) => {
                if let Some(code) = snapshot.get("status").and_then(Value::as_i64) {
                    if let Some(description) = status_description(code) {
                        self.logger
                            .debug(&format!("Device status {}: {}", code, description));
                    }
                }
                {
                    let mut current = self
                        .snapshot
                        .write()
                        .unwrap_or_else(PoisonError::into_inner);
                    *current = snapshot;
                }
                self.failures.store(0, Ordering::Relaxed);
                self.notify_subscribers();
            }
            Err(e) => {
                self.logger.warn(&format!("Poll cycle decode fault: {}", e));
            }
        }
    }

    /// Invoke every registered callback, strictly after the snapshot swap
    fn notify_subscribers(&self) {
        let callbacks = self.lock_subscribers().callbacks();
        for callback in callbacks {
            callback();
        }
    }
}

/// Polls one inverter on a timer and hands out its latest snapshot.
///
/// The host application constructs and owns one hub per configured
/// device and passes references to interested consumers; there is no
/// process-wide hub lookup.
pub struct PollingHub {
    inner: Arc<HubInner>,
    /// Lifecycle slot; `Some` exactly while the hub is `Active`
    poller: Mutex<Option<PollerTask>>,
}

impl PollingHub {
    /// Create an idle hub using the real Modbus TCP transport
    pub fn new(settings: Settings) -> Self {
        let client = ModbusClient::new(&settings);
        Self::with_transport(settings, Box::new(client))
    }

    /// Create an idle hub over a caller-supplied transport
    pub fn with_transport(settings: Settings, transport: Box<dyn Transport>) -> Self {
        let logger =
            get_logger_with_context(LogContext::new("hub").with_device(settings.host.clone()));
        Self {
            inner: Arc::new(HubInner {
                settings,
                client: Mutex::new(transport),
                snapshot: RwLock::new(Snapshot::default()),
                subscribers: StdMutex::new(SubscriberRegistry::default()),
                failures: AtomicU32::new(0),
                logger,
            }),
            poller: Mutex::new(None),
        }
    }

    /// The settings this hub was built with
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Register a consumer for snapshot-update notifications.
    ///
    /// The first subscriber opens the Modbus connection and starts the
    /// poll timer; a connect failure leaves the hub idle and is returned
    /// to the caller. The callback takes no arguments: consumers pull
    /// the latest values via [`PollingHub::get_value`] after a notify.
    pub async fn subscribe<F>(&self, callback: F) -> Result<SubscriberId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        // Lifecycle lock order: poller slot first, then registry. The
        // registration happens while the slot is still held so a
        // concurrent unsubscribe cannot tear the timer down in between.
        let mut poller = self.poller.lock().await;
        if poller.is_none() {
            {
                let mut client = self.inner.client.lock().await;
                client.connect().await?;
            }
            *poller = Some(self.spawn_poller());
            self.inner
                .logger
                .info("First subscriber: connection opened, poll timer started");
        }

        Ok(self.inner.lock_subscribers().add(Arc::new(callback)))
    }

    /// Remove a consumer. Removing the last one stops the poll timer
    /// and closes the connection; an in-flight cycle is allowed to
    /// finish first. Unknown ids are ignored.
    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<()> {
        // Same lock order as subscribe: the emptiness check and the
        // timer teardown are one step under the poller slot, so a
        // subscriber registered concurrently is never left on a hub
        // whose timer just stopped.
        let mut poller = self.poller.lock().await;
        let now_empty = {
            let mut subscribers = self.inner.lock_subscribers();
            subscribers.remove(id);
            subscribers.is_empty()
        };

        if now_empty {
            if let Some(task) = poller.take() {
                let _ = task.stop_tx.send(true);
                let _ = task.handle.await;
                let mut client = self.inner.client.lock().await;
                client.close().await?;
                self.inner
                    .logger
                    .info("Last subscriber removed: poll timer stopped, connection closed");
            }
        }
        Ok(())
    }

    /// Read a single measurement from the current snapshot
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.inner
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Clone of the full current snapshot
    pub fn snapshot(&self) -> Snapshot {
        self.inner
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock_subscribers().len()
    }

    /// Whether the poll timer is currently running
    pub async fn is_active(&self) -> bool {
        self.poller.lock().await.is_some()
    }

    /// Run a single poll cycle outside the timer.
    ///
    /// Intended for hosts that schedule polling themselves; the regular
    /// timer path calls the same cycle.
    pub async fn poll_once(&self) {
        self.inner.poll_cycle().await;
    }

    fn spawn_poller(&self) -> PollerTask {
        let inner = Arc::clone(&self.inner);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let period = Duration::from_secs(self.inner.settings.poll_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            // A new cycle never starts before the previous one completes
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.poll_cycle().await;
                    }
                    _ = stop_rx.changed() => {
                        break;
                    }
                }
            }
        });

        PollerTask { handle, stop_tx }
    }
}

impl Drop for PollingHub {
    fn drop(&mut self) {
        // Best-effort: stop a still-running poll task when the host
        // drops the hub without unsubscribing everyone
        if let Ok(mut poller) = self.poller.try_lock() {
            if let Some(task) = poller.take() {
                task.handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::registers::DeviceFamily;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn noop() -> Callback {
        Arc::new(|| {})
    }

    #[test]
    fn registry_orders_and_counts() {
        let mut registry = SubscriberRegistry::default();
        assert!(registry.is_empty());
        let a = registry.add(noop());
        let b = registry.add(noop());
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(a));
    }

    #[test]
    fn registry_remove_is_idempotent() {
        let mut registry = SubscriberRegistry::default();
        let a = registry.add(noop());
        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert!(registry.is_empty());
    }

    #[test]
    fn registry_duplicate_insert_is_noop() {
        let mut registry = SubscriberRegistry::default();
        let a = registry.add(noop());
        registry.insert(a, noop());
        assert_eq!(registry.len(), 1);
    }

    /// Test transport serving a shared, mutable register block
    struct MockTransport {
        connected: bool,
        connects: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        words: Arc<StdMutex<Vec<u16>>>,
        fail_reads: Arc<AtomicBool>,
        errors: Arc<StdMutex<VecDeque<TransportError>>>,
    }

    #[derive(Clone)]
    struct MockHandles {
        connects: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        words: Arc<StdMutex<Vec<u16>>>,
        fail_reads: Arc<AtomicBool>,
        errors: Arc<StdMutex<VecDeque<TransportError>>>,
    }

    fn mock_transport(words: Vec<u16>) -> (Box<dyn Transport>, MockHandles) {
        let handles = MockHandles {
            connects: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            words: Arc::new(StdMutex::new(words)),
            fail_reads: Arc::new(AtomicBool::new(false)),
            errors: Arc::new(StdMutex::new(VecDeque::new())),
        };
        let transport = MockTransport {
            connected: false,
            connects: Arc::clone(&handles.connects),
            closes: Arc::clone(&handles.closes),
            words: Arc::clone(&handles.words),
            fail_reads: Arc::clone(&handles.fail_reads),
            errors: Arc::clone(&handles.errors),
        };
        (Box::new(transport), handles)
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&mut self) -> Result<()> {
            self.connected = true;
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            if self.connected {
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn read_holding_registers(
            &mut self,
            _address: u16,
            count: u16,
        ) -> std::result::Result<Vec<u16>, TransportError> {
            if let Some(err) = self
                .errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
            {
                return Err(err);
            }
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(TransportError::Timeout);
            }
            let words = self
                .words
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            Ok(words.into_iter().take(count as usize).collect())
        }
    }

    fn single_string_settings() -> Settings {
        let mut settings = Settings::new("test-inverter", DeviceFamily::SingleString);
        settings.poll_interval_secs = 3600;
        settings
    }

    fn single_string_block(current: u16) -> Vec<u16> {
        let mut words = vec![0u16; 38];
        // All four AC current fields carry the same raw value, sf = 0
        words[0] = current;
        words[1] = current;
        words[2] = current;
        words[3] = current;
        words
    }

    #[tokio::test]
    async fn poll_once_populates_snapshot() {
        let (transport, _handles) = mock_transport(single_string_block(7));
        let hub = PollingHub::with_transport(single_string_settings(), transport);

        assert!(hub.get_value("ac_current").is_none());
        hub.poll_once().await;
        assert_eq!(hub.get_value("ac_current"), Some(Value::Float(7.0)));
        assert_eq!(hub.get_value("status"), Some(Value::Int(0)));
        assert!(hub.get_value("no_such_key").is_none());
    }

    #[tokio::test]
    async fn transport_fault_leaves_snapshot_untouched() {
        let (transport, handles) = mock_transport(single_string_block(7));
        let hub = PollingHub::with_transport(single_string_settings(), transport);

        hub.poll_once().await;
        let before = hub.snapshot();

        handles.fail_reads.store(true, Ordering::SeqCst);
        {
            let mut words = handles.words.lock().unwrap();
            *words = single_string_block(9);
        }
        hub.poll_once().await;
        assert_eq!(hub.snapshot(), before);

        // Next cycle succeeds and picks up the new block
        handles.fail_reads.store(false, Ordering::SeqCst);
        hub.poll_once().await;
        assert_eq!(hub.get_value("ac_current"), Some(Value::Float(9.0)));
    }

    #[tokio::test]
    async fn short_block_is_rejected_without_partial_snapshot() {
        let (transport, _handles) = mock_transport(vec![0u16; 10]);
        let hub = PollingHub::with_transport(single_string_settings(), transport);

        hub.poll_once().await;
        assert!(hub.snapshot().is_empty());
    }

    #[tokio::test]
    async fn reconnects_after_consecutive_failures() {
        let (transport, handles) = mock_transport(single_string_block(5));
        let mut settings = single_string_settings();
        settings.reconnect_after_failures = 2;
        let hub = PollingHub::with_transport(settings, transport);

        // Open the connection the way the hub normally would
        let id = hub.subscribe(|| {}).await.unwrap();
        assert_eq!(handles.connects.load(Ordering::SeqCst), 1);

        handles.fail_reads.store(true, Ordering::SeqCst);
        hub.poll_once().await;
        hub.poll_once().await;
        // Threshold reached: this cycle reopens the connection first
        handles.fail_reads.store(false, Ordering::SeqCst);
        hub.poll_once().await;

        assert_eq!(handles.connects.load(Ordering::SeqCst), 2);
        assert!(handles.closes.load(Ordering::SeqCst) >= 1);
        assert_eq!(hub.get_value("ac_current"), Some(Value::Float(5.0)));

        hub.unsubscribe(id).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_unsubscribe_and_subscribe_never_strand_a_subscriber() {
        for _ in 0..500 {
            let (transport, _handles) = mock_transport(single_string_block(1));
            let hub = Arc::new(PollingHub::with_transport(
                single_string_settings(),
                transport,
            ));
            let first = hub.subscribe(|| {}).await.unwrap();

            let subscribe_hub = Arc::clone(&hub);
            let subscriber =
                tokio::spawn(async move { subscribe_hub.subscribe(|| {}).await.unwrap() });
            let unsubscribe_hub = Arc::clone(&hub);
            let unsubscriber =
                tokio::spawn(async move { unsubscribe_hub.unsubscribe(first).await.unwrap() });

            let second = subscriber.await.unwrap();
            unsubscriber.await.unwrap();

            // Whichever order the race resolved in, a registered
            // subscriber always has a running poll timer behind it
            assert_eq!(hub.subscriber_count(), 1);
            assert!(hub.is_active().await);

            hub.unsubscribe(second).await.unwrap();
            assert!(!hub.is_active().await);
            assert_eq!(hub.subscriber_count(), 0);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn snapshot_replacement_is_atomic() {
        let (transport, handles) = mock_transport(single_string_block(0));
        let hub = Arc::new(PollingHub::with_transport(
            single_string_settings(),
            transport,
        ));
        hub.poll_once().await;

        let stop = Arc::new(AtomicBool::new(false));
        let reader_hub = Arc::clone(&hub);
        let reader_stop = Arc::clone(&stop);
        let reader = tokio::spawn(async move {
            while !reader_stop.load(Ordering::SeqCst) {
                let snapshot = reader_hub.snapshot();
                let total = snapshot.get("ac_current").and_then(Value::as_f64);
                let phase_a = snapshot.get("ac_current_a").and_then(Value::as_f64);
                let phase_b = snapshot.get("ac_current_b").and_then(Value::as_f64);
                // All three come from the same cycle's block, so a
                // consistent snapshot always agrees across them
                assert_eq!(total, phase_a);
                assert_eq!(total, phase_b);
                tokio::task::yield_now().await;
            }
        });

        for cycle in 1..200u16 {
            {
                let mut words = handles.words.lock().unwrap();
                *words = single_string_block(cycle);
            }
            hub.poll_once().await;
        }

        stop.store(true, Ordering::SeqCst);
        reader.await.unwrap();
    }
}
