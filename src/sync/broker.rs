//! Subscription Broker
//!
//! "Watch a key for changes" behind one interface, with two backings:
//!
//! - [`PushBroker`]: the owner of the data publishes values as it mutates
//!   them (in-memory and real-time remote stores).
//! - [`PollingBroker`]: a background task re-reads a [`PollSource`] on an
//!   interval and publishes what changed (stores that cannot push).
//!
//! Both deliver the current value once at subscription time, then every
//! change in order. Subscribers to the same key share one underlying watch,
//! which is torn down when the last of them calls [`Subscription::off`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::store::StorageError;

/// Change callback.
pub type Callback<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// Key bound shared by the brokers.
pub trait WatchKey: Ord + Clone + Debug + Send + Sync + 'static {}
impl<T: Ord + Clone + Debug + Send + Sync + 'static> WatchKey for T {}

/// Value bound shared by the brokers.
pub trait WatchValue: Clone + PartialEq + Send + Sync + 'static {}
impl<T: Clone + PartialEq + Send + Sync + 'static> WatchValue for T {}

/// Watch keys for changes.
pub trait SubscriptionBroker<K, V>: Send + Sync {
    /// Register `on_change` for `key`.
    ///
    /// The current value is delivered once, then each subsequent change.
    fn subscribe(&self, key: K, on_change: Callback<V>) -> Subscription;
}

/// Handle returned by [`SubscriptionBroker::subscribe`].
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    off: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new(off: impl FnOnce() + Send + 'static) -> Self {
        Self {
            off: Mutex::new(Some(Box::new(off))),
        }
    }

    /// Stop callbacks. Idempotent; no delivery happens after this returns.
    pub fn off(&self) {
        let off = lock(&self.off).take();
        if let Some(off) = off {
            off();
        }
    }

    /// Whether `off` has not been called yet.
    pub fn is_active(&self) -> bool {
        lock(&self.off).is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.off();
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// REGISTRY
// =============================================================================

/// One registered callback.
struct Subscriber<V> {
    id: u64,
    callback: Mutex<Option<Callback<V>>>,
    /// Held for the duration of a delivery; stores the last delivered sequence.
    gate: Mutex<u64>,
    delivering: Mutex<Option<ThreadId>>,
}

struct Delivering<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for Delivering<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

impl<V> Subscriber<V> {
    fn deliver(&self, seq: u64, value: &V) {
        let mut last = lock(&self.gate);
        if seq <= *last {
            return;
        }
        *last = seq;

        *lock(&self.delivering) = Some(thread::current().id());
        let _reset = Delivering(&self.delivering);

        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            callback(value);
        }
    }

    fn cancel(&self) {
        lock(&self.callback).take();
        let inside_own_callback = *lock(&self.delivering) == Some(thread::current().id());
        if !inside_own_callback {
            // Wait out a delivery running on another thread.
            drop(lock(&self.gate));
        }
    }
}

struct Entry<V> {
    current: Option<(u64, V)>,
    subscribers: Vec<Arc<Subscriber<V>>>,
}

/// Reference-counted subscriber lists keyed by watch key.
struct Registry<K, V> {
    entries: Mutex<BTreeMap<K, Entry<V>>>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
}

struct Added<V> {
    subscriber: Arc<Subscriber<V>>,
    first: bool,
    initial: Option<(u64, V)>,
}

impl<K: WatchKey, V: WatchValue> Registry<K, V> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Register `callback`. `on_first` runs under the registry lock when the
    /// key gains its first subscriber.
    fn add(
        &self,
        key: K,
        callback: Callback<V>,
        init: impl FnOnce() -> Option<V>,
        on_first: impl FnOnce(&K),
    ) -> Added<V> {
        let subscriber = Arc::new(Subscriber {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            callback: Mutex::new(Some(callback)),
            gate: Mutex::new(0),
            delivering: Mutex::new(None),
        });

        let mut entries = lock(&self.entries);
        let first = !entries.contains_key(&key);
        let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
            current: None,
            subscribers: Vec::new(),
        });
        if first {
            entry.current = init().map(|v| (self.next_seq.fetch_add(1, Ordering::SeqCst), v));
        }
        entry.subscribers.push(subscriber.clone());
        let initial = entry.current.clone();
        if first {
            on_first(&key);
        }

        Added {
            subscriber,
            first,
            initial,
        }
    }

    /// Returns true when `id` was the last subscriber of `key`. `on_last`
    /// then runs under the registry lock.
    fn remove(&self, key: &K, id: u64, on_last: impl FnOnce(&K)) -> bool {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        entry.subscribers.retain(|s| s.id != id);
        if entry.subscribers.is_empty() {
            entries.remove(key);
            on_last(key);
            true
        } else {
            false
        }
    }

    /// Record and deliver `value`. Unwatched keys and unchanged values are
    /// ignored. Returns whether anything was delivered.
    fn publish(&self, key: &K, value: V) -> bool {
        let (seq, subscribers) = {
            let mut entries = lock(&self.entries);
            let Some(entry) = entries.get_mut(key) else {
                return false;
            };
            if entry.current.as_ref().is_some_and(|(_, current)| *current == value) {
                return false;
            }
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            entry.current = Some((seq, value.clone()));
            (seq, entry.subscribers.clone())
        };

        trace!(?key, subscribers = subscribers.len(), "publishing change");
        for subscriber in subscribers {
            subscriber.deliver(seq, &value);
        }
        true
    }

    fn is_watching(&self, key: &K) -> bool {
        lock(&self.entries).contains_key(key)
    }

    fn subscriber_count(&self, key: &K) -> usize {
        lock(&self.entries)
            .get(key)
            .map_or(0, |e| e.subscribers.len())
    }

    fn subscription(
        self: &Arc<Self>,
        key: K,
        subscriber: Arc<Subscriber<V>>,
        on_last: impl FnOnce(&K) + Send + 'static,
    ) -> Subscription {
        let registry = Arc::downgrade(self);
        Subscription::new(move || {
            subscriber.cancel();
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if registry.remove(&key, subscriber.id, on_last) {
                debug!(?key, "last subscriber left, closing watch");
            }
        })
    }
}

// =============================================================================
// PUSH BROKER
// =============================================================================

/// Loads the current value for a newly watched key.
pub type Loader<K, V> = Arc<dyn Fn(&K) -> V + Send + Sync>;

/// Broker fed by its owner through [`PushBroker::publish`].
pub struct PushBroker<K, V> {
    registry: Arc<Registry<K, V>>,
    loader: Loader<K, V>,
}

impl<K: WatchKey, V: WatchValue> PushBroker<K, V> {
    /// Create a broker; `loader` supplies the current value when a key
    /// gains its first subscriber.
    pub fn new(loader: impl Fn(&K) -> V + Send + Sync + 'static) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            loader: Arc::new(loader),
        }
    }

    /// Push a new value for `key`. Returns whether any subscriber saw it.
    pub fn publish(&self, key: &K, value: V) -> bool {
        self.registry.publish(key, value)
    }

    /// Whether `key` has at least one subscriber.
    pub fn is_watching(&self, key: &K) -> bool {
        self.registry.is_watching(key)
    }

    /// Number of live subscribers on `key`.
    pub fn subscriber_count(&self, key: &K) -> usize {
        self.registry.subscriber_count(key)
    }
}

impl<K: WatchKey, V: WatchValue> SubscriptionBroker<K, V> for PushBroker<K, V> {
    fn subscribe(&self, key: K, on_change: Callback<V>) -> Subscription {
        let loader = self.loader.clone();
        let load_key = key.clone();
        let added = self
            .registry
            .add(key.clone(), on_change, move || Some(loader(&load_key)), |_| {});

        if added.first {
            debug!(?key, "opening push watch");
        }
        if let Some((seq, value)) = &added.initial {
            added.subscriber.deliver(*seq, value);
        }
        self.registry.subscription(key, added.subscriber, |_| {})
    }
}

// =============================================================================
// POLLING BROKER
// =============================================================================

/// Something a [`PollingBroker`] can re-read.
#[async_trait]
pub trait PollSource<K, V>: Send + Sync {
    /// Read the current value for `key`.
    async fn poll(&self, key: &K) -> Result<V, StorageError>;
}

/// Broker that polls a source for each watched key.
///
/// Must be used from within a tokio runtime.
pub struct PollingBroker<K, V> {
    registry: Arc<Registry<K, V>>,
    source: Arc<dyn PollSource<K, V>>,
    interval: Duration,
    tasks: Arc<Mutex<BTreeMap<K, JoinHandle<()>>>>,
}

impl<K: WatchKey, V: WatchValue> PollingBroker<K, V> {
    /// Create a broker polling `source` every `interval`.
    pub fn new(source: Arc<dyn PollSource<K, V>>, interval: Duration) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            source,
            interval,
            tasks: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Whether a poll task is running for `key`.
    pub fn is_watching(&self, key: &K) -> bool {
        lock(&self.tasks).contains_key(key)
    }

    /// Number of live subscribers on `key`.
    pub fn subscriber_count(&self, key: &K) -> usize {
        self.registry.subscriber_count(key)
    }

    fn spawn_poller(&self, key: K) -> JoinHandle<()> {
        let registry = Arc::downgrade(&self.registry);
        let source = self.source.clone();
        let interval = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let value = match source.poll(&key).await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(?key, "poll failed: {}", e);
                        continue;
                    }
                };
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.publish(&key, value);
            }
        })
    }
}

impl<K: WatchKey, V: WatchValue> SubscriptionBroker<K, V> for PollingBroker<K, V> {
    fn subscribe(&self, key: K, on_change: Callback<V>) -> Subscription {
        // Poll tasks start and stop under the registry lock.
        let added = self.registry.add(key.clone(), on_change, || None, |key| {
            debug!(?key, interval_ms = self.interval.as_millis() as u64, "starting poller");
            let handle = self.spawn_poller(key.clone());
            if let Some(stale) = lock(&self.tasks).insert(key.clone(), handle) {
                stale.abort();
            }
        });

        if let Some((seq, value)) = &added.initial {
            added.subscriber.deliver(*seq, value);
        }

        let tasks = self.tasks.clone();
        self.registry.subscription(key, added.subscriber, move |key| {
            if let Some(handle) = lock(&tasks).remove(key) {
                handle.abort();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, Callback<u32>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Arc::new(move |v: &u32| lock(&sink).push(*v)))
    }

    #[test]
    fn test_push_delivers_current_then_changes() {
        let broker = PushBroker::new(|_: &&str| 7u32);
        let (seen, cb) = recorder();

        let sub = broker.subscribe("game", cb);
        assert_eq!(*lock(&seen), vec![7]);

        assert!(broker.publish(&"game", 8));
        // Unchanged value is not redelivered.
        assert!(!broker.publish(&"game", 8));
        assert!(broker.publish(&"game", 9));
        assert_eq!(*lock(&seen), vec![7, 8, 9]);

        sub.off();
    }

    #[test]
    fn test_off_is_idempotent_and_immediate() {
        let broker = PushBroker::new(|_: &u8| 0u32);
        let (seen, cb) = recorder();

        let sub = broker.subscribe(1, cb);
        sub.off();
        sub.off();
        assert!(!sub.is_active());

        broker.publish(&1, 5);
        assert_eq!(*lock(&seen), vec![0]);
    }

    #[test]
    fn test_watch_is_reference_counted() {
        let broker = PushBroker::new(|_: &u8| 0u32);
        let (_, cb1) = recorder();
        let (seen2, cb2) = recorder();

        let first = broker.subscribe(1, cb1);
        let second = broker.subscribe(1, cb2);
        assert_eq!(broker.subscriber_count(&1), 2);

        first.off();
        assert!(broker.is_watching(&1));
        broker.publish(&1, 3);
        assert_eq!(*lock(&seen2), vec![0, 3]);

        second.off();
        assert!(!broker.is_watching(&1));
        assert!(!broker.publish(&1, 4));
    }

    #[test]
    fn test_second_subscriber_gets_latest_value() {
        let broker = PushBroker::new(|_: &u8| 0u32);
        let (_, cb1) = recorder();
        let _first = broker.subscribe(1, cb1);
        broker.publish(&1, 42);

        let (seen, cb2) = recorder();
        let _second = broker.subscribe(1, cb2);
        assert_eq!(*lock(&seen), vec![42]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let broker = PushBroker::new(|_: &u8| 0u32);
        let (_, cb) = recorder();
        {
            let _sub = broker.subscribe(1, cb);
            assert!(broker.is_watching(&1));
        }
        assert!(!broker.is_watching(&1));
    }

    #[test]
    fn test_off_from_inside_callback() {
        let broker = Arc::new(PushBroker::new(|_: &u8| 0u32));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let inner_slot = slot.clone();
        let inner_calls = calls.clone();
        let cb: Callback<u32> = Arc::new(move |v: &u32| {
            inner_calls.fetch_add(1, Ordering::SeqCst);
            if *v == 1 {
                if let Some(sub) = lock(&inner_slot).as_ref() {
                    sub.off();
                }
            }
        });

        let sub = broker.subscribe(1, cb);
        *lock(&slot) = Some(sub);
        broker.publish(&1, 1);
        broker.publish(&1, 2);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!broker.is_watching(&1));
    }

    struct Counter {
        value: AtomicU64,
        polls: AtomicUsize,
    }

    #[async_trait]
    impl PollSource<u8, u64> for Counter {
        async fn poll(&self, _key: &u8) -> Result<u64, StorageError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.load(Ordering::SeqCst))
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_polling_broker_delivers_changes() {
        let source = Arc::new(Counter {
            value: AtomicU64::new(1),
            polls: AtomicUsize::new(0),
        });
        let broker = PollingBroker::new(source.clone(), Duration::from_millis(5));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = broker.subscribe(1, Arc::new(move |v: &u64| lock(&sink).push(*v)));

        wait_for(|| lock(&seen).as_slice() == [1]).await;
        source.value.store(2, Ordering::SeqCst);
        wait_for(|| lock(&seen).as_slice() == [1, 2]).await;

        assert!(broker.is_watching(&1));
        sub.off();
        assert!(!broker.is_watching(&1));

        let polls = source.polls.load(Ordering::SeqCst);
        source.value.store(3, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*lock(&seen), vec![1, 2]);
        assert!(source.polls.load(Ordering::SeqCst) <= polls + 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resubscribe_racing_last_off_keeps_poller() {
        let source = Arc::new(Counter {
            value: AtomicU64::new(1),
            polls: AtomicUsize::new(0),
        });
        let broker = Arc::new(PollingBroker::new(source, Duration::from_millis(5)));

        for _ in 0..100 {
            let first = broker.subscribe(1, Arc::new(|_: &u64| {}));
            let resubscriber = broker.clone();
            let (off, second) = tokio::join!(
                tokio::task::spawn_blocking(move || first.off()),
                tokio::task::spawn_blocking(move || resubscriber.subscribe(1, Arc::new(|_: &u64| {}))),
            );
            off.unwrap();
            let second = second.unwrap();

            assert!(broker.is_watching(&1));
            second.off();
            assert!(!broker.is_watching(&1));
        }
    }
}
