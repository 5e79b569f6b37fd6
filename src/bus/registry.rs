//! # Type-keyed bus registry.
//!
//! [`FlowBus`] owns one broadcast channel per event type, created on first
//! use and retired when idle (if `auto_recycle` is on). The registry is the
//! whole public entry point: publish with [`FlowBus::dispatch`] /
//! [`FlowBus::update`], read with [`FlowBus::value_of`], consume with the
//! `subscribe_*` constructors.
//!
//! ## Architecture
//! ```text
//! producer ── dispatch/update ──► FlowBus
//!                                   ├─ contexts: TypeId → runtime Handle
//!                                   │    (publish runs inline, or spawned
//!                                   │     on the configured context)
//!                                   └─ channels: TypeId → Recyclable<Channel<T>>
//!                                        │
//!                                        ▼
//!                                  Channel<T>: CAS append + notify
//!                                        │
//! consumer ◄── EventStream ◄── subscribe_all / subscribe_latest
//! ```
//!
//! ## Locking
//! The channel map takes its read lock on the obtain fast path and its
//! write lock only for creation (double-checked) and reclamation. Publish
//! and consume themselves never touch a lock; they go through the channel's
//! atomics.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::bus::config::BusConfig;
use crate::bus::context::DispatchHandle;
use crate::bus::stream::{EventStream, Mode};
use crate::channel::{Channel, Recyclable};

/// Marker for values that can travel on the bus.
///
/// Blanket-implemented; the bounds are what the log needs: `Clone` for
/// delivery and snapshot reads, `Send + Sync + 'static` because nodes are
/// shared across producer and consumer tasks and keyed by [`TypeId`].
pub trait BusValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> BusValue for T {}

type AnyChannel = Arc<dyn Any + Send + Sync>;

/// Type-keyed event broadcast registry.
///
/// Cheap to clone (clones share one registry). There is deliberately no
/// process-wide instance: construct one, pass it where it is needed, and
/// call [`FlowBus::clear`] to tear it down between tests.
#[derive(Clone, Default)]
pub struct FlowBus {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    config: BusConfig,
    channels: RwLock<HashMap<TypeId, AnyChannel>>,
    contexts: RwLock<HashMap<TypeId, tokio::runtime::Handle>>,
}

impl FlowBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                channels: RwLock::new(HashMap::new()),
                contexts: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Publishes `value` on the `T` channel.
    ///
    /// Runs inline on the caller unless a dispatch context is configured
    /// for `T`, in which case the publish is spawned there. The returned
    /// handle resolves when the publish has happened; awaiting it is
    /// optional.
    pub fn dispatch<T: BusValue>(&self, sticky: bool, value: T) -> DispatchHandle {
        match self.context_of::<T>() {
            Some(context) => {
                let bus = self.clone();
                DispatchHandle::spawned(context.spawn(async move { bus.emit_now(sticky, value) }))
            }
            None => {
                self.emit_now(sticky, value);
                DispatchHandle::ready()
            }
        }
    }

    /// Publishes a value derived from the previous one.
    ///
    /// `transform` receives the current value (`None` before the first
    /// publish) and runs at most once, even if several readers race to
    /// force the result. With `update_immediately` (the default) it has
    /// already run when the returned handle resolves.
    pub fn update<T, F>(&self, sticky: bool, transform: F) -> DispatchHandle
    where
        T: BusValue,
        F: FnOnce(Option<&T>) -> T + Send + 'static,
    {
        match self.context_of::<T>() {
            Some(context) => {
                let bus = self.clone();
                DispatchHandle::spawned(
                    context.spawn(async move { bus.update_now(sticky, transform) }),
                )
            }
            None => {
                self.update_now(sticky, transform);
                DispatchHandle::ready()
            }
        }
    }

    /// Snapshot of the most recent `T` value, without subscribing.
    ///
    /// Forces a pending lazy update. `None` if nothing was ever published
    /// on `T` (or its channel was already reclaimed).
    pub fn value_of<T: BusValue>(&self) -> Option<T> {
        self.lookup::<T>()?.inner().current()
    }

    /// Ordered subscription: every `T` event from the subscription's start,
    /// in emission order, delivered as clones.
    ///
    /// With `sticky_replay`, a sticky event published before the start is
    /// replayed once as the first item.
    pub fn subscribe_all<T: BusValue>(&self, sticky_replay: bool) -> EventStream<T, T> {
        self.subscribe_all_with(sticky_replay, |v: &T| v.clone(), |_| true)
    }

    /// Ordered subscription with a transform and filter applied per event.
    pub fn subscribe_all_with<T, R, M, F>(
        &self,
        sticky_replay: bool,
        map: M,
        filter: F,
    ) -> EventStream<T, R>
    where
        T: BusValue,
        M: FnMut(&T) -> R + Send + 'static,
        F: FnMut(&R) -> bool + Send + 'static,
    {
        self.subscribe(Mode::All, sticky_replay, map, filter)
    }

    /// Coalesced subscription: only the newest `T` value at each
    /// observation, delivered as clones. Intermediate values published
    /// while the consumer is busy are skipped by design.
    pub fn subscribe_latest<T: BusValue>(&self, sticky_replay: bool) -> EventStream<T, T> {
        self.subscribe_latest_with(sticky_replay, |v: &T| v.clone(), |_| true)
    }

    /// Coalesced subscription with a transform and filter applied per event.
    pub fn subscribe_latest_with<T, R, M, F>(
        &self,
        sticky_replay: bool,
        map: M,
        filter: F,
    ) -> EventStream<T, R>
    where
        T: BusValue,
        M: FnMut(&T) -> R + Send + 'static,
        F: FnMut(&R) -> bool + Send + 'static,
    {
        self.subscribe(Mode::Latest, sticky_replay, map, filter)
    }

    /// Routes future `T` publishes to `context`, or back inline with `None`.
    pub fn configure_dispatch_context<T: BusValue>(
        &self,
        context: Option<tokio::runtime::Handle>,
    ) {
        let mut contexts = self
            .shared
            .contexts
            .write()
            .expect("dispatch context map lock poisoned");
        match context {
            Some(handle) => {
                contexts.insert(TypeId::of::<T>(), handle);
            }
            None => {
                contexts.remove(&TypeId::of::<T>());
            }
        }
    }

    /// Drops every channel and dispatch context mapping.
    ///
    /// The teardown half of the test contract. Live streams keep their
    /// channel alive through their own reference; they are detached from
    /// the registry, not broken.
    pub fn clear(&self) {
        tracing::debug!("clearing channels and dispatch contexts");
        self.shared
            .channels
            .write()
            .expect("channel map lock poisoned")
            .clear();
        self.shared
            .contexts
            .write()
            .expect("dispatch context map lock poisoned")
            .clear();
    }

    fn subscribe<T, R, M, F>(
        &self,
        mode: Mode,
        sticky_replay: bool,
        mut map: M,
        mut filter: F,
    ) -> EventStream<T, R>
    where
        T: BusValue,
        M: FnMut(&T) -> R + Send + 'static,
        F: FnMut(&R) -> bool + Send + 'static,
    {
        let stage = Box::new(move |value: &T| {
            let item = map(value);
            if filter(&item) {
                Some(item)
            } else {
                None
            }
        });
        EventStream::new(self.clone(), self.obtain_channel::<T>(), mode, sticky_replay, stage)
    }

    fn emit_now<T: BusValue>(&self, sticky: bool, value: T) {
        let chan = self.obtain_channel::<T>();
        chan.inner().emit(sticky, value);
        chan.free();
        // No recycle check on the publish path: a publish must not create a
        // channel and immediately reap it.
    }

    fn update_now<T, F>(&self, sticky: bool, transform: F)
    where
        T: BusValue,
        F: FnOnce(Option<&T>) -> T + Send + 'static,
    {
        let chan = self.obtain_channel::<T>();
        chan.inner().update(sticky, transform);
        chan.free();
    }

    /// Resolves (creating if absent or retired) the `T` channel and takes a
    /// reference on it. Fast path is a read lock + `try_obtain`; creation
    /// re-checks under the write lock.
    fn obtain_channel<T: BusValue>(&self) -> Arc<Recyclable<Channel<T>>> {
        if let Some(chan) = self.lookup::<T>() {
            if chan.try_obtain() {
                return chan;
            }
        }

        let mut channels = self
            .shared
            .channels
            .write()
            .expect("channel map lock poisoned");
        let key = TypeId::of::<T>();
        if let Some(entry) = channels.get(&key) {
            if let Ok(chan) = Arc::clone(entry).downcast::<Recyclable<Channel<T>>>() {
                if chan.try_obtain() {
                    return chan;
                }
            }
        }

        let chan = Arc::new(Recyclable::new(Channel::new(
            self.shared.config.update_immediately,
        )));
        chan.obtain();
        channels.insert(key, Arc::clone(&chan) as AnyChannel);
        tracing::debug!(event_type = std::any::type_name::<T>(), "channel created");
        chan
    }

    fn lookup<T: BusValue>(&self) -> Option<Arc<Recyclable<Channel<T>>>> {
        let channels = self
            .shared
            .channels
            .read()
            .expect("channel map lock poisoned");
        let entry = channels.get(&TypeId::of::<T>())?;
        Arc::clone(entry).downcast::<Recyclable<Channel<T>>>().ok()
    }

    fn context_of<T: BusValue>(&self) -> Option<tokio::runtime::Handle> {
        self.shared
            .contexts
            .read()
            .expect("dispatch context map lock poisoned")
            .get(&TypeId::of::<T>())
            .cloned()
    }

    /// Recycle hook run when a consumer leaves. Retires the `T` channel if
    /// auto-recycle is on, nothing references it, and it holds no sticky
    /// event; the mapping entry goes with it.
    pub(crate) fn maybe_recycle<T: BusValue>(&self, chan: &Recyclable<Channel<T>>) {
        if !self.shared.config.auto_recycle {
            return;
        }
        // Pre-check outside the lock; the CAS below is the real gate.
        if !chan.is_recyclable() || chan.inner().has_sticky() {
            return;
        }

        let mut channels = self
            .shared
            .channels
            .write()
            .expect("channel map lock poisoned");
        let key = TypeId::of::<T>();
        let Some(entry) = channels.get(&key) else {
            return;
        };
        let Ok(current) = Arc::clone(entry).downcast::<Recyclable<Channel<T>>>() else {
            return;
        };
        if current.try_recycle(|c| !c.has_sticky()) {
            channels.remove(&key);
            tracing::debug!(event_type = std::any::type_name::<T>(), "channel recycled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);
    const QUIET: Duration = Duration::from_millis(50);

    fn channel_count(bus: &FlowBus) -> usize {
        bus.shared.channels.read().unwrap().len()
    }

    #[tokio::test]
    async fn test_dispatch_then_value_of() {
        let bus = FlowBus::default();
        assert_eq!(bus.value_of::<u32>(), None);
        bus.dispatch(false, 7u32).await.unwrap();
        assert_eq!(bus.value_of::<u32>(), Some(7));
    }

    #[tokio::test]
    async fn test_update_reads_previous_and_runs_once() {
        let bus = FlowBus::default();
        let calls = Arc::new(AtomicUsize::new(0));

        bus.dispatch(false, 10u64).await.unwrap();
        let counted = Arc::clone(&calls);
        bus.update(false, move |prev: Option<&u64>| {
            counted.fetch_add(1, Ordering::SeqCst);
            prev.copied().unwrap_or(0) + 1
        })
        .await
        .unwrap();

        assert_eq!(bus.value_of::<u64>(), Some(11));
        assert_eq!(bus.value_of::<u64>(), Some(11));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deferred_update_state_released_on_bus_drop() {
        let marker = Arc::new(());

        let bus = FlowBus::new(BusConfig {
            update_immediately: false,
            ..BusConfig::default()
        });
        bus.dispatch(false, 1u64).await.unwrap();
        let captured = Arc::clone(&marker);
        bus.update(false, move |prev: Option<&u64>| {
            let _keep = &captured;
            prev.copied().unwrap_or(0) + 1
        })
        .await
        .unwrap();

        // Nothing ever read the update; dropping the bus must still free
        // the pending transform and everything it captured.
        drop(bus);
        assert_eq!(Arc::strong_count(&marker), 1, "deferred transform leaked");
    }

    #[tokio::test]
    async fn test_subscribe_all_receives_in_order() {
        let bus = FlowBus::default();
        let stream = bus.subscribe_all::<u32>(false);

        let consumer = tokio::spawn(async move {
            let mut stream = stream;
            let mut got = Vec::new();
            while got.len() < 3 {
                got.push(stream.next().await.unwrap());
            }
            got
        });
        // Let the consumer park before publishing.
        tokio::task::yield_now().await;

        bus.dispatch(false, 1u32).await.unwrap();
        bus.dispatch(false, 2u32).await.unwrap();
        bus.dispatch(false, 3u32).await.unwrap();

        let got = timeout(RECV_TIMEOUT, consumer).await.unwrap().unwrap();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_parked_consumer_is_woken() {
        let bus = FlowBus::default();
        let mut stream = bus.subscribe_all::<u32>(false);

        let consumer = tokio::spawn(async move { stream.next().await });
        // Give the consumer time to reach the suspension point.
        tokio::time::sleep(QUIET).await;

        bus.dispatch(false, 42u32).await.unwrap();
        let got = timeout(RECV_TIMEOUT, consumer).await.unwrap().unwrap();
        assert_eq!(got, Some(42));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dispatch_total_order() {
        const PRODUCERS: u32 = 3;
        const PER_PRODUCER: u32 = 100;

        let bus = FlowBus::default();
        let mut stream = bus.subscribe_all::<u32>(false);
        // Prime the subscription so its start point precedes the producers.
        assert!(futures::poll!(stream.next()).is_pending());

        let mut producers = Vec::new();
        for p in 0..PRODUCERS {
            let bus = bus.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..PER_PRODUCER {
                    bus.dispatch(false, p * PER_PRODUCER + i).await.unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        let mut got = Vec::new();
        for _ in 0..(PRODUCERS * PER_PRODUCER) {
            let item = timeout(RECV_TIMEOUT, stream.next()).await.unwrap().unwrap();
            got.push(item);
        }

        assert_eq!(got.len() as u32, PRODUCERS * PER_PRODUCER);
        for p in 0..PRODUCERS {
            let mine: Vec<u32> = got
                .iter()
                .copied()
                .filter(|v| v / PER_PRODUCER == p)
                .collect();
            let mut sorted = mine.clone();
            sorted.sort_unstable();
            assert_eq!(mine, sorted, "producer {p} observed out of order");
            assert_eq!(mine.len() as u32, PER_PRODUCER);
        }
    }

    #[tokio::test]
    async fn test_sticky_replay_scenario() {
        let bus = FlowBus::default();

        // Sticky 1 published before anyone subscribes.
        bus.dispatch(true, 1u32).await.unwrap();

        let mut stream = bus.subscribe_latest::<u32>(true);
        assert_eq!(stream.next().await, Some(1), "sticky replayed first");

        // 2 and 3 land while the consumer is not polling; latest wins.
        bus.dispatch(false, 2u32).await.unwrap();
        bus.dispatch(false, 3u32).await.unwrap();
        assert_eq!(stream.next().await, Some(3), "intermediate value skipped");

        // A late subscriber with sticky replay but no sticky event present
        // receives nothing until the next publish.
        let mut late = bus.subscribe_latest::<u32>(true);
        assert!(
            timeout(QUIET, late.next()).await.is_err(),
            "no sticky event to replay"
        );
        bus.dispatch(false, 4u32).await.unwrap();
        assert_eq!(timeout(RECV_TIMEOUT, late.next()).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_sticky_not_replayed_without_opt_in() {
        let bus = FlowBus::default();
        bus.dispatch(true, 9u32).await.unwrap();

        let mut stream = bus.subscribe_all::<u32>(false);
        assert!(timeout(QUIET, stream.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_auto_recycle_on_last_consumer_leaving() {
        let bus = FlowBus::new(BusConfig {
            auto_recycle: true,
            ..BusConfig::default()
        });

        let mut stream = bus.subscribe_all::<u32>(false);
        assert!(futures::poll!(stream.next()).is_pending());
        assert_eq!(channel_count(&bus), 1);

        drop(stream);
        assert_eq!(channel_count(&bus), 0, "idle channel reclaimed");
    }

    #[tokio::test]
    async fn test_sticky_channel_is_never_recycled() {
        let bus = FlowBus::new(BusConfig {
            auto_recycle: true,
            ..BusConfig::default()
        });

        bus.dispatch(true, 5u32).await.unwrap();
        let stream = bus.subscribe_all::<u32>(true);
        drop(stream);

        assert_eq!(channel_count(&bus), 1, "sticky event pins the channel");
        assert_eq!(bus.value_of::<u32>(), Some(5));
    }

    #[tokio::test]
    async fn test_live_consumer_blocks_recycle() {
        let bus = FlowBus::new(BusConfig {
            auto_recycle: true,
            ..BusConfig::default()
        });

        let first = bus.subscribe_all::<u32>(false);
        let second = bus.subscribe_all::<u32>(false);
        drop(first);
        assert_eq!(channel_count(&bus), 1, "second consumer still live");
        drop(second);
        assert_eq!(channel_count(&bus), 0);
    }

    #[tokio::test]
    async fn test_dispatch_context_runs_publish() {
        let bus = FlowBus::default();
        bus.configure_dispatch_context::<u32>(Some(tokio::runtime::Handle::current()));

        bus.dispatch(false, 11u32).await.unwrap();
        assert_eq!(bus.value_of::<u32>(), Some(11));

        // Back to inline: the handle is complete before awaiting.
        bus.configure_dispatch_context::<u32>(None);
        let handle = bus.dispatch(false, 12u32);
        assert!(handle.is_finished());
        assert_eq!(bus.value_of::<u32>(), Some(12));
    }

    #[tokio::test]
    async fn test_channels_are_type_keyed() {
        let bus = FlowBus::default();
        bus.dispatch(true, 1u32).await.unwrap();
        bus.dispatch(true, "hello").await.unwrap();

        assert_eq!(bus.value_of::<u32>(), Some(1));
        assert_eq!(bus.value_of::<&'static str>(), Some("hello"));
        assert_eq!(channel_count(&bus), 2);
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let bus = FlowBus::default();
        bus.dispatch(true, 1u32).await.unwrap();
        bus.configure_dispatch_context::<u32>(Some(tokio::runtime::Handle::current()));

        bus.clear();
        assert_eq!(bus.value_of::<u32>(), None);
        assert_eq!(channel_count(&bus), 0);
    }
}
