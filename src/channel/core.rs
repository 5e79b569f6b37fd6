//! # Broadcast core: one per-type event channel.
//!
//! [`Channel`] owns the atomic head of the append-only log, the set of live
//! consumer slots, and the coalesced notification counter.
//!
//! ## Publish
//! `emit`/`update` run an optimistic CAS loop on `head`: read the current
//! head, build a candidate node with `seq = head.seq + 1`, try to swing
//! `head` to it. The winner back-links `head.next` for in-flight traversals;
//! a loser discards its candidate and retries against the fresh head. The
//! order of successful CASes is the global emission order.
//!
//! ## Notification
//! Publishers coalesce wakeup storms through `notify_seq`: the publisher
//! whose increment leaves zero becomes the sole notifier and walks the slot
//! set, announcing the current head. It then tries to reset the counter to
//! zero against the value it observed; if more publishes arrived during the
//! walk the reset fails and the walk repeats with the newer head. At most
//! one thread walks at a time and no publish goes unannounced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::channel::node::{shared_transform, EventNode};
use crate::channel::slot::Slot;

pub(crate) struct Channel<T> {
    /// Most recently published node. Traversal toward newer nodes goes
    /// through `EventNode::next`.
    head: ArcSwap<EventNode<T>>,
    /// Live consumer slots; copy-on-write so the notification walk iterates
    /// a stable snapshot without locking.
    slots: ArcSwap<Vec<Arc<Slot>>>,
    /// Coalesced-notification counter, zero at rest.
    notify_seq: AtomicU64,
    /// Force `update` payloads right after the CAS instead of on first read.
    update_immediately: bool,
}

impl<T: Clone> Channel<T> {
    pub(crate) fn new(update_immediately: bool) -> Self {
        Self {
            head: ArcSwap::from_pointee(EventNode::origin()),
            slots: ArcSwap::from_pointee(Vec::new()),
            notify_seq: AtomicU64::new(0),
            update_immediately,
        }
    }

    /// Appends a node carrying `value`. Lock-free; a lost CAS retries
    /// against the winner's node as predecessor, so no publish is lost.
    pub(crate) fn emit(&self, sticky: bool, value: T) {
        let node = loop {
            let last = self.head.load_full();
            let node = Arc::new(EventNode::eager(last.seq() + 1, sticky, value.clone()));
            let prev = self.head.compare_and_swap(&last, Arc::clone(&node));
            if Arc::ptr_eq(&prev, &last) {
                last.link(Arc::clone(&node));
                break node;
            }
        };
        tracing::trace!(seq = node.seq(), sticky, "emit");
        self.notify();
    }

    /// Appends a node whose value is `transform(previous)`, computed at most
    /// once. With `update_immediately` the computation runs right here, so
    /// transform side effects are observable when the call returns.
    pub(crate) fn update<F>(&self, sticky: bool, transform: F)
    where
        F: FnOnce(Option<&T>) -> T + Send + 'static,
    {
        let shared = shared_transform(transform);
        let node = loop {
            let last = self.head.load_full();
            let node = Arc::new(EventNode::lazy(
                last.seq() + 1,
                sticky,
                &last,
                Arc::clone(&shared),
            ));
            let prev = self.head.compare_and_swap(&last, Arc::clone(&node));
            if Arc::ptr_eq(&prev, &last) {
                last.link(Arc::clone(&node));
                break node;
            }
        };
        if self.update_immediately {
            node.value();
        }
        tracing::trace!(seq = node.seq(), sticky, "update");
        self.notify();
    }

    /// The current head node.
    pub(crate) fn head(&self) -> Arc<EventNode<T>> {
        self.head.load_full()
    }

    /// Snapshot of the most recent value, forcing a lazy head.
    pub(crate) fn current(&self) -> Option<T> {
        self.head.load().value().cloned()
    }

    /// Whether the channel currently holds a sticky event. Used by the
    /// recycle predicate: sticky channels are never reclaimed.
    pub(crate) fn has_sticky(&self) -> bool {
        self.head.load().sticky()
    }

    pub(crate) fn allocate_slot(&self) -> Arc<Slot> {
        let slot = Arc::new(Slot::new());
        self.slots.rcu(|slots| {
            let mut next = Vec::clone(slots);
            next.push(Arc::clone(&slot));
            next
        });
        slot
    }

    pub(crate) fn free_slot(&self, slot: &Arc<Slot>) {
        self.slots.rcu(|slots| {
            slots
                .iter()
                .filter(|s| !Arc::ptr_eq(s, slot))
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    fn notify(&self) {
        if self.notify_seq.fetch_add(1, Ordering::AcqRel) != 0 {
            // A walk is in flight; it will observe our bump and go again.
            return;
        }
        loop {
            let changes = self.notify_seq.load(Ordering::Acquire);
            let head = self.head.load();
            for slot in self.slots.load().iter() {
                slot.make_pending(head.seq());
            }
            if self
                .notify_seq
                .compare_exchange(changes, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
    }
}
