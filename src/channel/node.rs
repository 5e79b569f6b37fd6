//! # Event log nodes.
//!
//! [`EventNode`] is one entry in a channel's append-only log: a singly
//! linked chain where `next` points toward newer nodes and is written at
//! most once, right after the node's successor wins the head CAS. Nodes are
//! immutable apart from that one-shot link, which is what makes concurrent
//! traversal safe without locks.
//!
//! [`LazyValue`] is the publish-safe compute-at-most-once cell behind
//! `update`: the transform closure is shared between CAS-retry candidates,
//! and only the node that actually entered the log can ever run it, so a
//! side-effecting transform never applies twice.
//!
//! Strong references only ever point forward through the log. An unforced
//! lazy cell reads its previous value through a [`Source`], never through
//! the predecessor node itself: holding the node would close a cycle with
//! the predecessor's `next` link and keep dropped history alive forever.
//! Chains of unforced cells are resolved and dropped iteratively, so an
//! arbitrarily long run of deferred updates neither leaks nor overflows
//! the stack.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

/// Transform applied by `update`: receives the previous value (if any) and
/// produces the next one.
pub(crate) type Transform<T> = Box<dyn FnOnce(Option<&T>) -> T + Send>;

/// A transform shared between the candidate nodes of one `update` call.
///
/// Every CAS retry builds a fresh candidate node, but all candidates point
/// at the same cell. Losing candidates are discarded unreachable, so the
/// closure can only ever be taken through the winner.
pub(crate) type SharedTransform<T> = Arc<Mutex<Option<Transform<T>>>>;

pub(crate) fn shared_transform<T, F>(f: F) -> SharedTransform<T>
where
    F: FnOnce(Option<&T>) -> T + Send + 'static,
{
    Arc::new(Mutex::new(Some(Box::new(f) as Transform<T>)))
}

/// Value carried by a node.
pub(crate) enum Payload<T> {
    /// Origin sentinel: the placeholder head a fresh channel starts with.
    /// Never delivered to consumers.
    Empty,
    /// Value stored at publish time (`emit`).
    Eager(T),
    /// Value computed on first read (`update`). The cell is shared with the
    /// successor's [`Source`] so the predecessor node itself can be freed
    /// while the update is still unforced.
    Lazy(Arc<LazyValue<T>>),
}

/// Where an unforced update reads its previous value from.
///
/// Deliberately not the predecessor [`EventNode`]: the node's `next` link
/// already points at the lazy node, and a strong backward edge would make
/// the pair an `Arc` cycle.
enum Source<T> {
    /// Predecessor was the origin sentinel.
    Empty,
    /// Snapshot of the predecessor's eager value.
    Value(T),
    /// The predecessor's own lazy cell, shared.
    Cell(Arc<LazyValue<T>>),
}

/// One entry in the append-only event log.
pub(crate) struct EventNode<T> {
    /// Chain position: `predecessor.seq + 1`, origin node is 0. Derived
    /// inside the publish CAS loop, so sequence order equals CAS order.
    seq: u64,
    /// Whether new subscribers that opted in should replay this node.
    sticky: bool,
    /// Monotonic publish timestamp; consumers deliver nodes at or after
    /// their own start instant.
    at: Instant,
    payload: Payload<T>,
    /// Link to the next (newer) node, set at most once.
    next: OnceLock<Arc<EventNode<T>>>,
}

impl<T> EventNode<T> {
    /// Placeholder head for a fresh channel.
    pub(crate) fn origin() -> Self {
        Self {
            seq: 0,
            sticky: false,
            at: Instant::now(),
            payload: Payload::Empty,
            next: OnceLock::new(),
        }
    }

    pub(crate) fn eager(seq: u64, sticky: bool, value: T) -> Self {
        Self {
            seq,
            sticky,
            at: Instant::now(),
            payload: Payload::Eager(value),
            next: OnceLock::new(),
        }
    }

    /// Candidate node for an `update` publish. Captures the predecessor's
    /// value source, not the predecessor node.
    pub(crate) fn lazy(
        seq: u64,
        sticky: bool,
        prev: &EventNode<T>,
        transform: SharedTransform<T>,
    ) -> Self
    where
        T: Clone,
    {
        let source = match &prev.payload {
            Payload::Empty => Source::Empty,
            Payload::Eager(value) => Source::Value(value.clone()),
            Payload::Lazy(cell) => Source::Cell(Arc::clone(cell)),
        };
        Self {
            seq,
            sticky,
            at: Instant::now(),
            payload: Payload::Lazy(Arc::new(LazyValue::new(source, transform))),
            next: OnceLock::new(),
        }
    }

    #[inline]
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub(crate) fn sticky(&self) -> bool {
        self.sticky
    }

    /// The node's value, forcing a lazy payload. `None` only for the origin
    /// sentinel.
    pub(crate) fn value(&self) -> Option<&T> {
        match &self.payload {
            Payload::Empty => None,
            Payload::Eager(value) => Some(value),
            Payload::Lazy(cell) => Some(cell.force()),
        }
    }

    /// Whether this node should be handed to a consumer that started at
    /// `since`. The origin sentinel never is; older nodes only via sticky
    /// replay.
    pub(crate) fn deliverable(&self, since: Instant, sticky_replay: bool) -> bool {
        if matches!(self.payload, Payload::Empty) {
            return false;
        }
        self.at >= since || (sticky_replay && self.sticky)
    }

    /// The next (newer) node, if one has been linked yet.
    #[inline]
    pub(crate) fn next(&self) -> Option<&Arc<EventNode<T>>> {
        self.next.get()
    }

    /// Links the successor. Only the thread that won the head CAS calls
    /// this, and only once per node; a lost race is ignored.
    pub(crate) fn link(&self, next: Arc<EventNode<T>>) {
        let _ = self.next.set(next);
    }
}

impl<T> Drop for EventNode<T> {
    fn drop(&mut self) {
        // Unlink the forward chain iteratively: a lagging consumer can pin
        // an arbitrarily long suffix, and dropping it link-by-link through
        // recursion would overflow the stack.
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut inner) => next = inner.next.take(),
                Err(_) => break,
            }
        }
    }
}

/// Compute-at-most-once cell for `update` payloads.
///
/// Concurrent forcers serialize on the init mutex; the first one takes the
/// init, runs the transform against the source value, and publishes the
/// result through the `OnceLock`. Forcing consumes the init, so a forced
/// cell holds nothing but its value.
pub(crate) struct LazyValue<T> {
    cell: OnceLock<T>,
    init: Mutex<Option<LazyInit<T>>>,
}

struct LazyInit<T> {
    source: Source<T>,
    transform: SharedTransform<T>,
}

impl<T> LazyValue<T> {
    fn new(source: Source<T>, transform: SharedTransform<T>) -> Self {
        Self {
            cell: OnceLock::new(),
            init: Mutex::new(Some(LazyInit { source, transform })),
        }
    }

    pub(crate) fn force(&self) -> &T {
        if self.cell.get().is_none() {
            // Resolve the unforced suffix of the source chain iteratively,
            // oldest first. Recursing through it would overflow the stack
            // after a long run of deferred updates with no read in between.
            let mut chain: Vec<Arc<LazyValue<T>>> = Vec::new();
            let mut cursor = self.pending_source();
            while let Some(cell) = cursor {
                cursor = cell.pending_source();
                chain.push(cell);
            }
            while let Some(cell) = chain.pop() {
                cell.force_step();
            }
            self.force_step();
        }
        self.cell.get().expect("lazy event value was forced")
    }

    /// The cell's source cell, if both are still unmaterialized.
    fn pending_source(&self) -> Option<Arc<LazyValue<T>>> {
        if self.cell.get().is_some() {
            return None;
        }
        let init = self.init.lock().expect("lazy init mutex poisoned");
        match init.as_ref() {
            Some(LazyInit {
                source: Source::Cell(cell),
                ..
            }) if cell.cell.get().is_none() => Some(Arc::clone(cell)),
            _ => None,
        }
    }

    /// Forces this cell alone. A `Source::Cell` must already be
    /// materialized, which `force` guarantees by stepping oldest first.
    fn force_step(&self) {
        let mut init = self.init.lock().expect("lazy init mutex poisoned");
        if self.cell.get().is_none() {
            if let Some(LazyInit { source, transform }) = init.take() {
                let transform = transform
                    .lock()
                    .expect("shared transform mutex poisoned")
                    .take();
                if let Some(transform) = transform {
                    let prev = match &source {
                        Source::Empty => None,
                        Source::Value(value) => Some(value),
                        Source::Cell(cell) => cell.cell.get(),
                    };
                    let value = transform(prev);
                    let _ = self.cell.set(value);
                }
            }
        }
    }

    /// Takes the init out for dropping, surviving a poisoned mutex.
    fn detach(&mut self) -> Option<Source<T>> {
        let init = match self.init.get_mut() {
            Ok(init) => init,
            Err(poisoned) => poisoned.into_inner(),
        };
        init.take().map(|init| init.source)
    }
}

impl<T> Drop for LazyValue<T> {
    fn drop(&mut self) {
        // Unlink the source chain iteratively, same as the node chain: an
        // unforced run would otherwise recurse cell by cell.
        let mut source = self.detach();
        while let Some(Source::Cell(cell)) = source {
            source = match Arc::try_unwrap(cell) {
                Ok(mut inner) => inner.detach(),
                Err(_) => None,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_eager_value_and_links() {
        let first = Arc::new(EventNode::eager(1, false, 10u32));
        let second = Arc::new(EventNode::eager(2, false, 20u32));
        first.link(Arc::clone(&second));

        assert_eq!(first.value(), Some(&10));
        assert_eq!(first.next().map(|n| n.seq()), Some(2));
        // A second link attempt is a no-op.
        first.link(Arc::new(EventNode::eager(3, false, 30u32)));
        assert_eq!(first.next().map(|n| *n.value().unwrap()), Some(20));
    }

    #[test]
    fn test_origin_is_never_deliverable() {
        let origin = EventNode::<u32>::origin();
        assert!(origin.value().is_none());
        assert!(!origin.deliverable(Instant::now(), true));
    }

    #[test]
    fn test_lazy_transform_runs_at_most_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let prev = Arc::new(EventNode::eager(1, false, 5u64));

        let counted = Arc::clone(&calls);
        let node = Arc::new(EventNode::lazy(
            2,
            false,
            &prev,
            shared_transform(move |old: Option<&u64>| {
                counted.fetch_add(1, Ordering::SeqCst);
                old.copied().unwrap_or(0) + 1
            }),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let node = Arc::clone(&node);
            handles.push(thread::spawn(move || *node.value().unwrap()));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 6);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lazy_chain_resolves_after_predecessors_drop() {
        let base = Arc::new(EventNode::eager(1, false, 5u64));
        let mid = Arc::new(EventNode::lazy(
            2,
            false,
            &base,
            shared_transform(|p: Option<&u64>| p.copied().unwrap_or(0) + 1),
        ));
        let top = Arc::new(EventNode::lazy(
            3,
            false,
            &mid,
            shared_transform(|p: Option<&u64>| p.copied().unwrap_or(0) * 2),
        ));

        // A lazy node reads through value sources, not predecessor nodes,
        // so history can be freed before the update is ever forced.
        drop(base);
        drop(mid);
        assert_eq!(top.value(), Some(&12));
    }

    #[test]
    fn test_unforced_lazy_node_does_not_pin_predecessor() {
        let marker = Arc::new(());

        let captured = Arc::clone(&marker);
        let prev = Arc::new(EventNode::eager(1, false, 1u64));
        let node = Arc::new(EventNode::lazy(
            2,
            false,
            &prev,
            shared_transform(move |p: Option<&u64>| {
                let _keep = &captured;
                p.copied().unwrap_or(0) + 1
            }),
        ));
        prev.link(Arc::clone(&node));

        // Dropping both without forcing must free the node pair and the
        // captured closure state; there is no cycle to keep them alive.
        drop(prev);
        drop(node);
        assert_eq!(Arc::strong_count(&marker), 1, "unforced transform leaked");
    }

    #[test]
    fn test_long_chain_drops_without_overflow() {
        let head = Arc::new(EventNode::eager(1, false, 0u32));
        let mut tail = Arc::clone(&head);
        for seq in 2..50_000u64 {
            let node = Arc::new(EventNode::eager(seq, false, 0u32));
            tail.link(Arc::clone(&node));
            tail = node;
        }
        drop(tail);
        drop(head); // must not recurse through 50k links
    }
}
