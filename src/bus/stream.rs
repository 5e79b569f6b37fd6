//! # Consumer streams.
//!
//! [`EventStream`] is the consumption side of a channel: an unbounded,
//! non-restartable `futures::Stream` of transformed values. One stream owns
//! one [`Slot`]; dropping the stream is cancellation and releases the slot,
//! the channel reference, and (when auto-recycle is on) possibly the
//! channel itself.
//!
//! ## The two modes
//! - [`Mode::All`]: the cursor starts at the head observed on first poll
//!   and then follows `next` links, visiting every node exactly once —
//!   emission order, no gaps, no duplicates.
//! - [`Mode::Latest`]: the candidate is always the current head; nodes
//!   superseded before the consumer looked are skipped by design.
//!
//! Either way a node is delivered only if it was published at or after the
//! stream's start instant, or it is sticky and the stream opted into
//! replay. The start instant is captured at the first poll, so a stream
//! held unpolled does not retroactively claim events.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::Stream;

use crate::bus::registry::{BusValue, FlowBus};
use crate::channel::{Channel, EventNode, Recyclable, Slot};

/// Which consumption loop a stream runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Mode {
    All,
    Latest,
}

/// Lazy, unbounded sequence of bus values for one event type.
///
/// `T` is the published type, `R` what the subscription's transform turned
/// it into (equal for the plain `subscribe_*` constructors). Obtained from
/// [`FlowBus::subscribe_all`] and friends; never ends on its own — drop it
/// to unsubscribe.
pub struct EventStream<T: BusValue, R> {
    bus: FlowBus,
    channel: Arc<Recyclable<Channel<T>>>,
    mode: Mode,
    sticky_replay: bool,
    /// Transform + filter fused into one stage.
    stage: Box<dyn FnMut(&T) -> Option<R> + Send>,
    /// Set on first poll.
    live: Option<Live<T>>,
}

struct Live<T> {
    slot: Arc<Slot>,
    since: Instant,
    /// Last node this consumer visited; owned exclusively by the loop.
    cursor: Option<Arc<EventNode<T>>>,
}

impl<T: BusValue, R> EventStream<T, R> {
    pub(crate) fn new(
        bus: FlowBus,
        channel: Arc<Recyclable<Channel<T>>>,
        mode: Mode,
        sticky_replay: bool,
        stage: Box<dyn FnMut(&T) -> Option<R> + Send>,
    ) -> Self {
        Self {
            bus,
            channel,
            mode,
            sticky_replay,
            stage,
            live: None,
        }
    }
}

impl<T: BusValue, R> Stream for EventStream<T, R> {
    type Item = R;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<R>> {
        let this = self.get_mut();
        let channel = Arc::clone(&this.channel);
        let live = this.live.get_or_insert_with(|| Live {
            slot: channel.inner().allocate_slot(),
            since: Instant::now(),
            cursor: None,
        });

        loop {
            let candidate = match this.mode {
                Mode::All => match &live.cursor {
                    // First look establishes the starting point.
                    None => Some(channel.inner().head()),
                    Some(cursor) => cursor.next().cloned(),
                },
                Mode::Latest => {
                    let head = channel.inner().head();
                    match &live.cursor {
                        Some(cursor) if Arc::ptr_eq(cursor, &head) => None,
                        _ => Some(head),
                    }
                }
            };

            match candidate {
                Some(node) => {
                    let item = if node.deliverable(live.since, this.sticky_replay) {
                        node.value().and_then(|value| (this.stage)(value))
                    } else {
                        None
                    };
                    // Advance whether or not the node was delivered, so each
                    // node is visited exactly once.
                    live.slot.advance(node.seq());
                    live.cursor = Some(node);
                    if let Some(item) = item {
                        return Poll::Ready(Some(item));
                    }
                }
                None => {
                    if live.slot.take_pending() {
                        continue;
                    }
                    live.slot.register(cx.waker());
                    // Re-check after registering: a publish that raced in
                    // just before would otherwise be missed.
                    if live.slot.take_pending() {
                        continue;
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

impl<T: BusValue, R> Drop for EventStream<T, R> {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            self.channel.inner().free_slot(&live.slot);
        }
        self.channel.free();
        self.bus.maybe_recycle::<T>(&self.channel);
    }
}
