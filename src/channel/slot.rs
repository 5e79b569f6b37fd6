//! # Consumer wakeup slots.
//!
//! A [`Slot`] is one consumer's presence in a channel: the sequence number
//! of the last log node it consumed plus the cell a notifier uses to wake it.
//!
//! ## Protocol
//! The original tri-state cell (emitting / pending / parked continuation)
//! maps onto a pending flag plus a registered waker:
//!
//! - **Notifier** ([`Slot::make_pending`]): skip if the slot already
//!   consumed the announced node (`seen >= seq`); otherwise raise `pending`
//!   and wake whatever waker is registered. Waking with no waker registered
//!   means the consumer is mid-loop and will pick the flag up itself.
//! - **Consumer** ([`Slot::take_pending`]): swap `pending` to false, learn
//!   whether a notification arrived while it was busy.
//! - **Consumer park** ([`Slot::register`] then [`Slot::take_pending`]):
//!   register the waker first, then re-check the flag. A publish that lands
//!   between the consumer's last candidate check and the registration sets
//!   the flag before the re-check, so the consumer resumes instead of
//!   parking on data it would otherwise miss.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::Waker;

use futures::task::AtomicWaker;

/// One consumer's cursor position and wakeup cell.
pub(crate) struct Slot {
    /// Sequence of the last node this consumer consumed (0 = none yet).
    seen: AtomicU64,
    /// A notification arrived while the consumer was not parked.
    pending: AtomicBool,
    /// Waker of a parked consumer, if any.
    waker: AtomicWaker,
}

impl Slot {
    pub(crate) fn new() -> Self {
        Self {
            seen: AtomicU64::new(0),
            pending: AtomicBool::new(false),
            waker: AtomicWaker::new(),
        }
    }

    /// Records that the consumer has consumed the node with `seq`.
    #[inline]
    pub(crate) fn advance(&self, seq: u64) {
        self.seen.store(seq, Ordering::Release);
    }

    /// Notifier side: announce the node with `seq` as the newest.
    pub(crate) fn make_pending(&self, seq: u64) {
        if self.seen.load(Ordering::Acquire) >= seq {
            return; // already current
        }
        self.pending.store(true, Ordering::Release);
        self.waker.wake();
    }

    /// Consumer side: consume a pending notification, if any.
    #[inline]
    pub(crate) fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Consumer side: register the waker before parking. Callers must
    /// re-check [`Slot::take_pending`] afterwards.
    #[inline]
    pub(crate) fn register(&self, waker: &Waker) {
        self.waker.register(waker);
    }
}
