//! # Reference-counted channel lifecycle.
//!
//! [`Recyclable`] wraps a channel with an atomic reference count so the
//! registry can create channels lazily and retire them safely under
//! concurrent access. Retirement is permanent: a retired instance is marked
//! with a sentinel count, and late `try_obtain` callers observe it and build
//! a fresh instance instead of resurrecting the old one.

use std::sync::atomic::{AtomicI64, Ordering};

/// Idle reference count: no in-flight obtain.
const NONE: i64 = 0;

/// Sentinel marking a permanently retired instance. Far enough below zero
/// that stray increments from racing `try_obtain` calls never reach zero.
const RECYCLED: i64 = i64::MIN;

pub(crate) struct Recyclable<C> {
    inner: C,
    refs: AtomicI64,
}

impl<C> Recyclable<C> {
    pub(crate) fn new(inner: C) -> Self {
        Self {
            inner,
            refs: AtomicI64::new(NONE),
        }
    }

    #[inline]
    pub(crate) fn inner(&self) -> &C {
        &self.inner
    }

    /// Takes a reference unconditionally. For registry-internal use right
    /// after construction, where retirement is impossible.
    pub(crate) fn obtain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Tries to take a reference. Fails if the instance was already retired;
    /// the speculative increment is left in place, which is harmless because
    /// the sentinel keeps the count far below zero.
    pub(crate) fn try_obtain(&self) -> bool {
        self.refs.fetch_add(1, Ordering::AcqRel) >= NONE
    }

    /// Releases a reference taken by `obtain`/`try_obtain`.
    pub(crate) fn free(&self) {
        self.refs.fetch_sub(1, Ordering::AcqRel);
    }

    /// Attempts to retire the instance. The single CAS from idle to the
    /// sentinel is the exclusivity gate: it fails if any reference is live
    /// or another retire won. On success `predicate` gets the final word
    /// (typically "holds no sticky event"); a false verdict rolls the count
    /// back to idle and the instance stays live.
    pub(crate) fn try_recycle(&self, predicate: impl FnOnce(&C) -> bool) -> bool {
        if self
            .refs
            .compare_exchange(NONE, RECYCLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if predicate(&self.inner) {
            true
        } else {
            self.refs.store(NONE, Ordering::Release);
            false
        }
    }

    /// Fast pre-check used to skip the registry lock when a recycle attempt
    /// cannot possibly succeed.
    #[inline]
    pub(crate) fn is_recyclable(&self) -> bool {
        self.refs.load(Ordering::Acquire) == NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obtain_free_roundtrip() {
        let r = Recyclable::new(());
        assert!(r.is_recyclable());
        assert!(r.try_obtain());
        assert!(!r.is_recyclable());
        r.free();
        assert!(r.is_recyclable());
    }

    #[test]
    fn test_recycle_blocked_by_live_reference() {
        let r = Recyclable::new(());
        r.obtain();
        assert!(!r.try_recycle(|_| true));
        r.free();
        assert!(r.try_recycle(|_| true));
    }

    #[test]
    fn test_predicate_veto_rolls_back() {
        let r = Recyclable::new(());
        assert!(!r.try_recycle(|_| false));
        // Still live after the veto.
        assert!(r.try_obtain());
        r.free();
    }

    #[test]
    fn test_retired_instance_rejects_obtain() {
        let r = Recyclable::new(());
        assert!(r.try_recycle(|_| true));
        assert!(!r.try_obtain());
        assert!(!r.try_obtain(), "stray increments must not resurrect");
        assert!(!r.try_recycle(|_| true), "retirement is permanent");
    }
}
