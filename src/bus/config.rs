//! # Bus configuration.
//!
//! [`BusConfig`] carries the two behavior knobs a [`FlowBus`](crate::FlowBus)
//! is constructed with. Both are fixed for the bus's lifetime.

/// Configuration for a [`FlowBus`](crate::FlowBus).
///
/// ## Field semantics
/// - `update_immediately`: force an `update` transform right after its node
///   enters the log, instead of on first read. Keeps side-effecting
///   transforms observable synchronously; the computation still runs at
///   most once either way.
/// - `auto_recycle`: retire a type's channel when its last consumer leaves
///   and it holds no sticky event. Off by default: with it off, channels
///   live until [`clear`](crate::FlowBus::clear).
#[derive(Clone, Copy, Debug)]
pub struct BusConfig {
    /// Force `update` payloads at publish time.
    ///
    /// With `false`, the transform runs on the first read of the value
    /// (a consumer delivery, `value_of`, or a later `update` reading its
    /// predecessor).
    pub update_immediately: bool,

    /// Reclaim idle channels automatically.
    ///
    /// A channel is reclaimed only when it has no live references (no
    /// consumer stream, no in-flight publish) and holds no sticky event.
    /// Reclamation is checked when a consumer stream is dropped.
    pub auto_recycle: bool,
}

impl Default for BusConfig {
    /// Default configuration:
    ///
    /// - `update_immediately = true` (synchronous update side effects)
    /// - `auto_recycle = false` (channels persist until `clear`)
    fn default() -> Self {
        Self {
            update_immediately: true,
            auto_recycle: false,
        }
    }
}
