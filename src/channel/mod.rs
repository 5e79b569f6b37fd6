//! Broadcast channel internals.
//!
//! One [`Channel`] exists per event type, holding the append-only log and
//! the live consumer slots. The registry wraps each channel in a
//! [`Recyclable`] so unused channels can be retired.
//!
//! ## Contents
//! - [`node`]: log nodes and the compute-at-most-once update payload
//! - [`slot`]: per-consumer wakeup protocol
//! - [`core`]: publish CAS loop and coalesced notification
//! - [`recycle`]: reference-counted lifecycle with retire sentinel

mod core;
mod node;
mod recycle;
mod slot;

pub(crate) use core::Channel;
pub(crate) use node::EventNode;
pub(crate) use recycle::Recyclable;
pub(crate) use slot::Slot;
