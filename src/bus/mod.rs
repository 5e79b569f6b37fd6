//! Bus registry and public surface.
//!
//! [`FlowBus`] maps each event type to its broadcast channel, creating
//! channels lazily and retiring them when configured to. Consumers get a
//! [`EventStream`], publishers get a [`DispatchHandle`].
//!
//! ## Contents
//! - [`registry`]: type-keyed channel map, dispatch/update/subscribe/clear
//! - [`stream`]: the two consumption loops as a `futures::Stream`
//! - [`context`]: completion handles for dispatched publishes
//! - [`config`]: bus construction knobs

mod config;
mod context;
mod registry;
mod stream;

pub use config::BusConfig;
pub use context::DispatchHandle;
pub use registry::{BusValue, FlowBus};
pub use stream::EventStream;
