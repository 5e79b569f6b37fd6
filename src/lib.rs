//! # flowbus
//!
//! **Flowbus** is a type-keyed sticky event broadcast primitive for async Rust.
//!
//! It provides lock-free, in-process channels keyed by event type: producers
//! append to a per-type event log with a CAS loop, consumers follow the log
//! as a `futures::Stream`, either event-by-event or coalesced to the newest
//! value. Sticky events replay to late subscribers that opt in.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//!  │  producer 1  │  │  producer 2  │  │  producer N  │
//!  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!         │ dispatch/update │                 │
//!         ▼                 ▼                 ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │  FlowBus (type-keyed registry)                            │
//! │  - channels:  TypeId → Recyclable<Channel<T>>             │
//! │  - contexts:  TypeId → runtime Handle (optional routing)  │
//! └──────────────────────────┬────────────────────────────────┘
//!                            ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │  Channel<T> (one per event type)                          │
//! │  - head: CAS-appended chain of EventNode<T>               │
//! │  - slots: one Slot per consumer (seen seq + waker)        │
//! │  - refs:  Recyclable counter gating reclamation           │
//! └──────┬──────────────────────┬─────────────────────┬───────┘
//!        ▼                      ▼                     ▼
//! ┌──────────────┐      ┌──────────────┐      ┌──────────────┐
//! │ EventStream  │      │ EventStream  │      │ EventStream  │
//! │  (all mode)  │      │(latest mode) │      │  (all mode)  │
//! └──────────────┘      └──────────────┘      └──────────────┘
//! ```
//!
//! ### Publish path
//! ```text
//! dispatch(sticky, value)
//!   ├─► obtain channel (create on first use, re-create after recycle)
//!   ├─► CAS-append EventNode { seq = prev + 1, at = now, payload }
//!   ├─► notify: mark every slot pending, wake parked consumers
//!   └─► free channel reference
//!
//! update(sticky, transform)
//!   └─► same, but the payload is computed at most once from the previous
//!       value (immediately by default, or on first read)
//! ```
//!
//! ## Features
//! | Area            | Description                                                   | Key types                          |
//! |-----------------|---------------------------------------------------------------|------------------------------------|
//! | **Publish**     | Fire-and-forget publish, optionally routed to a runtime.      | [`FlowBus`], [`DispatchHandle`]    |
//! | **Consume**     | Ordered or latest-only streams with map/filter stages.        | [`EventStream`]                    |
//! | **Sticky**      | Retained events replayed once to opted-in late subscribers.   | [`FlowBus::subscribe_all`]         |
//! | **Snapshot**    | Read the most recent value without subscribing.               | [`FlowBus::value_of`]              |
//! | **Lifecycle**   | Ref-counted channels, optional reclamation when idle.         | [`BusConfig`], [`FlowBus::clear`]  |
//! | **Errors**      | Typed errors for routed publishes.                            | [`DispatchError`]                  |
//!
//! ## Example
//! ```rust
//! use flowbus::FlowBus;
//! use futures::StreamExt;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let bus = FlowBus::default();
//!
//!     let mut updates = bus.subscribe_all::<u32>(false);
//!     // A subscription starts at its first poll; prime it before publishing.
//!     assert!(futures::poll!(updates.next()).is_pending());
//!
//!     bus.dispatch(false, 1u32).await.unwrap();
//!     bus.dispatch(true, 2u32).await.unwrap();
//!     assert_eq!(updates.next().await, Some(1));
//!     assert_eq!(updates.next().await, Some(2));
//!
//!     // The second publish was sticky: late subscribers that opt in get it.
//!     let mut late = bus.subscribe_latest::<u32>(true);
//!     assert_eq!(late.next().await, Some(2));
//! }
//! ```
mod bus;
mod channel;
mod error;

// ---- Public re-exports ----

pub use bus::{BusConfig, BusValue, DispatchHandle, EventStream, FlowBus};
pub use error::DispatchError;
