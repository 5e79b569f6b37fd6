//! # Example: sticky_latest
//!
//! Sticky replay plus latest-only consumption, the "current state" pattern.
//!
//! Demonstrates how to:
//! - Retain the newest state with a sticky [`FlowBus::dispatch`].
//! - Derive state from the previous value with [`FlowBus::update`].
//! - Let a late subscriber catch up via [`FlowBus::subscribe_latest`] with
//!   sticky replay, skipping intermediate values it never needed.
//!
//! ## Flow
//! ```text
//! dispatch(sticky Counter{0})
//! update(sticky, prev + 1) × 3
//!     │
//!     ▼
//! Channel<Counter> holds sticky Counter{3}
//!     │
//!     ▼
//! subscribe_latest(sticky_replay = true)   (subscribes late)
//!     └─► first item is the retained Counter{3}
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example sticky_latest
//! ```

use flowbus::FlowBus;
use futures::StreamExt;

#[derive(Clone, Debug)]
struct Counter {
    value: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let bus = FlowBus::default();

    // 1. Seed the state and evolve it; nobody is listening yet.
    bus.dispatch(true, Counter { value: 0 }).await.unwrap();
    for _ in 0..3 {
        bus.update(true, |prev: Option<&Counter>| Counter {
            value: prev.map(|c| c.value).unwrap_or(0) + 1,
        })
        .await
        .unwrap();
    }

    // 2. A late subscriber opts into sticky replay and receives the
    //    retained state as its first item.
    let mut state = bus.subscribe_latest::<Counter>(true);
    let current = state.next().await.unwrap();
    println!("[late subscriber] current state: {current:?}");
    assert_eq!(current.value, 3);
}
