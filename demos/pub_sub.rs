//! # Example: pub_sub
//!
//! Minimal publish/subscribe round trip on one event type.
//!
//! Demonstrates how to:
//! - Publish with [`FlowBus::dispatch`].
//! - Consume every event in order with [`FlowBus::subscribe_all`].
//! - Read the newest value without subscribing via [`FlowBus::value_of`].
//!
//! ## Flow
//! ```text
//! dispatch(Tick) ──► FlowBus
//!     ├─► Channel<Tick>: CAS-append + notify
//!     └─► EventStream (all mode)
//!          └─► consumer task prints each tick
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example pub_sub
//! ```

use std::time::Duration;

use flowbus::FlowBus;
use futures::StreamExt;

#[derive(Clone, Debug)]
struct Tick {
    n: u32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let bus = FlowBus::default();

    // 1. Subscribe before publishing; a stream only sees events from its
    //    first poll onward.
    let stream = bus.subscribe_all::<Tick>(false);
    let consumer = tokio::spawn(async move {
        let mut stream = stream;
        while let Some(tick) = stream.next().await {
            println!("[consumer] tick {}", tick.n);
            if tick.n == 5 {
                break;
            }
        }
    });
    tokio::task::yield_now().await;

    // 2. Publish a handful of events.
    for n in 1..=5 {
        bus.dispatch(false, Tick { n }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    consumer.await.unwrap();

    // 3. The newest value stays readable without a subscription.
    println!("[main] last tick: {:?}", bus.value_of::<Tick>());
}
