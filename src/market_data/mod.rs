// Market data module entrypoint
pub mod adapters;  // feed transports (WebSocket)
pub mod client;    // connection state machine, no I/O
pub mod feed;      // wire format: subscribe request, inbound ticks
pub mod quote;     // Quote + snapshot exposed to the host
pub mod runner;    // tokio task driving the client
pub mod view;      // text rendering of the ticker

pub use client::{Action, ConnectionState, StreamClient, StreamConfig};
pub use quote::{FeedSnapshot, Quote};
pub use runner::{spawn, StreamHandle};
