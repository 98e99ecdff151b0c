//! Resilient real-time WebSocket channel for the KIS OpenAPI.
//!
//! [`StreamChannel`] owns the connection state machine, the subscription
//! table and the reconnect/replay logic; inbound frames are demultiplexed
//! to per-subscription callbacks without blocking the read loop.

mod channel;
mod frames;

pub use channel::{ChannelState, StreamCallback, StreamChannel, StreamConfig};
pub use frames::{parse_frame, subscribe_frame, unsubscribe_frame};
