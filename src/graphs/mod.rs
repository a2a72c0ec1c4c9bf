//! Derived graphs: state computed from, but not directly reported by,
//! any single entity's descriptors — stream connections, media-clock chains,
//! and channel-level audio mappings.

pub mod channel_connections;
pub mod clock_chain;
pub mod stream_connections;

pub use channel_connections::ChannelConnectionsGraph;
pub use clock_chain::{compute_chain, ClockChainNode, ClockChainTermination, MediaClockChain};
pub use stream_connections::StreamConnectionsGraph;
