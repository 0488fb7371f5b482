//! Realtime channel: wire frames, event names, and the transport.

pub mod events;
pub mod transport;

pub use transport::{ConnectionState, RealtimeTransport, Subscription};
