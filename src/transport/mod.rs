//! Transport layer: peer addresses and the endpoint abstraction
//!
//! This module provides:
//! - The [`Endpoint`] capability set shared by both transports
//! - A TCP-backed endpoint for persistent command sessions
//! - A UDP multiplexer that splits one socket into per-peer channels

pub mod address;
pub mod endpoint;
pub mod tcp;
pub mod udp;

// Re-export commonly used types
pub use address::Address;
pub use endpoint::{Endpoint, Outbox};
pub use tcp::TcpEndpoint;
pub use udp::{Dispatch, MultiplexerSettings, RouteId, UdpEndpoint, UdpMultiplexer};
