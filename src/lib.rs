//! Real-time chat over TCP commands and UDP frame relay
//!
//! Clients hold a persistent TCP session for text commands and share binary
//! frames over UDP. On the server all UDP peers share one physical socket,
//! demultiplexed by sender address into independent per-peer channels.
//!
//! Both transports carry the same framing: a 4-byte little-endian length
//! prefix followed by the payload.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{ChatClient, ChatClientConfig, ClientEvent};
pub use error::{ChatError, Result};
pub use protocol::{Command, Frame, Message};
pub use server::{ChatServer, ServerConfig};
pub use transport::{Address, Endpoint, TcpEndpoint, UdpEndpoint, UdpMultiplexer};
