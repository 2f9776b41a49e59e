//! Chat server: registry, sessions and orchestration
//!
//! ## Sessions
//!
//! - **TCP session**: one per accepted connection, reads text commands
//!   (`join`, `+udp`, `pm`, `dm`, `ls`, `quit`)
//! - **UDP session**: one per bound peer channel, relays binary frames to
//!   every other bound peer
//!
//! The physical UDP socket is pumped by its own task; sessions only ever
//! block on their own endpoint.

pub mod chat_server;
pub mod handler;
pub mod task_pool;
pub mod tcp_handler;
pub mod udp_handler;
pub mod user_store;

pub use chat_server::{ChatServer, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, ServerConfig};
pub use handler::{Delivery, Exit, Handler, Signal, drive, fan_out};
pub use task_pool::TaskPool;
pub use tcp_handler::TcpHandler;
pub use udp_handler::UdpHandler;
pub use user_store::{User, UserStore, validate_name};
