//! Wire protocol shared by both transports
//!
//! This module provides:
//! - Length-prefixed framing (4-byte little-endian signed length)
//! - Text messages for TCP sessions
//! - Opaque binary frames for UDP channels
//! - Command keywords

pub mod command;
pub mod frame;
pub mod message;

// Re-export commonly used types
pub use command::{Command, SERVER_ORIGIN};
pub use frame::{Frame, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
pub use message::{DEFAULT_MAX_MESSAGE_SIZE, Message};
