//! Error handling for the chat core

use std::fmt;

/// Result with [`ChatError`]
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Transport-level I/O failure
    Network(String),
    /// Framing error, the byte stream can no longer be trusted
    Protocol(String),
    /// A correctly framed message with unusable content
    InvalidMessage(String),
    /// Name does not match the allowed pattern
    InvalidName(String),
    /// Name is already registered
    NameTaken(String),
    /// User not found
    UserNotFound(String),
    /// A live UDP channel is already bound to the user
    AlreadyBound(String),
    /// Configuration error
    Config(String),
    /// Server internal error
    Internal(String),
}

impl ChatError {
    /// Stable numeric code, 1000 + variant index
    pub fn code(&self) -> u32 {
        match self {
            ChatError::Network(_) => 1000,
            ChatError::Protocol(_) => 1001,
            ChatError::InvalidMessage(_) => 1002,
            ChatError::InvalidName(_) => 1003,
            ChatError::NameTaken(_) => 1004,
            ChatError::UserNotFound(_) => 1005,
            ChatError::AlreadyBound(_) => 1006,
            ChatError::Config(_) => 1007,
            ChatError::Internal(_) => 1008,
        }
    }

    /// The detail text without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            ChatError::Network(msg)
            | ChatError::Protocol(msg)
            | ChatError::InvalidMessage(msg)
            | ChatError::InvalidName(msg)
            | ChatError::NameTaken(msg)
            | ChatError::UserNotFound(msg)
            | ChatError::AlreadyBound(msg)
            | ChatError::Config(msg)
            | ChatError::Internal(msg) => msg,
        }
    }

    /// Whether a session can keep going after this error.
    ///
    /// Registry misses and malformed content only spoil the current request;
    /// everything else means the connection is unusable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChatError::InvalidMessage(_)
                | ChatError::InvalidName(_)
                | ChatError::NameTaken(_)
                | ChatError::UserNotFound(_)
                | ChatError::AlreadyBound(_)
        )
    }

    // Constructors, one per variant

    pub fn network<T: Into<String>>(msg: T) -> Self {
        ChatError::Network(msg.into())
    }

    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        ChatError::Protocol(msg.into())
    }

    pub fn invalid_message<T: Into<String>>(msg: T) -> Self {
        ChatError::InvalidMessage(msg.into())
    }

    pub fn invalid_name<T: Into<String>>(msg: T) -> Self {
        ChatError::InvalidName(msg.into())
    }

    pub fn name_taken<T: Into<String>>(msg: T) -> Self {
        ChatError::NameTaken(msg.into())
    }

    pub fn user_not_found<T: Into<String>>(msg: T) -> Self {
        ChatError::UserNotFound(msg.into())
    }

    pub fn already_bound<T: Into<String>>(msg: T) -> Self {
        ChatError::AlreadyBound(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }

    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ChatError::Internal(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Network(msg) => write!(f, "Transport failure: {}", msg),
            ChatError::Protocol(msg) => write!(f, "Framing lost: {}", msg),
            ChatError::InvalidMessage(msg) => write!(f, "Bad request: {}", msg),
            ChatError::InvalidName(msg) => write!(f, "Invalid name: {}", msg),
            ChatError::NameTaken(msg) => write!(f, "Name already registered: {}", msg),
            ChatError::UserNotFound(msg) => write!(f, "No such user: {}", msg),
            ChatError::AlreadyBound(msg) => write!(f, "UDP channel already up: {}", msg),
            ChatError::Config(msg) => write!(f, "Bad configuration: {}", msg),
            ChatError::Internal(msg) => write!(f, "Internal failure: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Network(err.to_string())
    }
}

impl From<std::num::ParseIntError> for ChatError {
    fn from(err: std::num::ParseIntError) -> Self {
        ChatError::InvalidMessage(format!("bad number: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Config(format!("json at line {}: {}", err.line(), err))
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Internal(format!("{:#}", err))
    }
}
