//! Text messages carried over TCP
//!
//! Payload is UTF-8 `"<origin> <type> <text>"`. Only the first two spaces
//! separate fields, so `text` keeps any spaces or colons it contains.

use std::fmt;

use bytes::{Bytes, BytesMut};

use super::command::{Command, SERVER_ORIGIN};
use super::frame::{LENGTH_PREFIX_SIZE, decode_prefixed, encode_prefixed, read_prefixed, write_prefixed};
use crate::error::{ChatError, Result};
use crate::transport::Endpoint;

/// Default upper bound for one message payload
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// A chat command or response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub origin: String,
    pub kind: String,
    pub text: String,
}

impl Message {
    pub fn new(origin: impl Into<String>, kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            kind: kind.into(),
            text: text.into(),
        }
    }

    /// Message from `origin` carrying a known command
    pub fn command(origin: impl Into<String>, command: Command, text: impl Into<String>) -> Self {
        Self::new(origin, command.as_str(), text)
    }

    /// Server-originated response
    pub fn from_server(command: Command, text: impl Into<String>) -> Self {
        Self::command(SERVER_ORIGIN, command, text)
    }

    /// Interpret `kind` as a command keyword
    pub fn parse_command(&self) -> Result<Command> {
        self.kind.parse()
    }

    /// The unprefixed payload text
    pub fn payload(&self) -> String {
        format!("{} {} {}", self.origin, self.kind, self.text)
    }

    /// Parse an unprefixed payload
    pub fn parse(payload: &[u8]) -> Result<Message> {
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        let text = std::str::from_utf8(&payload[..end])
            .map_err(|e| ChatError::invalid_message(format!("payload is not UTF-8: {}", e)))?;

        let mut parts = text.splitn(3, ' ');
        let origin = parts.next().unwrap_or_default();
        let kind = parts
            .next()
            .ok_or_else(|| ChatError::invalid_message(format!("missing type in '{}'", text)))?;
        let text = parts.next().unwrap_or_default();

        Ok(Message::new(origin, kind, text))
    }

    /// Encode this message with its length prefix into a buffer
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        encode_prefixed(self.payload().as_bytes(), buf)
    }

    /// Encode this message into a new Bytes
    pub fn encode_to_bytes(&self) -> Result<Bytes> {
        let payload = self.payload();
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        encode_prefixed(payload.as_bytes(), &mut buf)?;
        Ok(buf.freeze())
    }

    /// Try to decode one message from a buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode(buf: &mut BytesMut, limit: usize) -> Result<Option<Message>> {
        match decode_prefixed(buf, limit)? {
            Some(payload) => Message::parse(&payload).map(Some),
            None => Ok(None),
        }
    }

    /// Block until one message arrives on `endpoint`
    pub async fn read_from<E: Endpoint>(endpoint: &E, limit: usize) -> Result<Message> {
        let payload = read_prefixed(endpoint, limit).await?;
        Message::parse(&payload)
    }

    /// Send this message to `endpoint`
    pub async fn send_to<E: Endpoint>(&self, endpoint: &E) -> Result<()> {
        write_prefixed(endpoint, self.payload().as_bytes()).await
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.trim().is_empty() {
            write!(f, "[{}] {}: <empty>", self.kind, self.origin)
        } else {
            write!(f, "[{}] {}: '{}'", self.kind, self.origin, self.text)
        }
    }
}
