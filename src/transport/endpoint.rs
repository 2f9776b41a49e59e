//! The send/receive capability set shared by every transport
//!
//! An endpoint reads exact-size chunks from its peer and writes through a
//! buffered outbox. The outbox is an exclusive guard: while a writer holds it
//! no other task can interleave bytes into the same outgoing buffer, so a
//! `reset -> put... -> send` sequence always leaves as one unit.

use std::future::Future;
use std::io;

use bytes::{Bytes, BytesMut};
use tokio::sync::{Mutex, MutexGuard};

use super::address::Address;

/// A buffered, resettable channel over one transport session
pub trait Endpoint: Send + Sync {
    /// Block until exactly `n` bytes are available, failing on stream end
    fn read(&self, n: usize) -> impl Future<Output = io::Result<Bytes>> + Send;

    /// Hand one flushed buffer to the transport.
    ///
    /// Called by [`Outbox::send`]; writers should go through [`Endpoint::outbox`].
    fn transmit(&self, bytes: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// The outgoing buffer guarded by the outbox lock
    fn outgoing(&self) -> &Mutex<BytesMut>;

    /// Liveness of the underlying transport
    fn is_up(&self) -> bool;

    /// Address of the remote peer
    fn remote_address(&self) -> Address;

    /// Take exclusive ownership of the outgoing buffer
    fn outbox(&self) -> impl Future<Output = Outbox<'_, Self>> + Send
    where
        Self: Sized,
    {
        async move {
            Outbox {
                endpoint: self,
                buffer: self.outgoing().lock().await,
            }
        }
    }
}

/// Exclusive writer over an endpoint's outgoing buffer
pub struct Outbox<'a, E: Endpoint> {
    endpoint: &'a E,
    buffer: MutexGuard<'a, BytesMut>,
}

impl<E: Endpoint> Outbox<'_, E> {
    /// Append bytes to the outgoing buffer
    pub fn put(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Discard anything buffered so far
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of buffered bytes
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Flush the buffer to the transport in one write and clear it
    pub async fn send(&mut self) -> io::Result<()> {
        let bytes = self.buffer.split().freeze();
        self.endpoint.transmit(bytes).await
    }
}
