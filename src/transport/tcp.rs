//! TCP-backed endpoint over one persistent connection

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::debug;

use super::address::Address;
use super::endpoint::Endpoint;

/// Initial capacity of the outgoing buffer
const OUTGOING_CAPACITY: usize = 128;

/// Endpoint wrapping one connected stream socket
#[derive(Debug)]
pub struct TcpEndpoint {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    outgoing: Mutex<BytesMut>,
    address: Address,
    local: Address,
    up: AtomicBool,
}

impl TcpEndpoint {
    /// Wrap an accepted or connected stream
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let address = Address::from(stream.peer_addr()?);
        let local = Address::from(stream.local_addr()?);
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            outgoing: Mutex::new(BytesMut::with_capacity(OUTGOING_CAPACITY)),
            address,
            local,
            up: AtomicBool::new(true),
        })
    }

    /// Open a connection to `address`
    pub async fn connect(address: Address) -> io::Result<Self> {
        let stream = TcpStream::connect(address.socket_addr()).await?;
        Self::new(stream)
    }

    /// Local side of the connection
    pub fn local_address(&self) -> Address {
        self.local
    }

    /// Mark the endpoint down and shut down the write half
    pub async fn close(&self) {
        if self.up.swap(false, Ordering::AcqRel) {
            debug!(peer = %self.address, "closing tcp endpoint");
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    fn mark_down(&self) {
        self.up.store(false, Ordering::Release);
    }
}

impl Endpoint for TcpEndpoint {
    async fn read(&self, n: usize) -> io::Result<Bytes> {
        let mut buf = BytesMut::zeroed(n);
        let mut reader = self.reader.lock().await;
        if let Err(e) = reader.read_exact(&mut buf).await {
            self.mark_down();
            return Err(e);
        }
        Ok(buf.freeze())
    }

    async fn transmit(&self, bytes: Bytes) -> io::Result<()> {
        if !self.is_up() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("tcp endpoint {} is closed", self.address),
            ));
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(&bytes).await {
            self.mark_down();
            return Err(e);
        }
        Ok(())
    }

    fn outgoing(&self) -> &Mutex<BytesMut> {
        &self.outgoing
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    fn remote_address(&self) -> Address {
        self.address
    }
}
