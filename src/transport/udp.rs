//! UDP multiplexing: many logical peer channels over one physical socket
//!
//! The multiplexer owns the socket and a routing table from peer address to
//! a bounded inbound queue. A single pump task calls [`UdpMultiplexer::read`]
//! in a loop; every datagram is copied into the queue registered for its
//! sender, or dropped when no queue is registered. Handler tasks attach and
//! detach [`UdpEndpoint`]s concurrently with the pump.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace, warn};

use super::address::Address;
use super::endpoint::Endpoint;

/// Default receive buffer, also the largest datagram accepted for sending
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 4096;

/// Default number of undelivered datagrams queued per peer
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Identifies one attachment; a re-attached address gets a new id
pub type RouteId = u64;

/// Multiplexer sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplexerSettings {
    /// Receive buffer size in bytes
    pub max_datagram_size: usize,
    /// Inbound queue capacity in datagrams
    pub queue_capacity: usize,
}

impl Default for MultiplexerSettings {
    fn default() -> Self {
        Self {
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// What the pump did with one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Queued for the attached endpoint
    Routed,
    /// No endpoint is attached for the sender
    Unrouted,
    /// The sender's queue is full, datagram dropped
    QueueFull,
}

struct Route {
    id: RouteId,
    tx: mpsc::Sender<Bytes>,
}

/// Receiving side of one attachment
#[derive(Debug)]
pub struct Attachment {
    pub id: RouteId,
    pub inbound: mpsc::Receiver<Bytes>,
}

/// One physical UDP socket demultiplexed by sender address
pub struct UdpMultiplexer {
    socket: UdpSocket,
    routes: RwLock<HashMap<Address, Route>>,
    settings: MultiplexerSettings,
    next_route_id: AtomicU64,
    closed: AtomicBool,
}

impl UdpMultiplexer {
    /// Bind a new socket
    pub async fn bind<A: ToSocketAddrs>(addr: A, settings: MultiplexerSettings) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(socket, settings))
    }

    /// Multiplex an already bound socket
    pub fn from_socket(socket: UdpSocket, settings: MultiplexerSettings) -> Self {
        Self {
            socket,
            routes: RwLock::new(HashMap::new()),
            settings,
            next_route_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> MultiplexerSettings {
        self.settings
    }

    pub fn local_address(&self) -> io::Result<Address> {
        Ok(Address::from(self.socket.local_addr()?))
    }

    /// Register an inbound queue for `address`.
    ///
    /// An address already in the table is displaced: the previous queue is
    /// closed and its endpoint reports itself detached.
    pub fn attach(&self, address: Address) -> io::Result<Attachment> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "udp multiplexer is closed",
            ));
        }

        let id = self.next_route_id.fetch_add(1, Ordering::Relaxed);
        let (tx, inbound) = mpsc::channel(self.settings.queue_capacity.max(1));

        let displaced = self
            .routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, Route { id, tx });

        match displaced {
            Some(old) => debug!(peer = %address, old_route = old.id, route = id, "displaced udp route"),
            None => debug!(peer = %address, route = id, "attached udp route"),
        }

        Ok(Attachment { id, inbound })
    }

    /// Remove the route for `address` if it is still owned by `id`
    pub fn detach(&self, address: Address, id: RouteId) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        match routes.get(&address) {
            Some(route) if route.id == id => {
                routes.remove(&address);
                debug!(peer = %address, route = id, "detached udp route");
                true
            }
            _ => false,
        }
    }

    pub fn is_attached(&self, address: Address, id: RouteId) -> bool {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .is_some_and(|route| route.id == id)
    }

    /// Number of attached peers
    pub fn route_count(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Receive one datagram and hand it to the sender's queue.
    ///
    /// Must only be driven by one task at a time.
    pub async fn read(&self) -> io::Result<(Address, Dispatch)> {
        let mut buf = BytesMut::zeroed(self.settings.max_datagram_size);
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);

        let address = Address::from(from);
        let dispatch = self.route(address, buf.freeze());
        Ok((address, dispatch))
    }

    fn route(&self, address: Address, chunk: Bytes) -> Dispatch {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let Some(route) = routes.get(&address) else {
            return Dispatch::Unrouted;
        };

        match route.tx.try_send(chunk) {
            Ok(()) => Dispatch::Routed,
            Err(mpsc::error::TrySendError::Full(_)) => Dispatch::QueueFull,
            Err(mpsc::error::TrySendError::Closed(_)) => Dispatch::Unrouted,
        }
    }

    /// Run [`read`](Self::read) until the socket fails or the multiplexer closes
    pub async fn pump(&self) -> io::Result<()> {
        while !self.is_closed() {
            match self.read().await {
                Ok((peer, Dispatch::Routed)) => trace!(%peer, "routed datagram"),
                Ok((peer, Dispatch::Unrouted)) => {
                    debug!(%peer, "dropping datagram from unattached peer")
                }
                Ok((peer, Dispatch::QueueFull)) => {
                    warn!(%peer, "inbound queue full, dropping datagram")
                }
                Err(e) => {
                    warn!(error = %e, "udp receive failed, closing multiplexer");
                    self.close();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Send one datagram to any peer, attached or not
    pub async fn send(&self, bytes: &[u8], address: Address) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "udp multiplexer is closed",
            ));
        }
        if bytes.len() > self.settings.max_datagram_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "datagram too large: {} bytes (max: {})",
                    bytes.len(),
                    self.settings.max_datagram_size
                ),
            ));
        }

        let sent = self.socket.send_to(bytes, address.socket_addr()).await?;
        if sent != bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram write: {} of {} bytes", sent, bytes.len()),
            ));
        }
        Ok(())
    }

    /// Stop routing and close every inbound queue
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
            debug!(routes = routes.len(), "closing udp multiplexer");
            routes.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct Inbound {
    rx: mpsc::Receiver<Bytes>,
    pending: BytesMut,
}

/// Logical channel to one UDP peer, attached to a shared multiplexer
pub struct UdpEndpoint {
    multiplexer: Arc<UdpMultiplexer>,
    address: Address,
    route: RouteId,
    inbound: Mutex<Inbound>,
    outgoing: Mutex<BytesMut>,
}

impl UdpEndpoint {
    /// Attach a new channel for `address`
    pub fn attach(multiplexer: Arc<UdpMultiplexer>, address: Address) -> io::Result<Self> {
        let Attachment { id, inbound } = multiplexer.attach(address)?;
        let capacity = multiplexer.settings().max_datagram_size;

        Ok(Self {
            multiplexer,
            address,
            route: id,
            inbound: Mutex::new(Inbound {
                rx: inbound,
                pending: BytesMut::new(),
            }),
            outgoing: Mutex::new(BytesMut::with_capacity(capacity)),
        })
    }

    /// Detach from the multiplexer; pending reads fail once the queue drains
    pub fn close(&self) {
        self.multiplexer.detach(self.address, self.route);
    }
}

impl Endpoint for UdpEndpoint {
    async fn read(&self, n: usize) -> io::Result<Bytes> {
        let mut inbound = self.inbound.lock().await;
        while inbound.pending.len() < n {
            match inbound.rx.recv().await {
                Some(chunk) => inbound.pending.extend_from_slice(&chunk),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("udp channel {} detached", self.address),
                    ));
                }
            }
        }
        Ok(inbound.pending.split_to(n).freeze())
    }

    async fn transmit(&self, bytes: Bytes) -> io::Result<()> {
        self.multiplexer.send(&bytes, self.address).await
    }

    fn outgoing(&self) -> &Mutex<BytesMut> {
        &self.outgoing
    }

    fn is_up(&self) -> bool {
        !self.multiplexer.is_closed() && self.multiplexer.is_attached(self.address, self.route)
    }

    fn remote_address(&self) -> Address {
        self.address
    }
}

impl Drop for UdpEndpoint {
    fn drop(&mut self) {
        self.multiplexer.detach(self.address, self.route);
    }
}

impl std::fmt::Debug for UdpMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpMultiplexer")
            .field("socket", &self.socket)
            .field("routes", &self.route_count())
            .field("settings", &self.settings)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl std::fmt::Debug for UdpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpEndpoint")
            .field("address", &self.address)
            .field("route", &self.route)
            .finish()
    }
}
