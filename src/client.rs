//! Chat client
//!
//! Holds one TCP session to the server plus a private UDP socket with a
//! single attachment to the server's UDP port. Everything received on either
//! transport is forwarded as a [`ClientEvent`]; turning user input into calls
//! and printing events is left to the front end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use crate::protocol::{Command, DEFAULT_MAX_MESSAGE_SIZE, Frame, LENGTH_PREFIX_SIZE, Message};
use crate::server::TaskPool;
use crate::server::chat_server::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT};
use crate::transport::{Address, Endpoint, MultiplexerSettings, TcpEndpoint, UdpEndpoint, UdpMultiplexer};

/// Chat client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatClientConfig {
    /// Server TCP address
    pub server_tcp: SocketAddr,
    /// Server UDP address
    pub server_udp: SocketAddr,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Local UDP socket sizing
    pub multiplexer: MultiplexerSettings,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            server_tcp: SocketAddr::from(([127, 0, 0, 1], DEFAULT_TCP_PORT)),
            server_udp: SocketAddr::from(([127, 0, 0, 1], DEFAULT_UDP_PORT)),
            connect_timeout_secs: 10,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            multiplexer: MultiplexerSettings::default(),
        }
    }
}

impl ChatClientConfig {
    /// Config for a server at the given addresses
    pub fn new(server_tcp: SocketAddr, server_udp: SocketAddr) -> Self {
        Self {
            server_tcp,
            server_udp,
            ..Self::default()
        }
    }
}

/// Events that the client can receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Text message over TCP
    Message(Message),
    /// Binary frame over UDP
    Frame(Frame),
    /// A transport stopped delivering
    Closed(String),
}

/// TCP + UDP chat client
pub struct ChatClient {
    name: String,
    tcp: Arc<TcpEndpoint>,
    udp: Arc<UdpEndpoint>,
    multiplexer: Arc<UdpMultiplexer>,
    tasks: TaskPool,
}

impl ChatClient {
    /// Connect to the server as `name`. Nothing is sent until [`join`](Self::join).
    pub async fn connect(
        config: ChatClientConfig,
        name: impl Into<String>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let name = name.into();
        info!("Connecting to chat server at {}", config.server_tcp);

        let tcp = tokio::time::timeout(
            Duration::from_secs(config.connect_timeout_secs),
            TcpEndpoint::connect(Address::from(config.server_tcp)),
        )
        .await
        .map_err(|_| ChatError::network("Connection timeout"))??;
        let tcp = Arc::new(tcp);

        // Bind UDP on the interface the server sees us on
        let local = SocketAddr::new(tcp.local_address().host, 0);
        let multiplexer = Arc::new(UdpMultiplexer::bind(local, config.multiplexer).await?);
        let udp = Arc::new(UdpEndpoint::attach(
            Arc::clone(&multiplexer),
            Address::from(config.server_udp),
        )?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let tasks = TaskPool::new();
        tasks.spawn(listen_tcp(
            Arc::clone(&tcp),
            config.max_message_size,
            event_tx.clone(),
        ));
        let frame_limit = config
            .multiplexer
            .max_datagram_size
            .saturating_sub(LENGTH_PREFIX_SIZE);
        tasks.spawn(listen_udp(Arc::clone(&udp), frame_limit, event_tx));
        let pump = Arc::clone(&multiplexer);
        tasks.spawn(async move {
            if let Err(e) = pump.pump().await {
                warn!("Client udp pump stopped: {}", e);
            }
        });

        info!("Connected as '{}' from {}", name, tcp.local_address());
        let client = Self {
            name,
            tcp,
            udp,
            multiplexer,
            tasks,
        };
        Ok((client, event_rx))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local address of the private UDP socket
    pub fn local_udp_address(&self) -> Result<Address> {
        Ok(self.multiplexer.local_address()?)
    }

    /// Register this client's name
    pub async fn join(&self) -> Result<()> {
        self.send(Command::Join, "").await
    }

    /// Announce the local UDP port so the server binds a channel for it
    pub async fn open_udp(&self) -> Result<()> {
        let port = self.local_udp_address()?.port;
        self.send(Command::PlusUdp, &port.to_string()).await
    }

    /// Send a command with this client's name as origin
    pub async fn send(&self, command: Command, text: &str) -> Result<()> {
        let message = Message::command(self.name.as_str(), command, text);
        debug!("sending {}", message);
        message.send_to(&*self.tcp).await
    }

    /// Send a binary frame to the server's UDP port
    pub async fn send_frame(&self, bytes: impl Into<Bytes>) -> Result<()> {
        Frame::new(bytes).send_to(&*self.udp).await
    }

    /// Whether the TCP session is still up
    pub fn is_connected(&self) -> bool {
        self.tcp.is_up()
    }

    /// Send `quit` if still connected, then close both transports
    pub async fn shutdown(&self) {
        if self.tcp.is_up() {
            if let Err(e) = self.send(Command::Quit, "").await {
                debug!("quit not delivered: {}", e);
            }
        }
        self.tcp.close().await;
        self.multiplexer.close();
        self.tasks.shutdown();
        info!("Disconnected from chat server");
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.multiplexer.close();
        self.tasks.shutdown();
    }
}

async fn listen_tcp(
    endpoint: Arc<TcpEndpoint>,
    limit: usize,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    loop {
        match Message::read_from(&*endpoint, limit).await {
            Ok(message) => {
                if events.send(ClientEvent::Message(message)).is_err() {
                    break;
                }
            }
            Err(e) if e.is_recoverable() => warn!("Skipping bad message: {}", e),
            Err(e) => {
                let _ = events.send(ClientEvent::Closed(format!("tcp: {}", e)));
                break;
            }
        }
    }
}

async fn listen_udp(
    endpoint: Arc<UdpEndpoint>,
    limit: usize,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    loop {
        match Frame::read_from(&*endpoint, limit).await {
            Ok(frame) => {
                if events.send(ClientEvent::Frame(frame)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = events.send(ClientEvent::Closed(format!("udp: {}", e)));
                break;
            }
        }
    }
}
