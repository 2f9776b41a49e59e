//! Server orchestrator
//!
//! Owns the TCP listener, the physical UDP socket with its multiplexer, the
//! user registry, and the task pool every session runs in.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use super::handler::drive;
use super::task_pool::TaskPool;
use super::tcp_handler::TcpHandler;
use super::user_store::UserStore;
use crate::error::{ChatError, Result};
use crate::protocol::{DEFAULT_MAX_MESSAGE_SIZE, LENGTH_PREFIX_SIZE};
use crate::transport::{Address, MultiplexerSettings, TcpEndpoint, UdpMultiplexer};

/// Default TCP command port
pub const DEFAULT_TCP_PORT: u16 = 15681;

/// Default UDP relay port
pub const DEFAULT_UDP_PORT: u16 = 15682;

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address
    pub tcp_addr: SocketAddr,
    /// UDP bind address
    pub udp_addr: SocketAddr,
    /// Maximum TCP message payload in bytes
    pub max_message_size: usize,
    /// Datagram size and per-peer queue depth
    pub multiplexer: MultiplexerSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_TCP_PORT)),
            udp_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_UDP_PORT)),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            multiplexer: MultiplexerSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ChatError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Configuration on ephemeral loopback ports
    pub fn loopback() -> Self {
        Self {
            tcp_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            udp_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Self::default()
        }
    }

    /// Largest frame payload that fits in one datagram
    pub fn frame_limit(&self) -> usize {
        self.multiplexer
            .max_datagram_size
            .saturating_sub(LENGTH_PREFIX_SIZE)
    }
}

/// State shared by the orchestrator and every session
#[derive(Debug)]
pub(crate) struct ServerState {
    pub(crate) config: ServerConfig,
    pub(crate) users: UserStore,
    pub(crate) multiplexer: Arc<UdpMultiplexer>,
    pub(crate) pool: TaskPool,
}

/// TCP/UDP chat server
pub struct ChatServer {
    state: Arc<ServerState>,
    listener: Mutex<Option<TcpListener>>,
    tcp_address: Address,
    udp_address: Address,
}

impl ChatServer {
    /// Bind both sockets. Nothing runs until `start_tcp` / `start_udp`.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.tcp_addr).await.map_err(|e| {
            ChatError::network(format!("cannot bind tcp {}: {}", config.tcp_addr, e))
        })?;
        let multiplexer = UdpMultiplexer::bind(config.udp_addr, config.multiplexer)
            .await
            .map_err(|e| {
                ChatError::network(format!("cannot bind udp {}: {}", config.udp_addr, e))
            })?;

        let tcp_address = Address::from(listener.local_addr()?);
        let udp_address = multiplexer.local_address()?;
        info!("Chat server bound: tcp {}, udp {}", tcp_address, udp_address);

        let state = ServerState {
            config,
            users: UserStore::new(),
            multiplexer: Arc::new(multiplexer),
            pool: TaskPool::new(),
        };

        Ok(Self {
            state: Arc::new(state),
            listener: Mutex::new(Some(listener)),
            tcp_address,
            udp_address,
        })
    }

    /// Start the accept loop. Each connection gets its own session task.
    pub fn start_tcp(&self) -> Result<AbortHandle> {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ChatError::internal("tcp accept loop already started"))?;

        let state = Arc::clone(&self.state);
        Ok(self.state.pool.spawn(accept_loop(state, listener)))
    }

    /// Start pumping the shared UDP socket
    pub fn start_udp(&self) -> AbortHandle {
        let multiplexer = Arc::clone(&self.state.multiplexer);
        self.state.pool.spawn(async move {
            info!("Udp pump running on {:?}", multiplexer.local_address().ok());
            if let Err(e) = multiplexer.pump().await {
                error!("Udp pump stopped: {}", e);
            }
        })
    }

    /// Stop everything. In-flight sessions are aborted, not drained.
    pub async fn quit(&self) {
        info!("Chat server shutting down");
        self.state.multiplexer.close();
        self.state.pool.shutdown();

        for user in self.state.users.drain().await {
            if let Some(tcp) = user.tcp() {
                tcp.close().await;
            }
        }
    }

    pub fn users(&self) -> &UserStore {
        &self.state.users
    }

    pub fn multiplexer(&self) -> &Arc<UdpMultiplexer> {
        &self.state.multiplexer
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    pub fn local_tcp_address(&self) -> Address {
        self.tcp_address
    }

    pub fn local_udp_address(&self) -> Address {
        self.udp_address
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        self.state.multiplexer.close();
        self.state.pool.shutdown();
    }
}

async fn accept_loop(state: Arc<ServerState>, listener: TcpListener) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let endpoint = match TcpEndpoint::new(stream) {
            Ok(endpoint) => Arc::new(endpoint),
            Err(e) => {
                warn!("Dropping connection from {}: {}", peer, e);
                continue;
            }
        };

        info!("New connection from {}", peer);
        let handler = TcpHandler::new(Arc::clone(&state), endpoint);
        state.pool.spawn(async move {
            drive(handler).await;
        });
    }
}
