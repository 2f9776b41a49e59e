//! TCP command session
//!
//! Reads one [`Message`] per step and dispatches it by command keyword.
//! Commands name their user through the message origin.

use std::iter;
use std::sync::Arc;

use tokio::task::AbortHandle;
use tracing::{debug, info};

use super::chat_server::ServerState;
use super::handler::{Exit, Handler, Signal, drive, fan_out};
use super::udp_handler::UdpHandler;
use super::user_store::User;
use crate::error::ChatError;
use crate::protocol::{Command, Message};
use crate::transport::{Address, Endpoint, TcpEndpoint, UdpEndpoint};

type StepResult = std::result::Result<(), Signal>;

/// Session driving one TCP connection
pub struct TcpHandler {
    state: Arc<ServerState>,
    endpoint: Arc<TcpEndpoint>,
    /// Name registered by this session
    joined: Option<String>,
    udp: Option<Arc<UdpEndpoint>>,
    udp_task: Option<AbortHandle>,
}

impl TcpHandler {
    pub(crate) fn new(state: Arc<ServerState>, endpoint: Arc<TcpEndpoint>) -> Self {
        Self {
            state,
            endpoint,
            joined: None,
            udp: None,
            udp_task: None,
        }
    }

    async fn handle_join(&mut self, message: Message) -> StepResult {
        if let Some(name) = &self.joined {
            return Err(Signal::warn(format!("session already joined as {}", name)));
        }

        let user = User::new(message.origin.as_str(), Some(Arc::clone(&self.endpoint)));
        self.state.users.add(user).await?;
        info!("User '{}' joined from {}", message.origin, self.endpoint.remote_address());
        self.joined = Some(message.origin);
        Ok(())
    }

    async fn handle_plus_udp(&mut self, message: Message) -> StepResult {
        let port: u16 = message.text.trim().parse().map_err(ChatError::from)?;
        let user = self.state.users.find(&message.origin).await?;
        if user.udp().is_some() {
            return Err(Signal::warn(format!("udp channel already up: {}", user.name())));
        }

        let address = self.endpoint.remote_address().with_port(port);
        let holders = self
            .state
            .users
            .filter(|other| other.udp().is_some_and(|ep| ep.remote_address() == address))
            .await;
        if let Some(holder) = holders.first() {
            return Err(Signal::warn(format!(
                "udp address {} already bound to {}",
                address,
                holder.name()
            )));
        }

        let udp = UdpEndpoint::attach(Arc::clone(&self.state.multiplexer), address)
            .map_err(|e| Signal::fatal(format!("udp attach for {} failed: {}", address, e)))?;
        let udp = Arc::new(udp);

        // Refused if another request bound a live channel in the meantime;
        // the unused endpoint detaches when dropped
        user.bind_udp(Arc::clone(&udp))?;
        info!("Bound udp channel for '{}' at {}", user.name(), address);

        let handler = UdpHandler::new(Arc::clone(&self.state), Arc::clone(&udp));
        let task = self.state.pool.spawn(async move {
            drive(handler).await;
        });

        if let Some(previous) = self.udp_task.replace(task) {
            previous.abort();
        }
        if let Some(previous) = self.udp.replace(udp) {
            previous.close();
        }
        Ok(())
    }

    async fn handle_pm(&mut self, message: Message) -> StepResult {
        let others = self.state.users.broadcast(&message.origin).await?;
        let targets: Vec<_> = others
            .iter()
            .filter_map(|user| user.tcp().map(|ep| (user.name().to_string(), ep)))
            .collect();

        let message = &message;
        let delivery = fan_out(targets, |ep| async move { message.send_to(&*ep).await }).await;
        debug!(from = %message.origin, delivered = delivery.delivered, "pm relayed");
        delivery.into_result()
    }

    async fn handle_dm(&mut self, message: Message) -> StepResult {
        let Some((target, _)) = message.text.split_once(':') else {
            return Err(Signal::warn(format!("dm without target: '{}'", message.text)));
        };

        let user = self.state.users.find(target).await?;
        let Some(ep) = user.tcp() else {
            return Err(Signal::warn(format!("no live tcp channel for {}", target)));
        };

        let message = &message;
        let delivery = fan_out(iter::once((target.to_string(), ep)), |ep| async move {
            message.send_to(&*ep).await
        })
        .await;
        debug!(from = %message.origin, to = %target, "dm relayed");
        delivery.into_result()
    }

    async fn handle_ls(&mut self) -> StepResult {
        let names = self.state.users.names().await;
        let response = Message::from_server(Command::Ls, names.join(" "));
        response.send_to(&*self.endpoint).await?;
        Ok(())
    }

    async fn handle_quit(&mut self, message: Message) -> StepResult {
        match self.state.users.remove(&message.origin).await {
            Ok(_) => info!("User '{}' quit", message.origin),
            Err(err) => debug!(error = %err, "quit for unregistered name"),
        }
        if self.joined.as_deref() == Some(message.origin.as_str()) {
            self.joined = None;
        }
        if let Some(task) = self.udp_task.take() {
            task.abort();
        }
        Err(Signal::Stop)
    }
}

impl Handler for TcpHandler {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    fn address(&self) -> Address {
        self.endpoint.remote_address()
    }

    async fn step(&mut self) -> StepResult {
        let limit = self.state.config.max_message_size;
        let message = Message::read_from(&*self.endpoint, limit).await?;
        debug!("{}", message);

        match message.parse_command()? {
            Command::Join => self.handle_join(message).await,
            Command::PlusUdp => self.handle_plus_udp(message).await,
            Command::Pm => self.handle_pm(message).await,
            Command::Dm => self.handle_dm(message).await,
            Command::Ls => self.handle_ls().await,
            Command::Quit => self.handle_quit(message).await,
        }
    }

    async fn finish(&mut self, exit: &Exit) {
        if let Some(name) = self.joined.take() {
            let endpoint = &self.endpoint;
            let removed = self
                .state
                .users
                .remove_if(&name, |user| user.owns_tcp(endpoint))
                .await;
            if removed.is_some() {
                info!("User '{}' removed after session {}", name, exit);
            }
        }
        if let Some(task) = self.udp_task.take() {
            task.abort();
        }
        if let Some(udp) = self.udp.take() {
            udp.close();
        }
        self.endpoint.close().await;
    }
}
