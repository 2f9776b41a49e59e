//! UDP relay session for one bound peer channel

use std::sync::Arc;

use tracing::trace;

use super::chat_server::ServerState;
use super::handler::{Exit, Handler, Signal, fan_out};
use crate::protocol::Frame;
use crate::transport::{Address, Endpoint, UdpEndpoint};

/// Relays every frame from one peer to all other bound peers
pub struct UdpHandler {
    state: Arc<ServerState>,
    endpoint: Arc<UdpEndpoint>,
}

impl UdpHandler {
    pub(crate) fn new(state: Arc<ServerState>, endpoint: Arc<UdpEndpoint>) -> Self {
        Self { state, endpoint }
    }
}

impl Handler for UdpHandler {
    fn kind(&self) -> &'static str {
        "udp"
    }

    fn address(&self) -> Address {
        self.endpoint.remote_address()
    }

    async fn step(&mut self) -> std::result::Result<(), Signal> {
        let frame = Frame::read_from(&*self.endpoint, self.state.config.frame_limit()).await?;
        trace!("{}", frame);

        let own = &self.endpoint;
        let others = self.state.users.filter(|user| !user.owns_udp(own)).await;
        let targets: Vec<_> = others
            .iter()
            .filter_map(|user| user.udp().map(|ep| (user.name().to_string(), ep)))
            .filter(|(_, ep)| ep.remote_address() != own.remote_address())
            .collect();

        let frame = &frame;
        let delivery = fan_out(targets, |ep| async move { frame.send_to(&*ep).await }).await;
        trace!(len = frame.len(), delivered = delivery.delivered, "frame relayed");
        delivery.into_result()
    }

    async fn finish(&mut self, _exit: &Exit) {
        self.endpoint.close();
    }
}
