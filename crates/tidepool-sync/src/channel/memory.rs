use async_trait::async_trait;
use tidepool_core::{InboundEvent, OutboundCommand};
use tokio::sync::{mpsc, oneshot};

use super::{Channel, ChannelConnector, ChannelError, ChannelEvent, ConnectParams};

/// Backend side of an in-process channel.
pub struct MemoryPeer {
    pub params: ConnectParams,
    events: mpsc::UnboundedSender<ChannelEvent>,
    commands: mpsc::UnboundedReceiver<OutboundCommand>,
    closed: oneshot::Receiver<()>,
}

impl MemoryPeer {
    /// Returns `false` once the client side is gone.
    pub fn push(&self, event: InboundEvent) -> bool {
        self.events.send(ChannelEvent::Inbound(event)).is_ok()
    }

    /// Delivers a raw text frame, decoded the same way the socket transport does.
    pub fn push_frame(&self, text: &str) -> bool {
        self.events.send(ChannelEvent::from_frame(text)).is_ok()
    }

    /// Simulates the transport dropping.
    pub fn disconnect(self, reason: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::Closed {
            reason: Some(reason.into()),
        });
    }

    pub async fn next_command(&mut self) -> Option<OutboundCommand> {
        self.commands.recv().await
    }

    pub fn try_command(&mut self) -> Option<OutboundCommand> {
        self.commands.try_recv().ok()
    }

    /// Resolves once the client closed or dropped its channel.
    pub async fn closed(&mut self) {
        let _ = (&mut self.closed).await;
    }

    pub fn is_closed(&mut self) -> bool {
        !matches!(
            self.closed.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

pub fn memory_channel(params: ConnectParams) -> (Channel, MemoryPeer) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let channel = Channel::new(outbound_tx, inbound_rx, shutdown_tx, None);
    let peer = MemoryPeer {
        params,
        events: inbound_tx,
        commands: outbound_rx,
        closed: shutdown_rx,
    };
    (channel, peer)
}

/// Connector handing the backend side of every new channel to the test.
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (Self { peers }, rx)
    }
}

#[async_trait]
impl ChannelConnector for MemoryConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Channel, ChannelError> {
        let (channel, peer) = memory_channel(params.clone());
        self.peers
            .send(peer)
            .map_err(|_| ChannelError::Connect("no backend listening".into()))?;
        Ok(channel)
    }
}
