//! Realtime channel to the chat backend.
//!
//! A [`Channel`] is one open connection for a (client id, room) pair. Outbound
//! commands are fire-and-forget; inbound events are delivered in arrival
//! order through a single queue read by exactly one consumer. The connection
//! is released on [`Channel::close`] or when the channel is dropped, whichever
//! comes first, and only once.

mod memory;
mod ws;

pub use memory::{memory_channel, MemoryConnector, MemoryPeer};
pub use ws::WsConnector;

use async_trait::async_trait;
use thiserror::Error;
use tidepool_core::{ClientIdentity, InboundEvent, OutboundCommand, RoomId, SnapshotError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("connection attempt timed out")]
    Timeout,
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("channel closed")]
    Closed,
}

/// Connection establishment parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub identity: ClientIdentity,
    /// `None` joins the single global room.
    pub room: Option<RoomId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Inbound(InboundEvent),
    /// A frame arrived but failed decoding or shape checks.
    Malformed(SnapshotError),
    /// The transport went away; nothing else will arrive.
    Closed { reason: Option<String> },
}

impl ChannelEvent {
    pub(crate) fn from_frame(text: &str) -> Self {
        match InboundEvent::decode(text) {
            Ok(event) => ChannelEvent::Inbound(event),
            Err(err) => ChannelEvent::Malformed(err),
        }
    }
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, params: &ConnectParams) -> Result<Channel, ChannelError>;
}

pub struct Channel {
    outbound: mpsc::UnboundedSender<OutboundCommand>,
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Channel {
    pub(crate) fn new(
        outbound: mpsc::UnboundedSender<OutboundCommand>,
        inbound: mpsc::UnboundedReceiver<ChannelEvent>,
        shutdown: oneshot::Sender<()>,
        worker: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            shutdown: Some(shutdown),
            worker,
        }
    }

    pub fn send(&self, command: OutboundCommand) -> Result<(), ChannelError> {
        self.outbound.send(command).map_err(|_| ChannelError::Closed)
    }

    /// Next inbound event; `None` once the transport side is gone.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.inbound.recv().await
    }

    /// Releases the connection and waits for the transport task to finish.
    pub async fn close(mut self) {
        self.signal_shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    fn signal_shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}
