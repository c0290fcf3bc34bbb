use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tidepool_core::OutboundCommand;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::{Channel, ChannelConnector, ChannelError, ChannelEvent, ConnectParams};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket transport: JSON text frames, one socket per channel.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: &str) -> Result<Self, ChannelError> {
        Ok(Self {
            url: Url::parse(url)?,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn endpoint(&self, params: &ConnectParams) -> Url {
        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("userId", params.identity.as_str());
            if let Some(room) = params.room {
                query.append_pair("roomId", &room.to_string());
            }
        }
        url
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, params: &ConnectParams) -> Result<Channel, ChannelError> {
        let url = self.endpoint(params);
        debug!(target = "tidepool::channel", url = %url, "connecting");

        let (stream, _) = match timeout(self.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(target = "tidepool::channel", url = %url, error = %err, "connect failed");
                return Err(ChannelError::Connect(err.to_string()));
            }
            Err(_) => {
                warn!(target = "tidepool::channel", url = %url, "connect timed out");
                return Err(ChannelError::Timeout);
            }
        };
        info!(target = "tidepool::channel", user_id = %params.identity, room = ?params.room, "channel open");

        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundCommand>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<ChannelEvent>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        let _ = write.send(Message::Close(None)).await;
                        debug!(target = "tidepool::channel", "channel closed by client");
                        break;
                    }
                    command = outbound_rx.recv() => {
                        let Some(command) = command else {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        };
                        let text = match command.encode() {
                            Ok(text) => text,
                            Err(err) => {
                                warn!(target = "tidepool::channel", error = %err, kind = command.kind(), "failed to encode command");
                                continue;
                            }
                        };
                        if let Err(err) = write.send(Message::Text(text.into())).await {
                            warn!(target = "tidepool::channel", error = %err, "send failed");
                            let _ = inbound_tx.send(ChannelEvent::Closed { reason: Some(err.to_string()) });
                            break;
                        }
                    }
                    frame = read.next() => {
                        let event = match frame {
                            Some(Ok(Message::Text(text))) => ChannelEvent::from_frame(text.as_str()),
                            Some(Ok(Message::Close(frame))) => ChannelEvent::Closed {
                                reason: frame.map(|f| f.reason.as_str().to_string()),
                            },
                            Some(Ok(_)) => continue,
                            Some(Err(err)) => ChannelEvent::Closed { reason: Some(err.to_string()) },
                            None => ChannelEvent::Closed { reason: None },
                        };
                        let closed = matches!(event, ChannelEvent::Closed { .. });
                        if inbound_tx.send(event).is_err() || closed {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Channel::new(outbound_tx, inbound_rx, shutdown_tx, Some(worker)))
    }
}
