use tidepool_core::{ChatMessage, ClientIdentity, OutboundCommand, RoomId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::{ChatPhase, ChatSnapshot, ChatState};
use super::ChatError;
use crate::channel::{Channel, ChannelConnector, ChannelEvent, ConnectParams};

const COMMAND_QUEUE_DEPTH: usize = 64;

enum ChatCommand {
    Send {
        body: String,
        reply: oneshot::Sender<Result<ChatMessage, ChatError>>,
    },
    Delete {
        message: ChatMessage,
        reply: oneshot::Sender<Result<bool, ChatError>>,
    },
    Rename {
        name: String,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running chat engine.
///
/// The engine owns its channel and state inside one dispatch task; local
/// intents and channel events are applied one at a time in arrival order.
/// Dropping the handle stops the engine and closes the channel.
pub struct ChatHandle {
    commands: mpsc::Sender<ChatCommand>,
    snapshots: watch::Receiver<ChatSnapshot>,
    task: JoinHandle<()>,
}

impl ChatHandle {
    /// Opens the channel for `identity` (and `room`, if any) and starts dispatching.
    pub async fn activate<C>(
        connector: &C,
        identity: ClientIdentity,
        room: Option<RoomId>,
    ) -> Result<Self, ChatError>
    where
        C: ChannelConnector + ?Sized,
    {
        let mut state = ChatState::new(identity.clone(), room);
        state.begin_connecting();

        let params = ConnectParams { identity, room };
        let channel = connector.connect(&params).await?;
        info!(target = "tidepool::chat", user_id = %params.identity, room = ?room, "chat engine active");

        let (snapshot_tx, snapshots) = watch::channel(state.snapshot());
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let task = tokio::spawn(dispatch(state, channel, command_rx, snapshot_tx));

        Ok(Self {
            commands,
            snapshots,
            task,
        })
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshots.clone()
    }

    pub async fn send_message(&self, body: impl Into<String>) -> Result<ChatMessage, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.call(ChatCommand::Send {
            body: body.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::Closed)?
    }

    /// Returns whether a local copy was removed; the delete is emitted either way.
    pub async fn delete_message(&self, message: &ChatMessage) -> Result<bool, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.call(ChatCommand::Delete {
            message: message.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::Closed)?
    }

    pub async fn rename_self(&self, name: impl Into<String>) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.call(ChatCommand::Rename {
            name: name.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ChatError::Closed)?
    }

    /// Tears the engine down: channel closed, local state discarded.
    pub async fn deactivate(self) {
        let (reply, rx) = oneshot::channel();
        if self.call(ChatCommand::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
        let _ = self.task.await;
    }

    async fn call(&self, command: ChatCommand) -> Result<(), ChatError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ChatError::Closed)
    }
}

fn current_time() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}

async fn dispatch(
    mut state: ChatState,
    mut channel: Channel,
    mut commands: mpsc::Receiver<ChatCommand>,
    snapshots: watch::Sender<ChatSnapshot>,
) {
    let mut shutdown_reply = None;

    loop {
        let live = state.phase() != ChatPhase::Stale;
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(ChatCommand::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(command) => handle_command(&mut state, &channel, command),
                    None => {
                        debug!(target = "tidepool::chat", "chat handle dropped");
                        break;
                    }
                }
            }
            event = channel.next_event(), if live => {
                match event {
                    Some(ChannelEvent::Inbound(event)) => {
                        let kind = event.kind();
                        match state.apply(event) {
                            Ok(applied) => {
                                debug!(target = "tidepool::chat", kind, outcome = ?applied, "applied event");
                            }
                            Err(err) => {
                                warn!(target = "tidepool::chat", kind, error = %err, "ignoring malformed snapshot");
                            }
                        }
                    }
                    Some(ChannelEvent::Malformed(err)) => {
                        warn!(target = "tidepool::chat", error = %err, "ignoring malformed frame");
                    }
                    Some(ChannelEvent::Closed { reason }) => {
                        warn!(target = "tidepool::chat", reason = ?reason, "channel disconnected; chat view is stale");
                        state.mark_stale();
                    }
                    None => {
                        warn!(target = "tidepool::chat", "channel disconnected; chat view is stale");
                        state.mark_stale();
                    }
                }
            }
        }
        snapshots.send_replace(state.snapshot());
    }

    channel.close().await;
    state.disconnect();
    snapshots.send_replace(state.snapshot());
    info!(target = "tidepool::chat", "chat engine stopped");
    if let Some(reply) = shutdown_reply {
        let _ = reply.send(());
    }
}

fn handle_command(state: &mut ChatState, channel: &Channel, command: ChatCommand) {
    match command {
        ChatCommand::Send { body, reply } => {
            let result = state.compose(&body, current_time()).and_then(|(message, outbound)| {
                emit(channel, outbound)?;
                Ok(message)
            });
            let _ = reply.send(result);
        }
        ChatCommand::Delete { message, reply } => {
            let result = state.remove(&message).and_then(|(removed, outbound)| {
                emit(channel, outbound)?;
                Ok(removed)
            });
            let _ = reply.send(result);
        }
        ChatCommand::Rename { name, reply } => {
            let result = state
                .rename(&name)
                .and_then(|outbound| emit(channel, outbound));
            let _ = reply.send(result);
        }
        ChatCommand::Shutdown { reply } => {
            let _ = reply.send(());
        }
    }
}

fn emit(channel: &Channel, command: OutboundCommand) -> Result<(), ChatError> {
    let kind = command.kind();
    channel.send(command)?;
    debug!(target = "tidepool::chat", kind, "emitted command");
    Ok(())
}
