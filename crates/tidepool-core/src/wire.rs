//! Realtime chat wire protocol.
//!
//! Every frame is a JSON text message shaped `{"event": <kind>, "data": <payload>}`.
//! Inbound snapshots are validated before they reach client state; a frame
//! that fails decoding or validation is reported as a [`SnapshotError`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ChatMessage, Participant, RoomId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("undecodable frame: {0}")]
    Decode(String),
    #[error("{kind} payload carries an empty id")]
    EmptyId { kind: &'static str },
    #[error("roster lists participant {0} more than once")]
    DuplicateParticipant(String),
    #[error("history lists message {0} more than once")]
    DuplicateMessage(String),
}

/// Events pushed by the chat backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    Chat(ChatMessage),
    Users(Vec<Participant>),
    History(Vec<ChatMessage>),
    Delete(ChatMessage),
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Chat(_) => "chat",
            InboundEvent::Users(_) => "users",
            InboundEvent::History(_) => "history",
            InboundEvent::Delete(_) => "delete",
        }
    }

    pub fn decode(text: &str) -> Result<Self, SnapshotError> {
        let event: InboundEvent =
            serde_json::from_str(text).map_err(|err| SnapshotError::Decode(err.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Basic shape checks: non-empty ids and unique ids within snapshots.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        match self {
            InboundEvent::Chat(message) | InboundEvent::Delete(message) => {
                if message.id.is_empty() {
                    return Err(SnapshotError::EmptyId { kind: self.kind() });
                }
                Ok(())
            }
            InboundEvent::Users(roster) => {
                let mut seen = HashSet::with_capacity(roster.len());
                for participant in roster {
                    if participant.id.is_empty() {
                        return Err(SnapshotError::EmptyId { kind: "users" });
                    }
                    if !seen.insert(participant.id.as_str()) {
                        return Err(SnapshotError::DuplicateParticipant(participant.id.clone()));
                    }
                }
                Ok(())
            }
            InboundEvent::History(messages) => {
                let mut seen = HashSet::with_capacity(messages.len());
                for message in messages {
                    if message.id.is_empty() {
                        return Err(SnapshotError::EmptyId { kind: "history" });
                    }
                    if !seen.insert(message.id.as_str()) {
                        return Err(SnapshotError::DuplicateMessage(message.id.clone()));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Payload of an outbound `chat` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingChat {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    pub time: String,
    pub body: String,
}

impl From<&ChatMessage> for OutgoingChat {
    fn from(message: &ChatMessage) -> Self {
        Self {
            id: message.id.clone(),
            user_id: message.user_id.clone(),
            room_id: message.room_id,
            time: message.time.clone(),
            body: message.body.clone(),
        }
    }
}

/// Commands sent to the chat backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundCommand {
    Chat(OutgoingChat),
    Name(String),
    Delete(ChatMessage),
}

impl OutboundCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundCommand::Chat(_) => "chat",
            OutboundCommand::Name(_) => "name",
            OutboundCommand::Delete(_) => "delete",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
