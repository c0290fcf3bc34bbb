//! Tidepool core: the shapes shared by every Tidepool client.
//!
//! - the data model (identities, chat messages, participants, tasks, rooms)
//! - the realtime wire protocol spoken with the chat backend
//! - snapshot validation for roster/history payloads

pub mod model;
pub mod wire;

pub use model::{
    ChatMessage, ClientIdentity, IdentityParseError, NewTask, Participant, Room, RoomId, Task,
    TaskPatch, UserProfile,
};
pub use wire::{InboundEvent, OutboundCommand, OutgoingChat, SnapshotError};
