//! Real-time chat synchronization.
//!
//! [`ChatState`] is the pure reducer over local intents and server snapshots;
//! [`ChatHandle`] runs it against a live [`Channel`](crate::channel::Channel).

mod engine;
mod state;

pub use engine::ChatHandle;
pub use state::{Applied, ChatPhase, ChatSnapshot, ChatState};

use thiserror::Error;

use crate::channel::ChannelError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message body is empty")]
    EmptyMessage,
    #[error("display name is empty")]
    EmptyName,
    #[error("connection lost; chat view is stale")]
    Stale,
    #[error("chat engine is not active")]
    Closed,
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
