//! Client-side synchronization for Tidepool.
//!
//! - [`identity`]: stable per-installation client id
//! - [`remote`]: request/response access to the resource API
//! - [`channel`]: realtime connection to the chat backend
//! - [`chat`]: chat engine reconciling local sends with server snapshots
//! - [`tasks`]: optimistic task list over a remote or local store

pub mod channel;
pub mod chat;
pub mod config;
pub mod identity;
pub mod remote;
pub mod tasks;

pub use channel::{Channel, ChannelConnector, ChannelError, ChannelEvent, ConnectParams, WsConnector};
pub use chat::{ChatError, ChatHandle, ChatPhase, ChatSnapshot, ChatState};
pub use config::TidepoolConfig;
pub use identity::{
    FileIdentityStore, IdentityError, IdentityResolver, IdentitySource, IdentityStore,
    MemoryIdentityStore, ResolvedIdentity,
};
pub use remote::{RemoteClient, RemoteError, RemoteRequest, Resource, Verb};
pub use tasks::{
    InMemoryTaskStore, JsonFileTaskStore, LoadStatus, TaskEngine, TaskError, TaskOp,
    TaskSnapshot, TaskStore,
};
