use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use tidepool_sync::TidepoolConfig;

use crate::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "tidepool",
    about = "Chat rooms and a personal task list from the terminal",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "URL",
        help = "Base URL of the resource API (overrides TIDEPOOL__API_URL)"
    )]
    pub api_url: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "URL",
        help = "WebSocket URL of the chat backend (overrides TIDEPOOL__REALTIME_URL)"
    )]
    pub realtime_url: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Directory for the identity file and local tasks (overrides TIDEPOOL__DATA_DIR)"
    )]
    pub data_dir: Option<PathBuf>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Applies command-line overrides on top of the environment config.
    pub fn apply(&self, mut config: TidepoolConfig) -> TidepoolConfig {
        if let Some(url) = &self.api_url {
            config.api_url = Some(url.clone());
        }
        if let Some(url) = &self.realtime_url {
            config.realtime_url = Some(url.clone());
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.display().to_string());
        }
        config
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "TIDEPOOL_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "TIDEPOOL_LOG_PATH",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self, fallback_file: Option<&str>) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self
                .file
                .clone()
                .or_else(|| fallback_file.map(PathBuf::from)),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print this installation's client id (and remote profile, if reachable)
    Whoami,
    /// Change the display name shown to other participants
    Rename {
        name: String,
    },
    /// Browse or create chat rooms
    #[command(subcommand)]
    Rooms(RoomsCommand),
    /// Manage the personal task list
    #[command(subcommand)]
    Tasks(TasksCommand),
    /// Join a chat room; type to send, `/quit` to leave
    Chat(ChatArgs),
}

#[derive(Subcommand, Debug)]
pub enum RoomsCommand {
    /// List existing rooms
    List,
    /// Create a new room
    New,
}

#[derive(Subcommand, Debug)]
pub enum TasksCommand {
    /// Show open and completed tasks
    List,
    /// Add a task
    Add {
        #[arg(required = true, num_args = 1..)]
        value: Vec<String>,
    },
    /// Replace a task's text
    Edit {
        id: String,
        #[arg(required = true, num_args = 1..)]
        value: Vec<String>,
    },
    /// Mark a task as done
    Complete {
        id: String,
    },
    /// Remove a task
    Delete {
        id: String,
    },
    /// Remove every task
    Clear,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    #[arg(long, value_name = "ID", help = "Room number; omit for the global room")]
    pub room: Option<u64>,
}
