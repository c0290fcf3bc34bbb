use clap::ValueEnum;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

static INIT: OnceLock<()> = OnceLock::new();
static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if INIT.get().is_some() {
        return Ok(());
    }

    inner_init(config)?;
    INIT.set(()).ok();
    Ok(())
}

fn inner_init(config: &LogConfig) -> Result<(), InitError> {
    let env_filter = build_env_filter(config.level.to_filter());

    // stdout belongs to the chat transcript; logs go to stderr or a file.
    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_target(config.level >= LogLevel::Debug)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Configure(err.to_string()))?;

    let _ = GUARD.set(guard);
    Ok(())
}

fn build_env_filter(level: LevelFilter) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(filter) if !filter.trim().is_empty() => EnvFilter::new(filter),
        _ => EnvFilter::new(default_filter_for(level)),
    }
}

const NOISY_DEP_TARGETS: &[&str] = &["hyper", "reqwest", "tokio_tungstenite", "tungstenite", "rustls"];

fn default_filter_for(level: LevelFilter) -> String {
    let mut filter = match level {
        LevelFilter::TRACE => "info,tidepool=trace,tidepool_sync=trace".to_string(),
        LevelFilter::DEBUG => "info,tidepool=debug,tidepool_sync=debug".to_string(),
        other => other.to_string().to_lowercase(),
    };
    if level >= LevelFilter::DEBUG {
        for target in NOISY_DEP_TARGETS {
            filter.push(',');
            filter.push_str(target);
            filter.push_str("=info");
        }
    }
    filter
}
