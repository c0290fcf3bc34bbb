mod cli;
mod logging;
mod render;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tidepool_core::{ClientIdentity, RoomId};
use tidepool_sync::chat::ChatHandle;
use tidepool_sync::identity::{FileIdentityStore, IdentityResolver, IdentitySource};
use tidepool_sync::remote::RemoteClient;
use tidepool_sync::tasks::{JsonFileTaskStore, TaskEngine, TaskStore};
use tidepool_sync::{TidepoolConfig, WsConnector};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use cli::{ChatArgs, Cli, Command, RoomsCommand, TasksCommand};
use render::ChatRenderer;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = cli.apply(TidepoolConfig::from_env());
    logging::init(&cli.logging.to_config(config.log_path.as_deref()))?;

    let resolver = IdentityResolver::new(FileIdentityStore::in_dir(config.data_dir()));
    let resolved = resolver.resolve_detailed();
    if resolved.source == IdentitySource::Ephemeral {
        eprintln!("warning: client id could not be persisted; this session uses a temporary id");
    }
    let identity = resolved.identity;

    match cli.command {
        Command::Whoami => whoami(&config, &identity, resolved.source).await,
        Command::Rename { name } => {
            let client = remote_client(&config)?;
            let profile = client.rename_user(&identity, &name).await?;
            println!("{} is now {}", profile.id, profile.name.as_deref().unwrap_or(&name));
            Ok(())
        }
        Command::Rooms(command) => rooms(&config, command).await,
        Command::Tasks(command) => match config.api_url {
            Some(_) => {
                let engine = TaskEngine::new(identity, remote_client(&config)?);
                tasks(engine, command).await
            }
            None => {
                let store = JsonFileTaskStore::in_dir(config.data_dir());
                info!(path = %store.path().display(), "using local task store");
                tasks(TaskEngine::new(identity, store), command).await
            }
        },
        Command::Chat(args) => chat(&config, identity, args).await,
    }
}

fn remote_client(config: &TidepoolConfig) -> Result<RemoteClient> {
    let url = config
        .api_url
        .as_deref()
        .context("no API configured; set TIDEPOOL__API_URL or pass --api-url")?;
    Ok(RemoteClient::new(url, Some(config.request_timeout()))?)
}

async fn whoami(config: &TidepoolConfig, identity: &ClientIdentity, source: IdentitySource) -> Result<()> {
    println!("{identity} ({source:?})");
    if config.api_url.is_some() {
        match remote_client(config)?.fetch_user(identity).await {
            Ok(profile) => println!("name: {}", profile.name.as_deref().unwrap_or("(unset)")),
            Err(err) => warn!(error = %err, "profile lookup failed"),
        }
    }
    Ok(())
}

async fn rooms(config: &TidepoolConfig, command: RoomsCommand) -> Result<()> {
    let client = remote_client(config)?;
    match command {
        RoomsCommand::List => {
            for room in client.list_rooms().await? {
                println!("{}", room.id);
            }
        }
        RoomsCommand::New => {
            let room = client.create_room().await?;
            println!("created room {}", room.id);
        }
    }
    Ok(())
}

async fn tasks<S: TaskStore>(engine: TaskEngine<S>, command: TasksCommand) -> Result<()> {
    engine.refresh().await.context("failed to load tasks")?;
    match command {
        TasksCommand::List => {
            let snapshot = engine.snapshot();
            for task in snapshot.active() {
                println!("[ ] {}  {}", task.id, task.value);
            }
            for task in snapshot.completed() {
                println!("[x] {}  {}", task.id, task.value);
            }
        }
        TasksCommand::Add { value } => match engine.create(&value.join(" ")).await? {
            Some(task) => println!("added {}", task.id),
            None => bail!("task text is empty"),
        },
        TasksCommand::Edit { id, value } => {
            let value = value.join(" ");
            engine.edit(&id, &value)?;
            let task = engine.commit(&id, &value).await?;
            println!("{}  {}", task.id, task.value);
        }
        TasksCommand::Complete { id } => {
            let task = engine.complete(&id).await?;
            println!("completed {}", task.id);
        }
        TasksCommand::Delete { id } => {
            if !engine.delete(&id).await? {
                bail!("no task with id {id}");
            }
            println!("deleted {id}");
        }
        TasksCommand::Clear => {
            engine.clear_all().await?;
            println!("cleared");
        }
    }
    Ok(())
}

async fn chat(config: &TidepoolConfig, identity: ClientIdentity, args: ChatArgs) -> Result<()> {
    let url = config
        .realtime_url
        .as_deref()
        .context("no chat backend configured; set TIDEPOOL__REALTIME_URL or pass --realtime-url")?;
    let connector = WsConnector::new(url)?;
    let handle = ChatHandle::activate(&connector, identity, args.room.map(RoomId)).await?;

    let mut snapshots = handle.subscribe();
    let printer = tokio::spawn(async move {
        let mut renderer = ChatRenderer::default();
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            for line in renderer.update(&snapshot) {
                println!("{line}");
            }
            if snapshots.changed().await.is_err() {
                break;
            }
        }
    });

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = input.next_line().await? {
        let line = line.trim();
        if line == "/quit" {
            break;
        }
        let result = if let Some(name) = line.strip_prefix("/name ") {
            handle.rename_self(name).await
        } else if let Some(n) = line.strip_prefix("/delete ") {
            let Some(message) = own_message(&handle, n.trim()) else {
                eprintln!("no message #{} of yours", n.trim());
                continue;
            };
            handle.delete_message(&message).await.map(|_| ())
        } else if line.is_empty() {
            continue;
        } else {
            handle.send_message(line).await.map(|_| ())
        };
        if let Err(err) = result {
            eprintln!("{err}");
        }
    }

    handle.deactivate().await;
    printer.abort();
    Ok(())
}

/// `n` counts the user's own messages from 1, oldest first.
fn own_message(handle: &ChatHandle, n: &str) -> Option<tidepool_core::ChatMessage> {
    let index = n.parse::<usize>().ok()?.checked_sub(1)?;
    let snapshot = handle.snapshot();
    snapshot
        .messages
        .iter()
        .filter(|message| snapshot.is_own(message))
        .nth(index)
        .cloned()
}
