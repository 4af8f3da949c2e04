//! prio-sync: Peer-to-peer sync for Prio from the command line.
//!
//! Uses the same sync-core as the web app, with native signaling, WebRTC,
//! and a JSON file in place of browser storage.

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

// Use library exports
use sync_client::backup::{read_backup, write_backup};
use sync_client::{JsonFileStore, SessionConfig, SyncSession, DEFAULT_SERVER_URL};

use sync_core::{import_backup, merge_incoming, MergeOutcome, StateStore, SyncPayload, SyncStatus};

#[derive(Parser, Debug)]
#[command(name = "prio-sync")]
#[command(about = "Peer-to-peer sync for Prio tasks, tags, and habits")]
struct Args {
    /// Signaling server URL
    #[arg(long, env = "PRIO_SYNC_SERVER", default_value = DEFAULT_SERVER_URL, global = true)]
    server: String,

    /// Path to the local state file
    #[arg(long, env = "PRIO_SYNC_STATE", default_value = "prio-state.json", global = true)]
    state: PathBuf,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host a room and send local data to the first peer that joins
    Host,
    /// Join a room and merge the data its host sends
    Join {
        /// Six-character room code
        room: String,

        /// Apply received data and settings without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Write a backup file of the local data
    Export {
        /// Directory to write the backup into
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Replace local data with the contents of a backup file
    Import { file: PathBuf },
    /// Merge a backup file into local data
    Merge {
        file: PathBuf,

        /// Apply differing settings without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete all local data
    Clear,
}

/// Ask a yes/no question on the terminal. Anything but "y" or "yes" is no.
fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn host(config: SessionConfig, store: &JsonFileStore) -> Result<()> {
    let local = store.load().await?.unwrap_or_default();
    info!(
        "Sharing {} tasks, {} tags, {} habits",
        local.task_count(),
        local.custom_tags.len(),
        local.habits.len()
    );

    let mut session = SyncSession::new(config);
    let _events = session
        .events()
        .subscribe(|event| debug!("Session event: {:?}", event));

    let room = session.start_hosting().await?;
    println!("Room code: {}", room);
    println!("Waiting for a peer to join...");

    let mut sent_to: Option<String> = None;
    loop {
        tokio::select! {
            _ = session.step() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                session.reset().await;
                return Ok(());
            }
        }

        let state = session.state();
        if state.status() == SyncStatus::Error {
            let message = state.error_message().unwrap_or_default().to_string();
            session.reset().await;
            bail!(message);
        }
        if session.transfer_complete() {
            break;
        }

        let ready = matches!(state.status(), SyncStatus::Hosting | SyncStatus::Connected);
        let next_peer = state.peers().first().map(|p| p.id.clone());
        if ready && sent_to.is_none() {
            if let Some(peer_id) = next_peer {
                session.send_data_to_peer(&peer_id, &local).await?;
                sent_to = Some(peer_id);
            }
        }
    }

    println!(
        "Data shared with {}",
        sent_to.as_deref().unwrap_or("peer")
    );
    session.reset().await;
    Ok(())
}

async fn join(config: SessionConfig, store: &JsonFileStore, code: &str, yes: bool) -> Result<()> {
    let mut session = SyncSession::new(config);
    let _events = session
        .events()
        .subscribe(|event| debug!("Session event: {:?}", event));

    let room = session.join_room(code).await?;
    println!("Joining room {}, waiting for data...", room);

    loop {
        tokio::select! {
            _ = session.step() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                session.reset().await;
                return Ok(());
            }
        }

        let state = session.state();
        if state.status() == SyncStatus::Error {
            let message = state.error_message().unwrap_or_default().to_string();
            session.reset().await;
            bail!(message);
        }
        if state.received().is_some() {
            break;
        }
    }

    let payload = session
        .take_received()
        .ok_or_else(|| anyhow!("Received data went missing"))?;
    session.reset().await;

    let preview = payload.preview();
    println!(
        "Received {} day(s) with {} task(s), {} tag(s), {} habit(s), theme \"{}\"",
        preview.days, preview.tasks, preview.tags, preview.habits, preview.theme
    );
    if !yes && !confirm("Import this data?")? {
        println!("Received data discarded");
        return Ok(());
    }

    apply_merge(store, &payload, yes).await
}

async fn apply_merge(store: &JsonFileStore, payload: &SyncPayload, yes: bool) -> Result<()> {
    let local = store.load().await?.unwrap_or_default();
    let (merged, outcome) = merge_incoming(&local, payload).finish(|diff| {
        yes || confirm(&diff.prompt()).unwrap_or_else(|e| {
            error!("Failed to read confirmation: {}", e);
            false
        })
    });

    if let MergeOutcome::Merged(_) = &outcome {
        store.save(&merged).await?;
    }
    println!("{}", outcome.summary());
    Ok(())
}

async fn export(store: &JsonFileStore, out: &Path) -> Result<()> {
    let state = store.load().await?.unwrap_or_default();
    let path = write_backup(out, &state, Utc::now()).await?;
    println!("Backup saved successfully: {}", path.display());
    Ok(())
}

async fn import(store: &JsonFileStore, file: &Path) -> Result<()> {
    let text = read_backup(file).await?;
    let local = store.load().await?.unwrap_or_default();
    match import_backup(&local, &text) {
        Ok(state) => {
            store.save(&state).await?;
            println!("Data imported successfully!");
            Ok(())
        }
        Err(e) => {
            error!("Error importing {:?}: {}", file, e);
            bail!("Error importing data. Please check the file format.")
        }
    }
}

async fn merge(store: &JsonFileStore, file: &Path, yes: bool) -> Result<()> {
    let text = read_backup(file).await?;
    let payload = match SyncPayload::from_json(&text) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Error reading {:?}: {}", file, e);
            bail!("Error importing data. Please check the file format.")
        }
    };
    apply_merge(store, &payload, yes).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,sync_client=debug"
    } else {
        "info,sync_client=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("State file: {:?}", args.state);
    let store = JsonFileStore::new(args.state);
    let config = SessionConfig::with_server_url(args.server);

    match args.command {
        Command::Host => host(config, &store).await,
        Command::Join { room, yes } => join(config, &store, &room, yes).await,
        Command::Export { out } => export(&store, &out).await,
        Command::Import { file } => import(&store, &file).await,
        Command::Merge { file, yes } => merge(&store, &file, yes).await,
        Command::Clear => {
            store.clear().await?;
            println!("Local data cleared");
            Ok(())
        }
    }
}
