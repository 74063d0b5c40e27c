//! pinsync - live pin map sync client
//!
//! Main entry point for the pinsync CLI.

use clap::{Parser, Subcommand};
use pinsync::activity::ActivityEntry;
use pinsync::client::{ApiClient, NewPin, StreamTransport};
use pinsync::config::{validate_config_result, SyncConfig};
use pinsync::model::PinId;
use pinsync::reconcile::Diff;
use pinsync::sync::{SyncCommand, SyncEngine, SyncEvent, SyncObserver};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

/// pinsync - keep a local copy of a shared pin map in sync
#[derive(Parser, Debug)]
#[command(name = "pinsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/pinsync/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Map server URL (overrides the config file)
    #[arg(short, long, env = "PINSYNC_SERVER")]
    server: Option<String>,

    /// Log lifecycle messages (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Follow the map live and print activity as it happens
    Watch {
        /// Disable snapshot polling
        #[arg(long)]
        no_poll: bool,

        /// Disable the push stream
        #[arg(long)]
        no_push: bool,

        /// Poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Print each diff as a JSON line instead of activity text
        #[arg(long)]
        json: bool,
    },

    /// Fetch and print the current map once
    Snapshot {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drop a new pin
    #[command(allow_negative_numbers = true)]
    AddPin {
        /// Pin name
        name: String,

        /// Latitude (-90..90)
        lat: f64,

        /// Longitude (-180..180)
        lng: f64,

        /// Image shown with the pin
        #[arg(long)]
        image_url: Option<String>,
    },

    /// Delete a pin
    DeletePin {
        /// Pin ID
        id: String,
    },

    /// Connect two pins
    Connect {
        /// Source pin ID
        source: String,

        /// Target pin ID
        target: String,
    },

    /// Remove the connection between two pins
    Disconnect {
        /// Source pin ID
        source: String,

        /// Target pin ID
        target: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    if let Err(e) = pinsync::logging::init_with_default(level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> pinsync::Result<()> {
    let config_path = cli.config.as_deref();
    let server = cli.server;

    match cli.command {
        Commands::Init { force } => handle_init(config_path, server, force),
        Commands::Watch {
            no_poll,
            no_push,
            interval_ms,
            json,
        } => {
            let mut config = load_config(config_path, server)?;
            if no_poll {
                config.poll_enabled = false;
            }
            if no_push {
                config.push_enabled = false;
            }
            if let Some(ms) = interval_ms {
                config = config.with_poll_interval(Duration::from_millis(ms));
            }
            validate_config_result(&config)?;
            handle_watch(config, json).await
        }
        Commands::Snapshot { json } => {
            let config = load_config(config_path, server)?;
            validate_config_result(&config)?;
            handle_snapshot(&config, json).await
        }
        Commands::AddPin {
            name,
            lat,
            lng,
            image_url,
        } => {
            let client = ApiClient::new(&load_config(config_path, server)?)?;
            let mut new_pin = NewPin::new(name, lat, lng);
            if let Some(url) = image_url {
                new_pin = new_pin.with_image_url(url);
            }
            let pin = client.create_pin(&new_pin).await?;
            println!("Created pin {} \"{}\"", pin.id, pin.name);
            if let Some(location) = pin.location {
                println!("  near {}", location);
            }
            Ok(())
        }
        Commands::DeletePin { id } => {
            let client = ApiClient::new(&load_config(config_path, server)?)?;
            client.delete_pin(&PinId::new(id.clone())).await?;
            println!("Deleted pin {}", id);
            Ok(())
        }
        Commands::Connect { source, target } => {
            let client = ApiClient::new(&load_config(config_path, server)?)?;
            let connection = client
                .create_connection(&PinId::new(source), &PinId::new(target))
                .await?;
            println!(
                "Connected {} -> {} ({})",
                connection.source_id, connection.target_id, connection.id
            );
            Ok(())
        }
        Commands::Disconnect { source, target } => {
            let client = ApiClient::new(&load_config(config_path, server)?)?;
            client
                .delete_connection(&PinId::new(source.clone()), &PinId::new(target.clone()))
                .await?;
            println!("Disconnected {} -> {}", source, target);
            Ok(())
        }
    }
}

/// Load the config file (or defaults), applying the `--server` override
fn load_config(path: Option<&Path>, server: Option<String>) -> pinsync::Result<SyncConfig> {
    let mut config = SyncConfig::load_or_default(path)?;
    if let Some(server) = server {
        config.server_url = server;
    }
    Ok(config)
}

fn handle_init(path: Option<&Path>, server: Option<String>, force: bool) -> pinsync::Result<()> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(SyncConfig::default_path);

    if path.exists() && !force {
        return Err(pinsync::PinSyncError::Config(format!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        )));
    }

    let mut config = SyncConfig::default();
    if let Some(server) = server {
        config.server_url = server;
    }
    validate_config_result(&config)?;
    config.save(&path)?;

    println!("Wrote {}", path.display());
    println!("  server: {}", config.server_url);
    Ok(())
}

async fn handle_snapshot(config: &SyncConfig, json: bool) -> pinsync::Result<()> {
    let client = ApiClient::new(config)?;
    let snapshot = client.fetch_snapshot().await?;

    if json {
        let output = serde_json::json!({
            "pins": snapshot.pins,
            "connections": snapshot.connections,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "{} pins, {} connections",
        snapshot.pins.len(),
        snapshot.connections.len()
    );
    for pin in &snapshot.pins {
        let location = pin.location.as_deref().unwrap_or("-");
        println!(
            "  {}  {:<24} {:>9.4} {:>10.4}  {}",
            pin.id, pin.name, pin.lat, pin.lng, location
        );
    }
    let names: std::collections::HashMap<&PinId, &str> = snapshot
        .pins
        .iter()
        .map(|p| (&p.id, p.name.as_str()))
        .collect();
    for connection in &snapshot.connections {
        let source = names
            .get(&connection.source_id)
            .copied()
            .unwrap_or(connection.source_id.as_str());
        let target = names
            .get(&connection.target_id)
            .copied()
            .unwrap_or(connection.target_id.as_str());
        println!("  {} -> {}", source, target);
    }
    Ok(())
}

/// Prints activity (or diffs) to stdout as it arrives
struct PrintObserver {
    json: bool,
    seen: Mutex<HashSet<String>>,
}

impl SyncObserver for PrintObserver {
    fn on_diff(&self, diff: &Diff) {
        if !self.json {
            return;
        }
        match serde_json::to_string(diff) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::error!(error = %e, "Failed to encode diff"),
        }
    }

    fn on_activity_changed(&self, entries: &[ActivityEntry]) {
        if self.json {
            return;
        }
        let Ok(mut seen) = self.seen.lock() else {
            return;
        };
        // Oldest first, so output reads top to bottom
        for entry in entries.iter().rev() {
            if seen.insert(entry.id.clone()) {
                println!(
                    "{}  {}",
                    entry.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S"),
                    entry.message
                );
            }
        }
        let current: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        seen.retain(|id| current.contains(id.as_str()));
    }
}

/// Status line for the lifecycle events worth showing
fn status_line(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::PollError { message } => Some(format!("poll failed: {}", message)),
        SyncEvent::PushStateChanged(state) => Some(format!("push: {}", state)),
        SyncEvent::PayloadRejected { message, .. } => {
            Some(format!("rejected payload: {}", message))
        }
        _ => None,
    }
}

/// Emit status lines until the engine goes away; a slow reader skips ahead
async fn forward_status(
    mut events: broadcast::Receiver<SyncEvent>,
    mut emit: impl FnMut(String),
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = status_line(&event) {
                    emit(line);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Status output fell behind, skipping events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn handle_watch(config: SyncConfig, json: bool) -> pinsync::Result<()> {
    let source = Arc::new(ApiClient::new(&config)?);
    let transport = Arc::new(StreamTransport::new(&config)?);

    let observer = Arc::new(PrintObserver {
        json,
        seen: Mutex::new(HashSet::new()),
    });
    let mut engine = SyncEngine::new(config.clone()).with_observer(observer);

    // Status lines go to stderr so stdout stays clean for --json
    let events = engine.subscribe();
    tokio::spawn(forward_status(events, |line| eprintln!("{}", line)));

    let commands = engine.command_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
            let _ = commands.send(SyncCommand::Shutdown).await;
        }
    });

    eprintln!("Watching {} (Ctrl-C to stop)", config.server_url);
    engine.run(source, transport).await
}
