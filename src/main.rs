use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use midi_manager_lib::{Backends, Endpoint, ManagerConfig, MidiManager, NoteNames};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CONFIG: &str = "midi-manager.toml";

#[derive(Parser)]
#[command(name = "midi-manager", version, about = "Inspect MIDI endpoints and manage network MIDI sessions")]
struct Cli {
    /// Configuration file (defaults to ./midi-manager.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the name of a MIDI note number
    Note { number: i32 },
    #[command(flatten)]
    Manager(ManagerCommand),
}

/// Commands that need the MIDI and network backends.
#[derive(Subcommand)]
enum ManagerCommand {
    /// List real MIDI sources and destinations
    List,
    /// Browse for network MIDI sessions and print what was found
    Browse {
        #[arg(long, default_value_t = 3)]
        seconds: u64,
    },
    /// Connect to a discovered network session and hold it until Ctrl+C
    Connect {
        name: String,
        /// How long to browse before connecting
        #[arg(long, default_value_t = 3)]
        browse_seconds: u64,
    },
    /// Connect to a network session at host:port and hold it until Ctrl+C
    ConnectManual { name: String, address: String },
    /// Follow hot-plug and discovery changes until Ctrl+C
    Watch {
        /// Also publish the local network session and accept invitations
        #[arg(long)]
        session: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<ManagerConfig> {
    match path {
        Some(path) => ManagerConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => ManagerConfig::load_from_file(DEFAULT_CONFIG)
            .with_context(|| format!("Failed to load {}", DEFAULT_CONFIG)),
        None => Ok(ManagerConfig::default()),
    }
}

fn print_endpoints(title: &str, endpoints: &[Endpoint]) {
    println!("{title}:");
    if endpoints.is_empty() {
        println!("  (none)");
    }
    for endpoint in endpoints {
        let state = match (endpoint.online, endpoint.in_use) {
            (true, true) => "online, in use",
            (true, false) => "online",
            (false, true) => "offline, in use",
            (false, false) => "offline",
        };
        println!("  {} [{}] ({})", endpoint.name, endpoint.descriptor.unique_id, state);
    }
}

fn print_services(manager: &MidiManager) {
    let mut services = manager.network_session_services();
    services.sort_by(|a, b| a.name.cmp(&b.name));
    println!("Network sessions:");
    if services.is_empty() {
        println!("  (none)");
    }
    for service in services {
        match service.primary_address() {
            Some(address) => println!("  {} at {}", service.name, address),
            None => println!("  {} (unresolved)", service.name),
        }
    }
}

fn install_ctrlc() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;
    Ok(running)
}

async fn hold_until_interrupted(manager: &mut MidiManager) -> Result<()> {
    let running = install_ctrlc()?;
    println!("Press Ctrl+C to stop.");
    while running.load(Ordering::SeqCst) {
        if manager.pump_notifications(Duration::from_millis(200)).await > 0 {
            println!("{}", manager.describe_connections());
        }
    }
    Ok(())
}

async fn run(command: ManagerCommand, mut manager: MidiManager) -> Result<()> {
    match command {
        ManagerCommand::List => {
            print_endpoints("Sources", &manager.real_sources_online_or_in_use());
            print_endpoints("Destinations", &manager.real_destinations_online_or_in_use());
        }
        ManagerCommand::Browse { seconds } => {
            manager.start_browsing()?;
            manager.pump_notifications(Duration::from_secs(seconds)).await;
            print_services(&manager);
        }
        ManagerCommand::Connect {
            name,
            browse_seconds,
        } => {
            manager.start_browsing()?;
            manager
                .pump_notifications(Duration::from_secs(browse_seconds))
                .await;
            manager
                .connect(&name)
                .await
                .with_context(|| format!("Failed to connect to '{name}'"))?;
            println!("{}", manager.describe_connections());
            hold_until_interrupted(&mut manager).await?;
        }
        ManagerCommand::ConnectManual { name, address } => {
            manager
                .connect_manually(&name, &address)
                .await
                .with_context(|| format!("Failed to connect to '{name}' at {address}"))?;
            println!("{}", manager.describe_connections());
            hold_until_interrupted(&mut manager).await?;
        }
        ManagerCommand::Watch { session } => {
            if session {
                manager.enable_incoming_connections();
                manager.enable_network_session().await?;
            }
            manager.start_browsing()?;
            let running = install_ctrlc()?;
            println!("Watching for changes. Press Ctrl+C to stop.");
            while running.load(Ordering::SeqCst) {
                if manager.pump_notifications(Duration::from_millis(200)).await > 0 {
                    print_endpoints("Sources", &manager.real_sources_online_or_in_use());
                    print_endpoints("Destinations", &manager.real_destinations_online_or_in_use());
                    print_services(&manager);
                }
            }
        }
    }
    manager.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let filter = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match cli.command {
        // needs no MIDI or network access
        Command::Note { number } => {
            let names = NoteNames::new();
            println!("{}", names.name_of(number)?);
            Ok(())
        }
        Command::Manager(command) => {
            let backends =
                Backends::system(&config).context("Failed to open MIDI and network backends")?;
            let manager = MidiManager::init(config, backends)?;
            run(command, manager).await
        }
    }
}
