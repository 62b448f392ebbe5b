use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reader_session::config::ReaderConfig;
use reader_session::host::{self, HostEvent, HostRuntime};
use reader_session::location_store::{FileLocationStore, LocationStore, MemoryLocationStore};
use reader_session::session::{RequestStatus, SessionManager};
use reader_session::reader_paths;
use reader_session::sim::{ClientSurfaceFactory, FixedPicker, PrimaryPlan, SimulatedHost};
use reader_session::state_machine::SessionState;
use reader_session::structured_logger::StructuredLogger;
use reader_session::surface::{Surface, SurfaceId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Time allowed for rendering and position reports to settle.
const SETTLE_DELAY: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "reader-host")]
#[command(about = "EPUB reader session host")]
#[command(version)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Config file (defaults to ~/.reader-session/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a document against a simulated host UI
    Open {
        path: PathBuf,

        /// Delay before the host UI creates the primary surface
        #[arg(long, default_value = "300")]
        primary_after_ms: u64,

        /// The primary surface does not appear for the first open
        #[arg(long)]
        never_primary: bool,

        /// Ask the fallback surface to migrate this long after it opens
        #[arg(long)]
        migrate_after_ms: Option<u64>,

        /// Pages in the simulated rendering engine
        #[arg(long, default_value = "20")]
        pages: u32,

        /// Turn this many pages once the document is displayed
        #[arg(long, default_value = "0")]
        turn_pages: u32,

        /// Keep reading positions in memory only
        #[arg(long)]
        ephemeral: bool,
    },
    /// Inspect or edit stored reading positions
    Locations {
        #[command(subcommand)]
        action: LocationsAction,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum LocationsAction {
    List,
    Get { identity: String },
    Set { identity: String, marker: String },
}

struct OpenOptions {
    path: PathBuf,
    primary_after: Duration,
    never_primary: bool,
    migrate_after: Option<Duration>,
    pages: u32,
    turn_pages: u32,
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ReaderConfig::load_or_default(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(
        "reader-host v{} ({}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("READER_SESSION_GIT_SHA")
    );

    match cli.command {
        Command::Open {
            path,
            primary_after_ms,
            never_primary,
            migrate_after_ms,
            pages,
            turn_pages,
            ephemeral,
        } => {
            let options = OpenOptions {
                path,
                primary_after: Duration::from_millis(primary_after_ms),
                never_primary,
                migrate_after: migrate_after_ms.map(Duration::from_millis),
                pages,
                turn_pages,
                ephemeral,
            };
            run_open(&config, options).await
        }
        Command::Locations { action } => run_locations(&config, action),
        Command::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

fn open_store(config: &ReaderConfig, ephemeral: bool) -> Result<Arc<dyn LocationStore>> {
    if ephemeral || !config.storage.persist {
        return Ok(Arc::new(MemoryLocationStore::new()));
    }
    Ok(Arc::new(FileLocationStore::open(&config.locations_path()?)?))
}

fn open_logger(config: &ReaderConfig) -> Result<Arc<StructuredLogger>> {
    if !config.logging.events_log {
        return Ok(Arc::new(StructuredLogger::disabled()));
    }
    let session_id = uuid::Uuid::new_v4().to_string();
    let logger = StructuredLogger::new(&session_id, &reader_paths::logs_dir()?)?;
    if let Some(path) = logger.path() {
        tracing::debug!("Event log: {}", path.display());
    }
    Ok(Arc::new(logger))
}

async fn run_open(config: &ReaderConfig, options: OpenOptions) -> Result<()> {
    let path = absolute(&options.path)?;
    let store = open_store(config, options.ephemeral)?;
    let logger = open_logger(config)?;

    let (tx, rx) = host::channel();
    let factory = ClientSurfaceFactory::new(options.pages, tx.clone());
    let plans = if options.never_primary {
        vec![PrimaryPlan::Never, PrimaryPlan::After(options.primary_after)]
    } else {
        vec![PrimaryPlan::After(options.primary_after)]
    };
    let surface_host = SimulatedHost::new(factory.clone(), plans);
    surface_host.resolve_into(tx.clone());

    let session = SessionManager::new(
        surface_host,
        Arc::clone(&store),
        config,
        Arc::clone(&logger),
    );
    let mut statuses = session.subscribe_status();
    let runtime = HostRuntime::new(session.clone(), FixedPicker::new(Some(path.clone())), logger);
    let runtime_task = tokio::spawn(async move { runtime.run(rx).await });

    let migrator = options.migrate_after.map(|delay| {
        let factory = Arc::clone(&factory);
        tokio::spawn(async move {
            let secondary = loop {
                if let Some(secondary) = factory.secondaries().into_iter().next() {
                    break secondary;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            };
            tokio::time::sleep(delay).await;
            println!("Requesting migration from {}", secondary.id());
            secondary.click_migrate();
        })
    });

    tx.send(HostEvent::OpenCommand(Some(path)))
        .context("Host runtime stopped unexpectedly")?;

    let mut state_rx = session.watch_state();
    let mut identity = None;
    loop {
        tokio::select! {
            event = statuses.recv() => {
                let Ok(event) = event else { break };
                println!("[#{}] {}: {:?}", event.generation, event.identity, event.status);
                if event.status == RequestStatus::Ready {
                    identity = Some(event.identity);
                    break;
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state_rx.borrow_and_update().clone();
                // Without a migration the fallback stays open indefinitely.
                if snapshot.state == SessionState::FailedFallback && options.migrate_after.is_none() {
                    println!("[#{}] showing in a fallback surface", snapshot.generation);
                    identity = snapshot.identity;
                    break;
                }
            }
        }
    }
    if let Some(migrator) = migrator {
        migrator.abort();
    }

    // Let the document render before looking at the surfaces.
    tokio::time::sleep(SETTLE_DELAY).await;
    let displaying = factory
        .get(SurfaceId::Primary)
        .filter(|s| !s.is_disposed())
        .or_else(|| {
            factory
                .secondaries()
                .into_iter()
                .find(|s| !s.is_disposed())
        });
    if let Some(surface) = &displaying {
        for _ in 0..options.turn_pages {
            surface.next_page();
        }
    }
    tokio::time::sleep(SETTLE_DELAY).await;

    for surface in factory.created() {
        let view = surface.view();
        println!(
            "{}: {:?}{} title={:?} position={} progress={} chapter={}",
            surface.id(),
            surface.state(),
            if surface.is_disposed() { " (disposed)" } else { "" },
            view.title,
            view.position.as_deref().unwrap_or("-"),
            view.progress
                .map(|p| format!("{:.0}%", p * 100.0))
                .unwrap_or_else(|| "-".to_string()),
            view.chapter.as_deref().unwrap_or("-"),
        );
    }
    if let Some(identity) = identity {
        println!(
            "Stored position for {}: {}",
            identity,
            store.get(&identity)?.unwrap_or_else(|| "(none)".to_string())
        );
    }

    let _ = tx.send(HostEvent::Shutdown);
    runtime_task.await.context("Host runtime panicked")?;
    Ok(())
}

fn run_locations(config: &ReaderConfig, action: LocationsAction) -> Result<()> {
    let store = FileLocationStore::open(&config.locations_path()?)?;
    match action {
        LocationsAction::List => {
            for (identity, record) in store.entries() {
                println!(
                    "{}\t{}\tformat={}\t{}",
                    identity, record.marker, record.marker_format, record.saved_at
                );
            }
        }
        LocationsAction::Get { identity } => match store.get(&identity)? {
            Some(marker) => println!("{}", marker),
            None => println!("(none)"),
        },
        LocationsAction::Set { identity, marker } => {
            store.put(&identity, &marker)?;
            println!("Stored {} for {}", marker, identity);
        }
    }
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("Failed to resolve current directory")?
        .join(path))
}
