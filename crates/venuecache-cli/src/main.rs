//! venuecache - command-line front end for the offline venue cache.
//!
//! Syncs venues, floor maps and routes from the remote API into the local
//! cache, and reads them back without needing a connection.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use venuecache_core::models::EntityRecord;
use venuecache_core::network::ConnectivityState;
use venuecache_core::sync::AutoSync;
use venuecache_core::{
    CacheAccessor, CacheConfig, ConnectivityStatus, EntityKind, FileStore, HttpProvider, NetworkMonitor,
    SnapshotStore, SyncError, SyncOrchestrator, SyncOutcome, SyncPhase, SyncStatus, SyncStatusPublisher,
    TcpProbe,
};

// ============================================================================
// Constants
// ============================================================================

/// Directory for a daily rolling log file, in addition to stderr
const LOG_DIR_ENV: &str = "VENUECACHE_LOG_DIR";

const LOG_FILE_PREFIX: &str = "venuecache.log";

const USAGE: &str = "\
Usage: venuecache <command>

Commands:
  sync [--force]             Refresh the cache if stale (or always, with --force)
  status                     Show cache age, contents and connectivity
  list <kind> [--venue ID] [--json]
                             Print cached venues, maps or routes
  clear                      Delete everything in the cache
  watch                      Keep the cache fresh until interrupted
  help                       Show this message";

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=venuecache_core=debug).
/// The returned guard flushes the log file and must be held until exit.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Sync { force: bool },
    Status,
    List {
        kind: EntityKind,
        venue: Option<String>,
        json: bool,
    },
    Clear,
    Watch,
    Help,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some(command) = args.first() else {
        return Ok(Command::Help);
    };
    let rest = &args[1..];

    let command = match command.as_str() {
        "sync" => {
            let force = match rest {
                [] => false,
                [flag] if flag == "--force" || flag == "-f" => true,
                _ => bail!("sync takes only --force"),
            };
            Command::Sync { force }
        }
        "status" => Command::Status,
        "list" => {
            let Some(kind) = rest.first() else {
                bail!("list needs a kind: venues, maps or routes");
            };
            let kind: EntityKind = kind.parse()?;
            let mut venue = None;
            let mut json = false;
            let mut options = rest[1..].iter();
            while let Some(option) = options.next() {
                match option.as_str() {
                    "--json" => json = true,
                    "--venue" => match options.next() {
                        Some(id) if venue.is_none() => venue = Some(id.clone()),
                        Some(_) => bail!("--venue given twice"),
                        None => bail!("--venue needs a venue ID"),
                    },
                    other => bail!("list does not take '{}'", other),
                }
            }
            Command::List { kind, venue, json }
        }
        "clear" => Command::Clear,
        "watch" => Command::Watch,
        "help" | "--help" | "-h" => Command::Help,
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    };

    if !matches!(command, Command::Sync { .. } | Command::List { .. }) && !rest.is_empty() {
        bail!("Unexpected arguments: {}", rest.join(" "));
    }
    Ok(command)
}

// ============================================================================
// Wiring
// ============================================================================

struct Context {
    config: CacheConfig,
    cache_dir: PathBuf,
    store: Arc<FileStore>,
    network: Arc<NetworkMonitor>,
    publisher: Arc<SyncStatusPublisher>,
    accessor: CacheAccessor,
    orchestrator: Arc<SyncOrchestrator>,
}

impl Context {
    async fn build() -> Result<Self> {
        let config = CacheConfig::load()?;
        let cache_dir = config.cache_dir()?;
        let store = Arc::new(
            FileStore::new(cache_dir.clone())
                .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?
                .with_quota(config.max_cache_bytes),
        );

        let probe = Arc::new(TcpProbe::new(config.probe_address.clone()));
        let network = Arc::new(NetworkMonitor::new(probe, ConnectivityStatus::Offline));
        network.refresh().await;

        let mut provider = HttpProvider::new(&config.remote_base_url)?;
        if let Some(ref token) = config.api_token {
            provider = provider.with_token(token)?;
        }

        let publisher = Arc::new(SyncStatusPublisher::new());
        let accessor = CacheAccessor::load(store.as_ref());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            store.clone(),
            Arc::clone(&network),
            Arc::new(provider),
            Arc::clone(&publisher),
            accessor.clone(),
            config.sync_config(),
        ));

        Ok(Self {
            config,
            cache_dir,
            store,
            network,
            publisher,
            accessor,
            orchestrator,
        })
    }

    fn print_transitions(&self) {
        self.publisher.subscribe(|status| eprintln!("{}", describe_status(status)));
    }
}

fn describe_status(status: &SyncStatus) -> String {
    match status.phase {
        SyncPhase::Idle => "idle".to_string(),
        SyncPhase::FetchingEntities => format!("fetching... {}%", status.progress_percent),
        SyncPhase::Persisting => format!("saving... {}%", status.progress_percent),
        SyncPhase::Complete => "sync complete".to_string(),
        SyncPhase::Failed => format!(
            "sync failed: {}",
            status.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn describe_outcome(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Fresh { .. } => "Cache is up to date".to_string(),
        SyncOutcome::Synced {
            venues,
            maps,
            routes,
            blobs,
            ..
        } => format!(
            "Synced {} venues, {} maps, {} routes ({} new map tiles)",
            venues, maps, routes, blobs
        ),
    }
}

fn describe_connectivity(state: &ConnectivityState) -> String {
    let label = match state.status {
        ConnectivityStatus::Online => "online",
        ConnectivityStatus::Offline => "offline",
    };
    format!("{} (since {})", label, state.changed_at.format("%Y-%m-%d %H:%M:%S UTC"))
}

fn table_header(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Venues => &["ID", "NAME", "LOCATION", "STORES"],
        EntityKind::Maps => &["ID", "VENUE", "NAME", "FLOOR", "TILE"],
        EntityKind::Routes => &["ID", "VENUE", "NAME", "DURATION", "FLOORS"],
    }
}

/// Columns for one record, matching `table_header` for its kind.
/// `has_tile` reports whether a map's tile is in the local store.
fn table_row(record: &EntityRecord, has_tile: impl Fn(&str) -> bool) -> Vec<String> {
    match record {
        EntityRecord::Venue(v) => vec![
            v.id.clone(),
            v.name.clone(),
            v.display_location(),
            v.display_store_count(),
        ],
        EntityRecord::Map(m) => {
            let tile = match m.tile_key.as_deref() {
                Some(key) if has_tile(key) => "cached",
                Some(_) => "missing",
                None => "-",
            };
            vec![
                m.id.clone(),
                m.venue_id.clone(),
                m.name.clone(),
                m.display_floor(),
                tile.to_string(),
            ]
        }
        EntityRecord::Route(r) => vec![
            r.id.clone(),
            r.venue_id.clone(),
            r.name.clone(),
            r.display_duration(),
            if r.crosses_floors() { "multi-floor" } else { "single" }.to_string(),
        ],
    }
}

/// Left-aligned columns two spaces apart, sized to the widest cell.
fn format_table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let header: Vec<String> = header.iter().map(|h| h.to_string()).collect();
    let mut out = String::new();
    for row in std::iter::once(&header).chain(rows) {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{:<width$}", cell, width = width))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}

// ============================================================================
// Commands
// ============================================================================

async fn run_sync(ctx: &Context, force: bool) -> Result<()> {
    ctx.print_transitions();
    match ctx.orchestrator.request_sync(force).await {
        Ok(outcome) => {
            println!("{}", describe_outcome(&outcome));
            Ok(())
        }
        Err(SyncError::Offline) => {
            println!("Offline - using cached data from {}", ctx.accessor.age_display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn run_status(ctx: &Context) {
    println!("Cache:        {}", ctx.cache_dir.display());
    println!("Last synced:  {}", ctx.accessor.age_display());
    for kind in EntityKind::ALL {
        println!("{:<13} {}", format!("{}:", kind), ctx.accessor.count(kind));
    }
    println!("Size:         {} bytes", ctx.store.size_bytes());
    if let Some(limit) = ctx.config.max_cache_bytes {
        println!("Quota:        {} bytes", limit);
    }
    println!("Network:      {}", describe_connectivity(&ctx.network.current_state()));

    let stale = ctx
        .accessor
        .snapshot()
        .map(|s| s.is_stale(ctx.orchestrator.config().staleness_threshold))
        .unwrap_or(true);
    if stale {
        println!("Cache is stale; run `venuecache sync` when online");
    }
}

fn run_list(ctx: &Context, kind: EntityKind, venue: Option<&str>, json: bool) -> Result<()> {
    let records = ctx
        .accessor
        .records_filtered(kind, |r| venue.map_or(true, |v| r.venue_id() == v));
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!("No cached {} (last synced {})", kind, ctx.accessor.age_display());
    } else {
        let rows: Vec<Vec<String>> = records
            .iter()
            .map(|r| table_row(r, |key| ctx.store.has_blob(key)))
            .collect();
        print!("{}", format_table(table_header(kind), &rows));
    }
    Ok(())
}

fn run_clear(ctx: &Context) -> Result<()> {
    ctx.orchestrator.clear_cache()?;
    println!("Cleared {}", ctx.cache_dir.display());
    Ok(())
}

async fn run_watch(ctx: &Context) -> Result<()> {
    ctx.print_transitions();
    ctx.network.start(ctx.config.poll_interval());
    let auto = AutoSync::spawn(
        Arc::clone(&ctx.orchestrator),
        ctx.network.watch(),
        ctx.config.auto_sync_interval(),
    );

    let mut network = ctx.network.watch();
    let watcher = tokio::spawn(async move {
        while network.changed().await.is_ok() {
            let state = *network.borrow_and_update();
            eprintln!("network {}", describe_connectivity(&state));
        }
    });

    match ctx.orchestrator.request_sync(false).await {
        Ok(outcome) => println!("{}", describe_outcome(&outcome)),
        Err(e) => warn!(error = %e, "Initial sync did not run"),
    }

    println!("Watching for changes, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    auto.stop();
    ctx.network.stop();
    watcher.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let _log_guard = init_tracing();
    info!(?command, "venuecache starting");

    let ctx = Context::build().await?;
    match command {
        Command::Sync { force } => run_sync(&ctx, force).await,
        Command::Status => {
            run_status(&ctx);
            Ok(())
        }
        Command::List { kind, venue, json } => run_list(&ctx, kind, venue.as_deref(), json),
        Command::Clear => run_clear(&ctx),
        Command::Watch => run_watch(&ctx).await,
        Command::Help => Ok(()),
    }
}
