// ESX Doctor - main.rs
//
// Service entry point. Handles:
// 1. CLI argument parsing
// 2. Logging initialisation (debug mode support)
// 3. Template store loading (built-in + user-defined)
// 4. Bootstrap file indexing (explicit --file, or the most recently
//    modified *.csv in the working directory)
// 5. Session registry construction and the expiration sweep loop
//
// The HTTP transport that multiplexes clients onto the request facade is an
// external collaborator; this binary builds the engine, reports the port it
// should bind, and keeps the sweep running in the foreground.

use clap::Parser;
use esx_doctor::app::facade::RequestFacade;
use esx_doctor::app::registry::SessionRegistry;
use esx_doctor::app::store::TemplateStore;
use esx_doctor::app::sweeper::Sweeper;
use esx_doctor::core::index::{self, DataFile};
use esx_doctor::platform::config::{AppConfig, PlatformPaths};
use esx_doctor::util;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// ESX Doctor - local viewer engine for very large esxtop/PDH CSV exports.
///
/// Point ESX Doctor at a performance-counter export to index it without
/// loading it into memory, then browse series and run rule-based
/// diagnostics through the attached viewer.
#[derive(Parser, Debug)]
#[command(name = "esx-doctor", version, about)]
struct Cli {
    /// CSV export to index at startup (scans the working directory for the
    /// most recent *.csv when omitted).
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Port the transport layer binds (overrides config.toml).
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short, long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();

    let paths = PlatformPaths::resolve();
    let config = AppConfig::load(&paths.config_path);

    util::logging::init(cli.debug, config.log_level.as_deref());

    tracing::info!(
        version = util::constants::APP_VERSION,
        debug = cli.debug,
        "ESX Doctor starting"
    );

    // Bootstrap file: an explicit --file failure is fatal (the launcher
    // contract), a discovery failure just starts the engine empty.
    let explicit = cli.file.is_some();
    let default_file = match bootstrap_file(cli.file) {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(error = %e, "Failed to index bootstrap file");
            if explicit {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
            None
        }
    };

    let store = match TemplateStore::open(&paths.data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            // A corrupt custom file must not block startup; the builtins
            // still work and the next successful save rewrites the file.
            tracing::error!(error = %e, "Custom template store unusable, continuing with builtins");
            Arc::new(TemplateStore::builtins_only(&paths.data_dir))
        }
    };

    let registry = Arc::new(SessionRegistry::new(
        default_file,
        config.session_ttl_hours,
    ));
    let _facade = RequestFacade::new(Arc::clone(&registry), Arc::clone(&store));

    let port = cli.port.unwrap_or(config.port);
    tracing::info!(port, templates = store.list().len(), "Engine ready");

    // The sweep loop is the process's foreground activity; the transport
    // layer attaches to the facade from its own threads.
    let mut sweeper = Sweeper::start(
        registry,
        Duration::from_secs(config.sweep_interval_mins * 60),
    );
    sweeper.join();
}

/// Resolve the bootstrap DataFile per the startup sequence.
fn bootstrap_file(
    explicit: Option<PathBuf>,
) -> Result<Option<Arc<DataFile>>, esx_doctor::util::error::EsxDoctorError> {
    if let Some(path) = explicit {
        let label = path.display().to_string();
        let file = index::index_file(&path, &label, false)?;
        tracing::info!(path = %path.display(), rows = file.rows, "Bootstrap file indexed");
        return Ok(Some(Arc::new(file)));
    }

    match most_recent_csv() {
        Some(path) => {
            let label = path.display().to_string();
            match index::index_file(&path, &label, false) {
                Ok(file) => {
                    tracing::info!(
                        path = %path.display(),
                        rows = file.rows,
                        "Discovered bootstrap file indexed"
                    );
                    Ok(Some(Arc::new(file)))
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Discovered CSV unusable, starting empty");
                    Ok(None)
                }
            }
        }
        None => {
            tracing::info!("No CSV in working directory, starting empty");
            Ok(None)
        }
    }
}

/// The most recently modified *.csv in the current working directory
/// (non-recursive).
fn most_recent_csv() -> Option<PathBuf> {
    let entries = std::fs::read_dir(".").ok()?;
    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if !is_csv {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if best.as_ref().map_or(true, |(t, _)| modified > *t) {
            best = Some((modified, path));
        }
    }
    best.map(|(_, path)| path)
}
