#![forbid(unsafe_code)]

mod constants;
mod ipc;
mod settings;
mod state;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use tracing::{Level as TraceLevel, info, warn};
use tracing_subscriber::FmtSubscriber;

use ipc::{BackendServer, spawn_ipc_listener};
use settings::SettingsStore;
use state::UserStateManager;

/// Tab Master backend - persists tab state for the frontend plugin
#[derive(Parser, Debug)]
#[command(name = "tabmaster-backend", version)]
struct Cli {
    /// Directory holding the settings JSON files
    /// (defaults to the platform config dir)
    #[arg(long)]
    settings_dir: Option<PathBuf>,

    /// Unix socket path the frontend connects to
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn default_settings_dir() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(constants::settings::APP_DIR);
    path
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    let settings_dir = cli.settings_dir.unwrap_or_else(default_settings_dir);
    let store = SettingsStore::new(settings_dir, constants::settings::DEFAULT_SCOPE);
    info!(file = %store.path().display(), "Initializing Tab Master backend");
    let manager = Arc::new(UserStateManager::new(store));

    // Load in the background; requests arriving before it finishes block on
    // the readiness signal instead of seeing an empty state.
    {
        let manager = Arc::clone(&manager);
        std::thread::spawn(move || manager.load());
    }

    let socket_path = match cli.socket {
        Some(path) => path,
        None => ipc::default_socket_path()?,
    };
    let server = BackendServer::bind_to(socket_path)?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let _ipc_handle = spawn_ipc_listener(server, Arc::clone(&manager), shutdown_tx.clone());

    spawn_signal_listener(shutdown_tx);

    // Park until the frontend requests shutdown or a signal arrives
    shutdown_rx.recv().ok();

    info!("Unloading Tab Master backend");
    manager.shutdown();
    Ok(())
}

/// Forward SIGINT/SIGTERM to the shutdown channel so the final flush runs
fn spawn_signal_listener(shutdown_tx: mpsc::Sender<()>) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    std::thread::spawn(move || {
        let mut signals = match Signals::new([SIGINT, SIGTERM]) {
            Ok(signals) => signals,
            Err(e) => {
                warn!(error = ?e, "Could not register signal handlers");
                return;
            }
        };
        if let Some(signal) = signals.forever().next() {
            info!(signal, "Received shutdown signal");
            shutdown_tx.send(()).ok();
        }
    });
}
