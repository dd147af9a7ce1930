//! `sorng-mirrord`: runs the mirror engine against one JSON config file.
//!
//! Config path: first argument, else `$SORNG_MIRROR_CONFIG`, else
//! `<config dir>/sorng-mirror/config.json`. On Unix, SIGHUP reloads the file.

use sorng_mirror::mirror::{spawn_pool_maintenance, FtpConnector, MirrorConfig, MirrorEngine, StatusEvent};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "SORNG_MIRROR_CONFIG";
const POOL_SWEEP: Duration = Duration::from_secs(15);

fn config_path() -> Option<PathBuf> {
    if let Some(arg) = std::env::args_os().nth(1) {
        return Some(PathBuf::from(arg));
    }
    if let Some(env) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(env));
    }
    dirs::config_dir().map(|d| d.join("sorng-mirror").join("config.json"))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Also installs the `log` bridge, so the library crates' records show up.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Relay the status events that are not already mirrored to the log.
fn spawn_status_relay(engine: &MirrorEngine) -> tokio::task::JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match events.recv().await {
                Ok(StatusEvent::Progress(Some(p))) => {
                    tracing::debug!(file = %p.file_name, "{} {}", p.percentage_text, p.throughput_text);
                }
                Ok(StatusEvent::SyncState { in_progress, paused }) => {
                    tracing::debug!(in_progress, paused, "sync state");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::trace!("status relay skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(unix)]
async fn reload_on_hangup(engine: Arc<MirrorEngine>, path: PathBuf) {
    use tokio::signal::unix::{signal, SignalKind};
    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("SIGHUP reload unavailable: {}", e);
            return;
        }
    };
    while hangups.recv().await.is_some() {
        tracing::info!("Reloading {}", path.display());
        match MirrorConfig::load(&path).and_then(|c| engine.apply_config(c)) {
            Ok(()) => {}
            Err(e) => tracing::error!("Reload failed, keeping the current configuration: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let Some(path) = config_path() else {
        tracing::error!("No config path given and no config directory on this platform");
        return ExitCode::FAILURE;
    };
    let config = match MirrorConfig::load(&path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Cannot load {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        "Loaded {} ({} target(s), server {})",
        path.display(),
        config.targets.len(),
        config.server.host
    );

    let engine = MirrorEngine::new(config, Arc::new(FtpConnector));
    let relay = spawn_status_relay(&engine);
    let sweeper = spawn_pool_maintenance(engine.pool().clone(), POOL_SWEEP);
    #[cfg(unix)]
    let reload = tokio::spawn(reload_on_hangup(engine.clone(), path.clone()));

    engine.start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for Ctrl-C: {}", e);
    }
    tracing::info!("Shutting down");
    #[cfg(unix)]
    reload.abort();
    sweeper.abort();
    engine.shutdown().await;
    relay.abort();
    ExitCode::SUCCESS
}
