//! Run orchestrator.
//!
//! One `MirrorEngine` owns the run state, the connection pool, the status
//! channel and the auto-sync timer. A run processes targets strictly in
//! order over a single pooled connection; only an abort stops it early.

use crate::mirror::config::MirrorConfig;
use crate::mirror::error::{SyncError, SyncResult};
use crate::mirror::hooks::PostRunHook;
use crate::mirror::matcher;
use crate::mirror::pool::{ConnectionPool, PooledConnection};
use crate::mirror::remote::{RemoteSession, SessionConnector};
use crate::mirror::scheduler::AutoSync;
use crate::mirror::status::{StatusBroadcaster, StatusEvent};
use crate::mirror::transfer::{transfer, TransferControl, TransferRequest};
use crate::mirror::types::*;
use chrono::Utc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

/// Current run flags, as shown to status subscribers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub in_progress: bool,
    pub paused: bool,
}

/// The transfer in flight, reachable by `abort()`.
struct ActiveTransfer {
    abort: watch::Sender<bool>,
}

pub struct MirrorEngine {
    config: RwLock<MirrorConfig>,
    pool: ConnectionPool,
    in_progress: watch::Sender<bool>,
    paused: watch::Sender<bool>,
    last_run_start: StdMutex<Option<Instant>>,
    active: StdMutex<Option<ActiveTransfer>>,
    restart_pending: AtomicBool,
    hooks: StdMutex<Vec<Arc<dyn PostRunHook>>>,
    status: StatusBroadcaster,
    auto_sync: AutoSync,
}

impl MirrorEngine {
    pub fn new(config: MirrorConfig, connector: Arc<dyn SessionConnector>) -> Arc<Self> {
        let pool = ConnectionPool::new(
            connector,
            config.pool.max_sessions,
            config.pool.idle_timeout(),
        );
        Self::with_pool(config, pool)
    }

    /// Build an engine on an existing pool, shared with other callers.
    pub fn with_pool(config: MirrorConfig, pool: ConnectionPool) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            pool,
            in_progress: watch::Sender::new(false),
            paused: watch::Sender::new(false),
            last_run_start: StdMutex::new(None),
            active: StdMutex::new(None),
            restart_pending: AtomicBool::new(false),
            hooks: StdMutex::new(Vec::new()),
            status: StatusBroadcaster::new(),
            auto_sync: AutoSync::default(),
        })
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn status(&self) -> &StatusBroadcaster {
        &self.status
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn config(&self) -> MirrorConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn snapshot(&self) -> SyncState {
        SyncState {
            in_progress: *self.in_progress.borrow(),
            paused: *self.paused.borrow(),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.in_progress.borrow()
    }

    /// Watch the in-progress flag, e.g. to wait for a run to finish.
    pub fn watch_running(&self) -> watch::Receiver<bool> {
        self.in_progress.subscribe()
    }

    pub fn last_run_started(&self) -> Option<Instant> {
        *lock(&self.last_run_start)
    }

    pub fn add_hook(&self, hook: Arc<dyn PostRunHook>) {
        lock(&self.hooks).push(hook);
    }

    // ── Control ──────────────────────────────────────────────────────

    /// Pause the current run. No-op when idle.
    pub fn pause(&self) {
        if !self.is_running() {
            return;
        }
        self.paused.send_replace(true);
        self.status.info("Sync paused");
        self.broadcast_state();
    }

    /// Resume a paused run. No-op when idle.
    pub fn resume(&self) {
        if !self.is_running() {
            return;
        }
        self.paused.send_replace(false);
        self.status.info("Sync resumed");
        self.broadcast_state();
    }

    /// Abort the transfer in flight, if any. The run then stops after the
    /// current target.
    pub fn abort(&self) {
        if let Some(active) = lock(&self.active).as_ref() {
            active.abort.send_replace(true);
            self.status.warn("Abort requested");
        }
    }

    /// Replace the configuration. A run in progress is aborted and, when
    /// `restart_on_config_change` is set, started again once it has wound
    /// down. The auto-sync timer is re-armed with the new settings.
    pub fn apply_config(self: &Arc<Self>, config: MirrorConfig) -> SyncResult<()> {
        config.validate()?;
        let restart = config.restart_on_config_change;
        let auto_sync = config.auto_sync;
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
        self.status.info("Configuration updated");

        // Read and flag under the run guard's lock so a run that is just
        // finishing cannot miss the flag or leave a stale one behind.
        let mut running = false;
        self.in_progress.send_if_modified(|in_progress| {
            running = *in_progress;
            if running && restart {
                self.restart_pending.store(true, Ordering::SeqCst);
            }
            false
        });
        if running {
            self.abort();
        }
        if auto_sync {
            self.enable_auto_sync();
        } else {
            self.disable_auto_sync();
        }
        Ok(())
    }

    /// Apply the start-up settings: arm auto-sync and/or kick off a first run.
    pub fn start(self: &Arc<Self>) {
        let config = self.config();
        if config.auto_sync {
            self.enable_auto_sync();
        }
        if config.sync_on_start {
            tokio::spawn(self.clone().run_owned());
        }
    }

    pub fn enable_auto_sync(self: &Arc<Self>) {
        let interval = self.config().auto_sync_interval();
        self.auto_sync.enable(self, interval);
    }

    pub fn disable_auto_sync(&self) {
        self.auto_sync.disable(&self.status);
    }

    pub fn auto_sync_enabled(&self) -> bool {
        self.auto_sync.is_enabled()
    }

    /// Stop the timer, abort any transfer and close pooled sessions.
    pub async fn shutdown(&self) {
        self.disable_auto_sync();
        self.restart_pending.store(false, Ordering::SeqCst);
        self.abort();
        self.pool.disconnect_all().await;
    }

    // ── Run ──────────────────────────────────────────────────────────

    /// `run()` as an owned, boxed future for spawning.
    pub fn run_owned(self: Arc<Self>) -> BoxFuture<'static, RunOutcome> {
        Box::pin(async move { self.run().await })
    }

    /// Run every target once. Returns immediately if a run is in progress.
    pub async fn run(self: &Arc<Self>) -> RunOutcome {
        let claimed = self.in_progress.send_if_modified(|running| {
            if *running {
                return false;
            }
            *running = true;
            true
        });
        if !claimed {
            self.status.info("Sync already in progress");
            return RunOutcome::AlreadyRunning;
        }
        self.paused.send_replace(false);
        self.broadcast_state();

        let started_at = Utc::now();
        *lock(&self.last_run_start) = Some(Instant::now());
        let config = self.config();
        self.status.info(format!(
            "Sync started ({} target{})",
            config.targets.len(),
            if config.targets.len() == 1 { "" } else { "s" }
        ));

        let conn = match self
            .pool
            .acquire(&config.server, config.pool.acquire_timeout())
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                self.status.error(format!("Connection error: {}", e.message));
                self.finish_run();
                self.restart_if_pending();
                return RunOutcome::ConnectionFailed(e.message);
            }
        };

        let mut targets = Vec::with_capacity(config.targets.len());
        for target in &config.targets {
            let report = self.sync_target(&conn, target, &config).await;
            let aborted = report.result == TargetResult::Aborted;
            targets.push(report);
            if aborted {
                self.status.warn("Sync aborted, remaining targets skipped");
                break;
            }
        }

        let report = RunReport {
            id: Uuid::new_v4().to_string(),
            started_at,
            finished_at: Utc::now(),
            targets,
        };
        self.finish_run();
        self.status.info("Sync finished");

        if report.downloaded_any() {
            self.run_hooks(&report).await;
        }
        conn.free();
        self.restart_if_pending();
        RunOutcome::Finished(report)
    }

    async fn sync_target(
        &self,
        conn: &PooledConnection,
        target: &SyncTarget,
        config: &MirrorConfig,
    ) -> TargetReport {
        let mut downloaded = Vec::new();
        let result = match self.try_sync_target(conn, target, config, &mut downloaded).await {
            Ok(()) if downloaded.is_empty() => {
                self.status.info(format!("[{}] No downloads detected", target.id));
                TargetResult::NoDownloadsDetected
            }
            Ok(()) => {
                self.status.info(format!(
                    "[{}] Downloaded {} file(s)",
                    target.id,
                    downloaded.len()
                ));
                TargetResult::FilesDownloaded
            }
            Err(e) if e.is_aborted() => {
                self.status.warn(format!("[{}] Transfer aborted", target.id));
                TargetResult::Aborted
            }
            Err(e) => {
                self.status.error(format!("[{}] {}", target.id, e.message));
                TargetResult::Error(e.message)
            }
        };
        TargetReport {
            target_id: target.id.clone(),
            result,
            downloaded,
        }
    }

    async fn try_sync_target(
        &self,
        conn: &PooledConnection,
        target: &SyncTarget,
        config: &MirrorConfig,
        downloaded: &mut Vec<PathBuf>,
    ) -> SyncResult<()> {
        // Capture-dependent folders are created per file as downloads land.
        if let Some(root) = matcher::fixed_destination(target) {
            tokio::fs::create_dir_all(&root).await.map_err(|e| {
                SyncError::local_folder(format!("Cannot create {}: {}", root.display(), e))
            })?;
        }

        let mut session = conn.session().await;
        let groups = matcher::match_target(&mut **session, target, config.debug, &self.status).await?;
        let plan = matcher::plan_downloads(target, &groups, &self.status);

        for item in plan {
            self.download(&mut **session, &item, config.speed_limit_bps())
                .await?;
            downloaded.push(item.local_path);
        }
        Ok(())
    }

    async fn download(
        &self,
        session: &mut dyn RemoteSession,
        item: &PlannedDownload,
        speed_limit_bps: u64,
    ) -> SyncResult<u64> {
        let (abort_tx, abort_rx) = watch::channel(false);
        *lock(&self.active) = Some(ActiveTransfer { abort: abort_tx });
        let result = self.stream_file(session, item, speed_limit_bps, abort_rx).await;
        *lock(&self.active) = None;
        result
    }

    async fn stream_file(
        &self,
        session: &mut dyn RemoteSession,
        item: &PlannedDownload,
        speed_limit_bps: u64,
        abort: watch::Receiver<bool>,
    ) -> SyncResult<u64> {
        let mut reader = session.open_download(&item.remote_path).await?;
        let request = TransferRequest {
            remote_path: &item.remote_path,
            local_path: &item.local_path,
            expected_size: item.expected_size,
            speed_limit_bps,
        };
        let control = TransferControl {
            paused: self.paused.subscribe(),
            abort,
        };

        let result = transfer(&mut reader, &request, Some(control), &self.status).await;
        drop(reader);
        match result {
            Ok(bytes) => {
                session.complete_download(bytes).await?;
                self.status.info(format!(
                    "Downloaded {} ({} bytes)",
                    item.local_path.display(),
                    bytes
                ));
                Ok(bytes)
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_download().await {
                    log::warn!("Abandoning {} failed: {}", item.remote_path, abort_err);
                }
                Err(e)
            }
        }
    }

    async fn run_hooks(&self, report: &RunReport) {
        let hooks = lock(&self.hooks).clone();
        for hook in hooks {
            if let Err(e) = hook.after_run(report).await {
                self.status
                    .warn(format!("Post-run hook {} failed: {}", hook.name(), e));
            }
        }
    }

    fn finish_run(&self) {
        self.paused.send_replace(false);
        self.in_progress.send_replace(false);
        self.broadcast_state();
    }

    fn restart_if_pending(self: &Arc<Self>) {
        if self.restart_pending.swap(false, Ordering::SeqCst) {
            self.status.info("Restarting sync with the new configuration");
            tokio::spawn(self.clone().run_owned());
        }
    }

    fn broadcast_state(&self) {
        let state = self.snapshot();
        self.status.emit(StatusEvent::SyncState {
            in_progress: state.in_progress,
            paused: state.paused,
        });
    }
}

fn lock<T>(m: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
