//! Engine configuration. Loaded from JSON; persistence and change watching
//! belong to the host.

use crate::mirror::error::{SyncError, SyncResult};
use crate::mirror::types::SyncTarget;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sorng_ftp::ftp::FtpConnectionConfig;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Auto-sync never fires more often than this.
pub const MIN_AUTO_SYNC_MINUTES: u64 = 5;

const BYTES_PER_MB: f64 = 1_048_576.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MirrorConfig {
    pub server: FtpConnectionConfig,
    #[serde(default)]
    pub targets: Vec<SyncTarget>,
    /// 0 = unlimited.
    #[serde(default)]
    pub speed_limit_mbps: f64,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub auto_sync: bool,
    #[serde(default = "default_interval")]
    pub auto_sync_interval_minutes: u64,
    #[serde(default)]
    pub sync_on_start: bool,
    #[serde(default = "default_true")]
    pub restart_on_config_change: bool,
    #[serde(default)]
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_sec: u64,
    /// How long a caller waits for a free session; unset waits indefinitely.
    #[serde(default)]
    pub acquire_timeout_sec: Option<u64>,
}

fn default_interval() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_max_sessions() -> usize {
    3
}
fn default_idle_timeout() -> u64 {
    60
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            idle_timeout_sec: default_idle_timeout(),
            acquire_timeout_sec: None,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_sec)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_sec.map(Duration::from_secs)
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            server: FtpConnectionConfig::default(),
            targets: Vec::new(),
            speed_limit_mbps: 0.0,
            debug: false,
            auto_sync: false,
            auto_sync_interval_minutes: default_interval(),
            sync_on_start: false,
            restart_on_config_change: true,
            pool: PoolConfig::default(),
        }
    }
}

impl MirrorConfig {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SyncError::invalid_config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> SyncResult<Self> {
        let config: MirrorConfig = serde_json::from_str(raw)
            .map_err(|e| SyncError::invalid_config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.server.host.is_empty() {
            return Err(SyncError::invalid_config("server.host must not be empty"));
        }
        if self.pool.max_sessions == 0 {
            return Err(SyncError::invalid_config("pool.maxSessions must be at least 1"));
        }
        if !self.speed_limit_mbps.is_finite() || self.speed_limit_mbps < 0.0 {
            return Err(SyncError::invalid_config(
                "speedLimitMbps must be a non-negative number",
            ));
        }

        let mut seen = HashSet::new();
        for t in &self.targets {
            if t.id.trim().is_empty() {
                return Err(SyncError::invalid_config("Target id must not be empty"));
            }
            if !seen.insert(t.id.as_str()) {
                return Err(SyncError::invalid_config(format!(
                    "Duplicate target id '{}'",
                    t.id
                )));
            }
            if t.origin_folder.is_empty() || t.destination_folder.is_empty() {
                return Err(SyncError::invalid_config(format!(
                    "Target '{}' needs both an origin and a destination folder",
                    t.id
                )));
            }
            if t.rename {
                let pattern = t.regex.as_deref().unwrap_or_default();
                Regex::new(pattern).map_err(|e| {
                    SyncError::invalid_config(format!("Target '{}': bad regex: {}", t.id, e))
                })?;
            }
        }
        Ok(())
    }

    /// Speed limit in bytes per second, 0 when unlimited.
    pub fn speed_limit_bps(&self) -> u64 {
        (self.speed_limit_mbps * BYTES_PER_MB) as u64
    }

    pub fn auto_sync_interval(&self) -> Duration {
        Duration::from_secs(self.auto_sync_interval_minutes.max(MIN_AUTO_SYNC_MINUTES) * 60)
    }
}
