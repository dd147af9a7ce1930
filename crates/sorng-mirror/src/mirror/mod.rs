//! # sorng-mirror — remote mirror engine
//!
//! Keeps local folders in step with folders on an FTP/FTPS server.
//!
//! Architecture:
//! - `types` — targets, entries, match groups, run reports
//! - `error` — mirror error type
//! - `config` — JSON configuration and validation
//! - `remote` — `RemoteSession` seam and its FTP implementation
//! - `pool` — bounded pool of reusable sessions
//! - `template` — `{{$n}}` / `{{$syncName}}` rename templates
//! - `matcher` — listing, grouping and newest-candidate selection
//! - `throttle` — pacing, pause and abort for a byte stream
//! - `progress` — windowed rate sampling and progress events
//! - `transfer` — remote stream to local file
//! - `status` — status events broadcast to subscribers
//! - `hooks` — post-run hook trait
//! - `engine` — run orchestration and control
//! - `scheduler` — auto-sync timer and countdown

pub mod types;
pub mod error;
pub mod config;
pub mod remote;
pub mod pool;
pub mod template;
pub mod matcher;
pub mod throttle;
pub mod progress;
pub mod transfer;
pub mod status;
pub mod hooks;
pub mod engine;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{MirrorConfig, PoolConfig};
pub use engine::{MirrorEngine, SyncState};
pub use error::{SyncError, SyncErrorKind, SyncResult};
pub use hooks::PostRunHook;
pub use pool::{spawn_pool_maintenance, ConnectionPool, PooledConnection};
pub use remote::{FtpConnector, FtpSession, RemoteSession, SessionConnector};
pub use status::{LogLevel, StatusBroadcaster, StatusEvent};
pub use types::*;
