//! Remote storage seam.
//!
//! The engine talks to `RemoteSession` only; `FtpSession` is the production
//! implementation on top of `sorng_ftp::FtpClient`.

use crate::mirror::error::{SyncError, SyncResult};
use crate::mirror::types::RemoteEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sorng_ftp::ftp::{FtpClient, FtpConnectionConfig, FtpEntryKind, FtpErrorKind};
use tokio::io::AsyncRead;

/// Byte stream of one remote file being downloaded.
pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;

/// One logged-in remote session.
#[async_trait]
pub trait RemoteSession: Send {
    /// Fails with `DirectoryMissing` when the folder does not exist.
    async fn change_directory(&mut self, path: &str) -> SyncResult<()>;

    /// Fresh listing of `path`; never cached.
    async fn list(&mut self, path: &str) -> SyncResult<Vec<RemoteEntry>>;

    /// Start downloading `path`. Follow with `complete_download` once the
    /// reader is drained, or `abort_download` if it is abandoned.
    async fn open_download(&mut self, path: &str) -> SyncResult<RemoteReader>;

    async fn complete_download(&mut self, bytes: u64) -> SyncResult<()>;

    async fn abort_download(&mut self) -> SyncResult<()>;

    /// Cheap round trip that keeps an idle session open.
    async fn keepalive(&mut self) -> SyncResult<()>;

    async fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Opens new sessions for the pool.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, config: &FtpConnectionConfig) -> SyncResult<Box<dyn RemoteSession>>;
}

// ─── FTP ─────────────────────────────────────────────────────────────

pub struct FtpSession {
    client: FtpClient,
}

impl FtpSession {
    pub fn new(client: FtpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemoteSession for FtpSession {
    async fn change_directory(&mut self, path: &str) -> SyncResult<()> {
        match self.client.cwd(path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind == FtpErrorKind::NotFound => Err(SyncError::directory_missing(path)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&mut self, path: &str) -> SyncResult<Vec<RemoteEntry>> {
        let entries = self
            .client
            .list(path)
            .await
            .map_err(|e| SyncError::listing(format!("Listing {} failed: {}", path, e)))?;
        Ok(entries
            .into_iter()
            .map(|e| RemoteEntry {
                is_directory: e.kind == FtpEntryKind::Directory,
                modified_at: e.modified.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                size: e.size,
                name: e.name,
            })
            .collect())
    }

    async fn open_download(&mut self, path: &str) -> SyncResult<RemoteReader> {
        let stream = self.client.begin_retrieve(path).await?;
        Ok(Box::new(stream))
    }

    async fn complete_download(&mut self, bytes: u64) -> SyncResult<()> {
        Ok(self.client.finish_retrieve(bytes).await?)
    }

    async fn abort_download(&mut self) -> SyncResult<()> {
        Ok(self.client.abort_retrieve().await?)
    }

    async fn keepalive(&mut self) -> SyncResult<()> {
        Ok(self.client.noop().await?)
    }

    async fn close(&mut self) {
        let _ = self.client.quit().await;
    }

    fn is_closed(&self) -> bool {
        !self.client.is_connected()
    }
}

/// Connects real FTP/FTPS sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct FtpConnector;

#[async_trait]
impl SessionConnector for FtpConnector {
    async fn connect(&self, config: &FtpConnectionConfig) -> SyncResult<Box<dyn RemoteSession>> {
        let client = FtpClient::connect(config.clone())
            .await
            .map_err(|e| SyncError::connection(e.to_string()))?;
        Ok(Box::new(FtpSession::new(client)))
    }
}
