//! Mirror engine error type.

use serde::{Deserialize, Serialize};
use sorng_ftp::ftp::{FtpError, FtpErrorKind};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncError {
    pub kind: SyncErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// The remote server could not be reached or refused the login.
    Connection,
    /// No pooled session became free within the caller's wait.
    PoolExhausted,
    /// A target's origin folder is absent on the remote.
    DirectoryMissing,
    ListingFailed,
    /// A target's regex does not compile.
    InvalidPattern,
    LocalFolderCreate,
    /// The user aborted the transfer. Reported as *Aborted*, never as an error.
    ManualAbortion,
    Transfer,
    Io,
    InvalidConfig,
    Unknown,
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn new(kind: SyncErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Connection, msg)
    }

    pub fn pool_exhausted(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::PoolExhausted, msg)
    }

    pub fn directory_missing(path: &str) -> Self {
        Self::new(
            SyncErrorKind::DirectoryMissing,
            format!("Folder {} does not exist on remote", path),
        )
    }

    pub fn listing(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::ListingFailed, msg)
    }

    pub fn invalid_pattern(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::InvalidPattern, msg)
    }

    pub fn local_folder(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::LocalFolderCreate, msg)
    }

    pub fn aborted() -> Self {
        Self::new(SyncErrorKind::ManualAbortion, "Transfer aborted by user")
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Transfer, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Io, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::InvalidConfig, msg)
    }

    pub fn is_aborted(&self) -> bool {
        self.kind == SyncErrorKind::ManualAbortion
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for SyncError {}

impl From<FtpError> for SyncError {
    fn from(e: FtpError) -> Self {
        let kind = match e.kind {
            FtpErrorKind::ConnectionFailed
            | FtpErrorKind::TlsFailed
            | FtpErrorKind::AuthFailed
            | FtpErrorKind::Disconnected => SyncErrorKind::Connection,
            FtpErrorKind::DataChannelFailed
            | FtpErrorKind::TransferFailed
            | FtpErrorKind::Timeout => SyncErrorKind::Transfer,
            FtpErrorKind::IoError => SyncErrorKind::Io,
            FtpErrorKind::InvalidConfig => SyncErrorKind::InvalidConfig,
            _ => SyncErrorKind::Unknown,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        Self::new(SyncErrorKind::Io, e.to_string())
    }
}

impl From<regex::Error> for SyncError {
    fn from(e: regex::Error) -> Self {
        Self::invalid_pattern(e.to_string())
    }
}
