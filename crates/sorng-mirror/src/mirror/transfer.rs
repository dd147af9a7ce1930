//! Transfer controller: streams one remote file into a local file.

use crate::mirror::error::{SyncError, SyncResult};
use crate::mirror::progress::ProgressReporter;
use crate::mirror::status::StatusBroadcaster;
use crate::mirror::throttle::Pacer;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;

const CHUNK_SIZE: usize = 64 * 1024;

/// Pause and abort signals for one transfer.
pub struct TransferControl {
    pub paused: watch::Receiver<bool>,
    pub abort: watch::Receiver<bool>,
}

pub struct TransferRequest<'a> {
    pub remote_path: &'a str,
    pub local_path: &'a Path,
    pub expected_size: u64,
    /// Bytes per second, 0 = unlimited.
    pub speed_limit_bps: u64,
}

/// Copy `reader` into `request.local_path`, returning the bytes written.
///
/// Without control signals and without a limit the bytes are copied
/// straight through; otherwise every chunk passes the [`Pacer`]. An abort
/// yields `ManualAbortion` and leaves the partial file in place.
pub async fn transfer<R>(
    reader: &mut R,
    request: &TransferRequest<'_>,
    control: Option<TransferControl>,
    status: &StatusBroadcaster,
) -> SyncResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut out = open_output(request.local_path).await?;

    let mut pacer = match control {
        Some(c) => Some(Pacer::new(request.speed_limit_bps, c.paused, c.abort)),
        None if request.speed_limit_bps > 0 => {
            let (_, idle) = watch::channel(false);
            Some(Pacer::new(request.speed_limit_bps, idle.clone(), idle))
        }
        None => None,
    };

    let counter = Arc::new(AtomicU64::new(0));
    let file_name = request
        .local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| request.remote_path.to_string());
    let _progress = ProgressReporter::spawn(file_name, request.expected_size, counter.clone(), status);

    let read_err = |e: std::io::Error| SyncError::transfer(format!("Reading {}: {}", request.remote_path, e));
    let write_err = |e: std::io::Error| {
        SyncError::io(format!("Writing {}: {}", request.local_path.display(), e))
    };

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written: u64 = 0;
    loop {
        let n = match pacer.as_mut() {
            Some(p) => {
                p.gate().await?;
                p.race(reader.read(&mut buf)).await?.map_err(read_err)?
            }
            None => reader.read(&mut buf).await.map_err(read_err)?,
        };
        if n == 0 {
            break;
        }

        match pacer.as_mut() {
            Some(p) => p.race(out.write_all(&buf[..n])).await?.map_err(write_err)?,
            None => out.write_all(&buf[..n]).await.map_err(write_err)?,
        }
        written += n as u64;
        counter.store(written, Ordering::Relaxed);

        if let Some(p) = pacer.as_mut() {
            p.pace(n as u64).await?;
        }
    }

    out.flush().await.map_err(write_err)?;
    if let Some(p) = pacer.as_mut() {
        p.settle().await?;
    }
    Ok(written)
}

async fn open_output(path: &Path) -> SyncResult<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            SyncError::local_folder(format!("Cannot create {}: {}", parent.display(), e))
        })?;
    }
    File::create(path)
        .await
        .map_err(|e| SyncError::io(format!("Cannot open {}: {}", path.display(), e)))
}
