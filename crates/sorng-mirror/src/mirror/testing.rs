//! In-memory remote used by the unit tests.

use crate::mirror::error::{SyncError, SyncResult};
use crate::mirror::remote::{RemoteReader, RemoteSession, SessionConnector};
use crate::mirror::types::RemoteEntry;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sorng_ftp::ftp::FtpConnectionConfig;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const FAKE_CHUNK: usize = 16 * 1024;

#[derive(Clone)]
struct FakeFile {
    name: String,
    bytes: Vec<u8>,
    minute: u32,
    is_directory: bool,
    delay: Option<Duration>,
}

/// Remote tree shared between the test and every session it hands out.
#[derive(Clone, Default)]
pub struct RemoteTree {
    dirs: Arc<Mutex<HashMap<String, Vec<FakeFile>>>>,
    unlistable: Arc<Mutex<HashSet<String>>>,
}

impl RemoteTree {
    pub fn add_file(&self, dir: &str, name: &str, bytes: Vec<u8>, minute: u32) {
        self.insert(dir, name, bytes, minute, None);
    }

    /// A file that streams in 16 KiB chunks with `delay` before each one.
    pub fn add_slow_file(&self, dir: &str, name: &str, bytes: Vec<u8>, minute: u32, delay: Duration) {
        self.insert(dir, name, bytes, minute, Some(delay));
    }

    fn insert(&self, dir: &str, name: &str, bytes: Vec<u8>, minute: u32, delay: Option<Duration>) {
        let mut tree = self.dirs.lock().unwrap();
        let entries = tree.entry(dir.to_string()).or_default();
        entries.retain(|f| f.name != name);
        entries.push(FakeFile {
            name: name.into(),
            bytes,
            minute,
            is_directory: false,
            delay,
        });
    }

    pub fn add_dir(&self, dir: &str, name: &str) {
        self.dirs.lock().unwrap().entry(dir.to_string()).or_default().push(FakeFile {
            name: name.into(),
            bytes: Vec::new(),
            minute: 0,
            is_directory: true,
            delay: None,
        });
    }

    /// `dir` still exists, but listing it fails.
    pub fn break_listing(&self, dir: &str) {
        self.dirs.lock().unwrap().entry(dir.to_string()).or_default();
        self.unlistable.lock().unwrap().insert(dir.to_string());
    }

    fn lookup(&self, path: &str) -> Option<FakeFile> {
        let (dir, name) = path.rsplit_once('/')?;
        let dir = if dir.is_empty() { "/" } else { dir };
        let tree = self.dirs.lock().unwrap();
        tree.get(dir)?
            .iter()
            .find(|f| f.name == name && !f.is_directory)
            .cloned()
    }
}

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    closes: AtomicUsize,
    downloads: AtomicUsize,
    aborts: AtomicUsize,
    keepalives: AtomicUsize,
    keepalive_fails: AtomicBool,
}

pub struct FakeRemote {
    tree: RemoteTree,
    counters: Arc<Counters>,
    chunk_delay: Option<Duration>,
    closed: bool,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self {
            tree: RemoteTree::default(),
            counters: Arc::default(),
            chunk_delay: None,
            closed: false,
        }
    }
}

impl FakeRemote {
    pub fn add_file(&mut self, dir: &str, name: &str, bytes: Vec<u8>, minute: u32) {
        self.tree.add_file(dir, name, bytes, minute);
    }

    pub fn add_dir(&mut self, dir: &str, name: &str) {
        self.tree.add_dir(dir, name);
    }
}

#[async_trait]
impl RemoteSession for FakeRemote {
    async fn change_directory(&mut self, path: &str) -> SyncResult<()> {
        if self.tree.dirs.lock().unwrap().contains_key(path) {
            Ok(())
        } else {
            Err(SyncError::directory_missing(path))
        }
    }

    async fn list(&mut self, path: &str) -> SyncResult<Vec<RemoteEntry>> {
        if self.tree.unlistable.lock().unwrap().contains(path) {
            return Err(SyncError::listing(format!("Cannot list {}: 425 can't open data connection", path)));
        }
        let tree = self.tree.dirs.lock().unwrap();
        let files = tree.get(path).cloned().unwrap_or_default();
        Ok(files
            .into_iter()
            .map(|f| RemoteEntry {
                size: f.bytes.len() as u64,
                modified_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, f.minute, 0).unwrap(),
                is_directory: f.is_directory,
                name: f.name,
            })
            .collect())
    }

    async fn open_download(&mut self, path: &str) -> SyncResult<RemoteReader> {
        let file = self
            .tree
            .lookup(path)
            .ok_or_else(|| SyncError::transfer(format!("{} not found", path)))?;
        let bytes = file.bytes;
        let Some(delay) = file.delay.or(self.chunk_delay) else {
            return Ok(Box::new(Cursor::new(bytes)));
        };
        let (mut tx, rx) = tokio::io::duplex(FAKE_CHUNK);
        tokio::spawn(async move {
            for chunk in bytes.chunks(FAKE_CHUNK) {
                tokio::time::sleep(delay).await;
                if tx.write_all(chunk).await.is_err() {
                    break;
                }
            }
        });
        Ok(Box::new(rx))
    }

    async fn complete_download(&mut self, _bytes: u64) -> SyncResult<()> {
        self.counters.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort_download(&mut self) -> SyncResult<()> {
        self.counters.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn keepalive(&mut self) -> SyncResult<()> {
        self.counters.keepalives.fetch_add(1, Ordering::SeqCst);
        if self.counters.keepalive_fails.load(Ordering::SeqCst) {
            self.closed = true;
            return Err(SyncError::connection("421 service not available"));
        }
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Hands out `FakeRemote`s over one shared tree.
#[derive(Default)]
pub struct FakeConnector {
    pub tree: RemoteTree,
    counters: Arc<Counters>,
    chunk_delay: Mutex<Option<Duration>>,
    fail: AtomicBool,
}

impl FakeConnector {
    pub fn fail_connects(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Stream downloads in 16 KiB chunks with `delay` before each one.
    pub fn slow_downloads(&self, delay: Duration) {
        *self.chunk_delay.lock().unwrap() = Some(delay);
    }

    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.counters.downloads.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.counters.aborts.load(Ordering::SeqCst)
    }

    pub fn keepalives(&self) -> usize {
        self.counters.keepalives.load(Ordering::SeqCst)
    }

    /// Make every later keepalive fail as a dropped connection would.
    pub fn fail_keepalives(&self, fail: bool) {
        self.counters.keepalive_fails.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, _config: &FtpConnectionConfig) -> SyncResult<Box<dyn RemoteSession>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SyncError::connection("connection refused"));
        }
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRemote {
            tree: self.tree.clone(),
            counters: self.counters.clone(),
            chunk_delay: *self.chunk_delay.lock().unwrap(),
            closed: false,
        }))
    }
}
