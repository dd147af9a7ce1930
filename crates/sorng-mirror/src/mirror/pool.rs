//! Connection pool: a bounded set of reusable remote sessions.
//!
//! At most `capacity` sessions are borrowed at any time. Borrowing waits on a
//! semaphore instead of retrying; the caller decides how long to wait.

use crate::mirror::error::{SyncError, SyncResult};
use crate::mirror::remote::{RemoteSession, SessionConnector};
use crate::mirror::types::PoolStats;
use sorng_ftp::ftp::FtpConnectionConfig;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use tokio::sync::{Mutex, MutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Duration, Instant};
use uuid::Uuid;

type SharedSession = Arc<Mutex<Box<dyn RemoteSession>>>;

/// One pooled session with its exclusive-use flag.
pub struct ConnectionHandle {
    pub id: String,
    key: String,
    session: SharedSession,
    borrowed: bool,
    last_action: Instant,
}

impl ConnectionHandle {
    fn new(key: String, session: Box<dyn RemoteSession>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key,
            session: Arc::new(Mutex::new(session)),
            borrowed: false,
            last_action: Instant::now(),
        }
    }

    fn borrow(&mut self) {
        assert!(!self.borrowed, "connection {} borrowed twice", self.id);
        self.borrowed = true;
    }

    fn free(&mut self) {
        assert!(self.borrowed, "connection {} freed while not borrowed", self.id);
        self.borrowed = false;
        self.last_action = Instant::now();
    }

    fn is_closed(&self) -> bool {
        // A free handle is never locked, so a failed try_lock means in use.
        self.session
            .try_lock()
            .map(|s| s.is_closed())
            .unwrap_or(false)
    }

    fn is_stale(&self, idle_timeout: Duration) -> bool {
        !self.borrowed && (self.last_action.elapsed() >= idle_timeout || self.is_closed())
    }
}

struct PoolInner {
    connector: Arc<dyn SessionConnector>,
    handles: StdMutex<Vec<ConnectionHandle>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    idle_timeout: Duration,
}

/// Cloneable handle to a shared pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn SessionConnector>, capacity: usize, idle_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                connector,
                handles: StdMutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(capacity)),
                capacity,
                idle_timeout,
            }),
        }
    }

    fn handles(&self) -> StdMutexGuard<'_, Vec<ConnectionHandle>> {
        self.inner
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Borrow a session for `config`, reusing an idle one when possible.
    ///
    /// `wait` bounds how long to wait for a free slot (`None` waits until one
    /// is released). Connect failures are returned as-is, without retry.
    pub async fn acquire(
        &self,
        config: &FtpConnectionConfig,
        wait: Option<Duration>,
    ) -> SyncResult<PooledConnection> {
        let permits = self.inner.permits.clone();
        let permit = match wait {
            Some(d) => time::timeout(d, permits.acquire_owned())
                .await
                .map_err(|_| {
                    SyncError::pool_exhausted(format!(
                        "No free connection after {:?} ({} in use)",
                        d, self.inner.capacity
                    ))
                })?,
            None => permits.acquire_owned().await,
        }
        .map_err(|_| SyncError::pool_exhausted("Connection pool is closed"))?;

        self.evict_idle().await;

        let key = config.session_key();
        let reused = {
            let mut handles = self.handles();
            handles
                .iter_mut()
                .find(|h| !h.borrowed && h.key == key && !h.is_closed())
                .map(|h| {
                    h.borrow();
                    (h.id.clone(), h.session.clone())
                })
        };
        if let Some((id, session)) = reused {
            log::debug!("Pool: reusing connection {}", id);
            return Ok(PooledConnection::new(self.clone(), id, session, permit));
        }

        let displaced = self.take_free_over(self.inner.capacity - 1);
        close_all(displaced).await;

        let session = self.inner.connector.connect(config).await?;
        let mut handle = ConnectionHandle::new(key, session);
        handle.borrow();
        let (id, shared) = (handle.id.clone(), handle.session.clone());
        self.handles().push(handle);
        log::info!("Pool: opened connection {} to {}", id, config.host);

        let surplus = self.take_free_over(self.inner.capacity);
        close_all(surplus).await;

        Ok(PooledConnection::new(self.clone(), id, shared, permit))
    }

    /// Remove free handles (oldest first) until at most `limit` remain.
    fn take_free_over(&self, limit: usize) -> Vec<ConnectionHandle> {
        let mut handles = self.handles();
        let mut taken = Vec::new();
        while handles.len() > limit {
            let oldest = handles
                .iter()
                .enumerate()
                .filter(|(_, h)| !h.borrowed)
                .min_by_key(|(_, h)| h.last_action)
                .map(|(i, _)| i);
            match oldest {
                Some(i) => taken.push(handles.remove(i)),
                None => break,
            }
        }
        taken
    }

    fn release(&self, id: &str) {
        if let Some(h) = self.handles().iter_mut().find(|h| h.id == id) {
            h.free();
        }
    }

    /// Close free sessions idle beyond the timeout or already closed.
    pub async fn evict_idle(&self) -> usize {
        let stale: Vec<ConnectionHandle> = {
            let mut handles = self.handles();
            let idle = self.inner.idle_timeout;
            let (stale, keep) = handles.drain(..).partition(|h| h.is_stale(idle));
            *handles = keep;
            stale
        };
        let n = stale.len();
        close_all(stale).await;
        if n > 0 {
            log::info!("Pool: evicted {} idle connection(s)", n);
        }
        n
    }

    /// Ping every free session; the ones that fail are dropped from the
    /// pool and closed. Returns how many were dropped.
    pub async fn keepalive(&self) -> usize {
        let free: Vec<(String, SharedSession)> = self
            .handles()
            .iter()
            .filter(|h| !h.borrowed)
            .map(|h| (h.id.clone(), h.session.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, session) in free {
            // Borrowed since the snapshot: its user keeps it busy enough.
            let Ok(mut session) = session.try_lock() else {
                continue;
            };
            if let Err(e) = session.keepalive().await {
                log::warn!("Pool: keepalive failed on {}: {}", id, e.message);
                dead.push(id);
            }
        }
        if dead.is_empty() {
            return 0;
        }

        let removed: Vec<ConnectionHandle> = {
            let mut handles = self.handles();
            let (removed, keep) = handles
                .drain(..)
                .partition(|h| !h.borrowed && dead.contains(&h.id));
            *handles = keep;
            removed
        };
        let n = removed.len();
        close_all(removed).await;
        n
    }

    /// Close every free session and forget borrowed ones; those close when
    /// their borrower lets go.
    pub async fn disconnect_all(&self) {
        let all: Vec<ConnectionHandle> = self.handles().drain(..).collect();
        close_all(all.into_iter().filter(|h| !h.borrowed).collect()).await;
    }

    pub fn stats(&self) -> PoolStats {
        let handles = self.handles();
        PoolStats {
            open: handles.len(),
            borrowed: handles.iter().filter(|h| h.borrowed).count(),
            capacity: self.inner.capacity,
        }
    }
}

async fn close_all(handles: Vec<ConnectionHandle>) {
    for h in handles {
        h.session.lock().await.close().await;
        log::debug!("Pool: closed connection {}", h.id);
    }
}

/// Exclusive borrow of one pooled session. Dropping it (or calling
/// [`PooledConnection::free`]) hands the session back to the pool.
pub struct PooledConnection {
    pool: ConnectionPool,
    id: String,
    session: SharedSession,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(pool: ConnectionPool, id: String, session: SharedSession, permit: OwnedSemaphorePermit) -> Self {
        Self {
            pool,
            id,
            session,
            _permit: permit,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn session(&self) -> MutexGuard<'_, Box<dyn RemoteSession>> {
        self.session.lock().await
    }

    pub fn free(self) {}
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // The permit field drops after this, so the handle is free before
        // the next waiter wakes.
        self.pool.release(&self.id);
    }
}

/// Periodically evict idle sessions and keep the remaining free ones alive.
pub fn spawn_pool_maintenance(pool: ConnectionPool, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            pool.evict_idle().await;
            pool.keepalive().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::testing::FakeConnector;
    use tokio_test::assert_ok;

    fn server(host: &str) -> FtpConnectionConfig {
        FtpConnectionConfig {
            host: host.into(),
            ..Default::default()
        }
    }

    fn pool(connector: &Arc<FakeConnector>, idle: Duration) -> ConnectionPool {
        ConnectionPool::new(connector.clone(), 3, idle)
    }

    #[tokio::test]
    async fn reuses_freed_connection() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool(&connector, Duration::from_secs(60));

        let c = assert_ok!(pool.acquire(&server("a"), None).await);
        let first = c.id().to_string();
        c.free();
        let c = assert_ok!(pool.acquire(&server("a"), None).await);
        assert_eq!(c.id(), first);
        assert_eq!(connector.connects(), 1);
        assert_eq!(pool.stats().borrowed, 1);
    }

    #[tokio::test]
    async fn fourth_acquire_waits_for_a_free_handle() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool(&connector, Duration::from_secs(60));

        let a = pool.acquire(&server("a"), None).await.unwrap();
        let _b = pool.acquire(&server("a"), None).await.unwrap();
        let _c = pool.acquire(&server("a"), None).await.unwrap();
        assert_eq!(pool.stats().borrowed, 3);

        let err = pool
            .acquire(&server("a"), Some(Duration::from_millis(50)))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, crate::mirror::error::SyncErrorKind::PoolExhausted);

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&server("a"), None).await.map(|c| c.id().to_string()) })
        };
        time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        let freed = a.id().to_string();
        a.free();
        assert_eq!(waiter.await.unwrap().unwrap(), freed);
        assert!(pool.stats().borrowed <= 3);
    }

    #[tokio::test]
    async fn evicts_idle_sessions() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool(&connector, Duration::from_millis(10));

        pool.acquire(&server("a"), None).await.unwrap().free();
        assert_eq!(pool.stats().open, 1);
        time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.evict_idle().await, 1);
        assert_eq!(pool.stats().open, 0);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn different_credentials_displace_free_sessions_when_full() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool(&connector, Duration::from_secs(60));

        let a = pool.acquire(&server("a"), None).await.unwrap();
        let b = pool.acquire(&server("b"), None).await.unwrap();
        let c = pool.acquire(&server("c"), None).await.unwrap();
        drop((a, b, c));
        assert_eq!(pool.stats().open, 3);

        let _d = pool.acquire(&server("d"), None).await.unwrap();
        assert_eq!(pool.stats().open, 3);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn connect_failure_is_reported_and_releases_the_slot() {
        let connector = Arc::new(FakeConnector::default());
        connector.fail_connects(true);
        let pool = pool(&connector, Duration::from_secs(60));

        let err = pool.acquire(&server("a"), None).await.err().unwrap();
        assert_eq!(err.kind, crate::mirror::error::SyncErrorKind::Connection);
        assert_eq!(pool.stats().open, 0);

        connector.fail_connects(false);
        for _ in 0..3 {
            pool.acquire(&server("a"), Some(Duration::from_millis(50))).await.unwrap().free();
        }
    }

    #[tokio::test]
    async fn keepalive_pings_free_sessions_and_drops_dead_ones() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool(&connector, Duration::from_secs(60));

        pool.acquire(&server("a"), None).await.unwrap().free();
        let busy = pool.acquire(&server("b"), None).await.unwrap();
        assert_eq!(pool.keepalive().await, 0);
        assert_eq!(connector.keepalives(), 1);

        connector.fail_keepalives(true);
        assert_eq!(pool.keepalive().await, 1);
        assert_eq!(pool.stats().open, 1);
        assert_eq!(pool.stats().borrowed, 1);
        assert_eq!(connector.closes(), 0, "a failed session is already closed");
        drop(busy);
    }

    #[tokio::test]
    async fn changed_password_gets_a_fresh_session() {
        let connector = Arc::new(FakeConnector::default());
        let pool = pool(&connector, Duration::from_secs(60));

        let mut old = server("a");
        old.password = "old".into();
        let mut new = old.clone();
        new.password = "new".into();

        let c = pool.acquire(&old, None).await.unwrap();
        let first = c.id().to_string();
        c.free();
        let c = pool.acquire(&new, None).await.unwrap();
        assert_ne!(c.id(), first);
        assert_eq!(connector.connects(), 2);
    }

    #[test]
    #[should_panic(expected = "borrowed twice")]
    fn double_borrow_panics() {
        let mut h = ConnectionHandle::new("k".into(), Box::new(crate::mirror::testing::FakeRemote::default()));
        h.borrow();
        h.borrow();
    }
}
