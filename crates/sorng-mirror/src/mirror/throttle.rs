//! Pacing stage for a single transfer: speed limit, pause and abort.
//!
//! Bytes are accounted cumulatively since the last rebase. Whenever the
//! stream is ahead of `limit` by at least one sample interval the pacer
//! sleeps in bounded steps until it is back on schedule. Pause and abort
//! are `watch` signals, so waiting on them costs nothing.

use crate::mirror::error::{SyncError, SyncResult};
use std::future::Future;
use tokio::sync::watch;
use tokio::time::{self, Duration, Instant};

/// Debt below this is not worth a sleep.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(50);
/// Longest single sleep, so abort and pause stay responsive.
const MAX_SLEEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerState {
    Running,
    Paused,
    Aborted,
}

pub struct Pacer {
    limit_bps: u64,
    baseline: Instant,
    accounted: u64,
    paused: watch::Receiver<bool>,
    abort: watch::Receiver<bool>,
    state: PacerState,
}

impl Pacer {
    /// `limit_bps == 0` means unlimited.
    pub fn new(limit_bps: u64, paused: watch::Receiver<bool>, abort: watch::Receiver<bool>) -> Self {
        Self {
            limit_bps,
            baseline: Instant::now(),
            accounted: 0,
            paused,
            abort,
            state: PacerState::Running,
        }
    }

    pub fn state(&self) -> PacerState {
        self.state
    }

    /// Block while paused. Returns `ManualAbortion` if aborted meanwhile.
    pub async fn gate(&mut self) -> SyncResult<()> {
        self.check_abort()?;
        if !*self.paused.borrow() {
            return Ok(());
        }

        self.state = PacerState::Paused;
        let aborted = {
            let Self { paused, abort, .. } = self;
            tokio::select! {
                _ = resumed(paused) => false,
                _ = aborted(abort) => true,
            }
        };
        if aborted {
            return Err(self.abort_now());
        }
        self.state = PacerState::Running;
        self.rebase();
        Ok(())
    }

    /// Account `n` bytes and sleep off any debt beyond one sample interval.
    pub async fn pace(&mut self, n: u64) -> SyncResult<()> {
        self.accounted += n;
        if self.limit_bps == 0 {
            return self.check_abort();
        }
        loop {
            let debt = self.debt();
            if debt < SAMPLE_INTERVAL {
                return Ok(());
            }
            self.sleep(debt.min(MAX_SLEEP)).await?;
        }
    }

    /// Pay off whatever debt is left once the stream has ended, so the whole
    /// transfer never beats the limit.
    pub async fn settle(&mut self) -> SyncResult<()> {
        if self.limit_bps == 0 {
            return Ok(());
        }
        loop {
            let debt = self.debt();
            if debt.is_zero() {
                return Ok(());
            }
            self.sleep(debt.min(MAX_SLEEP)).await?;
        }
    }

    /// Drive `fut` unless the transfer is aborted first.
    pub async fn race<F: Future>(&mut self, fut: F) -> SyncResult<F::Output> {
        self.check_abort()?;
        let out = tokio::select! {
            out = fut => Some(out),
            _ = aborted(&mut self.abort) => None,
        };
        out.ok_or_else(|| self.abort_now())
    }

    fn debt(&self) -> Duration {
        let due = Duration::from_secs_f64(self.accounted as f64 / self.limit_bps as f64);
        due.saturating_sub(self.baseline.elapsed())
    }

    fn rebase(&mut self) {
        self.baseline = Instant::now();
        self.accounted = 0;
    }

    async fn sleep(&mut self, d: Duration) -> SyncResult<()> {
        let aborted = tokio::select! {
            _ = time::sleep(d) => false,
            _ = aborted(&mut self.abort) => true,
        };
        if aborted {
            return Err(self.abort_now());
        }
        Ok(())
    }

    fn check_abort(&mut self) -> SyncResult<()> {
        if *self.abort.borrow() {
            return Err(self.abort_now());
        }
        Ok(())
    }

    fn abort_now(&mut self) -> SyncError {
        self.state = PacerState::Aborted;
        SyncError::aborted()
    }
}

/// Resolves once the flag reads `false`. A dropped sender counts as resumed.
async fn resumed(paused: &mut watch::Receiver<bool>) {
    let _ = paused.wait_for(|p| !*p).await;
}

/// Resolves only once abort is signalled; a dropped sender never aborts.
async fn aborted(abort: &mut watch::Receiver<bool>) {
    if abort.wait_for(|a| *a).await.is_err() {
        std::future::pending::<()>().await;
    }
}
