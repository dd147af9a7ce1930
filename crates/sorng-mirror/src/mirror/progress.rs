//! Progress sampling for the transfer in flight.
//!
//! A reporter task wakes every 500ms, reads the shared byte counter and
//! emits `Progress(Some(..))`. Dropping the reporter stops the task and
//! clears the display with `Progress(None)`.

use crate::mirror::status::{StatusBroadcaster, StatusEvent};
use crate::mirror::types::TransferProgress;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};

pub const REPORT_INTERVAL: Duration = Duration::from_millis(500);
/// Throughput is averaged over this many sampling intervals.
const WINDOW: usize = 4;

/// Turns counter readings into `TransferProgress` snapshots.
pub struct ProgressSampler {
    file_name: String,
    expected: u64,
    samples: VecDeque<(Instant, u64)>,
}

impl ProgressSampler {
    pub fn new(file_name: impl Into<String>, expected: u64, now: Instant) -> Self {
        let mut samples = VecDeque::with_capacity(WINDOW + 1);
        samples.push_back((now, 0));
        Self {
            file_name: file_name.into(),
            expected,
            samples,
        }
    }

    pub fn sample(&mut self, now: Instant, transferred: u64) -> TransferProgress {
        self.samples.push_back((now, transferred));
        while self.samples.len() > WINDOW + 1 {
            self.samples.pop_front();
        }

        let bytes_per_sec = match (self.samples.front(), self.samples.back()) {
            (Some(&(t0, b0)), Some(&(t1, b1))) if t1 > t0 => {
                b1.saturating_sub(b0) as f64 / (t1 - t0).as_secs_f64()
            }
            _ => 0.0,
        };
        let percent = if self.expected == 0 {
            100.0
        } else {
            transferred as f64 / self.expected as f64 * 100.0
        };

        TransferProgress {
            file_name: self.file_name.clone(),
            transferred,
            expected: self.expected,
            percent,
            bytes_per_sec,
            percentage_text: format!("{:.2}%", percent),
            throughput_text: format_rate(bytes_per_sec),
        }
    }
}

/// `1536.0` → `"1.50 KB/s"`.
pub fn format_rate(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];
    let mut value = bytes_per_sec.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Background reporter bound to one transfer.
pub struct ProgressReporter {
    task: JoinHandle<()>,
    status: StatusBroadcaster,
}

impl ProgressReporter {
    pub fn spawn(
        file_name: impl Into<String>,
        expected: u64,
        counter: Arc<AtomicU64>,
        status: &StatusBroadcaster,
    ) -> Self {
        let mut sampler = ProgressSampler::new(file_name, expected, Instant::now());
        let events = status.clone();
        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + REPORT_INTERVAL, REPORT_INTERVAL);
            loop {
                let now = ticker.tick().await;
                let progress = sampler.sample(now, counter.load(Ordering::Relaxed));
                events.emit(StatusEvent::Progress(Some(progress)));
            }
        });
        Self {
            task,
            status: status.clone(),
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.task.abort();
        self.status.emit(StatusEvent::Progress(None));
    }
}
