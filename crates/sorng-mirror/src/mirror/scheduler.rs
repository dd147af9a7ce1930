//! Auto-sync timer and countdown.
//!
//! Two tasks per armed timer: one fires `run()` every interval, the other
//! publishes the time left until the next run once per second. Both hold
//! only a `Weak` reference so a dropped engine stops them.

use crate::mirror::engine::MirrorEngine;
use crate::mirror::status::{StatusBroadcaster, StatusEvent};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);
const RUNNING_PLACEHOLDER: &str = "--:--";

struct TimerTasks {
    periodic: JoinHandle<()>,
    countdown: JoinHandle<()>,
}

impl TimerTasks {
    fn abort(self) {
        self.periodic.abort();
        self.countdown.abort();
    }
}

#[derive(Default)]
pub struct AutoSync {
    tasks: Mutex<Option<TimerTasks>>,
}

impl AutoSync {
    /// Arm (or re-arm) the timer. The first run fires one full interval
    /// from now.
    pub fn enable(&self, engine: &Arc<MirrorEngine>, interval: Duration) {
        let armed_at = Instant::now();
        let weak = Arc::downgrade(engine);

        let periodic = tokio::spawn(periodic_loop(weak.clone(), armed_at, interval));
        let countdown = tokio::spawn(countdown_loop(weak, armed_at, interval));

        if let Some(old) = self.slot().replace(TimerTasks { periodic, countdown }) {
            old.abort();
        }
        engine.status().info(format!(
            "Auto sync enabled, every {}",
            format_countdown(interval)
        ));
    }

    pub fn disable(&self, status: &StatusBroadcaster) {
        if let Some(old) = self.slot().take() {
            old.abort();
            status.info("Auto sync disabled");
        }
        status.emit(StatusEvent::Countdown(None));
    }

    pub fn is_enabled(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<TimerTasks>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for AutoSync {
    fn drop(&mut self) {
        if let Some(old) = self.slot().take() {
            old.abort();
        }
    }
}

async fn periodic_loop(engine: Weak<MirrorEngine>, armed_at: Instant, interval: Duration) {
    let mut ticker = interval_at(armed_at + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(engine) = engine.upgrade() else {
            return;
        };
        log::debug!("Auto sync tick");
        tokio::spawn(engine.run_owned());
    }
}

async fn countdown_loop(engine: Weak<MirrorEngine>, armed_at: Instant, interval: Duration) {
    let mut ticker = tokio::time::interval(COUNTDOWN_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(engine) = engine.upgrade() else {
            return;
        };
        let text = if engine.is_running() {
            RUNNING_PLACEHOLDER.to_string()
        } else {
            let base = engine
                .last_run_started()
                .map_or(armed_at, |started| started.max(armed_at));
            let next = base + interval;
            format_countdown(next.saturating_duration_since(Instant::now()))
        };
        engine.status().emit(StatusEvent::Countdown(Some(text)));
    }
}

/// `mm:ss`, or `h:mm:ss` from one hour up.
pub fn format_countdown(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::config::MirrorConfig;
    use crate::mirror::testing::FakeConnector;

    #[test]
    fn countdown_format() {
        assert_eq!(format_countdown(Duration::from_secs(0)), "00:00");
        assert_eq!(format_countdown(Duration::from_secs(65)), "01:05");
        assert_eq!(format_countdown(Duration::from_secs(30 * 60)), "30:00");
        assert_eq!(format_countdown(Duration::from_secs(3600 + 2 * 60 + 3)), "1:02:03");
    }

    fn engine(connector: Arc<FakeConnector>) -> Arc<MirrorEngine> {
        let mut config = MirrorConfig::default();
        config.server.host = "fake.example".into();
        config.auto_sync_interval_minutes = 5;
        MirrorEngine::new(config, connector)
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_runs_and_counts_down() {
        let connector = Arc::new(FakeConnector::default());
        let engine = engine(connector.clone());
        let mut events = engine.subscribe();

        engine.enable_auto_sync();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let mut countdowns = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if let StatusEvent::Countdown(Some(text)) = ev {
                countdowns.push(text);
            }
        }
        assert!(countdowns.iter().any(|t| t == "05:00" || t == "04:59"));
        assert_eq!(connector.connects(), 0);

        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!(connector.connects(), 1);
        assert!(engine.last_run_started().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn disable_stops_the_timer_and_clears_countdown() {
        let connector = Arc::new(FakeConnector::default());
        let engine = engine(connector.clone());
        engine.enable_auto_sync();
        assert!(engine.auto_sync_enabled());

        let mut events = engine.subscribe();
        engine.disable_auto_sync();
        assert!(!engine.auto_sync_enabled());
        assert_eq!(events.try_recv().ok(), Some(StatusEvent::Log {
            level: crate::mirror::status::LogLevel::Info,
            message: "Auto sync disabled".into(),
        }));
        assert_eq!(events.try_recv().ok(), Some(StatusEvent::Countdown(None)));

        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        assert_eq!(connector.connects(), 0);
    }
}
