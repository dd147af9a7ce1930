//! Status boundary: everything a UI needs to follow a run.

use crate::mirror::types::TransferProgress;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "type", content = "payload")]
pub enum StatusEvent {
    #[serde(rename_all = "camelCase")]
    SyncState { in_progress: bool, paused: bool },
    Log { level: LogLevel, message: String },
    /// `None` clears the progress display.
    Progress(Option<TransferProgress>),
    /// Time until the next auto-sync; `None` when auto-sync is off.
    Countdown(Option<String>),
}

/// Fan-out of status events. Sending never blocks; slow subscribers lag.
#[derive(Clone)]
pub struct StatusBroadcaster {
    tx: broadcast::Sender<StatusEvent>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: StatusEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Severity-tagged status line, mirrored to the `log` facade.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        log::log!(target: "sorng_mirror", log::Level::from(level), "{}", message);
        self.emit(StatusEvent::Log { level, message });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_log_lines() {
        let status = StatusBroadcaster::new();
        let mut rx = status.subscribe();
        status.warn("disk nearly full");
        assert_eq!(
            rx.recv().await.unwrap(),
            StatusEvent::Log {
                level: LogLevel::Warn,
                message: "disk nearly full".into()
            }
        );
    }

    #[test]
    fn events_serialize_for_a_ui() {
        let json = serde_json::to_value(StatusEvent::SyncState {
            in_progress: true,
            paused: false,
        })
        .unwrap();
        assert_eq!(json["type"], "syncState");
        assert_eq!(json["payload"]["inProgress"], true);
    }
}
