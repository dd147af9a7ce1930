//! Shared types for the mirror engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ─── Targets ─────────────────────────────────────────────────────────

/// One remote folder mirrored into one local folder.
///
/// When `rename` is false, `regex` and `rename_template` are ignored and
/// remote names pass through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncTarget {
    pub id: String,
    pub origin_folder: String,
    /// Local folder; may contain `{{$syncName}}`.
    pub destination_folder: String,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub rename_template: String,
    #[serde(default)]
    pub rename: bool,
}

// ─── Remote listing ──────────────────────────────────────────────────

/// A remote directory entry as seen by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub is_directory: bool,
}

/// All remote candidates that render to the same local path.
#[derive(Debug, Clone)]
pub struct MatchGroup {
    pub local_path: PathBuf,
    /// In listing order.
    pub candidates: Vec<RemoteEntry>,
    /// Size of the existing local file, if any.
    pub local_size: Option<u64>,
}

impl MatchGroup {
    /// The newest candidate; on equal timestamps the first one listed wins.
    pub fn selected(&self) -> Option<&RemoteEntry> {
        self.candidates.iter().fold(None, |best, c| match best {
            Some(b) if b.modified_at >= c.modified_at => Some(b),
            _ => Some(c),
        })
    }

    /// Why this group has to be downloaded, or `None` when the local copy is current.
    pub fn download_reason(&self) -> Option<DownloadReason> {
        let selected = self.selected()?;
        match self.local_size {
            None => Some(DownloadReason::New),
            Some(size) if size != selected.size => Some(DownloadReason::SizeMismatch),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DownloadReason {
    /// No local file yet.
    New,
    /// Local file exists with a different size (corrupted or updated upstream).
    SizeMismatch,
}

/// A group the matcher decided to download.
#[derive(Debug, Clone)]
pub struct PlannedDownload {
    pub remote_path: String,
    pub local_path: PathBuf,
    pub expected_size: u64,
    pub reason: DownloadReason,
}

// ─── Results / reports ───────────────────────────────────────────────

/// Outcome of one target within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "result", content = "message")]
pub enum TargetResult {
    FilesDownloaded,
    NoDownloadsDetected,
    Aborted,
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetReport {
    pub target_id: String,
    pub result: TargetResult,
    pub downloaded: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets: Vec<TargetReport>,
}

impl RunReport {
    pub fn downloaded_any(&self) -> bool {
        self.targets
            .iter()
            .any(|t| t.result == TargetResult::FilesDownloaded)
    }

    pub fn result_of(&self, target_id: &str) -> Option<&TargetResult> {
        self.targets
            .iter()
            .find(|t| t.target_id == target_id)
            .map(|t| &t.result)
    }
}

/// What `run()` did.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Another run was already in progress; nothing happened.
    AlreadyRunning,
    /// No remote session could be obtained.
    ConnectionFailed(String),
    Finished(RunReport),
}

// ─── Progress / pool ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub file_name: String,
    pub transferred: u64,
    pub expected: u64,
    /// Not clamped: a remote file that grew mid-transfer reads above 100.
    pub percent: f64,
    pub bytes_per_sec: f64,
    pub percentage_text: String,
    pub throughput_text: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub open: usize,
    pub borrowed: usize,
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(name: &str, size: u64, minute: u32) -> RemoteEntry {
        RemoteEntry {
            name: name.into(),
            size,
            modified_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, minute, 0).unwrap(),
            is_directory: false,
        }
    }

    fn group(candidates: Vec<RemoteEntry>, local_size: Option<u64>) -> MatchGroup {
        MatchGroup {
            local_path: PathBuf::from("/tmp/x"),
            candidates,
            local_size,
        }
    }

    #[test]
    fn selects_newest_candidate() {
        let g = group(vec![entry("a", 1, 5), entry("b", 2, 9), entry("c", 3, 1)], None);
        assert_eq!(g.selected().unwrap().name, "b");
    }

    #[test]
    fn tie_keeps_first_seen() {
        let g = group(vec![entry("a", 1, 5), entry("b", 2, 5)], None);
        assert_eq!(g.selected().unwrap().name, "a");
    }

    #[test]
    fn download_decision_follows_local_size() {
        assert_eq!(
            group(vec![entry("a", 10, 0)], None).download_reason(),
            Some(DownloadReason::New)
        );
        assert_eq!(
            group(vec![entry("a", 10, 0)], Some(4)).download_reason(),
            Some(DownloadReason::SizeMismatch)
        );
        assert_eq!(group(vec![entry("a", 10, 0)], Some(10)).download_reason(), None);
    }

    #[test]
    fn target_result_serializes_tagged() {
        let json = serde_json::to_string(&TargetResult::Error("boom".into())).unwrap();
        assert_eq!(json, r#"{"result":"error","message":"boom"}"#);
    }
}
