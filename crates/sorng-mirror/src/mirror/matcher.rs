//! Matcher & renamer: decides which remote files a target needs.

use crate::mirror::error::SyncResult;
use crate::mirror::remote::RemoteSession;
use crate::mirror::status::StatusBroadcaster;
use crate::mirror::template::{render, uses_captures, TemplateContext};
use crate::mirror::types::{DownloadReason, MatchGroup, PlannedDownload, RemoteEntry, SyncTarget};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Local folder for a target with only `{{$syncName}}` resolved.
pub fn destination_root(target: &SyncTarget) -> PathBuf {
    PathBuf::from(render(
        &target.destination_folder,
        &TemplateContext {
            captures: None,
            sync_name: &target.id,
        },
    ))
}

/// The destination folder when it is the same for every file, i.e. it does
/// not depend on a capture group of the file name.
pub fn fixed_destination(target: &SyncTarget) -> Option<PathBuf> {
    if target.rename && uses_captures(&target.destination_folder) {
        return None;
    }
    Some(destination_root(target))
}

/// Compile a target's pattern; `None` when renaming is off.
pub fn compile_pattern(target: &SyncTarget) -> SyncResult<Option<Regex>> {
    if !target.rename {
        return Ok(None);
    }
    Ok(Some(Regex::new(target.regex.as_deref().unwrap_or_default())?))
}

/// Rendered local path for a remote name, or `None` when the name is excluded.
pub fn local_path_for(target: &SyncTarget, pattern: Option<&Regex>, name: &str) -> Option<PathBuf> {
    let Some(re) = pattern else {
        return Some(destination_root(target).join(name));
    };
    let caps = re.captures(name)?;
    let ctx = TemplateContext {
        captures: Some(&caps),
        sync_name: &target.id,
    };
    let file_name = render(&target.rename_template, &ctx);
    if file_name.is_empty() {
        return None;
    }
    Some(PathBuf::from(render(&target.destination_folder, &ctx)).join(file_name))
}

/// List the target's origin and group the matching files by local path.
///
/// Groups keep the order in which their first candidate was listed, and
/// carry the size of the local file if one exists.
pub async fn match_target(
    session: &mut dyn RemoteSession,
    target: &SyncTarget,
    debug: bool,
    status: &StatusBroadcaster,
) -> SyncResult<Vec<MatchGroup>> {
    let pattern = compile_pattern(target)?;
    session.change_directory(&target.origin_folder).await?;
    let entries = session.list(&target.origin_folder).await?;

    let mut groups = group_entries(target, pattern.as_ref(), entries, |name| {
        if debug {
            status.debug(format!("[{}] {} does not match, skipped", target.id, name));
        }
    });
    for g in &mut groups {
        g.local_size = local_size(&g.local_path).await;
    }
    Ok(groups)
}

fn group_entries(
    target: &SyncTarget,
    pattern: Option<&Regex>,
    entries: Vec<RemoteEntry>,
    mut on_excluded: impl FnMut(&str),
) -> Vec<MatchGroup> {
    let mut groups: Vec<MatchGroup> = Vec::new();
    let mut index: HashMap<PathBuf, usize> = HashMap::new();

    for entry in entries.into_iter().filter(|e| !e.is_directory) {
        let Some(local_path) = local_path_for(target, pattern, &entry.name) else {
            on_excluded(&entry.name);
            continue;
        };
        match index.get(&local_path) {
            Some(&i) => groups[i].candidates.push(entry),
            None => {
                index.insert(local_path.clone(), groups.len());
                groups.push(MatchGroup {
                    local_path,
                    candidates: vec![entry],
                    local_size: None,
                });
            }
        }
    }
    groups
}

async fn local_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

/// Downloads needed for `groups`, logging why each one is fetched.
pub fn plan_downloads(
    target: &SyncTarget,
    groups: &[MatchGroup],
    status: &StatusBroadcaster,
) -> Vec<PlannedDownload> {
    groups
        .iter()
        .filter_map(|g| {
            let reason = g.download_reason()?;
            let selected = g.selected()?;
            match reason {
                DownloadReason::New => status.info(format!(
                    "[{}] New file {} -> {}",
                    target.id,
                    selected.name,
                    g.local_path.display()
                )),
                DownloadReason::SizeMismatch => status.info(format!(
                    "[{}] {} is corrupted or was updated, downloading again",
                    target.id,
                    g.local_path.display()
                )),
            }
            Some(PlannedDownload {
                remote_path: remote_path(&target.origin_folder, &selected.name),
                local_path: g.local_path.clone(),
                expected_size: selected.size,
                reason,
            })
        })
        .collect()
}

fn remote_path(origin: &str, name: &str) -> String {
    format!("{}/{}", origin.trim_end_matches('/'), name)
}
