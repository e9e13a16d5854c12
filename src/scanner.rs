//! Discovery of the transcripts worth polling.
//!
//! Claude Code keeps one directory per project under the projects root, each
//! holding `<session_id>.jsonl` transcripts and, usually, a
//! `sessions-index.json` that maps session ids to files and project paths.
//! The index is authoritative; transcripts it doesn't mention are picked up
//! by globbing and their project path is derived from the file itself.

use crate::paths::{
    SESSIONS_INDEX_FILE, decode_project_dir_name, is_jsonl, mtime_secs, normalize_path,
    session_id_from_path,
};
use crate::transcript::read_cwd_from_jsonl;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A transcript whose project is currently active.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub session_id: String,
    pub file_path: PathBuf,
    /// Seconds since the Unix epoch, as reported by the index or the filesystem.
    pub file_mtime: f64,
    /// Project path as recorded (not normalized).
    pub project_path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionsIndex {
    #[serde(default)]
    entries: Option<Vec<IndexEntry>>,
    #[serde(default)]
    original_path: Option<String>,
}

/// Every field may be missing or `null`; one bad entry must not void the
/// whole index.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    full_path: Option<String>,
    #[serde(default)]
    file_mtime: Option<f64>,
    #[serde(default)]
    project_path: Option<String>,
}

/// List the sessions under `projects_path` whose project is in `active_cwds`.
///
/// `active_cwds` must already be normalized. An empty set means nothing is
/// attached, so nothing is scanned.
pub async fn scan_projects(projects_path: &Path, active_cwds: &HashSet<String>) -> Vec<SessionInfo> {
    if active_cwds.is_empty() {
        return Vec::new();
    }

    let mut sessions = Vec::new();
    for project_dir in project_dirs(projects_path).await {
        scan_project_dir(&project_dir, active_cwds, &mut sessions).await;
    }
    sessions
}

async fn project_dirs(projects_path: &Path) -> Vec<PathBuf> {
    let Ok(mut rd) = tokio::fs::read_dir(projects_path).await else {
        debug!(path = %projects_path.display(), "projects directory not readable");
        return Vec::new();
    };

    let mut out = Vec::new();
    while let Ok(Some(entry)) = rd.next_entry().await {
        if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            out.push(entry.path());
        }
    }
    out.sort();
    out
}

async fn read_index(project_dir: &Path) -> Option<SessionsIndex> {
    let index_file = project_dir.join(SESSIONS_INDEX_FILE);
    let contents = match tokio::fs::read_to_string(&index_file).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            debug!(path = %index_file.display(), error = %e, "error reading sessions index");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(index) => Some(index),
        Err(e) => {
            debug!(path = %index_file.display(), error = %e, "error decoding sessions index");
            None
        }
    }
}

async fn scan_project_dir(
    project_dir: &Path,
    active_cwds: &HashSet<String>,
    sessions: &mut Vec<SessionInfo>,
) {
    let index = read_index(project_dir).await.unwrap_or_default();
    let original_path = index.original_path.unwrap_or_default();
    let mut indexed_ids: HashSet<String> = HashSet::new();

    for entry in index.entries.unwrap_or_default() {
        let (Some(session_id), Some(full_path)) = (entry.session_id, entry.full_path) else {
            continue;
        };
        if session_id.is_empty() || full_path.is_empty() {
            continue;
        }
        let project_path = entry
            .project_path
            .unwrap_or_else(|| original_path.clone());
        if !active_cwds.contains(&normalize_path(&project_path)) {
            continue;
        }

        indexed_ids.insert(session_id.clone());
        let file_path = PathBuf::from(&full_path);
        if tokio::fs::try_exists(&file_path).await.unwrap_or(false) {
            sessions.push(SessionInfo {
                session_id,
                file_path,
                file_mtime: entry.file_mtime.unwrap_or_default(),
                project_path,
            });
        }
    }

    let Ok(mut rd) = tokio::fs::read_dir(project_dir).await else {
        debug!(path = %project_dir.display(), "error listing project directory");
        return;
    };
    let mut transcripts = Vec::new();
    while let Ok(Some(entry)) = rd.next_entry().await {
        let path = entry.path();
        if is_jsonl(&path) && entry.file_type().await.is_ok_and(|t| t.is_file()) {
            transcripts.push(path);
        }
    }
    transcripts.sort();

    for path in transcripts {
        let session_id = session_id_from_path(&path);
        if indexed_ids.contains(&session_id) {
            continue;
        }

        let project_path = derive_project_path(project_dir, &path, &original_path).await;
        if !active_cwds.contains(&normalize_path(&project_path)) {
            continue;
        }

        let Ok(modified) = tokio::fs::metadata(&path).await.and_then(|m| m.modified()) else {
            continue;
        };
        sessions.push(SessionInfo {
            session_id,
            file_path: path,
            file_mtime: mtime_secs(modified),
            project_path,
        });
    }
}

/// Project path for a transcript the index doesn't cover: the index's
/// `originalPath`, else the first `cwd` in the file, else the decoded
/// directory name.
async fn derive_project_path(project_dir: &Path, transcript: &Path, original_path: &str) -> String {
    if !original_path.is_empty() {
        return original_path.to_string();
    }
    let cwd = read_cwd_from_jsonl(transcript).await;
    if !cwd.is_empty() {
        return cwd;
    }
    project_dir
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(decode_project_dir_name)
        .unwrap_or_default()
}
