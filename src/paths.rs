//! Path helpers shared by the scanner, the active-context collaborators and
//! the configuration defaults.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Name of the per-project session index written by Claude Code.
pub const SESSIONS_INDEX_FILE: &str = "sessions-index.json";

/// Resolve `path` to an absolute, symlink-free string for comparison.
///
/// Falls back to a lexical absolute path when the path does not exist, and to
/// the raw input when even that fails (e.g. empty input).
pub fn normalize_path(path: &str) -> String {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved.to_string_lossy().into_owned();
    }
    match std::path::absolute(path) {
        Ok(abs) => abs.to_string_lossy().into_owned(),
        Err(_) => path.to_string(),
    }
}

/// Recover a working directory from a Claude Code project directory name.
///
/// Claude Code stores `/home/u/proj` as `-home-u-proj`. Names that don't
/// start with `-` are not encoded paths.
pub fn decode_project_dir_name(name: &str) -> Option<String> {
    name.starts_with('-').then(|| name.replace('-', "/"))
}

pub fn is_jsonl(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"))
}

/// Session id of a transcript file: its file stem (`<uuid>.jsonl`).
pub fn session_id_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Modification time as fractional seconds since the Unix epoch.
pub fn mtime_secs(modified: SystemTime) -> f64 {
    modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// `~/.claude/projects`, where Claude Code keeps one directory per project.
pub fn claude_projects_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join("projects")
}

/// ccmux config directory (e.g. `~/.config/ccmux/`).
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ccmux"))
}

/// ccmux data directory (e.g. `~/.local/share/ccmux/`).
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("ccmux"))
}
