//! Durable per-session read offsets.
//!
//! The state file maps `session_id` to the file being tailed, the last
//! observed mtime, and how many lines have been consumed. It is rewritten
//! atomically and only when something changed, so a crash can at worst
//! replay lines that were already delivered.

use crate::config::atomic_write;
use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{debug, warn};

/// One transcript file under observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedSession {
    pub session_id: String,
    pub file_path: String,
    /// Seconds since the Unix epoch.
    pub last_mtime: f64,
    pub last_line_count: usize,
    pub project_path: String,
}

/// On-disk shape of a tracked session (the id is the map key).
#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    last_mtime: f64,
    #[serde(default)]
    last_line_count: usize,
    #[serde(default)]
    project_path: String,
}

impl From<&TrackedSession> for PersistedSession {
    fn from(s: &TrackedSession) -> Self {
        Self {
            file_path: s.file_path.clone(),
            last_mtime: s.last_mtime,
            last_line_count: s.last_line_count,
            project_path: s.project_path.clone(),
        }
    }
}

#[derive(Debug)]
pub struct MonitorState {
    path: PathBuf,
    sessions: HashMap<String, TrackedSession>,
    dirty: bool,
}

impl MonitorState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sessions: HashMap::new(),
            dirty: false,
        }
    }

    /// Replace in-memory state with the contents of the state file.
    ///
    /// A missing or undecodable file leaves the state empty; startup never
    /// fails because of it.
    pub fn load(&mut self) {
        self.sessions.clear();
        self.dirty = false;

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no monitor state yet");
                return;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read monitor state; starting empty");
                return;
            }
        };

        let persisted: BTreeMap<String, PersistedSession> = match serde_json::from_str(&contents)
        {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to decode monitor state; starting empty");
                return;
            }
        };

        self.sessions = persisted
            .into_iter()
            .map(|(session_id, p)| {
                let session = TrackedSession {
                    session_id: session_id.clone(),
                    file_path: p.file_path,
                    last_mtime: p.last_mtime,
                    last_line_count: p.last_line_count,
                    project_path: p.project_path,
                };
                (session_id, session)
            })
            .collect();
        debug!(path = %self.path.display(), sessions = self.sessions.len(), "loaded monitor state");
    }

    pub fn get(&self, session_id: &str) -> Option<&TrackedSession> {
        self.sessions.get(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Replace one session's record and mark the state dirty.
    pub fn update(&mut self, session: TrackedSession) {
        self.sessions.insert(session.session_id.clone(), session);
        self.dirty = true;
    }

    /// Persist only if something changed since the last successful save.
    ///
    /// Returns whether a write happened. On failure the state stays dirty.
    pub fn save_if_dirty(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Persist unconditionally.
    pub fn save(&mut self) -> Result<()> {
        let persisted: BTreeMap<&str, PersistedSession> = self
            .sessions
            .iter()
            .map(|(id, s)| (id.as_str(), PersistedSession::from(s)))
            .collect();
        let json = serde_json::to_string_pretty(&persisted)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| MonitorError::Persist {
                path: self.path.clone(),
                source,
            })?;
        }
        atomic_write(&self.path, json.as_bytes()).map_err(|source| MonitorError::Persist {
            path: self.path.clone(),
            source,
        })?;

        self.dirty = false;
        debug!(path = %self.path.display(), sessions = self.sessions.len(), "saved monitor state");
        Ok(())
    }
}
