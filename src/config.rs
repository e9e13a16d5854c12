//! Monitor configuration (`config.json`) and the atomic file writer shared
//! with the state store.
//!
//! Precedence, lowest first: built-in defaults, the config file in the
//! platform config directory, `CCMUX_*` environment variables, CLI flags.

use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const ENV_PROJECTS_PATH: &str = "CCMUX_PROJECTS_PATH";
pub const ENV_POLL_INTERVAL: &str = "CCMUX_POLL_INTERVAL";
pub const ENV_STATE_FILE: &str = "CCMUX_STATE_FILE";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Where to look for transcripts, how often, and where offsets are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Root holding one directory per Claude Code project.
    #[serde(default = "default_projects_path")]
    pub projects_path: PathBuf,
    #[serde(
        default = "default_poll_interval",
        rename = "poll_interval_secs",
        with = "duration_secs"
    )]
    pub poll_interval: Duration,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

fn default_projects_path() -> PathBuf {
    paths::claude_projects_dir()
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_state_file() -> PathBuf {
    paths::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("monitor_state.json")
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            projects_path: default_projects_path(),
            poll_interval: default_poll_interval(),
            state_file: default_state_file(),
        }
    }
}

impl MonitorConfig {
    /// Apply `CCMUX_*` overrides from the process environment.
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(ENV_PROJECTS_PATH) {
            self.projects_path = PathBuf::from(path);
        }
        if let Some(raw) = get(ENV_POLL_INTERVAL) {
            match parse_interval(&raw) {
                Some(interval) => self.poll_interval = interval,
                None => warn!(value = %raw, "ignoring invalid {ENV_POLL_INTERVAL}"),
            }
        }
        if let Some(path) = get(ENV_STATE_FILE) {
            self.state_file = PathBuf::from(path);
        }
        self
    }
}

/// Parse a positive number of seconds (fractions allowed).
pub fn parse_interval(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    if secs <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        super::parse_interval(&secs.to_string())
            .ok_or_else(|| serde::de::Error::custom("poll interval must be a positive number"))
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Path of the config file (e.g. `~/.config/ccmux/config.json`).
pub fn config_path() -> Option<PathBuf> {
    paths::config_dir().map(|d| d.join("config.json"))
}

/// Load config from disk, returning defaults if the file is missing or invalid.
pub fn load_config() -> MonitorConfig {
    let Some(path) = config_path() else {
        return MonitorConfig::default();
    };
    load_config_from(&path)
}

// ---------------------------------------------------------------------------
// Path-parameterised helpers (used by public API and tests)
// ---------------------------------------------------------------------------

pub fn load_config_from(path: &Path) -> MonitorConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "invalid config; using defaults");
            MonitorConfig::default()
        }),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no config file; using defaults");
            MonitorConfig::default()
        }
    }
}

pub fn save_config_to(config: &MonitorConfig, path: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Write bytes to a file atomically: write to a temp file in the same
/// directory, then rename over the target. Prevents partial JSON on crash.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<(), std::io::Error> {
    use std::io::Write;

    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_default_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert!(config.projects_path.ends_with(".claude/projects"));
        assert!(config.state_file.ends_with("monitor_state.json"));
    }

    #[test]
    fn config_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ccmux/config.json");

        let config = MonitorConfig {
            projects_path: PathBuf::from("/srv/projects"),
            poll_interval: Duration::from_millis(500),
            state_file: PathBuf::from("/srv/state.json"),
        };
        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path), config);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"poll_interval_secs\": 0.5"));
    }

    #[test]
    fn load_missing_file_returns_default() {
        let config = load_config_from(Path::new("/tmp/ccmux_nonexistent/config.json"));
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn load_invalid_json_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "not valid json!!!").unwrap();
        assert_eq!(load_config_from(&path), MonitorConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults_and_ignores_extra_fields() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"poll_interval_secs":5,"unknown_field":42}"#).unwrap();

        let config = load_config_from(&path);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.projects_path, MonitorConfig::default().projects_path);
    }

    #[test]
    fn non_positive_interval_in_file_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"poll_interval_secs":0}"#).unwrap();
        assert_eq!(load_config_from(&path).poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn env_overrides_apply() {
        let config = MonitorConfig::default().with_overrides(lookup(&[
            (ENV_PROJECTS_PATH, "/p"),
            (ENV_POLL_INTERVAL, "0.25"),
            (ENV_STATE_FILE, "/s.json"),
        ]));
        assert_eq!(config.projects_path, PathBuf::from("/p"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.state_file, PathBuf::from("/s.json"));
    }

    #[test]
    fn bad_env_values_are_ignored() {
        let config = MonitorConfig::default()
            .with_overrides(lookup(&[(ENV_POLL_INTERVAL, "soon"), (ENV_PROJECTS_PATH, "  ")]));
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn parse_interval_bounds() {
        assert_eq!(parse_interval("1.5"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_interval("-1"), None);
        assert_eq!(parse_interval("0"), None);
        assert_eq!(parse_interval("NaN"), None);
    }
}
