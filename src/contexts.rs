//! Which working directories have a live client right now.
//!
//! The scanner only looks at transcripts whose project path is in this set,
//! so poll cost stays proportional to the sessions someone is attached to.

use crate::paths::normalize_path;
use std::collections::HashSet;
use std::process::Command;
use tracing::debug;

pub trait ActiveContexts: Send + Sync {
    /// Normalized absolute paths of every active working directory.
    fn active_cwds(&self) -> HashSet<String>;
}

impl<T: ActiveContexts + ?Sized> ActiveContexts for Box<T> {
    fn active_cwds(&self) -> HashSet<String> {
        (**self).active_cwds()
    }
}

/// A fixed set of directories, normalized once up front.
#[derive(Debug, Clone, Default)]
pub struct FixedContexts {
    cwds: HashSet<String>,
}

impl FixedContexts {
    pub fn new<I, S>(cwds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            cwds: cwds
                .into_iter()
                .map(|cwd| normalize_path(cwd.as_ref()))
                .collect(),
        }
    }
}

impl ActiveContexts for FixedContexts {
    fn active_cwds(&self) -> HashSet<String> {
        self.cwds.clone()
    }
}

/// Current directories of every tmux pane on the default server.
#[derive(Debug, Clone, Default)]
pub struct TmuxContexts;

impl ActiveContexts for TmuxContexts {
    fn active_cwds(&self) -> HashSet<String> {
        let output = match Command::new("tmux")
            .args(["list-panes", "-a", "-F", "#{pane_current_path}"])
            .output()
        {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                debug!(status = %output.status, "tmux list-panes failed");
                return HashSet::new();
            }
            Err(e) => {
                debug!(error = %e, "could not run tmux");
                return HashSet::new();
            }
        };
        parse_pane_paths(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_pane_paths(output: &str) -> HashSet<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(normalize_path)
        .collect()
}
