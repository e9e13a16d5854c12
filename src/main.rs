//! ccmux — Claude Code transcript monitor
//!
//! `watch` streams new assistant messages as JSON lines, `history` replays a
//! transcript, `sessions` lists the transcripts of active projects.

use ccmux::config::{MonitorConfig, load_config};
use ccmux::contexts::{ActiveContexts, FixedContexts, TmuxContexts};
use ccmux::transcript::{history_page, parse_all, read_transcript};
use ccmux::{DeliveryError, MonitorRunner, SessionMonitor, scanner};
use chrono::{DateTime, Local};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "ccmux", about = "Claude Code transcript monitor")]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Poll active sessions and print new messages as JSON lines
    Watch {
        /// Active working directory (repeatable); defaults to tmux panes
        #[arg(long = "cwd", value_name = "DIR")]
        cwds: Vec<String>,
        /// Claude Code projects directory
        #[arg(long, value_name = "PATH")]
        projects: Option<PathBuf>,
        /// Where read offsets are persisted
        #[arg(long, value_name = "PATH")]
        state_file: Option<PathBuf>,
        /// Poll interval in seconds
        #[arg(long, value_name = "SECS", value_parser = parse_secs)]
        interval: Option<Duration>,
    },
    /// Print the reconstructed entries of one transcript
    History {
        file: PathBuf,
        /// Entries per page (0 = all)
        #[arg(long, default_value_t = 0)]
        count: usize,
        /// Skip this many of the newest entries
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// List transcripts of active projects
    Sessions {
        /// Active working directory (repeatable); defaults to tmux panes
        #[arg(long = "cwd", value_name = "DIR")]
        cwds: Vec<String>,
        /// Claude Code projects directory
        #[arg(long, value_name = "PATH")]
        projects: Option<PathBuf>,
    },
}

fn parse_secs(raw: &str) -> Result<Duration, String> {
    ccmux::config::parse_interval(raw).ok_or_else(|| format!("not a positive number of seconds: {raw}"))
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_env("CCMUX_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn contexts_for(cwds: &[String]) -> Box<dyn ActiveContexts> {
    if cwds.is_empty() {
        Box::new(TmuxContexts)
    } else {
        Box::new(FixedContexts::new(cwds))
    }
}

async fn watch(config: MonitorConfig, cwds: Vec<String>) -> Result<(), String> {
    let mut monitor = SessionMonitor::new(config, contexts_for(&cwds));
    monitor.set_message_callback(|msg| {
        let line = serde_json::to_string(msg).map_err(|e| DeliveryError::new(e.to_string()))?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    });

    let mut runner = MonitorRunner::new(monitor);
    runner.start();

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for ctrl-c: {e}"))?;
    info!("interrupted; stopping");
    runner.stop().await;
    Ok(())
}

async fn history(file: PathBuf, count: usize, offset: usize) -> Result<(), String> {
    let records = read_transcript(&file)
        .await
        .map_err(|e| format!("{}: {e}", file.display()))?;
    let entries = parse_all(&records);
    let (page, total) = history_page(&entries, count, offset);

    let mut out = std::io::stdout().lock();
    for entry in page {
        writeln!(out, "{}: {}", entry.role.as_str(), entry.text).map_err(|e| e.to_string())?;
    }
    if count > 0 {
        writeln!(out, "({} of {total} entries)", page.len()).map_err(|e| e.to_string())?;
    }
    Ok(())
}

async fn sessions(projects_path: PathBuf, cwds: Vec<String>) -> Result<(), String> {
    let active = contexts_for(&cwds).active_cwds();
    let mut out = std::io::stdout().lock();
    for session in scanner::scan_projects(&projects_path, &active).await {
        let modified = tokio::fs::metadata(&session.file_path)
            .await
            .and_then(|m| m.modified())
            .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|_| "-".to_string());
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            session.session_id,
            session.project_path,
            modified,
            session.file_path.display()
        )
        .map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("ccmux: failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = rt.block_on(async move {
        match cli.command {
            Command::Watch {
                cwds,
                projects,
                state_file,
                interval,
            } => {
                let mut config = load_config().with_env();
                if let Some(path) = projects {
                    config.projects_path = path;
                }
                if let Some(path) = state_file {
                    config.state_file = path;
                }
                if let Some(interval) = interval {
                    config.poll_interval = interval;
                }
                watch(config, cwds).await
            }
            Command::History {
                file,
                count,
                offset,
            } => history(file, count, offset).await,
            Command::Sessions { cwds, projects } => {
                let projects =
                    projects.unwrap_or_else(|| load_config().with_env().projects_path);
                sessions(projects, cwds).await
            }
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ccmux: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["ccmux"]).is_err());
    }

    #[test]
    fn cli_verbose_after_subcommand() {
        let cli = Cli::try_parse_from(["ccmux", "watch", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn cli_watch_flags() {
        let cli = Cli::try_parse_from([
            "ccmux", "watch", "--cwd", "/a", "--cwd", "/b", "--interval", "0.5", "--state-file",
            "/tmp/s.json",
        ])
        .unwrap();
        match cli.command {
            Command::Watch {
                cwds,
                interval,
                state_file,
                projects,
            } => {
                assert_eq!(cwds, ["/a", "/b"]);
                assert_eq!(interval, Some(Duration::from_millis(500)));
                assert_eq!(state_file, Some(PathBuf::from("/tmp/s.json")));
                assert!(projects.is_none());
            }
            _ => panic!("expected Watch command"),
        }
    }

    #[test]
    fn cli_rejects_zero_interval() {
        assert!(Cli::try_parse_from(["ccmux", "watch", "--interval", "0"]).is_err());
    }

    #[test]
    fn cli_history_paging() {
        let cli =
            Cli::try_parse_from(["ccmux", "history", "s.jsonl", "--count", "5", "--offset", "10"])
                .unwrap();
        match cli.command {
            Command::History {
                file,
                count,
                offset,
            } => {
                assert_eq!(file, PathBuf::from("s.jsonl"));
                assert_eq!((count, offset), (5, 10));
            }
            _ => panic!("expected History command"),
        }
    }

    #[test]
    fn cli_sessions_defaults() {
        let cli = Cli::try_parse_from(["ccmux", "sessions"]).unwrap();
        assert!(matches!(cli.command, Command::Sessions { ref cwds, .. } if cwds.is_empty()));
    }

    #[test]
    fn projects_dir_default_is_under_home() {
        assert!(ccmux::paths::claude_projects_dir().ends_with(".claude/projects"));
    }
}
