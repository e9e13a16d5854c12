//! ccmux — follow Claude Code transcripts and turn them into message events
//!
//! Tails the JSONL transcripts of sessions whose working directory is open in
//! a live client, reconstructs display-ready entries (text, thinking, tool
//! calls paired with their results, slash-command echoes), and hands the new
//! ones to a callback. Read offsets survive restarts.

pub mod config;
pub mod contexts;
pub mod error;
pub mod monitor;
pub mod paths;
pub mod scanner;
pub mod state;
pub mod tail;
pub mod transcript;

pub use error::{DeliveryError, MonitorError, Result};
pub use monitor::{MessageCallback, MonitorRunner, NewMessage, SessionMonitor};
