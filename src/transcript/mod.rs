//! Claude Code transcript records and the entries reconstructed from them.
//!
//! A transcript is a JSONL file with one record per line. Only `user` and
//! `assistant` records matter here; `message.content` is either a plain
//! string or a list of typed blocks (`text`, `thinking`, `tool_use`,
//! `tool_result`).

pub mod format;
pub mod reconstruct;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

pub use reconstruct::{
    PendingTool, PendingTools, SessionCarry, parse_all, reconstruct, reconstruct_session,
};

/// Who a reconstructed entry is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Kind of content an entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    Thinking,
    ToolUse,
    ToolResult,
    LocalCommand,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Thinking => "thinking",
            Self::ToolUse => "tool_use",
            Self::ToolResult => "tool_result",
            Self::LocalCommand => "local_command",
        }
    }
}

/// A display-ready message fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedEntry {
    pub role: Role,
    pub text: String,
    pub content_type: ContentType,
    /// Correlation id of the tool invocation this entry belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
}

impl ParsedEntry {
    pub fn new(role: Role, text: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            role,
            text: text.into(),
            content_type,
            tool_use_id: None,
        }
    }

    pub fn with_tool_use_id(mut self, id: Option<String>) -> Self {
        self.tool_use_id = id.filter(|id| !id.is_empty());
        self
    }
}

/// Decode one transcript line. Blank or malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Record type (`user`, `assistant`, `summary`, ...).
pub fn record_type(record: &Value) -> Option<&str> {
    record.get("type").and_then(|v| v.as_str())
}

/// Working directory recorded on a transcript record, if non-empty.
pub fn record_cwd(record: &Value) -> Option<&str> {
    record
        .get("cwd")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// Decode every line of a transcript, skipping malformed ones.
pub async fn read_transcript(path: &Path) -> Result<Vec<Value>> {
    let contents = tokio::fs::read(path).await?;
    Ok(String::from_utf8_lossy(&contents)
        .lines()
        .filter_map(parse_line)
        .collect())
}

/// The `cwd` of the first record that carries one, or an empty string.
pub async fn read_cwd_from_jsonl(path: &Path) -> String {
    use tokio::io::AsyncBufReadExt;

    let Ok(file) = tokio::fs::File::open(path).await else {
        return String::new();
    };
    let mut lines = tokio::io::BufReader::new(file).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(cwd) = parse_line(&line).as_ref().and_then(record_cwd) {
            return cwd.to_string();
        }
    }
    String::new()
}

/// Page through entries newest-last: the window ends `offset` entries before
/// the end and holds at most `count` entries (`count == 0` means all).
///
/// Returns the window and the total number of entries.
pub fn history_page(entries: &[ParsedEntry], count: usize, offset: usize) -> (&[ParsedEntry], usize) {
    let total = entries.len();
    if count == 0 {
        return (entries, total);
    }
    let Some(end) = total.checked_sub(offset).filter(|end| *end > 0) else {
        return (&[], total);
    };
    let start = end.saturating_sub(count);
    (&entries[start..end], total)
}
