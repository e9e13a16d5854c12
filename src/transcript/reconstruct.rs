//! Records → display entries.
//!
//! Claude Code writes a `tool_use` block in one assistant record and its
//! `tool_result` in a later user record, possibly in a later poll cycle. The
//! reconstructor keeps the formatted invocation summary in [`PendingTools`]
//! until the result shows up, then emits a single combined entry.
//!
//! Flush points:
//! - an assistant record flushes everything still pending before its own blocks;
//! - a user record flushes whatever its results did not resolve;
//! - the end of a batch flushes nothing: pending tools are handed back to the
//!   caller so the next cycle can still pair them.

use super::format::{
    self, LocalCommand, NO_CONTENT_PLACEHOLDER, THINKING_PLACEHOLDER, expandable_quote,
};
use super::{ContentType, ParsedEntry, Role, record_type};
use serde_json::{Map, Value};
use tracing::trace;

/// A tool invocation waiting for its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTool {
    pub tool_use_id: String,
    pub summary: String,
}

/// Per-session correlation state carried across poll cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PendingTools {
    #[default]
    Idle,
    /// Invocations in the order they were issued. Ids are unique.
    AwaitingResult(Vec<PendingTool>),
}

impl PendingTools {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Idle => 0,
            Self::AwaitingResult(tools) => tools.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, tool_use_id: &str) -> bool {
        match self {
            Self::Idle => false,
            Self::AwaitingResult(tools) => tools.iter().any(|t| t.tool_use_id == tool_use_id),
        }
    }

    /// Register an invocation. A repeated id replaces the earlier summary in place.
    pub fn insert(&mut self, tool_use_id: String, summary: String) {
        match self {
            Self::Idle => {
                *self = Self::AwaitingResult(vec![PendingTool {
                    tool_use_id,
                    summary,
                }]);
            }
            Self::AwaitingResult(tools) => {
                if let Some(existing) = tools.iter_mut().find(|t| t.tool_use_id == tool_use_id) {
                    existing.summary = summary;
                } else {
                    tools.push(PendingTool {
                        tool_use_id,
                        summary,
                    });
                }
            }
        }
    }

    /// Resolve an invocation by id, returning its summary.
    pub fn take(&mut self, tool_use_id: &str) -> Option<String> {
        let Self::AwaitingResult(tools) = self else {
            return None;
        };
        let pos = tools.iter().position(|t| t.tool_use_id == tool_use_id)?;
        let tool = tools.remove(pos);
        if tools.is_empty() {
            *self = Self::Idle;
        }
        Some(tool.summary)
    }

    /// Remove every pending invocation, in insertion order.
    pub fn drain(&mut self) -> Vec<PendingTool> {
        match std::mem::take(self) {
            Self::Idle => Vec::new(),
            Self::AwaitingResult(tools) => tools,
        }
    }
}

/// Everything one session carries from one batch to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCarry {
    pub tools: PendingTools,
    /// Slash command whose output has not been read yet.
    pub command: Option<String>,
}

impl SessionCarry {
    pub fn is_idle(&self) -> bool {
        self.tools.is_idle() && self.command.is_none()
    }
}

struct Reconstructor<'a> {
    pending: &'a mut PendingTools,
    entries: Vec<ParsedEntry>,
    /// Command name from an invocation-only record, waiting for its output.
    last_command: &'a mut Option<String>,
}

impl<'a> Reconstructor<'a> {
    fn new(pending: &'a mut PendingTools, last_command: &'a mut Option<String>) -> Self {
        Self {
            pending,
            entries: Vec::new(),
            last_command,
        }
    }

    fn push(&mut self, content_type: ContentType, text: String, tool_use_id: Option<String>) {
        self.entries.push(
            ParsedEntry::new(Role::Assistant, text, content_type).with_tool_use_id(tool_use_id),
        );
    }

    fn flush_pending(&mut self) {
        for tool in self.pending.drain() {
            self.push(ContentType::ToolUse, tool.summary, Some(tool.tool_use_id));
        }
    }

    fn apply(&mut self, record: &Value) {
        let is_user = match record_type(record) {
            Some("user") => true,
            Some("assistant") => false,
            _ => return,
        };

        let message = record.get("message").unwrap_or(&Value::Null);
        let raw_content = message.get("content").unwrap_or(&Value::Null);
        let blocks = content_blocks(raw_content);

        if is_user && self.apply_local_command(raw_content, &blocks) {
            return;
        }
        *self.last_command = None;

        if is_user {
            self.apply_user(&blocks);
        } else {
            self.apply_assistant(&blocks);
        }
    }

    /// Handle command-echo records. Returns true when the record was consumed.
    fn apply_local_command(&mut self, raw_content: &Value, blocks: &[Value]) -> bool {
        let text = match raw_content {
            Value::String(s) => s.clone(),
            _ => flatten_text(blocks),
        };
        if text.is_empty() {
            return false;
        }

        match format::detect_local_command(&text) {
            Some(LocalCommand::Output { name, stdout }) => {
                let name = name
                    .filter(|n| !n.is_empty())
                    .or_else(|| self.last_command.take());
                let formatted = format::format_local_command(name.as_deref(), &stdout);
                self.push(ContentType::LocalCommand, formatted, None);
                *self.last_command = None;
                true
            }
            Some(LocalCommand::Invocation { name }) => {
                trace!(command = %name, "local command invoked, awaiting output");
                *self.last_command = Some(name);
                true
            }
            None => false,
        }
    }

    fn apply_assistant(&mut self, blocks: &[Value]) {
        // A tool whose result never arrived before the next assistant turn
        // still gets shown.
        self.flush_pending();

        let mut has_text = false;
        for block in blocks.iter().filter(|b| b.is_object()) {
            match block_type(block) {
                "text" => {
                    let text = str_of(block, "text").trim();
                    if !text.is_empty() && text != NO_CONTENT_PLACEHOLDER {
                        self.push(ContentType::Text, text.to_string(), None);
                        has_text = true;
                    }
                }
                "tool_use" => {
                    let id = str_of(block, "id");
                    let name = block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    let empty_input = Value::Object(Map::new());
                    let input = block.get("input").unwrap_or(&empty_input);
                    let summary = format::format_tool_use_summary(name, input);
                    if id.is_empty() {
                        // Uncorrelatable: show it right away.
                        self.push(ContentType::ToolUse, summary, None);
                    } else {
                        self.pending.insert(id.to_string(), summary);
                    }
                }
                "thinking" => {
                    let thinking = str_of(block, "thinking");
                    if !thinking.is_empty() {
                        self.push(ContentType::Thinking, format::format_thinking(thinking), None);
                    } else if !has_text {
                        self.push(ContentType::Thinking, THINKING_PLACEHOLDER.to_string(), None);
                    }
                }
                _ => {}
            }
        }
    }

    fn apply_user(&mut self, blocks: &[Value]) {
        let mut user_text: Vec<String> = Vec::new();

        for block in blocks {
            if let Value::String(s) = block {
                let s = s.trim();
                if !s.is_empty() {
                    user_text.push(s.to_string());
                }
                continue;
            }
            if !block.is_object() {
                continue;
            }

            match block_type(block) {
                "tool_result" => {
                    let id = str_of(block, "tool_use_id");
                    let result =
                        format::tool_result_text(block.get("content").unwrap_or(&Value::Null));
                    match self.pending.take(id) {
                        Some(summary) => {
                            let mut text = summary;
                            if !result.is_empty() {
                                text.push('\n');
                                text.push_str(&expandable_quote(&result));
                            }
                            self.push(ContentType::ToolResult, text, Some(id.to_string()));
                        }
                        None if !result.is_empty() => {
                            self.push(
                                ContentType::ToolResult,
                                expandable_quote(&result),
                                Some(id.to_string()),
                            );
                        }
                        None => {}
                    }
                }
                "text" => {
                    let text = str_of(block, "text").trim();
                    if !text.is_empty() && !format::is_internal_markup(text) {
                        user_text.push(text.to_string());
                    }
                }
                _ => {}
            }
        }

        self.flush_pending();

        if !user_text.is_empty() {
            let combined = user_text.join("\n");
            if !format::looks_like_command_markup(&combined) {
                self.entries
                    .push(ParsedEntry::new(Role::User, combined, ContentType::Text));
            }
        }
    }

    fn finish(self) -> Vec<ParsedEntry> {
        self.entries
            .into_iter()
            .map(|mut entry| {
                entry.text = entry.text.trim().to_string();
                entry
            })
            .collect()
    }
}

/// Normalize `message.content` to a block list. A plain string becomes one
/// `text` block.
fn content_blocks(content: &Value) -> Vec<Value> {
    match content {
        Value::Array(items) => items.clone(),
        Value::String(s) if !s.is_empty() => {
            vec![serde_json::json!({ "type": "text", "text": s })]
        }
        _ => Vec::new(),
    }
}

/// Text blocks and bare strings, joined by newlines.
fn flatten_text(blocks: &[Value]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            Value::String(s) => Some(s.as_str()),
            Value::Object(_) if block_type(block) == "text" => {
                Some(str_of(block, "text")).filter(|t| !t.is_empty())
            }
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn block_type(block: &Value) -> &str {
    str_of(block, "type")
}

fn str_of<'v>(value: &'v Value, key: &str) -> &'v str {
    value.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

/// Reconstruct entries from one batch of records.
///
/// `pending` carries invocations from the previous batch in and hands
/// unresolved ones back out; entries come back in source order.
pub fn reconstruct(records: &[Value], pending: &mut PendingTools) -> Vec<ParsedEntry> {
    let mut last_command = None;
    run(records, pending, &mut last_command)
}

/// Like [`reconstruct`], but a slash command whose output lands in a later
/// batch keeps its name too.
pub fn reconstruct_session(records: &[Value], carry: &mut SessionCarry) -> Vec<ParsedEntry> {
    run(records, &mut carry.tools, &mut carry.command)
}

fn run(
    records: &[Value],
    pending: &mut PendingTools,
    last_command: &mut Option<String>,
) -> Vec<ParsedEntry> {
    let mut reconstructor = Reconstructor::new(pending, last_command);
    for record in records {
        reconstructor.apply(record);
    }
    reconstructor.finish()
}

/// Reconstruct a complete transcript: nothing is carried forward, so
/// invocations still pending at the end are emitted as standalone entries.
pub fn parse_all(records: &[Value]) -> Vec<ParsedEntry> {
    let mut pending = PendingTools::Idle;
    let mut entries = reconstruct(records, &mut pending);
    entries.extend(pending.drain().into_iter().map(|tool| {
        ParsedEntry::new(Role::Assistant, tool.summary.trim(), ContentType::ToolUse)
            .with_tool_use_id(Some(tool.tool_use_id))
    }));
    entries
}
