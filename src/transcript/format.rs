//! Display formatting for reconstructed entries: tool summaries, collapsible
//! quotes, and local command echoes.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Text Claude Code writes for an assistant turn with nothing to show.
pub const NO_CONTENT_PLACEHOLDER: &str = "(no content)";

/// Entry text used when a thinking block carries no readable content.
pub const THINKING_PLACEHOLDER: &str = "💭 (thinking)";

static COMMAND_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<command-name>(.*?)</command-name>").expect("command-name regex is valid")
});

static LOCAL_STDOUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<local-command-stdout>(.*?)</local-command-stdout>")
        .expect("local-command-stdout regex is valid")
});

static INTERNAL_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(bash-input|bash-stdout|bash-stderr|local-command-caveat|system-reminder)")
        .expect("internal tag regex is valid")
});

/// A user record that echoes a slash command typed into the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand {
    /// Command output arrived (the name may be in this record or the previous one).
    Output {
        name: Option<String>,
        stdout: String,
    },
    /// Only the invocation; output follows in a later record.
    Invocation { name: String },
}

/// Detect command-echo markup in the flattened text of a user record.
pub fn detect_local_command(text: &str) -> Option<LocalCommand> {
    let name = COMMAND_NAME
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    if let Some(stdout) = LOCAL_STDOUT.captures(text).and_then(|c| c.get(1)) {
        return Some(LocalCommand::Output {
            name,
            stdout: stdout.as_str().trim().to_string(),
        });
    }

    name.map(|name| LocalCommand::Invocation { name })
}

/// True when the text contains command-echo markup of either kind.
pub fn looks_like_command_markup(text: &str) -> bool {
    LOCAL_STDOUT.is_match(text) || COMMAND_NAME.is_match(text)
}

/// True for text blocks the CLI injects itself (shell echoes, caveats, reminders).
pub fn is_internal_markup(text: &str) -> bool {
    INTERNAL_TAGS.is_match(text)
}

/// Render command output as inline code, fenced when it spans lines.
pub fn format_local_command(name: Option<&str>, output: &str) -> String {
    let multiline = output.contains('\n');
    match name.filter(|n| !n.is_empty()) {
        Some(cmd) if multiline => format!("❯ `{cmd}`\n```\n{output}\n```"),
        Some(cmd) => format!("❯ `{cmd}`\n`{output}`"),
        None if multiline => format!("```\n{output}\n```"),
        None => format!("`{output}`"),
    }
}

/// Quote every line and mark the block collapsible.
pub fn expandable_quote(text: &str) -> String {
    let mut quoted = text
        .split('\n')
        .map(|line| format!(">{line}"))
        .collect::<Vec<_>>()
        .join("\n");
    quoted.push_str("||");
    quoted
}

pub fn format_thinking(text: &str) -> String {
    format!("💭\n{}", expandable_quote(text))
}

fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// One-line summary of a `tool_use` block, keyed by tool name.
pub fn format_tool_use_summary(name: &str, input: &Value) -> String {
    let Some(fields) = input.as_object() else {
        return format!("🔧 {name}");
    };

    let summary = match name {
        "Read" | "Glob" => str_field(input, "file_path").or_else(|| str_field(input, "pattern")),
        "Write" => str_field(input, "file_path"),
        "Edit" | "NotebookEdit" => {
            str_field(input, "file_path").or_else(|| str_field(input, "notebook_path"))
        }
        "Bash" => str_field(input, "command"),
        "Grep" => str_field(input, "pattern"),
        "Task" => str_field(input, "description"),
        "WebFetch" => str_field(input, "url"),
        "WebSearch" => str_field(input, "query"),
        _ => fields
            .values()
            .find_map(|v| v.as_str().filter(|s| !s.is_empty())),
    };

    match summary {
        Some(summary) => format!("🔧 **{name}** `{summary}`"),
        None => format!("🔧 **{name}**"),
    }
}

/// Flatten a `tool_result` content payload to text.
pub fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.as_str()),
                Value::Object(_) if item.get("type").and_then(|t| t.as_str()) == Some("text") => {
                    str_field(item, "text")
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}
