//! Line-offset tailing of transcript files.
//!
//! A session's read position is a count of complete (newline-terminated)
//! lines. A trailing fragment without `\n` is a record still being written:
//! it is neither decoded nor counted until the writer finishes it.

use crate::error::Result;
use crate::state::TrackedSession;
use crate::transcript::parse_line;
use serde_json::Value;
use std::path::Path;
use tracing::{info, trace};

/// Split `bytes` into its complete lines, dropping any unterminated tail.
fn complete_lines(bytes: &[u8]) -> Vec<&[u8]> {
    let Some(end) = bytes.iter().rposition(|b| *b == b'\n') else {
        return Vec::new();
    };
    bytes[..end].split(|b| *b == b'\n').collect()
}

/// Number of complete lines currently in the file.
pub async fn count_lines(path: &Path) -> Result<usize> {
    let bytes = tokio::fs::read(path).await?;
    Ok(complete_lines(&bytes).len())
}

/// Decode the records appended since `session.last_line_count` and advance it.
///
/// If the file now holds fewer lines than remembered it was truncated or
/// rewritten (e.g. `/clear`), so the offset resets and the whole file is read
/// again. Undecodable lines still advance the offset. On I/O error the
/// session is left untouched so the next cycle retries.
pub async fn read_new_records(session: &mut TrackedSession) -> Result<Vec<Value>> {
    let bytes = tokio::fs::read(&session.file_path).await?;
    let lines = complete_lines(&bytes);

    if lines.len() < session.last_line_count {
        info!(
            session_id = %session.session_id,
            had = session.last_line_count,
            now = lines.len(),
            "transcript truncated; resetting offset"
        );
        session.last_line_count = 0;
    }

    let mut records = Vec::new();
    let mut line_count = session.last_line_count;
    for line in lines.iter().skip(session.last_line_count) {
        line_count += 1;
        match parse_line(&String::from_utf8_lossy(line)) {
            Some(record) => records.push(record),
            None => trace!(
                session_id = %session.session_id,
                line = line_count,
                "skipping undecodable transcript line"
            ),
        }
    }
    session.last_line_count = line_count;

    Ok(records)
}
