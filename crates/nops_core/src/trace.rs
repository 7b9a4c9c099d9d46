//! Trace trimming for user-facing error logs.

use crate::error::CommandError;

/// Trim `trace` to the lines from its start through the first line that
/// mentions `anchor`.
///
/// Returns `None` when the anchor never appears.
pub fn clean_trace(trace: &str, anchor: &str) -> Option<String> {
    if anchor.is_empty() {
        return None;
    }

    let lines: Vec<&str> = trace.lines().collect();
    let idx = lines.iter().position(|line| line.contains(anchor))?;
    Some(lines[..=idx].join("\n"))
}

/// Render a failure for the error log, anchored on the failing command's
/// type name.
///
/// Frames deeper than the anchor are discarded. Without trace data, or when
/// the anchor is not found, the failure is rendered unmodified.
pub fn clean_failure(error: &CommandError, anchor: &str) -> String {
    match error.trace() {
        Some(trace) => clean_trace(&trace, anchor).unwrap_or(trace),
        None => error.to_string(),
    }
}
