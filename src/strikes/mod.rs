//! Three-strike protocol: consecutive failures of the same operation
//! escalate from "diagnose" to "change approach" to "ask the user".

use crate::error::Result;
use crate::metadata::{FailureCounts, FailureEntry};
use crate::store;
use crate::transcript::clip;
use serde_json::Value;
use std::path::Path;

/// `tool:target`, where the target is the first of `file_path`, `path` or
/// the first 50 characters of `command`.
pub fn operation_key(tool_name: &str, tool_input: &Value) -> String {
    let field = |name: &str| {
        tool_input
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    };
    let target = field("file_path")
        .or_else(|| field("path"))
        .or_else(|| field("command").map(|c| clip(c, 50)))
        .unwrap_or("unknown");
    format!("{tool_name}:{target}")
}

/// Whether a tool response reports a failure, and a lower-cased snippet of
/// the error if so.
///
/// Object responses are judged by their `error` field alone, never by the
/// result body, since file contents routinely contain error-like words.
pub fn detect_failure(response: &Value, patterns: &[String]) -> Option<String> {
    match response {
        Value::Null => None,
        Value::Object(map) => {
            let error = match map.get("error")? {
                Value::Null | Value::Bool(false) => return None,
                Value::String(s) if s.is_empty() => return None,
                Value::String(s) => s.to_lowercase(),
                other => other.to_string().to_lowercase(),
            };
            patterns
                .iter()
                .any(|p| error.contains(&p.to_lowercase()))
                .then(|| clip(&error, 120).to_string())
        }
        other => {
            let text = match other {
                Value::String(s) => s.to_lowercase(),
                v => v.to_string().to_lowercase(),
            };
            if text.is_empty() {
                return None;
            }
            patterns.iter().find_map(|p| {
                let idx = text.find(&p.to_lowercase())?;
                let start = floor_char_boundary(&text, idx.saturating_sub(20));
                let prefix_chars = text[start..idx].chars().count();
                Some(clip(&text[start..], prefix_chars + 100).to_string())
            })
        }
    }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Apply one outcome to `counts`. A failure bumps the key and returns the
/// new count; a success removes the key. Returns `(changed, count)`.
pub fn record_outcome(counts: &mut FailureCounts, key: &str, failure: Option<String>) -> (bool, Option<u32>) {
    match failure {
        Some(snippet) => {
            let entry = counts.entry(key.to_string()).or_insert_with(|| FailureEntry {
                count: 0,
                last_error: String::new(),
            });
            entry.count += 1;
            entry.last_error = snippet;
            (true, Some(entry.count))
        }
        None => (counts.remove(key).is_some(), None),
    }
}

/// Escalating message for the `count`-th consecutive failure.
pub fn strike_message(key: &str, count: u32, max_strikes: u32) -> String {
    let max = max_strikes.max(1);
    if count >= max {
        format!(
            "\n[focus] [!!!] STRIKE {max}/{max}: ESCALATE TO USER\n{key}\n\
             → Broader Rethink required\n\
             → Ask user for guidance before proceeding\n\
             → Record this issue in focus_context.md Issues table\n"
        )
    } else if count == 1 {
        format!("\n[focus] [!] STRIKE 1/{max}: Operation failed\n{key}\n→ Diagnose & Fix the issue\n")
    } else {
        format!(
            "\n[focus] [!!] STRIKE {count}/{max}: Same operation failed again!\n{key}\n\
             → MUST use Alternative Approach (NEVER repeat same action)\n"
        )
    }
}

/// Classify a post-tool response, update the persisted counters and return
/// the strike message, if any. Unchanged counters are not rewritten.
pub fn check_and_update(
    failures_path: &Path,
    tool_name: &str,
    tool_input: &Value,
    tool_response: &Value,
    patterns: &[String],
    max_strikes: u32,
) -> Result<Option<String>> {
    let failure = detect_failure(tool_response, patterns);
    let key = operation_key(tool_name, tool_input);
    let mut counts: FailureCounts = store::load(failures_path)?;

    let (changed, count) = record_outcome(&mut counts, &key, failure);
    if changed {
        store::save(failures_path, &counts)?;
    }
    if let Some(count) = count {
        tracing::info!(key = %key, count, "tool failure recorded");
    }
    Ok(count.map(|n| strike_message(&key, n, max_strikes)))
}
