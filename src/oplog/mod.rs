use crate::error::{FatalError, Result};
use crate::store;
use chrono::{DateTime, FixedOffset, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

// ===================================================================
// Records
// ===================================================================

/// Hook events that leave a trace in the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookType {
    PreToolUse,
    PostToolUse,
    UserPromptSubmit,
    Stop,
}

/// One line of `operations.jsonl`. Only identifiers are kept; the full
/// tool payload stays in the host's transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub hook_type: HookType,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl OperationRecord {
    /// A record stamped with the current local time.
    pub fn now(
        hook_type: HookType,
        session_id: Option<&str>,
        tool_use_id: Option<&str>,
        tool_name: Option<&str>,
    ) -> Self {
        Self {
            timestamp: Local::now().fixed_offset(),
            hook_type,
            session_id: session_id.unwrap_or_default().to_string(),
            tool_use_id: tool_use_id.map(String::from),
            tool_name: tool_name.map(String::from),
        }
    }
}

/// Outcome of pruning sessions out of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PruneReport {
    pub original: usize,
    pub removed: usize,
    pub remaining: usize,
}

// ===================================================================
// Pure operations over a loaded log
// ===================================================================

/// Unique session ids in order of first appearance. Records without a
/// session id are ignored.
pub fn session_ids_in_order(records: &[OperationRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| !r.session_id.is_empty())
        .filter(|r| seen.insert(r.session_id.as_str()))
        .map(|r| r.session_id.clone())
        .collect()
}

/// Drop every record whose session id is in `remove`, preserving the order
/// of the rest. Returns the kept records and how many were dropped.
pub fn prune_records(
    records: Vec<OperationRecord>,
    remove: &HashSet<String>,
) -> (Vec<OperationRecord>, usize) {
    let before = records.len();
    let kept: Vec<OperationRecord> = records
        .into_iter()
        .filter(|r| !remove.contains(&r.session_id))
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

/// Resolve the current session: explicit override, then the sidecar
/// marker, then the last record carrying a session id. Never fails; an
/// empty string means no signal anywhere.
pub fn current_session_id(
    override_id: Option<&str>,
    marker: &Path,
    records: &[OperationRecord],
) -> String {
    if let Some(id) = override_id.map(str::trim).filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    match fs::read_to_string(marker) {
        Ok(s) if !s.trim().is_empty() => return s.trim().to_string(),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(marker = %marker.display(), error = %e, "unreadable session marker"),
    }
    records
        .iter()
        .rev()
        .find(|r| !r.session_id.is_empty())
        .map(|r| r.session_id.clone())
        .unwrap_or_default()
}

// ===================================================================
// The on-disk log
// ===================================================================

/// `operations.jsonl`: one JSON record per line, replaced atomically on
/// every change.
#[derive(Debug, Clone)]
pub struct OperationLog {
    path: PathBuf,
}

impl OperationLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. The whole file is read and atomically rewritten
    /// so a reader never sees a torn line.
    pub fn append(&self, record: &OperationRecord) -> Result<()> {
        let mut contents = store::read_text(&self.path)?.unwrap_or_default();
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        let line = serde_json::to_string(record)
            .map_err(|e| FatalError::Internal(anyhow::Error::new(e).context("serializing operation")))?;
        contents.push_str(&line);
        contents.push('\n');
        store::write_atomic(&self.path, contents.as_bytes())
    }

    /// Every parseable record in file order. Bad lines are logged and
    /// skipped; a missing file is an empty log.
    pub fn load_all(&self) -> Result<Vec<OperationRecord>> {
        let Some(contents) = store::read_text(&self.path)? else {
            return Ok(Vec::new());
        };
        Ok(parse_lines(&contents))
    }

    /// Remove all records of the given sessions. Writes only when something
    /// was removed and `dry_run` is false.
    pub fn prune(&self, remove: &HashSet<String>, dry_run: bool) -> Result<PruneReport> {
        let records = self.load_all()?;
        let original = records.len();
        let (kept, removed) = prune_records(records, remove);
        if removed > 0 && !dry_run {
            let mut contents = String::new();
            for record in &kept {
                let line = serde_json::to_string(record).map_err(|e| {
                    FatalError::Internal(anyhow::Error::new(e).context("serializing operation"))
                })?;
                contents.push_str(&line);
                contents.push('\n');
            }
            store::write_atomic(&self.path, contents.as_bytes())?;
            tracing::info!(removed, remaining = kept.len(), "pruned operation log");
        }
        Ok(PruneReport {
            original,
            removed,
            remaining: kept.len(),
        })
    }
}

fn parse_lines(contents: &str) -> Vec<OperationRecord> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(i, line)| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(line = i + 1, error = %e, "skipping malformed operation record");
                None
            }
        })
        .collect()
}
