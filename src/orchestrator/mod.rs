//! The slash-command workflows: checkpoint, recover, done, summary and
//! pending. Each produces a plain-text [`Report`] for the assistant to read.

pub mod checkpoint;
pub mod done;
pub mod pending;
pub mod recover;
pub mod summary;

use crate::error::{FatalError, Result};
use crate::oplog::{self, OperationRecord};
use crate::session::Focus;
use crate::transcript::clip;
use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Text output of a workflow, plus whether it refused to run.
#[derive(Debug, Default)]
pub struct Report {
    messages: Vec<String>,
    refused: bool,
}

impl Report {
    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Report a precondition failure; the process exits with 1.
    pub fn refuse(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
            refused: true,
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.refused { 1 } else { 0 }
    }

    pub fn text(&self) -> String {
        self.messages.join("\n")
    }
}

/// Session ids are shown by their first eight characters.
pub fn short_id(session_id: &str) -> &str {
    clip(session_id, 8)
}

pub fn rule(width: usize) -> String {
    "=".repeat(width)
}

/// The current session: `CLAUDE_SESSION_ID`, the sidecar, then the log.
pub fn current_session(focus: &Focus, records: &[OperationRecord]) -> String {
    oplog::current_session_id(
        focus.env.session_id.as_deref(),
        &focus.paths.session_id_marker(),
        records,
    )
}

/// Sessions named in the log whose transcript exists, oldest first.
pub fn logged_transcripts(focus: &Focus, records: &[OperationRecord]) -> Result<Vec<(String, PathBuf)>> {
    let mut found = Vec::new();
    for id in oplog::session_ids_in_order(records) {
        let path = focus.transcript_path(&id)?;
        if path.is_file() {
            found.push((id, path));
        } else {
            tracing::debug!(session = %id, "no transcript on disk");
        }
    }
    Ok(found)
}

/// A transcript file in the project's transcript folder.
#[derive(Debug, Clone)]
pub struct TranscriptFile {
    pub path: PathBuf,
    pub session_id: String,
    pub modified: DateTime<Local>,
}

impl TranscriptFile {
    pub fn timestamp(&self) -> String {
        self.modified.format("%Y-%m-%d %H:%M").to_string()
    }
}

/// Main-session transcripts in `dir`, newest first. Sub-agent transcripts
/// are skipped; a missing folder has none.
pub fn transcripts_newest_first(dir: &Path) -> Result<Vec<TranscriptFile>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(FatalError::io("listing", dir, e)),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| FatalError::io("listing", dir, e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stem) = name.strip_suffix(".jsonl") else {
            continue;
        };
        if stem.starts_with("agent-") || !path.is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| FatalError::io("reading metadata of", &path, e))?;
        files.push(TranscriptFile {
            session_id: stem.to_string(),
            path,
            modified: DateTime::from(modified),
        });
    }
    files.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(files)
}

#[cfg(test)]
mod tests;
