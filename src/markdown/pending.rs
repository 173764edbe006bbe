//! The pending-issues document: auto-collected tool failures awaiting
//! human review.
//!
//! Entries are markdown blocks headed `### <timestamp> | <tool> | error`.
//! The file is only ever appended to, by atomic whole-file rewrite, until
//! it is cleared back to its header.

use crate::error::Result;
use crate::store;
use crate::transcript::{Notable, clip};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const HEADER: &str = "# Pending Issues\n\n\
> Auto-collected errors from focus session. Review during /focus:checkpoint or /focus:done.\n\n\
## Unprocessed\n\n";

/// One failure to be written to the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIssue {
    pub timestamp: String,
    pub tool: String,
    pub session_id: String,
    pub snippet: String,
    pub file_path: Option<String>,
    pub command: Option<String>,
}

impl PendingIssue {
    /// The pending entry for a failed operation; `None` for other notables.
    /// Failures recorded without a session fall back to `default_session`.
    pub fn from_notable(notable: &Notable, default_session: &str) -> Option<Self> {
        let Notable::Failed {
            tool,
            session_id,
            timestamp,
            snippet,
            file_path,
            command,
            ..
        } = notable
        else {
            return None;
        };
        let session_id = if session_id.is_empty() {
            default_session
        } else {
            session_id
        };
        Some(Self {
            timestamp: timestamp.clone(),
            tool: tool.clone(),
            session_id: session_id.to_string(),
            snippet: snippet.clone(),
            file_path: file_path.clone(),
            command: command.clone(),
        })
    }

    fn render(&self) -> String {
        let session = match clip(&self.session_id, 8) {
            "" => "unknown",
            s => s,
        };
        let mut out = format!(
            "\n### {} | {} | error\n- **Session**: {session}\n",
            self.timestamp, self.tool
        );
        if let Some(file) = self.file_path.as_deref().filter(|f| !f.is_empty()) {
            out.push_str(&format!("- **File**: `{}`\n", one_line(file)));
        }
        if let Some(cmd) = self.command.as_deref().filter(|c| !c.is_empty()) {
            out.push_str(&format!("- **Command**: `{}`\n", one_line(clip(cmd, 150))));
        }
        out.push_str(&format!("- **Error**: {}\n", one_line(clip(&self.snippet, 200))));
        out
    }
}

fn one_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ").replace('`', "'")
}

/// An entry read back from the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedIssue {
    pub timestamp: String,
    pub tool: String,
    pub kind: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Issues sharing a tool and, for some tools, a finer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueGroup {
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subgroup: Option<String>,
    pub issues: Vec<ParsedIssue>,
}

impl IssueGroup {
    pub fn count(&self) -> usize {
        self.issues.len()
    }
}

#[derive(Debug, Clone)]
pub struct PendingDoc {
    path: PathBuf,
}

impl PendingDoc {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append entries, creating the document with its header if needed.
    pub fn append(&self, issues: &[PendingIssue]) -> Result<()> {
        if issues.is_empty() {
            return Ok(());
        }
        let mut doc = store::read_text(&self.path)?.unwrap_or_else(|| HEADER.to_string());
        for issue in issues {
            doc.push_str(&issue.render());
        }
        store::write_atomic(&self.path, doc.as_bytes())?;
        tracing::debug!(path = %self.path.display(), added = issues.len(), "pending issues appended");
        Ok(())
    }

    /// Number of entry headers in the document.
    pub fn count(&self) -> Result<usize> {
        Ok(store::read_text(&self.path)?
            .map(|doc| {
                doc.lines()
                    .filter(|l| l.starts_with("### ") && l.contains("| error"))
                    .count()
            })
            .unwrap_or(0))
    }

    pub fn parse(&self) -> Result<Vec<ParsedIssue>> {
        Ok(store::read_text(&self.path)?
            .map(|doc| parse(&doc))
            .unwrap_or_default())
    }

    /// Drop every entry, keeping the header. An absent document stays
    /// absent.
    pub fn clear(&self) -> Result<usize> {
        let removed = self.count()?;
        if self.path.exists() {
            store::write_atomic(&self.path, HEADER.as_bytes())?;
        }
        Ok(removed)
    }
}

/// Entries of a pending document. The header line is split on ` | `, so
/// timestamps in any format are accepted; blocks whose header has fewer
/// than three fields are skipped.
pub fn parse(doc: &str) -> Vec<ParsedIssue> {
    let mut issues = Vec::new();
    let mut blocks = doc.split("\n### ");
    // Text before the first entry is the document header.
    if !doc.starts_with("### ") {
        blocks.next();
    }
    for block in blocks {
        let block = block.strip_prefix("### ").unwrap_or(block);
        let (head, body) = block.split_once('\n').unwrap_or((block, ""));
        let fields: Vec<&str> = head.split(" | ").map(str::trim).collect();
        let [timestamp, tool, kind] = fields[..] else {
            continue;
        };
        issues.push(ParsedIssue {
            timestamp: timestamp.to_string(),
            tool: tool.to_string(),
            kind: kind.to_string(),
            file: backticked(body, "- **File**: "),
            command: backticked(body, "- **Command**: "),
            body: body.trim().to_string(),
        });
    }
    issues
}

fn backticked(body: &str, label: &str) -> Option<String> {
    body.lines().find_map(|line| {
        let rest = line.strip_prefix(label)?;
        let inner = rest.strip_prefix('`')?;
        let end = inner.find('`')?;
        (end > 0).then(|| inner[..end].to_string())
    })
}

fn command_word(issue: &ParsedIssue) -> String {
    issue
        .command
        .as_deref()
        .and_then(|c| c.split_whitespace().next())
        .unwrap_or("unknown")
        .to_string()
}

fn file_key(issue: &ParsedIssue) -> String {
    issue.file.clone().unwrap_or_else(|| "unknown".into())
}

/// Group issues by tool: `Bash` further by first command word, `Read`,
/// `Edit` and `Write` by file, anything else as one group per tool. Groups
/// keep first-seen order.
pub fn group(issues: &[ParsedIssue]) -> Vec<IssueGroup> {
    let mut by_tool: IndexMap<&str, Vec<&ParsedIssue>> = IndexMap::new();
    for issue in issues {
        by_tool.entry(issue.tool.as_str()).or_default().push(issue);
    }

    let mut groups = Vec::new();
    for (tool, tool_issues) in by_tool {
        let key: Option<fn(&ParsedIssue) -> String> = match tool {
            "Bash" => Some(command_word),
            "Read" | "Edit" | "Write" => Some(file_key),
            _ => None,
        };
        match key {
            Some(key) => {
                let mut sub: IndexMap<String, Vec<ParsedIssue>> = IndexMap::new();
                for issue in tool_issues {
                    sub.entry(key(issue)).or_default().push(issue.clone());
                }
                groups.extend(sub.into_iter().map(|(subgroup, issues)| IssueGroup {
                    tool: tool.to_string(),
                    subgroup: Some(subgroup),
                    issues,
                }));
            }
            None => groups.push(IssueGroup {
                tool: tool.to_string(),
                subgroup: None,
                issues: tool_issues.into_iter().cloned().collect(),
            }),
        }
    }
    groups
}
