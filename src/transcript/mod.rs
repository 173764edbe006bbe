pub mod extract;
pub mod reverse;

pub use extract::{Extract, Extractor};
pub use reverse::ReverseLines;

use crate::oplog::{HookType, OperationRecord};
use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

// ===================================================================
// Transcript lines: one JSON object per line, written by the host
// ===================================================================

/// A single line of a host transcript.
///
/// Only user and assistant turns matter here; every other line type
/// (progress, snapshots, system notes) collapses into `Other`. Fields are
/// defaulted throughout because the host's format drifts between versions.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEntry {
    #[serde(rename = "user")]
    User(ConversationEntry),
    #[serde(rename = "assistant")]
    Assistant(ConversationEntry),
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationEntry {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message: Message,
}

#[derive(Debug, Default, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: MessageContent,
}

/// `message.content` is a plain string for typed user text and an array of
/// blocks for everything else.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    Other(Value),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

impl TranscriptEntry {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

impl ConversationEntry {
    /// Timestamp with its original offset, if present and well-formed.
    pub fn time(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
    }

    /// The plain-string content, when the message is not block-structured.
    pub fn plain_text(&self) -> Option<&str> {
        match &self.message.content {
            MessageContent::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.message.content {
            MessageContent::Blocks(b) => b,
            _ => &[],
        }
    }

    /// Text of every `text` block, in order.
    pub fn text_blocks(&self) -> impl Iterator<Item = &str> {
        self.blocks().iter().filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Names of every tool this turn invoked, in order.
    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.blocks().iter().filter_map(|b| match b {
            ContentBlock::ToolUse { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Flatten a tool result's `content` (a string, or an array of text
/// blocks) into plain text.
pub fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item.get("text").and_then(Value::as_str) {
                Some(t) => t.to_string(),
                None => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// First `n` characters of `s`.
pub fn clip(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

// ===================================================================
// Tool-use index: tool_use_id → what was called and how it ended
// ===================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutcome {
    pub tool_name: String,
    pub input: Value,
    pub content: Value,
    pub is_error: bool,
}

impl ToolOutcome {
    fn input_str(&self, key: &str) -> Option<&str> {
        self.input
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn file_path(&self) -> Option<&str> {
        self.input_str("file_path")
    }

    pub fn command(&self) -> Option<&str> {
        self.input_str("command")
    }
}

/// Every tool call in one transcript, joined with its result.
#[derive(Debug, Default)]
pub struct TranscriptIndex {
    by_id: HashMap<String, ToolOutcome>,
}

impl TranscriptIndex {
    /// Index the transcript at `path`. When `only` is given, tool calls with
    /// other ids are not kept. A missing or unreadable transcript yields an
    /// empty index.
    pub fn build(path: &Path, only: Option<&HashSet<String>>) -> Self {
        match File::open(path) {
            Ok(file) => Self::from_reader(BufReader::new(file), only),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "cannot open transcript");
                }
                Self::default()
            }
        }
    }

    pub fn from_reader<R: BufRead>(reader: R, only: Option<&HashSet<String>>) -> Self {
        let mut index = Self::default();
        let wanted = |id: &str| !id.is_empty() && only.is_none_or(|set| set.contains(id));

        for (i, line) in reader.split(b'\n').enumerate() {
            let line = match line {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    tracing::warn!(error = %e, "transcript read aborted");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let entry = match TranscriptEntry::parse(&line) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(line = i + 1, error = %e, "skipping unparseable transcript line");
                    continue;
                }
            };
            match entry {
                TranscriptEntry::Assistant(conv) => {
                    for block in conv.blocks() {
                        if let ContentBlock::ToolUse { id, name, input } = block
                            && wanted(id)
                        {
                            index.by_id.insert(
                                id.clone(),
                                ToolOutcome {
                                    tool_name: name.clone(),
                                    input: input.clone(),
                                    ..Default::default()
                                },
                            );
                        }
                    }
                }
                TranscriptEntry::User(conv) => {
                    for block in conv.blocks() {
                        if let ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } = block
                            && wanted(tool_use_id)
                        {
                            let outcome = index.by_id.entry(tool_use_id.clone()).or_default();
                            outcome.content = content.clone();
                            outcome.is_error = is_error.unwrap_or(false);
                        }
                    }
                }
                TranscriptEntry::Other => {}
            }
        }
        index
    }

    pub fn get(&self, tool_use_id: &str) -> Option<&ToolOutcome> {
        self.by_id.get(tool_use_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn extend(&mut self, other: TranscriptIndex) {
        self.by_id.extend(other.by_id);
    }
}

// ===================================================================
// Notable operations
// ===================================================================

/// An operation worth a human look: a failed tool call, or a file edited
/// over and over.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notable {
    Failed {
        tool: String,
        tool_use_id: String,
        session_id: String,
        timestamp: String,
        snippet: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        command: Option<String>,
    },
    RepeatedEdit {
        file: String,
        count: usize,
    },
}

/// Failures and repeated edits among the post-tool records, joined with
/// their outcomes from `index`. Records without an indexed outcome are
/// ignored.
pub fn find_notable(
    index: &TranscriptIndex,
    records: &[OperationRecord],
    edit_tools: &[String],
    repeated_edit_threshold: usize,
) -> Vec<Notable> {
    let mut notable = Vec::new();
    let mut edits: IndexMap<String, usize> = IndexMap::new();

    for record in records.iter().filter(|r| r.hook_type == HookType::PostToolUse) {
        let Some(id) = record.tool_use_id.as_deref() else {
            continue;
        };
        let Some(outcome) = index.get(id) else {
            continue;
        };
        let tool = record
            .tool_name
            .clone()
            .unwrap_or_else(|| outcome.tool_name.clone());

        if outcome.is_error {
            notable.push(Notable::Failed {
                tool: tool.clone(),
                tool_use_id: id.to_string(),
                session_id: record.session_id.clone(),
                timestamp: record
                    .timestamp
                    .to_rfc3339_opts(chrono::SecondsFormat::Secs, false),
                snippet: clip(&content_text(&outcome.content), 300).to_string(),
                file_path: outcome.file_path().map(String::from),
                command: outcome.command().map(|c| clip(c, 200).to_string()),
            });
        }

        if edit_tools.contains(&tool)
            && let Some(path) = outcome.file_path()
        {
            *edits.entry(path.to_string()).or_default() += 1;
        }
    }

    notable.extend(
        edits
            .into_iter()
            .filter(|&(_, count)| count >= repeated_edit_threshold)
            .map(|(file, count)| Notable::RepeatedEdit { file, count }),
    );
    notable
}

// ===================================================================
// Tail reads for summaries and confirmation prompts
// ===================================================================

/// The last `n` non-empty lines of a transcript, parsed, in file order.
/// Unparseable lines still count toward `n`.
pub fn tail_entries(path: &Path, n: usize) -> Vec<TranscriptEntry> {
    let lines = match ReverseLines::open(path) {
        Ok(lines) => lines,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "cannot open transcript");
            }
            return Vec::new();
        }
    };
    let mut entries: Vec<TranscriptEntry> = lines
        .take(n)
        .filter_map(|line| match line {
            Ok(line) => TranscriptEntry::parse(&line)
                .inspect_err(|e| tracing::debug!(error = %e, "unparseable transcript tail line"))
                .ok(),
            Err(e) => {
                tracing::warn!(error = %e, "transcript read aborted");
                None
            }
        })
        .collect();
    entries.reverse();
    entries
}

/// One-line description of a session: its first substantial user message
/// and the key tools it used.
pub fn summarize_session(entries: &[TranscriptEntry], key_tools: &[String]) -> String {
    let mut user_texts = Vec::new();
    let mut tools_seen = HashSet::new();

    for entry in entries {
        match entry {
            TranscriptEntry::User(conv) => {
                let first = conv
                    .plain_text()
                    .or_else(|| conv.text_blocks().next())
                    .filter(|t| !t.is_empty() && !t.starts_with('<'));
                if let Some(text) = first {
                    user_texts.push(clip(text, 100));
                }
            }
            TranscriptEntry::Assistant(conv) => {
                tools_seen.extend(conv.tool_names().filter(|n| !n.is_empty()));
            }
            TranscriptEntry::Other => {}
        }
    }

    let mut parts = Vec::new();
    if let Some(text) = user_texts
        .iter()
        .take(3)
        .map(|t| t.trim())
        .find(|t| t.chars().count() > 10)
    {
        parts.push(clip(text, 60).to_string());
    }
    let used: Vec<&str> = key_tools
        .iter()
        .map(String::as_str)
        .filter(|t| tools_seen.contains(t))
        .take(3)
        .collect();
    if !used.is_empty() {
        parts.push(format!("[{}]", used.join(", ")));
    }

    if parts.is_empty() {
        "(no summary available)".to_string()
    } else {
        parts.join(" - ")
    }
}

/// Recent conversation as `USER: ...` / `ASSISTANT: ...` lines, each
/// clipped to 500 characters. Tool traffic and tagged user content are left
/// out.
pub fn recent_messages(entries: &[TranscriptEntry]) -> Vec<String> {
    let mut messages = Vec::new();
    for entry in entries {
        match entry {
            TranscriptEntry::User(conv) => {
                if let Some(text) = conv
                    .plain_text()
                    .filter(|t| !t.is_empty() && !t.starts_with('<'))
                {
                    messages.push(format!("USER: {}", clip(text, 500)));
                }
            }
            TranscriptEntry::Assistant(conv) => {
                messages.extend(
                    conv.text_blocks()
                        .filter(|t| !t.is_empty())
                        .map(|t| format!("ASSISTANT: {}", clip(t, 500))),
                );
            }
            TranscriptEntry::Other => {}
        }
    }
    messages
}
