//! Budget-bounded reconstruction of a conversation from its transcript.
//!
//! The transcript is walked from its newest line backwards. Each surviving
//! turn costs its formatted length plus two characters against the budget;
//! a turn that does not fit is skipped so that smaller, older turns can
//! still be retained. The result is rendered oldest-first.

use super::{ConversationEntry, ReverseLines, TranscriptEntry, clip};
use crate::config::RecoverConfig;
use chrono::{DateTime, FixedOffset};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::{self, Read, Seek};
use std::path::Path;

/// Wrapper tags the host uses for injected, non-conversational content.
const NOISE_TAGS: &[&str] = &[
    "<command-name>",
    "</command-name>",
    "<command-message>",
    "</command-message>",
    "<command-args>",
    "</command-args>",
    "<local-command-stdout>",
    "</local-command-stdout>",
    "<local-command-caveat>",
    "</local-command-caveat>",
    "<system-reminder>",
    "</system-reminder>",
    "<system>",
    "</system>",
];

const INTERRUPTED: &str = "[Request interrupted by user";

/// Who spoke a retained turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "USER",
            Self::Assistant => "CLAUDE",
        })
    }
}

/// One conversational turn that survived filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub time: Option<DateTime<FixedOffset>>,
    pub role: Role,
    pub text: String,
}

impl Turn {
    /// `[HH:MM] ROLE: text`, in the timestamp's own offset.
    pub fn formatted(&self) -> String {
        let time = match self.time {
            Some(t) => t.format("[%H:%M]").to_string(),
            None => "[??:??]".to_string(),
        };
        format!("{time} {}: {}", self.role, self.text)
    }
}

/// Outcome of one extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extract {
    /// The transcript is missing or empty.
    NoTranscript,
    /// The transcript has lines but no turn survived filtering and budget.
    NoContent,
    Recovered {
        text: String,
        used: usize,
        skipped: usize,
    },
}

impl Extract {
    pub fn text(&self) -> &str {
        match self {
            Self::NoTranscript => "No transcript found.",
            Self::NoContent => "No conversational content found in transcript.",
            Self::Recovered { text, .. } => text,
        }
    }

    pub fn used(&self) -> usize {
        match self {
            Self::Recovered { used, .. } => *used,
            _ => 0,
        }
    }

    pub fn skipped(&self) -> usize {
        match self {
            Self::Recovered { skipped, .. } => *skipped,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Extractor {
    filtered_tools: HashSet<String>,
    noise_patterns: Vec<String>,
    max_entry_length: usize,
    header_reserve: usize,
}

impl Extractor {
    pub fn new(config: &RecoverConfig) -> Self {
        Self {
            filtered_tools: config.filtered_tools(),
            noise_patterns: config.noise_patterns.clone(),
            max_entry_length: config.max_entry_length,
            header_reserve: config.header_reserve,
        }
    }

    /// Extract from the transcript at `path` within `budget` characters.
    /// `truncate` clips long assistant turns to `max_entry_length`.
    pub fn extract(&self, path: &Path, budget: usize, truncate: bool) -> Extract {
        match fs::metadata(path) {
            Ok(meta) if meta.len() > 0 => {}
            Ok(_) => return Extract::NoTranscript,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "cannot stat transcript");
                }
                return Extract::NoTranscript;
            }
        }
        match fs::File::open(path) {
            Ok(file) => self.extract_from(file, budget, truncate),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot open transcript");
                Extract::NoTranscript
            }
        }
    }

    /// Same as [`Extractor::extract`] over any seekable reader.
    pub fn extract_from<R: Read + Seek>(&self, reader: R, budget: usize, truncate: bool) -> Extract {
        match ReverseLines::new(reader) {
            Ok(lines) => self.extract_lines(lines, budget, truncate),
            Err(e) => {
                tracing::warn!(error = %e, "cannot read transcript");
                Extract::NoTranscript
            }
        }
    }

    fn extract_lines<R: Read + Seek>(
        &self,
        lines: ReverseLines<R>,
        budget: usize,
        truncate: bool,
    ) -> Extract {
        let mut remaining = budget.saturating_sub(self.header_reserve);
        let mut skipped = 0;
        let mut kept = Vec::new();
        let mut saw_line = false;

        for line in lines {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "transcript read aborted");
                    break;
                }
            };
            saw_line = true;
            if remaining == 0 {
                break;
            }
            let Some(turn) = self.turn(&line, truncate) else {
                continue;
            };
            let formatted = turn.formatted();
            let cost = formatted.chars().count() + 2;
            if cost > remaining {
                skipped += 1;
                continue;
            }
            remaining -= cost;
            kept.push((turn.time, formatted));
        }

        if !saw_line {
            return Extract::NoTranscript;
        }
        if kept.is_empty() {
            return Extract::NoContent;
        }
        kept.reverse();

        let header = match (kept[0].0, kept[kept.len() - 1].0) {
            (Some(first), Some(last)) => format!(
                "=== SESSION RECOVERY ({} - {}) ===",
                first.format("%Y-%m-%d %H:%M"),
                last.format("%H:%M")
            ),
            _ => "=== SESSION RECOVERY ===".to_string(),
        };
        let mut out = vec![header, String::new()];
        for (_, formatted) in kept {
            out.push(formatted);
            out.push(String::new());
        }

        Extract::Recovered {
            text: out.join("\n"),
            used: budget - remaining,
            skipped,
        }
    }

    /// Classify one transcript line, returning the turn worth keeping.
    pub fn turn(&self, line: &str, truncate: bool) -> Option<Turn> {
        let entry = match TranscriptEntry::parse(line) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable transcript line");
                return None;
            }
        };
        match entry {
            TranscriptEntry::User(conv) => self.user_turn(&conv),
            TranscriptEntry::Assistant(conv) => self.assistant_turn(&conv, truncate),
            TranscriptEntry::Other => None,
        }
    }

    fn user_turn(&self, conv: &ConversationEntry) -> Option<Turn> {
        let text = match conv.plain_text() {
            Some(text) => text.to_string(),
            None => {
                let texts: Vec<&str> = conv.text_blocks().filter(|t| !is_noise(t)).collect();
                texts.join("\n")
            }
        };
        if is_noise(&text) {
            return None;
        }
        Some(Turn {
            time: conv.time(),
            role: Role::User,
            text,
        })
    }

    fn assistant_turn(&self, conv: &ConversationEntry, truncate: bool) -> Option<Turn> {
        if !self.filtered_tools.is_empty() {
            let mut tools = conv.tool_names().peekable();
            if tools.peek().is_some() && tools.all(|name| self.filtered_tools.contains(name)) {
                return None;
            }
        }

        let texts: Vec<&str> = conv.text_blocks().filter(|t| !t.is_empty()).collect();
        if texts.is_empty() {
            return None;
        }
        let mut text = texts.join("\n");
        for noise in &self.noise_patterns {
            text = text.replace(noise.as_str(), "").trim().to_string();
        }
        if text.is_empty() {
            return None;
        }
        if truncate && text.chars().count() > self.max_entry_length {
            text = format!("{}...", clip(&text, self.max_entry_length));
        }
        Some(Turn {
            time: conv.time(),
            role: Role::Assistant,
            text,
        })
    }
}

/// Injected or empty user content that is not part of the conversation.
fn is_noise(text: &str) -> bool {
    let text = text.trim();
    text.is_empty()
        || text.starts_with("<system")
        || text.starts_with(INTERRUPTED)
        || NOISE_TAGS.iter().any(|tag| text.contains(tag))
}
