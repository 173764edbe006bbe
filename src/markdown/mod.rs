//! Read-only views over the focus scratchpad (`focus_context.md`).
//!
//! The scratchpad is free-form markdown maintained by the assistant, so
//! every parser here is lenient: a missing section or a malformed table
//! yields an empty result, never an error.

pub mod pending;

use crate::error::Result;
use crate::store;
use indexmap::IndexMap;
use serde::Serialize;
use std::path::Path;

/// One table row keyed by column header, in column order.
pub type Row = IndexMap<String, String>;

/// A `## ` section: its heading line (newline included) and raw body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section<'a> {
    pub heading: &'a str,
    pub body: &'a str,
}

/// The section titled `title`, matched case-sensitively.
pub fn section<'a>(doc: &'a str, title: &str) -> Option<Section<'a>> {
    find_section(doc, title, false)
}

fn find_section<'a>(doc: &'a str, title: &str, ignore_case: bool) -> Option<Section<'a>> {
    doc.match_indices("## ").find_map(|(start, _)| {
        let after = start + 3;
        let candidate = doc.get(after..after + title.len())?;
        let same = if ignore_case {
            candidate.eq_ignore_ascii_case(title)
        } else {
            candidate == title
        };
        if !same {
            return None;
        }

        // Whitespace up to and including the last newline of the run.
        let rest = &doc[after + title.len()..];
        let ws_len = rest.len() - rest.trim_start().len();
        let newline = rest[..ws_len].rfind('\n')?;
        let body_start = after + title.len() + newline + 1;

        let body_end = doc[body_start..]
            .find("\n## ")
            .map_or(doc.len(), |i| body_start + i);
        Some(Section {
            heading: &doc[start..body_start],
            body: &doc[body_start..body_end],
        })
    })
}

/// Rows of the first table under `## title` (title matched
/// case-insensitively). The first `|` line is the header and the line after
/// it the separator; rows end at the first line not starting with `|`.
/// Rows whose cell count differs from the header, or whose cells are all
/// empty, are dropped.
pub fn parse_table(doc: &str, title: &str) -> Vec<Row> {
    let Some(section) = find_section(doc, title, true) else {
        return Vec::new();
    };
    let lines: Vec<&str> = section.body.trim().split('\n').collect();
    let Some(header_idx) = lines
        .iter()
        .position(|l| l.starts_with('|') && l[1..].contains('|'))
    else {
        return Vec::new();
    };
    if header_idx + 2 >= lines.len() {
        return Vec::new();
    }

    let headers = cells(lines[header_idx]);
    lines[header_idx + 2..]
        .iter()
        .take_while(|l| l.starts_with('|'))
        .map(|l| cells(l))
        .filter(|row| row.len() == headers.len() && row.iter().any(|c| !c.is_empty()))
        .map(|row| {
            headers
                .iter()
                .cloned()
                .zip(row)
                .collect::<Row>()
        })
        .collect()
}

fn cells(line: &str) -> Vec<String> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() < 2 {
        return Vec::new();
    }
    parts[1..parts.len() - 1]
        .iter()
        .map(|c| c.trim().to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    pub text: String,
    pub complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanStatus {
    pub total: usize,
    pub completed: usize,
    pub phases: Vec<Phase>,
}

impl PlanStatus {
    pub fn has_incomplete(&self) -> bool {
        self.completed < self.total
    }
}

/// Checkbox items (`- [ ] text` / `- [x] text`) under `## Plan`.
pub fn plan_status(doc: &str) -> PlanStatus {
    let mut status = PlanStatus::default();
    let Some(plan) = section(doc, "Plan") else {
        return status;
    };
    let mut consumed = 0;
    for (idx, _) in plan.body.match_indices("- [") {
        if idx < consumed {
            continue;
        }
        let rest = &plan.body[idx + 3..];
        let mut chars = rest.chars();
        let (Some(mark), Some(']'), Some(' ')) = (chars.next(), chars.next(), chars.next()) else {
            continue;
        };
        let complete = match mark {
            'x' | 'X' => true,
            ' ' => false,
            _ => continue,
        };
        let text = chars.as_str().split('\n').next().unwrap_or_default();
        if text.is_empty() {
            continue;
        }
        consumed = idx + 6 + text.len();
        status.phases.push(Phase {
            text: text.trim().to_string(),
            complete,
        });
        status.total += 1;
        status.completed += usize::from(complete);
    }
    status
}

/// `(completed, total)` over every checkbox in the document, regardless of
/// section.
pub fn checkbox_counts(doc: &str) -> (usize, usize) {
    let total = doc.matches("- [").count();
    let completed = doc.matches("- [x]").count() + doc.matches("- [X]").count();
    (completed, total)
}

/// The named sections that exist, each as heading plus trimmed body,
/// separated by blank lines.
pub fn join_sections(doc: &str, titles: &[&str]) -> Option<String> {
    let parts: Vec<String> = titles
        .iter()
        .filter_map(|title| section(doc, title))
        .map(|s| format!("{}{}", s.heading, s.body.trim()))
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

/// What the assistant is working toward: `Task`, `Plan`, `Current Phase`.
pub fn key_sections(doc: &str) -> Option<String> {
    join_sections(doc, &["Task", "Plan", "Current Phase"])
}

/// What the assistant has written down: `Issues`, `Decisions`, `Findings`.
pub fn recorded_sections(doc: &str) -> Option<String> {
    join_sections(doc, &["Issues", "Decisions", "Findings"])
}

/// Everything the closing workflows read from the scratchpad.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FocusContext {
    pub task: String,
    pub findings: Vec<Row>,
    pub issues: Vec<Row>,
    pub decisions: Vec<Row>,
    pub plan_status: PlanStatus,
}

impl FocusContext {
    pub fn parse(doc: &str) -> Self {
        Self {
            task: section(doc, "Task")
                .map(|s| s.body.trim().to_string())
                .unwrap_or_default(),
            findings: parse_table(doc, "Findings"),
            issues: parse_table(doc, "Issues"),
            decisions: parse_table(doc, "Decisions"),
            plan_status: plan_status(doc),
        }
    }

    /// Parse the scratchpad at `path`; an absent file is an empty context.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(store::read_text(path)?
            .map(|doc| Self::parse(&doc))
            .unwrap_or_default())
    }
}
