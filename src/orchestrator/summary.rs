use super::{Report, logged_transcripts, rule};
use crate::error::Result;
use crate::markdown::pending::{PendingDoc, PendingIssue};
use crate::markdown::{FocusContext, PlanStatus, Row};
use crate::oplog::OperationRecord;
use crate::session::Focus;
use crate::transcript::{self, Notable, TranscriptIndex, clip};
use anyhow::Context as _;
use indexmap::IndexMap;
use serde::Serialize;
use std::path::PathBuf;

/// Only this many trailing records are searched for a fallback session id.
const DEFAULT_SESSION_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Format {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Times {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionInfo {
    pub times: Times,
    pub total_operations: usize,
    pub by_tool: IndexMap<String, usize>,
    pub transcript_count: usize,
    pub transcripts: Vec<PathBuf>,
}

/// The whole focus period at a glance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub session: SessionInfo,
    pub plan_status: PlanStatus,
    pub findings: Vec<Row>,
    pub issues: Vec<Row>,
    pub decisions: Vec<Row>,
    pub notable_operations: Vec<Notable>,
    pub pending_issues: usize,
}

/// Gather the summary. Failures found along the way are appended to the
/// pending-issues document.
pub fn run(focus: &Focus) -> Result<Option<Summary>> {
    if !focus.is_active() {
        return Ok(None);
    }
    let context = FocusContext::load(&focus.paths.context())?;
    let records = focus.oplog().load_all()?;

    let transcripts = logged_transcripts(focus, &records)?;
    let mut index = TranscriptIndex::default();
    for (_, path) in &transcripts {
        index.extend(TranscriptIndex::build(path, None));
    }
    tracing::debug!(transcripts = transcripts.len(), indexed = index.len(), "transcript index built");

    let done = &focus.config.done;
    let notable = transcript::find_notable(&index, &records, &done.edit_tools, done.repeated_edit_threshold);
    let default_session = default_session(&records);
    let issues: Vec<PendingIssue> = notable
        .iter()
        .filter_map(|n| PendingIssue::from_notable(n, default_session))
        .collect();
    let pending = PendingDoc::new(focus.paths.pending_issues());
    pending.append(&issues)?;

    let summary = Summary {
        session: SessionInfo {
            times: Times {
                start: records.first().map(|r| r.timestamp.to_rfc3339()),
                end: records.last().map(|r| r.timestamp.to_rfc3339()),
            },
            total_operations: records.len(),
            by_tool: count_by_tool(&records),
            transcript_count: transcripts.len(),
            transcripts: transcripts.into_iter().map(|(_, p)| p).collect(),
        },
        plan_status: context.plan_status,
        findings: context.findings,
        issues: context.issues,
        decisions: context.decisions,
        notable_operations: notable,
        pending_issues: pending.count()?,
    };
    tracing::info!(
        operations = summary.session.total_operations,
        notable = summary.notable_operations.len(),
        "summary generated"
    );
    Ok(Some(summary))
}

fn default_session(records: &[OperationRecord]) -> &str {
    records[records.len().saturating_sub(DEFAULT_SESSION_WINDOW)..]
        .iter()
        .map(|r| r.session_id.as_str())
        .find(|id| !id.is_empty())
        .unwrap_or_default()
}

fn count_by_tool(records: &[OperationRecord]) -> IndexMap<String, usize> {
    let mut counts = IndexMap::new();
    for tool in records.iter().filter_map(|r| r.tool_name.as_deref()) {
        *counts.entry(tool.to_string()).or_default() += 1;
    }
    counts
}

pub fn render(focus: &Focus, summary: Option<&Summary>, format: Format) -> Result<Report> {
    let Some(summary) = summary else {
        return Ok(Report::refuse("No active focus session found. Run /focus:start first."));
    };
    let json = serde_json::to_string_pretty(summary).context("serializing summary")?;
    focus.dumps.dump("done_summary", &json);

    let mut report = Report::default();
    match format {
        Format::Json => report.push(json),
        Format::Text => report.push(text(summary, &focus.paths.pending_issues())),
    }
    Ok(report)
}

fn cell<'a>(row: &'a Row, column: &str) -> &'a str {
    row.get(column).map_or("N/A", String::as_str)
}

fn text(summary: &Summary, pending_path: &std::path::Path) -> String {
    let mut parts = vec![rule(60), "SESSION INFORMATION SUMMARY".to_string(), rule(60)];

    let session = &summary.session;
    parts.push("\n## Session".into());
    parts.push(format!("Operations: {}", session.total_operations));
    parts.push(format!("Start: {}", session.times.start.as_deref().unwrap_or("N/A")));
    parts.push(format!("End: {}", session.times.end.as_deref().unwrap_or("N/A")));
    if !session.by_tool.is_empty() {
        let tools: Vec<String> = session.by_tool.iter().map(|(t, n)| format!("{t}x{n}")).collect();
        parts.push(format!("Tools: {}", tools.join(", ")));
    }

    let plan = &summary.plan_status;
    parts.push(format!("\n## Plan Status: {}/{} complete", plan.completed, plan.total));
    for phase in &plan.phases {
        let mark = if phase.complete { "[x]" } else { "[ ]" };
        parts.push(format!("  {mark} {}", phase.text));
    }

    if !summary.findings.is_empty() {
        parts.push(format!("\n## Findings ({} items)", summary.findings.len()));
        for f in &summary.findings {
            parts.push(format!("  - [{}] {}", cell(f, "Type"), cell(f, "Discovery")));
        }
    }
    if !summary.issues.is_empty() {
        parts.push(format!("\n## Issues ({} items)", summary.issues.len()));
        for i in &summary.issues {
            parts.push(format!("  - {}: {}", cell(i, "Issue"), cell(i, "Resolution")));
        }
    }
    if !summary.decisions.is_empty() {
        parts.push(format!("\n## Decisions ({} items)", summary.decisions.len()));
        for d in &summary.decisions {
            parts.push(format!("  - {}", cell(d, "Decision")));
        }
    }

    if !summary.notable_operations.is_empty() {
        parts.push(format!(
            "\n## Notable Operations ({} items)",
            summary.notable_operations.len()
        ));
        for n in &summary.notable_operations {
            parts.push(match n {
                Notable::Failed { tool, snippet, .. } => {
                    format!("  - [FAILED] {tool}: {}...", clip(snippet, 100))
                }
                Notable::RepeatedEdit { file, count } => {
                    format!("  - [REPEATED] {file} edited {count} times")
                }
            });
        }
    }

    if summary.pending_issues > 0 {
        parts.push(format!("\n## Pending Issues: {} items", summary.pending_issues));
        parts.push(format!(
            "  Review and process before completing session: {}",
            pending_path.display()
        ));
    }
    parts.push(format!("\n{}", rule(60)));
    parts.join("\n")
}
