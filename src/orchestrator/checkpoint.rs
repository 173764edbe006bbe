use super::{Report, current_session, rule, short_id};
use crate::classifier;
use crate::error::Result;
use crate::markdown::{self, pending::{PendingDoc, PendingIssue}};
use crate::oplog::{self, HookType, OperationRecord, PruneReport};
use crate::session::Focus;
use crate::store;
use crate::transcript::{self, Extract, Extractor, TranscriptIndex};
use std::collections::HashSet;

/// Which of the old sessions a checkpoint processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    /// Only the oldest.
    #[default]
    Oldest,
    /// Only the oldest; the assistant confirms between runs.
    Interactive,
    /// All of them.
    Silent,
}

/// What processing one session found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResult {
    pub session_id: String,
    pub errors: usize,
    /// The omission check's answer; `None` when the check is disabled.
    pub omission: Option<String>,
    pub analyzed_chars: usize,
}

impl SessionResult {
    /// Whether the omission check reported something to act on.
    pub fn has_omissions(&self) -> bool {
        self.omission
            .as_deref()
            .is_some_and(|o| !o.trim().is_empty() && o.trim() != "NONE")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub sessions: Vec<SessionResult>,
    pub prune: PruneReport,
    pub cleared_dumps: Vec<String>,
    pub pending_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkpoint {
    NoFocusSession,
    NoOperations,
    OnlyCurrentSession,
    Processed(Processed),
}

/// Fold finished sessions out of the operation log: their failures go to
/// the pending-issues document and their conversation is checked for
/// things the scratchpad never recorded. With `dry_run` nothing is written.
pub fn run(focus: &Focus, mode: Mode, dry_run: bool) -> Result<Checkpoint> {
    if !focus.is_active() {
        return Ok(Checkpoint::NoFocusSession);
    }
    let log = focus.oplog();
    let records = log.load_all()?;
    if records.is_empty() {
        return Ok(Checkpoint::NoOperations);
    }

    let current = current_session(focus, &records);
    let old: Vec<String> = oplog::session_ids_in_order(&records)
        .into_iter()
        .filter(|id| *id != current)
        .collect();
    if old.is_empty() {
        return Ok(Checkpoint::OnlyCurrentSession);
    }
    let selected = match mode {
        Mode::Oldest | Mode::Interactive => &old[..1],
        Mode::Silent => &old[..],
    };
    tracing::info!(?mode, dry_run, sessions = selected.len(), current = %current, "checkpoint started");

    let mut sessions = Vec::new();
    for id in selected {
        sessions.push(process_session(focus, id, &records, dry_run)?);
    }

    let processed: HashSet<String> = selected.iter().cloned().collect();
    let prune = log.prune(&processed, dry_run)?;
    let cleared_dumps = focus.dumps.clear("", dry_run);
    let pending_count = PendingDoc::new(focus.paths.pending_issues()).count()?;
    tracing::info!(processed = processed.len(), removed = prune.removed, "checkpoint complete");

    Ok(Checkpoint::Processed(Processed {
        sessions,
        prune,
        cleared_dumps,
        pending_count,
    }))
}

fn process_session(
    focus: &Focus,
    session_id: &str,
    records: &[OperationRecord],
    dry_run: bool,
) -> Result<SessionResult> {
    let config = &focus.config.checkpoint;
    let transcript_path = focus.transcript_path(session_id)?;
    let mut result = SessionResult {
        session_id: session_id.to_string(),
        errors: 0,
        omission: None,
        analyzed_chars: 0,
    };

    if config.error_detection {
        let session_records: Vec<OperationRecord> = records
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        let ids: HashSet<String> = session_records
            .iter()
            .filter(|r| r.hook_type == HookType::PostToolUse)
            .filter_map(|r| r.tool_use_id.clone())
            .collect();
        let index = TranscriptIndex::build(&transcript_path, Some(&ids));
        let done = &focus.config.done;
        let issues: Vec<PendingIssue> = transcript::find_notable(
            &index,
            &session_records,
            &done.edit_tools,
            done.repeated_edit_threshold,
        )
        .iter()
        .filter_map(|n| PendingIssue::from_notable(n, session_id))
        .collect();
        result.errors = issues.len();
        if !dry_run {
            PendingDoc::new(focus.paths.pending_issues()).append(&issues)?;
        }
    }

    if config.omission_detection {
        let extract = Extractor::new(&focus.config.recover).extract(
            &transcript_path,
            config.omission_char_budget,
            false,
        );
        result.analyzed_chars = extract.used();
        result.omission = Some(match &extract {
            Extract::NoTranscript => format!("ERROR: no transcript for session {}", short_id(session_id)),
            _ if config.use_classifier => omission_check(focus, session_id, extract.text())?,
            _ => format!("[AI_CHECK_REQUIRED]\n{}", extract.text()),
        });
    }

    tracing::debug!(session = %session_id, errors = result.errors, analyzed = result.analyzed_chars, "session processed");
    Ok(result)
}

fn omission_check(focus: &Focus, session_id: &str, conversation: &str) -> Result<String> {
    let recorded = store::read_text(&focus.paths.context())?
        .and_then(|doc| markdown::recorded_sections(&doc))
        .unwrap_or_else(|| "(empty)".to_string());
    let prompt = classifier::omission_prompt(&recorded, conversation)?;
    focus
        .dumps
        .dump(&format!("checkpoint_prompt_{}", short_id(session_id)), &prompt);
    Ok(classifier::ask(focus.classifier.as_ref(), &prompt))
}

const OMISSION_INSTRUCTIONS: &str = "
[REQUIRED] Based on the omission detection results above:
1. Add [Issue] items to the Issues table in focus_context.md
2. Add [Decision] items to the Decisions table in focus_context.md
3. Add [Finding] items to the Findings table in focus_context.md
4. If result is NONE or ERROR, no action needed
";

pub fn render(focus: &Focus, checkpoint: &Checkpoint, dry_run: bool) -> Report {
    let p = match checkpoint {
        Checkpoint::NoFocusSession => {
            return Report::refuse("No active focus session found. Run /focus:start first.");
        }
        Checkpoint::NoOperations => {
            let mut report = Report::default();
            report.push("No operations recorded yet.");
            return report;
        }
        Checkpoint::OnlyCurrentSession => {
            let mut report = Report::default();
            report.push("No old sessions to process (only current session exists).");
            return report;
        }
        Checkpoint::Processed(p) => p,
    };

    let mut report = Report::default();
    let label = if dry_run { "[DRY RUN] " } else { "" };
    report.push(format!("\n{}", rule(60)));
    report.push(format!("{label}CHECKPOINT: Processing {} session(s)", p.sessions.len()));
    report.push(rule(60));

    for s in &p.sessions {
        report.push(format!("\n--- Processing Session: {}... ---", short_id(&s.session_id)));
        report.push(format!("Errors detected: {}", s.errors));
        report.push(format!("Text analyzed: {} chars", s.analyzed_chars));
    }

    report.push(format!("\n{}", rule(60)));
    report.push("CHECKPOINT SUMMARY");
    report.push(rule(60));
    report.push(format!("Sessions processed: {}", p.sessions.len()));
    report.push(format!(
        "Total errors recorded: {}",
        p.sessions.iter().map(|s| s.errors).sum::<usize>()
    ));
    report.push(format!("Operations removed: {}", p.prune.removed));
    report.push(format!("Operations remaining: {}", p.prune.remaining));

    let omissions: Vec<&SessionResult> = p.sessions.iter().filter(|s| s.has_omissions()).collect();
    if omissions.is_empty() {
        report.push("\n## Omission Detection: No omissions found");
    } else {
        report.push("\n## Omission Detection Results");
        for s in omissions {
            report.push(format!("\n### Session {}...", short_id(&s.session_id)));
            report.push(s.omission.clone().unwrap_or_default());
        }
        report.push(OMISSION_INSTRUCTIONS);
    }

    if !p.cleared_dumps.is_empty() {
        report.push(format!("\n## Cleared Logs: {}", p.cleared_dumps.join(", ")));
    }
    if p.pending_count > 0 {
        report.push(format!("\n## Pending Issues: {} items", p.pending_count));
        report.push(format!("Review: {}", focus.paths.pending_issues().display()));
    }
    report
}
