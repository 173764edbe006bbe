use super::{Report, TranscriptFile, current_session, logged_transcripts, rule, short_id, transcripts_newest_first};
use crate::budget::{self, Budget};
use crate::error::Result;
use crate::oplog::{self, HookType};
use crate::session::Focus;
use crate::store;
use crate::transcript::{self, Extractor};
use indexmap::IndexMap;
use std::path::PathBuf;

/// At most this many choices fit in one AskUserQuestion call.
const MAX_ASK_OPTIONS: usize = 4;
const CONTEXT_PREVIEW_CHARS: usize = 3000;
const RECENT_TOOL_RECORDS: usize = 20;
const SUMMARY_TAIL_LINES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Dual-source recovery while a focus session is active, the session
    /// list otherwise.
    Auto,
    List,
    /// 1-based index into the recent-session list.
    Session(usize),
}

pub fn run(focus: &Focus, mode: Mode) -> Result<Report> {
    match mode {
        Mode::Auto if focus.is_active() => dual(focus),
        Mode::Auto | Mode::List => list(focus),
        Mode::Session(n) => session(focus, n),
    }
}

/// Recent transcripts to offer, and the session id considered current.
///
/// A freshly started or cleared session has nothing worth recovering, so it
/// is left out; a resumed or compacted one stays in the list.
fn candidates(focus: &Focus) -> Result<(Vec<TranscriptFile>, String)> {
    let current = oplog::current_session_id(
        focus.env.session_id.as_deref(),
        &focus.paths.session_id_marker(),
        &[],
    );
    let source = store::read_text(&focus.paths.session_source_marker())?.unwrap_or_default();
    let source = source.trim();
    let exclude_current = matches!(source, "startup" | "clear" | "");

    let mut files = transcripts_newest_first(&focus.transcripts_dir()?)?;
    if exclude_current && !current.is_empty() {
        files.retain(|f| f.session_id != current);
        tracing::debug!(source, current = %short_id(&current), "current session excluded");
    }
    files.truncate(focus.config.recover.max_sessions);
    Ok((files, current))
}

fn list(focus: &Focus) -> Result<Report> {
    let (sessions, current) = candidates(focus)?;
    let mut report = Report::default();
    if sessions.is_empty() {
        tracing::info!("no sessions to list");
        report.push("No recent sessions found.");
        return Ok(report);
    }

    let config = &focus.config.recover;
    let extractor = Extractor::new(config);
    report.push("\n=== Recent Sessions ===\n");

    let mut options = Vec::new();
    for (i, file) in sessions.iter().enumerate() {
        let i = i + 1;
        let timestamp = file.timestamp();
        let extract = extractor.extract(&file.path, config.list_char_budget, true);
        focus.dumps.dump(&format!("recover_session_{i}"), extract.text());
        report.push(format!("--- Session {i} [{timestamp}] ---"));
        report.push(extract.text());
        report.push(format!(
            "[Budget: {}/{} used, {} skipped]",
            extract.used(),
            config.list_char_budget,
            extract.skipped()
        ));
        report.push("");

        let summary = transcript::summarize_session(
            &transcript::tail_entries(&file.path, SUMMARY_TAIL_LINES),
            &config.key_tools,
        );
        options.push((i, timestamp, summary, file.session_id == current));
    }
    tracing::info!(sessions = sessions.len(), "listed recent sessions");
    report.push(rule(40));

    let total = options.len();
    let shown = if total > MAX_ASK_OPTIONS { MAX_ASK_OPTIONS - 1 } else { total };
    let mut lines: Vec<String> = options[..shown]
        .iter()
        .map(|(i, timestamp, summary, is_current)| {
            let desc = if summary.chars().count() > 80 {
                format!("{}...", transcript::clip(summary, 80))
            } else {
                summary.clone()
            };
            let suffix = if *is_current { " (Current)" } else { "" };
            format!("  {i}. Label: \"Session {i} ({timestamp}){suffix}\", Description: \"{desc}\"")
        })
        .collect();
    if total > shown {
        lines.push(format!(
            "  {}. Label: \"More...\", Description: \"Enter session number ({}-{total}) in Other\"",
            shown + 1,
            shown + 1
        ));
    }

    report.push(
        r#"
[REQUIRED] Step 1: Call AskUserQuestion with exactly these options:
- Header: "Recovery"
- Question: "No active focus session found. What would you like to do?"
- Options:
  1. Label: "Recover history", Description: "Choose from recent sessions listed above"
  2. Label: "Start new", Description: "Begin a new focus session with /focus:start"
  3. Label: "Cancel", Description: "Do nothing"
"#,
    );
    report.push(format!(
        r#"
[REQUIRED] Step 2 (ONLY if user chose "Recover history"): Call AskUserQuestion with:
- Header: "Session"
- Question: "Which session would you like to recover?"
- Options:
{}

Then run: focuskeeper recover --session <N>
"#,
        lines.join("\n")
    ));
    Ok(report)
}

fn session(focus: &Focus, n: usize) -> Result<Report> {
    let mut sessions = transcripts_newest_first(&focus.transcripts_dir()?)?;
    sessions.truncate(focus.config.recover.max_sessions);
    if n < 1 || n > sessions.len() {
        tracing::warn!(requested = n, available = sessions.len(), "invalid session index");
        return Ok(Report::refuse(format!(
            "Error: Invalid session ID. Choose 1-{}",
            sessions.len()
        )));
    }

    let file = &sessions[n - 1];
    let budget = focus.config.recover.char_budget;
    let extract = Extractor::new(&focus.config.recover).extract(&file.path, budget, true);
    focus.dumps.dump("recover_full_summary", extract.text());

    let message = format!(
        r#"
=== CONTEXT RECOVERY ===
Session: {}
Last activity: {}

{}
[Budget: {}/{budget} used, {} skipped]

--- END RECOVERY ---

[REQUIRED] This is historical context only. No active focus session exists.
You MUST inform the user: "To start a new focus session based on this context, run /focus:start"
"#,
        file.session_id,
        file.timestamp(),
        extract.text(),
        extract.used(),
        extract.skipped()
    );
    tracing::info!(session = %file.session_id, chars = message.len(), "session recovered");
    let mut report = Report::default();
    report.push(message);
    Ok(report)
}

fn session_of(entry: &(String, PathBuf)) -> &str {
    &entry.0
}

/// Recovery inside an active focus session: the scratchpad, what the
/// operation log says, and the conversations of the focus period.
fn dual(focus: &Focus) -> Result<Report> {
    let config = &focus.config.recover;
    let mut report = Report::default();
    report.push("\n=== DUAL-SOURCE CONTEXT RECOVERY ===\n");

    report.push("--- SOURCE 1: focus_context.md ---\n");
    let context = store::read_text(&focus.paths.context())?.unwrap_or_default();
    focus.dumps.dump("dual_focus_context", &context);
    report.push(transcript::clip(&context, CONTEXT_PREVIEW_CHARS));
    if context.chars().count() > CONTEXT_PREVIEW_CHARS {
        report.push("\n... (truncated)");
    }

    report.push("\n--- SOURCE 2: operations.jsonl ---\n");
    let records = focus.oplog().load_all()?;
    if records.is_empty() {
        report.push("No operations recorded yet.");
    } else {
        report.push(format!("Total operations recorded: {}", records.len()));
        let post: Vec<&str> = records
            .iter()
            .filter(|r| r.hook_type == HookType::PostToolUse)
            .filter_map(|r| r.tool_name.as_deref())
            .collect();
        let mut counts: IndexMap<&str, usize> = IndexMap::new();
        for tool in &post[post.len().saturating_sub(RECENT_TOOL_RECORDS)..] {
            *counts.entry(*tool).or_default() += 1;
        }
        if !counts.is_empty() {
            let tools: Vec<String> = counts.iter().map(|(t, n)| format!("{t}x{n}")).collect();
            report.push(format!("Recent tools: {}", tools.join(", ")));
        }
    }

    report.push("\n--- SOURCE 3: Session JSONL (filtered) ---\n");
    let logged = logged_transcripts(focus, &records)?;
    let extractor = Extractor::new(config);
    if !logged.is_empty() {
        report.push(format!("Found {} sessions in this focus period\n", logged.len()));
        focus.dumps.clear("dual_session_", false);

        let current = current_session(focus, &records);
        let budget = Budget::new(config.char_budget, config.min_session_budget, config.decay_factor);
        let allocations = budget::allocate(
            logged,
            Some(current.as_str()),
            session_of,
            &budget,
            |(_, path), limit| extractor.extract(path, limit, true),
        );
        let k = allocations.len();
        for (i, a) in allocations.iter().enumerate() {
            let budget_line = format!(
                "[Budget: {}/{} used, {}/{} total remaining, {} skipped]",
                a.used(),
                a.limit,
                a.remaining_after,
                budget.total,
                a.extract.skipped()
            );
            report.push(format!("--- Session {}/{k}: {}... ---", i + 1, short_id(&a.session.0)));
            focus.dumps.dump(
                &format!("dual_session_{}", i + 1),
                &format!("{}\n\n{budget_line}", a.extract.text()),
            );
            report.push(a.extract.text());
            report.push(budget_line);
            report.push("");
        }
    } else if let Some(newest) = transcripts_newest_first(&focus.transcripts_dir()?)?.first() {
        let half = config.char_budget / 2;
        let extract = extractor.extract(&newest.path, half, true);
        focus.dumps.dump("dual_session_summary", extract.text());
        report.push(format!("Transcript: {}.jsonl", newest.session_id));
        report.push(extract.text());
        report.push(format!(
            "[Budget: {}/{half} used, {} skipped]",
            extract.used(),
            extract.skipped()
        ));
    } else {
        report.push("No transcript found.");
    }

    report.push("\n--- END RECOVERY ---\n");
    report.push(
        r#"
[REQUIRED] You MUST call AskUserQuestion with exactly these options:
- Header: "Next Step"
- Question: "How would you like to proceed with this focus session?"
- Options:
  1. Label: "Continue task", Description: "Resume working from Current Phase"
  2. Label: "Complete session", Description: "Task is done, run /focus:done to archive"
  3. Label: "Restart", Description: "Abandon current task, start fresh with /focus:start"
  4. Label: "Cancel", Description: "Do nothing, just wanted to view context"
"#,
    );
    tracing::info!(records = records.len(), "dual-source recovery complete");
    Ok(report)
}
