//! Context nudges injected around tool calls and prompts.
//!
//! Everything here is a pure function of the loaded state plus the current
//! time; the caller loads and saves the state files.

use crate::classifier::{self, Classifier};
use crate::config::{ConfirmConfig, HooksConfig, ReminderMode, RemindersConfig};
use crate::constraints::has_extension;
use crate::error::Result;
use crate::markdown;
use crate::metadata::{ConfirmState, CounterState, FileReminderState, ReminderState};
use crate::paths;
use crate::transcript::clip;
use chrono::{DateTime, Duration, Local};
use indexmap::IndexSet;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

// ===================================================================
// Information persistence
// ===================================================================

/// Count one search-tool call. Once the weighted total reaches the
/// threshold the counts reset and a reminder is returned: the long form if
/// none was shown within the configured interval, the short form otherwise.
pub fn record_search(
    state: &mut CounterState,
    tool: &str,
    hooks: &HooksConfig,
    now: DateTime<Local>,
) -> Option<String> {
    let weight = hooks.weights.get(tool).copied().unwrap_or(1);
    *state.counts.entry(tool.to_string()).or_default() += 1;
    state.total_weighted += weight;
    if state.total_weighted < hooks.threshold {
        return None;
    }

    let total = state.total_weighted;
    let stats = source_stats(state);
    let recs = recommendations(state, hooks);
    let interval = Duration::minutes(hooks.full_reminder_interval_minutes);
    let full = state
        .last_full_reminder
        .is_none_or(|last| now - last >= interval);

    let message = if full {
        state.last_full_reminder = Some(now);
        full_reminder(total, &stats, &recs)
    } else {
        format!(
            "\n[focus] Info Check ({total}): {stats}\n\
             -> Recommended: {recs}\n\
             -> Record: Findings | Issues | Decisions\n\
             -> Evaluate Plan\n"
        )
    };
    state.counts.clear();
    state.total_weighted = 0;
    Some(message)
}

fn source_stats(state: &CounterState) -> String {
    let parts: Vec<String> = state
        .counts
        .iter()
        .filter(|&(_, &n)| n > 0)
        .map(|(tool, n)| format!("{tool}×{n}"))
        .collect();
    if parts.is_empty() {
        "None".to_string()
    } else {
        parts.join(" + ")
    }
}

fn recommendations(state: &CounterState, hooks: &HooksConfig) -> String {
    let recs: IndexSet<&str> = state
        .counts
        .iter()
        .filter(|&(_, &n)| n > 0)
        .filter_map(|(tool, _)| hooks.recommendations.get(tool))
        .flatten()
        .map(String::as_str)
        .collect();
    if recs.is_empty() {
        "Review your findings".to_string()
    } else {
        recs.into_iter().take(3).collect::<Vec<_>>().join(" | ")
    }
}

fn full_reminder(total: u32, stats: &str, recs: &str) -> String {
    format!(
        "
[focus] Information Persistence Reminder ({total})
Sources: {stats}

=== Why This Matters ===
Context window is volatile. Information not recorded WILL be lost.
\"Lost in the middle\" effect: After many operations, goals drift.

=== What To Record ===
| Type | Example | Table |
|------|---------|-------|
| Architecture | Code structure, patterns | Findings |
| Bug/Error | Problems encountered | Issues |
| Conventions | Naming, style rules | Findings |
| External Knowledge | API docs, tutorials | Findings |
| Decisions | Approach choices, trade-offs | Decisions |
| AI Norms | User preferences, project rules | Decisions |

Recommended for this check: {recs}

=== Expected Actions ===
1. Review what you just learned
2. Record valuable info in Findings/Issues/Decisions tables
3. Check: Does current plan need adjustment?

=== Avoid ===
- Assuming you'll remember later (you won't)
- Skipping \"minor\" findings (they compound)
- Continuing without updating plan when approach changed
"
    )
}

// ===================================================================
// Objectives
// ===================================================================

/// Count one search-tool call toward reciting the objectives. Returns true
/// (and resets) when the threshold is reached.
pub fn recite_due(state: &mut CounterState, threshold: u32) -> bool {
    state.recite_count += 1;
    if state.recite_count >= threshold {
        state.recite_count = 0;
        true
    } else {
        false
    }
}

/// The scratchpad's objectives, for re-injection into context.
pub fn recite(doc: &str) -> String {
    if doc.trim().is_empty() {
        return "[focus] focus_context.md is empty, please add plan content".to_string();
    }
    match markdown::key_sections(doc) {
        Some(summary) => clip(&summary, 2000).to_string(),
        None => clip(doc, 2000).to_string(),
    }
}

/// Nudge after a modifying tool, with checkbox progress when the
/// scratchpad has any.
pub fn update_reminder(doc: Option<&str>) -> String {
    let mut msg = String::from("[focus] Update context | Revise Plan if scope changed");
    if let Some(doc) = doc {
        let (completed, total) = markdown::checkbox_counts(doc);
        if total > 0 {
            msg.push_str(&format!(" | Phases: {completed}/{total}"));
            if completed == total {
                msg.push_str(" | All complete! Run /focus:done");
            }
        }
    }
    msg
}

fn commit_message_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"-m\s+["']([^"']+)["']"#).expect("valid commit message regex"))
}

fn heredoc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<<'?EOF'?\s*\n(.+?)\nEOF").expect("valid heredoc regex"))
}

/// Plan-scope reminder for a shell command that commits.
pub fn commit_reminder(command: &str) -> Option<String> {
    if !command.to_lowercase().contains("git commit") {
        return None;
    }
    let inline = commit_message_re()
        .captures(command)
        .map(|c| c[1].to_string())
        .filter(|m| !m.contains("$(cat"));
    let subject = inline.or_else(|| {
        heredoc_re().captures(command).map(|c| {
            c[1].trim()
                .split('\n')
                .next()
                .unwrap_or_default()
                .to_string()
        })
    });

    Some(match subject.filter(|s| !s.is_empty()) {
        Some(s) => format!(
            "[focus] Commit: \"{}\" | Is this within current Plan? Revise if needed",
            clip(&s, 60)
        ),
        None => "[focus] Commit detected | Is this within current Plan? Revise if needed".to_string(),
    })
}

// ===================================================================
// Watched files
// ===================================================================

/// Advance every watched file by one prompt and return the reminders that
/// fire, as `[focus] Reminder: <file>` followed by the file's content.
///
/// Turns are counted before the trigger check, a file never reminded
/// before always fires, and firing resets the turn count and stamps the
/// time even when the file cannot be read.
pub fn file_reminders(
    config: &RemindersConfig,
    state: &mut ReminderState,
    project_root: &Path,
    now: f64,
) -> Vec<String> {
    if !config.enabled {
        return Vec::new();
    }
    let mut messages = Vec::new();
    for watched in config.files.iter().filter(|f| !f.file.is_empty()) {
        let entry = state.entry(watched.file.clone()).or_default();
        let turns = entry.turns_since_reminder + 1;
        let elapsed_minutes = (now - entry.last_reminder_time) / 60.0;
        let by_time = elapsed_minutes >= watched.time_minutes;
        let by_turns = turns >= watched.turns;
        let due = entry.last_reminder_time == 0.0
            || match watched.mode {
                ReminderMode::Time => by_time,
                ReminderMode::Turns => by_turns,
                ReminderMode::Both => by_time || by_turns,
            };

        if !due {
            entry.turns_since_reminder = turns;
            continue;
        }
        *entry = FileReminderState {
            last_reminder_time: now.max(entry.last_reminder_time),
            turns_since_reminder: 0,
        };

        let path = paths::resolve(project_root, Path::new(&watched.file));
        match fs::read_to_string(&path) {
            Ok(content) => messages.push(format!("[focus] Reminder: {}\n{content}", watched.file)),
            Err(e) => tracing::warn!(file = %path.display(), error = %e, "reminder file unreadable"),
        }
    }
    messages
}

// ===================================================================
// Confirm before modify
// ===================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Allow,
    /// Allow, with a reminder for the context.
    Remind(String),
    Deny(String),
}

/// Gate a `Write`/`Edit` of `file` on the user having approved it.
///
/// Without the classifier this only reminds. With it, files approved
/// earlier in this prompt pass straight through; otherwise the recent
/// conversation is put to the classifier and an approval is remembered in
/// `state`. A classifier error, or no conversation to judge, allows.
pub fn confirm_before_modify(
    file: &str,
    config: &ConfirmConfig,
    fix_protocol: bool,
    state: &mut ConfirmState,
    recent_messages: impl FnOnce() -> Vec<String>,
    classifier: &dyn Classifier,
) -> Result<Confirmation> {
    if !config.enabled {
        return Ok(Confirmation::Allow);
    }
    if !config.use_classifier {
        let msg = if fix_protocol && has_extension(file, &config.code_extensions) {
            format!(
                "[Fix Protocol] About to modify: {file}\n\
                 Before modifying code, ensure:\n\
                 1. Issue analyzed & root cause identified\n\
                 2. Fix proposal presented to user\n\
                 3. User confirmation received"
            )
        } else {
            format!(
                "[Confirm Before Modify] About to modify: {file}\n\
                 Ensure your execution plan has been approved by the user before proceeding."
            )
        };
        return Ok(Confirmation::Remind(msg));
    }

    if state.confirmed_files.iter().any(|f| f == file) {
        return Ok(Confirmation::Allow);
    }
    let messages = recent_messages();
    if messages.is_empty() {
        return Ok(Confirmation::Allow);
    }
    let recent = &messages[messages.len().saturating_sub(15)..];
    let prompt = classifier::confirmation_prompt(file, &state.confirmed_files, recent)?;
    let answer = classifier::ask(classifier, &prompt);
    if classifier::is_error(&answer) {
        return Ok(Confirmation::Allow);
    }
    if classifier::is_yes(&answer) {
        tracing::info!(file, "modification confirmed");
        state.confirmed_files.push(file.to_string());
        Ok(Confirmation::Allow)
    } else {
        tracing::info!(file, answer = %answer, "modification not confirmed");
        Ok(Confirmation::Deny(format!(
            "[Read Before Decide] Please propose changes for [{file}] and wait for user confirmation."
        )))
    }
}

#[cfg(test)]
mod tests;
