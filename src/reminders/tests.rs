use super::*;
use crate::config::{Config, ReminderFile};
use chrono::TimeZone;
use std::cell::Cell;

fn hooks() -> HooksConfig {
    Config::builtin().unwrap().hooks
}

fn at(minute: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap()
}

#[test]
fn counter_fires_at_weighted_threshold() {
    let hooks = hooks();
    let mut state = CounterState::default();
    assert_eq!(record_search(&mut state, "Read", &hooks, at(0)), None);
    assert_eq!(record_search(&mut state, "Grep", &hooks, at(0)), None);
    assert_eq!(state.total_weighted, 2);
    // WebSearch weighs 2, Read 1: 2 + 2 + 1 reaches 5.
    assert_eq!(record_search(&mut state, "WebSearch", &hooks, at(0)), None);
    let msg = record_search(&mut state, "Read", &hooks, at(0)).unwrap();

    assert!(msg.contains("[focus] Information Persistence Reminder (5)"));
    assert!(msg.contains("Sources: Read×2 + Grep×1 + WebSearch×1"));
    assert!(msg.contains("Recommended for this check: Architecture | Conventions | External Knowledge"));
    assert!(state.counts.is_empty());
    assert_eq!(state.total_weighted, 0);
    assert_eq!(state.last_full_reminder, Some(at(0)));
}

#[test]
fn short_form_within_interval() {
    let hooks = hooks();
    let mut state = CounterState {
        last_full_reminder: Some(at(0)),
        ..CounterState::default()
    };
    let mut last = None;
    for _ in 0..5 {
        last = record_search(&mut state, "Glob", &hooks, at(10));
    }
    let msg = last.unwrap();
    assert_eq!(
        msg,
        "\n[focus] Info Check (5): Glob×5\n-> Recommended: Architecture\n\
         -> Record: Findings | Issues | Decisions\n-> Evaluate Plan\n"
    );
    assert_eq!(state.last_full_reminder, Some(at(0)));

    // Thirty minutes later the long form returns.
    for _ in 0..4 {
        record_search(&mut state, "Glob", &hooks, at(30));
    }
    let msg = record_search(&mut state, "Glob", &hooks, at(30)).unwrap();
    assert!(msg.contains("Information Persistence Reminder"));
    assert_eq!(state.last_full_reminder, Some(at(30)));
}

#[test]
fn unknown_tools_get_default_recommendation() {
    let mut hooks = hooks();
    hooks.threshold = 1;
    let mut state = CounterState::default();
    let msg = record_search(&mut state, "Mystery", &hooks, at(0)).unwrap();
    assert!(msg.contains("Recommended for this check: Review your findings"));
}

#[test]
fn recite_every_nth_call() {
    let mut state = CounterState::default();
    let fired: Vec<bool> = (0..7).map(|_| recite_due(&mut state, 3)).collect();
    assert_eq!(fired, vec![false, false, true, false, false, true, false]);
    assert_eq!(state.recite_count, 1);
}

#[test]
fn recite_prefers_key_sections() {
    let doc = "# Ctx\n\n## Task\nShip it\n\n## Notes\nnoise\n\n## Plan\n- [ ] one\n";
    assert_eq!(recite(doc), "## Task\nShip it\n\n## Plan\n- [ ] one");
    assert_eq!(recite("free text only"), "free text only");
    assert_eq!(recite(&"z".repeat(3000)).len(), 2000);
    assert_eq!(
        recite("  \n"),
        "[focus] focus_context.md is empty, please add plan content"
    );
}

#[test]
fn update_reminder_reports_progress() {
    let base = "[focus] Update context | Revise Plan if scope changed";
    assert_eq!(update_reminder(None), base);
    assert_eq!(update_reminder(Some("no boxes")), base);
    assert_eq!(
        update_reminder(Some("- [x] a\n- [ ] b")),
        format!("{base} | Phases: 1/2")
    );
    assert_eq!(
        update_reminder(Some("- [x] a\n- [X] b")),
        format!("{base} | Phases: 2/2 | All complete! Run /focus:done")
    );
}

#[test]
fn commit_reminder_quotes_the_subject() {
    assert_eq!(commit_reminder("git status"), None);
    assert_eq!(
        commit_reminder("git commit -m 'Add parser'").unwrap(),
        "[focus] Commit: \"Add parser\" | Is this within current Plan? Revise if needed"
    );
    let heredoc = "git commit -m \"$(cat <<'EOF'\nFix tokenizer\n\nLonger body\nEOF\n)\"";
    assert!(commit_reminder(heredoc).unwrap().contains("Commit: \"Fix tokenizer\""));
    let long = format!("git commit -m \"{}\"", "w".repeat(100));
    assert!(commit_reminder(&long).unwrap().contains(&format!("\"{}\"", "w".repeat(60))));
    assert_eq!(
        commit_reminder("GIT COMMIT --amend").unwrap(),
        "[focus] Commit detected | Is this within current Plan? Revise if needed"
    );
}

fn watch(file: &str, mode: ReminderMode, time_minutes: f64, turns: u32) -> RemindersConfig {
    RemindersConfig {
        enabled: true,
        files: vec![ReminderFile {
            file: file.to_string(),
            mode,
            time_minutes,
            turns,
        }],
    }
}

#[test]
fn file_reminder_first_run_then_turns() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("RULES.md"), "be nice").unwrap();
    let config = watch("RULES.md", ReminderMode::Turns, 20.0, 3);
    let mut state = ReminderState::new();

    let first = file_reminders(&config, &mut state, dir.path(), 1000.0);
    assert_eq!(first, vec!["[focus] Reminder: RULES.md\nbe nice".to_string()]);
    assert_eq!(state["RULES.md"].turns_since_reminder, 0);
    assert_eq!(state["RULES.md"].last_reminder_time, 1000.0);

    assert!(file_reminders(&config, &mut state, dir.path(), 1001.0).is_empty());
    assert!(file_reminders(&config, &mut state, dir.path(), 1002.0).is_empty());
    assert_eq!(state["RULES.md"].turns_since_reminder, 2);
    assert_eq!(file_reminders(&config, &mut state, dir.path(), 1003.0).len(), 1);
    assert_eq!(state["RULES.md"].turns_since_reminder, 0);
}

#[test]
fn file_reminder_by_time() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.md"), "n").unwrap();
    let config = watch("notes.md", ReminderMode::Time, 20.0, 1);
    let mut state = ReminderState::new();
    state.insert(
        "notes.md".into(),
        FileReminderState {
            last_reminder_time: 10_000.0,
            turns_since_reminder: 50,
        },
    );
    assert!(file_reminders(&config, &mut state, dir.path(), 10_000.0 + 19.0 * 60.0).is_empty());
    assert_eq!(file_reminders(&config, &mut state, dir.path(), 10_000.0 + 21.0 * 60.0).len(), 1);
}

#[test]
fn file_reminder_time_never_goes_backwards() {
    let dir = tempfile::tempdir().unwrap();
    let config = watch("missing.md", ReminderMode::Turns, 20.0, 1);
    let mut state = ReminderState::new();
    state.insert(
        "missing.md".into(),
        FileReminderState {
            last_reminder_time: 5000.0,
            turns_since_reminder: 0,
        },
    );
    // Fires (turns = 1) although the file is missing, with a clock behind.
    assert!(file_reminders(&config, &mut state, dir.path(), 4000.0).is_empty());
    assert_eq!(state["missing.md"].last_reminder_time, 5000.0);
    assert_eq!(state["missing.md"].turns_since_reminder, 0);
}

#[test]
fn disabled_reminders_leave_state_alone() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = watch("x.md", ReminderMode::Both, 20.0, 1);
    config.enabled = false;
    let mut state = ReminderState::new();
    assert!(file_reminders(&config, &mut state, dir.path(), 1.0).is_empty());
    assert!(state.is_empty());
}

struct Answer(&'static str);

impl Classifier for Answer {
    fn classify(&self, _prompt: &str) -> anyhow::Result<String> {
        if self.0 == "fail" {
            anyhow::bail!("offline");
        }
        Ok(self.0.to_string())
    }
}

fn confirm_config(use_classifier: bool) -> ConfirmConfig {
    ConfirmConfig {
        enabled: true,
        use_classifier,
        code_extensions: vec![".py".into()],
    }
}

fn conversation() -> Vec<String> {
    vec!["USER: fix the bug".into(), "ASSISTANT: I will edit a.py".into()]
}

#[test]
fn reminder_mode_annotates() {
    let mut state = ConfirmState::default();
    let c = Answer("NO");
    let plain = confirm_before_modify("/a.py", &confirm_config(false), false, &mut state, conversation, &c).unwrap();
    assert_eq!(
        plain,
        Confirmation::Remind(
            "[Confirm Before Modify] About to modify: /a.py\n\
             Ensure your execution plan has been approved by the user before proceeding."
                .into()
        )
    );

    let fix = confirm_before_modify("/a.py", &confirm_config(false), true, &mut state, conversation, &c).unwrap();
    let Confirmation::Remind(msg) = fix else { panic!("expected reminder") };
    assert!(msg.starts_with("[Fix Protocol] About to modify: /a.py\n"));
    assert!(msg.ends_with("3. User confirmation received"));

    let other = confirm_before_modify("/a.txt", &confirm_config(false), true, &mut state, conversation, &c).unwrap();
    let Confirmation::Remind(msg) = other else { panic!("expected reminder") };
    assert!(msg.starts_with("[Confirm Before Modify]"));
}

#[test]
fn classifier_approval_is_remembered() {
    let mut state = ConfirmState::default();
    let outcome = confirm_before_modify("/a.py", &confirm_config(true), false, &mut state, conversation, &Answer("YES")).unwrap();
    assert_eq!(outcome, Confirmation::Allow);
    assert_eq!(state.confirmed_files, vec!["/a.py".to_string()]);

    // Already confirmed: the classifier and transcript are not consulted.
    let asked = Cell::new(false);
    let outcome = confirm_before_modify(
        "/a.py",
        &confirm_config(true),
        false,
        &mut state,
        || {
            asked.set(true);
            conversation()
        },
        &Answer("NO"),
    )
    .unwrap();
    assert_eq!(outcome, Confirmation::Allow);
    assert!(!asked.get());
}

#[test]
fn classifier_refusal_denies() {
    let mut state = ConfirmState::default();
    let outcome = confirm_before_modify("/b.py", &confirm_config(true), false, &mut state, conversation, &Answer("NO, not yet")).unwrap();
    assert_eq!(
        outcome,
        Confirmation::Deny(
            "[Read Before Decide] Please propose changes for [/b.py] and wait for user confirmation.".into()
        )
    );
    assert!(state.confirmed_files.is_empty());
}

#[test]
fn classifier_trouble_allows() {
    let mut state = ConfirmState::default();
    let cfg = confirm_config(true);
    assert_eq!(
        confirm_before_modify("/b.py", &cfg, false, &mut state, conversation, &Answer("fail")).unwrap(),
        Confirmation::Allow
    );
    assert_eq!(
        confirm_before_modify("/b.py", &cfg, false, &mut state, Vec::new, &Answer("NO")).unwrap(),
        Confirmation::Allow
    );
    assert!(state.confirmed_files.is_empty());

    let disabled = ConfirmConfig {
        enabled: false,
        ..cfg
    };
    assert_eq!(
        confirm_before_modify("/b.py", &disabled, false, &mut state, conversation, &Answer("NO")).unwrap(),
        Confirmation::Allow
    );
}
