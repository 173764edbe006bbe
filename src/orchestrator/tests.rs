use super::*;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::markdown::pending::PendingDoc;
use crate::oplog::HookType;
use crate::paths::Env;
use chrono::DateTime;
use indexmap::IndexMap;
use serde_json::{Value, json};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

struct Fixed(&'static str);

impl Classifier for Fixed {
    fn classify(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

struct Fixture {
    _dir: TempDir,
    focus: Focus,
}

fn fixture(edit: impl FnOnce(&mut Config)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("project");
    fs::create_dir_all(&root).unwrap();
    let mut config = Config::builtin().unwrap();
    edit(&mut config);
    let env = Env {
        projects_dir: Some(dir.path().join("projects")),
        ..Env::default()
    };
    let mut focus = Focus::new(root, config, env);
    focus.classifier = Box::new(Fixed("NONE"));
    Fixture { focus, _dir: dir }
}

const CONTEXT: &str = "\
## Task
Make the build green

## Plan
- [x] Reproduce
- [ ] Fix

## Findings
| Type | Discovery | Category |
|------|-----------|----------|
| Root cause | Linker flag missing | build |
| Note | Cache dir is stale | build |
| Note | Flaky timer test | testing |

## Issues
| Issue | Resolution | Category |
|-------|------------|----------|
| Link error | Added -lm | Build |

## Decisions
| Decision | Rationale |
|----------|-----------|
| Keep cmake | Less churn |
";

fn activate(focus: &Focus) {
    fs::create_dir_all(&focus.paths.dir).unwrap();
    fs::write(focus.paths.context(), CONTEXT).unwrap();
}

fn record(session: &str, id: &str, tool: &str) -> OperationRecord {
    OperationRecord {
        timestamp: DateTime::parse_from_rfc3339("2026-03-01T10:00:00+00:00").unwrap(),
        hook_type: HookType::PostToolUse,
        session_id: session.into(),
        tool_use_id: Some(id.into()),
        tool_name: Some(tool.into()),
    }
}

fn write_log(focus: &Focus, records: &[OperationRecord]) {
    let log = focus.oplog();
    for r in records {
        log.append(r).unwrap();
    }
}

fn user(text: &str) -> Value {
    json!({
        "type": "user",
        "timestamp": "2026-03-01T10:00:00Z",
        "message": { "role": "user", "content": text }
    })
}

fn bash_call(id: &str, command: &str, output: &str, is_error: bool) -> [Value; 2] {
    [
        json!({
            "type": "assistant",
            "timestamp": "2026-03-01T10:01:00Z",
            "message": { "role": "assistant", "content": [
                { "type": "tool_use", "id": id, "name": "Bash", "input": { "command": command } }
            ]}
        }),
        json!({
            "type": "user",
            "timestamp": "2026-03-01T10:01:05Z",
            "message": { "role": "user", "content": [
                { "type": "tool_result", "tool_use_id": id, "content": output, "is_error": is_error }
            ]}
        }),
    ]
}

fn write_transcript(focus: &Focus, session: &str, lines: &[Value]) -> PathBuf {
    let dir = focus.transcripts_dir().unwrap();
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{session}.jsonl"));
    let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
    fs::write(&path, body).unwrap();
    path
}

fn age(path: &Path, minutes: u64) {
    let when = SystemTime::now() - Duration::from_secs(minutes * 60);
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(when)
        .unwrap();
}

/// `abc` is an old session with one failed command; `xyz` is current.
fn two_sessions(focus: &Focus) {
    write_log(
        focus,
        &[
            record("abc", "t1", "Bash"),
            record("abc", "t2", "Bash"),
            record("abc", "t3", "Read"),
            record("xyz", "t4", "Bash"),
            record("xyz", "t5", "Bash"),
        ],
    );
    let mut lines = vec![user("Please fix the failing build")];
    lines.extend(bash_call("t1", "make all", "make: *** [all] Error 2", true));
    lines.extend(bash_call("t2", "ls", "Makefile", false));
    write_transcript(focus, "abc", &lines);
}

// ===================================================================
// Checkpoint
// ===================================================================

#[test]
fn checkpoint_refuses_without_focus_session() {
    let f = fixture(|_| {});
    let outcome = checkpoint::run(&f.focus, checkpoint::Mode::Oldest, false).unwrap();
    assert_eq!(outcome, checkpoint::Checkpoint::NoFocusSession);
    let report = checkpoint::render(&f.focus, &outcome, false);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.text(), "No active focus session found. Run /focus:start first.");
}

#[test]
fn checkpoint_with_only_current_session() {
    let mut f = fixture(|_| {});
    activate(&f.focus);
    f.focus.env.session_id = Some("xyz".into());
    write_log(&f.focus, &[record("xyz", "t1", "Bash")]);
    let outcome = checkpoint::run(&f.focus, checkpoint::Mode::Silent, false).unwrap();
    assert_eq!(outcome, checkpoint::Checkpoint::OnlyCurrentSession);
    let report = checkpoint::render(&f.focus, &outcome, false);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.text(), "No old sessions to process (only current session exists).");
}

#[test]
fn checkpoint_folds_old_session_into_pending_issues() {
    let mut f = fixture(|_| {});
    activate(&f.focus);
    f.focus.env.session_id = Some("xyz".into());
    two_sessions(&f.focus);

    let outcome = checkpoint::run(&f.focus, checkpoint::Mode::Oldest, false).unwrap();
    let checkpoint::Checkpoint::Processed(p) = &outcome else {
        panic!("expected processed checkpoint, got {outcome:?}");
    };
    assert_eq!(p.sessions.len(), 1);
    assert_eq!(p.sessions[0].errors, 1);
    assert_eq!(p.sessions[0].omission.as_deref(), Some("NONE"));
    assert!(p.sessions[0].analyzed_chars > 0);
    assert_eq!((p.prune.removed, p.prune.remaining), (3, 2));
    assert_eq!(p.pending_count, 1);

    let remaining = f.focus.oplog().load_all().unwrap();
    assert!(remaining.iter().all(|r| r.session_id == "xyz"));
    let pending = fs::read_to_string(f.focus.paths.pending_issues()).unwrap();
    assert!(pending.contains("| Bash | error"));
    assert!(pending.contains("- **Command**: `make all`"));

    let text = checkpoint::render(&f.focus, &outcome, false).text();
    assert!(text.contains("CHECKPOINT: Processing 1 session(s)"));
    assert!(text.contains("--- Processing Session: abc... ---"));
    assert!(text.contains("Operations removed: 3\nOperations remaining: 2"));
    assert!(text.contains("## Omission Detection: No omissions found"));
    assert!(text.contains("## Pending Issues: 1 items"));
}

#[test]
fn checkpoint_dry_run_writes_nothing() {
    let mut f = fixture(|_| {});
    activate(&f.focus);
    f.focus.env.session_id = Some("xyz".into());
    two_sessions(&f.focus);
    let before = fs::read_to_string(f.focus.paths.operations()).unwrap();

    let outcome = checkpoint::run(&f.focus, checkpoint::Mode::Silent, true).unwrap();
    let text = checkpoint::render(&f.focus, &outcome, true).text();
    assert!(text.contains("[DRY RUN] CHECKPOINT: Processing 1 session(s)"));
    assert!(text.contains("Operations removed: 3"));
    assert_eq!(fs::read_to_string(f.focus.paths.operations()).unwrap(), before);
    assert!(!f.focus.paths.pending_issues().exists());
}

#[test]
fn checkpoint_modes_select_sessions() {
    let mut f = fixture(|c| c.checkpoint.omission_detection = false);
    activate(&f.focus);
    f.focus.env.session_id = Some("c".into());
    write_log(
        &f.focus,
        &[record("a", "1", "Bash"), record("b", "2", "Bash"), record("c", "3", "Bash")],
    );

    let oldest = checkpoint::run(&f.focus, checkpoint::Mode::Interactive, true).unwrap();
    let checkpoint::Checkpoint::Processed(p) = oldest else { panic!("not processed") };
    assert_eq!(p.sessions.iter().map(|s| s.session_id.as_str()).collect::<Vec<_>>(), ["a"]);
    assert_eq!(p.sessions[0].omission, None);

    let all = checkpoint::run(&f.focus, checkpoint::Mode::Silent, false).unwrap();
    let checkpoint::Checkpoint::Processed(p) = all else { panic!("not processed") };
    assert_eq!(p.sessions.len(), 2);
    assert_eq!(p.prune.remaining, 1);
}

#[test]
fn checkpoint_without_classifier_asks_the_assistant() {
    let mut f = fixture(|c| c.checkpoint.use_classifier = false);
    activate(&f.focus);
    f.focus.env.session_id = Some("xyz".into());
    two_sessions(&f.focus);

    let outcome = checkpoint::run(&f.focus, checkpoint::Mode::Oldest, true).unwrap();
    let text = checkpoint::render(&f.focus, &outcome, true).text();
    assert!(text.contains("## Omission Detection Results\n\n### Session abc...\n[AI_CHECK_REQUIRED]\n"));
    assert!(text.contains("Please fix the failing build"));
    assert!(text.contains("[REQUIRED] Based on the omission detection results above:"));
}

#[test]
fn checkpoint_processes_sessions_without_transcript() {
    let mut f = fixture(|_| {});
    activate(&f.focus);
    f.focus.env.session_id = Some("current".into());
    write_log(&f.focus, &[record("gone1234567", "1", "Bash"), record("current", "2", "Bash")]);

    let outcome = checkpoint::run(&f.focus, checkpoint::Mode::Oldest, false).unwrap();
    let checkpoint::Checkpoint::Processed(p) = &outcome else { panic!("not processed") };
    assert_eq!(p.sessions[0].errors, 0);
    assert_eq!(
        p.sessions[0].omission.as_deref(),
        Some("ERROR: no transcript for session gone1234")
    );
    assert_eq!(p.prune.remaining, 1);
}

// ===================================================================
// Recover
// ===================================================================

#[test]
fn recover_list_without_transcripts() {
    let f = fixture(|_| {});
    let report = recover::run(&f.focus, recover::Mode::Auto).unwrap();
    assert_eq!(report.text(), "No recent sessions found.");
}

#[test]
fn recover_list_orders_and_offers_sessions() {
    let mut f = fixture(|_| {});
    f.focus.env.session_id = Some("fresh".into());
    for (i, id) in ["s1", "s2", "s3", "s4", "s5", "fresh"].iter().enumerate() {
        let path = write_transcript(&f.focus, id, &[user(&format!("Working on feature number {id}"))]);
        age(&path, 60 - i as u64 * 10);
    }
    // A freshly started session is not offered.
    fs::create_dir_all(&f.focus.paths.dir).unwrap();
    fs::write(f.focus.paths.session_source_marker(), "startup").unwrap();

    let text = recover::run(&f.focus, recover::Mode::List).unwrap().text();
    assert!(text.starts_with("\n=== Recent Sessions ===\n"));
    assert!(!text.contains("feature number fresh"));
    let first = text.find("feature number s5").unwrap();
    let last = text.find("feature number s1").unwrap();
    assert!(first < last);
    assert!(text.contains("[Budget: "));
    assert!(text.contains("Header: \"Recovery\""));
    assert!(text.contains("Description: \"Working on feature number s5\""));
    assert!(text.contains("  4. Label: \"More...\", Description: \"Enter session number (4-5) in Other\""));
    assert!(text.contains("Then run: focuskeeper recover --session <N>"));
}

#[test]
fn recover_list_keeps_resumed_current_session() {
    let mut f = fixture(|_| {});
    f.focus.env.session_id = Some("resumed".into());
    write_transcript(&f.focus, "resumed", &[user("Continue the refactor of the parser")]);
    fs::create_dir_all(&f.focus.paths.dir).unwrap();
    fs::write(f.focus.paths.session_source_marker(), "resume").unwrap();

    let text = recover::run(&f.focus, recover::Mode::List).unwrap().text();
    assert!(text.contains("(Current)\", Description: \"Continue the refactor of the parser\""));
}

#[test]
fn recover_session_by_index() {
    let f = fixture(|_| {});
    let old = write_transcript(&f.focus, "older", &[user("Old conversation about caching")]);
    age(&old, 30);
    write_transcript(&f.focus, "newer", &[user("New conversation about parsing")]);

    let report = recover::run(&f.focus, recover::Mode::Session(2)).unwrap();
    let text = report.text();
    assert!(text.contains("=== CONTEXT RECOVERY ===\nSession: older\n"));
    assert!(text.contains("Old conversation about caching"));
    assert!(text.contains("run /focus:start"));

    let bad = recover::run(&f.focus, recover::Mode::Session(3)).unwrap();
    assert_eq!(bad.exit_code(), 1);
    assert_eq!(bad.text(), "Error: Invalid session ID. Choose 1-2");
}

#[test]
fn dual_recovery_reads_all_three_sources() {
    let mut f = fixture(|_| {});
    activate(&f.focus);
    f.focus.env.session_id = Some("xyz".into());
    two_sessions(&f.focus);
    write_transcript(&f.focus, "xyz", &[user("The current conversation is here")]);

    let text = recover::run(&f.focus, recover::Mode::Auto).unwrap().text();
    assert!(text.contains("=== DUAL-SOURCE CONTEXT RECOVERY ==="));
    assert!(text.contains("Make the build green"));
    assert!(text.contains("Total operations recorded: 5"));
    assert!(text.contains("Recent tools: Bashx4, Readx1"));
    assert!(text.contains("Found 2 sessions in this focus period\n"));
    assert!(text.contains("--- Session 1/1: abc... ---"));
    assert!(!text.contains("The current conversation is here"));
    assert!(text.contains("total remaining"));
    assert!(text.contains("Header: \"Next Step\""));
}

#[test]
fn dual_recovery_falls_back_to_newest_transcript() {
    let f = fixture(|_| {});
    activate(&f.focus);
    write_transcript(&f.focus, "lonely", &[user("Only transcript on disk here")]);

    let text = recover::run(&f.focus, recover::Mode::Auto).unwrap().text();
    assert!(text.contains("No operations recorded yet."));
    assert!(text.contains("Transcript: lonely.jsonl"));
    assert!(text.contains("/25000 used"));
}

// ===================================================================
// Done
// ===================================================================

#[test]
fn done_refuses_without_focus_session() {
    let f = fixture(|_| {});
    let done = done::run(&f.focus, false).unwrap();
    assert!(done.is_none());
    assert_eq!(done::render(None, false).unwrap().exit_code(), 1);
}

#[test]
fn archive_batches_group_by_category() {
    let f = fixture(|_| {});
    fs::create_dir_all(f.focus.project_root.join("docs")).unwrap();
    fs::write(f.focus.project_root.join("docs/build.md"), "").unwrap();
    let context = crate::markdown::FocusContext::parse(CONTEXT);
    let targets: IndexMap<String, String> = [
        ("build".to_string(), "docs/build.md".to_string()),
        ("testing".to_string(), "docs/testing/".to_string()),
    ]
    .into_iter()
    .collect();

    let batches = done::archive_batches(&context, &f.focus.project_root, &targets, 2);
    let shape: Vec<(usize, &str, usize)> = batches
        .iter()
        .map(|b| (b.number, b.category.as_str(), b.items.len()))
        .collect();
    assert_eq!(shape, [(1, "build", 2), (2, "build", 1), (3, "testing", 1)]);
    assert_eq!(batches[0].items, ["Linker flag missing", "Cache dir is stale"]);
    assert_eq!(batches[1].items, ["Link error"]);
    assert!(batches[0].exists && !batches[0].is_directory);
    assert!(!batches[2].exists && batches[2].is_directory);

    let none = done::archive_batches(&context, &f.focus.project_root, &IndexMap::new(), 5);
    assert_eq!(none[0].target, None);
}

#[test]
fn done_report_and_checklist() {
    let mut f = fixture(|_| {});
    activate(&f.focus);
    f.focus.env.session_id = Some("xyz".into());
    two_sessions(&f.focus);

    let done = done::run(&f.focus, false).unwrap().unwrap();
    assert_eq!(done.checkpoint, done::CheckpointTotals { sessions: 1, errors: 1, omissions: 0 });
    let text = done::render(Some(&done), false).unwrap().text();

    assert!(text.starts_with("=== FOCUS SESSION COMPLETION ===\n"));
    assert!(text.contains("Sessions processed: 1\nErrors detected: 1\nOmissions detected: 0"));
    assert!(text.contains("Task: Make the build green\nCompleted phases: 1/2"));
    assert!(text.contains("Findings: 3 items\nIssues: 1 items\nDecisions: 1 items"));
    assert!(text.contains("[Batch 1] build (3 items)\n  Target:  [CREATE]"));
    assert!(text.contains("[Group 1] Bash - make (1 items)"));

    assert!(text.contains("[REQUIRED] Follow these steps exactly:"));
    assert!(text.contains("\n\n1. VERIFY: Some phases are incomplete."));
    assert!(text.contains("\n\n2. ARCHIVE: For each batch above"));
    assert!(text.contains("\n\n3. PENDING ISSUES: Analyze groups"));
    assert!(text.contains("focuskeeper pending --clear"));
    assert!(text.contains("\n\n4. COMMIT: "));
    assert!(text.contains("\n\n5. CLEANUP: Call AskUserQuestion:"));
    assert!(text.contains(&format!("     - {}", f.focus.paths.context().display())));
    assert!(text.ends_with("6. REPORT: Summarize to user what was accomplished."));
}

#[test]
fn done_dry_run_is_labelled() {
    let f = fixture(|_| {});
    activate(&f.focus);
    let done = done::run(&f.focus, true).unwrap().unwrap();
    let text = done::render(Some(&done), true).unwrap().text();
    assert!(text.starts_with("=== FOCUS SESSION COMPLETION ===\n[DRY-RUN MODE]"));
    assert!(text.contains("No pending issues to process."));
    assert!(!text.contains("PENDING ISSUES:"));
}

#[test]
fn uncommitted_changes_skip_focus_dir() {
    let dir = tempfile::tempdir().unwrap();
    git2::Repository::init(dir.path()).unwrap();
    let focus_dir = dir.path().join(".claude").join("focus");
    fs::create_dir_all(&focus_dir).unwrap();
    fs::write(focus_dir.join("focus_context.md"), "x").unwrap();
    assert_eq!(done::uncommitted_changes(dir.path(), &focus_dir), Some(0));

    fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
    assert_eq!(done::uncommitted_changes(dir.path(), &focus_dir), Some(1));
}

#[test]
fn pending_analysis_previews_three() {
    let doc = (0..5)
        .map(|i| format!("\n### 2026-03-01T10:0{i}:00 | Bash | error\n- **Command**: `cargo build`\n- **Error**: boom {i}\n"))
        .collect::<String>();
    let groups = crate::markdown::pending::group(&crate::markdown::pending::parse(&doc));
    let text = done::pending_analysis(&groups);
    assert!(text.starts_with("\n--- Pending Issues Analysis (5 items) ---"));
    assert!(text.contains("[Group 1] Bash - cargo (5 items)"));
    assert_eq!(text.matches("    - ").count(), 3);
    assert!(text.ends_with("    ... and 2 more"));
}

// ===================================================================
// Summary and pending
// ===================================================================

#[test]
fn summary_reports_everything_and_collects_failures() {
    let f = fixture(|_| {});
    activate(&f.focus);
    two_sessions(&f.focus);

    let summary = summary::run(&f.focus).unwrap().unwrap();
    assert_eq!(summary.session.total_operations, 5);
    assert_eq!(summary.session.by_tool["Bash"], 4);
    assert_eq!(summary.session.transcript_count, 1);
    assert_eq!(summary.plan_status.completed, 1);
    assert_eq!(summary.findings.len(), 3);
    assert_eq!(summary.notable_operations.len(), 1);
    assert_eq!(summary.pending_issues, 1);

    let json: Value =
        serde_json::from_str(&summary::render(&f.focus, Some(&summary), summary::Format::Json).unwrap().text())
            .unwrap();
    assert_eq!(json["notable_operations"][0]["type"], "failed");
    assert_eq!(json["session"]["times"]["start"], "2026-03-01T10:00:00+00:00");

    let text = summary::render(&f.focus, Some(&summary), summary::Format::Text).unwrap().text();
    assert!(text.contains("SESSION INFORMATION SUMMARY"));
    assert!(text.contains("Tools: Bashx4, Readx1"));
    assert!(text.contains("  [ ] Fix"));
    assert!(text.contains("  - [Root cause] Linker flag missing"));
    assert!(text.contains("  - Link error: Added -lm"));
    assert!(text.contains("  - [FAILED] Bash: make: *** [all] Error 2..."));
}

#[test]
fn summary_refuses_without_focus_session() {
    let f = fixture(|_| {});
    assert!(summary::run(&f.focus).unwrap().is_none());
    let report = summary::render(&f.focus, None, summary::Format::Json).unwrap();
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn pending_lists_and_clears() {
    let f = fixture(|_| {});
    let doc = PendingDoc::new(f.focus.paths.pending_issues());
    assert!(pending::run(&f.focus, false).unwrap().text().contains("No pending issues to process."));

    doc.append(&[crate::markdown::pending::PendingIssue {
        timestamp: "2026-03-01T10:00:00".into(),
        tool: "Edit".into(),
        session_id: "abc".into(),
        snippet: "old_string not found".into(),
        file_path: Some("/p/lib.rs".into()),
        command: None,
    }])
    .unwrap();
    let text = pending::run(&f.focus, false).unwrap().text();
    assert!(text.contains("[Group 1] Edit - /p/lib.rs (1 items)"));

    assert_eq!(pending::run(&f.focus, true).unwrap().text(), "Cleared 1 pending issue(s).");
    assert_eq!(doc.count().unwrap(), 0);
}
