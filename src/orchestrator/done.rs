use super::{Report, checkpoint, rule};
use crate::error::Result;
use crate::markdown::pending::{self, IssueGroup, PendingDoc};
use crate::markdown::{FocusContext, Row};
use crate::session::Focus;
use crate::transcript::clip;
use anyhow::Context as _;
use indexmap::IndexMap;
use minijinja::{Environment, context};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Scratchpad rows sharing a category, headed for one archive file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveBatch {
    pub number: usize,
    pub category: String,
    /// Empty when no target is configured for the category.
    pub target: Option<PathBuf>,
    pub is_directory: bool,
    pub exists: bool,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointTotals {
    pub sessions: usize,
    pub errors: usize,
    pub omissions: usize,
}

/// Everything the completion report is built from.
#[derive(Debug)]
pub struct Done {
    pub checkpoint: CheckpointTotals,
    pub context: FocusContext,
    pub batches: Vec<ArchiveBatch>,
    pub pending: Vec<IssueGroup>,
    /// Changed files outside the focus directory; `None` outside git.
    pub uncommitted: Option<usize>,
    pub session_files: Vec<PathBuf>,
}

/// Close out a focus session: fold every old session through a silent
/// checkpoint, then gather what the assistant must archive, triage and
/// clean up. Returns `None` without an active session.
pub fn run(focus: &Focus, dry_run: bool) -> Result<Option<Done>> {
    let totals = match checkpoint::run(focus, checkpoint::Mode::Silent, dry_run)? {
        checkpoint::Checkpoint::NoFocusSession => return Ok(None),
        checkpoint::Checkpoint::Processed(p) => CheckpointTotals {
            sessions: p.sessions.len(),
            errors: p.sessions.iter().map(|s| s.errors).sum(),
            omissions: p.sessions.iter().filter(|s| s.has_omissions()).count(),
        },
        _ => CheckpointTotals::default(),
    };

    let context = FocusContext::load(&focus.paths.context())?;
    let batches = archive_batches(
        &context,
        &focus.project_root,
        &focus.config.done.archive.targets,
        focus.config.done.archive.batch_size,
    );
    let pending = pending::group(&PendingDoc::new(focus.paths.pending_issues()).parse()?);
    let uncommitted = uncommitted_changes(&focus.project_root, &focus.paths.dir);
    tracing::info!(
        sessions = totals.sessions,
        batches = batches.len(),
        pending_groups = pending.len(),
        ?uncommitted,
        "completion gathered"
    );

    Ok(Some(Done {
        checkpoint: totals,
        context,
        batches,
        pending,
        uncommitted,
        session_files: focus.paths.session_files(),
    }))
}

/// Rows with a `Category` cell, grouped by lower-cased category (findings,
/// then issues, then decisions) and split into numbered batches.
pub fn archive_batches(
    context: &FocusContext,
    project_root: &Path,
    targets: &IndexMap<String, String>,
    batch_size: usize,
) -> Vec<ArchiveBatch> {
    let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
    let tables: [(&[Row], &str); 3] = [
        (&context.findings, "Discovery"),
        (&context.issues, "Issue"),
        (&context.decisions, "Decision"),
    ];
    for (rows, column) in tables {
        for row in rows {
            let category = row
                .get("Category")
                .map(|c| c.trim().to_lowercase())
                .unwrap_or_default();
            if category.is_empty() {
                continue;
            }
            let text = row.get(column).map_or("N/A", String::as_str);
            grouped
                .entry(category)
                .or_default()
                .push(clip(text, 60).to_string());
        }
    }

    let mut batches = Vec::new();
    for (category, items) in grouped {
        let target = targets.get(&category).filter(|t| !t.is_empty());
        let is_directory = target.is_some_and(|t| t.ends_with('/'));
        let path = target.map(|t| project_root.join(t));
        let exists = path.as_deref().is_some_and(Path::exists);
        for chunk in items.chunks(batch_size.max(1)) {
            batches.push(ArchiveBatch {
                number: batches.len() + 1,
                category: category.clone(),
                target: path.clone(),
                is_directory,
                exists,
                items: chunk.to_vec(),
            });
        }
    }
    batches
}

/// Number of changed or untracked paths in the work tree containing
/// `project_root`, not counting anything under `focus_dir`.
pub fn uncommitted_changes(project_root: &Path, focus_dir: &Path) -> Option<usize> {
    let repo = git2::Repository::discover(project_root).ok()?;
    let workdir = repo.workdir()?.to_path_buf();
    let workdir = workdir.canonicalize().unwrap_or(workdir);
    let focus_dir = focus_dir.canonicalize().unwrap_or_else(|_| focus_dir.to_path_buf());
    let excluded = focus_dir.strip_prefix(&workdir).ok().map(Path::to_path_buf);

    let mut opts = git2::StatusOptions::new();
    opts.include_untracked(true).include_ignored(false).recurse_untracked_dirs(true);
    let statuses = repo
        .statuses(Some(&mut opts))
        .inspect_err(|e| tracing::warn!(error = %e, "git status failed"))
        .ok()?;
    Some(
        statuses
            .iter()
            .filter(|s| {
                let Some(path) = s.path() else {
                    return true;
                };
                !excluded
                    .as_deref()
                    .is_some_and(|dir| !dir.as_os_str().is_empty() && Path::new(path).starts_with(dir))
            })
            .count(),
    )
}

const CHECKLIST: &str = r#"
{{ rule }}
[REQUIRED] Follow these steps exactly:
{{ rule }}
{%- for step in steps %}

{{ loop.index }}. {{ step.title }}
{%- for line in step.lines %}
{{ line }}
{%- endfor %}
{%- endfor %}"#;

#[derive(Debug, Serialize)]
struct Step {
    title: &'static str,
    lines: Vec<String>,
}

fn steps(done: &Done) -> Vec<Step> {
    let mut steps = Vec::new();
    if done.context.plan_status.has_incomplete() {
        steps.push(Step {
            title: "VERIFY: Some phases are incomplete. Call AskUserQuestion:",
            lines: vec![
                r#"   - Question: "Some phases are not marked complete. Proceed with session closure?""#.into(),
                r#"   - Options: ["Proceed anyway", "Cancel and continue working"]"#.into(),
            ],
        });
    }
    if !done.batches.is_empty() {
        steps.push(Step {
            title: "ARCHIVE: For each batch above, call AskUserQuestion:",
            lines: vec![
                r#"   - Header: "Archive""#.into(),
                r#"   - Question: "Archive these items to [target]?""#.into(),
                r#"   - Options: ["Accept", "Edit destinations", "Skip all"]"#.into(),
                "   After confirmation, write items to target files.".into(),
            ],
        });
    }
    if !done.pending.is_empty() {
        steps.push(Step {
            title: "PENDING ISSUES: Analyze groups and call AskUserQuestion:",
            lines: vec![
                r#"   - Header: "Pending Issues""#.into(),
                r#"   - Question: "How to handle these pending issues?""#.into(),
                r#"   - Options: ["Archive patterns to troubleshooting", "Discard all", "Review individually"]"#.into(),
                "   To discard, run: focuskeeper pending --clear".into(),
            ],
        });
    }
    let mut commit = Vec::new();
    if let Some(n) = done.uncommitted {
        commit.push(format!("   Uncommitted changes: {n} file(s)"));
    }
    steps.push(Step {
        title: "COMMIT: Check for uncommitted changes and commit if needed.",
        lines: commit,
    });
    let mut cleanup: Vec<String> = vec![
        r#"   - Header: "Cleanup""#.into(),
        r#"   - Question: "Delete focus session files?""#.into(),
        r#"   - Options: ["Yes, cleanup all", "No, keep files"]"#.into(),
        "   If confirmed, delete:".into(),
    ];
    cleanup.extend(done.session_files.iter().map(|p| format!("     - {}", p.display())));
    steps.push(Step {
        title: "CLEANUP: Call AskUserQuestion:",
        lines: cleanup,
    });
    steps.push(Step {
        title: "REPORT: Summarize to user what was accomplished.",
        lines: Vec::new(),
    });
    steps
}

/// The numbered `[REQUIRED]` steps closing the report.
pub fn checklist(done: &Done) -> Result<String> {
    let env = Environment::new();
    let tmpl = env
        .template_from_str(CHECKLIST)
        .context("parsing completion checklist")?;
    let text = tmpl
        .render(context! { rule => rule(50), steps => steps(done) })
        .context("rendering completion checklist")?;
    Ok(text)
}

pub fn render(done: Option<&Done>, dry_run: bool) -> Result<Report> {
    let Some(done) = done else {
        return Ok(Report::refuse("No active focus session found. Run /focus:start first."));
    };
    let mut report = Report::default();
    report.push(if dry_run {
        "=== FOCUS SESSION COMPLETION ===\n[DRY-RUN MODE]"
    } else {
        "=== FOCUS SESSION COMPLETION ==="
    });

    let c = &done.checkpoint;
    report.push(format!(
        "\n--- Checkpoint Summary ---\nSessions processed: {}\nErrors detected: {}\nOmissions detected: {}",
        c.sessions, c.errors, c.omissions
    ));

    let ctx = &done.context;
    let task = if ctx.task.chars().count() > 100 {
        format!("{}...", clip(&ctx.task, 100))
    } else {
        ctx.task.clone()
    };
    report.push(format!(
        "\n--- Session Summary ---\nTask: {task}\nCompleted phases: {}/{}\n\nFindings: {} items\nIssues: {} items\nDecisions: {} items",
        ctx.plan_status.completed,
        ctx.plan_status.total,
        ctx.findings.len(),
        ctx.issues.len(),
        ctx.decisions.len()
    ));

    let mut lines = vec!["\n--- Archive Suggestions ---".to_string()];
    if done.batches.is_empty() {
        lines.push("No items with Category field found.".into());
    }
    for batch in &done.batches {
        let target = batch
            .target
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let dir = if batch.is_directory { " (scan dir)" } else { "" };
        let status = if batch.exists { "[EXISTS]" } else { "[CREATE]" };
        lines.push(format!(
            "\n[Batch {}] {} ({} items)",
            batch.number,
            batch.category,
            batch.items.len()
        ));
        lines.push(format!("  Target: {target}{dir} {status}"));
        lines.extend(batch.items.iter().map(|item| format!("    - {item}")));
    }
    report.push(lines.join("\n"));

    report.push(pending_analysis(&done.pending));
    report.push(checklist(done)?);
    Ok(report)
}

/// The grouped pending issues with up to three previews per group.
pub fn pending_analysis(groups: &[IssueGroup]) -> String {
    if groups.is_empty() {
        return "\n--- Pending Issues Analysis ---\nNo pending issues to process.".to_string();
    }
    let total: usize = groups.iter().map(IssueGroup::count).sum();
    let mut lines = vec![format!("\n--- Pending Issues Analysis ({total} items) ---")];
    for (i, group) in groups.iter().enumerate() {
        let sub = group
            .subgroup
            .as_deref()
            .map(|s| format!(" - {s}"))
            .unwrap_or_default();
        lines.push(format!(
            "\n[Group {}] {}{sub} ({} items)",
            i + 1,
            group.tool,
            group.count()
        ));
        for issue in group.issues.iter().take(3) {
            lines.push(format!("    - {}...", clip(&issue.body, 50).replace('\n', " ")));
        }
        if group.count() > 3 {
            lines.push(format!("    ... and {} more", group.count() - 3));
        }
    }
    lines.join("\n")
}
