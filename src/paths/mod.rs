use anyhow::Context;
use std::env;
use std::path::{Path, PathBuf};

/// Process environment captured once in `main` and passed down explicitly.
#[derive(Debug, Clone, Default)]
pub struct Env {
    /// `CLAUDE_SESSION_ID`: explicit current-session override.
    pub session_id: Option<String>,
    /// `CLAUDE_FOCUS_DIR`: focus directory override.
    pub focus_dir: Option<PathBuf>,
    /// `CLAUDE_FOCUS_PROJECTS_DIR`: where the host keeps transcripts.
    pub projects_dir: Option<PathBuf>,
    /// `CLAUDE_PLUGIN_ROOT`: recorded in a sidecar at session start.
    pub plugin_root: Option<PathBuf>,
    /// `FOCUS_LOG`: tracing filter directive.
    pub log_filter: Option<String>,
}

impl Env {
    pub fn from_process() -> Self {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            session_id: var("CLAUDE_SESSION_ID"),
            focus_dir: var("CLAUDE_FOCUS_DIR").map(PathBuf::from),
            projects_dir: var("CLAUDE_FOCUS_PROJECTS_DIR").map(PathBuf::from),
            plugin_root: var("CLAUDE_PLUGIN_ROOT").map(PathBuf::from),
            log_filter: var("FOCUS_LOG"),
        }
    }
}

/// Find the project root for `start`: the enclosing git work tree, or
/// `start` itself outside of git.
pub fn discover_project_root(start: &Path) -> PathBuf {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    git2::Repository::discover(&start)
        .ok()
        .and_then(|repo| repo.workdir().map(Path::to_path_buf))
        .map(|p| p.canonicalize().unwrap_or(p))
        .unwrap_or(start)
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Every file the tool keeps under the project's focus directory.
#[derive(Debug, Clone)]
pub struct FocusPaths {
    pub dir: PathBuf,
}

impl FocusPaths {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn context(&self) -> PathBuf {
        self.dir.join("focus_context.md")
    }

    pub fn operations(&self) -> PathBuf {
        self.dir.join("operations.jsonl")
    }

    pub fn counter(&self) -> PathBuf {
        self.dir.join("action_count.json")
    }

    pub fn failures(&self) -> PathBuf {
        self.dir.join("failure_count.json")
    }

    pub fn confirm(&self) -> PathBuf {
        self.dir.join("confirm_state.json")
    }

    pub fn reminders(&self) -> PathBuf {
        self.dir.join("reminder_state.json")
    }

    pub fn pending_issues(&self) -> PathBuf {
        self.dir.join("pending_issues.md")
    }

    pub fn session_id_marker(&self) -> PathBuf {
        self.dir.join("current_session_id.txt")
    }

    pub fn session_source_marker(&self) -> PathBuf {
        self.dir.join("current_session_source.txt")
    }

    pub fn plugin_root_marker(&self) -> PathBuf {
        self.dir.join("focus_plugin_root.txt")
    }

    pub fn logs(&self) -> PathBuf {
        self.dir.join("logs")
    }

    pub fn verbose(&self) -> PathBuf {
        self.logs().join("verbose")
    }

    /// Files a finished focus session leaves behind for cleanup.
    pub fn session_files(&self) -> Vec<PathBuf> {
        vec![
            self.context(),
            self.operations(),
            self.counter(),
            self.failures(),
            self.confirm(),
            self.reminders(),
            self.pending_issues(),
            self.session_id_marker(),
            self.session_source_marker(),
            self.plugin_root_marker(),
        ]
    }
}

/// Folder name the host uses for a project's transcripts: the absolute
/// path with every non-alphanumeric character replaced by `-`.
pub fn transcript_folder_name(launch_dir: &Path) -> String {
    launch_dir
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Where the host keeps transcripts for this project.
pub fn transcripts_dir(projects_dir: &Path, launch_dir: &Path) -> PathBuf {
    projects_dir.join(transcript_folder_name(launch_dir))
}

/// Default `~/.claude/projects`.
pub fn default_projects_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().context("cannot determine home directory")?;
    Ok(home.join(".claude").join("projects"))
}
