use crate::error::{FatalError, Result};
use crate::paths::{self, Env};
use crate::store;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const DEFAULT_TOML: &str = include_str!("default.toml");
const PROJECT_FILE: &str = "focus.toml";
const LOCAL_FILE: &str = "focus.local.toml";

// ===================================================================
// Typed configuration
// ===================================================================

/// Effective configuration: built-in defaults < project < local.
///
/// Every key has a value in the built-in layer, so the override files only
/// need to name what they change.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
    pub hooks: HooksConfig,
    pub recover: RecoverConfig,
    pub checkpoint: CheckpointConfig,
    pub done: DoneConfig,
    pub classifier: ClassifierConfig,
    pub reminders: RemindersConfig,
    pub constraints: ConstraintsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub focus_dir: PathBuf,
    #[serde(default)]
    pub projects_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub level: String,
    /// Write large intermediate texts to `logs/verbose/` even below debug.
    pub verbose_dumps: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HooksConfig {
    /// Weighted search-tool total that triggers an info-persistence reminder.
    pub threshold: u32,
    pub max_strikes: u32,
    pub error_patterns: Vec<String>,
    pub search_tools: Vec<String>,
    pub modify_tools: Vec<String>,
    pub full_reminder_interval_minutes: i64,
    pub recite_threshold: u32,
    #[serde(default)]
    pub weights: IndexMap<String, u32>,
    #[serde(default)]
    pub recommendations: IndexMap<String, Vec<String>>,
    pub confirm_before_modify: ConfirmConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmConfig {
    pub enabled: bool,
    /// Ask the classifier whether the user approved the change, instead of
    /// only reminding.
    pub use_classifier: bool,
    pub code_extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoverConfig {
    pub max_sessions: usize,
    pub char_budget: usize,
    pub list_char_budget: usize,
    pub max_entry_length: usize,
    pub decay_factor: f64,
    pub min_session_budget: usize,
    pub header_reserve: usize,
    pub noise_patterns: Vec<String>,
    pub filter_tools: Vec<String>,
    pub filter_tool_categories: Vec<String>,
    pub key_tools: Vec<String>,
    #[serde(default)]
    pub tool_categories: IndexMap<String, Vec<String>>,
}

impl RecoverConfig {
    /// Tools whose assistant turns are dropped when they are the only thing
    /// the turn did.
    pub fn filtered_tools(&self) -> HashSet<String> {
        let mut tools: HashSet<String> = self.filter_tools.iter().cloned().collect();
        for category in &self.filter_tool_categories {
            if let Some(members) = self.tool_categories.get(category) {
                tools.extend(members.iter().cloned());
            }
        }
        tools
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    pub error_detection: bool,
    pub omission_detection: bool,
    pub use_classifier: bool,
    pub omission_char_budget: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DoneConfig {
    pub edit_tools: Vec<String>,
    pub repeated_edit_threshold: usize,
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    pub batch_size: usize,
    /// Category → path relative to the project; a trailing `/` is a directory.
    #[serde(default)]
    pub targets: IndexMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemindersConfig {
    pub enabled: bool,
    #[serde(default)]
    pub files: Vec<ReminderFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderMode {
    Time,
    Turns,
    #[default]
    Both,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReminderFile {
    pub file: String,
    #[serde(default)]
    pub mode: ReminderMode,
    #[serde(default = "default_time_minutes")]
    pub time_minutes: f64,
    #[serde(default = "default_turns")]
    pub turns: u32,
}

fn default_time_minutes() -> f64 {
    20.0
}

fn default_turns() -> u32 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConstraintsConfig {
    pub enabled: bool,
    /// Raw per-rule tables, interpreted by the rule registry.
    #[serde(default)]
    pub rules: toml::Table,
}

// ===================================================================
// Loading
// ===================================================================

impl Config {
    /// The built-in layer alone.
    pub fn builtin() -> Result<Self> {
        let table = parse_layer(DEFAULT_TOML, Path::new("<built-in>"))?;
        into_config(table, Path::new("<built-in>"))
    }

    /// Load and merge all three layers for `project_root`.
    pub fn load(project_root: &Path) -> Result<Self> {
        let mut merged = parse_layer(DEFAULT_TOML, Path::new("<built-in>"))?;
        let config_dir = project_root.join(".claude").join("config");
        for name in [PROJECT_FILE, LOCAL_FILE] {
            let path = config_dir.join(name);
            if let Some(text) = store::read_text(&path)? {
                let layer = parse_layer(&text, &path)?;
                deep_merge(&mut merged, layer);
                tracing::debug!(path = %path.display(), "merged config layer");
            }
        }
        into_config(merged, &config_dir)
    }

    /// Focus directory: `CLAUDE_FOCUS_DIR` wins over `paths.focus_dir`;
    /// relative paths hang off the project root.
    pub fn focus_dir(&self, project_root: &Path, env: &Env) -> PathBuf {
        let dir = env.focus_dir.as_deref().unwrap_or(&self.paths.focus_dir);
        paths::resolve(project_root, dir)
    }

    /// Host transcripts root: `CLAUDE_FOCUS_PROJECTS_DIR`, `paths.projects_dir`,
    /// then `~/.claude/projects`.
    pub fn projects_dir(&self, project_root: &Path, env: &Env) -> Result<PathBuf> {
        if let Some(dir) = env.projects_dir.as_deref().or(self.paths.projects_dir.as_deref()) {
            return Ok(paths::resolve(project_root, dir));
        }
        Ok(paths::default_projects_dir()?)
    }
}

fn parse_layer(text: &str, path: &Path) -> Result<toml::Table> {
    toml::from_str(text).map_err(|e| FatalError::config(path, e))
}

fn into_config(table: toml::Table, path: &Path) -> Result<Config> {
    toml::Value::Table(table)
        .try_into::<Config>()
        .map_err(|e| FatalError::config(path, e))
}

/// Merge `overlay` into `base`: tables merge key by key, everything else
/// (arrays included) replaces.
pub fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
