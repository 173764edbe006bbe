//! Config-driven pre-action rules.
//!
//! Rules run in registry order and the first violation wins. Each rule reads
//! its own table under `[constraints.rules.<name>]`; a table that does not
//! deserialize disables that rule for the call rather than failing the hook.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

// ===================================================================
// Actions and outcomes
// ===================================================================

/// The part of a tool call the rules look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    Edit { file_path: &'a str, content: &'a str },
    Write { file_path: &'a str, content: &'a str },
    Bash { command: &'a str },
}

impl<'a> Action<'a> {
    fn content(&self) -> Option<(&'a str, &'a str)> {
        match *self {
            Self::Edit { file_path, content } | Self::Write { file_path, content } => {
                (!content.is_empty()).then_some((file_path, content))
            }
            Self::Bash { .. } => None,
        }
    }

    fn command(&self) -> Option<&'a str> {
        match *self {
            Self::Bash { command } if !command.is_empty() => Some(command),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Remind,
    Warn,
    Block,
}

impl Severity {
    fn prefix(self) -> &'static str {
        match self {
            Self::Remind => "[REMIND]",
            Self::Warn => "[WARN]",
            Self::Block => "[BLOCK]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub rule: &'static str,
    pub message: String,
    pub severity: Severity,
}

impl Violation {
    pub fn is_block(&self) -> bool {
        self.severity == Severity::Block
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.severity.prefix(), self.message)
    }
}

// ===================================================================
// Registry
// ===================================================================

/// What a check needs besides its own parameters.
struct Ctx<'a> {
    action: Action<'a>,
    project_root: &'a Path,
}

/// A failed check: message plus, for rules whose sub-rules carry their own
/// action, a severity override.
type Finding = (String, Option<Severity>);

struct Rule {
    name: &'static str,
    default: Severity,
    check: fn(&Ctx<'_>, &toml::Table) -> Result<Option<Finding>, toml::de::Error>,
}

const REGISTRY: &[Rule] = &[
    Rule { name: "line_limit", default: Severity::Warn, check: run::<LineLimit> },
    Rule { name: "no_tabs", default: Severity::Block, check: run::<NoTabs> },
    Rule { name: "no_hardcoded_path", default: Severity::Warn, check: run::<NoHardcodedPath> },
    Rule { name: "snake_case_naming", default: Severity::Block, check: run::<SnakeCaseNaming> },
    Rule { name: "no_backslash_path", default: Severity::Warn, check: run::<NoBackslashPath> },
    Rule { name: "no_powershell", default: Severity::Block, check: run::<NoPowershell> },
    Rule { name: "no_bash_file_ops", default: Severity::Warn, check: run::<NoBashFileOps> },
];

/// Evaluate every enabled rule against `action`; the first violation wins.
pub fn check(
    action: Action<'_>,
    enabled: bool,
    rules: &toml::Table,
    project_root: &Path,
) -> Option<Violation> {
    if !enabled {
        return None;
    }
    let ctx = Ctx { action, project_root };
    for rule in REGISTRY {
        let Some(table) = rules.get(rule.name).and_then(toml::Value::as_table) else {
            continue;
        };
        let header = match RuleHeader::parse(table) {
            Ok(h) if h.enabled => h,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(rule = rule.name, error = %e, "invalid rule config, rule disabled");
                continue;
            }
        };
        match (rule.check)(&ctx, table) {
            Ok(Some((message, override_severity))) => {
                let severity = override_severity
                    .or(header.action)
                    .unwrap_or(rule.default);
                tracing::debug!(rule = rule.name, ?severity, %message, "constraint triggered");
                return Some(Violation {
                    rule: rule.name,
                    message,
                    severity,
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(rule = rule.name, error = %e, "invalid rule config, rule disabled");
            }
        }
    }
    None
}

/// Whether `[constraints.rules.<name>] enabled = true`.
pub fn rule_enabled(rules: &toml::Table, name: &str) -> bool {
    rules
        .get(name)
        .and_then(toml::Value::as_table)
        .and_then(|t| RuleHeader::parse(t).ok())
        .is_some_and(|h| h.enabled)
}

#[derive(Debug, Deserialize)]
struct RuleHeader {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    action: Option<Severity>,
}

impl RuleHeader {
    fn parse(table: &toml::Table) -> Result<Self, toml::de::Error> {
        parse_table(table)
    }
}

fn parse_table<T: DeserializeOwned>(table: &toml::Table) -> Result<T, toml::de::Error> {
    toml::Value::Table(table.clone()).try_into::<T>()
}

trait Check: DeserializeOwned {
    fn check(&self, ctx: &Ctx<'_>) -> Option<Finding>;
}

fn run<C: Check>(ctx: &Ctx<'_>, table: &toml::Table) -> Result<Option<Finding>, toml::de::Error> {
    let params: C = parse_table(table)?;
    Ok(params.check(ctx))
}

// ===================================================================
// Content rules (Edit / Write)
// ===================================================================

#[derive(Deserialize)]
struct LineLimit {
    #[serde(default = "default_line_threshold")]
    threshold: usize,
}

fn default_line_threshold() -> usize {
    100
}

impl Check for LineLimit {
    fn check(&self, ctx: &Ctx<'_>) -> Option<Finding> {
        let (_, content) = ctx.action.content()?;
        let lines = content.matches('\n').count() + 1;
        (lines > self.threshold).then(|| {
            (
                format!(
                    "Modification exceeds {} lines (actual: {lines}), consider splitting into smaller changes",
                    self.threshold
                ),
                None,
            )
        })
    }
}

fn default_tab_extensions() -> Vec<String> {
    [".gd", ".py", ".cpp", ".h", ".hpp", ".tscn", ".tres"]
        .map(String::from)
        .to_vec()
}

#[derive(Deserialize)]
struct NoTabs {
    #[serde(default = "default_tab_extensions")]
    extensions: Vec<String>,
}

impl Check for NoTabs {
    fn check(&self, ctx: &Ctx<'_>) -> Option<Finding> {
        let (file_path, content) = ctx.action.content()?;
        if !has_extension(file_path, &self.extensions) || !content.contains('\t') {
            return None;
        }
        Some(("Tab characters detected, use spaces for indentation".into(), None))
    }
}

#[derive(Deserialize)]
struct NoHardcodedPath {
    #[serde(default)]
    rules: Vec<PathRule>,
}

#[derive(Deserialize)]
struct PathRule {
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(default)]
    regex: String,
    #[serde(default = "default_path_message")]
    message: String,
    #[serde(default = "default_path_action")]
    action: Severity,
}

fn default_path_message() -> String {
    "Hardcoded path detected".into()
}

fn default_path_action() -> Severity {
    Severity::Warn
}

impl Check for NoHardcodedPath {
    fn check(&self, ctx: &Ctx<'_>) -> Option<Finding> {
        let (file_path, content) = ctx.action.content()?;
        for rule in &self.rules {
            if rule.regex.is_empty() || !has_extension(file_path, &rule.extensions) {
                continue;
            }
            let re = match Regex::new(&rule.regex) {
                Ok(re) => re,
                Err(e) => {
                    tracing::warn!(regex = %rule.regex, error = %e, "invalid hardcoded-path regex skipped");
                    continue;
                }
            };
            if re.is_match(content) {
                return Some((rule.message.clone(), Some(rule.action)));
            }
        }
        None
    }
}

// ===================================================================
// Naming (Write)
// ===================================================================

fn default_naming_extensions() -> Vec<String> {
    [".gd", ".tscn", ".tres", ".py", ".cpp", ".h", ".hpp"]
        .map(String::from)
        .to_vec()
}

fn default_exclude_files() -> Vec<String> {
    ["CLAUDE.md", "README.md", "CHANGELOG.md", "LICENSE"]
        .map(String::from)
        .to_vec()
}

fn default_true() -> bool {
    true
}

const SKIPPED_DIRS: &[&str] = &[".claude", ".git", ".godot", "node_modules", "__pycache__"];

#[derive(Deserialize)]
struct SnakeCaseNaming {
    #[serde(default = "default_naming_extensions")]
    extensions: Vec<String>,
    #[serde(default = "default_exclude_files")]
    exclude_files: Vec<String>,
    #[serde(default = "default_true")]
    check_dirs: bool,
}

fn snake_case_re() -> &'static Regex {
    static SNAKE: OnceLock<Regex> = OnceLock::new();
    SNAKE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid snake case regex"))
}

fn upper_case_re() -> &'static Regex {
    static UPPER: OnceLock<Regex> = OnceLock::new();
    UPPER.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("valid upper case regex"))
}

fn name_ok(name: &str) -> bool {
    upper_case_re().is_match(name) || snake_case_re().is_match(name)
}

impl Check for SnakeCaseNaming {
    fn check(&self, ctx: &Ctx<'_>) -> Option<Finding> {
        let Action::Write { file_path, .. } = ctx.action else {
            return None;
        };
        if file_path.is_empty() {
            return None;
        }
        let normalized = file_path.replace('\\', "/");
        let root = ctx.project_root.to_string_lossy().replace('\\', "/");
        let relative = normalized
            .strip_prefix(root.trim_end_matches('/'))
            .filter(|rest| rest.starts_with('/'))
            .unwrap_or(&normalized);

        let mut parts: Vec<&str> = relative.split('/').collect();
        let filename = parts.pop().unwrap_or_default();
        if filename.starts_with('.') || self.exclude_files.iter().any(|f| f == filename) {
            return None;
        }
        if !has_extension(filename, &self.extensions) {
            return None;
        }
        let stem = match filename.rfind('.') {
            Some(i) if i > 0 => &filename[..i],
            _ => filename,
        };
        if !name_ok(stem) {
            return Some((
                format!("Filename '{filename}' does not follow snake_case convention"),
                None,
            ));
        }

        if self.check_dirs {
            let bad = parts.into_iter().find(|part| {
                !part.is_empty()
                    && !part.starts_with('.')
                    && !SKIPPED_DIRS.contains(part)
                    && !name_ok(part)
            });
            if let Some(dir) = bad {
                return Some((
                    format!("Directory name '{dir}' does not follow snake_case convention"),
                    None,
                ));
            }
        }
        None
    }
}

// ===================================================================
// Shell rules (Bash)
// ===================================================================

#[derive(Deserialize)]
struct NoBackslashPath {}

fn sed_awk_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(sed|awk)\s").expect("valid sed/awk regex"))
}

fn escape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\\[ntr"'0]"#).expect("valid escape regex"))
}

impl Check for NoBackslashPath {
    fn check(&self, ctx: &Ctx<'_>) -> Option<Finding> {
        let command = ctx.action.command()?;
        if sed_awk_re().is_match(command) {
            return None;
        }
        let without_doubled = command.replace("\\\\", "");
        let cleaned = escape_re().replace_all(&without_doubled, "");
        cleaned
            .contains('\\')
            .then(|| ("Backslash path detected, use forward slash / instead".into(), None))
    }
}

fn default_powershell_patterns() -> Vec<String> {
    [
        r"\bGet-ChildItem\b",
        r"\bSelect-String\b",
        r"\bGet-Content\b",
        r"\bSet-Location\b",
        r"\bNew-Item\b",
        r"\bRemove-Item\b",
        r"\bWrite-Host\b",
        r"\bInvoke-WebRequest\b",
        r"\bInvoke-Expression\b",
    ]
    .map(String::from)
    .to_vec()
}

#[derive(Deserialize)]
struct NoPowershell {
    #[serde(default = "default_powershell_patterns")]
    patterns: Vec<String>,
    #[serde(default = "default_true")]
    check_dot_backslash: bool,
}

fn dot_backslash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\.\\").expect("valid dot-backslash regex"))
}

impl Check for NoPowershell {
    fn check(&self, ctx: &Ctx<'_>) -> Option<Finding> {
        let command = ctx.action.command()?;
        let hit = self.patterns.iter().any(|p| {
            match RegexBuilder::new(p).case_insensitive(true).build() {
                Ok(re) => re.is_match(command),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "invalid powershell pattern skipped");
                    false
                }
            }
        });
        (hit || (self.check_dot_backslash && dot_backslash_re().is_match(command)))
            .then(|| ("PowerShell commands not allowed, use Git Bash instead".into(), None))
    }
}

#[derive(Deserialize)]
struct NoBashFileOps {}

fn file_ops() -> &'static [(Regex, &'static str, &'static str)] {
    static OPS: OnceLock<Vec<(Regex, &'static str, &'static str)>> = OnceLock::new();
    OPS.get_or_init(|| {
        [
            (r"^\s*cat\s+[^|<]", "Read", "cat"),
            (r"^\s*head\s", "Read", "head"),
            (r"^\s*tail\s", "Read", "tail"),
            (r"^\s*grep\s", "Grep", "grep"),
            (r"^\s*rg\s", "Grep", "rg"),
            (r"^\s*find\s+\S+\s+.*-name", "Glob", "find"),
        ]
        .into_iter()
        .map(|(p, tool, cmd)| (Regex::new(p).expect("valid file-op regex"), tool, cmd))
        .collect()
    })
}

impl Check for NoBashFileOps {
    fn check(&self, ctx: &Ctx<'_>) -> Option<Finding> {
        let command = ctx.action.command()?;
        if command.contains("<<") {
            return None;
        }
        file_ops()
            .iter()
            .find(|(re, _, _)| re.is_match(command))
            .map(|(_, tool, cmd)| (format!("Consider using {tool} tool instead of {cmd} command"), None))
    }
}

/// Case-insensitive extension match against a list like `[".py", ".rs"]`.
pub fn has_extension(path: &str, extensions: &[String]) -> bool {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(i) if i > 0 => {
            let ext = name[i..].to_lowercase();
            extensions.iter().any(|e| e.to_lowercase() == ext)
        }
        _ => false,
    }
}
