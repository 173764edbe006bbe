use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

// ===================================================================
// Shared Enums
// ===================================================================

/// How a session was started (used by SessionStart).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStartSource {
    Startup,
    Resume,
    Clear,
    Compact,
    #[serde(other)]
    Unknown,
}

impl SessionStartSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Resume => "resume",
            Self::Clear => "clear",
            Self::Compact => "compact",
            Self::Unknown => "unknown",
        }
    }
}

// ===================================================================
// Hook Input Types (received via stdin, snake_case JSON)
// ===================================================================

/// Fields shared by all hook event inputs.
#[derive(Debug, Clone, Deserialize)]
pub struct CommonInput {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub transcript_path: String,
    #[serde(default)]
    pub cwd: String,
}

// --- Per-event input structs ---

#[derive(Debug, Deserialize)]
pub struct SessionStartInput {
    #[serde(flatten)]
    pub common: CommonInput,
    #[serde(default)]
    pub source: Option<SessionStartSource>,
}

#[derive(Debug, Deserialize)]
pub struct UserPromptSubmitInput {
    #[serde(flatten)]
    pub common: CommonInput,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct PreToolUseInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default)]
    pub tool_use_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostToolUseInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default)]
    pub tool_response: serde_json::Value,
    #[serde(default)]
    pub tool_use_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StopInput {
    #[serde(flatten)]
    pub common: CommonInput,
    #[serde(default)]
    pub stop_hook_active: bool,
}

/// Top-level hook input, deserialized from stdin JSON.
///
/// Tagged by the `hook_event_name` field. Events this tool does not act on
/// land in `Other`.
#[derive(Debug, Deserialize)]
#[serde(tag = "hook_event_name")]
pub enum HookInput {
    SessionStart(SessionStartInput),
    UserPromptSubmit(UserPromptSubmitInput),
    PreToolUse(PreToolUseInput),
    PostToolUse(PostToolUseInput),
    Stop(StopInput),
    #[serde(other)]
    Other,
}

impl HookInput {
    /// Access the common fields shared by the hook events we handle.
    pub fn common(&self) -> Option<&CommonInput> {
        match self {
            Self::SessionStart(e) => Some(&e.common),
            Self::UserPromptSubmit(e) => Some(&e.common),
            Self::PreToolUse(e) => Some(&e.common),
            Self::PostToolUse(e) => Some(&e.common),
            Self::Stop(e) => Some(&e.common),
            Self::Other => None,
        }
    }
}

// ===================================================================
// Degraded input
// ===================================================================

/// The identifiers scraped out of stdin that did not deserialize.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFields {
    pub session_id: Option<String>,
    pub tool_use_id: Option<String>,
    pub tool_name: Option<String>,
    pub hook_event_name: Option<String>,
}

fn field_re(name: &str) -> Regex {
    Regex::new(&format!(r#""{name}"\s*:\s*"([^"]+)""#)).expect("valid key field regex")
}

fn key_field_res() -> &'static [Regex; 4] {
    static RES: OnceLock<[Regex; 4]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            field_re("session_id"),
            field_re("tool_use_id"),
            field_re("tool_name"),
            field_re("hook_event_name"),
        ]
    })
}

impl KeyFields {
    /// Recover what can be recovered from `raw`. `None` when nothing matched.
    pub fn scrape(raw: &str) -> Option<Self> {
        let [session, tool_use, tool, event] = key_field_res();
        let grab = |re: &Regex| re.captures(raw).map(|c| c[1].to_string());
        let fields = Self {
            session_id: grab(session),
            tool_use_id: grab(tool_use),
            tool_name: grab(tool),
            hook_event_name: grab(event),
        };
        (fields != Self::default()).then_some(fields)
    }
}

/// What stdin turned into.
#[derive(Debug)]
pub enum Stdin {
    Empty,
    Event(HookInput),
    Degraded(KeyFields),
    /// Non-empty input with nothing recognizable in it.
    Garbage,
}

impl Stdin {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::Empty;
        }
        match serde_json::from_str::<HookInput>(raw) {
            Ok(input) => Self::Event(input),
            Err(e) => {
                tracing::debug!(error = %e, "hook input did not parse, scraping key fields");
                KeyFields::scrape(raw).map_or(Self::Garbage, Self::Degraded)
            }
        }
    }
}

// ===================================================================
// Tool-Specific Input Types
// ===================================================================

/// Parsed tool call, matching `tool_name` to a typed `tool_input`.
#[derive(Debug)]
pub enum ToolCall {
    Bash(BashToolInput),
    Write(WriteToolInput),
    Edit(EditToolInput),
    /// Any tool the constraint rules do not look at; keeps the raw JSON.
    Other {
        tool_name: String,
        tool_input: serde_json::Value,
    },
}

impl PreToolUseInput {
    /// Parse `tool_name` + `tool_input` into a typed `ToolCall`.
    pub fn tool_call(&self) -> Result<ToolCall, serde_json::Error> {
        ToolCall::parse(&self.tool_name, &self.tool_input)
    }
}

impl ToolCall {
    pub fn parse(
        tool_name: &str,
        tool_input: &serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        match tool_name {
            "Bash" => Ok(Self::Bash(serde_json::from_value(tool_input.clone())?)),
            "Write" => Ok(Self::Write(serde_json::from_value(tool_input.clone())?)),
            "Edit" => Ok(Self::Edit(serde_json::from_value(tool_input.clone())?)),
            other => Ok(Self::Other {
                tool_name: other.to_string(),
                tool_input: tool_input.clone(),
            }),
        }
    }

    /// The slice of the call the constraint rules inspect. An edit is
    /// judged by its replacement text.
    pub fn action(&self) -> Option<crate::constraints::Action<'_>> {
        use crate::constraints::Action;
        match self {
            Self::Bash(b) => Some(Action::Bash { command: &b.command }),
            Self::Write(w) => Some(Action::Write {
                file_path: &w.file_path,
                content: &w.content,
            }),
            Self::Edit(e) => Some(Action::Edit {
                file_path: &e.file_path,
                content: &e.new_string,
            }),
            Self::Other { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BashToolInput {
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteToolInput {
    pub file_path: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditToolInput {
    pub file_path: String,
    #[serde(default)]
    pub new_string: String,
}

// ===================================================================
// Hook Output Types (written to stdout as JSON, camelCase)
// ===================================================================

/// Top-level hook output written to stdout.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

/// Event-specific output, keyed by `hookEventName`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    pub hook_event_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<PreToolUsePermissionDecision>,

    /// For deny: shown to Claude.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

/// PreToolUse permission decision values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreToolUsePermissionDecision {
    Allow,
    Deny,
}

impl HookOutput {
    /// Extra context for the model after `event`.
    pub fn context(event: &str, text: String) -> Self {
        Self {
            hook_specific_output: Some(HookSpecificOutput {
                hook_event_name: event.to_string(),
                additional_context: Some(text),
                ..Default::default()
            }),
        }
    }

    /// Refuse a pending tool call.
    pub fn deny(reason: String) -> Self {
        Self {
            hook_specific_output: Some(HookSpecificOutput {
                hook_event_name: "PreToolUse".to_string(),
                permission_decision: Some(PreToolUsePermissionDecision::Deny),
                permission_decision_reason: Some(reason),
                ..Default::default()
            }),
        }
    }
}
