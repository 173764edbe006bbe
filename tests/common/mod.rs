#![allow(dead_code)]

use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A throwaway project with its own transcripts folder. The classifier is
/// pointed at a program that does not exist, so classifier calls fail fast.
pub struct Project {
    _dir: tempfile::TempDir,
    pub root: PathBuf,
    pub projects: PathBuf,
}

impl Project {
    pub fn new() -> Self {
        Self::with_config("")
    }

    /// A project whose `.claude/config/focus.toml` holds `extra` after the
    /// classifier override.
    pub fn with_config(extra: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        fs::create_dir_all(root.join(".claude/config")).unwrap();
        let root = root.canonicalize().unwrap();
        fs::write(
            root.join(".claude/config/focus.toml"),
            format!("[classifier]\ncommand = \"focuskeeper-test-no-such-classifier\"\nargs = []\n\n{extra}"),
        )
        .unwrap();
        let projects = dir.path().join("projects");
        Self {
            _dir: dir,
            root,
            projects,
        }
    }

    pub fn focus_dir(&self) -> PathBuf {
        self.root.join(".claude/tmp/focus")
    }

    pub fn focus_file(&self, name: &str) -> PathBuf {
        self.focus_dir().join(name)
    }

    /// Start a focus session by writing its scratchpad.
    pub fn activate(&self, context: &str) {
        fs::create_dir_all(self.focus_dir()).unwrap();
        fs::write(self.focus_file("focus_context.md"), context).unwrap();
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.transcripts_dir_for(&self.root)
    }

    /// Transcripts folder for a host launched in `dir`.
    pub fn transcripts_dir_for(&self, dir: &Path) -> PathBuf {
        let folder: String = dir
            .to_string_lossy()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        self.projects.join(folder)
    }

    pub fn write_transcript(&self, session: &str, lines: &[Value]) -> PathBuf {
        self.write_transcript_in(&self.transcripts_dir(), session, lines)
    }

    pub fn write_transcript_in(&self, dir: &Path, session: &str, lines: &[Value]) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(format!("{session}.jsonl"));
        let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
        fs::write(&path, body).unwrap();
        path
    }

    /// Records in the operation log.
    pub fn operations(&self) -> Vec<Value> {
        fs::read_to_string(self.focus_file("operations.jsonl"))
            .unwrap_or_default()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    /// Run a hook event through the binary.
    pub fn hook(&self, event: &Value) -> Run {
        self.run(&[], &event.to_string(), None)
    }

    /// Run a workflow subcommand, optionally as a given current session.
    pub fn command(&self, args: &[&str], session: Option<&str>) -> Run {
        let mut full = vec!["--project", self.root.to_str().unwrap()];
        full.extend_from_slice(args);
        self.run(&full, "", session)
    }

    pub fn run(&self, args: &[&str], stdin: &str, session: Option<&str>) -> Run {
        self.run_bytes(args, stdin.as_bytes(), session)
    }

    pub fn run_bytes(&self, args: &[&str], stdin: &[u8], session: Option<&str>) -> Run {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_focuskeeper"));
        cmd.args(args)
            .current_dir(&self.root)
            .env("CLAUDE_FOCUS_PROJECTS_DIR", &self.projects)
            .env_remove("CLAUDE_SESSION_ID")
            .env_remove("CLAUDE_FOCUS_DIR")
            .env_remove("CLAUDE_PLUGIN_ROOT")
            .env_remove("FOCUS_LOG")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(session) = session {
            cmd.env("CLAUDE_SESSION_ID", session);
        }
        let mut child = cmd.spawn().expect("failed to spawn binary");
        child
            .stdin
            .as_mut()
            .unwrap()
            .write_all(stdin)
            .unwrap();
        let output = child.wait_with_output().unwrap();
        Run {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

pub struct Run {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Run {
    pub fn json(&self) -> Value {
        serde_json::from_str(self.stdout.trim()).expect("stdout is one JSON object")
    }
}

/// A hook event for this project with the given extra fields.
pub fn event(project: &Project, name: &str, session: &str, extra: Value) -> Value {
    let mut base = serde_json::json!({
        "hook_event_name": name,
        "session_id": session,
        "transcript_path": "",
        "cwd": project.root,
        "permission_mode": "default"
    });
    base.as_object_mut()
        .unwrap()
        .extend(extra.as_object().unwrap().clone());
    base
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn user_line(text: &str) -> Value {
    serde_json::json!({
        "type": "user",
        "timestamp": "2026-03-01T10:00:00Z",
        "message": { "role": "user", "content": text }
    })
}

/// An assistant Bash call and its result.
pub fn bash_lines(id: &str, command: &str, output: &str, is_error: bool) -> [Value; 2] {
    [
        serde_json::json!({
            "type": "assistant",
            "timestamp": "2026-03-01T10:01:00Z",
            "message": { "role": "assistant", "content": [
                { "type": "tool_use", "id": id, "name": "Bash", "input": { "command": command } }
            ]}
        }),
        serde_json::json!({
            "type": "user",
            "timestamp": "2026-03-01T10:01:05Z",
            "message": { "role": "user", "content": [
                { "type": "tool_result", "tool_use_id": id, "content": output, "is_error": is_error }
            ]}
        }),
    ]
}

