use crate::classifier::{Classifier, CliClassifier};
use crate::config::Config;
use crate::constraints;
use crate::error::Result;
use crate::logging::VerboseDumps;
use crate::metadata::{ConfirmState, CounterState, ReminderState};
use crate::oplog::{HookType, OperationLog, OperationRecord};
use crate::paths::{self, Env, FocusPaths};
use crate::reminders::{self, Confirmation};
use crate::reply::Reply;
use crate::store;
use crate::strikes;
use crate::transcript;
use crate::types::{
    HookInput, KeyFields, PostToolUseInput, PreToolUseInput, SessionStartInput, Stdin,
    StopInput, UserPromptSubmitInput,
};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

/// Everything one invocation needs: where the project is, what it is
/// configured to do, and how to reach the classifier.
pub struct Focus {
    pub project_root: PathBuf,
    /// Directory the host was launched in. The host names its transcript
    /// folder after this path, which can sit below `project_root`.
    pub launch_dir: PathBuf,
    pub paths: FocusPaths,
    pub config: Config,
    pub env: Env,
    pub dumps: VerboseDumps,
    pub classifier: Box<dyn Classifier>,
}

impl Focus {
    /// Assemble the context for `project_root` with an already loaded
    /// configuration. Call after logging is installed so verbose dumps see
    /// the effective level.
    pub fn new(project_root: PathBuf, config: Config, env: Env) -> Self {
        let paths = FocusPaths::new(config.focus_dir(&project_root, &env));
        let dumps = VerboseDumps::new(paths.verbose(), config.logging.verbose_dumps);
        let classifier = Box::new(CliClassifier::new(&config.classifier));
        Self {
            launch_dir: project_root.clone(),
            project_root,
            paths,
            config,
            env,
            dumps,
            classifier,
        }
    }

    /// Look transcripts up under `dir` rather than the project root.
    pub fn launched_from(mut self, dir: PathBuf) -> Self {
        self.launch_dir = dir;
        self
    }

    /// A focus session is active while its scratchpad exists.
    pub fn is_active(&self) -> bool {
        self.paths.context().exists()
    }

    pub fn oplog(&self) -> OperationLog {
        OperationLog::new(self.paths.operations())
    }

    /// Folder holding this project's transcripts.
    pub fn transcripts_dir(&self) -> Result<PathBuf> {
        let projects = self.config.projects_dir(&self.project_root, &self.env)?;
        Ok(paths::transcripts_dir(&projects, &self.launch_dir))
    }

    pub fn transcript_path(&self, session_id: &str) -> Result<PathBuf> {
        Ok(self.transcripts_dir()?.join(format!("{session_id}.jsonl")))
    }

    fn record(
        &self,
        hook_type: HookType,
        session_id: Option<&str>,
        tool_use_id: Option<&str>,
        tool_name: Option<&str>,
    ) -> Result<()> {
        let record = OperationRecord::now(hook_type, session_id, tool_use_id, tool_name);
        self.oplog().append(&record)
    }

    // ---------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------

    /// Run the policies for one hook event and collect the reply.
    pub fn handle_hook(&self, stdin: &Stdin) -> Result<Reply> {
        match stdin {
            Stdin::Empty | Stdin::Garbage => Ok(Reply::new("")),
            Stdin::Degraded(fields) => self.handle_degraded(fields),
            Stdin::Event(input) => match input {
                HookInput::SessionStart(e) => self.handle_session_start(e),
                HookInput::PreToolUse(e) => self.handle_pre_tool_use(e),
                HookInput::PostToolUse(e) => self.handle_post_tool_use(e),
                HookInput::UserPromptSubmit(e) => self.handle_user_prompt_submit(e),
                HookInput::Stop(e) => self.handle_stop(e),
                HookInput::Other => Ok(Reply::new("")),
            },
        }
    }

    /// Input that only yielded identifiers is recorded and nothing more.
    fn handle_degraded(&self, fields: &KeyFields) -> Result<Reply> {
        let event = fields.hook_event_name.as_deref().unwrap_or_default();
        let reply = Reply::new(event);
        let hook_type = match event {
            "PreToolUse" => HookType::PreToolUse,
            "PostToolUse" => HookType::PostToolUse,
            "UserPromptSubmit" => HookType::UserPromptSubmit,
            "Stop" => HookType::Stop,
            _ => return Ok(reply),
        };
        if self.is_active() {
            tracing::warn!(event, "recording degraded hook input");
            self.record(
                hook_type,
                fields.session_id.as_deref(),
                fields.tool_use_id.as_deref(),
                fields.tool_name.as_deref(),
            )?;
        }
        Ok(reply)
    }

    // ---------------------------------------------------------------
    // SessionStart
    // ---------------------------------------------------------------

    pub fn handle_session_start(&self, e: &SessionStartInput) -> Result<Reply> {
        let mut reply = Reply::new("SessionStart");

        let plugin_root = self.env.plugin_root.clone().or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
        });
        if let Some(root) = plugin_root {
            store::write_atomic(
                &self.paths.plugin_root_marker(),
                root.to_string_lossy().as_bytes(),
            )?;
        }
        if !e.common.session_id.is_empty() {
            store::write_atomic(&self.paths.session_id_marker(), e.common.session_id.as_bytes())?;
        }
        if let Some(source) = e.source {
            store::write_atomic(&self.paths.session_source_marker(), source.as_str().as_bytes())?;
        }
        tracing::info!(session = %e.common.session_id, "session started");

        if self.is_active() {
            let (time_str, time_ago) = match modified_at(&self.paths.context()) {
                Some(at) => (at.format("%Y-%m-%d %H:%M").to_string(), time_ago(Local::now() - at)),
                None => ("unknown".to_string(), "unknown".to_string()),
            };
            reply.push(format!(
                "\n[focus] [!] Unfinished focus session detected!\n\
                 Last activity: {time_str} ({time_ago})\n\
                 - If this is YOUR session to recover: /focus:recover\n\
                 - If another session is using it: do nothing or wait\n"
            ));
        }
        Ok(reply)
    }

    // ---------------------------------------------------------------
    // PreToolUse
    // ---------------------------------------------------------------

    pub fn handle_pre_tool_use(&self, e: &PreToolUseInput) -> Result<Reply> {
        let mut reply = Reply::new("PreToolUse");
        let active = self.is_active();
        if active {
            self.record(
                HookType::PreToolUse,
                Some(&e.common.session_id),
                e.tool_use_id.as_deref(),
                Some(&e.tool_name),
            )?;
        }

        let rules = &self.config.constraints;
        if rules.enabled {
            match e.tool_call() {
                Ok(call) => {
                    let violation = call
                        .action()
                        .and_then(|action| constraints::check(action, true, &rules.rules, &self.project_root));
                    if let Some(v) = violation {
                        tracing::info!(rule = v.rule, tool = %e.tool_name, "constraint violated");
                        if v.is_block() {
                            reply.deny(v.to_string());
                            return Ok(reply);
                        }
                        reply.push(v.to_string());
                    }
                }
                Err(err) => {
                    tracing::warn!(tool = %e.tool_name, error = %err, "tool input does not match its schema, constraints skipped");
                }
            }
        }

        if !active {
            return Ok(reply);
        }

        if matches!(e.tool_name.as_str(), "Write" | "Edit") {
            if let Some(reason) = self.confirm_before_modify(e, &mut reply)? {
                reply.deny(reason);
                return Ok(reply);
            }
        }

        let hooks = &self.config.hooks;
        if hooks.search_tools.contains(&e.tool_name) {
            let mut counter: CounterState = store::load(&self.paths.counter())?;
            let due = reminders::recite_due(&mut counter, hooks.recite_threshold);
            store::save(&self.paths.counter(), &counter)?;
            if due {
                let doc = store::read_text(&self.paths.context())?.unwrap_or_default();
                reply.push(reminders::recite(&doc));
            }
        }
        Ok(reply)
    }

    /// Returns the deny reason, if any. Reminders go straight to `reply`.
    fn confirm_before_modify(&self, e: &PreToolUseInput, reply: &mut Reply) -> Result<Option<String>> {
        let file = e
            .tool_input
            .get("file_path")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let fix_protocol = constraints::rule_enabled(&self.config.constraints.rules, "fix_protocol");
        let mut state: ConfirmState = store::load(&self.paths.confirm())?;
        let before = state.clone();
        let transcript_path = PathBuf::from(&e.common.transcript_path);

        let outcome = reminders::confirm_before_modify(
            file,
            &self.config.hooks.confirm_before_modify,
            fix_protocol,
            &mut state,
            || transcript::recent_messages(&transcript::tail_entries(&transcript_path, 20)),
            self.classifier.as_ref(),
        )?;
        if state != before {
            store::save(&self.paths.confirm(), &state)?;
        }

        Ok(match outcome {
            Confirmation::Allow => None,
            Confirmation::Remind(msg) => {
                reply.push(msg);
                None
            }
            Confirmation::Deny(reason) => Some(reason),
        })
    }

    // ---------------------------------------------------------------
    // PostToolUse
    // ---------------------------------------------------------------

    pub fn handle_post_tool_use(&self, e: &PostToolUseInput) -> Result<Reply> {
        let mut reply = Reply::new("PostToolUse");
        if !self.is_active() {
            return Ok(reply);
        }
        let hooks = &self.config.hooks;

        if let Some(msg) = strikes::check_and_update(
            &self.paths.failures(),
            &e.tool_name,
            &e.tool_input,
            &e.tool_response,
            &hooks.error_patterns,
            hooks.max_strikes,
        )? {
            reply.push(msg);
        }

        self.record(
            HookType::PostToolUse,
            Some(&e.common.session_id),
            e.tool_use_id.as_deref(),
            Some(&e.tool_name),
        )?;

        if hooks.search_tools.contains(&e.tool_name) {
            let mut counter: CounterState = store::load(&self.paths.counter())?;
            let msg = reminders::record_search(&mut counter, &e.tool_name, hooks, Local::now());
            store::save(&self.paths.counter(), &counter)?;
            if let Some(msg) = msg {
                reply.push(msg);
            }
        }

        if hooks.modify_tools.contains(&e.tool_name) {
            let doc = store::read_text(&self.paths.context())?;
            reply.push(reminders::update_reminder(doc.as_deref()));
        }

        if e.tool_name == "Bash" {
            let command = e
                .tool_input
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if let Some(msg) = reminders::commit_reminder(command) {
                reply.push(msg);
            }
        }
        Ok(reply)
    }

    // ---------------------------------------------------------------
    // UserPromptSubmit / Stop
    // ---------------------------------------------------------------

    pub fn handle_user_prompt_submit(&self, e: &UserPromptSubmitInput) -> Result<Reply> {
        let mut reply = Reply::new("UserPromptSubmit");
        if !self.is_active() {
            return Ok(reply);
        }
        store::save(&self.paths.confirm(), &ConfirmState::default())?;
        self.record(HookType::UserPromptSubmit, Some(&e.common.session_id), None, None)?;

        let config = &self.config.reminders;
        if config.enabled && !config.files.is_empty() {
            let mut state: ReminderState = store::load(&self.paths.reminders())?;
            let now = Local::now().timestamp_millis() as f64 / 1000.0;
            let fired = reminders::file_reminders(config, &mut state, &self.project_root, now);
            store::save(&self.paths.reminders(), &state)?;
            reply.extend(fired);
        }
        Ok(reply)
    }

    pub fn handle_stop(&self, e: &StopInput) -> Result<Reply> {
        let reply = Reply::new("Stop");
        if self.is_active() {
            self.record(HookType::Stop, Some(&e.common.session_id), None, None)?;
        }
        Ok(reply)
    }
}

fn modified_at(path: &Path) -> Option<DateTime<Local>> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Local>::from(modified))
}

/// Coarse age: whole days, else hours, else minutes, else "just now".
pub fn time_ago(delta: chrono::Duration) -> String {
    if delta.num_days() > 0 {
        format!("{} day(s) ago", delta.num_days())
    } else if delta.num_hours() > 0 {
        format!("{} hour(s) ago", delta.num_hours())
    } else if delta.num_minutes() > 0 {
        format!("{} minute(s) ago", delta.num_minutes())
    } else {
        "just now".to_string()
    }
}
