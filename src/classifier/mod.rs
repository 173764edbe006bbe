//! Yes/no and free-text judgements delegated to a small language model.
//!
//! The model is reached through an external command (by default the
//! `claude` CLI in print mode) that reads the prompt on stdin and answers on
//! stdout. Callers never fail because of the classifier: [`ask`] turns any
//! error into an `ERROR: ...` answer that every consumer treats as "no
//! opinion".

use crate::config::ClassifierConfig;
use crate::error::Result;
use anyhow::{Context, bail};
use minijinja::{Environment, context};
use std::io::Write;
use std::process::{Command, Stdio};

pub trait Classifier {
    fn classify(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Runs `command args...` with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CliClassifier {
    command: String,
    args: Vec<String>,
}

impl CliClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }
}

impl Classifier for CliClassifier {
    fn classify(&self, prompt: &str) -> anyhow::Result<String> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .context("writing prompt to classifier")?;
        }
        let output = child
            .wait_with_output()
            .context("waiting for classifier")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            );
        }
        let answer = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if answer.is_empty() {
            bail!("empty response from {}", self.command);
        }
        Ok(answer)
    }
}

/// Ask `classifier`, folding failures into an `ERROR: <cause>` answer.
pub fn ask(classifier: &dyn Classifier, prompt: &str) -> String {
    match classifier.classify(prompt) {
        Ok(answer) => answer,
        Err(e) => {
            tracing::warn!(error = format!("{e:#}"), "classifier failed");
            format!("ERROR: {e:#}")
        }
    }
}

pub fn is_error(answer: &str) -> bool {
    answer.starts_with("ERROR:")
}

/// An answer approves when it says YES somewhere and does not open with NO.
pub fn is_yes(answer: &str) -> bool {
    let upper = answer.trim().to_uppercase();
    let opening: String = upper.chars().take(3).collect();
    upper.contains("YES") && !opening.contains("NO")
}

// ===================================================================
// Prompts
// ===================================================================

const OMISSION_PROMPT: &str = "\
Recorded content:
{{ recorded }}

---

Conversation:
{{ conversation }}

---

Compare the recorded content with the conversation above, list potentially omitted items:
1. Issue (problem/bug/error)
2. Decision (choice/approach)
3. Finding (discovery/insight/root cause)

Format:
[Issue] Brief description
[Decision] Brief description
[Finding] Brief description

If nothing is omitted, return only: NONE";

const SCOPE_PROMPT: &str = "\
Previously user confirmed modifications to: [{{ confirmed | join(\", \") }}]
Now modifying: [{{ file }}]

Is this file within the scope of the previous confirmation?

Reply only: YES or NO

Conversation:
{{ conversation }}";

const APPROVAL_PROMPT: &str = "\
Determine if user approved code modification:
1. Did the assistant propose a change, plan, or modification?
2. Did the user agree? (\"yes\", \"ok\", \"sure\", \"go ahead\", \"continue\", etc.)

File to modify: [{{ file }}]

Reply only: YES or NO

Conversation:
{{ conversation }}";

fn render(template: &str, ctx: minijinja::Value) -> Result<String> {
    let env = Environment::new();
    let tmpl = env
        .template_from_str(template)
        .context("parsing classifier prompt")?;
    Ok(tmpl.render(ctx).context("rendering classifier prompt")?)
}

/// Prompt asking which Issues, Decisions or Findings from `conversation`
/// are missing from `recorded`.
pub fn omission_prompt(recorded: &str, conversation: &str) -> Result<String> {
    render(OMISSION_PROMPT, context! { recorded, conversation })
}

/// Prompt asking whether the user approved modifying `file`. With earlier
/// confirmations it asks about scope instead.
pub fn confirmation_prompt(file: &str, confirmed: &[String], messages: &[String]) -> Result<String> {
    let conversation = messages.join("\n");
    if confirmed.is_empty() {
        render(APPROVAL_PROMPT, context! { file, conversation })
    } else {
        render(SCOPE_PROMPT, context! { file, confirmed, conversation })
    }
}

#[cfg(test)]
mod tests;
