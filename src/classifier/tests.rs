use super::*;
use std::cell::RefCell;

/// Answers from a fixed script and remembers the prompts it saw.
struct Scripted {
    answer: anyhow::Result<&'static str>,
    prompts: RefCell<Vec<String>>,
}

impl Scripted {
    fn new(answer: anyhow::Result<&'static str>) -> Self {
        Self {
            answer,
            prompts: RefCell::new(Vec::new()),
        }
    }
}

impl Classifier for Scripted {
    fn classify(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        match &self.answer {
            Ok(a) => Ok(a.to_string()),
            Err(e) => Err(anyhow::anyhow!("{e}")),
        }
    }
}

#[test]
fn failures_become_error_answers() {
    let c = Scripted::new(Err(anyhow::anyhow!("rate limited")));
    let answer = ask(&c, "prompt");
    assert_eq!(answer, "ERROR: rate limited");
    assert!(is_error(&answer));
    assert_eq!(c.prompts.borrow().as_slice(), ["prompt"]);
}

#[test]
fn yes_detection() {
    assert!(is_yes("YES"));
    assert!(is_yes("  yes, the user said go ahead"));
    assert!(is_yes("The answer is YES"));
    assert!(!is_yes("NO"));
    assert!(!is_yes("No, but yes later"));
    assert!(!is_yes("maybe"));
    assert!(!is_yes(""));
}

#[test]
fn missing_command_is_an_error_not_a_panic() {
    let c = CliClassifier::new(&ClassifierConfig {
        command: "focuskeeper-no-such-classifier".into(),
        args: vec![],
    });
    let answer = ask(&c, "anything");
    assert!(answer.starts_with("ERROR: spawning focuskeeper-no-such-classifier"));
}

#[cfg(unix)]
#[test]
fn cli_classifier_pipes_prompt_through_command() {
    let c = CliClassifier::new(&ClassifierConfig {
        command: "cat".into(),
        args: vec![],
    });
    assert_eq!(c.classify("  YES\n").unwrap(), "YES");

    let failing = CliClassifier::new(&ClassifierConfig {
        command: "false".into(),
        args: vec![],
    });
    assert!(failing.classify("x").is_err());
}

#[test]
fn omission_prompt_embeds_both_sides() {
    let prompt = omission_prompt("## Issues\n| a |", "[10:00] USER: hi").unwrap();
    assert!(prompt.starts_with("Recorded content:\n## Issues\n| a |\n\n---\n\nConversation:\n[10:00] USER: hi\n\n---\n"));
    assert!(prompt.ends_with("If nothing is omitted, return only: NONE"));
}

#[test]
fn confirmation_prompt_switches_on_history() {
    let messages = vec!["USER: please fix it".to_string(), "ASSISTANT: ok".to_string()];
    let first = confirmation_prompt("/a.py", &[], &messages).unwrap();
    assert!(first.starts_with("Determine if user approved code modification:"));
    assert!(first.contains("File to modify: [/a.py]"));
    assert!(first.ends_with("Conversation:\nUSER: please fix it\nASSISTANT: ok"));

    let confirmed = vec!["/a.py".to_string(), "/b.py".to_string()];
    let scoped = confirmation_prompt("/c.py", &confirmed, &messages).unwrap();
    assert!(scoped.starts_with("Previously user confirmed modifications to: [/a.py, /b.py]\nNow modifying: [/c.py]"));
    assert!(scoped.contains("within the scope of the previous confirmation"));
}
