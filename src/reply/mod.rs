use crate::types::HookOutput;

/// Collects what a hook invocation wants to tell the host and turns it into
/// at most one JSON object.
#[derive(Debug)]
pub struct Reply {
    event: String,
    messages: Vec<String>,
    deny: Option<String>,
}

impl Reply {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            messages: Vec::new(),
            deny: None,
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(event = %self.event, message = %message.replace('\n', " | "), "hook message");
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = String>) {
        for m in messages {
            self.push(m);
        }
    }

    /// Refuse the tool call. Anything collected so far is dropped.
    pub fn deny(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::info!(event = %self.event, reason = %reason, "tool call denied");
        self.messages.clear();
        self.deny = Some(reason);
    }

    pub fn is_deny(&self) -> bool {
        self.deny.is_some()
    }

    #[cfg(test)]
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// 1 for a deny, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_deny() { 1 } else { 0 }
    }

    pub fn into_output(self) -> Option<HookOutput> {
        if let Some(reason) = self.deny {
            return Some(HookOutput::deny(reason));
        }
        if self.messages.is_empty() {
            return None;
        }
        Some(HookOutput::context(&self.event, self.messages.join("\n")))
    }
}
