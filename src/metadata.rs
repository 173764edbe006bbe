use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Weighted counter of information-gathering tool calls since the last
/// info-persistence reminder, plus the recite counter.
/// Stored as `<focus>/action_count.json`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterState {
    #[serde(default)]
    pub counts: IndexMap<String, u32>,
    #[serde(default)]
    pub total_weighted: u32,
    /// When the long-form reminder was last shown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_full_reminder: Option<DateTime<Local>>,
    #[serde(default)]
    pub recite_count: u32,
}

/// Consecutive failures of one operation key.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub count: u32,
    #[serde(default)]
    pub last_error: String,
}

/// Operation key → consecutive failure run.
/// Stored as `<focus>/failure_count.json`.
pub type FailureCounts = BTreeMap<String, FailureEntry>;

/// Files the user has approved for modification since their last prompt.
/// Stored as `<focus>/confirm_state.json`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmState {
    #[serde(default)]
    pub confirmed_files: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReminderState {
    /// Epoch seconds; `0.0` means never reminded.
    #[serde(default)]
    pub last_reminder_time: f64,
    #[serde(default)]
    pub turns_since_reminder: u32,
}

/// Watched file path → reminder bookkeeping.
/// Stored as `<focus>/reminder_state.json`.
pub type ReminderState = BTreeMap<String, FileReminderState>;
