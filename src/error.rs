use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// An error that aborts the whole invocation.
///
/// Everything recoverable (a bad transcript line, a missing state file, a
/// classifier hiccup) is handled where it happens. What reaches `main` as a
/// `FatalError` is reported with a `[FATAL]` block response and exit code 2.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("corrupt state file {path}: {source}")]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not replace {path} after retries: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl FatalError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn config(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Config {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Machine-readable block response printed before exiting.
    pub fn to_block_json(&self) -> String {
        serde_json::json!({
            "decision": "block",
            "reason": format!("[FATAL] {self}"),
        })
        .to_string()
    }
}

pub type Result<T, E = FatalError> = std::result::Result<T, E>;
