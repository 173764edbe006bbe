//! File logging for a short-lived hook process.
//!
//! Stdout belongs to the hook protocol and stderr is surfaced by the host,
//! so everything goes to `<focus>/logs/focus.log`.

use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. The returned guard must outlive every log
/// call; dropping it flushes the non-blocking writer.
///
/// `directive` (from `FOCUS_LOG`) takes precedence over `level`. Returns
/// `None` and logs nothing when the log directory is unusable.
pub fn init(logs_dir: &Path, level: &str, directive: Option<&str>) -> Option<WorkerGuard> {
    fs::create_dir_all(logs_dir).ok()?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix("focus.log")
        .build(logs_dir)
        .ok()?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        )
        .try_init()
        .ok()?;
    Some(guard)
}

/// Debug dumps of large intermediate texts (extractions, prompts) under
/// `logs/verbose/`. Failures are logged and otherwise ignored.
#[derive(Debug, Clone)]
pub struct VerboseDumps {
    dir: PathBuf,
    enabled: bool,
}

impl VerboseDumps {
    pub fn new(dir: PathBuf, forced: bool) -> Self {
        let enabled = forced || tracing::enabled!(tracing::Level::DEBUG);
        Self { dir, enabled }
    }

    pub fn dump(&self, name: &str, content: &str) {
        if !self.enabled {
            return;
        }
        let path = self.dir.join(format!("{name}.log"));
        let result = fs::create_dir_all(&self.dir).and_then(|()| fs::write(&path, content));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "verbose dump failed");
        }
    }

    /// Delete dumps whose file name starts with `prefix` (all dumps for an
    /// empty prefix). Returns the names that were (or, dry-run, would be)
    /// removed.
    pub fn clear(&self, prefix: &str, dry_run: bool) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut cleared = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(prefix) || !name.ends_with(".log") {
                continue;
            }
            if !dry_run {
                if let Err(e) = fs::remove_file(entry.path()) {
                    tracing::warn!(file = %name, error = %e, "could not remove verbose dump");
                    continue;
                }
            }
            cleared.push(name);
        }
        cleared.sort();
        cleared
    }
}
