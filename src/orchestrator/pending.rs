use super::{Report, done};
use crate::error::Result;
use crate::markdown::pending::{self, PendingDoc};
use crate::session::Focus;

/// Show the pending issues grouped the way the completion report does, or
/// with `clear` drop them all.
pub fn run(focus: &Focus, clear: bool) -> Result<Report> {
    let doc = PendingDoc::new(focus.paths.pending_issues());
    let mut report = Report::default();
    if clear {
        let removed = doc.clear()?;
        tracing::info!(removed, "pending issues cleared");
        report.push(format!("Cleared {removed} pending issue(s)."));
        return Ok(report);
    }
    let groups = pending::group(&doc.parse()?);
    report.push(done::pending_analysis(&groups));
    if !groups.is_empty() {
        report.push(format!("\nFile: {}", doc.path().display()));
    }
    Ok(report)
}
