use anyhow::Result;

use pacer_core::service::Tracker;

use super::helpers::print_json;

/// Push every pending route point now.
pub(crate) async fn cmd_sync(tracker: &Tracker, json: bool) -> Result<()> {
    let report = tracker.sync().sync_all_pending().await?;

    if json {
        return print_json(&report);
    }
    if report.sessions == 0 {
        println!("Nothing to sync.");
        return Ok(());
    }
    println!(
        "Synced {} point(s) across {} session(s).",
        report.marked, report.sessions
    );
    if report.failed_sessions > 0 {
        eprintln!(
            "{} session(s) could not be uploaded and stay queued.",
            report.failed_sessions
        );
    }
    Ok(())
}
