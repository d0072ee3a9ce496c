use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use pacer_core::clock::{Clock, SystemClock};
use pacer_core::models::{Accuracy, RouteSummary};
use pacer_core::replay::parse_trace_csv;
use pacer_core::sampler::RouteProgress;
use pacer_core::service::Tracker;
use pacer_core::session::{SessionConfig, SessionState, SessionStateMachine, spawn_ticker};
use pacer_core::sync::SyncReport;

use super::helpers::{format_duration, format_km, print_json};
use crate::location::{ConsoleIndicator, ReplayLocationProvider};

#[derive(Serialize)]
struct TrackResult<'a> {
    summary: &'a RouteSummary,
    active_seconds: u64,
    sync: &'a SyncReport,
}

/// What the user typed while tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackInput {
    Toggle,
    Stop,
    Unknown,
}

fn parse_track_input(line: &str) -> TrackInput {
    match line.trim().to_lowercase().as_str() {
        "" | "p" | "pause" | "r" | "resume" => TrackInput::Toggle,
        "s" | "stop" | "q" | "quit" => TrackInput::Stop,
        _ => TrackInput::Unknown,
    }
}

fn live_line(elapsed: u64, progress: &RouteProgress) -> String {
    format!(
        "\r{}  {}  {} kcal  {} pts ",
        format_duration(elapsed),
        format_km(progress.distance_meters),
        progress.calories,
        progress.points
    )
}

fn start_ticker(session: &SessionStateMachine) -> Option<JoinHandle<()>> {
    let progress = session.subscribe_progress()?;
    Some(spawn_ticker(
        session.subscribe_state(),
        session.elapsed_probe(),
        move |elapsed| {
            let line = live_line(elapsed, &progress.borrow());
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(line.as_bytes());
            let _ = stderr.flush();
        },
    ))
}

/// Replay a recorded trace as a live route session, then summarise and sync it.
pub(crate) async fn cmd_track(
    tracker: &Tracker,
    file: &Path,
    interval_ms: u64,
    accuracy: Accuracy,
    json: bool,
) -> Result<()> {
    let reader =
        File::open(file).with_context(|| format!("Failed to open trace {}", file.display()))?;
    let rows = parse_trace_csv(reader)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let provider = Arc::new(ReplayLocationProvider::new(rows, clock));
    let mut finished = provider.finished();

    let config = SessionConfig {
        interval_ms,
        accuracy,
        ..SessionConfig::default()
    };
    let mut session = tracker.new_route_session(provider, Arc::new(ConsoleIndicator), config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = tokio::spawn(
        tracker
            .sync()
            .run_background_loop(Duration::from_secs(60), shutdown_rx),
    );

    session.start()?;
    if !json {
        eprintln!("Enter pauses or resumes, 's' stops.");
    }
    let mut ticker = start_ticker(&session);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = finished.wait_for(|done| *done) => break,
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_track_input(&line) {
                    TrackInput::Toggle => {
                        if session.pause_or_resume() == SessionState::Active {
                            ticker = start_ticker(&session);
                        } else {
                            eprintln!("\nPaused.");
                        }
                    }
                    TrackInput::Stop => break,
                    TrackInput::Unknown => eprintln!("\nUnknown input '{}'", line.trim()),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Stopped reading stdin: {e}");
                    stdin_open = false;
                }
            },
        }
    }

    let report = session.stop().await?;
    if let Some(ticker) = ticker {
        let _ = ticker.await;
    }
    shutdown_tx.send_replace(true);
    let _ = background.await;

    let (summary, sync) = tracker.finish_route(session.session_id()).await?;

    if json {
        print_json(&TrackResult {
            summary: &summary,
            active_seconds: report.elapsed_seconds,
            sync: &sync,
        })?;
    } else {
        #[derive(Tabled)]
        struct SummaryRow {
            #[tabled(rename = "Active")]
            active: String,
            #[tabled(rename = "Duration")]
            duration: String,
            #[tabled(rename = "Distance")]
            distance: String,
            #[tabled(rename = "Calories")]
            calories: i64,
            #[tabled(rename = "Points synced")]
            synced: String,
        }

        let row = SummaryRow {
            active: format_duration(report.elapsed_seconds),
            duration: format_duration(summary.duration_seconds.max(0).unsigned_abs()),
            distance: format_km(summary.distance_meters),
            calories: summary.calories_estimated,
            synced: format!("{}/{}", sync.marked, report.progress.points),
        };
        println!("{}", Table::new([row]).with(Style::rounded()));
        if sync.marked < report.progress.points {
            eprintln!("Unsynced points stay queued; run `pacer sync` later.");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_track_input() {
        assert_eq!(parse_track_input(""), TrackInput::Toggle);
        assert_eq!(parse_track_input(" P "), TrackInput::Toggle);
        assert_eq!(parse_track_input("stop"), TrackInput::Stop);
        assert_eq!(parse_track_input("q"), TrackInput::Stop);
        assert_eq!(parse_track_input("jump"), TrackInput::Unknown);
    }

    #[test]
    fn test_live_line() {
        let progress = RouteProgress {
            points: 3,
            distance_meters: 1_234.0,
            calories: 74,
            last_position: None,
        };
        assert_eq!(live_line(65, &progress), "\r01:05  1.23 km  74 kcal  3 pts ");
    }
}
