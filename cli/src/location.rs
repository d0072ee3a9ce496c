use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use pacer_core::clock::Clock;
use pacer_core::models::Accuracy;
use pacer_core::replay::TraceRow;
use pacer_core::sampler::FixSender;
use pacer_core::session::{ForegroundIndicator, LocationProvider};

/// Plays back a recorded trace as if it were a live receiver, one row per
/// interval.
pub struct ReplayLocationProvider {
    rows: Arc<Vec<TraceRow>>,
    clock: Arc<dyn Clock>,
    task: Mutex<Option<JoinHandle<()>>>,
    cursor: Arc<Mutex<usize>>,
    finished_tx: watch::Sender<bool>,
}

impl ReplayLocationProvider {
    pub fn new(rows: Vec<TraceRow>, clock: Arc<dyn Clock>) -> Self {
        let (finished_tx, _) = watch::channel(rows.is_empty());
        Self {
            rows: Arc::new(rows),
            clock,
            task: Mutex::new(None),
            cursor: Arc::new(Mutex::new(0)),
            finished_tx,
        }
    }

    /// Flips to `true` once every row has been delivered.
    pub fn finished(&self) -> watch::Receiver<bool> {
        self.finished_tx.subscribe()
    }

    fn abort_task(&self) -> bool {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl LocationProvider for ReplayLocationProvider {
    fn start(&self, interval_ms: u64, accuracy: Accuracy, sink: FixSender) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .context("Replay needs a running tokio runtime")?;
        self.abort_task();

        let rows = Arc::clone(&self.rows);
        let clock = Arc::clone(&self.clock);
        let cursor = Arc::clone(&self.cursor);
        let finished = self.finished_tx.clone();
        debug!(interval_ms, ?accuracy, rows = rows.len(), "Replay started");

        let task = handle.spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let row = {
                    let mut next = cursor.lock().unwrap_or_else(PoisonError::into_inner);
                    let Some(row) = rows.get(*next).copied() else {
                        break;
                    };
                    *next += 1;
                    row
                };
                sink.deliver(row.to_fix(clock.now_millis()));
            }
            finished.send_replace(true);
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(())
    }

    fn stop(&self) {
        if self.abort_task() {
            debug!("Replay stopped");
        }
    }
}

/// Prints tracking start/stop on the terminal.
pub struct ConsoleIndicator;

impl ForegroundIndicator for ConsoleIndicator {
    fn notify_start(&self, session_id: &str) {
        info!(session_id, "Tracking started");
        eprintln!("Tracking route (session {session_id}). Press Ctrl-C to stop.");
    }

    fn notify_stop(&self, session_id: &str) {
        info!(session_id, "Tracking stopped");
        eprintln!();
        eprintln!("Tracking stopped.");
    }
}
