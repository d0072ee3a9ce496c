use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::clock::{Clock, SessionClock};
use crate::db::LocalStore;
use crate::geo::{estimate_calories, route_distance};
use crate::models::{Accuracy, RoutePoint, RouteSummary};
use crate::sampler::{DEFAULT_QUEUE_CAPACITY, FixSender, GeoSampler, RouteProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Active,
    Paused,
    Stopped,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(
        "not enough data to summarize session {session_id}: {points} point(s) recorded, at least 2 required"
    )]
    InsufficientData { session_id: String, points: usize },
    #[error("cannot {action} a session that is {state:?}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },
    #[error("location provider failed to start: {0:#}")]
    LocationUnavailable(anyhow::Error),
}

/// Source of position fixes. Implementations push into the sink from their
/// own thread or task and must stop doing so once `stop` returns.
pub trait LocationProvider: Send + Sync {
    fn start(&self, interval_ms: u64, accuracy: Accuracy, sink: FixSender) -> Result<()>;
    fn stop(&self);
}

/// Whatever keeps the user aware that tracking is running.
pub trait ForegroundIndicator: Send + Sync {
    fn notify_start(&self, session_id: &str);
    fn notify_stop(&self, session_id: &str);
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub interval_ms: u64,
    pub accuracy: Accuracy,
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            accuracy: Accuracy::High,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Final numbers of a stopped session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopReport {
    pub session_id: String,
    pub elapsed_seconds: u64,
    pub progress: RouteProgress,
}

/// Read-only view of a session's active time, usable from a ticker task.
#[derive(Clone)]
pub struct ElapsedProbe {
    clock: Arc<dyn Clock>,
    timer: Arc<Mutex<SessionClock>>,
}

impl ElapsedProbe {
    #[must_use]
    pub fn elapsed_seconds(&self) -> u64 {
        let timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        timer.elapsed_seconds(self.clock.now_millis())
    }
}

/// Lifecycle of one route-tracking session.
///
/// ```text
/// Idle --start--> Active <--pause_or_resume--> Paused
///                   \                            /
///                    +-----------stop-----------+--> Stopped
/// ```
pub struct SessionStateMachine {
    session_id: String,
    state: SessionState,
    clock: Arc<dyn Clock>,
    timer: Arc<Mutex<SessionClock>>,
    store: LocalStore,
    location: Arc<dyn LocationProvider>,
    indicator: Arc<dyn ForegroundIndicator>,
    config: SessionConfig,
    sampler: Option<GeoSampler>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionStateMachine {
    #[must_use]
    pub fn new(
        session_id: &str,
        store: LocalStore,
        clock: Arc<dyn Clock>,
        location: Arc<dyn LocationProvider>,
        indicator: Arc<dyn ForegroundIndicator>,
        config: SessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            session_id: session_id.to_string(),
            state: SessionState::Idle,
            clock,
            timer: Arc::new(Mutex::new(SessionClock::default())),
            store,
            location,
            indicator,
            config,
            sampler: None,
            state_tx,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn elapsed_probe(&self) -> ElapsedProbe {
        ElapsedProbe {
            clock: Arc::clone(&self.clock),
            timer: Arc::clone(&self.timer),
        }
    }

    /// Active seconds so far; zero once stopped.
    #[must_use]
    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_probe().elapsed_seconds()
    }

    #[must_use]
    pub fn progress(&self) -> RouteProgress {
        self.sampler
            .as_ref()
            .map(GeoSampler::progress)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn subscribe_progress(&self) -> Option<watch::Receiver<RouteProgress>> {
        self.sampler.as_ref().map(GeoSampler::subscribe)
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn with_timer<T>(&self, f: impl FnOnce(&mut SessionClock) -> T) -> T {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut timer)
    }

    /// Idle -> Active. Spawns the sampler and subscribes to location updates.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                action: "start",
            });
        }

        let sampler = GeoSampler::spawn(
            &self.session_id,
            self.store.clone(),
            Arc::clone(&self.clock),
            self.config.queue_capacity,
        );
        // On failure the sampler is dropped with every sender, which ends its worker
        self.location
            .start(
                self.config.interval_ms,
                self.config.accuracy,
                sampler.sender(),
            )
            .map_err(SessionError::LocationUnavailable)?;

        let now = self.clock.now_millis();
        self.with_timer(|t| t.start(now));
        self.sampler = Some(sampler);
        self.indicator.notify_start(&self.session_id);
        self.set_state(SessionState::Active);
        info!(session_id = %self.session_id, "Session started");
        Ok(())
    }

    /// Active <-> Paused. A no-op in any other state. Returns the resulting
    /// state, which stays Paused if location updates cannot be restarted.
    pub fn pause_or_resume(&mut self) -> SessionState {
        let now = self.clock.now_millis();
        match self.state {
            SessionState::Active => {
                self.with_timer(|t| t.pause(now));
                if let Some(sampler) = &self.sampler {
                    sampler.set_accepting(false);
                }
                self.location.stop();
                self.set_state(SessionState::Paused);
                info!(session_id = %self.session_id, "Session paused");
            }
            SessionState::Paused => {
                if let Some(sampler) = &self.sampler {
                    sampler.set_accepting(true);
                    if let Err(e) = self.location.start(
                        self.config.interval_ms,
                        self.config.accuracy,
                        sampler.sender(),
                    ) {
                        sampler.set_accepting(false);
                        warn!(
                            session_id = %self.session_id,
                            "Location updates did not resume, staying paused: {e:#}"
                        );
                        return self.state;
                    }
                }
                self.with_timer(|t| t.resume(now));
                self.set_state(SessionState::Active);
                info!(session_id = %self.session_id, "Session resumed");
            }
            SessionState::Idle | SessionState::Stopped => {}
        }
        self.state
    }

    /// Active|Paused -> Stopped. Unsubscribes from location updates, waits for
    /// queued fixes to be persisted and resets the timer.
    pub async fn stop(&mut self) -> Result<StopReport, SessionError> {
        if !matches!(self.state, SessionState::Active | SessionState::Paused) {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                action: "stop",
            });
        }

        self.location.stop();
        let progress = match self.sampler.take() {
            Some(sampler) => sampler.shutdown().await,
            None => RouteProgress::default(),
        };
        self.indicator.notify_stop(&self.session_id);

        let now = self.clock.now_millis();
        let elapsed_seconds = self.with_timer(|t| {
            let elapsed = t.elapsed_seconds(now);
            t.reset();
            elapsed
        });
        self.set_state(SessionState::Stopped);
        info!(
            session_id = %self.session_id,
            elapsed_seconds,
            points = progress.points,
            "Session stopped"
        );

        Ok(StopReport {
            session_id: self.session_id.clone(),
            elapsed_seconds,
            progress,
        })
    }
}

/// Emit the elapsed seconds once per second while the session is Active.
/// The task ends as soon as the session leaves Active.
pub fn spawn_ticker<F>(
    mut state: watch::Receiver<SessionState>,
    probe: ElapsedProbe,
    mut on_tick: F,
) -> JoinHandle<()>
where
    F: FnMut(u64) + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *state.borrow_and_update() != SessionState::Active {
                break;
            }
            tokio::select! {
                _ = interval.tick() => on_tick(probe.elapsed_seconds()),
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Build the summary of a finished route from its persisted points.
pub fn summarize_route(
    session_id: &str,
    user_id: &str,
    points: &[RoutePoint],
    completed_at_millis: i64,
) -> Result<RouteSummary, SessionError> {
    let [first, .., last] = points else {
        return Err(SessionError::InsufficientData {
            session_id: session_id.to_string(),
            points: points.len(),
        });
    };

    let distance_meters = route_distance(points);
    Ok(RouteSummary {
        session_id: session_id.to_string(),
        user_id: user_id.to_string(),
        duration_seconds: ((last.timestamp_millis - first.timestamp_millis) / 1000).max(0),
        distance_meters,
        calories_estimated: estimate_calories(distance_meters),
        completed_at_millis,
    })
}
