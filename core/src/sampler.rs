use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::db::LocalStore;
use crate::geo::{estimate_calories, haversine_distance};
use crate::models::{LocationFix, NewRoutePoint};

/// Fixes buffered between the location callback and the persisting worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Live metrics of a route session, published after each persisted fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RouteProgress {
    pub points: usize,
    pub distance_meters: f64,
    pub calories: i64,
    /// Latest `(latitude, longitude)`, for map rendering.
    pub last_position: Option<(f64, f64)>,
}

/// Running distance over fixes in arrival order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteAccumulator {
    progress: RouteProgress,
}

impl RouteAccumulator {
    /// Add a position and return the distance it contributed.
    pub fn push(&mut self, latitude: f64, longitude: f64) -> f64 {
        let step = self
            .progress
            .last_position
            .map_or(0.0, |(lat, lon)| haversine_distance(lat, lon, latitude, longitude));
        self.progress.points += 1;
        self.progress.distance_meters += step;
        self.progress.calories = estimate_calories(self.progress.distance_meters);
        self.progress.last_position = Some((latitude, longitude));
        step
    }

    #[must_use]
    pub fn progress(&self) -> RouteProgress {
        self.progress
    }
}

enum SamplerMessage {
    Fix {
        fix: LocationFix,
        received_at_millis: i64,
    },
    Stop,
}

/// Handed to a location provider. Delivery never blocks the caller.
#[derive(Clone)]
pub struct FixSender {
    tx: mpsc::Sender<SamplerMessage>,
    accepting: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
}

impl FixSender {
    /// Queue a fix for the worker, stamped with the arrival time. Returns
    /// whether it was accepted.
    ///
    /// Empty fixes, fixes arriving while the session is paused or stopped,
    /// and fixes that find the queue full are dropped.
    pub fn deliver(&self, fix: Option<LocationFix>) -> bool {
        let Some(fix) = fix else {
            return false;
        };
        if !self.accepting.load(Ordering::SeqCst) {
            debug!("Dropping fix while sampler is not accepting");
            return false;
        }
        let message = SamplerMessage::Fix {
            fix,
            received_at_millis: self.clock.now_millis(),
        };
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Location queue full, dropping fix");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Location queue closed, dropping fix");
                false
            }
        }
    }
}

/// Converts location fixes into persisted route points on a single worker.
pub struct GeoSampler {
    session_id: String,
    sender: FixSender,
    progress: watch::Receiver<RouteProgress>,
    worker: JoinHandle<RouteProgress>,
}

impl GeoSampler {
    /// Spawn the worker for `session_id`. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(
        session_id: &str,
        store: LocalStore,
        clock: Arc<dyn Clock>,
        capacity: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let (progress_tx, progress_rx) = watch::channel(RouteProgress::default());
        let accepting = Arc::new(AtomicBool::new(true));
        let worker_session = session_id.to_string();

        let worker = tokio::spawn(async move {
            let mut accumulator = RouteAccumulator::default();
            while let Some(message) = rx.recv().await {
                let SamplerMessage::Fix {
                    fix,
                    received_at_millis,
                } = message
                else {
                    break;
                };
                let point = NewRoutePoint {
                    timestamp_millis: received_at_millis,
                    ..NewRoutePoint::from_fix(&worker_session, &fix)
                };
                // Awaited before the next message so points land in arrival order
                let db = store.clone();
                let written = tokio::task::spawn_blocking(move || {
                    let db = db.lock();
                    db.insert_route_point(&point)
                })
                .await;
                match written {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        error!(session_id = %worker_session, "Failed to persist route point: {e:#}");
                    }
                    Err(e) => {
                        error!(session_id = %worker_session, "Route point write panicked: {e}");
                    }
                }
                let step = accumulator.push(fix.latitude, fix.longitude);
                debug!(
                    session_id = %worker_session,
                    step_meters = step,
                    "Recorded route point"
                );
                progress_tx.send_replace(accumulator.progress());
            }
            accumulator.progress()
        });

        info!(session_id, capacity, "Geo sampler started");
        Self {
            session_id: session_id.to_string(),
            sender: FixSender {
                tx,
                accepting,
                clock,
            },
            progress: progress_rx,
            worker,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn sender(&self) -> FixSender {
        self.sender.clone()
    }

    /// Gate fixes without tearing down the worker.
    pub fn set_accepting(&self, accepting: bool) {
        self.sender.accepting.store(accepting, Ordering::SeqCst);
    }

    #[must_use]
    pub fn progress(&self) -> RouteProgress {
        *self.progress.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RouteProgress> {
        self.progress.clone()
    }

    /// Stop accepting fixes, let the worker persist everything already
    /// queued, then return the final metrics.
    pub async fn shutdown(self) -> RouteProgress {
        self.set_accepting(false);
        // Fixes queued ahead of the stop marker are still processed
        if self.sender.tx.send(SamplerMessage::Stop).await.is_err() {
            debug!(session_id = %self.session_id, "Sampler worker already gone");
        }
        let fallback = *self.progress.borrow();
        match self.worker.await {
            Ok(progress) => {
                info!(
                    session_id = %self.session_id,
                    points = progress.points,
                    distance_meters = progress.distance_meters,
                    "Geo sampler stopped"
                );
                progress
            }
            Err(e) => {
                error!(session_id = %self.session_id, "Sampler worker failed: {e}");
                fallback
            }
        }
    }
}
