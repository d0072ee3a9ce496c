use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::db::LocalStore;
use crate::models::{
    AssignedExercise, MAX_WORKOUTS, RemoteRoutePoint, RoutePoint, RouteSummary,
    WorkoutDefinition, WorkoutSummary,
};
use crate::remote::{RemoteStore, SyncError, UserIdentity, from_document, paths, to_document};
use crate::workout::{PreviousSets, previous_sets_from_summary};

/// A read that fell back to local data when `degraded` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub value: T,
    pub degraded: bool,
}

impl<T> Loaded<T> {
    fn fresh(value: T) -> Self {
        Self {
            value,
            degraded: false,
        }
    }

    fn fallback(value: T) -> Self {
        Self {
            value,
            degraded: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Sessions that had pending points.
    pub sessions: usize,
    pub uploaded: usize,
    pub marked: usize,
    pub failed_sessions: usize,
    /// The request joined a pass already running for the session.
    pub coalesced: bool,
}

impl SyncReport {
    fn absorb(&mut self, other: &SyncReport) {
        self.sessions += other.sessions;
        self.uploaded += other.uploaded;
        self.marked += other.marked;
        self.failed_sessions += other.failed_sessions;
    }
}

/// Bundle needed to run a workout.
pub type WorkoutBundle = (WorkoutDefinition, Vec<AssignedExercise>);

/// Keeps the local store and the remote store consistent. Remote is
/// authoritative for reads; local is the fallback and always receives writes.
pub struct SyncEngine {
    local: LocalStore,
    remote: Arc<dyn RemoteStore>,
    identity: Arc<dyn UserIdentity>,
    /// Session id -> another pass was requested while one was running.
    in_flight: Mutex<HashMap<String, bool>>,
}

/// Releases a session's in-flight slot if the pass is abandoned early.
struct PassGuard<'a> {
    engine: &'a SyncEngine,
    session_id: &'a str,
    released: bool,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.engine.in_flight().remove(self.session_id);
        }
    }
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        local: LocalStore,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn UserIdentity>,
    ) -> Self {
        Self {
            local,
            remote,
            identity,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, bool>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn user_id(&self) -> Result<String> {
        Ok(self.identity.current_user_id().ok_or(SyncError::NoUser)?)
    }

    // --- Workout definitions ---

    async fn fetch_workouts(&self) -> Result<Vec<WorkoutDefinition>> {
        let uid = self.user_id()?;
        let collection = paths::workouts(&uid)?;
        let docs = self.remote.list_documents(&collection).await?;
        docs.into_iter()
            .map(|doc| {
                let mut workout: WorkoutDefinition = from_document(&collection, doc.data)?;
                workout.id = doc.id;
                Ok(workout)
            })
            .collect()
    }

    /// All definitions: remote result replaces local, local on failure.
    pub async fn load_workouts(&self) -> Result<Loaded<Vec<WorkoutDefinition>>> {
        match self.fetch_workouts().await {
            Ok(workouts) => {
                self.local.lock().replace_workouts(&workouts)?;
                debug!(count = workouts.len(), "Loaded workouts from remote");
                Ok(Loaded::fresh(workouts))
            }
            Err(e) => {
                warn!("Remote workouts unavailable, using local copy: {e:#}");
                Ok(Loaded::fallback(self.local.lock().list_workouts()?))
            }
        }
    }

    async fn fetch_assigned_exercises(&self, workout_id: &str) -> Result<Vec<AssignedExercise>> {
        let uid = self.user_id()?;
        let collection = paths::assigned_exercises(&uid, workout_id)?;
        let docs = self.remote.list_documents(&collection).await?;
        let mut exercises = docs
            .into_iter()
            .map(|doc| {
                let mut exercise: AssignedExercise = from_document(&collection, doc.data)?;
                exercise.id = doc.id;
                exercise.workout_id = workout_id.to_string();
                Ok(exercise)
            })
            .collect::<Result<Vec<_>>>()?;
        exercises.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(exercises)
    }

    pub async fn load_assigned_exercises(
        &self,
        workout_id: &str,
    ) -> Result<Loaded<Vec<AssignedExercise>>> {
        match self.fetch_assigned_exercises(workout_id).await {
            Ok(exercises) => {
                self.local
                    .lock()
                    .replace_assigned_exercises(workout_id, &exercises)?;
                Ok(Loaded::fresh(exercises))
            }
            Err(e) => {
                warn!(workout_id, "Remote exercises unavailable, using local copy: {e:#}");
                Ok(Loaded::fallback(
                    self.local.lock().list_assigned_exercises(workout_id)?,
                ))
            }
        }
    }

    async fn fetch_workout(&self, workout_id: &str) -> Result<Option<WorkoutDefinition>> {
        let uid = self.user_id()?;
        let path = paths::workout(&uid, workout_id)?;
        let Some(data) = self.remote.get_document(&path).await? else {
            return Ok(None);
        };
        let mut workout: WorkoutDefinition = from_document(&path, data)?;
        workout.id = workout_id.to_string();
        Ok(Some(workout))
    }

    /// Definition plus exercises for a workout about to run.
    ///
    /// Both halves come from the remote when both remote reads succeed,
    /// otherwise both come from the local store. A bundle never mixes sources.
    pub async fn load_workout_bundle(
        &self,
        workout_id: &str,
    ) -> Result<Loaded<Option<WorkoutBundle>>> {
        let remote = async {
            let workout = self.fetch_workout(workout_id).await?;
            let exercises = self.fetch_assigned_exercises(workout_id).await?;
            Ok::<_, anyhow::Error>((workout, exercises))
        }
        .await;

        match remote {
            Ok((Some(workout), exercises)) => {
                self.local.lock().save_workout(&workout, &exercises)?;
                Ok(Loaded::fresh(Some((workout, exercises))))
            }
            Ok((None, _)) => {
                self.local.lock().delete_workout(workout_id)?;
                Ok(Loaded::fresh(None))
            }
            Err(e) => {
                warn!(workout_id, "Remote workout unavailable, using local copy: {e:#}");
                let db = self.local.lock();
                let bundle = match db.get_workout(workout_id)? {
                    Some(workout) => Some((workout, db.list_assigned_exercises(workout_id)?)),
                    None => None,
                };
                Ok(Loaded::fallback(bundle))
            }
        }
    }

    /// Whether another definition may be created. Falls back to the local count.
    pub async fn can_create_workout(&self) -> Result<bool> {
        let count = match self.fetch_workouts().await {
            Ok(workouts) => workouts.len(),
            Err(e) => {
                debug!("Counting workouts locally: {e:#}");
                self.local.lock().count_workouts()?
            }
        };
        Ok(count < MAX_WORKOUTS)
    }

    /// Store a definition with its exercises locally, then mirror it remotely.
    /// Returns whether the remote write succeeded.
    pub async fn save_workout(
        &self,
        workout: &WorkoutDefinition,
        exercises: &[AssignedExercise],
    ) -> Result<bool> {
        self.local.lock().save_workout(workout, exercises)?;
        let pushed = async {
            let uid = self.user_id()?;
            self.remote
                .set_document(&paths::workout(&uid, &workout.id)?, &to_document(workout)?)
                .await?;
            self.push_assigned_exercises(&uid, &workout.id, exercises)
                .await
        }
        .await;
        Ok(report_remote("save workout", &workout.id, pushed))
    }

    async fn push_assigned_exercises(
        &self,
        uid: &str,
        workout_id: &str,
        exercises: &[AssignedExercise],
    ) -> Result<()> {
        self.remote
            .delete_collection(&paths::assigned_exercises(uid, workout_id)?)
            .await?;
        for exercise in exercises {
            self.remote
                .set_document(
                    &paths::assigned_exercise(uid, workout_id, &exercise.id)?,
                    &to_document(exercise)?,
                )
                .await?;
        }
        Ok(())
    }

    /// Replace a workout's exercise list everywhere.
    pub async fn replace_assigned_exercises(
        &self,
        workout_id: &str,
        exercises: &[AssignedExercise],
    ) -> Result<bool> {
        self.local
            .lock()
            .replace_assigned_exercises(workout_id, exercises)?;
        let pushed = async {
            let uid = self.user_id()?;
            self.push_assigned_exercises(&uid, workout_id, exercises)
                .await
        }
        .await;
        Ok(report_remote("replace exercises", workout_id, pushed))
    }

    /// Remote delete first, then the local one regardless of the outcome.
    pub async fn delete_assigned_exercise(
        &self,
        workout_id: &str,
        exercise_id: &str,
    ) -> Result<bool> {
        let removed = async {
            let uid = self.user_id()?;
            self.remote
                .delete_document(&paths::assigned_exercise(&uid, workout_id, exercise_id)?)
                .await
        }
        .await;
        let remote_ok = report_remote("delete exercise", exercise_id, removed);
        self.local.lock().delete_assigned_exercise(exercise_id)?;
        Ok(remote_ok)
    }

    /// Delete the definition and its exercises remotely, then locally. Both
    /// remote deletes are attempted; the local delete always runs.
    pub async fn delete_workout(&self, workout_id: &str) -> Result<bool> {
        let definition = async {
            let uid = self.user_id()?;
            self.remote
                .delete_document(&paths::workout(&uid, workout_id)?)
                .await
        }
        .await;
        let exercises = async {
            let uid = self.user_id()?;
            self.remote
                .delete_collection(&paths::assigned_exercises(&uid, workout_id)?)
                .await
                .map(|_| ())
        }
        .await;
        let definition_ok = report_remote("delete workout", workout_id, definition);
        let exercises_ok = report_remote("delete workout exercises", workout_id, exercises);
        self.local.lock().delete_workout(workout_id)?;
        Ok(definition_ok && exercises_ok)
    }

    // --- Summaries ---

    pub async fn record_route_summary(&self, summary: &RouteSummary) -> Result<bool> {
        self.local.lock().upsert_route_summary(summary)?;
        let pushed = async {
            let uid = self.user_id()?;
            self.remote
                .set_document(
                    &paths::route_record(&uid, &summary.session_id)?,
                    &to_document(summary)?,
                )
                .await
        }
        .await;
        Ok(report_remote("route summary", &summary.session_id, pushed))
    }

    pub async fn record_workout_summary(&self, summary: &WorkoutSummary) -> Result<bool> {
        self.local.lock().insert_workout_summary(summary)?;
        let pushed = async {
            let uid = self.user_id()?;
            self.remote
                .set_document(
                    &paths::workout_summary(&uid, &summary.id)?,
                    &to_document(summary)?,
                )
                .await
        }
        .await;
        Ok(report_remote("workout summary", &summary.id, pushed))
    }

    async fn fetch_route_summaries(&self) -> Result<Vec<RouteSummary>> {
        let uid = self.user_id()?;
        let collection = paths::route_records(&uid)?;
        let docs = self.remote.list_documents(&collection).await?;
        let mut summaries = docs
            .into_iter()
            .map(|doc| {
                let mut summary: RouteSummary = from_document(&collection, doc.data)?;
                summary.session_id = doc.id;
                Ok(summary)
            })
            .collect::<Result<Vec<_>>>()?;
        summaries.sort_by(|a, b| b.completed_at_millis.cmp(&a.completed_at_millis));
        Ok(summaries)
    }

    pub async fn load_route_summaries(&self) -> Result<Loaded<Vec<RouteSummary>>> {
        match self.fetch_route_summaries().await {
            Ok(summaries) => {
                self.local.lock().replace_route_summaries(&summaries)?;
                Ok(Loaded::fresh(summaries))
            }
            Err(e) => {
                warn!("Remote route history unavailable, using local copy: {e:#}");
                Ok(Loaded::fallback(self.local.lock().list_route_summaries()?))
            }
        }
    }

    async fn fetch_workout_summaries(&self) -> Result<Vec<WorkoutSummary>> {
        let uid = self.user_id()?;
        let collection = paths::workout_summaries(&uid)?;
        let docs = self.remote.list_documents(&collection).await?;
        let mut summaries = docs
            .into_iter()
            .map(|doc| {
                let mut summary: WorkoutSummary = from_document(&collection, doc.data)?;
                summary.id = doc.id;
                Ok(summary)
            })
            .collect::<Result<Vec<_>>>()?;
        summaries.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(summaries)
    }

    pub async fn load_workout_summaries(&self) -> Result<Loaded<Vec<WorkoutSummary>>> {
        match self.fetch_workout_summaries().await {
            Ok(summaries) => {
                self.local.lock().replace_workout_summaries(&summaries)?;
                Ok(Loaded::fresh(summaries))
            }
            Err(e) => {
                warn!("Remote workout history unavailable, using local copy: {e:#}");
                Ok(Loaded::fallback(self.local.lock().list_workout_summaries()?))
            }
        }
    }

    /// Sets recorded the last time this workout was done, for the
    /// "previous" column.
    pub async fn previous_sets(&self, workout_id: &str) -> Result<PreviousSets> {
        let latest = match self.fetch_workout_summaries().await {
            Ok(summaries) => summaries.into_iter().find(|s| s.workout_id == workout_id),
            Err(e) => {
                debug!(workout_id, "Previous sets from local history: {e:#}");
                self.local.lock().latest_workout_summary(workout_id)?
            }
        };
        Ok(latest
            .as_ref()
            .map(previous_sets_from_summary)
            .unwrap_or_default())
    }

    // --- Route points ---

    /// Points of a session, locally if at least two exist, else from the remote.
    pub async fn load_route_points(&self, session_id: &str) -> Result<Vec<RoutePoint>> {
        let local = self.local.lock().route_points(session_id)?;
        if local.len() >= 2 {
            return Ok(local);
        }
        let fetched = async {
            let uid = self.user_id()?;
            let collection = paths::route_points(&uid, session_id)?;
            let docs = self.remote.list_documents(&collection).await?;
            docs.into_iter()
                .map(|doc| {
                    let point: RemoteRoutePoint = from_document(&collection, doc.data)?;
                    Ok(RoutePoint {
                        id: 0,
                        uuid: doc.id,
                        session_id: session_id.to_string(),
                        latitude: point.latitude,
                        longitude: point.longitude,
                        altitude: point.altitude,
                        timestamp_millis: point.timestamp_millis,
                        synced: true,
                    })
                })
                .collect::<Result<Vec<_>>>()
        }
        .await;
        match fetched {
            Ok(mut points) if points.len() > local.len() => {
                points.sort_by(|a, b| {
                    a.timestamp_millis
                        .cmp(&b.timestamp_millis)
                        .then_with(|| a.uuid.cmp(&b.uuid))
                });
                Ok(points)
            }
            Ok(_) => Ok(local),
            Err(e) => {
                warn!(session_id, "Remote route points unavailable: {e:#}");
                Ok(local)
            }
        }
    }

    fn begin_pass(&self, session_id: &str) -> bool {
        let mut in_flight = self.in_flight();
        match in_flight.get_mut(session_id) {
            Some(rerun) => {
                *rerun = true;
                false
            }
            None => {
                in_flight.insert(session_id.to_string(), false);
                true
            }
        }
    }

    /// Either consume a pending rerun request or release the slot.
    fn finish_or_rerun(&self, session_id: &str) -> bool {
        let mut in_flight = self.in_flight();
        match in_flight.get_mut(session_id) {
            Some(rerun) if *rerun => {
                *rerun = false;
                true
            }
            _ => {
                in_flight.remove(session_id);
                false
            }
        }
    }

    /// Upload a session's pending points and mark them synced once all of
    /// them are accepted. Concurrent calls for the same session coalesce into
    /// the running pass, which runs once more to pick up their points.
    pub async fn sync_pending_points(&self, session_id: &str) -> Result<SyncReport> {
        if !self.begin_pass(session_id) {
            debug!(session_id, "Sync already running, coalescing");
            return Ok(SyncReport {
                coalesced: true,
                ..SyncReport::default()
            });
        }
        let mut guard = PassGuard {
            engine: self,
            session_id,
            released: false,
        };

        let mut report = SyncReport::default();
        loop {
            self.upload_session(session_id, &mut report).await?;
            if !self.finish_or_rerun(session_id) {
                break;
            }
            debug!(session_id, "Running coalesced sync pass");
        }
        guard.released = true;
        Ok(report)
    }

    async fn upload_session(&self, session_id: &str, report: &mut SyncReport) -> Result<()> {
        let pending = self.local.lock().pending_points(Some(session_id))?;
        if pending.is_empty() {
            return Ok(());
        }
        let uid = self.user_id()?;
        report.sessions += 1;

        let mut uploaded = Vec::with_capacity(pending.len());
        for point in &pending {
            let path = paths::route_point(&uid, session_id, &point.uuid)?;
            let body = to_document(&RemoteRoutePoint::from(point))?;
            match self.remote.set_document(&path, &body).await {
                Ok(()) => uploaded.push(point.id),
                Err(e) => {
                    warn!(session_id, "Route point upload failed: {e:#}");
                    break;
                }
            }
        }
        report.uploaded += uploaded.len();

        if uploaded.len() == pending.len() {
            let marked = self.local.lock().mark_points_synced(&uploaded)?;
            report.marked += marked;
            info!(session_id, marked, "Route points synced");
        } else {
            report.failed_sessions += 1;
        }
        Ok(())
    }

    /// Push every session that still has pending points. Failures stay
    /// contained to their session.
    pub async fn sync_all_pending(&self) -> Result<SyncReport> {
        let sessions: BTreeSet<String> = self
            .local
            .lock()
            .pending_points(None)?
            .into_iter()
            .map(|p| p.session_id)
            .collect();

        let mut total = SyncReport::default();
        for session_id in &sessions {
            match self.sync_pending_points(session_id).await {
                Ok(report) => total.absorb(&report),
                Err(e) => {
                    warn!(session_id = %session_id, "Sync failed: {e:#}");
                    total.sessions += 1;
                    total.failed_sessions += 1;
                }
            }
        }
        Ok(total)
    }

    /// Retry pending uploads every `interval` until `shutdown` flips to true.
    pub async fn run_background_loop(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "Background sync started");
        loop {
            match self.sync_all_pending().await {
                Ok(report) if report.sessions > 0 => debug!(
                    sessions = report.sessions,
                    marked = report.marked,
                    failed = report.failed_sessions,
                    "Background sync pass complete"
                ),
                Ok(_) => {}
                Err(e) => warn!("Background sync pass failed: {e:#}"),
            }
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Background sync stopped");
    }
}

fn report_remote(action: &str, id: &str, outcome: Result<()>) -> bool {
    match outcome {
        Ok(()) => true,
        Err(e) => {
            warn!(id, "Remote {action} failed, kept locally: {e:#}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExerciseSets, LocationFix, NewAssignedExercise, NewRoutePoint, RecordedSet};
    use crate::remote::StaticIdentity;
    use crate::remote::fake::FakeRemote;

    fn engine_with(remote: Arc<FakeRemote>) -> SyncEngine {
        SyncEngine::new(
            LocalStore::open_in_memory().unwrap(),
            remote,
            Arc::new(StaticIdentity(Some("u1".to_string()))),
        )
    }

    fn exercise(workout_id: &str, name: &str) -> AssignedExercise {
        NewAssignedExercise {
            name: name.to_string(),
            series: 3,
            repetitions: 10,
            weight: 20.0,
            photo: String::new(),
            video: String::new(),
            catalog_ref: String::new(),
        }
        .assign_to(workout_id)
    }

    fn add_points(engine: &SyncEngine, session_id: &str, n: u32) {
        let db = engine.local().lock();
        for i in 0..n {
            db.insert_route_point(&NewRoutePoint::from_fix(
                session_id,
                &LocationFix {
                    latitude: 0.0,
                    longitude: f64::from(i) * 0.001,
                    altitude: None,
                    timestamp_millis: i64::from(i) * 1000,
                },
            ))
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_sync_marks_after_success() {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(remote.clone());
        add_points(&engine, "s1", 3);

        let report = engine.sync_pending_points("s1").await.unwrap();
        assert_eq!(report.uploaded, 3);
        assert_eq!(report.marked, 3);
        assert_eq!(remote.count_in("users/u1/routeRecords/s1/points"), 3);
        assert!(engine.local().lock().pending_points(None).unwrap().is_empty());

        // Nothing left to do
        let again = engine.sync_pending_points("s1").await.unwrap();
        assert_eq!(again, SyncReport::default());
        assert_eq!(remote.writes(), 3);
    }

    #[tokio::test]
    async fn test_sync_offline_leaves_points_pending() {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(remote.clone());
        add_points(&engine, "s1", 3);
        remote.set_offline(true);

        let report = engine.sync_pending_points("s1").await.unwrap();
        assert_eq!(report.failed_sessions, 1);
        assert_eq!(report.marked, 0);
        assert_eq!(engine.local().lock().pending_points(None).unwrap().len(), 3);

        remote.set_offline(false);
        let report = engine.sync_pending_points("s1").await.unwrap();
        assert_eq!(report.marked, 3);
        assert_eq!(remote.count_in("users/u1/routeRecords/s1/points"), 3);
    }

    #[tokio::test]
    async fn test_partial_group_failure_marks_nothing() {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(remote.clone());
        add_points(&engine, "s1", 3);
        let second = engine.local().lock().route_points("s1").unwrap()[1].uuid.clone();
        remote.fail_paths_containing(&second);

        let report = engine.sync_pending_points("s1").await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.marked, 0);
        assert_eq!(engine.local().lock().pending_points(None).unwrap().len(), 3);

        // Retry re-uploads under the same document ids
        remote.clear_failures();
        engine.sync_pending_points("s1").await.unwrap();
        assert_eq!(remote.count_in("users/u1/routeRecords/s1/points"), 3);
    }

    #[tokio::test]
    async fn test_sync_all_contains_failures_per_session() {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(remote.clone());
        add_points(&engine, "s1", 2);
        add_points(&engine, "s2", 2);
        remote.fail_paths_containing("routeRecords/s1/");

        let report = engine.sync_all_pending().await.unwrap();
        assert_eq!(report.sessions, 2);
        assert_eq!(report.failed_sessions, 1);
        assert_eq!(report.marked, 2);
        let pending = engine.local().lock().pending_points(None).unwrap();
        assert!(pending.iter().all(|p| p.session_id == "s1"));
    }

    #[tokio::test]
    async fn test_concurrent_syncs_coalesce() {
        let remote = Arc::new(FakeRemote::default());
        remote.set_write_delay(Duration::from_millis(20));
        let engine = Arc::new(engine_with(remote.clone()));
        add_points(&engine, "s1", 3);

        let a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.sync_pending_points("s1").await.unwrap() })
        };
        tokio::task::yield_now().await;
        let b = engine.sync_pending_points("s1").await.unwrap();
        let a = a.await.unwrap();

        assert_eq!(a.marked + b.marked, 3);
        assert_eq!(remote.count_in("users/u1/routeRecords/s1/points"), 3);
        assert_eq!(remote.writes(), 3);
        assert!(engine.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_no_user_fails_fast() {
        let remote = Arc::new(FakeRemote::default());
        let engine = SyncEngine::new(
            LocalStore::open_in_memory().unwrap(),
            remote.clone(),
            Arc::new(StaticIdentity(None)),
        );
        add_points(&engine, "s1", 2);
        let err = engine.sync_pending_points("s1").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<SyncError>(), Some(SyncError::NoUser)));
        assert!(engine.in_flight().is_empty());
        assert_eq!(remote.writes(), 0);

        let loaded = engine.load_workouts().await.unwrap();
        assert!(loaded.degraded);
    }

    #[tokio::test]
    async fn test_load_workouts_replaces_local() {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(remote.clone());
        let stale = WorkoutDefinition::new("Stale", "", "", 0);
        engine.local().lock().upsert_workout(&stale).unwrap();

        let fresh = WorkoutDefinition::new("Fresh", "", "", 30);
        remote.insert(
            &paths::workout("u1", &fresh.id).unwrap(),
            to_document(&fresh).unwrap(),
        );

        let loaded = engine.load_workouts().await.unwrap();
        assert!(!loaded.degraded);
        assert_eq!(loaded.value, vec![fresh.clone()]);
        assert_eq!(engine.local().lock().list_workouts().unwrap(), vec![fresh.clone()]);

        remote.set_offline(true);
        let loaded = engine.load_workouts().await.unwrap();
        assert!(loaded.degraded);
        assert_eq!(loaded.value, vec![fresh]);
    }

    #[tokio::test]
    async fn test_save_and_delete_workout() {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(remote.clone());
        let workout = WorkoutDefinition::new("Legs", "", "", 45);
        let exercises = vec![exercise(&workout.id, "Squat"), exercise(&workout.id, "Lunge")];

        assert!(engine.save_workout(&workout, &exercises).await.unwrap());
        let sub = paths::assigned_exercises("u1", &workout.id).unwrap();
        assert_eq!(remote.count_in(&sub), 2);

        assert!(engine
            .delete_assigned_exercise(&workout.id, &exercises[0].id)
            .await
            .unwrap());
        assert_eq!(remote.count_in(&sub), 1);
        assert_eq!(
            engine.local().lock().list_assigned_exercises(&workout.id).unwrap().len(),
            1
        );

        remote.set_offline(true);
        assert!(!engine.delete_workout(&workout.id).await.unwrap());
        // Local delete still happened
        assert!(engine.local().lock().get_workout(&workout.id).unwrap().is_none());
        assert!(engine
            .local()
            .lock()
            .list_assigned_exercises(&workout.id)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_workout_clears_exercises_when_definition_delete_fails() {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(remote.clone());
        let workout = WorkoutDefinition::new("Push", "", "", 30);
        let exercises = vec![exercise(&workout.id, "Dip"), exercise(&workout.id, "Press")];
        assert!(engine.save_workout(&workout, &exercises).await.unwrap());

        let definition = paths::workout("u1", &workout.id).unwrap();
        let sub = paths::assigned_exercises("u1", &workout.id).unwrap();
        remote.fail_exact_path(&definition);

        assert!(!engine.delete_workout(&workout.id).await.unwrap());
        assert!(remote.doc(&definition).is_some());
        assert_eq!(remote.count_in(&sub), 0);
        assert!(engine.local().lock().get_workout(&workout.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_workout_limit() {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(remote.clone());
        for i in 0..MAX_WORKOUTS {
            let workout = WorkoutDefinition::new(&format!("W{i}"), "", "", 10);
            engine.save_workout(&workout, &[]).await.unwrap();
            assert_eq!(engine.can_create_workout().await.unwrap(), i + 1 < MAX_WORKOUTS);
        }
        remote.set_offline(true);
        assert!(!engine.can_create_workout().await.unwrap());
    }

    #[tokio::test]
    async fn test_bundle_never_mixes_sources() {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(remote.clone());
        let workout = WorkoutDefinition::new("Push", "", "", 30);
        let local_ex = vec![exercise(&workout.id, "Local Press")];
        engine
            .local()
            .lock()
            .save_workout(&workout, &local_ex)
            .unwrap();

        // Remote has the definition but the exercise listing fails
        remote.insert(
            &paths::workout("u1", &workout.id).unwrap(),
            to_document(&WorkoutDefinition {
                name: "Push (remote)".to_string(),
                ..workout.clone()
            })
            .unwrap(),
        );
        remote.fail_paths_containing("assignedExercises");

        let loaded = engine.load_workout_bundle(&workout.id).await.unwrap();
        assert!(loaded.degraded);
        let (def, exercises) = loaded.value.unwrap();
        assert_eq!(def.name, "Push");
        assert_eq!(exercises, local_ex);

        remote.clear_failures();
        let remote_ex = exercise(&workout.id, "Remote Press");
        remote.insert(
            &paths::assigned_exercise("u1", &workout.id, &remote_ex.id).unwrap(),
            to_document(&remote_ex).unwrap(),
        );
        let loaded = engine.load_workout_bundle(&workout.id).await.unwrap();
        assert!(!loaded.degraded);
        let (def, exercises) = loaded.value.unwrap();
        assert_eq!(def.name, "Push (remote)");
        assert_eq!(exercises, vec![remote_ex]);
    }

    #[tokio::test]
    async fn test_load_route_points_remote_fallback() {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(remote.clone());
        add_points(&engine, "s1", 3);
        engine.sync_pending_points("s1").await.unwrap();

        let other = engine_with(remote.clone());
        let points = other.load_route_points("s1").await.unwrap();
        assert_eq!(points.len(), 3);
        assert!(points.windows(2).all(|w| w[0].timestamp_millis <= w[1].timestamp_millis));
        assert!(points.iter().all(|p| p.synced));
    }

    #[tokio::test]
    async fn test_previous_sets_prefers_remote_then_local() {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(remote.clone());
        let summary = WorkoutSummary::from_sets(
            "sum1",
            "W1",
            "2024-05-01T10:00:00+00:00",
            100,
            vec![ExerciseSets {
                name: "Bench".to_string(),
                sets: vec![RecordedSet {
                    weight: 50.0,
                    reps: 5,
                }],
            }],
        );
        assert!(engine.record_workout_summary(&summary).await.unwrap());

        let previous = engine.previous_sets("W1").await.unwrap();
        assert_eq!(previous["bench"].len(), 1);

        remote.set_offline(true);
        let previous = engine.previous_sets("W1").await.unwrap();
        assert_eq!(previous["bench"][0].reps, 5);
        assert!(engine.previous_sets("W2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_route_summary_history() {
        let remote = Arc::new(FakeRemote::default());
        let engine = engine_with(remote.clone());
        let summary = RouteSummary {
            session_id: "s1".to_string(),
            user_id: "u1".to_string(),
            duration_seconds: 120,
            distance_meters: 222.4,
            calories_estimated: 13,
            completed_at_millis: 1_000,
        };
        remote.set_offline(true);
        assert!(!engine.record_route_summary(&summary).await.unwrap());
        let loaded = engine.load_route_summaries().await.unwrap();
        assert!(loaded.degraded);
        assert_eq!(loaded.value, vec![summary.clone()]);

        remote.set_offline(false);
        assert!(engine.record_route_summary(&summary).await.unwrap());
        let loaded = engine.load_route_summaries().await.unwrap();
        assert!(!loaded.degraded);
        assert_eq!(loaded.value, vec![summary]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_retries_until_shutdown() {
        let remote = Arc::new(FakeRemote::default());
        remote.set_offline(true);
        let engine = Arc::new(engine_with(remote.clone()));
        add_points(&engine, "s1", 2);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&engine).run_background_loop(Duration::from_secs(60), rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(engine.local().lock().pending_points(None).unwrap().len(), 2);

        remote.set_offline(false);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(engine.local().lock().pending_points(None).unwrap().is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
