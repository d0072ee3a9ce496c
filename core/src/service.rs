use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{TimeZone, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::db::LocalStore;
use crate::models::{
    AssignedExercise, MAX_WORKOUTS, NewAssignedExercise, RouteSummary, WorkoutDefinition,
    WorkoutSummary, validate_assigned_exercise, validate_workout,
};
use crate::remote::{RemoteStore, UserIdentity};
use crate::session::{
    ForegroundIndicator, LocationProvider, SessionConfig, SessionStateMachine, summarize_route,
};
use crate::snapshot::{Recovery, SnapshotManager};
use crate::sync::{Loaded, SyncEngine, SyncReport};
use crate::workout::WorkoutExecution;

/// Owner recorded on route summaries when nobody is signed in.
pub const LOCAL_USER: &str = "local";

/// Entry point tying the stores, sync and the two session kinds together.
pub struct Tracker {
    local: LocalStore,
    sync: Arc<SyncEngine>,
    snapshots: SnapshotManager<LocalStore>,
    identity: Arc<dyn UserIdentity>,
    clock: Arc<dyn Clock>,
}

impl Tracker {
    pub fn new(
        local: LocalStore,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn UserIdentity>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sync = Arc::new(SyncEngine::new(
            local.clone(),
            remote,
            Arc::clone(&identity),
        ));
        Self {
            snapshots: SnapshotManager::new(local.clone()),
            local,
            sync,
            identity,
            clock,
        }
    }

    pub fn open(
        db_path: &Path,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn UserIdentity>,
    ) -> Result<Self> {
        let local = LocalStore::open(db_path)?;
        Ok(Self::new(local, remote, identity, Arc::new(SystemClock)))
    }

    #[must_use]
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    #[must_use]
    pub fn sync(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.sync)
    }

    #[must_use]
    pub fn snapshots(&self) -> &SnapshotManager<LocalStore> {
        &self.snapshots
    }

    fn now_rfc3339(&self) -> String {
        Utc.timestamp_millis_opt(self.clock.now_millis())
            .single()
            .unwrap_or_else(Utc::now)
            .to_rfc3339()
    }

    // --- Workout definitions ---

    /// Create a definition with its exercises. Rejected once the user has
    /// reached the workout limit.
    pub async fn create_workout(
        &self,
        workout: &WorkoutDefinition,
        exercises: Vec<NewAssignedExercise>,
    ) -> Result<(Vec<AssignedExercise>, bool)> {
        validate_workout(workout)?;
        if !self.sync.can_create_workout().await? {
            bail!("Workout limit reached ({MAX_WORKOUTS}); delete one before creating another");
        }
        let exercises: Vec<AssignedExercise> = exercises
            .into_iter()
            .map(|e| e.assign_to(&workout.id))
            .collect();
        for exercise in &exercises {
            validate_assigned_exercise(exercise)?;
        }
        let synced = self.sync.save_workout(workout, &exercises).await?;
        info!(workout_id = %workout.id, exercises = exercises.len(), synced, "Workout created");
        Ok((exercises, synced))
    }

    /// Append exercises to an existing definition.
    pub async fn assign_exercises(
        &self,
        workout_id: &str,
        additions: Vec<NewAssignedExercise>,
    ) -> Result<(Vec<AssignedExercise>, bool)> {
        if self.local.lock().get_workout(workout_id)?.is_none() {
            bail!("Workout not found: {workout_id}");
        }
        let mut exercises = self.sync.load_assigned_exercises(workout_id).await?.value;
        for addition in additions {
            let exercise = addition.assign_to(workout_id);
            validate_assigned_exercise(&exercise)?;
            exercises.push(exercise);
        }
        let synced = self
            .sync
            .replace_assigned_exercises(workout_id, &exercises)
            .await?;
        Ok((exercises, synced))
    }

    pub async fn workouts(&self) -> Result<Loaded<Vec<WorkoutDefinition>>> {
        self.sync.load_workouts().await
    }

    // --- Route sessions ---

    #[must_use]
    pub fn new_route_session(
        &self,
        location: Arc<dyn LocationProvider>,
        indicator: Arc<dyn ForegroundIndicator>,
        config: SessionConfig,
    ) -> SessionStateMachine {
        SessionStateMachine::new(
            &Uuid::new_v4().to_string(),
            self.local.clone(),
            Arc::clone(&self.clock),
            location,
            indicator,
            config,
        )
    }

    /// Summarise a stopped session, store the summary locally and remotely,
    /// then push its points. Fails without persisting anything when fewer
    /// than two points were recorded.
    pub async fn finish_route(&self, session_id: &str) -> Result<(RouteSummary, SyncReport)> {
        let points = self.local.lock().route_points(session_id)?;
        let user_id = self
            .identity
            .current_user_id()
            .unwrap_or_else(|| LOCAL_USER.to_string());
        let summary = summarize_route(session_id, &user_id, &points, self.clock.now_millis())?;
        self.sync.record_route_summary(&summary).await?;
        let report = match self.sync.sync_pending_points(session_id).await {
            Ok(report) => report,
            Err(e) => {
                warn!(session_id, "Route points left pending: {e:#}");
                SyncReport::default()
            }
        };
        info!(
            session_id,
            distance_meters = summary.distance_meters,
            calories = summary.calories_estimated,
            "Route finished"
        );
        Ok((summary, report))
    }

    // --- Workout sessions ---

    /// Load a workout and open a new execution for it. The snapshot is
    /// written immediately so the session survives a crash from the start.
    pub async fn start_workout(&self, workout_id: &str) -> Result<WorkoutExecution> {
        let loaded = self.sync.load_workout_bundle(workout_id).await?;
        let Some((workout, exercises)) = loaded.value else {
            bail!("Workout not found: {workout_id}");
        };
        if exercises.is_empty() {
            bail!("Workout '{}' has no exercises", workout.name);
        }
        let previous = self.sync.previous_sets(workout_id).await?;
        let execution = WorkoutExecution::new(workout, exercises, &previous);
        self.snapshots.save(&execution)?;
        Ok(execution)
    }

    /// Persist the current state of an execution.
    pub fn checkpoint(&self, execution: &WorkoutExecution) -> Result<()> {
        self.snapshots
            .save(execution)
            .context("Failed to save workout progress")
    }

    /// Record the summary and drop the snapshot.
    pub async fn finish_workout(
        &self,
        execution: &WorkoutExecution,
    ) -> Result<(WorkoutSummary, bool)> {
        let summary = execution.summarize(&Uuid::new_v4().to_string(), &self.now_rfc3339());
        let synced = self.sync.record_workout_summary(&summary).await?;
        self.snapshots.clear()?;
        info!(
            workout_id = %summary.workout_id,
            total_weight = summary.total_weight_lifted,
            calories = summary.calories,
            "Workout finished"
        );
        Ok((summary, synced))
    }

    /// Abandon the workout in progress without recording anything.
    pub fn cancel_workout(&self) -> Result<()> {
        self.snapshots.clear()
    }

    pub async fn recover(&self) -> Result<Recovery> {
        self.snapshots.try_recover(&self.sync).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::clock::ManualClock;
    use crate::remote::StaticIdentity;
    use crate::remote::fake::FakeRemote;
    use crate::session::tests::{CountingIndicator, ScriptedProvider};
    use crate::session::SessionError;

    fn tracker(remote: Arc<FakeRemote>, clock: Arc<ManualClock>) -> Tracker {
        Tracker::new(
            LocalStore::open_in_memory().unwrap(),
            remote,
            Arc::new(StaticIdentity(Some("u1".to_string()))),
            clock,
        )
    }

    fn bench() -> NewAssignedExercise {
        NewAssignedExercise {
            name: "Bench Press".to_string(),
            series: 2,
            repetitions: 8,
            weight: 60.0,
            photo: String::new(),
            video: String::new(),
            catalog_ref: "bench".to_string(),
        }
    }

    #[tokio::test]
    async fn test_route_session_end_to_end() {
        let remote = Arc::new(FakeRemote::default());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let tracker = tracker(remote.clone(), clock.clone());
        let provider = Arc::new(ScriptedProvider::default());
        let indicator = Arc::new(CountingIndicator::default());

        let mut session =
            tracker.new_route_session(provider.clone(), indicator.clone(), SessionConfig::default());
        session.start().unwrap();
        let t0 = clock.now_millis();
        provider.emit(0.0, 0.0, t0);
        clock.advance_secs(60);
        provider.emit(0.0, 0.001, t0 + 60_000);
        clock.advance_secs(60);
        provider.emit(0.0, 0.002, t0 + 120_000);
        let report = session.stop().await.unwrap();
        assert_eq!(report.elapsed_seconds, 120);
        assert_eq!(provider.stops.load(Ordering::SeqCst), 1);

        let (summary, sync) = tracker.finish_route(session.session_id()).await.unwrap();
        assert_eq!(summary.duration_seconds, 120);
        assert_eq!(summary.calories_estimated, 13);
        assert_eq!(summary.user_id, "u1");
        assert_eq!(sync.marked, 3);
        assert!(remote
            .doc(&format!("users/u1/routeRecords/{}", session.session_id()))
            .is_some());
    }

    #[tokio::test]
    async fn test_finish_route_with_one_point_persists_nothing() {
        let remote = Arc::new(FakeRemote::default());
        let clock = Arc::new(ManualClock::new(0));
        let tracker = tracker(remote.clone(), clock.clone());
        let provider = Arc::new(ScriptedProvider::default());
        let mut session = tracker.new_route_session(
            provider.clone(),
            Arc::new(CountingIndicator::default()),
            SessionConfig::default(),
        );
        session.start().unwrap();
        provider.emit(1.0, 1.0, 0);
        session.stop().await.unwrap();

        let err = tracker.finish_route(session.session_id()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::InsufficientData { points: 1, .. })
        ));
        assert!(tracker
            .local()
            .lock()
            .get_route_summary(session.session_id())
            .unwrap()
            .is_none());
        assert_eq!(remote.writes(), 0);
    }

    #[tokio::test]
    async fn test_workout_lifecycle_with_crash_recovery() {
        let remote = Arc::new(FakeRemote::default());
        let clock = Arc::new(ManualClock::new(1_714_557_600_000));
        let tracker = tracker(remote.clone(), clock.clone());
        let workout = WorkoutDefinition::new("Push", "", "beginner", 45);
        tracker.create_workout(&workout, vec![bench()]).await.unwrap();

        let mut exec = tracker.start_workout(&workout.id).await.unwrap();
        assert!(tracker.snapshots().exists());
        let key = exec.key_for("Bench Press", 0).unwrap();
        exec.record_actual(&key, "60", "8").unwrap();
        exec.toggle_completed(&key).unwrap();
        for _ in 0..90 {
            exec.tick();
        }
        tracker.checkpoint(&exec).unwrap();
        drop(exec);

        // Process restarts, remote now unreachable
        remote.set_offline(true);
        let Recovery::Resumed(exec) = tracker.recover().await.unwrap() else {
            panic!("expected resumed workout");
        };
        assert_eq!(exec.elapsed_seconds(), 90);

        remote.set_offline(false);
        let (summary, synced) = tracker.finish_workout(&exec).await.unwrap();
        assert!(synced);
        assert_eq!(summary.duration_seconds, 90);
        assert!((summary.total_weight_lifted - 480.0).abs() < 1e-9);
        assert_eq!(summary.calories, 24);
        assert!(!tracker.snapshots().exists());
        assert!(matches!(tracker.recover().await.unwrap(), Recovery::Nothing));

        // Next run shows what was lifted last time
        let next = tracker.start_workout(&workout.id).await.unwrap();
        let rows = next.rows(&next.exercises()[0]);
        assert_eq!(rows[0].previous.as_deref(), Some("60x8"));
        tracker.cancel_workout().unwrap();
        assert!(!tracker.snapshots().exists());
    }

    #[tokio::test]
    async fn test_create_workout_limit() {
        let remote = Arc::new(FakeRemote::default());
        let tracker = tracker(remote, Arc::new(ManualClock::new(0)));
        for i in 0..MAX_WORKOUTS {
            let workout = WorkoutDefinition::new(&format!("W{i}"), "", "", 10);
            tracker.create_workout(&workout, vec![]).await.unwrap();
        }
        let extra = WorkoutDefinition::new("One too many", "", "", 10);
        let err = tracker.create_workout(&extra, vec![]).await.unwrap_err();
        assert!(err.to_string().contains("limit"));
    }

    #[tokio::test]
    async fn test_assign_exercises_appends() {
        let remote = Arc::new(FakeRemote::default());
        let tracker = tracker(remote.clone(), Arc::new(ManualClock::new(0)));
        let workout = WorkoutDefinition::new("Pull", "", "", 30);
        tracker.create_workout(&workout, vec![bench()]).await.unwrap();
        let mut row = bench();
        row.name = "Row".to_string();
        let (exercises, synced) = tracker
            .assign_exercises(&workout.id, vec![row])
            .await
            .unwrap();
        assert!(synced);
        assert_eq!(exercises.len(), 2);
        assert!(tracker.assign_exercises("missing", vec![]).await.is_err());
    }
}
