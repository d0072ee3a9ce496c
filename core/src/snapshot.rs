use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::db::LocalStore;
use crate::models::WorkoutSessionSnapshot;
use crate::sync::SyncEngine;
use crate::workout::WorkoutExecution;

/// Key under which the in-progress workout is persisted.
pub const SNAPSHOT_KEY: &str = "workout_session_snapshot";

/// Flat string store the snapshot lives in.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<bool>;
}

impl KeyValueStore for LocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.lock().get_setting(key)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.lock().set_setting(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.lock().delete_setting(key)
    }
}

/// Outcome of looking for an interrupted workout at launch.
#[derive(Debug)]
pub enum Recovery {
    /// No snapshot stored.
    Nothing,
    /// A snapshot existed but its workout is gone or empty; it was cleared.
    Stale { workout_id: String },
    /// The workout was rebuilt from the snapshot.
    Resumed(Box<WorkoutExecution>),
}

/// Persists the state of an in-progress workout so it survives the process
/// being killed. At most one snapshot exists at a time.
pub struct SnapshotManager<K> {
    store: K,
}

impl<K: KeyValueStore> SnapshotManager<K> {
    pub fn new(store: K) -> Self {
        Self { store }
    }

    /// Replace the stored snapshot with `execution`'s current state.
    pub fn save(&self, execution: &WorkoutExecution) -> Result<()> {
        self.save_snapshot(&execution.to_snapshot())
    }

    pub fn save_snapshot(&self, snapshot: &WorkoutSessionSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot).context("Failed to encode workout snapshot")?;
        self.store.put(SNAPSHOT_KEY, &json)?;
        debug!(
            workout_id = %snapshot.workout_id,
            elapsed_seconds = snapshot.elapsed_seconds,
            "Workout snapshot saved"
        );
        Ok(())
    }

    /// The stored snapshot, if any. A snapshot that no longer decodes is
    /// discarded.
    pub fn load(&self) -> Result<Option<WorkoutSessionSnapshot>> {
        let Some(json) = self.store.get(SNAPSHOT_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!("Discarding unreadable workout snapshot: {e}");
                self.clear()?;
                Ok(None)
            }
        }
    }

    /// Overlay the stored snapshot onto `execution`. No-op when absent or
    /// when it belongs to another workout.
    pub fn restore(&self, execution: &mut WorkoutExecution) -> Result<bool> {
        match self.load()? {
            Some(snapshot) if snapshot.workout_id == execution.workout().id => {
                execution.apply_snapshot(snapshot);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        matches!(self.store.get(SNAPSHOT_KEY), Ok(Some(_)))
    }

    pub fn clear(&self) -> Result<()> {
        if self.store.remove(SNAPSHOT_KEY)? {
            debug!("Workout snapshot cleared");
        }
        Ok(())
    }

    /// Rebuild an interrupted workout. Snapshots pointing at a workout that no
    /// longer exists, or has no exercises, are cleared.
    pub async fn try_recover(&self, sync: &SyncEngine) -> Result<Recovery> {
        let Some(snapshot) = self.load()? else {
            return Ok(Recovery::Nothing);
        };
        let workout_id = snapshot.workout_id.clone();
        let loaded = sync.load_workout_bundle(&workout_id).await?;
        match loaded.value {
            Some((workout, exercises)) if !exercises.is_empty() => {
                info!(
                    workout_id = %workout_id,
                    elapsed_seconds = snapshot.elapsed_seconds,
                    degraded = loaded.degraded,
                    "Resuming interrupted workout"
                );
                Ok(Recovery::Resumed(Box::new(WorkoutExecution::from_snapshot(
                    workout, exercises, snapshot,
                ))))
            }
            _ => {
                info!(workout_id = %workout_id, "Interrupted workout no longer available");
                self.clear()?;
                Ok(Recovery::Stale { workout_id })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::{NewAssignedExercise, SetKey, WorkoutDefinition};
    use crate::remote::StaticIdentity;
    use crate::remote::fake::FakeRemote;
    use crate::workout::PreviousSets;

    fn engine(local: &LocalStore, remote: Arc<FakeRemote>) -> SyncEngine {
        SyncEngine::new(
            local.clone(),
            remote,
            Arc::new(StaticIdentity(Some("u1".to_string()))),
        )
    }

    fn workout_with_exercise(local: &LocalStore) -> (WorkoutDefinition, WorkoutExecution) {
        let workout = WorkoutDefinition::new("Full body", "", "", 60);
        let exercises = vec![
            NewAssignedExercise {
                name: "Squat".to_string(),
                series: 3,
                repetitions: 5,
                weight: 100.0,
                photo: String::new(),
                video: String::new(),
                catalog_ref: String::new(),
            }
            .assign_to(&workout.id),
        ];
        local.lock().save_workout(&workout, &exercises).unwrap();
        let exec = WorkoutExecution::new(workout.clone(), exercises, &PreviousSets::new());
        (workout, exec)
    }

    #[test]
    fn test_save_load_clear() {
        let local = LocalStore::open_in_memory().unwrap();
        let snapshots = SnapshotManager::new(local.clone());
        assert!(snapshots.load().unwrap().is_none());

        let (_, mut exec) = workout_with_exercise(&local);
        exec.tick();
        snapshots.save(&exec).unwrap();
        assert!(snapshots.exists());
        assert_eq!(snapshots.load().unwrap().unwrap(), exec.to_snapshot());

        exec.tick();
        snapshots.save(&exec).unwrap();
        assert_eq!(snapshots.load().unwrap().unwrap().elapsed_seconds, 2);

        snapshots.clear().unwrap();
        assert!(!snapshots.exists());
        snapshots.clear().unwrap();
    }

    #[test]
    fn test_corrupt_snapshot_is_discarded() {
        let local = LocalStore::open_in_memory().unwrap();
        local.put(SNAPSHOT_KEY, "{not json").unwrap();
        let snapshots = SnapshotManager::new(local.clone());
        assert!(snapshots.load().unwrap().is_none());
        assert!(local.get(SNAPSHOT_KEY).unwrap().is_none());
    }

    #[test]
    fn test_restore_only_matching_workout() {
        let local = LocalStore::open_in_memory().unwrap();
        let snapshots = SnapshotManager::new(local.clone());
        let (workout, mut exec) = workout_with_exercise(&local);
        let key = SetKey::new("Squat", 0);
        exec.record_actual(&key, "100", "5").unwrap();
        snapshots.save(&exec).unwrap();

        let mut fresh = WorkoutExecution::new(
            workout,
            exec.exercises().to_vec(),
            &PreviousSets::new(),
        );
        assert!(snapshots.restore(&mut fresh).unwrap());
        assert_eq!(fresh.to_snapshot(), exec.to_snapshot());

        let other = WorkoutDefinition::new("Other", "", "", 10);
        let mut unrelated = WorkoutExecution::new(other, vec![], &PreviousSets::new());
        assert!(!snapshots.restore(&mut unrelated).unwrap());
    }

    #[tokio::test]
    async fn test_recover_resumes_offline() {
        let local = LocalStore::open_in_memory().unwrap();
        let remote = Arc::new(FakeRemote::default());
        remote.set_offline(true);
        let sync = engine(&local, remote);
        let snapshots = SnapshotManager::new(local.clone());

        let (_, mut exec) = workout_with_exercise(&local);
        for _ in 0..754 {
            exec.tick();
        }
        let key = SetKey::new("Squat", 1);
        exec.record_actual(&key, "102,5", "5").unwrap();
        exec.toggle_completed(&key).unwrap();
        snapshots.save(&exec).unwrap();

        let Recovery::Resumed(resumed) = snapshots.try_recover(&sync).await.unwrap() else {
            panic!("expected resumed workout");
        };
        assert_eq!(resumed.elapsed_seconds(), 754);
        assert_eq!(resumed.to_snapshot(), exec.to_snapshot());
        assert!(snapshots.exists());
    }

    #[tokio::test]
    async fn test_recover_clears_stale_snapshot() {
        let local = LocalStore::open_in_memory().unwrap();
        let remote = Arc::new(FakeRemote::default());
        let sync = engine(&local, remote);
        let snapshots = SnapshotManager::new(local.clone());

        let (workout, exec) = workout_with_exercise(&local);
        snapshots.save(&exec).unwrap();
        // Online and the remote has no such workout
        let recovery = snapshots.try_recover(&sync).await.unwrap();
        assert!(matches!(recovery, Recovery::Stale { workout_id } if workout_id == workout.id));
        assert!(!snapshots.exists());
        assert!(matches!(
            snapshots.try_recover(&sync).await.unwrap(),
            Recovery::Nothing
        ));
    }
}
