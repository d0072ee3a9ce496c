use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::{Connection, params};

use crate::models::{
    AssignedExercise, ExerciseSets, NewRoutePoint, RecordedSet, RoutePoint, RouteSummary,
    WorkoutDefinition, WorkoutSummary,
};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS workouts (
                    id TEXT PRIMARY KEY NOT NULL,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    level TEXT NOT NULL DEFAULT '',
                    duration_minutes INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS assigned_exercises (
                    id TEXT PRIMARY KEY NOT NULL,
                    workout_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    series INTEGER NOT NULL,
                    repetitions INTEGER NOT NULL,
                    weight REAL NOT NULL,
                    photo TEXT NOT NULL DEFAULT '',
                    video TEXT NOT NULL DEFAULT '',
                    catalog_ref TEXT NOT NULL DEFAULT '',
                    position INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_assigned_exercises_workout
                    ON assigned_exercises(workout_id);

                CREATE TABLE IF NOT EXISTS route_points (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT NOT NULL UNIQUE,
                    session_id TEXT NOT NULL,
                    latitude REAL NOT NULL,
                    longitude REAL NOT NULL,
                    altitude REAL,
                    timestamp_millis INTEGER NOT NULL,
                    synced INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_route_points_session
                    ON route_points(session_id, timestamp_millis);
                CREATE INDEX IF NOT EXISTS idx_route_points_synced ON route_points(synced);

                CREATE TABLE IF NOT EXISTS route_summaries (
                    session_id TEXT PRIMARY KEY NOT NULL,
                    user_id TEXT NOT NULL,
                    duration_seconds INTEGER NOT NULL,
                    distance_meters REAL NOT NULL,
                    calories_estimated INTEGER NOT NULL,
                    completed_at_millis INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS workout_summaries (
                    id TEXT PRIMARY KEY NOT NULL,
                    workout_id TEXT NOT NULL DEFAULT '',
                    date TEXT NOT NULL,
                    duration_seconds INTEGER NOT NULL,
                    calories INTEGER NOT NULL,
                    total_weight_lifted REAL NOT NULL
                );

                CREATE TABLE IF NOT EXISTS workout_summary_sets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    summary_id TEXT NOT NULL REFERENCES workout_summaries(id) ON DELETE CASCADE,
                    exercise_position INTEGER NOT NULL,
                    exercise_name TEXT NOT NULL,
                    set_position INTEGER NOT NULL,
                    weight REAL NOT NULL,
                    reps INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_workout_summary_sets_summary
                    ON workout_summary_sets(summary_id);

                CREATE TABLE IF NOT EXISTS user_settings (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            // Document table backing the self-hosted remote store
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS documents (
                    path TEXT PRIMARY KEY NOT NULL,
                    collection TEXT NOT NULL,
                    body TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn workout_from_row(row: &rusqlite::Row) -> rusqlite::Result<WorkoutDefinition> {
        Ok(WorkoutDefinition {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            level: row.get(3)?,
            duration_minutes: row.get(4)?,
        })
    }

    fn assigned_exercise_from_row(row: &rusqlite::Row) -> rusqlite::Result<AssignedExercise> {
        Ok(AssignedExercise {
            id: row.get(0)?,
            workout_id: row.get(1)?,
            name: row.get(2)?,
            series: row.get(3)?,
            repetitions: row.get(4)?,
            weight: row.get(5)?,
            photo: row.get(6)?,
            video: row.get(7)?,
            catalog_ref: row.get(8)?,
        })
    }

    fn route_point_from_row(row: &rusqlite::Row) -> rusqlite::Result<RoutePoint> {
        Ok(RoutePoint {
            id: row.get(0)?,
            uuid: row.get(1)?,
            session_id: row.get(2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            altitude: row.get(5)?,
            timestamp_millis: row.get(6)?,
            synced: row.get::<_, i64>(7)? != 0,
        })
    }

    fn route_summary_from_row(row: &rusqlite::Row) -> rusqlite::Result<RouteSummary> {
        Ok(RouteSummary {
            session_id: row.get(0)?,
            user_id: row.get(1)?,
            duration_seconds: row.get(2)?,
            distance_meters: row.get(3)?,
            calories_estimated: row.get(4)?,
            completed_at_millis: row.get(5)?,
        })
    }

    // --- Workout definitions ---

    fn write_workout(conn: &Connection, workout: &WorkoutDefinition) -> Result<()> {
        let now = Local::now().to_rfc3339();
        conn.execute(
            "INSERT INTO workouts (id, name, description, level, duration_minutes, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                description = excluded.description, level = excluded.level,
                duration_minutes = excluded.duration_minutes, updated_at = excluded.updated_at",
            params![
                workout.id,
                workout.name,
                workout.description,
                workout.level,
                workout.duration_minutes,
                now,
            ],
        )?;
        Ok(())
    }

    fn write_assigned_exercises(
        conn: &Connection,
        workout_id: &str,
        exercises: &[AssignedExercise],
    ) -> Result<()> {
        conn.execute(
            "DELETE FROM assigned_exercises WHERE workout_id = ?1",
            params![workout_id],
        )?;
        let mut stmt = conn.prepare(
            "INSERT OR REPLACE INTO assigned_exercises
                (id, workout_id, name, series, repetitions, weight, photo, video, catalog_ref, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for (position, exercise) in (0_i64..).zip(exercises) {
            stmt.execute(params![
                exercise.id,
                workout_id,
                exercise.name,
                exercise.series,
                exercise.repetitions,
                exercise.weight,
                exercise.photo,
                exercise.video,
                exercise.catalog_ref,
                position,
            ])?;
        }
        Ok(())
    }

    pub fn upsert_workout(&self, workout: &WorkoutDefinition) -> Result<()> {
        Self::write_workout(&self.conn, workout)
    }

    /// Store a definition and its full exercise list in one transaction.
    pub fn save_workout(
        &self,
        workout: &WorkoutDefinition,
        exercises: &[AssignedExercise],
    ) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Starting transaction for workout")?;
        Self::write_workout(&tx, workout).context("Writing workout")?;
        Self::write_assigned_exercises(&tx, &workout.id, exercises)
            .context("Writing assigned exercises")?;
        tx.commit().context("Committing workout transaction")?;
        Ok(())
    }

    pub fn get_workout(&self, id: &str) -> Result<Option<WorkoutDefinition>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, level, duration_minutes FROM workouts WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::workout_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_workouts(&self) -> Result<Vec<WorkoutDefinition>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, level, duration_minutes FROM workouts
             ORDER BY name COLLATE NOCASE, id",
        )?;
        let workouts = stmt
            .query_map([], Self::workout_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(workouts)
    }

    pub fn count_workouts(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM workouts", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Replace every workout definition with `workouts`. Exercises of
    /// definitions that disappear are removed with them.
    pub fn replace_workouts(&self, workouts: &[WorkoutDefinition]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Starting transaction for workouts")?;
        tx.execute("DELETE FROM workouts", [])?;
        for workout in workouts {
            Self::write_workout(&tx, workout)?;
        }
        tx.execute(
            "DELETE FROM assigned_exercises WHERE workout_id NOT IN (SELECT id FROM workouts)",
            [],
        )?;
        tx.commit().context("Committing workouts transaction")?;
        Ok(())
    }

    /// Delete a definition and its exercises. Returns whether the definition existed.
    pub fn delete_workout(&self, id: &str) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Starting transaction for workout delete")?;
        tx.execute(
            "DELETE FROM assigned_exercises WHERE workout_id = ?1",
            params![id],
        )?;
        let rows = tx.execute("DELETE FROM workouts WHERE id = ?1", params![id])?;
        tx.commit().context("Committing workout delete")?;
        Ok(rows > 0)
    }

    // --- Assigned exercises ---

    pub fn list_assigned_exercises(&self, workout_id: &str) -> Result<Vec<AssignedExercise>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, workout_id, name, series, repetitions, weight, photo, video, catalog_ref
             FROM assigned_exercises WHERE workout_id = ?1
             ORDER BY position, id",
        )?;
        let exercises = stmt
            .query_map(params![workout_id], Self::assigned_exercise_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(exercises)
    }

    pub fn replace_assigned_exercises(
        &self,
        workout_id: &str,
        exercises: &[AssignedExercise],
    ) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Starting transaction for assigned exercises")?;
        Self::write_assigned_exercises(&tx, workout_id, exercises)?;
        tx.commit()
            .context("Committing assigned exercises transaction")?;
        Ok(())
    }

    pub fn delete_assigned_exercise(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM assigned_exercises WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // --- Route points ---

    pub fn insert_route_point(&self, point: &NewRoutePoint) -> Result<RoutePoint> {
        self.conn.execute(
            "INSERT INTO route_points (uuid, session_id, latitude, longitude, altitude, timestamp_millis, synced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                point.uuid,
                point.session_id,
                point.latitude,
                point.longitude,
                point.altitude,
                point.timestamp_millis,
            ],
        )?;
        Ok(RoutePoint {
            id: self.conn.last_insert_rowid(),
            uuid: point.uuid.clone(),
            session_id: point.session_id.clone(),
            latitude: point.latitude,
            longitude: point.longitude,
            altitude: point.altitude,
            timestamp_millis: point.timestamp_millis,
            synced: false,
        })
    }

    /// Points of one session in arrival order.
    pub fn route_points(&self, session_id: &str) -> Result<Vec<RoutePoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, session_id, latitude, longitude, altitude, timestamp_millis, synced
             FROM route_points WHERE session_id = ?1
             ORDER BY id",
        )?;
        let points = stmt
            .query_map(params![session_id], Self::route_point_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(points)
    }

    /// Points not yet uploaded, optionally restricted to one session.
    pub fn pending_points(&self, session_id: Option<&str>) -> Result<Vec<RoutePoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uuid, session_id, latitude, longitude, altitude, timestamp_millis, synced
             FROM route_points
             WHERE synced = 0 AND (?1 IS NULL OR session_id = ?1)
             ORDER BY session_id, id",
        )?;
        let points = stmt
            .query_map(params![session_id], Self::route_point_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(points)
    }

    /// Mark points as uploaded. Returns how many rows actually changed state.
    pub fn mark_points_synced(&self, ids: &[i64]) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Starting transaction for synced points")?;
        let mut changed = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE route_points SET synced = 1 WHERE id = ?1 AND synced = 0")?;
            for id in ids {
                changed += stmt.execute(params![id])?;
            }
        }
        tx.commit().context("Committing synced points")?;
        Ok(changed)
    }

    pub fn count_route_points(&self, session_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM route_points WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    // --- Route summaries ---

    pub fn upsert_route_summary(&self, summary: &RouteSummary) -> Result<()> {
        Self::write_route_summary(&self.conn, summary)
    }

    fn write_route_summary(conn: &Connection, summary: &RouteSummary) -> Result<()> {
        conn.execute(
            "INSERT INTO route_summaries
                (session_id, user_id, duration_seconds, distance_meters, calories_estimated, completed_at_millis)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(session_id) DO UPDATE SET user_id = excluded.user_id,
                duration_seconds = excluded.duration_seconds,
                distance_meters = excluded.distance_meters,
                calories_estimated = excluded.calories_estimated,
                completed_at_millis = excluded.completed_at_millis",
            params![
                summary.session_id,
                summary.user_id,
                summary.duration_seconds,
                summary.distance_meters,
                summary.calories_estimated,
                summary.completed_at_millis,
            ],
        )?;
        Ok(())
    }

    pub fn get_route_summary(&self, session_id: &str) -> Result<Option<RouteSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, user_id, duration_seconds, distance_meters, calories_estimated, completed_at_millis
             FROM route_summaries WHERE session_id = ?1",
        )?;
        let mut rows = stmt.query(params![session_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::route_summary_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// Most recent first.
    pub fn list_route_summaries(&self) -> Result<Vec<RouteSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, user_id, duration_seconds, distance_meters, calories_estimated, completed_at_millis
             FROM route_summaries ORDER BY completed_at_millis DESC, session_id",
        )?;
        let summaries = stmt
            .query_map([], Self::route_summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    pub fn replace_route_summaries(&self, summaries: &[RouteSummary]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Starting transaction for route summaries")?;
        tx.execute("DELETE FROM route_summaries", [])?;
        for summary in summaries {
            Self::write_route_summary(&tx, summary)?;
        }
        tx.commit().context("Committing route summaries")?;
        Ok(())
    }

    // --- Workout summaries ---

    fn write_workout_summary(conn: &Connection, summary: &WorkoutSummary) -> Result<()> {
        conn.execute(
            "DELETE FROM workout_summary_sets WHERE summary_id = ?1",
            params![summary.id],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO workout_summaries
                (id, workout_id, date, duration_seconds, calories, total_weight_lifted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                summary.id,
                summary.workout_id,
                summary.date,
                summary.duration_seconds,
                summary.calories,
                summary.total_weight_lifted,
            ],
        )?;
        let mut stmt = conn.prepare(
            "INSERT INTO workout_summary_sets
                (summary_id, exercise_position, exercise_name, set_position, weight, reps)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (exercise_position, exercise) in (0_i64..).zip(&summary.exercises) {
            for (set_position, set) in (0_i64..).zip(&exercise.sets) {
                stmt.execute(params![
                    summary.id,
                    exercise_position,
                    exercise.name,
                    set_position,
                    set.weight,
                    set.reps,
                ])?;
            }
        }
        Ok(())
    }

    pub fn insert_workout_summary(&self, summary: &WorkoutSummary) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Starting transaction for workout summary")?;
        Self::write_workout_summary(&tx, summary)?;
        tx.commit().context("Committing workout summary")?;
        Ok(())
    }

    pub fn replace_workout_summaries(&self, summaries: &[WorkoutSummary]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Starting transaction for workout summaries")?;
        tx.execute("DELETE FROM workout_summary_sets", [])?;
        tx.execute("DELETE FROM workout_summaries", [])?;
        for summary in summaries {
            Self::write_workout_summary(&tx, summary)?;
        }
        tx.commit().context("Committing workout summaries")?;
        Ok(())
    }

    fn load_summary_sets(&self, summary_id: &str) -> Result<Vec<ExerciseSets>> {
        let mut stmt = self.conn.prepare(
            "SELECT exercise_position, exercise_name, weight, reps FROM workout_summary_sets
             WHERE summary_id = ?1 ORDER BY exercise_position, set_position",
        )?;
        let rows = stmt
            .query_map(params![summary_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    RecordedSet {
                        weight: row.get(2)?,
                        reps: row.get(3)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut grouped: BTreeMap<i64, ExerciseSets> = BTreeMap::new();
        for (position, name, set) in rows {
            grouped
                .entry(position)
                .or_insert_with(|| ExerciseSets {
                    name,
                    sets: Vec::new(),
                })
                .sets
                .push(set);
        }
        Ok(grouped.into_values().collect())
    }

    /// Most recent first.
    pub fn list_workout_summaries(&self) -> Result<Vec<WorkoutSummary>> {
        let headers = {
            let mut stmt = self.conn.prepare(
                "SELECT id, workout_id, date, duration_seconds, calories, total_weight_lifted
                 FROM workout_summaries ORDER BY date DESC, id",
            )?;
            stmt.query_map([], |row| {
                Ok(WorkoutSummary {
                    id: row.get(0)?,
                    workout_id: row.get(1)?,
                    date: row.get(2)?,
                    duration_seconds: row.get(3)?,
                    calories: row.get(4)?,
                    total_weight_lifted: row.get(5)?,
                    exercises: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?
        };
        let mut summaries = Vec::with_capacity(headers.len());
        for mut summary in headers {
            summary.exercises = self.load_summary_sets(&summary.id)?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    /// Latest summary recorded for a workout definition.
    pub fn latest_workout_summary(&self, workout_id: &str) -> Result<Option<WorkoutSummary>> {
        Ok(self
            .list_workout_summaries()?
            .into_iter()
            .find(|s| s.workout_id == workout_id))
    }

    // --- User Settings ---

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO user_settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM user_settings WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM user_settings WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    // --- Documents ---

    pub fn put_document(&self, path: &str, collection: &str, body: &str) -> Result<()> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO documents (path, collection, body, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![path, collection, body, now],
        )?;
        Ok(())
    }

    pub fn get_document(&self, path: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM documents WHERE path = ?1")?;
        let mut rows = stmt.query(params![path])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    /// Documents directly inside `collection`, as `(path, body)` ordered by path.
    pub fn list_documents(&self, collection: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, body FROM documents WHERE collection = ?1 ORDER BY path",
        )?;
        let docs = stmt
            .query_map(params![collection], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(docs)
    }

    pub fn delete_document(&self, path: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM documents WHERE path = ?1", params![path])?;
        Ok(rows > 0)
    }

    pub fn delete_collection(&self, collection: &str) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM documents WHERE collection = ?1",
            params![collection],
        )?;
        Ok(rows)
    }
}

/// The on-device store, shared between the sampler worker, sync and the CLI.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Mutex<Database>>,
}

impl LocalStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn lock(&self) -> MutexGuard<'_, Database> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
