use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of workout definitions a user may keep.
pub const MAX_WORKOUTS: usize = 10;

// --- Workout definitions ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub duration_minutes: i64,
}

impl WorkoutDefinition {
    /// Build a definition with a fresh client-generated id.
    #[must_use]
    pub fn new(name: &str, description: &str, level: &str, duration_minutes: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            level: level.to_string(),
            duration_minutes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedExercise {
    pub id: String,
    pub workout_id: String,
    pub name: String,
    pub series: i64,
    pub repetitions: i64,
    pub weight: f64,
    #[serde(default)]
    pub photo: String,
    #[serde(default)]
    pub video: String,
    /// Id of the master catalog entry this assignment was made from.
    #[serde(default)]
    pub catalog_ref: String,
}

#[derive(Debug, Clone)]
pub struct NewAssignedExercise {
    pub name: String,
    pub series: i64,
    pub repetitions: i64,
    pub weight: f64,
    pub photo: String,
    pub video: String,
    pub catalog_ref: String,
}

impl NewAssignedExercise {
    #[must_use]
    pub fn assign_to(self, workout_id: &str) -> AssignedExercise {
        AssignedExercise {
            id: Uuid::new_v4().to_string(),
            workout_id: workout_id.to_string(),
            name: self.name,
            series: self.series,
            repetitions: self.repetitions,
            weight: self.weight,
            photo: self.photo,
            video: self.video,
            catalog_ref: self.catalog_ref,
        }
    }
}

// --- Route tracking ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    #[default]
    High,
    Balanced,
    Low,
}

/// A position reported by the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    pub timestamp_millis: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePoint {
    pub id: i64,
    /// Stable identity used as the remote document id.
    pub uuid: String,
    pub session_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub timestamp_millis: i64,
    pub synced: bool,
}

#[derive(Debug, Clone)]
pub struct NewRoutePoint {
    pub uuid: String,
    pub session_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub timestamp_millis: i64,
}

impl NewRoutePoint {
    #[must_use]
    pub fn from_fix(session_id: &str, fix: &LocationFix) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude,
            timestamp_millis: fix.timestamp_millis,
        }
    }
}

/// Body of a route point document in the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRoutePoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    pub timestamp_millis: i64,
}

impl From<&RoutePoint> for RemoteRoutePoint {
    fn from(point: &RoutePoint) -> Self {
        Self {
            latitude: point.latitude,
            longitude: point.longitude,
            altitude: point.altitude,
            timestamp_millis: point.timestamp_millis,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub session_id: String,
    pub user_id: String,
    pub duration_seconds: i64,
    pub distance_meters: f64,
    pub calories_estimated: i64,
    pub completed_at_millis: i64,
}

// --- Workout summaries ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordedSet {
    pub weight: f64,
    pub reps: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSets {
    pub name: String,
    pub sets: Vec<RecordedSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSummary {
    pub id: String,
    #[serde(default)]
    pub workout_id: String,
    /// Completion time, RFC 3339.
    pub date: String,
    pub duration_seconds: i64,
    pub calories: i64,
    pub total_weight_lifted: f64,
    pub exercises: Vec<ExerciseSets>,
}

impl WorkoutSummary {
    /// Build a summary, deriving the lifted total and calorie estimate from the sets.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn from_sets(
        id: &str,
        workout_id: &str,
        date: &str,
        duration_seconds: i64,
        exercises: Vec<ExerciseSets>,
    ) -> Self {
        let total_weight_lifted = total_weight_lifted(&exercises);
        let calories = (total_weight_lifted / 100.0 * 5.0).floor().max(0.0) as i64;
        Self {
            id: id.to_string(),
            workout_id: workout_id.to_string(),
            date: date.to_string(),
            duration_seconds,
            calories,
            total_weight_lifted,
            exercises,
        }
    }
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn total_weight_lifted(exercises: &[ExerciseSets]) -> f64 {
    exercises
        .iter()
        .flat_map(|e| e.sets.iter())
        .map(|s| s.weight * s.reps as f64)
        .sum()
}

// --- Workout session snapshot ---

/// Identity of one set row inside an in-progress workout.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SetKey {
    pub exercise: String,
    pub set_index: u32,
}

impl SetKey {
    #[must_use]
    pub fn new(exercise: &str, set_index: u32) -> Self {
        Self {
            exercise: exercise.to_string(),
            set_index,
        }
    }
}

/// Weight/reps as entered, kept as text until the workout is summarised.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SetPair {
    pub weight: String,
    pub reps: String,
}

impl SetPair {
    #[must_use]
    pub fn new(weight: &str, reps: &str) -> Self {
        Self {
            weight: weight.to_string(),
            reps: reps.to_string(),
        }
    }

    /// Parse into a recorded set. A comma decimal separator is accepted; zero reps yield `None`.
    #[must_use]
    pub fn parse(&self) -> Option<RecordedSet> {
        let weight: f64 = self.weight.trim().replace(',', ".").parse().ok()?;
        let reps: i64 = self.reps.trim().parse().ok()?;
        if reps <= 0 || !weight.is_finite() {
            return None;
        }
        Some(RecordedSet { weight, reps })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkoutSessionSnapshot {
    pub workout_id: String,
    pub elapsed_seconds: u64,
    #[serde(with = "set_key_map", default)]
    pub previous: BTreeMap<SetKey, String>,
    #[serde(with = "set_key_map", default)]
    pub expected: BTreeMap<SetKey, SetPair>,
    #[serde(with = "set_key_map", default)]
    pub actual: BTreeMap<SetKey, SetPair>,
    #[serde(with = "set_key_map", default)]
    pub completed: BTreeMap<SetKey, bool>,
    #[serde(default)]
    pub series_per_exercise: BTreeMap<String, u32>,
}

/// Serializes a `SetKey` map as a list of entries so no key ever needs a delimiter.
mod set_key_map {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::SetKey;

    #[derive(Serialize)]
    struct EntryRef<'a, V> {
        exercise: &'a str,
        set_index: u32,
        value: &'a V,
    }

    #[derive(Deserialize)]
    struct Entry<V> {
        exercise: String,
        set_index: u32,
        value: V,
    }

    pub fn serialize<V, S>(map: &BTreeMap<SetKey, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_seq(map.iter().map(|(key, value)| EntryRef {
            exercise: &key.exercise,
            set_index: key.set_index,
            value,
        }))
    }

    pub fn deserialize<'de, V, D>(deserializer: D) -> Result<BTreeMap<SetKey, V>, D::Error>
    where
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let entries: Vec<Entry<V>> = Vec::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|e| {
                (
                    SetKey {
                        exercise: e.exercise,
                        set_index: e.set_index,
                    },
                    e.value,
                )
            })
            .collect())
    }
}

/// Key used to match an exercise against previously recorded summaries.
#[must_use]
pub fn normalize_exercise_name(name: &str) -> String {
    name.trim().to_lowercase()
}

// --- Validation ---

pub fn validate_workout(workout: &WorkoutDefinition) -> Result<()> {
    validate_id(&workout.id)?;
    if workout.name.trim().is_empty() {
        bail!("Workout name must not be empty");
    }
    if workout.duration_minutes < 0 {
        bail!("duration_minutes must not be negative");
    }
    Ok(())
}

pub fn validate_assigned_exercise(exercise: &AssignedExercise) -> Result<()> {
    validate_id(&exercise.id)?;
    validate_id(&exercise.workout_id)?;
    if exercise.name.trim().is_empty() {
        bail!("Exercise name must not be empty");
    }
    if exercise.series < 0 || exercise.repetitions < 0 {
        bail!("series and repetitions must not be negative");
    }
    if exercise.weight < 0.0 {
        bail!("weight must not be negative");
    }
    Ok(())
}

/// Ids become remote path segments, so they must be non-empty and slash free.
pub fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("Id must not be empty");
    }
    if id.contains('/') {
        bail!("Id '{id}' must not contain '/'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> WorkoutSessionSnapshot {
        let mut snapshot = WorkoutSessionSnapshot {
            workout_id: "W1".to_string(),
            elapsed_seconds: 754,
            ..Default::default()
        };
        let key = SetKey::new("Bench Press", 0);
        snapshot.previous.insert(key.clone(), "60x8".to_string());
        snapshot.expected.insert(key.clone(), SetPair::new("60", "8"));
        snapshot.actual.insert(key.clone(), SetPair::new("62,5", "8"));
        snapshot.completed.insert(key, true);
        snapshot.series_per_exercise.insert("ex-1".to_string(), 4);
        snapshot
    }

    #[test]
    fn test_snapshot_json_roundtrip() {
        let snapshot = sample_snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: WorkoutSessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_snapshot_names_with_delimiters_survive() {
        let mut snapshot = WorkoutSessionSnapshot {
            workout_id: "W1".to_string(),
            ..Default::default()
        };
        for name in ["Curl | Hammer", "Press|1", "Split squat 🏋 über", "a\"b,c:d", ""] {
            snapshot
                .actual
                .insert(SetKey::new(name, 3), SetPair::new("10", "12"));
        }
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: WorkoutSessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.actual.len(), 5);
        assert_eq!(back, snapshot);
        assert!(back.actual.contains_key(&SetKey::new("Press|1", 3)));
    }

    #[test]
    fn test_set_pair_parse() {
        assert_eq!(
            SetPair::new("62,5", "8").parse(),
            Some(RecordedSet {
                weight: 62.5,
                reps: 8
            })
        );
        assert_eq!(SetPair::new("40", "0").parse(), None);
        assert_eq!(SetPair::new("", "10").parse(), None);
        assert_eq!(SetPair::new("abc", "10").parse(), None);
        assert_eq!(SetPair::new("20", "ten").parse(), None);
    }

    #[test]
    fn test_workout_summary_totals() {
        let exercises = vec![
            ExerciseSets {
                name: "Squat".to_string(),
                sets: vec![
                    RecordedSet {
                        weight: 100.0,
                        reps: 5,
                    },
                    RecordedSet {
                        weight: 100.0,
                        reps: 5,
                    },
                ],
            },
            ExerciseSets {
                name: "Row".to_string(),
                sets: vec![RecordedSet {
                    weight: 42.5,
                    reps: 10,
                }],
            },
        ];
        let summary = WorkoutSummary::from_sets("s1", "W1", "2024-05-01T10:00:00Z", 1800, exercises);
        assert!((summary.total_weight_lifted - 1425.0).abs() < f64::EPSILON);
        // 1425 / 100 * 5 = 71.25
        assert_eq!(summary.calories, 71);
    }

    #[test]
    fn test_workout_summary_empty() {
        let summary = WorkoutSummary::from_sets("s1", "W1", "2024-05-01T10:00:00Z", 60, vec![]);
        assert!(summary.total_weight_lifted.abs() < f64::EPSILON);
        assert_eq!(summary.calories, 0);
    }

    #[test]
    fn test_validate_workout() {
        let mut workout = WorkoutDefinition::new("Push day", "", "beginner", 45);
        assert!(validate_workout(&workout).is_ok());
        workout.name = "  ".to_string();
        assert!(validate_workout(&workout).is_err());
        workout.name = "Push".to_string();
        workout.id = "a/b".to_string();
        assert!(validate_workout(&workout).is_err());
    }

    #[test]
    fn test_validate_assigned_exercise() {
        let exercise = NewAssignedExercise {
            name: "Deadlift".to_string(),
            series: 3,
            repetitions: 5,
            weight: 120.0,
            photo: String::new(),
            video: String::new(),
            catalog_ref: "deadlift".to_string(),
        }
        .assign_to("W1");
        assert!(validate_assigned_exercise(&exercise).is_ok());
        let mut bad = exercise.clone();
        bad.weight = -1.0;
        assert!(validate_assigned_exercise(&bad).is_err());
        let mut bad = exercise;
        bad.workout_id = String::new();
        assert!(validate_assigned_exercise(&bad).is_err());
    }

    #[test]
    fn test_normalize_exercise_name() {
        assert_eq!(normalize_exercise_name("  Bench Press "), "bench press");
    }
}
