use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::models::{
    AssignedExercise, ExerciseSets, RecordedSet, SetKey, SetPair, WorkoutDefinition,
    WorkoutSessionSnapshot, WorkoutSummary, normalize_exercise_name,
};

/// Sets recorded last time, keyed by normalised exercise name.
pub type PreviousSets = BTreeMap<String, Vec<RecordedSet>>;

#[must_use]
pub fn previous_sets_from_summary(summary: &WorkoutSummary) -> PreviousSets {
    let mut previous = PreviousSets::new();
    for exercise in &summary.exercises {
        previous
            .entry(normalize_exercise_name(&exercise.name))
            .or_default()
            .extend(exercise.sets.iter().copied());
    }
    previous
}

/// `62.5` -> "62.5", `60.0` -> "60".
#[must_use]
pub fn format_weight(weight: f64) -> String {
    if weight.fract().abs() < f64::EPSILON && weight.abs() < 1e15 {
        format!("{weight:.0}")
    } else {
        format!("{weight}")
    }
}

#[must_use]
pub fn format_set(set: &RecordedSet) -> String {
    format!("{}x{}", format_weight(set.weight), set.reps)
}

/// One row of the workout screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetRow {
    pub key: SetKey,
    pub previous: Option<String>,
    pub expected: SetPair,
    pub actual: SetPair,
    pub completed: bool,
}

/// State of a strength workout in progress.
#[derive(Debug, Clone)]
pub struct WorkoutExecution {
    workout: WorkoutDefinition,
    exercises: Vec<AssignedExercise>,
    elapsed_seconds: u64,
    paused: bool,
    previous: BTreeMap<SetKey, String>,
    expected: BTreeMap<SetKey, SetPair>,
    actual: BTreeMap<SetKey, SetPair>,
    completed: BTreeMap<SetKey, bool>,
    series_per_exercise: BTreeMap<String, u32>,
}

impl WorkoutExecution {
    /// Fresh execution with one row per assigned series.
    #[must_use]
    pub fn new(
        workout: WorkoutDefinition,
        exercises: Vec<AssignedExercise>,
        history: &PreviousSets,
    ) -> Self {
        let mut execution = Self {
            workout,
            exercises: Vec::new(),
            elapsed_seconds: 0,
            paused: false,
            previous: BTreeMap::new(),
            expected: BTreeMap::new(),
            actual: BTreeMap::new(),
            completed: BTreeMap::new(),
            series_per_exercise: BTreeMap::new(),
        };
        for exercise in &exercises {
            let series = u32::try_from(exercise.series.max(0)).unwrap_or(u32::MAX);
            execution
                .series_per_exercise
                .insert(exercise.id.clone(), series);
            let last_time = history.get(&normalize_exercise_name(&exercise.name));
            for set_index in 0..series {
                let key = SetKey::new(&exercise.name, set_index);
                execution
                    .expected
                    .insert(key.clone(), default_pair(exercise));
                if let Some(set) = last_time.and_then(|sets| sets.get(set_index as usize)) {
                    execution.previous.insert(key, format_set(set));
                }
            }
        }
        execution.exercises = exercises;
        execution
    }

    /// Rebuild an execution from a persisted snapshot.
    #[must_use]
    pub fn from_snapshot(
        workout: WorkoutDefinition,
        exercises: Vec<AssignedExercise>,
        snapshot: WorkoutSessionSnapshot,
    ) -> Self {
        let mut execution = Self::new(workout, exercises, &PreviousSets::new());
        execution.apply_snapshot(snapshot);
        execution
    }

    /// Overlay snapshot state. Series counts only apply to exercises that
    /// still exist.
    pub fn apply_snapshot(&mut self, snapshot: WorkoutSessionSnapshot) {
        self.elapsed_seconds = snapshot.elapsed_seconds;
        self.previous = snapshot.previous;
        self.expected.extend(snapshot.expected);
        self.actual = snapshot.actual;
        self.completed = snapshot.completed;
        for (exercise_id, series) in snapshot.series_per_exercise {
            if self.exercises.iter().any(|e| e.id == exercise_id) {
                self.series_per_exercise.insert(exercise_id, series);
            }
        }
    }

    #[must_use]
    pub fn to_snapshot(&self) -> WorkoutSessionSnapshot {
        WorkoutSessionSnapshot {
            workout_id: self.workout.id.clone(),
            elapsed_seconds: self.elapsed_seconds,
            previous: self.previous.clone(),
            expected: self.expected.clone(),
            actual: self.actual.clone(),
            completed: self.completed.clone(),
            series_per_exercise: self.series_per_exercise.clone(),
        }
    }

    #[must_use]
    pub fn workout(&self) -> &WorkoutDefinition {
        &self.workout
    }

    #[must_use]
    pub fn exercises(&self) -> &[AssignedExercise] {
        &self.exercises
    }

    #[must_use]
    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// One second of wall time passed. Ignored while paused.
    pub fn tick(&mut self) -> u64 {
        if !self.paused {
            self.elapsed_seconds += 1;
        }
        self.elapsed_seconds
    }

    #[must_use]
    pub fn series_count(&self, exercise: &AssignedExercise) -> u32 {
        self.series_per_exercise
            .get(&exercise.id)
            .copied()
            .unwrap_or_else(|| u32::try_from(exercise.series.max(0)).unwrap_or(u32::MAX))
    }

    fn find_exercise(&self, name_or_id: &str) -> Result<&AssignedExercise> {
        let wanted = normalize_exercise_name(name_or_id);
        self.exercises
            .iter()
            .find(|e| e.id == name_or_id || normalize_exercise_name(&e.name) == wanted)
            .ok_or_else(|| anyhow::anyhow!("Exercise '{name_or_id}' is not part of this workout"))
    }

    /// Resolve a user-facing exercise reference and set number to a key.
    pub fn key_for(&self, exercise: &str, set_index: u32) -> Result<SetKey> {
        let exercise = self.find_exercise(exercise)?;
        let count = self.series_count(exercise);
        if set_index >= count {
            bail!(
                "'{}' has {count} set(s); set {} does not exist",
                exercise.name,
                set_index + 1
            );
        }
        Ok(SetKey::new(&exercise.name, set_index))
    }

    /// Append one more set to an exercise, seeded with its assigned weight/reps.
    pub fn add_set(&mut self, exercise: &str) -> Result<SetKey> {
        let exercise = self.find_exercise(exercise)?.clone();
        let count = self.series_count(&exercise);
        let key = SetKey::new(&exercise.name, count);
        self.expected
            .entry(key.clone())
            .or_insert_with(|| default_pair(&exercise));
        self.series_per_exercise
            .insert(exercise.id.clone(), count + 1);
        Ok(key)
    }

    pub fn record_actual(&mut self, key: &SetKey, weight: &str, reps: &str) -> Result<()> {
        self.ensure_key(key)?;
        self.actual.insert(key.clone(), SetPair::new(weight, reps));
        Ok(())
    }

    /// Flip the completed flag of a set and return the new value.
    pub fn toggle_completed(&mut self, key: &SetKey) -> Result<bool> {
        self.ensure_key(key)?;
        let done = self.completed.entry(key.clone()).or_insert(false);
        *done = !*done;
        Ok(*done)
    }

    fn ensure_key(&self, key: &SetKey) -> Result<()> {
        let known = self
            .exercises
            .iter()
            .any(|e| e.name == key.exercise && key.set_index < self.series_count(e));
        if !known {
            bail!(
                "No set {} for exercise '{}'",
                key.set_index + 1,
                key.exercise
            );
        }
        Ok(())
    }

    /// Rows for one exercise in set order.
    #[must_use]
    pub fn rows(&self, exercise: &AssignedExercise) -> Vec<SetRow> {
        (0..self.series_count(exercise))
            .map(|set_index| {
                let key = SetKey::new(&exercise.name, set_index);
                SetRow {
                    previous: self.previous.get(&key).cloned(),
                    expected: self
                        .expected
                        .get(&key)
                        .cloned()
                        .unwrap_or_else(|| default_pair(exercise)),
                    actual: self.actual.get(&key).cloned().unwrap_or_default(),
                    completed: self.completed.get(&key).copied().unwrap_or(false),
                    key,
                }
            })
            .collect()
    }

    /// Build the summary from the entered values. Sets whose weight or reps
    /// do not parse, or whose reps are zero, are left out; so are exercises
    /// with no usable set.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn summarize(&self, summary_id: &str, date: &str) -> WorkoutSummary {
        let exercises = self
            .exercises
            .iter()
            .filter_map(|exercise| {
                let sets: Vec<RecordedSet> = (0..self.series_count(exercise))
                    .filter_map(|i| {
                        self.actual
                            .get(&SetKey::new(&exercise.name, i))
                            .and_then(SetPair::parse)
                    })
                    .collect();
                (!sets.is_empty()).then(|| ExerciseSets {
                    name: exercise.name.clone(),
                    sets,
                })
            })
            .collect();
        WorkoutSummary::from_sets(
            summary_id,
            &self.workout.id,
            date,
            self.elapsed_seconds as i64,
            exercises,
        )
    }
}

fn default_pair(exercise: &AssignedExercise) -> SetPair {
    SetPair {
        weight: format_weight(exercise.weight),
        reps: exercise.repetitions.to_string(),
    }
}
