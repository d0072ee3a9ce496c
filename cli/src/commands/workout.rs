use anyhow::{Context, Result};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use pacer_core::models::{AssignedExercise, WorkoutDefinition};
use pacer_core::service::Tracker;
use pacer_core::workout::format_weight;

use super::helpers::{
    offline_note, parse_exercise_spec, print_json, resolve_workout, sync_note, truncate,
};

#[derive(Serialize)]
struct WorkoutDetail<'a> {
    workout: &'a WorkoutDefinition,
    exercises: &'a [AssignedExercise],
    synced: bool,
}

fn print_exercise_table(exercises: &[AssignedExercise]) {
    #[derive(Tabled)]
    struct ExerciseRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "Exercise")]
        name: String,
        #[tabled(rename = "Sets")]
        series: i64,
        #[tabled(rename = "Reps")]
        reps: i64,
        #[tabled(rename = "Weight")]
        weight: String,
    }

    let rows: Vec<ExerciseRow> = exercises
        .iter()
        .enumerate()
        .map(|(i, e)| ExerciseRow {
            idx: i + 1,
            name: truncate(&e.name, 30),
            series: e.series,
            reps: e.repetitions,
            weight: format_weight(e.weight),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..5)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) async fn cmd_workout_add(
    tracker: &Tracker,
    name: &str,
    description: Option<String>,
    level: Option<String>,
    minutes: i64,
    exercises: &[String],
    json: bool,
) -> Result<()> {
    let workout = WorkoutDefinition::new(
        name,
        description.as_deref().unwrap_or_default(),
        level.as_deref().unwrap_or_default(),
        minutes,
    );
    let additions = exercises
        .iter()
        .map(|s| parse_exercise_spec(s))
        .collect::<Result<Vec<_>>>()?;
    let (exercises, synced) = tracker.create_workout(&workout, additions).await?;

    if json {
        print_json(&WorkoutDetail {
            workout: &workout,
            exercises: &exercises,
            synced,
        })?;
    } else {
        println!(
            "Created workout '{}' with {} exercise(s) (id {})",
            workout.name,
            exercises.len(),
            workout.id
        );
        sync_note(synced);
    }
    Ok(())
}

pub(crate) async fn cmd_workout_list(tracker: &Tracker, json: bool) -> Result<()> {
    let loaded = tracker.workouts().await?;

    if json {
        return print_json(&loaded.value);
    }
    offline_note(loaded.degraded);
    if loaded.value.is_empty() {
        eprintln!("No workouts yet. Use `pacer workout add` to create one.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct WorkoutRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Level")]
        level: String,
        #[tabled(rename = "Minutes")]
        minutes: i64,
        #[tabled(rename = "ID")]
        id: String,
    }

    let rows: Vec<WorkoutRow> = loaded
        .value
        .iter()
        .map(|w| WorkoutRow {
            name: truncate(&w.name, 30),
            level: w.level.clone(),
            minutes: w.duration_minutes,
            id: w.id.clone(),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) async fn cmd_workout_show(tracker: &Tracker, query: &str, json: bool) -> Result<()> {
    let workout = resolve_workout(tracker, query).await?;
    let loaded = tracker.sync().load_workout_bundle(&workout.id).await?;
    let (workout, exercises) = loaded
        .value
        .with_context(|| format!("Workout '{query}' no longer exists"))?;

    if json {
        return print_json(&WorkoutDetail {
            workout: &workout,
            exercises: &exercises,
            synced: !loaded.degraded,
        });
    }
    offline_note(loaded.degraded);
    println!("{} ({} min)", workout.name, workout.duration_minutes);
    if !workout.level.is_empty() {
        println!("Level: {}", workout.level);
    }
    if !workout.description.is_empty() {
        println!("{}", workout.description);
    }
    if exercises.is_empty() {
        eprintln!("No exercises assigned. Use `pacer workout assign`.");
    } else {
        print_exercise_table(&exercises);
    }
    Ok(())
}

pub(crate) async fn cmd_workout_assign(
    tracker: &Tracker,
    query: &str,
    exercises: &[String],
    json: bool,
) -> Result<()> {
    let workout = resolve_workout(tracker, query).await?;
    let additions = exercises
        .iter()
        .map(|s| parse_exercise_spec(s))
        .collect::<Result<Vec<_>>>()?;
    let (exercises, synced) = tracker.assign_exercises(&workout.id, additions).await?;

    if json {
        print_json(&WorkoutDetail {
            workout: &workout,
            exercises: &exercises,
            synced,
        })?;
    } else {
        print_exercise_table(&exercises);
        sync_note(synced);
    }
    Ok(())
}

pub(crate) async fn cmd_workout_unassign(
    tracker: &Tracker,
    query: &str,
    exercise: &str,
    json: bool,
) -> Result<()> {
    let workout = resolve_workout(tracker, query).await?;
    let sync = tracker.sync();
    let exercises = sync.load_assigned_exercises(&workout.id).await?.value;
    let wanted = exercise.trim().to_lowercase();
    let target = exercises
        .iter()
        .find(|e| e.id == exercise || e.name.to_lowercase() == wanted)
        .with_context(|| format!("'{}' has no exercise '{exercise}'", workout.name))?;
    let synced = sync.delete_assigned_exercise(&workout.id, &target.id).await?;

    if json {
        print_json(&serde_json::json!({ "removed": target.id, "synced": synced }))?;
    } else {
        println!("Removed '{}' from '{}'", target.name, workout.name);
        sync_note(synced);
    }
    Ok(())
}

pub(crate) async fn cmd_workout_delete(tracker: &Tracker, query: &str, json: bool) -> Result<()> {
    let workout = resolve_workout(tracker, query).await?;
    let synced = tracker.sync().delete_workout(&workout.id).await?;

    if json {
        print_json(&serde_json::json!({ "deleted": workout.id, "synced": synced }))?;
    } else {
        println!("Deleted workout '{}'", workout.name);
        if !synced {
            eprintln!("The remote copy could not be removed; it may reappear after a sync.");
        }
    }
    Ok(())
}
