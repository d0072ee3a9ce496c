use std::time::Duration;

use anyhow::{Result, bail};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use pacer_core::models::WorkoutSummary;
use pacer_core::service::Tracker;
use pacer_core::snapshot::Recovery;
use pacer_core::workout::{SetRow, WorkoutExecution, format_weight};

use super::helpers::{format_duration, print_json, resolve_workout, sync_note, truncate};

/// Seconds between automatic snapshots while the screen is open.
const CHECKPOINT_EVERY: u64 = 10;

const HELP: &str = "\
Commands:
  show                                  print the sets
  set <exercise> <set> <weight> <reps>  record what you lifted
  done <exercise> <set>                 mark a set done (again to undo)
  add <exercise>                        add one more set
  pause                                 pause or resume the timer
  minimize                              save and leave; resume later
  finish                                record the workout
  cancel                                discard the workout";

#[derive(Debug, Clone, PartialEq, Eq)]
enum LiftCommand {
    Show,
    Set {
        exercise: String,
        set: u32,
        weight: String,
        reps: String,
    },
    Done {
        exercise: String,
        set: u32,
    },
    Add {
        exercise: String,
    },
    Pause,
    Minimize,
    Finish,
    Cancel,
    Help,
}

/// Set numbers are 1-based on screen.
fn parse_set_number(s: &str) -> Result<u32> {
    match s.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => bail!("Set number must be 1 or more, got '{s}'"),
    }
}

/// Exercise names may contain spaces, so trailing arguments are taken first.
fn parse_lift_command(line: &str) -> Result<LiftCommand> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(LiftCommand::Show);
    };
    let command = match (verb.to_lowercase().as_str(), args) {
        ("show" | "ls", []) => LiftCommand::Show,
        ("set", [name @ .., set, weight, reps]) if !name.is_empty() => LiftCommand::Set {
            exercise: name.join(" "),
            set: parse_set_number(set)?,
            weight: (*weight).to_string(),
            reps: (*reps).to_string(),
        },
        ("done", [name @ .., set]) if !name.is_empty() => LiftCommand::Done {
            exercise: name.join(" "),
            set: parse_set_number(set)?,
        },
        ("add", name) if !name.is_empty() => LiftCommand::Add {
            exercise: name.join(" "),
        },
        ("pause" | "resume", []) => LiftCommand::Pause,
        ("minimize" | "min", []) => LiftCommand::Minimize,
        ("finish", []) => LiftCommand::Finish,
        ("cancel", []) => LiftCommand::Cancel,
        ("help" | "?", _) => LiftCommand::Help,
        _ => bail!("Unrecognised command '{}'. Type 'help'", line.trim()),
    };
    Ok(command)
}

fn print_rows(execution: &WorkoutExecution) {
    #[derive(Tabled)]
    struct SetTableRow {
        #[tabled(rename = "Exercise")]
        exercise: String,
        #[tabled(rename = "Set")]
        set: u32,
        #[tabled(rename = "Previous")]
        previous: String,
        #[tabled(rename = "Target")]
        target: String,
        #[tabled(rename = "Lifted")]
        lifted: String,
        #[tabled(rename = "Done")]
        done: &'static str,
    }

    let pair = |row: &SetRow| {
        if row.actual.weight.is_empty() && row.actual.reps.is_empty() {
            "-".to_string()
        } else {
            format!("{}x{}", row.actual.weight, row.actual.reps)
        }
    };

    let rows: Vec<SetTableRow> = execution
        .exercises()
        .iter()
        .flat_map(|exercise| execution.rows(exercise))
        .map(|row| SetTableRow {
            exercise: truncate(&row.key.exercise, 24),
            set: row.key.set_index + 1,
            previous: row.previous.clone().unwrap_or_else(|| "-".to_string()),
            target: format!("{}x{}", row.expected.weight, row.expected.reps),
            lifted: pair(&row),
            done: if row.completed { "yes" } else { "" },
        })
        .collect();

    let paused = if execution.is_paused() { " (paused)" } else { "" };
    println!(
        "{}  {}{paused}",
        execution.workout().name,
        format_duration(execution.elapsed_seconds())
    );
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

fn print_summary(summary: &WorkoutSummary, synced: bool, json: bool) -> Result<()> {
    if json {
        return print_json(&serde_json::json!({ "summary": summary, "synced": synced }));
    }
    println!(
        "Workout complete: {} exercise(s) in {}, {} kg lifted, ~{} kcal",
        summary.exercises.len(),
        format_duration(summary.duration_seconds.max(0).unsigned_abs()),
        format_weight(summary.total_weight_lifted),
        summary.calories
    );
    for exercise in &summary.exercises {
        let sets: Vec<String> = exercise
            .sets
            .iter()
            .map(|s| format!("{}x{}", format_weight(s.weight), s.reps))
            .collect();
        println!("  {}: {}", exercise.name, sets.join(", "));
    }
    sync_note(synced);
    Ok(())
}

enum Flow {
    Continue,
    Leave,
}

/// Apply one screen command. Any state change is checkpointed right away.
async fn apply(
    tracker: &Tracker,
    execution: &mut WorkoutExecution,
    command: LiftCommand,
    json: bool,
) -> Result<Flow> {
    match command {
        LiftCommand::Show => print_rows(execution),
        LiftCommand::Help => println!("{HELP}"),
        LiftCommand::Set {
            exercise,
            set,
            weight,
            reps,
        } => {
            let key = execution.key_for(&exercise, set)?;
            execution.record_actual(&key, &weight, &reps)?;
            tracker.checkpoint(execution)?;
        }
        LiftCommand::Done { exercise, set } => {
            let key = execution.key_for(&exercise, set)?;
            let done = execution.toggle_completed(&key)?;
            tracker.checkpoint(execution)?;
            println!(
                "{} set {} {}",
                key.exercise,
                set + 1,
                if done { "done" } else { "not done" }
            );
        }
        LiftCommand::Add { exercise } => {
            let key = execution.add_set(&exercise)?;
            tracker.checkpoint(execution)?;
            println!("Added set {} to {}", key.set_index + 1, key.exercise);
        }
        LiftCommand::Pause => {
            execution.set_paused(!execution.is_paused());
            tracker.checkpoint(execution)?;
            println!("{}", if execution.is_paused() { "Paused" } else { "Resumed" });
        }
        LiftCommand::Minimize => {
            tracker.checkpoint(execution)?;
            println!("Workout saved. Continue with `pacer lift resume`.");
            return Ok(Flow::Leave);
        }
        LiftCommand::Finish => {
            let (summary, synced) = tracker.finish_workout(execution).await?;
            print_summary(&summary, synced, json)?;
            return Ok(Flow::Leave);
        }
        LiftCommand::Cancel => {
            tracker.cancel_workout()?;
            println!("Workout discarded.");
            return Ok(Flow::Leave);
        }
    }
    Ok(Flow::Continue)
}

/// The live workout screen: a one-second timer plus commands from stdin.
/// Leaving by Ctrl-C or end of input keeps the snapshot.
async fn run_screen(tracker: &Tracker, mut execution: WorkoutExecution, json: bool) -> Result<()> {
    print_rows(&execution);
    eprintln!("Type 'help' for commands.");

    let mut timer = tokio::time::interval(Duration::from_secs(1));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer.tick().await;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let elapsed = execution.tick();
                if !execution.is_paused() && elapsed % CHECKPOINT_EVERY == 0 {
                    if let Err(e) = tracker.checkpoint(&execution) {
                        warn!("Periodic checkpoint failed: {e:#}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracker.checkpoint(&execution)?;
                eprintln!("\nWorkout saved. Continue with `pacer lift resume`.");
                return Ok(());
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("Input closed, minimizing workout");
                    tracker.checkpoint(&execution)?;
                    return Ok(());
                };
                let command = match parse_lift_command(&line) {
                    Ok(command) => command,
                    Err(e) => {
                        eprintln!("{e}");
                        continue;
                    }
                };
                match apply(tracker, &mut execution, command, json).await {
                    Ok(Flow::Leave) => return Ok(()),
                    Ok(Flow::Continue) => {}
                    Err(e) => eprintln!("{e:#}"),
                }
            }
        }
    }
}

pub(crate) async fn cmd_lift_start(tracker: &Tracker, query: &str, json: bool) -> Result<()> {
    if tracker.snapshots().exists() {
        bail!(
            "A workout is already in progress. Continue it with `pacer lift resume` or discard it with `pacer lift cancel`"
        );
    }
    let workout = resolve_workout(tracker, query).await?;
    let execution = tracker.start_workout(&workout.id).await?;
    run_screen(tracker, execution, json).await
}

pub(crate) async fn cmd_lift_resume(tracker: &Tracker, json: bool) -> Result<()> {
    match tracker.recover().await? {
        Recovery::Resumed(execution) => {
            eprintln!(
                "Resuming '{}' at {}",
                execution.workout().name,
                format_duration(execution.elapsed_seconds())
            );
            run_screen(tracker, *execution, json).await
        }
        Recovery::Stale { workout_id } => {
            bail!("The interrupted workout ({workout_id}) no longer exists; its progress was discarded")
        }
        Recovery::Nothing => bail!("No workout in progress. Start one with `pacer lift start`"),
    }
}

pub(crate) async fn cmd_lift_status(tracker: &Tracker, json: bool) -> Result<()> {
    match tracker.recover().await? {
        Recovery::Resumed(execution) => {
            if json {
                let rows: Vec<SetRow> = execution
                    .exercises()
                    .iter()
                    .flat_map(|e| execution.rows(e))
                    .collect();
                print_json(&serde_json::json!({
                    "workout": execution.workout(),
                    "elapsed_seconds": execution.elapsed_seconds(),
                    "paused": execution.is_paused(),
                    "sets": rows,
                }))?;
            } else {
                print_rows(&execution);
            }
        }
        Recovery::Stale { workout_id } => {
            eprintln!("Discarded progress of workout {workout_id}, which no longer exists.");
        }
        Recovery::Nothing => {
            if json {
                print_json(&serde_json::Value::Null)?;
            } else {
                eprintln!("No workout in progress.");
            }
        }
    }
    Ok(())
}

pub(crate) fn cmd_lift_cancel(tracker: &Tracker, json: bool) -> Result<()> {
    let existed = tracker.snapshots().exists();
    tracker.cancel_workout()?;
    if json {
        print_json(&serde_json::json!({ "discarded": existed }))?;
    } else if existed {
        println!("Workout discarded.");
    } else {
        eprintln!("No workout in progress.");
    }
    Ok(())
}
