use anyhow::{Context, Result, bail};
use serde::Serialize;

use pacer_core::models::{NewAssignedExercise, WorkoutDefinition};
use pacer_core::service::Tracker;

/// Parse `NAME:SERIESxREPS[@WEIGHT]`, e.g. `Bench Press:3x8@60`.
pub(crate) fn parse_exercise_spec(s: &str) -> Result<NewAssignedExercise> {
    let Some((name, plan)) = s.rsplit_once(':') else {
        bail!("Invalid exercise '{s}'. Use NAME:SERIESxREPS[@WEIGHT], e.g. 'Squat:5x5@100'");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Exercise name cannot be empty in '{s}'");
    }
    let (volume, weight) = match plan.split_once('@') {
        Some((volume, weight)) => {
            let weight: f64 = weight
                .trim()
                .replace(',', ".")
                .parse()
                .with_context(|| format!("Invalid weight in '{s}'"))?;
            (volume, weight)
        }
        None => (plan, 0.0),
    };
    let Some((series, reps)) = volume.trim().split_once(['x', 'X']) else {
        bail!("Invalid sets in '{s}'. Use SERIESxREPS, e.g. '3x8'");
    };
    let series: i64 = series
        .trim()
        .parse()
        .with_context(|| format!("Invalid series count in '{s}'"))?;
    let repetitions: i64 = reps
        .trim()
        .parse()
        .with_context(|| format!("Invalid repetitions in '{s}'"))?;

    Ok(NewAssignedExercise {
        name: name.to_string(),
        series,
        repetitions,
        weight,
        photo: String::new(),
        video: String::new(),
        catalog_ref: String::new(),
    })
}

/// Find a workout by id, or by name ignoring case.
pub(crate) async fn resolve_workout(tracker: &Tracker, query: &str) -> Result<WorkoutDefinition> {
    let workouts = tracker.workouts().await?.value;
    let wanted = query.trim().to_lowercase();
    workouts
        .into_iter()
        .find(|w| w.id == query || w.name.to_lowercase() == wanted)
        .with_context(|| format!("No workout named '{query}'. See `pacer workout list`"))
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn offline_note(degraded: bool) {
    if degraded {
        eprintln!("(remote unavailable, showing local data)");
    }
}

pub(crate) fn sync_note(synced: bool) {
    if !synced {
        eprintln!("Saved locally; will reach the remote store on a later sync.");
    }
}

/// `h:mm:ss` above an hour, `mm:ss` below.
pub(crate) fn format_duration(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

pub(crate) fn format_km(meters: f64) -> String {
    format!("{:.2} km", meters / 1000.0)
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exercise_spec() {
        let e = parse_exercise_spec("Bench Press:3x8@62,5").unwrap();
        assert_eq!(e.name, "Bench Press");
        assert_eq!(e.series, 3);
        assert_eq!(e.repetitions, 8);
        assert!((e.weight - 62.5).abs() < f64::EPSILON);

        let e = parse_exercise_spec("Pull-up: 4X10").unwrap();
        assert_eq!(e.name, "Pull-up");
        assert_eq!(e.series, 4);
        assert!(e.weight.abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_exercise_spec_invalid() {
        assert!(parse_exercise_spec("Squat").is_err());
        assert!(parse_exercise_spec(":3x5").is_err());
        assert!(parse_exercise_spec("Squat:three").is_err());
        assert!(parse_exercise_spec("Squat:3x5@heavy").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00");
        assert_eq!(format_duration(754), "12:34");
        assert_eq!(format_duration(3_725), "1:02:05");
    }

    #[test]
    fn test_format_km() {
        assert_eq!(format_km(222.39), "0.22 km");
        assert_eq!(format_km(10_000.0), "10.00 km");
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
    }
}
