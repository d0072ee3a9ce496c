use anyhow::Result;
use chrono::{DateTime, Local, TimeZone};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use pacer_core::service::Tracker;
use pacer_core::workout::format_weight;

use super::helpers::{format_duration, format_km, offline_note, print_json};

fn format_millis(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string())
}

fn format_rfc3339(date: &str) -> String {
    DateTime::parse_from_rfc3339(date).map_or_else(
        |_| date.to_string(),
        |t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
    )
}

pub(crate) async fn cmd_history_routes(
    tracker: &Tracker,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let loaded = tracker.sync().load_route_summaries().await?;
    let summaries: Vec<_> = loaded
        .value
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    if json {
        return print_json(&summaries);
    }
    offline_note(loaded.degraded);
    if summaries.is_empty() {
        eprintln!("No routes recorded yet. Use `pacer track` to record one.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct RouteRow {
        #[tabled(rename = "Finished")]
        finished: String,
        #[tabled(rename = "Duration")]
        duration: String,
        #[tabled(rename = "Distance")]
        distance: String,
        #[tabled(rename = "kcal")]
        calories: i64,
    }

    let rows: Vec<RouteRow> = summaries
        .iter()
        .map(|s| RouteRow {
            finished: format_millis(s.completed_at_millis),
            duration: format_duration(s.duration_seconds.max(0).unsigned_abs()),
            distance: format_km(s.distance_meters),
            calories: s.calories_estimated,
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) async fn cmd_history_workouts(
    tracker: &Tracker,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let sync = tracker.sync();
    let loaded = sync.load_workout_summaries().await?;
    let summaries: Vec<_> = loaded
        .value
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    if json {
        return print_json(&summaries);
    }
    offline_note(loaded.degraded);
    if summaries.is_empty() {
        eprintln!("No workouts finished yet. Use `pacer lift start` to begin one.");
        return Ok(());
    }

    let names: std::collections::HashMap<String, String> = sync
        .local()
        .lock()
        .list_workouts()?
        .into_iter()
        .map(|w| (w.id, w.name))
        .collect();

    #[derive(Tabled)]
    struct SummaryRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Workout")]
        workout: String,
        #[tabled(rename = "Duration")]
        duration: String,
        #[tabled(rename = "Lifted (kg)")]
        lifted: String,
        #[tabled(rename = "kcal")]
        calories: i64,
    }

    let rows: Vec<SummaryRow> = summaries
        .iter()
        .map(|s| SummaryRow {
            date: format_rfc3339(&s.date),
            workout: names
                .get(&s.workout_id)
                .cloned()
                .unwrap_or_else(|| "(deleted)".to_string()),
            duration: format_duration(s.duration_seconds.max(0).unsigned_abs()),
            lifted: format_weight(s.total_weight_lifted),
            calories: s.calories,
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..5)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rfc3339_falls_back_to_input() {
        assert_eq!(format_rfc3339("yesterday"), "yesterday");
        let formatted = format_rfc3339("2024-05-01T10:00:00+00:00");
        assert!(formatted.starts_with("2024-05-01") || formatted.starts_with("2024-04-30"));
    }

    #[test]
    fn test_format_millis_out_of_range() {
        assert_eq!(format_millis(i64::MAX), "-");
    }
}
