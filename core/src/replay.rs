use std::io::Read;

use anyhow::{Context, Result, bail};

use crate::models::LocationFix;

/// One recorded row of a location trace.
///
/// Rows with a blank or unparsable position stand for the platform delivering
/// an empty fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceRow {
    pub position: Option<(f64, f64)>,
    pub altitude: Option<f64>,
    pub timestamp_millis: Option<i64>,
}

impl TraceRow {
    /// Turn into a fix, stamping it with `now` when the trace has no time.
    #[must_use]
    pub fn to_fix(&self, now_millis: i64) -> Option<LocationFix> {
        let (latitude, longitude) = self.position?;
        Some(LocationFix {
            latitude,
            longitude,
            altitude: self.altitude,
            timestamp_millis: self.timestamp_millis.unwrap_or(now_millis),
        })
    }
}

/// Parse a location trace from CSV.
///
/// Expected header: `latitude,longitude,altitude,timestamp`. Only the first two
/// columns are required; `timestamp` is epoch milliseconds.
pub fn parse_trace_csv<R: Read>(reader: R) -> Result<Vec<TraceRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();

    let col = |names: &[&str]| -> Option<usize> {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };

    let Some(idx_lat) = col(&["latitude", "lat"]) else {
        bail!("Missing required column: latitude");
    };
    let Some(idx_lon) = col(&["longitude", "lon", "lng"]) else {
        bail!("Missing required column: longitude");
    };
    let idx_alt = col(&["altitude", "alt", "ele"]);
    let idx_ts = col(&["timestamp", "timestamp_millis", "time"]);

    let mut rows = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to parse CSV row {}", line_num + 2))?;
        if record.iter().all(str::is_empty) {
            continue;
        }

        let parse_f64 = |idx: Option<usize>| -> Option<f64> {
            idx.and_then(|i| record.get(i))
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite())
        };

        let position = match (parse_f64(Some(idx_lat)), parse_f64(Some(idx_lon))) {
            (Some(lat), Some(lon))
                if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) =>
            {
                Some((lat, lon))
            }
            _ => None,
        };
        let timestamp_millis = idx_ts
            .and_then(|i| record.get(i))
            .and_then(|v| v.parse::<i64>().ok());

        rows.push(TraceRow {
            position,
            altitude: parse_f64(idx_alt),
            timestamp_millis,
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trace() {
        let csv = "latitude,longitude,altitude,timestamp\n\
                   40.4168,-3.7038,650,1700000000000\n\
                   ,,,1700000005000\n\
                   40.4170,-3.7040,,1700000010000\n";
        let rows = parse_trace_csv(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].position, Some((40.4168, -3.7038)));
        assert_eq!(rows[0].altitude, Some(650.0));
        assert_eq!(rows[1].position, None);
        assert_eq!(rows[1].to_fix(0), None);
        assert_eq!(rows[2].altitude, None);
        assert_eq!(rows[2].to_fix(0).unwrap().timestamp_millis, 1_700_000_010_000);
    }

    #[test]
    fn test_missing_timestamp_uses_now() {
        let rows = parse_trace_csv("Lat,Lon\n1.5,2.5\n".as_bytes()).unwrap();
        let fix = rows[0].to_fix(42).unwrap();
        assert_eq!(fix.timestamp_millis, 42);
        assert!((fix.longitude - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_out_of_range_position_is_empty() {
        let rows = parse_trace_csv("latitude,longitude\n91,0\n0,181\n".as_bytes()).unwrap();
        assert!(rows.iter().all(|r| r.position.is_none()));
    }

    #[test]
    fn test_missing_required_column() {
        let err = parse_trace_csv("latitude,altitude\n1,2\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("longitude"));
    }
}
