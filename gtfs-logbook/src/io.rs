//! Logbook serialisation
//!
//! The CSV schema is stable and bit-exact:
//!
//! ```text
//! trip_id,route_id,action,minimum_time,maximum_time,stop_id,latest_information_time,unique_trip_id
//! ```
//!
//! Null times serialise as empty fields; times are integer seconds since the
//! epoch (a trailing `.0` is tolerated on read). Rows are grouped by unique
//! trip id and, within a group, follow stop order.
//!
//! The GTFS `stop_times.txt` export keeps only rows with both bounds known
//! and omits `EN_ROUTE_TO` rows entirely.

use crate::types::{
    Action, ActionKind, Log, Logbook, LogbookError, LogbookTimestamps, Result, Timestamp,
    UniqueTripId,
};
use std::io::{Read, Write};

const CSV_HEADER: [&str; 8] = [
    "trip_id",
    "route_id",
    "action",
    "minimum_time",
    "maximum_time",
    "stop_id",
    "latest_information_time",
    "unique_trip_id",
];

/// Write a logbook in the stable CSV schema.
pub fn to_csv<W: Write>(logbook: &Logbook, writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(CSV_HEADER)?;
    for (uid, log) in logbook {
        for action in log {
            csv_writer.write_record([
                action.trip_id.as_str(),
                action.route_id.as_str(),
                action.kind.as_str(),
                &render_time(action.minimum_time),
                &render_time(action.maximum_time),
                action.stop_id.as_str(),
                &action.latest_information_time.to_string(),
                uid.as_str(),
            ])?;
        }
    }
    csv_writer.flush()?;
    Ok(())
}

/// Read a logbook back from the stable CSV schema.
pub fn from_csv<R: Read>(reader: R) -> Result<Logbook> {
    let mut csv_reader = csv::ReaderBuilder::new().from_reader(reader);
    let mut logbook = Logbook::new();

    for record in csv_reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let field = |index: usize| record.get(index).unwrap_or("").to_string();

        let kind = ActionKind::parse(&field(2)).ok_or_else(|| LogbookError::MalformedField {
            line,
            field: "action",
            value: field(2),
        })?;
        let action = Action {
            trip_id: field(0),
            route_id: field(1),
            kind,
            minimum_time: parse_time(&field(3), line, "minimum_time")?,
            maximum_time: parse_time(&field(4), line, "maximum_time")?,
            stop_id: field(5),
            latest_information_time: parse_time(&field(6), line, "latest_information_time")?
                .ok_or_else(|| LogbookError::MalformedField {
                    line,
                    field: "latest_information_time",
                    value: field(6),
                })?,
        };

        let uid = UniqueTripId::from(field(7));
        logbook.entry(uid).or_insert_with(Log::new).push(action);
    }

    Ok(logbook)
}

/// Export a logbook as GTFS `stop_times.txt`.
///
/// Rows with a null arrival or departure bound, and `EN_ROUTE_TO` rows, are
/// omitted. The unique trip id is written into the `trip_id` column, since
/// feed trip ids recycle within a day and would collide. Times are rendered
/// as `HH:MM:SS` wall-clock UTC.
pub fn to_gtfs_stop_times<W: Write>(logbook: &Logbook, writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record([
        "trip_id",
        "arrival_time",
        "departure_time",
        "stop_id",
        "stop_sequence",
    ])?;
    for (uid, log) in logbook {
        let mut sequence = 0u32;
        for action in log {
            let (Some(arrival), Some(departure)) = (action.minimum_time, action.maximum_time)
            else {
                continue;
            };
            if action.kind == ActionKind::EnRouteTo {
                continue;
            }
            sequence += 1;
            csv_writer.write_record([
                uid.as_str(),
                &render_clock_time(arrival),
                &render_clock_time(departure),
                action.stop_id.as_str(),
                &sequence.to_string(),
            ])?;
        }
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write a timestamps map as CSV, one row per observation.
pub fn write_timestamps_csv<W: Write>(
    timestamps: &LogbookTimestamps,
    writer: W,
) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(["unique_trip_id", "timestamp"])?;
    for (uid, times) in timestamps {
        for time in times {
            csv_writer.write_record([uid.as_str(), &time.to_string()])?;
        }
    }
    csv_writer.flush()?;
    Ok(())
}

/// Read a timestamps map written by [`write_timestamps_csv`].
pub fn read_timestamps_csv<R: Read>(reader: R) -> Result<LogbookTimestamps> {
    let mut csv_reader = csv::ReaderBuilder::new().from_reader(reader);
    let mut timestamps = LogbookTimestamps::new();
    for record in csv_reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let uid = UniqueTripId::from(record.get(0).unwrap_or("").to_string());
        let time = parse_time(record.get(1).unwrap_or(""), line, "timestamp")?.ok_or_else(
            || LogbookError::MalformedField {
                line,
                field: "timestamp",
                value: record.get(1).unwrap_or("").to_string(),
            },
        )?;
        timestamps.entry(uid).or_insert_with(Vec::new).push(time);
    }
    for times in timestamps.values_mut() {
        times.sort_unstable();
    }
    Ok(timestamps)
}

/// Approximate a timestamps map from a logbook alone: each log's distinct
/// information times, ascending. Exact whenever every update that mentioned
/// a trip also revised at least one of its rows, which holds for logbooks
/// this library built itself.
pub fn derive_timestamps(logbook: &Logbook) -> LogbookTimestamps {
    let mut timestamps = LogbookTimestamps::new();
    for (uid, log) in logbook {
        let mut lits: Vec<Timestamp> = log.iter().map(|a| a.latest_information_time).collect();
        lits.sort_unstable();
        lits.dedup();
        timestamps.insert(uid.clone(), lits);
    }
    timestamps
}

fn render_time(time: Option<Timestamp>) -> String {
    time.map(|t| t.to_string()).unwrap_or_default()
}

/// Parse an epoch-seconds field. Empty means null; a fractional rendering
/// with a zero fraction (`1234.0`) is accepted for compatibility with
/// float-typed producers.
fn parse_time(raw: &str, line: u64, field: &'static str) -> Result<Option<Timestamp>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if let Ok(value) = trimmed.parse::<u64>() {
        return Ok(Some(value));
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value >= 0.0 && value.fract() == 0.0 => Ok(Some(value as u64)),
        _ => Err(LogbookError::MalformedField {
            line,
            field,
            value: trimmed.to_string(),
        }),
    }
}

fn render_clock_time(time: Timestamp) -> String {
    match chrono::DateTime::from_timestamp(time as i64, 0) {
        Some(datetime) => datetime.format("%H:%M:%S").to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_logbook() -> Logbook {
        let mut logbook = Logbook::new();
        logbook.insert(
            UniqueTripId::from("uid-1"),
            vec![
                Action {
                    trip_id: "x".to_string(),
                    route_id: "1".to_string(),
                    kind: ActionKind::StoppedAt,
                    minimum_time: Some(100),
                    maximum_time: Some(200),
                    stop_id: "A".to_string(),
                    latest_information_time: 200,
                },
                Action {
                    trip_id: "x".to_string(),
                    route_id: "1".to_string(),
                    kind: ActionKind::EnRouteTo,
                    minimum_time: Some(200),
                    maximum_time: None,
                    stop_id: "B".to_string(),
                    latest_information_time: 200,
                },
            ],
        );
        logbook
    }

    #[test]
    fn test_csv_round_trip() {
        let logbook = sample_logbook();
        let mut buffer = Vec::new();
        to_csv(&logbook, &mut buffer).unwrap();
        let recovered = from_csv(buffer.as_slice()).unwrap();
        assert_eq!(recovered, logbook);
    }

    #[test]
    fn test_csv_null_times_are_empty_fields() {
        let mut buffer = Vec::new();
        to_csv(&sample_logbook(), &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "trip_id,route_id,action,minimum_time,maximum_time,stop_id,latest_information_time,unique_trip_id"
        );
        assert_eq!(lines[2], "x,1,EN_ROUTE_TO,200,,B,200,uid-1");
    }

    #[test]
    fn test_csv_accepts_float_rendered_times() {
        let text = "trip_id,route_id,action,minimum_time,maximum_time,stop_id,latest_information_time,unique_trip_id\n\
                    x,1,STOPPED_AT,100.0,200.0,A,200,uid-1\n";
        let logbook = from_csv(text.as_bytes()).unwrap();
        let log = &logbook[&UniqueTripId::from("uid-1")];
        assert_eq!(log[0].minimum_time, Some(100));
        assert_eq!(log[0].maximum_time, Some(200));
    }

    #[test]
    fn test_csv_rejects_bad_action() {
        let text = "trip_id,route_id,action,minimum_time,maximum_time,stop_id,latest_information_time,unique_trip_id\n\
                    x,1,TELEPORTED,100,200,A,200,uid-1\n";
        let err = from_csv(text.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            LogbookError::MalformedField {
                field: "action",
                ..
            }
        ));
    }

    #[test]
    fn test_gtfs_export_omits_unbounded_rows() {
        let mut buffer = Vec::new();
        to_gtfs_stop_times(&sample_logbook(), &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // Header plus the single fully-bounded STOPPED_AT row.
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "uid-1,00:01:40,00:03:20,A,1");
    }

    #[test]
    fn test_timestamps_round_trip() {
        let mut timestamps = LogbookTimestamps::new();
        timestamps.insert(UniqueTripId::from("uid-1"), vec![100, 200, 300]);
        timestamps.insert(UniqueTripId::from("uid-2"), vec![200]);

        let mut buffer = Vec::new();
        write_timestamps_csv(&timestamps, &mut buffer).unwrap();
        let recovered = read_timestamps_csv(buffer.as_slice()).unwrap();
        assert_eq!(recovered, timestamps);
    }

    #[test]
    fn test_derive_timestamps_from_logbook() {
        let derived = derive_timestamps(&sample_logbook());
        assert_eq!(derived[&UniqueTripId::from("uid-1")], vec![200]);
    }
}
