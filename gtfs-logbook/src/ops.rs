//! Operations on finished logbooks
//!
//! Pure post-processing: trimming cancellation stubs, discarding partial
//! logs, and partitioning a logbook for output. None of these touch builder
//! state; they map finished logbooks to finished logbooks.

use crate::types::{ActionKind, Log, Logbook, LogbookTimestamps, Timestamp};
use std::collections::BTreeMap;

/// Default factor for [`cut_cancellations`]: a tail row finalised within a
/// single snapshot gap sits at roughly 1.0× the mean inter-update gap, so
/// 1.5 catches such rows despite gap jitter while leaving multi-gap dwell
/// intervals alone.
pub const DEFAULT_CANCELLATION_THRESHOLD: f64 = 1.5;

/// Heuristically trim stops that almost certainly did not happen because the
/// trip was cancelled mid-route.
///
/// When a trip is cancelled, its remaining stops all vanish from the feed at
/// once and are finalised as `STOPPED_OR_SKIPPED` with time intervals no
/// wider than one snapshot gap. This walks each log from the tail and strips
/// the maximal run of `STOPPED_OR_SKIPPED` rows whose `(max − min)` interval
/// is below `threshold ×` the trip's mean inter-update gap, stopping at the
/// first confirmed stop. A log with no confirmed stop that was observed at a
/// single information time is dropped wholesale.
///
/// This is a heuristic with an unavoidable false-positive boundary: a short
/// trip (a two-stop shuttle, say) that legitimately clears its whole
/// remaining suffix inside one snapshot gap looks exactly like a
/// cancellation stub and will be trimmed. Raise or lower `threshold`
/// (default [`DEFAULT_CANCELLATION_THRESHOLD`]) to trade the two error
/// modes off against each other.
pub fn cut_cancellations(
    mut logbook: Logbook,
    timestamps: &LogbookTimestamps,
    threshold: f64,
) -> Logbook {
    let mut emptied = Vec::new();
    for (uid, log) in logbook.iter_mut() {
        let observed = timestamps.get(uid).map(|times| times.as_slice());
        cut_cancellations_log(log, observed, threshold);
        if log.is_empty() {
            emptied.push(uid.clone());
        }
    }
    for uid in &emptied {
        log::debug!("cut_cancellations dropped stub trip {}", uid);
        logbook.remove(uid);
    }
    logbook
}

fn cut_cancellations_log(log: &mut Log, observed: Option<&[Timestamp]>, threshold: f64) {
    if log.is_empty() {
        return;
    }

    // The trip's observation grid: the timestamps map when available (stable
    // under repeated trimming), else the rows' information times.
    let derived: Vec<Timestamp>;
    let observed = match observed {
        Some(times) if !times.is_empty() => times,
        _ => {
            let mut lits: Vec<Timestamp> =
                log.iter().map(|a| a.latest_information_time).collect();
            lits.sort_unstable();
            lits.dedup();
            derived = lits;
            derived.as_slice()
        }
    };

    let confirmed = log.iter().any(|a| a.kind == ActionKind::StoppedAt);
    if !confirmed && observed.len() <= 1 {
        // Announced once, never confirmed anywhere, gone by the next
        // snapshot: a cancellation before departure.
        log.clear();
        return;
    }
    if observed.len() < 2 {
        return;
    }

    let span = (observed[observed.len() - 1] - observed[0]) as f64;
    let mean_gap = span / (observed.len() - 1) as f64;
    let cutoff = mean_gap * threshold;

    while let Some(action) = log.last() {
        if action.kind != ActionKind::StoppedOrSkipped {
            break;
        }
        match (action.minimum_time, action.maximum_time) {
            (Some(min), Some(max)) if ((max - min) as f64) < cutoff => {
                log.pop();
            }
            _ => break,
        }
    }
}

/// Remove logs that are likely partial: trips already in progress when the
/// observation window opened (their first row's minimum time is the window's
/// first update timestamp) and trips still running when it closed (their
/// last row is `EN_ROUTE_TO`).
pub fn discard_partial_logs(mut logbook: Logbook, timestamps: &LogbookTimestamps) -> Logbook {
    let window_first = window_first_timestamp(timestamps);
    logbook.retain(|_, log| !is_partial(log, window_first));
    logbook
}

/// Split a logbook into (complete, incomplete) halves by the
/// [`discard_partial_logs`] criterion, carrying the timestamps along.
pub fn partition_on_incomplete(
    logbook: Logbook,
    timestamps: LogbookTimestamps,
) -> (
    (Logbook, LogbookTimestamps),
    (Logbook, LogbookTimestamps),
) {
    let window_first = window_first_timestamp(&timestamps);
    let mut complete = (Logbook::new(), LogbookTimestamps::new());
    let mut incomplete = (Logbook::new(), LogbookTimestamps::new());

    let mut times = timestamps;
    for (uid, log) in logbook {
        let trip_times = times.remove(&uid).unwrap_or_default();
        let target = if is_partial(&log, window_first) {
            &mut incomplete
        } else {
            &mut complete
        };
        target.0.insert(uid.clone(), log);
        target.1.insert(uid, trip_times);
    }
    (complete, incomplete)
}

/// Group a logbook by route, assigning each log to the majority `route_id`
/// across its rows. Useful for organising output files per route.
pub fn partition_on_route(
    logbook: Logbook,
    timestamps: LogbookTimestamps,
) -> BTreeMap<String, (Logbook, LogbookTimestamps)> {
    let mut partitions: BTreeMap<String, (Logbook, LogbookTimestamps)> = BTreeMap::new();
    let mut times = timestamps;
    for (uid, log) in logbook {
        let route = majority_route(&log);
        let trip_times = times.remove(&uid).unwrap_or_default();
        let entry = partitions.entry(route).or_default();
        entry.0.insert(uid.clone(), log);
        entry.1.insert(uid, trip_times);
    }
    partitions
}

fn majority_route(log: &Log) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for action in log {
        *counts.entry(action.route_id.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(route, _)| route.to_string())
        .unwrap_or_default()
}

fn is_partial(log: &Log, window_first: Option<Timestamp>) -> bool {
    let tail_en_route = log.last().map(|a| a.kind) == Some(ActionKind::EnRouteTo);
    let head_at_window_open = match (log.first().and_then(|a| a.minimum_time), window_first) {
        (Some(min), Some(first)) => min == first,
        _ => false,
    };
    tail_en_route || head_at_window_open
}

fn window_first_timestamp(timestamps: &LogbookTimestamps) -> Option<Timestamp> {
    timestamps
        .values()
        .filter_map(|times| times.first().copied())
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, UniqueTripId};

    fn action(
        kind: ActionKind,
        min: Option<u64>,
        max: Option<u64>,
        stop_id: &str,
        lit: u64,
    ) -> Action {
        Action {
            trip_id: "x".to_string(),
            route_id: "1".to_string(),
            kind,
            minimum_time: min,
            maximum_time: max,
            stop_id: stop_id.to_string(),
            latest_information_time: lit,
        }
    }

    fn book(entries: Vec<(&str, Log, Vec<u64>)>) -> (Logbook, LogbookTimestamps) {
        let mut logbook = Logbook::new();
        let mut times = LogbookTimestamps::new();
        for (uid, log, ts) in entries {
            logbook.insert(UniqueTripId::from(uid), log);
            times.insert(UniqueTripId::from(uid), ts);
        }
        (logbook, times)
    }

    #[test]
    fn test_cut_cancellations_strips_stub_tail() {
        // Observed every 100 seconds; the last two stops were finalised
        // inside a single gap when the trip vanished.
        let (logbook, times) = book(vec![(
            "u1",
            vec![
                action(ActionKind::StoppedAt, Some(100), Some(200), "A", 200),
                action(ActionKind::StoppedOrSkipped, Some(200), Some(300), "B", 300),
                action(ActionKind::StoppedOrSkipped, Some(400), Some(500), "C", 400),
                action(ActionKind::StoppedOrSkipped, Some(400), Some(500), "D", 400),
            ],
            vec![100, 200, 300, 400],
        )]);

        let cut = cut_cancellations(logbook, &times, DEFAULT_CANCELLATION_THRESHOLD);
        let log = &cut[&UniqueTripId::from("u1")];
        // Every tail interval sits inside one gap, so the walk strips back
        // to the confirmed stop.
        let stops: Vec<&str> = log.iter().map(|a| a.stop_id.as_str()).collect();
        assert_eq!(stops, vec!["A"]);
    }

    #[test]
    fn test_cut_cancellations_keeps_wide_intervals() {
        let (logbook, times) = book(vec![(
            "u1",
            vec![
                action(ActionKind::StoppedAt, Some(100), Some(200), "A", 200),
                action(ActionKind::StoppedOrSkipped, Some(200), Some(700), "B", 700),
            ],
            vec![100, 200, 300, 400, 500, 600, 700],
        )]);

        let cut = cut_cancellations(logbook, &times, DEFAULT_CANCELLATION_THRESHOLD);
        let log = &cut[&UniqueTripId::from("u1")];
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_cut_cancellations_drops_single_observation_stub() {
        let (logbook, times) = book(vec![(
            "u1",
            vec![
                action(ActionKind::StoppedOrSkipped, Some(100), Some(200), "A", 100),
                action(ActionKind::StoppedOrSkipped, Some(100), Some(200), "B", 100),
            ],
            vec![100],
        )]);

        let cut = cut_cancellations(logbook, &times, DEFAULT_CANCELLATION_THRESHOLD);
        assert!(cut.is_empty());
    }

    #[test]
    fn test_cut_cancellations_is_idempotent() {
        let (logbook, times) = book(vec![(
            "u1",
            vec![
                action(ActionKind::StoppedAt, Some(100), Some(200), "A", 200),
                action(ActionKind::StoppedOrSkipped, Some(200), Some(600), "B", 600),
                action(ActionKind::StoppedOrSkipped, Some(600), Some(700), "C", 600),
            ],
            vec![100, 200, 300, 400, 500, 600],
        )]);

        let once = cut_cancellations(logbook, &times, DEFAULT_CANCELLATION_THRESHOLD);
        let twice = cut_cancellations(once.clone(), &times, DEFAULT_CANCELLATION_THRESHOLD);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_discard_partial_logs() {
        let (logbook, times) = book(vec![
            (
                "u-window-open",
                vec![action(ActionKind::StoppedOrSkipped, Some(100), Some(200), "A", 200)],
                vec![100, 200],
            ),
            (
                "u-incomplete",
                vec![action(ActionKind::EnRouteTo, Some(300), None, "B", 300)],
                vec![300],
            ),
            (
                "u-complete",
                vec![action(ActionKind::StoppedOrSkipped, Some(200), Some(300), "C", 300)],
                vec![200, 300],
            ),
        ]);

        let kept = discard_partial_logs(logbook, &times);
        assert_eq!(kept.len(), 1);
        assert!(kept.contains_key(&UniqueTripId::from("u-complete")));
    }

    #[test]
    fn test_discard_partial_logs_is_idempotent() {
        let (logbook, times) = book(vec![
            (
                "u-window-open",
                vec![action(ActionKind::StoppedOrSkipped, Some(100), Some(200), "A", 200)],
                vec![100],
            ),
            (
                "u-complete",
                vec![action(ActionKind::StoppedOrSkipped, Some(200), Some(300), "C", 300)],
                vec![200, 300],
            ),
        ]);

        let once = discard_partial_logs(logbook, &times);
        // The timestamps map still pins the window start at 100, so the
        // surviving log is not re-judged against its own first time.
        let twice = discard_partial_logs(once.clone(), &times);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_partition_on_incomplete() {
        let (logbook, times) = book(vec![
            (
                "u-incomplete",
                vec![action(ActionKind::EnRouteTo, Some(300), None, "B", 300)],
                vec![300],
            ),
            (
                "u-complete",
                vec![action(ActionKind::StoppedOrSkipped, Some(200), Some(300), "C", 300)],
                vec![200, 300],
            ),
        ]);

        let ((complete, complete_times), (incomplete, incomplete_times)) =
            partition_on_incomplete(logbook, times);
        assert!(complete.contains_key(&UniqueTripId::from("u-complete")));
        assert!(complete_times.contains_key(&UniqueTripId::from("u-complete")));
        assert!(incomplete.contains_key(&UniqueTripId::from("u-incomplete")));
        assert!(incomplete_times.contains_key(&UniqueTripId::from("u-incomplete")));
    }

    #[test]
    fn test_partition_on_route_uses_majority() {
        let mut mixed = vec![
            action(ActionKind::StoppedOrSkipped, Some(200), Some(300), "A", 300),
            action(ActionKind::StoppedOrSkipped, Some(300), Some(400), "B", 400),
        ];
        mixed[0].route_id = "2".to_string();
        mixed[1].route_id = "2".to_string();
        let mut head = action(ActionKind::StoppedAt, Some(100), Some(200), "Z", 200);
        head.route_id = "1".to_string();
        let mut log = vec![head];
        log.extend(mixed);

        let (logbook, times) = book(vec![("u1", log, vec![100, 200, 300, 400])]);
        let partitions = partition_on_route(logbook, times);
        assert_eq!(partitions.len(), 1);
        assert!(partitions.contains_key("2"));
    }
}
