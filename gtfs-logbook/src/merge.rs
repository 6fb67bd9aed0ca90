//! Joining logbooks built from adjacent time windows
//!
//! Building a day's history in parallel means partitioning the snapshot
//! stream into disjoint windows, building one logbook per window, and
//! stitching them back together. A trip that crosses a window boundary is
//! incomplete on the left side (its tail rows are still `EN_ROUTE_TO`) and
//! reappears on the right side under the same feed trip id; the merger
//! rewrites the left tail against the right continuation and keeps the left
//! unique id.
//!
//! A feed id that vanishes in one window and reappears in the next pointing
//! at a *different* physical vehicle cannot be told apart from a genuine
//! continuation; the stream alone does not carry that information. Merging
//! large windows keeps the boundary count, and with it the exposure, small.

use crate::types::{
    Action, ActionKind, Log, Logbook, LogbookError, LogbookTimestamps, Result, Timestamp,
    UniqueTripId,
};
use std::collections::{HashMap, HashSet};

/// Merge logbooks built from disjoint, ascending time windows.
///
/// Windows must not overlap; overlap is a caller error and aborts the merge.
/// Each element pairs a logbook with the timestamps map its build produced.
pub fn merge_logbooks(
    pairs: Vec<(Logbook, LogbookTimestamps)>,
) -> Result<(Logbook, LogbookTimestamps)> {
    let mut acc: Logbook = Logbook::new();
    let mut acc_times: LogbookTimestamps = LogbookTimestamps::new();
    let mut acc_end: Option<Timestamp> = None;

    for (right, right_times) in pairs {
        if let (Some(end), Some(start)) = (acc_end, window_start(&right_times)) {
            if start <= end {
                return Err(LogbookError::OverlappingWindows {
                    left_end: end,
                    right_start: start,
                });
            }
        }
        if let Some(end) = window_end(&right_times) {
            acc_end = Some(acc_end.map_or(end, |e| e.max(end)));
        }
        join_logbooks(&mut acc, &mut acc_times, right, right_times);
    }

    Ok((acc, acc_times))
}

/// Fold one window into the accumulator.
fn join_logbooks(
    acc: &mut Logbook,
    acc_times: &mut LogbookTimestamps,
    mut right: Logbook,
    mut right_times: LogbookTimestamps,
) {
    if right.is_empty() {
        return;
    }
    if acc.is_empty() {
        acc.append(&mut right);
        acc_times.append(&mut right_times);
        return;
    }

    let first_right = window_start(&right_times).unwrap_or(0);

    // Incomplete accumulator trips, keyed by the feed id they ended under.
    let incomplete: Vec<(String, UniqueTripId)> = acc
        .iter()
        .filter(|(_, log)| log.last().map(|a| a.kind) == Some(ActionKind::EnRouteTo))
        .filter_map(|(uid, log)| {
            log.first()
                .map(|a| (a.trip_id.clone(), uid.clone()))
        })
        .collect();

    // Right-side trips grouped by feed id, with the first time each was seen.
    let mut by_feed: HashMap<String, Vec<(Timestamp, UniqueTripId)>> = HashMap::new();
    for (uid, log) in right.iter() {
        let feed_id = match log.first() {
            Some(action) => action.trip_id.clone(),
            None => continue,
        };
        let first_seen = right_times
            .get(uid)
            .and_then(|times| times.first().copied())
            .unwrap_or(first_right);
        by_feed
            .entry(feed_id)
            .or_default()
            .push((first_seen, uid.clone()));
    }

    for (feed_id, acc_uid) in incomplete {
        let acc_last = acc_times
            .get(&acc_uid)
            .and_then(|times| times.last().copied())
            .unwrap_or(0);

        // The continuation is the earliest right-side use of the feed id
        // that begins after the accumulator last saw the trip.
        let candidate = by_feed
            .get(&feed_id)
            .and_then(|uses| {
                uses.iter()
                    .filter(|(first_seen, _)| *first_seen > acc_last)
                    .min_by_key(|(first_seen, _)| *first_seen)
                    .cloned()
            });

        match candidate {
            Some((continuation_seen, right_uid)) => {
                let right_log = right.remove(&right_uid).expect("candidate log present");
                let right_log_times = right_times
                    .remove(&right_uid)
                    .expect("candidate timestamps present");
                log::debug!(
                    "splicing trip {} (feed id {}) with continuation first seen at {}",
                    acc_uid,
                    feed_id,
                    continuation_seen
                );
                let left_log = acc.remove(&acc_uid).expect("incomplete log present");
                acc.insert(
                    acc_uid.clone(),
                    splice_logs(left_log, &right_log, continuation_seen),
                );
                if let Some(times) = acc_times.get_mut(&acc_uid) {
                    times.extend(right_log_times);
                }
                // Spent candidates must not be matched twice.
                if let Some(uses) = by_feed.get_mut(&feed_id) {
                    uses.retain(|(_, uid)| *uid != right_uid);
                }
            }
            None => {
                // The feed id never came back: the trip ended somewhere
                // across the boundary.
                if let Some(log) = acc.get_mut(&acc_uid) {
                    log::debug!(
                        "terminating boundary trip {} (feed id {}) at {}",
                        acc_uid,
                        feed_id,
                        first_right
                    );
                    finish_log(log, first_right);
                }
            }
        }
    }

    // Everything unmatched on the right enters the accumulator unchanged.
    acc.append(&mut right);
    acc_times.append(&mut right_times);
}

/// Rewrite the left log's trailing `EN_ROUTE_TO` rows against the right
/// continuation, then take the continuation's own rows.
///
/// Left-only stops keep their position; stops the continuation still lists
/// take the right-side row wholesale (the reconciliation the builder would
/// have applied had the windows been one stream); right-only stops append.
fn splice_logs(left: Log, right: &Log, continuation_seen: Timestamp) -> Log {
    let right_by_stop: HashMap<&str, &Action> = right
        .iter()
        .map(|action| (action.stop_id.as_str(), action))
        .collect();

    let mut out: Log = Vec::with_capacity(left.len() + right.len());
    let mut taken: HashSet<&str> = HashSet::new();

    for action in left {
        match right_by_stop.get(action.stop_id.as_str()) {
            Some(replacement) if action.kind == ActionKind::EnRouteTo => {
                taken.insert(replacement.stop_id.as_str());
                out.push((*replacement).clone());
            }
            Some(replacement) => {
                // The left row is already finalised; history wins over the
                // continuation's view of the same stop.
                taken.insert(replacement.stop_id.as_str());
                out.push(action);
            }
            None => {
                let mut action = action;
                if action.kind == ActionKind::EnRouteTo {
                    action.kind = ActionKind::StoppedOrSkipped;
                    action.maximum_time = Some(continuation_seen);
                }
                out.push(action);
            }
        }
    }

    for action in right {
        if !taken.contains(action.stop_id.as_str()) {
            out.push(action.clone());
        }
    }

    out
}

/// Terminate a log at `t`: pending rows become `STOPPED_OR_SKIPPED` and every
/// missing departure bound is capped.
fn finish_log(log: &mut Log, t: Timestamp) {
    for action in log.iter_mut() {
        if action.kind == ActionKind::EnRouteTo {
            action.kind = ActionKind::StoppedOrSkipped;
        }
        if action.maximum_time.is_none() {
            action.maximum_time = Some(t);
        }
    }
}

/// Earliest information time covered by a window.
fn window_start(times: &LogbookTimestamps) -> Option<Timestamp> {
    times
        .values()
        .filter_map(|list| list.first().copied())
        .min()
}

/// Latest information time covered by a window.
fn window_end(times: &LogbookTimestamps) -> Option<Timestamp> {
    times
        .values()
        .filter_map(|list| list.last().copied())
        .max()
}
