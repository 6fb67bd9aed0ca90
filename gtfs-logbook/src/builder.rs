//! The logbook builder state machine
//!
//! Consumes a sanitised stream of updates in time order and reconstructs what
//! each physical trip actually did: which stops it passed, when it was known
//! to be there, and whether it stopped, was skipped, or is still en route.
//!
//! The builder maintains two pieces of state between updates: the set of
//! trips currently being tracked (`in_flight`, keyed by unique trip id) and
//! the `alias` map from feed-provided trip ids to unique ids. Trip
//! terminations are inferred from *absence*: a feed id that vanishes between
//! two snapshots had its trip end in that interval, and its feed id becomes
//! available for recycling by a different physical trip.
//!
//! One limitation is inherent to the input: a feed id reassigned to a
//! different physical vehicle *between* two adjacent snapshots, without ever
//! disappearing from the stream, is undetectable here. The resulting log
//! conflates the two vehicles. Do not attempt to guess.

use crate::feed;
use crate::index::{TripIndex, TripSnapshot};
use crate::sanitise;
use crate::types::{
    Action, ActionKind, Log, Logbook, LogbookError, LogbookTimestamps, ParseError, Result,
    Timestamp, UniqueTripId, Update, VehicleStatus,
};
use std::collections::HashMap;

/// Everything `logify` produces: the reconstructed history, the information
/// times backing it (required by the merger), and the non-fatal feed
/// problems encountered along the way.
#[derive(Debug, Default)]
pub struct LogifyOutcome {
    pub logbook: Logbook,
    pub timestamps: LogbookTimestamps,
    pub errors: Vec<ParseError>,
}

/// Build a logbook from already-decoded updates.
///
/// The updates are sanitised first (stream- and message-level rules); every
/// elision is reported in the outcome's `errors`, in encounter order.
///
/// # Example
/// ```no_run
/// use gtfs_logbook::logify;
///
/// let updates = vec![/* decoded gtfs-rt snapshots */];
/// let outcome = logify(updates).unwrap();
/// for (unique_trip_id, log) in &outcome.logbook {
///     println!("{}: {} stops", unique_trip_id, log.len());
/// }
/// ```
pub fn logify(updates: Vec<Update>) -> Result<LogifyOutcome> {
    let (clean, errors) = sanitise::sanitise_updates(updates);
    build(clean, errors)
}

/// Build a logbook from raw GTFS-Realtime snapshot bytes, one buffer per
/// snapshot, in stream order.
pub fn logify_bytes<I, B>(stream: I) -> Result<LogifyOutcome>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let candidates = stream
        .into_iter()
        .map(|bytes| feed::decode_update(bytes.as_ref()))
        .collect();
    let (clean, errors) = sanitise::sanitise_stream(candidates);
    build(clean, errors)
}

fn build(updates: Vec<Update>, errors: Vec<ParseError>) -> Result<LogifyOutcome> {
    let mut builder = LogbookBuilder::new();
    for update in &updates {
        builder.apply(update)?;
    }
    let (logbook, timestamps) = builder.finish();
    log::info!(
        "built logbook with {} trips from {} updates ({} parse errors)",
        logbook.len(),
        updates.len(),
        errors.len()
    );
    Ok(LogifyOutcome {
        logbook,
        timestamps,
        errors,
    })
}

/// The state machine. Owns all mutation; callers feed it updates in strict
/// time order and consume it with [`finish`](LogbookBuilder::finish).
///
/// Processing one update is atomic with respect to the internal maps, so a
/// builder may be abandoned between updates without corruption.
pub struct LogbookBuilder {
    /// Every physical trip currently being tracked
    in_flight: HashMap<UniqueTripId, LogBuilder>,
    /// Which feed id currently designates which physical trip
    alias: HashMap<String, UniqueTripId>,
    finished: Logbook,
    timestamps: LogbookTimestamps,
    previous_timestamp: Option<Timestamp>,
}

impl LogbookBuilder {
    pub fn new() -> Self {
        LogbookBuilder {
            in_flight: HashMap::new(),
            alias: HashMap::new(),
            finished: Logbook::new(),
            timestamps: LogbookTimestamps::new(),
            previous_timestamp: None,
        }
    }

    /// Number of trips currently being tracked.
    pub fn active_trips(&self) -> usize {
        self.in_flight.len()
    }

    /// Consume one update.
    ///
    /// The update must be later than every update seen so far; feeding
    /// updates out of order is a caller error and aborts the build. The
    /// sanitiser guarantees this property for anything it has processed.
    pub fn apply(&mut self, update: &Update) -> Result<()> {
        let t = update.timestamp;
        if let Some(previous) = self.previous_timestamp {
            if t <= previous {
                return Err(LogbookError::OutOfOrderUpdate {
                    timestamp: t,
                    previous,
                });
            }
        }

        let index = TripIndex::from_update(update);

        // Trips absent from this update ended between the previous snapshot
        // and this one. Terminate them before minting new ids so that a
        // recycled feed id lands on a fresh unique id.
        let terminating: Vec<String> = self
            .alias
            .keys()
            .filter(|feed_id| !index.contains(feed_id.as_str()))
            .cloned()
            .collect();
        for feed_id in terminating {
            let uid = self
                .alias
                .remove(&feed_id)
                .expect("terminating feed id is aliased");
            let mut log_builder = self
                .in_flight
                .remove(&uid)
                .expect("aliased trip is in flight");
            log::debug!(
                "trip {} (feed id {}) terminated between {} and {}",
                uid,
                feed_id,
                log_builder.last_information_time(),
                t
            );
            log_builder.terminate(t);
            self.retire(uid, log_builder);
        }

        // Continuing and new trips, in first-appearance order.
        for snapshot in index.iter() {
            let uid = match self.alias.get(&snapshot.trip_id) {
                Some(uid) => uid.clone(),
                None => {
                    let uid = UniqueTripId::mint();
                    log::debug!(
                        "minting unique id {} for feed trip {} at {}",
                        uid,
                        snapshot.trip_id,
                        t
                    );
                    self.alias.insert(snapshot.trip_id.clone(), uid.clone());
                    self.in_flight
                        .insert(uid.clone(), LogBuilder::new(&snapshot.trip_id));
                    uid
                }
            };
            self.in_flight
                .get_mut(&uid)
                .expect("aliased trip is in flight")
                .observe(snapshot, t);
        }

        self.previous_timestamp = Some(t);
        Ok(())
    }

    /// Finalise the build. Trips still in flight are moved to the logbook
    /// with their tail rows left `EN_ROUTE_TO`; these are the incomplete
    /// trips a later window (via the merger) may complete.
    pub fn finish(mut self) -> (Logbook, LogbookTimestamps) {
        let in_flight = std::mem::take(&mut self.in_flight);
        for (uid, log_builder) in in_flight {
            self.retire(uid, log_builder);
        }
        (self.finished, self.timestamps)
    }

    fn retire(&mut self, uid: UniqueTripId, log_builder: LogBuilder) {
        self.timestamps
            .insert(uid.clone(), log_builder.information_times.clone());
        self.finished.insert(uid, log_builder.into_log());
    }
}

impl Default for LogbookBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One in-flight trip's log under construction. Rows are kept in the order
/// their stops were first announced by the provider; later updates may
/// finalise or append rows but never reorder them.
struct LogBuilder {
    feed_trip_id: String,
    route_id: String,
    rows: Vec<Row>,
    /// stop_id → index into `rows`
    positions: HashMap<String, usize>,
    /// Every update timestamp that mentioned this trip, ascending
    information_times: Vec<Timestamp>,
}

struct Row {
    kind: ActionKind,
    minimum_time: Option<Timestamp>,
    maximum_time: Option<Timestamp>,
    stop_id: String,
    latest_information_time: Timestamp,
}

impl LogBuilder {
    fn new(feed_trip_id: &str) -> Self {
        LogBuilder {
            feed_trip_id: feed_trip_id.to_string(),
            route_id: String::new(),
            rows: Vec::new(),
            positions: HashMap::new(),
            information_times: Vec::new(),
        }
    }

    fn last_information_time(&self) -> Timestamp {
        self.information_times.last().copied().unwrap_or(0)
    }

    /// Reconcile the future suffix implied by one update with the log so far.
    fn observe(&mut self, snapshot: &TripSnapshot, t: Timestamp) {
        if !snapshot.route_id.is_empty() {
            // Route id follows the latest observation.
            self.route_id = snapshot.route_id.clone();
        }
        self.information_times.push(t);

        // Stops that were in the previous suffix but vanished from this one
        // were passed between the two snapshots.
        for row in &mut self.rows {
            let still_listed = snapshot
                .stops
                .iter()
                .any(|stu| stu.stop_id == row.stop_id);
            if still_listed {
                continue;
            }
            match row.kind {
                ActionKind::EnRouteTo => {
                    row.kind = ActionKind::StoppedOrSkipped;
                    row.maximum_time = Some(t);
                    row.latest_information_time = t;
                }
                ActionKind::StoppedAt if row.maximum_time.is_none() => {
                    // Departure observed: the vehicle left no later than now.
                    row.maximum_time = Some(t);
                    row.latest_information_time = t;
                }
                _ => {}
            }
        }

        // The remaining suffix: the first stop carries the vehicle status,
        // the rest are plain en-route targets.
        for (position, stu) in snapshot.stops.iter().enumerate() {
            let stopped_here =
                position == 0 && snapshot.status == VehicleStatus::StoppedAt;
            match self.positions.get(&stu.stop_id).copied() {
                None => {
                    let row = if stopped_here {
                        Row {
                            kind: ActionKind::StoppedAt,
                            minimum_time: Some(earliest_arrival(stu.arrival, t)),
                            maximum_time: None,
                            stop_id: stu.stop_id.clone(),
                            latest_information_time: t,
                        }
                    } else {
                        Row {
                            kind: ActionKind::EnRouteTo,
                            minimum_time: Some(t),
                            maximum_time: None,
                            stop_id: stu.stop_id.clone(),
                            latest_information_time: t,
                        }
                    };
                    self.positions.insert(stu.stop_id.clone(), self.rows.len());
                    self.rows.push(row);
                }
                Some(index) => {
                    let row = &mut self.rows[index];
                    match (row.kind, stopped_here) {
                        (ActionKind::EnRouteTo, true) => {
                            row.kind = ActionKind::StoppedAt;
                            row.minimum_time = Some(earliest_arrival(stu.arrival, t));
                            row.latest_information_time = t;
                        }
                        (ActionKind::EnRouteTo, false) => {
                            // Still not arrived as of now: the earliest
                            // possible arrival moves forward with the clock.
                            row.minimum_time = Some(t);
                            row.latest_information_time = t;
                        }
                        (ActionKind::StoppedAt, true) => {
                            let bound = earliest_arrival(stu.arrival, t);
                            row.minimum_time = Some(
                                row.minimum_time.map_or(bound, |m| m.min(bound)),
                            );
                            row.latest_information_time = t;
                        }
                        (ActionKind::StoppedAt, false) => {
                            // No reverting a confirmed stop to en-route.
                            row.latest_information_time = t;
                        }
                        (ActionKind::StoppedOrSkipped, _) => {
                            // Terminal; a reappearing stop id leaves the
                            // historical row untouched.
                        }
                    }
                }
            }
        }
    }

    /// The trip vanished from the stream at `t`: everything still pending
    /// happened (in some form) before then.
    fn terminate(&mut self, t: Timestamp) {
        for row in &mut self.rows {
            if row.kind == ActionKind::EnRouteTo {
                row.kind = ActionKind::StoppedOrSkipped;
            }
            if row.maximum_time.is_none() {
                row.maximum_time = Some(t);
            }
            // latest_information_time is left as the last update that
            // actually mentioned the trip.
        }
    }

    fn into_log(self) -> Log {
        let feed_trip_id = self.feed_trip_id;
        let route_id = self.route_id;
        self.rows
            .into_iter()
            .map(|row| Action {
                trip_id: feed_trip_id.clone(),
                route_id: route_id.clone(),
                kind: row.kind,
                minimum_time: row.minimum_time,
                maximum_time: row.maximum_time,
                stop_id: row.stop_id,
                latest_information_time: row.latest_information_time,
            })
            .collect()
    }
}

fn earliest_arrival(arrival: Option<Timestamp>, t: Timestamp) -> Timestamp {
    arrival.map_or(t, |a| a.min(t))
}
