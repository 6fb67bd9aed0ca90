//! Core types for the logbook library
//!
//! This module defines the data model shared by every stage of the pipeline:
//! decoded feed updates on the input side, and actions, logs and logbooks on
//! the output side. The pipeline itself is stateless apart from the
//! [`LogbookBuilder`](crate::builder::LogbookBuilder), which owns all mutation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Seconds since the Unix epoch. Feed timestamps are strictly positive.
pub type Timestamp = u64;

/// Result type for logbook operations
pub type Result<T> = std::result::Result<T, LogbookError>;

/// A decoded GTFS-Realtime snapshot: one `FeedMessage`, reduced to the fields
/// the pipeline reads.
///
/// Snapshots are authoritative but partial: they describe only the *future*
/// stops of currently tracked trips. History is recovered by diffing
/// successive snapshots, never from a single one.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// `header.timestamp` of the feed, seconds since the epoch
    pub timestamp: Timestamp,
    /// Messages in feed order
    pub messages: Vec<Message>,
}

/// One feed entity relevant to trip tracking. Alerts and other entity kinds
/// are dropped at decode time.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Schedule view of a trip: its remaining stops
    Trip(TripUpdate),
    /// Position view of a trip: where the vehicle is right now
    Vehicle(VehicleUpdate),
}

impl Message {
    /// The feed-provided trip id this message describes. May be empty in
    /// malformed feeds; the sanitiser drops such messages.
    pub fn trip_id(&self) -> &str {
        match self {
            Message::Trip(t) => &t.trip_id,
            Message::Vehicle(v) => &v.trip_id,
        }
    }
}

/// The schedule half of a trip's snapshot: the stops the provider still
/// expects the vehicle to make, in visit order.
#[derive(Debug, Clone, PartialEq)]
pub struct TripUpdate {
    pub trip_id: String,
    pub route_id: String,
    /// Remaining (future) stops. The first entry is the stop the vehicle is
    /// currently at or heading towards.
    pub stops: Vec<StopTimeUpdate>,
}

/// Predicted call at a single stop.
#[derive(Debug, Clone, PartialEq)]
pub struct StopTimeUpdate {
    pub stop_id: String,
    pub arrival: Option<Timestamp>,
    pub departure: Option<Timestamp>,
}

/// The position half of a trip's snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleUpdate {
    pub trip_id: String,
    pub route_id: String,
    /// The current or imminent stop
    pub stop_id: String,
    pub status: VehicleStatus,
    pub timestamp: Timestamp,
}

/// GTFS-Realtime `VehicleStopStatus`, restricted to the three values the
/// wire format defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleStatus {
    StoppedAt,
    InTransitTo,
    IncomingAt,
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleStatus::StoppedAt => write!(f, "STOPPED_AT"),
            VehicleStatus::InTransitTo => write!(f, "IN_TRANSIT_TO"),
            VehicleStatus::IncomingAt => write!(f, "INCOMING_AT"),
        }
    }
}

/// What a trip is known to have done (or be doing) at one stop.
///
/// `StoppedAt` and `StoppedOrSkipped` are terminal: once a row reaches either
/// state it never reverts to `EnRouteTo` in a later revision of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    /// The vehicle was observed stopped at the stop
    StoppedAt,
    /// The vehicle was last seen heading towards the stop
    EnRouteTo,
    /// The vehicle passed through the stop between two snapshots; whether it
    /// stopped cannot be distinguished from the stream
    StoppedOrSkipped,
}

impl ActionKind {
    /// The literal wire string used in the CSV schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::StoppedAt => "STOPPED_AT",
            ActionKind::EnRouteTo => "EN_ROUTE_TO",
            ActionKind::StoppedOrSkipped => "STOPPED_OR_SKIPPED",
        }
    }

    /// Parse the literal wire string back into a kind.
    pub fn parse(s: &str) -> Option<ActionKind> {
        match s {
            "STOPPED_AT" => Some(ActionKind::StoppedAt),
            "EN_ROUTE_TO" => Some(ActionKind::EnRouteTo),
            "STOPPED_OR_SKIPPED" => Some(ActionKind::StoppedOrSkipped),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single row in a trip's log.
///
/// `minimum_time` is the earliest the vehicle could have arrived at the stop,
/// `maximum_time` the latest it could have departed. Either bound may be
/// absent: an `EnRouteTo` row has no maximum yet, and a `StoppedAt` row gains
/// its maximum only once a departure is observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub trip_id: String,
    pub route_id: String,
    pub kind: ActionKind,
    pub minimum_time: Option<Timestamp>,
    pub maximum_time: Option<Timestamp>,
    pub stop_id: String,
    /// The feed timestamp of the last update that revised this row
    pub latest_information_time: Timestamp,
}

/// The ordered sequence of actions for one physical trip. Row order is the
/// order in which stops were first announced by the provider.
pub type Log = Vec<Action>;

/// Opaque identifier for one physical trip, minted by the builder the first
/// time the trip appears. Stable across a logbook and distinct from the
/// feed-provided `trip_id`, which providers recycle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UniqueTripId(String);

impl UniqueTripId {
    /// Mint a fresh, globally unique trip id.
    pub fn mint() -> Self {
        UniqueTripId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UniqueTripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UniqueTripId {
    fn from(s: String) -> Self {
        UniqueTripId(s)
    }
}

impl From<&str> for UniqueTripId {
    fn from(s: &str) -> Self {
        UniqueTripId(s.to_string())
    }
}

/// A finished history: one log per physical trip.
pub type Logbook = BTreeMap<UniqueTripId, Log>;

/// For each unique trip, every feed timestamp at which the trip appeared, in
/// ascending order. The last element is the final time the feed carried
/// information about the trip; the merger needs the first element as well, to
/// decide which of several recycled uses of a feed id is the continuation.
pub type LogbookTimestamps = BTreeMap<UniqueTripId, Vec<Timestamp>>;

/// Errors that abort processing. Everything recoverable is reported as a
/// [`ParseError`] record instead.
#[derive(Debug, thiserror::Error)]
pub enum LogbookError {
    #[error("update at {timestamp} is not after the previous update at {previous}")]
    OutOfOrderUpdate {
        timestamp: Timestamp,
        previous: Timestamp,
    },

    #[error(
        "logbook windows overlap: window ending at {left_end} is not before \
         window starting at {right_start}"
    )]
    OverlappingWindows {
        left_end: Timestamp,
        right_start: Timestamp,
    },

    #[error("malformed {field} value {value:?} on CSV line {line}")]
    MalformedField {
        line: u64,
        field: &'static str,
        value: String,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The closed taxonomy of non-fatal feed problems. Every kind names the rule
/// that elided data; the remediation is always a deletion, never a
/// substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseErrorKind {
    ParsingIntoProtobufRaisedException,
    ParsingIntoProtobufRaisedRuntimeWarning,
    FeedUpdateHasNullTimestamp,
    FeedUpdatesWithDuplicateTimestamps,
    FeedUpdateGoesBackwardsInTime,
    MessageWithNullTripId,
    TripHasTripUpdateWithNoStopsRemaining,
    TripIdWithTripUpdateButNoVehicleUpdate,
}

impl ParseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseErrorKind::ParsingIntoProtobufRaisedException => {
                "parsing_into_protobuf_raised_exception"
            }
            ParseErrorKind::ParsingIntoProtobufRaisedRuntimeWarning => {
                "parsing_into_protobuf_raised_runtime_warning"
            }
            ParseErrorKind::FeedUpdateHasNullTimestamp => "feed_update_has_null_timestamp",
            ParseErrorKind::FeedUpdatesWithDuplicateTimestamps => {
                "feed_updates_with_duplicate_timestamps"
            }
            ParseErrorKind::FeedUpdateGoesBackwardsInTime => "feed_update_goes_backwards_in_time",
            ParseErrorKind::MessageWithNullTripId => "message_with_null_trip_id",
            ParseErrorKind::TripHasTripUpdateWithNoStopsRemaining => {
                "trip_has_trip_update_with_no_stops_remaining"
            }
            ParseErrorKind::TripIdWithTripUpdateButNoVehicleUpdate => {
                "trip_id_with_trip_update_but_no_vehicle_update"
            }
        }
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal feed problem: the rule that fired plus enough detail to debug
/// the offending snapshot (update index, timestamp, trip ids).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub details: BTreeMap<String, String>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind) -> Self {
        ParseError {
            kind,
            details: BTreeMap::new(),
        }
    }

    /// Builder method: attach one detail field.
    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.details.is_empty() {
            let detail = self
                .details
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}
