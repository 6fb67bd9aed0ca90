//! GTFS-Realtime feed decoding
//!
//! Wraps the prost-generated `gtfs_realtime` bindings and reduces a decoded
//! `FeedMessage` to the [`Update`] model: the header timestamp plus the trip
//! and vehicle messages, in feed order. Alerts and other entity kinds carry no
//! arrival information and are skipped.
//!
//! The decoder itself is external; this module only normalises its two
//! failure modes into [`ParseError`]s so the sanitiser can elide bad
//! snapshots without aborting the stream.

use crate::types::{
    Message, ParseError, ParseErrorKind, StopTimeUpdate, Timestamp, TripUpdate, Update,
    VehicleStatus, VehicleUpdate,
};
use gtfs_realtime::vehicle_position::VehicleStopStatus;
use gtfs_realtime::FeedMessage;
use prost::Message as _;

/// Decode one raw GTFS-Realtime snapshot into an [`Update`].
///
/// Two failure modes, both reported as [`ParseError`]s rather than panics:
///
/// * a hard protobuf decode failure
///   (`parsing_into_protobuf_raised_exception`);
/// * a decode that succeeded but shows evidence of partial data loss
///   (`parsing_into_protobuf_raised_runtime_warning`). The builder infers
///   trip terminations from *absence*, so a lossy snapshot would fabricate
///   terminations; it must be elided entirely. A feed whose mandatory
///   `header.gtfs_realtime_version` came back empty is taken as that signal.
pub fn decode_update(bytes: &[u8]) -> Result<Update, ParseError> {
    let feed = FeedMessage::decode(bytes).map_err(|err| {
        ParseError::new(ParseErrorKind::ParsingIntoProtobufRaisedException)
            .with("error", err)
            .with("byte_length", bytes.len())
    })?;

    if feed.header.gtfs_realtime_version.is_empty() {
        return Err(
            ParseError::new(ParseErrorKind::ParsingIntoProtobufRaisedRuntimeWarning)
                .with("byte_length", bytes.len())
                .with("detail", "decoded feed is missing its mandatory header version"),
        );
    }

    Ok(reduce_feed(&feed))
}

/// Reduce an already-decoded `FeedMessage` to the [`Update`] model.
pub fn reduce_feed(feed: &FeedMessage) -> Update {
    let timestamp = feed.header.timestamp.unwrap_or(0);

    let mut messages = Vec::new();
    for entity in &feed.entity {
        if let Some(trip_update) = &entity.trip_update {
            messages.push(Message::Trip(reduce_trip_update(trip_update)));
        }
        if let Some(vehicle) = &entity.vehicle {
            messages.push(Message::Vehicle(reduce_vehicle(vehicle, timestamp)));
        }
        // Alerts, shapes and other entity kinds are ignored.
    }

    log::debug!(
        "decoded update at {} with {} messages",
        timestamp,
        messages.len()
    );
    Update {
        timestamp,
        messages,
    }
}

fn reduce_trip_update(trip_update: &gtfs_realtime::TripUpdate) -> TripUpdate {
    let stops = trip_update
        .stop_time_update
        .iter()
        .map(|stu| StopTimeUpdate {
            stop_id: stu.stop_id.clone().unwrap_or_default(),
            arrival: stu.arrival.as_ref().and_then(|event| event_time(event)),
            departure: stu.departure.as_ref().and_then(|event| event_time(event)),
        })
        .collect();

    TripUpdate {
        trip_id: trip_update.trip.trip_id.clone().unwrap_or_default(),
        route_id: trip_update.trip.route_id.clone().unwrap_or_default(),
        stops,
    }
}

fn reduce_vehicle(
    vehicle: &gtfs_realtime::VehiclePosition,
    feed_timestamp: Timestamp,
) -> VehicleUpdate {
    let trip = vehicle.trip.as_ref();
    VehicleUpdate {
        trip_id: trip
            .and_then(|t| t.trip_id.clone())
            .unwrap_or_default(),
        route_id: trip
            .and_then(|t| t.route_id.clone())
            .unwrap_or_default(),
        stop_id: vehicle.stop_id.clone().unwrap_or_default(),
        status: reduce_status(vehicle.current_status),
        timestamp: vehicle.timestamp.unwrap_or(feed_timestamp),
    }
}

/// Map the wire enum onto [`VehicleStatus`]. The GTFS-RT schema defaults an
/// absent `current_status` to `IN_TRANSIT_TO`; unknown values get the same
/// treatment.
fn reduce_status(raw: Option<i32>) -> VehicleStatus {
    match raw.and_then(|value| VehicleStopStatus::try_from(value).ok()) {
        Some(VehicleStopStatus::StoppedAt) => VehicleStatus::StoppedAt,
        Some(VehicleStopStatus::IncomingAt) => VehicleStatus::IncomingAt,
        Some(VehicleStopStatus::InTransitTo) | None => VehicleStatus::InTransitTo,
    }
}

fn event_time(event: &gtfs_realtime::trip_update::StopTimeEvent) -> Option<Timestamp> {
    event.time.filter(|t| *t > 0).map(|t| t as Timestamp)
}
