//! Stream sanitation
//!
//! Turns a sequence of candidate updates into a sequence of well-formed
//! updates satisfying the builder's input contract: strictly increasing
//! timestamps, and only admissible trips (exactly one trip update paired
//! with one vehicle update, at least one stop remaining, non-empty trip id).
//!
//! Every repair is a deletion, never a substitution: the sanitiser removes,
//! it does not invent. Each elision is reported as a [`ParseError`] in the
//! order encountered.

use crate::types::{Message, ParseError, ParseErrorKind, Update};
use std::collections::HashMap;

/// Sanitise a stream of decode results (rule 1 of the pipeline: decode
/// failures have already been converted to `Err` records by
/// [`decode_update`](crate::feed::decode_update)).
///
/// Returns the surviving updates and the ordered list of every elision.
pub fn sanitise_stream(
    candidates: Vec<Result<Update, ParseError>>,
) -> (Vec<Update>, Vec<ParseError>) {
    let mut kept: Vec<Update> = Vec::new();
    let mut errors: Vec<ParseError> = Vec::new();
    let mut previous: Option<u64> = None;

    for (update_index, candidate) in candidates.into_iter().enumerate() {
        let mut update = match candidate {
            Ok(update) => update,
            Err(error) => {
                errors.push(error.with("update_index", update_index));
                continue;
            }
        };

        if update.timestamp == 0 {
            errors.push(
                ParseError::new(ParseErrorKind::FeedUpdateHasNullTimestamp)
                    .with("update_index", update_index),
            );
            continue;
        }
        match previous {
            Some(prev) if update.timestamp == prev => {
                log::warn!("dropping update {} with duplicate timestamp {}", update_index, prev);
                errors.push(
                    ParseError::new(ParseErrorKind::FeedUpdatesWithDuplicateTimestamps)
                        .with("update_index", update_index)
                        .with("timestamp", update.timestamp),
                );
                continue;
            }
            Some(prev) if update.timestamp < prev => {
                log::warn!(
                    "dropping update {} going backwards in time ({} < {})",
                    update_index,
                    update.timestamp,
                    prev
                );
                errors.push(
                    ParseError::new(ParseErrorKind::FeedUpdateGoesBackwardsInTime)
                        .with("update_index", update_index)
                        .with("timestamp", update.timestamp)
                        .with("previous", prev),
                );
                continue;
            }
            _ => {}
        }

        sanitise_messages(&mut update, update_index, &mut errors);
        previous = Some(update.timestamp);
        kept.push(update);
    }

    (kept, errors)
}

/// Sanitise already-decoded updates (the `logify` entry point for callers
/// that bypass the wire format).
pub fn sanitise_updates(updates: Vec<Update>) -> (Vec<Update>, Vec<ParseError>) {
    sanitise_stream(updates.into_iter().map(Ok).collect())
}

/// Message-level rules, in order: null trip ids, then trips with no stops
/// remaining, then orphan halves of a trip/vehicle pair.
fn sanitise_messages(update: &mut Update, update_index: usize, errors: &mut Vec<ParseError>) {
    let timestamp = update.timestamp;

    update.messages.retain(|message| {
        if message.trip_id().is_empty() {
            errors.push(
                ParseError::new(ParseErrorKind::MessageWithNullTripId)
                    .with("update_index", update_index)
                    .with("timestamp", timestamp)
                    .with("message_kind", message_kind(message)),
            );
            false
        } else {
            true
        }
    });

    // A trip's effective trip update is the last one in the message list
    // (later duplicates win downstream), so its stop count decides.
    let mut order: Vec<String> = Vec::new();
    let mut empty: HashMap<String, bool> = HashMap::new();
    for message in &update.messages {
        let trip_id = message.trip_id();
        if !empty.contains_key(trip_id) {
            order.push(trip_id.to_string());
        }
        if let Message::Trip(trip) = message {
            empty.insert(trip_id.to_string(), trip.stops.is_empty());
        } else {
            empty.entry(trip_id.to_string()).or_insert(false);
        }
    }
    for trip_id in &order {
        if empty[trip_id] {
            errors.push(
                ParseError::new(ParseErrorKind::TripHasTripUpdateWithNoStopsRemaining)
                    .with("update_index", update_index)
                    .with("timestamp", timestamp)
                    .with("trip_id", trip_id),
            );
        }
    }
    update.messages.retain(|message| !empty[message.trip_id()]);

    // Orphan halves: a trip update with no vehicle update, or the reverse.
    let mut has_trip: HashMap<&str, (bool, bool)> = HashMap::new();
    for message in &update.messages {
        let entry = has_trip.entry(message.trip_id()).or_default();
        match message {
            Message::Trip(_) => entry.0 = true,
            Message::Vehicle(_) => entry.1 = true,
        }
    }
    let orphans: Vec<String> = order
        .iter()
        .filter(|trip_id| {
            has_trip
                .get(trip_id.as_str())
                .map(|(t, v)| t != v)
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    for trip_id in &orphans {
        let (t, _) = has_trip[trip_id.as_str()];
        errors.push(
            ParseError::new(ParseErrorKind::TripIdWithTripUpdateButNoVehicleUpdate)
                .with("update_index", update_index)
                .with("timestamp", timestamp)
                .with("trip_id", trip_id)
                .with("present", if t { "trip_update" } else { "vehicle_update" }),
        );
    }
    if !orphans.is_empty() {
        update
            .messages
            .retain(|message| !orphans.iter().any(|id| id == message.trip_id()));
    }
}

fn message_kind(message: &Message) -> &'static str {
    match message {
        Message::Trip(_) => "trip_update",
        Message::Vehicle(_) => "vehicle_update",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{StopTimeUpdate, TripUpdate, VehicleStatus, VehicleUpdate};

    fn stop(stop_id: &str) -> StopTimeUpdate {
        StopTimeUpdate {
            stop_id: stop_id.to_string(),
            arrival: None,
            departure: None,
        }
    }

    fn pair(trip_id: &str, stops: &[&str]) -> Vec<Message> {
        vec![
            Message::Trip(TripUpdate {
                trip_id: trip_id.to_string(),
                route_id: "A".to_string(),
                stops: stops.iter().map(|s| stop(s)).collect(),
            }),
            Message::Vehicle(VehicleUpdate {
                trip_id: trip_id.to_string(),
                route_id: "A".to_string(),
                stop_id: stops.first().unwrap_or(&"").to_string(),
                status: VehicleStatus::InTransitTo,
                timestamp: 0,
            }),
        ]
    }

    fn update(timestamp: u64, messages: Vec<Message>) -> Update {
        Update {
            timestamp,
            messages,
        }
    }

    #[test]
    fn test_null_timestamp_dropped() {
        let (kept, errors) = sanitise_updates(vec![
            update(0, pair("x", &["A"])),
            update(100, pair("x", &["A"])),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].timestamp, 100);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ParseErrorKind::FeedUpdateHasNullTimestamp);
    }

    #[test]
    fn test_duplicate_timestamp_keeps_first() {
        let (kept, errors) = sanitise_updates(vec![
            update(100, pair("x", &["A"])),
            update(100, pair("y", &["B"])),
            update(200, pair("x", &["A"])),
        ]);
        assert_eq!(kept.len(), 2);
        assert!(kept[0].messages[0].trip_id() == "x");
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].kind,
            ParseErrorKind::FeedUpdatesWithDuplicateTimestamps
        );
    }

    #[test]
    fn test_backwards_timestamp_dropped() {
        let (kept, errors) = sanitise_updates(vec![
            update(100, pair("x", &["A"])),
            update(200, pair("x", &["A"])),
            update(150, pair("x", &["A"])),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ParseErrorKind::FeedUpdateGoesBackwardsInTime);
        assert_eq!(errors[0].details["timestamp"], "150");
    }

    #[test]
    fn test_null_trip_id_message_dropped() {
        let mut messages = pair("x", &["A"]);
        messages.extend(pair("", &["B"]));
        let (kept, errors) = sanitise_updates(vec![update(100, messages)]);
        assert_eq!(kept[0].messages.len(), 2);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| e.kind == ParseErrorKind::MessageWithNullTripId));
    }

    #[test]
    fn test_no_stops_remaining_drops_both_messages() {
        let mut messages = pair("x", &[]);
        messages.extend(pair("y", &["B"]));
        let (kept, errors) = sanitise_updates(vec![update(100, messages)]);
        assert_eq!(kept[0].messages.len(), 2);
        assert!(kept[0].messages.iter().all(|m| m.trip_id() == "y"));
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].kind,
            ParseErrorKind::TripHasTripUpdateWithNoStopsRemaining
        );
    }

    #[test]
    fn test_orphan_messages_dropped_both_directions() {
        let trip_only = Message::Trip(TripUpdate {
            trip_id: "t".to_string(),
            route_id: "A".to_string(),
            stops: vec![stop("A")],
        });
        let vehicle_only = Message::Vehicle(VehicleUpdate {
            trip_id: "v".to_string(),
            route_id: "A".to_string(),
            stop_id: "A".to_string(),
            status: VehicleStatus::StoppedAt,
            timestamp: 100,
        });
        let (kept, errors) =
            sanitise_updates(vec![update(100, vec![trip_only, vehicle_only])]);
        assert!(kept[0].messages.is_empty());
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| e.kind == ParseErrorKind::TripIdWithTripUpdateButNoVehicleUpdate));
        assert_eq!(errors[0].details["present"], "trip_update");
        assert_eq!(errors[1].details["present"], "vehicle_update");
    }

    #[test]
    fn test_decode_errors_pass_through_in_order() {
        let (kept, errors) = sanitise_stream(vec![
            Err(ParseError::new(
                ParseErrorKind::ParsingIntoProtobufRaisedException,
            )),
            Ok(update(100, pair("x", &["A"]))),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].details["update_index"], "0");
    }
}
