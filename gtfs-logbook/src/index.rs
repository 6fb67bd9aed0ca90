//! Trip indexing within a single update
//!
//! Groups one update's messages by feed trip id, preserving the order in
//! which trips first appear in the message list, and pairs each trip's
//! `TripUpdate` with its `VehicleUpdate`. The sanitiser guarantees that
//! every surviving trip has exactly one of each; this module is where that
//! pairing is materialised for the builder.

use crate::types::{Message, StopTimeUpdate, Timestamp, Update, VehicleStatus};
use std::collections::HashMap;

/// One trip's complete view within a single update: the paired schedule and
/// position messages, flattened to what the builder consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct TripSnapshot {
    pub trip_id: String,
    pub route_id: String,
    /// Remaining stops, first entry the current or imminent stop
    pub stops: Vec<StopTimeUpdate>,
    /// The stop the vehicle message points at
    pub current_stop: String,
    pub status: VehicleStatus,
    pub vehicle_timestamp: Timestamp,
}

#[derive(Default)]
struct PartialTrip {
    stops: Option<Vec<StopTimeUpdate>>,
    vehicle: Option<(String, VehicleStatus, Timestamp)>,
    route_id: String,
}

/// The trips of one update, keyed by feed trip id, iterable in
/// first-appearance order.
#[derive(Debug, Default)]
pub struct TripIndex {
    order: Vec<String>,
    trips: HashMap<String, TripSnapshot>,
}

impl TripIndex {
    /// Index a sanitised update. Trips missing either half of their message
    /// pair are skipped (the sanitiser has already reported them); when a
    /// trip id carries duplicate messages of one kind, the later one wins.
    pub fn from_update(update: &Update) -> TripIndex {
        let mut order: Vec<String> = Vec::new();
        let mut partial: HashMap<String, PartialTrip> = HashMap::new();

        for message in &update.messages {
            let trip_id = message.trip_id().to_string();
            let entry = partial.entry(trip_id.clone()).or_insert_with(|| {
                order.push(trip_id.clone());
                PartialTrip::default()
            });
            match message {
                Message::Trip(trip) => {
                    entry.route_id = trip.route_id.clone();
                    entry.stops = Some(trip.stops.clone());
                }
                Message::Vehicle(vehicle) => {
                    if entry.route_id.is_empty() {
                        entry.route_id = vehicle.route_id.clone();
                    }
                    entry.vehicle =
                        Some((vehicle.stop_id.clone(), vehicle.status, vehicle.timestamp));
                }
            }
        }

        let mut trips = HashMap::new();
        let mut paired_order = Vec::new();
        for trip_id in order {
            let entry = partial.remove(&trip_id).expect("indexed trip id");
            if let (Some(stops), Some((current_stop, status, vehicle_timestamp))) =
                (entry.stops, entry.vehicle)
            {
                paired_order.push(trip_id.clone());
                trips.insert(
                    trip_id.clone(),
                    TripSnapshot {
                        trip_id,
                        route_id: entry.route_id,
                        stops,
                        current_stop,
                        status,
                        vehicle_timestamp,
                    },
                );
            }
        }

        TripIndex {
            order: paired_order,
            trips,
        }
    }

    pub fn contains(&self, trip_id: &str) -> bool {
        self.trips.contains_key(trip_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Trips in first-appearance order.
    pub fn iter(&self) -> impl Iterator<Item = &TripSnapshot> {
        self.order.iter().map(move |id| &self.trips[id])
    }
}
