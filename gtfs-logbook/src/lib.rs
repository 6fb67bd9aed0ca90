//! GTFS-Realtime Trip Logbook Library
//!
//! Reconstructs a ground-truth history of transit vehicle arrivals and
//! departures from a time-ordered stream of GTFS-Realtime snapshots. A
//! snapshot only ever describes the *future* stops of currently tracked
//! trips; the history is recovered by diffing successive snapshots and
//! reading the disappearance of stops (and of whole trips) as evidence of
//! what happened in between.
//!
//! # Architecture
//!
//! The pipeline is synchronous and single-threaded:
//!
//! - Raw bytes are decoded into [`Update`]s (protobuf decoding delegated to
//!   the `gtfs_realtime` crate, failures normalised into [`ParseError`]s)
//! - The sanitiser deletes malformed updates and messages, reporting every
//!   elision
//! - The [`LogbookBuilder`] state machine tracks each trip across updates,
//!   mints stable unique ids despite feed-id recycling, and finalises
//!   per-trip action logs
//! - The merger stitches logbooks built from adjacent time windows, and the
//!   ops module post-processes finished logbooks
//!
//! Callers needing parallelism partition the stream into disjoint time
//! windows, build per-window logbooks on separate threads, and join them
//! with [`merge_logbooks`].
//!
//! # Example Usage
//!
//! ```no_run
//! use gtfs_logbook::{logify_bytes, to_csv};
//!
//! let snapshots: Vec<Vec<u8>> = vec![/* raw GTFS-RT feeds, in time order */];
//! let outcome = logify_bytes(snapshots).unwrap();
//!
//! for error in &outcome.errors {
//!     eprintln!("elided: {}", error);
//! }
//! to_csv(&outcome.logbook, std::io::stdout()).unwrap();
//! ```

// Public modules
pub mod builder;
pub mod feed;
pub mod index;
pub mod io;
pub mod merge;
pub mod ops;
pub mod sanitise;
pub mod types;

// Re-export the main API for convenience
pub use builder::{logify, logify_bytes, LogbookBuilder, LogifyOutcome};
pub use feed::decode_update;
pub use io::{from_csv, to_csv, to_gtfs_stop_times};
pub use merge::merge_logbooks;
pub use ops::{
    cut_cancellations, discard_partial_logs, partition_on_incomplete, partition_on_route,
    DEFAULT_CANCELLATION_THRESHOLD,
};
pub use sanitise::{sanitise_stream, sanitise_updates};
pub use types::{
    Action, ActionKind, Log, Logbook, LogbookError, LogbookTimestamps, Message, ParseError,
    ParseErrorKind, Result, StopTimeUpdate, Timestamp, TripUpdate, UniqueTripId, Update,
    VehicleStatus, VehicleUpdate,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: an empty stream builds an empty logbook.
        let outcome = logify(Vec::new()).unwrap();
        assert!(outcome.logbook.is_empty());
        assert!(outcome.errors.is_empty());
    }
}
