//! Domain layer: shot events, locations, counters, live connections and
//! the shared profile library.
//!
//! Plain data types and the invariants attached to them. Nothing here
//! performs I/O; services in [`crate::service`] and the store adapter in
//! [`crate::persistence`] operate on these types.

pub mod aggregate;
pub mod connection;
pub mod event_id;
pub mod library;
pub mod location;
pub mod shot_event;
pub mod submission;

pub use aggregate::{AggregateCounter, CounterDimension, CounterKey, CounterScope};
pub use connection::{Connection, ConnectionFilters, ConnectionId};
pub use event_id::EventId;
pub use library::{
    LibraryCounter, LibraryEntry, LibraryEntryId, LibraryEntryInput, LibraryFlagInput,
    LibraryInsert, LibrarySelector, LibrarySort, ValidatedLibraryEntry,
};
pub use location::{Coordinates, ResolvedLocation};
pub use shot_event::{ShotBroadcast, ShotDetails, ShotEvent, day_bucket};
pub use submission::{ShotSubmission, ValidatedShot};
