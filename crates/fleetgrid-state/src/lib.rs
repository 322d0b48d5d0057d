//! fleetgrid-state — durable player-connection records.
//!
//! Backed by [redb](https://docs.rs/redb). Each `MatchAssignment` is stored
//! once under its ticket id; a secondary table points every player at their
//! most recent ticket so client-facing reads can go by player id.
//!
//! Ticket ids are the idempotence key: inserts are insert-if-absent inside a
//! single write transaction, so concurrent duplicate deliveries of the same
//! notification produce exactly one record.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
