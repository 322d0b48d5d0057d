//! fleetgrid-mapping — private address → public endpoint resolution.
//!
//! The cache holds one immutable [`MappingSnapshot`] behind an
//! [`arc_swap::ArcSwap`]. A refresh builds a complete new snapshot from the
//! address-translation service's bulk listing and swaps it in with a single
//! pointer store, so a reader always sees one whole generation and never a
//! half-applied refresh. Reads take no lock.
//!
//! # Staleness
//!
//! A snapshot older than twice the refresh interval is stale. Lookups
//! against a stale snapshot report [`Lookup::Stale`] instead of an endpoint,
//! so a failing refresher cannot route new players to recycled addresses.
//!
//! ```text
//! MappingRefresher ──(every refresh_interval)──▶ AddressTranslator::list_mappings
//!        │
//!        └─ AddressMappingCache::replace ──▶ on_refresh callback (pending corrections)
//! ```

pub mod cache;
pub mod refresher;

pub use cache::{AddressMappingCache, Lookup, MappingSnapshot};
pub use refresher::{BoxFuture, MappingRefresher, RefreshCallback, RefreshStats};
