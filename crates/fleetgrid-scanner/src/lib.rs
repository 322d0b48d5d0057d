//! fleetgrid-scanner — session-driven scale-in protection.
//!
//! Walks the orchestrator's running inventory on a fixed interval and sets
//! each unit's scale-in protection from the Session Directory: a unit with
//! at least one active session is protected, an idle unit is reclaimable.
//!
//! # Scan pass
//!
//! ```text
//! units  = orchestrator.list_running_units()
//! flags  = orchestrator.protection_flags(batch)   for each batch of ≤10
//! for unit in units (concurrently):
//!     active = sessions.active_sessions(unit)
//!     want   = active > 0
//!     if flags[unit] != want:
//!         orchestrator.set_protection(unit, want)
//! ```
//!
//! A failure on one unit is counted and logged; it never blocks the rest of
//! the pass, and the next tick retries naturally.

pub mod scanner;

pub use scanner::{IdleComputeScanner, ScanReport, UnitVerdict, decide};
