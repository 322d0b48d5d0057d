//! fleetgrid-core — shared vocabulary for the FleetGrid reconcilers.
//!
//! Holds the domain types of the three reconciled planes, the traits the
//! reconcilers use to reach them, and the `fleet.toml` configuration.

pub mod config;
pub mod duration;
pub mod plane;
pub mod types;

pub use config::FleetConfig;
pub use plane::{
    AddressTranslator, FleetRegistry, Orchestrator, PlaneError, PlaneFuture, PlaneResult,
    SessionDirectory, bounded,
};
pub use types::*;
