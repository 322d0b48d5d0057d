//! fleetgrid-adapters — concrete implementations of the external planes.
//!
//! # Components
//!
//! - **`gateway`** — JSON-over-HTTP clients for the orchestrator, session
//!   directory, fleet registry, and address-translation gateways
//! - **`memory`** — in-process planes with failure injection, used by tests
//!   and local runs

pub mod gateway;
pub mod memory;

pub use gateway::{
    HttpAddressTranslator, HttpFleetRegistry, HttpOrchestrator, HttpPlaneClient,
    HttpSessionDirectory,
};
pub use memory::{
    MemoryAddressTranslator, MemoryFleetRegistry, MemoryOrchestrator, MemorySessionDirectory,
};
