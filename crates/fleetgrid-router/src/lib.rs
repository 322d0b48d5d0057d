//! fleetgrid-router — turns matchmaking outcomes into player connection records.
//!
//! A successful placement names the game server's private address. The
//! router resolves it to a public endpoint through the address mapping
//! cache, retrying briefly on a miss, and persists one record per ticket.
//! Records that could not be resolved are written as `Pending` and fixed up
//! by the correction pass after the next cache refresh.

pub mod retry;
pub mod router;

pub use retry::RetryPolicy;
pub use router::{CorrectionReport, MatchEventRouter, RouteOutcome, RouterError, RouterResult};
