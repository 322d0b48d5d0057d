//! fleetgrid-reconciler — keeps the fleet registry in step with the
//! orchestrator when compute stops.
//!
//! A "task stopped" notification names an orchestrator task. The reconciler
//! maps it to a unit id, resolves the unit's private address from the fleet
//! registry (or the notification), checks that no live session still points
//! at the unit, and deregisters it. A unit whose address cannot be resolved
//! is never deregistered. Every step is safe to repeat, so redelivered
//! notifications converge on the same registry state.

pub mod termination;

pub use termination::{ReconcileError, ReconcileResult, TerminationOutcome, TerminationReconciler};
