//! Interfaces to the external planes FleetGrid reconciles.
//!
//! Each plane is injected as a trait object so the reconcilers can run
//! against HTTP gateways in production and in-memory planes in tests.
//! Methods return boxed futures to keep the traits object-safe.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::types::{AddressMapping, ComputeUnit, FleetRegistration, SessionInfo};

/// Result type alias for external plane calls.
pub type PlaneResult<T> = Result<T, PlaneError>;

/// Boxed future returned by plane methods.
pub type PlaneFuture<'a, T> = Pin<Box<dyn Future<Output = PlaneResult<T>> + Send + 'a>>;

/// Errors reported by an external plane.
#[derive(Debug, Error)]
pub enum PlaneError {
    /// The plane does not know the requested resource.
    #[error("not found: {0}")]
    NotFound(String),

    /// The call did not finish within its bound.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// Network failure or 5xx; safe to retry later.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The plane refused the request.
    #[error("rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The plane answered with a body we could not decode.
    #[error("decode error: {0}")]
    Decode(String),
}

impl PlaneError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlaneError::NotFound(_))
    }

    /// Whether repeating the same call later may succeed.
    ///
    /// `Rejected` and `Decode` describe a request or answer that will not
    /// change on redelivery.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlaneError::NotFound(_) | PlaneError::Timeout(_) | PlaneError::Transient(_)
        )
    }
}

/// Run a plane call under a timeout, mapping expiry to [`PlaneError::Timeout`].
pub async fn bounded<T, F>(timeout: Duration, call: F) -> PlaneResult<T>
where
    F: Future<Output = PlaneResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(PlaneError::Timeout(timeout)),
    }
}

/// Container orchestrator: inventory and scale-in protection.
pub trait Orchestrator: Send + Sync {
    /// List units whose tasks are currently running.
    fn list_running_units(&self) -> PlaneFuture<'_, Vec<ComputeUnit>>;

    /// Current protection flag for a batch of tasks, keyed by task id.
    ///
    /// Tasks missing from the answer have an unknown protection state.
    fn protection_flags<'a>(
        &'a self,
        task_ids: &'a [String],
    ) -> PlaneFuture<'a, HashMap<String, bool>>;

    /// Enable or disable scale-in protection for a task.
    fn set_protection<'a>(&'a self, task_id: &'a str, protected: bool) -> PlaneFuture<'a, ()>;
}

/// Authoritative directory of game sessions.
pub trait SessionDirectory: Send + Sync {
    /// Live sessions hosted on the given unit.
    fn active_sessions<'a>(
        &'a self,
        unit_id: &'a str,
        host_address: Option<&'a str>,
    ) -> PlaneFuture<'a, Vec<SessionInfo>>;
}

/// Fleet registry used by the placement service.
pub trait FleetRegistry: Send + Sync {
    /// Registration for a unit, or `None` if the registry does not know it.
    fn registration<'a>(&'a self, unit_id: &'a str) -> PlaneFuture<'a, Option<FleetRegistration>>;

    /// Deregister a unit. Unknown units fail with [`PlaneError::NotFound`].
    fn deregister<'a>(&'a self, unit_id: &'a str) -> PlaneFuture<'a, ()>;
}

/// Address-translation service.
pub trait AddressTranslator: Send + Sync {
    /// The full current mapping table.
    fn list_mappings(&self) -> PlaneFuture<'_, Vec<AddressMapping>>;
}
