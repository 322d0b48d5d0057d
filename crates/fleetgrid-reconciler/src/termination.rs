//! TerminationReconciler — deregisters units whose task has stopped.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use fleetgrid_core::*;

/// The `lastStatus` value that means the task is gone for good.
pub const STOPPED: &str = "STOPPED";

/// How a notification was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TerminationOutcome {
    /// The unit was registered and is now deregistered.
    Deregistered { unit_id: UnitId },
    /// The unit was already deregistered; nothing was written.
    AlreadyDeregistered { unit_id: UnitId },
    /// The registry does not know the unit.
    Unknown { unit_id: UnitId },
    /// The notification does not describe a stopped task.
    Ignored { last_status: String },
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A plane could not be reached; the notification should be redelivered.
    #[error("transient plane failure: {0}")]
    Transient(PlaneError),

    /// A plane refused the call or answered with garbage; redelivery will
    /// not help.
    #[error("plane rejected the call: {0}")]
    Rejected(PlaneError),

    /// The unit still hosts live sessions; deregistering it would strand players.
    #[error("unit {unit_id} still hosts {} active session(s)", sessions.len())]
    InvariantViolation { unit_id: UnitId, sessions: Vec<String> },

    /// Neither the notification nor the registry names the unit's address,
    /// so its sessions cannot be checked.
    #[error("no private address known for unit {unit_id}")]
    UnresolvedAddress { unit_id: UnitId },
}

impl From<PlaneError> for ReconcileError {
    fn from(e: PlaneError) -> Self {
        if e.is_retryable() {
            ReconcileError::Transient(e)
        } else {
            ReconcileError::Rejected(e)
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Handles "task stopped" notifications against the fleet registry.
pub struct TerminationReconciler {
    registry: Arc<dyn FleetRegistry>,
    sessions: Arc<dyn SessionDirectory>,
    call_timeout: Duration,
}

impl TerminationReconciler {
    pub fn new(registry: Arc<dyn FleetRegistry>, sessions: Arc<dyn SessionDirectory>) -> Self {
        Self {
            registry,
            sessions,
            call_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Settle one notification. Safe to call again with the same event.
    pub async fn handle(&self, event: &TaskStoppedEvent) -> ReconcileResult<TerminationOutcome> {
        if let Some(status) = event.last_status.as_deref()
            && status != STOPPED
        {
            debug!(task = %event.task_id, status, "ignoring non-final task state");
            return Ok(TerminationOutcome::Ignored {
                last_status: status.to_string(),
            });
        }

        let unit_id = unit_id_from_task(&event.task_id).to_string();

        let registration = bounded(self.call_timeout, self.registry.registration(&unit_id)).await?;
        let registration = match registration {
            None => {
                info!(unit = %unit_id, task = %event.task_id, "unit unknown to fleet registry");
                return Ok(TerminationOutcome::Unknown { unit_id });
            }
            Some(reg) if reg.registration_state == RegistrationState::Deregistered => {
                debug!(unit = %unit_id, "unit already deregistered");
                return Ok(TerminationOutcome::AlreadyDeregistered { unit_id });
            }
            Some(reg) => reg,
        };

        let addresses = host_addresses(event, &registration);
        if addresses.is_empty() {
            error!(
                unit = %unit_id,
                task = %event.task_id,
                "no private address for stopped unit, refusing to deregister"
            );
            return Err(ReconcileError::UnresolvedAddress { unit_id });
        }

        let mut live: Vec<SessionInfo> = Vec::new();
        for address in addresses {
            let found = bounded(
                self.call_timeout,
                self.sessions.active_sessions(&unit_id, Some(address)),
            )
            .await?;
            for session in found {
                if !live.iter().any(|s| s.session_id == session.session_id) {
                    live.push(session);
                }
            }
        }
        if !live.is_empty() {
            let sessions: Vec<String> = live.into_iter().map(|s| s.session_id).collect();
            error!(
                unit = %unit_id,
                task = %event.task_id,
                ?sessions,
                "stopped unit still hosts active sessions, refusing to deregister"
            );
            return Err(ReconcileError::InvariantViolation { unit_id, sessions });
        }

        match bounded(self.call_timeout, self.registry.deregister(&unit_id)).await {
            Ok(()) => {
                info!(unit = %unit_id, cluster = ?event.cluster, "unit deregistered");
                Ok(TerminationOutcome::Deregistered { unit_id })
            }
            Err(e) if e.is_not_found() => {
                // Lost a race with another delivery or a manual removal.
                info!(unit = %unit_id, "unit vanished before deregistration");
                Ok(TerminationOutcome::Unknown { unit_id })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Addresses the unit may have hosted sessions on: the registry's record
/// and the notification's, deduplicated.
fn host_addresses<'a>(event: &'a TaskStoppedEvent, reg: &'a FleetRegistration) -> Vec<&'a str> {
    let mut addresses: Vec<&str> = Vec::with_capacity(2);
    for address in [reg.private_address.as_deref(), event.private_address.as_deref()]
        .into_iter()
        .flatten()
    {
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_adapters::{MemoryFleetRegistry, MemoryOrchestrator, MemorySessionDirectory};

    struct Fixture {
        orchestrator: MemoryOrchestrator,
        registry: Arc<MemoryFleetRegistry>,
        sessions: Arc<MemorySessionDirectory>,
        reconciler: TerminationReconciler,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(MemoryFleetRegistry::new());
        let sessions = Arc::new(MemorySessionDirectory::new());
        let reconciler = TerminationReconciler::new(registry.clone(), sessions.clone())
            .with_call_timeout(Duration::from_secs(1));
        Fixture {
            orchestrator: MemoryOrchestrator::new(),
            registry,
            sessions,
            reconciler,
        }
    }

    fn stopped(unit: &ComputeUnit) -> TaskStoppedEvent {
        TaskStoppedEvent {
            task_id: unit.orchestrator_task_id.clone(),
            cluster: Some("game-cluster".to_string()),
            last_status: Some(STOPPED.to_string()),
            private_address: Some(unit.private_address.clone()),
        }
    }

    #[tokio::test]
    async fn stopped_unit_is_deregistered() {
        let f = fixture();
        let unit = f.orchestrator.start_unit("abc123", "10.0.0.1:7777");
        f.registry.register(&unit, "fleet-1", "custom-loc");

        let outcome = f.reconciler.handle(&stopped(&unit)).await.unwrap();

        assert_eq!(
            outcome,
            TerminationOutcome::Deregistered {
                unit_id: "abc123".to_string()
            }
        );
        assert_eq!(
            f.registry.get("abc123").unwrap().registration_state,
            RegistrationState::Deregistered
        );
    }

    #[tokio::test]
    async fn redelivery_is_idempotent() {
        let f = fixture();
        let unit = f.orchestrator.start_unit("abc123", "10.0.0.1:7777");
        f.registry.register(&unit, "fleet-1", "custom-loc");
        let event = stopped(&unit);

        f.reconciler.handle(&event).await.unwrap();
        let second = f.reconciler.handle(&event).await.unwrap();

        assert_eq!(
            second,
            TerminationOutcome::AlreadyDeregistered {
                unit_id: "abc123".to_string()
            }
        );
        assert_eq!(f.registry.deregister_calls(), 1);
    }

    #[tokio::test]
    async fn unknown_unit_succeeds() {
        let f = fixture();
        let unit = f.orchestrator.start_unit("ghost", "10.0.0.9:7777");

        let outcome = f.reconciler.handle(&stopped(&unit)).await.unwrap();
        assert!(matches!(outcome, TerminationOutcome::Unknown { .. }));
        assert_eq!(f.registry.deregister_calls(), 0);
    }

    #[tokio::test]
    async fn non_final_status_is_ignored() {
        let f = fixture();
        let unit = f.orchestrator.start_unit("abc123", "10.0.0.1:7777");
        f.registry.register(&unit, "fleet-1", "custom-loc");
        let mut event = stopped(&unit);
        event.last_status = Some("DEACTIVATING".to_string());

        let outcome = f.reconciler.handle(&event).await.unwrap();
        assert!(matches!(outcome, TerminationOutcome::Ignored { .. }));
        assert_eq!(
            f.registry.get("abc123").unwrap().registration_state,
            RegistrationState::Registered
        );
    }

    #[tokio::test]
    async fn missing_status_is_treated_as_stopped() {
        let f = fixture();
        let unit = f.orchestrator.start_unit("abc123", "10.0.0.1:7777");
        f.registry.register(&unit, "fleet-1", "custom-loc");
        let mut event = stopped(&unit);
        event.last_status = None;

        let outcome = f.reconciler.handle(&event).await.unwrap();
        assert!(matches!(outcome, TerminationOutcome::Deregistered { .. }));
    }

    #[tokio::test]
    async fn live_session_blocks_deregistration() {
        let f = fixture();
        let unit = f.orchestrator.start_unit("abc123", "10.0.0.1:7777");
        f.registry.register(&unit, "fleet-1", "custom-loc");
        f.sessions.start_session("s1", &unit);

        let err = f.reconciler.handle(&stopped(&unit)).await.unwrap_err();

        match err {
            ReconcileError::InvariantViolation { unit_id, sessions } => {
                assert_eq!(unit_id, "abc123");
                assert_eq!(sessions, vec!["s1".to_string()]);
            }
            other => panic!("expected invariant violation, got {other:?}"),
        }
        assert_eq!(f.registry.deregister_calls(), 0);
    }

    #[tokio::test]
    async fn address_only_session_blocks_deregistration() {
        let f = fixture();
        let unit = f.orchestrator.start_unit("abc123", "10.0.0.1:7777");
        f.registry.register(&unit, "fleet-1", "custom-loc");
        f.sessions.start_session_at("s1", "10.0.0.1:7777");
        let mut event = stopped(&unit);
        event.private_address = None;

        let err = f.reconciler.handle(&event).await.unwrap_err();

        assert!(matches!(err, ReconcileError::InvariantViolation { .. }));
        assert_eq!(
            f.registry.get("abc123").unwrap().registration_state,
            RegistrationState::Registered
        );
    }

    #[tokio::test]
    async fn event_address_is_checked_alongside_registry_address() {
        let f = fixture();
        let unit = f.orchestrator.start_unit("abc123", "10.0.0.1:7777");
        f.registry.register(&unit, "fleet-1", "custom-loc");
        f.sessions.start_session_at("s1", "10.0.0.9:7777");
        let mut event = stopped(&unit);
        event.private_address = Some("10.0.0.9:7777".to_string());

        let err = f.reconciler.handle(&event).await.unwrap_err();
        assert!(matches!(err, ReconcileError::InvariantViolation { .. }));
        assert_eq!(f.registry.deregister_calls(), 0);
    }

    #[tokio::test]
    async fn unresolved_address_is_refused() {
        let f = fixture();
        let unit = f.orchestrator.start_unit("abc123", "10.0.0.1:7777");
        f.registry.insert(FleetRegistration {
            unit_id: "abc123".to_string(),
            fleet_id: "fleet-1".to_string(),
            location_id: "custom-loc".to_string(),
            private_address: None,
            registration_state: RegistrationState::Registered,
        });
        let mut event = stopped(&unit);
        event.private_address = None;

        let err = f.reconciler.handle(&event).await.unwrap_err();

        assert!(matches!(err, ReconcileError::UnresolvedAddress { .. }));
        assert_eq!(f.registry.deregister_calls(), 0);
    }

    #[test]
    fn plane_errors_split_by_retryability() {
        let err: ReconcileError = PlaneError::Timeout(Duration::from_secs(1)).into();
        assert!(matches!(err, ReconcileError::Transient(_)));

        let err: ReconcileError = PlaneError::Rejected {
            status: 403,
            message: "forbidden".to_string(),
        }
        .into();
        assert!(matches!(err, ReconcileError::Rejected(_)));
    }

    #[tokio::test]
    async fn unreachable_planes_are_transient() {
        let f = fixture();
        let unit = f.orchestrator.start_unit("abc123", "10.0.0.1:7777");
        f.registry.register(&unit, "fleet-1", "custom-loc");

        f.sessions.set_offline(true);
        let err = f.reconciler.handle(&stopped(&unit)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Transient(_)));

        f.sessions.set_offline(false);
        f.registry.set_offline(true);
        let err = f.reconciler.handle(&stopped(&unit)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Transient(_)));

        // Once the planes recover, redelivery completes the work.
        f.registry.set_offline(false);
        let outcome = f.reconciler.handle(&stopped(&unit)).await.unwrap();
        assert!(matches!(outcome, TerminationOutcome::Deregistered { .. }));
    }
}
