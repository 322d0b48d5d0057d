//! MatchEventRouter — dedup, resolve and persist matchmaking outcomes.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use fleetgrid_core::*;
use fleetgrid_mapping::{AddressMappingCache, BoxFuture, Lookup, MappingSnapshot, RefreshCallback};
use fleetgrid_state::{StateError, StateStore};

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type RouterResult<T> = Result<T, RouterError>;

/// What handling one notification did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    /// The ticket was already recorded; nothing was written.
    Duplicate { status: AssignmentStatus },
    /// Stored with a resolved public endpoint.
    Matched { public_endpoint: String },
    /// Stored without an endpoint; the correction pass will fill it in.
    Pending,
    /// Stored as a terminal failure.
    Failed { reason: FailureReason },
}

/// Totals for one correction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionReport {
    pub pending: usize,
    pub resolved: usize,
}

/// Routes matchmaking notifications into player connection records.
#[derive(Clone)]
pub struct MatchEventRouter {
    store: StateStore,
    cache: AddressMappingCache,
    retry: RetryPolicy,
}

impl MatchEventRouter {
    pub fn new(store: StateStore, cache: AddressMappingCache) -> Self {
        Self {
            store,
            cache,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Handle one notification. Redelivery of the same ticket is a no-op.
    pub async fn handle(&self, event: &MatchEvent) -> RouterResult<RouteOutcome> {
        if let Some(existing) = self.store.get_assignment(&event.ticket_id)? {
            debug!(ticket = %event.ticket_id, "duplicate notification");
            return Ok(RouteOutcome::Duplicate {
                status: existing.status,
            });
        }

        let (record, outcome) = match &event.outcome {
            MatchOutcome::Succeeded {
                private_address,
                player_session_id,
            } => {
                let endpoint = self.resolve_with_retry(private_address).await;
                let outcome = match &endpoint {
                    Some(public_endpoint) => RouteOutcome::Matched {
                        public_endpoint: public_endpoint.clone(),
                    },
                    None => RouteOutcome::Pending,
                };
                let record = MatchAssignment::placed(
                    &event.ticket_id,
                    &event.player_id,
                    private_address,
                    player_session_id.clone(),
                    endpoint,
                    epoch_secs(),
                );
                (record, outcome)
            }
            MatchOutcome::Failed { reason } => (
                MatchAssignment::failed(&event.ticket_id, &event.player_id, *reason, epoch_secs()),
                RouteOutcome::Failed { reason: *reason },
            ),
        };

        // A concurrent delivery may have won between the check and here.
        if !self.store.insert_if_absent(&record)? {
            let status = self
                .store
                .get_assignment(&event.ticket_id)?
                .map(|r| r.status)
                .unwrap_or(record.status);
            return Ok(RouteOutcome::Duplicate { status });
        }

        match &outcome {
            RouteOutcome::Pending => warn!(
                ticket = %event.ticket_id,
                player = %event.player_id,
                private_address = ?record.assigned_unit_private_address,
                "endpoint unresolved, stored as pending"
            ),
            _ => info!(
                ticket = %event.ticket_id,
                player = %event.player_id,
                ?outcome,
                "assignment recorded"
            ),
        }
        Ok(outcome)
    }

    async fn resolve_with_retry(&self, private_address: &str) -> Option<String> {
        for attempt in 0..self.retry.attempts {
            match self.cache.lookup(private_address) {
                Lookup::Resolved(endpoint) => return Some(endpoint),
                miss => {
                    debug!(private_address, attempt, ?miss, "endpoint lookup missed");
                }
            }
            if attempt + 1 < self.retry.attempts {
                tokio::time::sleep(self.retry.delay(attempt)).await;
            }
        }
        None
    }

    /// Re-resolve pending records against the current snapshot.
    pub fn reconcile_pending(&self) -> RouterResult<CorrectionReport> {
        let snapshot = self.cache.snapshot();
        self.reconcile_with(&snapshot)
    }

    /// Re-resolve pending records against a given snapshot, updating each
    /// record in place under its ticket key.
    pub fn reconcile_with(&self, snapshot: &MappingSnapshot) -> RouterResult<CorrectionReport> {
        let now = epoch_secs();
        let pending = self.store.list_pending()?;
        let mut report = CorrectionReport {
            pending: pending.len(),
            resolved: 0,
        };

        for record in pending {
            let Some(private_address) = record.assigned_unit_private_address.as_deref() else {
                continue;
            };
            let Lookup::Resolved(endpoint) = self.cache.lookup_in(snapshot, private_address, now)
            else {
                continue;
            };
            if self
                .store
                .resolve_pending(&record.ticket_id, &endpoint, now)?
                .is_some()
            {
                info!(
                    ticket = %record.ticket_id,
                    player = %record.player_id,
                    public_endpoint = %endpoint,
                    "pending assignment resolved"
                );
                report.resolved += 1;
            }
        }

        if report.pending > 0 {
            debug!(
                pending = report.pending,
                resolved = report.resolved,
                generation = snapshot.generation(),
                "correction pass complete"
            );
        }
        Ok(report)
    }

    /// Refresh callback running the correction pass against each newly
    /// installed snapshot.
    pub fn correction_callback(&self) -> RefreshCallback {
        let router = self.clone();
        Arc::new(move |snapshot: Arc<MappingSnapshot>| -> BoxFuture {
            let router = router.clone();
            Box::pin(async move {
                if let Err(e) = router.reconcile_with(&snapshot) {
                    warn!(error = %e, generation = snapshot.generation(), "correction pass failed");
                }
            })
        })
    }
}
