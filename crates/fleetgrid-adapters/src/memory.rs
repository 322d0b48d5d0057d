//! In-memory planes.
//!
//! Each plane keeps its state behind a `std::sync::Mutex` and answers with
//! an already-completed future. Failure switches let tests drive the
//! transient-error and timeout paths of the reconcilers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::ready;
use std::sync::Mutex;

use fleetgrid_core::*;

fn offline(plane: &str) -> PlaneError {
    PlaneError::Transient(format!("{plane} unavailable"))
}

// ── Orchestrator ──────────────────────────────────────────────────

#[derive(Default)]
struct OrchestratorInner {
    /// Running units keyed by task id.
    units: BTreeMap<TaskId, ComputeUnit>,
    /// Scale-in protection flags keyed by task id.
    protection: HashMap<TaskId, bool>,
    fail_reads: bool,
    /// Flag reads whose batch contains one of these tasks fail.
    fail_reads_for: HashSet<TaskId>,
    fail_writes: HashSet<TaskId>,
    writes: u32,
    /// Length of every protection-flag query, in call order.
    flag_batches: Vec<usize>,
}

/// Orchestrator holding a task inventory and protection flags.
#[derive(Default)]
pub struct MemoryOrchestrator {
    inner: Mutex<OrchestratorInner>,
}

impl MemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, OrchestratorInner> {
        self.inner.lock().expect("orchestrator lock")
    }

    /// Start a task. Its protection flag is unset until someone writes it.
    pub fn start_unit(&self, unit_id: &str, private_address: &str) -> ComputeUnit {
        let unit = ComputeUnit {
            unit_id: unit_id.to_string(),
            private_address: private_address.to_string(),
            orchestrator_task_id: format!("arn:task/game-cluster/{unit_id}"),
            protection_state: ProtectionState::Unknown,
        };
        self.inner()
            .units
            .insert(unit.orchestrator_task_id.clone(), unit.clone());
        unit
    }

    /// Stop a task, releasing its address. Returns the stopped unit.
    pub fn stop_unit(&self, task_id: &str) -> Option<ComputeUnit> {
        let mut inner = self.inner();
        inner.protection.remove(task_id);
        inner.units.remove(task_id)
    }

    /// Current protection flag of a task.
    pub fn protection(&self, task_id: &str) -> Option<bool> {
        self.inner().protection.get(task_id).copied()
    }

    /// Set a task's protection flag directly (as a game server would).
    pub fn set_flag(&self, task_id: &str, protected: bool) {
        self.inner()
            .protection
            .insert(task_id.to_string(), protected);
    }

    /// Make protection-flag reads fail.
    pub fn fail_protection_reads(&self, fail: bool) {
        self.inner().fail_reads = fail;
    }

    /// Make any protection-flag read that includes this task fail.
    pub fn fail_reads_for(&self, task_id: &str) {
        self.inner().fail_reads_for.insert(task_id.to_string());
    }

    /// Sizes of the protection-flag queries received so far.
    pub fn flag_batches(&self) -> Vec<usize> {
        self.inner().flag_batches.clone()
    }

    /// Make protection writes for one task fail.
    pub fn fail_writes_for(&self, task_id: &str) {
        self.inner().fail_writes.insert(task_id.to_string());
    }

    /// Number of successful protection writes so far.
    pub fn protection_writes(&self) -> u32 {
        self.inner().writes
    }
}

impl Orchestrator for MemoryOrchestrator {
    fn list_running_units(&self) -> PlaneFuture<'_, Vec<ComputeUnit>> {
        let units: Vec<ComputeUnit> = self.inner().units.values().cloned().collect();
        Box::pin(ready(Ok(units)))
    }

    fn protection_flags<'a>(
        &'a self,
        task_ids: &'a [String],
    ) -> PlaneFuture<'a, HashMap<String, bool>> {
        let mut inner = self.inner();
        inner.flag_batches.push(task_ids.len());
        let poisoned = task_ids.iter().any(|id| inner.fail_reads_for.contains(id));
        let result: PlaneResult<HashMap<String, bool>> = if inner.fail_reads || poisoned {
            Err(offline("orchestrator"))
        } else {
            Ok(task_ids
                .iter()
                .filter_map(|id| inner.protection.get(id).map(|flag| (id.clone(), *flag)))
                .collect())
        };
        Box::pin(ready(result))
    }

    fn set_protection<'a>(&'a self, task_id: &'a str, protected: bool) -> PlaneFuture<'a, ()> {
        let mut inner = self.inner();
        let result = if inner.fail_writes.contains(task_id) {
            Err(offline("orchestrator"))
        } else if !inner.units.contains_key(task_id) {
            Err(PlaneError::NotFound(task_id.to_string()))
        } else {
            inner.protection.insert(task_id.to_string(), protected);
            inner.writes += 1;
            Ok(())
        };
        Box::pin(ready(result))
    }
}

// ── Session directory ─────────────────────────────────────────────

#[derive(Default)]
struct SessionsInner {
    sessions: Vec<SessionInfo>,
    failing_units: HashSet<UnitId>,
    offline: bool,
}

/// Session directory backed by a list of sessions.
#[derive(Default)]
pub struct MemorySessionDirectory {
    inner: Mutex<SessionsInner>,
}

impl MemorySessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, SessionsInner> {
        self.inner.lock().expect("session directory lock")
    }

    /// Start an active session known only by its host address.
    pub fn start_session_at(&self, session_id: &str, host_address: &str) {
        self.inner().sessions.push(SessionInfo {
            session_id: session_id.to_string(),
            host_address: host_address.to_string(),
            compute_name: None,
            status: SessionStatus::Active,
        });
    }

    /// Start an active session on a unit.
    pub fn start_session(&self, session_id: &str, unit: &ComputeUnit) {
        self.inner().sessions.push(SessionInfo {
            session_id: session_id.to_string(),
            host_address: unit.private_address.clone(),
            compute_name: Some(unit.unit_id.clone()),
            status: SessionStatus::Active,
        });
    }

    /// Mark a session terminated.
    pub fn end_session(&self, session_id: &str) {
        for session in self
            .inner()
            .sessions
            .iter_mut()
            .filter(|s| s.session_id == session_id)
        {
            session.status = SessionStatus::Terminated;
        }
    }

    /// Make queries about one unit fail.
    pub fn fail_for(&self, unit_id: &str) {
        self.inner().failing_units.insert(unit_id.to_string());
    }

    /// Make every query fail.
    pub fn set_offline(&self, offline: bool) {
        self.inner().offline = offline;
    }
}

impl SessionDirectory for MemorySessionDirectory {
    fn active_sessions<'a>(
        &'a self,
        unit_id: &'a str,
        host_address: Option<&'a str>,
    ) -> PlaneFuture<'a, Vec<SessionInfo>> {
        let inner = self.inner();
        let failing = inner.offline || inner.failing_units.contains(unit_id);
        let result: PlaneResult<Vec<SessionInfo>> = if failing {
            Err(offline("session directory"))
        } else {
            Ok(inner
                .sessions
                .iter()
                .filter(|s| s.status.is_live() && s.hosted_on(unit_id, host_address))
                .cloned()
                .collect())
        };
        Box::pin(ready(result))
    }
}

// ── Fleet registry ────────────────────────────────────────────────

#[derive(Default)]
struct RegistryInner {
    registrations: HashMap<UnitId, FleetRegistration>,
    deregister_calls: u32,
    offline: bool,
}

/// Fleet registry keyed by unit id.
#[derive(Default)]
pub struct MemoryFleetRegistry {
    inner: Mutex<RegistryInner>,
}

impl MemoryFleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("fleet registry lock")
    }

    /// Register a unit, as the game server does when it joins the fleet.
    pub fn register(&self, unit: &ComputeUnit, fleet_id: &str, location_id: &str) {
        self.insert(FleetRegistration {
            unit_id: unit.unit_id.clone(),
            fleet_id: fleet_id.to_string(),
            location_id: location_id.to_string(),
            private_address: Some(unit.private_address.clone()),
            registration_state: RegistrationState::Registered,
        });
    }

    /// Store a registration as given.
    pub fn insert(&self, registration: FleetRegistration) {
        self.inner()
            .registrations
            .insert(registration.unit_id.clone(), registration);
    }

    pub fn get(&self, unit_id: &str) -> Option<FleetRegistration> {
        self.inner().registrations.get(unit_id).cloned()
    }

    /// Number of deregistrations the registry actually applied.
    pub fn deregister_calls(&self) -> u32 {
        self.inner().deregister_calls
    }

    pub fn set_offline(&self, offline: bool) {
        self.inner().offline = offline;
    }
}

impl FleetRegistry for MemoryFleetRegistry {
    fn registration<'a>(&'a self, unit_id: &'a str) -> PlaneFuture<'a, Option<FleetRegistration>> {
        let inner = self.inner();
        let result = if inner.offline {
            Err(offline("fleet registry"))
        } else {
            Ok(inner.registrations.get(unit_id).cloned())
        };
        Box::pin(ready(result))
    }

    fn deregister<'a>(&'a self, unit_id: &'a str) -> PlaneFuture<'a, ()> {
        let mut guard = self.inner();
        let inner = &mut *guard;
        let result = if inner.offline {
            Err(offline("fleet registry"))
        } else {
            match inner.registrations.get_mut(unit_id) {
                Some(reg) if reg.registration_state == RegistrationState::Registered => {
                    reg.registration_state = RegistrationState::Deregistered;
                    inner.deregister_calls += 1;
                    Ok(())
                }
                _ => Err(PlaneError::NotFound(unit_id.to_string())),
            }
        };
        Box::pin(ready(result))
    }
}

// ── Address translation ───────────────────────────────────────────

#[derive(Default)]
struct TranslatorInner {
    mappings: Vec<AddressMapping>,
    offline: bool,
}

/// Address-translation service holding a mapping table.
#[derive(Default)]
pub struct MemoryAddressTranslator {
    inner: Mutex<TranslatorInner>,
}

impl MemoryAddressTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, TranslatorInner> {
        self.inner.lock().expect("address translator lock")
    }

    /// Publish (or move) a public endpoint for a private address.
    pub fn publish(&self, public_endpoint: &str, private_address: &str) {
        let mut inner = self.inner();
        inner.mappings.retain(|m| m.private_address != private_address);
        inner.mappings.push(AddressMapping {
            public_endpoint: public_endpoint.to_string(),
            private_address: private_address.to_string(),
            traffic_allowed: true,
            last_refreshed_at: 0,
        });
    }

    /// Remove the mapping for a private address.
    pub fn withdraw(&self, private_address: &str) {
        self.inner()
            .mappings
            .retain(|m| m.private_address != private_address);
    }

    pub fn set_offline(&self, offline: bool) {
        self.inner().offline = offline;
    }
}

impl AddressTranslator for MemoryAddressTranslator {
    fn list_mappings(&self) -> PlaneFuture<'_, Vec<AddressMapping>> {
        let inner = self.inner();
        let result = if inner.offline {
            Err(offline("address translator"))
        } else {
            Ok(inner.mappings.clone())
        };
        Box::pin(ready(result))
    }
}
