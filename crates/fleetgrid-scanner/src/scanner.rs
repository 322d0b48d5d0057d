//! IdleComputeScanner — periodic protection pass over the running fleet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use fleetgrid_core::*;

/// What one scan did to one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitVerdict {
    /// Protection was switched on.
    Protected,
    /// Protection was switched off.
    Reclaimed,
    /// The flag already matched; nothing was written.
    Unchanged,
    /// A session query or protection write failed.
    Failed,
}

/// Totals for one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub checked: usize,
    pub protected: usize,
    pub reclaimed: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl ScanReport {
    fn record(&mut self, verdict: UnitVerdict) {
        self.checked += 1;
        match verdict {
            UnitVerdict::Protected => self.protected += 1,
            UnitVerdict::Reclaimed => self.reclaimed += 1,
            UnitVerdict::Unchanged => self.unchanged += 1,
            UnitVerdict::Failed => self.failed += 1,
        }
    }
}

/// Decide the protection write for a unit.
///
/// Returns the flag to write, or `None` when the current state already
/// matches. An `Unknown` current state is always written.
pub fn decide(current: ProtectionState, active_sessions: usize) -> Option<bool> {
    let want = ProtectionState::from_flag(active_sessions > 0);
    if current == want {
        None
    } else {
        Some(active_sessions > 0)
    }
}

/// Keeps scale-in protection aligned with session activity.
///
/// Cloning is cheap; clones share the plane handles.
#[derive(Clone)]
pub struct IdleComputeScanner {
    orchestrator: Arc<dyn Orchestrator>,
    sessions: Arc<dyn SessionDirectory>,
    call_timeout: Duration,
    batch_size: usize,
}

impl IdleComputeScanner {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, sessions: Arc<dyn SessionDirectory>) -> Self {
        Self {
            orchestrator,
            sessions,
            call_timeout: Duration::from_secs(5),
            batch_size: 10,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Number of task ids per protection-flag query (at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run one pass over the current inventory.
    ///
    /// Fails only if the inventory itself cannot be listed; per-unit
    /// failures are counted in the report.
    pub async fn scan_once(&self) -> anyhow::Result<ScanReport> {
        let units = bounded(self.call_timeout, self.orchestrator.list_running_units()).await?;
        let flags = self.read_flags(&units).await;

        let mut tasks = JoinSet::new();
        for mut unit in units {
            if let Some(flag) = flags.get(&unit.orchestrator_task_id) {
                unit.protection_state = ProtectionState::from_flag(*flag);
            }
            let scanner = self.clone();
            tasks.spawn(async move { scanner.evaluate(&unit).await });
        }

        let mut report = ScanReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(verdict) => report.record(verdict),
                Err(e) => {
                    warn!(error = %e, "unit evaluation task failed");
                    report.record(UnitVerdict::Failed);
                }
            }
        }
        Ok(report)
    }

    /// Read current protection flags in batches. Units in a failed batch
    /// are simply absent from the map and stay `Unknown`.
    async fn read_flags(&self, units: &[ComputeUnit]) -> HashMap<String, bool> {
        let task_ids: Vec<String> = units
            .iter()
            .map(|u| u.orchestrator_task_id.clone())
            .collect();

        let mut flags = HashMap::with_capacity(task_ids.len());
        for batch in task_ids.chunks(self.batch_size) {
            match bounded(self.call_timeout, self.orchestrator.protection_flags(batch)).await {
                Ok(found) => flags.extend(found),
                Err(e) => warn!(
                    error = %e,
                    batch_len = batch.len(),
                    "protection flag read failed, treating batch as unknown"
                ),
            }
        }
        flags
    }

    async fn evaluate(&self, unit: &ComputeUnit) -> UnitVerdict {
        let active = match bounded(
            self.call_timeout,
            self.sessions
                .active_sessions(&unit.unit_id, Some(unit.private_address.as_str())),
        )
        .await
        {
            Ok(sessions) => sessions.len(),
            Err(e) => {
                warn!(unit = %unit.unit_id, error = %e, "session query failed");
                return UnitVerdict::Failed;
            }
        };

        let Some(protect) = decide(unit.protection_state, active) else {
            debug!(unit = %unit.unit_id, active, "protection unchanged");
            return UnitVerdict::Unchanged;
        };

        match bounded(
            self.call_timeout,
            self.orchestrator
                .set_protection(&unit.orchestrator_task_id, protect),
        )
        .await
        {
            Ok(()) => {
                debug!(unit = %unit.unit_id, active, protect, "protection updated");
                if protect {
                    UnitVerdict::Protected
                } else {
                    UnitVerdict::Reclaimed
                }
            }
            Err(e) => {
                warn!(unit = %unit.unit_id, protect, error = %e, "protection write failed");
                UnitVerdict::Failed
            }
        }
    }

    /// Run the scan loop until shutdown. The first pass is immediate.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "idle compute scanner started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.scan_once().await {
                        Ok(report) => info!(
                            checked = report.checked,
                            protected = report.protected,
                            reclaimed = report.reclaimed,
                            unchanged = report.unchanged,
                            failed = report.failed,
                            "scan complete"
                        ),
                        Err(e) => tracing::error!(error = %e, "scan failed to list inventory"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("idle compute scanner shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_adapters::{MemoryOrchestrator, MemorySessionDirectory};

    fn scanner(
        orchestrator: &Arc<MemoryOrchestrator>,
        sessions: &Arc<MemorySessionDirectory>,
    ) -> IdleComputeScanner {
        IdleComputeScanner::new(orchestrator.clone(), sessions.clone())
            .with_call_timeout(Duration::from_secs(1))
    }

    #[test]
    fn decide_writes_only_on_change() {
        assert_eq!(decide(ProtectionState::Protected, 2), None);
        assert_eq!(decide(ProtectionState::Reclaimable, 0), None);
        assert_eq!(decide(ProtectionState::Reclaimable, 1), Some(true));
        assert_eq!(decide(ProtectionState::Protected, 0), Some(false));
        assert_eq!(decide(ProtectionState::Unknown, 0), Some(false));
        assert_eq!(decide(ProtectionState::Unknown, 3), Some(true));
    }

    #[tokio::test]
    async fn busy_unit_is_protected_idle_unit_reclaimable() {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        let sessions = Arc::new(MemorySessionDirectory::new());
        let busy = orchestrator.start_unit("busy", "10.0.0.1:7777");
        let idle = orchestrator.start_unit("idle", "10.0.0.2:7777");
        sessions.start_session("s1", &busy);

        let report = scanner(&orchestrator, &sessions).scan_once().await.unwrap();

        assert_eq!(orchestrator.protection(&busy.orchestrator_task_id), Some(true));
        assert_eq!(orchestrator.protection(&idle.orchestrator_task_id), Some(false));
        assert_eq!(
            report,
            ScanReport {
                checked: 2,
                protected: 1,
                reclaimed: 1,
                unchanged: 0,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn second_pass_writes_nothing() {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        let sessions = Arc::new(MemorySessionDirectory::new());
        let busy = orchestrator.start_unit("busy", "10.0.0.1:7777");
        orchestrator.start_unit("idle", "10.0.0.2:7777");
        sessions.start_session("s1", &busy);

        let scanner = scanner(&orchestrator, &sessions);
        scanner.scan_once().await.unwrap();
        let writes = orchestrator.protection_writes();

        let report = scanner.scan_once().await.unwrap();
        assert_eq!(report.unchanged, 2);
        assert_eq!(orchestrator.protection_writes(), writes);
    }

    #[tokio::test]
    async fn ended_session_releases_protection() {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        let sessions = Arc::new(MemorySessionDirectory::new());
        let unit = orchestrator.start_unit("u1", "10.0.0.1:7777");
        sessions.start_session("s1", &unit);

        let scanner = scanner(&orchestrator, &sessions);
        scanner.scan_once().await.unwrap();
        assert_eq!(orchestrator.protection(&unit.orchestrator_task_id), Some(true));

        sessions.end_session("s1");
        let report = scanner.scan_once().await.unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(orchestrator.protection(&unit.orchestrator_task_id), Some(false));
    }

    #[tokio::test]
    async fn one_failing_unit_does_not_block_others() {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        let sessions = Arc::new(MemorySessionDirectory::new());
        let broken = orchestrator.start_unit("broken", "10.0.0.1:7777");
        let healthy = orchestrator.start_unit("healthy", "10.0.0.2:7777");
        sessions.start_session("s1", &healthy);
        sessions.fail_for("broken");

        let report = scanner(&orchestrator, &sessions).scan_once().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.protected, 1);
        assert_eq!(orchestrator.protection(&broken.orchestrator_task_id), None);
        assert_eq!(orchestrator.protection(&healthy.orchestrator_task_id), Some(true));
    }

    #[tokio::test]
    async fn failed_write_is_counted() {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        let sessions = Arc::new(MemorySessionDirectory::new());
        let unit = orchestrator.start_unit("u1", "10.0.0.1:7777");
        orchestrator.fail_writes_for(&unit.orchestrator_task_id);

        let report = scanner(&orchestrator, &sessions).scan_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.checked, 1);
    }

    #[tokio::test]
    async fn unreadable_flags_are_treated_as_unknown() {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        let sessions = Arc::new(MemorySessionDirectory::new());
        let unit = orchestrator.start_unit("u1", "10.0.0.1:7777");
        orchestrator.set_flag(&unit.orchestrator_task_id, false);
        orchestrator.fail_protection_reads(true);

        let report = scanner(&orchestrator, &sessions).scan_once().await.unwrap();

        // The stored flag already says reclaimable, but the scanner could not
        // see it and rewrites it.
        assert_eq!(report.reclaimed, 1);
        assert_eq!(orchestrator.protection_writes(), 1);
    }

    #[tokio::test]
    async fn flags_are_read_in_batches() {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        let sessions = Arc::new(MemorySessionDirectory::new());
        for i in 0..25 {
            let unit = orchestrator.start_unit(&format!("u{i}"), &format!("10.0.1.{i}:7777"));
            orchestrator.set_flag(&unit.orchestrator_task_id, false);
        }

        let report = scanner(&orchestrator, &sessions)
            .with_batch_size(10)
            .scan_once()
            .await
            .unwrap();

        assert_eq!(orchestrator.flag_batches(), vec![10, 10, 5]);
        assert_eq!(report.checked, 25);
        assert_eq!(report.unchanged, 25);
        assert_eq!(orchestrator.protection_writes(), 0);
    }

    #[tokio::test]
    async fn failed_batch_leaves_only_its_units_unknown() {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        let sessions = Arc::new(MemorySessionDirectory::new());
        let mut units = Vec::new();
        for i in 0..25 {
            let unit = orchestrator.start_unit(&format!("u{i:02}"), &format!("10.0.1.{i}:7777"));
            orchestrator.set_flag(&unit.orchestrator_task_id, false);
            units.push(unit);
        }
        // Inventory is listed in task-id order, so u10..u19 form the second batch.
        orchestrator.fail_reads_for(&units[12].orchestrator_task_id);

        let report = scanner(&orchestrator, &sessions).scan_once().await.unwrap();

        assert_eq!(orchestrator.flag_batches(), vec![10, 10, 5]);
        assert_eq!(report.checked, 25);
        assert_eq!(report.unchanged, 15);
        // Units in the unreadable batch are rewritten; the rest are left alone.
        assert_eq!(report.reclaimed, 10);
        assert_eq!(orchestrator.protection_writes(), 10);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        let sessions = Arc::new(MemorySessionDirectory::new());
        let unit = orchestrator.start_unit("u1", "10.0.0.1:7777");
        let scanner = scanner(&orchestrator, &sessions);
        let (tx, rx) = tokio::sync::watch::channel(false);

        let handle = tokio::spawn(async move { scanner.run(Duration::from_secs(3600), rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(orchestrator.protection(&unit.orchestrator_task_id), Some(false));
    }
}
