//! End-to-end fleet scenarios.
//!
//! Wires the reconcilers the way `fleetd run` does, but against in-memory
//! planes, and walks a compute unit and a player through their lifecycles.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use fleetgrid_adapters::{
    MemoryAddressTranslator, MemoryFleetRegistry, MemoryOrchestrator, MemorySessionDirectory,
};
use fleetgrid_api::{ApiState, build_router};
use fleetgrid_core::*;
use fleetgrid_mapping::{AddressMappingCache, Lookup, MappingRefresher};
use fleetgrid_reconciler::{TerminationOutcome, TerminationReconciler};
use fleetgrid_router::{MatchEventRouter, RetryPolicy, RouteOutcome};
use fleetgrid_scanner::IdleComputeScanner;
use fleetgrid_state::StateStore;

const TIMEOUT: Duration = Duration::from_secs(1);

fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 2,
        base: Duration::from_millis(1),
        max: Duration::from_millis(5),
    }
}

fn stopped(unit: &ComputeUnit) -> TaskStoppedEvent {
    TaskStoppedEvent {
        task_id: unit.orchestrator_task_id.clone(),
        cluster: Some("game-cluster".to_string()),
        last_status: Some("STOPPED".to_string()),
        private_address: Some(unit.private_address.clone()),
    }
}

fn placement(ticket: &str, player: &str, address: &str) -> MatchEvent {
    MatchEvent {
        ticket_id: ticket.to_string(),
        player_id: player.to_string(),
        outcome: MatchOutcome::Succeeded {
            private_address: address.to_string(),
            player_session_id: None,
        },
    }
}

#[tokio::test]
async fn unit_lifecycle_protect_reclaim_deregister() {
    let orchestrator = Arc::new(MemoryOrchestrator::new());
    let sessions = Arc::new(MemorySessionDirectory::new());
    let registry = Arc::new(MemoryFleetRegistry::new());

    let scanner = IdleComputeScanner::new(orchestrator.clone(), sessions.clone())
        .with_call_timeout(TIMEOUT);
    let reconciler =
        TerminationReconciler::new(registry.clone(), sessions.clone()).with_call_timeout(TIMEOUT);

    let unit = orchestrator.start_unit("u-1", "10.0.0.10:7777");
    registry.register(&unit, "fleet-1", "custom-loc");
    sessions.start_session("s-1", &unit);

    scanner.scan_once().await.unwrap();
    assert_eq!(orchestrator.protection(&unit.orchestrator_task_id), Some(true));

    sessions.end_session("s-1");
    scanner.scan_once().await.unwrap();
    assert_eq!(orchestrator.protection(&unit.orchestrator_task_id), Some(false));

    orchestrator.stop_unit(&unit.orchestrator_task_id).unwrap();
    let outcome = reconciler.handle(&stopped(&unit)).await.unwrap();
    assert!(matches!(outcome, TerminationOutcome::Deregistered { .. }));
    assert_eq!(
        registry.get("u-1").unwrap().registration_state,
        RegistrationState::Deregistered
    );

    // Redelivery changes nothing.
    let outcome = reconciler.handle(&stopped(&unit)).await.unwrap();
    assert!(matches!(outcome, TerminationOutcome::AlreadyDeregistered { .. }));
    assert_eq!(registry.deregister_calls(), 1);

    // The stopped unit drops out of the next scan.
    let report = scanner.scan_once().await.unwrap();
    assert_eq!(report.checked, 0);
}

#[tokio::test]
async fn early_placement_is_corrected_after_refresh() {
    let translator = Arc::new(MemoryAddressTranslator::new());
    let store = StateStore::open_in_memory().unwrap();
    let cache = AddressMappingCache::new(Duration::from_secs(180));
    let router = MatchEventRouter::new(store, cache.clone()).with_retry(quick_retry());
    let refresher = MappingRefresher::new(translator.clone(), cache.clone(), TIMEOUT)
        .with_callback(router.correction_callback());

    // The accelerator has not published the new server yet.
    refresher.refresh_once().await.unwrap();
    let outcome = router.handle(&placement("T1", "P1", "10.0.0.20:7777")).await.unwrap();
    assert_eq!(outcome, RouteOutcome::Pending);

    let record = router.store().get_assignment("T1").unwrap().unwrap();
    assert_eq!(record.status, AssignmentStatus::Pending);
    assert_eq!(record.resolved_public_endpoint, None);

    translator.publish("ga.example.net:10020", "10.0.0.20:7777");
    refresher.refresh_once().await.unwrap();

    let record = router.store().get_assignment("T1").unwrap().unwrap();
    assert_eq!(record.status, AssignmentStatus::Matched);
    assert_eq!(record.resolved_public_endpoint.as_deref(), Some("ga.example.net:10020"));
    assert_eq!(router.store().count_assignments().unwrap(), 1);
}

#[tokio::test]
async fn translator_outage_keeps_serving_previous_snapshot() {
    let translator = Arc::new(MemoryAddressTranslator::new());
    translator.publish("ga.example.net:10001", "10.0.0.1:7777");
    let cache = AddressMappingCache::new(Duration::from_secs(180));
    let refresher = MappingRefresher::new(translator.clone(), cache.clone(), TIMEOUT);

    refresher.refresh_once().await.unwrap();
    translator.set_offline(true);
    assert!(refresher.refresh_once().await.is_err());

    assert_eq!(
        cache.lookup("10.0.0.1:7777"),
        Lookup::Resolved("ga.example.net:10001".to_string())
    );
}

#[tokio::test]
async fn connection_records_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("fleetgrid.redb");
    let cache = AddressMappingCache::new(Duration::from_secs(180));
    cache.replace(
        vec![AddressMapping {
            public_endpoint: "ga.example.net:10001".to_string(),
            private_address: "10.0.0.1:7777".to_string(),
            traffic_allowed: true,
            last_refreshed_at: 0,
        }],
        epoch_secs(),
    );

    {
        let store = StateStore::open(&db_path).unwrap();
        let router = MatchEventRouter::new(store, cache.clone()).with_retry(quick_retry());
        router.handle(&placement("T1", "P1", "10.0.0.1:7777")).await.unwrap();
    }

    let store = StateStore::open(&db_path).unwrap();
    let registry = Arc::new(MemoryFleetRegistry::new());
    let sessions = Arc::new(MemorySessionDirectory::new());
    let app = build_router(ApiState {
        router: MatchEventRouter::new(store, cache.clone()),
        reconciler: Arc::new(TerminationReconciler::new(registry, sessions)),
        cache,
    });

    let req = Request::builder()
        .uri("/api/v1/players/P1/connection")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"]["ticket_id"], "T1");
    assert_eq!(body["data"]["resolved_public_endpoint"], "ga.example.net:10001");
}
