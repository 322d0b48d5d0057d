//! fleetgrid-api — REST surface of the FleetGrid daemon.
//!
//! Notification producers push orchestrator and matchmaking events here;
//! game clients read their connection record. A 503 answer tells the
//! producer to redeliver later; a 409 flags an inconsistency for an operator.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/events/task-stopped` | Task stopped notification |
//! | POST | `/api/v1/events/matchmaking` | Matchmaking outcome notification |
//! | GET | `/api/v1/players/{player_id}/connection` | Latest connection record |
//! | POST | `/api/v1/players/{player_id}/connection/ack` | Read and mark delivered |
//! | GET | `/api/v1/tickets/{ticket_id}` | Record by ticket |
//! | GET | `/healthz` | Liveness and mapping snapshot age |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use fleetgrid_mapping::AddressMappingCache;
use fleetgrid_reconciler::TerminationReconciler;
use fleetgrid_router::MatchEventRouter;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub router: MatchEventRouter,
    pub reconciler: Arc<TerminationReconciler>,
    pub cache: AddressMappingCache,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/events/task-stopped", post(handlers::task_stopped))
        .route("/events/matchmaking", post(handlers::matchmaking_event))
        .route("/players/{player_id}/connection", get(handlers::player_connection))
        .route(
            "/players/{player_id}/connection/ack",
            post(handlers::acknowledge_connection),
        )
        .route("/tickets/{ticket_id}", get(handlers::get_ticket))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz).with_state(state))
}
