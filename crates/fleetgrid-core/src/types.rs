//! Domain types shared across the FleetGrid reconcilers.
//!
//! These types describe the three planes the reconcilers keep consistent:
//! compute units owned by the orchestrator, registrations owned by the fleet
//! registry, and public endpoint mappings owned by the address-translation
//! service. `MatchAssignment` is the only record FleetGrid itself owns.

use serde::{Deserialize, Serialize};

/// Orchestrator task identifier (full ARN or bare id).
pub type TaskId = String;

/// Compute unit identifier, shared by the orchestrator and the fleet registry.
pub type UnitId = String;

/// Matchmaking ticket identifier.
pub type TicketId = String;

/// Player identifier.
pub type PlayerId = String;

/// Derive the unit id from an orchestrator task id.
///
/// Task ids arrive as ARNs (`arn:...:task/cluster/abc123`); the registry
/// knows the unit by the last path segment.
pub fn unit_id_from_task(task_id: &str) -> &str {
    task_id.rsplit('/').next().unwrap_or(task_id)
}

// ── Compute ───────────────────────────────────────────────────────

/// Whether the orchestrator's scale-in policy may reclaim a unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionState {
    Protected,
    Reclaimable,
    #[default]
    Unknown,
}

impl ProtectionState {
    /// Build from the orchestrator's boolean protection flag.
    pub fn from_flag(protected: bool) -> Self {
        if protected {
            ProtectionState::Protected
        } else {
            ProtectionState::Reclaimable
        }
    }
}

/// One running game-server process as seen by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComputeUnit {
    pub unit_id: UnitId,
    /// `ip:port` the game server listens on inside the private network.
    pub private_address: String,
    pub orchestrator_task_id: TaskId,
    #[serde(default)]
    pub protection_state: ProtectionState,
}

// ── Fleet registry ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Registered,
    Deregistered,
}

/// A compute unit's membership in the matchmaking fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FleetRegistration {
    pub unit_id: UnitId,
    pub fleet_id: String,
    pub location_id: String,
    /// `ip:port` the unit registered with, when the registry reports it.
    #[serde(default)]
    pub private_address: Option<String>,
    pub registration_state: RegistrationState,
}

// ── Session directory ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Activating,
    Active,
    Terminating,
    Terminated,
}

impl SessionStatus {
    /// Sessions that still pin their host unit.
    pub fn is_live(self) -> bool {
        matches!(self, SessionStatus::Activating | SessionStatus::Active)
    }
}

/// A game session as reported by the session directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub host_address: String,
    /// Compute name the game server tagged the session with, if any.
    #[serde(default)]
    pub compute_name: Option<String>,
    pub status: SessionStatus,
}

impl SessionInfo {
    /// Whether this session is hosted on the given unit.
    ///
    /// Sessions are matched by host address or by the compute name tag,
    /// whichever the placement service filled in.
    pub fn hosted_on(&self, unit_id: &str, host_address: Option<&str>) -> bool {
        self.compute_name.as_deref() == Some(unit_id)
            || host_address.is_some_and(|addr| self.host_address == addr)
    }
}

// ── Address translation ───────────────────────────────────────────

/// Public endpoint → private address mapping, as fetched in bulk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressMapping {
    pub public_endpoint: String,
    pub private_address: String,
    /// Destination traffic state; denied mappings never resolve.
    #[serde(default = "default_true")]
    pub traffic_allowed: bool,
    #[serde(default)]
    pub last_refreshed_at: u64,
}

fn default_true() -> bool {
    true
}

// ── Notifications ─────────────────────────────────────────────────

/// "Container stopped" notification from the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskStoppedEvent {
    pub task_id: TaskId,
    #[serde(default)]
    pub cluster: Option<String>,
    /// Orchestrator `lastStatus`; anything other than `STOPPED` is ignored.
    #[serde(default)]
    pub last_status: Option<String>,
    #[serde(default)]
    pub private_address: Option<String>,
}

/// Why a ticket ended without a placement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Failed,
    TimedOut,
    Cancelled,
}

/// Matchmaking outcome carried by a notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchOutcome {
    Succeeded {
        private_address: String,
        #[serde(default)]
        player_session_id: Option<String>,
    },
    Failed {
        reason: FailureReason,
    },
}

/// Matchmaking completion or failure notification for one ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchEvent {
    pub ticket_id: TicketId,
    pub player_id: PlayerId,
    pub outcome: MatchOutcome,
}

// ── Player connection records ─────────────────────────────────────

/// Lifecycle of a persisted player-connection record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// Placed, but the public endpoint was not resolvable yet.
    Pending,
    /// Placed with a resolved public endpoint.
    Matched,
    /// The client has read the resolved endpoint.
    Delivered,
    /// Terminal: the ticket never produced a placement.
    Failed { reason: FailureReason },
}

impl AssignmentStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, AssignmentStatus::Pending)
    }
}

/// Durable player-connection record, keyed by ticket id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchAssignment {
    pub ticket_id: TicketId,
    pub player_id: PlayerId,
    pub assigned_unit_private_address: Option<String>,
    pub resolved_public_endpoint: Option<String>,
    #[serde(default)]
    pub player_session_id: Option<String>,
    pub status: AssignmentStatus,
    pub assigned_at: u64,
    pub updated_at: u64,
}

impl MatchAssignment {
    /// A placement whose endpoint may or may not be resolved yet.
    pub fn placed(
        event_ticket: &str,
        player_id: &str,
        private_address: &str,
        player_session_id: Option<String>,
        public_endpoint: Option<String>,
        now: u64,
    ) -> Self {
        let status = if public_endpoint.is_some() {
            AssignmentStatus::Matched
        } else {
            AssignmentStatus::Pending
        };
        Self {
            ticket_id: event_ticket.to_string(),
            player_id: player_id.to_string(),
            assigned_unit_private_address: Some(private_address.to_string()),
            resolved_public_endpoint: public_endpoint,
            player_session_id,
            status,
            assigned_at: now,
            updated_at: now,
        }
    }

    /// A terminal failure record.
    pub fn failed(ticket_id: &str, player_id: &str, reason: FailureReason, now: u64) -> Self {
        Self {
            ticket_id: ticket_id.to_string(),
            player_id: player_id.to_string(),
            assigned_unit_private_address: None,
            resolved_public_endpoint: None,
            player_session_id: None,
            status: AssignmentStatus::Failed { reason },
            assigned_at: now,
            updated_at: now,
        }
    }
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_id_strips_arn_prefix() {
        assert_eq!(
            unit_id_from_task("arn:aws:ecs:us-west-2:1:task/game-cluster/abc123"),
            "abc123"
        );
        assert_eq!(unit_id_from_task("abc123"), "abc123");
    }

    #[test]
    fn session_matches_by_compute_name_or_address() {
        let session = SessionInfo {
            session_id: "s1".to_string(),
            host_address: "10.0.0.5:7777".to_string(),
            compute_name: Some("abc123".to_string()),
            status: SessionStatus::Active,
        };
        assert!(session.hosted_on("abc123", None));
        assert!(session.hosted_on("other", Some("10.0.0.5:7777")));
        assert!(!session.hosted_on("other", Some("10.0.0.6:7777")));
        assert!(!session.hosted_on("other", None));
    }

    #[test]
    fn match_event_json_shape() {
        let json = r#"{
            "ticket_id": "t1",
            "player_id": "p1",
            "outcome": { "type": "succeeded", "private_address": "10.0.0.5:7777" }
        }"#;
        let event: MatchEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event.outcome,
            MatchOutcome::Succeeded {
                private_address: "10.0.0.5:7777".to_string(),
                player_session_id: None,
            }
        );

        let json = r#"{
            "ticket_id": "t2",
            "player_id": "p1",
            "outcome": { "type": "failed", "reason": "timed_out" }
        }"#;
        let event: MatchEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event.outcome,
            MatchOutcome::Failed {
                reason: FailureReason::TimedOut
            }
        );
    }

    #[test]
    fn placed_status_follows_endpoint() {
        let pending = MatchAssignment::placed("t1", "p1", "10.0.0.5:7777", None, None, 10);
        assert_eq!(pending.status, AssignmentStatus::Pending);

        let matched = MatchAssignment::placed(
            "t1",
            "p1",
            "10.0.0.5:7777",
            None,
            Some("a1.example.net:10001".to_string()),
            10,
        );
        assert_eq!(matched.status, AssignmentStatus::Matched);
    }
}
