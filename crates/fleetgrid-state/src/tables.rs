//! redb table definitions for the FleetGrid state store.
//!
//! Keys are `&str`, values are JSON-serialized records.

use redb::TableDefinition;

/// Player-connection records keyed by `{ticket_id}`.
pub const ASSIGNMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("assignments");

/// Latest ticket per player, keyed by `{player_id}` with the ticket id as value.
pub const PLAYER_TICKETS: TableDefinition<&str, &str> = TableDefinition::new("player_tickets");
