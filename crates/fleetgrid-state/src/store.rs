//! StateStore — redb-backed persistence for player-connection records.
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use tracing::debug;

use fleetgrid_core::{AssignmentStatus, MatchAssignment};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn decode(bytes: &[u8]) -> StateResult<MatchAssignment> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn encode(record: &MatchAssignment) -> StateResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(map_err!(Serialize))
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        txn.open_table(PLAYER_TICKETS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Insert a record unless one already exists for its ticket.
    ///
    /// Returns `true` if the record was written, `false` if the ticket was
    /// already recorded (duplicate delivery). The player index moves to the
    /// new ticket only if it is at least as recent as the indexed one.
    pub fn insert_if_absent(&self, record: &MatchAssignment) -> StateResult<bool> {
        let value = encode(record)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut assignments = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            if assignments
                .get(record.ticket_id.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                debug!(ticket = %record.ticket_id, "ticket already recorded");
                return Ok(false);
            }
            assignments
                .insert(record.ticket_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut players = txn.open_table(PLAYER_TICKETS).map_err(map_err!(Table))?;
            let indexed_ticket = players
                .get(record.player_id.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string());
            let supersedes = match indexed_ticket {
                Some(ticket) => {
                    let indexed = assignments
                        .get(ticket.as_str())
                        .map_err(map_err!(Read))?
                        .map(|guard| decode(guard.value()))
                        .transpose()?;
                    indexed.is_none_or(|prev| prev.assigned_at <= record.assigned_at)
                }
                None => true,
            };
            if supersedes {
                players
                    .insert(record.player_id.as_str(), record.ticket_id.as_str())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(ticket = %record.ticket_id, player = %record.player_id, "assignment stored");
        Ok(true)
    }

    /// Fill in the public endpoint of a pending record.
    ///
    /// Returns the updated record, or `None` if the ticket is unknown or no
    /// longer pending (a concurrent correction got there first).
    pub fn resolve_pending(
        &self,
        ticket_id: &str,
        public_endpoint: &str,
        now: u64,
    ) -> StateResult<Option<MatchAssignment>> {
        self.update(ticket_id, |record| {
            if !record.status.is_pending() {
                return false;
            }
            record.resolved_public_endpoint = Some(public_endpoint.to_string());
            record.status = AssignmentStatus::Matched;
            record.updated_at = now;
            true
        })
    }

    /// Read a player's latest record, marking a matched record delivered.
    ///
    /// Returns the record as it stands after the transition. Records in any
    /// other state are returned unchanged.
    pub fn acknowledge(&self, player_id: &str, now: u64) -> StateResult<Option<MatchAssignment>> {
        let Some(ticket_id) = self.ticket_for_player(player_id)? else {
            return Ok(None);
        };
        self.update(&ticket_id, |record| {
            if record.status != AssignmentStatus::Matched {
                return false;
            }
            record.status = AssignmentStatus::Delivered;
            record.updated_at = now;
            true
        })?;
        self.get_assignment(&ticket_id)
    }

    /// Apply `change` to a record inside one write transaction.
    ///
    /// The closure returns whether it modified the record; unmodified
    /// records are not rewritten.
    fn update<F>(&self, ticket_id: &str, change: F) -> StateResult<Option<MatchAssignment>>
    where
        F: FnOnce(&mut MatchAssignment) -> bool,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
            let current = table
                .get(ticket_id)
                .map_err(map_err!(Read))?
                .map(|guard| decode(guard.value()))
                .transpose()?;
            let Some(mut record) = current else {
                return Ok(None);
            };
            if !change(&mut record) {
                return Ok(None);
            }
            let value = encode(&record)?;
            table
                .insert(ticket_id, value.as_slice())
                .map_err(map_err!(Write))?;
            updated = record;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(ticket = %ticket_id, status = ?updated.status, "assignment updated");
        Ok(Some(updated))
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Get a record by ticket id.
    pub fn get_assignment(&self, ticket_id: &str) -> StateResult<Option<MatchAssignment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        match table.get(ticket_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Get a player's most recent record.
    pub fn latest_for_player(&self, player_id: &str) -> StateResult<Option<MatchAssignment>> {
        match self.ticket_for_player(player_id)? {
            Some(ticket_id) => self.get_assignment(&ticket_id),
            None => Ok(None),
        }
    }

    fn ticket_for_player(&self, player_id: &str) -> StateResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PLAYER_TICKETS).map_err(map_err!(Table))?;
        Ok(table
            .get(player_id)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string()))
    }

    /// List every record still waiting for a public endpoint.
    pub fn list_pending(&self) -> StateResult<Vec<MatchAssignment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record = decode(value.value())?;
            if record.status.is_pending() {
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Total number of records (all states).
    pub fn count_assignments(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }
}
