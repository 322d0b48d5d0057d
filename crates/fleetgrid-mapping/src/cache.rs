//! Address mapping cache with atomic snapshot replacement.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{debug, warn};

use fleetgrid_core::{AddressMapping, epoch_secs};

/// One immutable generation of the mapping table.
#[derive(Debug, Default)]
pub struct MappingSnapshot {
    /// private_address → mapping. Shared between publish attempts.
    entries: Arc<HashMap<String, AddressMapping>>,
    /// Unix seconds at which this generation was fetched.
    refreshed_at: u64,
    /// 0 for the empty snapshot the cache starts with.
    generation: u64,
}

impl MappingSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn refreshed_at(&self) -> u64 {
        self.refreshed_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw entry lookup, ignoring staleness.
    pub fn get(&self, private_address: &str) -> Option<&AddressMapping> {
        self.entries.get(private_address)
    }

    /// Age of this generation at `now`, in seconds.
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.refreshed_at)
    }
}

/// Outcome of resolving a private address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The address has a usable public endpoint.
    Resolved(String),
    /// No mapping yet; retry after the next refresh.
    Unresolved,
    /// The snapshot is too old to route new connections.
    Stale { age_secs: u64 },
}

impl Lookup {
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Lookup::Resolved(endpoint) => Some(endpoint),
            _ => None,
        }
    }
}

/// Shared, lock-free read cache of public endpoint mappings.
///
/// Cloning is cheap; clones share the same snapshot slot.
#[derive(Clone)]
pub struct AddressMappingCache {
    current: Arc<ArcSwap<MappingSnapshot>>,
    /// Snapshots older than this are stale (twice the refresh interval).
    max_age_secs: u64,
}

impl AddressMappingCache {
    /// Create an empty cache for the given refresh interval.
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(MappingSnapshot::default())),
            max_age_secs: refresh_interval.as_secs().saturating_mul(2),
        }
    }

    /// The current snapshot. Hold it to perform several consistent reads.
    pub fn snapshot(&self) -> Arc<MappingSnapshot> {
        self.current.load_full()
    }

    /// Resolve a private address against the current snapshot.
    pub fn lookup(&self, private_address: &str) -> Lookup {
        self.lookup_at(private_address, epoch_secs())
    }

    /// Resolve a private address as of `now` (Unix seconds).
    pub fn lookup_at(&self, private_address: &str, now: u64) -> Lookup {
        let snapshot = self.current.load();
        resolve(&snapshot, private_address, now, self.max_age_secs)
    }

    /// Resolve against a snapshot the caller already holds.
    pub fn lookup_in(
        &self,
        snapshot: &MappingSnapshot,
        private_address: &str,
        now: u64,
    ) -> Lookup {
        resolve(snapshot, private_address, now, self.max_age_secs)
    }

    /// Replace the whole table with a freshly fetched listing.
    ///
    /// Denied mappings are dropped. When two mappings claim the same
    /// private address the first one wins. Returns the installed snapshot.
    pub fn replace(&self, mappings: Vec<AddressMapping>, now: u64) -> Arc<MappingSnapshot> {
        let mut entries: HashMap<String, AddressMapping> = HashMap::with_capacity(mappings.len());
        let mut denied = 0usize;
        for mut mapping in mappings {
            if !mapping.traffic_allowed {
                denied += 1;
                continue;
            }
            mapping.last_refreshed_at = now;
            if let Some(existing) = entries.get(&mapping.private_address) {
                warn!(
                    private_address = %mapping.private_address,
                    kept = %existing.public_endpoint,
                    dropped = %mapping.public_endpoint,
                    "conflicting mappings for private address"
                );
                continue;
            }
            entries.insert(mapping.private_address.clone(), mapping);
        }

        // rcu retries against concurrent writers, so every published
        // snapshot gets a distinct, increasing generation.
        let entries = Arc::new(entries);
        let previous = self.current.rcu(|current| MappingSnapshot {
            entries: Arc::clone(&entries),
            refreshed_at: now,
            generation: current.generation + 1,
        });
        let snapshot = Arc::new(MappingSnapshot {
            entries,
            refreshed_at: now,
            generation: previous.generation + 1,
        });

        debug!(
            generation = snapshot.generation,
            entries = snapshot.len(),
            denied,
            "mapping snapshot swapped"
        );
        snapshot
    }

    pub fn max_age_secs(&self) -> u64 {
        self.max_age_secs
    }
}

fn resolve(
    snapshot: &MappingSnapshot,
    private_address: &str,
    now: u64,
    max_age_secs: u64,
) -> Lookup {
    if snapshot.generation == 0 {
        return Lookup::Unresolved;
    }
    let age_secs = snapshot.age_secs(now);
    if age_secs > max_age_secs {
        return Lookup::Stale { age_secs };
    }
    match snapshot.entries.get(private_address) {
        Some(mapping) => Lookup::Resolved(mapping.public_endpoint.clone()),
        None => Lookup::Unresolved,
    }
}
