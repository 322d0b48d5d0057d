//! Mapping refresher — periodic bulk reload of the address mapping cache.
//!
//! Each tick fetches the full mapping table from the address-translation
//! service and swaps it into the cache. A failed fetch leaves the previous
//! snapshot in place; it ages towards staleness until a fetch succeeds.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleetgrid_core::{AddressTranslator, bounded, epoch_secs};

use crate::cache::{AddressMappingCache, MappingSnapshot};

/// Callback invoked after every successful swap with the new snapshot.
///
/// The daemon uses this to re-resolve assignments still waiting for an
/// endpoint.
pub type RefreshCallback = Arc<dyn Fn(Arc<MappingSnapshot>) -> BoxFuture + Send + Sync>;

pub type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Result of one successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshStats {
    pub generation: u64,
    pub fetched: usize,
    pub installed: usize,
}

/// Periodically reloads an [`AddressMappingCache`].
pub struct MappingRefresher {
    translator: Arc<dyn AddressTranslator>,
    cache: AddressMappingCache,
    call_timeout: Duration,
    on_refresh: Option<RefreshCallback>,
}

impl MappingRefresher {
    pub fn new(
        translator: Arc<dyn AddressTranslator>,
        cache: AddressMappingCache,
        call_timeout: Duration,
    ) -> Self {
        Self {
            translator,
            cache,
            call_timeout,
            on_refresh: None,
        }
    }

    /// Set a callback to run after each successful swap.
    pub fn with_callback(mut self, callback: RefreshCallback) -> Self {
        self.on_refresh = Some(callback);
        self
    }

    pub fn cache(&self) -> &AddressMappingCache {
        &self.cache
    }

    /// Fetch the mapping table once and install it.
    pub async fn refresh_once(&self) -> anyhow::Result<RefreshStats> {
        let mappings = bounded(self.call_timeout, self.translator.list_mappings()).await?;
        let fetched = mappings.len();
        let snapshot = self.cache.replace(mappings, epoch_secs());
        let stats = RefreshStats {
            generation: snapshot.generation(),
            fetched,
            installed: snapshot.len(),
        };
        debug!(?stats, "address mappings refreshed");

        if let Some(ref callback) = self.on_refresh {
            callback(snapshot).await;
        }
        Ok(stats)
    }

    /// Run the refresh loop until shutdown. The first refresh is immediate.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "mapping refresher started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_once().await {
                        let age_secs = self.cache.snapshot().age_secs(epoch_secs());
                        warn!(
                            error = %e,
                            age_secs,
                            "mapping refresh failed, keeping previous snapshot"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    info!("mapping refresher shutting down");
                    break;
                }
            }
        }
    }
}
