//! fleet.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::duration::parse_duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FleetConfig {
    pub fleet: Option<FleetIdentity>,
    pub scanner: Option<ScannerConfig>,
    pub mapping: Option<MappingConfig>,
    pub router: Option<RouterConfig>,
    pub reconciler: Option<ReconcilerConfig>,
    pub endpoints: Option<EndpointsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetIdentity {
    pub fleet_id: String,
    pub location_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScannerConfig {
    pub interval: Option<String>,
    pub call_timeout: Option<String>,
    pub protection_batch_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MappingConfig {
    pub refresh_interval: Option<String>,
    pub call_timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterConfig {
    pub resolve_attempts: Option<u32>,
    pub resolve_backoff: Option<String>,
    pub resolve_backoff_max: Option<String>,
}

/// Termination reconciler: bounds its registry and session directory calls.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReconcilerConfig {
    pub call_timeout: Option<String>,
}

/// Base addresses (`host:port`) of the external plane gateways.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    pub orchestrator: String,
    pub sessions: String,
    pub registry: String,
    pub translator: String,
}

fn duration_or(value: &Option<String>, default: Duration) -> Duration {
    value.as_deref().and_then(parse_duration).unwrap_or(default)
}

impl ScannerConfig {
    pub fn interval(&self) -> Duration {
        duration_or(&self.interval, Duration::from_secs(60))
    }

    pub fn call_timeout(&self) -> Duration {
        duration_or(&self.call_timeout, Duration::from_secs(5))
    }

    /// The orchestrator answers protection queries for at most 10 tasks.
    pub fn protection_batch_size(&self) -> usize {
        self.protection_batch_size.unwrap_or(10).clamp(1, 10)
    }
}

impl MappingConfig {
    pub fn refresh_interval(&self) -> Duration {
        duration_or(&self.refresh_interval, Duration::from_secs(180))
    }

    pub fn call_timeout(&self) -> Duration {
        duration_or(&self.call_timeout, Duration::from_secs(5))
    }
}

impl RouterConfig {
    pub fn resolve_attempts(&self) -> u32 {
        self.resolve_attempts.unwrap_or(3).max(1)
    }

    pub fn resolve_backoff(&self) -> Duration {
        duration_or(&self.resolve_backoff, Duration::from_millis(200))
    }

    pub fn resolve_backoff_max(&self) -> Duration {
        duration_or(&self.resolve_backoff_max, Duration::from_secs(2))
    }
}

impl ReconcilerConfig {
    pub fn call_timeout(&self) -> Duration {
        duration_or(&self.call_timeout, Duration::from_secs(5))
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn scanner(&self) -> ScannerConfig {
        self.scanner.clone().unwrap_or_default()
    }

    pub fn mapping(&self) -> MappingConfig {
        self.mapping.clone().unwrap_or_default()
    }

    pub fn router(&self) -> RouterConfig {
        self.router.clone().unwrap_or_default()
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        self.reconciler.clone().unwrap_or_default()
    }

    /// Gateway endpoints are mandatory for the daemon.
    pub fn endpoints(&self) -> anyhow::Result<&EndpointsConfig> {
        self.endpoints
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("fleet.toml is missing the [endpoints] section"))
    }
}
