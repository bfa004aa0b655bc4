//! Configuration management for vmscout
//!
//! Settings are layered with figment: embedded defaults, user config, repository
//! config, an explicit `--config` file, `VMSCOUT_*` environment variables and
//! finally CLI flags. See [`ScoutConfig::load`].

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::discovery::{DiscoveryWindow, ResourceTemplate};
use crate::inventory::HttpInventory;

mod core;
pub mod smart_load;

pub use self::core::CliOverrides;

/// Main configuration structure for vmscout
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ScoutConfig {
    /// Inventory gateway connection
    pub inventory: InventoryConfig,

    /// What to discover and how
    pub discovery: DiscoveryConfig,

    /// Reservation used while discovering
    pub reservation: ReservationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryConfig {
    /// Base URL of the inventory gateway
    pub url: String,

    /// Bearer token; empty sends no Authorization header
    #[serde(default)]
    pub token: String,

    /// Per-request timeout (seconds)
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Cloud provider resource names, separated by ',' or ';'
    pub cloud_providers: String,

    /// Model of the resources created for discovered VMs
    pub resource_model: String,

    /// Model of the ports on those resources
    pub port_model: String,

    /// Width of the worker pool
    pub max_workers: usize,

    /// Number of VMs to discover; 0 means all of them
    #[serde(default)]
    pub discover_max_vms: usize,

    /// Index of the first VM in the provider listing to discover
    #[serde(default)]
    pub start_discover_from: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReservationConfig {
    pub name_prefix: String,

    /// Empty picks the first user known to the inventory
    #[serde(default)]
    pub owner: String,

    pub duration_minutes: u32,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9000/api".to_string(),
            token: String::new(),
            timeout_secs: 120,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cloud_providers: "vcenter".to_string(),
            resource_model: "Generic Static VM 2G".to_string(),
            port_model: "Generic Static VM 2G.GenericVPort".to_string(),
            max_workers: crate::discovery::DEFAULT_MAX_WORKERS,
            discover_max_vms: 0,
            start_discover_from: 0,
        }
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            name_prefix: "Quali CloudProvider Autodiscovery".to_string(),
            owner: String::new(),
            duration_minutes: 120,
        }
    }
}

impl InventoryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn token(&self) -> Option<&str> {
        Some(self.token.as_str()).filter(|t| !t.is_empty())
    }

    /// Build the HTTP client for the configured gateway
    pub fn connect(&self) -> Result<HttpInventory> {
        HttpInventory::new(&self.url, self.token(), self.timeout())
            .with_context(|| format!("Failed to set up inventory client for {}", self.url))
    }
}

impl DiscoveryConfig {
    /// Provider names split on ',' and ';', trimmed, empties dropped
    pub fn cloud_provider_names(&self) -> Vec<String> {
        self.cloud_providers
            .split([',', ';'])
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn window(&self) -> DiscoveryWindow {
        DiscoveryWindow {
            start: self.start_discover_from,
            max: (self.discover_max_vms > 0).then_some(self.discover_max_vms),
        }
    }

    pub fn template(&self, cp_name: &str) -> ResourceTemplate {
        ResourceTemplate::new(cp_name, &self.resource_model, &self.port_model)
    }
}

impl ReservationConfig {
    pub fn reservation_name(&self, cp_name: &str) -> String {
        format!("{} - {cp_name}", self.name_prefix)
    }

    pub fn owner(&self) -> Option<&str> {
        Some(self.owner.as_str()).filter(|o| !o.is_empty())
    }
}

impl ScoutConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.inventory.url.trim().is_empty() {
            anyhow::bail!("Inventory URL cannot be empty");
        }
        if self.inventory.timeout_secs == 0 {
            anyhow::bail!("Inventory timeout cannot be 0");
        }

        if self.discovery.cloud_provider_names().is_empty() {
            anyhow::bail!("At least one cloud provider must be specified");
        }
        if self.discovery.resource_model.trim().is_empty() {
            anyhow::bail!("Resource model cannot be empty");
        }
        if self.discovery.port_model.trim().is_empty() {
            anyhow::bail!("Port model cannot be empty");
        }
        if self.discovery.max_workers == 0 {
            anyhow::bail!("Worker count cannot be 0");
        }

        if self.reservation.duration_minutes == 0 {
            anyhow::bail!("Reservation duration cannot be 0");
        }

        Ok(())
    }
}
