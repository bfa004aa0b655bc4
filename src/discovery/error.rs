use crate::inventory::InventoryError;
use crate::parallel::WorkerPanicked;

/// Errors that abort a discovery or clear run
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("cloud provider returned an unreadable VM listing: {0}")]
    InvalidVmListing(#[source] serde_json::Error),

    #[error("invalid resource name pattern: {0}")]
    NamePattern(#[from] regex::Error),

    /// Every create attempt collided with an existing resource name
    #[error("could not allocate a unique resource name for '{name}' after {attempts} attempts")]
    NameAllocationExhausted { name: String, attempts: usize },

    /// Autoload failed for at least one VM; details are in the logs
    #[error("Discovery failed for {vm_paths:?}. See logs for details")]
    DiscoveryFailed { vm_paths: Vec<String> },

    #[error(transparent)]
    WorkerPanicked(#[from] WorkerPanicked),
}

pub type DiscoveryResult<T> = std::result::Result<T, DiscoveryError>;
