//! VM discovery: reconcile a cloud provider's VMs with the inventory
//!
//! A run goes through fixed stages:
//!
//! 1. list the provider's VMs (`get_vms`) and map each to a [`ResourcePath`]
//! 2. cut the configured [`DiscoveryWindow`] out of the listing
//! 3. create each distinct folder chain once
//! 4. per VM, on a bounded worker pool: locate or create the resource,
//!    autoload it, refresh its IP inside the reservation
//! 5. refresh VM details in batches of the pool width
//! 6. fail with [`DiscoveryError::DiscoveryFailed`] if any autoload failed
//!
//! Existing resources are found by name pattern plus VM uid, so re-running a
//! discovery never duplicates resources.

mod error;
mod naming;
mod orchestrator;
mod path;
mod resource;

pub use error::{DiscoveryError, DiscoveryResult};
pub use naming::{MAX_NAME_ATTEMPTS, NameAllocator};
pub use orchestrator::{
    DEFAULT_MAX_WORKERS, DiscoveryOrchestrator, DiscoveryReport, DiscoveryWindow, VmDescriptor,
    VmOutcome,
};
pub use path::{DISCOVERED_VMS_FOLDER, ResourcePath, name_pattern, unique_name, valid_name};
pub use resource::{
    AutoloadStatus, CLOUD_PROVIDER_ATTRIBUTE, DEFAULT_ADDRESS, ReservationScope, ResourceRecord,
    ResourceTemplate, VM_NAME_ATTRIBUTE,
};
