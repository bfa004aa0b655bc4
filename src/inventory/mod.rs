//! Inventory system collaborator
//!
//! Discovery never talks to the inventory system directly. Every call goes
//! through the [`InventoryApi`] trait, which keeps the orchestrator independent
//! of the transport. Two backends ship with the crate:
//!
//! - [`HttpInventory`]: blocking JSON client for an inventory gateway
//! - [`MemoryInventory`]: in-process inventory with scripted failures, used by the tests
//!
//! All calls are blocking round trips. Implementations must be shareable
//! across worker threads.

use std::collections::BTreeMap;

mod http;
mod memory;
mod sandbox;
mod types;

pub use http::HttpInventory;
pub use memory::{Journal, MemoryInventory};
pub use sandbox::{Sandbox, SandboxApi};
pub use types::{
    EntryKind, FolderEntry, InventoryError, InventoryResult, NAME_EXISTS_CODE, ReservationSummary,
    ResourceDetails, ResourceSummary, VmEntry,
};

/// Operations the discovery core needs from an inventory system
pub trait InventoryApi: Send + Sync {
    /// Run a named command on a resource inside a reservation and return its output
    fn execute_command(
        &self,
        reservation_id: &str,
        resource: &str,
        command: &str,
        params: &BTreeMap<String, String>,
    ) -> InventoryResult<String>;

    /// Run a command exposed by a resource's connected service (e.g. IP refresh)
    fn execute_connected_command(
        &self,
        reservation_id: &str,
        resource: &str,
        command: &str,
        tag: &str,
    ) -> InventoryResult<String>;

    /// Create a resource and return the name the inventory actually assigned.
    ///
    /// Fails with an [`InventoryError::Api`] carrying [`NAME_EXISTS_CODE`] when
    /// the name is already taken.
    fn create_resource(
        &self,
        model: &str,
        name: &str,
        address: &str,
        folder: &str,
    ) -> InventoryResult<String>;

    /// Delete a resource by name or full path
    fn delete_resource(&self, resource: &str) -> InventoryResult<()>;

    fn set_attributes(
        &self,
        resource: &str,
        attributes: &BTreeMap<String, String>,
    ) -> InventoryResult<()>;

    fn autoload(&self, resource: &str) -> InventoryResult<()>;

    fn resource_details(&self, resource: &str) -> InventoryResult<ResourceDetails>;

    /// Every resource of the given model, regardless of folder
    fn find_resources(&self, model: &str) -> InventoryResult<Vec<ResourceSummary>>;

    fn folder_content(&self, folder: &str) -> InventoryResult<Vec<FolderEntry>>;

    /// Ensure the whole folder chain exists
    fn create_folder(&self, path: &str) -> InventoryResult<()>;

    fn add_to_reservation(&self, reservation_id: &str, resources: &[String])
    -> InventoryResult<()>;

    fn remove_from_reservation(
        &self,
        reservation_id: &str,
        resources: &[String],
    ) -> InventoryResult<()>;

    /// Refresh VM details for the given resources, or for every app in the
    /// reservation when `resources` is `None`
    fn refresh_vm_details(
        &self,
        reservation_id: &str,
        resources: Option<&[String]>,
    ) -> InventoryResult<()>;

    fn create_reservation(
        &self,
        name: &str,
        owner: &str,
        duration_minutes: u32,
    ) -> InventoryResult<String>;

    fn end_reservation(&self, reservation_id: &str) -> InventoryResult<()>;

    /// Active reservations owned by `owner`
    fn current_reservations(&self, owner: &str) -> InventoryResult<Vec<ReservationSummary>>;

    fn users(&self) -> InventoryResult<Vec<String>>;
}
