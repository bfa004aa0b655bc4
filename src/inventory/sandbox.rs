use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{EntryKind, InventoryApi, InventoryError, InventoryResult};

/// Inventory handle bound to a single reservation
///
/// Cheap to clone; every discovered resource keeps its own copy.
#[derive(Clone)]
pub struct SandboxApi {
    api: Arc<dyn InventoryApi>,
    reservation_id: String,
}

impl fmt::Debug for SandboxApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxApi")
            .field("reservation_id", &self.reservation_id)
            .finish_non_exhaustive()
    }
}

impl SandboxApi {
    pub fn new(api: Arc<dyn InventoryApi>, reservation_id: impl Into<String>) -> Self {
        Self {
            api,
            reservation_id: reservation_id.into(),
        }
    }

    pub fn reservation_id(&self) -> &str {
        &self.reservation_id
    }

    /// The unbound inventory, for calls that are not reservation scoped
    pub fn inventory(&self) -> &dyn InventoryApi {
        self.api.as_ref()
    }

    pub fn run_resource_command(
        &self,
        resource: &str,
        command: &str,
        params: &BTreeMap<String, String>,
    ) -> InventoryResult<String> {
        self.api
            .execute_command(&self.reservation_id, resource, command, params)
    }

    pub fn run_connected_command(
        &self,
        resource: &str,
        command: &str,
        tag: &str,
    ) -> InventoryResult<String> {
        self.api
            .execute_connected_command(&self.reservation_id, resource, command, tag)
    }

    pub fn add_to_reservation(&self, resources: &[String]) -> InventoryResult<()> {
        self.api.add_to_reservation(&self.reservation_id, resources)
    }

    pub fn remove_from_reservation(&self, resources: &[String]) -> InventoryResult<()> {
        self.api
            .remove_from_reservation(&self.reservation_id, resources)
    }

    /// `None` refreshes every app currently in the reservation
    pub fn refresh_vm_details(&self, resources: Option<&[String]>) -> InventoryResult<()> {
        self.api.refresh_vm_details(&self.reservation_id, resources)
    }

    /// Names of the resources (not sub-folders) directly inside `folder`
    pub fn iterate_resources(&self, folder: &str) -> InventoryResult<Vec<String>> {
        Ok(self
            .api
            .folder_content(folder)?
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::Resource)
            .map(|entry| entry.name)
            .collect())
    }
}

/// A reservation that lives for one discovery or clear run
///
/// An existing reservation with the same name and owner is reused and left
/// running afterwards; a reservation created here is ended on [`Sandbox::close`]
/// or, failing that, when the sandbox is dropped.
#[derive(Debug)]
pub struct Sandbox {
    api: SandboxApi,
    owned: bool,
    closed: bool,
}

impl Sandbox {
    pub fn open(
        api: Arc<dyn InventoryApi>,
        name: &str,
        owner: Option<&str>,
        duration_minutes: u32,
    ) -> InventoryResult<Self> {
        let owner = match owner {
            Some(owner) if !owner.is_empty() => owner.to_string(),
            _ => api
                .users()?
                .into_iter()
                .next()
                .ok_or(InventoryError::NoUsers)?,
        };

        let existing = api
            .current_reservations(&owner)?
            .into_iter()
            .find(|reservation| reservation.name == name);

        let (reservation_id, owned) = match existing {
            Some(reservation) => {
                tracing::info!(reservation = %reservation.id, name, "reusing existing reservation");
                (reservation.id, false)
            }
            None => {
                let id = api.create_reservation(name, &owner, duration_minutes)?;
                tracing::info!(reservation = %id, name, owner = %owner, duration_minutes, "created reservation");
                (id, true)
            }
        };

        Ok(Self {
            api: SandboxApi::new(api, reservation_id),
            owned,
            closed: false,
        })
    }

    pub fn api(&self) -> &SandboxApi {
        &self.api
    }

    pub fn reservation_id(&self) -> &str {
        self.api.reservation_id()
    }

    /// Whether this sandbox created its reservation (and will end it)
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn close(mut self) -> InventoryResult<()> {
        self.closed = true;
        if self.owned {
            self.api.inventory().end_reservation(self.api.reservation_id())?;
            tracing::info!(reservation = %self.api.reservation_id(), "ended reservation");
        }
        Ok(())
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.closed || !self.owned {
            return;
        }
        if let Err(e) = self.api.inventory().end_reservation(self.api.reservation_id()) {
            tracing::warn!(reservation = %self.api.reservation_id(), error = %e, "failed to end reservation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::MemoryInventory;

    #[test]
    fn test_sandbox_creates_and_ends_reservation() {
        let memory = Arc::new(MemoryInventory::new());
        let sandbox = Sandbox::open(memory.clone(), "Autodiscovery - vc", None, 120).unwrap();
        let id = sandbox.reservation_id().to_string();

        assert!(sandbox.is_owned());
        assert!(memory.is_reservation_active(&id));

        sandbox.close().unwrap();
        assert!(!memory.is_reservation_active(&id));
    }

    #[test]
    fn test_sandbox_reuses_reservation_with_same_name() {
        let memory = Arc::new(MemoryInventory::new());
        let existing = memory.create_reservation("Autodiscovery - vc", "admin", 120).unwrap();

        let sandbox = Sandbox::open(memory.clone(), "Autodiscovery - vc", Some("admin"), 120).unwrap();
        assert_eq!(sandbox.reservation_id(), existing);
        assert!(!sandbox.is_owned());

        sandbox.close().unwrap();
        assert!(memory.is_reservation_active(&existing));
    }

    #[test]
    fn test_dropped_sandbox_still_ends_reservation() {
        let memory = Arc::new(MemoryInventory::new());
        let id = {
            let sandbox = Sandbox::open(memory.clone(), "Autodiscovery - vc", None, 120).unwrap();
            sandbox.reservation_id().to_string()
        };
        assert!(!memory.is_reservation_active(&id));
    }

    #[test]
    fn test_sandbox_without_users_fails() {
        let memory = Arc::new(MemoryInventory::new().with_users(Vec::<String>::new()));
        let err = Sandbox::open(memory, "Autodiscovery - vc", None, 120).unwrap_err();
        assert!(matches!(err, InventoryError::NoUsers));
    }
}
