use std::collections::BTreeMap;

use crate::inventory::{InventoryResult, SandboxApi};

use super::error::DiscoveryResult;
use super::naming::NameAllocator;
use super::path::ResourcePath;

pub const VM_NAME_ATTRIBUTE: &str = "VM Name";
pub const CLOUD_PROVIDER_ATTRIBUTE: &str = "Cloud Provider Resource Name";
/// Address given to new resources until autoload discovers the real one
pub const DEFAULT_ADDRESS: &str = "N.A";

const REFRESH_IP_COMMAND: &str = "remote_refresh_ip";
const REFRESH_IP_TAG: &str = "connectivity";

/// What every resource created for one cloud provider has in common
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTemplate {
    pub cp_name: String,
    pub resource_model: String,
    pub port_model: String,
}

impl ResourceTemplate {
    pub fn new(
        cp_name: impl Into<String>,
        resource_model: impl Into<String>,
        port_model: impl Into<String>,
    ) -> Self {
        Self {
            cp_name: cp_name.into(),
            resource_model: resource_model.into(),
            port_model: port_model.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoloadStatus {
    Loaded,
    /// The resource was removed from the inventory again
    Failed,
}

/// An inventory resource bound to one VM
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    api: SandboxApi,
    path: ResourcePath,
    cp_name: String,
    resource_model: String,
    port_model: String,
    address: String,
}

impl ResourceRecord {
    /// Create a new resource for `vm_path` and tag it with the VM attributes.
    ///
    /// With `path: None` the path is derived from the VM path and its folders
    /// are created here; a given path is expected to have its folders already.
    pub fn create(
        api: SandboxApi,
        template: &ResourceTemplate,
        vm_path: &str,
        path: Option<ResourcePath>,
    ) -> DiscoveryResult<Self> {
        let mut path = match path {
            Some(path) => path,
            None => {
                let path = ResourcePath::create(&template.cp_name, vm_path);
                path.create_folders(api.inventory())?;
                path
            }
        };

        NameAllocator::new(api.inventory()).allocate(
            &mut path,
            &template.resource_model,
            DEFAULT_ADDRESS,
        )?;

        let record = Self::bind(api, template, path, DEFAULT_ADDRESS);
        record.set_attributes(&[
            (VM_NAME_ATTRIBUTE, vm_path),
            (CLOUD_PROVIDER_ATTRIBUTE, template.cp_name.as_str()),
        ])?;
        tracing::debug!(resource = %record.path, vm = vm_path, "created resource");
        Ok(record)
    }

    /// Wrap a resource that already exists at `path`
    pub fn bind(
        api: SandboxApi,
        template: &ResourceTemplate,
        path: ResourcePath,
        address: impl Into<String>,
    ) -> Self {
        Self {
            api,
            path,
            cp_name: template.cp_name.clone(),
            resource_model: template.resource_model.clone(),
            port_model: template.port_model.clone(),
            address: address.into(),
        }
    }

    pub fn name(&self) -> &str {
        self.path.name()
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn cp_name(&self) -> &str {
        &self.cp_name
    }

    pub fn resource_model(&self) -> &str {
        &self.resource_model
    }

    pub fn port_model(&self) -> &str {
        &self.port_model
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Write attributes, prefixing every key with the resource model
    pub fn set_attributes(&self, attributes: &[(&str, &str)]) -> InventoryResult<()> {
        let namespaced: BTreeMap<String, String> = attributes
            .iter()
            .map(|(key, value)| (format!("{}.{key}", self.resource_model), value.to_string()))
            .collect();
        self.api.inventory().set_attributes(self.name(), &namespaced)
    }

    /// Run the provider's autoload. A rejected autoload deletes the resource.
    pub fn autoload(&self) -> DiscoveryResult<AutoloadStatus> {
        match self.api.inventory().autoload(self.name()) {
            Ok(()) => Ok(AutoloadStatus::Loaded),
            Err(e) if e.is_api() => {
                tracing::error!(resource = %self.path, error = %e, "autoload failed, deleting resource");
                self.api.inventory().delete_resource(self.name())?;
                Ok(AutoloadStatus::Failed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ask the provider to re-read the VM's IP. Needs the resource in the reservation.
    pub fn refresh_ip(&self) -> InventoryResult<()> {
        match self
            .api
            .run_connected_command(self.name(), REFRESH_IP_COMMAND, REFRESH_IP_TAG)
        {
            Err(e) if e.is_api() => {
                // Typically a powered-off VM
                tracing::debug!(resource = %self.path, error = %e, "IP refresh failed");
                Ok(())
            }
            other => other.map(drop),
        }
    }

    pub fn refresh_vm_details(&self) -> InventoryResult<()> {
        let names = [self.name().to_string()];
        match self.api.refresh_vm_details(Some(&names)) {
            Err(e) if e.is_api() => {
                tracing::debug!(resource = %self.path, error = %e, "VM details refresh failed");
                Ok(())
            }
            other => other,
        }
    }

    /// Run `f` with this resource added to the reservation
    ///
    /// The resource is removed again whatever `f` returns. An error from `f`
    /// takes precedence over an error from the removal.
    pub fn run_in_reservation<T, F>(&self, f: F) -> DiscoveryResult<T>
    where
        F: FnOnce(&Self) -> DiscoveryResult<T>,
    {
        let scope = ReservationScope::acquire(&self.api, vec![self.name().to_string()])?;
        let result = f(self);
        let released = scope.release();
        let value = result?;
        released?;
        Ok(value)
    }
}

/// Resources parked in the reservation until released or dropped
#[must_use = "dropping the scope removes the resources from the reservation immediately"]
pub struct ReservationScope<'a> {
    api: &'a SandboxApi,
    resources: Vec<String>,
    released: bool,
}

impl<'a> ReservationScope<'a> {
    pub fn acquire(api: &'a SandboxApi, resources: Vec<String>) -> InventoryResult<Self> {
        api.add_to_reservation(&resources)?;
        Ok(Self {
            api,
            resources,
            released: false,
        })
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn release(mut self) -> InventoryResult<()> {
        self.released = true;
        self.api.remove_from_reservation(&self.resources)
    }
}

impl Drop for ReservationScope<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.api.remove_from_reservation(&self.resources) {
            tracing::warn!(
                reservation = %self.api.reservation_id(),
                resources = ?self.resources,
                error = %e,
                "failed to remove resources from reservation"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryError;
    use crate::inventory::{InventoryApi, InventoryError, MemoryInventory, VmEntry};
    use std::sync::Arc;

    const MODEL: &str = "Generic Static VM 2G";

    fn setup() -> (Arc<MemoryInventory>, SandboxApi, ResourceTemplate) {
        let memory = Arc::new(
            MemoryInventory::new().with_vms("vc", vec![VmEntry::new("DC/web", "u-web")]),
        );
        let rid = memory.create_reservation("test", "admin", 10).unwrap();
        let api = SandboxApi::new(memory.clone(), rid);
        let template = ResourceTemplate::new("vc", MODEL, format!("{MODEL}.GenericVPort"));
        (memory, api, template)
    }

    #[test]
    fn test_create_sets_namespaced_attributes() {
        let (memory, api, template) = setup();
        let record = ResourceRecord::create(api, &template, "DC/web", None).unwrap();

        assert_eq!(record.path().as_str(), "Discovered VMs/vc/DC/web");
        assert_eq!(record.address(), DEFAULT_ADDRESS);
        assert_eq!(
            memory.attribute("web", &format!("{MODEL}.VM Name")).as_deref(),
            Some("DC/web")
        );
        assert_eq!(
            memory
                .attribute("web", &format!("{MODEL}.Cloud Provider Resource Name"))
                .as_deref(),
            Some("vc")
        );
    }

    #[test]
    fn test_autoload_binds_vm() {
        let (memory, api, template) = setup();
        let record = ResourceRecord::create(api, &template, "DC/web", None).unwrap();

        assert_eq!(record.autoload().unwrap(), AutoloadStatus::Loaded);
        assert_eq!(
            memory.resource_details("web").unwrap().vm_uid.as_deref(),
            Some("u-web")
        );
    }

    #[test]
    fn test_failed_autoload_deletes_resource() {
        let (memory, api, template) = setup();
        memory.fail_autoload_for("DC/web");
        let record = ResourceRecord::create(api, &template, "DC/web", None).unwrap();

        assert_eq!(record.autoload().unwrap(), AutoloadStatus::Failed);
        assert!(memory.resource_names().is_empty());
        assert_eq!(memory.journal().deleted, vec!["web".to_string()]);
    }

    #[test]
    fn test_refresh_ip_on_powered_off_vm_is_ignored() {
        let (memory, api, template) = setup();
        memory.power_off("DC/web");
        let record = ResourceRecord::create(api, &template, "DC/web", None).unwrap();

        record.run_in_reservation(|r| Ok(r.refresh_ip()?)).unwrap();
        assert!(memory.journal().ip_refreshes.is_empty());
    }

    #[test]
    fn test_refresh_vm_details_failure_is_ignored() {
        let (memory, api, template) = setup();
        memory.fail_detail_refresh(true);
        let record = ResourceRecord::create(api, &template, "DC/web", None).unwrap();

        record.refresh_vm_details().unwrap();
    }

    #[test]
    fn test_reservation_is_left_after_error() {
        let (memory, api, template) = setup();
        let rid = api.reservation_id().to_string();
        let record = ResourceRecord::create(api, &template, "DC/web", None).unwrap();

        let result: DiscoveryResult<()> = record.run_in_reservation(|r| {
            assert_eq!(memory.reservation_members(&rid), vec![r.name().to_string()]);
            Err(DiscoveryError::Inventory(InventoryError::api("1", "boom")))
        });

        assert!(result.is_err());
        assert!(memory.reservation_members(&rid).is_empty());
        assert_eq!(memory.journal().reservation_removes, vec![vec!["web".to_string()]]);
    }

    #[test]
    fn test_dropped_scope_removes_resources() {
        let (memory, api, template) = setup();
        let rid = api.reservation_id().to_string();
        ResourceRecord::create(api.clone(), &template, "DC/web", None).unwrap();

        {
            let scope = ReservationScope::acquire(&api, vec!["web".to_string()]).unwrap();
            assert_eq!(scope.resources(), ["web".to_string()]);
            assert_eq!(memory.reservation_members(&rid), vec!["web".to_string()]);
        }

        assert!(memory.reservation_members(&rid).is_empty());
    }
}
