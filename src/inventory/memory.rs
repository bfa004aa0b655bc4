use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{
    EntryKind, FolderEntry, InventoryApi, InventoryError, InventoryResult, NAME_EXISTS_CODE,
    ReservationSummary, ResourceDetails, ResourceSummary, VmEntry,
};

const NOT_FOUND_CODE: &str = "100";
const COMMAND_FAILED_CODE: &str = "102";
const RESERVATION_CODE: &str = "103";

/// Calls recorded by [`MemoryInventory`], in the order they happened
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Journal {
    pub created_folders: Vec<String>,
    pub create_attempts: Vec<String>,
    pub autoloads: Vec<String>,
    /// Delete arguments as given, bare name or full path
    pub deleted: Vec<String>,
    pub reservation_adds: Vec<Vec<String>>,
    pub reservation_removes: Vec<Vec<String>>,
    pub ip_refreshes: Vec<String>,
    pub detail_refreshes: Vec<Option<Vec<String>>>,
}

#[derive(Debug, Clone)]
struct StoredResource {
    model: String,
    folder: String,
    address: String,
    attributes: BTreeMap<String, String>,
    vm_uid: Option<String>,
}

#[derive(Debug)]
struct StoredReservation {
    name: String,
    owner: String,
    members: BTreeSet<String>,
    active: bool,
}

#[derive(Debug, Default)]
struct State {
    vms: HashMap<String, Vec<VmEntry>>,
    resources: BTreeMap<String, StoredResource>,
    folders: BTreeSet<String>,
    reservations: BTreeMap<String, StoredReservation>,
    users: Vec<String>,
    next_reservation: u64,
    forced_collisions: usize,
    failing_autoloads: HashSet<String>,
    powered_off: HashSet<String>,
    failing_detail_refresh: bool,
    journal: Journal,
}

/// Thread-safe in-process inventory
///
/// Resource names are globally unique, like in the real inventory. Autoload
/// binds a resource to its VM by looking the `<model>.VM Name` attribute up in
/// the provider's VM listing. Failures can be scripted per VM path.
#[derive(Debug)]
pub struct MemoryInventory {
    state: Mutex<State>,
    latency: Option<Duration>,
    autoloads_in_flight: AtomicUsize,
    max_autoloads_in_flight: AtomicUsize,
}

impl Default for MemoryInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInventory {
    pub fn new() -> Self {
        let state = State {
            users: vec!["admin".to_string()],
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
            latency: None,
            autoloads_in_flight: AtomicUsize::new(0),
            max_autoloads_in_flight: AtomicUsize::new(0),
        }
    }

    /// Register the VM listing returned by `get_vms` on `cloud_provider`
    pub fn with_vms(self, cloud_provider: &str, vms: Vec<VmEntry>) -> Self {
        self.set_vms(cloud_provider, vms);
        self
    }

    pub fn with_users<S: Into<String>>(self, users: Vec<S>) -> Self {
        self.state().users = users.into_iter().map(Into::into).collect();
        self
    }

    /// Make every autoload take at least `latency`, so overlapping workers are observable
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_vms(&self, cloud_provider: &str, vms: Vec<VmEntry>) {
        self.state().vms.insert(cloud_provider.to_string(), vms);
    }

    /// Autoload fails for resources bound to this VM path
    pub fn fail_autoload_for(&self, vm_path: &str) {
        self.state().failing_autoloads.insert(vm_path.to_string());
    }

    /// IP refresh fails for resources bound to this VM path, as for a powered-off VM
    pub fn power_off(&self, vm_path: &str) {
        self.state().powered_off.insert(vm_path.to_string());
    }

    /// The next `count` create calls report a name collision regardless of the name
    pub fn force_name_collisions(&self, count: usize) {
        self.state().forced_collisions = count;
    }

    pub fn fail_detail_refresh(&self, fail: bool) {
        self.state().failing_detail_refresh = fail;
    }

    /// Insert a resource directly, as if created by an earlier run
    pub fn seed_resource(
        &self,
        model: &str,
        folder: &str,
        name: &str,
        vm_uid: Option<&str>,
    ) {
        let mut state = self.state();
        insert_folder_chain(&mut state.folders, folder);
        state.resources.insert(
            name.to_string(),
            StoredResource {
                model: model.to_string(),
                folder: folder.to_string(),
                address: "N.A".to_string(),
                attributes: BTreeMap::new(),
                vm_uid: vm_uid.map(str::to_string),
            },
        );
    }

    /// Change the address a seeded resource reports
    pub fn set_address(&self, name: &str, address: &str) {
        if let Some(stored) = self.state().resources.get_mut(name) {
            stored.address = address.to_string();
        }
    }

    pub fn journal(&self) -> Journal {
        self.state().journal.clone()
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.state().resources.keys().cloned().collect()
    }

    /// Full paths (`folder/name`) of every resource
    pub fn resource_paths(&self) -> Vec<String> {
        self.state()
            .resources
            .iter()
            .map(|(name, resource)| format!("{}/{}", resource.folder, name))
            .collect()
    }

    pub fn attribute(&self, resource: &str, key: &str) -> Option<String> {
        self.state()
            .resources
            .get(resource)
            .and_then(|r| r.attributes.get(key).cloned())
    }

    pub fn has_folder(&self, folder: &str) -> bool {
        self.state().folders.contains(folder)
    }

    pub fn is_reservation_active(&self, reservation_id: &str) -> bool {
        self.state()
            .reservations
            .get(reservation_id)
            .is_some_and(|r| r.active)
    }

    pub fn reservation_members(&self, reservation_id: &str) -> Vec<String> {
        self.state()
            .reservations
            .get(reservation_id)
            .map(|r| r.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Highest number of autoloads observed running at the same time
    pub fn max_concurrent_autoloads(&self) -> usize {
        self.max_autoloads_in_flight.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found(what: &str, name: &str) -> InventoryError {
    InventoryError::api(NOT_FOUND_CODE, format!("{what} '{name}' not found"))
}

fn insert_folder_chain(folders: &mut BTreeSet<String>, path: &str) {
    let mut current = String::new();
    for segment in path.split('/') {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        folders.insert(current.clone());
    }
}

impl State {
    fn active_reservation(&mut self, reservation_id: &str) -> InventoryResult<&mut StoredReservation> {
        match self.reservations.get_mut(reservation_id) {
            Some(reservation) if reservation.active => Ok(reservation),
            Some(_) => Err(InventoryError::api(
                RESERVATION_CODE,
                format!("reservation '{reservation_id}' has ended"),
            )),
            None => Err(not_found("reservation", reservation_id)),
        }
    }

    /// Resolve either a bare resource name or a `folder/name` full path
    fn resolve(&self, resource: &str) -> Option<String> {
        if self.resources.contains_key(resource) {
            return Some(resource.to_string());
        }
        let (folder, name) = resource.rsplit_once('/')?;
        self.resources
            .get(name)
            .filter(|r| r.folder == folder)
            .map(|_| name.to_string())
    }

    fn vm_path_of(&self, resource: &StoredResource) -> Option<String> {
        resource
            .attributes
            .get(&format!("{}.VM Name", resource.model))
            .cloned()
    }
}

impl InventoryApi for MemoryInventory {
    fn execute_command(
        &self,
        reservation_id: &str,
        resource: &str,
        command: &str,
        _params: &BTreeMap<String, String>,
    ) -> InventoryResult<String> {
        let mut state = self.state();
        state.active_reservation(reservation_id)?;
        match command {
            "get_vms" => {
                let vms = state
                    .vms
                    .get(resource)
                    .ok_or_else(|| not_found("cloud provider", resource))?;
                Ok(serde_json::to_string(vms)?)
            }
            other => Err(InventoryError::api(
                COMMAND_FAILED_CODE,
                format!("command '{other}' is not supported by '{resource}'"),
            )),
        }
    }

    fn execute_connected_command(
        &self,
        reservation_id: &str,
        resource: &str,
        command: &str,
        _tag: &str,
    ) -> InventoryResult<String> {
        let mut state = self.state();
        if !state.active_reservation(reservation_id)?.members.contains(resource) {
            return Err(InventoryError::api(
                RESERVATION_CODE,
                format!("'{resource}' is not part of reservation '{reservation_id}'"),
            ));
        }
        let stored = state
            .resources
            .get(resource)
            .ok_or_else(|| not_found("resource", resource))?;
        if command != "remote_refresh_ip" {
            return Err(InventoryError::api(
                COMMAND_FAILED_CODE,
                format!("connected command '{command}' is not supported"),
            ));
        }
        if let Some(vm_path) = state.vm_path_of(stored) {
            if state.powered_off.contains(&vm_path) {
                return Err(InventoryError::api(
                    COMMAND_FAILED_CODE,
                    format!("VM '{vm_path}' is powered off"),
                ));
            }
        }
        state.journal.ip_refreshes.push(resource.to_string());
        Ok(String::new())
    }

    fn create_resource(
        &self,
        model: &str,
        name: &str,
        address: &str,
        folder: &str,
    ) -> InventoryResult<String> {
        let mut state = self.state();
        state.journal.create_attempts.push(name.to_string());
        if state.forced_collisions > 0 {
            state.forced_collisions -= 1;
            return Err(InventoryError::api(
                NAME_EXISTS_CODE,
                format!("resource '{name}' already exists"),
            ));
        }
        if state.resources.contains_key(name) {
            return Err(InventoryError::api(
                NAME_EXISTS_CODE,
                format!("resource '{name}' already exists"),
            ));
        }
        if !state.folders.contains(folder) {
            return Err(not_found("folder", folder));
        }
        state.resources.insert(
            name.to_string(),
            StoredResource {
                model: model.to_string(),
                folder: folder.to_string(),
                address: address.to_string(),
                attributes: BTreeMap::new(),
                vm_uid: None,
            },
        );
        Ok(name.to_string())
    }

    fn delete_resource(&self, resource: &str) -> InventoryResult<()> {
        let mut state = self.state();
        let name = state
            .resolve(resource)
            .ok_or_else(|| not_found("resource", resource))?;
        state.resources.remove(&name);
        for reservation in state.reservations.values_mut() {
            reservation.members.remove(&name);
        }
        state.journal.deleted.push(resource.to_string());
        Ok(())
    }

    fn set_attributes(
        &self,
        resource: &str,
        attributes: &BTreeMap<String, String>,
    ) -> InventoryResult<()> {
        let mut state = self.state();
        let stored = state
            .resources
            .get_mut(resource)
            .ok_or_else(|| not_found("resource", resource))?;
        stored
            .attributes
            .extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn autoload(&self, resource: &str) -> InventoryResult<()> {
        let in_flight = self.autoloads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_autoloads_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }
        let result = self.bind_vm(resource);
        self.autoloads_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn resource_details(&self, resource: &str) -> InventoryResult<ResourceDetails> {
        let state = self.state();
        let stored = state
            .resources
            .get(resource)
            .ok_or_else(|| not_found("resource", resource))?;
        Ok(ResourceDetails {
            name: resource.to_string(),
            address: stored.address.clone(),
            vm_uid: stored.vm_uid.clone(),
        })
    }

    fn find_resources(&self, model: &str) -> InventoryResult<Vec<ResourceSummary>> {
        Ok(self
            .state()
            .resources
            .iter()
            .filter(|(_, r)| r.model == model)
            .map(|(name, r)| ResourceSummary {
                name: name.clone(),
                full_path: format!("{}/{}", r.folder, name),
                model: r.model.clone(),
            })
            .collect())
    }

    fn folder_content(&self, folder: &str) -> InventoryResult<Vec<FolderEntry>> {
        let state = self.state();
        if !state.folders.contains(folder) {
            return Err(not_found("folder", folder));
        }
        let prefix = format!("{folder}/");
        let sub_folders = state
            .folders
            .iter()
            .filter_map(|f| f.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(|name| FolderEntry {
                name: name.to_string(),
                kind: EntryKind::Folder,
            });
        let resources = state
            .resources
            .iter()
            .filter(|(_, r)| r.folder == folder)
            .map(|(name, _)| FolderEntry {
                name: name.clone(),
                kind: EntryKind::Resource,
            });
        Ok(sub_folders.chain(resources).collect())
    }

    fn create_folder(&self, path: &str) -> InventoryResult<()> {
        let mut state = self.state();
        state.journal.created_folders.push(path.to_string());
        insert_folder_chain(&mut state.folders, path);
        Ok(())
    }

    fn add_to_reservation(
        &self,
        reservation_id: &str,
        resources: &[String],
    ) -> InventoryResult<()> {
        let mut state = self.state();
        if let Some(missing) = resources.iter().find(|r| !state.resources.contains_key(*r)) {
            return Err(not_found("resource", missing));
        }
        state
            .active_reservation(reservation_id)?
            .members
            .extend(resources.iter().cloned());
        state.journal.reservation_adds.push(resources.to_vec());
        Ok(())
    }

    fn remove_from_reservation(
        &self,
        reservation_id: &str,
        resources: &[String],
    ) -> InventoryResult<()> {
        let mut state = self.state();
        let reservation = state.active_reservation(reservation_id)?;
        for resource in resources {
            reservation.members.remove(resource);
        }
        state.journal.reservation_removes.push(resources.to_vec());
        Ok(())
    }

    fn refresh_vm_details(
        &self,
        reservation_id: &str,
        resources: Option<&[String]>,
    ) -> InventoryResult<()> {
        let mut state = self.state();
        state.active_reservation(reservation_id)?;
        if state.failing_detail_refresh {
            return Err(InventoryError::api(
                COMMAND_FAILED_CODE,
                "VM details refresh failed",
            ));
        }
        state
            .journal
            .detail_refreshes
            .push(resources.map(<[String]>::to_vec));
        Ok(())
    }

    fn create_reservation(
        &self,
        name: &str,
        owner: &str,
        _duration_minutes: u32,
    ) -> InventoryResult<String> {
        let mut state = self.state();
        state.next_reservation += 1;
        let id = format!("rsv-{}", state.next_reservation);
        state.reservations.insert(
            id.clone(),
            StoredReservation {
                name: name.to_string(),
                owner: owner.to_string(),
                members: BTreeSet::new(),
                active: true,
            },
        );
        Ok(id)
    }

    fn end_reservation(&self, reservation_id: &str) -> InventoryResult<()> {
        let mut state = self.state();
        let reservation = state.active_reservation(reservation_id)?;
        reservation.active = false;
        reservation.members.clear();
        Ok(())
    }

    fn current_reservations(&self, owner: &str) -> InventoryResult<Vec<ReservationSummary>> {
        Ok(self
            .state()
            .reservations
            .iter()
            .filter(|(_, r)| r.active && r.owner == owner)
            .map(|(id, r)| ReservationSummary {
                id: id.clone(),
                name: r.name.clone(),
            })
            .collect())
    }

    fn users(&self) -> InventoryResult<Vec<String>> {
        Ok(self.state().users.clone())
    }
}

impl MemoryInventory {
    fn bind_vm(&self, resource: &str) -> InventoryResult<()> {
        let mut state = self.state();
        state.journal.autoloads.push(resource.to_string());
        let stored = state
            .resources
            .get(resource)
            .ok_or_else(|| not_found("resource", resource))?;
        let Some(vm_path) = state.vm_path_of(stored) else {
            // Bound earlier without attributes, e.g. a seeded resource
            if stored.vm_uid.is_some() {
                return Ok(());
            }
            return Err(InventoryError::api(
                COMMAND_FAILED_CODE,
                format!("'{resource}' has no VM Name"),
            ));
        };
        if state.failing_autoloads.contains(&vm_path) {
            return Err(InventoryError::api(
                COMMAND_FAILED_CODE,
                format!("autoload of '{resource}' failed"),
            ));
        }
        let cp_name = stored
            .attributes
            .get(&format!("{}.Cloud Provider Resource Name", stored.model))
            .cloned();
        let uuid = state
            .vms
            .iter()
            .filter(|(cp, _)| cp_name.as_deref().is_none_or(|name| name == cp.as_str()))
            .flat_map(|(_, vms)| vms.iter())
            .find(|vm| vm.path == vm_path)
            .map(|vm| vm.uuid.clone())
            .ok_or_else(|| not_found("VM", &vm_path))?;
        if let Some(stored) = state.resources.get_mut(resource) {
            stored.vm_uid = Some(uuid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_requires_folder_and_unique_name() {
        let inventory = MemoryInventory::new();
        assert!(inventory.create_resource("M", "vm1", "N.A", "Root/DC").is_err());

        inventory.create_folder("Root/DC").unwrap();
        assert_eq!(inventory.create_resource("M", "vm1", "N.A", "Root/DC").unwrap(), "vm1");

        let err = inventory.create_resource("M", "vm1", "N.A", "Root/DC").unwrap_err();
        assert!(err.is_name_taken());
    }

    #[test]
    fn test_folder_chain_is_created() {
        let inventory = MemoryInventory::new();
        inventory.create_folder("Root/cp/DC").unwrap();

        assert!(inventory.has_folder("Root"));
        assert!(inventory.has_folder("Root/cp"));
        let content = inventory.folder_content("Root").unwrap();
        assert_eq!(content, vec![FolderEntry { name: "cp".into(), kind: EntryKind::Folder }]);
    }

    #[test]
    fn test_delete_by_full_path() {
        let inventory = MemoryInventory::new();
        inventory.seed_resource("M", "Root/DC", "vm1", None);

        inventory.delete_resource("Root/DC/vm1").unwrap();
        assert!(inventory.resource_names().is_empty());
    }

    #[test]
    fn test_autoload_binds_vm_uid() {
        let inventory = MemoryInventory::new().with_vms("vc", vec![VmEntry::new("DC/vm1", "u1")]);
        inventory.seed_resource("M", "Root/DC", "vm1", None);
        inventory
            .set_attributes(
                "vm1",
                &BTreeMap::from([
                    ("M.VM Name".to_string(), "DC/vm1".to_string()),
                    ("M.Cloud Provider Resource Name".to_string(), "vc".to_string()),
                ]),
            )
            .unwrap();

        inventory.autoload("vm1").unwrap();
        assert_eq!(inventory.resource_details("vm1").unwrap().vm_uid.as_deref(), Some("u1"));
    }

    #[test]
    fn test_connected_command_requires_reservation_membership() {
        let inventory = MemoryInventory::new();
        inventory.seed_resource("M", "Root", "vm1", None);
        let rid = inventory.create_reservation("r", "admin", 10).unwrap();

        assert!(inventory.execute_connected_command(&rid, "vm1", "remote_refresh_ip", "connectivity").is_err());

        inventory.add_to_reservation(&rid, &["vm1".to_string()]).unwrap();
        inventory.execute_connected_command(&rid, "vm1", "remote_refresh_ip", "connectivity").unwrap();
        assert_eq!(inventory.journal().ip_refreshes, vec!["vm1".to_string()]);
    }
}
