use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::inventory::{ResourceDetails, SandboxApi, VmEntry};
use crate::parallel::{ExecutionStrategy, ProgressFn};

use super::error::{DiscoveryError, DiscoveryResult};
use super::path::{ResourcePath, name_pattern};
use super::resource::{AutoloadStatus, ReservationScope, ResourceRecord, ResourceTemplate};

pub const DEFAULT_MAX_WORKERS: usize = 10;

const GET_VMS_COMMAND: &str = "get_vms";

/// One VM from the provider listing, with the inventory path it maps to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmDescriptor {
    /// Position in the provider listing
    pub index: usize,
    pub path: String,
    pub uuid: String,
    pub resource_path: ResourcePath,
}

/// Slice of the VM listing a run processes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryWindow {
    pub start: usize,
    /// `None` processes everything from `start` on
    pub max: Option<usize>,
}

impl DiscoveryWindow {
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.start);
        match self.max {
            Some(max) => iter.take(max).collect(),
            None => iter.collect(),
        }
    }
}

/// Result of discovering a single VM
#[derive(Debug)]
pub enum VmOutcome {
    Discovered(ResourceRecord),
    AutoloadFailed(VmDescriptor),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// VMs reported by the provider
    pub listed: usize,
    /// VMs inside the discovery window
    pub processed: usize,
    /// Full inventory paths of the discovered resources, in listing order
    pub discovered: Vec<String>,
    /// Provider paths of VMs whose autoload failed
    pub failed: Vec<String>,
}

impl DiscoveryReport {
    /// Turn a report with failures into [`DiscoveryError::DiscoveryFailed`]
    pub fn into_result(self) -> DiscoveryResult<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(DiscoveryError::DiscoveryFailed {
                vm_paths: self.failed,
            })
        }
    }
}

/// Reconciles one cloud provider's VMs with the inventory
pub struct DiscoveryOrchestrator {
    api: SandboxApi,
    template: ResourceTemplate,
    max_workers: usize,
    window: DiscoveryWindow,
    progress: Option<Arc<ProgressFn>>,
}

impl DiscoveryOrchestrator {
    pub fn new(api: SandboxApi, template: ResourceTemplate) -> Self {
        Self {
            api,
            template,
            max_workers: DEFAULT_MAX_WORKERS,
            window: DiscoveryWindow::default(),
            progress: None,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_window(mut self, window: DiscoveryWindow) -> Self {
        self.window = window;
        self
    }

    /// Called with `(done, total)` as VMs finish the parallel phase
    pub fn with_progress(mut self, progress: Arc<ProgressFn>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn template(&self) -> &ResourceTemplate {
        &self.template
    }

    /// Discover every VM in the window, failing if any autoload failed
    pub fn discover(&self) -> DiscoveryResult<DiscoveryReport> {
        self.run()?.into_result()
    }

    /// Like [`discover`](Self::discover), but autoload failures stay in the report
    pub fn run(&self) -> DiscoveryResult<DiscoveryReport> {
        let listing = self.list_vms()?;
        let listed = listing.len();
        let vms = self.window.apply(listing);
        let processed = vms.len();
        tracing::info!(
            cloud_provider = %self.template.cp_name,
            listed,
            processed,
            "discovering VMs"
        );

        self.create_folders(&vms)?;

        let width = processed.to_string().len();
        let strategy = ExecutionStrategy::auto(processed, self.max_workers);
        let outcomes = strategy.try_execute(
            vms.into_iter().enumerate().collect(),
            |(position, vm): (usize, VmDescriptor)| {
                tracing::debug!(
                    "{:0>width$}/{processed}: Discovering VM {}",
                    position + 1,
                    vm.path
                );
                self.discover_vm(vm)
            },
            self.progress.as_deref(),
        )?;

        let mut discovered = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                VmOutcome::Discovered(record) => discovered.push(record),
                VmOutcome::AutoloadFailed(vm) => failed.push(vm.path),
            }
        }

        self.refresh_in_batches(&discovered)?;

        tracing::info!(
            cloud_provider = %self.template.cp_name,
            discovered = discovered.len(),
            failed = failed.len(),
            "discovery finished"
        );

        Ok(DiscoveryReport {
            listed,
            processed,
            discovered: discovered
                .iter()
                .map(|record| record.path().to_string())
                .collect(),
            failed,
        })
    }

    /// Delete every resource of the configured model, wherever it lives
    pub fn clear(&self) -> DiscoveryResult<usize> {
        let inventory = self.api.inventory();
        let resources = inventory.find_resources(&self.template.resource_model)?;
        for resource in &resources {
            inventory.delete_resource(&resource.full_path)?;
            tracing::debug!(resource = %resource.full_path, "deleted resource");
        }
        tracing::info!(
            model = %self.template.resource_model,
            deleted = resources.len(),
            "cleared resources"
        );
        Ok(resources.len())
    }

    fn list_vms(&self) -> DiscoveryResult<Vec<VmDescriptor>> {
        let output =
            self.api
                .run_resource_command(&self.template.cp_name, GET_VMS_COMMAND, &BTreeMap::new())?;
        let entries: Vec<VmEntry> =
            serde_json::from_str(&output).map_err(DiscoveryError::InvalidVmListing)?;

        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(index, vm)| VmDescriptor {
                index,
                resource_path: ResourcePath::create(&self.template.cp_name, &vm.path),
                path: vm.path,
                uuid: vm.uuid,
            })
            .collect())
    }

    fn create_folders(&self, vms: &[VmDescriptor]) -> DiscoveryResult<()> {
        let mut created = HashSet::new();
        for vm in vms {
            let folders = vm.resource_path.folders();
            if created.insert(folders.to_string()) {
                vm.resource_path.create_folders(self.api.inventory())?;
            }
        }
        tracing::debug!(folders = created.len(), "created folders");
        Ok(())
    }

    fn discover_vm(&self, mut vm: VmDescriptor) -> DiscoveryResult<VmOutcome> {
        let record = match self.locate(&vm)? {
            Some(details) => {
                tracing::debug!(vm = %vm.path, resource = %details.name, "found existing resource");
                vm.resource_path.set_name(&details.name);
                ResourceRecord::bind(
                    self.api.clone(),
                    &self.template,
                    vm.resource_path.clone(),
                    details.address,
                )
            }
            None => {
                let record = ResourceRecord::create(
                    self.api.clone(),
                    &self.template,
                    &vm.path,
                    Some(vm.resource_path.clone()),
                )?;
                vm.resource_path = record.path().clone();
                record
            }
        };

        if record.autoload()? == AutoloadStatus::Failed {
            return Ok(VmOutcome::AutoloadFailed(vm));
        }

        record.run_in_reservation(|r| Ok(r.refresh_ip()?))?;
        Ok(VmOutcome::Discovered(record))
    }

    /// Existing resource for this VM: matching name and same VM uid
    fn locate(&self, vm: &VmDescriptor) -> DiscoveryResult<Option<ResourceDetails>> {
        let pattern = name_pattern(vm.resource_path.name())?;
        let candidates = self.api.iterate_resources(vm.resource_path.folders())?;

        for name in candidates.into_iter().filter(|name| pattern.is_match(name)) {
            let details = self.api.inventory().resource_details(&name)?;
            if details.vm_uid.as_deref() == Some(vm.uuid.as_str()) {
                return Ok(Some(ResourceDetails { name, ..details }));
            }
        }
        Ok(None)
    }

    /// Refresh VM details chunk by chunk, parking each chunk in the reservation
    fn refresh_in_batches(&self, discovered: &[ResourceRecord]) -> DiscoveryResult<()> {
        for chunk in discovered.chunks(self.max_workers) {
            let names = chunk.iter().map(|r| r.name().to_string()).collect();
            let scope = ReservationScope::acquire(&self.api, names)?;
            match self.api.refresh_vm_details(None) {
                Ok(()) => {}
                Err(e) if e.is_api() => {
                    tracing::debug!(resources = ?scope.resources(), error = %e, "VM details refresh failed");
                }
                Err(e) => return Err(e.into()),
            }
            scope.release()?;
        }
        Ok(())
    }
}
