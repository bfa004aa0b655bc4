use crate::inventory::InventoryApi;

use super::error::{DiscoveryError, DiscoveryResult};
use super::path::{ResourcePath, unique_name};

/// Create attempts before name allocation gives up
pub const MAX_NAME_ATTEMPTS: usize = 10;

/// Creates a resource under a unique name, retrying name collisions
///
/// Other creators (including other discovery runs) may take a name between
/// our lookup and our create call, so a collision is expected contention and
/// is retried with a random suffix. Every other error is fatal.
pub struct NameAllocator<'a> {
    api: &'a dyn InventoryApi,
    max_attempts: usize,
}

impl<'a> NameAllocator<'a> {
    pub fn new(api: &'a dyn InventoryApi) -> Self {
        Self {
            api,
            max_attempts: MAX_NAME_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Create the resource and write the name the inventory settled on back into `path`
    pub fn allocate(
        &self,
        path: &mut ResourcePath,
        model: &str,
        address: &str,
    ) -> DiscoveryResult<String> {
        let base = path.name().to_string();
        let mut candidate = base.clone();

        for attempt in 1..=self.max_attempts {
            match self
                .api
                .create_resource(model, &candidate, address, path.folders())
            {
                Ok(name) => {
                    path.set_name(&name);
                    return Ok(name);
                }
                Err(e) if e.is_name_taken() => {
                    tracing::debug!(name = %candidate, attempt, "resource name taken, retrying with suffix");
                    // Always suffix the base so re-runs still match the lookup pattern
                    candidate = unique_name(&base);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(DiscoveryError::NameAllocationExhausted {
            name: base,
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::path::name_pattern;
    use crate::inventory::{InventoryError, MemoryInventory};

    fn prepared(inventory: &MemoryInventory) -> ResourcePath {
        let path = ResourcePath::create("vc", "DC/web");
        path.create_folders(inventory).unwrap();
        path
    }

    #[test]
    fn test_first_attempt_keeps_name() {
        let inventory = MemoryInventory::new();
        let mut path = prepared(&inventory);

        let name = NameAllocator::new(&inventory)
            .allocate(&mut path, "M", "N.A")
            .unwrap();

        assert_eq!(name, "web");
        assert_eq!(path.as_str(), "Discovered VMs/vc/DC/web");
        assert_eq!(inventory.journal().create_attempts, vec!["web".to_string()]);
    }

    #[test]
    fn test_collisions_retry_with_suffix() {
        let inventory = MemoryInventory::new();
        let mut path = prepared(&inventory);
        inventory.force_name_collisions(9);

        let name = NameAllocator::new(&inventory)
            .allocate(&mut path, "M", "N.A")
            .unwrap();

        let attempts = inventory.journal().create_attempts;
        assert_eq!(attempts.len(), 10);
        assert_eq!(attempts[0], "web");
        assert!(name_pattern("web").unwrap().is_match(&name));
        assert_ne!(name, "web");
        assert_eq!(path.name(), name);
    }

    #[test]
    fn test_suffix_is_not_stacked() {
        let inventory = MemoryInventory::new();
        let mut path = prepared(&inventory);
        inventory.force_name_collisions(3);

        NameAllocator::new(&inventory)
            .allocate(&mut path, "M", "N.A")
            .unwrap();

        for attempt in &inventory.journal().create_attempts[1..] {
            assert_eq!(attempt.len(), "web-0000".len(), "unexpected candidate {attempt}");
        }
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let inventory = MemoryInventory::new();
        let mut path = prepared(&inventory);
        inventory.force_name_collisions(10);

        let err = NameAllocator::new(&inventory)
            .allocate(&mut path, "M", "N.A")
            .unwrap_err();

        assert!(matches!(
            err,
            DiscoveryError::NameAllocationExhausted { ref name, attempts: 10 } if name == "web"
        ));
        assert_eq!(path.name(), "web");
        assert!(inventory.resource_names().is_empty());
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let inventory = MemoryInventory::new();
        // Folder never created
        let mut path = ResourcePath::create("vc", "DC/web");

        let err = NameAllocator::new(&inventory)
            .allocate(&mut path, "M", "N.A")
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::Inventory(InventoryError::Api { .. })));
        assert_eq!(inventory.journal().create_attempts.len(), 1);
    }

    #[test]
    fn test_custom_attempt_bound() {
        let inventory = MemoryInventory::new();
        let mut path = prepared(&inventory);
        inventory.force_name_collisions(2);

        let err = NameAllocator::new(&inventory)
            .with_max_attempts(2)
            .allocate(&mut path, "M", "N.A")
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::NameAllocationExhausted { attempts: 2, .. }));
    }
}
