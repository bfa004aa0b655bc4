use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::inventory::{InventoryApi, InventoryResult};

/// Root folder every discovered VM lives under
pub const DISCOVERED_VMS_FOLDER: &str = "Discovered VMs";

// Valid chars are A-Za-z0-9 space . - | _ [ ]
static INVALID_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9 .\-|_\[\]]").expect("valid name regex"));

/// Full inventory path of a discovered resource: folder chain plus leaf name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    path: String,
}

impl ResourcePath {
    /// Build the path for a VM reported by `cp_name`.
    ///
    /// Backslashes become `/` and every segment is sanitized.
    pub fn create(cp_name: &str, vm_path: &str) -> Self {
        let normalized = vm_path.replace('\\', "/");
        let sanitized = normalized
            .split('/')
            .map(valid_name)
            .collect::<Vec<_>>()
            .join("/");
        Self {
            path: format!("{}/{}", Self::cp_folder(cp_name), sanitized),
        }
    }

    pub fn cp_folder(cp_name: &str) -> String {
        format!("{DISCOVERED_VMS_FOLDER}/{cp_name}")
    }

    pub fn name(&self) -> &str {
        self.path
            .rsplit_once('/')
            .map_or(self.path.as_str(), |(_, name)| name)
    }

    pub fn folders(&self) -> &str {
        self.path
            .rsplit_once('/')
            .map_or(self.path.as_str(), |(folders, _)| folders)
    }

    /// Replace the leaf name, keeping the folder chain
    pub fn set_name(&mut self, name: &str) {
        self.path = format!("{}/{}", self.folders(), name);
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Ask the inventory to create the folder chain.
    ///
    /// Callers deduplicate; the inventory does not make this cheap.
    pub fn create_folders(&self, api: &dyn InventoryApi) -> InventoryResult<()> {
        api.create_folder(self.folders())
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Replace every character the inventory rejects with `_`
pub fn valid_name(segment: &str) -> Cow<'_, str> {
    INVALID_NAME_CHARS.replace_all(segment, "_")
}

/// `name` plus a 4 character random suffix, e.g. `web-3f9a`
pub fn unique_name(name: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{name}-{}", &id[..4])
}

/// Matches `vm_name` alone or followed by a suffix from [`unique_name`]
pub fn name_pattern(vm_name: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"^{}(-\w{{4}})?$", regex::escape(vm_name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_prefixes_root_and_provider() {
        let path = ResourcePath::create("vcenter", "DC/Cluster/VM1");
        assert_eq!(path.as_str(), "Discovered VMs/vcenter/DC/Cluster/VM1");
        assert_eq!(path.name(), "VM1");
        assert_eq!(path.folders(), "Discovered VMs/vcenter/DC/Cluster");
    }

    #[test]
    fn test_create_normalizes_backslashes() {
        let path = ResourcePath::create("vc", r"DC\Folder\VM1");
        assert_eq!(path.as_str(), "Discovered VMs/vc/DC/Folder/VM1");
    }

    #[test]
    fn test_segments_are_sanitized() {
        let path = ResourcePath::create("vc", "DC (east)/web#1:prod");
        assert_eq!(path.folders(), "Discovered VMs/vc/DC _east_");
        assert_eq!(path.name(), "web_1_prod");
    }

    #[test]
    fn test_valid_characters_are_kept() {
        assert_eq!(valid_name("a-Z 0.9|_[x]"), "a-Z 0.9|_[x]");
        assert_eq!(valid_name("ünïcode"), "_n_code");
        assert_eq!(valid_name("a/b"), "a_b");
    }

    #[test]
    fn test_set_name_keeps_folders() {
        let mut path = ResourcePath::create("vc", "DC/VM1");
        path.set_name("VM1-a1b2");
        assert_eq!(path.as_str(), "Discovered VMs/vc/DC/VM1-a1b2");
        assert_eq!(path.folders(), "Discovered VMs/vc/DC");
    }

    #[test]
    fn test_unique_name_shape() {
        let name = unique_name("vm name");
        let suffix = name.strip_prefix("vm name-").unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_name_pattern() {
        let pattern = name_pattern("vm name").unwrap();
        assert!(pattern.is_match("vm name"));
        assert!(pattern.is_match("vm name-c2d2"));
        assert!(!pattern.is_match("vm name-c2d2x"));
        assert!(!pattern.is_match("vm name2"));
        assert!(!pattern.is_match("other vm name"));
    }

    #[test]
    fn test_name_pattern_escapes_regex_characters() {
        let pattern = name_pattern("web.[1]").unwrap();
        assert!(pattern.is_match("web.[1]-abcd"));
        assert!(!pattern.is_match("webX[1]"));
    }
}
