use serde::{Deserialize, Serialize};

/// Provider error code reported when a resource name is already taken.
pub const NAME_EXISTS_CODE: &str = "114";

/// Errors surfaced by an inventory backend
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    /// The inventory system processed the call and rejected it
    #[error("inventory API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("inventory transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed inventory response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid inventory client configuration: {0}")]
    Config(String),

    #[error("inventory reported no users to own the reservation")]
    NoUsers,
}

impl InventoryError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// True for provider-side failures, which callers may choose to recover from
    pub fn is_api(&self) -> bool {
        matches!(self, Self::Api { .. })
    }

    /// True when a create call collided with an existing resource name
    pub fn is_name_taken(&self) -> bool {
        matches!(self, Self::Api { code, .. } if code == NAME_EXISTS_CODE)
    }
}

pub type InventoryResult<T> = std::result::Result<T, InventoryError>;

/// One VM as reported by a cloud provider's `get_vms` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmEntry {
    pub path: String,
    pub uuid: String,
}

impl VmEntry {
    pub fn new(path: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            uuid: uuid.into(),
        }
    }
}

/// Live details of an inventory resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDetails {
    pub name: String,
    pub address: String,
    /// Unique identifier of the VM bound to this resource, once autoloaded
    #[serde(default)]
    pub vm_uid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub name: String,
    pub full_path: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Resource,
    Folder,
    #[serde(other)]
    Other,
}

/// A direct child of an inventory folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSummary {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_taken_only_for_collision_code() {
        assert!(InventoryError::api("114", "exists").is_name_taken());
        assert!(!InventoryError::api("115", "other").is_name_taken());
        assert!(!InventoryError::NoUsers.is_name_taken());
        assert!(!InventoryError::NoUsers.is_api());
    }

    #[test]
    fn test_folder_entry_wire_shape() {
        let entries: Vec<FolderEntry> = serde_json::from_str(
            r#"[{"name": "vm1", "type": "Resource"}, {"name": "DC", "type": "Folder"}, {"name": "x", "type": "Service"}]"#,
        )
        .unwrap();

        assert_eq!(entries[0].kind, EntryKind::Resource);
        assert_eq!(entries[1].kind, EntryKind::Folder);
        assert_eq!(entries[2].kind, EntryKind::Other);
    }

    #[test]
    fn test_resource_details_without_vm() {
        let details: ResourceDetails =
            serde_json::from_str(r#"{"name": "vm1", "address": "N.A"}"#).unwrap();
        assert_eq!(details.vm_uid, None);
    }
}
