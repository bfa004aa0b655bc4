use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::Serialize;

use super::{ScoutConfig, smart_load};

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

const ENV_PREFIX: &str = "VMSCOUT_";
const REPO_CONFIG_STEM: &str = "vmscout";

/// Discovery settings given on the command line
///
/// Only the options actually given are merged, so unset flags never mask
/// a value from a config file or the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_providers: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discover_max_vms: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_discover_from: Option<usize>,
}

impl ScoutConfig {
    pub fn load() -> Result<Self> {
        Self::load_with(None, &CliOverrides::default())
    }

    /// Load the merged configuration
    ///
    /// Priority, lowest first: embedded defaults, user config, repository
    /// config, `custom_config`, `VMSCOUT_*` environment, CLI overrides.
    pub fn load_with(custom_config: Option<&Path>, overrides: &CliOverrides) -> Result<Self> {
        Self::figment(custom_config, overrides)?
            .extract()
            .context("Failed to load configuration")
    }

    pub fn figment(custom_config: Option<&Path>, overrides: &CliOverrides) -> Result<Figment> {
        let mut figment = Figment::new().merge(Toml::string(DEFAULT_CONFIG));

        if let Some(user_dir) = Self::user_config_dir() {
            figment = merge_all_formats(figment, &user_dir.join("config"));
        }
        figment = merge_all_formats(figment, Path::new(REPO_CONFIG_STEM));

        if let Some(custom_path) = custom_config {
            if !custom_path.exists() {
                anyhow::bail!("Config file not found: {}", custom_path.display());
            }
            tracing::debug!(path = %custom_path.display(), "loading custom config");
            figment = figment.merge(smart_load::auto(custom_path));
        }

        Ok(figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(DiscoveryOverrides {
                discovery: overrides,
            })))
    }

    fn user_config_dir() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join("vmscout"))
    }
}

#[derive(Serialize)]
struct DiscoveryOverrides<'a> {
    discovery: &'a CliOverrides,
}

fn merge_all_formats(figment: Figment, stem: &Path) -> Figment {
    figment
        .merge(Toml::file(stem.with_extension("toml")))
        .merge(Json::file(stem.with_extension("json")))
        .merge(Yaml::file(stem.with_extension("yaml")))
        .merge(Yaml::file(stem.with_extension("yml")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_config_loads_defaults() {
        let config = ScoutConfig::load_with(None, &CliOverrides::default()).unwrap();
        assert_eq!(config.discovery.max_workers, 10);
        assert_eq!(config.discovery.resource_model, "Generic Static VM 2G");
        assert_eq!(config.reservation.duration_minutes, 120);
        assert_eq!(config.inventory.timeout_secs, 120);
    }

    #[test]
    fn test_embedded_defaults_match_code_defaults() {
        let embedded: ScoutConfig = Figment::new()
            .merge(Toml::string(DEFAULT_CONFIG))
            .extract()
            .unwrap();
        assert_eq!(embedded, ScoutConfig::default());
    }

    #[test]
    fn test_custom_toml_overrides_defaults() {
        let file = config_file(
            ".toml",
            "[discovery]\ncloud_providers = \"lab; prod\"\nmax_workers = 3\n",
        );
        let config = ScoutConfig::load_with(Some(file.path()), &CliOverrides::default()).unwrap();

        assert_eq!(config.discovery.cloud_provider_names(), vec!["lab", "prod"]);
        assert_eq!(config.discovery.max_workers, 3);
        // Untouched sections keep their defaults
        assert_eq!(config.reservation.duration_minutes, 120);
    }

    #[test]
    fn test_custom_yaml_and_json() {
        let yaml = config_file(".yaml", "reservation:\n  owner: ops\n");
        let config = ScoutConfig::load_with(Some(yaml.path()), &CliOverrides::default()).unwrap();
        assert_eq!(config.reservation.owner(), Some("ops"));

        let json = config_file(".json", r#"{"inventory": {"url": "https://cmdb:8443/api"}}"#);
        let config = ScoutConfig::load_with(Some(json.path()), &CliOverrides::default()).unwrap();
        assert_eq!(config.inventory.url, "https://cmdb:8443/api");
    }

    #[test]
    fn test_cli_overrides_win_over_file() {
        let file = config_file(".toml", "[discovery]\nmax_workers = 3\nstart_discover_from = 5\n");
        let overrides = CliOverrides {
            max_workers: Some(7),
            discover_max_vms: Some(2),
            ..CliOverrides::default()
        };
        let config = ScoutConfig::load_with(Some(file.path()), &overrides).unwrap();

        assert_eq!(config.discovery.max_workers, 7);
        assert_eq!(config.discovery.discover_max_vms, 2);
        assert_eq!(config.discovery.start_discover_from, 5);
    }

    #[test]
    fn test_missing_custom_config_is_an_error() {
        let result = ScoutConfig::load_with(
            Some(Path::new("definitely/not/here.toml")),
            &CliOverrides::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_type_is_reported() {
        let file = config_file(".toml", "[discovery]\nmax_workers = \"many\"\n");
        let err = ScoutConfig::load_with(Some(file.path()), &CliOverrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("max_workers"));
    }
}
