use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};

use crate::cli::Output;
use crate::config::{CliOverrides, ScoutConfig};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Display current merged configuration
    Show {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = ShowFormat::Toml)]
        format: ShowFormat,
    },
    /// Validate the merged configuration
    Validate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ShowFormat {
    Toml,
    Json,
    Yaml,
}

pub async fn execute(args: ConfigArgs, config_path: Option<&Path>, output: &Output) -> Result<()> {
    let config = ScoutConfig::load_with(config_path, &CliOverrides::default())?;

    match args.command {
        ConfigCommand::Show { format } => {
            println!("{}", render(&config, format)?);
        }
        ConfigCommand::Validate => {
            config.validate().context("Configuration is invalid")?;
            output.success("Configuration is valid!");
            for cp_name in config.discovery.cloud_provider_names() {
                output.list_item(&cp_name);
            }
        }
    }

    Ok(())
}

pub fn render(config: &ScoutConfig, format: ShowFormat) -> Result<String> {
    Ok(match format {
        ShowFormat::Toml => toml::to_string_pretty(config)?,
        ShowFormat::Json => serde_json::to_string_pretty(config)?,
        ShowFormat::Yaml => serde_yml::to_string(config)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_formats() {
        let config = ScoutConfig::default();

        let toml = render(&config, ShowFormat::Toml).unwrap();
        assert!(toml.contains("[discovery]"));
        assert!(toml.contains("max_workers = 10"));

        let json: serde_json::Value =
            serde_json::from_str(&render(&config, ShowFormat::Json).unwrap()).unwrap();
        assert_eq!(json["reservation"]["duration_minutes"], 120);

        let yaml = render(&config, ShowFormat::Yaml).unwrap();
        assert!(yaml.contains("cloud_providers: vcenter"));
    }

    #[test]
    fn test_rendered_toml_loads_back() {
        let mut config = ScoutConfig::default();
        config.discovery.max_workers = 3;
        let parsed: ScoutConfig = toml::from_str(&render(&config, ShowFormat::Toml).unwrap()).unwrap();
        assert_eq!(parsed, config);
    }
}
