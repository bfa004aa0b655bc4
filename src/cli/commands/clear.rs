use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::Output;
use crate::config::{CliOverrides, ScoutConfig};
use crate::discovery::DiscoveryOrchestrator;
use crate::inventory::{InventoryApi, Sandbox};

#[derive(Args, Debug, Default)]
pub struct ClearArgs {
    /// Cloud provider whose reservation is used; defaults to the first configured one
    #[arg(long = "cloud-provider", value_name = "NAME")]
    pub cloud_provider: Option<String>,
}

pub async fn execute(args: ClearArgs, config_path: Option<&Path>, output: &Output) -> Result<()> {
    let overrides = CliOverrides {
        cloud_providers: args.cloud_provider,
        ..CliOverrides::default()
    };
    let config = ScoutConfig::load_with(config_path, &overrides)?;
    config.validate()?;

    let cp_name = config
        .discovery
        .cloud_provider_names()
        .into_iter()
        .next()
        .context("No cloud provider configured")?;

    output.step(&format!(
        "Deleting every '{}' resource",
        config.discovery.resource_model
    ));
    let model = config.discovery.resource_model.clone();
    let deleted = tokio::task::spawn_blocking(move || -> Result<usize> {
        let inventory: Arc<dyn InventoryApi> = Arc::new(config.inventory.connect()?);
        clear_resources(&config, inventory, &cp_name)
    })
    .await
    .context("Clear task panicked")??;

    output.success(&format!("Deleted {deleted} '{model}' resources"));
    Ok(())
}

/// Delete every resource of the configured model, returning how many went
pub fn clear_resources(
    config: &ScoutConfig,
    inventory: Arc<dyn InventoryApi>,
    cp_name: &str,
) -> Result<usize> {
    let reservation = &config.reservation;
    let sandbox = Sandbox::open(
        inventory,
        &reservation.reservation_name(cp_name),
        reservation.owner(),
        reservation.duration_minutes,
    )
    .with_context(|| format!("Failed to open reservation for {cp_name}"))?;

    let deleted =
        DiscoveryOrchestrator::new(sandbox.api().clone(), config.discovery.template(cp_name))
            .clear();
    let closed = sandbox.close();
    let deleted = deleted.context("Failed to clear resources")?;
    closed.context("Failed to end reservation")?;
    Ok(deleted)
}
