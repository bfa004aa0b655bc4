use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;

use crate::cli::Output;
use crate::config::{CliOverrides, ScoutConfig};
use crate::discovery::{DiscoveryOrchestrator, DiscoveryReport};
use crate::inventory::{InventoryApi, Sandbox};
use crate::parallel::ProgressFn;

#[derive(Args, Debug, Default)]
pub struct DiscoverArgs {
    /// Cloud provider resource names, separated by ',' or ';'
    #[arg(long = "cloud-provider", value_name = "NAMES")]
    pub cloud_providers: Option<String>,

    /// Number of VMs discovered in parallel
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Discover at most this many VMs (0 for all)
    #[arg(long)]
    pub max_vms: Option<usize>,

    /// Skip this many VMs of the provider listing
    #[arg(long)]
    pub start_from: Option<usize>,
}

impl DiscoverArgs {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            cloud_providers: self.cloud_providers.clone(),
            max_workers: self.workers,
            discover_max_vms: self.max_vms,
            start_discover_from: self.start_from,
        }
    }
}

pub async fn execute(args: DiscoverArgs, config_path: Option<&Path>, output: &Output) -> Result<()> {
    let config = ScoutConfig::load_with(config_path, &args.overrides())?;
    config.validate()?;
    let config = Arc::new(config);

    let mut failed_providers = Vec::new();
    for cp_name in config.discovery.cloud_provider_names() {
        output.step(&format!("Discovering VMs of {cp_name}"));
        let started = Instant::now();

        let bar = output.progress_bar(&cp_name);
        let progress: Arc<ProgressFn> = {
            let bar = bar.clone();
            Arc::new(move |done: usize, total: usize| {
                bar.set_length(total as u64);
                bar.set_position(done as u64);
            })
        };

        // The blocking HTTP client must be built and dropped off the runtime
        let result = tokio::task::spawn_blocking({
            let config = Arc::clone(&config);
            let cp_name = cp_name.clone();
            move || -> Result<DiscoveryReport> {
                let inventory: Arc<dyn InventoryApi> = Arc::new(config.inventory.connect()?);
                discover_provider(&config, inventory, &cp_name, Some(progress))
            }
        })
        .await
        .context("Discovery task panicked")?;
        bar.finish_and_clear();

        match result {
            Ok(report) => {
                report_summary(output, &cp_name, &report, started);
                if !report.failed.is_empty() {
                    failed_providers.push(cp_name);
                }
            }
            Err(e) => {
                output.error(&format!("{cp_name}: {e:#}"));
                failed_providers.push(cp_name);
            }
        }
    }

    if !failed_providers.is_empty() {
        anyhow::bail!(
            "Discovery failed for cloud providers: {}",
            failed_providers.join(", ")
        );
    }
    Ok(())
}

/// Discover one cloud provider inside its own reservation
///
/// Autoload failures are kept in the returned report; every other error
/// aborts the provider's discovery.
pub fn discover_provider(
    config: &ScoutConfig,
    inventory: Arc<dyn InventoryApi>,
    cp_name: &str,
    progress: Option<Arc<ProgressFn>>,
) -> Result<DiscoveryReport> {
    let reservation = &config.reservation;
    let sandbox = Sandbox::open(
        inventory,
        &reservation.reservation_name(cp_name),
        reservation.owner(),
        reservation.duration_minutes,
    )
    .with_context(|| format!("Failed to open reservation for {cp_name}"))?;

    let mut orchestrator =
        DiscoveryOrchestrator::new(sandbox.api().clone(), config.discovery.template(cp_name))
            .with_max_workers(config.discovery.max_workers)
            .with_window(config.discovery.window());
    if let Some(progress) = progress {
        orchestrator = orchestrator.with_progress(progress);
    }

    let report = orchestrator.run();
    let closed = sandbox.close();
    let report = report.with_context(|| format!("Discovery of {cp_name} failed"))?;
    closed.context("Failed to end reservation")?;
    Ok(report)
}

fn report_summary(output: &Output, cp_name: &str, report: &DiscoveryReport, started: Instant) {
    if report.processed == 0 {
        output.warning(&format!("{cp_name}: no VMs in the discovery window"));
    }
    output.key_value("VMs listed", &report.listed.to_string());
    output.key_value("VMs processed", &report.processed.to_string());
    output.key_value("Discovered", &report.discovered.len().to_string());
    output.verbose(&format!("Finished in {:.1?}", started.elapsed()));
    for resource in &report.discovered {
        output.verbose(resource);
    }

    if let Err(e) = report.clone().into_result() {
        output.error(&format!("{cp_name}: {e}"));
        return;
    }
    output.success(&format!(
        "{cp_name}: discovered {} VMs in {:.1?}",
        report.discovered.len(),
        started.elapsed()
    ));
}
