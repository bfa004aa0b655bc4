//! Command-line interface for vmscout
//!
//! clap derive parser, logging setup and dispatch to the command modules.

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

pub mod commands;
pub mod output;

pub use output::Output;

use commands::{clear, config, discover, version};

/// vmscout - discover cloud provider VMs into an inventory system
#[derive(Parser)]
#[command(
    name = "vmscout",
    version,
    about = "Discover cloud provider VMs into an inventory system",
    long_about = "vmscout lists the VMs of one or more cloud providers, creates or locates an \
                  inventory resource for each, autoloads it and refreshes its address, \
                  using a bounded pool of workers."
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use custom configuration file
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover the VMs of the configured cloud providers
    Discover(discover::DiscoverArgs),
    /// Delete every resource of the configured model
    Clear(clear::ClearArgs),
    /// Configuration management
    Config(config::ConfigArgs),
    /// Show version information
    Version(version::VersionArgs),
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        setup_logging(self.verbose, self.quiet);
        let output = Output::new(self.verbose > 0, self.quiet);
        let config_path = self.config.as_deref();

        match self.command {
            Some(Commands::Discover(args)) => discover::execute(args, config_path, &output).await,
            Some(Commands::Clear(args)) => clear::execute(args, config_path, &output).await,
            Some(Commands::Config(args)) => config::execute(args, config_path, &output).await,
            Some(Commands::Version(args)) => version::execute(args).await,
            None => {
                Cli::command().print_help()?;
                Ok(())
            }
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match verbose {
            0 => tracing_subscriber::EnvFilter::new("warn"),
            1 => tracing_subscriber::EnvFilter::new("info,reqwest=warn,hyper_util=warn"),
            2 => tracing_subscriber::EnvFilter::new("debug,reqwest=info,hyper_util=info"),
            _ => tracing_subscriber::EnvFilter::new("trace"),
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(false)
        .init();
}
