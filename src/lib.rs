//! # vmscout - concurrent VM discovery for inventory systems
//!
//! vmscout reconciles the virtual machines reported by a cloud provider with an
//! inventory system: every VM gets an inventory resource (created, or located
//! from an earlier run), is autoloaded, and has its address refreshed.
//!
//! ## Features
//!
//! - **Bounded parallelism**: per-VM work runs on a fixed-width worker pool
//! - **Idempotent re-runs**: existing resources are found by VM uid, never duplicated
//! - **Collision tolerant naming**: name clashes are retried with a random suffix
//! - **Partial failure**: one VM's failed autoload never stops the others
//!
//! ## Quick Start
//!
//! ```bash
//! # Discover every VM of two providers with 4 workers
//! vmscout discover --cloud-provider "vc-east;vc-west" --workers 4
//!
//! # Remove every discovered resource again
//! vmscout clear
//! ```

pub mod cli;
pub mod config;
pub mod discovery;
pub mod inventory;
pub mod parallel;

pub use cli::{Cli, Output};
pub use config::ScoutConfig;

/// Result type alias for vmscout operations
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
