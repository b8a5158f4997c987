//! sparkcheck — verification and data-movement tooling for operator-managed
//! Spark workloads.
//!
//! The library applies a uniquely-suffixed RBAC set and a workload
//! descriptor, observes the resulting pods through bounded polling, asserts
//! security and resource compliance against them, and moves files in and
//! out of a PersistentVolumeClaim through an ephemeral worker pod.

pub mod commands;
pub mod compliance;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod provision;
pub mod store;
pub mod watch;
pub mod worker;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// Label marking every object this tool creates, for discovery and cleanup.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "sparkcheck";
/// Label carrying the per-run unique suffix, correlating a run's objects.
pub const SUFFIX_LABEL: &str = "sparkcheck.dev/suffix";
/// Label distinguishing object kinds this tool owns (e.g. the worker pod).
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

/// Role label the operator stamps onto workload pods.
pub const ROLE_LABEL: &str = "spark-role";
/// Driver role label value.
pub const ROLE_DRIVER: &str = "driver";
/// Executor role label value.
pub const ROLE_EXECUTOR: &str = "executor";

/// sparkcheck - Spark workload verification and PVC data movement
#[derive(Parser, Debug)]
#[command(name = "sparkcheck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply the RBAC set and submit a workload descriptor
    Deploy(commands::deploy::DeployArgs),
    /// Upload a local directory into the data volume
    Upload(commands::upload::UploadArgs),
    /// Download the data volume into a local directory
    Download(commands::download::DownloadArgs),
    /// Show workloads, pods, the worker, and the data volume claim
    Status(commands::status::StatusArgs),
    /// Delete every object this tool created
    Cleanup(commands::cleanup::CleanupArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Deploy(args) => commands::deploy::run(args).await,
            Commands::Upload(args) => commands::upload::run(args).await,
            Commands::Download(args) => commands::download::run(args).await,
            Commands::Status(args) => commands::status::run(args).await,
            Commands::Cleanup(args) => commands::cleanup::run(args).await,
        }
    }
}
