//! CLI commands

use std::time::Duration;

use kube::Client;

use crate::config::Settings;
use crate::watch::WatchConfig;
use crate::worker::TransferWorker;
use crate::{store, Result};

pub mod cleanup;
pub mod deploy;
pub mod download;
pub mod status;
pub mod upload;

/// Worker pod readiness deadline; image pull plus volume attach can take a
/// while on a cold node.
const WORKER_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Environment-derived settings plus a connected client, shared by every
/// subcommand.
pub struct CommandContext {
    pub settings: Settings,
    pub client: Client,
}

impl CommandContext {
    /// Read settings from the environment and connect to the cluster.
    pub async fn from_env() -> Result<Self> {
        let settings = Settings::from_env()?;
        let client =
            store::create_client(settings.kubeconfig.as_deref(), settings.context.as_deref())
                .await?;
        Ok(Self { settings, client })
    }

    /// Polling configuration for workload condition waits.
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig::new(self.settings.poll_interval, self.settings.timeout)
    }

    /// Transfer worker bound to the configured claim and mount path.
    pub fn worker(&self) -> TransferWorker {
        TransferWorker::new(
            self.client.clone(),
            &self.settings.namespace,
            &self.settings.pvc,
            &self.settings.mount_path,
            WatchConfig::new(self.settings.poll_interval, WORKER_READY_TIMEOUT),
        )
    }
}
