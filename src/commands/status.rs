//! Status command — show workloads, their pods, the transfer worker, and
//! the data volume claim.
//!
//! Status is informational: an empty resource class prints "no X found"
//! and a read error is reported as a warning, never a failure. The command
//! always exits zero once settings parse and a client connects.

use clap::Args;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, DynamicObject, ListParams};
use tracing::warn;

use crate::worker::{WorkerState, WORKER_NAME};
use crate::{descriptor, store, Result};
use crate::{MANAGED_BY_LABEL, MANAGED_BY_VALUE, ROLE_LABEL};

use super::CommandContext;

/// Show workloads, pods, the worker, and the data volume claim
#[derive(Args, Debug)]
pub struct StatusArgs {}

pub async fn run(_args: StatusArgs) -> Result<()> {
    let ctx = CommandContext::from_env().await?;
    let ns = &ctx.settings.namespace;
    let managed = format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE);

    let apps: Api<DynamicObject> =
        Api::namespaced_with(ctx.client.clone(), ns, &descriptor::api_resource());
    match apps.list(&ListParams::default().labels(&managed)).await {
        Ok(list) if list.items.is_empty() => println!("no workloads found"),
        Ok(list) => {
            for app in list.items {
                let state = app
                    .data
                    .pointer("/status/applicationState/state")
                    .and_then(|v| v.as_str())
                    .unwrap_or("<no state>");
                println!(
                    "workload {}: {}",
                    app.metadata.name.as_deref().unwrap_or("unnamed"),
                    state
                );
            }
        }
        Err(e) => warn!("could not list workloads: {}", e),
    }

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), ns);
    match pods.list(&ListParams::default().labels(ROLE_LABEL)).await {
        Ok(list) if list.items.is_empty() => println!("no workload pods found"),
        Ok(list) => {
            for pod in list.items {
                let role = pod
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(ROLE_LABEL))
                    .map(String::as_str)
                    .unwrap_or("?");
                let phase = pod
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .unwrap_or("Unknown");
                println!(
                    "pod {} ({}): {}",
                    pod.metadata.name.as_deref().unwrap_or("unnamed"),
                    role,
                    phase
                );
            }
        }
        Err(e) => warn!("could not list workload pods: {}", e),
    }

    match store::get_opt(&pods, WORKER_NAME).await {
        Ok(pod) => match WorkerState::from_pod(pod.as_ref()) {
            WorkerState::Absent => println!("no transfer worker found"),
            state => println!("transfer worker {}: {:?}", WORKER_NAME, state),
        },
        Err(e) => warn!("could not read transfer worker: {}", e),
    }

    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), ns);
    match store::get_opt(&pvcs, &ctx.settings.pvc).await {
        Ok(None) => println!("no data volume claim found"),
        Ok(Some(pvc)) => {
            let phase = pvc
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .unwrap_or("Unknown");
            println!("claim {}: {}", ctx.settings.pvc, phase);
        }
        Err(e) => warn!("could not read claim {}: {}", ctx.settings.pvc, e),
    }

    Ok(())
}
