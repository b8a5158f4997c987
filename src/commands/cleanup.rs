//! Cleanup command — delete everything this tool created, across runs.
//!
//! Every object the tool creates carries the managed-by label, so cleanup
//! is a label-selected collection delete per kind. Deletion is best-effort
//! and idempotent: individual failures are warnings, an empty cluster is
//! success, and the command always exits zero.

use clap::Args;
use k8s_openapi::api::core::v1::{Pod, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams};
use tracing::{info, warn};

use crate::{descriptor, Result};
use crate::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};

use super::CommandContext;

/// Delete every object this tool created
#[derive(Args, Debug)]
pub struct CleanupArgs {}

pub async fn run(_args: CleanupArgs) -> Result<()> {
    let ctx = CommandContext::from_env().await?;
    let ns = &ctx.settings.namespace;
    let selector = format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE);

    // Workloads first so the operator stops replacing pods, then the pods
    // themselves, then RBAC in reverse creation order.
    let apps: Api<DynamicObject> =
        Api::namespaced_with(ctx.client.clone(), ns, &descriptor::api_resource());
    sweep(&apps, "workloads", &selector).await;

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), ns);
    sweep(&pods, "pods", &selector).await;

    let bindings: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    sweep(&bindings, "cluster role bindings", &selector).await;

    let roles: Api<ClusterRole> = Api::all(ctx.client.clone());
    sweep(&roles, "cluster roles", &selector).await;

    let accounts: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), ns);
    sweep(&accounts, "service accounts", &selector).await;

    println!("cleanup complete");
    Ok(())
}

/// Delete a labeled collection, warning and moving on when it fails.
async fn sweep<K>(api: &Api<K>, what: &str, selector: &str)
where
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api
        .delete_collection(
            &DeleteParams::default(),
            &ListParams::default().labels(selector),
        )
        .await
    {
        Ok(_) => info!("deleted {}", what),
        Err(e) => warn!("could not delete {}: {}", what, e),
    }
}
