//! Thin capability layer over the Kubernetes API.
//!
//! Everything here is mechanical CRUD plus exec streaming: 404-tolerant
//! reads and deletes, create-if-absent with conflict classification, and
//! file transfer into/out of a pod over exec channels. No scheduling logic
//! lives here.

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, AttachedProcess, DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::{Error, Result, MANAGED_BY_LABEL, SUFFIX_LABEL};

/// Connection timeout for kube clients (local API servers answer fast)
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for kube clients
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path and context.
///
/// Falls back to `Config::infer()` (in-cluster or `~/.kube/config`) when
/// neither is given.
pub async fn create_client(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Client> {
    let mut config = match (kubeconfig, context) {
        (None, None) => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
        (path, ctx) => {
            let kc = match path {
                Some(p) => Kubeconfig::read_from(p).map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to read kubeconfig {}: {}", p.display(), e),
                    )
                })?,
                None => Kubeconfig::read().map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to read kubeconfig: {}", e),
                    )
                })?,
            };
            let opts = KubeConfigOptions {
                context: ctx.map(|c| c.to_string()),
                ..Default::default()
            };
            Config::from_custom_kubeconfig(kc, &opts).await.map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to load kubeconfig: {}", e),
                )
            })?
        }
    };
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);
    Client::try_from(config).map_err(Error::from)
}

/// Get a resource, mapping 404 to `None`.
pub async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Result of an idempotent apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The object did not exist and was created
    Created,
    /// An identical object (same run identity) already existed
    Unchanged,
}

/// Result of a tolerant delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removed {
    /// The object existed and deletion was accepted
    Deleted,
    /// The object was already gone
    AlreadyAbsent,
}

/// Create a resource if absent; tolerate an existing object only when it
/// carries the same run identity labels.
///
/// Re-applying an identical resource is `Unchanged`, never an error and
/// never a duplicate. An existing object without this run's labels is a
/// [`Error::Conflict`]: it belongs to someone else and must not be merged.
/// 400/422 rejections are classified as [`Error::InvalidSpec`].
pub async fn apply_unique<K>(api: &Api<K>, obj: &K) -> Result<Applied>
where
    K: kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    let kind = K::kind(&()).to_string();
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::invalid_spec(format!("{} has no metadata.name", kind)))?;

    match api.create(&PostParams::default(), obj).await {
        Ok(_) => {
            debug!(kind = %kind, name = %name, "created");
            Ok(Applied::Created)
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            let existing = api.get(&name).await?;
            if same_run_identity(obj.meta(), existing.meta()) {
                debug!(kind = %kind, name = %name, "already exists with matching identity");
                Ok(Applied::Unchanged)
            } else {
                Err(Error::conflict(
                    kind,
                    name,
                    "existing object does not carry this run's identity labels",
                ))
            }
        }
        Err(kube::Error::Api(ae)) if ae.code == 400 || ae.code == 422 => Err(
            Error::invalid_spec(format!("{}/{} rejected by server: {}", kind, name, ae.message)),
        ),
        Err(e) => Err(e.into()),
    }
}

/// Delete a resource, mapping 404 to `AlreadyAbsent`.
///
/// Deletion is always followed by best-effort cleanup paths, so "already
/// gone" is success.
pub async fn delete_tolerant<K>(api: &Api<K>, name: &str) -> Result<Removed>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(Removed::Deleted),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(Removed::AlreadyAbsent),
        Err(e) => Err(e.into()),
    }
}

/// Compare the managed-by and run-suffix labels of two objects.
pub fn same_run_identity(
    ours: &kube::core::ObjectMeta,
    theirs: &kube::core::ObjectMeta,
) -> bool {
    let label = |meta: &kube::core::ObjectMeta, key: &str| {
        meta.labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(|v| v.to_string())
    };
    label(ours, MANAGED_BY_LABEL) == label(theirs, MANAGED_BY_LABEL)
        && label(ours, SUFFIX_LABEL) == label(theirs, SUFFIX_LABEL)
}

/// Check whether a pod reports the `Ready` condition with status `True`.
pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Run a command in a pod and capture its stdout bytes.
///
/// The exec status channel is checked after the stream closes; a `Failure`
/// status (non-zero exit) is an error carrying the server's message.
pub async fn exec_capture(
    client: &Client,
    namespace: &str,
    pod: &str,
    command: &[String],
) -> Result<Vec<u8>> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params = AttachParams::default().stdout(true).stderr(false);
    let mut attached = pods.exec(pod, command.iter().cloned(), &params).await?;

    let mut stdout = attached
        .stdout()
        .ok_or_else(|| Error::internal_with_context("exec", "no stdout stream attached"))?;
    let mut buf = Vec::new();
    stdout
        .read_to_end(&mut buf)
        .await
        .map_err(|e| Error::internal_with_context("exec", format!("stdout read failed: {}", e)))?;

    finish_exec(attached, pod, command).await?;
    Ok(buf)
}

/// Run a command in a pod, streaming `data` to its stdin.
pub async fn exec_with_stdin(
    client: &Client,
    namespace: &str,
    pod: &str,
    command: &[String],
    data: &[u8],
) -> Result<()> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params = AttachParams::default()
        .stdin(true)
        .stdout(false)
        .stderr(false);
    let mut attached = pods.exec(pod, command.iter().cloned(), &params).await?;

    let mut stdin = attached
        .stdin()
        .ok_or_else(|| Error::internal_with_context("exec", "no stdin stream attached"))?;
    stdin
        .write_all(data)
        .await
        .map_err(|e| Error::internal_with_context("exec", format!("stdin write failed: {}", e)))?;
    stdin
        .shutdown()
        .await
        .map_err(|e| Error::internal_with_context("exec", format!("stdin close failed: {}", e)))?;
    drop(stdin);

    finish_exec(attached, pod, command).await
}

/// Wait for an exec session to end and surface a non-success status.
async fn finish_exec(mut attached: AttachedProcess, pod: &str, command: &[String]) -> Result<()> {
    if let Some(status_fut) = attached.take_status() {
        if let Some(status) = status_fut.await {
            if status.status.as_deref() == Some("Failure") {
                return Err(Error::internal_with_context(
                    "exec",
                    format!(
                        "command {:?} in pod {} failed: {}",
                        command,
                        pod,
                        status.message.unwrap_or_default()
                    ),
                ));
            }
        }
    }
    attached
        .join()
        .await
        .map_err(|e| Error::internal_with_context("exec", format!("session join failed: {}", e)))
}
