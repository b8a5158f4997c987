//! Ephemeral transfer worker pod.
//!
//! Moving files into and out of a PersistentVolumeClaim requires a pod that
//! mounts it. The worker is a single long-sleeping busybox container with
//! the claim mounted at a fixed path; uploads stream file bytes to its
//! stdin, downloads capture `cat` output from its stdout. The pod carries
//! the managed-by label so `cleanup` finds it, and it is torn down after
//! each transfer unless the caller keeps it for a follow-up.

use std::fs;
use std::path::{Path, PathBuf};

use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaimVolumeSource, Pod, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

use crate::store::{self, Removed};
use crate::watch::{PollOutcome, WatchConfig};
use crate::{Error, Result};
use crate::{COMPONENT_LABEL, MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// Fixed worker pod name; one worker per namespace, reused across
/// transfers against the same claim.
pub const WORKER_NAME: &str = "sparkcheck-worker";

/// Component label value distinguishing the worker from workload pods.
pub const WORKER_COMPONENT: &str = "transfer-worker";

const WORKER_IMAGE: &str = "busybox:1.36";
const DATA_VOLUME: &str = "data";

/// Observable lifecycle of the worker pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// No worker pod exists
    Absent,
    /// Pod created but not yet Ready
    Provisioning,
    /// Pod Ready and idle
    Ready,
    /// Pod Ready with a transfer in progress
    InUse,
    /// Deletion requested, pod still visible
    Terminating,
}

impl WorkerState {
    /// Classify the state from an observed pod (or its absence). `InUse` is
    /// a caller-side notion and never derived from observation.
    pub fn from_pod(pod: Option<&Pod>) -> Self {
        match pod {
            None => WorkerState::Absent,
            Some(p) if p.metadata.deletion_timestamp.is_some() => WorkerState::Terminating,
            Some(p) if store::pod_is_ready(p) => WorkerState::Ready,
            Some(_) => WorkerState::Provisioning,
        }
    }
}

/// Counts reported after a transfer completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub files: usize,
    pub bytes: u64,
}

/// Handle for the worker pod bound to one claim and mount path.
pub struct TransferWorker {
    client: Client,
    namespace: String,
    pvc: String,
    mount_path: String,
    ready_timeout: WatchConfig,
}

impl TransferWorker {
    pub fn new(
        client: Client,
        namespace: &str,
        pvc: &str,
        mount_path: &str,
        ready_timeout: WatchConfig,
    ) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            pvc: pvc.to_string(),
            mount_path: mount_path.to_string(),
            ready_timeout,
        }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Observe the worker's current state.
    pub async fn state(&self) -> Result<WorkerState> {
        let pod = store::get_opt(&self.pods(), WORKER_NAME).await?;
        Ok(WorkerState::from_pod(pod.as_ref()))
    }

    /// Ensure a Ready worker pod mounting this claim exists.
    ///
    /// An existing worker is reused only when it mounts the same claim; a
    /// worker bound to a different claim is a conflict, never silently
    /// repointed. A worker that fails to become Ready within the deadline is
    /// torn down before the timeout is reported, so a wedged pod does not
    /// block the next attempt.
    pub async fn ensure_ready(&self) -> Result<()> {
        let pods = self.pods();
        match store::get_opt(&pods, WORKER_NAME).await? {
            Some(existing) => {
                let claim = pod_claim_name(&existing);
                if claim.as_deref() != Some(self.pvc.as_str()) {
                    return Err(Error::conflict(
                        "Pod",
                        WORKER_NAME,
                        format!(
                            "existing worker mounts claim {:?}, wanted {}; delete it first",
                            claim, self.pvc
                        ),
                    ));
                }
                if existing.metadata.deletion_timestamp.is_some() {
                    return Err(Error::conflict(
                        "Pod",
                        WORKER_NAME,
                        "existing worker is terminating; retry once it is gone",
                    ));
                }
                if store::pod_is_ready(&existing) {
                    debug!(pod = WORKER_NAME, "reusing ready worker");
                    return Ok(());
                }
                info!(pod = WORKER_NAME, "worker exists, waiting for readiness");
            }
            None => {
                info!(pod = WORKER_NAME, pvc = %self.pvc, "creating transfer worker");
                let pod = self.build_pod();
                pods.create(&PostParams::default(), &pod).await?;
            }
        }

        let outcome =
            crate::watch::wait_for_pod_ready(&self.client, &self.namespace, WORKER_NAME, &self.ready_timeout)
                .await;
        match outcome {
            PollOutcome::Satisfied(_) => Ok(()),
            PollOutcome::TimedOut => {
                warn!(pod = WORKER_NAME, "worker never became ready, tearing it down");
                self.teardown().await;
                Err(Error::timeout("transfer worker ready", self.ready_timeout.timeout))
            }
            PollOutcome::Errored(e) => Err(e),
        }
    }

    /// Upload every regular file under `local_dir` into the mounted claim,
    /// preserving relative paths.
    pub async fn upload(&self, local_dir: &Path) -> Result<TransferStats> {
        let files = collect_files(local_dir)?;
        let mut stats = TransferStats::default();

        for rel in &files {
            let local = local_dir.join(rel);
            let data = fs::read(&local).map_err(|e| {
                Error::internal_with_context("upload", format!("read {}: {}", local.display(), e))
            })?;
            let remote = remote_path(&self.mount_path, rel)?;
            let parent = remote.rsplit_once('/').map(|(d, _)| d).unwrap_or(".");
            let script = format!(
                "mkdir -p {} && cat > {}",
                shell_quote(parent),
                shell_quote(&remote)
            );
            debug!(file = %rel.display(), bytes = data.len(), "uploading");
            store::exec_with_stdin(
                &self.client,
                &self.namespace,
                WORKER_NAME,
                &["sh".to_string(), "-c".to_string(), script],
                &data,
            )
            .await?;
            stats.files += 1;
            stats.bytes += data.len() as u64;
        }

        info!(files = stats.files, bytes = stats.bytes, "upload complete");
        Ok(stats)
    }

    /// Download every regular file under the mounted claim into
    /// `local_dir`, creating it (and any subdirectories) as needed.
    pub async fn download(&self, local_dir: &Path) -> Result<TransferStats> {
        fs::create_dir_all(local_dir).map_err(|e| {
            Error::internal_with_context(
                "download",
                format!("create {}: {}", local_dir.display(), e),
            )
        })?;

        let mut stats = TransferStats::default();
        for rel in self.list_volume().await? {
            let script = format!(
                "cat {}",
                shell_quote(&remote_path(&self.mount_path, &rel)?)
            );
            let data = store::exec_capture(
                &self.client,
                &self.namespace,
                WORKER_NAME,
                &["sh".to_string(), "-c".to_string(), script],
            )
            .await?;

            let local = local_dir.join(&rel);
            if let Some(parent) = local.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::internal_with_context(
                        "download",
                        format!("create {}: {}", parent.display(), e),
                    )
                })?;
            }
            debug!(file = %rel.display(), bytes = data.len(), "downloaded");
            stats.bytes += data.len() as u64;
            stats.files += 1;
            fs::write(&local, data).map_err(|e| {
                Error::internal_with_context("download", format!("write {}: {}", local.display(), e))
            })?;
        }

        info!(files = stats.files, bytes = stats.bytes, "download complete");
        Ok(stats)
    }

    /// List regular files under the mount, as paths relative to it.
    ///
    /// The listing is NUL-delimited so a file name containing a newline
    /// stays one path.
    pub async fn list_volume(&self) -> Result<Vec<PathBuf>> {
        let script = format!(
            "cd {} && find . -type f -print0",
            shell_quote(&self.mount_path)
        );
        let out = store::exec_capture(
            &self.client,
            &self.namespace,
            WORKER_NAME,
            &["sh".to_string(), "-c".to_string(), script],
        )
        .await?;
        parse_volume_listing(&out)
    }

    /// Delete the worker pod and wait (bounded) for it to disappear.
    ///
    /// Teardown is entirely best-effort: a failed delete, a wait error, or a
    /// pod lingering past the deadline is reported and left behind rather
    /// than surfaced, so a completed transfer is never failed and an
    /// original error is never masked by cleanup. The next `ensure_ready`
    /// sees a leftover pod as terminating.
    pub async fn teardown(&self) {
        match store::delete_tolerant(&self.pods(), WORKER_NAME).await {
            Ok(Removed::AlreadyAbsent) => return,
            Ok(Removed::Deleted) => {}
            Err(e) => {
                warn!(pod = WORKER_NAME, error = %e, "worker delete failed; leaving it behind");
                return;
            }
        }
        let cfg = WatchConfig::new(self.ready_timeout.interval, self.ready_timeout.timeout);
        match crate::watch::wait_for_pod_gone(&self.client, &self.namespace, WORKER_NAME, &cfg).await
        {
            PollOutcome::Satisfied(()) => {}
            PollOutcome::TimedOut => {
                warn!(pod = WORKER_NAME, "worker pod still terminating; leaving it behind");
            }
            PollOutcome::Errored(e) => {
                warn!(pod = WORKER_NAME, error = %e, "worker deletion wait failed; leaving it behind");
            }
        }
    }

    fn build_pod(&self) -> Pod {
        build_worker_pod(WORKER_NAME, &self.pvc, &self.mount_path)
    }
}

/// Construct the worker pod object: one busybox container sleeping for a
/// day, the claim mounted read-write at the transfer path, never restarted.
pub fn build_worker_pod(name: &str, pvc: &str, mount_path: &str) -> Pod {
    let labels = [
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (COMPONENT_LABEL.to_string(), WORKER_COMPONENT.to_string()),
    ]
    .into_iter()
    .collect();

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: "transfer".to_string(),
                image: Some(WORKER_IMAGE.to_string()),
                command: Some(vec!["sleep".to_string(), "86400".to_string()]),
                volume_mounts: Some(vec![VolumeMount {
                    name: DATA_VOLUME.to_string(),
                    mount_path: mount_path.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }],
            volumes: Some(vec![Volume {
                name: DATA_VOLUME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: pvc.to_string(),
                    read_only: None,
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Claim name the pod's data volume is bound to, if any.
fn pod_claim_name(pod: &Pod) -> Option<String> {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .and_then(|vols| vols.iter().find(|v| v.name == DATA_VOLUME))
        .and_then(|v| v.persistent_volume_claim.as_ref())
        .map(|c| c.claim_name.clone())
}

/// Parse NUL-delimited `find -print0` output into relative paths.
///
/// A name that is not valid UTF-8 cannot be round-tripped through the exec
/// shell layer, so it is an attributable error rather than a lossy
/// replacement that would make the later `cat` fail opaquely.
fn parse_volume_listing(out: &[u8]) -> Result<Vec<PathBuf>> {
    out.split(|b| *b == 0)
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            let name = std::str::from_utf8(raw).map_err(|_| {
                Error::internal_with_context(
                    "list volume",
                    format!(
                        "volume holds a file name that is not valid UTF-8: {:?}",
                        String::from_utf8_lossy(raw)
                    ),
                )
            })?;
            Ok(PathBuf::from(name.trim_start_matches("./")))
        })
        .collect()
}

/// Join the mount path with a relative file path, refusing traversal.
fn remote_path(mount: &str, rel: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for comp in rel.components() {
        match comp {
            std::path::Component::Normal(p) => {
                parts.push(p.to_str().ok_or_else(|| {
                    Error::invalid_spec(format!("non-UTF-8 path component in {}", rel.display()))
                })?)
            }
            _ => {
                return Err(Error::invalid_spec(format!(
                    "refusing path with traversal or absolute component: {}",
                    rel.display()
                )))
            }
        }
    }
    Ok(format!("{}/{}", mount.trim_end_matches('/'), parts.join("/")))
}

/// Single-quote a string for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Walk `dir` recursively, returning regular files as paths relative to it,
/// sorted for deterministic transfer order.
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::usage(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = fs::read_dir(&current).map_err(|e| {
            Error::internal_with_context("walk", format!("read {}: {}", current.display(), e))
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| {
                Error::internal_with_context("walk", format!("read {}: {}", current.display(), e))
            })?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                let rel = path.strip_prefix(dir).map_err(|e| {
                    Error::internal_with_context("walk", format!("relativize: {}", e))
                })?;
                files.push(rel.to_path_buf());
            }
        }
    }
    files.sort();
    Ok(files)
}
