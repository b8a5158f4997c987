//! Environment-driven configuration.
//!
//! All settings come from `SPARKCHECK_*` environment variables so that the
//! same binary can be pointed at different clusters and namespaces from CI
//! without flag plumbing. Parsing is split into pure helpers so the
//! interesting logic is unit-testable without touching process environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

const ENV_NAMESPACE: &str = "SPARKCHECK_NAMESPACE";
const ENV_KUBECONFIG: &str = "SPARKCHECK_KUBECONFIG";
const ENV_CONTEXT: &str = "SPARKCHECK_CONTEXT";
const ENV_POLL_INTERVAL: &str = "SPARKCHECK_POLL_INTERVAL_SECS";
const ENV_TIMEOUT: &str = "SPARKCHECK_TIMEOUT_SECS";
const ENV_PVC: &str = "SPARKCHECK_PVC";
const ENV_MOUNT_PATH: &str = "SPARKCHECK_MOUNT_PATH";
const ENV_KEEP_RESOURCES: &str = "SPARKCHECK_KEEP_RESOURCES";

/// Default namespace for workloads and the worker pod.
///
/// The default namespace always exists and is watched by the operator, so
/// verification runs isolate themselves with unique-suffixed names instead
/// of per-run namespaces.
pub const DEFAULT_NAMESPACE: &str = "default";
/// Default spacing between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Default deadline for waits (submission, pod appearance)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);
/// Default persistent volume claim the worker pod binds
pub const DEFAULT_PVC: &str = "spark-data";
/// Default mount path for the claim inside the worker pod
pub const DEFAULT_MOUNT_PATH: &str = "/mnt/spark-data";

/// Resolved runtime settings for one invocation
#[derive(Debug, Clone)]
pub struct Settings {
    /// Namespace for the workload, RBAC set, and worker pod
    pub namespace: String,
    /// Explicit kubeconfig path (falls back to kube defaults when unset)
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to select (default context when unset)
    pub context: Option<String>,
    /// Spacing between condition polls
    pub poll_interval: Duration,
    /// Deadline for condition waits
    pub timeout: Duration,
    /// Persistent volume claim used for data transfer
    pub pvc: String,
    /// Mount path for the claim inside the worker pod
    pub mount_path: String,
    /// Preserve provisioned auxiliary resources after a run (for debugging)
    pub keep_resources: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            kubeconfig: None,
            context: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            pvc: DEFAULT_PVC.to_string(),
            mount_path: DEFAULT_MOUNT_PATH.to_string(),
            keep_resources: false,
        }
    }
}

impl Settings {
    /// Load settings from `SPARKCHECK_*` environment variables.
    ///
    /// Unset variables fall back to defaults; malformed values are usage
    /// errors so they surface before any cluster interaction.
    pub fn from_env() -> Result<Self> {
        let get = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let poll_interval = parse_secs(ENV_POLL_INTERVAL, get(ENV_POLL_INTERVAL).as_deref())?
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let timeout =
            parse_secs(ENV_TIMEOUT, get(ENV_TIMEOUT).as_deref())?.unwrap_or(DEFAULT_TIMEOUT);
        let keep_resources =
            parse_bool(ENV_KEEP_RESOURCES, get(ENV_KEEP_RESOURCES).as_deref())?.unwrap_or(false);

        Ok(Self {
            namespace: get(ENV_NAMESPACE).unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            kubeconfig: get(ENV_KUBECONFIG).map(PathBuf::from),
            context: get(ENV_CONTEXT),
            poll_interval,
            timeout,
            pvc: get(ENV_PVC).unwrap_or_else(|| DEFAULT_PVC.to_string()),
            mount_path: get(ENV_MOUNT_PATH).unwrap_or_else(|| DEFAULT_MOUNT_PATH.to_string()),
            keep_resources,
        })
    }
}

/// Parse a seconds value from an environment variable.
fn parse_secs(key: &str, raw: Option<&str>) -> Result<Option<Duration>> {
    match raw {
        None => Ok(None),
        Some(s) => {
            let secs: u64 = s
                .parse()
                .map_err(|_| Error::usage(format!("{}: expected seconds, got '{}'", key, s)))?;
            if secs == 0 {
                return Err(Error::usage(format!("{}: must be greater than zero", key)));
            }
            Ok(Some(Duration::from_secs(secs)))
        }
    }
}

/// Parse a boolean from an environment variable (`true`/`false`/`1`/`0`).
fn parse_bool(key: &str, raw: Option<&str>) -> Result<Option<bool>> {
    match raw {
        None => Ok(None),
        Some(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            other => Err(Error::usage(format!(
                "{}: expected true/false, got '{}'",
                key, other
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.namespace, "default");
        assert!(s.poll_interval < s.timeout);
        assert!(!s.keep_resources);
        assert!(s.mount_path.starts_with('/'));
    }

    #[test]
    fn parse_secs_accepts_plain_seconds() {
        let d = parse_secs("X", Some("45")).unwrap().unwrap();
        assert_eq!(d, Duration::from_secs(45));
        assert!(parse_secs("X", None).unwrap().is_none());
    }

    #[test]
    fn parse_secs_rejects_zero_and_garbage() {
        assert!(parse_secs("X", Some("0")).is_err());
        assert!(parse_secs("X", Some("ten")).is_err());
        assert!(parse_secs("X", Some("-5")).is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("X", Some("true")).unwrap(), Some(true));
        assert_eq!(parse_bool("X", Some("1")).unwrap(), Some(true));
        assert_eq!(parse_bool("X", Some("FALSE")).unwrap(), Some(false));
        assert_eq!(parse_bool("X", Some("no")).unwrap(), Some(false));
        assert_eq!(parse_bool("X", None).unwrap(), None);
    }

    #[test]
    fn parse_bool_rejects_garbage_as_usage_error() {
        let err = parse_bool("SPARKCHECK_KEEP_RESOURCES", Some("maybe")).unwrap_err();
        assert!(matches!(err, Error::Usage { .. }));
        assert!(err.to_string().contains("SPARKCHECK_KEEP_RESOURCES"));
    }
}
