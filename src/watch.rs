//! Bounded condition polling against eventually-consistent cluster state.
//!
//! Creation and status propagation in the cluster are asynchronous: a
//! resource that was just created may not be observable for seconds, and a
//! pod may take minutes to schedule. Rather than inlining poll loops at each
//! call site, [`observe`] makes the retry policy an explicit contract: a
//! side-effect-free predicate is re-evaluated at a fixed interval until it
//! yields a value or the deadline elapses.
//!
//! Predicate protocol:
//! - `Ok(Some(value))` — satisfied, return the value
//! - `Ok(None)` — not yet (includes "object does not exist yet")
//! - `Err(e)` where `e.is_retryable()` — treated as not yet satisfied
//! - `Err(e)` otherwise — permanent, surfaced immediately without waiting
//!   for the deadline

use std::future::Future;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DynamicObject, ListParams};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::store;
use crate::{descriptor, Error, Result};

/// Outcome of one bounded observation
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// The predicate yielded a value before the deadline
    Satisfied(T),
    /// The deadline elapsed without satisfaction
    TimedOut,
    /// A permanent error stopped the observation early
    Errored(Error),
}

impl<T> PollOutcome<T> {
    /// True if the condition was satisfied
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied(_))
    }

    /// Convert to a `Result`, turning `TimedOut` into [`Error::Timeout`]
    /// with the given context.
    pub fn into_result(self, context: &str, waited: Duration) -> Result<T> {
        match self {
            PollOutcome::Satisfied(v) => Ok(v),
            PollOutcome::TimedOut => Err(Error::timeout(context, waited)),
            PollOutcome::Errored(e) => Err(e),
        }
    }
}

/// Parameters for one observation: interval, deadline, optional cancellation
#[derive(Debug, Clone, Default)]
pub struct WatchConfig {
    /// Spacing between predicate evaluations (must be > 0)
    pub interval: Duration,
    /// Deadline for the whole observation (must be >= interval)
    pub timeout: Duration,
    /// External cancellation signal, checked at the start of each iteration
    pub cancel: Option<CancellationToken>,
}

impl WatchConfig {
    /// Create a config with the given interval and timeout
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            cancel: None,
        }
    }

    /// Attach a cancellation token
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn validate(&self, what: &str) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::invalid_spec(format!(
                "{}: poll interval must be greater than zero",
                what
            )));
        }
        if self.timeout < self.interval {
            return Err(Error::invalid_spec(format!(
                "{}: timeout {:?} is shorter than poll interval {:?}",
                what, self.timeout, self.interval
            )));
        }
        Ok(())
    }
}

/// Repeatedly evaluate `predicate` until it is satisfied or `cfg.timeout`
/// elapses.
///
/// The first evaluation happens immediately, not after the first sleep, so a
/// condition that already holds returns without waiting. The observation
/// returns within `timeout + interval` of invocation when the predicate never
/// satisfies. Transport errors on a single poll are retried; errors
/// classified as permanent (see [`Error::is_retryable`]) end the observation
/// at once.
pub async fn observe<T, F, Fut>(cfg: &WatchConfig, what: &str, mut predicate: F) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    if let Err(e) = cfg.validate(what) {
        return PollOutcome::Errored(e);
    }

    let start = Instant::now();
    loop {
        if let Some(token) = &cfg.cancel {
            if token.is_cancelled() {
                return PollOutcome::Errored(Error::internal_with_context(
                    what,
                    "observation cancelled",
                ));
            }
        }

        match predicate().await {
            Ok(Some(value)) => return PollOutcome::Satisfied(value),
            Ok(None) => {
                trace!(what, "condition not yet satisfied");
            }
            Err(e) if e.is_retryable() => {
                trace!(what, error = %e, "transient error while polling, retrying");
            }
            Err(e) => return PollOutcome::Errored(e),
        }

        if start.elapsed() >= cfg.timeout {
            return PollOutcome::TimedOut;
        }
        tokio::time::sleep(cfg.interval).await;
    }
}

/// Wait until the named pod reports the `Ready` condition.
///
/// A pod that does not exist yet is "not yet satisfied", never an error;
/// callers choose timeouts long enough to cover scheduling latency.
pub async fn wait_for_pod_ready(
    client: &Client,
    namespace: &str,
    name: &str,
    cfg: &WatchConfig,
) -> PollOutcome<Pod> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let name = name.to_string();
    observe(cfg, "pod ready", || {
        let pods = pods.clone();
        let name = name.clone();
        async move {
            match store::get_opt(&pods, &name).await? {
                Some(pod) if store::pod_is_ready(&pod) => Ok(Some(pod)),
                _ => Ok(None),
            }
        }
    })
    .await
}

/// Wait until the named pod is gone (404).
pub async fn wait_for_pod_gone(
    client: &Client,
    namespace: &str,
    name: &str,
    cfg: &WatchConfig,
) -> PollOutcome<()> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let name = name.to_string();
    observe(cfg, "pod deleted", || {
        let pods = pods.clone();
        let name = name.clone();
        async move {
            match store::get_opt(&pods, &name).await? {
                None => Ok(Some(())),
                Some(_) => Ok(None),
            }
        }
    })
    .await
}

/// Wait until at least `min` pods match `selector` in the namespace.
///
/// Transient empty list results during scheduling are "not yet satisfied",
/// never an error.
pub async fn wait_for_labeled_pods(
    client: &Client,
    namespace: &str,
    selector: &str,
    min: usize,
    cfg: &WatchConfig,
) -> PollOutcome<Vec<Pod>> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(selector);
    observe(cfg, "labeled pods present", || {
        let pods = pods.clone();
        let params = params.clone();
        async move {
            let list = pods.list(&params).await?;
            if list.items.len() >= min {
                Ok(Some(list.items))
            } else {
                Ok(None)
            }
        }
    })
    .await
}

/// Wait until the workload's operator-reported state reaches one of `states`.
///
/// Reads `.status.applicationState.state` from the SparkApplication object.
/// A missing object or missing status block is "not yet satisfied": status
/// propagation lags creation.
pub async fn wait_for_app_state(
    client: &Client,
    namespace: &str,
    name: &str,
    states: &[&str],
    cfg: &WatchConfig,
) -> PollOutcome<String> {
    let api: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &descriptor::api_resource());
    let name = name.to_string();
    let states: Vec<String> = states.iter().map(|s| s.to_string()).collect();
    observe(cfg, "application state", || {
        let api = api.clone();
        let name = name.clone();
        let states = states.clone();
        async move {
            match store::get_opt(&api, &name).await? {
                Some(obj) => {
                    let state = obj
                        .data
                        .pointer("/status/applicationState/state")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                    match state {
                        Some(s) if states.iter().any(|want| want == &s) => Ok(Some(s)),
                        _ => Ok(None),
                    }
                }
                None => Ok(None),
            }
        }
    })
    .await
}
