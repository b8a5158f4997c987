//! Error types for sparkcheck
//!
//! Errors are structured with fields to aid debugging: each variant carries
//! the resource or operation it relates to, and `is_retryable()` tells
//! polling and provisioning code whether another attempt can help.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sparkcheck operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error (transport failures, server-side rejections)
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A bounded wait elapsed without the condition being satisfied
    #[error("timeout [{context}]: condition not satisfied within {waited_secs}s")]
    Timeout {
        /// What was being waited for (e.g., "worker pod ready")
        context: String,
        /// How long the wait ran before giving up
        waited_secs: u64,
    },

    /// Apply collided with an existing object of a different identity
    #[error("conflict: {kind}/{name} already exists with a different identity: {message}")]
    Conflict {
        /// Resource kind (e.g., "ServiceAccount")
        kind: String,
        /// Resource name
        name: String,
        /// Description of the mismatch
        message: String,
    },

    /// A descriptor or resource spec is malformed
    #[error("invalid spec: {message}")]
    InvalidSpec {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.driver.serviceAccount")
        field: Option<String>,
    },

    /// One or more compliance rules failed for an object
    #[error("compliance failure for {object}: {} rule(s) violated", violations.len())]
    Compliance {
        /// Identity of the non-compliant object
        object: String,
        /// Every violated rule, with expected vs. observed detail
        violations: Vec<String>,
    },

    /// Malformed command invocation, surfaced before any cluster interaction
    #[error("usage error: {message}")]
    Usage {
        /// What was wrong with the invocation
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "watch", "worker")
        context: String,
    },
}

impl Error {
    /// Create a timeout error for the given wait
    pub fn timeout(context: impl Into<String>, waited: std::time::Duration) -> Self {
        Self::Timeout {
            context: context.into(),
            waited_secs: waited.as_secs(),
        }
    }

    /// Create a conflict error for an apply that hit a differently-shaped object
    pub fn conflict(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-spec error with the given message
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec {
            message: msg.into(),
            field: None,
        }
    }

    /// Create an invalid-spec error naming the offending field
    pub fn invalid_spec_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidSpec {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a compliance error carrying every violated rule
    pub fn compliance(object: impl Into<String>, violations: Vec<String>) -> Self {
        Self::Compliance {
            object: object.into(),
            violations,
        }
    }

    /// Create a usage error
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Transport errors are retryable unless the server rejected the request
    /// outright (4xx). Timeouts, conflicts, spec and usage errors require the
    /// caller or the user to change something first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Retry on transient K8s errors (connection, timeout).
                // Don't retry on 4xx errors (validation, conflict, not found).
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Timeout { .. } => false,
            Error::Conflict { .. } => false,
            Error::InvalidSpec { .. } => false,
            Error::Compliance { .. } => false,
            Error::Usage { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Timeout { context, .. } => Some(context),
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Story: a wait that never satisfies surfaces how long it ran and for what
    #[test]
    fn story_timeout_errors_name_the_wait() {
        let err = Error::timeout("driver pod ready", Duration::from_secs(180));
        assert!(err.to_string().contains("driver pod ready"));
        assert!(err.to_string().contains("180s"));
        assert!(!err.is_retryable());
        assert_eq!(err.context(), Some("driver pod ready"));
    }

    /// Story: apply collisions are surfaced immediately, never retried
    #[test]
    fn story_conflicts_are_terminal() {
        let err = Error::conflict("ServiceAccount", "spark-driver-abc123", "label mismatch");
        assert!(err.to_string().contains("ServiceAccount"));
        assert!(err.to_string().contains("spark-driver-abc123"));
        assert!(!err.is_retryable());
    }

    /// Story: compliance failures report every violated rule, not a boolean
    #[test]
    fn story_compliance_errors_carry_all_violations() {
        let err = Error::compliance(
            "pod/driver-0",
            vec![
                "run-as-non-root: expected true, observed unset".to_string(),
                "seccomp-runtime-default: expected RuntimeDefault, observed Unconfined".to_string(),
            ],
        );
        assert!(err.to_string().contains("pod/driver-0"));
        assert!(err.to_string().contains("2 rule(s)"));
        match &err {
            Error::Compliance { violations, .. } => assert_eq!(violations.len(), 2),
            _ => panic!("expected Compliance variant"),
        }
        assert!(!err.is_retryable());
    }

    /// Story: usage errors never reach the cluster and are not retryable
    #[test]
    fn story_usage_errors_are_user_facing() {
        let err = Error::usage("upload requires exactly one directory argument");
        assert!(err.to_string().contains("usage error"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_spec_names_the_field() {
        let err = Error::invalid_spec_field(
            "spec.driver.serviceAccount",
            "template omits the service account reference",
        );
        match &err {
            Error::InvalidSpec { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.driver.serviceAccount"));
            }
            _ => panic!("expected InvalidSpec variant"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn kube_client_side_errors_are_not_retryable() {
        let err = Error::Kube {
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "already exists".to_string(),
                reason: "AlreadyExists".to_string(),
                code: 409,
            }),
        };
        assert!(!err.is_retryable());

        let err = Error::Kube {
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "etcd leader changed".to_string(),
                reason: "ServiceUnavailable".to_string(),
                code: 503,
            }),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));
        assert!(err.is_retryable());
    }

    #[test]
    fn internal_error_with_context() {
        let err = Error::internal_with_context("worker", "pod vanished mid-transfer");
        assert_eq!(err.context(), Some("worker"));
        assert!(err.to_string().contains("[worker]"));
    }
}
