//! End-to-end tests for sparkcheck
//!
//! These tests require a Kubernetes cluster with the Spark operator
//! installed, and tell the story of one verification run: provision RBAC,
//! submit a workload, watch it come up, assert compliance, and move data
//! through the transfer worker.
//!
//! # Test Organization
//!
//! - `compliance_flow`: Stories about submitting a workload descriptor and
//!   asserting the restricted security profile against declared roles and
//!   observed pods
//!
//! - `transfer_roundtrip`: Stories about uploading a local directory into
//!   the data volume claim and downloading it back byte-identical
//!
//! # Running These Tests
//!
//! The tests are ignored by default because they require a cluster:
//!
//! ```bash
//! # Point at a cluster with the Spark operator and a default StorageClass
//! export SPARKCHECK_NAMESPACE=sparkcheck-e2e
//! cargo test --test e2e -- --ignored --nocapture
//! ```

mod compliance_flow;
mod helpers;
mod transfer_roundtrip;
