//! Partial typed model of a SparkApplication workload descriptor.
//!
//! Only the fields this tool reads or rewrites are modeled: identity,
//! per-role resources and security contexts, and the handful of top-level
//! fields the compliance rules look at. Everything else a template carries
//! is preserved verbatim through serde flattening, so re-serializing a
//! descriptor never loses data the operator needs.

use k8s_openapi::api::core::v1::SecurityContext;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// API group of the workload descriptor CRD
pub const API_GROUP: &str = "sparkoperator.k8s.io";
/// Full apiVersion of the workload descriptor
pub const API_VERSION: &str = "sparkoperator.k8s.io/v1beta2";
/// Kind of the workload descriptor
pub const KIND: &str = "SparkApplication";
/// Plural resource name
pub const PLURAL: &str = "sparkapplications";

/// Operator-reported state meaning the workload was accepted and submitted
pub const STATE_SUBMITTED: &str = "SUBMITTED";
/// Operator-reported state meaning driver/executors are running
pub const STATE_RUNNING: &str = "RUNNING";

/// Label the operator stamps onto every pod of an application
pub const APP_NAME_LABEL: &str = "sparkoperator.k8s.io/app-name";

/// ApiResource for SparkApplication (the CRD is not in k8s-openapi)
pub fn api_resource() -> ApiResource {
    ApiResource {
        group: API_GROUP.to_string(),
        version: "v1beta2".to_string(),
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        plural: PLURAL.to_string(),
    }
}

/// A batch workload descriptor as submitted to the cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDescriptor {
    /// Must be `sparkoperator.k8s.io/v1beta2`
    pub api_version: String,
    /// Must be `SparkApplication`
    pub kind: String,
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Workload specification
    pub spec: WorkloadSpec,
}

/// The subset of the SparkApplication spec this tool inspects.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    /// Application type (e.g., "Python")
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Deploy mode (e.g., "cluster")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Container image reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Image pull policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    /// Spark version the image carries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spark_version: Option<String>,
    /// Python version for Python applications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
    /// Entry point of the application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_application_file: Option<String>,
    /// Command-line arguments passed to the application
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    /// Restart policy block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    /// Seconds the terminated application is retained before garbage collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_live_seconds: Option<i64>,
    /// Driver role specification
    #[serde(default)]
    pub driver: RoleSpec,
    /// Executor role specification
    #[serde(default)]
    pub executor: RoleSpec,
    /// Fields this tool does not interpret, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Restart policy of the workload
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// Policy type (e.g., "Never", "OnFailure")
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Unmodeled policy fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-role (driver or executor) specification
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    /// Requested CPU cores
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<i32>,
    /// CPU limit (quantity string, e.g. "1200m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_limit: Option<String>,
    /// Memory request (e.g. "4g")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Instance count (executors only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<i32>,
    /// Service account the role's pods run under (driver only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    /// Container security context declared for the role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    /// Unmodeled role fields, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkloadDescriptor {
    /// Parse a descriptor from a YAML template.
    ///
    /// Goes through `serde_json::Value` so flattened maps behave uniformly
    /// regardless of source format.
    pub fn from_yaml(input: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(input)
            .map_err(|e| Error::invalid_spec(format!("descriptor is not valid YAML: {}", e)))?;
        let descriptor: WorkloadDescriptor = serde_json::from_value(value)
            .map_err(|e| Error::invalid_spec(format!("descriptor does not parse: {}", e)))?;

        if descriptor.api_version != API_VERSION {
            return Err(Error::invalid_spec_field(
                "apiVersion",
                format!("expected {}, got {}", API_VERSION, descriptor.api_version),
            ));
        }
        if descriptor.kind != KIND {
            return Err(Error::invalid_spec_field(
                "kind",
                format!("expected {}, got {}", KIND, descriptor.kind),
            ));
        }
        Ok(descriptor)
    }

    /// The descriptor's name, if set.
    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref()
    }

    /// Clear server-assigned metadata carried over from a template source.
    ///
    /// A template exported from a live cluster carries uid, resourceVersion,
    /// creationTimestamp, generation and managedFields; submitting those
    /// back fails or collides, so they are cleared before creation.
    pub fn strip_template_metadata(&mut self) {
        self.metadata.uid = None;
        self.metadata.resource_version = None;
        self.metadata.creation_timestamp = None;
        self.metadata.managed_fields = None;
        self.metadata.generation = None;
    }

    /// Rewrite identity fields before creation so the same template can be
    /// submitted repeatedly under different identities.
    ///
    /// Must be called before the descriptor is created, never after. The
    /// driver's service-account reference must exist in the template; a
    /// template that omits it would submit the workload under the namespace
    /// default account and defeat the RBAC set, so that is an error rather
    /// than a silent no-op.
    pub fn override_identity(
        &mut self,
        namespace: &str,
        name: &str,
        service_account: &str,
    ) -> Result<()> {
        if self.spec.driver.service_account.is_none() {
            return Err(Error::invalid_spec_field(
                "spec.driver.serviceAccount",
                "template omits the driver service-account reference, nothing to override",
            ));
        }
        self.metadata.namespace = Some(namespace.to_string());
        self.metadata.name = Some(name.to_string());
        self.spec.driver.service_account = Some(service_account.to_string());
        Ok(())
    }

    /// Convert to a `DynamicObject` for submission through the dynamic API.
    pub fn to_dynamic(&self) -> Result<DynamicObject> {
        let value = serde_json::to_value(self)
            .map_err(|e| Error::invalid_spec(format!("descriptor does not serialize: {}", e)))?;
        serde_json::from_value(value)
            .map_err(|e| Error::invalid_spec(format!("descriptor is not a valid object: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"
apiVersion: sparkoperator.k8s.io/v1beta2
kind: SparkApplication
metadata:
  name: docling-spark-job
  namespace: spark-jobs
  uid: 11111111-2222-3333-4444-555555555555
  resourceVersion: "98765"
  generation: 3
spec:
  type: Python
  pythonVersion: "3"
  mode: cluster
  image: quay.io/example/docling-spark:latest
  imagePullPolicy: Always
  sparkVersion: 3.5.0
  mainApplicationFile: local:///app/scripts/run_spark_job.py
  arguments:
    - --input-dir
    - /app/assets
    - --output-file
    - /app/output/results.jsonl
  restartPolicy:
    type: Never
  timeToLiveSeconds: 1200
  sparkConf:
    spark.kubernetes.allocation.batch.size: "2"
  driver:
    cores: 1
    coreLimit: 1200m
    memory: 4g
    serviceAccount: spark-driver
    securityContext:
      runAsNonRoot: true
      allowPrivilegeEscalation: false
      capabilities:
        drop: ["ALL"]
      seccompProfile:
        type: RuntimeDefault
  executor:
    cores: 1
    instances: 2
    memory: 4g
    securityContext:
      runAsNonRoot: true
      allowPrivilegeEscalation: false
      capabilities:
        drop: ["ALL"]
      seccompProfile:
        type: RuntimeDefault
"#;

    #[test]
    fn parses_the_fields_the_tool_reads() {
        let d = WorkloadDescriptor::from_yaml(TEMPLATE).unwrap();
        assert_eq!(d.name(), Some("docling-spark-job"));
        assert_eq!(d.spec.type_.as_deref(), Some("Python"));
        assert_eq!(d.spec.mode.as_deref(), Some("cluster"));
        assert_eq!(d.spec.spark_version.as_deref(), Some("3.5.0"));
        assert_eq!(
            d.spec.main_application_file.as_deref(),
            Some("local:///app/scripts/run_spark_job.py")
        );
        assert_eq!(d.spec.arguments.len(), 4);
        assert_eq!(
            d.spec.restart_policy.as_ref().unwrap().type_.as_deref(),
            Some("Never")
        );
        assert_eq!(d.spec.time_to_live_seconds, Some(1200));
        assert_eq!(d.spec.driver.cores, Some(1));
        assert_eq!(d.spec.driver.core_limit.as_deref(), Some("1200m"));
        assert_eq!(d.spec.executor.instances, Some(2));
        let driver_ctx = d.spec.driver.security_context.as_ref().unwrap();
        assert_eq!(driver_ctx.run_as_non_root, Some(true));
        assert!(driver_ctx.run_as_user.is_none());
    }

    #[test]
    fn unmodeled_fields_survive_a_round_trip() {
        let d = WorkloadDescriptor::from_yaml(TEMPLATE).unwrap();
        let value = serde_json::to_value(&d).unwrap();
        assert_eq!(
            value.pointer("/spec/sparkConf/spark.kubernetes.allocation.batch.size"),
            Some(&Value::String("2".to_string()))
        );
    }

    #[test]
    fn strip_clears_server_assigned_metadata() {
        let mut d = WorkloadDescriptor::from_yaml(TEMPLATE).unwrap();
        assert!(d.metadata.uid.is_some());
        d.strip_template_metadata();
        assert!(d.metadata.uid.is_none());
        assert!(d.metadata.resource_version.is_none());
        assert!(d.metadata.generation.is_none());
        assert!(d.metadata.creation_timestamp.is_none());
        assert!(d.metadata.managed_fields.is_none());
        // Identity is untouched by the strip.
        assert_eq!(d.name(), Some("docling-spark-job"));
    }

    #[test]
    fn override_rewrites_identity_and_nothing_else() {
        let mut d = WorkloadDescriptor::from_yaml(TEMPLATE).unwrap();
        d.override_identity("default", "docling-spark-job-abc123", "spark-driver-abc123")
            .unwrap();
        assert_eq!(d.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(d.name(), Some("docling-spark-job-abc123"));
        assert_eq!(
            d.spec.driver.service_account.as_deref(),
            Some("spark-driver-abc123")
        );
        // Untouched fields keep their template values.
        assert_eq!(d.spec.driver.memory.as_deref(), Some("4g"));
        assert_eq!(d.spec.executor.instances, Some(2));
    }

    #[test]
    fn override_errors_when_template_omits_service_account() {
        let stripped = TEMPLATE.replace("    serviceAccount: spark-driver\n", "");
        let mut d = WorkloadDescriptor::from_yaml(&stripped).unwrap();
        let err = d
            .override_identity("default", "x", "spark-driver-abc123")
            .unwrap_err();
        match err {
            Error::InvalidSpec { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.driver.serviceAccount"));
            }
            other => panic!("expected InvalidSpec, got {:?}", other),
        }
        // Identity must not be half-rewritten on the error path.
        assert_eq!(d.name(), Some("docling-spark-job"));
    }

    #[test]
    fn rejects_foreign_kinds() {
        let foreign = TEMPLATE.replace("kind: SparkApplication", "kind: Deployment");
        assert!(WorkloadDescriptor::from_yaml(&foreign).is_err());

        let wrong_version =
            TEMPLATE.replace("sparkoperator.k8s.io/v1beta2", "sparkoperator.k8s.io/v1beta1");
        assert!(WorkloadDescriptor::from_yaml(&wrong_version).is_err());
    }

    #[test]
    fn to_dynamic_carries_type_information() {
        let d = WorkloadDescriptor::from_yaml(TEMPLATE).unwrap();
        let dynamic = d.to_dynamic().unwrap();
        assert_eq!(dynamic.types.as_ref().unwrap().kind, KIND);
        assert_eq!(dynamic.types.as_ref().unwrap().api_version, API_VERSION);
    }
}
