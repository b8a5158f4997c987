//! Test helpers for the end-to-end suite
//!
//! Builds clients, namespaces, claims, and descriptor templates shared by
//! the stories.

use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim};
use kube::api::{Api, PostParams};
use kube::Client;

use sparkcheck::provision;

/// Namespace the suite runs in; override with SPARKCHECK_NAMESPACE.
pub fn test_namespace() -> String {
    std::env::var("SPARKCHECK_NAMESPACE").unwrap_or_else(|_| "sparkcheck-e2e".to_string())
}

/// Connect using the ambient kubeconfig.
pub async fn test_client() -> Client {
    Client::try_default()
        .await
        .expect("a reachable cluster is required for e2e tests")
}

/// Ensure the test namespace exists; reuse is fine across stories.
pub async fn ensure_namespace(client: &Client, name: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: kube::core::ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match api.create(&PostParams::default(), &ns).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 409 => {}
        Err(e) => panic!("could not ensure namespace {}: {}", name, e),
    }
}

/// Ensure a small RWO claim exists for transfer stories.
pub async fn ensure_claim(client: &Client, namespace: &str, name: &str) {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    let pvc: PersistentVolumeClaim = serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": { "name": name },
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "resources": { "requests": { "storage": "100Mi" } }
        }
    }))
    .expect("claim literal parses");
    match api.create(&PostParams::default(), &pvc).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 409 => {}
        Err(e) => panic!("could not ensure claim {}: {}", name, e),
    }
}

/// A compliant descriptor template with a fresh suffix baked into the name.
pub fn compliant_template(namespace: &str) -> (String, String) {
    let suffix = provision::unique_suffix();
    let name = format!("e2e-spark-{}", suffix);
    let yaml = format!(
        r#"
apiVersion: sparkoperator.k8s.io/v1beta2
kind: SparkApplication
metadata:
  name: {name}
  namespace: {namespace}
spec:
  type: Python
  pythonVersion: "3"
  mode: cluster
  image: quay.io/opendatahub/spark:3.5.5
  imagePullPolicy: IfNotPresent
  mainApplicationFile: local:///app/docling_convert.py
  sparkVersion: "3.5.5"
  timeToLiveSeconds: 600
  restartPolicy:
    type: Never
  driver:
    cores: 1
    coreLimit: "1200m"
    memory: "1g"
    serviceAccount: spark-driver
    securityContext:
      runAsNonRoot: true
      allowPrivilegeEscalation: false
      capabilities:
        drop: [ALL]
      seccompProfile:
        type: RuntimeDefault
  executor:
    cores: 1
    coreLimit: "1200m"
    memory: "1g"
    instances: 2
    securityContext:
      runAsNonRoot: true
      allowPrivilegeEscalation: false
      capabilities:
        drop: [ALL]
      seccompProfile:
        type: RuntimeDefault
"#
    );
    (name, yaml)
}
