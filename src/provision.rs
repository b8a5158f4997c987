//! Declarative provisioning of auxiliary resources and the workload itself.
//!
//! A verification run needs an identity for the driver (ServiceAccount), the
//! permissions that identity requires (ClusterRole + ClusterRoleBinding),
//! and the workload descriptor. All four are correlated by one unique
//! suffix so parallel runs in the shared cluster never collide, and every
//! created object is recorded in an owned-resource ledger that is released
//! in reverse creation order on every exit path.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DynamicObject, PostParams};
use kube::Client;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::descriptor::{self, WorkloadDescriptor};
use crate::store::{self, Applied};
use crate::{Error, Result, MANAGED_BY_LABEL, MANAGED_BY_VALUE, SUFFIX_LABEL};

/// Generate a short unique suffix for one run.
///
/// Combines a millisecond timestamp xor pid with random bits so parallel
/// runs started in the same millisecond still diverge.
pub fn unique_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u32;
    let pid = std::process::id();
    let salt: u16 = rand::thread_rng().gen();
    format!("{:06x}{:04x}", (timestamp ^ pid) & 0xFF_FFFF, salt)
}

/// Labels identifying objects created by one run.
pub fn run_labels(suffix: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(SUFFIX_LABEL.to_string(), suffix.to_string());
    labels
}

/// The identity and permission objects one workload submission requires.
///
/// The binding's subject references exactly the set's ServiceAccount, and
/// deletion happens in reverse creation order (binding, role, account) so no
/// dangling reference window opens.
#[derive(Debug, Clone)]
pub struct AuxiliaryResourceSet {
    /// Unique suffix correlating the three objects
    pub suffix: String,
    /// Driver identity
    pub service_account: ServiceAccount,
    /// Permissions the driver needs to manage its executors
    pub role: ClusterRole,
    /// Grants the role to the identity
    pub binding: ClusterRoleBinding,
}

impl AuxiliaryResourceSet {
    /// Build the set for a namespace and suffix.
    ///
    /// The rule set matches what a Spark driver needs: full CRUD on pods,
    /// services, configmaps and persistent volume claims, plus event
    /// creation for status reporting.
    pub fn new(namespace: &str, suffix: &str) -> Self {
        let labels = run_labels(suffix);
        let sa_name = format!("spark-driver-{}", suffix);
        let role_name = format!("spark-driver-role-{}", suffix);
        let binding_name = format!("spark-driver-binding-{}", suffix);

        let service_account = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(sa_name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            ..Default::default()
        };

        let role = ClusterRole {
            metadata: ObjectMeta {
                name: Some(role_name.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            rules: Some(vec![
                PolicyRule {
                    api_groups: Some(vec![String::new()]),
                    resources: Some(vec![
                        "pods".to_string(),
                        "services".to_string(),
                        "configmaps".to_string(),
                        "persistentvolumeclaims".to_string(),
                    ]),
                    verbs: vec![
                        "create", "get", "list", "watch", "delete", "update", "patch",
                    ]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                    ..Default::default()
                },
                PolicyRule {
                    api_groups: Some(vec![String::new()]),
                    resources: Some(vec!["events".to_string()]),
                    verbs: vec!["create", "get", "list", "watch"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        let binding = ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(binding_name),
                labels: Some(labels),
                ..Default::default()
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: sa_name,
                namespace: Some(namespace.to_string()),
                ..Default::default()
            }]),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: role_name,
            },
        };

        Self {
            suffix: suffix.to_string(),
            service_account,
            role,
            binding,
        }
    }

    /// Name of the set's ServiceAccount (what the descriptor must reference).
    pub fn service_account_name(&self) -> &str {
        self.service_account
            .metadata
            .name
            .as_deref()
            .unwrap_or_default()
    }
}

/// A reference to one object created by this run.
#[derive(Debug, Clone)]
pub enum OwnedRef {
    /// A namespaced ServiceAccount
    ServiceAccount {
        /// Namespace of the account
        namespace: String,
        /// Name of the account
        name: String,
    },
    /// A cluster-scoped role
    ClusterRole {
        /// Name of the role
        name: String,
    },
    /// A cluster-scoped role binding
    ClusterRoleBinding {
        /// Name of the binding
        name: String,
    },
    /// The workload descriptor itself
    Workload {
        /// Namespace of the workload
        namespace: String,
        /// Name of the workload
        name: String,
    },
}

impl OwnedRef {
    fn describe(&self) -> String {
        match self {
            OwnedRef::ServiceAccount { namespace, name } => {
                format!("ServiceAccount {}/{}", namespace, name)
            }
            OwnedRef::ClusterRole { name } => format!("ClusterRole {}", name),
            OwnedRef::ClusterRoleBinding { name } => format!("ClusterRoleBinding {}", name),
            OwnedRef::Workload { namespace, name } => {
                format!("SparkApplication {}/{}", namespace, name)
            }
        }
    }
}

/// Ledger of objects created by one run, released in reverse creation order.
///
/// Replaces trap-based shell cleanup: every created object is recorded
/// immediately after creation, and `release` attempts every deletion even
/// when earlier ones fail, so a cleanup error never masks the original
/// failure or strands later resources.
#[derive(Debug, Default)]
pub struct OwnedResources {
    items: Vec<OwnedRef>,
}

impl OwnedResources {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a created object
    pub fn record(&mut self, item: OwnedRef) {
        self.items.push(item);
    }

    /// Number of recorded objects
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is recorded
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Delete every recorded object, newest first, best-effort.
    ///
    /// "Already absent" is success. Individual failures are logged and do
    /// not stop the remaining deletions.
    pub async fn release(&mut self, client: &Client) {
        while let Some(item) = self.items.pop() {
            let outcome = match &item {
                OwnedRef::ServiceAccount { namespace, name } => {
                    let api: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
                    store::delete_tolerant(&api, name).await
                }
                OwnedRef::ClusterRole { name } => {
                    let api: Api<ClusterRole> = Api::all(client.clone());
                    store::delete_tolerant(&api, name).await
                }
                OwnedRef::ClusterRoleBinding { name } => {
                    let api: Api<ClusterRoleBinding> = Api::all(client.clone());
                    store::delete_tolerant(&api, name).await
                }
                OwnedRef::Workload { namespace, name } => {
                    let api: Api<DynamicObject> =
                        Api::namespaced_with(client.clone(), namespace, &descriptor::api_resource());
                    store::delete_tolerant(&api, name).await
                }
            };
            match outcome {
                Ok(removed) => debug!(resource = %item.describe(), ?removed, "released"),
                Err(e) => warn!(resource = %item.describe(), error = %e, "release failed, continuing"),
            }
        }
    }
}

/// Applies and deletes the auxiliary set and the workload descriptor.
pub struct Provisioner {
    client: Client,
}

impl Provisioner {
    /// Create a provisioner over the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Apply the auxiliary set in creation order (account, role, binding),
    /// recording each created object in the ledger.
    ///
    /// Idempotent: re-applying a set with the same suffix is `Unchanged` for
    /// each member. A name collision with a foreign object is a conflict.
    pub async fn apply_aux(
        &self,
        set: &AuxiliaryResourceSet,
        owned: &mut OwnedResources,
    ) -> Result<()> {
        let namespace = set
            .service_account
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| Error::invalid_spec("service account has no namespace"))?;

        let sa_api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), &namespace);
        store::apply_unique(&sa_api, &set.service_account).await?;
        owned.record(OwnedRef::ServiceAccount {
            namespace: namespace.clone(),
            name: set.service_account_name().to_string(),
        });

        let role_api: Api<ClusterRole> = Api::all(self.client.clone());
        store::apply_unique(&role_api, &set.role).await?;
        owned.record(OwnedRef::ClusterRole {
            name: set.role.metadata.name.clone().unwrap_or_default(),
        });

        let binding_api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        store::apply_unique(&binding_api, &set.binding).await?;
        owned.record(OwnedRef::ClusterRoleBinding {
            name: set.binding.metadata.name.clone().unwrap_or_default(),
        });

        info!(suffix = %set.suffix, "auxiliary resource set applied");
        Ok(())
    }

    /// Submit the workload descriptor, recording it in the ledger.
    ///
    /// The descriptor must already have been stripped and identity-overridden;
    /// this method refuses one that still carries server-assigned metadata.
    pub async fn apply_workload(
        &self,
        workload: &WorkloadDescriptor,
        owned: &mut OwnedResources,
    ) -> Result<Applied> {
        if workload.metadata.resource_version.is_some() || workload.metadata.uid.is_some() {
            return Err(Error::invalid_spec(
                "descriptor carries server-assigned metadata; strip it before submission",
            ));
        }
        let namespace = workload
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| Error::invalid_spec_field("metadata.namespace", "not set"))?;
        let name = workload
            .name()
            .ok_or_else(|| Error::invalid_spec_field("metadata.name", "not set"))?
            .to_string();

        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &namespace, &descriptor::api_resource());
        let obj = workload.to_dynamic()?;

        let applied = match api.create(&PostParams::default(), &obj).await {
            Ok(_) => Applied::Created,
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                let existing = api.get(&name).await?;
                if store::same_run_identity(&obj.metadata, &existing.metadata) {
                    Applied::Unchanged
                } else {
                    return Err(Error::conflict(
                        descriptor::KIND,
                        name,
                        "existing workload does not carry this run's identity labels",
                    ));
                }
            }
            Err(kube::Error::Api(ae)) if ae.code == 400 || ae.code == 422 => {
                return Err(Error::invalid_spec(format!(
                    "{}/{} rejected by server: {}",
                    descriptor::KIND,
                    name,
                    ae.message
                )));
            }
            Err(e) => return Err(e.into()),
        };

        owned.record(OwnedRef::Workload { namespace, name });
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_subject_references_the_sets_account() {
        let set = AuxiliaryResourceSet::new("default", "abc123");
        let subject = &set.binding.subjects.as_ref().unwrap()[0];
        assert_eq!(subject.kind, "ServiceAccount");
        assert_eq!(subject.name, set.service_account_name());
        assert_eq!(subject.namespace.as_deref(), Some("default"));
        assert_eq!(
            set.binding.role_ref.name,
            set.role.metadata.name.clone().unwrap()
        );
    }

    #[test]
    fn all_members_share_the_suffix_and_labels() {
        let set = AuxiliaryResourceSet::new("default", "abc123");
        for meta in [
            &set.service_account.metadata,
            &set.role.metadata,
            &set.binding.metadata,
        ] {
            let labels = meta.labels.as_ref().unwrap();
            assert_eq!(labels.get(MANAGED_BY_LABEL).unwrap(), MANAGED_BY_VALUE);
            assert_eq!(labels.get(SUFFIX_LABEL).unwrap(), "abc123");
            assert!(meta.name.as_ref().unwrap().ends_with("abc123"));
        }
    }

    #[test]
    fn role_grants_driver_pod_management() {
        let set = AuxiliaryResourceSet::new("default", "abc123");
        let rules = set.role.rules.as_ref().unwrap();
        let pod_rule = rules
            .iter()
            .find(|r| {
                r.resources
                    .as_ref()
                    .is_some_and(|res| res.contains(&"pods".to_string()))
            })
            .expect("pod rule present");
        assert!(pod_rule.verbs.contains(&"create".to_string()));
        assert!(pod_rule.verbs.contains(&"delete".to_string()));
        assert!(pod_rule
            .resources
            .as_ref()
            .unwrap()
            .contains(&"persistentvolumeclaims".to_string()));
    }

    #[test]
    fn suffixes_diverge_between_calls() {
        let a = unique_suffix();
        let b = unique_suffix();
        assert_eq!(a.len(), 10);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ledger_pops_newest_first() {
        let mut owned = OwnedResources::new();
        owned.record(OwnedRef::ServiceAccount {
            namespace: "default".to_string(),
            name: "sa".to_string(),
        });
        owned.record(OwnedRef::ClusterRole {
            name: "role".to_string(),
        });
        owned.record(OwnedRef::ClusterRoleBinding {
            name: "binding".to_string(),
        });
        assert_eq!(owned.len(), 3);
        // Reverse creation order: the binding recorded last is deleted first,
        // so the role and account it references outlive it.
        let last = owned.items.pop().unwrap();
        assert!(matches!(last, OwnedRef::ClusterRoleBinding { .. }));
    }
}
