//! Stories about submitting a workload and asserting the restricted
//! security profile.

use std::time::Duration;

use sparkcheck::compliance;
use sparkcheck::descriptor::{self, WorkloadDescriptor};
use sparkcheck::provision::{AuxiliaryResourceSet, OwnedResources, Provisioner};
use sparkcheck::store::Applied;
use sparkcheck::watch::{self, WatchConfig};
use sparkcheck::{Error, ROLE_DRIVER, ROLE_LABEL};

use crate::helpers;

fn watch_cfg() -> WatchConfig {
    WatchConfig::new(Duration::from_secs(5), Duration::from_secs(180))
}

#[tokio::test]
#[ignore = "requires a cluster with the Spark operator"]
async fn story_submission_reaches_operator_and_driver_is_compliant() {
    let client = helpers::test_client().await;
    let namespace = helpers::test_namespace();
    helpers::ensure_namespace(&client, &namespace).await;

    let (name, yaml) = helpers::compliant_template(&namespace);
    let mut workload = WorkloadDescriptor::from_yaml(&yaml).unwrap();
    workload.strip_template_metadata();

    let suffix = sparkcheck::provision::unique_suffix();
    let set = AuxiliaryResourceSet::new(&namespace, &suffix);
    workload
        .override_identity(&namespace, &name, set.service_account_name())
        .unwrap();
    let labels = workload.metadata.labels.get_or_insert_with(Default::default);
    for (k, v) in sparkcheck::provision::run_labels(&suffix) {
        labels.insert(k, v);
    }

    // Declared contexts must already satisfy the profile.
    assert!(compliance::role_security_violations("driver", &workload.spec.driver).is_empty());
    assert!(compliance::role_security_violations("executor", &workload.spec.executor).is_empty());

    let provisioner = Provisioner::new(client.clone());
    let mut owned = OwnedResources::new();
    provisioner.apply_aux(&set, &mut owned).await.unwrap();

    let applied = provisioner.apply_workload(&workload, &mut owned).await.unwrap();
    assert_eq!(applied, Applied::Created);

    // Re-applying the identical run is idempotent, not a duplicate.
    let mut again = OwnedResources::new();
    provisioner.apply_aux(&set, &mut again).await.unwrap();
    let reapplied = provisioner.apply_workload(&workload, &mut again).await.unwrap();
    assert_eq!(reapplied, Applied::Unchanged);

    let cfg = watch_cfg();
    let state = watch::wait_for_app_state(
        &client,
        &namespace,
        &name,
        &[descriptor::STATE_SUBMITTED, descriptor::STATE_RUNNING],
        &cfg,
    )
    .await
    .into_result("workload submitted", cfg.timeout)
    .unwrap();
    assert!(state == descriptor::STATE_SUBMITTED || state == descriptor::STATE_RUNNING);

    let selector = format!(
        "{}={},{}={}",
        descriptor::APP_NAME_LABEL,
        name,
        ROLE_LABEL,
        ROLE_DRIVER
    );
    let drivers = watch::wait_for_labeled_pods(&client, &namespace, &selector, 1, &cfg)
        .await
        .into_result("driver pod scheduled", cfg.timeout)
        .unwrap();

    for pod in &drivers {
        let violations = compliance::pod_security_violations(pod);
        assert!(
            violations.is_empty(),
            "driver pod violates the profile: {:?}",
            violations
        );
    }

    // The descriptor declares two executors; at least one must appear
    // before the deadline.
    let exec_selector = format!(
        "{}={},{}={}",
        descriptor::APP_NAME_LABEL,
        name,
        ROLE_LABEL,
        sparkcheck::ROLE_EXECUTOR
    );
    let executors = watch::wait_for_labeled_pods(&client, &namespace, &exec_selector, 1, &cfg)
        .await
        .into_result("executor pods scheduled", cfg.timeout)
        .unwrap();
    assert!(!executors.is_empty());

    owned.release(&client).await;
    assert!(owned.is_empty());
}

#[tokio::test]
#[ignore = "requires a cluster with the Spark operator"]
async fn story_explicit_run_as_user_is_rejected_before_submission() {
    let namespace = helpers::test_namespace();
    let (_, yaml) = helpers::compliant_template(&namespace);
    let mut workload = WorkloadDescriptor::from_yaml(&yaml).unwrap();
    workload
        .spec
        .driver
        .security_context
        .as_mut()
        .unwrap()
        .run_as_user = Some(1000);

    let violations = compliance::role_security_violations("driver", &workload.spec.driver);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].object, "driver");
    assert_eq!(violations[0].rule, "run-as-user-unset");

    let err = Error::compliance("driver", compliance::report_lines(&violations));
    assert!(!err.is_retryable());
}
