//! Deploy command — apply the RBAC set and submit a workload descriptor,
//! then verify it is accepted and its driver pod complies with the
//! restricted security profile.
//!
//! The template's security contexts are checked before anything touches the
//! cluster, so a non-compliant descriptor fails fast. Everything created is
//! recorded in an owned-resource ledger and released on every exit path,
//! success or failure, unless `SPARKCHECK_KEEP_RESOURCES` asks to preserve
//! it for debugging.

use std::fs;
use std::path::PathBuf;

use clap::Args;
use tracing::{info, warn};

use crate::compliance;
use crate::descriptor::{self, WorkloadDescriptor};
use crate::provision::{self, AuxiliaryResourceSet, OwnedResources, Provisioner};
use crate::watch;
use crate::{Error, Result, ROLE_DRIVER, ROLE_LABEL};

use super::CommandContext;

/// Apply the RBAC set and submit a workload descriptor
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Path to the workload descriptor template
    #[arg(short = 'f', long = "file", default_value = "manifests/spark-app.yaml")]
    pub file: PathBuf,
}

pub async fn run(args: DeployArgs) -> Result<()> {
    let template = fs::read_to_string(&args.file).map_err(|e| {
        Error::usage(format!(
            "cannot read descriptor template {}: {}",
            args.file.display(),
            e
        ))
    })?;
    let mut workload = WorkloadDescriptor::from_yaml(&template)?;

    // Check the declared security contexts before any cluster interaction.
    let mut declared = compliance::role_security_violations("driver", &workload.spec.driver);
    declared.extend(compliance::role_security_violations(
        "executor",
        &workload.spec.executor,
    ));
    if !declared.is_empty() {
        return Err(Error::compliance(
            workload.name().unwrap_or("workload").to_string(),
            compliance::report_lines(&declared),
        ));
    }

    let ctx = CommandContext::from_env().await?;
    let suffix = provision::unique_suffix();
    let set = AuxiliaryResourceSet::new(&ctx.settings.namespace, &suffix);

    workload.strip_template_metadata();
    let run_name = format!(
        "{}-{}",
        workload.name().unwrap_or("spark-app"),
        suffix
    );
    workload.override_identity(&ctx.settings.namespace, &run_name, set.service_account_name())?;
    let labels = workload.metadata.labels.get_or_insert_with(Default::default);
    for (k, v) in provision::run_labels(&suffix) {
        labels.insert(k, v);
    }

    let provisioner = Provisioner::new(ctx.client.clone());
    let mut owned = OwnedResources::new();
    let outcome = submit_and_verify(&ctx, &provisioner, &set, &workload, &run_name, &mut owned).await;

    if ctx.settings.keep_resources {
        info!(
            suffix = %suffix,
            "keeping provisioned resources (SPARKCHECK_KEEP_RESOURCES=true)"
        );
    } else {
        owned.release(&ctx.client).await;
    }

    outcome?;
    println!("deployed {} in namespace {}", run_name, ctx.settings.namespace);
    Ok(())
}

/// Apply everything and watch the workload come up; the caller owns the
/// ledger so release happens on every path.
async fn submit_and_verify(
    ctx: &CommandContext,
    provisioner: &Provisioner,
    set: &AuxiliaryResourceSet,
    workload: &WorkloadDescriptor,
    run_name: &str,
    owned: &mut OwnedResources,
) -> Result<()> {
    provisioner.apply_aux(set, owned).await?;
    let applied = provisioner.apply_workload(workload, owned).await?;
    info!(name = %run_name, ?applied, "workload submitted");

    let cfg = ctx.watch_config();
    let state = watch::wait_for_app_state(
        &ctx.client,
        &ctx.settings.namespace,
        run_name,
        &[descriptor::STATE_SUBMITTED, descriptor::STATE_RUNNING],
        &cfg,
    )
    .await
    .into_result("workload submitted", cfg.timeout)?;
    info!(name = %run_name, state = %state, "workload accepted by the operator");

    let selector = format!(
        "{}={},{}={}",
        descriptor::APP_NAME_LABEL,
        run_name,
        ROLE_LABEL,
        ROLE_DRIVER
    );
    let drivers = watch::wait_for_labeled_pods(&ctx.client, &ctx.settings.namespace, &selector, 1, &cfg)
        .await
        .into_result("driver pod scheduled", cfg.timeout)?;

    let mut violations = Vec::new();
    for pod in &drivers {
        violations.extend(compliance::pod_security_violations(pod));
    }
    if !violations.is_empty() {
        warn!(count = violations.len(), "driver pod violates the security profile");
        return Err(Error::compliance(
            run_name.to_string(),
            compliance::report_lines(&violations),
        ));
    }

    info!(name = %run_name, drivers = drivers.len(), "driver pod compliant");
    Ok(())
}
