//! Security and resource-shape compliance rules.
//!
//! Rules are named, independent predicates declared once and applied
//! uniformly per role (driver, executor) and per level (pod, container), so
//! adding a role never duplicates a rule. Evaluation never short-circuits:
//! one run reports every violated invariant with the originating object's
//! identity attached.
//!
//! The canonical security rule set mirrors a restricted pod security
//! profile: no root, no privilege escalation, all capabilities dropped, the
//! platform-default seccomp profile, and user/group identifiers left unset
//! so the platform can assign them.

use std::fmt;

use k8s_openapi::api::core::v1::{Pod, PodSecurityContext, SecurityContext};

use crate::descriptor::RoleSpec;

/// A named, independently evaluable invariant over one object.
///
/// `check` returns `None` when the invariant holds, or an
/// expected-vs-observed detail string when violated. Rules are pure and may
/// be evaluated any number of times in any order.
pub struct Rule<T> {
    /// Stable rule name used in reports
    pub name: &'static str,
    /// The predicate; `Some(detail)` means violated
    pub check: fn(&T) -> Option<String>,
}

/// One violated rule, attributable to the object that violated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Identity of the object (e.g., "driver", "pod/foo/container/spark")
    pub object: String,
    /// Name of the violated rule
    pub rule: String,
    /// Expected vs. observed detail
    pub detail: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.object, self.rule, self.detail)
    }
}

/// Evaluate every rule against one object, collecting all violations.
pub fn evaluate<T>(object: &str, value: &T, rules: &[Rule<T>]) -> Vec<Violation> {
    rules
        .iter()
        .filter_map(|rule| {
            (rule.check)(value).map(|detail| Violation {
                object: object.to_string(),
                rule: rule.name.to_string(),
                detail,
            })
        })
        .collect()
}

/// Evaluate the same rule set against every member of a list, aggregating
/// violations with each member's identity attached.
pub fn evaluate_each<'a, T: 'a>(
    objects: impl IntoIterator<Item = (String, &'a T)>,
    rules: &[Rule<T>],
) -> Vec<Violation> {
    objects
        .into_iter()
        .flat_map(|(id, value)| evaluate(&id, value, rules))
        .collect()
}

fn fmt_opt<T: fmt::Debug>(v: &Option<T>) -> String {
    match v {
        Some(x) => format!("{:?}", x),
        None => "unset".to_string(),
    }
}

/// Container-level security rules, applied to descriptor roles and to every
/// container of observed pods.
pub const CONTAINER_SECURITY_RULES: &[Rule<SecurityContext>] = &[
    Rule {
        name: "run-as-non-root",
        check: |ctx| {
            (ctx.run_as_non_root != Some(true))
                .then(|| format!("expected runAsNonRoot=true, observed {}", fmt_opt(&ctx.run_as_non_root)))
        },
    },
    Rule {
        name: "no-privilege-escalation",
        check: |ctx| {
            (ctx.allow_privilege_escalation != Some(false)).then(|| {
                format!(
                    "expected allowPrivilegeEscalation=false, observed {}",
                    fmt_opt(&ctx.allow_privilege_escalation)
                )
            })
        },
    },
    Rule {
        name: "drop-all-capabilities",
        check: |ctx| {
            let drops_all = ctx
                .capabilities
                .as_ref()
                .and_then(|c| c.drop.as_ref())
                .is_some_and(|d| d.iter().any(|cap| cap == "ALL"));
            (!drops_all).then(|| "expected capabilities.drop to contain ALL".to_string())
        },
    },
    Rule {
        name: "seccomp-runtime-default",
        check: |ctx| {
            let profile = ctx.seccomp_profile.as_ref().map(|p| p.type_.as_str());
            (profile != Some("RuntimeDefault")).then(|| {
                format!(
                    "expected seccompProfile.type=RuntimeDefault, observed {}",
                    profile.unwrap_or("unset")
                )
            })
        },
    },
    Rule {
        name: "run-as-user-unset",
        check: |ctx| {
            ctx.run_as_user
                .map(|uid| format!("expected runAsUser unset so the platform assigns it, observed {}", uid))
        },
    },
    Rule {
        name: "run-as-group-unset",
        check: |ctx| {
            ctx.run_as_group
                .map(|gid| format!("expected runAsGroup unset so the platform assigns it, observed {}", gid))
        },
    },
];

/// Pod-level security rules (the pod security context has no privilege
/// escalation or capability fields; those are container-level).
pub const POD_SECURITY_RULES: &[Rule<PodSecurityContext>] = &[
    Rule {
        name: "run-as-non-root",
        check: |ctx| {
            (ctx.run_as_non_root != Some(true))
                .then(|| format!("expected runAsNonRoot=true, observed {}", fmt_opt(&ctx.run_as_non_root)))
        },
    },
    Rule {
        name: "seccomp-runtime-default",
        check: |ctx| {
            let profile = ctx.seccomp_profile.as_ref().map(|p| p.type_.as_str());
            (profile != Some("RuntimeDefault")).then(|| {
                format!(
                    "expected seccompProfile.type=RuntimeDefault, observed {}",
                    profile.unwrap_or("unset")
                )
            })
        },
    },
    Rule {
        name: "run-as-user-unset",
        check: |ctx| {
            ctx.run_as_user
                .map(|uid| format!("expected runAsUser unset so the platform assigns it, observed {}", uid))
        },
    },
    Rule {
        name: "run-as-group-unset",
        check: |ctx| {
            ctx.run_as_group
                .map(|gid| format!("expected runAsGroup unset so the platform assigns it, observed {}", gid))
        },
    },
];

/// Evaluate the container security rules against a descriptor role.
///
/// A role with no security context at all violates a dedicated presence
/// rule rather than silently passing.
pub fn role_security_violations(role_name: &str, role: &RoleSpec) -> Vec<Violation> {
    match &role.security_context {
        Some(ctx) => evaluate(role_name, ctx, CONTAINER_SECURITY_RULES),
        None => vec![Violation {
            object: role_name.to_string(),
            rule: "security-context-present".to_string(),
            detail: "no securityContext declared for the role".to_string(),
        }],
    }
}

/// Evaluate pod-level and per-container security rules against an observed
/// pod, attributing container violations to `pod/<name>/container/<name>`.
pub fn pod_security_violations(pod: &Pod) -> Vec<Violation> {
    let pod_name = pod.metadata.name.as_deref().unwrap_or("unnamed");
    let pod_id = format!("pod/{}", pod_name);
    let mut violations = Vec::new();

    match pod.spec.as_ref().and_then(|s| s.security_context.as_ref()) {
        Some(ctx) => violations.extend(evaluate(&pod_id, ctx, POD_SECURITY_RULES)),
        None => violations.push(Violation {
            object: pod_id.clone(),
            rule: "security-context-present".to_string(),
            detail: "pod has no securityContext".to_string(),
        }),
    }

    if let Some(spec) = pod.spec.as_ref() {
        for container in &spec.containers {
            let id = format!("{}/container/{}", pod_id, container.name);
            match &container.security_context {
                Some(ctx) => violations.extend(evaluate(&id, ctx, CONTAINER_SECURITY_RULES)),
                None => violations.push(Violation {
                    object: id,
                    rule: "security-context-present".to_string(),
                    detail: "container has no securityContext".to_string(),
                }),
            }
        }
    }

    violations
}

/// Expected resource shape for one role, taken from the profile a platform
/// mandates for the workload.
#[derive(Debug, Clone, Default)]
pub struct ExpectedRoleShape {
    /// Required core request
    pub cores: Option<i32>,
    /// Required core limit quantity
    pub core_limit: Option<String>,
    /// Required memory quantity
    pub memory: Option<String>,
    /// Minimum instance count (executors)
    pub min_instances: Option<i32>,
}

/// Compare a role's declared resources against the expected shape.
pub fn role_shape_violations(
    role_name: &str,
    role: &RoleSpec,
    expected: &ExpectedRoleShape,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut check = |rule: &str, expected_v: String, observed: String, ok: bool| {
        if !ok {
            violations.push(Violation {
                object: role_name.to_string(),
                rule: rule.to_string(),
                detail: format!("expected {}, observed {}", expected_v, observed),
            });
        }
    };

    if let Some(cores) = expected.cores {
        check(
            "cores-match",
            cores.to_string(),
            fmt_opt(&role.cores),
            role.cores == Some(cores),
        );
    }
    if let Some(limit) = &expected.core_limit {
        check(
            "core-limit-match",
            limit.clone(),
            fmt_opt(&role.core_limit),
            role.core_limit.as_deref() == Some(limit.as_str()),
        );
    }
    if let Some(memory) = &expected.memory {
        check(
            "memory-match",
            memory.clone(),
            fmt_opt(&role.memory),
            role.memory.as_deref() == Some(memory.as_str()),
        );
    }
    if let Some(min) = expected.min_instances {
        check(
            "min-instances",
            format!(">= {}", min),
            fmt_opt(&role.instances),
            role.instances.is_some_and(|n| n >= min),
        );
    }

    violations
}

/// Render violations as report lines for [`crate::Error::Compliance`].
pub fn report_lines(violations: &[Violation]) -> Vec<String> {
    violations.iter().map(|v| v.to_string()).collect()
}
