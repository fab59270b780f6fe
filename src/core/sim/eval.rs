//! Policy, layer and access evaluation
//!
//! The access decision combines five inputs: the resource policy, the
//! principal's identity policies, the principal account's SCP layers, the
//! resource account's RCP layers and the permission boundary. Any explicit
//! deny in the resource or identity policies is final, and every control
//! layer must allow. What remains depends on whether the call stays inside
//! one account.

use super::decision::Decision;
use super::statement::{self, Predicate};
use super::subject::Subject;
use crate::entities::{ManagedPolicy, KMS_KEY_TYPE};
use crate::iam::{Policy, Statement};
use std::fmt::Display;

/// Services whose resources are subject to RCPs
pub const RCP_SERVICES: &[&str] = &["s3", "sts", "sqs", "secretsmanager", "kms"];

pub(crate) fn evaluate_statement(
    subj: &mut Subject<'_>,
    index: usize,
    stmt: &Statement,
    predicates: &[Predicate],
) -> Decision {
    match &stmt.sid {
        Some(sid) => subj.trace.push(format_args!("statement {} ({})", index, sid)),
        None => subj.trace.push(format_args!("statement {}", index)),
    }

    let matched = predicates.iter().all(|predicate| predicate(subj, stmt));
    let decision = if matched {
        subj.trace.log(format_args!("matched, effect {:?}", stmt.effect));
        Decision::of(stmt.effect)
    } else {
        Decision::new()
    };

    subj.trace.pop();
    decision
}

/// Merge the decisions of every statement in `policy`
pub(crate) fn evaluate_policy(
    subj: &mut Subject<'_>,
    label: impl Display,
    policy: &Policy,
    predicates: &[Predicate],
) -> Decision {
    subj.trace.push(format_args!("policy {}", label));
    let mut decision = Decision::new();
    for (index, stmt) in policy.statement.iter().enumerate() {
        decision.merge(evaluate_statement(subj, index, stmt, predicates));
    }
    subj.trace.observation(format_args!("policy decision {}", decision));
    subj.trace.pop();
    decision
}

fn evaluate_managed(
    subj: &mut Subject<'_>,
    policies: &[ManagedPolicy],
    predicates: &[Predicate],
) -> Decision {
    let mut decision = Decision::new();
    for managed in policies {
        decision.merge(evaluate_policy(subj, &managed.arn, &managed.policy, predicates));
    }
    decision
}

/// Evaluate control policy layers root to leaf
///
/// The first layer that does not allow ends evaluation with its own
/// decision. No layers at all is an allow.
pub(crate) fn evaluate_layers(
    subj: &mut Subject<'_>,
    layers: &[&[ManagedPolicy]],
    predicates: &[Predicate],
) -> Decision {
    if layers.is_empty() {
        subj.trace.log("no layers");
        return Decision::allow();
    }

    let mut merged = Decision::new();
    for (depth, layer) in layers.iter().enumerate() {
        subj.trace.push(format_args!("layer {}", depth));
        let decision = evaluate_managed(subj, layer, predicates);
        subj.trace.pop();

        if !decision.allowed() {
            subj.trace
                .observation(format_args!("layer {} did not allow: {}", depth, decision));
            return decision;
        }
        merged.merge(decision);
    }
    merged
}

pub(crate) fn resource_access(subj: &mut Subject<'_>) -> Decision {
    let Some(resource) = subj.auth().resource.as_deref() else {
        return Decision::new();
    };
    let Some(policy) = resource.policy.as_ref() else {
        return Decision::new();
    };

    subj.trace.push("resource");
    let decision = evaluate_policy(subj, &resource.arn, policy, statement::RESOURCE_POLICY);
    subj.trace.pop();
    decision
}

pub(crate) fn principal_access(subj: &mut Subject<'_>) -> Decision {
    let Some(principal) = subj.auth().principal.as_deref() else {
        return Decision::new();
    };

    subj.trace.push("principal");
    let mut decision = Decision::new();
    for (index, policy) in principal.inline_policies.iter().enumerate() {
        let inline = match &policy.id {
            Some(id) => evaluate_policy(subj, id, policy, statement::IDENTITY),
            None => evaluate_policy(
                subj,
                format_args!("inline {}", index),
                policy,
                statement::IDENTITY,
            ),
        };
        decision.merge(inline);
    }
    decision.merge(evaluate_managed(subj, &principal.attached_policies, statement::IDENTITY));

    for group in &principal.groups {
        subj.trace.push(format_args!("group {}", group.arn));
        for (index, policy) in group.inline_policies.iter().enumerate() {
            decision.merge(evaluate_policy(
                subj,
                format_args!("inline {}", index),
                policy,
                statement::IDENTITY,
            ));
        }
        decision.merge(evaluate_managed(subj, &group.attached_policies, statement::IDENTITY));
        subj.trace.pop();
    }
    subj.trace.pop();
    decision
}

pub(crate) fn scp_access(subj: &mut Subject<'_>) -> Decision {
    let Some(account) = subj
        .auth()
        .principal
        .as_deref()
        .and_then(|p| p.account.as_ref())
    else {
        return Decision::allow();
    };

    subj.trace.push("scp");
    let decision = evaluate_layers(subj, &account.scp_layers(), statement::IDENTITY);
    subj.trace.pop();
    decision
}

pub(crate) fn rcp_access(subj: &mut Subject<'_>) -> Decision {
    let auth = subj.auth();
    let supported = auth.action.as_deref().map_or(false, |a| {
        RCP_SERVICES
            .iter()
            .any(|s| a.service.eq_ignore_ascii_case(s))
    });
    if !supported {
        return Decision::allow();
    }
    let Some(account) = auth
        .resource
        .as_deref()
        .and_then(|r| r.account.as_ref())
    else {
        return Decision::allow();
    };

    subj.trace.push("rcp");
    let decision = evaluate_layers(subj, &account.rcp_layers(), statement::RESOURCE_CONTROL);
    subj.trace.pop();
    decision
}

pub(crate) fn boundary_access(subj: &mut Subject<'_>) -> Decision {
    let Some(boundary) = subj
        .auth()
        .principal
        .as_deref()
        .and_then(|p| p.permission_boundary.as_ref())
    else {
        return Decision::allow();
    };

    subj.trace.push("boundary");
    let decision = evaluate_policy(subj, &boundary.arn, &boundary.policy, statement::IDENTITY);
    subj.trace.pop();
    decision
}

/// A resource policy statement naming the principal ARN exactly
pub(crate) fn same_account_grant(subj: &mut Subject<'_>) -> bool {
    let Some(policy) = subj
        .auth()
        .resource
        .as_deref()
        .and_then(|r| r.policy.as_ref())
    else {
        return false;
    };

    subj.trace.push("exact principal grant");
    let decision = evaluate_policy(subj, "resource", policy, statement::EXACT_GRANT);
    subj.trace.pop();
    decision.allowed()
}

/// Calls whose resource policy must allow even inside one account
pub(crate) fn is_strict_call(subj: &Subject<'_>) -> bool {
    let auth = subj.auth();
    let (Some(action), Some(_), Some(resource)) = (
        auth.action.as_deref(),
        auth.principal.as_deref(),
        auth.resource.as_deref(),
    ) else {
        return false;
    };

    subj.action_name
        .as_deref()
        .map_or(false, |name| name.eq_ignore_ascii_case("sts:assumerole"))
        || (action.service.eq_ignore_ascii_case("kms") && resource.resource_type == KMS_KEY_TYPE)
}

/// Principal and resource share an account, or there is no resource
pub(crate) fn is_same_account(subj: &Subject<'_>) -> bool {
    let auth = subj.auth();
    match (auth.principal.as_deref(), auth.resource.as_deref()) {
        (Some(principal), Some(resource)) => principal.account_id == resource.account_id,
        _ => true,
    }
}

/// Decide one request
pub(crate) fn evaluate_access(subj: &mut Subject<'_>) -> bool {
    let resource = resource_access(subj);
    if resource.explicitly_denied() {
        subj.trace.denied("explicit deny in resource policy");
        return false;
    }

    let principal = principal_access(subj);
    if principal.explicitly_denied() {
        subj.trace.denied("explicit deny in identity policy");
        return false;
    }

    if scp_access(subj).denied() {
        subj.trace.denied("service control policy does not allow");
        return false;
    }
    if rcp_access(subj).denied() {
        subj.trace.denied("resource control policy does not allow");
        return false;
    }
    if boundary_access(subj).denied() {
        subj.trace.denied("permission boundary does not allow");
        return false;
    }

    if is_same_account(subj) {
        if same_account_grant(subj) {
            subj.trace.allowed("resource policy names the principal");
            return true;
        }
        if principal.allowed() && !is_strict_call(subj) {
            subj.trace.allowed("identity policy allows within the account");
            return true;
        }
        if principal.allowed() && resource.allowed() {
            subj.trace.allowed("identity and resource policies allow");
            return true;
        }
        subj.trace.denied("no allow within the account");
        return false;
    }

    if principal.allowed() && resource.allowed() {
        subj.trace.allowed("identity and resource policies allow across accounts");
        true
    } else {
        subj.trace.denied("cross-account access needs both identity and resource allow");
        false
    }
}
