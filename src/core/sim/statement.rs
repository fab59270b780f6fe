//! Per-statement predicates
//!
//! A statement contributes its effect only when every predicate in the
//! evaluation's list passes. Each predicate records why it failed.

use super::subject::Subject;
use crate::iam::condition::{evaluate_block, substitute};
use crate::iam::{PatternMatcher, Principal, Statement, Value};

pub(crate) type Predicate = fn(&mut Subject<'_>, &Statement) -> bool;

/// Identity policies and permission boundaries
pub(crate) const IDENTITY: &[Predicate] = &[matches_action, matches_resource, matches_condition];

/// Resource policies, where a missing resource clause names the resource itself
pub(crate) const RESOURCE_POLICY: &[Predicate] = &[
    matches_action,
    matches_principal,
    matches_resource_policy_resource,
    matches_condition,
];

/// Resource control policies
pub(crate) const RESOURCE_CONTROL: &[Predicate] = &[
    matches_action,
    matches_principal,
    matches_resource,
    matches_condition,
];

/// Same-account grants naming the exact principal ARN
pub(crate) const EXACT_GRANT: &[Predicate] =
    &[matches_action, matches_principal_exact, matches_condition];

/// Pick the positive clause if present, else the negated one
fn clause<'s>(positive: &'s Value, negative: &'s Value) -> Option<(&'s Value, bool)> {
    if !positive.is_empty() {
        Some((positive, false))
    } else if !negative.is_empty() {
        Some((negative, true))
    } else {
        None
    }
}

pub(crate) fn matches_action(subj: &mut Subject<'_>, stmt: &Statement) -> bool {
    let Some(name) = subj.action_name.as_deref() else {
        subj.trace.observation("no action in request");
        return false;
    };
    let Some((patterns, inverted)) = clause(&stmt.action, &stmt.not_action) else {
        subj.trace.observation("statement has no action clause");
        return false;
    };

    let found = patterns
        .iter()
        .any(|p| PatternMatcher::matches_ignore_case(p, name));
    let matched = found != inverted;
    if !matched {
        subj.trace.observation(format_args!("action {} did not match", name));
    }
    matched
}

fn account_root_names(pattern: &str, account_id: &str) -> bool {
    pattern == account_id
        || pattern
            .strip_prefix("arn:aws:iam::")
            .and_then(|rest| rest.strip_suffix(":root"))
            == Some(account_id)
}

fn principal_clause_matches(clause: &Principal, arn: &str, account_id: &str) -> bool {
    clause.aws.iter().any(|p| {
        PatternMatcher::matches_all_or_nothing(p, arn) || account_root_names(p, account_id)
    })
}

pub(crate) fn matches_principal(subj: &mut Subject<'_>, stmt: &Statement) -> bool {
    let Some(principal) = subj.auth().principal.as_deref() else {
        subj.trace.observation("no principal in request");
        return false;
    };

    if stmt.principal.all {
        return true;
    }
    if stmt.not_principal.all {
        subj.trace.observation("NotPrincipal excludes everyone");
        return false;
    }

    let matched = if !stmt.principal.is_empty() {
        principal_clause_matches(&stmt.principal, &principal.arn, &principal.account_id)
    } else if !stmt.not_principal.is_empty() {
        !principal_clause_matches(&stmt.not_principal, &principal.arn, &principal.account_id)
    } else {
        false
    };

    if !matched {
        subj.trace
            .observation(format_args!("principal {} did not match", principal.arn));
    }
    matched
}

pub(crate) fn matches_principal_exact(subj: &mut Subject<'_>, stmt: &Statement) -> bool {
    let Some(principal) = subj.auth().principal.as_deref() else {
        return false;
    };
    let matched = stmt.principal.aws.contains(&principal.arn);
    if !matched {
        subj.trace.observation(format_args!(
            "principal {} is not named exactly",
            principal.arn
        ));
    }
    matched
}

pub(crate) fn matches_resource(subj: &mut Subject<'_>, stmt: &Statement) -> bool {
    let auth = subj.auth();
    let Some((patterns, inverted)) = clause(&stmt.resource, &stmt.not_resource) else {
        subj.trace.observation("statement has no resource clause");
        return false;
    };

    let found = match auth.resource.as_deref() {
        Some(resource) => patterns.iter().any(|p| {
            let pattern = if p.contains("${") {
                substitute(p, &subj.keys)
            } else {
                p.as_str().into()
            };
            PatternMatcher::matches(&pattern, &resource.arn)
        }),
        None => {
            if auth.action.as_deref().map_or(false, |a| a.has_targets()) {
                subj.trace.observation("action requires a resource");
                return false;
            }
            patterns.contains("*")
        }
    };

    let matched = found != inverted;
    if !matched {
        match auth.resource.as_deref() {
            Some(resource) => subj
                .trace
                .observation(format_args!("resource {} did not match", resource.arn)),
            None => subj.trace.observation("statement does not name every resource"),
        }
    }
    matched
}

pub(crate) fn matches_resource_policy_resource(subj: &mut Subject<'_>, stmt: &Statement) -> bool {
    if stmt.resource.is_empty() && stmt.not_resource.is_empty() {
        return true;
    }
    matches_resource(subj, stmt)
}

pub(crate) fn matches_condition(subj: &mut Subject<'_>, stmt: &Statement) -> bool {
    evaluate_block(&stmt.condition, &subj.keys, &mut subj.trace)
}
