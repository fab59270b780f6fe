//! Request context and condition-key resolution

use super::bag::PropertyBag;
use super::trace::Trace;
use crate::catalog::Action;
use crate::entities::{FrozenPrincipal, FrozenResource, ROLE_TYPE, USER_TYPE};
use crate::error::{Result, SimError};
use crate::iam::condition::ConditionKeys;
use crate::iam::keys;
use crate::options::Options;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One authorization request
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub action: Option<Arc<Action>>,
    pub principal: Option<Arc<FrozenPrincipal>>,
    pub resource: Option<Arc<FrozenResource>>,
    /// Single-valued condition keys supplied with the request
    pub properties: PropertyBag<String>,
    pub multi_properties: PropertyBag<Vec<String>>,
}

impl AuthContext {
    pub fn new(
        action: Arc<Action>,
        principal: Arc<FrozenPrincipal>,
        resource: Option<Arc<FrozenResource>>,
    ) -> Self {
        AuthContext {
            action: Some(action),
            principal: Some(principal),
            resource,
            ..Default::default()
        }
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key, value.to_string());
        self
    }

    pub fn with_multi_property(mut self, key: &str, values: &[&str]) -> Self {
        self.multi_properties
            .insert(key, values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// Check the request shape against the action's authorization metadata
    ///
    /// Action and principal are always required. The resource checks are
    /// skipped under `skip_service_authorization_validation`.
    pub fn validate(&self, options: &Options) -> Result<()> {
        let action = self
            .action
            .as_ref()
            .ok_or_else(|| SimError::InvalidRequest("missing action".to_string()))?;
        if self.principal.is_none() {
            return Err(SimError::InvalidRequest("missing principal".to_string()));
        }
        if options.skip_service_authorization_validation {
            return Ok(());
        }

        match &self.resource {
            Some(resource) if !action.has_targets() => Err(SimError::InvalidRequest(format!(
                "{} does not target a resource, got {}",
                action.short_name(),
                resource.arn
            ))),
            Some(resource) if !action.targets(&resource.arn) => {
                Err(SimError::InvalidRequest(format!(
                    "{} cannot target {}",
                    action.short_name(),
                    resource.arn
                )))
            }
            None if action.has_targets() => Err(SimError::InvalidRequest(format!(
                "{} requires a resource",
                action.short_name()
            ))),
            _ => Ok(()),
        }
    }
}

/// `Role`/`User` for `aws:PrincipalType`
fn principal_kind(principal_type: &str) -> Option<&'static str> {
    match principal_type {
        ROLE_TYPE => Some("Role"),
        USER_TYPE => Some("User"),
        _ => None,
    }
}

fn lookup_ignore_case<'m, T>(
    map: &'m std::collections::BTreeMap<String, T>,
    key: &str,
) -> Option<&'m T> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Condition keys for one request
///
/// Entity-derived keys come from the principal and resource. Everything
/// else is read from the request properties, then from the option context.
pub struct RequestKeys<'a> {
    auth: &'a AuthContext,
    options: &'a Options,
    now: DateTime<Utc>,
}

impl<'a> RequestKeys<'a> {
    pub fn new(auth: &'a AuthContext, options: &'a Options) -> Self {
        Self::at(auth, options, Utc::now())
    }

    /// Resolve time keys against a fixed instant
    pub fn at(auth: &'a AuthContext, options: &'a Options, now: DateTime<Utc>) -> Self {
        RequestKeys { auth, options, now }
    }

    fn applies(&self, key: &str) -> bool {
        self.options.skip_service_authorization_validation
            || self
                .auth
                .action
                .as_ref()
                .map_or(true, |a| a.supports_condition_key(key))
    }

    fn property(&self, key: &str) -> Option<String> {
        self.auth
            .properties
            .get(key)
            .or_else(|| lookup_ignore_case(&self.options.context, key))
            .cloned()
    }

    fn multi_property(&self, key: &str) -> Vec<String> {
        self.auth
            .multi_properties
            .get(key)
            .or_else(|| lookup_ignore_case(&self.options.multi_context, key))
            .cloned()
            .unwrap_or_default()
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let principal = self.auth.principal.as_deref();
        let resource = self.auth.resource.as_deref();

        match key {
            keys::PRINCIPAL_ARN => principal.map(|p| p.arn.clone()),
            keys::PRINCIPAL_ACCOUNT => principal.map(|p| p.account_id.clone()),
            keys::PRINCIPAL_ORG_ID => principal
                .and_then(|p| p.account.as_ref())
                .map(|a| a.org_id.clone()),
            keys::PRINCIPAL_TYPE => principal
                .and_then(|p| principal_kind(&p.principal_type))
                .map(str::to_string),
            keys::RESOURCE_ACCOUNT => resource.map(|r| r.account_id.clone()),
            keys::RESOURCE_ORG_ID => resource
                .and_then(|r| r.account.as_ref())
                .map(|a| a.org_id.clone()),
            keys::CURRENT_TIME => self
                .property(key)
                .or_else(|| Some(self.now.format("%Y-%m-%dT%H:%M:%SZ").to_string())),
            keys::EPOCH_TIME => self
                .property(key)
                .or_else(|| Some(self.now.timestamp().to_string())),
            _ if key.starts_with(keys::PRINCIPAL_TAG_PREFIX) => {
                keys::tag_name(key, keys::PRINCIPAL_TAG_PREFIX)
                    .and_then(|name| principal.and_then(|p| p.tag(name)))
                    .map(str::to_string)
            }
            _ if key.starts_with(keys::RESOURCE_TAG_PREFIX) => {
                keys::tag_name(key, keys::RESOURCE_TAG_PREFIX)
                    .and_then(|name| resource.and_then(|r| r.tag(name)))
                    .map(str::to_string)
            }
            _ => self.property(key),
        }
    }
}

impl ConditionKeys for RequestKeys<'_> {
    fn single(&self, key: &str) -> Option<String> {
        let key = key.to_lowercase();
        if !self.applies(&key) {
            return None;
        }
        self.lookup(&key).filter(|v| !v.is_empty())
    }

    fn multi(&self, key: &str) -> Vec<String> {
        let key = key.to_lowercase();
        if !self.applies(&key) {
            return Vec::new();
        }

        let org_paths = |account: Option<&crate::entities::FrozenAccount>| {
            account.map(|a| a.org_paths.clone()).unwrap_or_default()
        };
        match key.as_str() {
            keys::PRINCIPAL_ORG_PATHS => org_paths(
                self.auth
                    .principal
                    .as_deref()
                    .and_then(|p| p.account.as_ref()),
            ),
            keys::RESOURCE_ORG_PATHS => org_paths(
                self.auth
                    .resource
                    .as_deref()
                    .and_then(|r| r.account.as_ref()),
            ),
            _ => self.multi_property(&key),
        }
    }
}

/// Evaluation state for one simulation: the request keys and its trace
///
/// The two halves are separate fields so a condition block can borrow the
/// keys while writing to the trace.
pub(crate) struct Subject<'a> {
    pub(crate) keys: RequestKeys<'a>,
    pub(crate) trace: Trace,
    /// `service:Name` of the requested action, rendered once per request
    pub(crate) action_name: Option<String>,
}

impl<'a> Subject<'a> {
    pub(crate) fn new(auth: &'a AuthContext, options: &'a Options) -> Self {
        Subject {
            keys: RequestKeys::new(auth, options),
            trace: Trace::new(options.enable_tracing),
            action_name: auth.action.as_deref().map(Action::short_name),
        }
    }

    pub(crate) fn auth(&self) -> &'a AuthContext {
        self.keys.auth
    }
}
