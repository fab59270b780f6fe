//! Frozen entity snapshots
//!
//! A frozen principal or resource carries every policy it references already
//! resolved to a policy body, so evaluation never looks anything up. The
//! [`EntityGraph`] trait is the seam to whatever built those snapshots;
//! [`Snapshot`] is the in-memory implementation.

use crate::error::{Result, SimError};
use crate::iam::Policy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const ROLE_TYPE: &str = "AWS::IAM::Role";
pub const USER_TYPE: &str = "AWS::IAM::User";
pub const S3_BUCKET_TYPE: &str = "AWS::S3::Bucket";
pub const S3_OBJECT_TYPE: &str = "AWS::S3::Object";
pub const KMS_KEY_TYPE: &str = "AWS::KMS::Key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: &str, value: &str) -> Self {
        Tag {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

fn find_tag<'a>(tags: &'a [Tag], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.key.eq_ignore_ascii_case(key))
        .map(|t| t.value.as_str())
}

/// A managed policy with its body resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedPolicy {
    pub arn: String,
    #[serde(default)]
    pub name: String,
    pub policy: Policy,
}

impl ManagedPolicy {
    pub fn new(arn: &str, policy: Policy) -> Self {
        let name = arn.rsplit('/').next().unwrap_or(arn).to_string();
        ManagedPolicy {
            arn: arn.to_string(),
            name,
            policy,
        }
    }
}

/// One node of an organization path (root, OU or account)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrozenOrgNode {
    pub id: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub arn: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub scps: Vec<ManagedPolicy>,
    #[serde(default)]
    pub rcps: Vec<ManagedPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrozenAccount {
    pub id: String,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub org_paths: Vec<String>,
    /// Ordered root to leaf
    #[serde(default)]
    pub org_nodes: Vec<FrozenOrgNode>,
}

impl FrozenAccount {
    pub fn new(id: &str) -> Self {
        FrozenAccount {
            id: id.to_string(),
            ..Default::default()
        }
    }

    /// SCP layers, one per org node; empty when no node has any SCP
    pub fn scp_layers(&self) -> Vec<&[ManagedPolicy]> {
        layers(self.org_nodes.iter().map(|n| n.scps.as_slice()))
    }

    /// RCP layers, one per org node; empty when no node has any RCP
    pub fn rcp_layers(&self) -> Vec<&[ManagedPolicy]> {
        layers(self.org_nodes.iter().map(|n| n.rcps.as_slice()))
    }
}

fn layers<'a>(nodes: impl Iterator<Item = &'a [ManagedPolicy]>) -> Vec<&'a [ManagedPolicy]> {
    let layers: Vec<_> = nodes.collect();
    if layers.iter().all(|l| l.is_empty()) {
        return Vec::new();
    }
    layers
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrozenGroup {
    pub arn: String,
    #[serde(default)]
    pub inline_policies: Vec<Policy>,
    #[serde(default)]
    pub attached_policies: Vec<ManagedPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrozenPrincipal {
    #[serde(rename = "type")]
    pub principal_type: String,
    pub account_id: String,
    pub arn: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub inline_policies: Vec<Policy>,
    #[serde(default)]
    pub attached_policies: Vec<ManagedPolicy>,
    #[serde(default)]
    pub groups: Vec<FrozenGroup>,
    #[serde(default)]
    pub permission_boundary: Option<ManagedPolicy>,
    #[serde(default)]
    pub account: Option<FrozenAccount>,
    /// References the freezer could not resolve
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

impl FrozenPrincipal {
    pub fn new(principal_type: &str, account_id: &str, arn: &str) -> Self {
        FrozenPrincipal {
            principal_type: principal_type.to_string(),
            account_id: account_id.to_string(),
            arn: arn.to_string(),
            ..Default::default()
        }
    }

    pub fn role(account_id: &str, name: &str) -> Self {
        let arn = format!("arn:aws:iam::{}:role/{}", account_id, name);
        Self::new(ROLE_TYPE, account_id, &arn)
    }

    pub fn user(account_id: &str, name: &str) -> Self {
        let arn = format!("arn:aws:iam::{}:user/{}", account_id, name);
        Self::new(USER_TYPE, account_id, &arn)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        find_tag(&self.tags, key)
    }

    /// Every identity policy: inline, attached, then each group's
    pub fn identity_policies(&self) -> impl Iterator<Item = &Policy> {
        let groups = self.groups.iter().flat_map(|g| {
            g.inline_policies
                .iter()
                .chain(g.attached_policies.iter().map(|mp| &mp.policy))
        });
        self.inline_policies
            .iter()
            .chain(self.attached_policies.iter().map(|mp| &mp.policy))
            .chain(groups)
    }

    /// Identity policies plus boundary and SCPs
    pub fn all_policies(&self) -> impl Iterator<Item = &Policy> {
        let scps = self
            .account
            .iter()
            .flat_map(|a| a.org_nodes.iter().flat_map(|n| n.scps.iter()))
            .map(|mp| &mp.policy);
        self.identity_policies()
            .chain(self.permission_boundary.iter().map(|mp| &mp.policy))
            .chain(scps)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrozenResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub account_id: String,
    #[serde(default)]
    pub region: String,
    pub arn: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub policy: Option<Policy>,
    #[serde(default)]
    pub account: Option<FrozenAccount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
}

impl FrozenResource {
    pub fn new(resource_type: &str, account_id: &str, arn: &str) -> Self {
        FrozenResource {
            resource_type: resource_type.to_string(),
            account_id: account_id.to_string(),
            arn: arn.to_string(),
            ..Default::default()
        }
    }

    /// Lowercase service name from a type such as `AWS::S3::Bucket`
    pub fn service(&self) -> String {
        self.resource_type
            .split("::")
            .nth(1)
            .map(str::to_lowercase)
            .unwrap_or_default()
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        find_tag(&self.tags, key)
    }

    /// A child resource under this one, e.g. an object in a bucket
    pub fn subresource(&self, key: &str) -> FrozenResource {
        let arn = format!(
            "{}/{}",
            self.arn.trim_end_matches('/'),
            key.trim_start_matches('/')
        );
        let resource_type = if self.resource_type == S3_BUCKET_TYPE {
            S3_OBJECT_TYPE.to_string()
        } else {
            self.resource_type.clone()
        };
        FrozenResource {
            resource_type,
            arn,
            ..self.clone()
        }
    }

    /// Resource policy plus RCPs
    pub fn all_policies(&self) -> impl Iterator<Item = &Policy> {
        let rcps = self
            .account
            .iter()
            .flat_map(|a| a.org_nodes.iter().flat_map(|n| n.rcps.iter()))
            .map(|mp| &mp.policy);
        self.policy.iter().chain(rcps)
    }
}

/// Read access to frozen entities by ARN
pub trait EntityGraph: Send + Sync {
    fn principal(&self, arn: &str) -> Option<Arc<FrozenPrincipal>>;
    fn resource(&self, arn: &str) -> Option<Arc<FrozenResource>>;
    fn principal_arns(&self) -> Vec<String>;
    fn resource_arns(&self) -> Vec<String>;
}

/// In-memory set of frozen entities keyed by ARN
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    principals: BTreeMap<String, Arc<FrozenPrincipal>>,
    resources: BTreeMap<String, Arc<FrozenResource>>,
}

#[derive(Default, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    principals: Vec<FrozenPrincipal>,
    #[serde(default)]
    resources: Vec<FrozenResource>,
}

impl Snapshot {
    pub fn new() -> Self {
        Snapshot::default()
    }

    pub fn add_principal(&mut self, principal: FrozenPrincipal) {
        self.principals
            .insert(principal.arn.clone(), Arc::new(principal));
    }

    pub fn add_resource(&mut self, resource: FrozenResource) {
        self.resources.insert(resource.arn.clone(), Arc::new(resource));
    }

    pub fn with_principal(mut self, principal: FrozenPrincipal) -> Self {
        self.add_principal(principal);
        self
    }

    pub fn with_resource(mut self, resource: FrozenResource) -> Self {
        self.add_resource(resource);
        self
    }

    pub fn len(&self) -> usize {
        self.principals.len() + self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty() && self.resources.is_empty()
    }

    /// Load a snapshot, validating every policy it carries
    pub fn from_json(json: &str) -> Result<Self> {
        let file: SnapshotFile = serde_json::from_str(json)?;
        let mut snapshot = Snapshot::new();

        for principal in file.principals {
            for policy in principal.all_policies() {
                policy.validate().map_err(|e| in_entity(&principal.arn, e))?;
            }
            snapshot.add_principal(principal);
        }
        for resource in file.resources {
            if let Some(policy) = &resource.policy {
                policy
                    .validate_resource_policy()
                    .map_err(|e| in_entity(&resource.arn, e))?;
            }
            let rcps = resource
                .account
                .iter()
                .flat_map(|a| a.org_nodes.iter().flat_map(|n| n.rcps.iter()));
            for rcp in rcps {
                rcp.policy.validate().map_err(|e| in_entity(&resource.arn, e))?;
            }
            snapshot.add_resource(resource);
        }

        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<String> {
        let file = SnapshotFile {
            principals: self.principals.values().map(|p| (**p).clone()).collect(),
            resources: self.resources.values().map(|r| (**r).clone()).collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }
}

fn in_entity(arn: &str, err: SimError) -> SimError {
    match err {
        SimError::InvalidPolicy(msg) => SimError::InvalidPolicy(format!("{}: {}", arn, msg)),
        other => other,
    }
}

impl EntityGraph for Snapshot {
    fn principal(&self, arn: &str) -> Option<Arc<FrozenPrincipal>> {
        self.principals.get(arn).cloned()
    }

    fn resource(&self, arn: &str) -> Option<Arc<FrozenResource>> {
        self.resources.get(arn).cloned()
    }

    fn principal_arns(&self) -> Vec<String> {
        self.principals.keys().cloned().collect()
    }

    fn resource_arns(&self) -> Vec<String> {
        self.resources.keys().cloned().collect()
    }
}

/// Sorted union of ARNs from several graphs
pub(crate) fn union_arns(lists: impl IntoIterator<Item = Vec<String>>) -> Vec<String> {
    lists
        .into_iter()
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
