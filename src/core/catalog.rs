//! Action authorization metadata
//!
//! Each [`Action`] records its service, name, supported condition keys and the
//! resource types it can target. The catalog is built once and shared
//! read-only between simulations.

use crate::error::Result;
use crate::iam::{keys, PatternMatcher};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A resource type an action may target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub name: String,
    /// Formats such as `arn:${Partition}:s3:::${BucketName}`
    #[serde(default)]
    pub arn_formats: Vec<String>,
    #[serde(default)]
    pub condition_keys: Vec<String>,
}

impl ResourceType {
    pub fn new(name: &str, arn_format: &str) -> Self {
        ResourceType {
            name: name.to_string(),
            arn_formats: vec![arn_format.to_string()],
            condition_keys: Vec::new(),
        }
    }

    /// Whether `arn` fits one of this type's ARN formats
    pub fn matches(&self, arn: &str) -> bool {
        self.arn_formats
            .iter()
            .any(|format| PatternMatcher::matches(&placeholders_to_wildcards(format), arn))
    }

    fn supports_key(&self, key: &str) -> bool {
        declares_key(&self.condition_keys, key)
    }
}

/// Replace every `${...}` placeholder with `*`
fn placeholders_to_wildcards(format: &str) -> String {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start..].find('}') {
            Some(end) => {
                out.push('*');
                rest = &rest[start + end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Declared keys may carry placeholders, e.g. `aws:ResourceTag/${TagKey}`
fn declares_key(declared: &[String], key: &str) -> bool {
    declared.iter().any(|d| {
        let pattern = placeholders_to_wildcards(&d.to_lowercase());
        pattern == key || PatternMatcher::matches_segment(&pattern, key)
    })
}

/// Authorization metadata for one API action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub service: String,
    pub name: String,
    #[serde(default)]
    pub condition_keys: Vec<String>,
    #[serde(default)]
    pub resources: Vec<ResourceType>,
}

impl Action {
    pub fn new(service: &str, name: &str) -> Self {
        Action {
            service: service.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_resource(mut self, resource: ResourceType) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn with_condition_key(mut self, key: &str) -> Self {
        self.condition_keys.push(key.to_string());
        self
    }

    /// `service:Name`, e.g. `s3:GetObject`
    pub fn short_name(&self) -> String {
        format!("{}:{}", self.service, self.name)
    }

    /// Whether the action takes a resource-type-qualified target
    pub fn has_targets(&self) -> bool {
        !self.resources.is_empty()
    }

    /// Whether `arn` is a valid target for this action
    pub fn targets(&self, arn: &str) -> bool {
        self.resources.iter().any(|r| r.matches(arn))
    }

    /// Whether a lowercase condition key applies to this action
    pub fn supports_condition_key(&self, key: &str) -> bool {
        keys::is_global(key)
            || declares_key(&self.condition_keys, key)
            || self.resources.iter().any(|r| r.supports_key(key))
    }
}

/// Resolves API action names to their metadata
pub trait ActionCatalog: Send + Sync {
    /// Case-insensitive lookup of `service:Name`
    fn lookup(&self, name: &str) -> Option<Arc<Action>>;

    /// Every action of a service, sorted by name
    fn actions_for_service(&self, service: &str) -> Vec<Arc<Action>>;
}

/// In-memory catalog
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    actions: AHashMap<String, Arc<Action>>,
    by_service: BTreeMap<String, Vec<Arc<Action>>>,
}

impl StaticCatalog {
    pub fn new(actions: impl IntoIterator<Item = Action>) -> Self {
        let mut catalog = StaticCatalog::default();
        for action in actions {
            catalog.insert(action);
        }
        for list in catalog.by_service.values_mut() {
            list.sort_by(|a, b| a.name.cmp(&b.name));
        }
        catalog
    }

    /// Load a JSON array of actions
    pub fn from_json(json: &str) -> Result<Self> {
        let actions: Vec<Action> = serde_json::from_str(json)?;
        Ok(StaticCatalog::new(actions))
    }

    fn insert(&mut self, action: Action) {
        let action = Arc::new(action);
        let key = action.short_name().to_lowercase();
        if let Some(previous) = self.actions.insert(key, Arc::clone(&action)) {
            let list = self
                .by_service
                .entry(previous.service.to_lowercase())
                .or_default();
            list.retain(|a| !Arc::ptr_eq(a, &previous));
        }
        self.by_service
            .entry(action.service.to_lowercase())
            .or_default()
            .push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl FromIterator<Action> for StaticCatalog {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        StaticCatalog::new(iter)
    }
}

impl ActionCatalog for StaticCatalog {
    fn lookup(&self, name: &str) -> Option<Arc<Action>> {
        self.actions.get(&name.to_lowercase()).cloned()
    }

    fn actions_for_service(&self, service: &str) -> Vec<Arc<Action>> {
        self.by_service
            .get(&service.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_catalog() -> StaticCatalog {
        let bucket = ResourceType::new("bucket", "arn:${Partition}:s3:::${BucketName}");
        let object = ResourceType::new("object", "arn:${Partition}:s3:::${BucketName}/${ObjectName}");
        StaticCatalog::new(vec![
            Action::new("s3", "ListBucket")
                .with_resource(bucket)
                .with_condition_key("s3:prefix"),
            Action::new("s3", "GetObject").with_resource(object),
            Action::new("s3", "ListAllMyBuckets"),
        ])
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(
            placeholders_to_wildcards("arn:${Partition}:s3:::${BucketName}/${ObjectName}"),
            "arn:*:s3:::*/*"
        );
        assert_eq!(placeholders_to_wildcards("plain"), "plain");
        assert_eq!(placeholders_to_wildcards("open${x"), "open${x");
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let catalog = s3_catalog();
        assert_eq!(catalog.len(), 3);
        let action = catalog.lookup("S3:listbucket").unwrap();
        assert_eq!(action.short_name(), "s3:ListBucket");
        assert!(catalog.lookup("s3:DeleteEverything").is_none());
    }

    #[test]
    fn test_targets() {
        let catalog = s3_catalog();
        let list = catalog.lookup("s3:ListBucket").unwrap();
        let get = catalog.lookup("s3:GetObject").unwrap();
        let all = catalog.lookup("s3:ListAllMyBuckets").unwrap();

        assert!(list.has_targets());
        assert!(list.targets("arn:aws:s3:::bucket"));
        assert!(get.targets("arn:aws:s3:::bucket/key"));
        assert!(!get.targets("arn:aws:s3:::bucket"));
        assert!(!list.targets("arn:aws:sqs:us-east-1:111122223333:queue"));
        assert!(!all.has_targets());
    }

    #[test]
    fn test_condition_key_support() {
        let mut action = Action::new("dynamodb", "Query");
        let mut table = ResourceType::new("table", "arn:${Partition}:dynamodb:${Region}:${Account}:table/${TableName}");
        table.condition_keys.push("aws:ResourceTag/${TagKey}".to_string());
        action = action.with_resource(table).with_condition_key("dynamodb:Select");

        assert!(action.supports_condition_key("dynamodb:select"));
        assert!(action.supports_condition_key("aws:resourcetag/foo"));
        assert!(action.supports_condition_key("aws:sourceip"));
        assert!(!action.supports_condition_key("aws:foobar"));
        assert!(!action.supports_condition_key("s3:prefix"));
    }

    #[test]
    fn test_actions_for_service() {
        let catalog = s3_catalog();
        let names: Vec<String> = catalog
            .actions_for_service("S3")
            .iter()
            .map(|a| a.name.clone())
            .collect();
        assert_eq!(names, vec!["GetObject", "ListAllMyBuckets", "ListBucket"]);
        assert!(catalog.actions_for_service("ec2").is_empty());
    }

    #[test]
    fn test_from_json() {
        let catalog = StaticCatalog::from_json(
            r#"[{"service": "sqs", "name": "SendMessage",
                 "resources": [{"name": "queue", "arn_formats": ["arn:${Partition}:sqs:${Region}:${Account}:${QueueName}"]}]}]"#,
        )
        .unwrap();
        let action = catalog.lookup("sqs:sendmessage").unwrap();
        assert!(action.targets("arn:aws:sqs:us-east-1:111122223333:queue"));
    }
}
