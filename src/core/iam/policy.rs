//! IAM Policy document structure
//!
//! Policies follow the AWS IAM JSON grammar:
//! - `Statement` may be a single object or an array
//! - `Action`, `Resource` and condition values may be a string or a list
//! - `Principal` is `"*"` or a map of principal kinds to identifiers
//!
//! Grammar invariants are checked when a policy is loaded, never during
//! evaluation.

use crate::error::{Result, SimError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Effect of a policy statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    /// Allow the action
    Allow,
    /// Deny the action (takes precedence over Allow)
    Deny,
}

/// A policy value that the grammar allows as either a string or a list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Value(Vec<String>);

impl Value {
    pub fn new(values: Vec<String>) -> Self {
        Value(values)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|v| v == value)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value(vec![value.to_string()])
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value(vec![value])
    }
}

impl From<Vec<String>> for Value {
    fn from(values: Vec<String>) -> Self {
        Value(values)
    }
}

impl From<Vec<&str>> for Value {
    fn from(values: Vec<&str>) -> Self {
        Value(values.into_iter().map(str::to_string).collect())
    }
}

impl<'a> IntoIterator for &'a Value {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Scalars accepted inside a value; booleans and numbers are kept as text
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Flag(bool),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Flag(b) => b.to_string(),
            Scalar::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = OneOrMany::<Scalar>::deserialize(deserializer)?;
        Ok(Value(raw.into_vec().into_iter().map(Scalar::into_text).collect()))
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [single] => serializer.serialize_str(single),
            many => many.serialize(serializer),
        }
    }
}

/// Principal clause: `"*"` or a map of principal kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PrincipalRepr", into = "PrincipalRepr")]
pub struct Principal {
    /// `"Principal": "*"`
    pub all: bool,
    pub aws: Value,
    pub service: Value,
    pub federated: Value,
    pub canonical_user: Value,
}

impl Principal {
    /// The `"*"` principal
    pub fn everyone() -> Self {
        Principal {
            all: true,
            ..Default::default()
        }
    }

    /// A principal clause naming AWS identities
    pub fn aws(values: impl Into<Value>) -> Self {
        Principal {
            aws: values.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.all
            && self.aws.is_empty()
            && self.service.is_empty()
            && self.federated.is_empty()
            && self.canonical_user.is_empty()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PrincipalRepr {
    Wildcard(String),
    Map(PrincipalMap),
}

#[derive(Default, Serialize, Deserialize)]
struct PrincipalMap {
    #[serde(rename = "AWS", default, skip_serializing_if = "Value::is_empty")]
    aws: Value,
    #[serde(rename = "Service", default, skip_serializing_if = "Value::is_empty")]
    service: Value,
    #[serde(rename = "Federated", default, skip_serializing_if = "Value::is_empty")]
    federated: Value,
    #[serde(rename = "CanonicalUser", default, skip_serializing_if = "Value::is_empty")]
    canonical_user: Value,
}

impl TryFrom<PrincipalRepr> for Principal {
    type Error = String;

    fn try_from(repr: PrincipalRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            PrincipalRepr::Wildcard(s) if s == "*" => Ok(Principal::everyone()),
            PrincipalRepr::Wildcard(s) => Err(format!("principal string must be \"*\", got {:?}", s)),
            PrincipalRepr::Map(m) => Ok(Principal {
                all: false,
                aws: m.aws,
                service: m.service,
                federated: m.federated,
                canonical_user: m.canonical_user,
            }),
        }
    }
}

impl From<Principal> for PrincipalRepr {
    fn from(p: Principal) -> Self {
        if p.all {
            return PrincipalRepr::Wildcard("*".to_string());
        }
        PrincipalRepr::Map(PrincipalMap {
            aws: p.aws,
            service: p.service,
            federated: p.federated,
            canonical_user: p.canonical_user,
        })
    }
}

/// Condition block: operator name -> context key -> right-hand values
pub type ConditionBlock = BTreeMap<String, BTreeMap<String, Value>>;

/// A single policy statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Statement ID (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Effect of this statement
    pub effect: Effect,

    #[serde(default, skip_serializing_if = "Principal::is_empty")]
    pub principal: Principal,

    #[serde(default, skip_serializing_if = "Principal::is_empty")]
    pub not_principal: Principal,

    #[serde(default, skip_serializing_if = "Value::is_empty")]
    pub action: Value,

    #[serde(default, skip_serializing_if = "Value::is_empty")]
    pub not_action: Value,

    /// Resources this statement applies to (supports wildcards)
    #[serde(default, skip_serializing_if = "Value::is_empty")]
    pub resource: Value,

    #[serde(default, skip_serializing_if = "Value::is_empty")]
    pub not_resource: Value,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: ConditionBlock,
}

impl Statement {
    /// Create a new statement
    pub fn new(effect: Effect, action: impl Into<Value>, resource: impl Into<Value>) -> Self {
        Statement {
            sid: None,
            effect,
            principal: Principal::default(),
            not_principal: Principal::default(),
            action: action.into(),
            not_action: Value::default(),
            resource: resource.into(),
            not_resource: Value::default(),
            condition: ConditionBlock::new(),
        }
    }

    pub fn with_sid(mut self, sid: &str) -> Self {
        self.sid = Some(sid.to_string());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = principal;
        self
    }

    /// Add one `operator -> key -> values` entry to the condition block
    pub fn with_condition(mut self, operator: &str, key: &str, values: impl Into<Value>) -> Self {
        self.condition
            .entry(operator.to_string())
            .or_default()
            .insert(key.to_string(), values.into());
        self
    }

    /// Validate against the identity-policy grammar
    ///
    /// Also used for SCPs, RCPs and permission boundaries.
    pub fn validate(&self) -> Result<()> {
        self.validate_common()?;
        if self.resource.is_empty() == self.not_resource.is_empty() {
            return Err(self.invalid("exactly one of Resource or NotResource is required"));
        }
        Ok(())
    }

    /// Validate against the resource-policy grammar
    ///
    /// A principal clause is required and the resource clause may be omitted,
    /// as in role trust policies.
    pub fn validate_resource_policy(&self) -> Result<()> {
        self.validate_common()?;
        if self.principal.is_empty() && self.not_principal.is_empty() {
            return Err(self.invalid("exactly one of Principal or NotPrincipal is required"));
        }
        if !self.resource.is_empty() && !self.not_resource.is_empty() {
            return Err(self.invalid("Resource and NotResource are mutually exclusive"));
        }
        Ok(())
    }

    fn validate_common(&self) -> Result<()> {
        if !self.principal.is_empty() && !self.not_principal.is_empty() {
            return Err(self.invalid("Principal and NotPrincipal are mutually exclusive"));
        }
        if self.action.is_empty() == self.not_action.is_empty() {
            return Err(self.invalid("exactly one of Action or NotAction is required"));
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> SimError {
        match &self.sid {
            Some(sid) => SimError::InvalidPolicy(format!("statement {:?}: {}", sid, reason)),
            None => SimError::InvalidPolicy(format!("statement: {}", reason)),
        }
    }
}

fn one_or_many_statements<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<Statement>, D::Error> {
    Ok(OneOrMany::<Statement>::deserialize(deserializer)?.into_vec())
}

/// Complete IAM policy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Policy {
    /// Policy format version
    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// List of policy statements
    #[serde(default, deserialize_with = "one_or_many_statements")]
    pub statement: Vec<Statement>,
}

impl Policy {
    /// Create a new empty policy
    pub fn new() -> Self {
        Policy {
            version: "2012-10-17".to_string(),
            id: None,
            statement: Vec::new(),
        }
    }

    /// Create a policy from a list of statements
    pub fn with_statements(statements: Vec<Statement>) -> Self {
        Policy {
            statement: statements,
            ..Self::new()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Add a statement to this policy
    pub fn add_statement(&mut self, statement: Statement) {
        self.statement.push(statement);
    }

    /// Parse and validate an identity policy (also SCPs, RCPs, boundaries)
    pub fn from_json(json: &str) -> Result<Self> {
        let policy: Policy = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Parse and validate a resource policy
    pub fn resource_policy_from_json(json: &str) -> Result<Self> {
        let policy: Policy = serde_json::from_str(json)?;
        policy.validate_resource_policy()?;
        Ok(policy)
    }

    /// Serialize policy to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate policy structure against the identity grammar
    pub fn validate(&self) -> Result<()> {
        if self.statement.is_empty() {
            return Err(SimError::InvalidPolicy(
                "Policy must have at least one statement".to_string(),
            ));
        }
        self.statement.iter().try_for_each(Statement::validate)
    }

    /// Validate policy structure against the resource-policy grammar
    pub fn validate_resource_policy(&self) -> Result<()> {
        if self.statement.is_empty() {
            return Err(SimError::InvalidPolicy(
                "Policy must have at least one statement".to_string(),
            ));
        }
        self.statement
            .iter()
            .try_for_each(Statement::validate_resource_policy)
    }

    /// Every condition operator name used by this policy
    pub fn condition_operators(&self) -> impl Iterator<Item = &str> {
        self.statement
            .iter()
            .flat_map(|s| s.condition.keys().map(String::as_str))
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new()
    }
}
