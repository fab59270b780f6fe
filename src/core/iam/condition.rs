//! Condition evaluation for IAM policies
//!
//! An operator name such as `ForAllValues:StringNotEqualsIfExists` resolves
//! through three layers:
//! - a comparator (`StringEquals`, `NumericLessThan`, `IpAddress`, ...)
//! - modifiers: negation, case folding, policy-variable substitution, and an
//!   existence gate (`IfExists` suffix, otherwise the key must exist)
//! - a quantifier over multi-valued context keys (`ForAllValues:`,
//!   `ForAnyValue:`)
//!
//! An operand that fails to coerce makes only that one comparison false; the
//! error is written to the trace.
//! Unknown operators never match.

use super::pattern::PatternMatcher;
use super::policy::ConditionBlock;
use crate::sim::Trace;
use ahash::AHashMap;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use ipnetwork::IpNetwork;
use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::net::IpAddr;
use thiserror::Error;

/// Source of condition key values for one request
///
/// Keys are case-insensitive. An absent key yields `None` (single-valued)
/// or an empty list (multi-valued).
pub trait ConditionKeys {
    fn single(&self, key: &str) -> Option<String>;
    fn multi(&self, key: &str) -> Vec<String>;
}

/// Base comparator of a condition operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    StringEquals,
    /// String matches pattern (supports `*` and `?`)
    StringLike,
    NumericEquals,
    NumericLessThan,
    NumericLessThanEquals,
    NumericGreaterThan,
    NumericGreaterThanEquals,
    DateEquals,
    DateLessThan,
    DateLessThanEquals,
    DateGreaterThan,
    DateGreaterThanEquals,
    /// `true`/`false` text equality
    Bool,
    /// Base64-decoded byte equality
    BinaryEquals,
    /// Context address inside a policy CIDR
    IpAddress,
    /// ARN matching (wildcards allowed in both)
    ArnLike,
}

/// Operand that could not be coerced to the type an operator compares
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot read {value:?} as {kind}")]
pub struct CoercionError {
    kind: &'static str,
    value: String,
}

impl CoercionError {
    fn new(kind: &'static str, value: &str) -> Self {
        CoercionError {
            kind,
            value: value.to_string(),
        }
    }
}

type Coerced<T> = std::result::Result<T, CoercionError>;

impl ConditionOperator {
    /// Compare one context value against one policy value
    pub fn compare(self, left: &str, right: &str) -> Coerced<bool> {
        use ConditionOperator::*;

        match self {
            StringEquals => Ok(left == right),
            StringLike => Ok(PatternMatcher::matches_segment(right, left)),
            NumericEquals => Ok(compare_numbers(left, right)? == Ordering::Equal),
            NumericLessThan => Ok(compare_numbers(left, right)? == Ordering::Less),
            NumericLessThanEquals => Ok(compare_numbers(left, right)? != Ordering::Greater),
            NumericGreaterThan => Ok(compare_numbers(left, right)? == Ordering::Greater),
            NumericGreaterThanEquals => Ok(compare_numbers(left, right)? != Ordering::Less),
            DateEquals => Ok(parse_date(left)? == parse_date(right)?),
            DateLessThan => Ok(parse_date(left)? < parse_date(right)?),
            DateLessThanEquals => Ok(parse_date(left)? <= parse_date(right)?),
            DateGreaterThan => Ok(parse_date(left)? > parse_date(right)?),
            DateGreaterThanEquals => Ok(parse_date(left)? >= parse_date(right)?),
            Bool => Ok(parse_bool(left)? == parse_bool(right)?),
            BinaryEquals => Ok(decode_binary(left)? == decode_binary(right)?),
            IpAddress => {
                let addr: IpAddr = left
                    .parse()
                    .map_err(|_| CoercionError::new("IP address", left))?;
                let network: IpNetwork = right
                    .parse()
                    .map_err(|_| CoercionError::new("IP network", right))?;
                Ok(network.contains(addr))
            }
            ArnLike => Ok(PatternMatcher::matches_arn(right, left)),
        }
    }
}

fn compare_numbers(left: &str, right: &str) -> Coerced<Ordering> {
    if let (Ok(l), Ok(r)) = (left.parse::<i64>(), right.parse::<i64>()) {
        return Ok(l.cmp(&r));
    }
    let l = parse_float(left)?;
    let r = parse_float(right)?;
    l.partial_cmp(&r)
        .ok_or_else(|| CoercionError::new("number", right))
}

fn parse_float(value: &str) -> Coerced<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| CoercionError::new("number", value))
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD`, or epoch seconds
pub(crate) fn parse_date(value: &str) -> Coerced<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&dt));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }
    if let Ok(epoch) = value.parse::<i64>() {
        if let Some(dt) = Utc.timestamp_opt(epoch, 0).single() {
            return Ok(dt);
        }
    }
    Err(CoercionError::new("date", value))
}

fn parse_bool(value: &str) -> Coerced<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(CoercionError::new("bool", value)),
    }
}

fn decode_binary(value: &str) -> Coerced<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|_| CoercionError::new("base64", value))
}

/// Modifiers wrapped around a comparator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modifiers {
    /// True iff no policy value matches
    pub negate: bool,
    /// Lowercase both sides first
    pub ignore_case: bool,
    /// Expand `${...}` in policy values
    pub substitute: bool,
}

impl Modifiers {
    const NONE: Modifiers = Modifiers {
        negate: false,
        ignore_case: false,
        substitute: false,
    };
    const VARIABLES: Modifiers = Modifiers {
        substitute: true,
        ..Modifiers::NONE
    };
    const VARIABLES_FOLDED: Modifiers = Modifiers {
        ignore_case: true,
        ..Modifiers::VARIABLES
    };

    const fn negated(self) -> Modifiers {
        Modifiers {
            negate: true,
            ..self
        }
    }
}

/// A named operator from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorSpec {
    pub comparator: ConditionOperator,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    /// Absent key fails
    MustExist,
    /// Absent key passes
    IfExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    /// Single-valued context key
    Single,
    /// Every context value must match; none present passes
    ForAllValues,
    /// Some context value must match; none present fails
    ForAnyValue,
}

/// Fully resolved condition operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluator {
    /// Presence test
    Null,
    Compare {
        spec: OperatorSpec,
        existence: Existence,
        quantifier: Quantifier,
    },
}

static OPERATORS: Lazy<AHashMap<&'static str, OperatorSpec>> = Lazy::new(|| {
    use ConditionOperator::*;

    let none = Modifiers::NONE;
    let vars = Modifiers::VARIABLES;
    let folded = Modifiers::VARIABLES_FOLDED;

    [
        ("StringEquals", StringEquals, vars),
        ("StringNotEquals", StringEquals, vars.negated()),
        ("StringEqualsIgnoreCase", StringEquals, folded),
        ("StringNotEqualsIgnoreCase", StringEquals, folded.negated()),
        ("StringLike", StringLike, vars),
        ("StringNotLike", StringLike, vars.negated()),
        ("NumericEquals", NumericEquals, none),
        ("NumericNotEquals", NumericEquals, none.negated()),
        ("NumericLessThan", NumericLessThan, none),
        ("NumericLessThanEquals", NumericLessThanEquals, none),
        ("NumericGreaterThan", NumericGreaterThan, none),
        ("NumericGreaterThanEquals", NumericGreaterThanEquals, none),
        ("DateEquals", DateEquals, none),
        ("DateNotEquals", DateEquals, none.negated()),
        ("DateLessThan", DateLessThan, none),
        ("DateLessThanEquals", DateLessThanEquals, none),
        ("DateGreaterThan", DateGreaterThan, none),
        ("DateGreaterThanEquals", DateGreaterThanEquals, none),
        ("Bool", Bool, folded),
        ("BinaryEquals", BinaryEquals, none),
        ("IpAddress", IpAddress, none),
        ("NotIpAddress", IpAddress, none.negated()),
        ("ArnEquals", ArnLike, vars),
        ("ArnNotEquals", ArnLike, vars.negated()),
        ("ArnLike", ArnLike, vars),
        ("ArnNotLike", ArnLike, vars.negated()),
    ]
    .into_iter()
    .map(|(name, comparator, modifiers)| {
        (
            name,
            OperatorSpec {
                comparator,
                modifiers,
            },
        )
    })
    .collect()
});

const FOR_ALL_VALUES: &str = "ForAllValues:";
const FOR_ANY_VALUE: &str = "ForAnyValue:";
const FOR_ANY_VALUES: &str = "ForAnyValues:";
const IF_EXISTS: &str = "IfExists";
const NULL: &str = "Null";

/// Resolve an operator name; `None` if unknown
///
/// # Examples
/// ```
/// use iamsim::iam::condition::{resolve, Evaluator, Existence, Quantifier};
///
/// match resolve("ForAllValues:StringLikeIfExists") {
///     Some(Evaluator::Compare { existence, quantifier, .. }) => {
///         assert_eq!(existence, Existence::IfExists);
///         assert_eq!(quantifier, Quantifier::ForAllValues);
///     }
///     other => panic!("unexpected {:?}", other),
/// }
/// assert!(resolve("StringSortaEquals").is_none());
/// ```
pub fn resolve(name: &str) -> Option<Evaluator> {
    let (quantifier, base) = if let Some(rest) = name.strip_prefix(FOR_ALL_VALUES) {
        (Quantifier::ForAllValues, rest)
    } else if let Some(rest) = name.strip_prefix(FOR_ANY_VALUE) {
        (Quantifier::ForAnyValue, rest)
    } else if let Some(rest) = name.strip_prefix(FOR_ANY_VALUES) {
        (Quantifier::ForAnyValue, rest)
    } else {
        (Quantifier::Single, name)
    };

    if base == NULL {
        return Some(Evaluator::Null);
    }

    let (existence, base) = match base.strip_suffix(IF_EXISTS) {
        Some(rest) => (Existence::IfExists, rest),
        None => (Existence::MustExist, base),
    };

    OPERATORS.get(base).map(|spec| Evaluator::Compare {
        spec: *spec,
        existence,
        quantifier,
    })
}

pub fn is_known_operator(name: &str) -> bool {
    resolve(name).is_some()
}

impl Evaluator {
    /// Evaluate this operator for one context key against its policy values
    pub fn evaluate(
        &self,
        key: &str,
        values: &[String],
        keys: &dyn ConditionKeys,
        trace: &mut Trace,
    ) -> bool {
        match *self {
            Evaluator::Null => null_check(key, values, keys),
            Evaluator::Compare {
                spec,
                existence,
                quantifier,
            } => match quantifier {
                Quantifier::Single => {
                    let left = keys.single(key);
                    spec.matches(left.as_deref(), existence, values, keys, trace)
                }
                Quantifier::ForAllValues => context_values(key, keys)
                    .iter()
                    .all(|l| spec.matches(Some(l), existence, values, keys, trace)),
                Quantifier::ForAnyValue => context_values(key, keys)
                    .iter()
                    .any(|l| spec.matches(Some(l), existence, values, keys, trace)),
            },
        }
    }
}

impl OperatorSpec {
    fn matches(
        &self,
        left: Option<&str>,
        existence: Existence,
        values: &[String],
        keys: &dyn ConditionKeys,
        trace: &mut Trace,
    ) -> bool {
        let Some(left) = left else {
            return existence == Existence::IfExists;
        };

        let left = fold(left, self.modifiers.ignore_case);
        let mut any = false;

        for value in values {
            let right = if self.modifiers.substitute {
                substitute(value, keys)
            } else {
                Cow::Borrowed(value.as_str())
            };
            let right = fold(&right, self.modifiers.ignore_case);

            match self.comparator.compare(&left, &right) {
                Ok(true) => {
                    any = true;
                    break;
                }
                Ok(false) => {}
                // Only this comparison fails; later values still count
                Err(e) => trace.log(format_args!("condition operand error: {}", e)),
            }
        }

        any != self.modifiers.negate
    }
}

fn fold(value: &str, ignore_case: bool) -> Cow<'_, str> {
    if ignore_case {
        Cow::Owned(value.to_lowercase())
    } else {
        Cow::Borrowed(value)
    }
}

/// Multi-valued key, or the single-valued key as a one-element list
fn context_values(key: &str, keys: &dyn ConditionKeys) -> Vec<String> {
    let multi = keys.multi(key);
    if !multi.is_empty() {
        return multi;
    }
    keys.single(key).into_iter().collect()
}

fn null_check(key: &str, values: &[String], keys: &dyn ConditionKeys) -> bool {
    let present = keys.single(key).is_some() || !keys.multi(key).is_empty();
    values.iter().any(|v| match v.to_lowercase().as_str() {
        "true" => !present,
        "false" => present,
        _ => false,
    })
}

/// Expand `${key}` policy variables against the request's condition keys
///
/// Absent keys expand to the empty string unless a default is given as
/// `${key, 'default'}`. `${*}`, `${?}` and `${$}` expand to the character.
pub fn substitute<'a>(value: &'a str, keys: &dyn ConditionKeys) -> Cow<'a, str> {
    if !value.contains("${") {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let inner = &rest[start + 2..];
        let Some(end) = inner.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };

        match &inner[..end] {
            "*" => out.push('*'),
            "?" => out.push('?'),
            "$" => out.push('$'),
            variable => {
                let (name, default) = match variable.split_once(',') {
                    Some((name, default)) => (name.trim(), Some(default.trim().trim_matches('\''))),
                    None => (variable.trim(), None),
                };
                match keys.single(name) {
                    Some(resolved) => out.push_str(&resolved),
                    None => out.push_str(default.unwrap_or("")),
                }
            }
        }
        rest = &inner[end + 1..];
    }

    out.push_str(rest);
    Cow::Owned(out)
}

/// Evaluate a statement's whole condition block
///
/// Every `(operator, key)` pair must match. Empty value lists and unknown
/// operators fail; an empty block passes.
pub fn evaluate_block(block: &ConditionBlock, keys: &dyn ConditionKeys, trace: &mut Trace) -> bool {
    for (operator, entries) in block {
        let Some(evaluator) = resolve(operator) else {
            trace.log(format_args!("unknown condition operator: {}", operator));
            return false;
        };
        if entries.is_empty() {
            trace.log(format_args!("condition operator {} has no keys", operator));
            return false;
        }

        for (key, values) in entries {
            if values.is_empty() {
                trace.log(format_args!("condition {} on {} has no values", operator, key));
                return false;
            }
            if !evaluator.evaluate(key, values.as_slice(), keys, trace) {
                trace.observation(format_args!("condition {} on {} did not match", operator, key));
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iam::Value;
    use std::collections::{BTreeMap, HashMap};

    #[derive(Default)]
    struct MapKeys {
        single: HashMap<String, String>,
        multi: HashMap<String, Vec<String>>,
    }

    impl MapKeys {
        fn with(mut self, key: &str, value: &str) -> Self {
            self.single.insert(key.to_lowercase(), value.to_string());
            self
        }

        fn with_multi(mut self, key: &str, values: &[&str]) -> Self {
            self.multi.insert(
                key.to_lowercase(),
                values.iter().map(|v| v.to_string()).collect(),
            );
            self
        }
    }

    impl ConditionKeys for MapKeys {
        fn single(&self, key: &str) -> Option<String> {
            self.single.get(&key.to_lowercase()).cloned()
        }

        fn multi(&self, key: &str) -> Vec<String> {
            self.multi.get(&key.to_lowercase()).cloned().unwrap_or_default()
        }
    }

    fn eval(op: &str, key: &str, values: &[&str], keys: &MapKeys) -> bool {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        let mut trace = Trace::disabled();
        match resolve(op) {
            Some(evaluator) => evaluator.evaluate(key, &values, keys, &mut trace),
            None => false,
        }
    }

    fn block(entries: Vec<(&str, &str, Vec<&str>)>) -> ConditionBlock {
        let mut block: ConditionBlock = BTreeMap::new();
        for (op, key, values) in entries {
            block
                .entry(op.to_string())
                .or_default()
                .insert(key.to_string(), Value::from(values));
        }
        block
    }

    #[test]
    fn test_string_equals() {
        let keys = MapKeys::default().with("aws:PrincipalTag/team", "red");
        assert!(eval("StringEquals", "aws:principaltag/team", &["red"], &keys));
        assert!(eval("StringEquals", "aws:PrincipalTag/team", &["blue", "red"], &keys));
        assert!(!eval("StringEquals", "aws:PrincipalTag/team", &["RED"], &keys));
        assert!(eval("StringEqualsIgnoreCase", "aws:PrincipalTag/team", &["RED"], &keys));
        assert!(!eval("StringNotEquals", "aws:PrincipalTag/team", &["blue", "red"], &keys));
        assert!(eval("StringNotEquals", "aws:PrincipalTag/team", &["blue"], &keys));
        assert!(!eval("StringNotEqualsIgnoreCase", "aws:PrincipalTag/team", &["Red"], &keys));
    }

    #[test]
    fn test_string_like() {
        let keys = MapKeys::default().with("s3:prefix", "home/alice");
        assert!(eval("StringLike", "s3:prefix", &["home/*"], &keys));
        assert!(eval("StringLike", "s3:prefix", &["home/al?ce"], &keys));
        assert!(!eval("StringLike", "s3:prefix", &["tmp/*"], &keys));
        assert!(eval("StringNotLike", "s3:prefix", &["tmp/*"], &keys));
    }

    #[test]
    fn test_missing_key_must_exist() {
        let keys = MapKeys::default();
        assert!(!eval("StringEquals", "aws:SourceVpc", &["vpc-1"], &keys));
        assert!(!eval("StringNotEquals", "aws:SourceVpc", &["vpc-1"], &keys));
        assert!(!eval("StringLike", "", &["bar"], &keys));
    }

    #[test]
    fn test_if_exists() {
        let absent = MapKeys::default();
        let present = MapKeys::default().with("aws:SourceVpc", "vpc-2");
        assert!(eval("StringEqualsIfExists", "aws:SourceVpc", &["vpc-1"], &absent));
        assert!(!eval("StringEqualsIfExists", "aws:SourceVpc", &["vpc-1"], &present));
        assert!(eval("StringNotEqualsIfExists", "aws:SourceVpc", &["vpc-1"], &present));
    }

    #[test]
    fn test_numeric() {
        let keys = MapKeys::default().with("s3:max-keys", "10");
        assert!(eval("NumericEquals", "s3:max-keys", &["10"], &keys));
        assert!(eval("NumericNotEquals", "s3:max-keys", &["11"], &keys));
        assert!(eval("NumericLessThan", "s3:max-keys", &["11"], &keys));
        assert!(!eval("NumericLessThan", "s3:max-keys", &["10"], &keys));
        assert!(eval("NumericLessThanEquals", "s3:max-keys", &["10"], &keys));
        assert!(eval("NumericGreaterThan", "s3:max-keys", &["9.5"], &keys));
        assert!(eval("NumericGreaterThanEquals", "s3:max-keys", &["10"], &keys));
        // A lone malformed operand matches nothing, so the negation holds
        assert!(!eval("NumericEquals", "s3:max-keys", &["ten"], &keys));
        assert!(eval("NumericNotEquals", "s3:max-keys", &["ten"], &keys));
    }

    #[test]
    fn test_malformed_operand_fails_one_comparison() {
        let keys = MapKeys::default()
            .with("s3:max-keys", "5")
            .with("aws:SourceIp", "10.0.0.1")
            .with("aws:CurrentTime", "2024-06-01T12:00:00Z");

        assert!(eval("NumericEquals", "s3:max-keys", &["abc", "5"], &keys));
        assert!(eval("NumericEquals", "s3:max-keys", &["5", "abc"], &keys));
        assert!(!eval("NumericEquals", "s3:max-keys", &["abc", "6"], &keys));
        assert!(eval("IpAddress", "aws:SourceIp", &["bogus", "10.0.0.0/8"], &keys));
        assert!(!eval("IpAddress", "aws:SourceIp", &["bogus", "192.168.0.0/16"], &keys));
        assert!(eval("DateLessThan", "aws:CurrentTime", &["soon", "2025-01-01"], &keys));

        let mut trace = Trace::new(true);
        let values = vec!["abc".to_string(), "5".to_string()];
        let evaluator = resolve("NumericEquals").unwrap();
        assert!(evaluator.evaluate("s3:max-keys", &values, &keys, &mut trace));
        assert!(trace.explain().contains("condition operand error"));
    }

    #[test]
    fn test_negated_operator_with_malformed_operand() {
        let keys = MapKeys::default()
            .with("s3:max-keys", "5")
            .with("aws:SourceIp", "10.0.0.1");

        // The valid operand decides the outcome
        assert!(!eval("NumericNotEquals", "s3:max-keys", &["abc", "5"], &keys));
        assert!(eval("NumericNotEquals", "s3:max-keys", &["abc", "6"], &keys));
        assert!(!eval("NotIpAddress", "aws:SourceIp", &["bogus", "10.0.0.0/8"], &keys));
        assert!(eval("NotIpAddress", "aws:SourceIp", &["bogus", "192.168.0.0/16"], &keys));
        assert!(eval("NotIpAddress", "aws:SourceIp", &["bogus"], &keys));
    }

    #[test]
    fn test_dates() {
        let keys = MapKeys::default().with("aws:CurrentTime", "2024-06-01T12:00:00Z");
        assert!(eval("DateLessThan", "aws:CurrentTime", &["2025-01-01T00:00:00Z"], &keys));
        assert!(eval("DateGreaterThan", "aws:CurrentTime", &["2024-01-01"], &keys));
        assert!(eval("DateEquals", "aws:CurrentTime", &["2024-06-01T12:00:00"], &keys));
        assert!(eval("DateEquals", "aws:CurrentTime", &["1717243200"], &keys));
        assert!(eval("DateNotEquals", "aws:CurrentTime", &["2024-06-02"], &keys));
        assert!(eval("DateLessThanEquals", "aws:CurrentTime", &["2024-06-01T12:00:00Z"], &keys));
        assert!(eval("DateGreaterThanEquals", "aws:CurrentTime", &["2024-06-01T12:00:00Z"], &keys));
        assert!(!eval("DateLessThan", "aws:CurrentTime", &["yesterday"], &keys));
    }

    #[test]
    fn test_bool() {
        let keys = MapKeys::default().with("aws:SecureTransport", "TRUE");
        assert!(eval("Bool", "aws:SecureTransport", &["true"], &keys));
        assert!(!eval("Bool", "aws:SecureTransport", &["false"], &keys));
        assert!(!eval("Bool", "aws:SecureTransport", &["yes"], &keys));
    }

    #[test]
    fn test_binary_equals() {
        let keys = MapKeys::default().with("custom:blob", "aGVsbG8=");
        assert!(eval("BinaryEquals", "custom:blob", &["aGVsbG8="], &keys));
        assert!(!eval("BinaryEquals", "custom:blob", &["d29ybGQ="], &keys));
        assert!(!eval("BinaryEquals", "custom:blob", &["!!not base64!!"], &keys));
    }

    #[test]
    fn test_ip_address() {
        let keys = MapKeys::default().with("aws:SourceIp", "10.1.2.3");
        assert!(eval("IpAddress", "aws:SourceIp", &["10.0.0.0/8"], &keys));
        assert!(eval("IpAddress", "aws:SourceIp", &["10.1.2.3"], &keys));
        assert!(!eval("IpAddress", "aws:SourceIp", &["192.168.0.0/16"], &keys));
        assert!(eval("NotIpAddress", "aws:SourceIp", &["192.168.0.0/16"], &keys));
        assert!(!eval("IpAddress", "aws:SourceIp", &["not-a-cidr"], &keys));

        let v6 = MapKeys::default().with("aws:SourceIp", "2001:db8::1");
        assert!(eval("IpAddress", "aws:SourceIp", &["2001:db8::/32"], &v6));
    }

    #[test]
    fn test_arn_operators() {
        let keys = MapKeys::default().with("aws:SourceArn", "arn:aws:sns:us-east-1:111122223333:topic");
        assert!(eval("ArnLike", "aws:SourceArn", &["arn:aws:sns:*:111122223333:*"], &keys));
        assert!(eval("ArnEquals", "aws:SourceArn", &["arn:aws:sns:us-east-1:111122223333:topic"], &keys));
        assert!(eval("ArnNotLike", "aws:SourceArn", &["arn:aws:sqs:*:*:*"], &keys));
        assert!(!eval("ArnNotEquals", "aws:SourceArn", &["arn:aws:sns:*:111122223333:topic"], &keys));
    }

    #[test]
    fn test_for_all_values() {
        let keys = MapKeys::default().with_multi("aws:TagKeys", &["foo", "bar", "baz"]);
        assert!(eval("ForAllValues:StringEquals", "aws:TagKeys", &["foo", "bar", "baz"], &keys));
        assert!(!eval("ForAllValues:StringEquals", "aws:TagKeys", &["foo", "bar"], &keys));

        // Vacuous when the key is absent
        let empty = MapKeys::default();
        assert!(eval("ForAllValues:StringEquals", "aws:TagKeys", &["foo"], &empty));

        // Falls back to the single-valued key
        let single = MapKeys::default().with("aws:TagKeys", "foo");
        assert!(eval("ForAllValues:StringEquals", "aws:TagKeys", &["foo"], &single));
        assert!(!eval("ForAllValues:StringEquals", "aws:TagKeys", &["bar"], &single));
    }

    #[test]
    fn test_for_any_value() {
        let keys = MapKeys::default().with_multi("aws:TagKeys", &["foo", "bar"]);
        assert!(eval("ForAnyValue:StringEquals", "aws:TagKeys", &["bar", "qux"], &keys));
        assert!(eval("ForAnyValues:StringLike", "aws:TagKeys", &["b*"], &keys));
        assert!(!eval("ForAnyValue:StringEquals", "aws:TagKeys", &["qux"], &keys));
        assert!(!eval("ForAnyValue:StringEquals", "aws:TagKeys", &["foo"], &MapKeys::default()));
    }

    #[test]
    fn test_null() {
        let absent = MapKeys::default();
        let present = MapKeys::default().with("aws:TokenIssueTime", "2024-01-01T00:00:00Z");
        assert!(eval("Null", "aws:TokenIssueTime", &["true"], &absent));
        assert!(!eval("Null", "aws:TokenIssueTime", &["true"], &present));
        assert!(eval("Null", "aws:TokenIssueTime", &["false"], &present));
        assert!(!eval("Null", "aws:TokenIssueTime", &["false"], &absent));
        assert!(eval("Null", "aws:TokenIssueTime", &["TRUE"], &absent));
        assert!(eval("Null", "aws:TokenIssueTime", &["FALSE"], &present));
        assert!(!eval("Null", "aws:TokenIssueTime", &["maybe"], &absent));

        let multi = MapKeys::default().with_multi("aws:TagKeys", &["a"]);
        assert!(eval("Null", "aws:TagKeys", &["false"], &multi));
        assert!(resolve("NullIfExists").is_none());
    }

    #[test]
    fn test_resolve_unknown() {
        assert!(resolve("StringSortaEquals").is_none());
        assert!(resolve("ForAllValues:Nope").is_none());
        assert!(resolve("stringequals").is_none());
        assert!(is_known_operator("ForAnyValue:ArnLikeIfExists"));
    }

    #[test]
    fn test_substitute() {
        let keys = MapKeys::default()
            .with("aws:username", "alice")
            .with("aws:PrincipalTag/team", "red");
        assert_eq!(substitute("home/${aws:username}/*", &keys), "home/alice/*");
        assert_eq!(substitute("${aws:PrincipalTag/team}-${aws:username}", &keys), "red-alice");
        assert_eq!(substitute("${aws:missing}x", &keys), "x");
        assert_eq!(substitute("${aws:missing, 'anon'}", &keys), "anon");
        assert_eq!(substitute("lit${*}${?}${$}", &keys), "lit*?$");
        assert_eq!(substitute("broken${aws:username", &keys), "broken${aws:username");
        assert!(matches!(substitute("plain", &keys), Cow::Borrowed("plain")));
    }

    #[test]
    fn test_variables_in_condition_values() {
        let keys = MapKeys::default()
            .with("aws:PrincipalTag/team", "red")
            .with("aws:ResourceTag/team", "red");
        assert!(eval(
            "StringEquals",
            "aws:ResourceTag/team",
            &["${aws:PrincipalTag/team}"],
            &keys
        ));
        // Numeric operators take values literally
        let n = MapKeys::default().with("a", "1").with("b", "1");
        assert!(!eval("NumericEquals", "a", &["${b}"], &n));
    }

    #[test]
    fn test_block_conjunction() {
        let keys = MapKeys::default()
            .with("aws:SourceIp", "10.0.0.1")
            .with("aws:PrincipalTag/team", "red");
        let mut trace = Trace::disabled();

        let ok = block(vec![
            ("IpAddress", "aws:SourceIp", vec!["10.0.0.0/8"]),
            ("StringEquals", "aws:PrincipalTag/team", vec!["red"]),
        ]);
        assert!(evaluate_block(&ok, &keys, &mut trace));

        let mixed = block(vec![
            ("IpAddress", "aws:SourceIp", vec!["10.0.0.0/8"]),
            ("StringEquals", "aws:PrincipalTag/team", vec!["blue"]),
        ]);
        assert!(!evaluate_block(&mixed, &keys, &mut trace));

        assert!(evaluate_block(&ConditionBlock::new(), &keys, &mut trace));
    }

    #[test]
    fn test_block_hard_failures() {
        let keys = MapKeys::default().with("k", "v");
        let mut trace = Trace::new(true);

        let empty_values = block(vec![("StringEquals", "k", vec![])]);
        assert!(!evaluate_block(&empty_values, &keys, &mut trace));

        let mut no_keys = ConditionBlock::new();
        no_keys.insert("StringEquals".to_string(), BTreeMap::new());
        assert!(!evaluate_block(&no_keys, &keys, &mut trace));

        let unknown = block(vec![("StringSortaEquals", "k", vec!["v"])]);
        assert!(!evaluate_block(&unknown, &keys, &mut trace));
        assert!(trace.explain().contains("unknown condition operator: StringSortaEquals"));
    }
}
