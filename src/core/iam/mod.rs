//! Policy language for the simulator
//!
//! Provides:
//! - JSON policy documents with identity and resource-policy grammars
//! - Wildcard matching for actions, resources and ARNs
//! - The condition operator registry with policy-variable substitution
//! - Per-thread caching of compiled wildcard patterns

mod cache;
pub mod condition;
pub mod keys;
mod pattern;
mod policy;

pub use cache::{PatternCache, DEFAULT_PATTERN_CACHE_CAPACITY};
pub use condition::{ConditionKeys, ConditionOperator, Evaluator};
pub use pattern::PatternMatcher;
pub use policy::{ConditionBlock, Effect, Policy, Principal, Statement, Value};
