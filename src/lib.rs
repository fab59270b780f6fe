//! # iamsim - Cloud IAM Authorization Simulator
//!
//! `iamsim` decides whether a cloud identity may perform an API action on a
//! resource, combining:
//!
//! - **Identity policies** inline, attached and inherited from groups
//! - **Resource policies** including role trust policies
//! - **Organization controls** (SCPs and RCPs) evaluated layer by layer
//! - **Permission boundaries**
//! - **Conditions** with the full operator family and policy variables
//!
//! Simulations are pure functions of frozen entity snapshots. Nothing talks
//! to a real cloud.
//!
//! ## Quick Start
//!
//! ```rust
//! use iamsim::{
//!     Action, AuthContext, Effect, FrozenPrincipal, Options, Policy, Statement,
//!     simulate_request,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> iamsim::Result<()> {
//! let mut alice = FrozenPrincipal::user("111122223333", "alice");
//! alice.inline_policies.push(Policy::with_statements(vec![
//!     Statement::new(Effect::Allow, "s3:List*", "*"),
//! ]));
//!
//! let request = AuthContext::new(
//!     Arc::new(Action::new("s3", "ListAllMyBuckets")),
//!     Arc::new(alice),
//!     None,
//! );
//! let result = simulate_request(&request, &Options::default())?;
//! assert!(result.allowed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Querying a Snapshot
//!
//! ```rust,no_run
//! use iamsim::{Options, Simulator, Snapshot, StaticCatalog};
//! use std::sync::Arc;
//!
//! # fn main() -> iamsim::Result<()> {
//! let snapshot = Snapshot::from_json(&std::fs::read_to_string("snapshot.json")?)?;
//! let catalog = StaticCatalog::from_json(&std::fs::read_to_string("actions.json")?)?;
//! let sim = Simulator::new(Arc::new(snapshot), Arc::new(catalog));
//!
//! let who = sim.which_principals("s3:GetObject", Some("arn:aws:s3:::bucket/key"), &Options::default())?;
//! println!("{} principals can read the object", who.len());
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{catalog, entities, error, iam, options, sim};

// Re-export the types most callers need
pub use crate::core::{
    catalog::{Action, ActionCatalog, ResourceType, StaticCatalog},
    entities::{
        EntityGraph, FrozenAccount, FrozenGroup, FrozenOrgNode, FrozenPrincipal, FrozenResource,
        ManagedPolicy, Snapshot, Tag,
    },
    error::{Result, SimError},
    iam::{Effect, PatternMatcher, Policy, Principal, Statement, Value},
    options::{Options, PoolConfig},
    sim::{
        simulate_request, AccessTuple, AuthContext, Decision, Pool, SimResult, Simulator, Trace,
    },
};
