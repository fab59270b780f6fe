//! Access simulation
//!
//! A request is an [`AuthContext`]: action, principal, optional resource and
//! condition-key properties. [`simulate_request`] decides it synchronously;
//! [`Simulator`] resolves identifiers against an entity graph and runs
//! matrix queries, fanning large ones out over a [`Pool`].

mod bag;
mod decision;
mod eval;
mod pool;
mod simulator;
mod statement;
mod subject;
mod trace;

pub use bag::PropertyBag;
pub use decision::Decision;
pub use eval::RCP_SERVICES;
pub use pool::{Job, Pool, QUEUE_CAPACITY};
pub use simulator::{simulate_request, AccessTuple, SimResult, Simulator, FUZZY_MATCH_LIMIT};
pub use subject::{AuthContext, RequestKeys};
pub use trace::Trace;
