//! Simulation entry points and matrix queries

use super::eval::evaluate_access;
use super::pool::{Job, Pool};
use super::subject::{AuthContext, Subject};
use crate::catalog::{Action, ActionCatalog};
use crate::entities::{union_arns, EntityGraph, FrozenPrincipal, FrozenResource};
use crate::error::{Result, SimError};
use crate::iam::condition::is_known_operator;
use crate::iam::Policy;
use crate::options::{Options, PoolConfig};
use crossbeam::channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Most candidates listed in an ambiguous-ARN error
pub const FUZZY_MATCH_LIMIT: usize = 10;

const S3_ARN_PREFIX: &str = "arn:aws:s3:::";

/// Outcome of one simulated request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimResult {
    pub principal: String,
    pub action: String,
    pub resource: Option<String>,
    pub allowed: bool,
    /// Rendered trace, empty unless tracing was enabled
    pub trace: String,
}

/// One allowed principal/action/resource combination
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccessTuple {
    pub principal: String,
    pub action: String,
    pub resource: Option<String>,
}

fn ensure_resolved(arn: &str, unresolved: &[String]) -> Result<()> {
    match unresolved.first() {
        Some(reference) => Err(SimError::UnresolvedReference {
            entity: arn.to_string(),
            reference: reference.clone(),
        }),
        None => Ok(()),
    }
}

fn ensure_known_operators<'p>(policies: impl Iterator<Item = &'p Policy>) -> Result<()> {
    for policy in policies {
        if let Some(op) = policy.condition_operators().find(|op| !is_known_operator(op)) {
            return Err(SimError::UnknownConditionOperator(op.to_string()));
        }
    }
    Ok(())
}

/// Decide one fully-resolved request
pub fn simulate_request(auth: &AuthContext, options: &Options) -> Result<SimResult> {
    auth.validate(options)?;
    let (Some(action), Some(principal)) = (auth.action.as_deref(), auth.principal.as_deref())
    else {
        return Err(SimError::InvalidRequest(
            "missing action or principal".to_string(),
        ));
    };
    let resource = auth.resource.as_deref();

    if options.strict {
        ensure_resolved(&principal.arn, &principal.unresolved)?;
        if let Some(resource) = resource {
            ensure_resolved(&resource.arn, &resource.unresolved)?;
        }
    }
    if options.fail_on_unknown_condition_operator {
        ensure_known_operators(principal.all_policies())?;
        if let Some(resource) = resource {
            ensure_known_operators(resource.all_policies())?;
        }
    }

    let mut subj = Subject::new(auth, options);
    let allowed = evaluate_access(&mut subj);

    let action_name = subj
        .action_name
        .take()
        .unwrap_or_else(|| action.short_name());
    debug!(
        principal = %principal.arn,
        action = %action_name,
        resource = resource.map(|r| r.arn.as_str()).unwrap_or("-"),
        allowed,
        "simulated request"
    );

    Ok(SimResult {
        principal: principal.arn.clone(),
        action: action_name,
        resource: resource.map(|r| r.arn.clone()),
        allowed,
        trace: subj.trace.explain(),
    })
}

/// Pick the single known ARN containing `needle`, ignoring case
fn fuzzy_match(needle: &str, candidates: &[String]) -> Result<Option<String>> {
    let lowered = needle.to_lowercase();
    let matches: Vec<&String> = candidates
        .iter()
        .filter(|c| c.to_lowercase().contains(&lowered))
        .take(FUZZY_MATCH_LIMIT + 1)
        .collect();

    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches[0].clone())),
        _ => Err(SimError::AmbiguousArn {
            arn: needle.to_string(),
            matches: matches
                .into_iter()
                .take(FUZZY_MATCH_LIMIT)
                .cloned()
                .collect(),
        }),
    }
}

/// Authorization simulator over an entity graph and action catalog
pub struct Simulator {
    graph: Arc<dyn EntityGraph>,
    catalog: Arc<dyn ActionCatalog>,
    options: Options,
    pool: Pool,
}

impl Simulator {
    /// Simulator with default options and a pool sized from the environment
    pub fn new(graph: Arc<dyn EntityGraph>, catalog: Arc<dyn ActionCatalog>) -> Self {
        Simulator {
            graph,
            catalog,
            options: Options::default(),
            pool: Pool::from_env(),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_pool_config(mut self, config: PoolConfig) -> Self {
        self.pool = Pool::new(config);
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn simulate(&self, auth: &AuthContext) -> Result<SimResult> {
        simulate_request(auth, &self.options)
    }

    pub fn simulate_with(&self, auth: &AuthContext, options: &Options) -> Result<SimResult> {
        simulate_request(auth, options)
    }

    /// Resolve identifiers against the graph and simulate
    pub fn simulate_by_identifiers(
        &self,
        principal: &str,
        action: &str,
        resource: Option<&str>,
        context: &BTreeMap<String, String>,
    ) -> Result<SimResult> {
        self.simulate_by_identifiers_with(principal, action, resource, context, &self.options)
    }

    pub fn simulate_by_identifiers_with(
        &self,
        principal: &str,
        action: &str,
        resource: Option<&str>,
        context: &BTreeMap<String, String>,
        options: &Options,
    ) -> Result<SimResult> {
        let action = self.lookup_action(action)?;
        let principal = self.resolve_principal(principal, options)?;
        let resource = match resource {
            Some(arn) if action.has_targets() => {
                Some(self.resolve_target(arn, &action, &principal, options)?)
            }
            _ => None,
        };

        let mut auth = AuthContext::new(action, principal, resource);
        for (key, value) in context {
            auth.properties.insert(key, value.clone());
        }
        simulate_request(&auth, options)
    }

    fn lookup_action(&self, name: &str) -> Result<Arc<Action>> {
        self.catalog
            .lookup(name)
            .ok_or_else(|| SimError::UnknownAction(name.to_string()))
    }

    fn principal_arns(&self, options: &Options) -> Vec<String> {
        let overlay = options.overlay.as_ref().map(|o| o.principal_arns());
        union_arns(overlay.into_iter().chain(Some(self.graph.principal_arns())))
    }

    fn resource_arns(&self, options: &Options) -> Vec<String> {
        let overlay = options.overlay.as_ref().map(|o| o.resource_arns());
        union_arns(overlay.into_iter().chain(Some(self.graph.resource_arns())))
    }

    fn find_principal(&self, arn: &str, options: &Options) -> Option<Arc<FrozenPrincipal>> {
        options
            .overlay
            .as_ref()
            .and_then(|o| o.principal(arn))
            .or_else(|| self.graph.principal(arn))
    }

    fn find_resource(&self, arn: &str, options: &Options) -> Option<Arc<FrozenResource>> {
        options
            .overlay
            .as_ref()
            .and_then(|o| o.resource(arn))
            .or_else(|| self.graph.resource(arn))
    }

    /// Overlay first, then the base graph, then a fuzzy match if enabled
    pub fn resolve_principal(&self, arn: &str, options: &Options) -> Result<Arc<FrozenPrincipal>> {
        if let Some(principal) = self.find_principal(arn, options) {
            return Ok(principal);
        }
        if options.enable_fuzzy_arn_matching {
            if let Some(found) = fuzzy_match(arn, &self.principal_arns(options))? {
                warn!(requested = arn, resolved = %found, "fuzzy principal match");
                if let Some(principal) = self.find_principal(&found, options) {
                    return Ok(principal);
                }
            }
        }
        Err(SimError::PrincipalNotFound(arn.to_string()))
    }

    pub fn resolve_resource(&self, arn: &str, options: &Options) -> Result<Arc<FrozenResource>> {
        if let Some(resource) = self.find_resource(arn, options) {
            return Ok(resource);
        }
        if options.enable_fuzzy_arn_matching {
            if let Some(found) = fuzzy_match(arn, &self.resource_arns(options))? {
                warn!(requested = arn, resolved = %found, "fuzzy resource match");
                if let Some(resource) = self.find_resource(&found, options) {
                    return Ok(resource);
                }
            }
        }
        Err(SimError::ResourceNotFound(arn.to_string()))
    }

    /// Resolve a target, synthesizing it for `Create*` actions when unknown
    fn resolve_target(
        &self,
        arn: &str,
        action: &Action,
        principal: &FrozenPrincipal,
        options: &Options,
    ) -> Result<Arc<FrozenResource>> {
        match self.resolve_resource(arn, options) {
            Err(SimError::ResourceNotFound(_)) if action.name.starts_with("Create") => {
                debug!(arn, action = %action.short_name(), "synthesizing created resource");
                Ok(Arc::new(synthesize_resource(arn, action, principal)))
            }
            other => other,
        }
    }

    /// A resource and, for S3 buckets with a default object key, its object
    fn expand(&self, resource: Arc<FrozenResource>, options: &Options) -> Vec<Arc<FrozenResource>> {
        let object = options.default_s3_object_key.as_deref().and_then(|key| {
            let bucket = resource.arn.strip_prefix(S3_ARN_PREFIX)?;
            (!bucket.contains('/')).then(|| Arc::new(resource.subresource(key)))
        });
        std::iter::once(resource).chain(object).collect()
    }

    fn can_target(action: &Action, resource: &FrozenResource, options: &Options) -> bool {
        options.skip_service_authorization_validation || action.targets(&resource.arn)
    }

    /// One job per principal, action and applicable resource
    ///
    /// Actions without targets pair with no resource.
    fn matrix_jobs(
        principals: &[Arc<FrozenPrincipal>],
        actions: &[Arc<Action>],
        resources: &[Arc<FrozenResource>],
        options: &Options,
    ) -> Vec<Job> {
        let shared = Arc::new(options.clone());
        let mut jobs = Vec::new();
        for principal in principals {
            for action in actions {
                if !action.has_targets() {
                    let context = AuthContext::new(Arc::clone(action), Arc::clone(principal), None);
                    jobs.push(Job::new(context, Arc::clone(&shared)));
                    continue;
                }
                for resource in resources {
                    if !Self::can_target(action, resource, options) {
                        continue;
                    }
                    let context = AuthContext::new(
                        Arc::clone(action),
                        Arc::clone(principal),
                        Some(Arc::clone(resource)),
                    );
                    jobs.push(Job::new(context, Arc::clone(&shared)));
                }
            }
        }
        jobs
    }

    /// Run a matrix on the pool and keep the allowed combinations
    ///
    /// Tuples come back in job order.
    fn allowed_tuples(&self, query: &str, jobs: Vec<Job>) -> Result<Vec<AccessTuple>> {
        let started = Instant::now();
        let total = jobs.len();
        let allowed: Vec<AccessTuple> = self
            .run_matrix(jobs)?
            .into_iter()
            .filter(|r| r.allowed)
            .map(|r| AccessTuple {
                principal: r.principal,
                action: r.action,
                resource: r.resource,
            })
            .collect();

        info!(
            query,
            requests = total,
            allowed = allowed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "matrix finished"
        );
        Ok(allowed)
    }

    fn known_principals(&self, options: &Options) -> Vec<Arc<FrozenPrincipal>> {
        self.principal_arns(options)
            .iter()
            .filter_map(|arn| self.find_principal(arn, options))
            .collect()
    }

    /// Every known resource, each followed by its default S3 object if configured
    fn expanded_resources(&self, options: &Options) -> Vec<Arc<FrozenResource>> {
        self.resource_arns(options)
            .iter()
            .filter_map(|arn| self.find_resource(arn, options))
            .flat_map(|resource| self.expand(resource, options))
            .collect()
    }

    /// Every principal allowed to perform `action`
    pub fn which_principals(
        &self,
        action: &str,
        resource: Option<&str>,
        options: &Options,
    ) -> Result<Vec<String>> {
        let action = self.lookup_action(action)?;
        let resources = match resource {
            Some(arn) if action.has_targets() => vec![self.resolve_resource(arn, options)?],
            _ => Vec::new(),
        };

        let jobs = Self::matrix_jobs(&self.known_principals(options), &[action], &resources, options);
        let allowed = self.allowed_tuples("which_principals", jobs)?;
        Ok(allowed.into_iter().map(|t| t.principal).collect())
    }

    /// Every action of the resource's service the principal may perform on it
    pub fn which_actions(
        &self,
        principal: &str,
        resource: &str,
        options: &Options,
    ) -> Result<Vec<String>> {
        let principal = self.resolve_principal(principal, options)?;
        let resource = self.resolve_resource(resource, options)?;
        let service = resource.arn.split(':').nth(2).unwrap_or_default();

        let actions: Vec<Arc<Action>> = self
            .catalog
            .actions_for_service(service)
            .into_iter()
            .filter(|action| action.targets(&resource.arn))
            .collect();

        let jobs = Self::matrix_jobs(&[principal], &actions, &[resource], options);
        let allowed = self.allowed_tuples("which_actions", jobs)?;
        Ok(allowed.into_iter().map(|t| t.action).collect())
    }

    /// Every resource the principal may perform `action` on
    pub fn which_resources(
        &self,
        principal: &str,
        action: &str,
        options: &Options,
    ) -> Result<Vec<String>> {
        let action = self.lookup_action(action)?;
        let principal = self.resolve_principal(principal, options)?;
        if !action.has_targets() {
            return Ok(Vec::new());
        }

        let resources = self.expanded_resources(options);
        let jobs = Self::matrix_jobs(&[principal], &[action], &resources, options);
        let mut allowed: Vec<String> = self
            .allowed_tuples("which_resources", jobs)?
            .into_iter()
            .filter_map(|t| t.resource)
            .collect();
        allowed.sort();
        allowed.dedup();
        Ok(allowed)
    }

    /// Count, per resource, the principals allowed any of `actions` on it
    ///
    /// Every known resource appears, with zero when nobody has access. With a
    /// default S3 object key the bucket's object is counted as its own entry.
    /// Actions without targets are not counted.
    pub fn access_summary(
        &self,
        actions: &[&str],
        options: &Options,
    ) -> Result<BTreeMap<String, usize>> {
        let actions: Vec<Arc<Action>> = actions
            .iter()
            .map(|name| self.lookup_action(name))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|action| action.has_targets())
            .collect();
        let resources = self.expanded_resources(options);

        let mut access: BTreeMap<String, BTreeSet<String>> = resources
            .iter()
            .map(|r| (r.arn.clone(), BTreeSet::new()))
            .collect();

        let jobs = Self::matrix_jobs(&self.known_principals(options), &actions, &resources, options);
        for tuple in self.allowed_tuples("access_summary", jobs)? {
            if let Some(resource) = tuple.resource {
                access.entry(resource).or_default().insert(tuple.principal);
            }
        }

        Ok(access
            .into_iter()
            .map(|(arn, principals)| (arn, principals.len()))
            .collect())
    }

    /// Every allowed combination of the given principals, actions and resources
    ///
    /// Actions without targets pair with no resource. Requests run on the pool
    /// in batches; a batch that produces no outcome within the pool timeout
    /// fails the whole product.
    pub fn product(
        &self,
        principals: &[&str],
        actions: &[&str],
        resources: &[&str],
        options: &Options,
    ) -> Result<Vec<AccessTuple>> {
        let principals = principals
            .iter()
            .map(|arn| self.resolve_principal(arn, options))
            .collect::<Result<Vec<_>>>()?;
        let actions = actions
            .iter()
            .map(|name| self.lookup_action(name))
            .collect::<Result<Vec<_>>>()?;
        let resources = resources
            .iter()
            .map(|arn| self.resolve_resource(arn, options))
            .collect::<Result<Vec<_>>>()?;

        let jobs = Self::matrix_jobs(&principals, &actions, &resources, options);
        let mut allowed = self.allowed_tuples("product", jobs)?;
        allowed.sort();
        Ok(allowed)
    }

    fn run_matrix(&self, jobs: Vec<Job>) -> Result<Vec<SimResult>> {
        let batch_size = self.pool.batch_size().max(1);
        let timeout = self.pool.timeout();
        let total = jobs.len();

        let mut pending = Vec::new();
        let mut jobs = jobs.into_iter().peekable();
        while jobs.peek().is_some() {
            let batch: Vec<Job> = jobs.by_ref().take(batch_size).collect();
            let expected = batch.len();
            pending.push((self.pool.submit(batch)?, expected));
        }

        let mut results = Vec::with_capacity(total);
        for (outcomes, expected) in pending {
            let deadline = Instant::now() + timeout;
            for _ in 0..expected {
                match outcomes.recv_deadline(deadline) {
                    Ok(outcome) => results.push(outcome?),
                    Err(RecvTimeoutError::Timeout) => return Err(SimError::Timeout(timeout)),
                    Err(RecvTimeoutError::Disconnected) => return Err(SimError::PoolStopped),
                }
            }
        }
        Ok(results)
    }
}

fn synthesize_resource(arn: &str, action: &Action, principal: &FrozenPrincipal) -> FrozenResource {
    let resource_type = action
        .resources
        .first()
        .map(|r| r.name.clone())
        .unwrap_or_default();
    let region = arn.split(':').nth(3).unwrap_or_default().to_string();
    FrozenResource {
        resource_type,
        account_id: principal.account_id.clone(),
        region,
        arn: arn.to_string(),
        account: principal.account.clone(),
        ..Default::default()
    }
}
