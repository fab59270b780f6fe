//! Concurrency tests for the simulation pool and shared simulators

use iamsim::sim::Job;
use iamsim::{
    Action, AuthContext, Effect, FrozenPrincipal, FrozenResource, Options, Policy, Pool,
    PoolConfig, ResourceType, Simulator, Snapshot, StaticCatalog, Statement,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const ACCOUNT: &str = "111122223333";

fn catalog() -> Arc<StaticCatalog> {
    let object = ResourceType::new("object", "arn:${Partition}:s3:::${BucketName}/${ObjectName}");
    Arc::new(StaticCatalog::new(vec![
        Action::new("s3", "GetObject").with_resource(object.clone()),
        Action::new("s3", "PutObject").with_resource(object),
        Action::new("s3", "ListAllMyBuckets"),
    ]))
}

/// Users `u0..count`; even users may read, every third may write
fn snapshot(users: usize, objects: usize) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for i in 0..users {
        let mut user = FrozenPrincipal::user(ACCOUNT, &format!("u{}", i));
        let mut statements = Vec::new();
        if i % 2 == 0 {
            statements.push(Statement::new(Effect::Allow, "s3:GetObject", "arn:aws:s3:::data/*"));
        }
        if i % 3 == 0 {
            statements.push(Statement::new(Effect::Allow, "s3:PutObject", "*"));
        }
        if !statements.is_empty() {
            user.inline_policies.push(Policy::with_statements(statements));
        }
        snapshot.add_principal(user);
    }
    for i in 0..objects {
        let arn = format!("arn:aws:s3:::data/obj{}", i);
        snapshot.add_resource(FrozenResource::new(iamsim::entities::S3_OBJECT_TYPE, ACCOUNT, &arn));
    }
    snapshot
}

fn user_arn(i: usize) -> String {
    format!("arn:aws:iam::{}:user/u{}", ACCOUNT, i)
}

#[test]
fn test_product_matches_sequential() {
    let sim = Simulator::new(Arc::new(snapshot(12, 5)), catalog())
        .with_pool_config(PoolConfig::new(4, 7, Duration::from_secs(30)));

    let principals: Vec<String> = (0..12).map(user_arn).collect();
    let resources: Vec<String> = (0..5).map(|i| format!("arn:aws:s3:::data/obj{}", i)).collect();
    let principal_refs: Vec<&str> = principals.iter().map(String::as_str).collect();
    let resource_refs: Vec<&str> = resources.iter().map(String::as_str).collect();
    let actions = ["s3:GetObject", "s3:PutObject", "s3:ListAllMyBuckets"];

    let options = Options::default();
    let tuples = sim
        .product(&principal_refs, &actions, &resource_refs, &options)
        .unwrap();

    let mut expected = 0;
    for i in 0..12 {
        let reads = if i % 2 == 0 { 5 } else { 0 };
        let writes = if i % 3 == 0 { 5 } else { 0 };
        expected += reads + writes;
    }
    assert_eq!(tuples.len(), expected);

    // Pairwise check against single simulations
    for tuple in &tuples {
        let single = sim
            .simulate_by_identifiers(
                &tuple.principal,
                &tuple.action,
                tuple.resource.as_deref(),
                &BTreeMap::new(),
            )
            .unwrap();
        assert!(single.allowed, "{:?}", tuple);
    }

    let mut sorted = tuples.clone();
    sorted.sort();
    assert_eq!(sorted, tuples);
}

#[test]
fn test_shared_simulator_across_threads() {
    let sim = Arc::new(
        Simulator::new(Arc::new(snapshot(8, 3)), catalog())
            .with_pool_config(PoolConfig::new(2, 4, Duration::from_secs(30))),
    );

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let sim = Arc::clone(&sim);
            thread::spawn(move || {
                for round in 0..50 {
                    let user = (t + round) % 8;
                    let result = sim
                        .simulate_by_identifiers(
                            &user_arn(user),
                            "s3:GetObject",
                            Some("arn:aws:s3:::data/obj1"),
                            &BTreeMap::new(),
                        )
                        .unwrap();
                    assert_eq!(result.allowed, user % 2 == 0);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_concurrent_products_share_one_pool() {
    let sim = Arc::new(
        Simulator::new(Arc::new(snapshot(6, 4)), catalog())
            .with_pool_config(PoolConfig::new(3, 2, Duration::from_secs(30))),
    );

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let sim = Arc::clone(&sim);
            thread::spawn(move || {
                let principals: Vec<String> = (0..6).map(user_arn).collect();
                let refs: Vec<&str> = principals.iter().map(String::as_str).collect();
                sim.product(&refs, &["s3:ListAllMyBuckets"], &[], &Options::default())
                    .unwrap()
                    .len()
            })
        })
        .collect();

    for h in handles {
        // Nobody holds a policy granting ListAllMyBuckets
        assert_eq!(h.join().unwrap(), 0);
    }
}

fn job(user: usize) -> Job {
    let mut principal = FrozenPrincipal::user(ACCOUNT, &format!("u{}", user));
    principal
        .inline_policies
        .push(Policy::with_statements(vec![Statement::new(Effect::Allow, "*", "*")]));
    let context = AuthContext::new(
        Arc::new(Action::new("s3", "ListAllMyBuckets")),
        Arc::new(principal),
        None,
    );
    Job::new(context, Arc::new(Options::default()))
}

#[test]
fn test_pool_submit_from_many_threads() {
    let pool = Arc::new(Pool::new(PoolConfig::new(4, 16, Duration::from_secs(30))));

    let handles: Vec<_> = (0..6)
        .map(|t| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let jobs: Vec<Job> = (0..40).map(|i| job(t * 100 + i)).collect();
                let outcomes = pool.submit(jobs).unwrap();
                outcomes.iter().filter(|r| matches!(r, Ok(r) if r.allowed)).count()
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.join().unwrap(), 40);
    }
    pool.stop();
    assert!(!pool.is_running());
}

#[test]
fn test_stop_disconnects_pending_batches() {
    let pool = Pool::new(PoolConfig::new(1, 1, Duration::from_secs(30)));
    let outcomes = pool.submit((0..2000).map(job).collect()).unwrap();
    pool.stop();

    let received = outcomes.iter().count();
    assert!(received <= 2000);
    assert!(outcomes.recv_timeout(Duration::from_millis(10)).is_err());

    let restarted = pool.submit(vec![job(1)]).unwrap();
    let result = restarted.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(result.unwrap().allowed);
    assert!(pool.is_running());
}
